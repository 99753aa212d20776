//! Per-action limits. These are call-site constants, not configuration.

use std::time::Duration;

use super::RateLimitOptions;

const MINUTE: Duration = Duration::from_secs(60);

/// Limit for one kind of action, keyed per caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub action: &'static str,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(action: &'static str, limit: u32, window: Duration) -> Self {
        Self { action, limit, window }
    }

    /// Options for `identity` under this rule, keyed `"<action>:<identity>"`.
    pub fn options(&self, identity: &str) -> RateLimitOptions {
        RateLimitOptions {
            key: format!("{}:{}", self.action, identity),
            limit: self.limit,
            window: self.window,
        }
    }
}

/// Link previews, per user.
pub const UNFURL: RateLimitRule = RateLimitRule::new("unfurl", 30, MINUTE);

/// Account creation, per client IP.
pub const SIGN_UP: RateLimitRule = RateLimitRule::new("signup", 5, Duration::from_secs(15 * 60));

pub const FOLLOW_USER: RateLimitRule = RateLimitRule::new("follow_user", 20, MINUTE);
pub const UNFOLLOW_USER: RateLimitRule = RateLimitRule::new("unfollow_user", 20, MINUTE);
pub const BLOCK_USER: RateLimitRule = RateLimitRule::new("block_user", 10, MINUTE);
pub const UNBLOCK_USER: RateLimitRule = RateLimitRule::new("unblock_user", 10, MINUTE);
pub const CREATE_SHARE: RateLimitRule = RateLimitRule::new("create_share", 10, MINUTE);
pub const COMPLETE_ONBOARDING: RateLimitRule = RateLimitRule::new("complete_onboarding", 5, MINUTE);
