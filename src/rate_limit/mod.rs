//! In-memory sliding window rate limiter.
//!
//! Each key keeps the timestamps of its admitted requests inside the trailing
//! window. Expired timestamps are pruned on every check. An owned background
//! sweep drops keys whose newest timestamp is past both the idle TTL and the
//! key's own window.
//!
//! [`RateLimiter::check`] cannot fail: internal faults admit the request.

mod clock;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use clock::{Clock, ManualClock, SystemClock};
pub use rules::RateLimitRule;

/// Keys idle for this many sweep intervals are dropped.
const IDLE_SWEEPS: u32 = 15;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOptions {
    /// Opaque bucket key, usually `"<action>:<identity>"`.
    pub key: String,
    /// Requests admitted per window.
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub success: bool,
    pub remaining: u32,
    /// Milliseconds since the epoch. When denied, the earliest moment a slot frees up.
    pub reset_at: i64,
}

#[derive(Debug, Error)]
enum LimiterFault {
    #[error("window of {0:?} does not fit in milliseconds")]
    WindowOutOfRange(Duration),

    #[error("clock reading {0} out of range")]
    ClockOutOfRange(i64),
}

/// 单个 key 的状态：最近一次检查使用的窗口和窗口内的请求时间戳
#[derive(Debug, Default)]
struct Bucket {
    window_ms: i64,
    stamps: Vec<i64>,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
}

impl RateLimiter {
    pub fn new(sweep_interval: Duration) -> Self {
        Self::with_clock(Arc::new(SystemClock), sweep_interval)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, sweep_interval: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
            sweep_interval,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Check and record one request against `options`.
    ///
    /// The read-modify-write for a key happens under that key's shard lock,
    /// so two concurrent calls cannot both take the last slot.
    pub fn check(&self, options: &RateLimitOptions) -> RateLimitResult {
        let now = self.clock.now_ms();
        match self.try_check(options, now) {
            Ok(result) => {
                if !result.success {
                    tracing::info!(key = %options.key, reset_at = result.reset_at, "rate limit exceeded");
                }
                result
            }
            Err(fault) => {
                tracing::warn!(key = %options.key, error = %fault, "rate limiter fault, admitting request");
                let window = i64::try_from(options.window.as_millis()).unwrap_or(i64::MAX);
                RateLimitResult {
                    success: true,
                    remaining: 1,
                    reset_at: now.saturating_add(window),
                }
            }
        }
    }

    fn try_check(&self, options: &RateLimitOptions, now: i64) -> Result<RateLimitResult, LimiterFault> {
        let window = i64::try_from(options.window.as_millis())
            .map_err(|_| LimiterFault::WindowOutOfRange(options.window))?;
        let window_start = now.checked_sub(window).ok_or(LimiterFault::ClockOutOfRange(now))?;
        let reset_from_now = now.checked_add(window).ok_or(LimiterFault::ClockOutOfRange(now))?;

        let mut bucket = self.buckets.entry(options.key.clone()).or_default();
        bucket.window_ms = window;
        // 只丢弃已经滑出窗口的时间戳
        bucket.stamps.retain(|&t| t > window_start);

        let count = bucket.stamps.len();
        if count >= options.limit as usize {
            let reset_at = match bucket.stamps.iter().min() {
                Some(&oldest) => oldest.saturating_add(window),
                None => reset_from_now,
            };
            return Ok(RateLimitResult {
                success: false,
                remaining: 0,
                reset_at,
            });
        }

        bucket.stamps.push(now);
        Ok(RateLimitResult {
            success: true,
            remaining: options.limit - bucket.stamps.len() as u32,
            reset_at: reset_from_now,
        })
    }

    /// Whole seconds until `result.reset_at`, never less than one.
    pub fn retry_after_secs(&self, result: &RateLimitResult) -> u64 {
        let wait_ms = result.reset_at.saturating_sub(self.clock.now_ms()).max(0) as u64;
        wait_ms.div_ceil(1000).max(1)
    }

    /// Drop keys whose newest timestamp is older than the idle TTL.
    /// Returns the number of keys removed.
    ///
    /// A key is never dropped while its newest timestamp is still inside the
    /// key's own window, however short the sweep interval is.
    pub fn sweep(&self) -> usize {
        let idle_ttl = self
            .sweep_interval
            .checked_mul(IDLE_SWEEPS)
            .and_then(|ttl| i64::try_from(ttl.as_millis()).ok())
            .unwrap_or(i64::MAX);
        let now = self.clock.now_ms();

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let cutoff = now.saturating_sub(idle_ttl.max(bucket.window_ms));
            bucket.stamps.iter().max().is_some_and(|&newest| newest > cutoff)
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Run [`sweep`](Self::sweep) every sweep interval until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 会立即完成
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = limiter.store_len(), "swept idle rate limit keys");
                        }
                    }
                }
            }
            tracing::debug!("rate limit sweeper stopped");
        })
    }

    /// Number of tracked keys.
    pub fn store_len(&self) -> usize {
        self.buckets.len()
    }

    /// Forget every key.
    pub fn reset(&self) {
        self.buckets.clear();
    }
}
