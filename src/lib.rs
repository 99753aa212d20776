use std::sync::Arc;

use config::Config;
use rate_limit::RateLimiter;
use unfurl::UnfurlEngine;

pub mod config;
pub mod error;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod routes;
pub mod unfurl;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub limiter: Arc<RateLimiter>,
    pub unfurler: UnfurlEngine,
}
