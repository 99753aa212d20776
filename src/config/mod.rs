use std::env;
use std::time::Duration;

use crate::unfurl::DEFAULT_USER_AGENT;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_sweep_secs: u64,
    pub unfurl_user_agent: String,
    /// 仅在反向代理之后部署时开启，否则客户端可以伪造来源 IP
    pub trust_proxy_headers: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: parsed("SERVER_PORT").unwrap_or(3000),
            api_base_uri: optional("API_BASE_URI").unwrap_or_else(|| "/api".into()),
            rate_limit_window_secs: parsed("RATE_LIMIT_WINDOW").unwrap_or(60),
            rate_limit_requests: parsed("RATE_LIMIT_REQUESTS").unwrap_or(100),
            rate_limit_sweep_secs: parsed("RATE_LIMIT_SWEEP_SECS").unwrap_or(60),
            unfurl_user_agent: optional("UNFURL_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.into()),
            trust_proxy_headers: parsed("TRUST_PROXY_HEADERS").unwrap_or(false),
        })
    }

    /// 全局按 IP 限流的时间窗口
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// 限流器清理间隔
    pub fn rate_limit_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_secs.max(1))
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    optional(name).and_then(|v| v.trim().parse().ok())
}
