use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{AppState, error::AppError, rate_limit::RateLimitRule};

/// 全局按 IP 限流，在任何路由处理之前执行
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&req, state.config.trust_proxy_headers);
    let rule = RateLimitRule::new(
        "request",
        state.config.rate_limit_requests,
        state.config.rate_limit_window(),
    );

    let result = state.limiter.check(&rule.options(&ip));
    if !result.success {
        tracing::info!(ip = %ip, "Request rate limit exceeded");
        return Err(AppError::RateLimited {
            retry_after_secs: state.limiter.retry_after_secs(&result),
        });
    }

    Ok(next.run(req).await)
}

/// 客户端 IP：默认取连接信息；只有信任反向代理时才读取代理头部
pub fn client_ip(req: &Request<Body>, trust_proxy_headers: bool) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let forwarded = trust_proxy_headers
        .then(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .or_else(|| {
                    req.headers()
                        .get("x-forwarded-for")
                        .and_then(|h| h.to_str().ok())
                        .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
                })
        })
        .flatten();

    forwarded
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}
