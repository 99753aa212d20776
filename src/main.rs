use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unfurl_backend::{
    AppState,
    config::Config,
    rate_limit::RateLimiter,
    router::create_router,
    unfurl::{DnsHostGuard, FetchPolicy, HickoryResolver, UnfurlEngine},
};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置 DNS 解析器和链接预览引擎
    let resolver = HickoryResolver::from_system_conf().expect("Failed to read system DNS configuration");
    let guard = DnsHostGuard::new(Arc::new(resolver));
    let policy = FetchPolicy {
        user_agent: config.unfurl_user_agent.clone(),
        ..FetchPolicy::default()
    };
    let unfurler = UnfurlEngine::with_guard(Arc::new(guard), policy);

    // 设置限流器及其后台清理任务
    let shutdown = CancellationToken::new();
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_sweep_interval()));
    let sweeper = limiter.spawn_sweeper(shutdown.clone());

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        limiter,
        unfurler,
    };

    let app = create_router(state);

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .expect("Failed to start server");

    // 停止后台清理任务
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!("Rate limit sweeper ended abnormally: {}", e);
    }
    tracing::info!("Server stopped");
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
}
