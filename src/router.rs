use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    AppState,
    error::handle_panic,
    middleware::{auth_middleware, log_errors, rate_limit},
    routes,
};

// 创建主路由
pub fn create_router(state: AppState) -> Router {
    // 公开路由
    let public_routes = Router::new().route("/ping", get(routes::health::ping));

    // 需要认证的路由
    let protected_routes = Router::new()
        .route("/unfurl", post(routes::unfurl::unfurl))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);

    // 根路径不能 nest，直接合并
    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(base, api)
    };

    // 添加错误日志、限流和请求追踪中间件
    let router = router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(axum::middleware::from_fn(log_errors))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit,
        ))
        .layer(TraceLayer::new_for_http());

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    router.with_state(state)
}
