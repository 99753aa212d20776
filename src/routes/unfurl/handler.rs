use axum::extract::{Extension, Json, State, rejection::JsonRejection};
use serde_json::Value;

use crate::{
    AppState,
    error::AppError,
    rate_limit::rules,
    unfurl::{UnfurlError, UnfurlResult, ValidationError},
    utils::Claims,
};

/// 生成链接预览: 认证 -> 限流 -> 解析请求 -> 抓取
#[axum::debug_handler]
pub async fn unfurl(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UnfurlResult>, AppError> {
    // 限流必须在任何抓取之前完成
    let limit = state.limiter.check(&rules::UNFURL.options(&claims.sub));
    if !limit.success {
        return Err(AppError::RateLimited {
            retry_after_secs: state.limiter.retry_after_secs(&limit),
        });
    }

    let Json(body) = body.map_err(|e| {
        tracing::debug!("Rejected unfurl body: {}", e);
        AppError::InvalidJson
    })?;

    let url = body
        .get("url")
        .and_then(Value::as_str)
        .ok_or(ValidationError::Required)?;

    match state.unfurler.unfurl(url).await {
        Ok(preview) => Ok(Json(preview)),
        Err(e) => {
            match &e {
                UnfurlError::Validation(_) => {}
                UnfurlError::Ssrf(reason) => {
                    tracing::warn!(user = %claims.sub, url = %url, reason = %reason, "Unfurl blocked");
                }
                UnfurlError::Fetch(reason) => {
                    tracing::info!(user = %claims.sub, url = %url, reason = %reason, "Unfurl failed");
                }
            }
            Err(e.into())
        }
    }
}
