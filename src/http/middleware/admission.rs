//! 准入中间件

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::ServerError;
use crate::infra::AdmissionLimiter;

/// 获取处理许可后再调用后续处理器，许可在响应生成后归还；
/// 超时或限流器关闭时直接返回 503。
///
/// 客户端断开时请求 future 被丢弃，等待随之结束。
pub async fn admission_middleware(
    State(limiter): State<AdmissionLimiter>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.acquire().await {
        Ok(permit) => {
            let response = next.run(request).await;
            drop(permit);
            response
        }
        Err(rejected) => {
            debug!("request rejected: {}", rejected);
            ServerError::ServiceUnavailable(rejected.to_string()).into_response()
        }
    }
}
