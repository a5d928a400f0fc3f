//! 计数路由
//!
//! 响应体为 JSON 整数，即包含本次请求在内、窗口内的请求数。

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::Result;
use crate::http::HttpServerState;
use crate::infra::metrics;

/// 计数处理器
pub async fn count_handler(State(state): State<HttpServerState>) -> Result<Response> {
    let count = state.counter.count();
    metrics::record_window_requests(count);

    let body = serde_json::to_vec(&count)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
