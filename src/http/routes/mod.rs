//! HTTP 路由模块
//!
//! 只有一个逻辑路由：任意方法访问任意路径都返回当前窗口内的请求数。

pub mod count;

use axum::{middleware, routing::any, Router};
use tower_http::trace::TraceLayer;

use crate::http::middleware::admission_middleware;
use crate::http::HttpServerState;
use crate::infra::AdmissionLimiter;

/// 创建所有路由
pub fn create_routes(state: HttpServerState, limiter: AdmissionLimiter) -> Router {
    Router::new()
        .route("/", any(count::count_handler))
        .fallback(count::count_handler)
        .layer(middleware::from_fn_with_state(limiter, admission_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
