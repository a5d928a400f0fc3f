//! HTTP 服务器模块 - 使用 Axum 提供计数接口
//!
//! 所有路径、所有方法都由计数处理器响应，请求先经过准入中间件。

pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{CounterHttpServer, HttpServerState};
