//! HTTP 服务器 - 使用 Axum 提供计数服务

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::counter::SlidingWindowCounter;
use crate::error::ServerError;
use crate::http::routes;
use crate::infra::AdmissionLimiter;

/// HTTP 服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub counter: Arc<SlidingWindowCounter>,
}

/// 监听生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeState {
    Idle,
    Running,
    Stopped,
}

/// serve future 结束（包括被 drop）时标记为已停止
struct StoppedOnDrop<'a>(&'a watch::Sender<ServeState>);

impl Drop for StoppedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ServeState::Stopped);
    }
}

/// HTTP 计数服务器
pub struct CounterHttpServer {
    addr: String,
    router: Router,
    shutdown_tx: watch::Sender<bool>,
    state_tx: watch::Sender<ServeState>,
}

impl CounterHttpServer {
    pub fn new(addr: impl Into<String>, counter: Arc<SlidingWindowCounter>, limiter: AdmissionLimiter) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(ServeState::Idle);
        Self {
            addr: addr.into(),
            router: routes::create_routes(HttpServerState { counter }, limiter),
            shutdown_tx,
            state_tx,
        }
    }

    /// 路由（不经过网络监听即可驱动，供测试使用）
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// 绑定地址并提供服务，直到 `shutdown()` 被调用或监听出错
    pub async fn serve(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr.clone(),
                source,
            })?;
        self.serve_on(listener).await
    }

    /// 在已绑定的监听器上提供服务
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.state_tx.send_replace(ServeState::Running);
        let _stopped = StoppedOnDrop(&self.state_tx);

        info!("🌐 listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await?;

        info!("HTTP listener stopped");
        Ok(())
    }

    /// 通知监听停止；可在 serve 之前或之后调用，重复调用无副作用
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// 等待监听和已接纳的请求全部结束；从未开始服务时立即返回
    pub async fn stopped(&self) {
        let mut state_rx = self.state_tx.subscribe();
        if *state_rx.borrow() == ServeState::Idle {
            return;
        }
        let _ = state_rx.wait_for(|state| *state == ServeState::Stopped).await;
    }
}
