use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::counter::SlidingWindowCounter;
use crate::error::ServerError;
use crate::http::CounterHttpServer;
use crate::infra::{AdmissionLimiter, AutosavePersistor, StateProvider};

/// 计数服务器：计数器 + 准入限流 + HTTP 监听 + 自动保存
pub struct CounterServer {
    counter: Arc<SlidingWindowCounter>,
    limiter: AdmissionLimiter,
    persistor: AutosavePersistor,
    http: CounterHttpServer,
}

impl CounterServer {
    /// 创建服务器，优先从状态文件恢复计数器。
    ///
    /// 状态文件不存在或不可读时从空计数器开始；文件可读但内容无效时返回错误。
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let persistor = AutosavePersistor::new(&config.state_file, config.autosave_interval);

        let counter = match persistor.load().await {
            Ok(state) => {
                info!("📂 loading from previous state: {}", config.state_file);
                SlidingWindowCounter::from_snapshot(&state, config.window)?
            }
            Err(e) => {
                info!("no previous state is found ({}), starting empty", e);
                SlidingWindowCounter::new(config.window)
            }
        };

        Ok(Self::assemble(config, counter, persistor))
    }

    /// 创建忽略已有状态文件的服务器
    pub fn with_zero_state(config: ServerConfig) -> Self {
        let persistor = AutosavePersistor::new(&config.state_file, config.autosave_interval);
        let counter = SlidingWindowCounter::new(config.window);
        Self::assemble(config, counter, persistor)
    }

    /// 使用外部构造的计数器（例如注入了自定义时钟）
    pub fn with_counter(config: ServerConfig, counter: SlidingWindowCounter) -> Self {
        let persistor = AutosavePersistor::new(&config.state_file, config.autosave_interval);
        Self::assemble(config, counter, persistor)
    }

    fn assemble(
        config: ServerConfig,
        counter: SlidingWindowCounter,
        persistor: AutosavePersistor,
    ) -> Self {
        let counter = Arc::new(counter);
        let limiter = AdmissionLimiter::new(config.max_concurrent_requests, config.admission_timeout);
        let http = CounterHttpServer::new(config.listen_addr(), counter.clone(), limiter.clone());

        Self {
            counter,
            limiter,
            persistor,
            http,
        }
    }

    /// 启动自动保存并提供 HTTP 服务，直到监听停止或出错才返回
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_autosave()?;
        self.http.serve().await.inspect_err(|e| {
            warn!("application is shutting down: {}", e);
        })
    }

    /// 与 `start` 相同，但使用已绑定的监听器
    pub async fn start_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.start_autosave()?;
        self.http.serve_on(listener).await.inspect_err(|e| {
            warn!("application is shutting down: {}", e);
        })
    }

    fn start_autosave(&self) -> Result<(), ServerError> {
        let provider: Arc<dyn StateProvider> = self.counter.clone();
        self.persistor.start(provider)?;
        Ok(())
    }

    /// 先关闭监听并等待已接纳的请求处理完，再停止自动保存（包含最终保存）
    pub async fn stop(&self) -> Result<(), ServerError> {
        info!("🛑 stopping counter server...");
        self.http.shutdown();
        self.limiter.close();
        self.http.stopped().await;
        self.persistor.stop().await?;
        info!("✅ counter server stopped");
        Ok(())
    }

    /// 修改准入等待超时
    pub fn set_timeout(&self, timeout: Duration) {
        self.limiter.set_timeout(timeout);
    }

    /// 清空计数器
    pub fn clear(&self) {
        self.counter.clear();
    }

    pub fn counter(&self) -> &Arc<SlidingWindowCounter> {
        &self.counter
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    /// HTTP 路由，供不经过网络的测试使用
    pub fn router(&self) -> axum::Router {
        self.http.router()
    }
}
