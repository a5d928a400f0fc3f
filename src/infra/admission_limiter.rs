//! 请求准入限流器
//!
//! 限制同时处理的请求数量。许可不足时请求最多等待 `timeout`，
//! 超时、调用方取消或限流器关闭时请求被拒绝（对外表现为 503），
//! 被包装的操作不会执行。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::infra::metrics;

/// 准入被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionRejected {
    /// 等待许可超时
    #[error("no permit available within {0:?}")]
    Timeout(Duration),
    /// 调用方取消了等待
    #[error("admission wait cancelled by caller")]
    Cancelled,
    /// 限流器已关闭（服务停止中）
    #[error("admission limiter is closed")]
    Closed,
}

/// 已获得的准入许可，drop 时归还
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        metrics::record_inflight_released();
    }
}

/// 请求准入限流器
#[derive(Clone)]
pub struct AdmissionLimiter {
    sem: Arc<Semaphore>,
    max_inflight: usize,
    /// 等待超时（纳秒），可在运行中修改
    timeout_nanos: Arc<AtomicU64>,
    /// 被拒绝计数（rejected_total）
    rejected_count: Arc<AtomicU64>,
}

impl AdmissionLimiter {
    pub fn new(max_inflight: usize, timeout: Duration) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max_inflight)),
            max_inflight,
            timeout_nanos: Arc::new(AtomicU64::new(duration_nanos(timeout))),
            rejected_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 修改等待超时，只影响之后开始等待的请求
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_nanos
            .store(duration_nanos(timeout), Ordering::Release);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_nanos.load(Ordering::Acquire))
    }

    /// 获取许可，最多等待当前配置的超时时间
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionRejected> {
        self.acquire_until(std::future::pending::<()>()).await
    }

    /// 获取许可；`cancel` 先完成时放弃等待。超时与取消以先到者为准。
    pub async fn acquire_until<C>(&self, cancel: C) -> Result<AdmissionPermit, AdmissionRejected>
    where
        C: Future<Output = ()>,
    {
        let timeout = self.timeout();
        let acquired = tokio::select! {
            res = tokio::time::timeout(timeout, self.sem.clone().acquire_owned()) => match res {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(AdmissionRejected::Closed),
                Err(_) => Err(AdmissionRejected::Timeout(timeout)),
            },
            _ = cancel => Err(AdmissionRejected::Cancelled),
        };

        match acquired {
            Ok(permit) => {
                metrics::record_admitted();
                Ok(AdmissionPermit { _permit: permit })
            }
            Err(rejected) => {
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                metrics::record_rejected();
                Err(rejected)
            }
        }
    }

    /// 在许可保护下执行 `op`。无论 `op` 成功、失败还是 panic，许可都会归还。
    pub async fn serve<F, Fut, T>(&self, op: F) -> Result<T, AdmissionRejected>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(op().await)
    }

    /// 关闭限流器：正在等待和之后到来的请求都会被拒绝，已持有的许可不受影响
    pub fn close(&self) {
        self.sem.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sem.is_closed()
    }

    /// 当前正在执行的请求数（inflight gauge）
    pub fn inflight(&self) -> usize {
        self.max_inflight - self.sem.available_permits()
    }

    /// 剩余可用 permit 数
    pub fn available_permits(&self) -> usize {
        self.sem.available_permits()
    }

    /// 累计被拒绝的请求数
    pub fn rejected_total(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    /// 最大并发数配置
    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
