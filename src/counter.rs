//! 滑动窗口请求计数器
//!
//! 以毫秒精度记录每次计数事件的时间戳，每次 `count()` 时惰性淘汰窗口外的记录。
//! 快照只包含时间戳序列，不包含窗口大小；窗口在恢复时由调用方重新指定，
//! 因此用更小的窗口恢复时，大部分历史记录可能会立即被淘汰。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CounterError;
use crate::infra::persistor::StateProvider;

/// 时间戳序列预分配容量
pub const DEFAULT_CAPACITY: usize = 1000;

/// 毫秒时钟
pub trait Clock: Send + Sync {
    /// 当前 Unix 毫秒时间戳
    fn now_millis(&self) -> i64;
}

/// 系统墙钟（UTC）
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 手动推进的时钟，用于测试
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    requests: &'a VecDeque<i64>,
}

#[derive(Deserialize)]
struct SnapshotOwned {
    requests: VecDeque<i64>,
}

/// 滑动窗口计数器
pub struct SlidingWindowCounter {
    requests: RwLock<VecDeque<i64>>,
    window: Duration,
    window_ms: i64,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    /// 创建空计数器
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: RwLock::new(VecDeque::with_capacity(DEFAULT_CAPACITY)),
            window,
            window_ms: duration_millis(window),
            clock,
        }
    }

    /// 从快照恢复计数器
    pub fn from_snapshot(snapshot: &[u8], window: Duration) -> Result<Self, CounterError> {
        Self::from_snapshot_with_clock(snapshot, window, Arc::new(SystemClock))
    }

    /// 从快照恢复计数器。已落在窗口外的记录在构造时即被淘汰。
    pub fn from_snapshot_with_clock(
        snapshot: &[u8],
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CounterError> {
        let decoded: SnapshotOwned =
            serde_json::from_slice(snapshot).map_err(CounterError::Deserialization)?;

        let counter = Self {
            requests: RwLock::new(decoded.requests),
            window,
            window_ms: duration_millis(window),
            clock,
        };
        {
            let mut requests = counter.requests.write();
            let now = counter.clock.now_millis();
            counter.evict(&mut requests, now);
        }
        Ok(counter)
    }

    /// 记录一次请求并返回窗口内（含本次）的请求数
    pub fn count(&self) -> usize {
        let mut requests = self.requests.write();
        let now = self.clock.now_millis();
        requests.push_back(now);
        self.evict(&mut requests, now);
        requests.len()
    }

    /// 序列化当前时间戳序列，不修改状态
    pub fn snapshot(&self) -> Result<Vec<u8>, CounterError> {
        let requests = self.requests.read();
        serde_json::to_vec(&SnapshotRef {
            requests: &requests,
        })
        .map_err(CounterError::Serialization)
    }

    /// 清空所有记录，窗口大小不变
    pub fn clear(&self) {
        self.requests.write().clear();
    }

    /// 当前保存的记录数（不触发淘汰）
    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    // 序列按到达顺序排列，只需从头部丢弃早于 now - window 的前缀
    fn evict(&self, requests: &mut VecDeque<i64>, now: i64) {
        let cutoff = now.saturating_sub(self.window_ms);
        while requests.front().is_some_and(|&ts| ts < cutoff) {
            requests.pop_front();
        }
    }
}

impl StateProvider for SlidingWindowCounter {
    fn snapshot(&self) -> Result<Vec<u8>, CounterError> {
        SlidingWindowCounter::snapshot(self)
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
