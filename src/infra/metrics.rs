//! Prometheus 指标：准入/拒绝数、并发数、窗口内请求数、自动保存结果
//!
//! 通过 `init()` 在独立地址上安装 Prometheus HTTP 抓取端点；
//! 未初始化时所有记录调用都是空操作。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// 指标名称
const COUNTER_ADMITTED: &str = "window_counter_admitted_total";
const COUNTER_REJECTED: &str = "window_counter_rejected_total";
const GAUGE_INFLIGHT: &str = "window_counter_inflight";
const GAUGE_WINDOW_REQUESTS: &str = "window_counter_window_requests";
const COUNTER_AUTOSAVE: &str = "window_counter_autosave_total";

/// 安装全局 Recorder 并在 `addr` 上暴露 `/metrics`。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err("metrics already initialized".into());
    }
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        INITIALIZED.store(false, Ordering::SeqCst);
        return Err(Box::new(e));
    }
    Ok(())
}

/// 请求获得许可：准入计数 +1，并发数 +1
pub fn record_admitted() {
    metrics::counter!(COUNTER_ADMITTED).increment(1);
    metrics::gauge!(GAUGE_INFLIGHT).increment(1.0);
}

/// 许可归还：并发数 -1
pub fn record_inflight_released() {
    metrics::gauge!(GAUGE_INFLIGHT).decrement(1.0);
}

/// 请求被拒绝（503）
pub fn record_rejected() {
    metrics::counter!(COUNTER_REJECTED).increment(1);
}

/// 最近一次计数返回的窗口内请求数
pub fn record_window_requests(count: usize) {
    metrics::gauge!(GAUGE_WINDOW_REQUESTS).set(count as f64);
}

/// 记录一次自动保存结果
pub fn record_autosave(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!(COUNTER_AUTOSAVE, "result" => result).increment(1);
}
