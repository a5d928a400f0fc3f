// Infrastructure layer - 基础设施层
// 负责请求准入、状态持久化与监控指标

pub mod admission_limiter;
pub mod metrics;
pub mod persistor;

// 重新导出主要类型
pub use admission_limiter::{AdmissionLimiter, AdmissionPermit, AdmissionRejected};
pub use persistor::{AutosavePersistor, Persistor, StateProvider};
