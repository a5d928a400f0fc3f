use std::io;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// 计数器快照编解码错误
#[derive(Debug, Error)]
pub enum CounterError {
    /// 快照序列化失败
    #[error("unable to encode the counter snapshot: {0}")]
    Serialization(#[source] serde_json::Error),
    /// 快照内容不是合法的时间戳序列
    #[error("unable to decode the counter snapshot: {0}")]
    Deserialization(#[source] serde_json::Error),
}

/// 状态持久化错误
#[derive(Debug, Error)]
pub enum PersistError {
    /// 状态文件不存在（首次启动的正常情况）
    #[error("state file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// 状态文件读写失败
    #[error("state file i/o failed on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// 获取状态快照失败
    #[error("unable to get the state snapshot: {0}")]
    Snapshot(#[from] CounterError),
    /// 自动保存间隔为零
    #[error("autosave interval must be greater than zero")]
    ZeroInterval,
    /// 自动保存已在运行
    #[error("autosaving has already started")]
    AlreadyStarted,
    /// 自动保存尚未启动
    #[error("autosaving is not started")]
    NotStarted,
    /// 自动保存任务异常退出
    #[error("autosave task terminated abnormally: {0}")]
    Task(String),
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PersistError::Io {
            path: path.into(),
            source,
        }
    }

    /// 是否为“文件不存在”，调用方据此回退到空计数器
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistError::NotFound(_))
    }
}

/// 服务器错误类型
#[derive(Debug, Error)]
pub enum ServerError {
    /// 监听地址绑定失败
    #[error("unable to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// 网络错误
    #[error("Network error: {0}")]
    Io(#[from] io::Error),
    /// 持久化错误
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// 计数器状态错误
    #[error(transparent)]
    Counter(#[from] CounterError),
    /// 服务不可用（准入被拒绝）
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// 响应序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // 只返回状态码，不附带响应体
        match self {
            ServerError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;
