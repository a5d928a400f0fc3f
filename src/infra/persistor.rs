//! 状态持久化
//!
//! `Persistor` 负责把状态快照整体写入单个文件（先写同目录临时文件再 rename），
//! `AutosavePersistor` 在后台按固定间隔保存，停止时再做一次同步的最终保存。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{CounterError, PersistError};
use crate::infra::metrics;

/// 可提供状态快照的组件
pub trait StateProvider: Send + Sync {
    fn snapshot(&self) -> Result<Vec<u8>, CounterError>;
}

/// 单文件状态持久化
#[derive(Debug, Clone)]
pub struct Persistor {
    file_path: PathBuf,
}

impl Persistor {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// 读取状态文件。文件不存在时返回 `PersistError::NotFound`。
    pub async fn load(&self) -> Result<Vec<u8>, PersistError> {
        match tokio::fs::read(&self.file_path).await {
            Ok(state) => Ok(state),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistError::NotFound(self.file_path.clone()))
            }
            Err(e) => Err(PersistError::io(&self.file_path, e)),
        }
    }

    /// 获取快照并覆盖写入状态文件
    pub async fn save(&self, provider: &dyn StateProvider) -> Result<(), PersistError> {
        let state = provider.snapshot()?;

        let tmp_path = self.temp_path();
        if let Err(e) = write_synced(&tmp_path, &state).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PersistError::io(&tmp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.file_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PersistError::io(&self.file_path, e));
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.file_path
            .with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

struct AutosaveTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), PersistError>>,
}

/// 带后台自动保存的持久化器
pub struct AutosavePersistor {
    persistor: Persistor,
    autosave_interval: Duration,
    task: Mutex<Option<AutosaveTask>>,
}

impl AutosavePersistor {
    pub fn new(file_path: impl Into<PathBuf>, autosave_interval: Duration) -> Self {
        Self {
            persistor: Persistor::new(file_path),
            autosave_interval,
            task: Mutex::new(None),
        }
    }

    pub async fn load(&self) -> Result<Vec<u8>, PersistError> {
        self.persistor.load().await
    }

    pub async fn save(&self, provider: &dyn StateProvider) -> Result<(), PersistError> {
        self.persistor.save(provider).await
    }

    /// 启动后台自动保存。间隔为零时返回 `ZeroInterval`，已在运行时返回 `AlreadyStarted`。
    pub fn start(&self, provider: Arc<dyn StateProvider>) -> Result<(), PersistError> {
        if self.autosave_interval.is_zero() {
            return Err(PersistError::ZeroInterval);
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Err(PersistError::AlreadyStarted);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_autosave(
            self.persistor.clone(),
            provider,
            self.autosave_interval,
            stop_rx,
        ));
        *task = Some(AutosaveTask { stop_tx, handle });

        info!(
            "💾 autosaving to {} every {:?}",
            self.persistor.file_path.display(),
            self.autosave_interval
        );
        Ok(())
    }

    /// 通知后台任务做最终保存并退出，等待其完全结束后返回最终保存的结果。
    /// 未启动时返回 `NotStarted` 且不做任何保存。
    pub async fn stop(&self) -> Result<(), PersistError> {
        let task = self.task.lock().take().ok_or(PersistError::NotStarted)?;

        let _ = task.stop_tx.send(());
        let result = match task.handle.await {
            Ok(result) => result,
            Err(e) => Err(PersistError::Task(e.to_string())),
        };

        info!("autosaving stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

async fn run_autosave(
    persistor: Persistor,
    provider: Arc<dyn StateProvider>,
    period: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<(), PersistError> {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match persistor.save(provider.as_ref()).await {
                    Ok(()) => {
                        metrics::record_autosave(true);
                        debug!("autosaved to {}", persistor.file_path.display());
                    }
                    Err(e) => {
                        // 不退出循环，下一次 tick 重试
                        metrics::record_autosave(false);
                        warn!("unable to autosave: {}", e);
                    }
                }
            }
            // 发送端被 drop 时同样视为停止
            _ = &mut stop_rx => break,
        }
    }

    let result = persistor.save(provider.as_ref()).await;
    match &result {
        Ok(()) => info!("saved state to {}", persistor.file_path.display()),
        Err(e) => warn!("unable to save state on shutdown: {}", e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedState(Mutex<Vec<u8>>);

    impl StateProvider for FixedState {
        fn snapshot(&self) -> Result<Vec<u8>, CounterError> {
            Ok(self.0.lock().clone())
        }
    }

    struct FailingState(AtomicUsize);

    impl StateProvider for FailingState {
        fn snapshot(&self) -> Result<Vec<u8>, CounterError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let err = serde_json::from_str::<u8>("bad").unwrap_err();
            Err(CounterError::Serialization(err))
        }
    }

    fn temp_file() -> PathBuf {
        std::env::temp_dir().join(format!("window-counter-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let persistor = Persistor::new(temp_file());
        let err = persistor.load().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let path = temp_file();
        let persistor = Persistor::new(&path);
        let state = FixedState(Mutex::new(b"first-and-longer".to_vec()));

        persistor.save(&state).await.unwrap();
        *state.0.lock() = b"second".to_vec();
        persistor.save(&state).await.unwrap();

        assert_eq!(persistor.load().await.unwrap(), b"second".to_vec());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_failed_snapshot_keeps_previous_file() {
        let path = temp_file();
        let persistor = Persistor::new(&path);
        persistor
            .save(&FixedState(Mutex::new(b"kept".to_vec())))
            .await
            .unwrap();

        let err = persistor
            .save(&FailingState(AtomicUsize::new(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::Snapshot(_)));
        assert_eq!(persistor.load().await.unwrap(), b"kept".to_vec());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_fails() {
        let path = std::env::temp_dir()
            .join(uuid::Uuid::new_v4().to_string())
            .join("state.json");
        let persistor = Persistor::new(path);
        let err = persistor
            .save(&FixedState(Mutex::new(b"x".to_vec())))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }

    #[tokio::test]
    async fn test_double_start_and_stop_without_start() {
        let path = temp_file();
        let autosave = AutosavePersistor::new(&path, Duration::from_secs(60));
        let state: Arc<dyn StateProvider> = Arc::new(FixedState(Mutex::new(b"s".to_vec())));

        assert!(matches!(autosave.stop().await, Err(PersistError::NotStarted)));
        assert!(autosave.load().await.unwrap_err().is_not_found());

        autosave.start(state.clone()).unwrap();
        assert!(matches!(
            autosave.start(state.clone()),
            Err(PersistError::AlreadyStarted)
        ));
        assert!(autosave.is_running());

        autosave.stop().await.unwrap();
        assert!(!autosave.is_running());
        assert!(matches!(autosave.stop().await, Err(PersistError::NotStarted)));

        // 停止后可以重新启动
        autosave.start(state).unwrap();
        autosave.stop().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected_at_start() {
        let path = temp_file();
        let autosave = AutosavePersistor::new(&path, Duration::ZERO);
        let state: Arc<dyn StateProvider> = Arc::new(FixedState(Mutex::new(b"s".to_vec())));

        assert!(matches!(autosave.start(state), Err(PersistError::ZeroInterval)));
        assert!(!autosave.is_running());
        assert!(matches!(autosave.stop().await, Err(PersistError::NotStarted)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failing_autosave_keeps_ticking() {
        let path = temp_file();
        let autosave = AutosavePersistor::new(&path, Duration::from_millis(20));
        let state = Arc::new(FailingState(AtomicUsize::new(0)));

        autosave.start(state.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(autosave.is_running());

        let err = autosave.stop().await.unwrap_err();
        assert!(matches!(err, PersistError::Snapshot(_)));
        // 多次 tick 失败 + 一次最终保存
        assert!(state.0.load(Ordering::SeqCst) >= 3);
        assert!(!autosave.is_running());
    }
}
