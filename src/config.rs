use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::Semaphore;
use tracing::info;

/// 服务器配置
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub addr: String,
    /// 状态文件路径
    pub state_file: String,
    /// 自动保存间隔
    #[serde(serialize_with = "serialize_duration")]
    pub autosave_interval: Duration,
    /// 请求计数窗口
    #[serde(serialize_with = "serialize_duration")]
    pub window: Duration,
    /// 最大并发处理请求数
    pub max_concurrent_requests: usize,
    /// 等待处理许可的超时时间
    #[serde(serialize_with = "serialize_duration")]
    pub admission_timeout: Duration,
    /// Prometheus 指标监听地址（不配置则不启用）
    pub metrics_addr: Option<String>,
    /// 日志级别
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_string(),
            state_file: "/tmp/requestcounter.json".to_string(),
            autosave_interval: Duration::from_secs(30),
            window: Duration::from_secs(60),
            max_concurrent_requests: 5,
            admission_timeout: Duration::from_millis(300),
            metrics_addr: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// 创建新的服务器配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("配置文件格式错误")?;
        Self::try_from(toml_config)
    }

    /// 从环境变量合并配置（WINDOW_COUNTER_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(addr) = env::var("WINDOW_COUNTER_ADDR") {
            self.addr = addr;
        }
        if let Ok(path) = env::var("WINDOW_COUNTER_STATE_FILE") {
            self.state_file = path;
        }
        if let Ok(interval) = env::var("WINDOW_COUNTER_AUTOSAVE") {
            self.autosave_interval = parse_duration("WINDOW_COUNTER_AUTOSAVE", &interval)?;
        }
        if let Ok(window) = env::var("WINDOW_COUNTER_WINDOW") {
            self.window = parse_duration("WINDOW_COUNTER_WINDOW", &window)?;
        }
        if let Ok(max) = env::var("WINDOW_COUNTER_MAX_CONCURRENT") {
            self.max_concurrent_requests = max
                .parse()
                .with_context(|| format!("WINDOW_COUNTER_MAX_CONCURRENT 无效: {}", max))?;
        }
        if let Ok(timeout) = env::var("WINDOW_COUNTER_TIMEOUT") {
            self.admission_timeout = parse_duration("WINDOW_COUNTER_TIMEOUT", &timeout)?;
        }
        if let Ok(metrics_addr) = env::var("WINDOW_COUNTER_METRICS_ADDR") {
            self.metrics_addr = Some(metrics_addr);
        }
        if let Ok(log_level) = env::var("WINDOW_COUNTER_LOG_LEVEL") {
            self.log_level = log_level;
        }
        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) -> Result<()> {
        if let Some(addr) = &cli.addr {
            self.addr = addr.clone();
        }
        if let Some(path) = &cli.state_file {
            self.state_file = path.clone();
        }
        if let Some(interval) = &cli.autosave_interval {
            self.autosave_interval = parse_duration("--autosave", interval)?;
        }
        if let Some(window) = &cli.window {
            self.window = parse_duration("--window", window)?;
        }
        if let Some(max) = cli.max_concurrent_requests {
            self.max_concurrent_requests = max;
        }
        if let Some(timeout) = &cli.admission_timeout {
            self.admission_timeout = parse_duration("--timeout", timeout)?;
        }
        if let Some(metrics_addr) = &cli.metrics_addr {
            self.metrics_addr = Some(metrics_addr.clone());
        }
        if let Some(log_level) = cli.get_log_level() {
            self.log_level = log_level;
        }
        Ok(())
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new("config.toml").exists() {
            info!("📄 从默认配置文件加载: config.toml");
            Self::from_toml_file("config.toml")?
        } else {
            Self::new()
        };

        config.merge_from_env()?;
        config.merge_from_cli(cli)?;
        config.validate()?;

        Ok(config)
    }

    /// 校验配置，任何错误都应阻止服务启动
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            bail!("window 必须大于 0");
        }
        if self.autosave_interval.is_zero() {
            bail!("autosave_interval 必须大于 0");
        }
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests 必须大于 0");
        }
        if self.max_concurrent_requests > Semaphore::MAX_PERMITS {
            bail!(
                "max_concurrent_requests 不能超过 {}",
                Semaphore::MAX_PERMITS
            );
        }
        if self.state_file.trim().is_empty() {
            bail!("state_file 不能为空");
        }
        validate_listen_addr(&self.listen_addr())?;
        self.metrics_socket_addr()?;
        Ok(())
    }

    /// 监听地址；兼容 ":3000" 这种省略主机的写法
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    pub fn metrics_socket_addr(&self) -> Result<Option<SocketAddr>> {
        self.metrics_addr
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("metrics_addr 无效: {}", addr))
            })
            .transpose()
    }
}

fn validate_listen_addr(addr: &str) -> Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("监听地址缺少端口: {}", addr))?;
    if host.is_empty() {
        bail!("监听地址缺少主机: {}", addr);
    }
    port.parse::<u16>()
        .with_context(|| format!("监听端口无效: {}", addr))?;
    Ok(())
}

/// 解析 "30s"、"1m30s"、"250ms" 形式的时长
pub fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("{} 不是有效的时长: {:?}", name, value))
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    counter: Option<TomlCounterConfig>,
    limiter: Option<TomlLimiterConfig>,
    state: Option<TomlStateConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    addr: Option<String>,
    metrics_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlCounterConfig {
    window: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlLimiterConfig {
    max_concurrent_requests: Option<usize>,
    timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlStateConfig {
    file: Option<String>,
    autosave_interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

impl TryFrom<TomlConfig> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(toml: TomlConfig) -> Result<Self> {
        let mut config = Self::default();

        if let Some(server) = toml.server {
            if let Some(addr) = server.addr {
                config.addr = addr;
            }
            config.metrics_addr = server.metrics_addr.or(config.metrics_addr);
        }

        if let Some(window) = toml.counter.and_then(|c| c.window) {
            config.window = parse_duration("counter.window", &window)?;
        }

        if let Some(limiter) = toml.limiter {
            if let Some(max) = limiter.max_concurrent_requests {
                config.max_concurrent_requests = max;
            }
            if let Some(timeout) = limiter.timeout {
                config.admission_timeout = parse_duration("limiter.timeout", &timeout)?;
            }
        }

        if let Some(state) = toml.state {
            if let Some(file) = state.file {
                config.state_file = file;
            }
            if let Some(interval) = state.autosave_interval {
                config.autosave_interval = parse_duration("state.autosave_interval", &interval)?;
            }
        }

        if let Some(level) = toml.logging.and_then(|l| l.level) {
            config.log_level = level;
        }

        Ok(config)
    }
}

/// 启动早期使用的日志配置（在完整配置加载前初始化日志）
#[derive(Debug, Default, Clone)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 只读取配置文件中的 [logging] 段；文件缺失或格式错误时返回空配置
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    #[derive(Deserialize)]
    struct LoggingOnly {
        #[serde(default)]
        logging: Option<TomlLoggingConfig>,
    }

    let path = config_file.unwrap_or("config.toml");
    let Ok(content) = fs::read_to_string(path) else {
        return EarlyLoggingConfig::default();
    };
    let logging = toml::from_str::<LoggingOnly>(&content)
        .ok()
        .and_then(|c| c.logging)
        .unwrap_or_default();

    EarlyLoggingConfig {
        level: logging.level,
        format: logging.format,
        file: logging.file,
    }
}

/// `generate-config` 子命令输出的默认配置文件
pub const DEFAULT_CONFIG_TOML: &str = r#"# Window Counter 配置文件
# 此文件由 window-counter generate-config 生成

[server]
addr = "0.0.0.0:3000"
# metrics_addr = "127.0.0.1:9090"

[counter]
window = "60s"

[limiter]
max_concurrent_requests = 5
timeout = "300ms"

[state]
file = "/tmp/requestcounter.json"
autosave_interval = "30s"

[logging]
level = "info"
format = "compact"
# file = "./logs/window-counter.log"
"#;
