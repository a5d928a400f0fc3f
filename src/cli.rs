use clap::{Parser, Subcommand};

// 确保 Parser trait 被使用
impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Window Counter - 滑动窗口请求计数服务
#[derive(Parser, Debug, Default)]
#[command(name = "window-counter")]
#[command(version)]
#[command(about = "统计滑动时间窗口内请求数的 HTTP 服务", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 服务器监听地址
    #[arg(long, value_name = "ADDRESS", help = "服务器监听地址，例如 0.0.0.0:3000")]
    pub addr: Option<String>,

    /// 状态文件路径
    #[arg(long = "save", value_name = "PATH", help = "计数器状态保存路径")]
    pub state_file: Option<String>,

    /// 自动保存间隔
    #[arg(long = "autosave", value_name = "DURATION", help = "自动保存间隔，例如 30s")]
    pub autosave_interval: Option<String>,

    /// 计数窗口
    #[arg(long, value_name = "DURATION", help = "请求计数窗口，例如 60s")]
    pub window: Option<String>,

    /// 最大并发请求数
    #[arg(long = "max-concurrent", value_name = "NUM", help = "最大并发处理请求数")]
    pub max_concurrent_requests: Option<usize>,

    /// 准入等待超时
    #[arg(long = "timeout", value_name = "DURATION", help = "等待处理许可的超时时间，例如 300ms")]
    pub admission_timeout: Option<String>,

    /// 监控端口
    #[arg(long, value_name = "ADDRESS", help = "Prometheus 指标监听地址")]
    pub metrics_addr: Option<String>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（只输出错误）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        match self.verbose {
            0 => None,
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}
