use std::fs;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use window_counter::{
    cli::{Cli, Commands},
    config::{self, ServerConfig},
    infra::metrics,
    logging, CounterServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        return match command {
            Commands::GenerateConfig { path } => generate_config(path),
            Commands::ValidateConfig { path } => validate_config(path),
            Commands::ShowConfig => show_config(&cli),
        };
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.as_deref().or(early_log.file.as_deref());

    let _log_guard = logging::init_logging(&log_level, log_format.as_deref(), log_file, cli.quiet)?;

    tracing::info!("🚀 Window Counter starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - Listen: {}", config.listen_addr());
    tracing::info!("  - State File: {}", config.state_file);
    tracing::info!("  - Autosave: {:?}", config.autosave_interval);
    tracing::info!("  - Window: {:?}", config.window);
    tracing::info!("  - Max Concurrent Requests: {}", config.max_concurrent_requests);
    tracing::info!("  - Admission Timeout: {:?}", config.admission_timeout);

    if let Some(addr) = config.metrics_socket_addr()? {
        metrics::init(addr).map_err(|e| anyhow!("无法启动指标监听 {}: {}", addr, e))?;
        tracing::info!("  - Metrics: http://{}/metrics", addr);
    }

    // 恢复状态失败（状态文件内容无效）时直接退出
    let server = match CounterServer::new(config).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!("❌ 服务器初始化失败: {}", e);
            tracing::error!("💡 请检查状态文件内容，或删除后重新启动");
            process::exit(1);
        }
    };

    let mut runner = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let run_result = tokio::select! {
        joined = &mut runner => Some(joined),
        _ = shutdown_signal() => {
            tracing::info!("📴 received shutdown signal");
            None
        }
    };

    let stop_result = server.stop().await;

    let run_result = match run_result {
        Some(joined) => joined,
        None => runner.await,
    };
    if let Err(e) = run_result.context("server task panicked")? {
        tracing::error!("❌ 服务器运行失败: {}", e);
        process::exit(1);
    }
    if let Err(e) = stop_result {
        tracing::error!("❌ 停止时保存状态失败: {}", e);
        process::exit(1);
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    fs::write(path, config::DEFAULT_CONFIG_TOML)
        .with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config
        .validate()
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Listen: {}", config.listen_addr());
    println!("  - Window: {:?}", config.window);
    println!("  - Max Concurrent Requests: {}", config.max_concurrent_requests);

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
