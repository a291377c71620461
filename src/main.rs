use anyhow::Result;
use clap::{Parser, Subcommand};
use sftpsync_lib::commands;
use sftpsync_lib::core::notifier::pass_message;
use sftpsync_lib::logging::{get_log_dir, ActivityLog, LogConfig, RotatingFileWriter};
use sftpsync_lib::{AppState, LedgerDirection};
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sftpsync", version, about = "定时 SFTP 目录同步")]
struct Cli {
    /// 数据目录（默认 ~/.config/sftpsync）
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// 同时输出日志到控制台
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 按计划持续同步，直到 Ctrl-C
    Run,
    /// 立即执行一轮同步
    Sync,
    /// 测试连接
    Test,
    /// 列出远程目录中的文件
    List,
    /// 查看或清空传输记录
    #[command(subcommand)]
    Ledger(LedgerCommand),
    /// 设置同步间隔（1m, 5m, 15m, 30m, 1h, 2h, 6h, 12h, 24h）
    Interval { value: String },
    /// 查看或修改日志配置
    LogConfig {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        max_size_mb: Option<u32>,
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        retained_lines: Option<usize>,
    },
}

#[derive(Debug, Subcommand)]
enum LedgerCommand {
    /// 列出已传输的文件
    Show {
        /// to_remote 或 to_local
        #[arg(default_value = "to_remote")]
        direction: String,
    },
    /// 清空记录，对应文件会在下一轮重新传输
    Clear { direction: String },
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.tracing_level().into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }
    filter
}

/// 初始化日志系统，返回内存中的活动日志
fn init_logging(config_dir: &Path, verbose: bool) -> ActivityLog {
    let config = LogConfig::load(config_dir);
    let activity = ActivityLog::new(config.retained_lines);

    // 活动日志层 - INFO 及以上，时间戳由活动日志自己记录
    let activity_layer = tracing_subscriber::fmt::layer()
        .with_writer(activity.clone())
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .with_filter(LevelFilter::INFO);

    // 文件日志层
    let file_layer = if config.enabled {
        match RotatingFileWriter::new(&get_log_dir(config_dir), config.max_size_mb) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_filter(build_filter(&config)),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件: {}", e);
                None
            }
        }
    } else {
        None
    };

    // 在 debug 模式或 --verbose 时输出到控制台
    let console_layer = (verbose || cfg!(debug_assertions)).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(build_filter(&config))
    });

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(activity_layer)
        .try_init();

    activity
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let state = AppState::new(cli.config_dir)?;
    let activity = init_logging(&state.config_dir, cli.verbose);

    match cli.command {
        Commands::Run => commands::sync::run_daemon(&state, activity).await?,
        Commands::Sync => {
            let result = commands::sync::run_once(&state).await?;
            let (subject, body) = pass_message(&result);
            println!("{}\n{}", subject, body);
            if !result.is_success() {
                anyhow::bail!("同步未完全成功");
            }
        }
        Commands::Test => {
            let result = commands::test::test_connection(&state).await?;
            println!("{}", result.message);
            if let Some(details) = result.details {
                println!("{}", details);
            }
            if !result.success {
                anyhow::bail!("连接测试失败");
            }
        }
        Commands::List => {
            for entry in commands::test::list_remote(&state).await? {
                println!("{:>12}  {}", entry.size, entry.name);
            }
        }
        Commands::Ledger(LedgerCommand::Show { direction }) => {
            let direction: LedgerDirection = direction.parse()?;
            for name in commands::ledger::show_ledger(&state, direction) {
                println!("{}", name);
            }
        }
        Commands::Ledger(LedgerCommand::Clear { direction }) => {
            let direction: LedgerDirection = direction.parse()?;
            let removed = commands::ledger::clear_ledger(&state, direction)?;
            println!("已清除 {} 条 {} 记录", removed, direction.as_str());
        }
        Commands::Interval { value } => {
            let config = commands::schedule::set_interval(&state, &value)?;
            println!("同步间隔: {}", config.interval);
        }
        Commands::LogConfig {
            enabled,
            max_size_mb,
            level,
            retained_lines,
        } => {
            let config = if enabled.is_none()
                && max_size_mb.is_none()
                && level.is_none()
                && retained_lines.is_none()
            {
                commands::log::get_log_config(&state)
            } else {
                commands::log::set_log_config(&state, enabled, max_size_mb, level, retained_lines)?
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
