//! 同步相关命令

use crate::config::{config_file, load_profile, NotifyConfig, ScheduleConfig, CONFIG_FILE};
use crate::core::{create_notifier, PassResult, Scheduler, SchedulerHandle, SyncEngine};
use crate::logging::ActivityLog;
use crate::storage::sftp_factory;
use crate::AppState;
use anyhow::{Context, Result};
use notify::{recommended_watcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 立即执行一轮同步
pub async fn run_once(state: &AppState) -> Result<PassResult> {
    let profile = load_profile(&state.config_dir)?;
    let notifier = create_notifier(&NotifyConfig::load(&state.config_dir));
    info!("手动同步: {} ({})", profile.address(), profile.direction);

    let factory = sftp_factory(&profile);
    let engine = SyncEngine::new(profile, &state.ledger_path, notifier);

    let mut client = factory();
    Ok(engine.run_pass(client.as_mut()).await)
}

/// 以守护方式运行调度器，直到收到 Ctrl-C
pub async fn run_daemon(state: &AppState, activity: ActivityLog) -> Result<()> {
    let profile = load_profile(&state.config_dir)?;
    let schedule = ScheduleConfig::load(&state.config_dir);
    let notifier = create_notifier(&NotifyConfig::load(&state.config_dir));
    info!(
        "启动同步服务: {} ({}), 通知方式 {}",
        profile.address(),
        profile.direction,
        notifier.name()
    );

    let factory = sftp_factory(&profile);
    let engine = Arc::new(SyncEngine::new(
        profile,
        &state.ledger_path,
        notifier.clone(),
    ));

    let scheduler = Scheduler::new(engine, factory, notifier, activity, schedule);
    let (handle, join) = scheduler.start();

    // 监听配置文件，同步间隔变化时重新计时
    let (config_tx, mut config_rx) = mpsc::unbounded_channel::<()>();
    let _watcher = match watch_config(&state.config_dir, config_tx) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("无法监听配置文件，间隔修改需要重启服务: {:#}", e);
            None
        }
    };

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("监听退出信号失败: {}", e);
                }
                break;
            }
            Some(()) = config_rx.recv() => {
                apply_schedule_change(&state.config_dir, &handle);
            }
        }
    }

    handle.shutdown();
    join.await.context("等待调度器退出失败")?;
    info!("同步服务已退出");
    Ok(())
}

/// 重新读取调度配置，间隔变化时通知调度器
fn apply_schedule_change(config_dir: &Path, handle: &SchedulerHandle) {
    let schedule = ScheduleConfig::load(config_dir);
    if schedule.interval != handle.interval() {
        handle.set_interval(schedule.interval);
    } else {
        debug!("配置文件已变化，同步间隔未变");
    }
}

fn watch_config(
    config_dir: &Path,
    tx: mpsc::UnboundedSender<()>,
) -> Result<notify::RecommendedWatcher> {
    let target = config_file(config_dir);

    let mut watcher = recommended_watcher(
        move |res: std::result::Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let touches_config = event.paths.iter().any(|p| p.ends_with(CONFIG_FILE));
                if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                    let _ = tx.send(());
                }
            }
            Err(e) => {
                error!("配置文件监听错误: {}", e);
            }
        },
    )
    .context("创建配置文件监听器失败")?;

    watcher
        .watch(config_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("监听目录失败: {:?}", config_dir))?;

    debug!("正在监听配置文件: {:?}", target);
    Ok(watcher)
}
