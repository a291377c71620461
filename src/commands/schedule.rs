//! 调度配置命令

use crate::config::{ScheduleConfig, SyncInterval};
use crate::AppState;
use anyhow::Result;

/// 修改同步间隔；运行中的服务监听配置文件并立即重新计时
pub fn set_interval(state: &AppState, value: &str) -> Result<ScheduleConfig> {
    let interval: SyncInterval = value.parse()?;
    let mut config = ScheduleConfig::load(&state.config_dir);
    config.interval = interval;
    config.save(&state.config_dir)?;
    tracing::info!("同步间隔已设置为 {}", interval);
    Ok(config)
}
