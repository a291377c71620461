//! 日志相关命令

use crate::logging::LogConfig;
use crate::AppState;
use anyhow::Result;

/// 获取日志配置
pub fn get_log_config(state: &AppState) -> LogConfig {
    LogConfig::load(&state.config_dir)
}

/// 设置日志配置
pub fn set_log_config(
    state: &AppState,
    enabled: Option<bool>,
    max_size_mb: Option<u32>,
    level: Option<String>,
    retained_lines: Option<usize>,
) -> Result<LogConfig> {
    let mut config = LogConfig::load(&state.config_dir);

    if let Some(e) = enabled {
        config.enabled = e;
    }
    if let Some(size) = max_size_mb {
        // 限制范围 1-100 MB
        config.max_size_mb = size.clamp(1, 100);
    }
    if let Some(l) = level {
        // 验证日志级别
        let level = l.to_lowercase();
        if LogConfig::LEVELS.contains(&level.as_str()) {
            config.level = level;
        } else {
            anyhow::bail!("无效的日志级别: {}", l);
        }
    }
    if let Some(lines) = retained_lines {
        config.retained_lines = lines.max(1);
    }

    config.save(&state.config_dir)?;

    Ok(config)
}
