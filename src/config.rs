//! 应用配置模块
//!
//! 所有配置保存在数据目录下的 `config.json` 中，按段落读写：
//! `profile`、`schedule`、`notify`、`log`。写入某一段时保留其它段落。

use crate::models::ConnectionProfile;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.json";

pub fn config_file(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE)
}

/// 读取整个配置文件，不存在或无法解析时返回空对象
pub fn read_config(config_dir: &Path) -> serde_json::Value {
    fs::read_to_string(config_file(config_dir))
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .filter(|v| v.is_object())
        .unwrap_or_else(|| serde_json::json!({}))
}

/// 读取一个配置段落
pub fn load_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let section = read_config(config_dir).get(key)?.clone();
    match serde_json::from_value::<T>(section) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("配置段落 {} 无效，使用默认值: {}", key, e);
            None
        }
    }
}

/// 保存一个配置段落
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;

    // 读取现有配置
    let mut config = read_config(config_dir);

    // 更新该段落
    config[key] = serde_json::to_value(value).map_err(io::Error::other)?;

    let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
    fs::write(config_file(config_dir), content)
}

/// 读取连接配置（同步命令必需）
pub fn load_profile(config_dir: &Path) -> Result<ConnectionProfile> {
    let config = read_config(config_dir);
    let section = config.get("profile").cloned().with_context(|| {
        format!(
            "配置文件 {} 中缺少 profile 段落",
            config_file(config_dir).display()
        )
    })?;
    let profile: ConnectionProfile =
        serde_json::from_value(section).context("profile 配置格式错误")?;
    profile.validate()?;
    Ok(profile)
}

/// 同步间隔（固定的可选值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "24h")]
    TwentyFourHours,
}

impl SyncInterval {
    pub const ALL: [SyncInterval; 9] = [
        SyncInterval::OneMinute,
        SyncInterval::FiveMinutes,
        SyncInterval::FifteenMinutes,
        SyncInterval::ThirtyMinutes,
        SyncInterval::OneHour,
        SyncInterval::TwoHours,
        SyncInterval::SixHours,
        SyncInterval::TwelveHours,
        SyncInterval::TwentyFourHours,
    ];

    pub fn as_duration(&self) -> Duration {
        let minutes = match self {
            SyncInterval::OneMinute => 1,
            SyncInterval::FiveMinutes => 5,
            SyncInterval::FifteenMinutes => 15,
            SyncInterval::ThirtyMinutes => 30,
            SyncInterval::OneHour => 60,
            SyncInterval::TwoHours => 120,
            SyncInterval::SixHours => 360,
            SyncInterval::TwelveHours => 720,
            SyncInterval::TwentyFourHours => 1440,
        };
        Duration::from_secs(minutes * 60)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncInterval::OneMinute => "1m",
            SyncInterval::FiveMinutes => "5m",
            SyncInterval::FifteenMinutes => "15m",
            SyncInterval::ThirtyMinutes => "30m",
            SyncInterval::OneHour => "1h",
            SyncInterval::TwoHours => "2h",
            SyncInterval::SixHours => "6h",
            SyncInterval::TwelveHours => "12h",
            SyncInterval::TwentyFourHours => "24h",
        }
    }
}

impl Default for SyncInterval {
    fn default() -> Self {
        SyncInterval::OneMinute
    }
}

impl fmt::Display for SyncInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        SyncInterval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = SyncInterval::ALL.iter().map(|i| i.as_str()).collect();
                anyhow::anyhow!("无效的同步间隔: {} (可选: {})", s, valid.join(", "))
            })
    }
}

/// 调度配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    #[serde(default)]
    pub interval: SyncInterval,
    /// 每日摘要时间（HH:MM）
    #[serde(default = "default_digest_times")]
    pub digest_times: Vec<String>,
    /// 启动后立即执行一次同步
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

fn default_digest_times() -> Vec<String> {
    vec!["07:30".to_string(), "15:00".to_string()]
}

fn default_run_on_start() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: SyncInterval::default(),
            digest_times: default_digest_times(),
            run_on_start: default_run_on_start(),
        }
    }
}

impl ScheduleConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "schedule").unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "schedule", self)
    }

    /// 解析摘要时间，忽略格式错误的条目
    pub fn parsed_digest_times(&self) -> Vec<NaiveTime> {
        self.digest_times
            .iter()
            .filter_map(|t| match NaiveTime::parse_from_str(t.trim(), "%H:%M") {
                Ok(time) => Some(time),
                Err(e) => {
                    tracing::warn!("忽略无效的摘要时间 {:?}: {}", t, e);
                    None
                }
            })
            .collect()
    }
}

/// 通知配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyConfig {
    #[serde(default = "default_notify_enabled")]
    pub enabled: bool,
    /// 接收 `{"subject", "body"}` 的 HTTP 地址；为空时只写日志
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

fn default_notify_enabled() -> bool {
    true
}

fn default_notify_timeout() -> u64 {
    10
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: default_notify_enabled(),
            webhook_url: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

impl NotifyConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "notify").unwrap_or_default()
    }
}
