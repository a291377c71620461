//! 日志模块 - 文件日志、大小轮转和内存中的活动日志

use crate::config::{load_section, save_section};
use chrono::{DateTime, Duration as ChronoDuration, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

pub const LOG_FILE: &str = "sync.log";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 内存中保留的活动日志行数
    #[serde(default = "default_retained_lines")]
    pub retained_lines: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

fn default_retained_lines() -> usize {
    1000
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            retained_lines: default_retained_lines(),
        }
    }
}

impl LogConfig {
    pub const LEVELS: [&'static str; 5] = ["error", "warn", "info", "debug", "trace"];

    /// 从配置文件加载日志配置
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "log").unwrap_or_default()
    }

    /// 保存日志配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "log", self)
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 带大小限制的日志文件写入器，超过上限时轮转为 `sync.log.old`
#[derive(Clone)]
pub struct RotatingFileWriter {
    file_path: PathBuf,
    max_size: u64,
    state: Arc<Mutex<FileState>>,
}

struct FileState {
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl RotatingFileWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE);
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;

        let existing = fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            Self::rotate(&file_path)?;
        }
        let (writer, written) = Self::open(&file_path)?;

        Ok(Self {
            file_path,
            max_size,
            state: Arc::new(Mutex::new(FileState {
                writer: Some(writer),
                written,
            })),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn open(file_path: &Path) -> io::Result<(BufWriter<File>, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok((BufWriter::new(file), len))
    }

    /// 当前日志改名为备份，旧备份被覆盖
    fn rotate(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    fn write_line(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock_or_recover(&self.state);

        if state.written + buf.len() as u64 > self.max_size {
            if let Some(mut w) = state.writer.take() {
                let _ = w.flush();
            }
            Self::rotate(&self.file_path)?;
            let (writer, written) = Self::open(&self.file_path)?;
            state.writer = Some(writer);
            state.written = written;
        }

        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Writer not available"))?;
        writer.write_all(buf)?;
        writer.flush()?;
        state.written += buf.len() as u64;
        Ok(buf.len())
    }
}

/// 单次事件的写入句柄
pub struct RotatingFileHandle {
    inner: RotatingFileWriter,
}

impl Write for RotatingFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_line(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = lock_or_recover(&self.inner.state);
        match state.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileHandle {
            inner: self.clone(),
        }
    }
}

/// 活动日志中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub at: DateTime<Local>,
    pub line: String,
}

impl std::fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.at.format("%Y-%m-%d %H:%M:%S"), self.line)
    }
}

/// 内存中的活动日志，只保留最近的若干行（最旧的先丢弃）
///
/// 作为 tracing 的 `MakeWriter` 接入，每日摘要从这里取内容。
#[derive(Clone)]
pub struct ActivityLog {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<ActivityEntry>>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(4096)))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一行，使用当前时间
    pub fn record(&self, line: impl Into<String>) {
        self.record_at(Local::now(), line);
    }

    pub fn record_at(&self, at: DateTime<Local>, line: impl Into<String>) {
        let line = line.into();
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }

        let mut entries = lock_or_recover(&self.entries);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(ActivityEntry {
            at,
            line: line.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出 `since` 之后（含）的所有行
    pub fn entries_since(&self, since: DateTime<Local>) -> Vec<ActivityEntry> {
        lock_or_recover(&self.entries)
            .iter()
            .filter(|e| e.at >= since)
            .cloned()
            .collect()
    }

    /// 最近 24 小时的行
    pub fn last_day(&self, now: DateTime<Local>) -> Vec<ActivityEntry> {
        self.entries_since(now - ChronoDuration::hours(24))
    }
}

/// 写入活动日志的句柄，按行拆分
pub struct ActivityWriter {
    log: ActivityLog,
}

impl Write for ActivityWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for line in text.lines() {
            self.log.record(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ActivityLog {
    type Writer = ActivityWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ActivityWriter { log: self.clone() }
    }
}

/// 获取日志目录路径（跟随数据存储位置）
pub fn get_log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}
