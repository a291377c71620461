use std::path::{Path, PathBuf};

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;

pub use crate::core::{PassResult, Scheduler, SchedulerHandle, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use models::{ConnectionProfile, LedgerDirection, SyncDirection};

pub const LEDGER_FILE: &str = "ledger.json";

/// 应用状态，在各个命令之间共享
#[derive(Debug, Clone)]
pub struct AppState {
    pub config_dir: PathBuf,
    pub ledger_path: PathBuf,
}

impl AppState {
    /// 确定数据目录
    ///
    /// 优先使用命令行指定的目录；否则读取默认目录下 `config.json` 的
    /// `data_path`，不存在时使用默认目录。
    pub fn new(config_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => Self::resolve_default_dir()?,
        };

        std::fs::create_dir_all(&config_dir)?;

        Ok(Self::with_dir(config_dir))
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let ledger_path = config_dir.join(LEDGER_FILE);
        Self {
            config_dir,
            ledger_path,
        }
    }

    fn resolve_default_dir() -> anyhow::Result<PathBuf> {
        // 获取默认应用配置目录
        let default_config_dir = dirs::config_dir()
            .map(|p| p.join("sftpsync"))
            .unwrap_or_else(|| PathBuf::from(".sftpsync"));

        std::fs::create_dir_all(&default_config_dir)?;

        // 尝试读取自定义数据路径
        let config_dir = config::read_config(&default_config_dir)
            .get("data_path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .filter(|p| p.exists() && p.is_dir())
            .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
            .unwrap_or(default_config_dir);

        Ok(config_dir)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}
