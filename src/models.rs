//! 同步方向与连接配置

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// 同步方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    LocalToRemote,
    RemoteToLocal,
    LocalToLocal,
}

impl SyncDirection {
    /// 该方向在传输记录中对应的键，本地到本地不记录
    pub fn ledger_key(&self) -> Option<LedgerDirection> {
        match self {
            SyncDirection::LocalToRemote => Some(LedgerDirection::ToRemote),
            SyncDirection::RemoteToLocal => Some(LedgerDirection::ToLocal),
            SyncDirection::LocalToLocal => None,
        }
    }

    /// 是否需要建立 SFTP 会话
    pub fn needs_remote(&self) -> bool {
        !matches!(self, SyncDirection::LocalToLocal)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::LocalToRemote => write!(f, "本地 → 远程"),
            SyncDirection::RemoteToLocal => write!(f, "远程 → 本地"),
            SyncDirection::LocalToLocal => write!(f, "本地 → 本地"),
        }
    }
}

/// 传输记录的方向键
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerDirection {
    ToRemote,
    ToLocal,
}

impl LedgerDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerDirection::ToRemote => "to_remote",
            LedgerDirection::ToLocal => "to_local",
        }
    }
}

impl std::str::FromStr for LedgerDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "to_remote" => Ok(LedgerDirection::ToRemote),
            "to_local" => Ok(LedgerDirection::ToLocal),
            _ => Err(anyhow::anyhow!("无效的记录方向: {}", s)),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

/// 连接配置，一轮同步期间不会改变
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret: String,
    pub local_dir: String,
    /// 远程目录；本地到本地模式下为目标本地目录
    pub remote_dir: String,
    pub direction: SyncDirection,
    /// 传输成功后删除源文件
    #[serde(default)]
    pub delete_after_transfer: bool,
    /// 额外排除规则（支持 `*` 通配符）
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

// 手写 Debug，避免密码进入日志
impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"***")
            .field("local_dir", &self.local_dir)
            .field("remote_dir", &self.remote_dir)
            .field("direction", &self.direction)
            .field("delete_after_transfer", &self.delete_after_transfer)
            .field("exclude_patterns", &self.exclude_patterns)
            .finish()
    }
}

impl ConnectionProfile {
    /// 检查必填字段
    pub fn validate(&self) -> Result<()> {
        if self.local_dir.trim().is_empty() || self.remote_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("本地目录和远程目录不能为空"));
        }
        if self.direction.needs_remote() {
            if self.host.trim().is_empty() {
                return Err(anyhow::anyhow!("主机地址不能为空"));
            }
            if self.username.trim().is_empty() || self.secret.is_empty() {
                return Err(anyhow::anyhow!("用户名和密码不能为空"));
            }
            if self.port == 0 {
                return Err(anyhow::anyhow!("端口无效: {}", self.port));
            }
        }
        Ok(())
    }

    pub fn local_path(&self) -> &Path {
        Path::new(&self.local_dir)
    }

    /// 本地到本地模式的目标目录
    pub fn dest_local_path(&self) -> PathBuf {
        PathBuf::from(&self.remote_dir)
    }

    /// 拼接远程文件路径（统一使用 `/`）
    pub fn remote_path(&self, name: &str) -> String {
        let dir = self.remote_dir.replace('\\', "/");
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() {
            format!("/{}", name)
        } else {
            format!("{}/{}", dir, name)
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
