//! 传输错误分类

use std::io;
use thiserror::Error;

/// 同步过程中的错误
///
/// `Authentication` 与 `Transport` 发生在建立会话阶段，会终止整轮同步；
/// `RemoteIo` 与 `LocalIo` 只影响单个文件，记录后继续处理下一个。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 凭证被服务器拒绝
    #[error("认证失败: {0}")]
    Authentication(String),

    /// 连接、握手或会话层失败
    #[error("连接失败: {0}")]
    Transport(String),

    /// 已建立会话上的远程读写失败
    #[error("远程操作失败 {path}: {message}")]
    RemoteIo { path: String, message: String },

    /// 本地文件系统操作失败
    #[error("本地操作失败 {path}: {source}")]
    LocalIo {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    pub fn remote(path: impl Into<String>, message: impl ToString) -> Self {
        SyncError::RemoteIo {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn local(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        SyncError::LocalIo {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// 是否会终止整轮同步
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Authentication(_) | SyncError::Transport(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
