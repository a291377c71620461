pub mod local;
#[cfg(test)]
pub mod memory;
pub mod sftp;

use crate::error::SyncResult;
use crate::models::ConnectionProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use local::{LocalDir, LocalEntry};
pub use sftp::SftpClient;

// ============ 公共常量 ============

/// SSH 会话阻塞操作超时（秒）- 握手、列目录、删除等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// 单文件传输的读写超时（秒）
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程目录条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mode: Option<u32>,
}

/// 文件传输客户端，封装一个远程会话
///
/// 会话一旦打开，调用方必须在每条退出路径上调用且只调用一次 `close`。
#[async_trait]
pub trait TransferClient: Send {
    /// 建立会话；凭证错误返回 `Authentication`，其余连接问题返回 `Transport`
    async fn connect(&mut self) -> SyncResult<()>;

    /// 列出目录下的文件（不含子目录，不递归）
    async fn list_files(&mut self, remote_dir: &str) -> SyncResult<Vec<RemoteEntry>>;

    /// 上传整个文件，目标存在时覆盖，返回字节数
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> SyncResult<u64>;

    /// 下载整个文件，目标存在时覆盖，返回字节数
    async fn download(&mut self, remote_path: &str, local_path: &Path) -> SyncResult<u64>;

    /// 删除一个远程文件
    async fn remove(&mut self, remote_path: &str) -> SyncResult<()>;

    /// 释放会话；未连接或已关闭时什么也不做
    async fn close(&mut self);

    /// 客户端名称（用于日志）
    fn name(&self) -> &str;
}

/// 每轮同步创建一个新的客户端
pub type ClientFactory = Arc<dyn Fn() -> Box<dyn TransferClient> + Send + Sync>;

/// 根据连接配置创建 SFTP 客户端工厂
pub fn sftp_factory(profile: &ConnectionProfile) -> ClientFactory {
    let profile = profile.clone();
    Arc::new(move || {
        tracing::debug!("创建 SFTP 客户端: {}", profile.address());
        Box::new(SftpClient::new(&profile)) as Box<dyn TransferClient>
    })
}
