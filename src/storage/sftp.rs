use super::{RemoteEntry, TransferClient, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::{SyncError, SyncResult};
use crate::models::ConnectionProfile;
use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use std::fs::File;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 已打开的会话（Sftp 必须先于 Session 释放）
struct OpenSession {
    sftp: Sftp,
    session: Session,
}

/// 基于 ssh2 的 SFTP 客户端
///
/// ssh2 的调用都是阻塞的，统一放到 `spawn_blocking` 中执行。
pub struct SftpClient {
    host: String,
    port: u16,
    username: String,
    password: String,
    connect_timeout: Duration,
    name: String,
    inner: Arc<Mutex<Option<OpenSession>>>,
}

impl SftpClient {
    pub fn new(profile: &ConnectionProfile) -> Self {
        Self {
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            password: profile.secret.clone(),
            connect_timeout: Duration::from_secs(profile.connect_timeout_secs.max(1)),
            name: format!("sftp://{}@{}:{}", profile.username, profile.host, profile.port),
            inner: Arc::new(Mutex::new(None)),
        }
    }

    fn open_session(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> SyncResult<OpenSession> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| SyncError::Transport(format!("无法解析 {}:{}: {}", host, port, e)))?
            .collect();
        let tcp = Self::connect_any(host, port, &addrs, connect_timeout)?;
        let io_timeout = Some(Duration::from_secs(IO_TIMEOUT_SECS));
        let _ = tcp.set_read_timeout(io_timeout);
        let _ = tcp.set_write_timeout(io_timeout);

        let mut session =
            Session::new().map_err(|e| SyncError::Transport(format!("创建 SSH 会话失败: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout((OP_TIMEOUT_SECS * 1000) as u32);
        session
            .handshake()
            .map_err(|e| SyncError::Transport(format!("SSH 握手失败: {}", e)))?;

        session
            .userauth_password(username, password)
            .map_err(classify_auth_error)?;
        if !session.authenticated() {
            return Err(SyncError::Authentication("服务器拒绝了用户名或密码".to_string()));
        }

        let sftp = session
            .sftp()
            .map_err(|e| SyncError::Transport(format!("打开 SFTP 子系统失败: {}", e)))?;

        Ok(OpenSession { sftp, session })
    }

    /// 依次尝试解析出的每个地址，返回第一个连上的
    fn connect_any(
        host: &str,
        port: u16,
        addrs: &[SocketAddr],
        connect_timeout: Duration,
    ) -> SyncResult<TcpStream> {
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(addr, connect_timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => {
                    debug!("TCP 连接到 {} 失败: {}", addr, e);
                    last_error = Some(format!("TCP 连接到 {} 失败: {}", addr, e));
                }
            }
        }
        Err(SyncError::Transport(
            last_error.unwrap_or_else(|| format!("无法解析 {}:{}", host, port)),
        ))
    }

    /// 在阻塞线程池中使用当前会话
    async fn with_sftp<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> SyncResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = inner
                .lock()
                .map_err(|_| SyncError::Transport("SFTP 会话锁已损坏".to_string()))?;
            let open = guard
                .as_ref()
                .ok_or_else(|| SyncError::Transport("SFTP 会话未建立".to_string()))?;
            f(&open.sftp)
        })
        .await
        .map_err(|e| SyncError::Transport(format!("后台任务失败: {}", e)))?
    }
}

/// libssh2 的 LIBSSH2_ERROR_AUTHENTICATION_FAILED
const AUTHENTICATION_FAILED: i32 = -18;

/// 只有服务器明确拒绝凭证才算认证失败，超时、断开等归为连接失败
fn classify_auth_error(e: ssh2::Error) -> SyncError {
    match e.code() {
        ErrorCode::Session(AUTHENTICATION_FAILED) => SyncError::Authentication(e.to_string()),
        _ => SyncError::Transport(format!("认证过程中连接失败: {}", e)),
    }
}

#[async_trait]
impl TransferClient for SftpClient {
    async fn connect(&mut self) -> SyncResult<()> {
        info!("连接 {}", self.name);

        let host = self.host.clone();
        let username = self.username.clone();
        let password = self.password.clone();
        let port = self.port;
        let timeout = self.connect_timeout;

        let opened = tokio::task::spawn_blocking(move || {
            Self::open_session(&host, port, &username, &password, timeout)
        })
        .await
        .map_err(|e| SyncError::Transport(format!("后台任务失败: {}", e)))?;

        match opened {
            Ok(open) => {
                let mut guard = self
                    .inner
                    .lock()
                    .map_err(|_| SyncError::Transport("SFTP 会话锁已损坏".to_string()))?;
                *guard = Some(open);
                info!("SFTP 连接已建立: {}", self.name);
                Ok(())
            }
            Err(e) => {
                warn!("连接 {} 失败: {}", self.name, e);
                Err(e)
            }
        }
    }

    async fn list_files(&mut self, remote_dir: &str) -> SyncResult<Vec<RemoteEntry>> {
        let dir = remote_dir.to_string();
        let result = self
            .with_sftp(move |sftp| {
                let entries = sftp
                    .readdir(Path::new(&dir))
                    .map_err(|e| SyncError::remote(&dir, e))?;

                Ok(entries
                    .into_iter()
                    .filter(|(_, stat)| !stat.is_dir())
                    .filter_map(|(path, stat)| {
                        let name = path.file_name()?.to_str()?.to_string();
                        Some(RemoteEntry {
                            name,
                            is_dir: false,
                            size: stat.size.unwrap_or(0),
                            mode: stat.perm,
                        })
                    })
                    .collect::<Vec<_>>())
            })
            .await;

        match &result {
            Ok(files) => debug!("列出远程目录 {}: {} 个文件", remote_dir, files.len()),
            Err(e) => warn!("列出远程目录 {} 失败: {}", remote_dir, e),
        }
        result
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> SyncResult<u64> {
        let local = local_path.to_path_buf();
        let remote = remote_path.to_string();
        let result = self
            .with_sftp(move |sftp| {
                let mut source = File::open(&local).map_err(|e| SyncError::local(&local, e))?;
                let mut target = sftp
                    .create(Path::new(&remote))
                    .map_err(|e| SyncError::remote(&remote, e))?;
                io::copy(&mut source, &mut target).map_err(|e| SyncError::remote(&remote, e))
            })
            .await;

        match &result {
            Ok(bytes) => info!("已上传: {} -> {} ({} 字节)", local_path.display(), remote_path, bytes),
            Err(e) => warn!("上传 {} 失败: {}", local_path.display(), e),
        }
        result
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> SyncResult<u64> {
        let local: PathBuf = local_path.to_path_buf();
        let remote = remote_path.to_string();
        let result = self
            .with_sftp(move |sftp| {
                let mut source = sftp
                    .open(Path::new(&remote))
                    .map_err(|e| SyncError::remote(&remote, e))?;
                let mut target = File::create(&local).map_err(|e| SyncError::local(&local, e))?;
                io::copy(&mut source, &mut target).map_err(|e| SyncError::remote(&remote, e))
            })
            .await;

        match &result {
            Ok(bytes) => info!("已下载: {} -> {} ({} 字节)", remote_path, local_path.display(), bytes),
            Err(e) => warn!("下载 {} 失败: {}", remote_path, e),
        }
        result
    }

    async fn remove(&mut self, remote_path: &str) -> SyncResult<()> {
        let remote = remote_path.to_string();
        let result = self
            .with_sftp(move |sftp| {
                sftp.unlink(Path::new(&remote))
                    .map_err(|e| SyncError::remote(&remote, e))
            })
            .await;

        match &result {
            Ok(()) => info!("已删除远程文件: {}", remote_path),
            Err(e) => warn!("删除远程文件 {} 失败: {}", remote_path, e),
        }
        result
    }

    async fn close(&mut self) {
        let taken = match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        let Some(open) = taken else {
            debug!("会话未打开，无需关闭: {}", self.name);
            return;
        };

        let _ = tokio::task::spawn_blocking(move || {
            let OpenSession { sftp, session } = open;
            drop(sftp);
            if let Err(e) = session.disconnect(None, "sync finished", None) {
                debug!("断开 SSH 会话时出错: {}", e);
            }
        })
        .await;

        info!("SFTP 连接已关闭: {}", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
