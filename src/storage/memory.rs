//! 内存中的传输客户端，供测试使用

use super::{RemoteEntry, TransferClient};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// 多个客户端实例共享的远程状态
#[derive(Default)]
pub struct MemoryRemote {
    /// 远程路径 -> 内容
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    /// 远程子目录
    pub dirs: Mutex<BTreeSet<String>>,
    /// 上传/下载时失败的文件名
    pub failing: Mutex<HashSet<String>>,
    /// 删除时失败的远程路径
    pub failing_removes: Mutex<HashSet<String>>,
    /// 连接时返回的错误
    pub connect_error: Mutex<Option<fn() -> SyncError>>,
    /// 设置后，每次传输前需要获取一个许可
    pub gate: Mutex<Option<Arc<Semaphore>>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub transfers_started: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
    }

    pub fn mkdir(&self, path: &str) {
        self.dirs.lock().unwrap().insert(path.to_string());
    }

    pub fn has(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MemoryClient {
    remote: Arc<MemoryRemote>,
    connected: bool,
}

impl MemoryClient {
    pub fn new(remote: Arc<MemoryRemote>) -> Self {
        Self {
            remote,
            connected: false,
        }
    }

    fn file_name(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(SyncError::Transport("not connected".into()))
        }
    }

    async fn begin_transfer(&self, path: &str) -> SyncResult<()> {
        self.ensure_connected()?;
        self.remote.transfers_started.fetch_add(1, Ordering::SeqCst);
        let gate = self.remote.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self
            .remote
            .failing
            .lock()
            .unwrap()
            .contains(Self::file_name(path))
        {
            return Err(SyncError::remote(path, "simulated failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TransferClient for MemoryClient {
    async fn connect(&mut self) -> SyncResult<()> {
        self.remote.connects.fetch_add(1, Ordering::SeqCst);
        let connect_error = *self.remote.connect_error.lock().unwrap();
        if let Some(make_err) = connect_error {
            return Err(make_err());
        }
        self.connected = true;
        let active = self.remote.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.remote.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(())
    }

    async fn list_files(&mut self, remote_dir: &str) -> SyncResult<Vec<RemoteEntry>> {
        self.ensure_connected()?;
        let prefix = format!("{}/", remote_dir.trim_end_matches('/'));
        let child = |path: &str| -> Option<String> {
            let name = path.strip_prefix(&prefix)?;
            (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
        };

        let mut entries: Vec<RemoteEntry> = self
            .remote
            .dirs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|path| child(path.as_str()))
            .map(|name| RemoteEntry {
                name,
                is_dir: true,
                size: 0,
                mode: Some(0o755),
            })
            .collect();
        let files = self.remote.files.lock().unwrap();
        entries.extend(files.iter().filter_map(|(path, data)| {
            Some(RemoteEntry {
                name: child(path.as_str())?,
                is_dir: false,
                size: data.len() as u64,
                mode: Some(0o644),
            })
        }));
        Ok(entries)
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> SyncResult<u64> {
        self.begin_transfer(remote_path).await?;
        let data = std::fs::read(local_path).map_err(|e| SyncError::local(local_path, e))?;
        let len = data.len() as u64;
        self.remote.put(remote_path, &data);
        Ok(len)
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> SyncResult<u64> {
        self.begin_transfer(remote_path).await?;
        let data = self
            .remote
            .files
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| SyncError::remote(remote_path, "no such file"))?;
        std::fs::write(local_path, &data).map_err(|e| SyncError::local(local_path, e))?;
        Ok(data.len() as u64)
    }

    async fn remove(&mut self, remote_path: &str) -> SyncResult<()> {
        self.ensure_connected()?;
        if self.remote.failing_removes.lock().unwrap().contains(remote_path) {
            return Err(SyncError::remote(remote_path, "permission denied"));
        }
        self.remote
            .files
            .lock()
            .unwrap()
            .remove(remote_path)
            .map(|_| ())
            .ok_or_else(|| SyncError::remote(remote_path, "no such file"))
    }

    async fn close(&mut self) {
        self.remote.closes.fetch_add(1, Ordering::SeqCst);
        if self.connected {
            self.connected = false;
            self.remote.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
