use crate::core::ledger::TransferLedger;
use crate::core::notifier::{deliver, pass_message, Notifier};
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{ConnectionProfile, SyncDirection};
use crate::storage::{LocalDir, TransferClient};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 一轮同步所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Idle,
    Connecting,
    Listing,
    TransferLoop,
    Finalizing,
}

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 传输成功后删除源文件
    pub delete_after_transfer: bool,
    /// 扫描配置
    pub scan_config: ScanConfig,
}

impl SyncConfig {
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        Self {
            delete_after_transfer: profile.delete_after_transfer,
            scan_config: ScanConfig {
                exclude_patterns: profile.exclude_patterns.clone(),
                // 上传时允许指向文件的符号链接，本地复制只处理普通文件
                allow_symlinks: profile.direction == SyncDirection::LocalToRemote,
            },
        }
    }
}

/// 传输失败的文件
#[derive(Debug)]
pub struct FailedFile {
    pub name: String,
    pub error: SyncError,
}

/// 一轮同步的结果
#[derive(Debug)]
pub struct PassResult {
    pub pass_id: String,
    pub direction: SyncDirection,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    /// 本轮成功传输的文件（按处理顺序）
    pub transferred: Vec<String>,
    /// 因已有传输记录而跳过的文件
    pub skipped: Vec<String>,
    pub failed: Vec<FailedFile>,
    pub bytes_transferred: u64,
    /// 连接或列目录失败，本轮没有进入传输阶段
    pub aborted: Option<SyncError>,
    pub cancelled: bool,
}

impl PassResult {
    fn new(direction: SyncDirection) -> Self {
        Self {
            pass_id: uuid::Uuid::new_v4().to_string(),
            direction,
            started_at: Local::now(),
            finished_at: None,
            transferred: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            bytes_transferred: 0,
            aborted: None,
            cancelled: false,
        }
    }

    /// 没有任何失败
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failed.is_empty()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn duration_secs(&self) -> i64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_seconds())
            .unwrap_or(0)
    }
}

/// 同步引擎
///
/// 每次调用 `run_pass` 执行一轮完整同步。传输严格串行：
/// 每个文件的记录写盘先于下一个文件的检查。
pub struct SyncEngine {
    profile: ConnectionProfile,
    config: SyncConfig,
    ledger_path: PathBuf,
    notifier: Arc<dyn Notifier>,
    cancelled: Arc<AtomicBool>,
    phase: watch::Sender<PassPhase>,
}

impl SyncEngine {
    pub fn new(
        profile: ConnectionProfile,
        ledger_path: impl Into<PathBuf>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let config = SyncConfig::from_profile(&profile);
        let (phase, _) = watch::channel(PassPhase::Idle);
        Self {
            profile,
            config,
            ledger_path: ledger_path.into(),
            notifier,
            cancelled: Arc::new(AtomicBool::new(false)),
            phase,
        }
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    pub fn phase(&self) -> PassPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PassPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: PassPhase) {
        debug!("同步阶段: {:?}", phase);
        self.phase.send_replace(phase);
    }

    /// 请求取消，在当前文件传输完成后生效
    ///
    /// 取消后引擎不再传输任何文件，之后的每一轮都会立即结束。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 执行一轮同步
    ///
    /// 无论连接是否成功，`client.close()` 都会且只会被调用一次。
    pub async fn run_pass(&self, client: &mut dyn TransferClient) -> PassResult {
        let direction = self.profile.direction;
        let mut result = PassResult::new(direction);

        info!("开始同步 [{}]: {}", result.pass_id, direction);

        self.set_phase(PassPhase::Connecting);
        let mut ledger = TransferLedger::load(&self.ledger_path);

        if direction.needs_remote() {
            if let Err(e) = client.connect().await {
                error!("连接失败，本轮同步终止: {}", e);
                result.aborted = Some(e);
                return self.finalize(client, result).await;
            }
        }

        self.set_phase(PassPhase::Listing);
        let candidates = match self.list_candidates(client).await {
            Ok(c) => c,
            Err(e) => {
                error!("列出候选文件失败，本轮同步终止: {}", e);
                result.aborted = Some(e);
                return self.finalize(client, result).await;
            }
        };

        self.set_phase(PassPhase::TransferLoop);
        let ledger_key = direction.ledger_key();

        for name in candidates {
            if self.is_cancelled() {
                info!("同步已取消，剩余文件留到下一轮");
                result.cancelled = true;
                break;
            }

            if let Some(key) = ledger_key {
                if ledger.has(key, &name) {
                    debug!("已传输过，跳过: {}", name);
                    result.skipped.push(name);
                    continue;
                }
            }

            match self.transfer_one(client, &name).await {
                Ok(bytes) => {
                    result.bytes_transferred += bytes;

                    // 记录未落盘的文件视为未传输：保留源文件，下一轮重试
                    if let Some(key) = ledger_key {
                        if let Err(e) = ledger.record(key, &name) {
                            warn!("写入传输记录失败，{} 将在下一轮重新传输: {}", name, e);
                            result.failed.push(FailedFile { name, error: e });
                            continue;
                        }
                    }

                    if self.config.delete_after_transfer {
                        // 清理失败不影响传输结果
                        if let Err(e) = self.remove_source(client, &name).await {
                            warn!("删除源文件失败 {}: {}", name, e);
                        }
                    }

                    result.transferred.push(name);
                }
                Err(e) => {
                    warn!("传输失败 {}: {}", name, e);
                    result.failed.push(FailedFile { name, error: e });
                }
            }
        }

        self.finalize(client, result).await
    }

    /// 列出本轮的候选文件
    async fn list_candidates(&self, client: &mut dyn TransferClient) -> SyncResult<Vec<String>> {
        let scanner = FileScanner::new(self.config.scan_config.clone());
        let source = LocalDir::new(self.profile.local_path());

        match self.profile.direction {
            SyncDirection::LocalToRemote => scanner.scan_local(&source).await,
            SyncDirection::RemoteToLocal => {
                source.ensure_exists()?;
                scanner.scan_remote(client, &self.profile.remote_dir).await
            }
            SyncDirection::LocalToLocal => {
                LocalDir::new(self.profile.dest_local_path()).ensure_exists()?;
                scanner.scan_local(&source).await
            }
        }
    }

    /// 传输单个文件
    async fn transfer_one(&self, client: &mut dyn TransferClient, name: &str) -> SyncResult<u64> {
        let local = LocalDir::new(self.profile.local_path());

        match self.profile.direction {
            SyncDirection::LocalToRemote => {
                let remote_path = self.profile.remote_path(name);
                client.upload(&local.resolve(name), &remote_path).await
            }
            SyncDirection::RemoteToLocal => {
                let remote_path = self.profile.remote_path(name);
                client.download(&remote_path, &local.resolve(name)).await
            }
            SyncDirection::LocalToLocal => {
                let dest = LocalDir::new(self.profile.dest_local_path());
                local.copy_to(name, &dest).await
            }
        }
    }

    /// 删除源文件
    async fn remove_source(&self, client: &mut dyn TransferClient, name: &str) -> SyncResult<()> {
        match self.profile.direction {
            SyncDirection::LocalToRemote | SyncDirection::LocalToLocal => {
                LocalDir::new(self.profile.local_path()).remove(name).await
            }
            SyncDirection::RemoteToLocal => client.remove(&self.profile.remote_path(name)).await,
        }
    }

    /// 收尾：关闭会话、通知、记录结果
    async fn finalize(&self, client: &mut dyn TransferClient, mut result: PassResult) -> PassResult {
        self.set_phase(PassPhase::Finalizing);

        client.close().await;
        result.finished_at = Some(Local::now());

        let (subject, body) = pass_message(&result);
        deliver(self.notifier.as_ref(), &subject, &body).await;

        if result.is_success() {
            info!(
                "同步完成 [{}]: 传输 {}, 跳过 {}, {} 字节",
                result.pass_id,
                result.transferred.len(),
                result.skipped.len(),
                result.bytes_transferred
            );
        } else {
            warn!(
                "同步结束 [{}]: 传输 {}, 跳过 {}, 失败 {}{}",
                result.pass_id,
                result.transferred.len(),
                result.skipped.len(),
                result.failed.len(),
                result
                    .aborted
                    .as_ref()
                    .map(|e| format!(", 终止原因: {}", e))
                    .unwrap_or_default()
            );
        }

        self.set_phase(PassPhase::Idle);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notifier::RecordingNotifier;
    use crate::models::LedgerDirection;
    use crate::storage::memory::{MemoryClient, MemoryRemote};

    struct Fixture {
        _root: tempfile::TempDir,
        local: PathBuf,
        other: PathBuf,
        ledger: PathBuf,
        remote: Arc<MemoryRemote>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let local = root.path().join("local");
            let other = root.path().join("other");
            std::fs::create_dir_all(&local).unwrap();
            Self {
                local,
                other,
                ledger: root.path().join("ledger.json"),
                _root: root,
                remote: MemoryRemote::new(),
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn write_local(&self, name: &str, data: &[u8]) {
            std::fs::write(self.local.join(name), data).unwrap();
        }

        fn engine(&self, direction: SyncDirection, delete_after_transfer: bool) -> SyncEngine {
            let profile = self.profile(direction, delete_after_transfer);
            SyncEngine::new(profile, &self.ledger, self.notifier.clone())
        }

        fn profile(&self, direction: SyncDirection, delete_after_transfer: bool) -> ConnectionProfile {
            let remote_dir = match direction {
                SyncDirection::LocalToLocal => self.other.display().to_string(),
                _ => "/upload".to_string(),
            };
            let profile = ConnectionProfile {
                host: "sftp.example.com".into(),
                port: 22,
                username: "backup".into(),
                secret: "secret".into(),
                local_dir: self.local.display().to_string(),
                remote_dir,
                direction,
                delete_after_transfer,
                exclude_patterns: vec![],
                connect_timeout_secs: 5,
            };
            profile
        }

        async fn run(&self, engine: &SyncEngine) -> PassResult {
            let mut client = MemoryClient::new(self.remote.clone());
            engine.run_pass(&mut client).await
        }
    }

    #[tokio::test]
    async fn test_ledger_prevents_retransfer() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        fx.write_local("b.txt", b"b");
        TransferLedger::load(&fx.ledger)
            .record(LedgerDirection::ToRemote, "a.txt")
            .unwrap();

        let engine = fx.engine(SyncDirection::LocalToRemote, false);
        let result = fx.run(&engine).await;

        assert_eq!(result.transferred, vec!["b.txt"]);
        assert_eq!(result.skipped, vec!["a.txt"]);
        assert!(!fx.remote.has("/upload/a.txt"));
        assert!(fx.remote.has("/upload/b.txt"));
        assert!(TransferLedger::load(&fx.ledger).has(LedgerDirection::ToRemote, "b.txt"));
    }

    #[tokio::test]
    async fn test_second_pass_transfers_nothing() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        let engine = fx.engine(SyncDirection::LocalToRemote, false);

        let first = fx.run(&engine).await;
        let second = fx.run(&engine).await;

        assert_eq!(first.transferred, vec!["a.txt"]);
        assert!(second.transferred.is_empty());
        assert_eq!(second.skipped, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_failed_file_not_recorded_and_retried() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        fx.write_local("b.txt", b"b");
        fx.remote.fail_on("b.txt");
        let engine = fx.engine(SyncDirection::LocalToRemote, false);

        let first = fx.run(&engine).await;
        assert_eq!(first.transferred, vec!["a.txt"]);
        assert_eq!(first.failed_names(), vec!["b.txt"]);
        assert!(matches!(first.failed[0].error, SyncError::RemoteIo { .. }));
        assert!(!TransferLedger::load(&fx.ledger).has(LedgerDirection::ToRemote, "b.txt"));

        fx.remote.heal("b.txt");
        let second = fx.run(&engine).await;
        assert_eq!(second.transferred, vec!["b.txt"]);
        assert_eq!(second.skipped, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_pass() {
        let fx = Fixture::new();
        fx.write_local("1.dat", b"one");
        fx.write_local("2.dat", b"two");
        fx.write_local("3.dat", b"three");
        fx.remote.fail_on("2.dat");

        let result = fx.run(&fx.engine(SyncDirection::LocalToRemote, false)).await;

        assert_eq!(result.transferred, vec!["1.dat", "3.dat"]);
        assert_eq!(result.failed_names(), vec!["2.dat"]);
        assert!(result.aborted.is_none());
        assert!(!result.is_success());
        assert_eq!(result.bytes_transferred, 8);
    }

    #[tokio::test]
    async fn test_close_called_once_on_success() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");

        let result = fx.run(&fx.engine(SyncDirection::LocalToRemote, false)).await;

        assert!(result.is_success());
        assert_eq!(fx.remote.closes(), 1);
        assert_eq!(fx.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_finalizes_and_closes() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        *fx.remote.connect_error.lock().unwrap() =
            Some(|| SyncError::Authentication("bad password".into()));

        let engine = fx.engine(SyncDirection::LocalToRemote, false);
        let result = fx.run(&engine).await;

        assert!(matches!(result.aborted, Some(SyncError::Authentication(_))));
        assert!(result.transferred.is_empty());
        assert!(result.failed.is_empty());
        assert_eq!(fx.remote.closes(), 1);
        assert_eq!(engine.phase(), PassPhase::Idle);

        // 失败的一轮同样会通知
        let (subject, body) = fx.notifier.last().unwrap();
        assert!(subject.contains("失败"));
        assert!(body.contains("bad password"));
    }

    #[tokio::test]
    async fn test_download_transport_failure_aborts() {
        let fx = Fixture::new();
        *fx.remote.connect_error.lock().unwrap() = Some(|| SyncError::Transport("timeout".into()));
        let result = fx.run(&fx.engine(SyncDirection::RemoteToLocal, false)).await;
        assert!(matches!(result.aborted, Some(SyncError::Transport(_))));
        assert_eq!(fx.remote.closes(), 1);
    }

    #[tokio::test]
    async fn test_missing_local_dir_aborts_after_connect() {
        let fx = Fixture::new();
        std::fs::remove_dir_all(&fx.local).unwrap();

        let result = fx.run(&fx.engine(SyncDirection::LocalToRemote, false)).await;

        assert!(matches!(result.aborted, Some(SyncError::LocalIo { .. })));
        assert_eq!(fx.remote.closes(), 1);
    }

    #[tokio::test]
    async fn test_upload_deletes_local_source() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        fx.write_local(".keep", b"");

        let result = fx.run(&fx.engine(SyncDirection::LocalToRemote, true)).await;

        assert_eq!(result.transferred, vec!["a.txt"]);
        assert!(!fx.local.join("a.txt").exists());
        assert!(fx.local.join(".keep").exists());
    }

    #[tokio::test]
    async fn test_download_records_and_remote_delete_failure_is_tolerated() {
        let fx = Fixture::new();
        fx.remote.put("/upload/report.csv", b"1,2");
        fx.remote.put("/upload/.lock", b"");
        fx.remote
            .failing_removes
            .lock()
            .unwrap()
            .insert("/upload/report.csv".to_string());
        std::fs::remove_dir_all(&fx.local).unwrap();

        let result = fx.run(&fx.engine(SyncDirection::RemoteToLocal, true)).await;

        assert_eq!(result.transferred, vec!["report.csv"]);
        assert!(result.failed.is_empty());
        assert_eq!(std::fs::read(fx.local.join("report.csv")).unwrap(), b"1,2");
        assert!(TransferLedger::load(&fx.ledger).has(LedgerDirection::ToLocal, "report.csv"));
        assert!(fx.remote.has("/upload/report.csv"));
    }

    #[tokio::test]
    async fn test_download_removes_remote_source() {
        let fx = Fixture::new();
        fx.remote.put("/upload/a.bin", b"aa");

        let result = fx.run(&fx.engine(SyncDirection::RemoteToLocal, true)).await;

        assert_eq!(result.transferred, vec!["a.bin"]);
        assert!(!fx.remote.has("/upload/a.bin"));
    }

    #[tokio::test]
    async fn test_local_copy_is_not_ledgered() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        let engine = fx.engine(SyncDirection::LocalToLocal, false);

        let first = fx.run(&engine).await;
        let second = fx.run(&engine).await;

        assert_eq!(first.transferred, vec!["a.txt"]);
        assert_eq!(second.transferred, vec!["a.txt"]);
        assert_eq!(std::fs::read(fx.other.join("a.txt")).unwrap(), b"a");
        assert!(TransferLedger::load(&fx.ledger).is_empty());
        // 本地复制不建立远程会话，但仍然关闭（空操作）
        assert_eq!(fx.remote.connects.load(Ordering::SeqCst), 0);
        assert_eq!(fx.remote.closes(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_engine_transfers_nothing() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        let engine = fx.engine(SyncDirection::LocalToRemote, false);

        // 取消不会在下一轮开始时被清除
        engine.cancel();
        let result = fx.run(&engine).await;
        assert!(result.cancelled);
        assert!(result.transferred.is_empty());
        assert!(!fx.remote.has("/upload/a.txt"));
        assert_eq!(fx.remote.closes(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ledger_write_failure_counts_as_failed() {
        let fx = Fixture::new();
        fx.write_local("a.txt", b"a");
        // 记录文件的父路径是普通文件，写盘必然失败
        let blocker = fx.local.parent().unwrap().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let engine = SyncEngine::new(
            fx.profile(SyncDirection::LocalToRemote, true),
            blocker.join("ledger.json"),
            fx.notifier.clone(),
        );
        let result = fx.run(&engine).await;

        assert!(result.transferred.is_empty());
        assert_eq!(result.failed_names(), vec!["a.txt"]);
        assert!(matches!(result.failed[0].error, SyncError::LocalIo { .. }));
        assert!(!result.is_success());
        // 源文件保留，下一轮重试
        assert!(fx.local.join("a.txt").exists());

        let (subject, _) = fx.notifier.last().unwrap();
        assert!(subject.contains("部分失败"));
    }
}
