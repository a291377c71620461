//! 传输记录
//!
//! 记录每个方向上已经传输过的文件名，保证重复运行时不会重复传输。
//! 文件格式为 JSON：`{"to_remote": [...], "to_local": [...]}`，
//! 未知字段原样保留。

use crate::error::{SyncError, SyncResult};
use crate::models::LedgerDirection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 磁盘上的记录内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    to_remote: BTreeSet<String>,
    #[serde(default)]
    to_local: BTreeSet<String>,
    /// 其它字段，保存时原样写回
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// 传输记录
#[derive(Debug)]
pub struct TransferLedger {
    path: PathBuf,
    data: LedgerFile,
}

impl TransferLedger {
    /// 从磁盘加载；文件不存在或已损坏时返回空记录
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let data = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<LedgerFile>(&bytes) {
                Ok(data) => {
                    debug!(
                        "已加载传输记录: 上传 {} 个, 下载 {} 个",
                        data.to_remote.len(),
                        data.to_local.len()
                    );
                    data
                }
                Err(e) => {
                    // 记录丢失只会导致重复传输，不影响数据
                    warn!("传输记录已损坏，按空记录处理 {:?}: {}", path, e);
                    LedgerFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerFile::default(),
            Err(e) => {
                warn!("读取传输记录失败，按空记录处理 {:?}: {}", path, e);
                LedgerFile::default()
            }
        };

        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn set(&self, direction: LedgerDirection) -> &BTreeSet<String> {
        match direction {
            LedgerDirection::ToRemote => &self.data.to_remote,
            LedgerDirection::ToLocal => &self.data.to_local,
        }
    }

    fn set_mut(&mut self, direction: LedgerDirection) -> &mut BTreeSet<String> {
        match direction {
            LedgerDirection::ToRemote => &mut self.data.to_remote,
            LedgerDirection::ToLocal => &mut self.data.to_local,
        }
    }

    pub fn has(&self, direction: LedgerDirection, name: &str) -> bool {
        self.set(direction).contains(name)
    }

    pub fn names(&self, direction: LedgerDirection) -> impl Iterator<Item = &str> {
        self.set(direction).iter().map(String::as_str)
    }

    pub fn len(&self, direction: LedgerDirection) -> usize {
        self.set(direction).len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.to_remote.is_empty() && self.data.to_local.is_empty()
    }

    /// 记录一个文件并立即写盘
    ///
    /// 返回 `Ok` 时记录已经落盘；写盘失败会撤销内存中的插入。
    pub fn record(&mut self, direction: LedgerDirection, name: &str) -> SyncResult<()> {
        if !self.set_mut(direction).insert(name.to_string()) {
            return Ok(());
        }

        if let Err(e) = self.persist() {
            self.set_mut(direction).remove(name);
            return Err(e);
        }

        debug!("已记录 {}: {}", direction.as_str(), name);
        Ok(())
    }

    /// 清空一个方向的记录并写盘，返回清除的条目数
    pub fn clear(&mut self, direction: LedgerDirection) -> SyncResult<usize> {
        let removed = std::mem::take(self.set_mut(direction));
        if removed.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.persist() {
            *self.set_mut(direction) = removed;
            return Err(e);
        }

        info!("已清空 {} 记录 ({} 个)", direction.as_str(), removed.len());
        Ok(removed.len())
    }

    /// 写入临时文件后原子重命名，崩溃时不会留下半截文件
    fn persist(&self) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SyncError::local(parent, e))?;
            }
        }

        let content = serde_json::to_vec_pretty(&self.data).map_err(|e| {
            SyncError::local(&self.path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        let write_temp = || -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()
        };
        if let Err(e) = write_temp() {
            let _ = fs::remove_file(&temp_path);
            return Err(SyncError::local(&temp_path, e));
        }

        fs::rename(&temp_path, &self.path).map_err(|e| SyncError::local(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("ledger.json")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TransferLedger::load(ledger_path(&dir));
        assert!(ledger.is_empty());
        assert!(!ledger.has(LedgerDirection::ToRemote, "a.txt"));
    }

    #[test]
    fn test_corrupt_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(ledger_path(&dir), b"{ not json").unwrap();

        let mut ledger = TransferLedger::load(ledger_path(&dir));
        assert!(ledger.is_empty());

        // 损坏的文件会被新的内容覆盖
        ledger.record(LedgerDirection::ToLocal, "x.bin").unwrap();
        let reloaded = TransferLedger::load(ledger_path(&dir));
        assert!(reloaded.has(LedgerDirection::ToLocal, "x.bin"));
    }

    #[test]
    fn test_round_trip() {
        let cases: Vec<Vec<&str>> = vec![vec![], vec!["a.txt"], vec!["a.txt", "b.txt", "c d.txt"]];

        for names in cases {
            let dir = tempfile::tempdir().unwrap();
            let mut ledger = TransferLedger::load(ledger_path(&dir));
            for name in &names {
                ledger.record(LedgerDirection::ToRemote, name).unwrap();
            }
            // 空集合也需要写出文件
            ledger.persist().unwrap();

            let reloaded = TransferLedger::load(ledger_path(&dir));
            let before: Vec<_> = ledger.names(LedgerDirection::ToRemote).collect();
            let after: Vec<_> = reloaded.names(LedgerDirection::ToRemote).collect();
            assert_eq!(before, after);
            assert_eq!(reloaded.len(LedgerDirection::ToRemote), names.len());
            assert_eq!(reloaded.len(LedgerDirection::ToLocal), 0);
        }
    }

    #[test]
    fn test_directions_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = TransferLedger::load(ledger_path(&dir));
        ledger.record(LedgerDirection::ToRemote, "a.txt").unwrap();

        assert!(ledger.has(LedgerDirection::ToRemote, "a.txt"));
        assert!(!ledger.has(LedgerDirection::ToLocal, "a.txt"));
    }

    #[test]
    fn test_missing_key_and_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            ledger_path(&dir),
            br#"{"to_local": ["old.csv"], "profile": "nightly", "version": 3}"#,
        )
        .unwrap();

        let mut ledger = TransferLedger::load(ledger_path(&dir));
        assert!(ledger.has(LedgerDirection::ToLocal, "old.csv"));
        assert_eq!(ledger.len(LedgerDirection::ToRemote), 0);

        ledger.record(LedgerDirection::ToRemote, "new.csv").unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(ledger_path(&dir)).unwrap()).unwrap();
        assert_eq!(raw["profile"], "nightly");
        assert_eq!(raw["version"], 3);
        assert_eq!(raw["to_remote"], serde_json::json!(["new.csv"]));
        assert!(!dir.path().join("ledger.json.tmp").exists());
    }

    #[test]
    fn test_clear_direction() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = TransferLedger::load(ledger_path(&dir));
        ledger.record(LedgerDirection::ToRemote, "a").unwrap();
        ledger.record(LedgerDirection::ToRemote, "b").unwrap();
        ledger.record(LedgerDirection::ToLocal, "c").unwrap();

        assert_eq!(ledger.clear(LedgerDirection::ToRemote).unwrap(), 2);
        let reloaded = TransferLedger::load(ledger_path(&dir));
        assert_eq!(reloaded.len(LedgerDirection::ToRemote), 0);
        assert!(reloaded.has(LedgerDirection::ToLocal, "c"));
    }

    #[cfg(unix)]
    #[test]
    fn test_record_rolls_back_when_persist_fails() {
        let dir = tempfile::tempdir().unwrap();
        // 父路径是一个普通文件，无法创建目录
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let mut ledger = TransferLedger::load(blocker.join("ledger.json"));
        assert!(ledger.record(LedgerDirection::ToRemote, "a.txt").is_err());
        assert!(!ledger.has(LedgerDirection::ToRemote, "a.txt"));
    }
}
