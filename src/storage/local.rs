use crate::error::{SyncError, SyncResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地目录中的一个条目（只看一层）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub name: String,
    pub size: u64,
    /// 是否为文件（跟随符号链接判断）
    pub is_file: bool,
    pub is_symlink: bool,
}

/// 扁平本地目录
pub struct LocalDir {
    base_path: PathBuf,
    name: String,
}

impl LocalDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let base_path = path.into();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.base_path.join(file_name)
    }

    /// 目录不存在时创建
    pub fn ensure_exists(&self) -> SyncResult<()> {
        if !self.base_path.is_dir() {
            std::fs::create_dir_all(&self.base_path)
                .map_err(|e| SyncError::local(&self.base_path, e))?;
            tracing::info!("已创建本地目录: {}", self.base_path.display());
        }
        Ok(())
    }

    /// 列出目录第一层条目，按文件名排序
    pub async fn list_entries(&self) -> SyncResult<Vec<LocalEntry>> {
        let base = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let meta = std::fs::metadata(&base).map_err(|e| SyncError::local(&base, e))?;
            if !meta.is_dir() {
                return Err(SyncError::local(
                    &base,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "不是目录"),
                ));
            }

            let mut entries = Vec::new();
            for entry in WalkDir::new(&base)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::debug!("跳过无法读取的条目: {}", e);
                        continue;
                    }
                };
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    tracing::debug!("跳过非 UTF-8 文件名: {:?}", entry.file_name());
                    continue;
                };

                let is_symlink = entry.path_is_symlink();
                // 符号链接需要跟随一次才能知道目标类型
                let target = if is_symlink {
                    std::fs::metadata(entry.path()).ok()
                } else {
                    entry.metadata().ok()
                };
                let (is_file, size) = target.map_or((false, 0), |m| (m.is_file(), m.len()));

                entries.push(LocalEntry {
                    name,
                    size,
                    is_file,
                    is_symlink,
                });
            }
            Ok(entries)
        })
        .await
        .map_err(|e| {
            SyncError::local(
                &self.base_path,
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )
        })?
    }

    /// 复制一个文件到另一个本地目录，先写临时文件再原子重命名
    pub async fn copy_to(&self, file_name: &str, dest: &LocalDir) -> SyncResult<u64> {
        let from = self.resolve(file_name);
        let to = dest.resolve(file_name);
        let temp_path = dest.resolve(&format!(".{}.partial", file_name));

        let bytes = fs::copy(&from, &temp_path)
            .await
            .map_err(|e| SyncError::local(&from, e))?;
        if let Err(e) = fs::rename(&temp_path, &to).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(SyncError::local(&to, e));
        }

        tracing::info!("已复制: {} -> {} ({} 字节)", from.display(), to.display(), bytes);
        Ok(bytes)
    }

    /// 删除目录中的一个文件
    pub async fn remove(&self, file_name: &str) -> SyncResult<()> {
        let path = self.resolve(file_name);
        fs::remove_file(&path)
            .await
            .map_err(|e| SyncError::local(&path, e))?;
        tracing::info!("已删除本地文件: {}", path.display());
        Ok(())
    }
}
