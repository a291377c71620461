use crate::error::SyncResult;
use crate::storage::{LocalDir, TransferClient};
use tracing::{debug, info};

/// 候选文件过滤配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（支持 `*` 通配符，不区分大小写）
    pub exclude_patterns: Vec<String>,
    /// 是否允许符号链接（指向文件时）
    pub allow_symlinks: bool,
}

/// 扁平目录扫描器，产出本轮的候选文件名
pub struct FileScanner {
    config: ScanConfig,
    patterns: Vec<regex::Regex>,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        let patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|p| Self::compile_pattern(p))
            .collect();
        Self { config, patterns }
    }

    /// 将简单的通配符规则转换为正则
    fn compile_pattern(pattern: &str) -> Option<regex::Regex> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }
        let escaped = regex::escape(&pattern.to_lowercase()).replace("\\*", ".*");
        match regex::Regex::new(&format!("^{}$", escaped)) {
            Ok(re) => Some(re),
            Err(e) => {
                debug!("忽略无效的排除规则 {}: {}", pattern, e);
                None
            }
        }
    }

    /// 隐藏文件和空文件名永远不参与同步
    pub fn is_hidden_or_blank(name: &str) -> bool {
        name.trim().is_empty() || name.starts_with('.')
    }

    /// 检查文件名是否应该被排除
    fn should_exclude(&self, name: &str) -> bool {
        if Self::is_hidden_or_blank(name) {
            return true;
        }
        let lower = name.to_lowercase();
        self.patterns.iter().any(|re| re.is_match(&lower))
    }

    /// 过滤一组文件名，保持原有顺序
    pub fn filter_names<I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut excluded = 0usize;
        let candidates: Vec<String> = names
            .into_iter()
            .filter(|name| {
                if self.should_exclude(name) {
                    debug!("排除文件: {:?}", name);
                    excluded += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        if excluded > 0 {
            debug!("{} 个文件被排除", excluded);
        }
        candidates
    }

    /// 扫描本地目录
    pub async fn scan_local(&self, dir: &LocalDir) -> SyncResult<Vec<String>> {
        let entries = dir.list_entries().await?;
        let total = entries.len();

        let files = entries.into_iter().filter_map(|entry| {
            if !entry.is_file {
                return None;
            }
            if entry.is_symlink && !self.config.allow_symlinks {
                debug!("跳过符号链接: {}", entry.name);
                return None;
            }
            Some(entry.name)
        });
        let candidates = self.filter_names(files);

        info!(
            "扫描本地目录完成 {}: {} 个条目, {} 个候选文件",
            dir.name(),
            total,
            candidates.len()
        );
        Ok(candidates)
    }

    /// 扫描远程目录
    pub async fn scan_remote(
        &self,
        client: &mut dyn TransferClient,
        remote_dir: &str,
    ) -> SyncResult<Vec<String>> {
        let mut entries = client.list_files(remote_dir).await?;
        entries.retain(|e| !e.is_dir);
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let total = entries.len();

        let candidates = self.filter_names(entries.into_iter().map(|e| e.name));

        info!(
            "扫描远程目录完成 {}: {} 个文件, {} 个候选文件",
            remote_dir,
            total,
            candidates.len()
        );
        Ok(candidates)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}
