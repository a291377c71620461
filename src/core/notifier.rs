//! 通知模块
//!
//! 同步结果和每日摘要通过 `Notifier` 发出。通知失败只记录日志，
//! 不会影响同步本身。

use crate::config::NotifyConfig;
use crate::core::engine::PassResult;
use crate::logging::ActivityEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SUBJECT_PREFIX: &str = "[sftpsync]";

/// 通知发送接口
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// 只写入日志的通知器
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        info!("通知: {}", subject);
        for line in body.lines() {
            debug!("  {}", line);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// 以 JSON POST 到指定地址的通知器
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&WebhookPayload { subject, body })
            .send()
            .await
            .with_context(|| format!("发送通知失败: {}", self.url))?
            .error_for_status()
            .context("通知地址返回错误状态")?;

        debug!("通知已发送: {}", subject);
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// 发送通知，失败时只记录警告
pub async fn deliver(notifier: &dyn Notifier, subject: &str, body: &str) {
    if let Err(e) = notifier.notify(subject, body).await {
        warn!("通知发送失败 ({}): {:#}", notifier.name(), e);
    }
}

/// 根据配置创建通知器；未配置 webhook 或地址无效时退回日志通知
pub fn create_notifier(config: &NotifyConfig) -> Arc<dyn Notifier> {
    if !config.enabled {
        return Arc::new(LogNotifier);
    }

    match config.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            match WebhookNotifier::new(url, Duration::from_secs(config.timeout_secs.max(1))) {
                Ok(notifier) => Arc::new(notifier),
                Err(e) => {
                    warn!("Webhook 通知不可用，改为写入日志: {:#}", e);
                    Arc::new(LogNotifier)
                }
            }
        }
        _ => Arc::new(LogNotifier),
    }
}

/// 生成一轮同步的通知内容
pub fn pass_message(result: &PassResult) -> (String, String) {
    let subject = if let Some(reason) = &result.aborted {
        format!("{} 同步失败: {}", SUBJECT_PREFIX, reason)
    } else if result.failed.is_empty() {
        format!(
            "{} 同步完成: 传输 {} 个文件",
            SUBJECT_PREFIX,
            result.transferred.len()
        )
    } else {
        format!(
            "{} 同步部分失败: 传输 {} 个, 失败 {} 个",
            SUBJECT_PREFIX,
            result.transferred.len(),
            result.failed.len()
        )
    };

    let mut body = String::new();
    let _ = writeln!(body, "方向: {}", result.direction);
    let _ = writeln!(
        body,
        "开始: {}",
        result.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(end) = result.finished_at {
        let _ = writeln!(body, "结束: {}", end.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(reason) = &result.aborted {
        let _ = writeln!(body, "错误: {}", reason);
    }
    if result.cancelled {
        let _ = writeln!(body, "本轮已取消，剩余文件将在下一轮处理");
    }

    let _ = writeln!(
        body,
        "传输 {} 个 ({} 字节), 跳过 {} 个",
        result.transferred.len(),
        result.bytes_transferred,
        result.skipped.len()
    );
    for name in &result.transferred {
        let _ = writeln!(body, "  + {}", name);
    }

    if !result.failed.is_empty() {
        let _ = writeln!(body, "失败 {} 个:", result.failed.len());
        for f in &result.failed {
            let _ = writeln!(body, "  ! {}: {}", f.name, f.error);
        }
    }

    (subject, body)
}

/// 生成每日摘要
pub fn digest_message(entries: &[ActivityEntry], now: DateTime<Local>) -> (String, String) {
    let subject = format!(
        "{} 每日摘要 {}",
        SUBJECT_PREFIX,
        now.format("%Y-%m-%d %H:%M")
    );

    if entries.is_empty() {
        return (subject, "过去 24 小时没有活动记录".to_string());
    }

    let body = entries
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    (subject, body)
}

/// 记录所有通知的测试替身
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<(String, String)> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("smtp unreachable");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
