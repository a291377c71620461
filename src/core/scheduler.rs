//! 定时调度
//!
//! 三类任务共享一个取消令牌：
//! - 同步工作者：从容量为 1 的队列中取出请求，逐轮执行，不会重叠
//! - 循环定时器：按同步间隔投递请求，间隔变更后立即重新计时
//! - 每日摘要：在固定的 `HH:MM` 发送最近 24 小时的活动日志

use crate::config::{ScheduleConfig, SyncInterval};
use crate::core::engine::SyncEngine;
use crate::core::notifier::{deliver, digest_message, Notifier};
use crate::logging::ActivityLog;
use crate::storage::ClientFactory;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 同步请求的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTrigger {
    Startup,
    Timer,
    Manual,
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    factory: ClientFactory,
    notifier: Arc<dyn Notifier>,
    activity: ActivityLog,
    config: ScheduleConfig,
}

/// 运行中调度器的控制句柄
#[derive(Clone)]
pub struct SchedulerHandle {
    requests: mpsc::Sender<PassTrigger>,
    interval: Arc<watch::Sender<SyncInterval>>,
    shutdown: CancellationToken,
    engine: Arc<SyncEngine>,
    busy: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        factory: ClientFactory,
        notifier: Arc<dyn Notifier>,
        activity: ActivityLog,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            engine,
            factory,
            notifier,
            activity,
            config,
        }
    }

    /// 启动所有后台任务
    ///
    /// 返回的 `JoinHandle` 在所有任务退出后完成。
    pub fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let (interval_tx, interval_rx) = watch::channel(self.config.interval);
        let shutdown = CancellationToken::new();
        let busy = Arc::new(AtomicBool::new(false));

        if self.config.run_on_start {
            enqueue(&tx, PassTrigger::Startup);
        }

        let mut tasks = JoinSet::new();

        tasks.spawn(run_worker(
            rx,
            self.engine.clone(),
            self.factory.clone(),
            busy.clone(),
            shutdown.clone(),
        ));

        tasks.spawn(run_timer(tx.clone(), interval_rx, shutdown.clone()));

        for at in self.config.parsed_digest_times() {
            tasks.spawn(run_digest(
                at,
                self.notifier.clone(),
                self.activity.clone(),
                shutdown.clone(),
            ));
        }

        info!(
            "调度器已启动: 间隔 {}, 摘要时间 {:?}",
            self.config.interval, self.config.digest_times
        );

        let supervisor = tokio::spawn(async move {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    warn!("调度任务异常退出: {}", e);
                }
            }
            info!("调度器已停止");
        });

        let handle = SchedulerHandle {
            requests: tx,
            interval: Arc::new(interval_tx),
            shutdown,
            engine: self.engine,
            busy,
        };

        (handle, supervisor)
    }
}

impl SchedulerHandle {
    /// 手动请求一轮同步；已有请求在排队时合并并返回 `false`
    pub fn request_pass(&self) -> bool {
        enqueue(&self.requests, PassTrigger::Manual)
    }

    /// 修改同步间隔，定时器立即按新间隔重新计时
    pub fn set_interval(&self, interval: SyncInterval) {
        info!("同步间隔改为 {}", interval);
        self.interval.send_replace(interval);
    }

    pub fn interval(&self) -> SyncInterval {
        *self.interval.borrow()
    }

    /// 当前是否有一轮同步正在执行
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// 停止所有任务；正在进行的同步在当前文件完成后结束
    pub fn shutdown(&self) {
        info!("正在停止调度器...");
        self.shutdown.cancel();
        self.engine.cancel();
    }
}

/// 投递同步请求，队列已满时丢弃
fn enqueue(tx: &mpsc::Sender<PassTrigger>, trigger: PassTrigger) -> bool {
    match tx.try_send(trigger) {
        Ok(()) => {
            debug!("已投递同步请求: {:?}", trigger);
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            info!("已有同步请求在排队，合并本次请求 ({:?})", trigger);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("调度器已停止，忽略同步请求 ({:?})", trigger);
            false
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<PassTrigger>,
    engine: Arc<SyncEngine>,
    factory: ClientFactory,
    busy: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let trigger = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(trigger) => trigger,
                None => break,
            },
        };

        // 排队中的请求在停止后不再执行
        if shutdown.is_cancelled() {
            debug!("调度器已停止，丢弃排队的同步请求: {:?}", trigger);
            break;
        }

        busy.store(true, Ordering::SeqCst);
        let _busy_guard = scopeguard::guard(busy.clone(), |flag| {
            flag.store(false, Ordering::SeqCst);
        });

        debug!("开始执行同步请求: {:?}", trigger);
        let mut client = factory();
        let result = engine.run_pass(client.as_mut()).await;

        if let Some(reason) = &result.aborted {
            if reason.is_fatal() {
                warn!("本轮同步因连接问题终止，将在下一次触发时重试");
            }
        }
    }
    debug!("同步工作者退出");
}

async fn run_timer(
    tx: mpsc::Sender<PassTrigger>,
    mut interval_rx: watch::Receiver<SyncInterval>,
    shutdown: CancellationToken,
) {
    loop {
        let period = interval_rx.borrow_and_update().as_duration();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("定时器已设置: 每 {:?}", period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    enqueue(&tx, PassTrigger::Timer);
                }
            }
        }
    }
}

/// 计算下一次触发时间：今天的 `at` 晚于 `now` 则是今天，否则是明天
pub fn next_daily_fire(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

async fn run_digest(
    at: NaiveTime,
    notifier: Arc<dyn Notifier>,
    activity: ActivityLog,
    shutdown: CancellationToken,
) {
    let mut last_fired: Option<NaiveDateTime> = None;

    loop {
        let now = Local::now().naive_local();
        // 从上一次触发时间之后开始计算
        let base = last_fired.map_or(now, |fired| fired.max(now));
        let next = next_daily_fire(base, at);
        let wait = (next - now).to_std().unwrap_or_default();
        debug!("下一次摘要: {}", next.format("%Y-%m-%d %H:%M"));

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {
                send_digest(notifier.as_ref(), &activity).await;
                last_fired = Some(next);
            }
        }
    }
}

/// 发送最近 24 小时的活动摘要
pub async fn send_digest(notifier: &dyn Notifier, activity: &ActivityLog) {
    let now = Local::now();
    let entries = activity.last_day(now);
    info!("发送每日摘要: {} 行", entries.len());
    let (subject, body) = digest_message(&entries, now);
    deliver(notifier, &subject, &body).await;
}
