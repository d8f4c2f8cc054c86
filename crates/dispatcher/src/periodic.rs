//! 通用周期任务运行器
//!
//! 扫描调度、监控巡检共用同一个循环：按固定周期或 CRON 表达式触发，
//! 每次触发在独立的 tokio 任务中执行，单次执行的错误或 panic 只记录日志，
//! 不会终止循环。

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use orchestrator_core::config::RunSchedule;
use orchestrator_core::SchedulerResult;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cron_utils::CronScheduler;

/// CRON 表达式没有后续触发时间时的重试间隔
const CRON_EXHAUSTED_BACKOFF: Duration = Duration::from_secs(60);

enum Trigger {
    Interval(Duration),
    Cron(CronScheduler),
}

pub struct PeriodicRunner {
    name: String,
    trigger: Trigger,
}

impl PeriodicRunner {
    pub fn new(name: impl Into<String>, schedule: RunSchedule) -> SchedulerResult<Self> {
        let trigger = match schedule {
            RunSchedule::Interval(period) => Trigger::Interval(period),
            RunSchedule::Cron(expr) => Trigger::Cron(CronScheduler::new(&expr)?),
        };
        Ok(Self {
            name: name.into(),
            trigger,
        })
    }

    /// 运行直到收到关闭信号
    pub async fn run<F, Fut>(&self, job: F, mut shutdown_rx: broadcast::Receiver<()>)
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = SchedulerResult<()>> + Send + 'static,
    {
        match &self.trigger {
            Trigger::Interval(period) => {
                info!("周期任务 {} 启动，间隔 {:?}", self.name, period);
                let mut interval = tokio::time::interval(*period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            self.execute(&job).await;
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
            }
            Trigger::Cron(cron) => {
                info!(
                    "周期任务 {} 启动，CRON表达式 {}",
                    self.name,
                    cron.expression()
                );
                loop {
                    let wait = cron
                        .time_until_next_execution(Utc::now())
                        .and_then(|d| d.to_std().ok())
                        .unwrap_or(CRON_EXHAUSTED_BACKOFF);
                    debug!("周期任务 {} 将在 {:?} 后触发", self.name, wait);

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            self.execute(&job).await;
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
            }
        }

        info!("周期任务 {} 收到关闭信号，已停止", self.name);
    }

    async fn execute<F, Fut>(&self, job: &F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SchedulerResult<()>> + Send + 'static,
    {
        match tokio::spawn(job()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("周期任务 {} 执行失败: {}", self.name, e),
            Err(e) if e.is_panic() => error!("周期任务 {} 执行时发生panic: {}", self.name, e),
            Err(e) => warn!("周期任务 {} 被取消: {}", self.name, e),
        }
    }
}
