use chrono::{DateTime, Duration, Utc};
use orchestrator_core::config::MonitorConfig;
use orchestrator_core::models::Task;

/// 超时回收的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutDecision {
    Requeue {
        next_run_at: DateTime<Utc>,
        retry_count: i32,
    },
    /// 重试次数耗尽，置为 TIMEOUT 并禁用
    Exhausted,
}

/// 失败任务的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FailedTaskDecision {
    Requeue { retry_count: i32 },
    WaitBackoff { remaining: Duration },
    Exhausted,
}

/// 重试与超时策略
///
/// 退避序列为 `base × 2^retry_count`，不加抖动，上限 `max_backoff`。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub running_timeout: Duration,
    pub timeout_requeue_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            backoff_base: Duration::minutes(config.backoff_base_minutes),
            max_backoff: Duration::minutes(config.max_backoff_minutes),
            running_timeout: Duration::minutes(config.running_timeout_minutes),
            timeout_requeue_delay: Duration::minutes(config.timeout_requeue_delay_minutes),
        }
    }

    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.max(0) as u32;
        let multiplier = match 2_i32.checked_pow(exponent) {
            Some(m) => m,
            None => return self.max_backoff,
        };
        match self.backoff_base.checked_mul(multiplier) {
            Some(backoff) => backoff.min(self.max_backoff),
            None => self.max_backoff,
        }
    }

    /// RUNNING 且 `updated_at` 早于超时阈值
    pub fn is_running_stale(&self, task: &Task, now: DateTime<Utc>) -> bool {
        now - task.updated_at > self.running_timeout
    }

    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.running_timeout
    }

    pub fn decide_timeout(&self, task: &Task, now: DateTime<Utc>) -> TimeoutDecision {
        if task.can_retry() {
            TimeoutDecision::Requeue {
                next_run_at: now + self.timeout_requeue_delay,
                retry_count: task.retry_count + 1,
            }
        } else {
            TimeoutDecision::Exhausted
        }
    }

    pub fn decide_failed(&self, task: &Task, now: DateTime<Utc>) -> FailedTaskDecision {
        if !task.can_retry() {
            return FailedTaskDecision::Exhausted;
        }
        let elapsed = now - task.updated_at;
        let backoff = self.backoff(task.retry_count);
        if elapsed >= backoff {
            FailedTaskDecision::Requeue {
                retry_count: task.retry_count + 1,
            }
        } else {
            FailedTaskDecision::WaitBackoff {
                remaining: backoff - elapsed,
            }
        }
    }
}
