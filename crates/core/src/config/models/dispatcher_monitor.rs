use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 周期任务的触发方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSchedule {
    Interval(Duration),
    /// 6 段 CRON 表达式（秒 分 时 日 月 周）
    Cron(String),
}

/// 扫描调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub scan_interval_seconds: u64,
    /// 设置后优先于 `scan_interval_seconds`
    pub scan_cron: Option<String>,
    pub max_concurrent_dispatches: usize,
    pub scan_batch_limit: i64,
    pub scheduling_lock_ttl_seconds: u64,
    pub publish_failure_cooldown_seconds: i64,
    pub initial_window_days: i64,
    pub incremental_window_cap_days: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_seconds: 60,
            scan_cron: None,
            max_concurrent_dispatches: 5,
            scan_batch_limit: 200,
            scheduling_lock_ttl_seconds: 30,
            publish_failure_cooldown_seconds: 60,
            initial_window_days: 7,
            incremental_window_cap_days: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("扫描间隔必须大于0"));
        }

        if let Some(expr) = &self.scan_cron {
            if expr.split_whitespace().count() != 6 {
                return Err(anyhow::anyhow!("扫描CRON表达式必须为6段: {}", expr));
            }
        }

        if self.max_concurrent_dispatches == 0 {
            return Err(anyhow::anyhow!("最大并发调度数必须大于0"));
        }

        if self.scan_batch_limit <= 0 {
            return Err(anyhow::anyhow!("单次扫描任务上限必须大于0"));
        }

        if self.scheduling_lock_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("调度锁过期时间必须大于0"));
        }

        if self.publish_failure_cooldown_seconds <= 0 {
            return Err(anyhow::anyhow!("发布失败冷却时间必须大于0"));
        }

        if self.initial_window_days <= 0 || self.incremental_window_cap_days <= 0 {
            return Err(anyhow::anyhow!("时间窗口天数必须大于0"));
        }

        Ok(())
    }

    pub fn schedule(&self) -> RunSchedule {
        match &self.scan_cron {
            Some(expr) => RunSchedule::Cron(expr.clone()),
            None => RunSchedule::Interval(Duration::from_secs(self.scan_interval_seconds)),
        }
    }
}

/// 监控与重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub monitor_cron: Option<String>,
    /// RUNNING 状态超过该时长视为超时
    pub running_timeout_minutes: i64,
    pub timeout_requeue_delay_minutes: i64,
    pub backoff_base_minutes: i64,
    pub max_backoff_minutes: i64,
    pub batch_limit: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            monitor_cron: None,
            running_timeout_minutes: 30,
            timeout_requeue_delay_minutes: 5,
            backoff_base_minutes: 5,
            max_backoff_minutes: 24 * 60,
            batch_limit: 500,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("监控间隔必须大于0"));
        }

        if let Some(expr) = &self.monitor_cron {
            if expr.split_whitespace().count() != 6 {
                return Err(anyhow::anyhow!("监控CRON表达式必须为6段: {}", expr));
            }
        }

        if self.running_timeout_minutes <= 0 {
            return Err(anyhow::anyhow!("运行超时时间必须大于0"));
        }

        if self.timeout_requeue_delay_minutes < 0 {
            return Err(anyhow::anyhow!("超时重排延迟不能为负数"));
        }

        if self.backoff_base_minutes <= 0 {
            return Err(anyhow::anyhow!("退避基数必须大于0"));
        }

        if self.max_backoff_minutes < self.backoff_base_minutes {
            return Err(anyhow::anyhow!("最大退避时间不能小于退避基数"));
        }

        if self.batch_limit <= 0 {
            return Err(anyhow::anyhow!("监控批大小必须大于0"));
        }

        Ok(())
    }

    pub fn schedule(&self) -> RunSchedule {
        match &self.monitor_cron {
            Some(expr) => RunSchedule::Cron(expr.clone()),
            None => RunSchedule::Interval(Duration::from_secs(self.interval_seconds)),
        }
    }
}
