use std::fmt;

use chrono::{DateTime, Duration, Utc};
use orchestrator_core::config::PriorityConfig;
use orchestrator_core::models::{CrawlPhase, Task, TaskStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl TaskPriority {
    pub fn level(&self) -> u8 {
        *self as u8
    }

    fn lowered(self) -> Self {
        match self {
            TaskPriority::Urgent => TaskPriority::High,
            TaskPriority::High => TaskPriority::Normal,
            TaskPriority::Normal | TaskPriority::Low => TaskPriority::Low,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Normal => "NORMAL",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        };
        f.write_str(s)
    }
}

/// 计算优先级时的外部输入
#[derive(Debug, Clone, Copy)]
pub struct PriorityContext {
    pub now: DateTime<Utc>,
    /// 资源平均使用率 0.0 - 1.0
    pub system_load: f64,
    /// 该任务历史累计抓取量
    pub historical_volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityAssessment {
    pub priority: TaskPriority,
    pub importance_score: i32,
    pub reasons: Vec<String>,
}

/// 优先级计算器
///
/// 相同输入总是得到相同结果。
#[derive(Debug, Clone)]
pub struct PriorityCalculator {
    config: PriorityConfig,
}

impl PriorityCalculator {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    pub fn importance_score(&self, task: &Task, context: &PriorityContext) -> i32 {
        let mut score = task.priority_hint.unwrap_or(40).clamp(0, 100);

        let keyword = task.keyword.to_lowercase();
        if self
            .config
            .hot_keywords
            .iter()
            .any(|hot| !hot.is_empty() && keyword.contains(&hot.to_lowercase()))
        {
            score += 30;
        }

        if self.config.high_volume_threshold > 0
            && context.historical_volume >= self.config.high_volume_threshold
        {
            score += 20;
        }

        if task.crawl_phase() == CrawlPhase::NeedsInitialCrawl {
            score += 10;
        }

        score.clamp(0, 100)
    }

    /// 任务已经超过计划时间等待了多久
    pub fn wait_time(&self, task: &Task, now: DateTime<Utc>) -> Duration {
        let since = task.next_run_at.unwrap_or(task.created_at);
        (now - since).max(Duration::zero())
    }

    pub fn calculate(&self, task: &Task, context: &PriorityContext) -> PriorityAssessment {
        let importance = self.importance_score(task, context);
        let high_importance = importance >= self.config.high_importance_score;
        let mut reasons = Vec::new();

        let recovering = matches!(task.status, TaskStatus::Failed | TaskStatus::Timeout)
            || task.retry_count > 0;
        if recovering {
            reasons.push(format!(
                "恢复中的任务（状态 {}，已重试 {} 次）",
                task.status, task.retry_count
            ));
        }
        if high_importance {
            reasons.push(format!("重要度得分 {importance}"));
        }
        let waited = self.wait_time(task, context.now);
        let long_wait = waited >= Duration::minutes(self.config.long_wait_minutes);
        if long_wait {
            reasons.push(format!("已等待 {} 分钟", waited.num_minutes()));
        }

        let mut priority = if high_importance && recovering {
            TaskPriority::Urgent
        } else if recovering || high_importance || long_wait {
            TaskPriority::High
        } else {
            TaskPriority::Normal
        };

        if context.system_load >= self.config.high_load_threshold && !high_importance {
            priority = priority.lowered();
            reasons.push(format!(
                "系统负载 {:.0}% 降级",
                context.system_load * 100.0
            ));
        }

        PriorityAssessment {
            priority,
            importance_score: importance,
            reasons,
        }
    }
}
