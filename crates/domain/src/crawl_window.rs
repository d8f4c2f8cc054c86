use chrono::{DateTime, Duration, Utc};
use orchestrator_core::config::DispatcherConfig;
use orchestrator_core::models::{CrawlPhase, SubTaskMessage, Task};
use orchestrator_core::time_utils::{segments_covering, truncate_to_minute};
use serde::Serialize;

/// 一次下发的时间窗口
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubTaskWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_initial_crawl: bool,
    /// 首次爬取时计算的历史分段总数
    pub total_segments: Option<i32>,
}

impl SubTaskWindow {
    pub fn to_message(&self, task: &Task) -> SubTaskMessage {
        SubTaskMessage {
            task_id: task.id,
            keyword: task.keyword.clone(),
            start: self.start,
            end: self.end,
            is_initial_crawl: self.is_initial_crawl,
            weibo_account_id: task.weibo_account_id,
            enable_account_rotation: task.enable_account_rotation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowPlan {
    Dispatch(SubTaskWindow),
    /// 自上次爬取以来没有新的时间段
    NothingNew,
    /// 阶段或游标违反上游约定，需要强制失败
    ContractViolation(String),
}

/// 窗口切分规则
#[derive(Debug, Clone, Copy)]
pub struct WindowPolicy {
    pub initial_span: Duration,
    pub incremental_cap: Duration,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            initial_span: Duration::days(7),
            incremental_cap: Duration::days(30),
        }
    }
}

impl WindowPolicy {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            initial_span: Duration::days(config.initial_window_days),
            incremental_cap: Duration::days(config.incremental_window_cap_days),
        }
    }

    pub fn plan(&self, task: &Task, now: DateTime<Utc>) -> WindowPlan {
        let now = truncate_to_minute(now);

        match task.crawl_phase() {
            CrawlPhase::BackfillInProgress => WindowPlan::ContractViolation(format!(
                "任务 {} 处于历史回溯阶段（current_crawl_time 早于 start_date），不应被周期扫描发现",
                task.id
            )),
            CrawlPhase::NeedsInitialCrawl => {
                let start = truncate_to_minute(task.start_date);
                if start >= now {
                    // 起始日期尚未到来，等待下一个周期
                    return WindowPlan::NothingNew;
                }
                let end = (start + self.initial_span).min(now);
                WindowPlan::Dispatch(SubTaskWindow {
                    start,
                    end,
                    is_initial_crawl: true,
                    total_segments: Some(segments_covering(now - start, self.initial_span).max(1)),
                })
            }
            CrawlPhase::SteadyState => {
                let start = truncate_to_minute(task.crawl_cursor());
                if start > now {
                    return WindowPlan::ContractViolation(format!(
                        "任务 {} 的爬取高水位 {} 晚于当前时间 {}",
                        task.id, start, now
                    ));
                }
                if start == now {
                    return WindowPlan::NothingNew;
                }
                let end = (start + self.incremental_cap).min(now);
                WindowPlan::Dispatch(SubTaskWindow {
                    start,
                    end,
                    is_initial_crawl: false,
                    total_segments: None,
                })
            }
        }
    }

    /// 成功结果后根据高水位重算的回溯进度
    pub fn progress_after(&self, task: &Task, latest: DateTime<Utc>) -> i32 {
        let covered = segments_covering(latest - task.start_date, self.initial_span);
        if task.total_segments > 0 {
            covered.min(task.total_segments)
        } else {
            covered
        }
    }
}
