use chrono::{DateTime, Utc};
use orchestrator_core::models::{CrawlPhase, DependencyEdge, DependencyType, Task, TaskStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum EdgeStatus {
    Satisfied,
    /// 等待超过上限，按 `auto_resolve` 放行
    AutoResolved,
    Blocked(String),
}

impl EdgeStatus {
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, EdgeStatus::Blocked(_))
    }
}

/// 按依赖类型判断一条依赖边是否满足
///
/// - finish-to-start：前置任务不在运行，且至少完成过一次或已停在 PAUSED/FAILED/TIMEOUT
/// - success-to-start：前置任务成功过、当前无错误且不处于 RUNNING/FAILED/TIMEOUT
/// - start-to-start：前置任务正在运行或曾经开始过
/// - data-dependency：前置任务已进入增量阶段并有数据高水位
/// - resource-dependency：由资源预留统一约束，这里总是满足
pub fn evaluate_edge(
    edge: &DependencyEdge,
    prerequisite: Option<&Task>,
    now: DateTime<Utc>,
) -> EdgeStatus {
    let blocked = match prerequisite {
        None => Some(format!("前置任务 {} 不存在", edge.depends_on)),
        Some(task) => blocking_reason(edge.dependency_type, task),
    };

    match blocked {
        None => EdgeStatus::Satisfied,
        Some(_) if edge.is_wait_expired(now) => EdgeStatus::AutoResolved,
        Some(reason) => EdgeStatus::Blocked(reason),
    }
}

fn blocking_reason(dependency_type: DependencyType, task: &Task) -> Option<String> {
    match dependency_type {
        DependencyType::FinishToStart => {
            if task.status == TaskStatus::Running {
                return Some(format!("前置任务 {} 仍在运行", task.id));
            }
            let settled = matches!(
                task.status,
                TaskStatus::Paused | TaskStatus::Failed | TaskStatus::Timeout
            );
            if task.has_completed_once() || settled {
                None
            } else {
                Some(format!("前置任务 {} 尚未完成过", task.id))
            }
        }
        DependencyType::SuccessToStart => {
            if matches!(
                task.status,
                TaskStatus::Running | TaskStatus::Failed | TaskStatus::Timeout
            ) {
                return Some(format!("前置任务 {} 当前状态为 {}", task.id, task.status));
            }
            if task.last_succeeded_at.is_none() {
                return Some(format!("前置任务 {} 尚未成功过", task.id));
            }
            if task.error_message.is_some() {
                return Some(format!("前置任务 {} 存在未清除的错误", task.id));
            }
            None
        }
        DependencyType::StartToStart => {
            if task.status == TaskStatus::Running || task.has_completed_once() {
                None
            } else {
                Some(format!("前置任务 {} 尚未开始", task.id))
            }
        }
        DependencyType::DataDependency => {
            if task.crawl_phase() == CrawlPhase::SteadyState && task.latest_crawl_time.is_some() {
                None
            } else {
                Some(format!("前置任务 {} 尚未产出数据", task.id))
            }
        }
        DependencyType::ResourceDependency => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use orchestrator_testing_utils::TaskBuilder;

    fn edge(dependency_type: DependencyType) -> DependencyEdge {
        DependencyEdge::new(2, 1, dependency_type)
    }

    #[test]
    fn test_finish_to_start() {
        let now = Utc::now();
        let never_ran = TaskBuilder::new().with_id(1).build();
        assert!(!evaluate_edge(&edge(DependencyType::FinishToStart), Some(&never_ran), now)
            .is_satisfied());

        let running = TaskBuilder::new()
            .with_id(1)
            .with_status(TaskStatus::Running)
            .with_last_completed_at(Some(now))
            .build();
        assert!(!evaluate_edge(&edge(DependencyType::FinishToStart), Some(&running), now)
            .is_satisfied());

        let completed = TaskBuilder::new()
            .with_id(1)
            .with_last_completed_at(Some(now - Duration::minutes(3)))
            .build();
        assert_eq!(
            evaluate_edge(&edge(DependencyType::FinishToStart), Some(&completed), now),
            EdgeStatus::Satisfied
        );

        let failed = TaskBuilder::new().with_id(1).with_status(TaskStatus::Failed).build();
        assert!(evaluate_edge(&edge(DependencyType::FinishToStart), Some(&failed), now)
            .is_satisfied());
    }

    #[test]
    fn test_success_to_start_requires_success_signal() {
        let now = Utc::now();
        let completed_with_failure = TaskBuilder::new()
            .with_id(1)
            .with_last_completed_at(Some(now))
            .with_error_message("账号失效")
            .build();
        assert!(!evaluate_edge(
            &edge(DependencyType::SuccessToStart),
            Some(&completed_with_failure),
            now
        )
        .is_satisfied());

        let succeeded = TaskBuilder::new()
            .with_id(1)
            .with_last_completed_at(Some(now))
            .with_last_succeeded_at(Some(now))
            .build();
        assert_eq!(
            evaluate_edge(&edge(DependencyType::SuccessToStart), Some(&succeeded), now),
            EdgeStatus::Satisfied
        );

        let failed_after_success = TaskBuilder::new()
            .with_id(1)
            .with_status(TaskStatus::Failed)
            .with_last_succeeded_at(Some(now - Duration::hours(1)))
            .build();
        assert!(!evaluate_edge(
            &edge(DependencyType::SuccessToStart),
            Some(&failed_after_success),
            now
        )
        .is_satisfied());
    }

    #[test]
    fn test_data_dependency_requires_steady_state() {
        let now = Utc::now();
        let initial = TaskBuilder::new().with_id(1).build();
        assert!(!evaluate_edge(&edge(DependencyType::DataDependency), Some(&initial), now)
            .is_satisfied());

        let steady = TaskBuilder::new().with_id(1).steady_state(now).build();
        assert!(evaluate_edge(&edge(DependencyType::DataDependency), Some(&steady), now)
            .is_satisfied());
    }

    #[test]
    fn test_missing_prerequisite_blocks_until_auto_resolved() {
        let now = Utc::now();
        let mut waiting = edge(DependencyType::FinishToStart).with_max_wait(600, true);
        assert!(matches!(evaluate_edge(&waiting, None, now), EdgeStatus::Blocked(_)));

        waiting.created_at = now - Duration::minutes(11);
        assert_eq!(evaluate_edge(&waiting, None, now), EdgeStatus::AutoResolved);
    }

    #[test]
    fn test_resource_dependency_always_satisfied() {
        let now = Utc::now();
        let task = TaskBuilder::new().with_id(1).with_status(TaskStatus::Running).build();
        assert_eq!(
            evaluate_edge(&edge(DependencyType::ResourceDependency), Some(&task), now),
            EdgeStatus::Satisfied
        );
    }
}
