use orchestrator_core::models::TaskStatus;
use orchestrator_core::{SchedulerError, SchedulerResult};

/// 任务状态迁移规则
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    match (from, to) {
        // 调度器下发；契约违反或调度中被删除时强制失败；无数据暂停
        (Pending, Running) | (Pending, Failed) | (Pending, Paused) => true,
        // 结果回传、超时回收、发布失败回滚
        (Running, Pending) | (Running, Failed) | (Running, Timeout) => true,
        // 自动重试或人工重置
        (Failed, Pending) | (Failed, Paused) => true,
        (Timeout, Pending) | (Timeout, Paused) => true,
        // 外部管理操作恢复
        (Paused, Pending) => true,
        _ => false,
    }
}

pub fn ensure_transition(from: TaskStatus, to: TaskStatus) -> SchedulerResult<()> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidTaskState(format!(
            "不允许的状态迁移: {from} -> {to}"
        )))
    }
}
