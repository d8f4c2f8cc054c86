//! In-memory mock implementations of the port traits
//!
//! `MockTaskRepository` keeps real conditional-update semantics so race and
//! rollback paths can be exercised without a database.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    FailedTask, FailedTaskStatus, Message, NewFailedTask, Task, TaskFilter, TaskStatus, TaskUpdate,
};
use orchestrator_core::traits::{FailedTaskRepository, MessageQueue, TaskRepository};
use orchestrator_core::{SchedulerError, SchedulerResult};

/// 在条件更新执行前注入的并发干扰
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionInterference {
    /// 任务在调度过程中被删除
    Delete,
    /// 另一个写入者抢先把任务改成该状态
    ConcurrentUpdate(TaskStatus),
}

/// Mock implementation of TaskRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
    interferences: Arc<Mutex<HashMap<i64, TransitionInterference>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let repo = Self::new();
        for task in tasks {
            repo.insert(task);
        }
        repo
    }

    pub fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    pub fn remove(&self, id: i64) {
        self.tasks.lock().unwrap().remove(&id);
    }

    pub fn get(&self, id: i64) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn interfere_on_transition(&self, id: i64, interference: TransitionInterference) {
        self.interferences.lock().unwrap().insert(id, interference);
    }

    /// 模拟存储不可用，所有调用返回数据库错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> SchedulerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::DatabaseOperation(
                "模拟的存储不可用".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_interference(&self, id: i64) {
        let interference = self.interferences.lock().unwrap().remove(&id);
        let mut tasks = self.tasks.lock().unwrap();
        match interference {
            Some(TransitionInterference::Delete) => {
                tasks.remove(&id);
            }
            Some(TransitionInterference::ConcurrentUpdate(status)) => {
                if let Some(task) = tasks.get_mut(&id) {
                    task.status = status;
                    task.updated_at = Utc::now();
                }
            }
            None => {}
        }
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> SchedulerResult<Vec<Task>> {
        self.check_available()?;
        let tasks = self.tasks.lock().unwrap();
        let mut due: Vec<Task> = tasks.values().filter(|t| t.is_due(now)).cloned().collect();
        due.sort_by(|a, b| match (a.next_run_at, b.next_run_at) {
            (None, None) => a.id.cmp(&b.id),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
        });
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        self.check_available()?;
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn conditional_transition(
        &self,
        id: i64,
        expected_status: TaskStatus,
        expected_updated_at: Option<DateTime<Utc>>,
        new_status: TaskStatus,
        fields: &TaskUpdate,
    ) -> SchedulerResult<u64> {
        self.check_available()?;
        self.apply_interference(id);

        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(0);
        };
        if task.status != expected_status {
            return Ok(0);
        }
        if let Some(expected) = expected_updated_at {
            if task.updated_at != expected {
                return Ok(0);
            }
        }
        fields.apply_to(task);
        task.status = new_status;
        task.updated_at = Utc::now();
        Ok(1)
    }

    async fn update(&self, id: i64, fields: &TaskUpdate) -> SchedulerResult<u64> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) => {
                fields.apply_to(task);
                task.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        self.check_available()?;
        let tasks = self.tasks.lock().unwrap();
        let mut found: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            found.truncate(limit.max(0) as usize);
        }
        Ok(found)
    }

    async fn count(&self, filter: &TaskFilter) -> SchedulerResult<i64> {
        self.check_available()?;
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks.values().filter(|t| filter.matches(t)).count() as i64)
    }
}

/// Mock implementation of FailedTaskRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockFailedTaskRepository {
    records: Arc<Mutex<Vec<FailedTask>>>,
    next_id: Arc<AtomicI64>,
    fail_writes: Arc<AtomicBool>,
}

impl MockFailedTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FailedTask> {
        self.records.lock().unwrap().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FailedTaskRepository for MockFailedTaskRepository {
    async fn create(&self, failed_task: &NewFailedTask) -> SchedulerResult<FailedTask> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SchedulerError::DatabaseOperation(
                "模拟的写入失败".to_string(),
            ));
        }
        let record = FailedTask {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            message_id: failed_task.message_id.clone(),
            original_queue: failed_task.original_queue.clone(),
            failure_count: failed_task.failure_count,
            last_error: failed_task.last_error.clone(),
            payload: failed_task.payload.clone(),
            status: FailedTaskStatus::PendingReview,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_pending_review(&self, limit: i64) -> SchedulerResult<Vec<FailedTask>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.status == FailedTaskStatus::PendingReview)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_pending_review(&self) -> SchedulerResult<i64> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.status == FailedTaskStatus::PendingReview)
            .count() as i64)
    }
}

/// 发布结果注入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishOutcome {
    #[default]
    Confirmed,
    /// broker 返回未确认
    Rejected,
    /// 连接异常
    Error,
}

/// Mock implementation of MessageQueue for testing
#[derive(Debug, Clone, Default)]
pub struct MockMessageQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<Message>>>>,
    published: Arc<Mutex<Vec<(String, Message)>>>,
    acked_messages: Arc<Mutex<Vec<String>>>,
    nacked_messages: Arc<Mutex<Vec<(String, bool)>>>,
    publish_outcome: Arc<Mutex<PublishOutcome>>,
    publish_delay: Arc<Mutex<Option<Duration>>>,
    publishes_in_flight: Arc<AtomicUsize>,
    peak_publishes_in_flight: Arc<AtomicUsize>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_publish_outcome(&self, outcome: PublishOutcome) {
        *self.publish_outcome.lock().unwrap() = outcome;
    }

    /// 每次发布前等待，用于观察并发下发的数量
    pub fn set_publish_delay(&self, delay: Duration) {
        *self.publish_delay.lock().unwrap() = Some(delay);
    }

    /// 同时处于发布中的消息数峰值
    pub fn peak_publishes_in_flight(&self) -> usize {
        self.peak_publishes_in_flight.load(Ordering::SeqCst)
    }

    pub fn get_published(&self, queue: &str) -> Vec<Message> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn get_acked_messages(&self) -> Vec<String> {
        self.acked_messages.lock().unwrap().clone()
    }

    /// (message_id, requeue)
    pub fn get_nacked_messages(&self) -> Vec<(String, bool)> {
        self.nacked_messages.lock().unwrap().clone()
    }

    pub fn add_message_to_queue(&self, queue: &str, message: Message) {
        let mut queues = self.queues.lock().unwrap();
        queues.entry(queue.to_string()).or_default().push_back(message);
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<bool> {
        match *self.publish_outcome.lock().unwrap() {
            PublishOutcome::Confirmed => {}
            PublishOutcome::Rejected => return Ok(false),
            PublishOutcome::Error => {
                return Err(SchedulerError::MessageQueue(
                    "模拟的队列连接断开".to_string(),
                ))
            }
        }
        let delay = *self.publish_delay.lock().unwrap();
        if let Some(delay) = delay {
            let in_flight = self.publishes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_publishes_in_flight
                .fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.publishes_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), message.clone()));
        self.add_message_to_queue(queue, message.clone());
        Ok(true)
    }

    async fn consume_messages(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> SchedulerResult<Vec<Message>> {
        let mut queues = self.queues.lock().unwrap();
        let Some(pending) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };
        let take = max_messages.min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn ack_message(&self, message: &Message) -> SchedulerResult<()> {
        self.acked_messages.lock().unwrap().push(message.id.clone());
        Ok(())
    }

    async fn nack_message(&self, message: &Message, requeue: bool) -> SchedulerResult<()> {
        self.nacked_messages
            .lock()
            .unwrap()
            .push((message.id.clone(), requeue));
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> SchedulerResult<()> {
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.get(queue).map(|q| q.len()).unwrap_or(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::TaskBuilder;

    #[tokio::test]
    async fn test_conditional_transition_only_one_winner() {
        let task = TaskBuilder::new().with_id(5).build();
        let observed_at = task.updated_at;
        let repo = MockTaskRepository::with_tasks(vec![task]);

        let first = repo
            .conditional_transition(
                5,
                TaskStatus::Pending,
                Some(observed_at),
                TaskStatus::Running,
                &TaskUpdate::new(),
            )
            .await
            .unwrap();
        let second = repo
            .conditional_transition(
                5,
                TaskStatus::Pending,
                Some(observed_at),
                TaskStatus::Running,
                &TaskUpdate::new(),
            )
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(repo.get(5).unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_find_due_orders_null_first() {
        let now = Utc::now();
        let repo = MockTaskRepository::with_tasks(vec![
            TaskBuilder::new()
                .with_id(1)
                .with_next_run_at(Some(now - chrono::Duration::minutes(1)))
                .build(),
            TaskBuilder::new().with_id(2).with_next_run_at(None).build(),
            TaskBuilder::new()
                .with_id(3)
                .with_next_run_at(Some(now - chrono::Duration::minutes(10)))
                .build(),
            TaskBuilder::new()
                .with_id(4)
                .with_next_run_at(Some(now + chrono::Duration::minutes(10)))
                .build(),
        ]);

        let due = repo.find_due(now, 10).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
