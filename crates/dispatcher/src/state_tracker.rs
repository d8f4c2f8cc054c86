//! 状态追踪
//!
//! 记录每一次状态迁移和执行阶段，按保留期写入协调缓存的有序集合，
//! 提供历史查询、迁移模式分析和完成时间预测。
//!
//! 写入路径对调用方是“发出即忘”的：事件先进入有界通道，由后台循环落盘，
//! 通道满或缓存不可用时只告警，绝不影响调用方的主流程。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use orchestrator_core::config::TrackerConfig;
use orchestrator_core::models::{
    CompletionPrediction, PhaseRecord, RecurringFailure, StateTransitionRecord, TaskStatus,
    TransitionPatterns,
};
use orchestrator_core::traits::CoordinationCache;
use orchestrator_core::SchedulerResult;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

const ALL_TRANSITIONS_KEY: &str = "tracker:transitions";

/// 预测置信度达到满值所需的样本数
const FULL_CONFIDENCE_SAMPLES: f64 = 5.0;

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Transition(StateTransitionRecord),
    Phase(PhaseRecord),
}

pub struct StateTracker {
    cache: Arc<dyn CoordinationCache>,
    config: TrackerConfig,
    sender: mpsc::Sender<TrackerEvent>,
    receiver: Mutex<mpsc::Receiver<TrackerEvent>>,
}

fn transitions_key(task_id: i64) -> String {
    format!("tracker:transitions:{task_id}")
}

fn phases_key(task_id: i64) -> String {
    format!("tracker:phases:{task_id}")
}

fn score_of(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64
}

impl StateTracker {
    pub fn new(cache: Arc<dyn CoordinationCache>, config: TrackerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.buffer_capacity.max(1));
        Self {
            cache,
            config,
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// 记录一次状态迁移，不阻塞、不失败
    pub fn record_transition(&self, record: StateTransitionRecord) {
        self.enqueue(TrackerEvent::Transition(record));
    }

    /// 记录一次执行阶段，不阻塞、不失败
    pub fn record_phase(&self, record: PhaseRecord) {
        self.enqueue(TrackerEvent::Phase(record));
    }

    fn enqueue(&self, event: TrackerEvent) {
        if let Err(e) = self.sender.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    warn!("状态追踪缓冲已满，丢弃事件: {:?}", event);
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("状态追踪通道已关闭，丢弃事件");
                }
            }
        }
    }

    /// 后台写入循环，收到关闭信号后把缓冲中剩余的事件全部落盘
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("状态追踪写入循环启动");
        let mut receiver = self.receiver.lock().await;

        loop {
            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Some(event) => self.persist(event).await,
                        None => break,
                    }
                }
                _ = shutdown_rx.recv() => {
                    let mut drained = 0usize;
                    while let Ok(event) = receiver.try_recv() {
                        self.persist(event).await;
                        drained += 1;
                    }
                    info!("状态追踪收到关闭信号，已写入剩余 {} 条事件", drained);
                    break;
                }
            }
        }
    }

    /// 同步写入缓冲中的所有事件，返回写入条数
    ///
    /// 仅用于未启动 [`StateTracker::run`] 的场景（测试、单次执行）。写入循环运行期间
    /// 接收端由它独占，此时直接返回 0，事件仍由写入循环落盘。
    pub async fn drain_pending(&self) -> usize {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            debug!("状态追踪写入循环正在运行，跳过同步写入");
            return 0;
        };
        let mut drained = 0usize;
        while let Ok(event) = receiver.try_recv() {
            self.persist(event).await;
            drained += 1;
        }
        drained
    }

    async fn persist(&self, event: TrackerEvent) {
        let result = match &event {
            TrackerEvent::Transition(record) => self.persist_transition(record).await,
            TrackerEvent::Phase(record) => self.persist_phase(record).await,
        };
        if let Err(e) = result {
            warn!("状态追踪写入失败: {}", e);
        }
    }

    async fn persist_transition(&self, record: &StateTransitionRecord) -> SchedulerResult<()> {
        let member = serde_json::to_string(record)?;
        let score = score_of(record.timestamp);
        let cutoff = score_of(self.retention_cutoff(Utc::now()));

        for key in [transitions_key(record.task_id), ALL_TRANSITIONS_KEY.to_string()] {
            self.cache.zadd(&key, &member, score).await?;
            self.cache
                .zrem_range_by_score(&key, f64::NEG_INFINITY, cutoff)
                .await?;
        }
        debug!(
            task_id = record.task_id,
            "记录状态迁移 {:?} -> {}",
            record.from_state,
            record.to_state
        );
        Ok(())
    }

    async fn persist_phase(&self, record: &PhaseRecord) -> SchedulerResult<()> {
        let key = phases_key(record.task_id);
        let member = serde_json::to_string(record)?;
        self.cache
            .zadd(&key, &member, score_of(record.timestamp))
            .await?;
        let cutoff = score_of(self.retention_cutoff(Utc::now()));
        self.cache
            .zrem_range_by_score(&key, f64::NEG_INFINITY, cutoff)
            .await?;
        Ok(())
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.config.retention_days)
    }

    /// 任务的状态迁移历史，最近的在前
    pub async fn history(
        &self,
        task_id: i64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<StateTransitionRecord>> {
        let limit = limit.unwrap_or(self.config.history_default_limit);
        let entries = self
            .cache
            .zrevrange_by_score(
                &transitions_key(task_id),
                f64::INFINITY,
                f64::NEG_INFINITY,
                Some(limit),
            )
            .await?;
        Ok(decode_entries(entries))
    }

    /// 任务的执行阶段记录，最近的在前
    pub async fn phases(
        &self,
        task_id: i64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<PhaseRecord>> {
        let limit = limit.unwrap_or(self.config.history_default_limit);
        let entries = self
            .cache
            .zrevrange_by_score(
                &phases_key(task_id),
                f64::INFINITY,
                f64::NEG_INFINITY,
                Some(limit),
            )
            .await?;
        Ok(decode_entries(entries))
    }

    async fn load_transitions(
        &self,
        task_id: Option<i64>,
        since: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Vec<StateTransitionRecord>> {
        let key = match task_id {
            Some(id) => transitions_key(id),
            None => ALL_TRANSITIONS_KEY.to_string(),
        };
        let min = since.map(score_of).unwrap_or(f64::NEG_INFINITY);
        let entries = self
            .cache
            .zrange_by_score(&key, min, f64::INFINITY, None)
            .await?;
        Ok(decode_entries(entries))
    }

    /// 迁移模式分析：迁移频次、各状态平均停留时长、反复出现的失败迁移
    ///
    /// `task_id` 为空时分析保留期内的全部任务。
    pub async fn analyze_patterns(
        &self,
        task_id: Option<i64>,
    ) -> SchedulerResult<TransitionPatterns> {
        let records = self.load_transitions(task_id, None).await?;
        Ok(summarize_patterns(&records))
    }

    /// 根据历史 RUNNING 时长预测完成时间
    pub async fn predict_completion(
        &self,
        task_id: i64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<CompletionPrediction> {
        let records = self.load_transitions(Some(task_id), None).await?;
        let lookback_start = now - Duration::hours(self.config.failure_lookback_hours);
        Ok(predict_from_records(task_id, &records, lookback_start, now))
    }
}

fn decode_entries<T: DeserializeOwned>(entries: Vec<(String, f64)>) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|(member, _)| match serde_json::from_str(&member) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("跳过无法解析的追踪记录: {}", e);
                None
            }
        })
        .collect()
}

fn state_label(state: Option<TaskStatus>) -> &'static str {
    state.map(|s| s.as_str()).unwrap_or("NONE")
}

fn is_failure_state(state: TaskStatus) -> bool {
    matches!(state, TaskStatus::Failed | TaskStatus::Timeout)
}

fn group_by_task(records: &[StateTransitionRecord]) -> HashMap<i64, Vec<&StateTransitionRecord>> {
    let mut grouped: HashMap<i64, Vec<&StateTransitionRecord>> = HashMap::new();
    for record in records {
        grouped.entry(record.task_id).or_default().push(record);
    }
    for list in grouped.values_mut() {
        list.sort_by_key(|r| r.timestamp);
    }
    grouped
}

fn summarize_patterns(records: &[StateTransitionRecord]) -> TransitionPatterns {
    let mut frequency: HashMap<String, usize> = HashMap::new();
    let mut failures: HashMap<(String, String), usize> = HashMap::new();

    for record in records {
        let from = state_label(record.from_state);
        let to = record.to_state.as_str();
        *frequency.entry(format!("{from}->{to}")).or_default() += 1;
        if is_failure_state(record.to_state) {
            *failures
                .entry((from.to_string(), to.to_string()))
                .or_default() += 1;
        }
    }

    let mut durations: HashMap<String, (f64, usize)> = HashMap::new();
    for list in group_by_task(records).values() {
        for pair in list.windows(2) {
            let secs = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0;
            let entry = durations
                .entry(pair[0].to_state.as_str().to_string())
                .or_insert((0.0, 0));
            entry.0 += secs;
            entry.1 += 1;
        }
    }
    let average_state_duration_secs = durations
        .into_iter()
        .map(|(state, (total, count))| (state, total / count as f64))
        .collect();

    let mut recurring_failures: Vec<RecurringFailure> = failures
        .into_iter()
        .filter(|(_, occurrences)| *occurrences >= 2)
        .map(|((from_state, to_state), occurrences)| RecurringFailure {
            from_state,
            to_state,
            occurrences,
        })
        .collect();
    recurring_failures.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.from_state.cmp(&b.from_state))
            .then_with(|| a.to_state.cmp(&b.to_state))
    });

    TransitionPatterns {
        total_transitions: records.len(),
        transition_frequency: frequency,
        average_state_duration_secs,
        recurring_failures,
    }
}

fn predict_from_records(
    task_id: i64,
    records: &[StateTransitionRecord],
    lookback_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CompletionPrediction {
    let mut ordered: Vec<&StateTransitionRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let durations: Vec<f64> = ordered
        .windows(2)
        .filter(|pair| pair[0].to_state == TaskStatus::Running)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .collect();

    let recent: Vec<&&StateTransitionRecord> = ordered
        .iter()
        .filter(|r| r.timestamp >= lookback_start)
        .collect();
    let attempts = recent
        .iter()
        .filter(|r| r.to_state == TaskStatus::Running)
        .count();
    let failures = recent.iter().filter(|r| is_failure_state(r.to_state)).count();
    let recent_failure_rate = if attempts == 0 {
        0.0
    } else {
        (failures as f64 / attempts as f64).min(1.0)
    };

    if durations.is_empty() {
        return CompletionPrediction {
            task_id,
            sample_size: 0,
            mean_duration_secs: 0.0,
            std_dev_secs: 0.0,
            confidence: 0.0,
            recent_failure_rate,
            expected_completion_at: None,
        };
    }

    let n = durations.len() as f64;
    let mean = durations.iter().sum::<f64>() / n;
    let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let variation = if mean > 0.0 { std_dev / mean } else { 0.0 };
    let confidence = (1.0 / (1.0 + variation))
        * (1.0 - recent_failure_rate)
        * (n / FULL_CONFIDENCE_SAMPLES).min(1.0);

    let anchor = match ordered.last() {
        Some(last) if last.to_state == TaskStatus::Running => last.timestamp,
        _ => now,
    };
    let expected_completion_at = Some(anchor + Duration::milliseconds((mean * 1000.0) as i64));

    CompletionPrediction {
        task_id,
        sample_size: durations.len(),
        mean_duration_secs: mean,
        std_dev_secs: std_dev,
        confidence: confidence.clamp(0.0, 1.0),
        recent_failure_rate,
        expected_completion_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn transition(
        task_id: i64,
        from: Option<TaskStatus>,
        to: TaskStatus,
        minute: i64,
    ) -> StateTransitionRecord {
        StateTransitionRecord::new(task_id, from, to, "测试").at(at(minute))
    }

    #[test]
    fn test_patterns_count_frequency_and_durations() {
        let records = vec![
            transition(1, Some(TaskStatus::Pending), TaskStatus::Running, 0),
            transition(1, Some(TaskStatus::Running), TaskStatus::Failed, 10),
            transition(1, Some(TaskStatus::Failed), TaskStatus::Pending, 20),
            transition(1, Some(TaskStatus::Pending), TaskStatus::Running, 25),
            transition(1, Some(TaskStatus::Running), TaskStatus::Failed, 45),
            transition(2, None, TaskStatus::Failed, 5),
        ];

        let patterns = summarize_patterns(&records);
        assert_eq!(patterns.total_transitions, 6);
        assert_eq!(patterns.transition_frequency["PENDING->RUNNING"], 2);
        assert_eq!(patterns.transition_frequency["NONE->FAILED"], 1);
        // RUNNING 停留 10 分钟和 20 分钟
        assert!((patterns.average_state_duration_secs["RUNNING"] - 900.0).abs() < 1e-6);

        assert_eq!(patterns.recurring_failures.len(), 1);
        assert_eq!(patterns.recurring_failures[0].from_state, "RUNNING");
        assert_eq!(patterns.recurring_failures[0].occurrences, 2);
    }

    #[test]
    fn test_prediction_without_samples() {
        let prediction = predict_from_records(3, &[], at(0), at(60));
        assert_eq!(prediction.sample_size, 0);
        assert_eq!(prediction.confidence, 0.0);
        assert!(prediction.expected_completion_at.is_none());
    }

    #[test]
    fn test_prediction_confidence_drops_with_failures() {
        let steady = vec![
            transition(1, Some(TaskStatus::Pending), TaskStatus::Running, 0),
            transition(1, Some(TaskStatus::Running), TaskStatus::Pending, 10),
            transition(1, Some(TaskStatus::Pending), TaskStatus::Running, 20),
            transition(1, Some(TaskStatus::Running), TaskStatus::Pending, 30),
        ];
        let flaky = vec![
            transition(1, Some(TaskStatus::Pending), TaskStatus::Running, 0),
            transition(1, Some(TaskStatus::Running), TaskStatus::Pending, 10),
            transition(1, Some(TaskStatus::Pending), TaskStatus::Running, 20),
            transition(1, Some(TaskStatus::Running), TaskStatus::Failed, 30),
        ];

        let a = predict_from_records(1, &steady, at(0), at(40));
        let b = predict_from_records(1, &flaky, at(0), at(40));

        assert_eq!(a.sample_size, 2);
        assert!((a.mean_duration_secs - 600.0).abs() < 1e-6);
        assert_eq!(a.std_dev_secs, 0.0);
        assert!((b.recent_failure_rate - 0.5).abs() < 1e-6);
        assert!(b.confidence < a.confidence);
        assert_eq!(a.expected_completion_at, Some(at(50)));
    }

    #[tokio::test]
    async fn test_drain_pending_returns_while_writer_loop_runs() {
        let cache = Arc::new(orchestrator_infrastructure::cache::InMemoryCoordinationCache::new());
        let tracker = Arc::new(StateTracker::new(cache, TrackerConfig::default()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let writer = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.run(shutdown_rx).await }
        });
        while tracker.receiver.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        tracker.record_transition(StateTransitionRecord::new(
            7,
            Some(TaskStatus::Pending),
            TaskStatus::Running,
            "测试",
        ));
        let drained = tokio::time::timeout(std::time::Duration::from_secs(1), tracker.drain_pending())
            .await
            .unwrap();
        assert_eq!(drained, 0);

        shutdown_tx.send(()).unwrap();
        writer.await.unwrap();

        let history = tracker.history(7, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(tracker.drain_pending().await, 0);
    }

    #[tokio::test]
    async fn test_drain_pending_persists_buffer_without_writer_loop() {
        let cache = Arc::new(orchestrator_infrastructure::cache::InMemoryCoordinationCache::new());
        let tracker = StateTracker::new(cache, TrackerConfig::default());

        tracker.record_transition(StateTransitionRecord::new(
            8,
            None,
            TaskStatus::Pending,
            "测试",
        ));
        assert_eq!(tracker.drain_pending().await, 1);
        assert_eq!(tracker.history(8, None).await.unwrap().len(), 1);
    }
}
