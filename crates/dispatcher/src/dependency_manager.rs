use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_core::models::{BlockingDependency, DependencyEdge};
use orchestrator_core::traits::{CoordinationCache, TaskRepository};
use orchestrator_core::{SchedulerError, SchedulerResult};
use orchestrator_domain::{evaluate_edge, DependencyGraph, EdgeStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

const GRAPH_LOCK_KEY: &str = "lock:dependency-graph";
const GRAPH_LOCK_TTL: Duration = Duration::from_secs(10);
const GRAPH_LOCK_ATTEMPTS: u32 = 50;
const GRAPH_LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

fn forward_key(task_id: i64) -> String {
    format!("deps:forward:{task_id}")
}

fn edges_key(task_id: i64) -> String {
    format!("deps:edges:{task_id}")
}

fn reverse_key(depends_on: i64) -> String {
    format!("deps:reverse:{depends_on}")
}

/// 任务依赖管理
///
/// 依赖边以 `task → depends_on` 正向集合加边详情哈希存储，并维护反向索引。
/// 插入前在图锁内做可达性检查，保证图始终无环。
pub struct DependencyManager {
    cache: Arc<dyn CoordinationCache>,
    task_repo: Arc<dyn TaskRepository>,
}

impl DependencyManager {
    pub fn new(cache: Arc<dyn CoordinationCache>, task_repo: Arc<dyn TaskRepository>) -> Self {
        Self { cache, task_repo }
    }

    pub async fn add_dependency(&self, edge: DependencyEdge) -> SchedulerResult<()> {
        if edge.task_id == edge.depends_on {
            return Err(SchedulerError::CircularDependency {
                task_id: edge.task_id,
                depends_on: edge.depends_on,
            });
        }
        if let Some(seconds) = edge.max_wait_seconds {
            if seconds <= 0 {
                return Err(SchedulerError::InvalidDependency(format!(
                    "最大等待时间必须大于0: {seconds}"
                )));
            }
        }
        for id in [edge.task_id, edge.depends_on] {
            if self.task_repo.get_by_id(id).await?.is_none() {
                return Err(SchedulerError::TaskNotFound { id });
            }
        }

        let token = self.acquire_graph_lock().await?;
        let result = self.insert_edge(&edge).await;
        if let Err(e) = self.cache.delete_if_equals(GRAPH_LOCK_KEY, &token).await {
            warn!("释放依赖图锁失败: {}", e);
        }
        result
    }

    async fn insert_edge(&self, edge: &DependencyEdge) -> SchedulerResult<()> {
        let graph = self.load_reachable(edge.depends_on).await?;
        if graph.would_create_cycle(edge.task_id, edge.depends_on) {
            warn!(
                task_id = edge.task_id,
                "拒绝依赖 {} -> {}：会形成环",
                edge.task_id,
                edge.depends_on
            );
            return Err(SchedulerError::CircularDependency {
                task_id: edge.task_id,
                depends_on: edge.depends_on,
            });
        }

        let depends_on = edge.depends_on.to_string();
        self.cache
            .hset(
                &edges_key(edge.task_id),
                &depends_on,
                &serde_json::to_string(edge)?,
            )
            .await?;
        self.cache
            .sadd(&forward_key(edge.task_id), &depends_on)
            .await?;
        self.cache
            .sadd(&reverse_key(edge.depends_on), &edge.task_id.to_string())
            .await?;

        info!(
            task_id = edge.task_id,
            "添加依赖 {} -> {} ({})",
            edge.task_id,
            edge.depends_on,
            edge.dependency_type
        );
        Ok(())
    }

    async fn acquire_graph_lock(&self) -> SchedulerResult<String> {
        let token = Uuid::new_v4().to_string();
        for _ in 0..GRAPH_LOCK_ATTEMPTS {
            if self
                .cache
                .set_nx_ex(GRAPH_LOCK_KEY, &token, GRAPH_LOCK_TTL)
                .await?
            {
                return Ok(token);
            }
            tokio::time::sleep(GRAPH_LOCK_RETRY_DELAY).await;
        }
        Err(SchedulerError::Cache(
            "获取依赖图锁超时".to_string(),
        ))
    }

    /// 从 `start` 出发沿正向边广度优先加载可达子图
    async fn load_reachable(&self, start: i64) -> SchedulerResult<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            let deps = self.forward_ids(node).await?;
            for dep in &deps {
                if !visited.contains(dep) {
                    queue.push_back(*dep);
                }
            }
            graph.set_dependencies(node, deps);
        }
        debug!("加载依赖子图，节点 {} 个，边 {} 条", visited.len(), graph.edge_count());
        Ok(graph)
    }

    async fn forward_ids(&self, task_id: i64) -> SchedulerResult<Vec<i64>> {
        Ok(self
            .cache
            .smembers(&forward_key(task_id))
            .await?
            .into_iter()
            .filter_map(|id| id.parse().ok())
            .collect())
    }

    /// 删除依赖边，返回边是否存在
    pub async fn remove_dependency(&self, task_id: i64, depends_on: i64) -> SchedulerResult<bool> {
        let member = depends_on.to_string();
        let existed = self.cache.srem(&forward_key(task_id), &member).await?;
        self.cache.hdel(&edges_key(task_id), &member).await?;
        self.cache
            .srem(&reverse_key(depends_on), &task_id.to_string())
            .await?;
        if existed {
            info!(task_id, "删除依赖 {} -> {}", task_id, depends_on);
        }
        Ok(existed)
    }

    /// 任务的所有前置依赖边
    pub async fn get_dependencies(&self, task_id: i64) -> SchedulerResult<Vec<DependencyEdge>> {
        let details = self.cache.hget_all(&edges_key(task_id)).await?;
        let mut edges = Vec::with_capacity(details.len());
        for depends_on in self.forward_ids(task_id).await? {
            match details.get(&depends_on.to_string()) {
                Some(raw) => match serde_json::from_str::<DependencyEdge>(raw) {
                    Ok(edge) => edges.push(edge),
                    Err(e) => warn!(task_id, "依赖边 {} 解析失败: {}", depends_on, e),
                },
                None => warn!(task_id, "依赖边 {} 缺少详情", depends_on),
            }
        }
        edges.sort_by_key(|e| e.depends_on);
        Ok(edges)
    }

    /// 依赖该任务的下游任务
    pub async fn get_dependents(&self, task_id: i64) -> SchedulerResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .cache
            .smembers(&reverse_key(task_id))
            .await?
            .into_iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// 检查任务的前置依赖，返回未满足的部分
    pub async fn check_dependencies(
        &self,
        task_id: i64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<BlockingDependency>> {
        let mut blocking = Vec::new();
        for edge in self.get_dependencies(task_id).await? {
            let prerequisite = self.task_repo.get_by_id(edge.depends_on).await?;
            match evaluate_edge(&edge, prerequisite.as_ref(), now) {
                EdgeStatus::Satisfied => {}
                EdgeStatus::AutoResolved => {
                    info!(
                        task_id,
                        "依赖 {} 等待超过 {:?} 秒，自动放行",
                        edge.depends_on,
                        edge.max_wait_seconds
                    );
                }
                EdgeStatus::Blocked(reason) => blocking.push(BlockingDependency {
                    depends_on: edge.depends_on,
                    dependency_type: edge.dependency_type,
                    reason,
                }),
            }
        }
        Ok(blocking)
    }
}
