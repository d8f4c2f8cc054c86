use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use orchestrator_core::config::ResourcesConfig;
use orchestrator_core::models::{ResourceAllocation, ResourceConstraint};
use orchestrator_core::traits::{CapacityClaim, ClaimOutcome, CoordinationCache};
use orchestrator_core::{SchedulerError, SchedulerResult};
use serde::Serialize;
use tracing::{debug, info, warn};

const RESOURCE_NAMES_KEY: &str = "resource:names";
const ALLOCATED_TASKS_KEY: &str = "resource:allocated";
const TOTAL_CAPACITY_FIELD: &str = "total_capacity";
const CURRENT_USAGE_FIELD: &str = "current_usage";

fn resource_key(name: &str) -> String {
    format!("resource:{name}")
}

fn allocation_key(task_id: i64) -> String {
    format!("resource:allocation:{task_id}")
}

/// 某项资源不足以满足单个子任务的需求
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceShortfall {
    pub resource: String,
    pub requested: i64,
    pub available: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    Reserved(ResourceAllocation),
    Insufficient(Vec<ResourceShortfall>),
}

/// 资源约束与预留
///
/// `current_usage` 只通过 `reserve_resources` / `release_resources` 修改。
/// 预留在缓存里一步完成容量检查、自增和预留记录，释放钳制在 0 且对同一任务幂等。
pub struct ResourceManager {
    cache: Arc<dyn CoordinationCache>,
    config: ResourcesConfig,
}

impl ResourceManager {
    pub fn new(cache: Arc<dyn CoordinationCache>, config: ResourcesConfig) -> Self {
        Self { cache, config }
    }

    /// 把配置中的资源约束写入协调缓存，已有的使用量保持不变
    pub async fn initialize(&self) -> SchedulerResult<()> {
        let mut names: Vec<&String> = self.config.constraints.keys().collect();
        names.sort();
        for name in names {
            self.register_constraint(name, self.config.constraints[name])
                .await?;
        }
        info!("已注册 {} 项资源约束", self.config.constraints.len());
        Ok(())
    }

    pub async fn register_constraint(&self, name: &str, total_capacity: i64) -> SchedulerResult<()> {
        let key = resource_key(name);
        self.cache
            .hset(&key, TOTAL_CAPACITY_FIELD, &total_capacity.to_string())
            .await?;
        if self.cache.hget(&key, CURRENT_USAGE_FIELD).await?.is_none() {
            self.cache.hset(&key, CURRENT_USAGE_FIELD, "0").await?;
        }
        self.cache.sadd(RESOURCE_NAMES_KEY, name).await?;
        debug!("注册资源约束 {} 容量 {}", name, total_capacity);
        Ok(())
    }

    pub async fn constraint(&self, name: &str) -> SchedulerResult<ResourceConstraint> {
        let fields = self.cache.hget_all(&resource_key(name)).await?;
        let Some(total) = fields.get(TOTAL_CAPACITY_FIELD) else {
            return Err(SchedulerError::ResourceNotFound(name.to_string()));
        };
        Ok(ResourceConstraint {
            name: name.to_string(),
            total_capacity: total.parse().unwrap_or(0),
            current_usage: fields
                .get(CURRENT_USAGE_FIELD)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    /// 所有已注册的资源约束，按名称排序
    pub async fn constraints(&self) -> SchedulerResult<Vec<ResourceConstraint>> {
        let mut names = self.cache.smembers(RESOURCE_NAMES_KEY).await?;
        names.sort();
        let mut constraints = Vec::with_capacity(names.len());
        for name in names {
            match self.constraint(&name).await {
                Ok(constraint) => constraints.push(constraint),
                Err(SchedulerError::ResourceNotFound(_)) => {
                    warn!("资源 {} 在索引中但缺少约束数据", name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(constraints)
    }

    /// 单个子任务需要的资源量
    pub fn requirements(&self) -> BTreeMap<String, i64> {
        self.config
            .per_task
            .iter()
            .map(|(name, amount)| (name.clone(), *amount))
            .collect()
    }

    /// 只读检查当前剩余资源是否够一个子任务使用
    pub async fn check_available(&self) -> SchedulerResult<Vec<ResourceShortfall>> {
        let mut shortfalls = Vec::new();
        for (name, requested) in self.requirements() {
            let constraint = self.constraint(&name).await?;
            if constraint.available() < requested {
                shortfalls.push(ResourceShortfall {
                    resource: name,
                    requested,
                    available: constraint.available(),
                });
            }
        }
        Ok(shortfalls)
    }

    pub async fn allocation(&self, task_id: i64) -> SchedulerResult<Option<ResourceAllocation>> {
        let fields = self.cache.hget_all(&allocation_key(task_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let amounts: HashMap<String, i64> = fields
            .into_iter()
            .filter_map(|(name, amount)| amount.parse().ok().map(|a| (name, a)))
            .collect();
        Ok(Some(ResourceAllocation { task_id, amounts }))
    }

    /// 为任务原子地预留资源
    ///
    /// 使用量自增、预留记录和预留索引在协调缓存中一步写入，任一资源不足时什么都不写。
    /// 任务已有预留时直接返回已有预留。
    pub async fn reserve_resources(&self, task_id: i64) -> SchedulerResult<ReservationOutcome> {
        if let Some(existing) = self.allocation(task_id).await? {
            debug!(task_id, "任务已持有资源预留");
            return Ok(ReservationOutcome::Reserved(existing));
        }

        let requirements: Vec<(String, i64)> = self.requirements().into_iter().collect();
        if requirements.is_empty() {
            return Ok(ReservationOutcome::Reserved(ResourceAllocation {
                task_id,
                amounts: HashMap::new(),
            }));
        }
        let claims: Vec<CapacityClaim> = requirements
            .iter()
            .map(|(name, amount)| CapacityClaim {
                key: resource_key(name),
                record_field: name.clone(),
                amount: *amount,
            })
            .collect();

        let outcome = self
            .cache
            .claim_capacity(
                &claims,
                CURRENT_USAGE_FIELD,
                TOTAL_CAPACITY_FIELD,
                &allocation_key(task_id),
                ALLOCATED_TASKS_KEY,
                &task_id.to_string(),
            )
            .await?;

        match outcome {
            ClaimOutcome::Claimed => {
                debug!(task_id, "资源预留成功: {:?}", requirements);
                Ok(ReservationOutcome::Reserved(ResourceAllocation {
                    task_id,
                    amounts: requirements.into_iter().collect(),
                }))
            }
            ClaimOutcome::AlreadyClaimed => {
                let existing = self.allocation(task_id).await?.ok_or_else(|| {
                    SchedulerError::Cache(format!("任务 {task_id} 的资源预留记录读取失败"))
                })?;
                Ok(ReservationOutcome::Reserved(existing))
            }
            ClaimOutcome::Missing(index) => Err(SchedulerError::ResourceNotFound(
                requirements
                    .get(index)
                    .map(|(name, _)| name.clone())
                    .unwrap_or_default(),
            )),
            ClaimOutcome::Insufficient(index) => {
                let Some((name, requested)) = requirements.get(index) else {
                    return Err(SchedulerError::Cache(format!(
                        "资源预留返回了越界的下标 {index}"
                    )));
                };
                let available = self
                    .constraint(name)
                    .await
                    .map(|c| c.available())
                    .unwrap_or(0);
                debug!(task_id, "资源 {} 不足，需要 {} 剩余 {}", name, requested, available);
                Ok(ReservationOutcome::Insufficient(vec![ResourceShortfall {
                    resource: name.clone(),
                    requested: *requested,
                    available,
                }]))
            }
        }
    }

    /// 释放任务持有的资源，返回本次调用是否真正释放了预留
    ///
    /// 只有成功删除预留记录的调用才会扣减使用量，重复释放是空操作。
    pub async fn release_resources(&self, task_id: i64) -> SchedulerResult<bool> {
        let Some(allocation) = self.allocation(task_id).await? else {
            self.cache
                .srem(ALLOCATED_TASKS_KEY, &task_id.to_string())
                .await?;
            return Ok(false);
        };

        if !self.cache.delete(&allocation_key(task_id)).await? {
            return Ok(false);
        }
        for (name, amount) in &allocation.amounts {
            self.cache
                .hdecr_saturating(&resource_key(name), CURRENT_USAGE_FIELD, *amount)
                .await?;
        }
        self.cache
            .srem(ALLOCATED_TASKS_KEY, &task_id.to_string())
            .await?;

        debug!(task_id, "已释放资源: {:?}", allocation.amounts);
        Ok(true)
    }

    /// 当前持有资源预留的任务
    pub async fn allocated_task_ids(&self) -> SchedulerResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .cache
            .smembers(ALLOCATED_TASKS_KEY)
            .await?
            .into_iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// 所有资源使用率的平均值
    pub async fn system_load(&self) -> SchedulerResult<f64> {
        let constraints = self.constraints().await?;
        if constraints.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = constraints.iter().map(|c| c.usage_ratio()).sum();
        Ok(total / constraints.len() as f64)
    }
}
