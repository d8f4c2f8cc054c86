use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::SchedulerResult;

/// 单项资源的预留请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityClaim {
    /// 资源约束所在的哈希键
    pub key: String,
    /// 写入预留记录时使用的字段名
    pub record_field: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// 预留记录已存在
    AlreadyClaimed,
    /// 下标对应的资源没有注册容量
    Missing(usize),
    /// 下标对应的资源剩余容量不足
    Insufficient(usize),
}

/// 协调缓存抽象接口
///
/// 有序集合用于优先级队列和按时间窗口保留的日志，哈希用于资源约束和指标快照，
/// 集合用于依赖边，`set_nx_ex` 用于调度锁。
#[async_trait]
pub trait CoordinationCache: Send + Sync {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> SchedulerResult<()>;

    /// 按分数升序读取 `[min, max]` 区间
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<(String, f64)>>;

    /// 按分数降序读取 `[min, max]` 区间
    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<(String, f64)>>;

    async fn zrem(&self, key: &str, member: &str) -> SchedulerResult<bool>;

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> SchedulerResult<u64>;

    /// 弹出分数最高的 `count` 个成员
    async fn zpop_max(&self, key: &str, count: usize) -> SchedulerResult<Vec<(String, f64)>>;

    async fn zcard(&self, key: &str) -> SchedulerResult<u64>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> SchedulerResult<()>;

    async fn hget(&self, key: &str, field: &str) -> SchedulerResult<Option<String>>;

    async fn hget_all(&self, key: &str) -> SchedulerResult<HashMap<String, String>>;

    async fn hdel(&self, key: &str, field: &str) -> SchedulerResult<bool>;

    /// 原子地 `field += delta`，返回新值
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> SchedulerResult<i64>;

    /// 原子地为多项资源预留容量
    ///
    /// 每项 `claim` 的 `usage_field + amount` 都不超过其 `capacity_field` 时，一次性自增全部使用量，
    /// 把各项数量写入哈希 `record_key`，并把 `member` 加入集合 `index_key`。
    /// 任何一项不满足或 `record_key` 已存在时不做任何写入。
    async fn claim_capacity(
        &self,
        claims: &[CapacityClaim],
        usage_field: &str,
        capacity_field: &str,
        record_key: &str,
        index_key: &str,
        member: &str,
    ) -> SchedulerResult<ClaimOutcome>;

    /// 原子地 `field -= delta`，结果钳制在 0
    async fn hdecr_saturating(&self, key: &str, field: &str, delta: i64) -> SchedulerResult<i64>;

    async fn sadd(&self, key: &str, member: &str) -> SchedulerResult<bool>;

    async fn srem(&self, key: &str, member: &str) -> SchedulerResult<bool>;

    async fn smembers(&self, key: &str) -> SchedulerResult<Vec<String>>;

    /// 不存在时写入并设置过期时间，返回是否写入成功
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool>;

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> SchedulerResult<bool>;

    /// 仅当值等于 `expected` 时删除
    async fn delete_if_equals(&self, key: &str, expected: &str) -> SchedulerResult<bool>;

    async fn ping(&self) -> SchedulerResult<()>;
}
