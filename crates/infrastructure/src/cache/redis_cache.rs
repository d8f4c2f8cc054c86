use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::{
    config::CacheConfig,
    traits::{CapacityClaim, ClaimOutcome, CoordinationCache},
    SchedulerError, SchedulerResult,
};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info, instrument};

use super::score_bound;

// KEYS[1] 预留记录, KEYS[2] 预留索引, KEYS[3..] 资源约束
// ARGV[1] 使用量字段, ARGV[2] 容量字段, ARGV[3] 索引成员, 之后每项资源依次为 记录字段、数量
const CLAIM_CAPACITY_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return {'exists', -1}
end
for i = 3, #KEYS do
    local n = i - 3
    local capacity = redis.call('HGET', KEYS[i], ARGV[2])
    if not capacity then
        return {'missing', n}
    end
    local current = tonumber(redis.call('HGET', KEYS[i], ARGV[1]) or '0')
    if current + tonumber(ARGV[5 + 2 * n]) > tonumber(capacity) then
        return {'insufficient', n}
    end
end
for i = 3, #KEYS do
    local n = i - 3
    redis.call('HINCRBY', KEYS[i], ARGV[1], ARGV[5 + 2 * n])
    redis.call('HSET', KEYS[1], ARGV[4 + 2 * n], ARGV[5 + 2 * n])
end
redis.call('SADD', KEYS[2], ARGV[3])
return {'claimed', -1}
"#;

const SATURATING_DECREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '0')
local next_value = current - tonumber(ARGV[2])
if next_value < 0 then
    next_value = 0
end
redis.call('HSET', KEYS[1], ARGV[1], next_value)
return next_value
"#;

const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// 基于 Redis 的协调缓存
pub struct RedisCoordinationCache {
    connection: ConnectionManager,
    key_prefix: String,
    claim_capacity: Script,
    saturating_decrement: Script,
    compare_and_delete: Script,
}

impl RedisCoordinationCache {
    pub async fn new(config: &CacheConfig) -> SchedulerResult<Self> {
        let client = redis::Client::open(config.redis_url.clone())
            .map_err(|e| SchedulerError::Cache(format!("创建Redis客户端失败: {e}")))?;

        let connect = client.get_connection_manager();
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connect,
        )
        .await
        .map_err(|_| SchedulerError::Cache("连接Redis超时".to_string()))?
        .map_err(|e| SchedulerError::Cache(format!("连接Redis失败: {e}")))?;

        let cache = Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            claim_capacity: Script::new(CLAIM_CAPACITY_SCRIPT),
            saturating_decrement: Script::new(SATURATING_DECREMENT_SCRIPT),
            compare_and_delete: Script::new(COMPARE_AND_DELETE_SCRIPT),
        };
        cache.ping().await?;

        info!(key_prefix = %cache.key_prefix, "Redis协调缓存已连接");
        Ok(cache)
    }

    fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn cache_error(operation: &str, key: &str, e: redis::RedisError) -> SchedulerError {
    SchedulerError::Cache(format!("Redis {operation} {key} 失败: {e}"))
}

#[async_trait]
impl CoordinationCache for RedisCoordinationCache {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> SchedulerResult<()> {
        let key = self.build_key(key);
        let _: i64 = redis::cmd("ZADD")
            .arg(&key)
            .arg(score)
            .arg(member)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("ZADD", &key, e))?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<(String, f64)>> {
        let key = self.build_key(key);
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(&key)
            .arg(score_bound(min))
            .arg(score_bound(max))
            .arg("WITHSCORES");
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(0).arg(limit);
        }
        cmd.query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("ZRANGEBYSCORE", &key, e))
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<(String, f64)>> {
        let key = self.build_key(key);
        let mut cmd = redis::cmd("ZREVRANGEBYSCORE");
        cmd.arg(&key)
            .arg(score_bound(max))
            .arg(score_bound(min))
            .arg("WITHSCORES");
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(0).arg(limit);
        }
        cmd.query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("ZREVRANGEBYSCORE", &key, e))
    }

    async fn zrem(&self, key: &str, member: &str) -> SchedulerResult<bool> {
        let key = self.build_key(key);
        let removed: i64 = redis::cmd("ZREM")
            .arg(&key)
            .arg(member)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("ZREM", &key, e))?;
        Ok(removed > 0)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> SchedulerResult<u64> {
        let key = self.build_key(key);
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg(score_bound(min))
            .arg(score_bound(max))
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("ZREMRANGEBYSCORE", &key, e))
    }

    async fn zpop_max(&self, key: &str, count: usize) -> SchedulerResult<Vec<(String, f64)>> {
        let key = self.build_key(key);
        redis::cmd("ZPOPMAX")
            .arg(&key)
            .arg(count)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("ZPOPMAX", &key, e))
    }

    async fn zcard(&self, key: &str) -> SchedulerResult<u64> {
        let key = self.build_key(key);
        redis::cmd("ZCARD")
            .arg(&key)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("ZCARD", &key, e))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> SchedulerResult<()> {
        let key = self.build_key(key);
        let _: i64 = redis::cmd("HSET")
            .arg(&key)
            .arg(field)
            .arg(value)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("HSET", &key, e))?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> SchedulerResult<Option<String>> {
        let key = self.build_key(key);
        redis::cmd("HGET")
            .arg(&key)
            .arg(field)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("HGET", &key, e))
    }

    async fn hget_all(&self, key: &str) -> SchedulerResult<HashMap<String, String>> {
        let key = self.build_key(key);
        redis::cmd("HGETALL")
            .arg(&key)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("HGETALL", &key, e))
    }

    async fn hdel(&self, key: &str, field: &str) -> SchedulerResult<bool> {
        let key = self.build_key(key);
        let removed: i64 = redis::cmd("HDEL")
            .arg(&key)
            .arg(field)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("HDEL", &key, e))?;
        Ok(removed > 0)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> SchedulerResult<i64> {
        let key = self.build_key(key);
        redis::cmd("HINCRBY")
            .arg(&key)
            .arg(field)
            .arg(delta)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("HINCRBY", &key, e))
    }

    #[instrument(skip(self))]
    async fn claim_capacity(
        &self,
        claims: &[CapacityClaim],
        usage_field: &str,
        capacity_field: &str,
        record_key: &str,
        index_key: &str,
        member: &str,
    ) -> SchedulerResult<ClaimOutcome> {
        let record_key = self.build_key(record_key);
        let mut invocation = self.claim_capacity.prepare_invoke();
        invocation
            .key(&record_key)
            .key(self.build_key(index_key))
            .arg(usage_field)
            .arg(capacity_field)
            .arg(member);
        for claim in claims {
            invocation
                .key(self.build_key(&claim.key))
                .arg(&claim.record_field)
                .arg(claim.amount);
        }

        let (status, index): (String, i64) = invocation
            .invoke_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("EVALSHA(claim_capacity)", &record_key, e))?;

        let index = usize::try_from(index).unwrap_or_default();
        let outcome = match status.as_str() {
            "claimed" => ClaimOutcome::Claimed,
            "exists" => ClaimOutcome::AlreadyClaimed,
            "missing" => ClaimOutcome::Missing(index),
            "insufficient" => ClaimOutcome::Insufficient(index),
            other => {
                return Err(SchedulerError::Cache(format!(
                    "预留脚本返回未知状态 {other}: {record_key}"
                )))
            }
        };
        if outcome != ClaimOutcome::Claimed {
            debug!(key = %record_key, ?outcome, "资源预留未写入");
        }
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn hdecr_saturating(&self, key: &str, field: &str, delta: i64) -> SchedulerResult<i64> {
        let key = self.build_key(key);
        self.saturating_decrement
            .key(&key)
            .arg(field)
            .arg(delta)
            .invoke_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("EVALSHA(saturating_decrement)", &key, e))
    }

    async fn sadd(&self, key: &str, member: &str) -> SchedulerResult<bool> {
        let key = self.build_key(key);
        let added: i64 = redis::cmd("SADD")
            .arg(&key)
            .arg(member)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("SADD", &key, e))?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> SchedulerResult<bool> {
        let key = self.build_key(key);
        let removed: i64 = redis::cmd("SREM")
            .arg(&key)
            .arg(member)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("SREM", &key, e))?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> SchedulerResult<Vec<String>> {
        let key = self.build_key(key);
        redis::cmd("SMEMBERS")
            .arg(&key)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("SMEMBERS", &key, e))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let key = self.build_key(key);
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("SET NX", &key, e))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        let key = self.build_key(key);
        redis::cmd("GET")
            .arg(&key)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("GET", &key, e))
    }

    async fn delete(&self, key: &str) -> SchedulerResult<bool> {
        let key = self.build_key(key);
        let removed: i64 = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("DEL", &key, e))?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> SchedulerResult<bool> {
        let key = self.build_key(key);
        let removed: i64 = self
            .compare_and_delete
            .key(&key)
            .arg(expected)
            .invoke_async(&mut self.connection())
            .await
            .map_err(|e| cache_error("EVALSHA(compare_and_delete)", &key, e))?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> SchedulerResult<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.connection())
            .await
            .map_err(|e| SchedulerError::Cache(format!("Redis PING 失败: {e}")))?;
        Ok(())
    }
}
