use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orchestrator_core::{
    traits::{CapacityClaim, ClaimOutcome, CoordinationCache},
    SchedulerResult,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct CacheState {
    sorted_sets: HashMap<String, HashMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    values: HashMap<String, (String, Option<Instant>)>,
}

impl CacheState {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(
            self.values.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.values.remove(key);
        }
        self.values.get(key).map(|(value, _)| value)
    }

    fn sorted_range(&self, key: &str, min: f64, max: f64) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> = self
            .sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

/// 进程内协调缓存，单实例部署和测试使用
#[derive(Default)]
pub struct InMemoryCoordinationCache {
    state: Mutex<CacheState>,
}

impl InMemoryCoordinationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_i64(value: Option<&String>) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[async_trait]
impl CoordinationCache for InMemoryCoordinationCache {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        state
            .sorted_sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<(String, f64)>> {
        let state = self.state.lock().await;
        let mut entries = state.sorted_range(key, min, max);
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<(String, f64)>> {
        let state = self.state.lock().await;
        let mut entries = state.sorted_range(key, min, max);
        entries.reverse();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn zrem(&self, key: &str, member: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .sorted_sets
            .get_mut(key)
            .is_some_and(|set| set.remove(member).is_some()))
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> SchedulerResult<u64> {
        let mut state = self.state.lock().await;
        let Some(set) = state.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|_, score| *score < min || *score > max);
        Ok((before - set.len()) as u64)
    }

    async fn zpop_max(&self, key: &str, count: usize) -> SchedulerResult<Vec<(String, f64)>> {
        let mut state = self.state.lock().await;
        let mut entries = state.sorted_range(key, f64::NEG_INFINITY, f64::INFINITY);
        entries.reverse();
        entries.truncate(count);
        if let Some(set) = state.sorted_sets.get_mut(key) {
            for (member, _) in &entries {
                set.remove(member);
            }
        }
        Ok(entries)
    }

    async fn zcard(&self, key: &str) -> SchedulerResult<u64> {
        let state = self.state.lock().await;
        Ok(state.sorted_sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> SchedulerResult<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hget_all(&self, key: &str) -> SchedulerResult<HashMap<String, String>> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .hashes
            .get_mut(key)
            .is_some_and(|h| h.remove(field).is_some()))
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> SchedulerResult<i64> {
        let mut state = self.state.lock().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        let next = parse_i64(hash.get(field)) + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn claim_capacity(
        &self,
        claims: &[CapacityClaim],
        usage_field: &str,
        capacity_field: &str,
        record_key: &str,
        index_key: &str,
        member: &str,
    ) -> SchedulerResult<ClaimOutcome> {
        let mut state = self.state.lock().await;
        if state.hashes.get(record_key).is_some_and(|h| !h.is_empty()) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        for (index, claim) in claims.iter().enumerate() {
            let Some(hash) = state.hashes.get(&claim.key) else {
                return Ok(ClaimOutcome::Missing(index));
            };
            let Some(capacity) = hash.get(capacity_field) else {
                return Ok(ClaimOutcome::Missing(index));
            };
            let capacity: i64 = capacity.parse().unwrap_or(0);
            if parse_i64(hash.get(usage_field)) + claim.amount > capacity {
                return Ok(ClaimOutcome::Insufficient(index));
            }
        }

        for claim in claims {
            let hash = state.hashes.entry(claim.key.clone()).or_default();
            let next = parse_i64(hash.get(usage_field)) + claim.amount;
            hash.insert(usage_field.to_string(), next.to_string());
        }
        let record = state.hashes.entry(record_key.to_string()).or_default();
        for claim in claims {
            record.insert(claim.record_field.clone(), claim.amount.to_string());
        }
        state
            .sets
            .entry(index_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(ClaimOutcome::Claimed)
    }

    async fn hdecr_saturating(&self, key: &str, field: &str, delta: i64) -> SchedulerResult<i64> {
        let mut state = self.state.lock().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        let next = (parse_i64(hash.get(field)) - delta).max(0);
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.sets.get_mut(key).is_some_and(|s| s.remove(member)))
    }

    async fn smembers(&self, key: &str) -> SchedulerResult<Vec<String>> {
        let state = self.state.lock().await;
        let mut members: Vec<String> = state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        if state.live_value(key).is_some() {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            (value.to_string(), Some(Instant::now() + ttl)),
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(state.live_value(key).cloned())
    }

    async fn delete(&self, key: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        let live = state.live_value(key).is_some();
        let removed_value = state.values.remove(key).is_some() && live;
        let removed_hash = state.hashes.remove(key).is_some();
        let removed_set = state.sets.remove(key).is_some();
        let removed_zset = state.sorted_sets.remove(key).is_some();
        Ok(removed_value || removed_hash || removed_set || removed_zset)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        if state.live_value(key).map(String::as_str) == Some(expected) {
            state.values.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn ping(&self) -> SchedulerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(resource: &str, amount: i64) -> CapacityClaim {
        CapacityClaim {
            key: format!("resource:{resource}"),
            record_field: resource.to_string(),
            amount,
        }
    }

    async fn claim_for(cache: &InMemoryCoordinationCache, task_id: i64, claims: &[CapacityClaim]) -> ClaimOutcome {
        cache
            .claim_capacity(
                claims,
                "current_usage",
                "total_capacity",
                &format!("resource:allocation:{task_id}"),
                "resource:allocated",
                &task_id.to_string(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_claim_never_exceeds_capacity() {
        let cache = InMemoryCoordinationCache::new();
        cache.hset("resource:crawl_slots", "total_capacity", "2").await.unwrap();
        let claims = [claim("crawl_slots", 1)];

        assert_eq!(claim_for(&cache, 1, &claims).await, ClaimOutcome::Claimed);
        assert_eq!(claim_for(&cache, 1, &claims).await, ClaimOutcome::AlreadyClaimed);
        assert_eq!(claim_for(&cache, 2, &claims).await, ClaimOutcome::Claimed);
        assert_eq!(claim_for(&cache, 3, &claims).await, ClaimOutcome::Insufficient(0));

        assert_eq!(
            cache.hget("resource:crawl_slots", "current_usage").await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(cache.smembers("resource:allocated").await.unwrap(), vec!["1", "2"]);
        assert!(cache.hget_all("resource:allocation:3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_claim_writes_nothing() {
        let cache = InMemoryCoordinationCache::new();
        cache.hset("resource:crawl_slots", "total_capacity", "5").await.unwrap();
        cache.hset("resource:network", "total_capacity", "1").await.unwrap();
        cache.hset("resource:network", "current_usage", "1").await.unwrap();

        let outcome = claim_for(&cache, 7, &[claim("crawl_slots", 1), claim("network", 1)]).await;
        assert_eq!(outcome, ClaimOutcome::Insufficient(1));
        let outcome = claim_for(&cache, 7, &[claim("crawl_slots", 1), claim("gpu", 1)]).await;
        assert_eq!(outcome, ClaimOutcome::Missing(1));

        assert_eq!(cache.hget("resource:crawl_slots", "current_usage").await.unwrap(), None);
        assert!(cache.hget_all("resource:allocation:7").await.unwrap().is_empty());
        assert!(cache.smembers("resource:allocated").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saturating_decrement_clamps_at_zero() {
        let cache = InMemoryCoordinationCache::new();
        cache.hset("resource:cpu", "current_usage", "1").await.unwrap();
        assert_eq!(cache.hdecr_saturating("resource:cpu", "current_usage", 3).await.unwrap(), 0);
        assert_eq!(cache.hdecr_saturating("resource:cpu", "current_usage", 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_nx_ex_expires() {
        let cache = InMemoryCoordinationCache::new();
        assert!(cache.set_nx_ex("lock", "a", Duration::from_millis(30)).await.unwrap());
        assert!(!cache.set_nx_ex("lock", "b", Duration::from_millis(30)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.set_nx_ex("lock", "b", Duration::from_secs(30)).await.unwrap());
        assert!(!cache.delete_if_equals("lock", "a").await.unwrap());
        assert!(cache.delete_if_equals("lock", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_ordering_and_pop() {
        let cache = InMemoryCoordinationCache::new();
        cache.zadd("q", "low", 1.0).await.unwrap();
        cache.zadd("q", "high", 3.0).await.unwrap();
        cache.zadd("q", "mid", 2.0).await.unwrap();

        let asc = cache.zrange_by_score("q", 1.5, f64::INFINITY, None).await.unwrap();
        assert_eq!(asc, vec![("mid".to_string(), 2.0), ("high".to_string(), 3.0)]);

        let desc = cache.zrevrange_by_score("q", f64::INFINITY, f64::NEG_INFINITY, Some(1)).await.unwrap();
        assert_eq!(desc[0].0, "high");

        let popped = cache.zpop_max("q", 2).await.unwrap();
        assert_eq!(popped.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>(), vec!["high", "mid"]);
        assert_eq!(cache.zcard("q").await.unwrap(), 1);
        assert_eq!(cache.zrem_range_by_score("q", 0.0, 1.0).await.unwrap(), 1);
    }
}
