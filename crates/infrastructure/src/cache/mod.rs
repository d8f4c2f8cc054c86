//! 协调缓存实现
//!
//! - `RedisCoordinationCache`：多实例部署使用，原子操作由 Lua 脚本保证
//! - `InMemoryCoordinationCache`：单进程嵌入式部署和测试使用

mod in_memory;
mod redis_cache;

pub use in_memory::InMemoryCoordinationCache;
pub use redis_cache::RedisCoordinationCache;

/// 有序集合分数区间参数
pub(crate) fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}
