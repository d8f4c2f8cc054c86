use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Redis,
    /// 单进程内存实现，仅用于嵌入式部署和测试
    Memory,
}

/// 协调缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "crawl".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == CacheBackend::Redis {
            if self.redis_url.is_empty() {
                return Err(anyhow::anyhow!("Redis URL不能为空"));
            }
            if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
                return Err(anyhow::anyhow!("Redis URL格式无效: {}", self.redis_url));
            }
        }

        if self.key_prefix.contains(char::is_whitespace) {
            return Err(anyhow::anyhow!("缓存键前缀不能包含空白字符"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("缓存连接超时时间必须大于0"));
        }

        Ok(())
    }
}
