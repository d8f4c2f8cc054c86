use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 状态追踪配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub retention_days: i64,
    pub history_default_limit: usize,
    pub failure_lookback_hours: i64,
    /// 写入缓冲通道容量，满时丢弃并告警
    pub buffer_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            history_default_limit: 50,
            failure_lookback_hours: 24,
            buffer_capacity: 1024,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retention_days <= 0 {
            return Err(anyhow::anyhow!("状态记录保留天数必须大于0"));
        }
        if self.history_default_limit == 0 {
            return Err(anyhow::anyhow!("历史查询默认条数必须大于0"));
        }
        if self.failure_lookback_hours <= 0 {
            return Err(anyhow::anyhow!("失败率回看窗口必须大于0"));
        }
        if self.buffer_capacity == 0 {
            return Err(anyhow::anyhow!("状态写入缓冲容量必须大于0"));
        }
        Ok(())
    }
}

/// 优先级计算配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// 资源平均使用率超过该值视为高负载
    pub high_load_threshold: f64,
    pub long_wait_minutes: i64,
    pub hot_keywords: Vec<String>,
    /// 历史累计抓取量超过该值视为高价值关键词
    pub high_volume_threshold: i64,
    /// 重要度得分达到该值视为高重要度
    pub high_importance_score: i32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            high_load_threshold: 0.8,
            long_wait_minutes: 60,
            hot_keywords: Vec::new(),
            high_volume_threshold: 10_000,
            high_importance_score: 70,
        }
    }
}

impl PriorityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.high_load_threshold) {
            return Err(anyhow::anyhow!("高负载阈值必须在0到1之间"));
        }
        if self.long_wait_minutes <= 0 {
            return Err(anyhow::anyhow!("长时间等待阈值必须大于0"));
        }
        if self.high_volume_threshold < 0 {
            return Err(anyhow::anyhow!("高抓取量阈值不能为负数"));
        }
        if !(0..=100).contains(&self.high_importance_score) {
            return Err(anyhow::anyhow!("高重要度得分必须在0到100之间"));
        }
        Ok(())
    }
}

/// 资源约束配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// 资源名 → 总容量，启动时写入协调缓存
    pub constraints: HashMap<String, i64>,
    /// 每个子任务需要预留的资源量
    pub per_task: HashMap<String, i64>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            constraints: HashMap::from([("crawl_slots".to_string(), 20)]),
            per_task: HashMap::from([("crawl_slots".to_string(), 1)]),
        }
    }
}

impl ResourcesConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, capacity) in &self.constraints {
            if *capacity < 0 {
                return Err(anyhow::anyhow!("资源 {} 的容量不能为负数", name));
            }
        }
        for (name, amount) in &self.per_task {
            if *amount <= 0 {
                return Err(anyhow::anyhow!("资源 {} 的单任务需求必须大于0", name));
            }
            if !self.constraints.contains_key(name) {
                return Err(anyhow::anyhow!("资源 {} 未定义容量约束", name));
            }
        }
        Ok(())
    }
}
