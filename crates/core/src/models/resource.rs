use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 抽象资源约束（cpu、memory、network、crawl_slots 等）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConstraint {
    pub name: String,
    pub total_capacity: i64,
    pub current_usage: i64,
}

impl ResourceConstraint {
    pub fn available(&self) -> i64 {
        (self.total_capacity - self.current_usage).max(0)
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.total_capacity <= 0 {
            return 0.0;
        }
        self.current_usage as f64 / self.total_capacity as f64
    }
}

/// 已为某个任务预留的资源
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceAllocation {
    pub task_id: i64,
    pub amounts: HashMap<String, i64>,
}

impl ResourceAllocation {
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }
}
