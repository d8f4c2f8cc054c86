use anyhow::{ensure, Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    cache::CacheConfig,
    database::DatabaseConfig,
    dispatcher_monitor::{DispatcherConfig, MonitorConfig},
    message_queue::MessageQueueConfig,
    tracker_priority::{PriorityConfig, ResourcesConfig, TrackerConfig},
};

/// 未指定配置文件时依次查找的路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/orchestrator.toml",
    "orchestrator.toml",
    "/etc/crawl-orchestrator/config.toml",
];

pub const ENV_PREFIX: &str = "ORCHESTRATOR";

/// 编排器全部配置，各段缺省时使用默认值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub message_queue: MessageQueueConfig,
    pub cache: CacheConfig,
    pub dispatcher: DispatcherConfig,
    pub monitor: MonitorConfig,
    pub tracker: TrackerConfig,
    pub priority: PriorityConfig,
    pub resources: ResourcesConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 按 默认值 → 配置文件 → `ORCHESTRATOR__*` 环境变量 的顺序叠加配置
    ///
    /// 未显式指定文件时在 [`DEFAULT_CONFIG_PATHS`] 中取第一个存在的文件，都不存在则只用默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("priority.hot_keywords")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.cache.validate().context("缓存配置验证失败")?;
        self.dispatcher
            .validate()
            .context("调度器配置验证失败")?;
        self.monitor.validate().context("监控配置验证失败")?;
        self.tracker.validate().context("状态追踪配置验证失败")?;
        self.priority.validate().context("优先级配置验证失败")?;
        self.resources.validate().context("资源配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        self.validate_cross_section()
    }

    /// 跨配置段的约束
    fn validate_cross_section(&self) -> Result<()> {
        ensure!(
            self.database.max_connections as usize >= self.dispatcher.max_concurrent_dispatches,
            "数据库最大连接数 {} 小于最大并发调度数 {}",
            self.database.max_connections,
            self.dispatcher.max_concurrent_dispatches
        );
        ensure!(
            !(self.api.enabled
                && self.observability.metrics_enabled
                && self.api.bind_address == self.observability.metrics_listen_address),
            "API与指标导出不能监听同一地址: {}",
            self.api.bind_address
        );
        Ok(())
    }
}
