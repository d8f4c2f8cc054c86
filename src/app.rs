use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator_api::create_app;
use orchestrator_core::config::{AppConfig, CacheBackend, QueueBackend};
use orchestrator_core::traits::{CoordinationCache, MessageQueue};
use orchestrator_dispatcher::{
    DeadLetterConsumer, DependencyManager, OperatorController, PeriodicRunner, PriorityManager,
    QueueNames, ResourceManager, ResultListener, RetryManager, StateTracker, TaskMonitor,
    TaskScheduler,
};
use orchestrator_domain::{RetryPolicy, WindowPolicy};
use orchestrator_infrastructure::{
    DatabaseManager, InMemoryCoordinationCache, InMemoryMessageQueue, MetricsCollector,
    RabbitMQMessageQueue, RedisCoordinationCache,
};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info, warn};

/// 主应用程序：持有全部组件，按配置启动各个后台循环
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    rabbitmq: Option<Arc<RabbitMQMessageQueue>>,
    scheduler: Arc<TaskScheduler>,
    monitor: Arc<TaskMonitor>,
    tracker: Arc<StateTracker>,
    result_listener: Arc<ResultListener>,
    dead_letters: Arc<DeadLetterConsumer>,
    controller: Arc<OperatorController>,
}

impl Application {
    /// 连接外部依赖并组装组件
    pub async fn new(config: AppConfig) -> Result<Self> {
        let instance_id = instance_id();
        info!("初始化爬取编排器，实例: {}", instance_id);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        if config.database.run_migrations {
            sqlx::migrate!("./migrations")
                .run(database.pool())
                .await
                .context("执行数据库迁移失败")?;
        } else {
            info!("已跳过数据库迁移");
        }
        let task_repo = database.task_repository();
        let failed_task_repo = database.failed_task_repository();

        let (message_queue, rabbitmq) = create_message_queue(&config).await?;
        let cache = create_cache(&config).await?;
        let metrics = Arc::new(MetricsCollector::new());

        let resources = Arc::new(ResourceManager::new(
            cache.clone(),
            config.resources.clone(),
        ));
        resources
            .initialize()
            .await
            .context("初始化资源约束失败")?;

        let dependencies = Arc::new(DependencyManager::new(cache.clone(), task_repo.clone()));
        let priority = Arc::new(PriorityManager::new(
            task_repo.clone(),
            cache.clone(),
            dependencies.clone(),
            resources.clone(),
            config.priority.clone(),
            Duration::from_secs(config.dispatcher.scheduling_lock_ttl_seconds),
            instance_id,
        ));
        let tracker = Arc::new(StateTracker::new(cache.clone(), config.tracker.clone()));

        let scheduler = Arc::new(TaskScheduler::new(
            task_repo.clone(),
            message_queue.clone(),
            priority.clone(),
            resources.clone(),
            tracker.clone(),
            metrics.clone(),
            config.dispatcher.clone(),
            config.message_queue.sub_task_queue.clone(),
        ));
        let retry = Arc::new(RetryManager::new(
            task_repo.clone(),
            resources.clone(),
            tracker.clone(),
            metrics.clone(),
            RetryPolicy::from_config(&config.monitor),
        ));
        let monitor = Arc::new(TaskMonitor::new(
            task_repo.clone(),
            retry,
            resources.clone(),
            priority.clone(),
            tracker.clone(),
            metrics.clone(),
            config.monitor.batch_limit,
        ));

        let poll_interval = Duration::from_millis(config.message_queue.consume_poll_interval_ms);
        let result_listener = Arc::new(ResultListener::new(
            task_repo.clone(),
            message_queue.clone(),
            resources.clone(),
            priority.clone(),
            tracker.clone(),
            metrics.clone(),
            WindowPolicy::from_config(&config.dispatcher),
            config.message_queue.result_queue.clone(),
            config.message_queue.consume_batch_size,
            poll_interval,
        ));
        let dead_letters = Arc::new(DeadLetterConsumer::new(
            failed_task_repo.clone(),
            message_queue.clone(),
            metrics,
            config.message_queue.dead_letter_queue.clone(),
            config.message_queue.consume_batch_size,
            poll_interval,
        ));

        let controller = Arc::new(OperatorController::new(
            scheduler.clone(),
            monitor.clone(),
            priority,
            dependencies,
            resources,
            tracker.clone(),
            task_repo,
            failed_task_repo,
            message_queue,
            QueueNames {
                sub_task: config.message_queue.sub_task_queue.clone(),
                result: config.message_queue.result_queue.clone(),
                dead_letter: config.message_queue.dead_letter_queue.clone(),
            },
        ));

        Ok(Self {
            config,
            database,
            rabbitmq,
            scheduler,
            monitor,
            tracker,
            result_listener,
            dead_letters,
            controller,
        })
    }

    /// 运行直到收到关闭信号，随后等待所有循环退出并释放连接
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        if self.config.dispatcher.enabled {
            let runner = PeriodicRunner::new("scan-dispatch", self.config.dispatcher.schedule())?;
            let scheduler = self.scheduler.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                runner
                    .run(
                        move || {
                            let scheduler = scheduler.clone();
                            async move { scheduler.scan_and_dispatch().await.map(|_| ()) }
                        },
                        rx,
                    )
                    .await;
            }));
        } else {
            warn!("扫描调度已在配置中禁用");
        }

        if self.config.monitor.enabled {
            let runner = PeriodicRunner::new("monitor", self.config.monitor.schedule())?;
            let monitor = self.monitor.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                runner
                    .run(
                        move || {
                            let monitor = monitor.clone();
                            async move {
                                monitor.run_once().await;
                                Ok(())
                            }
                        },
                        rx,
                    )
                    .await;
            }));
        } else {
            warn!("监控巡检已在配置中禁用");
        }

        {
            let listener = self.result_listener.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { listener.run(rx).await }));
        }
        {
            let consumer = self.dead_letters.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { consumer.run(rx).await }));
        }

        if self.config.api.enabled {
            handles.push(self.spawn_api(shutdown_rx.resubscribe()).await?);
        }

        // 追踪写入循环最后停止，保证其他组件退出前产生的事件都能落盘
        let (tracker_tx, tracker_rx) = broadcast::channel(1);
        let tracker_handle = {
            let tracker = self.tracker.clone();
            tokio::spawn(async move { tracker.run(tracker_rx).await })
        };

        info!("爬取编排器已启动，共 {} 个后台循环", handles.len() + 1);
        let _ = shutdown_rx.recv().await;
        info!("收到关闭信号，等待后台循环退出");

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("后台循环异常退出: {}", e);
            }
        }

        let _ = tracker_tx.send(());
        if let Err(e) = tracker_handle.await {
            error!("状态追踪写入循环异常退出: {}", e);
        }

        if let Some(rabbitmq) = &self.rabbitmq {
            if let Err(e) = rabbitmq.close().await {
                warn!("关闭RabbitMQ连接失败: {}", e);
            }
        }
        self.database.close().await;

        info!("所有组件已停止");
        Ok(())
    }

    async fn spawn_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let address = self.config.api.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("绑定API地址失败: {address}"))?;
        let app = create_app(self.controller.clone(), self.config.api.cors_enabled);
        info!("运维API监听于 {}", address);

        Ok(tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            });
            if let Err(e) = server.await {
                error!("API服务器异常退出: {}", e);
            }
        }))
    }
}

/// 主机名加进程号，用作调度锁的持有者标识
fn instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}-{}", host, std::process::id())
}

async fn create_message_queue(
    config: &AppConfig,
) -> Result<(Arc<dyn MessageQueue>, Option<Arc<RabbitMQMessageQueue>>)> {
    match config.message_queue.backend {
        QueueBackend::Rabbitmq => {
            let queue = Arc::new(
                RabbitMQMessageQueue::new(config.message_queue.clone())
                    .await
                    .context("连接RabbitMQ失败")?,
            );
            let shared: Arc<dyn MessageQueue> = queue.clone();
            Ok((shared, Some(queue)))
        }
        QueueBackend::Memory => {
            warn!("使用内存消息队列，外部Worker无法接入，仅适用于嵌入式部署");
            let queue: Arc<dyn MessageQueue> = Arc::new(InMemoryMessageQueue::new(
                config.message_queue.dead_letter_queue.clone(),
            ));
            Ok((queue, None))
        }
    }
}

async fn create_cache(config: &AppConfig) -> Result<Arc<dyn CoordinationCache>> {
    match config.cache.backend {
        CacheBackend::Redis => {
            let cache = RedisCoordinationCache::new(&config.cache)
                .await
                .context("连接Redis失败")?;
            Ok(Arc::new(cache))
        }
        CacheBackend::Memory => {
            warn!("使用内存协调缓存，调度锁和资源计数无法跨实例共享");
            Ok(Arc::new(InMemoryCoordinationCache::new()))
        }
    }
}
