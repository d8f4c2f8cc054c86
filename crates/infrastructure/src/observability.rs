use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::info;

/// 编排核心的指标收集器
///
/// 未安装 recorder 时所有操作都是空操作，组件可以无条件持有它。
#[derive(Clone)]
pub struct MetricsCollector {
    scans_total: Counter,
    scan_duration: Histogram,
    dispatches_total: Counter,
    publish_failures_total: Counter,
    retries_total: Counter,
    timeouts_total: Counter,
    auto_pauses_total: Counter,
    dead_letters_total: Counter,
    results_total: Counter,
    priority_queue_depth: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            scans_total: counter!("orchestrator_scans_total"),
            scan_duration: histogram!("orchestrator_scan_duration_seconds"),
            dispatches_total: counter!("orchestrator_dispatches_total"),
            publish_failures_total: counter!("orchestrator_publish_failures_total"),
            retries_total: counter!("orchestrator_retries_total"),
            timeouts_total: counter!("orchestrator_timeouts_total"),
            auto_pauses_total: counter!("orchestrator_auto_pauses_total"),
            dead_letters_total: counter!("orchestrator_dead_letters_total"),
            results_total: counter!("orchestrator_results_total"),
            priority_queue_depth: gauge!("orchestrator_priority_queue_depth"),
        }
    }

    pub fn record_scan(&self, duration_seconds: f64) {
        self.scans_total.increment(1);
        self.scan_duration.record(duration_seconds);
    }

    pub fn record_dispatch(&self) {
        self.dispatches_total.increment(1);
    }

    /// 准入拒绝按原因分类
    pub fn record_skip(&self, reason: &'static str) {
        counter!("orchestrator_skips_total", "reason" => reason).increment(1);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures_total.increment(1);
    }

    pub fn record_retry(&self) {
        self.retries_total.increment(1);
    }

    pub fn record_timeout(&self) {
        self.timeouts_total.increment(1);
    }

    pub fn record_auto_pause(&self) {
        self.auto_pauses_total.increment(1);
    }

    pub fn record_dead_letter(&self) {
        self.dead_letters_total.increment(1);
    }

    pub fn record_result(&self, success: bool) {
        self.results_total.increment(1);
        if !success {
            counter!("orchestrator_failed_results_total").increment(1);
        }
    }

    pub fn update_priority_queue_depth(&self, depth: f64) {
        self.priority_queue_depth.set(depth);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// 安装 Prometheus exporter，必须在 tokio 运行时内调用
pub fn init_metrics(listen_address: &str) -> Result<()> {
    let address: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen_address}"))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus exporter失败")?;

    info!("Prometheus指标导出已启动: {}", address);
    Ok(())
}
