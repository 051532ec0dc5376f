use crate::error::{PerfError, Result};
use crate::source::MetricSource;
use crate::supervisor::TaskSupervisor;
use chrono::{DateTime, Utc};
use flux_alert::{
    Alert, AlertRule, AlertRuleEngine, AlertStatistics, EvaluationSummary, NotificationDispatcher,
};
use flux_analytics::{
    BottleneckAnalyzer, ComponentMetrics, RegressionDetector, RegressionResult, Severity,
    SystemBottleneckReport, TrendAnalysis, TrendAnalyzer,
};
use flux_config::EngineConfig;
use flux_timeseries::{MetricStore, MetricSummary};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// 后台循环 panic 后的最大重启次数
const MAX_LOOP_RESTARTS: u32 = 5;

/// 引擎当前状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub timestamp: DateTime<Utc>,
    pub active_alert_count: usize,
    pub metrics: HashMap<String, MetricSummary>,
}

/// 性能观测引擎
///
/// 启动时构建一次，以引用或 `Arc` 交给上层（HTTP、CLI）。所有组件都可以单独取出使用。
pub struct PerfEngine {
    config: EngineConfig,
    store: Arc<MetricStore>,
    detector: RegressionDetector,
    trends: Arc<TrendAnalyzer>,
    bottlenecks: Arc<BottleneckAnalyzer>,
    alerts: Arc<AlertRuleEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    sources: Arc<RwLock<Vec<Arc<dyn MetricSource>>>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl PerfEngine {
    /// 构建所有组件并加载配置中的告警规则
    pub async fn new(config: EngineConfig, dispatcher: NotificationDispatcher) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MetricStore::from_config(&config.store));
        let detector = RegressionDetector::new(config.regression.clone());
        let trends = Arc::new(TrendAnalyzer::new(store.clone(), config.trend.clone()));
        let bottlenecks = Arc::new(BottleneckAnalyzer::new(
            config.bottleneck.clone(),
            RegressionDetector::new(config.regression.clone()),
        ));
        let dispatcher = Arc::new(dispatcher);
        let alerts = Arc::new(AlertRuleEngine::new(
            store.clone(),
            dispatcher.clone(),
            config.alerting.clone(),
        ));

        for rule_config in &config.rules {
            let rule = AlertRule::from_config(rule_config, &config.alerting)?;
            alerts.add_rule(rule).await?;
        }

        info!(
            rules = config.rules.len(),
            capacity = config.store.capacity,
            "Performance engine initialized"
        );

        Ok(Self {
            config,
            store,
            detector,
            trends,
            bottlenecks,
            alerts,
            dispatcher,
            sources: Arc::new(RwLock::new(Vec::new())),
            supervisor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn alerts(&self) -> &Arc<AlertRuleEngine> {
        &self.alerts
    }

    pub fn trends(&self) -> &Arc<TrendAnalyzer> {
        &self.trends
    }

    pub fn bottlenecks(&self) -> &Arc<BottleneckAnalyzer> {
        &self.bottlenecks
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// 记录指标并立即评估该指标上的规则，时间戳缺省为当前时间
    pub async fn record_metric(
        &self,
        name: &str,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> EvaluationSummary {
        self.record_metric_with_tags(name, value, timestamp, HashMap::new())
            .await
    }

    pub async fn record_metric_with_tags(
        &self,
        name: &str,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
        tags: HashMap<String, String>,
    ) -> EvaluationSummary {
        self.store
            .record(name, value, timestamp.unwrap_or_else(Utc::now), tags)
            .await;
        self.alerts.evaluate_metric(name).await
    }

    /// 记录组件资源指标
    pub async fn record_component_metrics(&self, metrics: ComponentMetrics) {
        self.bottlenecks.record(metrics).await;
    }

    pub async fn current_status(&self) -> EngineStatus {
        EngineStatus {
            timestamp: Utc::now(),
            active_alert_count: self.alerts.active_count().await,
            metrics: self.store.summaries().await,
        }
    }

    /// 指标趋势，数据不足时返回 None
    pub async fn trend(&self, metric_name: &str, window_hours: u64) -> Option<TrendAnalysis> {
        self.trends.analyze(metric_name, window_hours).await
    }

    pub async fn bottleneck_report(&self) -> SystemBottleneckReport {
        self.bottlenecks.generate_system_report().await
    }

    /// 对指标的全部历史做回归检测
    pub async fn detect_regression(&self, metric_name: &str) -> RegressionResult {
        let samples: Vec<(DateTime<Utc>, f64)> = self
            .store
            .all(metric_name)
            .await
            .into_iter()
            .map(|s| (s.timestamp, s.value))
            .collect();
        self.detector.detect(&samples, metric_name)
    }

    pub async fn acknowledge(&self, alert_id: &str, by: &str) -> Result<Alert> {
        Ok(self.alerts.acknowledge(alert_id, by).await?)
    }

    pub async fn resolve(&self, alert_id: &str) -> Result<Alert> {
        Ok(self.alerts.resolve(alert_id).await?)
    }

    pub async fn list_active_alerts(&self, severity: Option<Severity>) -> Vec<Alert> {
        self.alerts.list_active_alerts(severity).await
    }

    pub async fn alert_history(&self, limit: usize) -> Vec<Alert> {
        self.alerts.alert_history(limit).await
    }

    pub async fn alert_statistics(&self) -> AlertStatistics {
        self.alerts.statistics().await
    }

    pub async fn add_rule(&self, rule: AlertRule) -> Result<()> {
        Ok(self.alerts.add_rule(rule).await?)
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Result<AlertRule> {
        Ok(self.alerts.remove_rule(rule_id).await?)
    }

    pub async fn list_rules(&self) -> Vec<AlertRule> {
        self.alerts.list_rules().await
    }

    /// 注册采集源，运行中注册的采集源在下一次采集时生效
    pub async fn add_source(&self, source: Arc<dyn MetricSource>) {
        info!(source = source.name(), "Metric source registered");
        self.sources.write().await.push(source);
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    /// 启动后台循环：采集、规则评估、趋势分析、瓶颈分析、告警清理
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            return Err(PerfError::AlreadyRunning);
        }

        let mut supervisor = TaskSupervisor::new(MAX_LOOP_RESTARTS);

        let store = self.store.clone();
        let bottlenecks = self.bottlenecks.clone();
        let sources = self.sources.clone();
        supervisor.spawn(
            "metric_collection",
            Duration::from_secs(self.config.store.collection_interval_secs),
            move || {
                let store = store.clone();
                let bottlenecks = bottlenecks.clone();
                let sources = sources.clone();
                async move { collect_once(&store, &bottlenecks, &sources).await }
            },
        );

        let alerts = self.alerts.clone();
        supervisor.spawn(
            "rule_evaluation",
            Duration::from_secs(self.config.alerting.evaluation_interval_secs),
            move || {
                let alerts = alerts.clone();
                async move {
                    alerts.evaluate_all().await;
                }
            },
        );

        let trends = self.trends.clone();
        supervisor.spawn(
            "trend_analysis",
            Duration::from_secs(self.config.trend.interval_secs),
            move || {
                let trends = trends.clone();
                async move {
                    let analyzed = trends.run_cycle().await;
                    debug!(analyzed = analyzed, "Trend analysis cycle completed");
                }
            },
        );

        let bottlenecks = self.bottlenecks.clone();
        supervisor.spawn(
            "bottleneck_analysis",
            Duration::from_secs(self.config.bottleneck.interval_secs),
            move || {
                let bottlenecks = bottlenecks.clone();
                async move {
                    let findings = bottlenecks.run_cycle().await;
                    debug!(findings = findings.len(), "Bottleneck analysis cycle completed");
                }
            },
        );

        let alerts = self.alerts.clone();
        supervisor.spawn(
            "alert_cleanup",
            Duration::from_secs(self.config.alerting.cleanup_interval_secs),
            move || {
                let alerts = alerts.clone();
                async move {
                    alerts.cleanup().await;
                }
            },
        );

        info!(tasks = ?supervisor.task_names(), "Performance engine started");
        *guard = Some(supervisor);
        Ok(())
    }

    /// 停止后台循环，等待进行中的迭代完成
    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();
        match supervisor {
            Some(supervisor) => {
                supervisor.shutdown().await;
                info!("Performance engine stopped");
            }
            None => debug!("Performance engine is not running"),
        }
    }
}

async fn collect_once(
    store: &MetricStore,
    bottlenecks: &BottleneckAnalyzer,
    sources: &RwLock<Vec<Arc<dyn MetricSource>>>,
) {
    let sources: Vec<Arc<dyn MetricSource>> = sources.read().await.clone();

    for source in sources {
        match source.collect().await {
            Ok(samples) => {
                let count = samples.len();
                for sample in samples {
                    store.record_sample(sample).await;
                }
                debug!(source = source.name(), samples = count, "Metrics collected");
            }
            Err(e) => warn!(source = source.name(), error = %e, "Metric collection failed"),
        }

        match source.collect_components().await {
            Ok(components) => {
                for metrics in components {
                    bottlenecks.record(metrics).await;
                }
            }
            Err(e) => warn!(
                source = source.name(),
                error = %e,
                "Component metric collection failed"
            ),
        }
    }
}
