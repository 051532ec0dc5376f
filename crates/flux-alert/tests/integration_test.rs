use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flux_alert::{
    Alert, AlertRule, AlertRuleEngine, AlertStatus, Channel, Comparator, FireOutcome,
    LogNotifier, NotificationDispatcher, Notifier, NotifierError, Severity, SkipReason,
};
use flux_config::{AlertingConfig, ConfigLoader};
use flux_timeseries::MetricStore;
use std::collections::HashMap;
use std::sync::Arc;

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _channel: &Channel, _alert: &Alert) -> Result<(), NotifierError> {
        Err(NotifierError::Delivery("smtp unavailable".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

async fn setup() -> (Arc<MetricStore>, Arc<NotificationDispatcher>, AlertRuleEngine) {
    let store = Arc::new(MetricStore::new(1000));
    let dispatcher = Arc::new(NotificationDispatcher::default());
    dispatcher.register(Channel::Log, Arc::new(LogNotifier)).await;
    let engine = AlertRuleEngine::new(store.clone(), dispatcher.clone(), AlertingConfig::default());
    (store, dispatcher, engine)
}

/// 在 at 之前写入 3 个相同值的样本
async fn record_at(store: &MetricStore, name: &str, value: f64, at: DateTime<Utc>) {
    for offset in [2, 1, 0] {
        store
            .record(name, value, at - Duration::seconds(offset), HashMap::new())
            .await;
    }
}

#[tokio::test]
async fn test_suppression_window() {
    let (store, _dispatcher, engine) = setup().await;
    engine
        .add_rule(AlertRule::threshold("lat", "api.latency", Comparator::GreaterThan, 0.5))
        .await
        .unwrap();

    let t0 = Utc::now();
    record_at(&store, "api.latency", 0.9, t0).await;
    assert_eq!(engine.evaluate_all_at(t0).await.fired, 1);
    let first = engine.list_active_alerts(None).await[0].clone();

    // 抑制窗口内条件仍成立：不再通知
    let t1 = t0 + Duration::minutes(10);
    record_at(&store, "api.latency", 0.95, t1).await;
    let summary = engine.evaluate_all_at(t1).await;
    assert_eq!(summary.fired, 0);
    assert_eq!(summary.suppressed, 1);

    let alert = engine.get_alert(&first.id).await.unwrap();
    assert_eq!(alert.status, AlertStatus::Suppressed);
    assert_eq!(alert.current_value, 0.95);
    assert_eq!(alert.notification_log.len(), 1);

    let t2 = t0 + Duration::minutes(20);
    record_at(&store, "api.latency", 0.97, t2).await;
    let outcome = engine
        .evaluate_rule(&engine.get_rule("lat").await.unwrap(), t2)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FireOutcome::Skipped {
            reason: SkipReason::Suppressed
        }
    );

    // 窗口结束后重新通知，告警 id 不变
    let t3 = t0 + Duration::minutes(31);
    record_at(&store, "api.latency", 0.99, t3).await;
    assert_eq!(engine.evaluate_all_at(t3).await.fired, 1);
    let alert = engine.get_alert(&first.id).await.unwrap();
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.notification_log.len(), 2);

    // 解决后可以立即产生新的告警
    engine.resolve_at(&first.id, t3).await.unwrap();
    let t4 = t3 + Duration::minutes(1);
    record_at(&store, "api.latency", 0.99, t4).await;
    assert_eq!(engine.evaluate_all_at(t4).await.fired, 1);
    let second = engine.list_active_alerts(None).await[0].clone();
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn test_rate_limit_per_hour() {
    let (store, _dispatcher, engine) = setup().await;
    engine
        .add_rule(
            AlertRule::threshold("err", "error_rate", Comparator::GreaterOrEqual, 0.1)
                .with_window(5, 1)
                .with_max_alerts_per_hour(10),
        )
        .await
        .unwrap();

    let start = Utc::now();
    let mut fired = 0;
    let mut rate_limited = 0;

    for i in 0..11 {
        let at = start + Duration::minutes(i * 3);
        store.record("error_rate", 0.2, at, HashMap::new()).await;
        let summary = engine.evaluate_all_at(at).await;
        fired += summary.fired;
        rate_limited += summary.rate_limited;

        let clear = at + Duration::minutes(1);
        store.record("error_rate", 0.0, clear, HashMap::new()).await;
        engine.evaluate_all_at(clear).await;
    }

    assert_eq!(fired, 10);
    assert_eq!(rate_limited, 1);
    assert_eq!(engine.alert_history(100).await.len(), 10);

    // 最早的触发滑出一小时窗口后恢复
    let later = start + Duration::minutes(61);
    store.record("error_rate", 0.3, later, HashMap::new()).await;
    assert_eq!(engine.evaluate_all_at(later).await.fired, 1);
}

#[tokio::test]
async fn test_failed_delivery_is_recorded() {
    let (store, dispatcher, engine) = setup().await;
    dispatcher.register(Channel::Email, Arc::new(FailingNotifier)).await;

    engine
        .add_rule(
            AlertRule::threshold("mem", "memory_percent", Comparator::GreaterThan, 90.0)
                .with_severity(Severity::Critical)
                .with_channels(vec![Channel::Email, Channel::Log]),
        )
        .await
        .unwrap();

    let now = Utc::now();
    record_at(&store, "memory_percent", 97.0, now).await;
    assert_eq!(engine.evaluate_all_at(now).await.fired, 1);

    let alert = &engine.list_active_alerts(Some(Severity::Critical)).await[0];
    assert_eq!(alert.notification_log.len(), 2);
    assert_eq!(alert.notification_log[0].channel, Channel::Email);
    assert!(!alert.notification_log[0].outcome.is_delivered());
    assert!(alert.notification_log[1].outcome.is_delivered());
}

#[tokio::test]
async fn test_rules_from_config() {
    let config = ConfigLoader::from_toml_str(
        r#"
[[rules]]
id = "cpu_high"
metric_name = "cpu_percent"
type = "threshold"
severity = "high"
comparator = ">"
threshold_value = 85.0

[[rules]]
id = "latency_trend"
metric_name = "api.latency"
type = "trend_degradation"
window_minutes = 60
min_samples = 10
"#,
    )
    .unwrap();

    let (store, _dispatcher, engine) = setup().await;
    for rule_config in &config.rules {
        let rule = AlertRule::from_config(rule_config, &config.alerting).unwrap();
        engine.add_rule(rule).await.unwrap();
    }
    assert_eq!(engine.list_rules().await.len(), 2);

    let now = Utc::now();
    for i in 0..20 {
        store
            .record(
                "api.latency",
                0.1 + i as f64 * 0.05,
                now - Duration::minutes(20 - i),
                HashMap::new(),
            )
            .await;
    }

    let summary = engine.evaluate_metric_at("api.latency", now).await;
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.fired, 1);

    // 趋势规则不会自动解决
    let flat = now + Duration::minutes(1);
    store.record("api.latency", 0.1, flat, HashMap::new()).await;
    let summary = engine.evaluate_metric_at("api.latency", flat).await;
    assert_eq!(summary.resolved, 0);
    assert_eq!(engine.active_count().await, 1);
}
