use crate::alert::{Alert, AlertStatus, NotificationRecord};
use crate::error::{AlertError, Result};
use crate::limiter::RateLimiter;
use crate::notifier::{Channel, NotificationDispatcher};
use crate::rule::AlertRule;
use chrono::{DateTime, Duration, Utc};
use flux_analytics::{AnalyticsError, Severity};
use flux_config::AlertingConfig;
use flux_timeseries::{MetricSample, MetricStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

type AlertKey = (String, String);

/// 跳过评估的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    InsufficientData,
    Suppressed,
}

/// 单条规则的评估结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FireOutcome {
    /// 新建或重新激活并已通知
    Fired { alert_id: String },
    /// 条件仍成立，处于抑制窗口内，未通知
    Suppressed { alert_id: String },
    /// 已确认的告警仅刷新数值
    Refreshed { alert_id: String },
    /// 超过每小时上限，丢弃
    RateLimited,
    /// 条件不再成立，自动解决
    Resolved { alert_id: String },
    NotFired,
    Skipped { reason: SkipReason },
}

/// 一轮评估的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub fired: usize,
    pub suppressed: usize,
    pub rate_limited: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl EvaluationSummary {
    fn add(&mut self, outcome: &FireOutcome) {
        self.evaluated += 1;
        match outcome {
            FireOutcome::Fired { .. } => self.fired += 1,
            FireOutcome::Suppressed { .. } => self.suppressed += 1,
            FireOutcome::RateLimited => self.rate_limited += 1,
            FireOutcome::Resolved { .. } => self.resolved += 1,
            FireOutcome::Skipped { .. } => self.skipped += 1,
            FireOutcome::Refreshed { .. } | FireOutcome::NotFired => {}
        }
    }
}

/// 告警统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStatistics {
    pub active: usize,
    pub acknowledged: usize,
    pub suppressed: usize,
    pub history: usize,
    pub by_severity: HashMap<Severity, usize>,
    pub rules: usize,
    pub enabled_rules: usize,
}

/// 受同一把锁保护的可变状态
struct AlertState {
    active: HashMap<AlertKey, Alert>,
    history: Vec<Alert>,
    limiter: RateLimiter,
}

impl AlertState {
    fn find_active_mut(&mut self, alert_id: &str) -> Option<&mut Alert> {
        self.active.values_mut().find(|a| a.id == alert_id)
    }

    fn push_history(&mut self, alert: Alert, limit: usize) {
        self.history.push(alert);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}

/// 待发送的通知，在锁外投递
struct PendingNotification {
    alert: Alert,
    channels: Vec<Channel>,
}

/// 告警规则引擎
///
/// 活动告警表、历史与限流计数器由一把互斥锁保护，评估、确认与解决操作在其上串行化。
/// 通知投递在锁外进行，投递记录随后按告警 id 回写。
pub struct AlertRuleEngine {
    store: Arc<MetricStore>,
    dispatcher: Arc<NotificationDispatcher>,
    config: AlertingConfig,
    rules: RwLock<HashMap<String, AlertRule>>,
    state: Mutex<AlertState>,
}

impl AlertRuleEngine {
    pub fn new(
        store: Arc<MetricStore>,
        dispatcher: Arc<NotificationDispatcher>,
        config: AlertingConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
            rules: RwLock::new(HashMap::new()),
            state: Mutex::new(AlertState {
                active: HashMap::new(),
                history: Vec::new(),
                limiter: RateLimiter::hourly(),
            }),
        }
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    /// 添加规则，同 id 规则会被替换
    pub async fn add_rule(&self, rule: AlertRule) -> Result<()> {
        rule.validate()?;

        let mut rules = self.rules.write().await;
        let replaced = rules.insert(rule.id.clone(), rule.clone()).is_some();
        info!(
            rule_id = %rule.id,
            metric = %rule.metric_name,
            kind = rule.condition.kind(),
            replaced = replaced,
            "Alert rule added"
        );
        Ok(())
    }

    /// 删除规则，同时清理其限流计数
    pub async fn remove_rule(&self, rule_id: &str) -> Result<AlertRule> {
        let removed = {
            let mut rules = self.rules.write().await;
            rules.remove(rule_id)
        };

        match removed {
            Some(rule) => {
                self.state.lock().await.limiter.remove(rule_id);
                info!(rule_id = %rule_id, "Alert rule removed");
                Ok(rule)
            }
            None => Err(AlertError::RuleNotFound(rule_id.to_string())),
        }
    }

    pub async fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        let rules = self.rules.read().await;
        rules.get(rule_id).cloned()
    }

    /// 所有规则，按 id 排序
    pub async fn list_rules(&self) -> Vec<AlertRule> {
        let rules = self.rules.read().await;
        let mut list: Vec<AlertRule> = rules.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// 评估所有启用的规则
    pub async fn evaluate_all(&self) -> EvaluationSummary {
        self.evaluate_all_at(Utc::now()).await
    }

    pub async fn evaluate_all_at(&self, now: DateTime<Utc>) -> EvaluationSummary {
        let rules = self.list_rules().await;
        let summary = self.evaluate_rules(&rules, now).await;

        debug!(
            evaluated = summary.evaluated,
            fired = summary.fired,
            resolved = summary.resolved,
            rate_limited = summary.rate_limited,
            errors = summary.errors,
            "Alert evaluation cycle completed"
        );
        summary
    }

    /// 仅评估指定指标上的规则，供记录样本后立即触发
    pub async fn evaluate_metric(&self, metric_name: &str) -> EvaluationSummary {
        self.evaluate_metric_at(metric_name, Utc::now()).await
    }

    pub async fn evaluate_metric_at(&self, metric_name: &str, now: DateTime<Utc>) -> EvaluationSummary {
        let rules: Vec<AlertRule> = self
            .list_rules()
            .await
            .into_iter()
            .filter(|r| r.metric_name == metric_name)
            .collect();
        self.evaluate_rules(&rules, now).await
    }

    async fn evaluate_rules(&self, rules: &[AlertRule], now: DateTime<Utc>) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();

        for rule in rules {
            match self.evaluate_rule(rule, now).await {
                Ok(outcome) => summary.add(&outcome),
                Err(e) => {
                    // 单条规则失败不影响其他规则
                    error!(rule_id = %rule.id, error = %e, "Rule evaluation failed");
                    summary.errors += 1;
                }
            }
        }

        summary
    }

    /// 评估单条规则
    pub async fn evaluate_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<FireOutcome> {
        if !rule.enabled {
            return Ok(FireOutcome::Skipped {
                reason: SkipReason::Disabled,
            });
        }

        let since = i64::try_from(rule.window_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| AlertError::RuleEvaluation {
                rule_id: rule.id.clone(),
                reason: format!("window of {} minutes is out of range", rule.window_minutes),
            })?;
        let window = self.store.query_range(&rule.metric_name, since, now).await;

        if window.len() < rule.min_samples {
            debug!(
                rule_id = %rule.id,
                samples = window.len(),
                required = rule.min_samples,
                "Rule skipped: insufficient data"
            );
            return Ok(FireOutcome::Skipped {
                reason: SkipReason::InsufficientData,
            });
        }

        let key: AlertKey = (rule.id.clone(), rule.metric_name.clone());

        let (outcome, pending) = {
            let mut state = self.state.lock().await;

            let condition = match rule.condition.evaluate(&window) {
                Ok(condition) => condition,
                Err(AnalyticsError::InsufficientData { required, actual }) => {
                    debug!(
                        rule_id = %rule.id,
                        required = required,
                        actual = actual,
                        "Rule skipped: insufficient data"
                    );
                    return Ok(FireOutcome::Skipped {
                        reason: SkipReason::InsufficientData,
                    });
                }
                Err(e) => {
                    return Err(AlertError::RuleEvaluation {
                        rule_id: rule.id.clone(),
                        reason: e.to_string(),
                    })
                }
            };

            let snapshot = self.snapshot(&window);

            if condition.holds {
                if let Some(existing) = state.active.get(&key) {
                    if existing.status == AlertStatus::Suppressed
                        && existing.in_suppression_window(rule.suppression_minutes, now)
                    {
                        debug!(rule_id = %rule.id, alert_id = %existing.id, "Rule skipped: suppressed");
                        return Ok(FireOutcome::Skipped {
                            reason: SkipReason::Suppressed,
                        });
                    }
                }
                self.fire(&mut state, rule, key, condition.latest, snapshot, now)
            } else {
                (self.auto_resolve(&mut state, rule, &key, now), None)
            }
        };

        if let Some(pending) = pending {
            let records = self.dispatcher.send(&pending.alert, &pending.channels).await;
            self.attach_records(&pending.alert.id, records).await;
        }

        Ok(outcome)
    }

    /// 条件成立时的状态迁移，调用方持有锁
    fn fire(
        &self,
        state: &mut AlertState,
        rule: &AlertRule,
        key: AlertKey,
        value: f64,
        snapshot: Vec<MetricSample>,
        now: DateTime<Utc>,
    ) -> (FireOutcome, Option<PendingNotification>) {
        let max_per_hour = rule
            .max_alerts_per_hour
            .unwrap_or(self.config.default_max_alerts_per_hour);

        let existing_status = state.active.get(&key).map(|a| a.status);

        match existing_status {
            Some(AlertStatus::Acknowledged) => {
                let Some(alert) = state.active.get_mut(&key) else {
                    return (FireOutcome::NotFired, None);
                };
                alert.refresh(value, snapshot, now);
                (
                    FireOutcome::Refreshed {
                        alert_id: alert.id.clone(),
                    },
                    None,
                )
            }
            Some(AlertStatus::Active) | Some(AlertStatus::Suppressed) => {
                let in_window = state
                    .active
                    .get(&key)
                    .map(|a| a.in_suppression_window(rule.suppression_minutes, now))
                    .unwrap_or(false);

                if in_window {
                    let Some(alert) = state.active.get_mut(&key) else {
                        return (FireOutcome::NotFired, None);
                    };
                    alert.refresh(value, snapshot, now);
                    alert.suppress(now);
                    debug!(rule_id = %rule.id, alert_id = %alert.id, "Alert suppressed");
                    return (
                        FireOutcome::Suppressed {
                            alert_id: alert.id.clone(),
                        },
                        None,
                    );
                }

                // 抑制窗口已过，重新通知
                if !state.limiter.check(&rule.id, max_per_hour, now) {
                    warn!(rule_id = %rule.id, limit = max_per_hour, "Alert rate limit exceeded");
                    return (FireOutcome::RateLimited, None);
                }
                state.limiter.record(&rule.id, now);

                let Some(alert) = state.active.get_mut(&key) else {
                    return (FireOutcome::NotFired, None);
                };
                alert.refresh(value, snapshot, now);
                alert.reactivate(now);
                info!(rule_id = %rule.id, alert_id = %alert.id, value = value, "Alert re-fired");

                let pending = PendingNotification {
                    alert: alert.clone(),
                    channels: rule.channels.clone(),
                };
                (
                    FireOutcome::Fired {
                        alert_id: alert.id.clone(),
                    },
                    Some(pending),
                )
            }
            Some(AlertStatus::Resolved) | None => {
                if !state.limiter.check(&rule.id, max_per_hour, now) {
                    warn!(rule_id = %rule.id, limit = max_per_hour, "Alert rate limit exceeded");
                    return (FireOutcome::RateLimited, None);
                }
                state.limiter.record(&rule.id, now);

                let alert = Alert::new(rule, value, snapshot, now);
                info!(
                    rule_id = %rule.id,
                    alert_id = %alert.id,
                    metric = %rule.metric_name,
                    severity = %rule.severity,
                    value = value,
                    "Alert fired"
                );

                let alert_id = alert.id.clone();
                let pending = PendingNotification {
                    alert: alert.clone(),
                    channels: rule.channels.clone(),
                };
                state.active.insert(key, alert);
                (FireOutcome::Fired { alert_id }, Some(pending))
            }
        }
    }

    /// 条件不成立时只对阈值规则自动解决
    fn auto_resolve(
        &self,
        state: &mut AlertState,
        rule: &AlertRule,
        key: &AlertKey,
        now: DateTime<Utc>,
    ) -> FireOutcome {
        if !rule.condition.is_threshold() {
            return FireOutcome::NotFired;
        }

        let Some(mut alert) = state.active.remove(key) else {
            return FireOutcome::NotFired;
        };

        if let Err(e) = alert.resolve(now) {
            warn!(alert_id = %alert.id, error = %e, "Unexpected alert state during auto-resolve");
        }
        info!(rule_id = %rule.id, alert_id = %alert.id, "Alert auto-resolved");

        let alert_id = alert.id.clone();
        state.push_history(alert, self.config.history_limit);
        FireOutcome::Resolved { alert_id }
    }

    fn snapshot(&self, window: &[MetricSample]) -> Vec<MetricSample> {
        let start = window.len().saturating_sub(self.config.snapshot_size);
        window[start..].to_vec()
    }

    async fn attach_records(&self, alert_id: &str, records: Vec<NotificationRecord>) {
        let mut state = self.state.lock().await;
        if let Some(alert) = state.find_active_mut(alert_id) {
            alert.record_notifications(records);
            return;
        }
        // 投递期间可能已被解决
        if let Some(alert) = state.history.iter_mut().rev().find(|a| a.id == alert_id) {
            alert.record_notifications(records);
        }
    }

    /// 确认告警
    pub async fn acknowledge(&self, alert_id: &str, by: &str) -> Result<Alert> {
        self.acknowledge_at(alert_id, by, Utc::now()).await
    }

    pub async fn acknowledge_at(&self, alert_id: &str, by: &str, now: DateTime<Utc>) -> Result<Alert> {
        let mut state = self.state.lock().await;

        if let Some(alert) = state.find_active_mut(alert_id) {
            alert.acknowledge(by, now)?;
            info!(alert_id = %alert_id, by = %by, "Alert acknowledged");
            return Ok(alert.clone());
        }

        if state.history.iter().any(|a| a.id == alert_id) {
            return Err(AlertError::InvalidTransition {
                from: AlertStatus::Resolved,
                to: AlertStatus::Acknowledged,
            });
        }

        Err(AlertError::AlertNotFound(alert_id.to_string()))
    }

    /// 手动解决告警，移入历史并释放键
    pub async fn resolve(&self, alert_id: &str) -> Result<Alert> {
        self.resolve_at(alert_id, Utc::now()).await
    }

    pub async fn resolve_at(&self, alert_id: &str, now: DateTime<Utc>) -> Result<Alert> {
        let mut state = self.state.lock().await;

        let key = state
            .active
            .iter()
            .find(|(_, a)| a.id == alert_id)
            .map(|(key, _)| key.clone());

        let Some(key) = key else {
            if state.history.iter().any(|a| a.id == alert_id) {
                return Err(AlertError::InvalidTransition {
                    from: AlertStatus::Resolved,
                    to: AlertStatus::Resolved,
                });
            }
            return Err(AlertError::AlertNotFound(alert_id.to_string()));
        };

        let Some(mut alert) = state.active.remove(&key) else {
            return Err(AlertError::AlertNotFound(alert_id.to_string()));
        };
        alert.resolve(now)?;
        info!(alert_id = %alert_id, rule_id = %alert.rule_id, "Alert resolved");

        state.push_history(alert.clone(), self.config.history_limit);
        Ok(alert)
    }

    /// 未解决的告警，按严重程度降序、创建时间降序
    pub async fn list_active_alerts(&self, severity: Option<Severity>) -> Vec<Alert> {
        let state = self.state.lock().await;
        let mut alerts: Vec<Alert> = state
            .active
            .values()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect();

        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        alerts
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        let state = self.state.lock().await;
        state
            .active
            .values()
            .find(|a| a.id == alert_id)
            .or_else(|| state.history.iter().find(|a| a.id == alert_id))
            .cloned()
    }

    /// 最近的已解决告警（旧到新）
    pub async fn alert_history(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.lock().await;
        let start = state.history.len().saturating_sub(limit);
        state.history[start..].to_vec()
    }

    pub async fn statistics(&self) -> AlertStatistics {
        let (rules, enabled_rules) = {
            let rules = self.rules.read().await;
            (rules.len(), rules.values().filter(|r| r.enabled).count())
        };

        let state = self.state.lock().await;
        let mut stats = AlertStatistics {
            history: state.history.len(),
            rules,
            enabled_rules,
            ..Default::default()
        };

        for alert in state.active.values() {
            match alert.status {
                AlertStatus::Active => stats.active += 1,
                AlertStatus::Acknowledged => stats.acknowledged += 1,
                AlertStatus::Suppressed => stats.suppressed += 1,
                AlertStatus::Resolved => {}
            }
            *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
        }

        stats
    }

    /// 清理过期历史与限流计数，返回移除的历史条数
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now()).await
    }

    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = i64::try_from(self.config.history_retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut state = self.state.lock().await;

        let before = state.history.len();
        state
            .history
            .retain(|a| a.resolved_at.unwrap_or(a.updated_at) >= cutoff);
        let removed = before - state.history.len();

        let pruned = state.limiter.prune(now);

        if removed > 0 || pruned > 0 {
            info!(
                removed_alerts = removed,
                pruned_rate_limits = pruned,
                "Alert cleanup completed"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::LogNotifier;
    use crate::rule::{Comparator, RuleCondition};

    async fn engine() -> (Arc<MetricStore>, AlertRuleEngine) {
        let store = Arc::new(MetricStore::new(1000));
        let dispatcher = Arc::new(NotificationDispatcher::default());
        dispatcher.register(Channel::Log, Arc::new(LogNotifier)).await;
        let engine = AlertRuleEngine::new(store.clone(), dispatcher, AlertingConfig::default());
        (store, engine)
    }

    async fn feed(store: &MetricStore, name: &str, values: &[f64], now: DateTime<Utc>) {
        let n = values.len() as i64;
        for (i, value) in values.iter().enumerate() {
            store
                .record(
                    name,
                    *value,
                    now - Duration::seconds(n - i as i64),
                    HashMap::new(),
                )
                .await;
        }
    }

    fn cpu_rule() -> AlertRule {
        AlertRule::threshold("cpu_high", "cpu", Comparator::GreaterThan, 80.0)
            .with_severity(Severity::High)
    }

    #[tokio::test]
    async fn test_fire_and_notify() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();

        let now = Utc::now();
        feed(&store, "cpu", &[50.0, 70.0, 95.0], now).await;

        let summary = engine.evaluate_all_at(now).await;
        assert_eq!(summary.fired, 1);

        let alerts = engine.list_active_alerts(None).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].current_value, 95.0);
        assert_eq!(alerts[0].trend_snapshot.len(), 3);
        assert_eq!(alerts[0].notification_log.len(), 1);
        assert!(alerts[0].notification_log[0].outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_fire() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();

        let now = Utc::now();
        feed(&store, "cpu", &[95.0, 90.0, 60.0], now).await;

        let summary = engine.evaluate_all_at(now).await;
        assert_eq!(summary.fired, 0);
        assert!(engine.list_active_alerts(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_samples_skipped() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();

        let now = Utc::now();
        feed(&store, "cpu", &[95.0, 96.0], now).await;

        let summary = engine.evaluate_all_at(now).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_condition_without_reference_is_skipped() {
        let (store, engine) = engine().await;
        let now = Utc::now();
        feed(&store, "cpu", &[50.0, 51.0, 99.0], now).await;

        // 样本数满足窗口要求，但异常检测缺少参考区间
        let rule = AlertRule::new("cpu_spike", "cpu", RuleCondition::Anomaly { z_threshold: 3.0 })
            .with_window(5, 1);
        let outcome = engine.evaluate_rule(&rule, now).await.unwrap();
        assert_eq!(
            outcome,
            FireOutcome::Skipped {
                reason: SkipReason::InsufficientData
            }
        );
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_auto_resolve_threshold_only() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();
        engine
            .add_rule(
                AlertRule::new("cpu_spike", "cpu", RuleCondition::Anomaly { z_threshold: 3.0 })
                    .with_window(5, 8),
            )
            .await
            .unwrap();

        let now = Utc::now();
        let mut values = vec![50.0, 52.0, 50.0, 52.0, 50.0, 52.0, 50.0, 52.0, 51.0, 51.0];
        values.push(99.0);
        feed(&store, "cpu", &values, now).await;

        let summary = engine.evaluate_all_at(now).await;
        assert_eq!(summary.fired, 2);

        let later = now + Duration::seconds(30);
        store.record("cpu", 40.0, later, HashMap::new()).await;
        let summary = engine.evaluate_all_at(later).await;
        assert_eq!(summary.resolved, 1);

        // 异常告警保留，需手动解决
        let active = engine.list_active_alerts(None).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].rule_id, "cpu_spike");
        assert_eq!(engine.alert_history(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_alert_resolves_on_recovery() {
        let (store, engine) = engine().await;
        let rule = AlertRule::threshold("latency_high", "latency", Comparator::GreaterThan, 0.5)
            .with_window(5, 1);
        engine.add_rule(rule).await.unwrap();

        let t0 = Utc::now();
        feed(&store, "latency", &[0.9, 0.9, 0.9], t0).await;
        assert_eq!(engine.evaluate_all_at(t0).await.fired, 1);

        let t1 = t0 + Duration::minutes(1);
        store.record("latency", 0.9, t1, HashMap::new()).await;
        assert_eq!(engine.evaluate_all_at(t1).await.suppressed, 1);
        assert_eq!(
            engine.list_active_alerts(None).await[0].status,
            AlertStatus::Suppressed
        );

        // 仍在抑制窗口内，窗口中只剩恢复后的样本
        let t2 = t0 + Duration::minutes(8);
        store.record("latency", 0.1, t2, HashMap::new()).await;
        let summary = engine.evaluate_all_at(t2).await;
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.skipped, 0);

        assert!(engine.list_active_alerts(None).await.is_empty());
        let history = engine.alert_history(10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, AlertStatus::Resolved);
    }

    #[tokio::test]
    async fn test_out_of_range_window_is_an_error() {
        let (store, engine) = engine().await;
        let huge = cpu_rule().with_window(200_000_000_000_000, 1);
        assert!(matches!(
            engine.add_rule(huge.clone()).await,
            Err(AlertError::InvalidRule(_))
        ));

        let now = Utc::now();
        feed(&store, "cpu", &[90.0, 90.0, 90.0], now).await;
        // 绕过 add_rule 直接评估也不会 panic
        assert!(matches!(
            engine.evaluate_rule(&huge, now).await,
            Err(AlertError::RuleEvaluation { .. })
        ));
        assert!(matches!(
            engine.evaluate_rule(&cpu_rule().with_window(u64::MAX, 1), now).await,
            Err(AlertError::RuleEvaluation { .. })
        ));
    }

    #[tokio::test]
    async fn test_rule_error_does_not_stop_others() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();
        // 所有样本时间戳相同，斜率拟合失败
        engine
            .add_rule(
                AlertRule::new(
                    "cpu_trend",
                    "cpu",
                    RuleCondition::TrendDegradation {
                        direction: crate::rule::DegradationDirection::Increasing,
                        min_r_squared: 0.5,
                    },
                )
                .with_window(5, 3),
            )
            .await
            .unwrap();

        let now = Utc::now();
        for value in [90.0, 91.0, 92.0] {
            store.record("cpu", value, now, HashMap::new()).await;
        }

        let summary = engine.evaluate_all_at(now).await;
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.fired, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_and_resolve() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();

        let now = Utc::now();
        feed(&store, "cpu", &[90.0, 90.0, 90.0], now).await;
        engine.evaluate_all_at(now).await;

        let alert_id = engine.list_active_alerts(None).await[0].id.clone();

        let acked = engine.acknowledge_at(&alert_id, "oncall", now).await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(engine.list_active_alerts(None).await.len(), 1);

        // 已确认的告警只刷新，不重复通知
        let outcome = engine
            .evaluate_rule(&cpu_rule(), now + Duration::seconds(1))
            .await
            .unwrap();
        assert!(matches!(outcome, FireOutcome::Refreshed { .. }));

        engine.resolve(&alert_id).await.unwrap();
        assert!(engine.list_active_alerts(None).await.is_empty());
        assert_eq!(engine.alert_history(10).await[0].id, alert_id);

        assert!(matches!(
            engine.resolve(&alert_id).await,
            Err(AlertError::InvalidTransition { .. })
        ));
        assert!(matches!(
            engine.acknowledge("missing", "oncall").await,
            Err(AlertError::AlertNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_acknowledge_and_resolve() {
        for _ in 0..20 {
            let (store, engine) = engine().await;
            engine.add_rule(cpu_rule()).await.unwrap();

            let now = Utc::now();
            feed(&store, "cpu", &[90.0, 90.0, 90.0], now).await;
            engine.evaluate_all_at(now).await;
            let alert_id = engine.list_active_alerts(None).await[0].id.clone();

            let engine = Arc::new(engine);
            let acker = {
                let engine = engine.clone();
                let alert_id = alert_id.clone();
                tokio::spawn(async move { engine.acknowledge(&alert_id, "oncall").await })
            };
            let resolver = {
                let engine = engine.clone();
                let alert_id = alert_id.clone();
                tokio::spawn(async move { engine.resolve(&alert_id).await })
            };
            let (acked, resolved) = tokio::join!(acker, resolver);

            let resolved = resolved.unwrap().unwrap();
            assert_eq!(resolved.status, AlertStatus::Resolved);
            match acked.unwrap() {
                // 确认先于解决
                Ok(alert) => {
                    assert_eq!(alert.status, AlertStatus::Acknowledged);
                    assert_eq!(resolved.acknowledged_by.as_deref(), Some("oncall"));
                }
                Err(e) => assert!(matches!(
                    e,
                    AlertError::InvalidTransition {
                        from: AlertStatus::Resolved,
                        ..
                    }
                )),
            }

            assert_eq!(engine.active_count().await, 0);
            let history = engine.alert_history(10).await;
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].id, alert_id);
            assert_eq!(history[0].status, AlertStatus::Resolved);
        }
    }

    #[tokio::test]
    async fn test_list_sorted_and_filtered() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();
        engine
            .add_rule(
                AlertRule::threshold("mem_high", "mem", Comparator::GreaterOrEqual, 90.0)
                    .with_severity(Severity::Critical),
            )
            .await
            .unwrap();
        engine
            .add_rule(
                AlertRule::threshold("cpu_warn", "cpu", Comparator::GreaterThan, 60.0)
                    .with_severity(Severity::Low),
            )
            .await
            .unwrap();

        let now = Utc::now();
        feed(&store, "cpu", &[90.0, 90.0, 90.0], now).await;
        feed(&store, "mem", &[95.0, 95.0, 95.0], now).await;
        engine.evaluate_all_at(now).await;

        let alerts = engine.list_active_alerts(None).await;
        let severities: Vec<Severity> = alerts.iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::High, Severity::Low]);

        let high = engine.list_active_alerts(Some(Severity::High)).await;
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].rule_id, "cpu_high");

        let stats = engine.statistics().await;
        assert_eq!(stats.active, 3);
        assert_eq!(stats.rules, 3);
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected() {
        let (_store, engine) = engine().await;
        let rule = AlertRule::threshold("", "cpu", Comparator::GreaterThan, 80.0);
        assert!(matches!(
            engine.add_rule(rule).await,
            Err(AlertError::InvalidRule(_))
        ));
        assert!(matches!(
            engine.remove_rule("missing").await,
            Err(AlertError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_history() {
        let (store, engine) = engine().await;
        engine.add_rule(cpu_rule()).await.unwrap();

        let now = Utc::now();
        feed(&store, "cpu", &[90.0, 90.0, 90.0], now).await;
        engine.evaluate_all_at(now).await;
        let alert_id = engine.list_active_alerts(None).await[0].id.clone();
        engine.resolve_at(&alert_id, now).await.unwrap();

        assert_eq!(engine.cleanup_at(now + Duration::hours(1)).await, 0);
        assert_eq!(engine.cleanup_at(now + Duration::hours(169)).await, 1);
        assert!(engine.alert_history(10).await.is_empty());
    }
}
