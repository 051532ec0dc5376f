use crate::error::{AlertError, Result};
use crate::notifier::Channel;
use crate::rule::AlertRule;
use chrono::{DateTime, Duration, Utc};
use flux_analytics::Severity;
use flux_timeseries::MetricSample;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 告警状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Suppressed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// 通知记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub channel: Channel,
    pub sent_at: DateTime<Utc>,
    pub outcome: DeliveryOutcome,
}

/// 告警实例，以 (rule_id, metric_name) 为键
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub metric_name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
    pub current_value: f64,
    /// 最近样本（旧到新）
    pub trend_snapshot: Vec<MetricSample>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 抑制窗口的起点
    pub last_notified_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notification_log: Vec<NotificationRecord>,
}

impl Alert {
    pub fn new(
        rule: &AlertRule,
        current_value: f64,
        trend_snapshot: Vec<MetricSample>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            metric_name: rule.metric_name.clone(),
            severity: rule.severity,
            status: AlertStatus::Active,
            message: format!(
                "{}: {} (value={:.2})",
                rule.name,
                rule.condition.describe(&rule.metric_name),
                current_value
            ),
            current_value,
            trend_snapshot,
            created_at: now,
            updated_at: now,
            last_notified_at: now,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            notification_log: Vec::new(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.rule_id.clone(), self.metric_name.clone())
    }

    pub fn is_open(&self) -> bool {
        self.status != AlertStatus::Resolved
    }

    /// 是否仍在抑制窗口内
    pub fn in_suppression_window(&self, suppression_minutes: u64, now: DateTime<Utc>) -> bool {
        i64::try_from(suppression_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|window| self.last_notified_at.checked_add_signed(window))
            .map_or(true, |until| now < until)
    }

    /// 刷新当前值与趋势快照
    pub fn refresh(&mut self, current_value: f64, trend_snapshot: Vec<MetricSample>, now: DateTime<Utc>) {
        self.current_value = current_value;
        self.trend_snapshot = trend_snapshot;
        self.updated_at = now;
    }

    pub fn suppress(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Suppressed;
        self.updated_at = now;
    }

    /// 抑制窗口结束后重新激活，抑制起点后移
    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Active;
        self.last_notified_at = now;
        self.updated_at = now;
    }

    pub fn acknowledge(&mut self, by: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            AlertStatus::Active | AlertStatus::Suppressed => {
                self.status = AlertStatus::Acknowledged;
                self.acknowledged_by = Some(by.into());
                self.acknowledged_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
            from => Err(AlertError::InvalidTransition {
                from,
                to: AlertStatus::Acknowledged,
            }),
        }
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidTransition {
                from: AlertStatus::Resolved,
                to: AlertStatus::Resolved,
            });
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn record_notifications(&mut self, records: Vec<NotificationRecord>) {
        self.notification_log.extend(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Comparator;

    fn alert() -> Alert {
        let rule = AlertRule::threshold("cpu_high", "cpu", Comparator::GreaterThan, 80.0);
        Alert::new(&rule, 95.0, Vec::new(), Utc::now())
    }

    #[test]
    fn test_lifecycle() {
        let mut alert = alert();
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(alert.message.contains("cpu > 80"));

        let now = Utc::now();
        alert.acknowledge("oncall", now).unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("oncall"));

        // 重复确认非法
        assert!(matches!(
            alert.acknowledge("oncall", now),
            Err(AlertError::InvalidTransition { .. })
        ));

        alert.resolve(now).unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert!(alert.resolved_at.is_some());
        assert!(alert.resolve(now).is_err());
        assert!(alert.acknowledge("oncall", now).is_err());
    }

    #[test]
    fn test_suppression_window() {
        let mut alert = alert();
        let created = alert.created_at;

        assert!(alert.in_suppression_window(30, created + Duration::minutes(29)));
        assert!(!alert.in_suppression_window(30, created + Duration::minutes(30)));

        alert.suppress(created + Duration::minutes(5));
        assert_eq!(alert.status, AlertStatus::Suppressed);

        alert.reactivate(created + Duration::minutes(31));
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(alert.in_suppression_window(30, created + Duration::minutes(40)));
    }

    #[test]
    fn test_suppression_window_saturates() {
        let alert = alert();
        let created = alert.created_at;

        assert!(alert.in_suppression_window(u64::MAX, created + Duration::days(3650)));
    }
}
