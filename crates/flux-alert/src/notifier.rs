use crate::alert::{Alert, DeliveryOutcome, NotificationRecord};
use crate::error::AlertError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Slack,
    Webhook,
    Log,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Email, Channel::Slack, Channel::Webhook, Channel::Log];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Slack => "slack",
            Channel::Webhook => "webhook",
            Channel::Log => "log",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "slack" => Ok(Channel::Slack),
            "webhook" => Ok(Channel::Webhook),
            "log" => Ok(Channel::Log),
            other => Err(AlertError::invalid_rule(format!("unknown channel: {}", other))),
        }
    }
}

/// 通知错误
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Delivery timed out")]
    Timeout,

    #[error("No notifier configured for channel {0}")]
    ChannelNotConfigured(Channel),
}

/// 通知渠道接口，由外部实现具体投递（SMTP、Slack、Webhook 等）
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &Channel, alert: &Alert) -> Result<(), NotifierError>;
    fn name(&self) -> &str;
}

/// 通过 tracing 输出告警的通知器
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, channel: &Channel, alert: &Alert) -> Result<(), NotifierError> {
        warn!(
            channel = %channel,
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            metric = %alert.metric_name,
            severity = %alert.severity,
            status = %alert.status,
            value = alert.current_value,
            "{}",
            alert.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// 通知分发器
///
/// 按渠道逐个投递，单个渠道失败不影响其他渠道，不自动重试。
/// 每个渠道都会产生一条投递记录。
pub struct NotificationDispatcher {
    notifiers: RwLock<HashMap<Channel, Arc<dyn Notifier>>>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            notifiers: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// 注册渠道的通知器，已存在则替换
    pub async fn register(&self, channel: Channel, notifier: Arc<dyn Notifier>) {
        let mut notifiers = self.notifiers.write().await;
        info!(channel = %channel, notifier = notifier.name(), "Registered notifier");
        notifiers.insert(channel, notifier);
    }

    pub async fn unregister(&self, channel: Channel) -> bool {
        let mut notifiers = self.notifiers.write().await;
        notifiers.remove(&channel).is_some()
    }

    pub async fn channels(&self) -> Vec<Channel> {
        let notifiers = self.notifiers.read().await;
        notifiers.keys().copied().collect()
    }

    /// 投递告警到指定渠道，返回每个渠道的投递记录
    pub async fn send(&self, alert: &Alert, channels: &[Channel]) -> Vec<NotificationRecord> {
        let mut records = Vec::with_capacity(channels.len());

        for channel in channels {
            let notifier = {
                let notifiers = self.notifiers.read().await;
                notifiers.get(channel).cloned()
            };

            let result = match notifier {
                Some(notifier) => {
                    match tokio::time::timeout(self.timeout, notifier.send(channel, alert)).await {
                        Ok(result) => result,
                        Err(_) => Err(NotifierError::Timeout),
                    }
                }
                None => Err(NotifierError::ChannelNotConfigured(*channel)),
            };

            let outcome = match result {
                Ok(()) => {
                    info!(channel = %channel, alert_id = %alert.id, "Notification sent");
                    DeliveryOutcome::Delivered
                }
                Err(e) => {
                    error!(
                        channel = %channel,
                        alert_id = %alert.id,
                        error = %e,
                        "Failed to send notification"
                    );
                    DeliveryOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            records.push(NotificationRecord {
                channel: *channel,
                sent_at: Utc::now(),
                outcome,
            });
        }

        records
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
