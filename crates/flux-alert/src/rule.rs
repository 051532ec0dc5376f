use crate::error::{AlertError, Result};
use crate::notifier::Channel;
use flux_analytics::stats;
use flux_analytics::{AnalyticsError, Severity};
use flux_config::{AlertingConfig, RuleConfig};
use flux_timeseries::MetricSample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 异常规则的参考区间排除最近的样本数
const ANOMALY_RECENT_EXCLUDED: usize = 5;
/// 参考区间最少样本数
const ANOMALY_MIN_REFERENCE: usize = 2;
/// 评估窗口上限（30 天）
pub const MAX_WINDOW_MINUTES: u64 = 30 * 24 * 60;
/// 抑制窗口上限（30 天）
pub const MAX_SUPPRESSION_MINUTES: u64 = 30 * 24 * 60;

/// 阈值比较符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparator {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThan => value > threshold,
            Comparator::LessThan => value < threshold,
            Comparator::GreaterOrEqual => value >= threshold,
            Comparator::LessOrEqual => value <= threshold,
            Comparator::Equal => (value - threshold).abs() < f64::EPSILON,
            Comparator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::LessThan => "<",
            Comparator::GreaterOrEqual => ">=",
            Comparator::LessOrEqual => "<=",
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
        }
    }
}

impl FromStr for Comparator {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" => Ok(Comparator::GreaterThan),
            "<" => Ok(Comparator::LessThan),
            ">=" => Ok(Comparator::GreaterOrEqual),
            "<=" => Ok(Comparator::LessOrEqual),
            "==" => Ok(Comparator::Equal),
            "!=" => Ok(Comparator::NotEqual),
            other => Err(AlertError::invalid_rule(format!(
                "unknown comparator: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 趋势规则关注的劣化方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradationDirection {
    Increasing,
    Decreasing,
}

impl FromStr for DegradationDirection {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "increasing" => Ok(DegradationDirection::Increasing),
            "decreasing" => Ok(DegradationDirection::Decreasing),
            other => Err(AlertError::invalid_rule(format!(
                "unknown trend direction: {}",
                other
            ))),
        }
    }
}

/// 条件评估结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionOutcome {
    pub holds: bool,
    /// 窗口内最新值
    pub latest: f64,
    /// 条件相关的观测量：阈值规则为最新值，趋势规则为斜率，异常规则为 z 分数
    pub observed: f64,
}

/// 规则条件，每种规则类型一个变体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    Threshold {
        comparator: Comparator,
        value: f64,
    },
    TrendDegradation {
        direction: DegradationDirection,
        min_r_squared: f64,
    },
    Anomaly {
        z_threshold: f64,
    },
}

impl RuleCondition {
    /// 对窗口内样本（旧到新）评估条件
    pub fn evaluate(&self, window: &[MetricSample]) -> flux_analytics::Result<ConditionOutcome> {
        let latest = window
            .last()
            .map(|s| s.value)
            .ok_or_else(|| AnalyticsError::insufficient(1, 0))?;

        match self {
            RuleCondition::Threshold { comparator, value } => Ok(ConditionOutcome {
                holds: comparator.apply(latest, *value),
                latest,
                observed: latest,
            }),
            RuleCondition::TrendDegradation {
                direction,
                min_r_squared,
            } => {
                let origin = window[0].timestamp;
                let xs: Vec<f64> = window
                    .iter()
                    .map(|s| (s.timestamp - origin).num_milliseconds() as f64 / 1000.0)
                    .collect();
                let ys: Vec<f64> = window.iter().map(|s| s.value).collect();
                let fit = stats::linear_regression(&xs, &ys)?;

                let degrading = match direction {
                    DegradationDirection::Increasing => fit.slope > 0.0,
                    DegradationDirection::Decreasing => fit.slope < 0.0,
                };

                Ok(ConditionOutcome {
                    holds: degrading && fit.r_squared > *min_r_squared,
                    latest,
                    observed: fit.slope,
                })
            }
            RuleCondition::Anomaly { z_threshold } => {
                let required = ANOMALY_RECENT_EXCLUDED + ANOMALY_MIN_REFERENCE;
                if window.len() < required {
                    return Err(AnalyticsError::insufficient(required, window.len()));
                }

                let reference: Vec<f64> = window[..window.len() - ANOMALY_RECENT_EXCLUDED]
                    .iter()
                    .map(|s| s.value)
                    .collect();
                let mean = stats::mean(&reference);
                let std_dev = stats::std_dev(&reference);

                let z = if std_dev > 0.0 {
                    (latest - mean) / std_dev
                } else if (latest - mean).abs() > f64::EPSILON {
                    // 参考区间为常数时，任何偏离都视为无穷大
                    f64::INFINITY.copysign(latest - mean)
                } else {
                    0.0
                };

                Ok(ConditionOutcome {
                    holds: z.abs() > *z_threshold,
                    latest,
                    observed: z,
                })
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RuleCondition::Threshold { .. } => "threshold",
            RuleCondition::TrendDegradation { .. } => "trend_degradation",
            RuleCondition::Anomaly { .. } => "anomaly",
        }
    }

    pub fn is_threshold(&self) -> bool {
        matches!(self, RuleCondition::Threshold { .. })
    }

    pub fn describe(&self, metric_name: &str) -> String {
        match self {
            RuleCondition::Threshold { comparator, value } => {
                format!("{} {} {}", metric_name, comparator, value)
            }
            RuleCondition::TrendDegradation {
                direction,
                min_r_squared,
            } => format!(
                "{} trending {:?} with r² > {}",
                metric_name, direction, min_r_squared
            ),
            RuleCondition::Anomaly { z_threshold } => {
                format!("{} |z| > {}", metric_name, z_threshold)
            }
        }
    }
}

/// 告警规则，添加后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub metric_name: String,
    pub condition: RuleCondition,
    pub severity: Severity,
    pub window_minutes: u64,
    pub min_samples: usize,
    pub channels: Vec<Channel>,
    pub suppression_minutes: u64,
    /// 每小时最多告警次数，None 使用引擎默认值
    pub max_alerts_per_hour: Option<u32>,
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        metric_name: impl Into<String>,
        condition: RuleCondition,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            metric_name: metric_name.into(),
            condition,
            severity: Severity::Medium,
            window_minutes: 5,
            min_samples: 3,
            channels: vec![Channel::Log],
            suppression_minutes: 30,
            max_alerts_per_hour: None,
            enabled: true,
        }
    }

    /// 阈值规则
    pub fn threshold(
        id: impl Into<String>,
        metric_name: impl Into<String>,
        comparator: Comparator,
        value: f64,
    ) -> Self {
        Self::new(id, metric_name, RuleCondition::Threshold { comparator, value })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_window(mut self, window_minutes: u64, min_samples: usize) -> Self {
        self.window_minutes = window_minutes;
        self.min_samples = min_samples;
        self
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_suppression_minutes(mut self, minutes: u64) -> Self {
        self.suppression_minutes = minutes;
        self
    }

    pub fn with_max_alerts_per_hour(mut self, max: u32) -> Self {
        self.max_alerts_per_hour = Some(max);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 校验规则配置
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AlertError::invalid_rule("rule id must not be empty"));
        }
        if self.metric_name.trim().is_empty() {
            return Err(AlertError::invalid_rule(format!(
                "rule {} has an empty metric name",
                self.id
            )));
        }
        if self.window_minutes == 0 {
            return Err(AlertError::invalid_rule(format!(
                "rule {} window_minutes must be greater than 0",
                self.id
            )));
        }
        if self.window_minutes > MAX_WINDOW_MINUTES {
            return Err(AlertError::invalid_rule(format!(
                "rule {} window_minutes must not exceed {}",
                self.id, MAX_WINDOW_MINUTES
            )));
        }
        if self.suppression_minutes > MAX_SUPPRESSION_MINUTES {
            return Err(AlertError::invalid_rule(format!(
                "rule {} suppression_minutes must not exceed {}",
                self.id, MAX_SUPPRESSION_MINUTES
            )));
        }
        if self.min_samples == 0 {
            return Err(AlertError::invalid_rule(format!(
                "rule {} min_samples must be greater than 0",
                self.id
            )));
        }
        if self.max_alerts_per_hour == Some(0) {
            return Err(AlertError::invalid_rule(format!(
                "rule {} max_alerts_per_hour must be greater than 0",
                self.id
            )));
        }

        match &self.condition {
            RuleCondition::Threshold { value, .. } => {
                if !value.is_finite() {
                    return Err(AlertError::invalid_rule(format!(
                        "rule {} threshold must be finite",
                        self.id
                    )));
                }
            }
            RuleCondition::TrendDegradation { min_r_squared, .. } => {
                if !(0.0..=1.0).contains(min_r_squared) {
                    return Err(AlertError::invalid_rule(format!(
                        "rule {} min_r_squared must be within [0, 1]",
                        self.id
                    )));
                }
                if self.min_samples < 3 {
                    return Err(AlertError::invalid_rule(format!(
                        "rule {} trend rules need min_samples >= 3",
                        self.id
                    )));
                }
            }
            RuleCondition::Anomaly { z_threshold } => {
                if !z_threshold.is_finite() || *z_threshold <= 0.0 {
                    return Err(AlertError::invalid_rule(format!(
                        "rule {} z_threshold must be positive",
                        self.id
                    )));
                }
                let required = ANOMALY_RECENT_EXCLUDED + ANOMALY_MIN_REFERENCE;
                if self.min_samples < required {
                    return Err(AlertError::invalid_rule(format!(
                        "rule {} anomaly rules need min_samples >= {}",
                        self.id, required
                    )));
                }
            }
        }

        Ok(())
    }

    /// 从配置定义构建规则，缺省参数取自告警配置
    pub fn from_config(config: &RuleConfig, defaults: &AlertingConfig) -> Result<Self> {
        let condition = match config.rule_type.to_ascii_lowercase().as_str() {
            "threshold" => {
                let comparator = config
                    .comparator
                    .as_deref()
                    .ok_or_else(|| {
                        AlertError::invalid_rule(format!(
                            "rule {} requires a comparator",
                            config.id
                        ))
                    })?
                    .parse()?;
                let value = config.threshold_value.ok_or_else(|| {
                    AlertError::invalid_rule(format!(
                        "rule {} requires threshold_value",
                        config.id
                    ))
                })?;
                RuleCondition::Threshold { comparator, value }
            }
            "trend_degradation" | "trend" => RuleCondition::TrendDegradation {
                direction: config
                    .direction
                    .as_deref()
                    .map(str::parse::<DegradationDirection>)
                    .transpose()?
                    .unwrap_or(DegradationDirection::Increasing),
                min_r_squared: config.min_r_squared.unwrap_or(defaults.trend_min_r_squared),
            },
            "anomaly" => RuleCondition::Anomaly {
                z_threshold: config.z_threshold.unwrap_or(defaults.anomaly_z_threshold),
            },
            other => {
                return Err(AlertError::invalid_rule(format!(
                    "unknown rule type: {}",
                    other
                )))
            }
        };

        let severity = config
            .severity
            .parse::<Severity>()
            .map_err(AlertError::InvalidRule)?;

        let channels = if config.channels.is_empty() {
            vec![Channel::Log]
        } else {
            config
                .channels
                .iter()
                .map(|c| c.parse())
                .collect::<Result<Vec<Channel>>>()?
        };

        let rule = Self {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            metric_name: config.metric_name.clone(),
            condition,
            severity,
            window_minutes: config.window_minutes,
            min_samples: config.min_samples,
            channels,
            suppression_minutes: config.suppression_minutes,
            max_alerts_per_hour: config.max_alerts_per_hour,
            enabled: config.enabled,
        };

        rule.validate()?;
        Ok(rule)
    }
}

impl TryFrom<RuleConfig> for AlertRule {
    type Error = AlertError;

    fn try_from(config: RuleConfig) -> Result<Self> {
        Self::from_config(&config, &AlertingConfig::default())
    }
}
