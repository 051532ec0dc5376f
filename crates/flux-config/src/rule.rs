use serde::{Deserialize, Serialize};

/// 配置文件中的告警规则定义
///
/// 字符串字段在转换为运行时规则时校验，未知取值会被拒绝。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub metric_name: String,
    /// threshold / trend_degradation / anomaly
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    /// 阈值规则的比较符：>, <, >=, <=, ==, !=
    #[serde(default)]
    pub comparator: Option<String>,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    /// 趋势规则方向：increasing / decreasing
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub min_r_squared: Option<f64>,
    #[serde(default)]
    pub z_threshold: Option<f64>,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_suppression_minutes")]
    pub suppression_minutes: u64,
    #[serde(default)]
    pub max_alerts_per_hour: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_severity() -> String {
    "medium".to_string()
}

fn default_window_minutes() -> u64 {
    5
}

fn default_min_samples() -> usize {
    3
}

fn default_suppression_minutes() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}
