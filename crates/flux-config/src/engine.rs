use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::rule::RuleConfig;

/// 引擎全局配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub regression: RegressionConfig,
    pub trend: TrendConfig,
    pub bottleneck: BottleneckConfig,
    pub alerting: AlertingConfig,
    pub logging: LoggingConfig,
    pub rules: Vec<RuleConfig>,
}

impl EngineConfig {
    /// 校验跨字段约束
    pub fn validate(&self) -> Result<()> {
        if self.store.capacity == 0 {
            return Err(ConfigError::invalid("store.capacity must be greater than 0"));
        }
        if self.store.collection_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "store.collection_interval_secs must be greater than 0",
            ));
        }

        self.regression.validate()?;
        self.trend.validate()?;
        self.bottleneck.validate()?;
        self.alerting.validate()?;

        Ok(())
    }
}

/// 指标存储配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 每个指标的环形缓冲区容量
    pub capacity: usize,
    /// 外部采集循环间隔（秒）
    pub collection_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            collection_interval_secs: 10,
        }
    }
}

/// 回归检测配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// 当前窗口长度（小时），更早的样本作为基线
    pub comparison_window_hours: u64,
    pub min_total_samples: usize,
    pub min_window_samples: usize,
    /// 显著性水平
    pub significance: f64,
    /// 孤立森林污染率
    pub contamination: f64,
    pub z_threshold: f64,
    pub isolation_trees: usize,
    pub isolation_seed: u64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            comparison_window_hours: 24,
            min_total_samples: 30,
            min_window_samples: 10,
            significance: 0.05,
            contamination: 0.1,
            z_threshold: 2.0,
            isolation_trees: 100,
            isolation_seed: 42,
        }
    }
}

impl RegressionConfig {
    fn validate(&self) -> Result<()> {
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(ConfigError::invalid(format!(
                "regression.significance must be in (0, 1), got {}",
                self.significance
            )));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ConfigError::invalid(format!(
                "regression.contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.min_window_samples < 2 {
            return Err(ConfigError::invalid(
                "regression.min_window_samples must be at least 2",
            ));
        }
        if self.min_total_samples < self.min_window_samples * 2 {
            return Err(ConfigError::invalid(
                "regression.min_total_samples must cover both windows",
            ));
        }
        if self.isolation_trees == 0 {
            return Err(ConfigError::invalid("regression.isolation_trees must be greater than 0"));
        }
        Ok(())
    }
}

/// 趋势分析配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrendConfig {
    pub interval_secs: u64,
    pub window_hours: u64,
    pub min_samples: usize,
    /// 斜率绝对值低于此值视为平稳（每秒）
    pub stable_slope: f64,
    pub anomaly_z: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            window_hours: 24,
            min_samples: 10,
            stable_slope: 0.001,
            anomaly_z: 2.0,
        }
    }
}

impl TrendConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 || self.window_hours == 0 {
            return Err(ConfigError::invalid(
                "trend.interval_secs and trend.window_hours must be greater than 0",
            ));
        }
        if self.min_samples < 3 {
            return Err(ConfigError::invalid("trend.min_samples must be at least 3"));
        }
        Ok(())
    }
}

/// 瓶颈分析配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BottleneckConfig {
    pub interval_secs: u64,
    pub buffer_size: usize,
    pub history_limit: usize,
    pub min_samples: usize,
    /// 参与 CPU/内存均值计算的最近样本数
    pub recent_samples: usize,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub percent_reference: f64,
    pub io_bytes_per_sec_threshold: f64,
    pub db_response_threshold_secs: f64,
    pub db_response_reference_secs: f64,
    pub queue_depth_threshold: f64,
    pub queue_depth_reference: f64,
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            buffer_size: 1000,
            history_limit: 1000,
            min_samples: 10,
            recent_samples: 50,
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            percent_reference: 100.0,
            io_bytes_per_sec_threshold: 100.0 * 1024.0 * 1024.0,
            db_response_threshold_secs: 1.0,
            db_response_reference_secs: 5.0,
            queue_depth_threshold: 100.0,
            queue_depth_reference: 1000.0,
        }
    }
}

impl BottleneckConfig {
    fn validate(&self) -> Result<()> {
        if self.buffer_size < self.min_samples {
            return Err(ConfigError::invalid(
                "bottleneck.buffer_size must be at least bottleneck.min_samples",
            ));
        }
        let ordered = [
            ("cpu", self.cpu_threshold, self.percent_reference),
            ("memory", self.memory_threshold, self.percent_reference),
            (
                "db_response",
                self.db_response_threshold_secs,
                self.db_response_reference_secs,
            ),
            ("queue_depth", self.queue_depth_threshold, self.queue_depth_reference),
        ];
        for (name, threshold, reference) in ordered {
            if threshold >= reference {
                return Err(ConfigError::invalid(format!(
                    "bottleneck {} threshold ({}) must be below its reference ({})",
                    name, threshold, reference
                )));
            }
        }
        Ok(())
    }
}

/// 告警配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub evaluation_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub history_limit: usize,
    pub history_retention_hours: u64,
    pub default_max_alerts_per_hour: u32,
    pub delivery_timeout_secs: u64,
    /// 趋势规则默认 r² 阈值
    pub trend_min_r_squared: f64,
    /// 异常规则默认 z 阈值
    pub anomaly_z_threshold: f64,
    /// 告警携带的趋势快照长度
    pub snapshot_size: usize,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            cleanup_interval_secs: 3600,
            history_limit: 1000,
            history_retention_hours: 24 * 7,
            default_max_alerts_per_hour: 10,
            delivery_timeout_secs: 10,
            trend_min_r_squared: 0.5,
            anomaly_z_threshold: 3.0,
            snapshot_size: 20,
        }
    }
}

impl AlertingConfig {
    fn validate(&self) -> Result<()> {
        if self.evaluation_interval_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "alerting intervals must be greater than 0",
            ));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::invalid("alerting.history_limit must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.trend_min_r_squared) {
            return Err(ConfigError::invalid(
                "alerting.trend_min_r_squared must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
