use crate::stats;
use chrono::{DateTime, Duration, Utc};
use flux_config::TrendConfig;
use flux_timeseries::MetricStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const FORECAST_HORIZON_SECS: f64 = 86_400.0;

/// 趋势方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// 趋势分析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub metric_name: String,
    pub direction: TrendDirection,
    /// |r²|
    pub strength: f64,
    /// 每秒变化量
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub forecast_24h: f64,
    pub confidence_interval: (f64, f64),
    pub anomaly_count: usize,
    pub sample_count: usize,
    pub window_hours: u64,
    pub analyzed_at: DateTime<Utc>,
}

/// 趋势分析器
///
/// 对窗口内样本做值对经过秒数的最小二乘拟合，外推 24 小时并统计 z 分数异常。
/// 最新结果按指标名缓存，覆盖旧结果。
pub struct TrendAnalyzer {
    store: Arc<MetricStore>,
    config: TrendConfig,
    cache: RwLock<HashMap<String, TrendAnalysis>>,
}

impl TrendAnalyzer {
    pub fn new(store: Arc<MetricStore>, config: TrendConfig) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// 分析最近 window_hours 小时的数据，样本不足返回 None
    pub async fn analyze(&self, metric_name: &str, window_hours: u64) -> Option<TrendAnalysis> {
        self.analyze_at(metric_name, window_hours, Utc::now()).await
    }

    pub async fn analyze_at(
        &self,
        metric_name: &str,
        window_hours: u64,
        now: DateTime<Utc>,
    ) -> Option<TrendAnalysis> {
        let Some(since) = i64::try_from(window_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|window| now.checked_sub_signed(window))
        else {
            warn!(metric = %metric_name, window_hours = window_hours, "Trend window out of range");
            return None;
        };
        let samples: Vec<(DateTime<Utc>, f64)> = self
            .store
            .query_range(metric_name, since, now)
            .await
            .into_iter()
            .map(|s| (s.timestamp, s.value))
            .collect();

        let analysis = self.analyze_samples(metric_name, &samples, window_hours)?;

        let mut cache = self.cache.write().await;
        cache.insert(metric_name.to_string(), analysis.clone());

        Some(analysis)
    }

    /// 纯计算：对给定样本做趋势分析，不读写缓存
    pub fn analyze_samples(
        &self,
        metric_name: &str,
        samples: &[(DateTime<Utc>, f64)],
        window_hours: u64,
    ) -> Option<TrendAnalysis> {
        if samples.len() < self.config.min_samples {
            debug!(
                metric = %metric_name,
                samples = samples.len(),
                required = self.config.min_samples,
                "Trend analysis skipped: insufficient data"
            );
            return None;
        }

        let mut ordered = samples.to_vec();
        ordered.sort_by_key(|(ts, _)| *ts);

        let origin = ordered[0].0;
        let xs: Vec<f64> = ordered
            .iter()
            .map(|(ts, _)| (*ts - origin).num_milliseconds() as f64 / 1000.0)
            .collect();
        let ys: Vec<f64> = ordered.iter().map(|(_, v)| *v).collect();

        let fit = match stats::linear_regression(&xs, &ys) {
            Ok(fit) => fit,
            Err(e) => {
                debug!(metric = %metric_name, error = %e, "Trend fit failed");
                return None;
            }
        };

        let direction = if fit.slope.abs() < self.config.stable_slope {
            TrendDirection::Stable
        } else if fit.slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let last_x = xs.last().copied().unwrap_or(0.0);
        let forecast_24h = fit.predict(last_x + FORECAST_HORIZON_SECS);
        let margin = 2.0 * fit.residual_std_error;

        let anomaly_count = stats::z_scores(&ys)
            .iter()
            .filter(|z| z.abs() > self.config.anomaly_z)
            .count();

        Some(TrendAnalysis {
            metric_name: metric_name.to_string(),
            direction,
            strength: fit.r_squared.abs(),
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            forecast_24h,
            confidence_interval: (forecast_24h - margin, forecast_24h + margin),
            anomaly_count,
            sample_count: ys.len(),
            window_hours,
            analyzed_at: Utc::now(),
        })
    }

    /// 最近一次缓存的分析结果
    pub async fn cached(&self, metric_name: &str) -> Option<TrendAnalysis> {
        let cache = self.cache.read().await;
        cache.get(metric_name).cloned()
    }

    pub async fn cached_all(&self) -> Vec<TrendAnalysis> {
        let cache = self.cache.read().await;
        cache.values().cloned().collect()
    }

    /// 分析所有已跟踪的指标，返回成功分析的数量
    pub async fn run_cycle(&self) -> usize {
        let names = self.store.names().await;
        let mut analyzed = 0;

        for name in names {
            if let Some(analysis) = self.analyze(&name, self.config.window_hours).await {
                if analysis.direction == TrendDirection::Increasing && analysis.strength > 0.8 {
                    warn!(
                        metric = %name,
                        slope = analysis.slope,
                        r_squared = analysis.r_squared,
                        "Strong increasing trend"
                    );
                }
                analyzed += 1;
            }
        }

        info!(analyzed = analyzed, "Trend analysis cycle completed");
        analyzed
    }
}
