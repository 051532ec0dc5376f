use crate::isolation::IsolationForest;
use crate::stats::{self, LinearFit};
use chrono::{DateTime, Duration, Utc};
use flux_config::RegressionConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// 回归类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionType {
    GradualDegradation,
    SuddenSpike,
    Anomaly,
    TrendReversal,
}

impl RegressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegressionType::GradualDegradation => "gradual_degradation",
            RegressionType::SuddenSpike => "sudden_spike",
            RegressionType::Anomaly => "anomaly",
            RegressionType::TrendReversal => "trend_reversal",
        }
    }
}

/// 回归检测结果，每次检测新建，不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionResult {
    pub metric_name: String,
    pub detected: bool,
    pub regression_type: Option<RegressionType>,
    /// 置信度 [0, 1]
    pub confidence: f64,
    /// 严重度 [0, 1]
    pub severity: f64,
    pub baseline_mean: f64,
    pub current_mean: f64,
    pub degradation_pct: f64,
    pub p_value: f64,
    pub recommendations: Vec<String>,
    pub analysis_details: serde_json::Value,
    pub analyzed_at: DateTime<Utc>,
}

impl RegressionResult {
    fn insufficient(metric_name: &str, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            detected: false,
            regression_type: None,
            confidence: 0.0,
            severity: 0.0,
            baseline_mean: 0.0,
            current_mean: 0.0,
            degradation_pct: 0.0,
            p_value: 1.0,
            recommendations: vec![
                "Collect more samples before drawing conclusions about this metric".to_string(),
            ],
            analysis_details: json!({ "error": "Insufficient data" }),
            analyzed_at,
        }
    }
}

/// 变点检测结果
#[derive(Debug, Clone, Default)]
struct ChangePoints {
    positions: Vec<usize>,
}

/// 异常检测结果
#[derive(Debug, Clone, Default)]
struct AnomalyFindings {
    count: usize,
    share: f64,
    found: bool,
}

/// 趋势分析结果
#[derive(Debug, Clone, Copy)]
struct TrendFindings {
    fit: Option<LinearFit>,
    increasing: bool,
    reversal: bool,
}

/// 性能回归检测器
///
/// 将序列按 `now - comparison_window` 切分为基线窗口与当前窗口，
/// 组合显著性检验、变点检测、异常检测与趋势分析的结论。
/// 数值越大视为越差。
#[derive(Debug, Clone)]
pub struct RegressionDetector {
    config: RegressionConfig,
}

impl RegressionDetector {
    pub fn new(config: RegressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegressionConfig {
        &self.config
    }

    /// 以最新样本时间为 now 进行检测
    pub fn detect(&self, samples: &[(DateTime<Utc>, f64)], metric_name: &str) -> RegressionResult {
        let now = samples.iter().map(|(ts, _)| *ts).max().unwrap_or_else(Utc::now);
        self.detect_at(samples, metric_name, now)
    }

    /// 以指定时间为 now 进行检测
    pub fn detect_at(
        &self,
        samples: &[(DateTime<Utc>, f64)],
        metric_name: &str,
        now: DateTime<Utc>,
    ) -> RegressionResult {
        // 窗口超出可表示范围时全部样本归入当前窗口
        let split_at = i64::try_from(self.config.comparison_window_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.detect_split(samples, metric_name, split_at)
    }

    /// 在给定切分点检测：时间戳早于 split_at 的为基线，其余为当前窗口
    pub fn detect_split(
        &self,
        samples: &[(DateTime<Utc>, f64)],
        metric_name: &str,
        split_at: DateTime<Utc>,
    ) -> RegressionResult {
        let analyzed_at = Utc::now();

        if samples.len() < self.config.min_total_samples {
            debug!(
                metric = %metric_name,
                samples = samples.len(),
                required = self.config.min_total_samples,
                "Regression detection skipped: insufficient data"
            );
            return RegressionResult::insufficient(metric_name, analyzed_at);
        }

        let mut ordered = samples.to_vec();
        ordered.sort_by_key(|(ts, _)| *ts);

        let values: Vec<f64> = ordered.iter().map(|(_, v)| *v).collect();
        let baseline: Vec<f64> = ordered
            .iter()
            .filter(|(ts, _)| *ts < split_at)
            .map(|(_, v)| *v)
            .collect();
        let current: Vec<f64> = ordered
            .iter()
            .filter(|(ts, _)| *ts >= split_at)
            .map(|(_, v)| *v)
            .collect();

        let min_window = self.config.min_window_samples;
        if baseline.len() < min_window || current.len() < min_window {
            debug!(
                metric = %metric_name,
                baseline = baseline.len(),
                current = current.len(),
                required = min_window,
                "Regression detection skipped: window too small"
            );
            return RegressionResult::insufficient(metric_name, analyzed_at);
        }

        let baseline_mean = stats::mean(&baseline);
        let current_mean = stats::mean(&current);
        let degradation_pct = degradation_pct(baseline_mean, current_mean);

        // 1. 显著性检验
        let t_test = stats::welch_t_test(&baseline, &current).ok();
        let mann_whitney = stats::mann_whitney_u(&baseline, &current).ok();
        let effect_size = stats::cohens_d(&baseline, &current);

        let t_p = t_test.map(|t| t.p_value).unwrap_or(1.0);
        let mw_p = mann_whitney.map(|m| m.p_value).unwrap_or(1.0);
        // Mann-Whitney 仅作参考，显著性以 Welch 检验为准
        let significant = t_p < self.config.significance;

        // 2. 变点检测
        let change_points = detect_change_points(&values);

        // 3. 异常检测
        let anomalies = self.detect_anomalies(&values, &baseline, &current);

        // 4. 趋势分析
        let trend = self.analyze_trend(&values, &baseline);

        let mut detected = false;
        let mut confidence: f64 = 0.0;
        let mut regression_type = None;

        if significant && current_mean > baseline_mean {
            detected = true;
            confidence += 0.4;
        }

        if anomalies.found {
            detected = true;
            confidence += 0.2;
            if !trend.increasing {
                regression_type = Some(RegressionType::Anomaly);
            }
        }

        if trend.increasing {
            detected = true;
            confidence += 0.3;
            regression_type = Some(if trend.reversal {
                RegressionType::TrendReversal
            } else {
                RegressionType::GradualDegradation
            });
        }

        if !change_points.positions.is_empty() {
            confidence += 0.1;
            if detected && regression_type.is_none() {
                regression_type = Some(RegressionType::SuddenSpike);
            }
        }

        if detected && regression_type.is_none() {
            regression_type = Some(RegressionType::GradualDegradation);
        }

        let confidence = confidence.clamp(0.0, 1.0);
        let severity = if detected {
            severity_score(degradation_pct)
        } else {
            0.0
        };

        let analysis_details = json!({
            "baseline_samples": baseline.len(),
            "current_samples": current.len(),
            "t_test": t_test.map(|t| json!({ "t": finite_or_null(t.t), "df": t.df, "p_value": t.p_value })),
            "mann_whitney": mann_whitney.map(|m| json!({ "u": m.u, "z": m.z, "p_value": m.p_value })),
            "welch_p_value": t_p,
            "mann_whitney_p_value": mw_p,
            "cohens_d": effect_size,
            "significant": significant,
            "change_points": change_points.positions,
            "anomaly_count": anomalies.count,
            "anomaly_share": anomalies.share,
            "trend": trend.fit.map(|fit| json!({
                "slope": fit.slope,
                "r_squared": fit.r_squared,
                "p_value": fit.slope_p_value,
            })),
            "trend_increasing": trend.increasing,
        });

        let recommendations = recommendations(detected, regression_type, severity);

        if detected {
            debug!(
                metric = %metric_name,
                regression_type = ?regression_type,
                confidence = confidence,
                degradation_pct = degradation_pct,
                "Performance regression detected"
            );
        }

        RegressionResult {
            metric_name: metric_name.to_string(),
            detected,
            regression_type,
            confidence,
            severity,
            baseline_mean,
            current_mean,
            degradation_pct,
            p_value: t_p,
            recommendations,
            analysis_details,
            analyzed_at,
        }
    }

    fn detect_anomalies(&self, values: &[f64], baseline: &[f64], current: &[f64]) -> AnomalyFindings {
        let forest = IsolationForest::fit(
            values,
            self.config.isolation_trees,
            self.config.isolation_seed,
        );
        let scores = forest.scores(values);
        let cutoff = stats::quantile(&scores, 1.0 - self.config.contamination);

        let baseline_mean = stats::mean(baseline);
        let baseline_std = stats::std_dev(baseline);

        let count = current
            .iter()
            .filter(|v| {
                let isolated = forest.score(**v) >= cutoff;
                let z = if baseline_std > 0.0 {
                    (**v - baseline_mean) / baseline_std
                } else if **v != baseline_mean {
                    f64::INFINITY
                } else {
                    0.0
                };
                isolated && z.abs() > self.config.z_threshold
            })
            .count();

        let share = if current.is_empty() {
            0.0
        } else {
            count as f64 / current.len() as f64
        };

        AnomalyFindings {
            count,
            share,
            found: share > self.config.contamination,
        }
    }

    fn analyze_trend(&self, values: &[f64], baseline: &[f64]) -> TrendFindings {
        let fit = stats::linear_regression_indexed(values).ok();
        let increasing = fit
            .map(|f| f.slope > 0.0 && f.slope_p_value < self.config.significance)
            .unwrap_or(false);

        let reversal = increasing
            && stats::linear_regression_indexed(baseline)
                .map(|f| f.slope < 0.0 && f.slope_p_value < self.config.significance)
                .unwrap_or(false);

        TrendFindings {
            fit,
            increasing,
            reversal,
        }
    }
}

impl Default for RegressionDetector {
    fn default() -> Self {
        Self::new(RegressionConfig::default())
    }
}

/// CUSUM 变点检测
///
/// 对去均值序列求累积和，窗口 w = max(5, n/10)。位置 i 处比较前后两个窗口内
/// 累积和的平均斜率 `(cusum[i] - cusum[i-w]) / w` 与 `(cusum[i+w] - cusum[i]) / w`，
/// 两者之差超过两个窗口去均值样本合并标准差的 2 倍即为变点；命中后跳过一个窗口。
fn detect_change_points(values: &[f64]) -> ChangePoints {
    let n = values.len();
    let window = (n / 10).max(5);
    if n < window * 2 {
        return ChangePoints::default();
    }

    let m = stats::mean(values);
    let centered: Vec<f64> = values.iter().map(|v| v - m).collect();

    // cusum[k] = 前 k 个去均值样本之和
    let mut cusum = Vec::with_capacity(n + 1);
    cusum.push(0.0);
    let mut acc = 0.0;
    for v in &centered {
        acc += v;
        cusum.push(acc);
    }

    let w = window as f64;
    let mut positions = Vec::new();
    let mut i = window;
    while i + window <= n {
        let before = (cusum[i] - cusum[i - window]) / w;
        let after = (cusum[i + window] - cusum[i]) / w;

        let pooled = ((stats::variance(&centered[i - window..i])
            + stats::variance(&centered[i..i + window]))
            / 2.0)
            .sqrt();
        let threshold = (2.0 * pooled).max(f64::EPSILON * m.abs().max(1.0));

        if (after - before).abs() > threshold {
            positions.push(i);
            i += window;
        } else {
            i += 1;
        }
    }

    ChangePoints { positions }
}

fn degradation_pct(baseline_mean: f64, current_mean: f64) -> f64 {
    if baseline_mean.abs() < f64::EPSILON {
        return 0.0;
    }
    (current_mean - baseline_mean) / baseline_mean * 100.0
}

/// |degradation_pct| 映射为严重度
fn severity_score(degradation_pct: f64) -> f64 {
    let pct = degradation_pct.abs();
    if pct > 50.0 {
        1.0
    } else if pct > 25.0 {
        0.7
    } else if pct > 10.0 {
        0.4
    } else {
        0.2
    }
}

fn finite_or_null(value: f64) -> serde_json::Value {
    if value.is_finite() {
        json!(value)
    } else {
        serde_json::Value::Null
    }
}

fn recommendations(
    detected: bool,
    regression_type: Option<RegressionType>,
    severity: f64,
) -> Vec<String> {
    if !detected {
        return vec!["No significant regression detected; no action required".to_string()];
    }

    let mut items: Vec<String> = match regression_type {
        Some(RegressionType::SuddenSpike) => vec![
            "Investigate recent deployments and configuration changes".to_string(),
            "Check for traffic surges or upstream dependency incidents".to_string(),
        ],
        Some(RegressionType::GradualDegradation) => vec![
            "Review long-term trends for resource growth or leaks".to_string(),
            "Plan capacity and profile hot paths".to_string(),
        ],
        Some(RegressionType::TrendReversal) => vec![
            "Identify the change that reversed the previous improvement".to_string(),
            "Review long-term trends since the reversal point".to_string(),
        ],
        Some(RegressionType::Anomaly) => vec![
            "Inspect outlier samples for transient failures".to_string(),
            "Correlate anomalies with logs and error rates".to_string(),
        ],
        None => Vec::new(),
    };

    if severity >= 0.7 {
        items.push("Escalate to the on-call owner of this metric".to_string());
    }

    items
}
