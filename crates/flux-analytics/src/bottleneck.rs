use crate::model::Severity;
use crate::regression::{RegressionDetector, RegressionResult};
use crate::stats;
use chrono::{DateTime, Utc};
use flux_config::BottleneckConfig;
use flux_timeseries::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 组件指标快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMetrics {
    pub component: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// 累计读取字节数
    #[serde(default)]
    pub disk_read_bytes: Option<u64>,
    /// 累计写入字节数
    #[serde(default)]
    pub disk_write_bytes: Option<u64>,
    #[serde(default)]
    pub response_time_secs: Option<f64>,
    #[serde(default)]
    pub queue_depth: Option<f64>,
}

impl ComponentMetrics {
    pub fn new(component: impl Into<String>, cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            component: component.into(),
            timestamp: Utc::now(),
            cpu_percent,
            memory_percent,
            disk_read_bytes: None,
            disk_write_bytes: None,
            response_time_secs: None,
            queue_depth: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_disk_bytes(mut self, read: u64, write: u64) -> Self {
        self.disk_read_bytes = Some(read);
        self.disk_write_bytes = Some(write);
        self
    }

    pub fn with_response_time(mut self, secs: f64) -> Self {
        self.response_time_secs = Some(secs);
        self
    }

    pub fn with_queue_depth(mut self, depth: f64) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    fn disk_total(&self) -> Option<u64> {
        match (self.disk_read_bytes, self.disk_write_bytes) {
            (None, None) => None,
            (read, write) => Some(read.unwrap_or(0).saturating_add(write.unwrap_or(0))),
        }
    }
}

/// 瓶颈类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckType {
    Cpu,
    Memory,
    Io,
    Network,
    Database,
    LockContention,
    QueueBacklog,
    ResourceExhaustion,
}

/// 单条瓶颈诊断
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckAnalysis {
    pub id: String,
    pub component: String,
    pub bottleneck_type: BottleneckType,
    pub severity: Severity,
    pub confidence: f64,
    /// 对系统健康的影响 [0, 1]
    pub impact_score: f64,
    pub description: String,
    pub root_cause: String,
    pub suggested_fixes: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// 组件性能走势
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTrend {
    Degrading,
    Improving,
    Stable,
    InsufficientData,
}

/// 系统瓶颈报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBottleneckReport {
    pub generated_at: DateTime<Utc>,
    /// 0 ~ 100
    pub system_health_score: f64,
    pub component_count: usize,
    /// 按 impact_score 降序
    pub bottlenecks: Vec<BottleneckAnalysis>,
    pub performance_trends: HashMap<String, PerformanceTrend>,
    pub regressions: Vec<RegressionResult>,
    pub recommendations: Vec<String>,
}

/// 单个指标的超阈值检查结果
struct Exceedance {
    mean: f64,
    ratio: f64,
    share_above: f64,
}

/// 瓶颈分析器
///
/// 每个组件维护一个滚动缓冲区，至少 min_samples 个样本后才分析。
/// 各类瓶颈独立判断，同一组件可同时报告多种瓶颈。
pub struct BottleneckAnalyzer {
    config: BottleneckConfig,
    detector: RegressionDetector,
    buffers: RwLock<HashMap<String, RingBuffer<ComponentMetrics>>>,
    history: RwLock<Vec<BottleneckAnalysis>>,
}

impl BottleneckAnalyzer {
    pub fn new(config: BottleneckConfig, detector: RegressionDetector) -> Self {
        Self {
            config,
            detector,
            buffers: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BottleneckConfig {
        &self.config
    }

    /// 记录组件指标
    pub async fn record(&self, metrics: ComponentMetrics) {
        let mut buffers = self.buffers.write().await;
        let capacity = self.config.buffer_size;
        buffers
            .entry(metrics.component.clone())
            .or_insert_with(|| RingBuffer::with_capacity(capacity))
            .push(metrics);
    }

    /// 当前跟踪的组件
    pub async fn components(&self) -> Vec<String> {
        let buffers = self.buffers.read().await;
        let mut names: Vec<String> = buffers.keys().cloned().collect();
        names.sort();
        names
    }

    /// 分析单个组件，样本不足时返回空
    pub async fn analyze_component(&self, component: &str) -> Vec<BottleneckAnalysis> {
        let samples = self.snapshot(component).await;
        self.analyze_samples(component, &samples)
    }

    /// 纯计算：对给定样本诊断瓶颈
    pub fn analyze_samples(
        &self,
        component: &str,
        samples: &[ComponentMetrics],
    ) -> Vec<BottleneckAnalysis> {
        if samples.len() < self.config.min_samples {
            debug!(
                component = %component,
                samples = samples.len(),
                required = self.config.min_samples,
                "Bottleneck analysis skipped: insufficient data"
            );
            return Vec::new();
        }

        let start = samples.len().saturating_sub(self.config.recent_samples);
        let recent = &samples[start..];

        let mut findings = Vec::new();

        if let Some(finding) = self.check_cpu(component, recent) {
            findings.push(finding);
        }
        if let Some(finding) = self.check_memory(component, recent) {
            findings.push(finding);
        }
        if let Some(finding) = self.check_io(component, recent) {
            findings.push(finding);
        }
        if is_database_component(component) {
            if let Some(finding) = self.check_database(component, recent) {
                findings.push(finding);
            }
        }
        if let Some(finding) = self.check_queue(component, recent) {
            findings.push(finding);
        }

        findings
    }

    /// 分析所有组件并追加到历史，返回本轮发现
    pub async fn run_cycle(&self) -> Vec<BottleneckAnalysis> {
        let mut findings = Vec::new();
        for component in self.components().await {
            findings.extend(self.analyze_component(&component).await);
        }

        for finding in &findings {
            if finding.severity >= Severity::High {
                warn!(
                    component = %finding.component,
                    bottleneck = ?finding.bottleneck_type,
                    severity = %finding.severity,
                    impact = finding.impact_score,
                    "Bottleneck detected"
                );
            }
        }

        let mut history = self.history.write().await;
        history.extend(findings.iter().cloned());
        if history.len() > self.config.history_limit {
            let excess = history.len() - self.config.history_limit;
            history.drain(..excess);
        }

        info!(findings = findings.len(), "Bottleneck analysis cycle completed");
        findings
    }

    /// 最近的历史诊断（旧到新）
    pub async fn history(&self, limit: usize) -> Vec<BottleneckAnalysis> {
        let history = self.history.read().await;
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    /// 汇总所有组件生成系统报告
    pub async fn generate_system_report(&self) -> SystemBottleneckReport {
        let components = self.components().await;

        let mut bottlenecks = Vec::new();
        let mut performance_trends = HashMap::new();
        let mut regressions = Vec::new();

        for component in &components {
            let samples = self.snapshot(component).await;

            bottlenecks.extend(self.analyze_samples(component, &samples));
            performance_trends.insert(component.clone(), performance_trend(&samples));

            if let Some(result) = self.response_time_regression(component, &samples) {
                regressions.push(result);
            }
        }

        bottlenecks.sort_by(|a, b| b.impact_score.total_cmp(&a.impact_score));

        let system_health_score = health_score(&bottlenecks);
        let recommendations = report_recommendations(&bottlenecks, &regressions);

        SystemBottleneckReport {
            generated_at: Utc::now(),
            system_health_score,
            component_count: components.len(),
            bottlenecks,
            performance_trends,
            regressions,
            recommendations,
        }
    }

    async fn snapshot(&self, component: &str) -> Vec<ComponentMetrics> {
        let buffers = self.buffers.read().await;
        buffers
            .get(component)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check_cpu(&self, component: &str, recent: &[ComponentMetrics]) -> Option<BottleneckAnalysis> {
        let values: Vec<f64> = recent.iter().map(|m| m.cpu_percent).collect();
        let exceed = exceedance(
            &values,
            self.config.cpu_threshold,
            self.config.percent_reference,
        )?;

        Some(self.finding(
            component,
            BottleneckType::Cpu,
            &exceed,
            format!(
                "CPU usage averaged {:.1}% over the last {} samples (threshold {:.0}%)",
                exceed.mean,
                values.len(),
                self.config.cpu_threshold
            ),
            "Compute-bound workload saturating available CPU".to_string(),
            vec![
                "Profile hot code paths and optimise expensive computations".to_string(),
                "Scale out horizontally or add CPU capacity".to_string(),
                "Move batch work off the request path".to_string(),
            ],
        ))
    }

    fn check_memory(&self, component: &str, recent: &[ComponentMetrics]) -> Option<BottleneckAnalysis> {
        let values: Vec<f64> = recent.iter().map(|m| m.memory_percent).collect();
        let exceed = exceedance(
            &values,
            self.config.memory_threshold,
            self.config.percent_reference,
        )?;

        Some(self.finding(
            component,
            BottleneckType::Memory,
            &exceed,
            format!(
                "Memory usage averaged {:.1}% (threshold {:.0}%)",
                exceed.mean, self.config.memory_threshold
            ),
            "Working set close to available memory, possible leak or oversized caches".to_string(),
            vec![
                "Check for memory leaks and unbounded caches".to_string(),
                "Tune cache sizes and object lifetimes".to_string(),
                "Increase memory allocation for this component".to_string(),
            ],
        ))
    }

    fn check_io(&self, component: &str, recent: &[ComponentMetrics]) -> Option<BottleneckAnalysis> {
        let rates = disk_rates(recent);
        if rates.is_empty() {
            return None;
        }

        let threshold = self.config.io_bytes_per_sec_threshold;
        let mean_rate = stats::mean(&rates);
        if mean_rate <= threshold {
            return None;
        }

        let share_above = rates.iter().filter(|r| **r > threshold).count() as f64 / rates.len() as f64;
        let impact = (mean_rate / threshold - 1.0).clamp(0.1, 1.0);

        Some(BottleneckAnalysis {
            id: Uuid::new_v4().to_string(),
            component: component.to_string(),
            bottleneck_type: BottleneckType::Io,
            severity: Severity::Medium,
            confidence: 0.6 + 0.4 * share_above,
            impact_score: impact,
            description: format!(
                "Disk throughput averaged {:.1} MB/s (threshold {:.1} MB/s)",
                mean_rate / 1_048_576.0,
                threshold / 1_048_576.0
            ),
            root_cause: "Sustained disk I/O saturating storage bandwidth".to_string(),
            suggested_fixes: vec![
                "Batch or buffer writes".to_string(),
                "Move hot data to faster storage or an in-memory cache".to_string(),
                "Review logging and temporary file volume".to_string(),
            ],
            detected_at: Utc::now(),
        })
    }

    fn check_database(&self, component: &str, recent: &[ComponentMetrics]) -> Option<BottleneckAnalysis> {
        let values: Vec<f64> = recent.iter().filter_map(|m| m.response_time_secs).collect();
        let exceed = exceedance(
            &values,
            self.config.db_response_threshold_secs,
            self.config.db_response_reference_secs,
        )?;

        Some(self.finding(
            component,
            BottleneckType::Database,
            &exceed,
            format!(
                "Database response time averaged {:.2}s (threshold {:.2}s)",
                exceed.mean, self.config.db_response_threshold_secs
            ),
            "Slow queries or connection pool exhaustion".to_string(),
            vec![
                "Inspect slow query logs and add missing indexes".to_string(),
                "Tune connection pool size".to_string(),
                "Cache frequently read results".to_string(),
            ],
        ))
    }

    fn check_queue(&self, component: &str, recent: &[ComponentMetrics]) -> Option<BottleneckAnalysis> {
        let values: Vec<f64> = recent.iter().filter_map(|m| m.queue_depth).collect();
        let exceed = exceedance(
            &values,
            self.config.queue_depth_threshold,
            self.config.queue_depth_reference,
        )?;

        Some(self.finding(
            component,
            BottleneckType::QueueBacklog,
            &exceed,
            format!(
                "Queue depth averaged {:.0} (threshold {:.0})",
                exceed.mean, self.config.queue_depth_threshold
            ),
            "Consumers cannot keep up with the incoming rate".to_string(),
            vec![
                "Add consumers or increase worker concurrency".to_string(),
                "Apply backpressure or rate limiting upstream".to_string(),
            ],
        ))
    }

    fn finding(
        &self,
        component: &str,
        bottleneck_type: BottleneckType,
        exceed: &Exceedance,
        description: String,
        root_cause: String,
        suggested_fixes: Vec<String>,
    ) -> BottleneckAnalysis {
        BottleneckAnalysis {
            id: Uuid::new_v4().to_string(),
            component: component.to_string(),
            bottleneck_type,
            severity: Severity::from_exceedance(exceed.ratio),
            confidence: 0.6 + 0.4 * exceed.share_above,
            impact_score: exceed.ratio.max(0.1),
            description,
            root_cause,
            suggested_fixes,
            detected_at: Utc::now(),
        }
    }

    /// 响应时间序列在缓冲区时间中点处切分做回归检测，仅返回检测到的结果
    fn response_time_regression(
        &self,
        component: &str,
        samples: &[ComponentMetrics],
    ) -> Option<RegressionResult> {
        let series: Vec<(DateTime<Utc>, f64)> = samples
            .iter()
            .filter_map(|m| m.response_time_secs.map(|v| (m.timestamp, v)))
            .collect();

        let first = series.iter().map(|(ts, _)| *ts).min()?;
        let last = series.iter().map(|(ts, _)| *ts).max()?;
        let midpoint = first + (last - first) / 2;

        let metric_name = format!("{}.response_time", component);
        let result = self.detector.detect_split(&series, &metric_name, midpoint);
        result.detected.then_some(result)
    }
}

/// 均值超过阈值时返回超出比例 r = (mean - threshold) / (reference - threshold)
fn exceedance(values: &[f64], threshold: f64, reference: f64) -> Option<Exceedance> {
    if values.is_empty() {
        return None;
    }

    let mean = stats::mean(values);
    if mean <= threshold {
        return None;
    }

    let span = reference - threshold;
    let ratio = if span > 0.0 {
        ((mean - threshold) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let share_above = values.iter().filter(|v| **v > threshold).count() as f64 / values.len() as f64;

    Some(Exceedance {
        mean,
        ratio,
        share_above,
    })
}

/// 相邻样本之间的磁盘吞吐（字节/秒），跳过非正时间差与计数器回绕
fn disk_rates(samples: &[ComponentMetrics]) -> Vec<f64> {
    samples
        .windows(2)
        .filter_map(|pair| {
            let (prev, next) = (&pair[0], &pair[1]);
            let dt = (next.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
            if dt <= 0.0 {
                return None;
            }
            let (before, after) = (prev.disk_total()?, next.disk_total()?);
            if after < before {
                return None;
            }
            Some((after - before) as f64 / dt)
        })
        .collect()
}

fn is_database_component(component: &str) -> bool {
    let name = component.to_ascii_lowercase();
    name.contains("database") || name.contains("db")
}

/// 100 − Σ(weight·impact) / (count·max_weight) · 100
fn health_score(bottlenecks: &[BottleneckAnalysis]) -> f64 {
    if bottlenecks.is_empty() {
        return 100.0;
    }

    let weighted: f64 = bottlenecks
        .iter()
        .map(|b| b.severity.weight() * b.impact_score)
        .sum();
    let max_total = bottlenecks.len() as f64 * Severity::MAX_WEIGHT;

    (100.0 - weighted / max_total * 100.0).clamp(0.0, 100.0)
}

/// 前半段与后半段平均响应时间比较，变化超过 20% 视为劣化或改善
fn performance_trend(samples: &[ComponentMetrics]) -> PerformanceTrend {
    let values: Vec<f64> = samples.iter().filter_map(|m| m.response_time_secs).collect();
    if values.len() < 2 {
        return PerformanceTrend::InsufficientData;
    }

    let mid = values.len() / 2;
    let first = stats::mean(&values[..mid]);
    let second = stats::mean(&values[mid..]);

    if first <= 0.0 {
        return PerformanceTrend::Stable;
    }

    let change = (second - first) / first;
    if change > 0.2 {
        PerformanceTrend::Degrading
    } else if change < -0.2 {
        PerformanceTrend::Improving
    } else {
        PerformanceTrend::Stable
    }
}

fn report_recommendations(
    bottlenecks: &[BottleneckAnalysis],
    regressions: &[RegressionResult],
) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();

    for fix in bottlenecks
        .iter()
        .take(3)
        .flat_map(|b| b.suggested_fixes.iter().take(1))
        .chain(regressions.iter().flat_map(|r| r.recommendations.iter().take(1)))
    {
        if !items.contains(fix) {
            items.push(fix.clone());
        }
    }

    if items.is_empty() {
        items.push("No bottlenecks detected; system operating normally".to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn analyzer() -> BottleneckAnalyzer {
        BottleneckAnalyzer::new(BottleneckConfig::default(), RegressionDetector::default())
    }

    fn samples(component: &str, n: usize, cpu: f64, memory: f64) -> Vec<ComponentMetrics> {
        let start = Utc::now() - Duration::seconds(n as i64);
        (0..n)
            .map(|i| {
                ComponentMetrics::new(component, cpu, memory)
                    .with_timestamp(start + Duration::seconds(i as i64))
            })
            .collect()
    }

    #[test]
    fn test_cpu_bound() {
        let findings = analyzer().analyze_samples("api", &samples("api", 50, 90.0, 40.0));

        assert_eq!(findings.len(), 1);
        let cpu = &findings[0];
        assert_eq!(cpu.bottleneck_type, BottleneckType::Cpu);
        assert!(matches!(cpu.severity, Severity::High | Severity::Critical));
        assert!(cpu.confidence >= 0.7);
        assert!((cpu.impact_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_requires_min_samples() {
        assert!(analyzer()
            .analyze_samples("api", &samples("api", 9, 99.0, 99.0))
            .is_empty());
    }

    #[test]
    fn test_healthy_component() {
        assert!(analyzer()
            .analyze_samples("api", &samples("api", 30, 20.0, 30.0))
            .is_empty());
    }

    #[test]
    fn test_multiple_types() {
        let findings = analyzer().analyze_samples("api", &samples("api", 20, 99.0, 99.0));
        let types: Vec<_> = findings.iter().map(|f| f.bottleneck_type).collect();
        assert!(types.contains(&BottleneckType::Cpu));
        assert!(types.contains(&BottleneckType::Memory));
    }

    #[test]
    fn test_io_bound() {
        let start = Utc::now();
        // 每秒写入 200 MiB
        let samples: Vec<_> = (0..20u64)
            .map(|i| {
                ComponentMetrics::new("storage", 10.0, 10.0)
                    .with_timestamp(start + Duration::seconds(i as i64))
                    .with_disk_bytes(0, i * 200 * 1_048_576)
            })
            .collect();

        let findings = analyzer().analyze_samples("storage", &samples);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bottleneck_type, BottleneckType::Io);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert!((findings[0].impact_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_database_only_for_db_components() {
        let build = |name: &str| -> Vec<ComponentMetrics> {
            samples(name, 20, 10.0, 10.0)
                .into_iter()
                .map(|m| m.with_response_time(3.0))
                .collect()
        };

        let analyzer = analyzer();
        let db = analyzer.analyze_samples("orders-db", &build("orders-db"));
        assert_eq!(db.len(), 1);
        assert_eq!(db[0].bottleneck_type, BottleneckType::Database);
        assert_eq!(db[0].severity, Severity::High);

        assert!(analyzer.analyze_samples("api", &build("api")).is_empty());
    }

    #[test]
    fn test_queue_backlog() {
        let data: Vec<_> = samples("worker", 20, 10.0, 10.0)
            .into_iter()
            .map(|m| m.with_queue_depth(1000.0))
            .collect();

        let findings = analyzer().analyze_samples("worker", &data);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bottleneck_type, BottleneckType::QueueBacklog);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_health_score() {
        assert_eq!(health_score(&[]), 100.0);

        let findings = analyzer().analyze_samples("api", &samples("api", 50, 100.0, 40.0));
        // critical (15) · impact 1.0 → 0
        assert!(health_score(&findings).abs() < 1e-9);
    }

    #[test]
    fn test_performance_trend() {
        let build = |first: f64, second: f64| -> Vec<ComponentMetrics> {
            (0..20)
                .map(|i| {
                    ComponentMetrics::new("api", 10.0, 10.0)
                        .with_response_time(if i < 10 { first } else { second })
                })
                .collect()
        };

        assert_eq!(performance_trend(&build(1.0, 1.5)), PerformanceTrend::Degrading);
        assert_eq!(performance_trend(&build(1.0, 0.5)), PerformanceTrend::Improving);
        assert_eq!(performance_trend(&build(1.0, 1.1)), PerformanceTrend::Stable);
        assert_eq!(performance_trend(&[]), PerformanceTrend::InsufficientData);
    }

    #[tokio::test]
    async fn test_system_report() {
        let analyzer = analyzer();
        for m in samples("api", 50, 90.0, 40.0) {
            analyzer.record(m).await;
        }
        for m in samples("cache", 50, 10.0, 95.0) {
            analyzer.record(m).await;
        }

        let report = analyzer.generate_system_report().await;
        assert_eq!(report.component_count, 2);
        assert_eq!(report.bottlenecks.len(), 2);
        assert!(report.bottlenecks[0].impact_score >= report.bottlenecks[1].impact_score);
        assert!(report.system_health_score < 100.0);
        assert!(report.system_health_score >= 0.0);
        assert!(!report.recommendations.is_empty());
        assert_eq!(
            report.performance_trends.get("api"),
            Some(&PerformanceTrend::InsufficientData)
        );
    }

    #[tokio::test]
    async fn test_run_cycle_history() {
        let analyzer = analyzer();
        for m in samples("api", 20, 95.0, 40.0) {
            analyzer.record(m).await;
        }

        assert_eq!(analyzer.run_cycle().await.len(), 1);
        assert_eq!(analyzer.run_cycle().await.len(), 1);

        // 历史不去重
        assert_eq!(analyzer.history(10).await.len(), 2);
        assert_eq!(analyzer.history(1).await.len(), 1);
    }
}
