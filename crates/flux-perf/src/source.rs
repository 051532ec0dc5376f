use async_trait::async_trait;
use flux_analytics::ComponentMetrics;
use flux_timeseries::MetricSample;

/// 外部指标采集源
///
/// 由采集循环按 `store.collection_interval_secs` 周期调用。采集失败只记录日志，
/// 不影响其他采集源与下一次采集。
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn name(&self) -> &str;

    /// 采集一批指标样本
    async fn collect(&self) -> anyhow::Result<Vec<MetricSample>>;

    /// 采集组件资源指标，供瓶颈分析使用
    async fn collect_components(&self) -> anyhow::Result<Vec<ComponentMetrics>> {
        Ok(Vec::new())
    }
}
