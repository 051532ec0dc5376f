use crate::model::{MetricSample, MetricSummary};
use crate::ring::RingBuffer;
use chrono::{DateTime, Utc};
use flux_config::StoreConfig;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

type Series = Arc<RwLock<RingBuffer<MetricSample>>>;

/// 内存时序存储
///
/// 每个指标名对应一个固定容量的环形缓冲区，溢出时淘汰最旧样本。
/// 未知指标的查询返回空结果而不是错误。
pub struct MetricStore {
    capacity: usize,
    series: RwLock<HashMap<String, Series>>,
}

impl MetricStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 记录一个样本
    ///
    /// 不同指标名可以并发写入。同一指标名约定为单生产者：多个生产者
    /// 向同一指标写入时需由调用方串行化，否则样本的插入顺序不保证与时间戳一致。
    /// 乱序时间戳按到达顺序追加，不做排序。
    pub async fn record(
        &self,
        name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
        tags: HashMap<String, String>,
    ) {
        let sample = MetricSample::new(name, value)
            .with_timestamp(timestamp)
            .with_tags(tags);
        self.record_sample(sample).await;
    }

    /// 记录一个完整样本
    pub async fn record_sample(&self, sample: MetricSample) {
        if !sample.value.is_finite() {
            warn!(
                metric = %sample.metric_name,
                value = %sample.value,
                "Dropping non-finite metric sample"
            );
            return;
        }

        let series = self.series_for(&sample.metric_name).await;
        let mut buffer = series.write().await;

        if let Some(last) = buffer.last() {
            if sample.timestamp < last.timestamp {
                debug!(
                    metric = %sample.metric_name,
                    "Out-of-order sample appended"
                );
            }
        }

        buffer.push(sample);
    }

    /// 查询时间戳 >= since 的样本，按插入顺序返回
    ///
    /// 返回的是调用时刻的快照，再次调用会重新读取缓冲区。
    pub async fn query(&self, name: &str, since: DateTime<Utc>) -> Vec<MetricSample> {
        let Some(series) = self.get_series(name).await else {
            return Vec::new();
        };

        let buffer = series.read().await;
        buffer
            .iter()
            .filter(|sample| sample.timestamp >= since)
            .cloned()
            .collect()
    }

    /// 查询 [since, until] 区间内的样本
    pub async fn query_range(
        &self,
        name: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<MetricSample> {
        let Some(series) = self.get_series(name).await else {
            return Vec::new();
        };

        let buffer = series.read().await;
        buffer
            .iter()
            .filter(|sample| sample.timestamp >= since && sample.timestamp <= until)
            .cloned()
            .collect()
    }

    /// 所有样本（旧到新）
    pub async fn all(&self, name: &str) -> Vec<MetricSample> {
        let Some(series) = self.get_series(name).await else {
            return Vec::new();
        };

        let buffer = series.read().await;
        buffer.iter().cloned().collect()
    }

    /// 当前跟踪的所有指标名
    pub async fn names(&self) -> HashSet<String> {
        let series = self.series.read().await;
        series.keys().cloned().collect()
    }

    /// 最新样本
    pub async fn latest(&self, name: &str) -> Option<MetricSample> {
        let series = self.get_series(name).await?;
        let buffer = series.read().await;
        buffer.last().cloned()
    }

    /// 指标当前样本数
    pub async fn len(&self, name: &str) -> usize {
        match self.get_series(name).await {
            Some(series) => series.read().await.len(),
            None => 0,
        }
    }

    /// 单个指标的汇总
    pub async fn summary(&self, name: &str) -> Option<MetricSummary> {
        let series = self.get_series(name).await?;
        let buffer = series.read().await;
        MetricSummary::from_samples(buffer.iter())
    }

    /// 所有指标的汇总
    pub async fn summaries(&self) -> HashMap<String, MetricSummary> {
        let snapshot: Vec<(String, Series)> = {
            let series = self.series.read().await;
            series
                .iter()
                .map(|(name, buffer)| (name.clone(), buffer.clone()))
                .collect()
        };

        let mut result = HashMap::with_capacity(snapshot.len());
        for (name, series) in snapshot {
            let buffer = series.read().await;
            if let Some(summary) = MetricSummary::from_samples(buffer.iter()) {
                result.insert(name, summary);
            }
        }
        result
    }

    async fn get_series(&self, name: &str) -> Option<Series> {
        let series = self.series.read().await;
        series.get(name).cloned()
    }

    async fn series_for(&self, name: &str) -> Series {
        if let Some(series) = self.get_series(name).await {
            return series;
        }

        let mut series = self.series.write().await;
        series
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(metric = %name, capacity = self.capacity, "Tracking new metric");
                Arc::new(RwLock::new(RingBuffer::with_capacity(self.capacity)))
            })
            .clone()
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_record_and_query() {
        let store = MetricStore::new(100);
        let t = Utc::now();

        store.record("latency", 1.0, t, HashMap::new()).await;

        // 时间戳 T 的样本在 T-1s 之后可见，在 T+1s 之后不可见
        let visible = store.query("latency", t - Duration::seconds(1)).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].value, 1.0);

        let hidden = store.query("latency", t + Duration::seconds(1)).await;
        assert!(hidden.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_metric_is_empty() {
        let store = MetricStore::new(10);
        let since = Utc::now() - Duration::hours(1);

        assert!(store.query("missing", since).await.is_empty());
        assert!(store.latest("missing").await.is_none());
        assert!(store.summary("missing").await.is_none());
        assert_eq!(store.len("missing").await, 0);
    }

    #[tokio::test]
    async fn test_eviction_on_overflow() {
        let store = MetricStore::new(5);
        let base = Utc::now();

        for i in 0..8 {
            store
                .record("cpu", i as f64, base + Duration::seconds(i), HashMap::new())
                .await;
        }

        let all = store.all("cpu").await;
        assert_eq!(all.len(), 5);
        assert_eq!(all.first().unwrap().value, 3.0);
        assert_eq!(all.last().unwrap().value, 7.0);
    }

    #[tokio::test]
    async fn test_out_of_order_is_appended() {
        let store = MetricStore::new(10);
        let base = Utc::now();

        store.record("m", 1.0, base, HashMap::new()).await;
        store
            .record("m", 2.0, base - Duration::seconds(30), HashMap::new())
            .await;

        let values: Vec<f64> = store.all("m").await.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);

        // 过滤仍按时间戳进行
        let recent = store.query("m", base - Duration::seconds(1)).await;
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_names_and_summaries() {
        let store = MetricStore::new(10);
        let now = Utc::now();

        store.record("a", 1.0, now, HashMap::new()).await;
        store.record("a", 3.0, now, HashMap::new()).await;
        store.record("b", 5.0, now, HashMap::new()).await;

        let names = store.names().await;
        assert_eq!(names.len(), 2);
        assert!(names.contains("a"));

        let summaries = store.summaries().await;
        assert_eq!(summaries["a"].avg, 2.0);
        assert_eq!(summaries["b"].count, 1);
    }

    #[tokio::test]
    async fn test_non_finite_dropped() {
        let store = MetricStore::new(10);
        store.record("m", f64::NAN, Utc::now(), HashMap::new()).await;
        assert_eq!(store.len("m").await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_distinct_names() {
        let store = Arc::new(MetricStore::new(1000));
        let mut handles = Vec::new();

        for worker in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("metric_{}", worker);
                for i in 0..100 {
                    store.record(&name, i as f64, Utc::now(), HashMap::new()).await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        for worker in 0..4 {
            assert_eq!(store.len(&format!("metric_{}", worker)).await, 100);
        }
    }
}
