use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// 按规则的滑动窗口限流器
///
/// 记录每条规则在窗口内的触发时间，超过上限即拒绝。窗口外的时间戳在检查时清理。
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    fired: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            fired: HashMap::new(),
        }
    }

    /// 一小时窗口
    pub fn hourly() -> Self {
        Self::new(Duration::hours(1))
    }

    /// 检查是否还能触发
    pub fn check(&mut self, rule_id: &str, max: u32, now: DateTime<Utc>) -> bool {
        let window_start = now - self.window;
        match self.fired.get_mut(rule_id) {
            Some(timestamps) => {
                while timestamps.front().is_some_and(|ts| *ts <= window_start) {
                    timestamps.pop_front();
                }
                timestamps.len() < max as usize
            }
            None => max > 0,
        }
    }

    /// 记录一次触发
    pub fn record(&mut self, rule_id: &str, now: DateTime<Utc>) {
        self.fired
            .entry(rule_id.to_string())
            .or_default()
            .push_back(now);
    }

    /// 窗口内的触发次数
    pub fn count(&self, rule_id: &str, now: DateTime<Utc>) -> usize {
        let window_start = now - self.window;
        self.fired
            .get(rule_id)
            .map(|timestamps| timestamps.iter().filter(|ts| **ts > window_start).count())
            .unwrap_or(0)
    }

    pub fn remove(&mut self, rule_id: &str) {
        self.fired.remove(rule_id);
    }

    /// 清理所有过期时间戳，返回移除的规则数
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let window_start = now - self.window;
        for timestamps in self.fired.values_mut() {
            timestamps.retain(|ts| *ts > window_start);
        }
        let before = self.fired.len();
        self.fired.retain(|_, timestamps| !timestamps.is_empty());
        before - self.fired.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::hourly()
    }
}
