use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 严重程度（有序：Low < Medium < High < Critical）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// 健康分计算使用的权重
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 3.0,
            Severity::High => 7.0,
            Severity::Critical => 15.0,
        }
    }

    pub const MAX_WEIGHT: f64 = 15.0;

    /// 超出比例映射为严重程度，ratio ∈ [0, 1]
    pub fn from_exceedance(ratio: f64) -> Self {
        if ratio >= 0.75 {
            Severity::Critical
        } else if ratio >= 0.5 {
            Severity::High
        } else if ratio >= 0.25 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}
