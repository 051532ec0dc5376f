use crate::alert::AlertStatus;
use thiserror::Error;

/// 告警引擎错误
#[derive(Debug, Error)]
pub enum AlertError {
    /// 规则配置无效
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// 非法状态迁移
    #[error("Invalid alert transition: {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    /// 单条规则评估失败，由引擎记录日志，不向外传播
    #[error("Rule {rule_id} evaluation failed: {reason}")]
    RuleEvaluation { rule_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, AlertError>;

impl AlertError {
    pub fn invalid_rule(msg: impl Into<String>) -> Self {
        AlertError::InvalidRule(msg.into())
    }
}
