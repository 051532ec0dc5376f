pub mod alert;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod notifier;
pub mod rule;

pub use alert::{Alert, AlertStatus, DeliveryOutcome, NotificationRecord};
pub use engine::{AlertRuleEngine, AlertStatistics, EvaluationSummary, FireOutcome, SkipReason};
pub use error::{AlertError, Result};
pub use limiter::RateLimiter;
pub use notifier::{Channel, LogNotifier, NotificationDispatcher, Notifier, NotifierError};
pub use rule::{AlertRule, Comparator, ConditionOutcome, DegradationDirection, RuleCondition};

pub use flux_analytics::Severity;
