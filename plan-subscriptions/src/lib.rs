//! # Plan Subscriptions
//!
//! Recurring-subscription billing logic meant to be embedded in a host
//! application that owns persistence, HTTP and notification delivery.
//!
//! ## Model
//!
//! - [`Plan`]s attach [`Feature`]s with an allowance and an optional reset
//!   window ([`PlanFeature`]).
//! - A [`Subscription`] snapshots the plan price and carries its own
//!   `starts_at` / `ends_at` / `canceled_at` timestamps; trial, grace and the
//!   overall [`SubscriptionStatus`] are derived from them on every query.
//! - [`Usage`] and [`Supplement`] rows form an append-only ledger per
//!   (subscription, feature) pair.
//!
//! ## Collaborators
//!
//! The host supplies a [`SubscriptionStore`] (transactional unit of work), an
//! [`EventSink`] and optionally a [`Clock`]. Every mutation runs inside one
//! store transaction and is retried on [`SubscriptionError::TransactionConflict`].
//!
//! ```ignore
//! use plan_subscriptions::{InMemorySubscriptionStore, SubscriberRef, SubscriptionManager};
//!
//! let manager = SubscriptionManager::new(Arc::new(InMemorySubscriptionStore::new()));
//! let user = SubscriberRef::new("user", "42");
//! let subscription = manager.subscribe(&user, &plan.id, SubscribeOptions::default()).await?;
//! manager.increment_feature_usage(&subscription.id, "api_calls", Amount::from_int(10)).await?;
//! ```

pub mod amount;
mod catalog;
pub mod clock;
pub mod config;
pub mod entitlement;
pub mod events;
pub mod feature;
pub mod ids;
pub mod ledger;
pub mod lifecycle;
pub mod manager;
pub mod period;
pub mod plan;
pub mod storage;
pub mod subscriber;
pub mod subscription;
pub mod transaction;

pub use amount::Amount;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::BillingConfig;
pub use events::{EventSink, RecordingEventSink, SubscriptionEvent, TracingEventSink};
pub use feature::Feature;
pub use ids::{FeatureId, PlanId, SubscriptionId, SupplementId, UsageId};
pub use ledger::{LedgerSummary, Supplement, Usage};
pub use lifecycle::{
    ChangePlanOptions, PlanChange, PlanChangeAction, RenewOptions, SubscribeOptions,
    SubscriptionAction,
};
pub use manager::SubscriptionManager;
pub use period::{Interval, IntervalOffset, Period, PeriodSpec};
pub use plan::{Plan, PlanFeature};
pub use storage::{
    FeatureFilter, InMemorySubscriptionStore, LedgerFilter, StoreTransaction, SubscriptionFilter,
    SubscriptionStore,
};
pub use subscriber::{Subscriber, SubscriberRef};
pub use subscription::{EndDateChange, Subscription, SubscriptionStatus};

use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, SubscriptionError>;

/// Every failure the engine reports.
///
/// Business-rule violations are raised at the call site and never retried;
/// only [`SubscriptionError::TransactionConflict`] is retried by the
/// transaction runner.
#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    /// Malformed interval unit, zero count, non-monotonic date range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The subscription is not in a state that allows the operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The subscriber's latest subscription is still active.
    #[error("subscription {subscription_id} is still active")]
    AlreadyActive { subscription_id: SubscriptionId },

    #[error(
        "usage of {feature} on {subscription_id} exceeds allowance: requested {requested}, remaining {remaining}"
    )]
    LimitExceeded {
        subscription_id: SubscriptionId,
        feature: String,
        requested: Amount,
        remaining: Amount,
    },

    #[error("entitlement for {feature} on {subscription_id} expired at {expired_at}")]
    EntitlementExpired {
        subscription_id: SubscriptionId,
        feature: String,
        expired_at: DateTime<Utc>,
    },

    #[error("transaction conflict after {attempts} attempt(s)")]
    TransactionConflict { attempts: u32 },

    #[error("{resource} not found: {identifier}")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("arithmetic overflow")]
    Overflow,

    /// A caller-supplied post-create action failed; the transaction was rolled back.
    #[error("post-create action failed: {0}")]
    Action(anyhow::Error),
}

impl SubscriptionError {
    /// Only storage conflicts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionConflict { .. })
    }

    pub(crate) fn not_found(resource: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            identifier: identifier.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(SubscriptionError::TransactionConflict { attempts: 1 }.is_retryable());
        assert!(!SubscriptionError::InvalidOperation("nope".to_string()).is_retryable());
        assert!(!SubscriptionError::Storage("disk".to_string()).is_retryable());
        assert!(!SubscriptionError::Overflow.is_retryable());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = SubscriptionError::LimitExceeded {
            subscription_id: SubscriptionId::from("sub_1"),
            feature: "api_calls".to_string(),
            requested: Amount::from_int(5),
            remaining: Amount::from_int(2),
        };
        let message = err.to_string();
        assert!(message.contains("api_calls"));
        assert!(message.contains("sub_1"));
        assert!(message.contains("requested 5"));

        let err = SubscriptionError::not_found("plan", "plan_x");
        assert_eq!(err.to_string(), "plan not found: plan_x");
    }
}
