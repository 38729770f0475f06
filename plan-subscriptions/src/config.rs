//! Engine configuration supplied by the host at construction.

use crate::{Interval, PeriodSpec, Result, SubscriptionError};
use serde::{Deserialize, Serialize};

/// Tunables for [`SubscriptionManager`](crate::SubscriptionManager).
///
/// Every field has a default, so a host can pass a partial JSON document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Attempts per transactional operation when the caller does not override it.
    #[serde(default = "default_transaction_attempts")]
    pub transaction_attempts: u32,

    /// Window used by "subscriptions ending soon" queries.
    #[serde(default = "default_ending_soon_days")]
    pub ending_soon_days: u32,

    /// Invoice period for plans created through the manager.
    #[serde(default = "default_invoice")]
    pub default_invoice: PeriodSpec,

    /// Carry non-resettable usage into the renewed subscription.
    #[serde(default = "default_carry_over")]
    pub carry_over_on_renew: bool,

    /// Refuse decrements once a feature's reset window has elapsed.
    #[serde(default)]
    pub expiry_blocks_decrement: bool,
}

fn default_transaction_attempts() -> u32 {
    2
}

fn default_ending_soon_days() -> u32 {
    3
}

fn default_invoice() -> PeriodSpec {
    PeriodSpec {
        period: 1,
        interval: Interval::Month,
    }
}

fn default_carry_over() -> bool {
    true
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            transaction_attempts: default_transaction_attempts(),
            ending_soon_days: default_ending_soon_days(),
            default_invoice: default_invoice(),
            carry_over_on_renew: default_carry_over(),
            expiry_blocks_decrement: false,
        }
    }
}

impl BillingConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SubscriptionError::InvalidArgument(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_transaction_attempts(mut self, attempts: u32) -> Self {
        self.transaction_attempts = attempts;
        self
    }

    pub fn with_ending_soon_days(mut self, days: u32) -> Self {
        self.ending_soon_days = days;
        self
    }

    pub fn with_default_invoice(mut self, invoice: PeriodSpec) -> Self {
        self.default_invoice = invoice;
        self
    }

    pub fn with_carry_over_on_renew(mut self, carry_over: bool) -> Self {
        self.carry_over_on_renew = carry_over;
        self
    }

    pub fn with_expiry_blocks_decrement(mut self, blocks: bool) -> Self {
        self.expiry_blocks_decrement = blocks;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.transaction_attempts == 0 {
            return Err(SubscriptionError::InvalidArgument(
                "transaction_attempts must be at least 1".to_string(),
            ));
        }
        if self.default_invoice.period == 0 {
            return Err(SubscriptionError::InvalidArgument(
                "default_invoice period must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.transaction_attempts, 2);
        assert_eq!(config.ending_soon_days, 3);
        assert_eq!(config.default_invoice, PeriodSpec::default());
        assert!(config.carry_over_on_renew);
        assert!(!config.expiry_blocks_decrement);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BillingConfig::from_json(
            r#"{"ending_soon_days": 7, "default_invoice": {"period": 1, "interval": "year"}}"#,
        )
        .unwrap();
        assert_eq!(config.ending_soon_days, 7);
        assert_eq!(config.default_invoice.interval, Interval::Year);
        assert_eq!(config.transaction_attempts, 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            BillingConfig::from_json(r#"{"transaction_attempts": 0}"#),
            Err(SubscriptionError::InvalidArgument(_))
        ));
        assert!(BillingConfig::from_json("not json").is_err());
    }
}
