//! Catalog features and their metering flags.

use crate::{Amount, FeatureId, Result, SubscriptionError};
use serde::{Deserialize, Serialize};

/// Reference data describing something a plan can grant.
///
/// Flags:
/// - `countable`: usage can be metered against an allowance
/// - `resettable`: usage history is dropped on renewal instead of carried over
/// - `extendable`: supplements may add to the allowance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    /// Unique across the catalog.
    pub name: String,
    pub description: Option<String>,
    pub price: Amount,
    /// Unit label, e.g. "requests" or "GB".
    pub quantifier: Option<String>,
    pub countable: bool,
    pub resettable: bool,
    pub extendable: bool,
}

impl Feature {
    /// A countable, resettable, extendable feature with no price.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FeatureId::generate(),
            name: name.into(),
            description: None,
            price: Amount::zero(),
            quantifier: None,
            countable: true,
            resettable: true,
            extendable: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_price(mut self, price: Amount) -> Self {
        self.price = price;
        self
    }

    pub fn with_quantifier(mut self, quantifier: impl Into<String>) -> Self {
        self.quantifier = Some(quantifier.into());
        self
    }

    pub fn countable(mut self, countable: bool) -> Self {
        self.countable = countable;
        self
    }

    pub fn resettable(mut self, resettable: bool) -> Self {
        self.resettable = resettable;
        self
    }

    pub fn extendable(mut self, extendable: bool) -> Self {
        self.extendable = extendable;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SubscriptionError::InvalidArgument(
                "Feature name cannot be empty".to_string(),
            ));
        }
        if self.price.is_negative() {
            return Err(SubscriptionError::InvalidArgument(format!(
                "Feature {} price cannot be negative",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_defaults_and_builders() {
        let feature = Feature::new("storage")
            .with_quantifier("GB")
            .with_price(Amount::from_int(2))
            .resettable(false);

        assert_eq!(feature.name, "storage");
        assert_eq!(feature.quantifier.as_deref(), Some("GB"));
        assert!(feature.countable);
        assert!(!feature.resettable);
        assert!(feature.extendable);
        assert!(feature.id.as_str().starts_with("feat_"));
        assert!(feature.validate().is_ok());
        assert!(Feature::new("").validate().is_err());
        assert!(Feature::new("x")
            .with_price(Amount::from_int(-1))
            .validate()
            .is_err());
    }
}
