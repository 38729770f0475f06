//! Plans and the features they grant.

use crate::{Amount, Feature, FeatureId, Interval, PeriodSpec, PlanId, Result, SubscriptionError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A feature attached to a plan, with its allowance and reset policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFeature {
    pub feature_id: FeatureId,
    pub feature_name: String,
    /// Allowance granted per subscription.
    pub value: Amount,
    pub resettable_period: Option<u32>,
    pub resettable_interval: Option<Interval>,
}

impl PlanFeature {
    pub fn new(feature: &Feature, value: Amount) -> Self {
        Self {
            feature_id: feature.id.clone(),
            feature_name: feature.name.clone(),
            value,
            resettable_period: None,
            resettable_interval: None,
        }
    }

    pub fn with_reset(mut self, reset: PeriodSpec) -> Self {
        self.resettable_period = Some(reset.period);
        self.resettable_interval = Some(reset.interval);
        self
    }

    /// The reset window, present only when both halves are configured.
    pub fn reset_policy(&self) -> Option<PeriodSpec> {
        PeriodSpec::from_parts(self.resettable_period, self.resettable_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub description: Option<String>,
    pub price: Amount,
    pub signup_fee: Amount,
    pub dedicated: bool,
    pub trial: Option<PeriodSpec>,
    pub grace: Option<PeriodSpec>,
    pub invoice: PeriodSpec,
    /// Entitlements in attachment order, at most one per feature.
    pub features: Vec<PlanFeature>,
}

impl Plan {
    /// A monthly plan with no trial, no grace and no features.
    pub fn new(name: impl Into<String>, price: Amount) -> Self {
        Self {
            id: PlanId::generate(),
            name: name.into(),
            description: None,
            price,
            signup_fee: Amount::zero(),
            dedicated: false,
            trial: None,
            grace: None,
            invoice: PeriodSpec::default(),
            features: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_signup_fee(mut self, fee: Amount) -> Self {
        self.signup_fee = fee;
        self
    }

    pub fn dedicated(mut self, dedicated: bool) -> Self {
        self.dedicated = dedicated;
        self
    }

    pub fn with_trial(mut self, trial: PeriodSpec) -> Self {
        self.trial = Some(trial);
        self
    }

    pub fn with_grace(mut self, grace: PeriodSpec) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn with_invoice(mut self, invoice: PeriodSpec) -> Self {
        self.invoice = invoice;
        self
    }

    /// Attach a feature, replacing any previous entitlement for it.
    pub fn with_feature(mut self, entitlement: PlanFeature) -> Self {
        self.attach(entitlement);
        self
    }

    pub fn attach(&mut self, entitlement: PlanFeature) {
        match self
            .features
            .iter_mut()
            .find(|f| f.feature_id == entitlement.feature_id)
        {
            Some(existing) => *existing = entitlement,
            None => self.features.push(entitlement),
        }
    }

    /// Remove a feature by name; returns whether it was attached.
    pub fn detach(&mut self, feature_name: &str) -> bool {
        let before = self.features.len();
        self.features.retain(|f| f.feature_name != feature_name);
        self.features.len() != before
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SubscriptionError::InvalidArgument(
                "Plan name cannot be empty".to_string(),
            ));
        }
        if self.price.is_negative() || self.signup_fee.is_negative() {
            return Err(SubscriptionError::InvalidArgument(
                "Plan price and signup fee cannot be negative".to_string(),
            ));
        }
        if self.invoice.period == 0 {
            return Err(SubscriptionError::InvalidArgument(
                "Invoice period must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entitlement in &self.features {
            if !seen.insert(entitlement.feature_name.as_str()) {
                return Err(SubscriptionError::InvalidArgument(format!(
                    "Feature {} attached twice",
                    entitlement.feature_name
                )));
            }
        }
        Ok(())
    }
}
