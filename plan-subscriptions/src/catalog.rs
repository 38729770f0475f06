//! Catalog writes: features and plans.

use crate::transaction::TransactionBody;
use crate::{Feature, Plan, Result, StoreTransaction, SubscriptionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Insert or update a feature; names stay unique across the catalog.
pub(crate) struct SaveFeature<'a> {
    pub feature: &'a Feature,
}

#[async_trait]
impl<'a> TransactionBody for SaveFeature<'a> {
    type Output = Feature;

    async fn run(&self, tx: &mut dyn StoreTransaction, _now: DateTime<Utc>) -> Result<Feature> {
        self.feature.validate()?;
        if let Some(existing) = tx.find_feature_by_name(&self.feature.name).await? {
            if existing.id != self.feature.id {
                return Err(SubscriptionError::InvalidArgument(format!(
                    "Feature name {} is already taken by {}",
                    self.feature.name, existing.id
                )));
            }
        }
        tx.save_feature(self.feature).await?;
        Ok(self.feature.clone())
    }
}

/// Insert or update a plan. Every attached feature must already exist.
pub(crate) struct SavePlan<'a> {
    pub plan: &'a Plan,
}

#[async_trait]
impl<'a> TransactionBody for SavePlan<'a> {
    type Output = Plan;

    async fn run(&self, tx: &mut dyn StoreTransaction, _now: DateTime<Utc>) -> Result<Plan> {
        self.plan.validate()?;
        if let Some(existing) = tx.find_plan_by_name(&self.plan.name).await? {
            if existing.id != self.plan.id {
                return Err(SubscriptionError::InvalidArgument(format!(
                    "Plan name {} is already taken by {}",
                    self.plan.name, existing.id
                )));
            }
        }
        for entitlement in &self.plan.features {
            let feature = tx
                .find_feature(&entitlement.feature_id)
                .await?
                .ok_or_else(|| {
                    SubscriptionError::not_found("feature", entitlement.feature_id.as_str())
                })?;
            if feature.name != entitlement.feature_name {
                return Err(SubscriptionError::InvalidArgument(format!(
                    "Entitlement names {} but feature {} is called {}",
                    entitlement.feature_name, feature.id, feature.name
                )));
            }
        }
        tx.save_plan(self.plan).await?;
        Ok(self.plan.clone())
    }
}
