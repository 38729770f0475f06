//! Append-only usage and supplement ledger.
//!
//! Rows are never updated or deleted. The effective balance of a
//! (subscription, feature) pair is always recomputed as
//! `entitlement + Σ supplements − Σ usage`.

use crate::{Amount, FeatureId, Result, SubscriptionId, SupplementId, UsageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One consumption record. Positive `used` consumes, negative refunds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub id: UsageId,
    pub subscription_id: SubscriptionId,
    pub feature_id: FeatureId,
    pub used: Amount,
    pub created_at: DateTime<Utc>,
}

impl Usage {
    pub fn new(
        subscription_id: SubscriptionId,
        feature_id: FeatureId,
        used: Amount,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UsageId::generate(),
            subscription_id,
            feature_id,
            used,
            created_at,
        }
    }
}

/// Extra allowance purchased on top of the plan's entitlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplement {
    pub id: SupplementId,
    pub subscription_id: SubscriptionId,
    pub feature_id: FeatureId,
    pub value: Amount,
    pub price: Amount,
    pub created_at: DateTime<Utc>,
}

impl Supplement {
    pub fn new(
        subscription_id: SubscriptionId,
        feature_id: FeatureId,
        value: Amount,
        price: Amount,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SupplementId::generate(),
            subscription_id,
            feature_id,
            value,
            price,
            created_at,
        }
    }
}

/// Net consumption across `rows`.
pub fn total_usage<'a, I>(rows: I) -> Result<Amount>
where
    I: IntoIterator<Item = &'a Usage>,
{
    Amount::try_sum(rows.into_iter().map(|row| row.used))
}

/// Total supplement value across `rows`.
pub fn total_supplement<'a, I>(rows: I) -> Result<Amount>
where
    I: IntoIterator<Item = &'a Supplement>,
{
    Amount::try_sum(rows.into_iter().map(|row| row.value))
}

/// Balance of one feature on one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Plan allowance, zero when the feature is not attached.
    pub entitlement: Amount,
    pub supplements: Amount,
    pub usage: Amount,
}

impl LedgerSummary {
    pub fn from_rows(entitlement: Amount, usages: &[Usage], supplements: &[Supplement]) -> Result<Self> {
        Ok(Self {
            entitlement,
            supplements: total_supplement(supplements)?,
            usage: total_usage(usages)?,
        })
    }

    /// Allowance including supplements.
    pub fn granted(&self) -> Result<Amount> {
        self.entitlement.try_add(&self.supplements)
    }

    /// `entitlement + supplements − usage`. May be negative after refunds
    /// are reversed or the plan allowance is lowered.
    pub fn remaining(&self) -> Result<Amount> {
        self.granted()?.try_sub(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_balance_combines_all_rows() {
        let sub = SubscriptionId::from("sub_1");
        let feat = FeatureId::from("feat_api");

        let usages = vec![
            Usage::new(sub.clone(), feat.clone(), Amount::from_int(40), at(1)),
            Usage::new(sub.clone(), feat.clone(), Amount::from_int(30), at(2)),
            Usage::new(sub.clone(), feat.clone(), Amount::from_int(-10), at(3)),
        ];
        let supplements = vec![Supplement::new(
            sub,
            feat,
            Amount::from_int(50),
            Amount::from_int(5),
            at(2),
        )];

        let summary = LedgerSummary::from_rows(Amount::from_int(100), &usages, &supplements).unwrap();
        assert_eq!(summary.usage, Amount::from_int(60));
        assert_eq!(summary.supplements, Amount::from_int(50));
        assert_eq!(summary.granted().unwrap(), Amount::from_int(150));
        assert_eq!(summary.remaining().unwrap(), Amount::from_int(90));
    }

    #[test]
    fn test_empty_ledger_is_zero() {
        let summary = LedgerSummary::from_rows(Amount::from_int(10), &[], &[]).unwrap();
        assert_eq!(summary.usage, Amount::zero());
        assert_eq!(summary.remaining().unwrap(), Amount::from_int(10));
    }
}
