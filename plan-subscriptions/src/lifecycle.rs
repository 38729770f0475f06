//! Subscription lifecycle transitions.
//!
//! Each transition is a [`TransactionBody`] run by the manager through
//! [`run_in_transaction`](crate::transaction::run_in_transaction). Bodies
//! only read and write through the transaction they are handed; events are
//! published by the caller once the commit has succeeded.

use crate::entitlement::validity_ends_at;
use crate::ledger::{total_supplement, total_usage};
use crate::transaction::TransactionBody;
use crate::{
    Amount, EndDateChange, Feature, FeatureFilter, LedgerFilter, LedgerSummary, Plan, PlanId,
    Result, StoreTransaction, SubscriberRef, Subscription, SubscriptionError, SubscriptionFilter,
    SubscriptionId, Supplement, Usage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Host callback run inside the creating transaction. An error rolls the
/// whole transaction back.
pub type SubscriptionAction = Arc<dyn Fn(&Subscription) -> anyhow::Result<()> + Send + Sync>;

/// Like [`SubscriptionAction`], called with the old and the new subscription.
pub type PlanChangeAction =
    Arc<dyn Fn(&Subscription, &Subscription) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub timezone: Option<String>,
    /// Defaults to the current instant.
    pub starts_at: Option<DateTime<Utc>>,
    /// Total attempts; the manager's configured default when unset.
    pub attempts: Option<u32>,
    pub action: Option<SubscriptionAction>,
}

impl SubscribeOptions {
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn starting_at(mut self, starts_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&Subscription) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("timezone", &self.timezone)
            .field("starts_at", &self.starts_at)
            .field("attempts", &self.attempts)
            .field("action", &self.action.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct RenewOptions {
    /// Keeps the previous subscription's timezone when unset.
    pub timezone: Option<String>,
    pub attempts: Option<u32>,
    pub action: Option<SubscriptionAction>,
    /// Overrides the configured carry-over policy.
    pub carry_over: Option<bool>,
}

impl RenewOptions {
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&Subscription) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    pub fn carry_over(mut self, carry_over: bool) -> Self {
        self.carry_over = Some(carry_over);
        self
    }
}

impl fmt::Debug for RenewOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewOptions")
            .field("timezone", &self.timezone)
            .field("attempts", &self.attempts)
            .field("action", &self.action.is_some())
            .field("carry_over", &self.carry_over)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct ChangePlanOptions {
    pub timezone: Option<String>,
    pub attempts: Option<u32>,
    pub action: Option<PlanChangeAction>,
}

impl ChangePlanOptions {
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&Subscription, &Subscription) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }
}

impl fmt::Debug for ChangePlanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePlanOptions")
            .field("timezone", &self.timezone)
            .field("attempts", &self.attempts)
            .field("action", &self.action.is_some())
            .finish()
    }
}

/// Result of a plan change: the silently canceled subscription and its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanChange {
    pub old: Subscription,
    pub new: Subscription,
}

pub(crate) async fn load_subscription(
    tx: &mut dyn StoreTransaction,
    id: &SubscriptionId,
) -> Result<Subscription> {
    tx.find_subscription(id)
        .await?
        .ok_or_else(|| SubscriptionError::not_found("subscription", id.as_str()))
}

pub(crate) async fn load_plan(tx: &mut dyn StoreTransaction, id: &PlanId) -> Result<Plan> {
    tx.find_plan(id)
        .await?
        .ok_or_else(|| SubscriptionError::not_found("plan", id.as_str()))
}

pub(crate) async fn load_feature(tx: &mut dyn StoreTransaction, name: &str) -> Result<Feature> {
    tx.find_feature_by_name(name)
        .await?
        .ok_or_else(|| SubscriptionError::not_found("feature", name))
}

/// The subscriber's most recently created subscription.
pub(crate) async fn last_subscription(
    tx: &mut dyn StoreTransaction,
    subscriber: &SubscriberRef,
) -> Result<Option<Subscription>> {
    let subscriptions = tx
        .list_subscriptions(&SubscriptionFilter::for_subscriber(subscriber))
        .await?;
    // max_by_key keeps the last maximum, so the later insert wins a tie
    Ok(subscriptions.into_iter().max_by_key(|s| s.created_at))
}

pub(crate) async fn feature_summary(
    tx: &mut dyn StoreTransaction,
    subscription: &Subscription,
    plan: &Plan,
    feature: &Feature,
) -> Result<LedgerSummary> {
    let filter = LedgerFilter::new(&subscription.id).with_feature(&feature.id);
    let usages = tx.list_usages(&filter).await?;
    let supplements = tx.list_supplements(&filter).await?;
    LedgerSummary::from_rows(plan.value_in_plan(&feature.name), &usages, &supplements)
}

pub(crate) struct Subscribe<'a> {
    pub subscriber: &'a SubscriberRef,
    pub plan_id: &'a PlanId,
    pub options: &'a SubscribeOptions,
}

#[async_trait]
impl<'a> TransactionBody for Subscribe<'a> {
    type Output = Subscription;

    async fn run(&self, tx: &mut dyn StoreTransaction, now: DateTime<Utc>) -> Result<Subscription> {
        let plan = load_plan(tx, self.plan_id).await?;

        if let Some(last) = last_subscription(tx, self.subscriber).await? {
            if last.is_active(now) {
                return Err(SubscriptionError::AlreadyActive {
                    subscription_id: last.id,
                });
            }
        }

        let subscription =
            Subscription::start(self.subscriber.clone(), &plan, self.options.starts_at, now)?
                .with_timezone(self.options.timezone.clone());
        subscription.validate()?;
        tx.save_subscription(&subscription).await?;

        if let Some(action) = &self.options.action {
            action(&subscription).map_err(SubscriptionError::Action)?;
        }
        Ok(subscription)
    }
}

pub(crate) struct Cancel<'a> {
    pub subscription_id: &'a SubscriptionId,
}

#[async_trait]
impl<'a> TransactionBody for Cancel<'a> {
    type Output = Subscription;

    async fn run(&self, tx: &mut dyn StoreTransaction, now: DateTime<Utc>) -> Result<Subscription> {
        let mut subscription = load_subscription(tx, self.subscription_id).await?;
        subscription.cancel(now);
        tx.save_subscription(&subscription).await?;
        Ok(subscription)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndDateDirection {
    Postpone,
    Advance,
}

pub(crate) struct ChangeEndDate<'a> {
    pub subscription_id: &'a SubscriptionId,
    pub change: &'a EndDateChange,
    pub direction: EndDateDirection,
}

#[async_trait]
impl<'a> TransactionBody for ChangeEndDate<'a> {
    type Output = Subscription;

    async fn run(&self, tx: &mut dyn StoreTransaction, _now: DateTime<Utc>) -> Result<Subscription> {
        let mut subscription = load_subscription(tx, self.subscription_id).await?;
        match self.direction {
            EndDateDirection::Postpone => subscription.postpone_end_date(self.change)?,
            EndDateDirection::Advance => subscription.advance_end_date(self.change)?,
        };
        tx.save_subscription(&subscription).await?;
        Ok(subscription)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UsageDirection {
    Increment,
    Decrement,
}

pub(crate) struct RecordUsage<'a> {
    pub subscription_id: &'a SubscriptionId,
    pub feature_name: &'a str,
    pub amount: Amount,
    pub direction: UsageDirection,
    pub expiry_blocks_decrement: bool,
}

#[async_trait]
impl<'a> TransactionBody for RecordUsage<'a> {
    type Output = Usage;

    async fn run(&self, tx: &mut dyn StoreTransaction, now: DateTime<Utc>) -> Result<Usage> {
        if !self.amount.is_positive() {
            return Err(SubscriptionError::InvalidArgument(format!(
                "usage amount must be positive, got {}",
                self.amount
            )));
        }

        let subscription = load_subscription(tx, self.subscription_id).await?;
        let plan = load_plan(tx, &subscription.plan_id).await?;
        let feature = load_feature(tx, self.feature_name).await?;
        if !feature.countable {
            return Err(SubscriptionError::InvalidOperation(format!(
                "feature {} is not countable",
                feature.name
            )));
        }

        let check_expiry =
            self.direction == UsageDirection::Increment || self.expiry_blocks_decrement;
        if check_expiry {
            if let Some(entitlement) = plan.entitlement(&feature.name) {
                if let Some(expired_at) = validity_ends_at(entitlement, subscription.starts_at)? {
                    if now >= expired_at {
                        return Err(SubscriptionError::EntitlementExpired {
                            subscription_id: subscription.id,
                            feature: feature.name,
                            expired_at,
                        });
                    }
                }
            }
        }

        let used = match self.direction {
            UsageDirection::Increment => {
                let remaining = feature_summary(tx, &subscription, &plan, &feature)
                    .await?
                    .remaining()?;
                if remaining < self.amount {
                    return Err(SubscriptionError::LimitExceeded {
                        subscription_id: subscription.id,
                        feature: feature.name,
                        requested: self.amount,
                        remaining,
                    });
                }
                self.amount
            }
            UsageDirection::Decrement => self.amount.negated(),
        };

        let usage = Usage::new(subscription.id, feature.id, used, now);
        tx.insert_usage(&usage).await?;
        Ok(usage)
    }
}

pub(crate) struct AddSupplement<'a> {
    pub subscription_id: &'a SubscriptionId,
    pub feature_name: &'a str,
    pub value: Amount,
    pub price: Amount,
}

#[async_trait]
impl<'a> TransactionBody for AddSupplement<'a> {
    type Output = Supplement;

    async fn run(&self, tx: &mut dyn StoreTransaction, now: DateTime<Utc>) -> Result<Supplement> {
        if !self.value.is_positive() {
            return Err(SubscriptionError::InvalidArgument(format!(
                "supplement value must be positive, got {}",
                self.value
            )));
        }
        if self.price.is_negative() {
            return Err(SubscriptionError::InvalidArgument(format!(
                "supplement price cannot be negative, got {}",
                self.price
            )));
        }

        let subscription = load_subscription(tx, self.subscription_id).await?;
        let feature = load_feature(tx, self.feature_name).await?;
        if !feature.extendable {
            return Err(SubscriptionError::InvalidOperation(format!(
                "feature {} is not extendable",
                feature.name
            )));
        }

        let supplement = Supplement::new(subscription.id, feature.id, self.value, self.price, now);
        tx.insert_supplement(&supplement).await?;
        Ok(supplement)
    }
}

pub(crate) struct Renew<'a> {
    pub subscription_id: &'a SubscriptionId,
    pub options: &'a RenewOptions,
    pub carry_over: bool,
}

impl Renew<'_> {
    /// Copy running totals of non-resettable features onto `renewed`, one
    /// aggregate row per feature and ledger.
    async fn carry_over_balances(
        &self,
        tx: &mut dyn StoreTransaction,
        previous: &Subscription,
        renewed: &Subscription,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let persistent = tx
            .list_features(&FeatureFilter::default().resettable(false))
            .await?;

        for feature in persistent {
            let filter = LedgerFilter::new(&previous.id).with_feature(&feature.id);
            let used = total_usage(&tx.list_usages(&filter).await?)?;
            let supplemented = total_supplement(&tx.list_supplements(&filter).await?)?;

            if !used.is_zero() {
                let usage = Usage::new(renewed.id.clone(), feature.id.clone(), used, now);
                tx.insert_usage(&usage).await?;
            }
            if !supplemented.is_zero() {
                let supplement = Supplement::new(
                    renewed.id.clone(),
                    feature.id.clone(),
                    supplemented,
                    Amount::zero(),
                    now,
                );
                tx.insert_supplement(&supplement).await?;
            }
            tracing::debug!(
                feature = %feature.name,
                used = %used,
                supplemented = %supplemented,
                "carried over feature balance"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> TransactionBody for Renew<'a> {
    type Output = Subscription;

    async fn run(&self, tx: &mut dyn StoreTransaction, now: DateTime<Utc>) -> Result<Subscription> {
        let previous = load_subscription(tx, self.subscription_id).await?;
        if !previous.ended(now) && !previous.canceled(now) {
            return Err(SubscriptionError::InvalidOperation(format!(
                "subscription {} is neither ended nor canceled",
                previous.id
            )));
        }
        if let Some(last) = last_subscription(tx, &previous.subscriber).await? {
            if last.is_active(now) {
                return Err(SubscriptionError::AlreadyActive {
                    subscription_id: last.id,
                });
            }
        }

        let plan = load_plan(tx, &previous.plan_id).await?;
        let timezone = self
            .options
            .timezone
            .clone()
            .or_else(|| previous.timezone.clone());
        let renewed = Subscription::start(previous.subscriber.clone(), &plan, None, now)?
            .with_timezone(timezone);
        renewed.validate()?;
        tx.save_subscription(&renewed).await?;

        if self.carry_over {
            self.carry_over_balances(tx, &previous, &renewed, now).await?;
        }

        if let Some(action) = &self.options.action {
            action(&renewed).map_err(SubscriptionError::Action)?;
        }
        Ok(renewed)
    }
}

pub(crate) struct ChangePlan<'a> {
    pub subscription_id: &'a SubscriptionId,
    pub new_plan_id: &'a PlanId,
    pub options: &'a ChangePlanOptions,
}

#[async_trait]
impl<'a> TransactionBody for ChangePlan<'a> {
    type Output = PlanChange;

    async fn run(&self, tx: &mut dyn StoreTransaction, now: DateTime<Utc>) -> Result<PlanChange> {
        let mut old = load_subscription(tx, self.subscription_id).await?;
        let new_plan = load_plan(tx, self.new_plan_id).await?;

        old.cancel(now);
        tx.save_subscription(&old).await?;

        let timezone = self
            .options
            .timezone
            .clone()
            .or_else(|| old.timezone.clone());
        let new = Subscription::start(old.subscriber.clone(), &new_plan, None, now)?
            .with_timezone(timezone);
        new.validate()?;
        tx.save_subscription(&new).await?;

        if let Some(action) = &self.options.action {
            action(&old, &new).map_err(SubscriptionError::Action)?;
        }
        Ok(PlanChange { old, new })
    }
}
