use crate::catalog::{SaveFeature, SavePlan};
use crate::entitlement;
use crate::lifecycle::{
    self, AddSupplement, Cancel, ChangeEndDate, ChangePlan, EndDateDirection, RecordUsage, Renew,
    Subscribe, UsageDirection,
};
use crate::transaction::{finish_read, run_in_transaction, TransactionBody};
use crate::{
    Amount, BillingConfig, ChangePlanOptions, Clock, EndDateChange, EventSink, Feature,
    FeatureFilter, LedgerSummary, Plan, PlanChange, PlanId, RenewOptions, Result,
    StoreTransaction, SubscribeOptions, Subscriber, Subscription, SubscriptionError,
    SubscriptionEvent, SubscriptionFilter, SubscriptionId, SubscriptionStatus, SubscriptionStore,
    Supplement, SystemClock, TracingEventSink, Usage,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Entry point for catalog management and subscription lifecycle operations.
///
/// Every mutation runs in one store transaction, retried on conflict, and
/// publishes its event only after the commit succeeded.
pub struct SubscriptionManager {
    store: Arc<dyn SubscriptionStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
}

impl SubscriptionManager {
    /// A manager on the system clock that logs events through `tracing`.
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            store,
            events: Arc::new(TracingEventSink),
            clock: Arc::new(SystemClock),
            config: BillingConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: BillingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn transact<B: TransactionBody>(&self, body: &B, attempts: Option<u32>) -> Result<B::Output> {
        let attempts = attempts.unwrap_or(self.config.transaction_attempts);
        run_in_transaction(self.store.as_ref(), self.clock.as_ref(), body, attempts).await
    }

    // Catalog

    /// A plan using the configured default invoice period. Not persisted
    /// until passed to [`save_plan`](Self::save_plan).
    pub fn new_plan(&self, name: impl Into<String>, price: Amount) -> Plan {
        Plan::new(name, price).with_invoice(self.config.default_invoice)
    }

    #[tracing::instrument(skip_all, fields(feature = %feature.name))]
    pub async fn save_feature(&self, feature: &Feature) -> Result<Feature> {
        let saved = self.transact(&SaveFeature { feature }, None).await?;
        tracing::debug!(feature_id = %saved.id, "feature saved");
        Ok(saved)
    }

    #[tracing::instrument(skip_all, fields(plan = %plan.name))]
    pub async fn save_plan(&self, plan: &Plan) -> Result<Plan> {
        let saved = self.transact(&SavePlan { plan }, None).await?;
        tracing::debug!(plan_id = %saved.id, features = saved.features.len(), "plan saved");
        Ok(saved)
    }

    pub async fn find_plan(&self, id: &PlanId) -> Result<Option<Plan>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_plan(id).await;
        finish_read(tx, result).await
    }

    pub async fn find_plan_by_name(&self, name: &str) -> Result<Option<Plan>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_plan_by_name(name).await;
        finish_read(tx, result).await
    }

    pub async fn find_feature_by_name(&self, name: &str) -> Result<Option<Feature>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_feature_by_name(name).await;
        finish_read(tx, result).await
    }

    pub async fn plans(&self) -> Result<Vec<Plan>> {
        let mut tx = self.store.begin().await?;
        let result = tx.list_plans().await;
        finish_read(tx, result).await
    }

    pub async fn features(&self, filter: FeatureFilter) -> Result<Vec<Feature>> {
        let mut tx = self.store.begin().await?;
        let result = tx.list_features(&filter).await;
        finish_read(tx, result).await
    }

    /// Plans attaching at least one of `feature_names`.
    pub async fn plans_with_any_feature<S: AsRef<str> + Sync>(
        &self,
        feature_names: &[S],
    ) -> Result<Vec<Plan>> {
        let plans = self.plans().await?;
        Ok(entitlement::plans_with_any_feature(&plans, feature_names)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Subscriptions of the plan that have started and are neither ended nor canceled.
    pub async fn active_subscriptions_of_plan(&self, plan_id: &PlanId) -> Result<Vec<Subscription>> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = tx.list_subscriptions(&SubscriptionFilter::for_plan(plan_id)).await;
        let subscriptions = finish_read(tx, result).await?;
        Ok(subscriptions
            .into_iter()
            .filter(|s| s.starts_at <= now && s.is_active(now))
            .collect())
    }

    // Subscribers

    /// All of the subscriber's subscriptions, oldest first.
    pub async fn subscriptions<S: Subscriber + ?Sized>(
        &self,
        subscriber: &S,
    ) -> Result<Vec<Subscription>> {
        let filter = SubscriptionFilter::for_subscriber(&subscriber.subscriber_ref());
        let mut tx = self.store.begin().await?;
        let result = tx.list_subscriptions(&filter).await;
        let mut subscriptions = finish_read(tx, result).await?;
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    /// The subscriber's most recently created subscription.
    pub async fn last_subscription<S: Subscriber + ?Sized>(
        &self,
        subscriber: &S,
    ) -> Result<Option<Subscription>> {
        let subscriber = subscriber.subscriber_ref();
        let mut tx = self.store.begin().await?;
        let result = lifecycle::last_subscription(tx.as_mut(), &subscriber).await;
        finish_read(tx, result).await
    }

    /// Start a subscription on `plan_id`.
    ///
    /// # Errors
    ///
    /// `AlreadyActive` when the subscriber's latest subscription is active.
    #[tracing::instrument(skip_all, fields(plan_id = %plan_id))]
    pub async fn subscribe<S: Subscriber + ?Sized>(
        &self,
        subscriber: &S,
        plan_id: &PlanId,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let subscriber = subscriber.subscriber_ref();
        let body = Subscribe {
            subscriber: &subscriber,
            plan_id,
            options: &options,
        };
        let subscription = self.transact(&body, options.attempts).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            subscriber = %subscriber,
            ends_at = %subscription.ends_at,
            "subscription created"
        );
        self.events.emit(SubscriptionEvent::NewSubscription {
            subscription: subscription.clone(),
        });
        Ok(subscription)
    }

    // Lifecycle

    pub async fn find_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_subscription(id).await;
        finish_read(tx, result).await
    }

    /// Derived status at the current instant.
    pub async fn status(&self, id: &SubscriptionId) -> Result<SubscriptionStatus> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = subscription_with_plan(tx.as_mut(), id).await;
        let (subscription, plan) = finish_read(tx, result).await?;
        subscription.status(&plan, now)
    }

    /// Cancel immediately. Canceling again moves `canceled_at`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: &SubscriptionId, raise_event: bool) -> Result<Subscription> {
        let body = Cancel {
            subscription_id: id,
        };
        let subscription = self.transact(&body, None).await?;

        tracing::info!(canceled_at = ?subscription.canceled_at, "subscription canceled");
        if raise_event {
            self.events.emit(SubscriptionEvent::SubscriptionCancelled {
                subscription: subscription.clone(),
            });
        }
        Ok(subscription)
    }

    /// Push `ends_at` later.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the resolved end is earlier than the current one.
    #[tracing::instrument(skip(self))]
    pub async fn postpone_end_date(
        &self,
        id: &SubscriptionId,
        change: EndDateChange,
    ) -> Result<Subscription> {
        let body = ChangeEndDate {
            subscription_id: id,
            change: &change,
            direction: EndDateDirection::Postpone,
        };
        let subscription = self.transact(&body, None).await?;
        tracing::info!(ends_at = %subscription.ends_at, "end date postponed");
        Ok(subscription)
    }

    /// Pull `ends_at` earlier.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the resolved end is later than the current one,
    /// `InvalidArgument` if it would not be after `starts_at`.
    #[tracing::instrument(skip(self))]
    pub async fn advance_end_date(
        &self,
        id: &SubscriptionId,
        change: EndDateChange,
    ) -> Result<Subscription> {
        let body = ChangeEndDate {
            subscription_id: id,
            change: &change,
            direction: EndDateDirection::Advance,
        };
        let subscription = self.transact(&body, None).await?;
        tracing::info!(ends_at = %subscription.ends_at, "end date advanced");
        Ok(subscription)
    }

    /// Consume `amount` of a feature.
    ///
    /// # Errors
    ///
    /// - `LimitExceeded` when the remaining allowance is below `amount`
    /// - `EntitlementExpired` when the feature's reset window has elapsed
    #[tracing::instrument(skip(self, amount), fields(amount = %amount))]
    pub async fn increment_feature_usage(
        &self,
        id: &SubscriptionId,
        feature_name: &str,
        amount: Amount,
    ) -> Result<Usage> {
        let body = RecordUsage {
            subscription_id: id,
            feature_name,
            amount,
            direction: UsageDirection::Increment,
            expiry_blocks_decrement: self.config.expiry_blocks_decrement,
        };
        let usage = self.transact(&body, None).await?;
        tracing::debug!(usage_id = %usage.id, "usage recorded");
        Ok(usage)
    }

    /// Refund `amount` of a feature by appending a negative usage row.
    #[tracing::instrument(skip(self, amount), fields(amount = %amount))]
    pub async fn decrement_feature_usage(
        &self,
        id: &SubscriptionId,
        feature_name: &str,
        amount: Amount,
    ) -> Result<Usage> {
        let body = RecordUsage {
            subscription_id: id,
            feature_name,
            amount,
            direction: UsageDirection::Decrement,
            expiry_blocks_decrement: self.config.expiry_blocks_decrement,
        };
        let usage = self.transact(&body, None).await?;
        tracing::debug!(usage_id = %usage.id, "usage refunded");
        Ok(usage)
    }

    /// Grant `value` extra allowance of an extendable feature.
    #[tracing::instrument(skip(self, value, price), fields(value = %value, price = %price))]
    pub async fn add_supplement(
        &self,
        id: &SubscriptionId,
        feature_name: &str,
        value: Amount,
        price: Amount,
    ) -> Result<Supplement> {
        let body = AddSupplement {
            subscription_id: id,
            feature_name,
            value,
            price,
        };
        let supplement = self.transact(&body, None).await?;
        tracing::debug!(supplement_id = %supplement.id, "supplement granted");
        Ok(supplement)
    }

    /// Entitlement, supplements and usage of one feature on one subscription.
    pub async fn feature_summary(
        &self,
        id: &SubscriptionId,
        feature_name: &str,
    ) -> Result<LedgerSummary> {
        let mut tx = self.store.begin().await?;
        let result = summary_in(tx.as_mut(), id, feature_name).await;
        finish_read(tx, result).await
    }

    /// Signed sum of all usage rows.
    pub async fn total_usage(&self, id: &SubscriptionId, feature_name: &str) -> Result<Amount> {
        Ok(self.feature_summary(id, feature_name).await?.usage)
    }

    pub async fn total_supplement(
        &self,
        id: &SubscriptionId,
        feature_name: &str,
    ) -> Result<Amount> {
        Ok(self.feature_summary(id, feature_name).await?.supplements)
    }

    /// `entitlement + supplements − usage`; may be negative.
    pub async fn remaining_usage(&self, id: &SubscriptionId, feature_name: &str) -> Result<Amount> {
        self.feature_summary(id, feature_name).await?.remaining()
    }

    /// Start a fresh term for an ended or canceled subscription.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` while the subscription is neither ended nor canceled.
    #[tracing::instrument(skip(self, options))]
    pub async fn renew(&self, id: &SubscriptionId, options: RenewOptions) -> Result<Subscription> {
        let body = Renew {
            subscription_id: id,
            options: &options,
            carry_over: options.carry_over.unwrap_or(self.config.carry_over_on_renew),
        };
        let renewed = self.transact(&body, options.attempts).await?;

        tracing::info!(
            renewed_id = %renewed.id,
            ends_at = %renewed.ends_at,
            carry_over = body.carry_over,
            "subscription renewed"
        );
        self.events.emit(SubscriptionEvent::SubscriptionRenewed {
            subscription: renewed.clone(),
        });
        Ok(renewed)
    }

    /// Cancel the subscription without a cancellation event and start a new
    /// one on `new_plan_id`.
    #[tracing::instrument(skip(self, options))]
    pub async fn change_plan(
        &self,
        id: &SubscriptionId,
        new_plan_id: &PlanId,
        options: ChangePlanOptions,
    ) -> Result<PlanChange> {
        let body = ChangePlan {
            subscription_id: id,
            new_plan_id,
            options: &options,
        };
        let change = self.transact(&body, options.attempts).await?;

        tracing::info!(
            old_plan = %change.old.plan_id,
            new_subscription_id = %change.new.id,
            "plan changed"
        );
        self.events.emit(SubscriptionEvent::SubscriptionPlanChanged {
            old: change.old.clone(),
            new: change.new.clone(),
        });
        Ok(change)
    }

    /// Subscriptions whose `ends_at` falls within the next `days` days.
    pub async fn subscriptions_ending_within(&self, days: u32) -> Result<Vec<Subscription>> {
        let now = self.now();
        let until = Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                SubscriptionError::InvalidArgument(format!("{days} days is out of range"))
            })?;

        let filter = SubscriptionFilter::default().ending_between(now, until);
        let mut tx = self.store.begin().await?;
        let result = tx.list_subscriptions(&filter).await;
        finish_read(tx, result).await
    }

    /// [`subscriptions_ending_within`](Self::subscriptions_ending_within) the
    /// configured window.
    pub async fn subscriptions_ending_soon(&self) -> Result<Vec<Subscription>> {
        self.subscriptions_ending_within(self.config.ending_soon_days)
            .await
    }
}

async fn subscription_with_plan(
    tx: &mut dyn StoreTransaction,
    id: &SubscriptionId,
) -> Result<(Subscription, Plan)> {
    let subscription = lifecycle::load_subscription(tx, id).await?;
    let plan = lifecycle::load_plan(tx, &subscription.plan_id).await?;
    Ok((subscription, plan))
}

async fn summary_in(
    tx: &mut dyn StoreTransaction,
    id: &SubscriptionId,
    feature_name: &str,
) -> Result<LedgerSummary> {
    let (subscription, plan) = subscription_with_plan(tx, id).await?;
    let feature = lifecycle::load_feature(tx, feature_name).await?;
    lifecycle::feature_summary(tx, &subscription, &plan, &feature).await
}
