//! Storage boundary and the in-memory store.

use crate::{
    Feature, FeatureId, Plan, PlanId, Result, SubscriberRef, Subscription, SubscriptionError,
    SubscriptionId, Supplement, Usage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Filter for listing catalog features by flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFilter {
    pub countable: Option<bool>,
    pub resettable: Option<bool>,
    pub extendable: Option<bool>,
}

impl FeatureFilter {
    pub fn countable(mut self, countable: bool) -> Self {
        self.countable = Some(countable);
        self
    }

    pub fn resettable(mut self, resettable: bool) -> Self {
        self.resettable = Some(resettable);
        self
    }

    pub fn extendable(mut self, extendable: bool) -> Self {
        self.extendable = Some(extendable);
        self
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        self.countable.map_or(true, |c| feature.countable == c)
            && self.resettable.map_or(true, |r| feature.resettable == r)
            && self.extendable.map_or(true, |e| feature.extendable == e)
    }
}

/// Filter for listing subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub subscriber: Option<SubscriberRef>,
    pub plan_id: Option<PlanId>,
    /// Inclusive `ends_at` range.
    pub ends_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl SubscriptionFilter {
    pub fn for_subscriber(subscriber: &SubscriberRef) -> Self {
        Self {
            subscriber: Some(subscriber.clone()),
            ..Self::default()
        }
    }

    pub fn for_plan(plan_id: &PlanId) -> Self {
        Self {
            plan_id: Some(plan_id.clone()),
            ..Self::default()
        }
    }

    pub fn ending_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.ends_between = Some((from, to));
        self
    }

    pub fn matches(&self, subscription: &Subscription) -> bool {
        if let Some(ref subscriber) = self.subscriber {
            if &subscription.subscriber != subscriber {
                return false;
            }
        }
        if let Some(ref plan_id) = self.plan_id {
            if &subscription.plan_id != plan_id {
                return false;
            }
        }
        if let Some((from, to)) = self.ends_between {
            if subscription.ends_at < from || subscription.ends_at > to {
                return false;
            }
        }
        true
    }
}

/// Filter for ledger rows of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerFilter {
    pub subscription_id: SubscriptionId,
    pub feature_id: Option<FeatureId>,
}

impl LedgerFilter {
    pub fn new(subscription_id: &SubscriptionId) -> Self {
        Self {
            subscription_id: subscription_id.clone(),
            feature_id: None,
        }
    }

    pub fn with_feature(mut self, feature_id: &FeatureId) -> Self {
        self.feature_id = Some(feature_id.clone());
        self
    }

    fn matches(&self, subscription_id: &SubscriptionId, feature_id: &FeatureId) -> bool {
        &self.subscription_id == subscription_id
            && self.feature_id.as_ref().map_or(true, |f| f == feature_id)
    }

    pub fn matches_usage(&self, usage: &Usage) -> bool {
        self.matches(&usage.subscription_id, &usage.feature_id)
    }

    pub fn matches_supplement(&self, supplement: &Supplement) -> bool {
        self.matches(&supplement.subscription_id, &supplement.feature_id)
    }
}

/// Entry point to the host's persistence layer.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Open a unit of work. Nothing it writes is visible to others until
    /// [`StoreTransaction::commit`] succeeds.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// One atomic unit of work against the store.
///
/// `commit` returns [`SubscriptionError::TransactionConflict`] when the
/// store could not serialize the transaction; the caller retries the whole
/// unit of work.
#[async_trait]
pub trait StoreTransaction: Send {
    // Plans
    async fn find_plan(&mut self, id: &PlanId) -> Result<Option<Plan>>;
    async fn find_plan_by_name(&mut self, name: &str) -> Result<Option<Plan>>;
    async fn list_plans(&mut self) -> Result<Vec<Plan>>;
    async fn save_plan(&mut self, plan: &Plan) -> Result<()>;

    // Features
    async fn find_feature(&mut self, id: &FeatureId) -> Result<Option<Feature>>;
    async fn find_feature_by_name(&mut self, name: &str) -> Result<Option<Feature>>;
    async fn list_features(&mut self, filter: &FeatureFilter) -> Result<Vec<Feature>>;
    async fn save_feature(&mut self, feature: &Feature) -> Result<()>;

    // Subscriptions
    async fn find_subscription(&mut self, id: &SubscriptionId) -> Result<Option<Subscription>>;
    /// Matching subscriptions in creation order.
    async fn list_subscriptions(&mut self, filter: &SubscriptionFilter)
        -> Result<Vec<Subscription>>;
    async fn save_subscription(&mut self, subscription: &Subscription) -> Result<()>;

    // Ledger (append-only)
    async fn list_usages(&mut self, filter: &LedgerFilter) -> Result<Vec<Usage>>;
    async fn insert_usage(&mut self, usage: &Usage) -> Result<()>;
    async fn list_supplements(&mut self, filter: &LedgerFilter) -> Result<Vec<Supplement>>;
    async fn insert_supplement(&mut self, supplement: &Supplement) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct Tables {
    plans: Vec<Plan>,
    features: Vec<Feature>,
    subscriptions: Vec<Subscription>,
    usages: Vec<Usage>,
    supplements: Vec<Supplement>,
}

#[derive(Debug, Default)]
struct Committed {
    version: u64,
    tables: Tables,
}

fn lock_error(operation: &str) -> SubscriptionError {
    SubscriptionError::Storage(format!("lock poisoned during {operation}"))
}

fn upsert<T, K: PartialEq>(rows: &mut Vec<T>, row: T, key: impl Fn(&T) -> &K) {
    match rows.iter().position(|existing| key(existing) == key(&row)) {
        Some(index) => rows[index] = row,
        None => rows.push(row),
    }
}

/// In-memory store with snapshot isolation.
///
/// Each transaction works on a private copy of the tables. A commit succeeds
/// only if no other transaction committed since this one began; otherwise it
/// fails with [`SubscriptionError::TransactionConflict`].
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionStore {
    committed: Arc<RwLock<Committed>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writing commits fail with a conflict.
    pub fn fail_next_commits(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of successful writing commits so far.
    pub fn version(&self) -> Result<u64> {
        let committed = self.committed.read().map_err(|_| lock_error("version"))?;
        Ok(committed.version)
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let committed = self.committed.read().map_err(|_| lock_error("begin"))?;
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            base_version: committed.version,
            tables: committed.tables.clone(),
            dirty: false,
        }))
    }
}

struct InMemoryTransaction {
    store: InMemorySubscriptionStore,
    base_version: u64,
    tables: Tables,
    dirty: bool,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_plan(&mut self, id: &PlanId) -> Result<Option<Plan>> {
        Ok(self.tables.plans.iter().find(|p| &p.id == id).cloned())
    }

    async fn find_plan_by_name(&mut self, name: &str) -> Result<Option<Plan>> {
        Ok(self.tables.plans.iter().find(|p| p.name == name).cloned())
    }

    async fn list_plans(&mut self) -> Result<Vec<Plan>> {
        Ok(self.tables.plans.clone())
    }

    async fn save_plan(&mut self, plan: &Plan) -> Result<()> {
        upsert(&mut self.tables.plans, plan.clone(), |p| &p.id);
        self.dirty = true;
        Ok(())
    }

    async fn find_feature(&mut self, id: &FeatureId) -> Result<Option<Feature>> {
        Ok(self.tables.features.iter().find(|f| &f.id == id).cloned())
    }

    async fn find_feature_by_name(&mut self, name: &str) -> Result<Option<Feature>> {
        Ok(self.tables.features.iter().find(|f| f.name == name).cloned())
    }

    async fn list_features(&mut self, filter: &FeatureFilter) -> Result<Vec<Feature>> {
        Ok(self
            .tables
            .features
            .iter()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect())
    }

    async fn save_feature(&mut self, feature: &Feature) -> Result<()> {
        upsert(&mut self.tables.features, feature.clone(), |f| &f.id);
        self.dirty = true;
        Ok(())
    }

    async fn find_subscription(&mut self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self
            .tables
            .subscriptions
            .iter()
            .find(|s| &s.id == id)
            .cloned())
    }

    async fn list_subscriptions(
        &mut self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>> {
        Ok(self
            .tables
            .subscriptions
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn save_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        upsert(&mut self.tables.subscriptions, subscription.clone(), |s| &s.id);
        self.dirty = true;
        Ok(())
    }

    async fn list_usages(&mut self, filter: &LedgerFilter) -> Result<Vec<Usage>> {
        Ok(self
            .tables
            .usages
            .iter()
            .filter(|u| filter.matches_usage(u))
            .cloned()
            .collect())
    }

    async fn insert_usage(&mut self, usage: &Usage) -> Result<()> {
        self.tables.usages.push(usage.clone());
        self.dirty = true;
        Ok(())
    }

    async fn list_supplements(&mut self, filter: &LedgerFilter) -> Result<Vec<Supplement>> {
        Ok(self
            .tables
            .supplements
            .iter()
            .filter(|s| filter.matches_supplement(s))
            .cloned()
            .collect())
    }

    async fn insert_supplement(&mut self, supplement: &Supplement) -> Result<()> {
        self.tables.supplements.push(supplement.clone());
        self.dirty = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            store,
            base_version,
            tables,
            dirty,
        } = *self;
        if !dirty {
            return Ok(());
        }
        if store.take_injected_conflict() {
            tracing::debug!("injected commit conflict");
            return Err(SubscriptionError::TransactionConflict { attempts: 1 });
        }

        let mut committed = store.committed.write().map_err(|_| lock_error("commit"))?;
        if committed.version != base_version {
            tracing::debug!(
                base_version,
                current_version = committed.version,
                "stale snapshot, rejecting commit"
            );
            return Err(SubscriptionError::TransactionConflict { attempts: 1 });
        }
        committed.tables = tables;
        committed.version += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemorySubscriptionStore::new();
        let plan = Plan::new("Pro", Amount::from_int(10));

        let mut tx = store.begin().await.unwrap();
        tx.save_plan(&plan).await.unwrap();
        assert!(tx.find_plan(&plan.id).await.unwrap().is_some());

        let mut other = store.begin().await.unwrap();
        assert!(other.find_plan(&plan.id).await.unwrap().is_none());
        other.rollback().await.unwrap();

        tx.commit().await.unwrap();
        let mut reader = store.begin().await.unwrap();
        assert_eq!(reader.find_plan_by_name("Pro").await.unwrap(), Some(plan));
        assert_eq!(store.version().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts() {
        let store = InMemorySubscriptionStore::new();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first
            .save_feature(&Feature::new("api_calls"))
            .await
            .unwrap();
        second.save_feature(&Feature::new("seats")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_injected_conflicts_skip_read_only_commits() {
        let store = InMemorySubscriptionStore::new();
        store.fail_next_commits(1);

        let reader = store.begin().await.unwrap();
        reader.commit().await.unwrap();

        let mut writer = store.begin().await.unwrap();
        writer.save_feature(&Feature::new("seats")).await.unwrap();
        assert!(matches!(
            writer.commit().await,
            Err(SubscriptionError::TransactionConflict { .. })
        ));

        let mut writer = store.begin().await.unwrap();
        writer.save_feature(&Feature::new("seats")).await.unwrap();
        writer.commit().await.unwrap();
    }

    #[test]
    fn test_filters() {
        let api = Feature::new("api_calls");
        let seats = Feature::new("seats").resettable(false);
        let non_resettable = FeatureFilter::default().resettable(false);
        assert!(!non_resettable.matches(&api));
        assert!(non_resettable.matches(&seats));

        let sub = SubscriptionId::from("sub_1");
        let usage = Usage::new(sub.clone(), api.id.clone(), Amount::from_int(1), Utc::now());
        assert!(LedgerFilter::new(&sub).matches_usage(&usage));
        assert!(LedgerFilter::new(&sub).with_feature(&api.id).matches_usage(&usage));
        assert!(!LedgerFilter::new(&sub).with_feature(&seats.id).matches_usage(&usage));
    }
}
