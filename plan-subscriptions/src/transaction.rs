//! Retrying transaction runner.

use crate::{Clock, Result, StoreTransaction, SubscriptionError, SubscriptionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Work executed atomically inside one store transaction.
///
/// `run` may be invoked several times when commits conflict, each time on a
/// fresh transaction and with a fresh `now`.
#[async_trait]
pub trait TransactionBody: Send + Sync {
    type Output: Send;

    async fn run(&self, tx: &mut dyn StoreTransaction, now: DateTime<Utc>) -> Result<Self::Output>;
}

/// Run `body` in a transaction, retrying on conflict.
///
/// `attempts` is the total number of tries (at least one). Business-rule
/// failures roll back and return immediately; only
/// [`SubscriptionError::TransactionConflict`] triggers another attempt.
pub async fn run_in_transaction<B>(
    store: &dyn SubscriptionStore,
    clock: &dyn Clock,
    body: &B,
    attempts: u32,
) -> Result<B::Output>
where
    B: TransactionBody + ?Sized,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        let mut tx = store.begin().await?;
        let now = clock.now();

        let error = match body.run(tx.as_mut(), now).await {
            Ok(output) => match tx.commit().await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "transaction committed after retry");
                    }
                    return Ok(output);
                }
                Err(e) => e,
            },
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(error = %rollback_error, "rollback failed");
                }
                e
            }
        };

        if !error.is_retryable() {
            return Err(error);
        }
        tracing::warn!(attempt, attempts, "transaction conflict");
    }

    Err(SubscriptionError::TransactionConflict { attempts })
}

/// Close a read-only transaction, keeping the read's own result.
pub(crate) async fn finish_read<T>(tx: Box<dyn StoreTransaction>, result: Result<T>) -> Result<T> {
    tx.rollback().await?;
    result
}
