//! Engine dependencies (using traits for testability)
//!
//! Every edit operation and the scheduler take an [`EngineDeps`]. Storage,
//! notification delivery and time are trait objects so tests can swap in
//! the in-memory store, a recording notifier and a settable clock.

use futures::future::BoxFuture;
use std::sync::Arc;

use super::store::{BaseEditStore, StoreTransaction};
use super::traits::{BaseClock, BaseNotifier, EditNotification, SystemClock, TracingNotifier};
use crate::common::UserId;
use crate::config::ConfigHandle;
use crate::domains::edits::error::EditError;

#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn BaseEditStore>,
    pub notifier: Arc<dyn BaseNotifier>,
    pub clock: Arc<dyn BaseClock>,
    pub config: ConfigHandle,
}

impl EngineDeps {
    pub fn new(
        store: Arc<dyn BaseEditStore>,
        notifier: Arc<dyn BaseNotifier>,
        clock: Arc<dyn BaseClock>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
        }
    }

    /// Production wiring: log-only notifications and the system clock.
    pub fn with_store(store: Arc<dyn BaseEditStore>, config: ConfigHandle) -> Self {
        Self::new(store, Arc::new(TracingNotifier), Arc::new(SystemClock), config)
    }

    /// Run `f` inside one store transaction.
    ///
    /// Commits when `f` succeeds and rolls back when it fails. The whole unit,
    /// including waiting for locks, is bounded by `transaction_timeout`; a
    /// unit that runs out of time is dropped (discarding its writes) and
    /// reported as `TransientStoreFailure`.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, EditError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> BoxFuture<'t, Result<T, EditError>>
            + Send,
    {
        let timeout = self.config.current().transaction_timeout;
        let store = self.store.clone();

        let unit = async move {
            let mut tx = store.begin().await?;
            let result = f(tx.as_mut()).await;
            match result {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            }
        };

        match tokio::time::timeout(timeout, unit).await {
            Ok(result) => result,
            Err(_) => Err(EditError::TransientStoreFailure(format!(
                "transaction did not finish within {:?}",
                timeout
            ))),
        }
    }

    /// Fire-and-forget notification; delivery errors are logged only.
    pub async fn notify(&self, recipients: &[UserId], notification: EditNotification) {
        if recipients.is_empty() {
            return;
        }
        if let Err(e) = self.notifier.notify(recipients, &notification).await {
            tracing::warn!(
                edit_id = %notification.edit_id(),
                error = %e,
                "Failed to deliver edit notification"
            );
        }
    }
}
