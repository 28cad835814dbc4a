//! Delivery-scoped database transaction sharing.
//!
//! The duplicate-detection decorator opens one transaction per delivery,
//! inserts the inbox marker in it, and hands it down the chain through the
//! [`ServiceScope`](conveyor_core::ServiceScope) so handlers can write
//! business state atomically with the marker. After the chain returns, the
//! decorator takes the transaction back and commits or rolls back.

use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// The transaction a delivery runs in, shared between the inbox decorator
/// and the handler.
///
/// Handlers look it up from the scope and run their statements through it:
///
/// ```ignore
/// let tx = scope
///     .get::<DeliveryTransaction>()
///     .ok_or_else(|| HandlerError::Database("no delivery transaction".into()))?;
/// let mut guard = tx.lock().await;
/// let tx = guard
///     .as_mut()
///     .ok_or_else(|| HandlerError::Database("transaction already settled".into()))?;
/// sqlx::query("INSERT INTO orders ...").execute(&mut **tx).await?;
/// ```
///
/// Handlers must not commit or roll back; the decorator settles the
/// transaction based on the chain outcome.
#[derive(Clone)]
pub struct DeliveryTransaction {
    inner: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl DeliveryTransaction {
    /// Wrap a freshly begun transaction.
    #[must_use]
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Lock the transaction for use. The slot is `None` once the
    /// surrounding decorator has settled the delivery.
    pub async fn lock(&self) -> MutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        self.inner.lock().await
    }

    /// Take the transaction back for commit or rollback. Returns `None` if
    /// it was already settled.
    pub(crate) async fn take(&self) -> Option<Transaction<'static, Postgres>> {
        self.inner.lock().await.take()
    }
}

impl std::fmt::Debug for DeliveryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeliveryTransaction")
    }
}
