//! Scoped transactions over a [`HierarchyStore`].
//!
//! `with_transaction` opens a transaction, hands it to `op`, and commits on
//! `Ok` or rolls back on `Err`. If the returned future is dropped half-way
//! (deadline, cancelled request) the transaction is dropped uncommitted,
//! which the store contract treats as a rollback.
//!
//! `op` receives the transaction by mutable reference and returns a boxed
//! future borrowing it, so everything else it needs must be moved in:
//!
//! ```ignore
//! let id = id.clone();
//! with_transaction(store, move |tx| Box::pin(async move {
//!     query::load(tx, &id).await
//! })).await?;
//! ```

use futures::future::BoxFuture;

use cadre_state::{HierarchyStore, StoreTransaction};

use crate::HierarchyError;

pub async fn with_transaction<S, T, F>(store: &S, op: F) -> Result<T, HierarchyError>
where
    S: HierarchyStore + ?Sized,
    F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> BoxFuture<'t, Result<T, HierarchyError>>,
{
    let mut tx = store.begin().await?;
    match op(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    error = %rollback_err,
                    cause = %err,
                    "Rollback failed after aborted operation"
                );
            }
            Err(err)
        }
    }
}
