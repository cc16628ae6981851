//! Transaction coordinator.

use crate::connection::ConnectionManager;
use crate::error::StoreError;
use crate::operations::Operations;
use crate::transaction::state::{TransactionScope, TransactionState};
use crate::types::{Scope, TransactionId};
use aura_storage::{Connection, Engine, NativeTransaction, TransactionMode};
use std::future::{poll_fn, Future};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Native transaction type of an engine.
pub type TransactionOf<E> = <<E as Engine>::Connection as Connection>::Transaction;

/// Runs units of work inside native transactions.
///
/// Each [`execute`](Self::execute) opens exactly one native transaction,
/// hands the unit of work an [`Operations`] handle bound to it, and resolves
/// only once the native transaction has committed or aborted.
pub struct TransactionCoordinator<E: Engine> {
    connections: Arc<ConnectionManager<E>>,
    next_id: AtomicU64,
}

impl<E: Engine> TransactionCoordinator<E> {
    /// Creates a coordinator over a shared connection manager.
    pub fn new(connections: Arc<ConnectionManager<E>>) -> Self {
        Self {
            connections,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager<E>> {
        &self.connections
    }

    /// Runs `unit_of_work` in one transaction over `scope`.
    ///
    /// The result is returned only if the transaction commits. If the unit
    /// of work fails, the transaction is aborted and the unit of work's own
    /// error is returned, whatever error the engine attaches to the abort.
    /// If the engine aborts the transaction on its own (for example a quota
    /// failure at commit), the result is `StoreError::TransactionAborted`.
    ///
    /// The unit of work must not await anything but the operations it is
    /// given; see [`Operations`] on premature commit. Every time the unit of
    /// work suspends, the native transaction is told the turn ended.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` for an empty scope
    /// - `UnknownCollection` for a collection missing from the schema
    /// - connection errors from [`ConnectionManager::connect`]
    /// - the unit of work's error
    /// - `TransactionAborted` when the engine aborts on its own
    pub async fn execute<F, Fut, T, Err>(
        &self,
        scope: impl Into<Scope>,
        mode: TransactionMode,
        unit_of_work: F,
    ) -> Result<T, Err>
    where
        F: FnOnce(Operations<TransactionOf<E>>) -> Fut,
        Fut: Future<Output = Result<T, Err>>,
        Err: From<StoreError>,
    {
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut txn = TransactionScope::new(id, scope.into(), mode);
        if txn.scope().is_empty() {
            return Err(StoreError::invalid_operation("transaction scope is empty").into());
        }
        let schema = Arc::clone(self.connections.schema());
        for name in txn.scope().collections() {
            schema.require(name)?;
        }

        let connection = self.connections.connect().await?;
        let native = match connection.transaction(txn.scope().collections(), mode) {
            Ok(native) => native,
            Err(source) => {
                txn.transition(TransactionState::Aborted)?;
                return Err(StoreError::operation(txn.scope().to_string(), "transaction", source).into());
            }
        };
        txn.transition(TransactionState::Active)?;
        debug!(txn = %id, native = native.id(), scope = %txn.scope(), %mode, "transaction started");

        let finished = native.finished();
        let outcome = drive(&native, unit_of_work(Operations::new(native.clone(), schema))).await;

        match outcome {
            Ok(value) => {
                txn.transition(TransactionState::Committing)?;
                native.settle();
                match finished.wait().await {
                    Ok(()) => {
                        txn.transition(TransactionState::Committed)?;
                        debug!(txn = %id, "transaction committed");
                        Ok(value)
                    }
                    Err(source) => {
                        txn.transition(TransactionState::Aborted)?;
                        warn!(txn = %id, error = %source, "transaction aborted by engine");
                        Err(StoreError::TransactionAborted { source }.into())
                    }
                }
            }
            Err(err) => {
                txn.transition(TransactionState::Aborting)?;
                native.abort();
                // The unit of work's error wins over the engine's abort error.
                let committed = finished.wait().await.is_ok();
                if committed {
                    txn.transition(TransactionState::Committed)?;
                    warn!(txn = %id, "unit of work failed after its transaction committed");
                } else {
                    txn.transition(TransactionState::Aborted)?;
                    debug!(txn = %id, "transaction aborted");
                }
                Err(err)
            }
        }
    }
}

/// Polls the unit of work, settling the transaction whenever it suspends.
async fn drive<N, Fut>(native: &N, work: Fut) -> Fut::Output
where
    N: NativeTransaction,
    Fut: Future,
{
    let mut work = pin!(work);
    poll_fn(|cx| {
        let poll = work.as_mut().poll(cx);
        if poll.is_pending() {
            native.settle();
        }
        poll
    })
    .await
}
