//! Connection lifecycle.
//!
//! The [`ConnectionManager`] owns the single logical connection to the
//! engine. The first [`connect`](ConnectionManager::connect) opens it and
//! applies the schema in the engine's upgrade callback; calls arriving while
//! that open is in flight join it instead of issuing their own.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::schema::Schema;
use aura_storage::{Connection, Engine};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Observable state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no open in flight.
    Closed,
    /// An open is in flight.
    Opening,
    /// The connection is open.
    Open,
}

type Outcome<C> = watch::Receiver<Option<StoreResult<C>>>;

enum Lifecycle<C> {
    Closed,
    Opening { attempt: u64, outcome: Outcome<C> },
    Open(C),
}

enum Role<C> {
    Leader(u64, watch::Sender<Option<StoreResult<C>>>),
    Follower(Outcome<C>),
}

/// Owns the connection to the engine.
///
/// State machine: `Closed → Opening → Open → Closed`. A failed or blocked
/// open returns to `Closed`, so the next call retries from scratch.
pub struct ConnectionManager<E: Engine> {
    engine: E,
    config: StoreConfig,
    schema: Arc<Schema>,
    lifecycle: Mutex<Lifecycle<E::Connection>>,
    next_attempt: AtomicU64,
}

impl<E: Engine> ConnectionManager<E> {
    /// Creates a manager; nothing is opened until the first connect.
    pub fn new(engine: E, config: StoreConfig, schema: Schema) -> Self {
        Self {
            engine,
            config,
            schema: Arc::new(schema),
            lifecycle: Mutex::new(Lifecycle::Closed),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        match &*self.lifecycle.lock() {
            Lifecycle::Closed => ConnectionState::Closed,
            Lifecycle::Opening { .. } => ConnectionState::Opening,
            Lifecycle::Open(_) => ConnectionState::Open,
        }
    }

    /// Returns the open connection, opening it first if needed.
    ///
    /// Concurrent calls made before the open resolves share one engine open
    /// request and receive the same connection or the same error.
    ///
    /// # Errors
    ///
    /// - `ConnectionBlocked` if another connection holds an older version open
    /// - `Connection` for any other open failure, including a stored version
    ///   newer than the configured one, or a `close` issued while opening
    pub async fn connect(&self) -> StoreResult<E::Connection> {
        let role = {
            let mut lifecycle = self.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Open(connection) => return Ok(connection.clone()),
                Lifecycle::Opening { attempt, outcome } => {
                    debug!(attempt, database = %self.config.name, "joining open in flight");
                    Role::Follower(outcome.clone())
                }
                Lifecycle::Closed => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    *lifecycle = Lifecycle::Opening {
                        attempt,
                        outcome: rx,
                    };
                    Role::Leader(attempt, tx)
                }
            }
        };

        match role {
            Role::Leader(attempt, outcome) => self.lead(attempt, outcome).await,
            Role::Follower(outcome) => follow(outcome).await,
        }
    }

    /// Closes the connection and forgets any open in flight.
    ///
    /// The next connect opens a fresh connection.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Closed);
        match previous {
            Lifecycle::Open(connection) => {
                connection.close();
                info!(database = %self.config.name, "connection closed");
            }
            Lifecycle::Opening { attempt, .. } => {
                info!(attempt, database = %self.config.name, "connection closed while opening");
            }
            Lifecycle::Closed => {}
        }
    }

    async fn lead(
        &self,
        attempt: u64,
        outcome: watch::Sender<Option<StoreResult<E::Connection>>>,
    ) -> StoreResult<E::Connection> {
        let mut guard = AttemptGuard {
            lifecycle: &self.lifecycle,
            attempt,
            armed: true,
        };

        let schema = Arc::clone(&self.schema);
        let reset = self.config.reset_on_upgrade;
        let opened = self
            .engine
            .open(&self.config.name, self.config.version, move |editor, change| {
                schema.apply(editor, change, reset)
            })
            .await;
        guard.armed = false;

        let result = {
            let mut lifecycle = self.lifecycle.lock();
            let current = matches!(
                &*lifecycle,
                Lifecycle::Opening { attempt: a, .. } if *a == attempt
            );
            match opened {
                Ok(connection) if current => {
                    info!(
                        database = %self.config.name,
                        version = self.config.version,
                        collections = connection.collection_names().len(),
                        "connection opened"
                    );
                    *lifecycle = Lifecycle::Open(connection.clone());
                    Ok(connection)
                }
                Ok(connection) => {
                    connection.close();
                    warn!(attempt, database = %self.config.name, "discarding connection closed while opening");
                    Err(StoreError::connection("connection closed while opening"))
                }
                Err(err) => {
                    if current {
                        *lifecycle = Lifecycle::Closed;
                    }
                    let err = StoreError::from_open(err);
                    warn!(attempt, database = %self.config.name, error = %err, "connection failed");
                    Err(err)
                }
            }
        };

        outcome.send_replace(Some(result.clone()));
        result
    }
}

impl<E: Engine> Drop for ConnectionManager<E> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn follow<C: Clone>(mut outcome: Outcome<C>) -> StoreResult<C> {
    match outcome.wait_for(Option::is_some).await {
        Ok(result) => result
            .clone()
            .unwrap_or_else(|| Err(StoreError::connection("open attempt abandoned"))),
        Err(_) => Err(StoreError::connection("open attempt abandoned")),
    }
}

/// Resets `Opening` to `Closed` when the leader is dropped mid-open.
struct AttemptGuard<'a, C> {
    lifecycle: &'a Mutex<Lifecycle<C>>,
    attempt: u64,
    armed: bool,
}

impl<C> Drop for AttemptGuard<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut lifecycle = self.lifecycle.lock();
        if matches!(&*lifecycle, Lifecycle::Opening { attempt, .. } if *attempt == self.attempt) {
            *lifecycle = Lifecycle::Closed;
            debug!(attempt = self.attempt, "open attempt abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CollectionDescriptor;
    use aura_storage::MemoryEngine;
    use std::future::Future;
    use std::task::{Context, Wake, Waker};

    fn manager(engine: &MemoryEngine) -> ConnectionManager<MemoryEngine> {
        let schema = Schema::new(vec![CollectionDescriptor::new("setting", "id")]).unwrap();
        ConnectionManager::new(engine.clone(), StoreConfig::new("test", 1), schema)
    }

    #[tokio::test]
    async fn connect_reuses_open_connection() {
        let engine = MemoryEngine::new();
        let manager = manager(&engine);
        assert_eq!(manager.state(), ConnectionState::Closed);

        let first = manager.connect().await.unwrap();
        let second = manager.connect().await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(engine.open_requests(), 1);
    }

    #[tokio::test]
    async fn close_then_connect_reopens() {
        let engine = MemoryEngine::new();
        let manager = manager(&engine);
        let first = manager.connect().await.unwrap();
        manager.close();
        assert!(first.is_closed());
        assert_eq!(manager.state(), ConnectionState::Closed);

        let second = manager.connect().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(engine.open_requests(), 2);
    }

    #[tokio::test]
    async fn dropped_leader_resets_state() {
        let engine = MemoryEngine::new();
        let manager = manager(&engine);
        engine.hold_opens();
        {
            let leader = std::pin::pin!(manager.connect());
            let waker = noop_waker();
            let mut cx = Context::from_waker(&waker);
            assert!(leader.poll(&mut cx).is_pending());
            assert_eq!(manager.state(), ConnectionState::Opening);
        }
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    fn noop_waker() -> Waker {
        struct Noop;
        impl Wake for Noop {
            fn wake(self: Arc<Self>) {}
        }
        Waker::from(Arc::new(Noop))
    }

    #[tokio::test]
    async fn drop_closes_connection() {
        let engine = MemoryEngine::new();
        let connection = {
            let manager = manager(&engine);
            manager.connect().await.unwrap()
        };
        assert!(connection.is_closed());
        assert_eq!(engine.open_connections("test"), 0);
    }
}
