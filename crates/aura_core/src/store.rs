//! Store facade.

use crate::config::StoreConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{StoreError, StoreResult};
use crate::operations::Operations;
use crate::schema::Schema;
use crate::transaction::{TransactionCoordinator, TransactionOf};
use crate::types::Scope;
use aura_storage::{Engine, Key, Record, TransactionMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// The public entry point of the store.
///
/// Every convenience method runs in its own one-shot transaction: read-write
/// for mutations, read-only for reads. Use [`execute`](Self::execute) to
/// group several operations atomically.
///
/// # Example
///
/// ```rust
/// use aura_core::{CollectionDescriptor, Schema, Store, StoreConfig};
/// use aura_storage::{Key, MemoryEngine};
/// use serde_json::json;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let schema = Schema::new(vec![CollectionDescriptor::new("book", "id").auto_key()]).unwrap();
/// let store = Store::new(MemoryEngine::new(), StoreConfig::new("shelf", 1), schema);
///
/// let mut book = json!({ "title": "Aura" });
/// let key = store.add("book", &mut book).await.unwrap();
/// assert_eq!(key, Key::Integer(1));
/// assert_eq!(book["id"], 1);
/// # });
/// ```
pub struct Store<E: Engine> {
    connections: Arc<ConnectionManager<E>>,
    coordinator: TransactionCoordinator<E>,
}

impl<E: Engine> Store<E> {
    /// Creates a store. Nothing is opened until first use.
    pub fn new(engine: E, config: StoreConfig, schema: Schema) -> Self {
        let connections = Arc::new(ConnectionManager::new(engine, config, schema));
        Self {
            coordinator: TransactionCoordinator::new(Arc::clone(&connections)),
            connections,
        }
    }

    /// Opens the connection, or returns the open one.
    pub async fn connect(&self) -> StoreResult<E::Connection> {
        self.connections.connect().await
    }

    /// Closes the connection. The next call reopens it.
    pub fn close(&self) {
        self.connections.close();
    }

    /// Returns the connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        self.connections.schema()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        self.connections.config()
    }

    /// Returns the engine.
    pub fn engine(&self) -> &E {
        self.connections.engine()
    }

    /// Runs a unit of work in one transaction.
    ///
    /// See [`TransactionCoordinator::execute`].
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
        self.coordinator.execute(scope, mode, unit_of_work).await
    }

    /// Inserts a record; a generated key is written back into it.
    ///
    /// The record is only updated once the transaction has committed.
    pub async fn add(&self, collection: &str, record: &mut Record) -> StoreResult<Key> {
        let mut staged = record.clone();
        let target = &mut staged;
        let key = self
            .execute(collection, TransactionMode::ReadWrite, move |ops| {
                ops.add(collection, target)
            })
            .await?;
        *record = staged;
        Ok(key)
    }

    /// Inserts or replaces a record; a generated key is written back into it.
    ///
    /// The record is only updated once the transaction has committed.
    pub async fn put(&self, collection: &str, record: &mut Record) -> StoreResult<Key> {
        let mut staged = record.clone();
        let target = &mut staged;
        let key = self
            .execute(collection, TransactionMode::ReadWrite, move |ops| {
                ops.put(collection, target)
            })
            .await?;
        *record = staged;
        Ok(key)
    }

    /// Puts every record in one transaction.
    ///
    /// Generated keys are written back only if every put committed; on
    /// failure the records are left as they were.
    pub async fn put_all(&self, collection: &str, records: &mut [Record]) -> StoreResult<Vec<Key>> {
        let mut staged = records.to_vec();
        let targets = staged.as_mut_slice();
        let keys = self
            .execute(collection, TransactionMode::ReadWrite, |ops| async move {
                ops.put_all(collection, targets).await
            })
            .await?;
        records.clone_from_slice(&staged);
        Ok(keys)
    }

    /// Looks up a record by primary key.
    pub async fn get_by_key(&self, collection: &str, key: impl Into<Key>) -> StoreResult<Option<Record>> {
        let key = key.into();
        self.execute(collection, TransactionMode::ReadOnly, |ops| {
            ops.get_by_key(collection, key)
        })
        .await
    }

    /// Looks up the first record whose indexed field equals `value`.
    pub async fn get_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<Option<Record>> {
        let value = value.into();
        self.execute(collection, TransactionMode::ReadOnly, |ops| {
            ops.get_by_index(collection, index, value)
        })
        .await
    }

    /// Returns every record. Order is unspecified.
    pub async fn get_all(&self, collection: &str) -> StoreResult<Vec<Record>> {
        self.execute(collection, TransactionMode::ReadOnly, |ops| {
            ops.get_all(collection)
        })
        .await
    }

    /// Returns every record whose indexed field equals `value`.
    pub async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<Vec<Record>> {
        let value = value.into();
        self.execute(collection, TransactionMode::ReadOnly, |ops| {
            ops.get_all_by_index(collection, index, value)
        })
        .await
    }

    /// Deletes the record with the primary key; a no-op if absent.
    pub async fn delete_by_key(&self, collection: &str, key: impl Into<Key>) -> StoreResult<()> {
        let key = key.into();
        self.execute(collection, TransactionMode::ReadWrite, |ops| {
            ops.delete_by_key(collection, key)
        })
        .await
    }

    /// Deletes the record whose unique indexed field equals `value`.
    pub async fn delete_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<bool> {
        let value = value.into();
        self.execute(collection, TransactionMode::ReadWrite, |ops| async move {
            ops.delete_by_index(collection, index, value).await
        })
        .await
    }

    /// Deletes every record whose indexed field equals `value`.
    pub async fn delete_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<u64> {
        let value = value.into();
        self.execute(collection, TransactionMode::ReadWrite, |ops| async move {
            ops.delete_all_by_index(collection, index, value).await
        })
        .await
    }

    /// Deletes every record.
    pub async fn delete_all(&self, collection: &str) -> StoreResult<()> {
        self.clear(collection).await
    }

    /// Deletes every record.
    pub async fn clear(&self, collection: &str) -> StoreResult<()> {
        self.execute(collection, TransactionMode::ReadWrite, |ops| {
            ops.clear(collection)
        })
        .await
    }

    /// Counts records.
    pub async fn count(&self, collection: &str) -> StoreResult<u64> {
        self.execute(collection, TransactionMode::ReadOnly, |ops| {
            ops.count(collection)
        })
        .await
    }

    /// Looks up a typed record by primary key.
    pub async fn get_typed<R: DeserializeOwned>(
        &self,
        collection: &str,
        key: impl Into<Key>,
    ) -> StoreResult<Option<R>> {
        let key = key.into();
        self.execute(collection, TransactionMode::ReadOnly, |ops| async move {
            ops.get_typed(collection, key).await
        })
        .await
    }

    /// Inserts or replaces a typed record.
    pub async fn put_typed<R: Serialize>(&self, collection: &str, value: &R) -> StoreResult<Key> {
        let mut record = serde_json::to_value(value)?;
        self.put(collection, &mut record).await
    }
}
