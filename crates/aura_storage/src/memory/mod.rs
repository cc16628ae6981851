//! In-memory storage engine.
//!
//! [`MemoryEngine`] reproduces the observable behavior of the browser's
//! object store engine: versioned databases with upgrade callbacks, key
//! generators, unique and non-unique indexes, index cursors, transaction
//! scopes and modes, queuing of overlapping transactions, rollback on abort,
//! and auto-commit at the end of a turn.
//!
//! It also lets tests inject the failures the browser can produce (failed or
//! delayed opens, failing writes, commit-time quota errors).

mod collection;
mod transaction;

pub use transaction::{MemoryCursor, MemoryIndex, MemoryStore, MemoryTransaction};

use crate::engine::{Connection, Engine, SchemaEditor, TransactionMode, VersionChange};
use crate::error::{EngineError, EngineResult};
use crate::key::KeyPath;
use collection::Collection;
use transaction::LiveTransaction;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct EngineState {
    databases: HashMap<String, Database>,
    faults: Faults,
    open_requests: u64,
    next_connection: u64,
    next_transaction: u64,
}

#[derive(Debug, Default)]
struct Database {
    version: u32,
    collections: BTreeMap<String, Collection>,
    /// Open connections and the version each was opened at.
    connections: BTreeMap<u64, u32>,
    /// Unfinished transactions in creation order.
    live: Vec<LiveTransaction>,
}

#[derive(Debug, Default)]
struct Faults {
    next_open: Option<EngineError>,
    next_commit: Option<EngineError>,
    writes: HashMap<String, EngineError>,
}

/// An in-process engine with the semantics of the browser's object store.
///
/// Clones share the same databases.
///
/// # Example
///
/// ```rust
/// use aura_storage::{EngineError, MemoryEngine};
///
/// let engine = MemoryEngine::new();
/// engine.fail_next_open(EngineError::from_native("UnknownError", "disk unavailable"));
/// assert_eq!(engine.open_requests(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
    /// `true` while opens are held back.
    gate: Arc<watch::Sender<bool>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an engine with no databases.
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            gate: Arc::new(gate),
        }
    }

    /// Number of open requests received so far.
    #[must_use]
    pub fn open_requests(&self) -> u64 {
        self.state.lock().open_requests
    }

    /// Holds back every open request until [`release_opens`](Self::release_opens).
    pub fn hold_opens(&self) {
        self.gate.send_replace(true);
    }

    /// Lets held and future open requests proceed.
    pub fn release_opens(&self) {
        self.gate.send_replace(false);
    }

    /// Makes the next open request fail with `error`.
    pub fn fail_next_open(&self, error: EngineError) {
        self.state.lock().faults.next_open = Some(error);
    }

    /// Makes every write to `collection` fail with `error`.
    pub fn fail_writes(&self, collection: &str, error: EngineError) {
        self.state
            .lock()
            .faults
            .writes
            .insert(collection.to_string(), error);
    }

    /// Makes the next read-write commit abort with `error`.
    pub fn fail_next_commit(&self, error: EngineError) {
        self.state.lock().faults.next_commit = Some(error);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::default();
    }

    /// Stored version of a database, if it exists.
    #[must_use]
    pub fn version(&self, database: &str) -> Option<u32> {
        self.state.lock().databases.get(database).map(|db| db.version)
    }

    /// Names of the collections of a database.
    #[must_use]
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of the indexes of a collection.
    #[must_use]
    pub fn index_names(&self, database: &str, collection: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .map(Collection::index_names)
            .unwrap_or_default()
    }

    /// Current records of a collection, in primary key order.
    #[must_use]
    pub fn records(&self, database: &str, collection: &str) -> Vec<Value> {
        self.state
            .lock()
            .databases
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .map(Collection::all)
            .unwrap_or_default()
    }

    /// Number of connections currently open on a database.
    #[must_use]
    pub fn open_connections(&self, database: &str) -> usize {
        self.state
            .lock()
            .databases
            .get(database)
            .map_or(0, |db| db.connections.len())
    }

    fn finish_open<U>(&self, name: &str, version: u32, upgrade: U) -> EngineResult<MemoryConnection>
    where
        U: FnOnce(&mut dyn SchemaEditor, VersionChange) -> EngineResult<()>,
    {
        if version == 0 {
            return Err(EngineError::data("version must be greater than zero"));
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(err) = state.faults.next_open.take() {
            return Err(err);
        }

        let db = state.databases.entry(name.to_string()).or_default();
        if version < db.version {
            return Err(EngineError::version(format!(
                "requested version {version} is less than stored version {}",
                db.version
            )));
        }
        if version > db.version {
            let blocking = db.connections.values().filter(|v| **v < version).count();
            if blocking > 0 {
                return Err(EngineError::blocked(format!(
                    "{blocking} connection(s) still hold version {} of {name}",
                    db.version
                )));
            }
            let change = VersionChange {
                old_version: db.version,
                new_version: version,
            };
            let mut editor = UpgradeEditor {
                collections: db.collections.clone(),
            };
            if let Err(err) = upgrade(&mut editor, change) {
                if change.is_initial() {
                    state.databases.remove(name);
                }
                return Err(err);
            }
            db.collections = editor.collections;
            db.version = version;
            debug!(
                database = name,
                old_version = change.old_version,
                new_version = version,
                "memory database upgraded"
            );
        }

        state.next_connection += 1;
        let id = state.next_connection;
        db.connections.insert(id, version);
        debug!(database = name, version, connection = id, "memory connection opened");

        Ok(MemoryConnection {
            inner: Arc::new(ConnectionInner {
                id,
                name: name.to_string(),
                version,
                closed: AtomicBool::new(false),
                engine: Arc::clone(&self.state),
            }),
        })
    }
}

impl Engine for MemoryEngine {
    type Connection = MemoryConnection;

    fn open<U>(
        &self,
        name: &str,
        version: u32,
        upgrade: U,
    ) -> impl Future<Output = EngineResult<MemoryConnection>>
    where
        U: FnOnce(&mut dyn SchemaEditor, VersionChange) -> EngineResult<()> + 'static,
    {
        self.state.lock().open_requests += 1;
        let engine = self.clone();
        let name = name.to_string();
        let mut gate = self.gate.subscribe();
        async move {
            // The sender lives as long as `engine`, so this cannot fail.
            let _ = gate.wait_for(|held| !*held).await;
            engine.finish_open(&name, version, upgrade)
        }
    }
}

struct UpgradeEditor {
    collections: BTreeMap<String, Collection>,
}

impl UpgradeEditor {
    fn collection(&mut self, name: &str) -> EngineResult<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| EngineError::not_found(format!("collection {name} does not exist")))
    }
}

impl SchemaEditor for UpgradeEditor {
    fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    fn create_collection(
        &mut self,
        name: &str,
        key_path: &KeyPath,
        auto_increment: bool,
    ) -> EngineResult<()> {
        if self.collections.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "collection {name} already exists"
            )));
        }
        let collection = Collection::new(key_path, auto_increment)?;
        self.collections.insert(name.to_string(), collection);
        Ok(())
    }

    fn delete_collection(&mut self, name: &str) -> EngineResult<()> {
        self.collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(format!("collection {name} does not exist")))
    }

    fn index_names(&self, collection: &str) -> EngineResult<Vec<String>> {
        self.collections
            .get(collection)
            .map(Collection::index_names)
            .ok_or_else(|| {
                EngineError::not_found(format!("collection {collection} does not exist"))
            })
    }

    fn create_index(
        &mut self,
        collection: &str,
        name: &str,
        key_path: &KeyPath,
        unique: bool,
    ) -> EngineResult<()> {
        self.collection(collection)?
            .create_index(name, key_path, unique)
    }
}

#[derive(Debug)]
struct ConnectionInner {
    id: u64,
    name: String,
    version: u32,
    closed: AtomicBool,
    engine: Arc<Mutex<EngineState>>,
}

/// A connection to a [`MemoryEngine`] database.
///
/// Clones share the same connection; closing one closes all of them.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

impl MemoryConnection {
    /// Engine-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns true once [`close`](Connection::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Connection for MemoryConnection {
    type Transaction = MemoryTransaction;

    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn version(&self) -> u32 {
        self.inner.version
    }

    fn collection_names(&self) -> Vec<String> {
        self.inner
            .engine
            .lock()
            .databases
            .get(&self.inner.name)
            .map(|db| db.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
    ) -> EngineResult<MemoryTransaction> {
        if self.is_closed() {
            return Err(EngineError::invalid_state(format!(
                "connection {} is closed",
                self.inner.id
            )));
        }
        if scope.is_empty() {
            return Err(EngineError::invalid_access(
                "a transaction needs at least one collection",
            ));
        }
        let id = {
            let mut state = self.inner.engine.lock();
            let db = state.databases.get(&self.inner.name).ok_or_else(|| {
                EngineError::invalid_state(format!("database {} no longer exists", self.inner.name))
            })?;
            if let Some(missing) = scope.iter().find(|name| !db.collections.contains_key(*name)) {
                return Err(EngineError::not_found(format!(
                    "collection {missing} does not exist"
                )));
            }
            state.next_transaction += 1;
            state.next_transaction
        };
        Ok(MemoryTransaction::begin(
            id,
            &self.inner.name,
            scope,
            mode,
            Arc::clone(&self.inner.engine),
        ))
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(db) = self.inner.engine.lock().databases.get_mut(&self.inner.name) {
            db.connections.remove(&self.inner.id);
        }
        debug!(database = %self.inner.name, connection = self.inner.id, "memory connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Cursor, Index, NativeTransaction, ObjectStore};
    use crate::key::Key;
    use serde_json::json;

    fn scope(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    async fn open_shelf(engine: &MemoryEngine, version: u32) -> EngineResult<MemoryConnection> {
        engine
            .open("shelf", version, |editor, change| {
                if change.is_initial() {
                    editor.create_collection("book", &KeyPath::single("id"), true)?;
                    editor.create_index("book", "genre_id", &KeyPath::single("genreId"), false)?;
                    editor.create_collection("chapter", &KeyPath::from(["bookId", "id"]), false)?;
                }
                Ok(())
            })
            .await
    }

    #[tokio::test]
    async fn open_runs_upgrade_once() {
        let engine = MemoryEngine::new();
        let first = open_shelf(&engine, 1).await.unwrap();
        let second = open_shelf(&engine, 1).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(engine.version("shelf"), Some(1));
        assert_eq!(engine.collection_names("shelf"), vec!["book", "chapter"]);
        assert_eq!(engine.open_requests(), 2);
    }

    #[tokio::test]
    async fn lower_version_is_rejected() {
        let engine = MemoryEngine::new();
        open_shelf(&engine, 2).await.unwrap().close();
        let err = open_shelf(&engine, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::Version { .. }));
    }

    #[tokio::test]
    async fn older_connection_blocks_upgrade() {
        let engine = MemoryEngine::new();
        let old = open_shelf(&engine, 1).await.unwrap();
        let err = open_shelf(&engine, 2).await.unwrap_err();
        assert!(matches!(err, EngineError::Blocked { .. }));

        old.close();
        assert_eq!(open_shelf(&engine, 2).await.unwrap().version(), 2);
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_previous_schema() {
        let engine = MemoryEngine::new();
        open_shelf(&engine, 1).await.unwrap().close();

        let err = engine
            .open("shelf", 2, |editor, _| {
                editor.delete_collection("book")?;
                editor.create_collection("chapter", &KeyPath::single("id"), false)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Constraint { .. }));
        assert_eq!(engine.version("shelf"), Some(1));
        assert_eq!(engine.collection_names("shelf"), vec!["book", "chapter"]);
    }

    #[tokio::test]
    async fn settle_commits_and_later_requests_fail() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        let txn = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadWrite)
            .unwrap();
        let books = txn.object_store("book").unwrap();

        assert_eq!(books.add(json!({ "title": "A" })).await, Ok(Key::Integer(1)));
        txn.settle();
        let err = books.add(json!({ "title": "B" })).await.unwrap_err();
        assert!(matches!(err, EngineError::TransactionInactive { .. }));

        assert_eq!(txn.finished().wait().await, Ok(()));
        assert_eq!(engine.records("shelf", "book").len(), 1);
    }

    #[tokio::test]
    async fn abort_rolls_back_every_collection() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        let txn = connection
            .transaction(&scope(&["book", "chapter"]), TransactionMode::ReadWrite)
            .unwrap();
        txn.object_store("book").unwrap().add(json!({})).await.unwrap();
        txn.object_store("chapter")
            .unwrap()
            .put(json!({ "bookId": 1, "id": 1 }))
            .await
            .unwrap();
        txn.abort();

        assert!(matches!(
            txn.finished().wait().await,
            Err(EngineError::Aborted { .. })
        ));
        assert!(engine.records("shelf", "book").is_empty());
        assert!(engine.records("shelf", "chapter").is_empty());
    }

    #[tokio::test]
    async fn readonly_and_scope_are_enforced() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        let txn = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadOnly)
            .unwrap();

        let err = txn.object_store("book").unwrap().put(json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::ReadOnly { .. }));
        assert!(matches!(
            txn.object_store("chapter"),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            connection.transaction(&[], TransactionMode::ReadOnly),
            Err(EngineError::InvalidAccess { .. })
        ));
    }

    #[tokio::test]
    async fn commit_fault_aborts_and_rolls_back() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        engine.fail_next_commit(EngineError::quota_exceeded("no space left"));

        let txn = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadWrite)
            .unwrap();
        txn.object_store("book").unwrap().add(json!({})).await.unwrap();
        txn.settle();

        assert!(matches!(
            txn.finished().wait().await,
            Err(EngineError::QuotaExceeded { .. })
        ));
        assert!(engine.records("shelf", "book").is_empty());
    }

    #[tokio::test]
    async fn cursor_deletes_matching_records() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        let txn = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadWrite)
            .unwrap();
        let books = txn.object_store("book").unwrap();
        for genre in [1, 2, 1] {
            books.add(json!({ "genreId": genre })).await.unwrap();
        }

        let mut deleted = 0;
        let mut cursor = books
            .index("genre_id")
            .unwrap()
            .open_cursor(&Key::Integer(1))
            .await
            .unwrap();
        while let Some(current) = cursor {
            current.delete().await.unwrap();
            deleted += 1;
            cursor = current.advance().await.unwrap();
        }

        assert_eq!(deleted, 2);
        assert_eq!(books.count().await, Ok(1));
    }

    #[tokio::test]
    async fn overlapping_transaction_waits_for_the_writer() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        let writer = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadWrite)
            .unwrap();
        writer.object_store("book").unwrap().add(json!({})).await.unwrap();

        let reader = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadOnly)
            .unwrap();
        assert!(reader.is_waiting());
        let count = reader.object_store("book").unwrap().count();
        reader.settle();

        let unrelated = connection
            .transaction(&scope(&["chapter"]), TransactionMode::ReadWrite)
            .unwrap();
        assert!(!unrelated.is_waiting());

        writer.abort();
        assert!(!reader.is_waiting());
        assert_eq!(count.await, Ok(0));

        reader.settle();
        assert_eq!(reader.finished().wait().await, Ok(()));
    }

    #[tokio::test]
    async fn readers_do_not_wait_for_each_other() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        let first = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadOnly)
            .unwrap();
        let second = connection
            .transaction(&scope(&["book", "chapter"]), TransactionMode::ReadOnly)
            .unwrap();
        assert!(!first.is_waiting());
        assert!(!second.is_waiting());

        let writer = connection
            .transaction(&scope(&["chapter"]), TransactionMode::ReadWrite)
            .unwrap();
        assert!(writer.is_waiting());
        second.settle();
        assert!(!writer.is_waiting());
    }

    #[tokio::test]
    async fn settled_waiting_transaction_commits_when_started() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        let writer = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadWrite)
            .unwrap();
        let waiting = connection
            .transaction(&scope(&["book"]), TransactionMode::ReadWrite)
            .unwrap();
        waiting.settle();

        let err = waiting.object_store("book").unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));

        writer.settle();
        assert_eq!(waiting.finished().wait().await, Ok(()));
    }

    #[tokio::test]
    async fn dropped_transaction_commits() {
        let engine = MemoryEngine::new();
        let connection = open_shelf(&engine, 1).await.unwrap();
        {
            let txn = connection
                .transaction(&scope(&["book"]), TransactionMode::ReadWrite)
                .unwrap();
            txn.object_store("book").unwrap().add(json!({})).await.unwrap();
        }
        assert_eq!(engine.records("shelf", "book").len(), 1);
    }
}
