//! Storage engine boundary.
//!
//! These traits describe an embedded, event-driven object store in the shape
//! of the browser's IndexedDB: a database holds named collections with a key
//! path and optional key generator, collections carry secondary indexes, and
//! every read or write is an asynchronous request issued inside a transaction.
//!
//! # Invariants
//!
//! - Requests are issued eagerly: the engine records a request when the
//!   method is called, not when the returned [`Request`] is polled.
//! - Requests on the same collection of the same transaction execute in
//!   issuance order.
//! - A transaction reaches exactly one terminal event, observable through
//!   [`NativeTransaction::finished`].
//! - A transaction that is idle at the end of a turn auto-finalizes. The
//!   driver reports the end of a turn with [`NativeTransaction::settle`];
//!   requests issued afterwards fail with
//!   [`EngineError::TransactionInactive`](crate::EngineError::TransactionInactive).
//!
//! None of the traits require `Send`, so single-threaded bindings (such as
//! the browser's) can implement them.

use crate::error::EngineResult;
use crate::key::{Key, KeyPath};
use crate::request::{Completion, Request};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl TransactionMode {
    /// Returns the engine's name for this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "readonly",
            Self::ReadWrite => "readwrite",
        }
    }

    /// Returns true if writes are allowed.
    #[must_use]
    pub fn is_read_write(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version transition passed to the upgrade callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    /// Stored version before the open, `0` for a new database.
    pub old_version: u32,
    /// Requested version.
    pub new_version: u32,
}

impl VersionChange {
    /// Returns true when the database did not exist before.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.old_version == 0
    }
}

/// A storage engine that can open named, versioned databases.
pub trait Engine {
    /// Connection type produced by [`Engine::open`].
    type Connection: Connection;

    /// Opens `name` at `version`.
    ///
    /// When the stored version is older than `version`, `upgrade` runs with a
    /// [`SchemaEditor`] before the open completes. If `upgrade` fails, no
    /// schema change is kept and the open fails with its error.
    ///
    /// # Errors
    ///
    /// - `Version` when the stored version is newer than `version`
    /// - `Blocked` when connections holding an older version are still open
    /// - any error returned by `upgrade`
    fn open<U>(
        &self,
        name: &str,
        version: u32,
        upgrade: U,
    ) -> impl Future<Output = EngineResult<Self::Connection>>
    where
        U: FnOnce(&mut dyn SchemaEditor, VersionChange) -> EngineResult<()> + 'static;
}

/// Schema operations available during an upgrade.
pub trait SchemaEditor {
    /// Names of existing collections.
    fn collection_names(&self) -> Vec<String>;

    /// Creates a collection.
    ///
    /// # Errors
    ///
    /// - `Constraint` if the collection exists
    /// - `InvalidAccess` for an auto-increment collection with a composite key path
    fn create_collection(
        &mut self,
        name: &str,
        key_path: &KeyPath,
        auto_increment: bool,
    ) -> EngineResult<()>;

    /// Deletes a collection and all of its records.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the collection does not exist.
    fn delete_collection(&mut self, name: &str) -> EngineResult<()>;

    /// Names of the indexes of a collection.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the collection does not exist.
    fn index_names(&self, collection: &str) -> EngineResult<Vec<String>>;

    /// Creates an index over existing and future records.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the collection does not exist
    /// - `Constraint` if the index exists, or if `unique` and existing records collide
    fn create_index(
        &mut self,
        collection: &str,
        name: &str,
        key_path: &KeyPath,
        unique: bool,
    ) -> EngineResult<()>;
}

/// An open connection to a database.
pub trait Connection: Clone {
    /// Transaction type produced by [`Connection::transaction`].
    type Transaction: NativeTransaction;

    /// Database name.
    fn name(&self) -> String;

    /// Version the connection was opened at.
    fn version(&self) -> u32;

    /// Names of the collections in the database.
    fn collection_names(&self) -> Vec<String>;

    /// Starts a transaction over `scope`.
    ///
    /// # Errors
    ///
    /// - `InvalidAccess` if `scope` is empty
    /// - `NotFound` if a named collection does not exist
    /// - `InvalidState` if the connection is closed
    fn transaction(&self, scope: &[String], mode: TransactionMode)
        -> EngineResult<Self::Transaction>;

    /// Closes the connection. Transactions already started may finish.
    fn close(&self);
}

/// A native engine transaction.
pub trait NativeTransaction: Clone {
    /// Collection handle type.
    type Store: ObjectStore;

    /// Engine-assigned identifier, for diagnostics.
    fn id(&self) -> u64;

    /// Access mode.
    fn mode(&self) -> TransactionMode;

    /// Returns a handle to a collection in scope.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the collection is not in the transaction's scope
    /// - `InvalidState` if the transaction has finished
    fn object_store(&self, name: &str) -> EngineResult<Self::Store>;

    /// Aborts the transaction, rolling back its writes.
    ///
    /// Has no effect once the transaction has finished.
    fn abort(&self);

    /// Reports that the current turn ended.
    ///
    /// An engine with auto-finalization commits the transaction here if no
    /// request is outstanding. Engines driven by their own event loop may
    /// ignore it.
    fn settle(&self);

    /// Terminal event: `Ok` on commit, the abort error otherwise.
    fn finished(&self) -> Completion;
}

/// A collection within a transaction.
pub trait ObjectStore {
    /// Index handle type.
    type Index: Index;

    /// Inserts a record; fails with `Constraint` if the key exists.
    fn add(&self, record: Value) -> Request<Key>;

    /// Inserts or replaces a record.
    fn put(&self, record: Value) -> Request<Key>;

    /// Looks up a record by primary key.
    fn get(&self, key: &Key) -> Request<Option<Value>>;

    /// Returns every record in primary key order.
    fn get_all(&self) -> Request<Vec<Value>>;

    /// Deletes the record with the primary key, if any.
    fn delete(&self, key: &Key) -> Request<()>;

    /// Deletes every record.
    fn clear(&self) -> Request<()>;

    /// Counts records.
    fn count(&self) -> Request<u64>;

    /// Returns a handle to a named index.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the index does not exist.
    fn index(&self, name: &str) -> EngineResult<Self::Index>;
}

/// A secondary index of a collection.
pub trait Index {
    /// Cursor type produced by [`Index::open_cursor`].
    type Cursor: Cursor;

    /// First record whose index key equals `key`.
    fn get(&self, key: &Key) -> Request<Option<Value>>;

    /// Every record whose index key equals `key`.
    fn get_all(&self, key: &Key) -> Request<Vec<Value>>;

    /// Opens a forward cursor over records whose index key equals `only`.
    ///
    /// Resolves to `None` when no record matches.
    fn open_cursor(&self, only: &Key) -> Request<Option<Self::Cursor>>;
}

/// A forward cursor positioned on one record.
pub trait Cursor: Sized {
    /// Primary key of the current record.
    fn primary_key(&self) -> &Key;

    /// Current record.
    fn value(&self) -> &Value;

    /// Deletes the current record. The cursor stays usable.
    fn delete(&self) -> Request<()>;

    /// Moves to the next record in range, or `None` when exhausted.
    fn advance(self) -> Request<Option<Self>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_match_engine_names() {
        assert_eq!(TransactionMode::ReadOnly.as_str(), "readonly");
        assert_eq!(TransactionMode::ReadWrite.to_string(), "readwrite");
        assert!(TransactionMode::ReadWrite.is_read_write());
        assert!(!TransactionMode::ReadOnly.is_read_write());
    }

    #[test]
    fn initial_version_change() {
        let change = VersionChange {
            old_version: 0,
            new_version: 1,
        };
        assert!(change.is_initial());
    }
}
