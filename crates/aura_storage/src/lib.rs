//! # Aura Storage
//!
//! The storage engine boundary for the Aura bookshelf.
//!
//! This crate describes the asynchronous, event-driven key-value engine that
//! the bookshelf persists into, and ships an in-memory implementation of it.
//! The engine owns collections of JSON records, each collection identified by
//! a key path and optionally backed by a key generator and secondary indexes.
//!
//! ## Engine Model
//!
//! The model follows the browser's object store engine:
//!
//! - Every read or write is a request issued eagerly against a transaction
//!   and answered by exactly one success or error event ([`Request`])
//! - A transaction is scoped to a fixed set of collections and a mode
//! - A transaction auto-finalizes once a scheduling turn ends with no work
//!   left for it ([`NativeTransaction::settle`]); requests issued afterwards
//!   fail with [`EngineError::TransactionInactive`]
//! - Terminal state (committed or aborted) is reported through
//!   [`NativeTransaction::finished`]
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - In-process engine with fault injection for tests
//! - `IdbEngine` (in the `aura_wasm` crate) - The browser's IndexedDB
//!
//! ## Example
//!
//! ```rust
//! use aura_storage::{
//!     Connection, Engine, KeyPath, MemoryEngine, NativeTransaction, ObjectStore,
//!     TransactionMode,
//! };
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let engine = MemoryEngine::new();
//! let connection = engine
//!     .open("shelf", 1, |editor, _| {
//!         editor.create_collection("book", &KeyPath::single("id"), true)
//!     })
//!     .await
//!     .unwrap();
//!
//! let txn = connection
//!     .transaction(&["book".to_string()], TransactionMode::ReadWrite)
//!     .unwrap();
//! let key = txn.object_store("book").unwrap().add(json!({ "title": "A" })).await.unwrap();
//! txn.settle();
//! txn.finished().wait().await.unwrap();
//! assert_eq!(key, aura_storage::Key::Integer(1));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod key;
mod memory;
mod request;

pub use engine::{
    Connection, Cursor, Engine, Index, NativeTransaction, ObjectStore, SchemaEditor,
    TransactionMode, VersionChange,
};
pub use error::{EngineError, EngineResult};
pub use key::{Key, KeyPath};
pub use memory::{MemoryConnection, MemoryCursor, MemoryEngine, MemoryIndex, MemoryStore, MemoryTransaction};
pub use request::{completion, request, Completion, CompletionSignal, Request, Responder};

/// A record stored in a collection.
///
/// Records are JSON objects; typed records convert through serde.
pub type Record = serde_json::Value;
