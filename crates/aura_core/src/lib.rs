//! # Aura Core
//!
//! Transaction coordination for the Aura bookshelf.
//!
//! This crate provides:
//! - A schema descriptor applied idempotently when the database upgrades
//! - A connection manager that opens the database once and shares it
//! - A transaction coordinator that runs a unit of work inside exactly one
//!   native transaction and reports its terminal outcome
//! - Transaction-scoped operations over records and secondary indexes
//! - A store facade of one-shot operations
//! - The bookshelf record model and its workflows
//!
//! ## Example
//!
//! ```rust
//! use aura_core::{CollectionDescriptor, Schema, Store, StoreConfig, StoreError};
//! use aura_storage::{MemoryEngine, TransactionMode};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let schema = Schema::new(vec![
//!     CollectionDescriptor::new("book", "id").auto_key(),
//!     CollectionDescriptor::new("reading_progress", "bookId"),
//! ])
//! .unwrap();
//! let store = Store::new(MemoryEngine::new(), StoreConfig::new("shelf", 1), schema);
//!
//! let book_id = store
//!     .execute(["book", "reading_progress"], TransactionMode::ReadWrite, |ops| async move {
//!         let mut book = json!({ "title": "Aura" });
//!         let key = ops.add("book", &mut book).await?;
//!         let mut progress = json!({ "bookId": key.to_json(), "chapterIndex": 1 });
//!         ops.put("reading_progress", &mut progress).await?;
//!         Ok::<_, StoreError>(key)
//!     })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(store.count("reading_progress").await.unwrap(), 1);
//! assert!(store.get_by_key("book", book_id).await.unwrap().is_some());
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod error;
mod operations;
mod schema;
pub mod shelf;
mod store;
pub mod transaction;
mod types;

pub use config::{StoreConfig, DEFAULT_NAME, DEFAULT_VERSION};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{StoreError, StoreResult};
pub use operations::{Operations, PendingKey, PendingResult};
pub use schema::{CollectionDescriptor, IndexDescriptor, Schema};
pub use shelf::{aura_schema, Bookshelf, ReadingContext};
pub use store::Store;
pub use transaction::{TransactionCoordinator, TransactionOf, TransactionScope, TransactionState};
pub use types::{Scope, TransactionId};

pub use aura_storage::{Key, KeyPath, MemoryEngine, Record, TransactionMode};
