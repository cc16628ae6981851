//! Transaction-scoped operations.
//!
//! An [`Operations`] handle routes every request through the one native
//! transaction it was built with. Requests are issued when the method is
//! called, not when the returned future is first polled, and requests on the
//! same collection execute in the order they were issued.

use crate::error::{StoreError, StoreResult};
use crate::schema::{CollectionDescriptor, Schema};
use aura_storage::{Cursor, Index, Key, KeyPath, NativeTransaction, ObjectStore, Record, Request};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::debug;

/// The result of one engine request.
///
/// Resolves to the request's value, or to [`StoreError::Operation`] carrying
/// the collection, the operation name and the engine error. A request that
/// could not be issued at all resolves to the error that prevented it.
#[derive(Debug)]
#[must_use = "the request is issued already; await it to observe the outcome"]
pub struct PendingResult<R> {
    state: PendingState<R>,
}

#[derive(Debug)]
enum PendingState<R> {
    Issued {
        request: Request<R>,
        collection: String,
        operation: &'static str,
    },
    Failed(Option<StoreError>),
}

impl<R> PendingResult<R> {
    fn issued(request: Request<R>, collection: &str, operation: &'static str) -> Self {
        Self {
            state: PendingState::Issued {
                request,
                collection: collection.to_string(),
                operation,
            },
        }
    }

    fn failed(error: StoreError) -> Self {
        Self {
            state: PendingState::Failed(Some(error)),
        }
    }
}

impl<R> Future for PendingResult<R> {
    type Output = StoreResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Issued {
                request,
                collection,
                operation,
            } => {
                let result = ready!(Pin::new(request).poll(cx));
                Poll::Ready(result.map_err(|source| {
                    StoreError::operation(collection.as_str(), *operation, source)
                }))
            }
            PendingState::Failed(error) => Poll::Ready(Err(error.take().unwrap_or_else(|| {
                StoreError::invalid_operation("result polled after completion")
            }))),
        }
    }
}

/// The result of an `add` or `put`.
///
/// When the key was generated by the engine, it is written into the caller's
/// record on success. On failure the record is left as it was.
#[derive(Debug)]
#[must_use = "the request is issued already; await it to observe the outcome"]
pub struct PendingKey<'r> {
    pending: PendingResult<Key>,
    record: &'r mut Record,
    generated: Option<KeyPath>,
}

impl Future for PendingKey<'_> {
    type Output = StoreResult<Key>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let key = ready!(Pin::new(&mut this.pending).poll(cx))?;
        if let Some(path) = this.generated.take() {
            path.inject(this.record, &key);
        }
        Poll::Ready(Ok(key))
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Add,
    Put,
}

impl WriteKind {
    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Put => "put",
        }
    }
}

/// Operations bound to one native transaction.
///
/// Cloning is cheap; clones share the transaction.
///
/// # Premature commit
///
/// The engine finalizes a transaction as soon as a turn of the event loop
/// ends with no request outstanding. Awaiting anything other than these
/// operations (file reads, network, timers, hashing) inside a unit of work
/// ends the turn: the writes issued so far commit, and every later request
/// fails with `TransactionInactive`. Finish all such work before starting the
/// transaction.
#[derive(Debug, Clone)]
pub struct Operations<T> {
    txn: T,
    schema: Arc<Schema>,
}

impl<T: NativeTransaction> Operations<T> {
    /// Binds operations to a native transaction.
    pub fn new(txn: T, schema: Arc<Schema>) -> Self {
        Self { txn, schema }
    }

    /// Returns the native transaction.
    pub fn transaction(&self) -> &T {
        &self.txn
    }

    /// Inserts a record, failing if its key exists.
    ///
    /// On a collection with generated keys, a record whose key field is
    /// absent or null receives a generated key, written back on success.
    pub fn add<'r>(&self, collection: &str, record: &'r mut Record) -> PendingKey<'r> {
        self.write(collection, record, WriteKind::Add)
    }

    /// Inserts or replaces a record. Generated keys are handled like [`add`](Self::add).
    pub fn put<'r>(&self, collection: &str, record: &'r mut Record) -> PendingKey<'r> {
        self.write(collection, record, WriteKind::Put)
    }

    /// Puts every record, issuing all requests before awaiting any.
    ///
    /// Returns the keys in record order, or the first failure. Each record
    /// receives its generated key as soon as its own put succeeds, even if
    /// the transaction later aborts.
    pub async fn put_all(&self, collection: &str, records: &mut [Record]) -> StoreResult<Vec<Key>> {
        let pending: Vec<PendingKey<'_>> = records
            .iter_mut()
            .map(|record| self.put(collection, record))
            .collect();
        let mut keys = Vec::with_capacity(pending.len());
        for write in pending {
            keys.push(write.await?);
        }
        Ok(keys)
    }

    /// Looks up a record by primary key.
    pub fn get_by_key(&self, collection: &str, key: impl Into<Key>) -> PendingResult<Option<Record>> {
        let key = key.into();
        self.issue(collection, "get", |store| Ok(store.get(&key)))
    }

    /// Looks up the first record whose indexed field equals `value`.
    pub fn get_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> PendingResult<Option<Record>> {
        let value = value.into();
        self.issue(collection, "getByIndex", |store| {
            Ok(self.index(store, collection, index)?.get(&value))
        })
    }

    /// Returns every record. Order is unspecified.
    pub fn get_all(&self, collection: &str) -> PendingResult<Vec<Record>> {
        self.issue(collection, "getAll", |store| Ok(store.get_all()))
    }

    /// Returns every record whose indexed field equals `value`. Order is
    /// unspecified.
    pub fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> PendingResult<Vec<Record>> {
        let value = value.into();
        self.issue(collection, "getAllByIndex", |store| {
            Ok(self.index(store, collection, index)?.get_all(&value))
        })
    }

    /// Deletes the record with the primary key; a no-op if absent.
    pub fn delete_by_key(&self, collection: &str, key: impl Into<Key>) -> PendingResult<()> {
        let key = key.into();
        self.issue(collection, "delete", |store| Ok(store.delete(&key)))
    }

    /// Deletes the record whose unique indexed field equals `value`.
    ///
    /// Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a non-unique index; use
    /// [`delete_all_by_index`](Self::delete_all_by_index) there.
    pub async fn delete_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<bool> {
        let descriptor = self.schema.require(collection)?;
        let unique = descriptor
            .index(index)
            .ok_or_else(|| StoreError::unknown_index(collection, index))?
            .unique;
        if !unique {
            return Err(StoreError::invalid_operation(format!(
                "index {index} on {collection} is not unique; use delete_all_by_index"
            )));
        }
        let value = value.into();
        let cursor = self
            .issue(collection, "deleteByIndex", |store| {
                Ok(self.index(store, collection, index)?.open_cursor(&value))
            })
            .await?;
        match cursor {
            Some(cursor) => {
                PendingResult::issued(cursor.delete(), collection, "deleteByIndex").await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deletes every record whose indexed field equals `value`.
    ///
    /// Walks a cursor bounded to `value`, deleting and awaiting each record
    /// before advancing. Returns the number of deleted records.
    pub async fn delete_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<u64> {
        let value = value.into();
        let mut cursor = self
            .issue(collection, "deleteAllByIndex", |store| {
                Ok(self.index(store, collection, index)?.open_cursor(&value))
            })
            .await?;

        let mut deleted = 0;
        while let Some(current) = cursor {
            PendingResult::issued(current.delete(), collection, "deleteAllByIndex").await?;
            deleted += 1;
            cursor = PendingResult::issued(current.advance(), collection, "deleteAllByIndex").await?;
        }
        debug!(collection, index, %value, deleted, "deleted records by index");
        Ok(deleted)
    }

    /// Deletes every record.
    pub fn clear(&self, collection: &str) -> PendingResult<()> {
        self.issue(collection, "clear", |store| Ok(store.clear()))
    }

    /// Deletes every record. Same as [`clear`](Self::clear).
    pub fn delete_all(&self, collection: &str) -> PendingResult<()> {
        self.clear(collection)
    }

    /// Counts records.
    pub fn count(&self, collection: &str) -> PendingResult<u64> {
        self.issue(collection, "count", |store| Ok(store.count()))
    }

    /// Inserts a typed record, writing a generated key back into it.
    pub async fn add_typed<R>(&self, collection: &str, value: &mut R) -> StoreResult<Key>
    where
        R: Serialize + DeserializeOwned,
    {
        let mut record = serde_json::to_value(&*value)?;
        let key = self.add(collection, &mut record).await?;
        *value = serde_json::from_value(record)?;
        Ok(key)
    }

    /// Inserts or replaces a typed record.
    pub async fn put_typed<R: Serialize>(&self, collection: &str, value: &R) -> StoreResult<Key> {
        let mut record = serde_json::to_value(value)?;
        self.put(collection, &mut record).await
    }

    /// Puts typed records, issuing all requests before awaiting any.
    pub async fn put_all_typed<R: Serialize>(
        &self,
        collection: &str,
        values: &[R],
    ) -> StoreResult<Vec<Key>> {
        let mut records = values
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.put_all(collection, &mut records).await
    }

    /// Looks up a typed record by primary key.
    pub async fn get_typed<R: DeserializeOwned>(
        &self,
        collection: &str,
        key: impl Into<Key>,
    ) -> StoreResult<Option<R>> {
        self.get_by_key(collection, key)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Returns every typed record whose indexed field equals `value`.
    pub async fn get_all_by_index_typed<R: DeserializeOwned>(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<Vec<R>> {
        self.get_all_by_index(collection, index, value)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(StoreError::from))
            .collect()
    }

    fn write<'r>(&self, collection: &str, record: &'r mut Record, kind: WriteKind) -> PendingKey<'r> {
        let mut generated = None;
        let pending = match self.schema.require(collection) {
            Ok(descriptor) => {
                let payload = prepare_write(descriptor, record, &mut generated);
                self.issue(collection, kind.name(), |store| {
                    Ok(match kind {
                        WriteKind::Add => store.add(payload),
                        WriteKind::Put => store.put(payload),
                    })
                })
            }
            Err(err) => PendingResult::failed(err),
        };
        PendingKey {
            pending,
            record,
            generated,
        }
    }

    fn issue<R>(
        &self,
        collection: &str,
        operation: &'static str,
        request: impl FnOnce(&T::Store) -> StoreResult<Request<R>>,
    ) -> PendingResult<R> {
        let issued = self
            .txn
            .object_store(collection)
            .map_err(|source| StoreError::operation(collection, operation, source))
            .and_then(|store| request(&store));
        match issued {
            Ok(request) => PendingResult::issued(request, collection, operation),
            Err(err) => PendingResult::failed(err),
        }
    }

    fn index(
        &self,
        store: &T::Store,
        collection: &str,
        index: &str,
    ) -> StoreResult<<T::Store as ObjectStore>::Index> {
        let descriptor = self.schema.require(collection)?;
        if descriptor.index(index).is_none() {
            return Err(StoreError::unknown_index(collection, index));
        }
        store
            .index(index)
            .map_err(|source| StoreError::operation(collection, "index", source))
    }
}

/// Builds the record sent to the engine.
///
/// A generated-key collection must not receive a present-but-null key, so
/// the request carries a copy without the key field and `generated` is set to
/// the path the engine's key is written back to.
fn prepare_write(
    descriptor: &CollectionDescriptor,
    record: &Record,
    generated: &mut Option<KeyPath>,
) -> Record {
    if descriptor.auto_key && descriptor.key_path.is_unset(record) {
        let mut payload = record.clone();
        descriptor.key_path.remove(&mut payload);
        *generated = Some(descriptor.key_path.clone());
        payload
    } else {
        record.clone()
    }
}
