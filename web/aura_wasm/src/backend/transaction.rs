//! IndexedDB transactions, object stores, indexes and cursors.

use crate::convert::{key_from_js, key_to_js, record_from_js, record_to_js};
use crate::error::{engine_error, request_error};
use aura_storage::{
    completion, Completion, Cursor, EngineError, EngineResult, Index, Key, NativeTransaction,
    ObjectStore, Record, Request, TransactionMode,
};
use std::sync::atomic::{AtomicU64, Ordering};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, IdbCursorWithValue, IdbKeyRange, IdbRequest};

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// Answers a request from its success or error event.
///
/// Exactly one of the two events fires, once, so a single one-shot handler
/// serves both. An error event is marked handled so the failure stays with
/// the request instead of aborting the transaction.
fn answer<T, F>(request: &IdbRequest, on_success: F) -> Request<T>
where
    T: 'static,
    F: FnOnce(JsValue) -> EngineResult<T> + 'static,
{
    let (responder, pending) = aura_storage::request();
    let target = request.clone();
    let handler = Closure::once_into_js(move |event: Event| {
        if event.type_() == "success" {
            let result = target
                .result()
                .map_err(|err| engine_error(&err))
                .and_then(on_success);
            responder.resolve(result);
        } else {
            event.prevent_default();
            responder.fail(request_error(&target));
        }
    });
    request.set_onsuccess(Some(handler.unchecked_ref()));
    request.set_onerror(Some(handler.unchecked_ref()));
    pending
}

fn issue<T, F>(issued: Result<IdbRequest, JsValue>, on_success: F) -> Request<T>
where
    T: 'static,
    F: FnOnce(JsValue) -> EngineResult<T> + 'static,
{
    match issued {
        Ok(request) => answer(&request, on_success),
        Err(thrown) => Request::ready(Err(engine_error(&thrown))),
    }
}

fn optional_record(value: JsValue) -> EngineResult<Option<Record>> {
    if value.is_undefined() {
        return Ok(None);
    }
    record_from_js(value)
        .map(Some)
        .map_err(|err| EngineError::data(err.to_string()))
}

fn records(value: JsValue) -> EngineResult<Vec<Record>> {
    serde_wasm_bindgen::from_value(value).map_err(|err| EngineError::data(err.to_string()))
}

/// A transaction on an IndexedDB connection.
#[derive(Debug, Clone)]
pub struct IdbTransactionHandle {
    txn: web_sys::IdbTransaction,
    id: u64,
    mode: TransactionMode,
    completion: Completion,
}

impl IdbTransactionHandle {
    pub(crate) fn begin(txn: web_sys::IdbTransaction, mode: TransactionMode) -> Self {
        let (signal, completion) = completion();
        let target = txn.clone();
        let handler = Closure::once_into_js(move |event: Event| {
            if event.type_() == "complete" {
                signal.complete();
            } else {
                let error = target
                    .error()
                    .map(|exception| EngineError::from_native(&exception.name(), exception.message()))
                    .unwrap_or_else(|| EngineError::aborted("transaction was aborted"));
                signal.fail(error);
            }
        });
        txn.set_oncomplete(Some(handler.unchecked_ref()));
        txn.set_onabort(Some(handler.unchecked_ref()));

        Self {
            txn,
            id: NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed),
            mode,
            completion,
        }
    }
}

impl NativeTransaction for IdbTransactionHandle {
    type Store = IdbStoreHandle;

    fn id(&self) -> u64 {
        self.id
    }

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn object_store(&self, name: &str) -> EngineResult<IdbStoreHandle> {
        self.txn
            .object_store(name)
            .map(|store| IdbStoreHandle { store })
            .map_err(|err| engine_error(&err))
    }

    fn abort(&self) {
        // Throws only when the transaction already finished.
        let _ = self.txn.abort();
    }

    fn settle(&self) {}

    fn finished(&self) -> Completion {
        self.completion.clone()
    }
}

/// An object store within a transaction.
#[derive(Debug, Clone)]
pub struct IdbStoreHandle {
    store: web_sys::IdbObjectStore,
}

impl IdbStoreHandle {
    fn write(&self, record: &Record, overwrite: bool) -> Request<Key> {
        let value = match record_to_js(record) {
            Ok(value) => value,
            Err(err) => return Request::ready(Err(EngineError::data(err.to_string()))),
        };
        let issued = if overwrite {
            self.store.put(&value)
        } else {
            self.store.add(&value)
        };
        issue(issued, key_from_js)
    }

    fn keyed<T, F>(&self, key: &Key, request: impl FnOnce(&JsValue) -> Result<IdbRequest, JsValue>, on_success: F) -> Request<T>
    where
        T: 'static,
        F: FnOnce(JsValue) -> EngineResult<T> + 'static,
    {
        match key_to_js(key) {
            Ok(key) => issue(request(&key), on_success),
            Err(err) => Request::ready(Err(err)),
        }
    }
}

impl ObjectStore for IdbStoreHandle {
    type Index = IdbIndexHandle;

    fn add(&self, record: Record) -> Request<Key> {
        self.write(&record, false)
    }

    fn put(&self, record: Record) -> Request<Key> {
        self.write(&record, true)
    }

    fn get(&self, key: &Key) -> Request<Option<Record>> {
        self.keyed(key, |key| self.store.get(key), optional_record)
    }

    fn get_all(&self) -> Request<Vec<Record>> {
        issue(self.store.get_all(), records)
    }

    fn delete(&self, key: &Key) -> Request<()> {
        self.keyed(key, |key| self.store.delete(key), |_| Ok(()))
    }

    fn clear(&self) -> Request<()> {
        issue(self.store.clear(), |_| Ok(()))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(&self) -> Request<u64> {
        issue(self.store.count(), |value| {
            value
                .as_f64()
                .map(|count| count as u64)
                .ok_or_else(|| EngineError::data("count is not a number"))
        })
    }

    fn index(&self, name: &str) -> EngineResult<IdbIndexHandle> {
        self.store
            .index(name)
            .map(|index| IdbIndexHandle { index })
            .map_err(|err| engine_error(&err))
    }
}

/// An index of an object store.
#[derive(Debug, Clone)]
pub struct IdbIndexHandle {
    index: web_sys::IdbIndex,
}

impl Index for IdbIndexHandle {
    type Cursor = IdbCursorHandle;

    fn get(&self, key: &Key) -> Request<Option<Record>> {
        match key_to_js(key) {
            Ok(key) => issue(self.index.get(&key), optional_record),
            Err(err) => Request::ready(Err(err)),
        }
    }

    fn get_all(&self, key: &Key) -> Request<Vec<Record>> {
        match key_to_js(key) {
            Ok(key) => issue(self.index.get_all_with_key(&key), records),
            Err(err) => Request::ready(Err(err)),
        }
    }

    fn open_cursor(&self, only: &Key) -> Request<Option<IdbCursorHandle>> {
        let range = match key_to_js(only).and_then(|key| {
            IdbKeyRange::only(&key).map_err(|err| engine_error(&err))
        }) {
            Ok(range) => range,
            Err(err) => return Request::ready(Err(err)),
        };
        match self.index.open_cursor_with_range(&range) {
            Ok(request) => position(&request),
            Err(thrown) => Request::ready(Err(engine_error(&thrown))),
        }
    }
}

/// Answers the next success event of a cursor request with the cursor's
/// new position.
fn position(request: &IdbRequest) -> Request<Option<IdbCursorHandle>> {
    let owner = request.clone();
    answer(request, move |value| {
        if value.is_null() {
            return Ok(None);
        }
        let cursor = value
            .dyn_into::<IdbCursorWithValue>()
            .map_err(|_| EngineError::data("cursor request did not yield a cursor"))?;
        IdbCursorHandle::new(owner, cursor).map(Some)
    })
}

/// A cursor positioned on one record.
#[derive(Debug)]
pub struct IdbCursorHandle {
    request: IdbRequest,
    cursor: IdbCursorWithValue,
    primary_key: Key,
    value: Record,
}

impl IdbCursorHandle {
    fn new(request: IdbRequest, cursor: IdbCursorWithValue) -> EngineResult<Self> {
        let primary_key = cursor
            .primary_key()
            .map_err(|err| engine_error(&err))
            .and_then(key_from_js)?;
        let value = cursor
            .value()
            .map_err(|err| engine_error(&err))
            .and_then(|value| record_from_js(value).map_err(|err| EngineError::data(err.to_string())))?;
        Ok(Self {
            request,
            cursor,
            primary_key,
            value,
        })
    }
}

impl Cursor for IdbCursorHandle {
    fn primary_key(&self) -> &Key {
        &self.primary_key
    }

    fn value(&self) -> &Record {
        &self.value
    }

    fn delete(&self) -> Request<()> {
        issue(self.cursor.delete(), |_| Ok(()))
    }

    fn advance(self) -> Request<Option<Self>> {
        // The cursor request fires a new success event for the next position.
        match self.cursor.continue_() {
            Ok(()) => position(&self.request),
            Err(thrown) => Request::ready(Err(engine_error(&thrown))),
        }
    }
}
