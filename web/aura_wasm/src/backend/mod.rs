//! IndexedDB storage engine.
//!
//! [`IdbEngine`] implements the storage engine traits over the browser's
//! IndexedDB. Every engine request is an `IDBRequest` whose success or error
//! event answers the returned [`Request`](aura_storage::Request); the
//! transaction's `complete` or `abort` event answers its completion.
//!
//! Request continuations run as microtasks of the success event, while the
//! browser still considers the transaction active, so a unit of work may
//! chain requests. The browser commits on its own once a transaction has no
//! outstanding request, which is why `settle` is a no-op here.

mod transaction;

pub use transaction::{IdbCursorHandle, IdbIndexHandle, IdbStoreHandle, IdbTransactionHandle};

use crate::convert::{key_path_to_js, string_list};
use crate::error::{engine_error, request_error};
use aura_storage::{
    Connection, Engine, EngineError, EngineResult, KeyPath, Responder, SchemaEditor,
    TransactionMode, VersionChange,
};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, IdbDatabase, IdbFactory, IdbOpenDbRequest, IdbVersionChangeEvent};

/// The browser's IndexedDB.
#[derive(Debug, Clone)]
pub struct IdbEngine {
    factory: IdbFactory,
}

impl IdbEngine {
    /// Looks up `indexedDB` on the global object.
    ///
    /// Works in windows and workers.
    ///
    /// # Errors
    ///
    /// Returns `Unknown` when the global object has no IndexedDB.
    pub fn new() -> EngineResult<Self> {
        let factory = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("indexedDB"))
            .map_err(|err| engine_error(&err))?;
        let factory = factory
            .dyn_into::<IdbFactory>()
            .map_err(|_| EngineError::from_native("NotSupportedError", "IndexedDB is not available"))?;
        Ok(Self { factory })
    }

    /// Deletes a database. Resolves once the browser reports success.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the browser, or `Blocked` while
    /// connections to the database are still open.
    pub async fn delete_database(&self, name: &str) -> EngineResult<()> {
        let request = self
            .factory
            .delete_database(name)
            .map_err(|err| engine_error(&err))?;
        let (responder, pending) = aura_storage::request();
        let responder = Rc::new(RefCell::new(Some(responder)));
        let handler = Closure::<dyn FnMut(Event)>::new({
            let responder = Rc::clone(&responder);
            move |event: Event| {
                let Some(responder) = responder.borrow_mut().take() else {
                    return;
                };
                match event.type_().as_str() {
                    "success" => responder.succeed(()),
                    "blocked" => responder.fail(EngineError::blocked("database is still open elsewhere")),
                    _ => {
                        event.prevent_default();
                        let error = event
                            .target()
                            .and_then(|target| target.dyn_into::<web_sys::IdbRequest>().ok())
                            .map_or_else(|| EngineError::aborted("delete failed"), |r| request_error(&r));
                        responder.fail(error);
                    }
                }
            }
        });
        let function: &js_sys::Function = handler.as_ref().unchecked_ref();
        request.set_onsuccess(Some(function));
        request.set_onerror(Some(function));
        request.set_onblocked(Some(function));

        let result = pending.await;
        if result.is_ok() {
            request.set_onsuccess(None);
            request.set_onerror(None);
            request.set_onblocked(None);
        } else {
            // A blocked delete still completes later and fires its events.
            handler.forget();
        }
        result
    }
}

struct OpenState<U> {
    upgrade: Option<U>,
    upgrade_error: Option<EngineError>,
    responder: Option<Responder<IdbConnection>>,
}

impl Engine for IdbEngine {
    type Connection = IdbConnection;

    fn open<U>(
        &self,
        name: &str,
        version: u32,
        upgrade: U,
    ) -> impl Future<Output = EngineResult<IdbConnection>>
    where
        U: FnOnce(&mut dyn SchemaEditor, VersionChange) -> EngineResult<()> + 'static,
    {
        let factory = self.factory.clone();
        let name = name.to_string();
        async move {
            if version == 0 {
                return Err(EngineError::data("version must be greater than zero"));
            }
            let request = factory
                .open_with_u32(&name, version)
                .map_err(|err| engine_error(&err))?;
            let (responder, pending) = aura_storage::request();
            let state = Rc::new(RefCell::new(OpenState {
                upgrade: Some(upgrade),
                upgrade_error: None,
                responder: Some(responder),
            }));

            let handler = Closure::<dyn FnMut(Event)>::new({
                let state = Rc::clone(&state);
                let request = request.clone();
                move |event: Event| on_open_event(&state, &request, &event)
            });
            let function: &js_sys::Function = handler.as_ref().unchecked_ref();
            request.set_onupgradeneeded(Some(function));
            request.set_onblocked(Some(function));
            request.set_onsuccess(Some(function));
            request.set_onerror(Some(function));

            let result = pending.await;
            if matches!(result, Err(EngineError::Blocked { .. })) {
                // The open stays queued and may still succeed; the handler
                // must outlive this call to close that connection.
                handler.forget();
            } else {
                request.set_onupgradeneeded(None);
                request.set_onblocked(None);
                request.set_onsuccess(None);
                request.set_onerror(None);
            }
            result
        }
    }
}

fn on_open_event<U>(state: &RefCell<OpenState<U>>, request: &IdbOpenDbRequest, event: &Event)
where
    U: FnOnce(&mut dyn SchemaEditor, VersionChange) -> EngineResult<()>,
{
    let mut state = state.borrow_mut();
    match event.type_().as_str() {
        "upgradeneeded" => {
            let Some(upgrade) = state.upgrade.take() else {
                return;
            };
            let result = run_upgrade(request, event, upgrade);
            if let Err(err) = result {
                // Aborting the version change fails the open with an AbortError;
                // the upgrade's own error is reported instead.
                if let Some(txn) = request.transaction() {
                    let _ = txn.abort();
                }
                state.upgrade_error = Some(err);
            }
        }
        "blocked" => {
            if let Some(responder) = state.responder.take() {
                responder.fail(EngineError::blocked(
                    "an older version of the database is still open elsewhere",
                ));
            }
        }
        "success" => {
            let db = match request.result() {
                Ok(db) => db.unchecked_into::<IdbDatabase>(),
                Err(err) => {
                    if let Some(responder) = state.responder.take() {
                        responder.fail(engine_error(&err));
                    }
                    return;
                }
            };
            match state.responder.take() {
                Some(responder) => {
                    debug!(database = %db.name(), version = db.version(), "indexeddb connection opened");
                    responder.succeed(IdbConnection::new(db));
                }
                None => {
                    debug!(database = %db.name(), "closing connection whose open was abandoned");
                    db.close();
                }
            }
        }
        _ => {
            event.prevent_default();
            let error = state
                .upgrade_error
                .take()
                .unwrap_or_else(|| request_error(request));
            if let Some(responder) = state.responder.take() {
                responder.fail(error);
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn run_upgrade<U>(request: &IdbOpenDbRequest, event: &Event, upgrade: U) -> EngineResult<()>
where
    U: FnOnce(&mut dyn SchemaEditor, VersionChange) -> EngineResult<()>,
{
    let event = event
        .dyn_ref::<IdbVersionChangeEvent>()
        .ok_or_else(|| EngineError::from_native("UnknownError", "upgradeneeded without a version change"))?;
    let change = VersionChange {
        old_version: event.old_version() as u32,
        new_version: event.new_version().unwrap_or_default() as u32,
    };
    let db = request
        .result()
        .map_err(|err| engine_error(&err))?
        .unchecked_into::<IdbDatabase>();
    let txn = request
        .transaction()
        .ok_or_else(|| EngineError::invalid_state("upgrade has no version change transaction"))?;

    let mut editor = IdbSchemaEditor { db, txn };
    upgrade(&mut editor, change)
}

/// Schema edits inside the version change transaction.
struct IdbSchemaEditor {
    db: IdbDatabase,
    txn: web_sys::IdbTransaction,
}

impl SchemaEditor for IdbSchemaEditor {
    fn collection_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn create_collection(
        &mut self,
        name: &str,
        key_path: &KeyPath,
        auto_increment: bool,
    ) -> EngineResult<()> {
        let params = web_sys::IdbObjectStoreParameters::new();
        params.set_key_path(&key_path_to_js(key_path));
        params.set_auto_increment(auto_increment);
        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map(|_| ())
            .map_err(|err| engine_error(&err))
    }

    fn delete_collection(&mut self, name: &str) -> EngineResult<()> {
        self.db
            .delete_object_store(name)
            .map_err(|err| engine_error(&err))
    }

    fn index_names(&self, collection: &str) -> EngineResult<Vec<String>> {
        let store = self
            .txn
            .object_store(collection)
            .map_err(|err| engine_error(&err))?;
        Ok(string_list(&store.index_names()))
    }

    fn create_index(
        &mut self,
        collection: &str,
        name: &str,
        key_path: &KeyPath,
        unique: bool,
    ) -> EngineResult<()> {
        let store = self
            .txn
            .object_store(collection)
            .map_err(|err| engine_error(&err))?;
        let params = web_sys::IdbIndexParameters::new();
        params.set_unique(unique);
        store
            .create_index_with_str_sequence_and_optional_parameters(
                name,
                &key_path_to_js(key_path),
                &params,
            )
            .map(|_| ())
            .map_err(|err| engine_error(&err))
    }
}

#[derive(Debug)]
struct ConnectionInner {
    db: IdbDatabase,
    name: String,
    version: u32,
    closed: Cell<bool>,
}

/// An open IndexedDB connection.
///
/// Clones share the same connection.
#[derive(Debug, Clone)]
pub struct IdbConnection {
    inner: Rc<ConnectionInner>,
}

impl IdbConnection {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn new(db: IdbDatabase) -> Self {
        Self {
            inner: Rc::new(ConnectionInner {
                name: db.name(),
                version: db.version() as u32,
                closed: Cell::new(false),
                db,
            }),
        }
    }
}

impl Connection for IdbConnection {
    type Transaction = IdbTransactionHandle;

    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn version(&self) -> u32 {
        self.inner.version
    }

    fn collection_names(&self) -> Vec<String> {
        string_list(&self.inner.db.object_store_names())
    }

    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
    ) -> EngineResult<IdbTransactionHandle> {
        if self.inner.closed.get() {
            return Err(EngineError::invalid_state(format!(
                "connection to {} is closed",
                self.inner.name
            )));
        }
        if scope.is_empty() {
            return Err(EngineError::invalid_access(
                "a transaction needs at least one collection",
            ));
        }
        let names = scope
            .iter()
            .map(|name| JsValue::from_str(name))
            .collect::<js_sys::Array>();
        let idb_mode = match mode {
            TransactionMode::ReadOnly => web_sys::IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => web_sys::IdbTransactionMode::Readwrite,
        };
        let txn = self
            .inner
            .db
            .transaction_with_str_sequence_and_mode(&names, idb_mode)
            .map_err(|err| engine_error(&err))?;
        Ok(IdbTransactionHandle::begin(txn, mode))
    }

    fn close(&self) {
        if !self.inner.closed.replace(true) {
            self.inner.db.close();
            debug!(database = %self.inner.name, "indexeddb connection closed");
        }
    }
}
