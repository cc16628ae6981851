//! Store WASM bindings.
//!
//! This module provides the JavaScript-facing API of the Aura store.

use crate::backend::IdbEngine;
use crate::convert::{key_from_js, key_to_js, record_from_js, record_to_js};
use crate::error::{WasmError, WasmResult};
use aura_core::{aura_schema, Key, Record, Store, StoreConfig, DEFAULT_NAME, DEFAULT_VERSION};
use js_sys::{Array, Object, Promise};
use std::future::Future;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

/// The Aura store over the browser's IndexedDB.
///
/// Every method runs in its own transaction and returns a Promise.
///
/// ## Example
///
/// ```javascript
/// const store = await AuraStore.open();
/// const book = { genreId: 1, name: "aura.txt", title: "aura" };
/// const id = await store.add("book", book);
/// console.log(book.id === id);
///
/// await store.deleteAllByIndex("chapter", "book_id", id);
/// store.close();
/// ```
#[wasm_bindgen]
pub struct AuraStore {
    inner: Rc<Store<IdbEngine>>,
}

#[wasm_bindgen]
impl AuraStore {
    /// Opens the bookshelf database.
    ///
    /// Defaults to the `Aura` database at version 1.
    #[wasm_bindgen]
    pub async fn open(name: Option<String>, version: Option<u32>) -> Result<AuraStore, JsValue> {
        let engine = IdbEngine::new().map_err(|err| WasmError::NotSupported(err.to_string()))?;
        let config = StoreConfig::new(
            name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            version.unwrap_or(DEFAULT_VERSION),
        );
        let store = Store::new(engine, config, aura_schema().map_err(WasmError::from)?);
        store.connect().await.map_err(WasmError::from)?;
        Ok(AuraStore {
            inner: Rc::new(store),
        })
    }

    /// Inserts a record. A generated key is written back into `record`.
    #[wasm_bindgen]
    pub fn add(&self, collection: String, record: JsValue) -> Promise {
        self.write(collection, record, false)
    }

    /// Inserts or replaces a record. A generated key is written back into
    /// `record`.
    #[wasm_bindgen]
    pub fn put(&self, collection: String, record: JsValue) -> Promise {
        self.write(collection, record, true)
    }

    /// Puts an array of records in one transaction. Resolves to their keys.
    #[wasm_bindgen(js_name = putAll)]
    pub fn put_all(&self, collection: String, records: Array) -> Promise {
        self.spawn(move |store| async move {
            let mut values = records
                .iter()
                .map(record_from_js)
                .collect::<Result<Vec<_>, _>>()?;
            let keys = store.put_all(&collection, &mut values).await?;
            for (target, value) in records.iter().zip(&values) {
                assign(&target, value)?;
            }
            keys_to_js(&keys)
        })
    }

    /// Resolves to the record with the primary key, or `undefined`.
    #[wasm_bindgen(js_name = getByKey)]
    pub fn get_by_key(&self, collection: String, key: JsValue) -> Promise {
        self.spawn(move |store| async move {
            let key = parse_key(key)?;
            optional_to_js(store.get_by_key(&collection, key).await?)
        })
    }

    /// Resolves to the first record whose indexed field equals `value`.
    #[wasm_bindgen(js_name = getByIndex)]
    pub fn get_by_index(&self, collection: String, index: String, value: JsValue) -> Promise {
        self.spawn(move |store| async move {
            let value = parse_key(value)?;
            optional_to_js(store.get_by_index(&collection, &index, value).await?)
        })
    }

    /// Resolves to every record of a collection.
    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self, collection: String) -> Promise {
        self.spawn(move |store| async move { records_to_js(&store.get_all(&collection).await?) })
    }

    /// Resolves to every record whose indexed field equals `value`.
    #[wasm_bindgen(js_name = getAllByIndex)]
    pub fn get_all_by_index(&self, collection: String, index: String, value: JsValue) -> Promise {
        self.spawn(move |store| async move {
            let value = parse_key(value)?;
            records_to_js(&store.get_all_by_index(&collection, &index, value).await?)
        })
    }

    /// Deletes the record with the primary key.
    #[wasm_bindgen(js_name = deleteByKey)]
    pub fn delete_by_key(&self, collection: String, key: JsValue) -> Promise {
        self.spawn(move |store| async move {
            let key = parse_key(key)?;
            store.delete_by_key(&collection, key).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Deletes the record whose unique indexed field equals `value`.
    /// Resolves to whether a record was removed.
    #[wasm_bindgen(js_name = deleteByIndex)]
    pub fn delete_by_index(&self, collection: String, index: String, value: JsValue) -> Promise {
        self.spawn(move |store| async move {
            let value = parse_key(value)?;
            let deleted = store.delete_by_index(&collection, &index, value).await?;
            Ok(JsValue::from_bool(deleted))
        })
    }

    /// Deletes every record whose indexed field equals `value`. Resolves to
    /// the number of deleted records.
    #[wasm_bindgen(js_name = deleteAllByIndex)]
    pub fn delete_all_by_index(&self, collection: String, index: String, value: JsValue) -> Promise {
        self.spawn(move |store| async move {
            let value = parse_key(value)?;
            let deleted = store.delete_all_by_index(&collection, &index, value).await?;
            Ok(JsValue::from_f64(deleted as f64))
        })
    }

    /// Deletes every record of a collection.
    #[wasm_bindgen]
    pub fn clear(&self, collection: String) -> Promise {
        self.spawn(move |store| async move {
            store.clear(&collection).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Resolves to the number of records in a collection.
    #[wasm_bindgen]
    pub fn count(&self, collection: String) -> Promise {
        self.spawn(move |store| async move {
            let count = store.count(&collection).await?;
            Ok(JsValue::from_f64(count as f64))
        })
    }

    /// Closes the connection. The next call reopens it.
    #[wasm_bindgen]
    pub fn close(&self) {
        self.inner.close();
    }
}

impl AuraStore {
    fn spawn<F, Fut>(&self, run: F) -> Promise
    where
        F: FnOnce(Rc<Store<IdbEngine>>) -> Fut,
        Fut: Future<Output = WasmResult<JsValue>> + 'static,
    {
        let future = run(Rc::clone(&self.inner));
        future_to_promise(async move { future.await.map_err(JsValue::from) })
    }

    fn write(&self, collection: String, target: JsValue, overwrite: bool) -> Promise {
        self.spawn(move |store| async move {
            let mut record = record_from_js(target.clone())?;
            let key = if overwrite {
                store.put(&collection, &mut record).await?
            } else {
                store.add(&collection, &mut record).await?
            };
            assign(&target, &record)?;
            key_to_js(&key).map_err(|err| WasmError::InvalidInput(err.to_string()))
        })
    }
}

fn parse_key(value: JsValue) -> WasmResult<Key> {
    key_from_js(value).map_err(|err| WasmError::InvalidInput(err.to_string()))
}

/// Copies the stored record's fields, the generated key included, back into
/// the caller's object.
fn assign(target: &JsValue, record: &Record) -> WasmResult<()> {
    if let Some(target) = target.dyn_ref::<Object>() {
        let source = record_to_js(record)?;
        Object::assign(target, source.unchecked_ref());
    }
    Ok(())
}

fn optional_to_js(record: Option<Record>) -> WasmResult<JsValue> {
    match record {
        Some(record) => Ok(record_to_js(&record)?),
        None => Ok(JsValue::UNDEFINED),
    }
}

fn records_to_js(records: &[Record]) -> WasmResult<JsValue> {
    let array = Array::new();
    for record in records {
        array.push(&record_to_js(record)?);
    }
    Ok(array.into())
}

fn keys_to_js(keys: &[Key]) -> WasmResult<JsValue> {
    let array = Array::new();
    for key in keys {
        array.push(&record_to_js(&key.to_json())?);
    }
    Ok(array.into())
}
