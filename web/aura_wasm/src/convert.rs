//! Conversions between JSON records and JavaScript values.

use aura_storage::{EngineError, EngineResult, Key, KeyPath, Record};
use serde::Serialize;
use wasm_bindgen::JsValue;

/// Converts a record into a plain JavaScript object.
pub(crate) fn record_to_js(record: &Record) -> Result<JsValue, serde_wasm_bindgen::Error> {
    record.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

/// Converts a JavaScript value into a record.
pub(crate) fn record_from_js(value: JsValue) -> Result<Record, serde_wasm_bindgen::Error> {
    serde_wasm_bindgen::from_value(value)
}

pub(crate) fn key_to_js(key: &Key) -> EngineResult<JsValue> {
    record_to_js(&key.to_json()).map_err(|err| EngineError::data(err.to_string()))
}

pub(crate) fn key_from_js(value: JsValue) -> EngineResult<Key> {
    let json = record_from_js(value).map_err(|err| EngineError::data(err.to_string()))?;
    Key::from_json(&json).ok_or_else(|| EngineError::data(format!("{json} is not a valid key")))
}

/// A key path as the engine expects it: a string or an array of strings.
pub(crate) fn key_path_to_js(path: &KeyPath) -> JsValue {
    match path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Composite(paths) => paths
            .iter()
            .map(|path| JsValue::from_str(path))
            .collect::<js_sys::Array>()
            .into(),
    }
}

/// Collects a `DOMStringList` into names.
pub(crate) fn string_list(list: &web_sys::DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.get(i)).collect()
}
