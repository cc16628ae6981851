//! Error types for WASM bindings.

use aura_core::StoreError;
use aura_storage::EngineError;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Errors that can occur in the WASM bindings.
#[derive(Debug, Error)]
pub enum WasmError {
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JavaScript error occurred.
    #[error("JS error: {0}")]
    JsError(String),

    /// Feature not supported in current environment.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl From<WasmError> for JsValue {
    fn from(err: WasmError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

impl From<JsValue> for WasmError {
    fn from(val: JsValue) -> Self {
        WasmError::JsError(val.as_string().unwrap_or_else(|| format!("{val:?}")))
    }
}

impl From<serde_wasm_bindgen::Error> for WasmError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        WasmError::InvalidInput(err.to_string())
    }
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;

/// Maps a thrown value or a `DOMException` to an engine error.
pub(crate) fn engine_error(value: &JsValue) -> EngineError {
    if let Some(exception) = value.dyn_ref::<web_sys::DomException>() {
        return EngineError::from_native(&exception.name(), exception.message());
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return EngineError::from_native(
            &String::from(error.name()),
            String::from(error.message()),
        );
    }
    EngineError::from_native(
        "UnknownError",
        value.as_string().unwrap_or_else(|| format!("{value:?}")),
    )
}

/// Error attached to a failed request, or a generic one if it has none.
pub(crate) fn request_error(request: &web_sys::IdbRequest) -> EngineError {
    match request.error() {
        Ok(Some(exception)) => EngineError::from_native(&exception.name(), exception.message()),
        Ok(None) => EngineError::from_native("UnknownError", "request failed without an error"),
        Err(thrown) => engine_error(&thrown),
    }
}
