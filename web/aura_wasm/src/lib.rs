//! # Aura WASM
//!
//! WebAssembly bindings for the Aura bookshelf store over IndexedDB.
//!
//! This crate provides:
//! - [`IdbEngine`], the storage engine over the browser's IndexedDB
//! - [`AuraStore`], a JavaScript-friendly API via wasm-bindgen
//!
//! ## Usage
//!
//! ```javascript
//! import init, { AuraStore } from 'aura_wasm';
//!
//! async function main() {
//!     await init();
//!
//!     const store = await AuraStore.open();
//!     const book = { genreId: 1, name: "aura.txt", title: "aura" };
//!     await store.add("book", book);
//!
//!     const books = await store.getAllByIndex("book", "genre_id", 1);
//!     console.log(books.length, book.id);
//!
//!     store.close();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod convert;
mod error;
mod store;
mod utils;

pub use backend::{IdbConnection, IdbEngine};
pub use error::{WasmError, WasmResult};
pub use store::AuraStore;

use wasm_bindgen::prelude::*;

/// Initialize the WASM module.
///
/// This sets up panic hooks for better error messages in the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
}
