//! Browser tests for the IndexedDB engine.
//!
//! Run with `wasm-pack test --headless --chrome web/aura_wasm`.

#![cfg(target_arch = "wasm32")]

use aura_core::shelf::{Book, Chapter, BOOK};
use aura_core::{aura_schema, Bookshelf, Store, StoreConfig, StoreError, TransactionMode};
use aura_wasm::IdbEngine;
use std::sync::Arc;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

async fn create_shelf(name: &str) -> (IdbEngine, Bookshelf<IdbEngine>) {
    let engine = IdbEngine::new().unwrap();
    engine.delete_database(name).await.unwrap();
    let store = Store::new(engine.clone(), StoreConfig::new(name, 1), aura_schema().unwrap());
    #[allow(clippy::arc_with_non_send_sync)]
    let shelf = Bookshelf::new(Arc::new(store));
    (engine, shelf)
}

fn chapter(id: i64) -> Chapter {
    Chapter {
        id,
        book_id: 0,
        index: u32::try_from(id).unwrap(),
        title: format!("Chapter {id}"),
        lines: vec![format!("line {id}")],
        start_line_number: 1,
        end_line_number: 1,
    }
}

#[wasm_bindgen_test]
async fn import_and_open_book() {
    let (_engine, shelf) = create_shelf("aura-test-import").await;

    let book = shelf
        .import_book(Book::new(1, "aura.txt", "hash", 10, 0), vec![chapter(1), chapter(2)])
        .await
        .unwrap();
    let book_id = book.id.unwrap();

    let context = shelf.open_book(book_id).await.unwrap().unwrap();
    assert_eq!(context.book, book);
    assert_eq!(context.table_of_contents.unwrap().contents.len(), 2);
    assert_eq!(shelf.chapters(book_id).await.unwrap().len(), 2);

    shelf.store().close();
}

#[wasm_bindgen_test]
async fn delete_book_walks_the_chapter_index() {
    let (_engine, shelf) = create_shelf("aura-test-delete").await;

    let book = shelf
        .import_book(Book::new(1, "a.txt", "a", 1, 0), vec![chapter(1), chapter(2), chapter(3)])
        .await
        .unwrap();

    let deleted = shelf.delete_book(book.id.unwrap()).await.unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(shelf.store().count(BOOK).await.unwrap(), 0);

    shelf.store().close();
}

#[wasm_bindgen_test]
async fn business_abort_rolls_back() {
    let (_engine, shelf) = create_shelf("aura-test-abort").await;
    let store = shelf.store();

    let result = store
        .execute(BOOK, TransactionMode::ReadWrite, |ops| async move {
            let mut book = serde_json::json!({ "genreId": 1, "name": "x" });
            ops.add(BOOK, &mut book).await?;
            Err::<(), _>(StoreError::abort("duplicate book"))
        })
        .await;

    assert!(matches!(result, Err(StoreError::BusinessAbort { .. })));
    assert_eq!(store.count(BOOK).await.unwrap(), 0);

    store.close();
}
