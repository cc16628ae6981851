//! Connection lifecycle tests against the in-memory engine.

use aura_core::{
    CollectionDescriptor, ConnectionState, IndexDescriptor, Schema, Store, StoreConfig, StoreError,
};
use aura_storage::{EngineError, MemoryEngine};
use serde_json::json;

fn schema() -> Schema {
    Schema::new(vec![
        CollectionDescriptor::new("book", "id")
            .auto_key()
            .with_index(IndexDescriptor::new("genre_id", "genreId")),
    ])
    .unwrap()
}

fn store(engine: &MemoryEngine, version: u32) -> Store<MemoryEngine> {
    Store::new(engine.clone(), StoreConfig::new("shelf", version), schema())
}

#[tokio::test]
async fn concurrent_connects_share_one_open() {
    let engine = MemoryEngine::new();
    let store = store(&engine, 1);
    engine.hold_opens();

    let (a, b, c, ()) = tokio::join!(store.connect(), store.connect(), store.connect(), async {
        tokio::task::yield_now().await;
        engine.release_opens();
    });

    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a.id(), b.id());
    assert_eq!(b.id(), c.id());
    assert_eq!(engine.open_requests(), 1);
    assert_eq!(engine.open_connections("shelf"), 1);
    assert_eq!(store.connection_state(), ConnectionState::Open);
}

#[tokio::test]
async fn concurrent_connects_share_one_failure() {
    let engine = MemoryEngine::new();
    let store = store(&engine, 1);
    engine.hold_opens();
    engine.fail_next_open(EngineError::from_native("UnknownError", "disk unavailable"));

    let (a, b, ()) = tokio::join!(store.connect(), store.connect(), async {
        tokio::task::yield_now().await;
        engine.release_opens();
    });

    assert!(matches!(a, Err(StoreError::Connection { .. })));
    assert!(matches!(b, Err(StoreError::Connection { .. })));
    assert_eq!(engine.open_requests(), 1);
}

#[tokio::test]
async fn failed_open_is_retried_on_next_connect() {
    let engine = MemoryEngine::new();
    let store = store(&engine, 1);
    engine.fail_next_open(EngineError::from_native("UnknownError", "disk unavailable"));

    let err = store.connect().await.unwrap_err();
    assert!(err.to_string().contains("disk unavailable"));
    assert_eq!(store.connection_state(), ConnectionState::Closed);

    store.connect().await.unwrap();
    assert_eq!(store.connection_state(), ConnectionState::Open);
    assert_eq!(engine.open_requests(), 2);
}

#[tokio::test]
async fn blocked_upgrade_succeeds_once_old_connection_closes() {
    let engine = MemoryEngine::new();
    let old = store(&engine, 1);
    old.connect().await.unwrap();

    let new = store(&engine, 2);
    let err = new.connect().await.unwrap_err();
    assert!(matches!(err, StoreError::ConnectionBlocked { .. }));
    assert_eq!(new.connection_state(), ConnectionState::Closed);
    assert_eq!(engine.version("shelf"), Some(1));

    old.close();
    new.connect().await.unwrap();
    assert_eq!(engine.version("shelf"), Some(2));
}

#[tokio::test]
async fn lower_version_fails() {
    let engine = MemoryEngine::new();
    store(&engine, 3).connect().await.unwrap();

    let err = store(&engine, 2).connect().await.unwrap_err();
    assert!(matches!(err, StoreError::Connection { .. }));
    assert!(err.to_string().contains("less than stored version"));
    assert_eq!(engine.version("shelf"), Some(3));
}

#[tokio::test]
async fn close_during_open_discards_connection() {
    let engine = MemoryEngine::new();
    let store = store(&engine, 1);
    engine.hold_opens();

    let (opened, ()) = tokio::join!(store.connect(), async {
        tokio::task::yield_now().await;
        store.close();
        engine.release_opens();
    });

    let err = opened.unwrap_err();
    assert!(err.to_string().contains("closed while opening"));
    assert_eq!(store.connection_state(), ConnectionState::Closed);
    assert_eq!(engine.open_connections("shelf"), 0);

    store.connect().await.unwrap();
    assert_eq!(engine.open_connections("shelf"), 1);
}

#[tokio::test]
async fn operations_connect_lazily() {
    let engine = MemoryEngine::new();
    let store = store(&engine, 1);
    assert_eq!(engine.open_requests(), 0);

    store.put("book", &mut json!({ "id": 1, "genreId": 1 })).await.unwrap();
    store.count("book").await.unwrap();
    assert_eq!(engine.open_requests(), 1);
}

#[tokio::test]
async fn reopening_keeps_data_and_adds_collections() {
    let engine = MemoryEngine::new();
    {
        let v1 = store(&engine, 1);
        v1.add("book", &mut json!({ "genreId": 1 })).await.unwrap();
    }

    let v2_schema = Schema::new(vec![
        CollectionDescriptor::new("book", "id")
            .auto_key()
            .with_index(IndexDescriptor::new("genre_id", "genreId")),
        CollectionDescriptor::new("setting", "id"),
    ])
    .unwrap();
    let v2 = Store::new(engine.clone(), StoreConfig::new("shelf", 2), v2_schema);
    assert_eq!(v2.count("book").await.unwrap(), 1);
    assert_eq!(engine.collection_names("shelf"), vec!["book", "setting"]);
    assert_eq!(engine.index_names("shelf", "book"), vec!["genre_id"]);
}

#[tokio::test]
async fn reset_on_upgrade_recreates_collections() {
    let engine = MemoryEngine::new();
    {
        let v1 = store(&engine, 1);
        v1.add("book", &mut json!({ "genreId": 1 })).await.unwrap();
    }

    let config = StoreConfig::new("shelf", 2).reset_on_upgrade(true);
    let v2 = Store::new(engine.clone(), config, schema());
    assert_eq!(v2.count("book").await.unwrap(), 0);

    // The key generator starts over with the collection.
    let key = v2.add("book", &mut json!({ "genreId": 1 })).await.unwrap();
    assert_eq!(key, aura_storage::Key::Integer(1));
}
