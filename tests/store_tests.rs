//! Tests for the in-memory store backend.

use std::time::Duration;

use testgrid::store::{MemoryStore, StateStore};

#[tokio::test]
async fn test_put_get_roundtrip() {
    let store = MemoryStore::new();

    store.put("job:1", "{\"id\":\"1\"}", None).await.unwrap();
    let value = store.get("job:1").await.unwrap();
    assert_eq!(value, Some("{\"id\":\"1\"}".to_string()));

    // Upsert replaces
    store.put("job:1", "{\"id\":\"1b\"}", None).await.unwrap();
    assert_eq!(
        store.get("job:1").await.unwrap(),
        Some("{\"id\":\"1b\"}".to_string())
    );
}

#[tokio::test]
async fn test_get_missing_key() {
    let store = MemoryStore::new();
    assert_eq!(store.get("job:nope").await.unwrap(), None);
}

#[tokio::test]
async fn test_ttl_expiry() {
    let store = MemoryStore::new();

    store
        .put("agent:1", "x", Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(store.get("agent:1").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(store.get("agent:1").await.unwrap(), None);
    // Expired entries also vanish from scans
    assert!(store.scan("agent:").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete() {
    let store = MemoryStore::new();
    store.put("job:1", "x", None).await.unwrap();
    store.delete("job:1").await.unwrap();
    assert_eq!(store.get("job:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_scan_by_prefix() {
    let store = MemoryStore::new();
    store.put("job:a", "1", None).await.unwrap();
    store.put("job:b", "2", None).await.unwrap();
    store.put("agent:a", "3", None).await.unwrap();

    let keys = store.scan("job:").await.unwrap();
    assert_eq!(keys, vec!["job:a".to_string(), "job:b".to_string()]);
}

#[tokio::test]
async fn test_list_fifo_order() {
    let store = MemoryStore::new();

    assert_eq!(store.list_push_tail("queue:high", "a").await.unwrap(), 1);
    assert_eq!(store.list_push_tail("queue:high", "b").await.unwrap(), 2);
    assert_eq!(store.list_push_tail("queue:high", "c").await.unwrap(), 3);

    assert_eq!(store.list_len("queue:high").await.unwrap(), 3);
    assert_eq!(
        store.list_snapshot("queue:high").await.unwrap(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );

    assert_eq!(
        store.list_pop_head("queue:high").await.unwrap(),
        Some("a".to_string())
    );
    assert_eq!(
        store.list_pop_head("queue:high").await.unwrap(),
        Some("b".to_string())
    );
    assert_eq!(store.list_len("queue:high").await.unwrap(), 1);
}

#[tokio::test]
async fn test_list_pop_empty() {
    let store = MemoryStore::new();
    assert_eq!(store.list_pop_head("queue:low").await.unwrap(), None);
    assert_eq!(store.list_len("queue:low").await.unwrap(), 0);
    assert!(store.list_snapshot("queue:low").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ping() {
    let store = MemoryStore::new();
    store.ping().await.unwrap();
}
