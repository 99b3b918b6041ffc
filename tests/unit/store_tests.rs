//! Unit tests for the in-memory checkpoint and session stores.

use agent_relay::driver::SessionStore;
use agent_relay::models::turn::ChatMessage;
use agent_relay::persistence::checkpoint_store::{CheckpointStore, MemoryCheckpointStore};
use agent_relay::persistence::session_store::MemorySessionStore;

#[tokio::test]
async fn checkpoint_store_set_get_delete() {
    let store = MemoryCheckpointStore::new();
    assert!(store.get("cp-1".into()).await.expect("get").is_none());

    store
        .set("cp-1".into(), b"state-v1".to_vec())
        .await
        .expect("set");
    store
        .set("cp-1".into(), b"state-v2".to_vec())
        .await
        .expect("overwrite");
    assert_eq!(
        store.get("cp-1".into()).await.expect("get"),
        Some(b"state-v2".to_vec())
    );
    assert_eq!(store.len().await, 1);

    assert!(store.delete("cp-1".into()).await.expect("delete"));
    assert!(!store.delete("cp-1".into()).await.expect("delete again"));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn session_store_appends_and_truncates() {
    let store = MemorySessionStore::new();
    for text in ["one", "two", "three"] {
        store
            .append("chat:1".into(), ChatMessage::user(text))
            .await
            .expect("append");
    }
    store
        .append("chat:2".into(), ChatMessage::assistant("other"))
        .await
        .expect("append");

    assert_eq!(store.truncate("chat:1".into(), 2).await.expect("truncate"), 1);
    assert_eq!(
        store.history("chat:1".into()).await.expect("history"),
        vec![ChatMessage::user("two"), ChatMessage::user("three")]
    );
    assert_eq!(store.truncate("chat:1".into(), 5).await.expect("noop"), 0);
    assert_eq!(store.truncate("missing".into(), 0).await.expect("missing"), 0);
    assert_eq!(
        store.history("chat:2".into()).await.expect("history").len(),
        1
    );
}
