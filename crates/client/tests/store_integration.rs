//! Integration tests for the secure store over the durable file backend.

use std::sync::Arc;

use carelink_client::store::{FileBackend, SecureStore, SecureStoreConfig, StorageScope, StoreError};
use carelink_client::session::TokenSet;
use carelink_common::EncryptionService;
use chrono::Utc;

fn tokens() -> TokenSet {
    TokenSet {
        access_token: "access-abc".into(),
        refresh_token: "refresh-def".into(),
        id_token: None,
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

fn store_over(
    path: &std::path::Path,
    config: SecureStoreConfig,
    key: Vec<u8>,
) -> SecureStore {
    SecureStore::new(
        config,
        Some(EncryptionService::new(key).unwrap()),
        Arc::new(FileBackend::open(path).unwrap()),
        Arc::new(carelink_client::store::MemoryBackend::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn durable_entries_survive_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.json");
    let key = EncryptionService::generate_key();

    {
        let store = store_over(&path, SecureStoreConfig::default(), key.clone());
        store.put("prefs", &vec!["large-text", "high-contrast"], StorageScope::Durable, false)
            .await
            .unwrap();
    }

    let reopened = store_over(&path, SecureStoreConfig::default(), key);
    let prefs: Option<Vec<String>> = reopened.get("prefs", StorageScope::Durable).await.unwrap();
    assert_eq!(prefs, Some(vec!["large-text".to_string(), "high-contrast".to_string()]));
}

#[tokio::test]
async fn persisted_file_never_contains_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.json");

    let store = store_over(&path, SecureStoreConfig::default(), EncryptionService::generate_key());
    store.put("session-tokens", &tokens(), StorageScope::Durable, true).await.unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("access-abc"));
    assert!(!raw.contains("refresh-def"));
}

#[tokio::test]
async fn version_bump_yields_incompatible_version_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.json");
    let key = EncryptionService::generate_key();

    {
        let store = store_over(
            &path,
            SecureStoreConfig::builder().encryption_version(1).build().unwrap(),
            key.clone(),
        );
        store.put("session", &tokens(), StorageScope::Durable, true).await.unwrap();
    }

    let bumped = store_over(
        &path,
        SecureStoreConfig::builder().encryption_version(2).build().unwrap(),
        key,
    );
    let result: Result<Option<TokenSet>, _> = bumped.get("session", StorageScope::Durable).await;
    assert!(matches!(result, Err(StoreError::IncompatibleVersion { found: 1, current: 2 })));
}

#[tokio::test]
async fn quota_is_enforced_across_existing_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.json");

    let store = store_over(
        &path,
        SecureStoreConfig::builder().quota_bytes(2048).build().unwrap(),
        EncryptionService::generate_key(),
    );

    store.put("first", &"x".repeat(400), StorageScope::Durable, false).await.unwrap();
    let result = store.put("second", &"y".repeat(1200), StorageScope::Durable, false).await;
    assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));

    // The failed write must not be observable, the earlier one must remain.
    let second: Option<String> = store.get("second", StorageScope::Durable).await.unwrap();
    assert_eq!(second, None);
    let first: Option<String> = store.get("first", StorageScope::Durable).await.unwrap();
    assert!(first.is_some());
}

#[tokio::test]
async fn clear_all_removes_every_durable_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.json");
    let key = EncryptionService::generate_key();

    let store = store_over(&path, SecureStoreConfig::default(), key.clone());
    store.put("a", &1u32, StorageScope::Durable, false).await.unwrap();
    store.put("b", &2u32, StorageScope::Durable, false).await.unwrap();
    store.clear_all(StorageScope::Durable).await.unwrap();

    let reopened = store_over(&path, SecureStoreConfig::default(), key);
    let a: Option<u32> = reopened.get("a", StorageScope::Durable).await.unwrap();
    assert_eq!(a, None);
    assert_eq!(reopened.used_bytes(StorageScope::Durable).await.unwrap(), 0);
}
