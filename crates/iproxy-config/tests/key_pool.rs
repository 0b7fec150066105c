use iproxy_common::FailureReason;
use iproxy_config::{ConfigStore, KeyItem, KeyStatus, PoolMutation, RuntimeConfig};
use iproxy_logging::{LogLevel, Logger};

fn store_with_pool(items: Vec<KeyItem>) -> std::sync::Arc<ConfigStore> {
    let mut config = RuntimeConfig::default();
    config.key_pools.insert("Gitee".to_string(), items);
    ConfigStore::in_memory(config, Logger::silent(LogLevel::Error))
}

fn item(key: &str) -> KeyItem {
    KeyItem::new("Gitee", key.to_string(), format!("name-{key}"))
}

#[tokio::test]
async fn selection_only_returns_active_enabled_keys() {
    let mut disabled = item("disabled-key-000000000000000000000000000");
    disabled.status = KeyStatus::Disabled;
    let mut off = item("off-key-00000000000000000000000000000000000");
    off.enabled = false;
    let good = item("good-key-0000000000000000000000000000000000");

    let store = store_with_pool(vec![disabled, off, good.clone()]);
    for _ in 0..20 {
        assert_eq!(store.next_available_key("Gitee"), Some(good.key.clone()));
    }
}

#[tokio::test]
async fn empty_pool_yields_none() {
    let store = store_with_pool(Vec::new());
    assert_eq!(store.next_available_key("Gitee"), None);
    assert_eq!(store.next_available_key("Unknown"), None);
}

#[tokio::test]
async fn six_consecutive_errors_disable_the_key() {
    let tracked = item("tracked-key-00000000000000000000000000000");
    let store = store_with_pool(vec![tracked.clone()]);

    for _ in 0..5 {
        store
            .report_key_error("Gitee", &tracked.key, FailureReason::RateLimit)
            .await;
    }
    let pool = store.get_key_pool("Gitee");
    assert_eq!(pool[0].error_count, 5);
    assert_eq!(pool[0].status, KeyStatus::Active);

    store
        .report_key_error("Gitee", &tracked.key, FailureReason::Other)
        .await;
    let pool = store.get_key_pool("Gitee");
    assert_eq!(pool[0].error_count, 6);
    assert_eq!(pool[0].status, KeyStatus::Disabled);
    assert_eq!(store.next_available_key("Gitee"), None);
}

#[tokio::test]
async fn success_resets_error_count_and_stamps_last_used() {
    let tracked = item("reset-key-000000000000000000000000000000000");
    let store = store_with_pool(vec![tracked.clone()]);

    store
        .report_key_error("Gitee", &tracked.key, FailureReason::AuthError)
        .await;
    store.report_key_success("Gitee", &tracked.key).await;

    let pool = store.get_key_pool("Gitee");
    assert_eq!(pool[0].error_count, 0);
    assert_eq!(pool[0].success_count, 1);
    assert_eq!(pool[0].total_calls, 2);
    assert!(pool[0].last_used > 0);
}

#[tokio::test]
async fn duplicate_add_is_rejected() {
    let store = store_with_pool(Vec::new());
    let outcome = store
        .add_key("Gitee", "abc123".to_string(), "first".to_string())
        .await;
    assert_eq!(outcome, PoolMutation::Applied);

    let outcome = store
        .add_key("Gitee", "abc123".to_string(), "second".to_string())
        .await;
    assert_eq!(outcome, PoolMutation::DuplicateKey);
    assert_eq!(store.get_key_pool("Gitee").len(), 1);
}

#[tokio::test]
async fn batch_add_skips_blanks_and_duplicates() {
    let store = store_with_pool(Vec::new());
    let added = store
        .add_keys_batch("Gitee", "key-one,key-two\n\nkey-one,  ,key-three")
        .await;
    assert_eq!(added, 3);
    assert_eq!(store.get_key_pool("Gitee").len(), 3);
}

#[tokio::test]
async fn delete_missing_id_reports_not_found() {
    let tracked = item("delete-key-00000000000000000000000000000000");
    let store = store_with_pool(vec![tracked.clone()]);
    assert_eq!(
        store.delete_key("Gitee", "no-such-id").await,
        PoolMutation::NotFound
    );
    assert_eq!(
        store.delete_key("Gitee", &tracked.id).await,
        PoolMutation::Applied
    );
    assert!(store.get_key_pool("Gitee").is_empty());
}
