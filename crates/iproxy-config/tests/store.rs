use iproxy_common::TaskKind;
use iproxy_config::{ConfigStore, RuntimeConfig, SystemPatch, TaskDefaults};
use iproxy_logging::{LogLevel, Logger};

#[tokio::test]
async fn boot_creates_document_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let store = ConfigStore::load(data_dir.clone(), Logger::silent(LogLevel::Error)).await;

    assert_eq!(store.get().system.port, 3000);
    let written = std::fs::read(data_dir.join("runtime-config.json")).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&written).unwrap();
    assert_eq!(value["system"]["port"], 3000);
}

#[tokio::test]
async fn legacy_document_is_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::write(
        dir.path().join("runtime-config.json"),
        serde_json::to_vec(&serde_json::json!({"system": {"port": 4321}})).unwrap(),
    )
    .unwrap();

    let store = ConfigStore::load(data_dir.clone(), Logger::silent(LogLevel::Error)).await;
    assert_eq!(store.get().system.port, 4321);
    assert!(data_dir.join("runtime-config.json").exists());
}

#[tokio::test]
async fn mutations_persist_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let store = ConfigStore::load(data_dir.clone(), Logger::silent(LogLevel::Error)).await;

    store
        .update_system(SystemPatch {
            port: Some(8888),
            ..SystemPatch::default()
        })
        .await;
    store
        .set_task_defaults(
            "Doubao",
            TaskKind::Text,
            TaskDefaults {
                model: Some("doubao-seedream-4-5-251128".to_string()),
                n: Some(3),
                weight: Some(10),
                ..TaskDefaults::default()
            },
        )
        .await;

    let written = std::fs::read(data_dir.join("runtime-config.json")).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&written).unwrap();
    assert_eq!(value["system"]["port"], 8888);
    assert_eq!(
        value["providers"]["Doubao"]["text"]["model"],
        "doubao-seedream-4-5-251128"
    );
    assert_eq!(value["providers"]["Doubao"]["text"]["weight"], 10);
}

#[tokio::test]
async fn corrupt_document_degrades_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("runtime-config.json"), b"{not json").unwrap();

    let store = ConfigStore::load(data_dir, Logger::silent(LogLevel::Error)).await;
    assert_eq!(store.get().system.port, 3000);
    assert_eq!(store.get().as_ref(), &RuntimeConfig::default());
}
