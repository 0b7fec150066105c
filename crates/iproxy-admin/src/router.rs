use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use iproxy_common::{mask_key, TaskKind};
use iproxy_config::{KeyItem, ProviderSettings, RuntimeConfig, SystemPatch, TaskDefaults};
use iproxy_core::Engine;
use iproxy_logging::LogLevel;

const MODULE: &str = "Admin";

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<Engine>,
}

pub fn admin_router(engine: Arc<Engine>) -> Router {
    let state = AdminState { engine };

    Router::new()
        .route("/api/config", get(get_config))
        .route("/api/runtime-config", get(get_runtime_config))
        .route("/api/runtime-config", post(patch_runtime_config))
        .route("/api/key-pool", get(get_key_pool))
        .route("/api/key-pool", post(mutate_key_pool))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route("/api/logs/stream", get(logs_stream))
        .route("/api/gallery", get(gallery_list))
        .route("/api/gallery", delete(gallery_delete))
        .route(
            "/api/tools/test-prompt-optimizer",
            post(test_prompt_optimizer),
        )
        .route("/api/tools/fetch-models", post(fetch_models))
        .route("/api/restart-docker", post(restart_docker))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

/// Bearer check against `globalAccessKey` when one is configured.
async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state
        .engine
        .state()
        .config
        .get()
        .system
        .global_access_key
        .clone();
    if let Some(expected) = expected.filter(|key| !key.is_empty()) {
        let presented = bearer_token(&headers);
        if presented.as_deref() != Some(expected.as_str()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?;
    (!token.is_empty()).then(|| token.trim().to_string())
}

/// Snapshot plus derived capability flags per provider.
async fn get_config(State(state): State<AdminState>) -> Response {
    let app = state.engine.state();
    let config = app.config.get();

    let mut providers = serde_json::Map::new();
    for provider in app.registry.iter() {
        let name = provider.name();
        let descriptor = provider.descriptor();
        let settings = config.provider(name).cloned().unwrap_or_default();
        providers.insert(
            name.to_string(),
            serde_json::json!({
                "enabled": settings.is_enabled(),
                "settings": settings,
                "capabilities": descriptor.capabilities,
                "models": provider.supported_models(),
                "defaultModel": descriptor.default_model,
                "keyCount": config
                    .key_pools
                    .get(name)
                    .map(|pool| pool.len())
                    .unwrap_or(0),
            }),
        );
    }

    Json(serde_json::json!({
        "system": masked_system(&config),
        "providers": providers,
        "promptOptimizer": masked_optimizer(&config),
        "storage": masked_storage(&config),
    }))
    .into_response()
}

async fn get_runtime_config(State(state): State<AdminState>) -> Response {
    let config = state.engine.state().config.get();
    let mut value = serde_json::to_value(config.as_ref()).unwrap_or_default();
    mask_pools_in_place(&mut value);
    value["system"] = masked_system(&config);
    value["promptOptimizer"] = masked_optimizer(&config);
    value["storage"] = masked_storage(&config);
    Json(value).into_response()
}

/// Accepted patch shapes: `{system}`, `{providers}`, `{storage}`,
/// `{promptOptimizer}`, or a single `{provider, task, defaults}` triple.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimePatch {
    system: Option<SystemPatch>,
    providers: Option<std::collections::BTreeMap<String, ProviderSettings>>,
    storage: Option<iproxy_config::StorageConfig>,
    prompt_optimizer: Option<iproxy_config::PromptOptimizerConfig>,
    provider: Option<String>,
    task: Option<String>,
    defaults: Option<TaskDefaults>,
}

async fn patch_runtime_config(
    State(state): State<AdminState>,
    Json(patch): Json<RuntimePatch>,
) -> Response {
    let app = state.engine.state();
    let store = &app.config;
    let old_port = store.get().system.port;

    if let Some(system) = patch.system {
        store.update_system(system).await;
        let new_port = store.get().system.port;
        if new_port != old_port {
            let compose_path = app
                .data_dir
                .parent()
                .unwrap_or(&app.data_dir)
                .join("docker-compose.yml");
            crate::compose::rewrite_compose_port(&compose_path, old_port, new_port, &app.logger)
                .await;
        }
    }
    if let Some(providers) = patch.providers {
        for (name, settings) in providers {
            store.set_provider_settings(&name, settings).await;
        }
    }
    if let Some(storage) = patch.storage {
        store.set_storage(storage).await;
    }
    if let Some(optimizer) = patch.prompt_optimizer {
        store.set_prompt_optimizer(optimizer).await;
    }
    if let (Some(provider), Some(task), Some(defaults)) =
        (patch.provider, patch.task.as_deref(), patch.defaults)
    {
        let Some(task) = TaskKind::parse(task) else {
            return error(StatusCode::BAD_REQUEST, "unknown task");
        };
        store.set_task_defaults(&provider, task, defaults).await;
    }

    app.logger.info(MODULE, "runtime config updated");
    Json(serde_json::json!({ "success": true })).into_response()
}

#[derive(Debug, Deserialize)]
struct PoolQuery {
    provider: Option<String>,
}

async fn get_key_pool(
    State(state): State<AdminState>,
    Query(query): Query<PoolQuery>,
) -> Response {
    let Some(provider) = query.provider else {
        return error(StatusCode::BAD_REQUEST, "provider is required");
    };
    let pool = state.engine.state().config.get_key_pool(&provider);
    Json(serde_json::json!({ "keys": masked_items(&pool) })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolMutationBody {
    action: String,
    provider: String,
    key: Option<String>,
    keys: Option<String>,
    name: Option<String>,
    id: Option<String>,
    enabled: Option<bool>,
    status: Option<iproxy_config::KeyStatus>,
}

async fn mutate_key_pool(
    State(state): State<AdminState>,
    Json(body): Json<PoolMutationBody>,
) -> Response {
    let store = &state.engine.state().config;
    match body.action.as_str() {
        "add" => {
            let Some(key) = body.key else {
                return error(StatusCode::BAD_REQUEST, "key is required");
            };
            let name = body.name.unwrap_or_else(|| format!("{}-key", body.provider));
            match store.add_key(&body.provider, key, name).await {
                iproxy_config::PoolMutation::Applied => success(),
                iproxy_config::PoolMutation::DuplicateKey => {
                    error(StatusCode::BAD_REQUEST, "Duplicate key")
                }
                iproxy_config::PoolMutation::NotFound => {
                    error(StatusCode::BAD_REQUEST, "key is required")
                }
            }
        }
        "batch_add" => {
            let Some(blob) = body.keys else {
                return error(StatusCode::BAD_REQUEST, "keys is required");
            };
            let added = store.add_keys_batch(&body.provider, &blob).await;
            Json(serde_json::json!({ "success": true, "added": added })).into_response()
        }
        "update" => {
            let Some(id) = body.id else {
                return error(StatusCode::BAD_REQUEST, "id is required");
            };
            let pool = store.get_key_pool(&body.provider);
            let Some(mut item) = pool.into_iter().find(|item| item.id == id) else {
                return error(StatusCode::NOT_FOUND, "not found");
            };
            if let Some(enabled) = body.enabled {
                item.enabled = enabled;
            }
            if let Some(status) = body.status {
                item.status = status;
                if status == iproxy_config::KeyStatus::Active {
                    item.error_count = 0;
                }
            }
            if let Some(name) = body.name {
                item.name = name;
            }
            match store.update_key_item(&body.provider, item).await {
                iproxy_config::PoolMutation::Applied => success(),
                _ => error(StatusCode::NOT_FOUND, "not found"),
            }
        }
        "delete" => {
            let Some(id) = body.id else {
                return error(StatusCode::BAD_REQUEST, "id is required");
            };
            match store.delete_key(&body.provider, &id).await {
                iproxy_config::PoolMutation::Applied => success(),
                _ => error(StatusCode::NOT_FOUND, "not found"),
            }
        }
        _ => error(StatusCode::BAD_REQUEST, "unknown action"),
    }
}

async fn dashboard_stats(State(state): State<AdminState>) -> Response {
    let config = state.engine.state().config.get();
    let mut stats = serde_json::Map::new();
    for (provider, pool) in &config.key_pools {
        let total = pool.len();
        let valid = pool.iter().filter(|item| item.is_selectable()).count();
        let invalid = pool
            .iter()
            .filter(|item| item.status == iproxy_config::KeyStatus::Disabled)
            .count();
        let unused = pool.iter().filter(|item| item.last_used == 0).count();
        let total_calls: u64 = pool.iter().map(|item| item.total_calls).sum();
        let total_success: u64 = pool.iter().map(|item| item.success_count).sum();
        let success_rate = if total_calls == 0 {
            100.0
        } else {
            (total_success as f64 / total_calls as f64) * 100.0
        };
        stats.insert(
            provider.clone(),
            serde_json::json!({
                "total": total,
                "valid": valid,
                "invalid": invalid,
                "unused": unused,
                "totalCalls": total_calls,
                "totalSuccess": total_success,
                "successRate": success_rate,
            }),
        );
    }
    Json(serde_json::Value::Object(stats)).into_response()
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    level: Option<String>,
}

/// Ring replay, then live entries, as SSE. The subscription dies with the
/// client connection.
async fn logs_stream(
    State(state): State<AdminState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let logger = state.engine.state().logger.clone();
    let min_level = query.level.as_deref().and_then(LogLevel::parse);

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, std::convert::Infallible>>(64);
    tokio::spawn(async move {
        for entry in logger.recent(min_level) {
            let Ok(json) = serde_json::to_string(&entry) else {
                continue;
            };
            if tx
                .send(Ok(bytes::Bytes::from(format!("data: {json}\n\n"))))
                .await
                .is_err()
            {
                return;
            }
        }
        let mut rx_entries = logger.subscribe();
        loop {
            match rx_entries.recv().await {
                Ok(entry) => {
                    if min_level.is_some_and(|level| entry.level < level) {
                        continue;
                    }
                    let Ok(json) = serde_json::to_string(&entry) else {
                        continue;
                    };
                    if tx
                        .send(Ok(bytes::Bytes::from(format!("data: {json}\n\n"))))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn gallery_list(State(state): State<AdminState>) -> Response {
    let app = state.engine.state();
    let config = app.config.get();
    let public_url = config
        .storage
        .s3
        .as_ref()
        .and_then(|s3| s3.public_url.as_deref());
    let records = app.artifacts.list_images(public_url).await;
    Json(serde_json::json!({ "images": records })).into_response()
}

#[derive(Debug, Deserialize)]
struct GalleryDelete {
    filenames: Vec<String>,
}

async fn gallery_delete(
    State(state): State<AdminState>,
    Json(body): Json<GalleryDelete>,
) -> Response {
    let app = state.engine.state();
    let config = app.config.get();
    let removed = app
        .artifacts
        .delete_images(&body.filenames, config.storage.s3.as_ref())
        .await;
    Json(serde_json::json!({ "success": true, "deleted": removed })).into_response()
}

/// Strict-mode optimizer probe: unlike the pipeline path, failure surfaces.
async fn test_prompt_optimizer(State(state): State<AdminState>) -> Response {
    let config = state.engine.state().config.get();
    match state
        .engine
        .optimizer()
        .test_connection(&config.prompt_optimizer)
        .await
    {
        Ok(reply) => Json(serde_json::json!({ "success": true, "reply": reply })).into_response(),
        Err(message) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response(),
    }
}

async fn fetch_models(State(state): State<AdminState>) -> Response {
    let config = state.engine.state().config.get();
    match state
        .engine
        .optimizer()
        .fetch_models(&config.prompt_optimizer)
        .await
    {
        Ok(models) => Json(serde_json::json!({ "success": true, "models": models })).into_response(),
        Err(message) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response(),
    }
}

/// Container self-recreation talks to a runtime socket; this build does not
/// carry that capability.
async fn restart_docker() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "success": false,
            "error": "container restart is not supported by this build",
        })),
    )
        .into_response()
}

fn masked_items(pool: &[KeyItem]) -> Vec<serde_json::Value> {
    pool.iter()
        .map(|item| {
            let mut value = serde_json::to_value(item).unwrap_or_default();
            value["key"] = serde_json::Value::String(mask_key(&item.key));
            value
        })
        .collect()
}

fn mask_pools_in_place(value: &mut serde_json::Value) {
    let Some(pools) = value.get_mut("keyPools").and_then(|pools| pools.as_object_mut()) else {
        return;
    };
    for (_, pool) in pools.iter_mut() {
        let Some(items) = pool.as_array_mut() else {
            continue;
        };
        for item in items {
            if let Some(key) = item.get("key").and_then(|key| key.as_str()) {
                let masked = mask_key(key);
                item["key"] = serde_json::Value::String(masked);
            }
        }
    }
}

fn masked_system(config: &RuntimeConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(&config.system).unwrap_or_default();
    if let Some(key) = value.get("globalAccessKey").and_then(|key| key.as_str()) {
        let masked = mask_key(key);
        value["globalAccessKey"] = serde_json::Value::String(masked);
    }
    value
}

fn masked_optimizer(config: &RuntimeConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(&config.prompt_optimizer).unwrap_or_default();
    if let Some(key) = value.get("apiKey").and_then(|key| key.as_str())
        && !key.is_empty()
    {
        let masked = mask_key(key);
        value["apiKey"] = serde_json::Value::String(masked);
    }
    value
}

fn masked_storage(config: &RuntimeConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(&config.storage).unwrap_or_default();
    if let Some(secret) = value
        .pointer("/s3/secretKey")
        .and_then(|secret| secret.as_str())
    {
        let masked = mask_key(secret);
        value["s3"]["secretKey"] = serde_json::Value::String(masked);
    }
    if let Some(code) = value
        .pointer("/imageHost/authCode")
        .and_then(|code| code.as_str())
    {
        let masked = mask_key(code);
        value["imageHost"]["authCode"] = serde_json::Value::String(masked);
    }
    value
}

fn success() -> Response {
    Json(serde_json::json!({ "success": true })).into_response()
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use iproxy_config::{ImageHostConfig, S3Config};

    use super::*;

    fn config_with_secrets() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.system.global_access_key = Some("super-secret-access-key".to_string());
        config.prompt_optimizer.api_key = "sk-optimizer-secret-key-0123456789".to_string();
        config.storage.s3 = Some(S3Config {
            endpoint: "https://minio.internal:9000".to_string(),
            bucket: "artifacts".to_string(),
            access_key: "minio-access".to_string(),
            secret_key: "minio-secret-key-0123456789".to_string(),
            region: None,
            public_url: None,
        });
        config.storage.image_host = Some(ImageHostConfig {
            upload_url: "https://img.example/upload".to_string(),
            auth_code: Some("imagehost-auth-code-12345".to_string()),
        });
        config
            .key_pools
            .insert("Gitee".to_string(), vec![KeyItem::new(
                "Gitee",
                "gitee-pool-key-abcdefghijklmnop".to_string(),
                "k1".to_string(),
            )]);
        config
    }

    #[test]
    fn section_helpers_mask_every_secret() {
        let config = config_with_secrets();

        let system = masked_system(&config);
        assert_eq!(system["globalAccessKey"], "supe...-key");

        let optimizer = masked_optimizer(&config);
        assert_eq!(optimizer["apiKey"], "sk-o...6789");

        let storage = masked_storage(&config);
        assert_eq!(storage["s3"]["secretKey"], "mini...6789");
        assert_eq!(storage["imageHost"]["authCode"], "imag...2345");
        // Non-secret fields pass through untouched.
        assert_eq!(storage["s3"]["endpoint"], "https://minio.internal:9000");
    }

    #[test]
    fn runtime_document_serialization_carries_no_raw_secrets() {
        let config = config_with_secrets();
        let mut value = serde_json::to_value(&config).unwrap();
        mask_pools_in_place(&mut value);
        value["system"] = masked_system(&config);
        value["promptOptimizer"] = masked_optimizer(&config);
        value["storage"] = masked_storage(&config);

        let rendered = serde_json::to_string(&value).unwrap();
        for secret in [
            "super-secret-access-key",
            "sk-optimizer-secret-key-0123456789",
            "minio-secret-key-0123456789",
            "imagehost-auth-code-12345",
            "gitee-pool-key-abcdefghijklmnop",
        ] {
            assert!(!rendered.contains(secret), "leaked secret: {secret}");
        }
        assert_eq!(value["keyPools"]["Gitee"][0]["key"], "gite...mnop");
    }
}
