use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use bytes::Bytes;

use iproxy_common::{GatewayError, TaskKind};
use iproxy_core::content::extract_user_content;
use iproxy_core::models::list_models;
use iproxy_core::{classify_caller, Engine, PipelineOutcome, PipelineRequest};
use iproxy_image::ImageFormat;
use iproxy_protocol::openai::chat::{ChatStreamChunk, ChatCompletionResponse};
use iproxy_protocol::openai::images::{
    CreateImageEditRequestBody, CreateImageRequestBody, ImagesResponse,
};
use iproxy_protocol::sse::{data_frame, done_frame};

#[derive(Clone)]
pub struct RouterState {
    pub engine: Arc<Engine>,
}

pub fn public_router(engine: Arc<Engine>) -> Router {
    let state = RouterState {
        engine: engine.clone(),
    };
    let max_body = engine.state().config.get().system.max_body_size;

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/images/generations", post(images_generations))
        .route("/v1/images/edits", post(images_edits))
        .route("/v1/images/blend", post(images_blend))
        .route("/v1/models", get(models_v1))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::request_log,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::cors,
        ))
        .with_state(state)
}

async fn not_found() -> Response {
    error_response(GatewayError::not_found("Not Found"))
}

async fn health(State(state): State<RouterState>) -> Response {
    if !state.engine.state().config.get().system.health_check {
        return error_response(GatewayError::not_found("Not Found"));
    }
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn models_v1(State(state): State<RouterState>) -> Response {
    Json(list_models(state.engine.state())).into_response()
}

/// `POST /v1/images/generations`
async fn images_generations(
    State(state): State<RouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: CreateImageRequestBody = match parse_json(&body) {
        Ok(body) => body,
        Err(err) => return error_response(err),
    };
    if body.prompt.trim().is_empty() {
        return error_response(GatewayError::bad_request("prompt is required"));
    }

    let mut request = PipelineRequest::new(TaskKind::Text, body.prompt);
    request.model = body.model;
    request.n = body.n;
    request.size = body.size;
    request.steps = body.steps;
    request.seed = body.seed;
    request.response_format = body.response_format;

    match run_pipeline(&state, &headers, request).await {
        Ok(outcome) => images_response(outcome),
        Err(err) => error_response(err),
    }
}

/// `POST /v1/images/edits` — multipart or JSON.
async fn images_edits(
    State(state): State<RouterState>,
    headers: HeaderMap,
    request: axum::http::Request<Body>,
) -> Response {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let parsed = if is_multipart {
        let multipart = Multipart::from_request(request, &()).await;
        match multipart {
            Ok(multipart) => parse_edit_multipart(multipart).await,
            Err(err) => Err(GatewayError::bad_request(format!("invalid multipart: {err}"))),
        }
    } else {
        let bytes = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => return error_response(GatewayError::bad_request(err.to_string())),
        };
        parse_json::<CreateImageEditRequestBody>(&bytes).map(edit_body_to_pipeline)
    };

    let request = match parsed {
        Ok(request) => request,
        Err(err) => return error_response(err),
    };
    if request.prompt.trim().is_empty() {
        return error_response(GatewayError::bad_request("prompt is required"));
    }
    if request.images.is_empty() {
        return error_response(GatewayError::bad_request("image is required"));
    }

    match run_pipeline(&state, &headers, request).await {
        Ok(outcome) => images_response(outcome),
        Err(err) => error_response(err),
    }
}

/// `POST /v1/images/blend` — multi-image fusion with chat-shaped context.
async fn images_blend(
    State(state): State<RouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: iproxy_protocol::openai::chat::CreateChatCompletionRequestBody =
        match parse_json(&body) {
            Ok(body) => body,
            Err(err) => return error_response(err),
        };

    let content = extract_user_content(&body.messages);
    if content.images.len() < 2 {
        return error_response(GatewayError::bad_request(
            "blend requires at least 2 input images",
        ));
    }

    let mut request = PipelineRequest::new(TaskKind::Blend, content.text);
    request.images = content.images;
    request.model = body.model;
    request.n = body.n;
    request.size = body.size;
    request.steps = body.steps;
    request.response_format = body.response_format;

    match run_pipeline(&state, &headers, request).await {
        Ok(outcome) => images_response(outcome),
        Err(err) => error_response(err),
    }
}

/// `POST /v1/chat/completions` — chat-shaped image generation, optionally
/// streamed as two SSE chunks plus `[DONE]`.
async fn chat_completions(
    State(state): State<RouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: iproxy_protocol::openai::chat::CreateChatCompletionRequestBody =
        match parse_json(&body) {
            Ok(body) => body,
            Err(err) => return error_response(err),
        };
    let stream = body.stream.unwrap_or(false);
    let requested_model = body.model.clone();

    let content = extract_user_content(&body.messages);
    let task = match content.images.len() {
        0 => TaskKind::Text,
        1 => TaskKind::Edit,
        _ => TaskKind::Blend,
    };

    let mut request = PipelineRequest::new(task, content.text);
    request.images = content.images;
    request.model = body.model;
    request.n = body.n;
    request.size = body.size;
    request.steps = body.steps;
    // The chat surface embeds images as Markdown; URL shaping turns base64
    // payloads into data URIs that render inline.
    request.response_format = Some("url".to_string());

    let outcome = match run_pipeline(&state, &headers, request).await {
        Ok(outcome) => outcome,
        Err(err) => return error_response(err),
    };

    let markdown = markdown_content(&outcome);
    let response_id = format!("chatcmpl-{}", iproxy_common::new_id());
    let model = requested_model.unwrap_or_else(|| outcome.model.clone());

    if stream {
        let first = ChatStreamChunk::content(&response_id, outcome.created, &model, markdown);
        let terminal = ChatStreamChunk::terminal(&response_id, outcome.created, &model);
        let mut payload = Vec::new();
        if let Ok(frame) = serde_json::to_string(&first) {
            payload.extend_from_slice(&data_frame(&frame));
        }
        if let Ok(frame) = serde_json::to_string(&terminal) {
            payload.extend_from_slice(&data_frame(&frame));
        }
        payload.extend_from_slice(&done_frame());

        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(payload))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    Json(ChatCompletionResponse::new(
        response_id,
        outcome.created,
        model,
        markdown,
    ))
    .into_response()
}

/// Stages 1–3 shared by every endpoint: classification, then the engine.
async fn run_pipeline(
    state: &RouterState,
    headers: &HeaderMap,
    request: PipelineRequest,
) -> Result<PipelineOutcome, GatewayError> {
    let config = state.engine.state().config.get();
    let bearer = bearer_token(headers);
    let mode = classify_caller(
        &config,
        &state.engine.state().registry,
        bearer.as_deref(),
    )?;
    state.engine.execute(mode, request).await
}

fn markdown_content(outcome: &PipelineOutcome) -> String {
    outcome
        .items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let target = item.url.as_deref().or(item.b64_json.as_deref())?;
            Some(format!("![image{}]({target})", index + 1))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn images_response(outcome: PipelineOutcome) -> Response {
    Json(ImagesResponse {
        created: outcome.created,
        data: outcome.items,
    })
    .into_response()
}

async fn parse_edit_multipart(mut multipart: Multipart) -> Result<PipelineRequest, GatewayError> {
    let mut request = PipelineRequest::new(TaskKind::Edit, String::new());
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| GatewayError::bad_request(format!("invalid multipart: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "image[]" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| GatewayError::bad_request(err.to_string()))?;
                request.images.push(bytes_to_data_uri(&bytes));
            }
            "mask" => {
                // Accepted for OpenAI compatibility; adapters that cannot use
                // a mask ignore it.
                let _ = field.bytes().await;
            }
            "prompt" => request.prompt = text_field(field).await?,
            "model" => request.model = Some(text_field(field).await?),
            "size" => request.size = Some(text_field(field).await?),
            "n" => {
                let value = text_field(field).await?;
                request.n = value.trim().parse().ok();
            }
            "steps" => {
                let value = text_field(field).await?;
                request.steps = value.trim().parse().ok();
            }
            "response_format" => request.response_format = Some(text_field(field).await?),
            _ => {}
        }
    }
    Ok(request)
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, GatewayError> {
    field
        .text()
        .await
        .map_err(|err| GatewayError::bad_request(err.to_string()))
}

fn bytes_to_data_uri(bytes: &[u8]) -> String {
    let mime = ImageFormat::detect(bytes)
        .map(|fmt| fmt.mime())
        .unwrap_or("image/png");
    iproxy_image::build_data_uri(&B64.encode(bytes), mime)
}

fn edit_body_to_pipeline(body: CreateImageEditRequestBody) -> PipelineRequest {
    let mut request = PipelineRequest::new(TaskKind::Edit, body.prompt);
    request.images = body.image.into_vec();
    request.model = body.model;
    request.n = body.n;
    request.size = body.size;
    request.steps = body.steps;
    request.response_format = body.response_format;
    request
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, GatewayError> {
    if bytes.is_empty() {
        return Err(GatewayError::bad_request("missing request body"));
    }
    serde_json::from_slice(bytes)
        .map_err(|err| GatewayError::bad_request(format!("invalid json: {err}")))
}

fn error_response(err: GatewayError) -> Response {
    let status = err.status();
    let mut response = Response::new(Body::from(err.body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    response
}
