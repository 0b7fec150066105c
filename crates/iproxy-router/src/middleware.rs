use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::openai::RouterState;

const MODULE: &str = "Handler";

/// CORS per the runtime document: wildcard origin, the gateway's methods,
/// and a one-day preflight cache.
pub(crate) async fn cors(
    State(state): State<RouterState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let enabled = state.engine.state().config.get().system.cors;
    if !enabled {
        return next.run(req).await;
    }

    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(&mut response);
        return response;
    }

    let mut response = next.run(req).await;
    apply_cors_headers(&mut response);
    response
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("POST, GET, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
}

/// Per-request context: id, start time, method, url; one line at completion
/// with status and duration when request logging is on.
pub(crate) async fn request_log(
    State(state): State<RouterState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let logger = state.engine.state().logger.clone();
    let enabled = state.engine.state().config.get().system.request_logging;
    let request_id = iproxy_common::new_id();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    if enabled {
        logger.debug(MODULE, format!("[{request_id}] {method} {path}"));
    }
    let response = next.run(req).await;
    if enabled {
        logger.info(
            MODULE,
            format!(
                "[{request_id}] {method} {path} {} {}ms",
                response.status().as_u16(),
                start.elapsed().as_millis()
            ),
        );
    }
    response
}
