use bytes::Bytes;
use http::StatusCode;

/// Error kinds surfaced to HTTP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ServiceDisabled,
    Unauthorized,
    Forbidden,
    BadRequest,
    KeyPoolExhausted,
    UpstreamError,
    NotFound,
    MethodNotAllowed,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::ServiceDisabled | ErrorKind::KeyPoolExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::UpstreamError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::ServiceDisabled => "service_disabled",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::KeyPoolExhausted => "key_pool_exhausted",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
        }
    }
}

/// HTTP-facing gateway error: a status plus a pre-serialized JSON body.
#[derive(Debug)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub body: Bytes,
}

impl GatewayError {
    /// Plain `{"error": "..."}` body, used for policy and parse failures.
    pub fn simple(kind: ErrorKind, message: impl AsRef<str>) -> Self {
        let body = format!(
            "{{\"error\":{}}}",
            serde_json::to_string(message.as_ref()).unwrap_or_else(|_| "\"error\"".to_string())
        );
        Self {
            kind,
            body: Bytes::from(body),
        }
    }

    /// Structured `{"error":{"message","type","provider"?}}` body for 5xx
    /// errors originating in a provider adapter.
    pub fn upstream(message: impl AsRef<str>, provider: Option<&str>) -> Self {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "message".to_string(),
            serde_json::Value::String(message.as_ref().to_string()),
        );
        obj.insert(
            "type".to_string(),
            serde_json::Value::String("upstream_error".to_string()),
        );
        if let Some(provider) = provider {
            obj.insert(
                "provider".to_string(),
                serde_json::Value::String(provider.to_string()),
            );
        }
        let body = serde_json::json!({ "error": serde_json::Value::Object(obj) });
        Self {
            kind: ErrorKind::UpstreamError,
            body: Bytes::from(serde_json::to_vec(&body).unwrap_or_default()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn bad_request(message: impl AsRef<str>) -> Self {
        Self::simple(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized() -> Self {
        Self::simple(ErrorKind::Unauthorized, "Unauthorized")
    }

    pub fn not_found(message: impl AsRef<str>) -> Self {
        Self::simple(ErrorKind::NotFound, message)
    }

    pub fn method_not_allowed(message: impl AsRef<str>) -> Self {
        Self::simple(ErrorKind::MethodNotAllowed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_body_is_flat_json() {
        let err = GatewayError::simple(ErrorKind::ServiceDisabled, "service not started");
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value: serde_json::Value = serde_json::from_slice(&err.body).unwrap();
        assert_eq!(value["error"], "service not started");
    }

    #[test]
    fn upstream_body_carries_provider() {
        let err = GatewayError::upstream("task timeout", Some("ModelScope"));
        let value: serde_json::Value = serde_json::from_slice(&err.body).unwrap();
        assert_eq!(value["error"]["provider"], "ModelScope");
        assert_eq!(value["error"]["type"], "upstream_error");
    }
}
