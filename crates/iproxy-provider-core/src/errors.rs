use iproxy_common::FailureReason;

pub type ProviderResult<T> = Result<T, ProviderFailure>;

/// A classified upstream failure. The caller decides retryability; the
/// adapter only classifies.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureReason::Other, message)
    }

    pub fn timeout() -> Self {
        Self::other("task timeout")
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.reason.as_str(), self.message)
    }
}

impl std::error::Error for ProviderFailure {}

/// Map an upstream HTTP status + body onto the failure taxonomy:
/// 429 or a "rate limit" body is a rate limit, 401/403 or credential wording
/// is an auth error, anything else is `other`.
pub fn classify_upstream_failure(status: u16, body: &str) -> ProviderFailure {
    let lowered = body.to_lowercase();
    let reason = if status == 429 || lowered.contains("rate limit") {
        FailureReason::RateLimit
    } else if status == 401
        || status == 403
        || lowered.contains("unauthorized")
        || lowered.contains("api key")
    {
        FailureReason::AuthError
    } else {
        FailureReason::Other
    };
    let message = if body.is_empty() {
        format!("upstream status {status}")
    } else {
        // Char-based cut: upstream error bodies are often multibyte.
        let trimmed: String = body.trim().chars().take(500).collect();
        format!("upstream status {status}: {trimmed}")
    };
    ProviderFailure::new(reason, message)
}
