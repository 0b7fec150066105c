use serde::{Deserialize, Serialize};

/// The three generation tasks a provider can support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Text,
    Edit,
    Blend,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Text => "text",
            TaskKind::Edit => "edit",
            TaskKind::Blend => "blend",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(TaskKind::Text),
            "edit" => Some(TaskKind::Edit),
            "blend" => Some(TaskKind::Blend),
            _ => None,
        }
    }
}

/// Classification of an upstream failure; drives credential accounting and
/// the handler's retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RateLimit,
    AuthError,
    Other,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::RateLimit => "rate_limit",
            FailureReason::AuthError => "auth_error",
            FailureReason::Other => "other",
        }
    }

    /// Retryable failures rotate to a fresh credential on the same provider.
    pub fn is_credential_related(self) -> bool {
        matches!(self, FailureReason::RateLimit | FailureReason::AuthError)
    }
}
