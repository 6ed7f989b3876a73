//! Request/Response types for the HTTP server.

use serde::{Deserialize, Serialize};

use crate::ai::workflow::state::ConversationState;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Server status (always "ok" when healthy)
    pub status: String,
    /// Server version from Cargo.toml
    pub version: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Body of `POST /sessions/{session_id}/turns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnBody {
    pub question: String,
    /// Scope id bound into generated queries
    pub scope_id: String,
}

/// Body of `POST /known-good`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownGoodBody {
    pub question: String,
    #[serde(default)]
    pub sql: Option<String>,
}

/// Checkpointed state of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: ConversationState,
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    /// Error code for programmatic handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: Some(code.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_includes_version() {
        let resp = HealthResponse::healthy();
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn known_good_body_sql_is_optional() {
        let body: KnownGoodBody = serde_json::from_str(r#"{"question":"q"}"#).unwrap();
        assert_eq!(body.question, "q");
        assert!(body.sql.is_none());
    }

    #[test]
    fn turn_body_requires_scope() {
        assert!(serde_json::from_str::<TurnBody>(r#"{"question":"q"}"#).is_err());
    }

    #[test]
    fn error_response_omits_missing_code() {
        let json = serde_json::to_string(&ErrorResponse::new("Error")).unwrap();
        assert!(!json.contains("code"));

        let json = serde_json::to_string(&ErrorResponse::with_code("Error", "ERR_CODE")).unwrap();
        assert!(json.contains("\"code\":\"ERR_CODE\""));
    }
}
