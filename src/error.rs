//! Error types for the detection & approval pipeline.

use crate::approval::{ApprovalState, RequestId};

/// Malformed configuration.  Fatal at startup, never raised afterwards.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse topic terms: {0}")]
    Terms(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// A `Transport::send` failure.  Retried with backoff by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Delivery rejected: {status} body={body}")]
    Rejected { status: u16, body: String },

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Why an admin decision did not change the request state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    #[error("admin {admin_id} is not authorized to decide {request_id}")]
    Unauthorized { request_id: RequestId, admin_id: i64 },

    #[error("request {request_id} is already {state}")]
    Late {
        request_id: RequestId,
        state: ApprovalState,
    },

    #[error("request {0} not found")]
    UnknownRequest(RequestId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("message {message_key} already has approval request {request_id}")]
    AlreadyRequested {
        message_key: String,
        request_id: RequestId,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
