//! Error types for broker-assist.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel transport errors (inbound webhook, outbound HTTP).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Admission / orchestration errors.
///
/// Only storage failures surface here. Rejections and enrichment failures are
/// ordinary outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Counterparty registration failed: {0}")]
    Registration(DatabaseError),

    #[error("Conversation lookup failed: {0}")]
    Conversation(DatabaseError),

    #[error("Duplicate delivery check failed: {0}")]
    DuplicateCheck(DatabaseError),

    #[error("Enqueue failed: {0}")]
    Enqueue(DatabaseError),
}

/// Queue worker errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job {id} already in state {status}, cannot transition to {target}")]
    InvalidTransition {
        id: i64,
        status: String,
        target: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Failure classes reported by the reply generator and outbound gateway.
///
/// The retry policy counts every kind as one failed attempt; the kind is kept
/// so the policy can discriminate later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Worth retrying (network, 429, 5xx).
    Transient,
    /// Retrying will not help (4xx, empty completion).
    Permanent,
    /// The per-attempt timeout elapsed.
    Timeout,
    /// Persisting the outgoing message failed.
    Storage,
}

impl std::fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::Storage => "storage",
        };
        write!(f, "{s}")
    }
}

/// A failed reply-generation or send attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn timeout(step: &str, after: Duration) -> Self {
        Self {
            kind: DeliveryErrorKind::Timeout,
            message: format!("{step} did not finish within {after:?}"),
        }
    }

    /// Map an HTTP status from a collaborator API to an error kind.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }
}

impl From<DatabaseError> for DeliveryError {
    fn from(e: DatabaseError) -> Self {
        Self {
            kind: DeliveryErrorKind::Storage,
            message: e.to_string(),
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_error_display_includes_kind() {
        let e = DeliveryError::transient("connection reset");
        assert_eq!(e.to_string(), "transient: connection reset");
    }

    #[test]
    fn status_mapping() {
        let e = DeliveryError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(e.kind, DeliveryErrorKind::Transient);

        let e = DeliveryError::from_status(reqwest::StatusCode::BAD_GATEWAY, "");
        assert_eq!(e.kind, DeliveryErrorKind::Transient);

        let e = DeliveryError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(e.kind, DeliveryErrorKind::Permanent);
        assert!(e.message.contains("bad key"));
    }

    #[test]
    fn timeout_message_names_step() {
        let e = DeliveryError::timeout("reply generation", Duration::from_secs(5));
        assert_eq!(e.kind, DeliveryErrorKind::Timeout);
        assert!(e.to_string().starts_with("timeout: reply generation"));
    }

    #[test]
    fn component_errors_convert_to_top_level() {
        let e: Error = QueueError::from(DatabaseError::Query("locked".into())).into();
        assert!(matches!(e, Error::Queue(QueueError::Store(_))));
        assert_eq!(e.to_string(), "Queue error: Store error: Query failed: locked");
    }

    #[test]
    fn not_found_names_entity() {
        let e = DatabaseError::NotFound {
            entity: "queue_job".into(),
            id: "7".into(),
        };
        assert_eq!(e.to_string(), "queue_job not found: 7");
    }

    #[test]
    fn database_error_becomes_storage_failure() {
        let e: DeliveryError = DatabaseError::Query("disk full".into()).into();
        assert_eq!(e.kind, DeliveryErrorKind::Storage);
    }
}
