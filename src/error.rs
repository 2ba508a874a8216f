//! Error taxonomy for the retrieval engine.
//!
//! Library code returns [`Result`], whose error type [`RagError`] separates
//! caller mistakes (dimension mismatch, out-of-range thresholds) from
//! runtime failures (external services, storage, I/O). External HTTP
//! services report a [`ServiceError`] whose [`ServiceErrorKind`] tells the
//! caller whether the failure was the network, a non-success status, or a
//! payload that could not be understood.

use thiserror::Error;

/// Classification of an external service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Connection refused, DNS failure, timeout.
    Network,
    /// The service answered with a non-2xx status.
    Status,
    /// The service answered 2xx but the body was not what we expected.
    Malformed,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceErrorKind::Network => "network",
            ServiceErrorKind::Status => "status",
            ServiceErrorKind::Malformed => "malformed",
        };
        f.write_str(name)
    }
}

/// Failure of an embedding or chat-completion request.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("{service} request failed: {message}")]
    Network { service: String, message: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("malformed {service} response: {message}")]
    Malformed { service: String, message: String },
}

impl ServiceError {
    pub fn network(service: &str, message: impl Into<String>) -> Self {
        ServiceError::Network {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn status(service: &str, status: u16, body: impl Into<String>) -> Self {
        ServiceError::Status {
            service: service.to_string(),
            status,
            body: body.into(),
        }
    }

    pub fn malformed(service: &str, message: impl Into<String>) -> Self {
        ServiceError::Malformed {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            ServiceError::Network { .. } => ServiceErrorKind::Network,
            ServiceError::Status { .. } => ServiceErrorKind::Status,
            ServiceError::Malformed { .. } => ServiceErrorKind::Malformed,
        }
    }

    /// Network errors, HTTP 429 and 5xx are worth retrying. Everything
    /// else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Network { .. } => true,
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Malformed { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("relevance threshold {0} is outside [0.0, 1.0]")]
    ThresholdOutOfRange(f32),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data integrity violation: {0}")]
    Integrity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} provider is disabled")]
    Disabled(&'static str),
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ServiceError::network("embedding", "refused").is_transient());
        assert!(ServiceError::status("embedding", 429, "").is_transient());
        assert!(ServiceError::status("embedding", 503, "").is_transient());
        assert!(!ServiceError::status("embedding", 400, "bad").is_transient());
        assert!(!ServiceError::malformed("embedding", "no data").is_transient());
    }

    #[test]
    fn kinds_are_exhaustive() {
        assert_eq!(
            ServiceError::network("llm", "x").kind(),
            ServiceErrorKind::Network
        );
        assert_eq!(
            ServiceError::status("llm", 500, "x").kind(),
            ServiceErrorKind::Status
        );
        assert_eq!(
            ServiceError::malformed("llm", "x").kind(),
            ServiceErrorKind::Malformed
        );
    }

    #[test]
    fn service_error_converts_into_rag_error() {
        let err: RagError = ServiceError::status("llm", 401, "unauthorized").into();
        assert!(err.to_string().contains("HTTP 401"));
    }
}
