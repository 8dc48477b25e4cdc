//! Client error types with retryability classification.
//!
//! Two tiers of failures surface here:
//! - **Transport errors**: dialing, TLS, HTTP/2 connection loss
//! - **RPC errors**: gRPC status codes returned by the server
//!
//! Every error carries enough context to decide whether a retry is
//! worthwhile; see [`ClientError::is_retryable`].

use snafu::{Location, Snafu};
use tonic::Code;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors produced by the Recordbase client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// Failed to establish a connection.
    #[snafu(display("Connection error at {location}: {message}"))]
    Connection {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Transport-level error (HTTP/2, TLS).
    #[snafu(display("Transport error at {location}: {source}"))]
    Transport {
        /// Underlying transport error.
        source: tonic::transport::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// gRPC RPC error with status code.
    #[snafu(display("RPC error (code={code:?}): {message}"))]
    Rpc {
        /// gRPC status code.
        code: Code,
        /// Error message from server.
        message: String,
    },

    /// No bootstrap endpoint produced a usable cluster configuration.
    #[snafu(display("No cluster found after {attempts} endpoint(s): {last_error}"))]
    NoClusterFound {
        /// Number of bootstrap endpoints tried.
        attempts: usize,
        /// Error from the final attempt.
        last_error: String,
    },

    /// Retry attempts exhausted.
    #[snafu(display("Retry exhausted after {attempts} attempts: {last_error}"))]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message before giving up.
        last_error: String,
    },

    /// Configuration validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// Endpoint string could not be parsed.
    #[snafu(display("Invalid endpoint '{endpoint}': {message}"))]
    InvalidEndpoint {
        /// The invalid endpoint.
        endpoint: String,
        /// Parse error description.
        message: String,
    },

    /// Operation was cancelled by the caller.
    #[snafu(display("Operation cancelled"))]
    Cancelled,

    /// Client has been closed.
    #[snafu(display("Client closed"))]
    Closed,
}

impl ClientError {
    /// Returns true if the error is transient and the operation should be retried.
    ///
    /// Retryable:
    /// - `UNAVAILABLE`: server temporarily unreachable
    /// - `DEADLINE_EXCEEDED`: request timed out
    /// - `RESOURCE_EXHAUSTED`: rate limited
    /// - `ABORTED`: conflict, retry may succeed
    /// - Transport and connection errors
    ///
    /// Non-retryable:
    /// - `INVALID_ARGUMENT`, `PERMISSION_DENIED`, `UNAUTHENTICATED`
    /// - Configuration, cancellation, and closed-client errors
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Connection { .. } => true,
            Self::Rpc { code, .. } => matches!(
                code,
                Code::Unavailable
                    | Code::DeadlineExceeded
                    | Code::ResourceExhausted
                    | Code::Aborted
            ),
            // Non-retryable
            Self::NoClusterFound { .. } => false,
            Self::RetryExhausted { .. } => false,
            Self::Config { .. } => false,
            Self::InvalidEndpoint { .. } => false,
            Self::Cancelled => false,
            Self::Closed => false,
        }
    }

    /// Returns the gRPC status code if this is an RPC error.
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<tonic::transport::Error> for ClientError {
    fn from(source: tonic::transport::Error) -> Self {
        Self::Transport {
            source,
            location: Location::default(),
        }
    }
}

impl From<tonic::Status> for ClientError {
    fn from(status: tonic::Status) -> Self {
        Self::Rpc {
            code: status.code(),
            message: status.message().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_retryable_unavailable() {
        let err = ClientError::Rpc {
            code: Code::Unavailable,
            message: "server unavailable".to_owned(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rpc_error_retryable_deadline_exceeded() {
        let err = ClientError::Rpc {
            code: Code::DeadlineExceeded,
            message: "timeout".to_owned(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rpc_error_retryable_resource_exhausted() {
        let err = ClientError::Rpc {
            code: Code::ResourceExhausted,
            message: "rate limited".to_owned(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rpc_error_non_retryable_invalid_argument() {
        let err = ClientError::Rpc {
            code: Code::InvalidArgument,
            message: "bad request".to_owned(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rpc_error_non_retryable_unauthenticated() {
        let err = ClientError::Rpc {
            code: Code::Unauthenticated,
            message: "not authenticated".to_owned(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_connection_error_is_retryable() {
        let err = ClientError::Connection {
            message: "connection refused".to_owned(),
            location: Location::default(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_no_cluster_found_not_retryable() {
        let err = ClientError::NoClusterFound {
            attempts: 3,
            last_error: "connect refused".to_owned(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_closed_and_cancelled_not_retryable() {
        assert!(!ClientError::Closed.is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
    }

    #[test]
    fn test_from_tonic_status() {
        let status = tonic::Status::unavailable("server down");
        let err: ClientError = status.into();
        assert!(matches!(err, ClientError::Rpc { code: Code::Unavailable, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_code_accessor() {
        let err = ClientError::Rpc {
            code: Code::NotFound,
            message: "not found".to_owned(),
        };
        assert_eq!(err.code(), Some(Code::NotFound));
        assert_eq!(ClientError::Closed.code(), None);
    }
}
