//! Client error types.

use thiserror::Error;

use crate::endpoint::EndpointError;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the edlink client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The endpoint address could not be validated.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),

    /// gRPC transport error (connection failed, TLS error, etc.).
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A remote call failed. Carries the remote status code and message.
    #[error("Remote call failed ({}): {}", .0.code(), .0.message())]
    Rpc(#[from] tonic::Status),

    /// The initial heartbeat probe failed, so no session was created.
    #[error("Server did not answer the initial heartbeat: {}", describe_status(.0))]
    ConstructionFailed(tonic::Status),

    /// A metadata key or value is not valid gRPC ASCII metadata.
    #[error("Invalid request metadata: {0}")]
    InvalidMetadata(String),

    /// The session has been closed; no further requests may be issued.
    #[error("Session is closed")]
    Closed,
}

impl ClientError {
    /// Returns the remote status if this error came from the server.
    #[must_use]
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            Self::Rpc(status) | Self::ConstructionFailed(status) => Some(status),
            _ => None,
        }
    }

    /// Returns true if this error is the expected result of a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.status(), Some(s) if s.code() == tonic::Code::Cancelled)
    }
}

/// Convert a remote status to a user-friendly description.
///
/// This maps the transport-level codes a client sees when the server goes
/// away to actionable messages, and keeps the server's own message for
/// application-level failures.
#[must_use]
pub fn describe_status(status: &tonic::Status) -> String {
    use tonic::Code;

    let message = status.message();
    let lower = message.to_lowercase();

    match status.code() {
        Code::Unavailable if lower.contains("connection refused") => {
            "server not running (connection refused)".into()
        }
        Code::Unavailable if lower.contains("dns") || lower.contains("resolve") => {
            "cannot resolve server hostname".into()
        }
        Code::Unavailable => format!("server unavailable: {message}"),
        Code::DeadlineExceeded => "request timed out; server may be overloaded or unreachable".into(),
        Code::Cancelled => "request was cancelled".into(),
        Code::Unknown if lower.contains("transport") || lower.contains("h2 protocol") => {
            format!("transport error: {message}")
        }
        code => {
            if message.is_empty() {
                format!("{code:?}")
            } else {
                format!("{code:?}: {message}")
            }
        }
    }
}
