//! Error taxonomy shared by the link controller and the transfer protocol.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Reason reported by the discovery/link collaborator when it rejects a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    Busy,
    Unsupported,
    NoServiceRequests,
    /// Internal error or a code outside the known set.
    Unknown(i32),
}

impl FailureReason {
    /// Map a platform failure code (0 error, 1 unsupported, 2 busy, 3 no service requests).
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => FailureReason::Unsupported,
            2 => FailureReason::Busy,
            3 => FailureReason::NoServiceRequests,
            other => FailureReason::Unknown(other),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Busy => f.write_str("System busy"),
            FailureReason::Unsupported => f.write_str("P2P unsupported"),
            FailureReason::NoServiceRequests => f.write_str("No service requests"),
            FailureReason::Unknown(0) => f.write_str("Internal error"),
            FailureReason::Unknown(code) => write!(f, "Unknown error ({})", code),
        }
    }
}

/// Stable, payload-free classification of a [`DropError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    PermissionDenied,
    NotInitialized,
    DiscoveryFailed,
    ConnectionFailed,
    NotConnected,
    NoAddress,
    InvalidArgument,
    FileNotFound,
    SizeMismatch,
    SocketError,
    TransferError,
    TransferInProgress,
    Unknown,
}

impl ErrorKind {
    /// Upper-snake code used in structured replies to the application layer.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PERMISSION_ERROR",
            ErrorKind::NotInitialized => "NOT_INITIALIZED",
            ErrorKind::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorKind::ConnectionFailed => "CONNECTION_FAILED",
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::NoAddress => "NO_ADDRESS",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::FileNotFound => "FILE_NOT_FOUND",
            ErrorKind::SizeMismatch => "SIZE_MISMATCH",
            ErrorKind::SocketError => "SOCKET_ERROR",
            ErrorKind::TransferError => "TRANSFER_ERROR",
            ErrorKind::TransferInProgress => "TRANSFER_IN_PROGRESS",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropError {
    #[error("required permissions not granted")]
    PermissionDenied,
    #[error("peer link not initialized")]
    NotInitialized,
    #[error("failed to start discovery: {0}")]
    DiscoveryFailed(FailureReason),
    #[error("failed to connect: {0}")]
    ConnectionFailed(FailureReason),
    #[error("not connected to any device")]
    NotConnected,
    #[error("group owner address not available")]
    NoAddress,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("declared size {declared} does not match file size {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("socket error: {0}")]
    Socket(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("a transfer is already in progress")]
    TransferInProgress,
    #[error("{0}")]
    Unknown(String),
}

impl DropError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DropError::PermissionDenied => ErrorKind::PermissionDenied,
            DropError::NotInitialized => ErrorKind::NotInitialized,
            DropError::DiscoveryFailed(_) => ErrorKind::DiscoveryFailed,
            DropError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            DropError::NotConnected => ErrorKind::NotConnected,
            DropError::NoAddress => ErrorKind::NoAddress,
            DropError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DropError::FileNotFound(_) => ErrorKind::FileNotFound,
            DropError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            DropError::Socket(_) => ErrorKind::SocketError,
            DropError::Transfer(_) => ErrorKind::TransferError,
            DropError::TransferInProgress => ErrorKind::TransferInProgress,
            DropError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Structured `{code, message}` form handed back to the application layer.
    pub fn to_reply(&self) -> ErrorReply {
        ErrorReply {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReply {
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_map_to_closed_set() {
        assert_eq!(FailureReason::from_code(2), FailureReason::Busy);
        assert_eq!(FailureReason::from_code(1), FailureReason::Unsupported);
        assert_eq!(FailureReason::from_code(3), FailureReason::NoServiceRequests);
        assert_eq!(FailureReason::from_code(0), FailureReason::Unknown(0));
        assert_eq!(FailureReason::from_code(42), FailureReason::Unknown(42));
    }

    #[test]
    fn failure_reason_messages() {
        assert_eq!(FailureReason::Busy.to_string(), "System busy");
        assert_eq!(FailureReason::Unknown(0).to_string(), "Internal error");
        assert_eq!(FailureReason::Unknown(9).to_string(), "Unknown error (9)");
    }

    #[test]
    fn reply_carries_code_and_message() {
        let err = DropError::DiscoveryFailed(FailureReason::Busy);
        let reply = err.to_reply();
        assert_eq!(reply.code, "DISCOVERY_FAILED");
        assert_eq!(reply.message, "failed to start discovery: System busy");

        let err = DropError::SizeMismatch {
            declared: 10,
            actual: 4,
        };
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(err.code(), "SIZE_MISMATCH");
    }
}
