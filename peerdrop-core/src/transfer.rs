//! Per-transfer records: descriptor, progress sample, result.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{DropError, ErrorKind};

/// Identifies one transfer attempt in results and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransferId(uuid::Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// What the caller wants sent. Built before a send is initiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub file_name: String,
    pub file_size: u64,
    pub source_path: PathBuf,
}

impl TransferDescriptor {
    /// Validate caller arguments. `file_size` is signed because that is how the wire carries it.
    pub fn new(
        source_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        file_size: i64,
    ) -> Result<Self, DropError> {
        let file_name = file_name.into();
        if file_name.is_empty() {
            return Err(DropError::InvalidArgument("file name is required".into()));
        }
        let source_path = source_path.into();
        if source_path.as_os_str().is_empty() {
            return Err(DropError::InvalidArgument("file path is required".into()));
        }
        let file_size = u64::try_from(file_size)
            .map_err(|_| DropError::InvalidArgument(format!("negative file size {}", file_size)))?;
        Ok(Self {
            file_name,
            file_size,
            source_path,
        })
    }
}

/// One progress sample. Non-decreasing within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub percent: u8,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

/// Outcome of a transfer that got past its preconditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub id: TransferId,
    pub success: bool,
    pub bytes_moved: u64,
    /// Set on the receiving side only.
    pub file_path: Option<PathBuf>,
    pub error_kind: Option<ErrorKind>,
    pub detail: Option<String>,
}

impl TransferResult {
    pub fn sent(id: TransferId, bytes_moved: u64) -> Self {
        Self {
            id,
            success: true,
            bytes_moved,
            file_path: None,
            error_kind: None,
            detail: None,
        }
    }

    pub fn received(id: TransferId, bytes_moved: u64, file_path: PathBuf) -> Self {
        Self {
            id,
            success: true,
            bytes_moved,
            file_path: Some(file_path),
            error_kind: None,
            detail: None,
        }
    }

    /// Mid-stream failure. `bytes_moved` is what actually crossed the channel (and, when
    /// receiving, what sits in the partial file at `file_path`).
    pub fn failed(
        id: TransferId,
        bytes_moved: u64,
        file_path: Option<PathBuf>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            bytes_moved,
            file_path,
            error_kind: Some(ErrorKind::TransferError),
            detail: Some(detail.into()),
        }
    }

    /// Failure before any content moved, classified by `err` (a dial error is a socket error,
    /// not a transfer error).
    pub fn aborted(id: TransferId, err: &DropError) -> Self {
        Self {
            id,
            success: false,
            bytes_moved: 0,
            file_path: None,
            error_kind: Some(err.kind()),
            detail: Some(err.to_string()),
        }
    }
}
