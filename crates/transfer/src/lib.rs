//! Resumable chunked uploads.
//!
//! A [`TransferStore`] tracks in-progress uploads keyed by an opaque
//! upload id. Chunks arrive strictly in order, survive client
//! disconnects (the client asks for [`TransferStore::status`] and
//! resumes), and the assembled file only reaches its destination after
//! the whole-file checksum verifies.

mod checksum;
mod session;
mod store;

pub use checksum::checksum_bytes;
pub use session::SessionStatus;
pub use store::{CompletionCallback, TransferConfig, TransferStore};

use wharf_protocol::constants::{CODE_CHECKSUM_MISMATCH, CODE_CHUNK_MISSING};

/// Errors produced by the transfer store.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Vfs(#[from] wharf_vfs::VfsError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("chunk out of order: expected {expected}, got {got}")]
    ChunkOutOfOrder { expected: u64, got: u64 },

    #[error("chunk {index} has wrong length: expected {expected} bytes, got {got}")]
    InvalidChunkSize { index: u64, expected: u64, got: u64 },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("upload incomplete: {received} of {declared} bytes")]
    Incomplete { received: u64, declared: u64 },

    #[error("session store full")]
    StoreFull,

    #[error("invalid upload id")]
    InvalidUploadId,

    #[error("session already exists: {0}")]
    SessionExists(String),
}

impl TransferError {
    /// Machine-readable wire code, where one is defined for the REST
    /// surface.
    pub fn wire_code(&self) -> Option<&'static str> {
        match self {
            Self::ChunkOutOfOrder { .. } => Some(CODE_CHUNK_MISSING),
            Self::ChecksumMismatch => Some(CODE_CHECKSUM_MISMATCH),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes() {
        let e = TransferError::ChunkOutOfOrder {
            expected: 2,
            got: 5,
        };
        assert_eq!(e.wire_code(), Some("CHUNK_MISSING"));
        assert_eq!(
            TransferError::ChecksumMismatch.wire_code(),
            Some("CHECKSUM_MISMATCH")
        );
        assert_eq!(TransferError::StoreFull.wire_code(), None);
    }
}
