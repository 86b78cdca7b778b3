use serde::{Deserialize, Serialize};

use crate::types::{Job, JobKind};

// ---------------------------------------------------------------------------
// REST payloads — jobs
// ---------------------------------------------------------------------------

/// Body of `POST jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
}

/// Response of `GET jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
}

// ---------------------------------------------------------------------------
// REST payloads — chunked upload
// ---------------------------------------------------------------------------

/// One chunk of a resumable upload.
///
/// `payload` is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub upload_id: String,
    pub chunk_index: u64,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Acknowledges an accepted (or idempotently re-sent) chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub next_expected_chunk: u64,
}

/// Resume information for an in-progress upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    /// Highest chunk index received without gaps, or -1 if none yet.
    pub last_contiguous_chunk: i64,
    pub total_chunks: u64,
}

/// Finalizes an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    /// SHA-256 hex digest of the whole file.
    pub checksum: String,
}

/// Machine-readable transfer error, e.g. `CHUNK_MISSING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferErrorResponse {
    pub code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Socket payloads
// ---------------------------------------------------------------------------

/// Payload of `subscribe` / `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub job_id: String,
}

/// Payload of a server-side `error` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
