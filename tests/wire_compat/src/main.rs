fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    //! Pins the JSON shapes consumed by existing clients. Each test
    //! holds the canonical wire form inline; if one of these breaks,
    //! deployed front ends break with it.

    use serde_json::json;

    /// Deserializes a canonical wire value into a Rust type,
    /// re-serializes it, and compares the JSON values.
    fn roundtrip<T>(wire: serde_json::Value)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let parsed: T = serde_json::from_value(wire.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {wire}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {wire}: {e}"));
        assert_eq!(wire, reserialized, "roundtrip mismatch");
    }

    /// Like [`roundtrip`] but goes through a JSON string, for types
    /// holding a `RawValue` (which cannot deserialize from a `Value`).
    fn roundtrip_str<T>(wire: serde_json::Value)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let text = wire.to_string();
        let parsed: T = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to deserialize {text}: {e}"));
        let reserialized: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&parsed).unwrap())
                .unwrap_or_else(|e| panic!("failed to re-serialize {text}: {e}"));
        assert_eq!(wire, reserialized, "roundtrip mismatch");
    }

    // --- Job REST shapes ---

    #[test]
    fn job_full() {
        roundtrip::<wharf_protocol::types::Job>(json!({
            "id": "4c0f7c1e-9a6f-4d2a-8d8f-1f2a3b4c5d6e",
            "type": "copy",
            "state": "completed",
            "progress": 100,
            "sourcePath": "/media/movies/a.mkv",
            "destPath": "/backup/movies/a.mkv",
            "createdAt": "2025-11-02T10:15:30Z",
            "startedAt": "2025-11-02T10:15:31Z",
            "completedAt": "2025-11-02T10:16:02Z"
        }));
    }

    #[test]
    fn job_failed_carries_error() {
        roundtrip::<wharf_protocol::types::Job>(json!({
            "id": "j2",
            "type": "delete",
            "state": "failed",
            "progress": 40,
            "sourcePath": "/media/old",
            "error": "permission denied",
            "createdAt": "2025-11-02T10:15:30Z",
            "startedAt": "2025-11-02T10:15:31Z",
            "completedAt": "2025-11-02T10:15:33Z"
        }));
    }

    #[test]
    fn job_pending_minimal() {
        roundtrip::<wharf_protocol::types::Job>(json!({
            "id": "j3",
            "type": "move",
            "state": "pending",
            "progress": 0,
            "sourcePath": "/a",
            "destPath": "/b",
            "createdAt": "2025-11-02T10:15:30Z"
        }));
    }

    #[test]
    fn job_list() {
        roundtrip::<wharf_protocol::messages::JobListResponse>(json!({
            "jobs": [{
                "id": "j1",
                "type": "copy",
                "state": "running",
                "progress": 33,
                "sourcePath": "/a",
                "destPath": "/b",
                "createdAt": "2025-11-02T10:15:30Z",
                "startedAt": "2025-11-02T10:15:31Z"
            }]
        }));
    }

    #[test]
    fn create_job_request() {
        roundtrip::<wharf_protocol::messages::CreateJobRequest>(json!({
            "type": "move",
            "sourcePath": "/media/a",
            "destPath": "/backup/a"
        }));
        roundtrip::<wharf_protocol::messages::CreateJobRequest>(json!({
            "type": "delete",
            "sourcePath": "/media/a"
        }));
    }

    // --- Upload shapes ---

    #[test]
    fn upload_chunk_request() {
        roundtrip::<wharf_protocol::messages::UploadChunkRequest>(json!({
            "uploadId": "u-7",
            "chunkIndex": 12,
            "payload": "SGVsbG8="
        }));
    }

    #[test]
    fn upload_chunk_response() {
        roundtrip::<wharf_protocol::messages::UploadChunkResponse>(json!({
            "nextExpectedChunk": 13
        }));
    }

    #[test]
    fn upload_status_fresh_session_is_minus_one() {
        roundtrip::<wharf_protocol::messages::UploadStatusResponse>(json!({
            "lastContiguousChunk": -1,
            "totalChunks": 8
        }));
    }

    #[test]
    fn complete_upload_request() {
        roundtrip::<wharf_protocol::messages::CompleteUploadRequest>(json!({
            "uploadId": "u-7",
            "checksum": "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        }));
    }

    #[test]
    fn transfer_error_response() {
        roundtrip::<wharf_protocol::messages::TransferErrorResponse>(json!({
            "code": "CHUNK_MISSING",
            "message": "expected chunk 3, got 7"
        }));
        roundtrip::<wharf_protocol::messages::TransferErrorResponse>(json!({
            "code": "CHECKSUM_MISMATCH",
            "message": "checksum mismatch"
        }));
    }

    // --- Socket shapes ---

    #[test]
    fn envelope_subscribe() {
        roundtrip_str::<wharf_protocol::envelope::Envelope>(json!({
            "type": "subscribe",
            "payload": {"jobId": "j1"}
        }));
    }

    #[test]
    fn envelope_ping_pong() {
        roundtrip_str::<wharf_protocol::envelope::Envelope>(json!({"type": "ping"}));
        roundtrip_str::<wharf_protocol::envelope::Envelope>(json!({"type": "pong"}));
    }

    #[test]
    fn envelope_job_update() {
        roundtrip_str::<wharf_protocol::envelope::Envelope>(json!({
            "type": "job_update",
            "payload": {"jobId": "j1", "state": "running", "progress": 66}
        }));
    }

    #[test]
    fn envelope_job_complete() {
        roundtrip_str::<wharf_protocol::envelope::Envelope>(json!({
            "type": "job_complete",
            "payload": {"jobId": "j1", "state": "failed", "progress": 40, "error": "disk full"}
        }));
    }

    #[test]
    fn envelope_error() {
        roundtrip_str::<wharf_protocol::envelope::Envelope>(json!({
            "type": "error",
            "payload": {"message": "unexpected message type"}
        }));
    }

    #[test]
    fn job_update_payload() {
        roundtrip::<wharf_protocol::types::JobUpdate>(json!({
            "jobId": "j9",
            "state": "cancelled",
            "progress": 55
        }));
    }
}
