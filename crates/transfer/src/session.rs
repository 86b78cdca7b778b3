use sha2::{Digest, Sha256};
use tokio::time::Instant;

/// Resume information reported to a client after a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    /// Highest chunk index received without gaps, -1 if none yet.
    pub last_contiguous_chunk: i64,
    pub total_chunks: u64,
}

/// Server-side state for one in-progress resumable upload.
///
/// Chunks are assembled in order into a temp file next to the
/// destination; the running SHA-256 is kept incrementally so finalize
/// never has to re-read the spooled bytes.
pub(crate) struct Session {
    pub dest: String,
    pub temp: String,
    pub total_size: u64,
    pub chunk_size: usize,
    /// Index of the next chunk the client must send.
    pub next_chunk: u64,
    pub received_bytes: u64,
    pub hasher: Sha256,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(upload_id: &str, dest: String, total_size: u64, chunk_size: usize) -> Self {
        let temp = format!("{dest}.part-{upload_id}");
        Self {
            dest,
            temp,
            total_size,
            chunk_size,
            next_chunk: 0,
            received_bytes: 0,
            hasher: Sha256::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn total_chunks(&self) -> u64 {
        if self.total_size == 0 {
            return 0;
        }
        self.total_size.div_ceil(self.chunk_size as u64)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            last_contiguous_chunk: self.next_chunk as i64 - 1,
            total_chunks: self.total_chunks(),
        }
    }

    /// Records an accepted chunk.
    pub fn advance(&mut self, payload: &[u8]) {
        self.hasher.update(payload);
        self.received_bytes += payload.len() as u64;
        self.next_chunk += 1;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_complete(&self) -> bool {
        self.received_bytes == self.total_size
    }

    /// Hex digest of everything received so far. Non-destructive so a
    /// failed finalize leaves the session open for retry.
    pub fn digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}
