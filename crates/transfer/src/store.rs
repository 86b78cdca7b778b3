use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wharf_protocol::constants::DEFAULT_CHUNK_SIZE;
use wharf_vfs::Vfs;

use crate::session::{Session, SessionStatus};
use crate::TransferError;

/// Transfer store tuning.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Negotiated chunk size for new sessions.
    pub chunk_size: usize,
    /// A session with no chunk activity for this long is reclaimed.
    pub idle_timeout: Duration,
    /// How often the background sweep looks for idle sessions.
    pub sweep_interval: Duration,
    /// Maximum concurrently open sessions.
    pub max_sessions: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            max_sessions: 64,
        }
    }
}

/// Callback invoked with `(upload_id, dest_path)` after a successful
/// finalize. Used to push a UI-refresh event through the hub.
pub type CompletionCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Tracks in-progress resumable uploads keyed by opaque upload id.
///
/// The store-wide map takes a short lock per operation; each session
/// has its own lock so chunk writes to distinct sessions proceed
/// concurrently.
pub struct TransferStore {
    config: TransferConfig,
    vfs: Arc<dyn Vfs>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    on_complete: RwLock<Vec<CompletionCallback>>,
}

impl TransferStore {
    pub fn new(config: TransferConfig, vfs: Arc<dyn Vfs>) -> Arc<Self> {
        Arc::new(Self {
            config,
            vfs,
            sessions: Mutex::new(HashMap::new()),
            on_complete: RwLock::new(Vec::new()),
        })
    }

    /// Registers a finalize callback.
    pub fn on_complete(&self, callback: CompletionCallback) {
        self.on_complete.write().unwrap().push(callback);
    }

    /// Opens a session for `upload_id`, writing into a temp file next
    /// to `dest`. Called when the first chunk of a new upload arrives.
    pub fn create(
        &self,
        upload_id: &str,
        dest: &str,
        total_size: u64,
    ) -> Result<(), TransferError> {
        if upload_id.is_empty() {
            return Err(TransferError::InvalidUploadId);
        }
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(upload_id) {
            return Err(TransferError::SessionExists(upload_id.to_string()));
        }
        if sessions.len() >= self.config.max_sessions {
            return Err(TransferError::StoreFull);
        }
        if let Some((parent, _)) = dest.rsplit_once('/') {
            if !parent.is_empty() {
                self.vfs.create_dir_all(parent)?;
            }
        }
        let session = Session::new(upload_id, dest.to_string(), total_size, self.config.chunk_size);
        // Spool the temp immediately so finalize can rename it even
        // when no chunk ever arrives (zero-byte upload).
        self.vfs.create(&session.temp)?.flush()?;
        tracing::debug!(upload_id, dest, total_size, "transfer session opened");
        sessions.insert(upload_id.to_string(), Arc::new(Mutex::new(session)));
        Ok(())
    }

    fn session(&self, upload_id: &str) -> Result<Arc<Mutex<Session>>, TransferError> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(upload_id)
            .cloned()
            .ok_or_else(|| TransferError::SessionNotFound(upload_id.to_string()))
    }

    /// Accepts the next chunk in sequence and returns the index the
    /// client must send next.
    ///
    /// A duplicate of the last-accepted chunk is re-acked without a
    /// rewrite so client retries are harmless; anything else out of
    /// sequence is rejected and the client must resume from the
    /// expected index.
    pub fn put_chunk(
        &self,
        upload_id: &str,
        chunk_index: u64,
        payload: &[u8],
    ) -> Result<u64, TransferError> {
        let session = self.session(upload_id)?;
        let mut s = session.lock().unwrap();

        if s.next_chunk > 0 && chunk_index == s.next_chunk - 1 {
            s.touch();
            return Ok(s.next_chunk);
        }
        if chunk_index != s.next_chunk {
            return Err(TransferError::ChunkOutOfOrder {
                expected: s.next_chunk,
                got: chunk_index,
            });
        }
        // Chunk indices track byte offsets one-to-one: every chunk but
        // the last carries exactly chunk_size bytes, the last exactly
        // the remainder. A chunk past the declared total has an
        // expected length of zero and is always rejected.
        let remaining = s.total_size - s.received_bytes;
        let expected_len = if chunk_index + 1 < s.total_chunks() {
            s.chunk_size as u64
        } else {
            remaining
        };
        if expected_len == 0 || payload.len() as u64 != expected_len {
            return Err(TransferError::InvalidChunkSize {
                index: chunk_index,
                expected: expected_len,
                got: payload.len() as u64,
            });
        }

        let mut writer = self.vfs.append(&s.temp)?;
        writer.write_all(payload)?;
        writer.flush()?;
        s.advance(payload);
        Ok(s.next_chunk)
    }

    /// Resume information for `upload_id`.
    pub fn status(&self, upload_id: &str) -> Result<SessionStatus, TransferError> {
        let session = self.session(upload_id)?;
        let s = session.lock().unwrap();
        Ok(s.status())
    }

    /// Finalizes the upload: verifies all declared bytes are present
    /// and the whole-file checksum matches, then renames the temp file
    /// into the destination.
    ///
    /// On mismatch the destination is never touched and the session
    /// stays open so the client can retry the final chunks.
    pub fn complete(
        &self,
        upload_id: &str,
        expected_checksum: &str,
    ) -> Result<String, TransferError> {
        let session = self.session(upload_id)?;
        let mut s = session.lock().unwrap();

        if !s.is_complete() {
            s.touch();
            return Err(TransferError::Incomplete {
                received: s.received_bytes,
                declared: s.total_size,
            });
        }
        if !s.digest().eq_ignore_ascii_case(expected_checksum) {
            s.touch();
            return Err(TransferError::ChecksumMismatch);
        }

        self.vfs.rename(&s.temp, &s.dest)?;
        let dest = s.dest.clone();
        drop(s);
        self.sessions.lock().unwrap().remove(upload_id);
        tracing::info!(upload_id, %dest, "upload finalized");

        for callback in self.on_complete.read().unwrap().iter() {
            callback(upload_id, &dest);
        }
        Ok(dest)
    }

    /// Aborts a session, discarding its temp storage.
    pub fn abort(&self, upload_id: &str) -> Result<(), TransferError> {
        let session = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions
                .remove(upload_id)
                .ok_or_else(|| TransferError::SessionNotFound(upload_id.to_string()))?
        };
        let s = session.lock().unwrap();
        self.discard_temp(&s.temp);
        tracing::info!(upload_id, "upload aborted");
        Ok(())
    }

    /// Removes sessions idle past the configured window and frees
    /// their temp storage. Returns the number evicted.
    pub fn evict_idle(&self) -> usize {
        let expired: Vec<(String, Arc<Mutex<Session>>)> = {
            let mut sessions = self.sessions.lock().unwrap();
            let idle: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| {
                    s.lock().unwrap().last_activity.elapsed() >= self.config.idle_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            idle.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };

        for (id, session) in &expired {
            let s = session.lock().unwrap();
            self.discard_temp(&s.temp);
            tracing::info!(upload_id = %id, "evicted idle transfer session");
        }
        expired.len()
    }

    /// Runs the periodic idle sweep until cancellation.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.evict_idle();
                    }
                }
            }
        })
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn discard_temp(&self, temp: &str) {
        if let Err(e) = self.vfs.remove_file(temp) {
            tracing::warn!(temp, "failed to remove temp file: {e}");
        }
    }
}
