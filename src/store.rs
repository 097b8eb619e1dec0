use crate::chunk::{ChunkHash, ChunkRef};
use crate::logging::redact_hex;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Verification lifecycle of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Known to the store, no bytes yet.
    Pending,
    /// A response is being written and verified.
    Writing,
    Verified,
    /// Verification failed; terminal for this session.
    Failed,
}

impl ChunkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

/// Read side of one chunk's verification state. Cheap to clone; every clone
/// observes the same store entry.
#[derive(Debug, Clone)]
pub struct ChunkHandle {
    hash: ChunkHash,
    length: Option<u64>,
    state: watch::Receiver<ChunkState>,
}

impl ChunkHandle {
    pub fn hash(&self) -> ChunkHash {
        self.hash
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn state(&self) -> ChunkState {
        *self.state.borrow()
    }

    pub fn is_verified(&self) -> bool {
        self.state() == ChunkState::Verified
    }

    /// Resolves once the chunk reaches a terminal state, immediately if it
    /// already has. A dropped store counts as terminal.
    pub async fn finished_writing(&self) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }
}

/// The verification/persistence collaborator consumed by the downloaders.
pub trait ChunkStore: Send + Sync + 'static {
    fn get_or_create(&self, reference: &ChunkRef) -> ChunkHandle;
}

struct ChunkEntry {
    state_tx: watch::Sender<ChunkState>,
    length: Option<u64>,
    bytes: Option<Vec<u8>>,
}

/// In-memory chunk store tracking verification state and verified payloads.
///
/// Late duplicate responses for an already-terminal chunk are discarded here,
/// so a losing peer's response never perturbs the request scheduler.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<HashMap<ChunkHash, ChunkEntry>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunks(&self) -> MutexGuard<'_, HashMap<ChunkHash, ChunkEntry>> {
        self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Transition a known chunk into `Writing`. Refused once terminal.
    pub fn begin_write(&self, hash: ChunkHash) -> bool {
        let chunks = self.chunks();
        let Some(entry) = chunks.get(&hash) else {
            return false;
        };
        if entry.state_tx.borrow().is_terminal() {
            return false;
        }
        entry.state_tx.send_replace(ChunkState::Writing);
        true
    }

    /// Accept a verified payload. Returns false for an unknown chunk or a
    /// late duplicate of an already-terminal one.
    pub fn put_verified(&self, hash: ChunkHash, bytes: Vec<u8>) -> bool {
        let mut chunks = self.chunks();
        let Some(entry) = chunks.get_mut(&hash) else {
            return false;
        };
        if entry.state_tx.borrow().is_terminal() {
            tracing::debug!(
                chunk = %redact_hex(&hash.to_hex_lower()),
                "discarding duplicate response for settled chunk"
            );
            return false;
        }
        if entry.length.is_none() {
            entry.length = Some(bytes.len() as u64);
        }
        entry.bytes = Some(bytes);
        entry.state_tx.send_replace(ChunkState::Verified);
        true
    }

    /// Mark a chunk terminally failed for this session.
    pub fn mark_failed(&self, hash: ChunkHash) -> bool {
        let chunks = self.chunks();
        let Some(entry) = chunks.get(&hash) else {
            return false;
        };
        if entry.state_tx.borrow().is_terminal() {
            return false;
        }
        entry.state_tx.send_replace(ChunkState::Failed);
        true
    }

    pub fn verified_bytes(&self, hash: &ChunkHash) -> Option<Vec<u8>> {
        let chunks = self.chunks();
        let entry = chunks.get(hash)?;
        if *entry.state_tx.borrow() == ChunkState::Verified {
            entry.bytes.clone()
        } else {
            None
        }
    }
}

impl ChunkStore for MemoryChunkStore {
    fn get_or_create(&self, reference: &ChunkRef) -> ChunkHandle {
        let mut chunks = self.chunks();
        let entry = chunks.entry(reference.hash).or_insert_with(|| {
            let (state_tx, _) = watch::channel(ChunkState::Pending);
            ChunkEntry {
                state_tx,
                length: reference.length,
                bytes: None,
            }
        });
        if entry.length.is_none() {
            entry.length = reference.length;
        }
        ChunkHandle {
            hash: reference.hash,
            length: entry.length,
            state: entry.state_tx.subscribe(),
        }
    }
}
