use crate::chunk::ChunkRef;
use crate::store::ChunkHandle;
use std::future::Future;
use std::path::PathBuf;

/// Chunk-acquisition contract between a downloader and the assembler.
pub trait ChunkSource: Clone + Send + Sync + 'static {
    /// Resolve one chunk. Implementations decide how hard to try; the swarm
    /// downloader only returns once the chunk is verified.
    fn get_chunk(&self, reference: ChunkRef) -> impl Future<Output = ChunkHandle> + Send;
}

/// Sequential stream assembler: pulls chunks one at a time in stream order
/// and writes the decrypted output file. Owns its own I/O failures.
pub trait Assembler<S: ChunkSource>: Send + 'static {
    fn assemble(
        self,
        source: S,
        output_dir: PathBuf,
        output_file_name: Option<String>,
    ) -> impl Future<Output = anyhow::Result<PathBuf>> + Send;
}

/// Session-level outcome, published over a `watch` channel. Individual peer
/// failures never show up here; they are absorbed by the request scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Idle,
    Running,
    Finished { path: PathBuf },
    Failed { error: String },
    Stopped,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Stopped
        )
    }
}
