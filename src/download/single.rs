use crate::chunk::ChunkRef;
use crate::download::assemble::{Assembler, ChunkSource};
use crate::download::swarm::DownloaderConfig;
use crate::logging::redact_hex;
use crate::peer::Peer;
use crate::store::{ChunkHandle, ChunkStore};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

struct SingleInner<P> {
    config: DownloaderConfig,
    store: Arc<dyn ChunkStore>,
    peer: P,
}

/// Downloads a stream from one known peer, skipping discovery entirely.
///
/// Best effort: each chunk is requested once and the handle is returned
/// whatever the outcome; the caller observes verification through it.
pub struct SinglePeerDownloader<P: Peer> {
    inner: Arc<SingleInner<P>>,
}

impl<P: Peer> Clone for SinglePeerDownloader<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Peer> SinglePeerDownloader<P> {
    pub fn new(config: DownloaderConfig, store: Arc<dyn ChunkStore>, peer: P) -> Self {
        Self {
            inner: Arc::new(SingleInner {
                config,
                store,
                peer,
            }),
        }
    }

    pub async fn get_chunk(&self, reference: ChunkRef) -> ChunkHandle {
        let handle = self.inner.store.get_or_create(&reference);
        if !handle.is_verified()
            && let Err(error) = self
                .inner
                .peer
                .request_chunks(
                    vec![handle.clone()],
                    self.inner.config.request_timeout,
                    self.inner.config.connect_timeout,
                )
                .await
        {
            tracing::debug!(
                peer = %self.inner.peer.address(),
                chunk = %redact_hex(&reference.hash.to_hex_lower()),
                error = %error,
                "chunk request failed"
            );
        }
        handle
    }

    /// Run the assembler against this source. The peer is disconnected
    /// whether assembly succeeds or fails.
    pub async fn run<A>(&self, assembler: A) -> anyhow::Result<PathBuf>
    where
        A: Assembler<Self>,
    {
        let outcome = assembler
            .assemble(
                self.clone(),
                self.inner.config.output_dir.clone(),
                self.inner.config.output_file_name.clone(),
            )
            .await;
        self.inner.peer.disconnect();
        if let Ok(path) = &outcome {
            tracing::info!(
                peer = %self.inner.peer.address(),
                path = %path.display(),
                "downloaded stream from single peer"
            );
        }
        outcome
    }
}

impl<P: Peer> ChunkSource for SinglePeerDownloader<P> {
    fn get_chunk(&self, reference: ChunkRef) -> impl Future<Output = ChunkHandle> + Send {
        Self::get_chunk(self, reference)
    }
}
