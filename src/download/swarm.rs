use crate::chunk::{ChunkHash, ChunkRef};
use crate::download::assemble::{Assembler, ChunkSource, DownloadStatus};
use crate::download::errors::{DownloadError, Result};
use crate::logging::{redact_hex, warn_throttled};
use crate::peer::{Peer, PeerRequestError, PeerSource};
use crate::store::{ChunkHandle, ChunkStore};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Construction-time knobs for a download session. No environment or file
/// lookup happens here; see `config` for the TOML surface.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub output_dir: PathBuf,
    pub output_file_name: Option<String>,
}

/// Pool membership plus the per-chunk request ledger. Mutated only behind
/// one lock, together with the pool signal, so a peer added right as the
/// scheduler checks the pool is never missed and a peer is removed at most
/// once.
struct PoolState<P> {
    connections: HashSet<P>,
    requests: HashMap<ChunkHash, HashSet<SocketAddr>>,
}

enum TaskState {
    NotStarted,
    Running(JoinHandle<()>),
    Done,
    Cancelled,
}

impl TaskState {
    fn cancel(&mut self) {
        match std::mem::replace(self, Self::Cancelled) {
            Self::Running(handle) => handle.abort(),
            Self::Done => *self = Self::Done,
            Self::NotStarted | Self::Cancelled => {}
        }
    }
}

struct SessionTasks {
    accumulator: TaskState,
    driver: TaskState,
}

struct Inner<P, F> {
    config: DownloaderConfig,
    store: Arc<dyn ChunkStore>,
    finder: F,
    pool: Mutex<PoolState<P>>,
    has_peers: watch::Sender<bool>,
    status: watch::Sender<DownloadStatus>,
    tasks: Mutex<SessionTasks>,
}

/// Multi-peer downloader for one content-addressed stream.
///
/// A background task feeds the connection pool from the discovery feed while
/// `get_chunk` races concurrent requests across the pool until the chunk
/// store reports each chunk verified. The handle is cheap to clone; clones
/// share one session.
pub struct StreamDownloader<P: Peer, F: PeerSource<P>> {
    inner: Arc<Inner<P, F>>,
}

impl<P: Peer, F: PeerSource<P>> Clone for StreamDownloader<P, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Peer, F: PeerSource<P>> StreamDownloader<P, F> {
    pub fn new(config: DownloaderConfig, store: Arc<dyn ChunkStore>, finder: F) -> Self {
        let (has_peers, _) = watch::channel(false);
        let (status, _) = watch::channel(DownloadStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                finder,
                pool: Mutex::new(PoolState {
                    connections: HashSet::new(),
                    requests: HashMap::new(),
                }),
                has_peers,
                status,
                tasks: Mutex::new(SessionTasks {
                    accumulator: TaskState::NotStarted,
                    driver: TaskState::NotStarted,
                }),
            }),
        }
    }

    pub fn status(&self) -> watch::Receiver<DownloadStatus> {
        self.inner.status.subscribe()
    }

    /// Wait for the session to reach a terminal status.
    pub async fn outcome(&self) -> DownloadStatus {
        let mut rx = self.inner.status.subscribe();
        match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => status.clone(),
            Err(_) => DownloadStatus::Stopped,
        }
    }

    pub fn connected_peers(&self) -> usize {
        self.pool().connections.len()
    }

    fn pool(&self) -> MutexGuard<'_, PoolState<P>> {
        self.inner
            .pool
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks_state(&self) -> MutexGuard<'_, SessionTasks> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the session: spawn the connection accumulator and the driving
    /// task running `assembler` against this downloader. One-shot.
    pub fn start<A>(&self, assembler: A, on_finished: impl FnOnce() + Send + 'static) -> Result<()>
    where
        A: Assembler<Self>,
    {
        let mut tasks = self.tasks_state();
        if !matches!(tasks.driver, TaskState::NotStarted)
            || !matches!(tasks.accumulator, TaskState::NotStarted)
        {
            return Err(DownloadError::AlreadyStarted);
        }

        // Publish before spawning so a fast driver's terminal status is
        // never overwritten by `Running`.
        self.inner.status.send_replace(DownloadStatus::Running);
        let accumulator = tokio::spawn(self.clone().accumulate_connections());
        let this = self.clone();
        let driver = tokio::spawn(async move {
            this.drive(assembler, on_finished).await;
        });
        tasks.accumulator = TaskState::Running(accumulator);
        tasks.driver = TaskState::Running(driver);
        Ok(())
    }

    /// Idempotent teardown: cancels the background tasks, stops the
    /// discovery feed and disconnects every pooled peer exactly once. Safe
    /// after natural completion.
    pub fn stop(&self) {
        self.teardown();
        self.publish_terminal(DownloadStatus::Stopped);
    }

    async fn drive<A>(self, assembler: A, on_finished: impl FnOnce() + Send + 'static)
    where
        A: Assembler<Self>,
    {
        let output_dir = self.inner.config.output_dir.clone();
        let output_file_name = self.inner.config.output_file_name.clone();
        let outcome = assembler
            .assemble(self.clone(), output_dir, output_file_name)
            .await;

        // Mark this task done before teardown so teardown does not cancel
        // the task it is running on.
        self.tasks_state().driver = TaskState::Done;
        match outcome {
            Ok(path) => {
                tracing::info!(path = %path.display(), "downloaded stream");
                on_finished();
                self.teardown();
                self.publish_terminal(DownloadStatus::Finished { path });
            }
            Err(error) => {
                self.teardown();
                tracing::warn!(error = %error, "stream assembly failed");
                self.publish_terminal(DownloadStatus::Failed {
                    error: error.to_string(),
                });
            }
        }
    }

    fn teardown(&self) {
        {
            let mut tasks = self.tasks_state();
            tasks.accumulator.cancel();
            tasks.driver.cancel();
        }
        self.inner.finder.stop();

        let drained: Vec<P> = {
            let mut pool = self.pool();
            let drained = pool.connections.drain().collect();
            self.inner.has_peers.send_replace(false);
            drained
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "disconnecting pooled peers");
        }
        for peer in &drained {
            peer.disconnect();
        }
    }

    fn publish_terminal(&self, status: DownloadStatus) {
        self.inner.status.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Feed the pool from the discovery feed for the session's lifetime.
    /// Candidates that fail to connect are discarded without retry.
    async fn accumulate_connections(self) {
        while let Some(peer) = self.inner.finder.next_peer().await {
            let addr = peer.address();
            if peer.connect(self.inner.config.connect_timeout).await {
                let mut pool = self.pool();
                if pool.connections.insert(peer) {
                    let count = pool.connections.len();
                    self.inner.has_peers.send_replace(true);
                    drop(pool);
                    tracing::debug!(peer = %addr, pool = count, "peer connected");
                }
            } else {
                tracing::debug!(peer = %addr, "connect failed; discarding candidate");
            }
        }
        tracing::debug!("peer discovery feed finished");
    }

    /// Acquire one chunk, racing requests across the pool until the store
    /// reports it verified. Returns immediately on a cache hit. Blocks
    /// without bound while no peer can serve the chunk; a usable peer from
    /// the discovery feed unblocks it at any point.
    pub async fn get_chunk(&self, reference: ChunkRef) -> ChunkHandle {
        let handle = {
            // The store lookup shares the pool lock so the session's current
            // target never races pool mutation.
            let _pool = self.pool();
            self.inner.store.get_or_create(&reference)
        };
        let chunk = handle.hash().to_hex_lower();
        if handle.is_verified() {
            tracing::debug!(chunk = %redact_hex(&chunk), "chunk already verified");
            return handle;
        }

        let mut pool_changes = self.inner.has_peers.subscribe();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
        loop {
            let pool_was_empty = self.dispatch_requests(&handle, &done_tx);
            if handle.is_verified() {
                break;
            }
            if pool_was_empty && warn_throttled("swarm_pool_empty", Duration::from_secs(30)) {
                tracing::warn!(
                    chunk = %redact_hex(&chunk),
                    "no connected peers; waiting on discovery"
                );
            }
            tokio::select! {
                _ = done_rx.recv() => {}
                _ = pool_changes.changed() => {}
                _ = handle.finished_writing() => {}
            }
            if handle.is_verified() {
                break;
            }
        }

        // The ledger entry is dead once the chunk settles.
        self.pool().requests.remove(&handle.hash());
        tracing::debug!(chunk = %redact_hex(&chunk), "chunk verified");
        handle
    }

    /// Ask every pooled peer not yet in this chunk's ledger entry. Returns
    /// whether the pool was empty. Outstanding requests are never cancelled;
    /// they settle on their own and report through `done_tx`.
    fn dispatch_requests(&self, handle: &ChunkHandle, done_tx: &mpsc::UnboundedSender<()>) -> bool {
        let mut pool = self.pool();
        let empty = pool.connections.is_empty();
        let PoolState {
            connections,
            requests,
        } = &mut *pool;
        let ledger = requests.entry(handle.hash()).or_default();
        for peer in connections.iter() {
            if !ledger.insert(peer.address()) {
                continue;
            }
            tokio::spawn(self.clone().request_chunk(
                peer.clone(),
                handle.clone(),
                done_tx.clone(),
            ));
        }
        empty
    }

    async fn request_chunk(self, peer: P, handle: ChunkHandle, done_tx: mpsc::UnboundedSender<()>) {
        let addr = peer.address();
        tracing::debug!(
            peer = %addr,
            chunk = %redact_hex(&handle.hash().to_hex_lower()),
            "requesting chunk"
        );
        let result = peer
            .request_chunks(
                vec![handle],
                self.inner.config.request_timeout,
                self.inner.config.connect_timeout,
            )
            .await;
        match result {
            Ok(()) => {}
            Err(PeerRequestError::Timeout) => {
                let evicted = {
                    let mut pool = self.pool();
                    let evicted = pool.connections.remove(&peer);
                    if evicted && pool.connections.is_empty() {
                        self.inner.has_peers.send_replace(false);
                    }
                    evicted
                };
                if evicted {
                    tracing::debug!(peer = %addr, "peer timed out; evicted from pool");
                }
            }
            Err(error) => {
                tracing::debug!(peer = %addr, error = %error, "chunk request failed");
            }
        }
        let _ = done_tx.send(());
    }
}

impl<P: Peer, F: PeerSource<P>> ChunkSource for StreamDownloader<P, F> {
    fn get_chunk(&self, reference: ChunkRef) -> impl Future<Output = ChunkHandle> + Send {
        Self::get_chunk(self, reference)
    }
}
