use crate::merge::FanIn;
use crate::store::ChunkHandle;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::net::SocketAddr;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, PeerRequestError>;

#[derive(Debug)]
pub enum PeerRequestError {
    /// The request (including its connect budget) timed out.
    Timeout,
    /// The transport dropped mid-request.
    Disconnected,
    /// The peer answered but refused the request.
    Rejected { reason: String },
}

impl fmt::Display for PeerRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "peer request timed out"),
            Self::Disconnected => write!(f, "peer connection lost"),
            Self::Rejected { reason } => write!(f, "peer rejected request: {reason}"),
        }
    }
}

impl std::error::Error for PeerRequestError {}

/// A remote endpoint believed to hold chunks of the target stream.
///
/// Implementations own the wire protocol; the downloader only inserts peers
/// into its pool, removes them on timeout, and disconnects them on teardown.
/// `Eq`/`Hash` must follow `address` so the pool deduplicates by endpoint.
pub trait Peer: Clone + Eq + Hash + Send + Sync + 'static {
    fn address(&self) -> SocketAddr;

    /// Establish the transport. `false` means the candidate is discarded;
    /// there is no retry at the pool layer.
    fn connect(&self, connect_timeout: Duration) -> impl Future<Output = bool> + Send;

    /// Request a batch of chunks. The chunk store observes the response and
    /// flips each handle's state; this only reports delivery of the request.
    fn request_chunks(
        &self,
        chunks: Vec<ChunkHandle>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    fn disconnect(&self);
}

/// Asynchronous, possibly infinite feed of peer candidates for one session.
pub trait PeerSource<P>: Send + Sync + 'static {
    fn next_peer(&self) -> impl Future<Output = Option<P>> + Send;

    /// Stop producing candidates. Idempotent.
    fn stop(&self);
}

impl<P: Send + 'static> PeerSource<P> for FanIn<P> {
    fn next_peer(&self) -> impl Future<Output = Option<P>> + Send {
        self.next()
    }

    fn stop(&self) {
        self.shutdown();
    }
}
