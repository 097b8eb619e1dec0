//! swarmstream: multi-peer downloader for content-addressed chunked streams.
//!
//! A stream is fetched chunk by chunk from a swarm of untrusted peers found
//! through a distributed peer directory. Every chunk is verified by the
//! chunk store before the assembler consumes it, and any single peer may
//! stall or vanish without stalling the transfer.
//!
//! The wire protocol, the discovery mechanism, chunk persistence and stream
//! assembly are collaborators behind the `Peer`, `PeerSource`, `ChunkStore`
//! and `Assembler` traits; this crate owns the connection pool, the
//! per-chunk request racing and the session lifecycle.

pub mod chunk;
pub mod config;
pub mod download;
pub mod logging;
pub mod merge;
pub mod peer;
pub mod store;

pub use chunk::{ChunkHash, ChunkRef, MAX_CHUNK_SIZE};
pub use download::{
    Assembler, ChunkSource, DownloadError, DownloadStatus, DownloaderConfig, SinglePeerDownloader,
    StreamDownloader,
};
pub use merge::FanIn;
pub use peer::{Peer, PeerRequestError, PeerSource};
pub use store::{ChunkHandle, ChunkState, ChunkStore, MemoryChunkStore};
