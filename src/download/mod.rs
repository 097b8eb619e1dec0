pub mod assemble;
pub mod errors;
pub mod single;
pub mod swarm;

pub use assemble::{Assembler, ChunkSource, DownloadStatus};
pub use errors::DownloadError;
pub use single::SinglePeerDownloader;
pub use swarm::{DownloaderConfig, StreamDownloader};
