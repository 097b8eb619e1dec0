use swarmstream::{
    Assembler, ChunkHandle, ChunkHash, ChunkRef, ChunkSource, DownloadStatus, FanIn,
    MemoryChunkStore, Peer, PeerRequestError, StreamDownloader, chunk::CHUNK_HASH_LEN,
    config::Config,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    let id = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{prefix}_{}_{}", std::process::id(), id))
}

fn chunk(tag: u8) -> ChunkRef {
    ChunkRef::new(ChunkHash([tag; CHUNK_HASH_LEN]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmokeBehavior {
    Responds { delay_ms: u64 },
    TimesOut,
    RefusesConnect,
}

#[derive(Clone)]
struct SmokePeer {
    addr: SocketAddr,
    behavior: SmokeBehavior,
    store: Arc<MemoryChunkStore>,
    payload: u8,
    requests: Arc<Mutex<Vec<ChunkHash>>>,
    disconnects: Arc<AtomicUsize>,
}

impl SmokePeer {
    fn new(port: u16, behavior: SmokeBehavior, store: &Arc<MemoryChunkStore>, payload: u8) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            behavior,
            store: store.clone(),
            payload,
            requests: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("requests").len()
    }
}

impl PartialEq for SmokePeer {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for SmokePeer {}

impl std::hash::Hash for SmokePeer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl Peer for SmokePeer {
    fn address(&self) -> SocketAddr {
        self.addr
    }

    async fn connect(&self, _connect_timeout: Duration) -> bool {
        self.behavior != SmokeBehavior::RefusesConnect
    }

    async fn request_chunks(
        &self,
        chunks: Vec<ChunkHandle>,
        request_timeout: Duration,
        _connect_timeout: Duration,
    ) -> Result<(), PeerRequestError> {
        {
            let mut requests = self.requests.lock().expect("requests");
            for chunk in &chunks {
                requests.push(chunk.hash());
            }
        }
        match self.behavior {
            SmokeBehavior::Responds { delay_ms } => {
                sleep(Duration::from_millis(delay_ms)).await;
                for chunk in &chunks {
                    self.store.put_verified(chunk.hash(), vec![self.payload; 4]);
                }
                Ok(())
            }
            SmokeBehavior::TimesOut | SmokeBehavior::RefusesConnect => {
                sleep(request_timeout).await;
                Err(PeerRequestError::Timeout)
            }
        }
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct FileAssembler {
    store: Arc<MemoryChunkStore>,
    refs: Vec<ChunkRef>,
}

impl<S: ChunkSource> Assembler<S> for FileAssembler {
    async fn assemble(
        self,
        source: S,
        output_dir: PathBuf,
        output_file_name: Option<String>,
    ) -> anyhow::Result<PathBuf> {
        let mut bytes = Vec::new();
        for reference in self.refs {
            let handle = source.get_chunk(reference).await;
            let verified = self
                .store
                .verified_bytes(&handle.hash())
                .ok_or_else(|| anyhow::anyhow!("chunk not verified after acquisition"))?;
            bytes.extend(verified);
        }
        let path = output_dir.join(output_file_name.as_deref().unwrap_or("stream.out"));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

#[tokio::test(start_paused = true)]
async fn full_session_survives_flaky_swarm() {
    let output_dir = unique_temp_dir("swarmstream_smoke");
    std::fs::create_dir_all(&output_dir).expect("create output dir");

    let store = Arc::new(MemoryChunkStore::new());
    let unreachable = SmokePeer::new(7001, SmokeBehavior::RefusesConnect, &store, 0x00);
    let stalled = SmokePeer::new(7002, SmokeBehavior::TimesOut, &store, 0x00);
    let honest = SmokePeer::new(7003, SmokeBehavior::Responds { delay_ms: 20 }, &store, 0xC4);

    // Candidates trickle in from two discovery sources, merged fan-in style.
    let feed = FanIn::new();
    feed.add_source(tokio_stream::iter(vec![
        unreachable.clone(),
        stalled.clone(),
    ]));
    let late_honest = honest.clone();
    feed.add_source(futures_util::stream::once(async move {
        sleep(Duration::from_millis(80)).await;
        late_honest
    }));

    let mut cfg = Config::default();
    cfg.download.request_timeout_secs = 1;
    cfg.download.output_dir = output_dir.display().to_string();
    cfg.download.output_file_name = Some("payload.bin".to_string());
    let downloader = StreamDownloader::new(cfg.download.downloader_config(), store.clone(), feed);

    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let assembler = FileAssembler {
        store: store.clone(),
        refs: vec![chunk(1), chunk(2), chunk(3)],
    };
    downloader
        .start(assembler, move || flag.store(true, Ordering::SeqCst))
        .expect("start session");

    let outcome = downloader.outcome().await;
    let path = match outcome {
        DownloadStatus::Finished { path } => path,
        other => panic!("session did not finish: {other:?}"),
    };
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(std::fs::read(&path).expect("output file"), vec![0xC4; 12]);

    // The honest peer served every chunk exactly once; the unreachable
    // candidate never made it into the pool.
    assert_eq!(honest.request_count(), 3);
    assert_eq!(unreachable.request_count(), 0);

    // Teardown already ran on completion; stopping again changes nothing.
    downloader.stop();
    downloader.stop();
    assert!(matches!(
        downloader.outcome().await,
        DownloadStatus::Finished { .. }
    ));
    assert_eq!(honest.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(unreachable.disconnects.load(Ordering::SeqCst), 0);

    let _ = std::fs::remove_dir_all(&output_dir);
}

#[tokio::test(start_paused = true)]
async fn stopped_session_reports_stopped_and_disconnects_pool() {
    let store = Arc::new(MemoryChunkStore::new());
    let peer = SmokePeer::new(7010, SmokeBehavior::TimesOut, &store, 0x11);

    let feed = FanIn::new();
    feed.add_source(tokio_stream::iter(vec![peer.clone()]));

    let mut cfg = Config::default();
    cfg.download.output_dir = std::env::temp_dir().display().to_string();
    let downloader = StreamDownloader::new(cfg.download.downloader_config(), store.clone(), feed);

    // The only peer never delivers, so the assembler stays blocked in
    // get_chunk until the session is stopped from outside.
    let assembler = FileAssembler {
        store: store.clone(),
        refs: vec![chunk(0x77)],
    };
    downloader.start(assembler, || {}).expect("start session");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(downloader.connected_peers(), 1);

    downloader.stop();
    assert_eq!(downloader.outcome().await, DownloadStatus::Stopped);
    assert_eq!(peer.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(downloader.connected_peers(), 0);
}
