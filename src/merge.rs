use futures_util::{Stream, StreamExt};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Interleaves any number of asynchronous sequences into one consumable
/// sequence. Per-source order is preserved; a slow source never holds back
/// items from a fast one.
///
/// Each registered source is driven by its own task feeding a shared queue.
/// The merged sequence ends only when every registered source has finished
/// and the queue is drained; registering a new source revives it. A source
/// that ends for any reason, including panic or abort, just counts as
/// finished.
pub struct FanIn<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<T>>,
    active: Arc<AtomicUsize>,
    source_done: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct SourceGuard {
    active: Arc<AtomicUsize>,
    done: Arc<Notify>,
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.done.notify_one();
    }
}

impl<T: Send + 'static> FanIn<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: AsyncMutex::new(rx),
            active: Arc::new(AtomicUsize::new(0)),
            source_done: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a source. May be called before or during consumption of the
    /// merged sequence. Must run inside a tokio runtime.
    pub fn add_source<S>(&self, source: S)
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = SourceGuard {
            active: self.active.clone(),
            done: self.source_done.clone(),
        };
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            // Counts the source as finished however this task ends.
            let _guard = guard;
            let mut source = pin!(source);
            while let Some(item) = source.next().await {
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }

    /// True while any registered source may still produce items.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    /// Next item in arrival order, or `None` once every source has finished
    /// and the queue is drained.
    pub async fn next(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.try_recv() {
                Ok(item) => return Some(item),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return None,
            }
            if self.active.load(Ordering::SeqCst) == 0 {
                return None;
            }
            tokio::select! {
                item = rx.recv() => return item,
                _ = self.source_done.notified() => {}
            }
        }
    }

    /// Abort every source-driving task. Idempotent; queued items remain
    /// consumable.
    pub fn shutdown(&self) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Consume the merger as a plain `Stream` once all sources are
    /// registered. The stream ends when the last source finishes.
    pub fn into_stream(self) -> UnboundedReceiverStream<T> {
        UnboundedReceiverStream::new(self.rx.into_inner())
    }
}

impl<T: Send + 'static> Default for FanIn<T> {
    fn default() -> Self {
        Self::new()
    }
}
