use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use heartline_db::DocumentStore;
use heartline_types::documents::{Document, Filter};
use heartline_types::events::StoreEvent;

use crate::live::{self, Subscription};

/// Snapshots buffered per live query before the watcher waits on the consumer.
const SNAPSHOT_BUFFER: usize = 16;

/// Fans store changes out to every live query.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

pub(crate) struct DispatcherInner {
    /// Broadcast channel for store changes; every live query receives every event
    broadcast_tx: broadcast::Sender<StoreEvent>,

    /// Number of live queries currently running
    live: AtomicUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Subscribe to raw store change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Announce that `collection` changed. Called after every acknowledged write.
    pub fn notify(&self, collection: &str) {
        // No receivers just means nobody is watching
        let _ = self.inner.broadcast_tx.send(StoreEvent {
            collection: collection.to_string(),
        });
    }

    /// Number of live queries that have not been torn down yet.
    pub fn live_subscriptions(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Open a live query. The first snapshot is delivered immediately; later
    /// snapshots only when the matched set actually changes.
    pub fn watch(
        &self,
        store: Arc<dyn DocumentStore>,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        // Subscribe before the first query so no change slips between them
        let events = self.subscribe();
        let guard = LiveGuard::new(self.inner.clone());
        let collection = collection.to_string();

        let task = tokio::spawn(async move {
            let _guard = guard;
            run_watch(store, collection, filters, events, tx).await;
        });

        Subscription::new(rx, task)
    }
}

async fn run_watch(
    store: Arc<dyn DocumentStore>,
    collection: String,
    filters: Vec<Filter>,
    mut events: broadcast::Receiver<StoreEvent>,
    tx: mpsc::Sender<Vec<Document>>,
) {
    let mut last: Option<Vec<Document>> = None;

    loop {
        match live::run_query(store.clone(), &collection, &filters).await {
            Ok(docs) => {
                if last.as_ref() != Some(&docs) {
                    debug!("Live query on {} matched {} documents", collection, docs.len());
                    if tx.send(docs.clone()).await.is_err() {
                        // Consumer is gone
                        return;
                    }
                    last = Some(docs);
                }
            }
            Err(e) => warn!("Live query on {} failed: {}", collection, e),
        }

        loop {
            match events.recv().await {
                Ok(event) if event.collection == collection => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Live query receiver lagged by {} events, re-querying", n);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// Counts a live query for as long as its task future is alive.
struct LiveGuard {
    inner: Arc<DispatcherInner>,
}

impl LiveGuard {
    fn new(inner: Arc<DispatcherInner>) -> Self {
        inner.live.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.inner.live.fetch_sub(1, Ordering::AcqRel);
    }
}
