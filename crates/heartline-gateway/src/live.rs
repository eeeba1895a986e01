use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use heartline_db::DocumentStore;
use heartline_types::documents::{Document, Filter};

/// Handle to a live query.
///
/// Call [`Subscription::unsubscribe`] when the consumer goes away. Dropping
/// the handle also stops the listener, but without waiting for it.
pub struct Subscription {
    rx: mpsc::Receiver<Vec<Document>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Vec<Document>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Next full snapshot. `None` once the listener has stopped.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        self.rx.recv().await
    }

    /// Stop the listener and wait until it is gone.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // JoinError::Cancelled is the expected outcome
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run a store query off the async runtime.
pub async fn run_query(
    store: Arc<dyn DocumentStore>,
    collection: &str,
    filters: &[Filter],
) -> Result<Vec<Document>> {
    let collection = collection.to_string();
    let filters = filters.to_vec();
    tokio::task::spawn_blocking(move || store.query(&collection, &filters))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use heartline_db::Database;
    use serde_json::json;

    use crate::Dispatcher;

    use super::*;

    fn store() -> Arc<dyn DocumentStore> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    fn insert(store: &Arc<dyn DocumentStore>, dispatcher: &Dispatcher, value: serde_json::Value) {
        store
            .insert("grievances", value.as_object().cloned().unwrap())
            .unwrap();
        dispatcher.notify("grievances");
    }

    async fn next(sub: &mut Subscription) -> Vec<Document> {
        tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("snapshot timed out")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn delivers_initial_and_changed_snapshots() {
        let store = store();
        let dispatcher = Dispatcher::new();
        insert(&store, &dispatcher, json!({ "receiverEmail": "b@x.com", "title": "one" }));

        let mut sub = dispatcher.watch(
            store.clone(),
            "grievances",
            vec![Filter::eq("receiverEmail", "b@x.com")],
        );
        assert_eq!(next(&mut sub).await.len(), 1);

        // A change elsewhere in the collection does not re-emit an equal snapshot
        insert(&store, &dispatcher, json!({ "receiverEmail": "c@x.com" }));
        // Timestamps have millisecond resolution
        tokio::time::sleep(Duration::from_millis(2)).await;
        insert(&store, &dispatcher, json!({ "receiverEmail": "b@x.com", "title": "two" }));

        let snapshot = next(&mut sub).await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].str_field("title"), Some("two"));

        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn unsubscribe_tears_down_listener() {
        let store = store();
        let dispatcher = Dispatcher::new();

        let mut sub = dispatcher.watch(store.clone(), "grievances", vec![]);
        next(&mut sub).await;
        assert_eq!(dispatcher.live_subscriptions(), 1);

        sub.unsubscribe().await;
        assert_eq!(dispatcher.live_subscriptions(), 0);

        // Writes after teardown have nobody left to wake
        insert(&store, &dispatcher, json!({ "senderEmail": "a@x.com" }));
        assert_eq!(dispatcher.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn dropping_handle_stops_listener() {
        let store = store();
        let dispatcher = Dispatcher::new();

        let sub = dispatcher.watch(store, "grievances", vec![]);
        drop(sub);

        for _ in 0..50 {
            if dispatcher.live_subscriptions() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener still running after its handle was dropped");
    }
}
