use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use heartline_db::DocumentStore;
use heartline_gateway::{Dispatcher, Subscription};
use heartline_types::documents::{Document, Filter, MESSAGES, Patch};
use heartline_types::models::{Body, DocumentType, Record};

use crate::error::{HeartlineError, Result};

pub const SENDER_EMAIL: &str = "senderEmail";
pub const RECEIVER_EMAIL: &str = "receiverEmail";
pub const TYPE: &str = "type";

/// Run a blocking store call off the async runtime.
pub(crate) async fn run_blocking<T, F>(store: &Arc<dyn DocumentStore>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&dyn DocumentStore) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

/// Outcome of a multi-query bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub deleted: usize,
    /// Failed queries plus failed deletes.
    pub failed: usize,
}

impl PurgeOutcome {
    pub fn into_result(self) -> Result<usize> {
        match (self.deleted, self.failed) {
            (deleted, 0) => Ok(deleted),
            (0, _) => Err(HeartlineError::Write(format!(
                "bulk delete failed ({} failures)",
                self.failed
            ))),
            (deleted, failed) => Err(HeartlineError::PartialFailure { deleted, failed }),
        }
    }
}

/// Typed access to the messages collection.
#[derive(Clone)]
pub struct MessageRepository {
    store: Arc<dyn DocumentStore>,
    dispatcher: Dispatcher,
}

impl MessageRepository {
    pub fn new(store: Arc<dyn DocumentStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Live view of documents where `field == value`, newest first.
    pub fn list_by_field(&self, field: &str, value: &str) -> LiveRecords {
        let subscription = self.dispatcher.watch(
            self.store.clone(),
            MESSAGES,
            vec![Filter::eq(field, value)],
        );
        LiveRecords {
            subscription,
            only: None,
        }
    }

    /// One-shot read of documents where `field == value`, newest first.
    pub async fn snapshot_by_field(&self, field: &str, value: &str) -> Result<Vec<Record>> {
        self.snapshot(vec![Filter::eq(field, value)]).await
    }

    pub async fn snapshot(&self, filters: Vec<Filter>) -> Result<Vec<Record>> {
        let docs = run_blocking(&self.store, move |store| store.query(MESSAGES, &filters))
            .await
            .map_err(HeartlineError::unavailable)?;
        Ok(decode_all(docs))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Record>> {
        let doc = run_blocking(&self.store, move |store| store.get(MESSAGES, id))
            .await
            .map_err(HeartlineError::unavailable)?;

        match doc.map(Record::try_from).transpose() {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("Document {} is not a valid record: {}", id, e);
                Ok(None)
            }
        }
    }

    /// Insert and wait for the store to acknowledge. Nothing is committed
    /// locally before that.
    pub async fn append(&self, sender_email: &str, receiver_email: &str, body: Body) -> Result<Record> {
        let fields = body.to_fields(sender_email, receiver_email);
        let doc = run_blocking(&self.store, move |store| store.insert(MESSAGES, fields))
            .await
            .map_err(HeartlineError::write)?;
        self.dispatcher.notify(MESSAGES);

        debug!("Appended {} {}", body.document_type().as_str(), doc.id);
        Record::try_from(doc).map_err(|e| HeartlineError::Write(e.to_string()))
    }

    pub async fn update_fields(&self, id: Uuid, patch: Patch) -> Result<()> {
        let found = run_blocking(&self.store, move |store| store.update(MESSAGES, id, &patch))
            .await
            .map_err(HeartlineError::write)?;
        if !found {
            return Err(HeartlineError::NotFound("message"));
        }
        self.dispatcher.notify(MESSAGES);
        Ok(())
    }

    /// Idempotent: deleting a missing id succeeds with `false`.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let deleted = run_blocking(&self.store, move |store| store.delete(MESSAGES, id))
            .await
            .map_err(HeartlineError::write)?;
        if deleted {
            self.dispatcher.notify(MESSAGES);
        }
        Ok(deleted)
    }

    /// Delete every document where `email` is sender or receiver.
    pub async fn delete_all_for_participant(&self, email: &str) -> Result<usize> {
        self.purge(&[email]).await.into_result()
    }

    /// Sender and receiver queries for each email, unioned client-side, then
    /// deleted one by one. No rollback: whatever was deleted stays deleted.
    pub async fn purge(&self, emails: &[&str]) -> PurgeOutcome {
        let queries = emails.iter().flat_map(|email| {
            [SENDER_EMAIL, RECEIVER_EMAIL]
                .into_iter()
                .map(move |field| Filter::eq(field, *email))
        });

        let results = join_all(queries.map(|filter| {
            run_blocking(&self.store, move |store| store.query(MESSAGES, &[filter]))
        }))
        .await;

        let mut outcome = PurgeOutcome::default();
        let mut ids = BTreeSet::new();
        for result in results {
            match result {
                Ok(docs) => ids.extend(docs.into_iter().map(|d| d.id)),
                Err(e) => {
                    warn!("Bulk delete query failed: {:#}", e);
                    outcome.failed += 1;
                }
            }
        }

        let ids: Vec<Uuid> = ids.into_iter().collect();
        let deletes = run_blocking(&self.store, move |store| {
            Ok(ids
                .into_iter()
                .map(|id| (id, store.delete(MESSAGES, id)))
                .collect::<Vec<_>>())
        })
        .await;

        match deletes {
            Ok(results) => {
                for (id, result) in results {
                    match result {
                        Ok(true) => outcome.deleted += 1,
                        // Already gone, e.g. the partner cleared concurrently
                        Ok(false) => {}
                        Err(e) => {
                            warn!("Failed to delete {}: {:#}", id, e);
                            outcome.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Bulk delete aborted: {:#}", e);
                outcome.failed += 1;
            }
        }

        if outcome.deleted > 0 {
            self.dispatcher.notify(MESSAGES);
        }
        info!(
            "Bulk delete for {:?}: {} deleted, {} failed",
            emails, outcome.deleted, outcome.failed
        );
        outcome
    }
}

/// Live, typed view over a subscription. Every item is the full result set.
pub struct LiveRecords {
    subscription: Subscription,
    only: Option<DocumentType>,
}

impl LiveRecords {
    /// Keep only one kind of document in each snapshot.
    pub fn only(mut self, kind: DocumentType) -> Self {
        self.only = Some(kind);
        self
    }

    pub async fn next(&mut self) -> Option<Vec<Record>> {
        let docs = self.subscription.next().await?;
        let mut records = decode_all(docs);
        if let Some(kind) = self.only {
            records.retain(|r| r.body.document_type() == kind);
        }
        Some(records)
    }

    pub async fn unsubscribe(self) {
        self.subscription.unsubscribe().await;
    }
}

/// Decode, skipping anything malformed, and sort newest first. The store's
/// order is not relied upon.
pub(crate) fn decode_all(docs: Vec<Document>) -> Vec<Record> {
    let mut records: Vec<Record> = docs
        .into_iter()
        .filter_map(|doc| {
            let id = doc.id;
            Record::try_from(doc)
                .map_err(|e| warn!("Skipping document {}: {}", id, e))
                .ok()
        })
        .collect();

    records.sort_by(|a, b| {
        b.envelope
            .timestamp
            .cmp(&a.envelope.timestamp)
            .then_with(|| a.id().cmp(&b.id()))
    });
    records
}
