#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use serde_json::{Map, Value};
use uuid::Uuid;

use heartline_api::directory::Directory;
use heartline_api::messages::MessageService;
use heartline_api::protocol::ClearAllProtocol;
use heartline_api::repository::MessageRepository;
use heartline_api::session::Session;
use heartline_db::models::NewProfile;
use heartline_db::{Database, DocumentStore};
use heartline_gateway::Dispatcher;
use heartline_types::documents::{Document, Filter, Patch};

pub const A: &str = "a@x.com";
pub const B: &str = "b@x.com";

/// Two partners sharing one in-memory store.
pub struct Couple {
    pub db: Arc<Database>,
    pub store: Arc<dyn DocumentStore>,
    pub dispatcher: Dispatcher,
    pub a: Session,
    pub b: Session,
}

impl Couple {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store: Arc<dyn DocumentStore> = db.clone();
        Self::with_store(db, store)
    }

    pub fn with_store(db: Arc<Database>, store: Arc<dyn DocumentStore>) -> Self {
        let a = sign_up(&db, A, "Ari", B);
        let b = sign_up(&db, B, "Bo", A);
        Self {
            db,
            store,
            dispatcher: Dispatcher::new(),
            a,
            b,
        }
    }

    pub fn repo(&self) -> MessageRepository {
        MessageRepository::new(self.store.clone(), self.dispatcher.clone())
    }

    pub fn protocol(&self, session: &Session) -> ClearAllProtocol {
        ClearAllProtocol::new(self.repo(), session.clone())
    }

    pub fn messages(&self, session: &Session) -> MessageService {
        MessageService::new(self.repo(), Directory::new(self.db.clone()), session.clone())
    }

    /// Every document either partner sent or received.
    pub fn all_for_pair(&self) -> Vec<Document> {
        let mut ids = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for email in [A, B] {
            for field in ["senderEmail", "receiverEmail"] {
                for doc in self
                    .db
                    .query(heartline_types::documents::MESSAGES, &[Filter::eq(field, email)])
                    .unwrap()
                {
                    if ids.insert(doc.id) {
                        out.push(doc);
                    }
                }
            }
        }
        out
    }
}

pub fn sign_up(db: &Database, email: &str, nickname: &str, partner: &str) -> Session {
    let id = Uuid::new_v4();
    db.create_account(
        &id.to_string(),
        email,
        "not-a-real-hash",
        &NewProfile {
            nickname,
            partner_email: partner,
            user_icon: "💜",
            love_language: None,
        },
    )
    .unwrap();

    Session {
        user_id: id,
        email: email.into(),
        nickname: nickname.into(),
        partner_email: partner.into(),
        partner_nickname: None,
        user_icon: "💜".into(),
    }
}

/// Store whose deletes start failing after a set number of successes.
pub struct FlakyStore {
    inner: Arc<Database>,
    deletes_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<Database>) -> Self {
        Self {
            inner,
            deletes_left: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn fail_deletes_after(&self, n: usize) {
        self.deletes_left.store(n, Ordering::SeqCst);
    }
}

impl DocumentStore for FlakyStore {
    fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<Document> {
        self.inner.insert(collection, fields)
    }

    fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>> {
        self.inner.get(collection, id)
    }

    fn update(&self, collection: &str, id: Uuid, patch: &Patch) -> Result<bool> {
        self.inner.update(collection, id, patch)
    }

    fn delete(&self, collection: &str, id: Uuid) -> Result<bool> {
        let allowed = self
            .deletes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            bail!("permission denied");
        }
        self.inner.delete(collection, id)
    }

    fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>> {
        self.inner.query(collection, filters)
    }
}
