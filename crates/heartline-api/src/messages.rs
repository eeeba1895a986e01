use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use heartline_types::api::{Claims, RespondRequest, SendMessageRequest};
use heartline_types::documents::Patch;
use heartline_types::models::{
    Body, DocumentType, Message, MessageKind, MessageStatus, Priority, Record, ResponseEntry,
};

use crate::auth::AppState;
use crate::directory::Directory;
use crate::error::{HeartlineError, Result};
use crate::repository::{LiveRecords, MessageRepository, RECEIVER_EMAIL, SENDER_EMAIL};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub mood: Option<String>,
    pub kind: MessageKind,
}

impl From<SendMessageRequest> for NewMessage {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            title: req.title,
            description: req.description,
            priority: req.priority,
            mood: req.mood,
            kind: req.message_type,
        }
    }
}

/// Messages between the session user and their partner.
pub struct MessageService {
    repo: MessageRepository,
    directory: Directory,
    session: Session,
}

impl MessageService {
    pub fn new(repo: MessageRepository, directory: Directory, session: Session) -> Self {
        Self {
            repo,
            directory,
            session,
        }
    }

    pub async fn submit(&self, new: NewMessage) -> Result<Record> {
        let title = new.title.trim();
        let description = new.description.trim();
        if title.is_empty() || description.is_empty() {
            return Err(HeartlineError::validation(
                "Please fill in both the title and the description.",
            ));
        }

        let mood = new
            .mood
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());
        if new.kind == MessageKind::Grievance && (mood.is_none() || new.priority.is_none()) {
            return Err(HeartlineError::validation(
                "Please pick a mood and a priority for your grievance.",
            ));
        }
        if let Some(mood) = mood {
            if !new.kind.moods().contains(&mood) {
                return Err(HeartlineError::validation(format!(
                    "'{}' is not a mood for a {}.",
                    mood,
                    new.kind.label()
                )));
            }
        }

        let partner = self.session.partner()?;

        // Best effort: the partner may not have signed up yet
        let receiver_id = match self.directory.find_by_email(partner).await {
            Ok(Some(profile)) => Some(profile.user_id),
            Ok(None) => {
                warn!("No account for {} yet, sending without receiver id", partner);
                None
            }
            Err(e) => {
                warn!("Receiver lookup for {} failed: {}", partner, e);
                None
            }
        };

        let body = Body::Message(Message {
            title: title.to_string(),
            description: description.to_string(),
            priority: new.priority,
            status: new.kind.initial_status(),
            mood: mood.unwrap_or_default().to_string(),
            message_type: new.kind,
            sender_nickname: self.session.nickname.clone(),
            sender_id: self.session.user_id,
            receiver_id,
            responses: Vec::new(),
        });

        let record = self.repo.append(&self.session.email, partner, body).await?;
        info!("{} sent a {} to {}", self.session.email, new.kind.label(), partner);
        Ok(record)
    }

    /// Add a reply. Either participant may respond.
    pub async fn respond(&self, id: Uuid, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HeartlineError::validation("Please write a response."));
        }

        let (record, message) = self.load_message(id).await?;
        if !record.involves(&self.session.email) {
            return Err(HeartlineError::Forbidden(
                "You can only respond to your own conversations.".into(),
            ));
        }
        if message.status == MessageStatus::Resolved {
            return Err(HeartlineError::InvalidState(
                "This message has already been resolved.".into(),
            ));
        }

        let entry = ResponseEntry {
            id: Uuid::new_v4(),
            message: text.to_string(),
            responder_id: self.session.user_id,
            responder_nickname: self.session.nickname.clone(),
            timestamp: Utc::now(),
        };
        let entry = serde_json::to_value(&entry)
            .map_err(|e| HeartlineError::write(anyhow::Error::from(e)))?;

        self.repo
            .update_fields(
                id,
                Patch::new()
                    .append("responses", entry)
                    .set("status", "responded"),
            )
            .await
    }

    /// Sender only, and only once there is at least one response.
    pub async fn resolve(&self, id: Uuid) -> Result<()> {
        let (record, message) = self.load_message(id).await?;
        if record.sender_email() != self.session.email {
            return Err(HeartlineError::Forbidden(
                "Only the sender can mark this as resolved.".into(),
            ));
        }
        if message.status == MessageStatus::Resolved {
            return Ok(());
        }
        if message.responses.is_empty() {
            return Err(HeartlineError::InvalidState(
                "Wait for a response before resolving.".into(),
            ));
        }

        self.repo
            .update_fields(id, Patch::new().set("status", "resolved"))
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let (record, _) = self.load_message(id).await?;
        if record.sender_email() != self.session.email {
            return Err(HeartlineError::Forbidden(
                "Only the sender can delete this message.".into(),
            ));
        }
        self.repo.delete(id).await?;
        Ok(())
    }

    /// Live view of messages addressed to me.
    pub fn inbox(&self) -> LiveRecords {
        self.repo
            .list_by_field(RECEIVER_EMAIL, &self.session.email)
            .only(DocumentType::Message)
    }

    /// Live view of messages I sent.
    pub fn outbox(&self) -> LiveRecords {
        self.repo
            .list_by_field(SENDER_EMAIL, &self.session.email)
            .only(DocumentType::Message)
    }

    pub async fn received(&self) -> Result<Vec<Record>> {
        self.messages_by(RECEIVER_EMAIL).await
    }

    pub async fn sent(&self) -> Result<Vec<Record>> {
        self.messages_by(SENDER_EMAIL).await
    }

    /// Both directions, newest first.
    pub async fn history(&self) -> Result<Vec<Record>> {
        let (mut all, sent) = tokio::try_join!(self.received(), self.sent())?;
        all.extend(sent);
        all.sort_by(|a, b| {
            b.envelope
                .timestamp
                .cmp(&a.envelope.timestamp)
                .then_with(|| a.id().cmp(&b.id()))
        });
        all.dedup_by_key(|r| r.id());
        Ok(all)
    }

    async fn messages_by(&self, field: &str) -> Result<Vec<Record>> {
        let mut records = self
            .repo
            .snapshot_by_field(field, &self.session.email)
            .await?;
        records.retain(|r| r.body.document_type() == DocumentType::Message);
        Ok(records)
    }

    async fn load_message(&self, id: Uuid) -> Result<(Record, Message)> {
        let record = self
            .repo
            .get(id)
            .await?
            .ok_or(HeartlineError::NotFound("message"))?;
        let message = record
            .as_message()
            .cloned()
            .ok_or(HeartlineError::NotFound("message"))?;
        Ok((record, message))
    }
}

async fn service(state: &AppState, claims: &Claims) -> Result<MessageService> {
    let session = state.session(claims).await?;
    Ok(MessageService::new(
        state.repository(),
        state.directory(),
        session,
    ))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let record = service(&state, &claims).await?.submit(req.into()).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn inbox(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Record>>> {
    Ok(Json(service(&state, &claims).await?.received().await?))
}

pub async fn outbox(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Record>>> {
    Ok(Json(service(&state, &claims).await?.sent().await?))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Record>>> {
    Ok(Json(service(&state, &claims).await?.history().await?))
}

pub async fn respond(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RespondRequest>,
) -> Result<StatusCode> {
    service(&state, &claims).await?.respond(id, &req.message).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode> {
    service(&state, &claims).await?.resolve(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode> {
    service(&state, &claims).await?.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
