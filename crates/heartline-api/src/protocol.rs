//! Two-party agreement to delete every message between a pair of partners.
//!
//! No state field is stored anywhere. Where a pair stands is read off which
//! protocol documents currently exist in the messages collection:
//!
//! ```text
//! Idle ──request──▶ Requested ──partner answers──▶ Responded
//!  ▲                                                 │
//!  │◀───────────── dismiss(Close) / declined ────────┤
//!  │                                                 │ dismiss(Proceed), accepted
//!  │◀──── cancel ──── ClearConfirmation ◀────────────┘
//!  │◀──── confirm (bulk delete) ──┘
//! ```

use tracing::{debug, info, warn};
use uuid::Uuid;

use heartline_types::documents::Filter;
use heartline_types::models::{
    Body, BrokenHeartRequest, DocumentType, MessageStatus, PartnerResponse, Record,
};

use crate::error::{HeartlineError, Result};
use crate::repository::{MessageRepository, RECEIVER_EMAIL, SENDER_EMAIL, TYPE};
use crate::session::Session;

pub const REQUEST_TITLE: &str = "Clear All Request";

/// Where the session's pair currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum PairState {
    Idle,
    /// I asked; waiting on my partner.
    Requested(Record),
    /// My partner asked; waiting on me.
    AwaitingMyAnswer(Record),
    /// My partner answered my request.
    Responded(Record),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    Accept,
    Decline,
}

impl AnswerKind {
    pub fn requires_reason(self) -> bool {
        matches!(self, Self::Decline)
    }
}

/// First half of answering a request. Holds the validated request so the
/// second half only has to collect the text.
#[derive(Debug, Clone)]
pub struct ResponseDraft {
    request: Record,
    kind: AnswerKind,
}

impl ResponseDraft {
    pub fn kind(&self) -> AnswerKind {
        self.kind
    }

    pub fn request(&self) -> &Record {
        &self.request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismissal {
    /// Acknowledge and forget the answer.
    Close,
    /// Go on to the final confirmation. Only valid for an acceptance.
    Proceed,
}

/// Proof that the requester saw an acceptance and chose to proceed. Spent by
/// [`ClearAllProtocol::confirm`] or [`ClearAllProtocol::cancel`].
#[must_use = "a pending confirmation must be confirmed or cancelled"]
#[derive(Debug)]
pub struct ClearConfirmation {
    requester: String,
    partner: String,
}

impl ClearConfirmation {
    pub fn partner(&self) -> &str {
        &self.partner
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearReport {
    pub deleted: usize,
}

pub struct ClearAllProtocol {
    repo: MessageRepository,
    session: Session,
}

impl ClearAllProtocol {
    pub fn new(repo: MessageRepository, session: Session) -> Self {
        Self { repo, session }
    }

    pub async fn state(&self) -> Result<PairState> {
        let Ok(partner) = self.session.partner() else {
            return Ok(PairState::Idle);
        };
        let me = self.session.email.as_str();

        if let Some(response) = self
            .between(partner, me, DocumentType::PartnerResponse)
            .await?
            .into_iter()
            .next()
        {
            return Ok(PairState::Responded(response));
        }

        if let Some(request) = self
            .between(partner, me, DocumentType::BrokenHeartRequest)
            .await?
            .into_iter()
            .next()
        {
            return Ok(PairState::AwaitingMyAnswer(request));
        }

        if let Some(request) = self
            .between(me, partner, DocumentType::BrokenHeartRequest)
            .await?
            .into_iter()
            .next()
        {
            return Ok(PairState::Requested(request));
        }

        Ok(PairState::Idle)
    }

    /// Ask the partner to agree to clearing everything.
    pub async fn request(&self, reason: &str) -> Result<Record> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(HeartlineError::validation(
                "Please share why you want to clear everything.",
            ));
        }
        let partner = self.session.partner()?;
        let me = self.session.email.as_str();

        if !self
            .between(me, partner, DocumentType::BrokenHeartRequest)
            .await?
            .is_empty()
        {
            return Err(HeartlineError::Conflict(
                "You already have a clear-all request waiting for an answer.".into(),
            ));
        }

        let body = Body::BrokenHeartRequest(BrokenHeartRequest {
            title: REQUEST_TITLE.into(),
            description: reason.to_string(),
            status: MessageStatus::Pending,
            sender_nickname: self.session.nickname.clone(),
        });
        let record = self.repo.append(me, partner, body).await?;

        info!("{} requested clear-all with {}", me, partner);
        Ok(record)
    }

    /// Check that `request_id` is a request addressed to me and start an answer.
    pub async fn begin_respond(&self, request_id: Uuid, kind: AnswerKind) -> Result<ResponseDraft> {
        let request = self
            .repo
            .get(request_id)
            .await?
            .ok_or(HeartlineError::NotFound("request"))?;

        if request.as_request().is_none() {
            return Err(HeartlineError::InvalidState(
                "That is not a clear-all request.".into(),
            ));
        }
        if request.receiver_email() != self.session.email {
            return Err(HeartlineError::Forbidden(
                "Only the person asked can answer this request.".into(),
            ));
        }
        if request.sender_email() != self.session.partner_email {
            return Err(HeartlineError::Forbidden(
                "Only your partner's requests can be answered.".into(),
            ));
        }

        Ok(ResponseDraft { request, kind })
    }

    /// Write the answer and remove the request. Safe to retry: an answer
    /// already written for this request is reused.
    pub async fn submit_respond(&self, draft: ResponseDraft, text: &str) -> Result<Record> {
        let text = text.trim();
        if draft.kind.requires_reason() && text.is_empty() {
            return Err(HeartlineError::validation(
                "Please explain why you're declining.",
            ));
        }

        let me = self.session.email.as_str();
        let requester = draft.request.sender_email();
        let request_id = draft.request.id();

        let existing = self
            .repo
            .snapshot(vec![
                Filter::eq(SENDER_EMAIL, me),
                Filter::eq(RECEIVER_EMAIL, requester),
                Filter::eq(TYPE, DocumentType::PartnerResponse.as_str()),
                Filter::eq("requestId", request_id.to_string()),
            ])
            .await?
            .into_iter()
            .next();

        let response = match existing {
            Some(response) => {
                let accepted = response.as_partner_response().is_some_and(|r| r.accepted);
                if accepted != (draft.kind == AnswerKind::Accept) {
                    return Err(HeartlineError::InvalidState(
                        "You have already answered this request differently.".into(),
                    ));
                }
                debug!("Answer to {} already written, reusing it", request_id);
                response
            }
            None => {
                let body = Body::PartnerResponse(PartnerResponse {
                    accepted: draft.kind == AnswerKind::Accept,
                    reason: text.to_string(),
                    partner_nickname: self.session.nickname.clone(),
                    request_id,
                });
                self.repo.append(me, requester, body).await?
            }
        };

        // Not atomic with the append above; a reader may briefly see both
        self.repo.delete(request_id).await?;

        info!(
            "{} answered clear-all request from {}: {:?}",
            me, requester, draft.kind
        );
        Ok(response)
    }

    /// Requester acknowledges the partner's answer.
    pub async fn dismiss(
        &self,
        response_id: Uuid,
        dismissal: Dismissal,
    ) -> Result<Option<ClearConfirmation>> {
        let record = match self.repo.get(response_id).await? {
            Some(record) => record,
            None if dismissal == Dismissal::Close => return Ok(None),
            None => return Err(HeartlineError::NotFound("response")),
        };

        let Some(response) = record.as_partner_response() else {
            return Err(HeartlineError::InvalidState(
                "That is not an answer to a clear-all request.".into(),
            ));
        };
        if record.receiver_email() != self.session.email {
            return Err(HeartlineError::Forbidden(
                "Only the requester can dismiss this answer.".into(),
            ));
        }
        // The clear covers the answering side too, so it must be my partner
        if record.sender_email() != self.session.partner_email {
            return Err(HeartlineError::Forbidden(
                "This answer did not come from your partner.".into(),
            ));
        }

        match dismissal {
            Dismissal::Close => {
                if let Err(e) = self.repo.delete(response_id).await {
                    warn!("Ignoring failure to delete answer {}: {}", response_id, e);
                }
                Ok(None)
            }
            Dismissal::Proceed => {
                if !response.accepted {
                    return Err(HeartlineError::InvalidState(
                        "Your partner declined, so there is nothing to proceed with.".into(),
                    ));
                }
                self.repo.delete(response_id).await?;
                Ok(Some(ClearConfirmation {
                    requester: self.session.email.clone(),
                    partner: record.sender_email().to_string(),
                }))
            }
        }
    }

    /// Delete every document either partner sent or received. Whatever is
    /// deleted before a failure stays deleted.
    pub async fn confirm(&self, confirmation: ClearConfirmation) -> Result<ClearReport> {
        if confirmation.requester != self.session.email {
            return Err(HeartlineError::Forbidden(
                "This confirmation belongs to someone else.".into(),
            ));
        }

        let deleted = self
            .repo
            .purge(&[confirmation.requester.as_str(), confirmation.partner.as_str()])
            .await
            .into_result()?;

        info!(
            "Cleared {} documents between {} and {}",
            deleted, confirmation.requester, confirmation.partner
        );
        Ok(ClearReport { deleted })
    }

    pub fn cancel(&self, confirmation: ClearConfirmation) {
        debug!(
            "{} cancelled clear-all with {}",
            confirmation.requester, confirmation.partner
        );
    }

    async fn between(&self, sender: &str, receiver: &str, kind: DocumentType) -> Result<Vec<Record>> {
        self.repo
            .snapshot(vec![
                Filter::eq(SENDER_EMAIL, sender),
                Filter::eq(RECEIVER_EMAIL, receiver),
                Filter::eq(TYPE, kind.as_str()),
            ])
            .await
    }
}
