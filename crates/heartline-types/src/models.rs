use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::documents::Document;

// -- Message enums --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Responded,
    Resolved,
}

/// Drives display only, plus the initial status and the mood menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Grievance,
    Compliment,
    Memory,
    Feeling,
}

pub const GRIEVANCE_MOODS: &[&str] = &[
    "frustrated",
    "sad",
    "confused",
    "angry",
    "disappointed",
    "hopeful",
];

pub const WARM_MOODS: &[&str] = &["happy", "excited", "grateful", "loved", "peaceful", "nostalgic"];

pub const GRATITUDE_MOODS: &[&str] = &["grateful", "love", "appreciative", "blessed", "thankful"];

impl MessageKind {
    pub fn initial_status(self) -> MessageStatus {
        match self {
            Self::Grievance => MessageStatus::Pending,
            _ => MessageStatus::Sent,
        }
    }

    pub fn moods(self) -> &'static [&'static str] {
        match self {
            Self::Grievance => GRIEVANCE_MOODS,
            _ => WARM_MOODS,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Grievance => "Grievance",
            Self::Compliment => "Compliment",
            Self::Memory => "Good Memory",
            Self::Feeling => "Feeling",
        }
    }
}

// -- Document variants --

/// The `type` tag distinguishing documents that share the messages collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Message,
    BrokenHeartRequest,
    PartnerResponse,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::BrokenHeartRequest => "broken_heart_request",
            Self::PartnerResponse => "partner_response",
        }
    }

    /// A missing tag means a plain message.
    pub fn from_tag(tag: Option<&str>) -> Option<Self> {
        match tag {
            None | Some("message") => Some(Self::Message),
            Some("broken_heart_request") => Some(Self::BrokenHeartRequest),
            Some("partner_response") => Some(Self::PartnerResponse),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEntry {
    pub id: Uuid,
    pub message: String,
    pub responder_id: Uuid,
    pub responder_nickname: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub status: MessageStatus,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub sender_nickname: String,
    pub sender_id: Uuid,
    /// Resolved best-effort at submit time; stays `None` when the partner has
    /// no account yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<Uuid>,
    #[serde(default)]
    pub responses: Vec<ResponseEntry>,
}

/// A clear-all proposal. `description` carries the requester's reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokenHeartRequest {
    pub title: String,
    pub description: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub sender_nickname: String,
}

/// The partner's answer. Sent by the partner back to the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerResponse {
    pub accepted: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub partner_nickname: String,
    /// Id of the request this answers.
    pub request_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Message(Message),
    BrokenHeartRequest(BrokenHeartRequest),
    PartnerResponse(PartnerResponse),
}

impl Body {
    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::Message(_) => DocumentType::Message,
            Self::BrokenHeartRequest(_) => DocumentType::BrokenHeartRequest,
            Self::PartnerResponse(_) => DocumentType::PartnerResponse,
        }
    }

    /// Flatten into store fields, including the routing envelope.
    pub fn to_fields(&self, sender_email: &str, receiver_email: &str) -> Map<String, Value> {
        let value = match self {
            Self::Message(m) => serde_json::to_value(m),
            Self::BrokenHeartRequest(r) => serde_json::to_value(r),
            Self::PartnerResponse(r) => serde_json::to_value(r),
        };

        let mut fields = match value {
            Ok(Value::Object(map)) => map,
            // Plain structs with derived Serialize always produce objects.
            _ => Map::new(),
        };

        fields.insert("type".into(), self.document_type().as_str().into());
        fields.insert("senderEmail".into(), sender_email.into());
        fields.insert("receiverEmail".into(), receiver_email.into());
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sender_email: String,
    pub receiver_email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown document type '{0}'")]
    UnknownType(String),
    #[error("document is missing '{0}'")]
    MissingField(&'static str),
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A typed document from the messages collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Document", try_from = "Document")]
pub struct Record {
    pub envelope: Envelope,
    pub body: Body,
}

impl Record {
    pub fn id(&self) -> Uuid {
        self.envelope.id
    }

    pub fn sender_email(&self) -> &str {
        &self.envelope.sender_email
    }

    pub fn receiver_email(&self) -> &str {
        &self.envelope.receiver_email
    }

    pub fn as_message(&self) -> Option<&Message> {
        match &self.body {
            Body::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_request(&self) -> Option<&BrokenHeartRequest> {
        match &self.body {
            Body::BrokenHeartRequest(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_partner_response(&self) -> Option<&PartnerResponse> {
        match &self.body {
            Body::PartnerResponse(r) => Some(r),
            _ => None,
        }
    }

    pub fn involves(&self, email: &str) -> bool {
        self.sender_email() == email || self.receiver_email() == email
    }
}

impl TryFrom<Document> for Record {
    type Error = DecodeError;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        let tag = doc.str_field("type").map(str::to_string);
        let kind = DocumentType::from_tag(tag.as_deref())
            .ok_or_else(|| DecodeError::UnknownType(tag.clone().unwrap_or_default()))?;

        let sender_email = doc
            .str_field("senderEmail")
            .ok_or(DecodeError::MissingField("senderEmail"))?
            .to_string();
        let receiver_email = doc
            .str_field("receiverEmail")
            .ok_or(DecodeError::MissingField("receiverEmail"))?
            .to_string();

        let value = Value::Object(doc.fields);
        let body = match kind {
            DocumentType::Message => Body::Message(serde_json::from_value(value)?),
            DocumentType::BrokenHeartRequest => {
                Body::BrokenHeartRequest(serde_json::from_value(value)?)
            }
            DocumentType::PartnerResponse => Body::PartnerResponse(serde_json::from_value(value)?),
        };

        Ok(Self {
            envelope: Envelope {
                id: doc.id,
                timestamp: doc.timestamp,
                sender_email,
                receiver_email,
            },
            body,
        })
    }
}

impl From<Record> for Document {
    fn from(record: Record) -> Self {
        let fields = record
            .body
            .to_fields(&record.envelope.sender_email, &record.envelope.receiver_email);
        Document {
            id: record.envelope.id,
            timestamp: record.envelope.timestamp,
            fields,
        }
    }
}

// -- Gratitude --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GratitudeNote {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub sender_email: String,
    pub receiver_email: String,
    pub sender_nickname: String,
    pub mood: String,
}

// -- Directory --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: Uuid,
    pub email: String,
    pub nickname: String,
    pub partner_email: String,
    pub partner_nickname: Option<String>,
    pub user_icon: String,
    pub love_language: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoveLanguage {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const LOVE_LANGUAGES: &[LoveLanguage] = &[
    LoveLanguage {
        id: "words_of_affirmation",
        name: "Words of Affirmation",
        description: "Verbal and written expressions of love",
    },
    LoveLanguage {
        id: "quality_time",
        name: "Quality Time",
        description: "Focused, uninterrupted time together",
    },
    LoveLanguage {
        id: "physical_touch",
        name: "Physical Touch",
        description: "Appropriate physical contact and closeness",
    },
    LoveLanguage {
        id: "acts_of_service",
        name: "Acts of Service",
        description: "Helpful actions and thoughtful gestures",
    },
    LoveLanguage {
        id: "receiving_gifts",
        name: "Receiving Gifts",
        description: "Thoughtful presents and tokens of love",
    },
];

pub fn love_language(id: &str) -> Option<&'static LoveLanguage> {
    LOVE_LANGUAGES.iter().find(|l| l.id == id)
}

const HEARTS: &[&str] = &["❤️", "🧡", "💛", "💚", "💙", "💜", "🖤", "🤍", "🤎"];

/// Deterministic heart icon for a user id.
pub fn user_icon(user_id: &str) -> &'static str {
    let sum: u64 = user_id.chars().map(|c| c as u64).sum();
    HEARTS[(sum % HEARTS.len() as u64) as usize]
}
