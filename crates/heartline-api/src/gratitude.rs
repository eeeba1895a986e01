use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Map, Value};
use tracing::{info, warn};

use heartline_db::DocumentStore;
use heartline_gateway::Dispatcher;
use heartline_types::api::{Claims, SendGratitudeRequest};
use heartline_types::documents::{Document, Filter, GRATITUDE};
use heartline_types::models::{GRATITUDE_MOODS, GratitudeNote};

use crate::auth::AppState;
use crate::error::{HeartlineError, Result};
use crate::repository::{RECEIVER_EMAIL, run_blocking};
use crate::session::Session;

/// Notes shown on the gratitude screen.
pub const RECENT_LIMIT: usize = 5;

const DEFAULT_MOOD: &str = "grateful";

pub struct GratitudeService {
    store: Arc<dyn DocumentStore>,
    dispatcher: Dispatcher,
    session: Session,
}

impl GratitudeService {
    pub fn new(store: Arc<dyn DocumentStore>, dispatcher: Dispatcher, session: Session) -> Self {
        Self {
            store,
            dispatcher,
            session,
        }
    }

    pub async fn send(&self, message: &str, mood: Option<&str>) -> Result<GratitudeNote> {
        let message = message.trim();
        if message.is_empty() {
            return Err(HeartlineError::validation(
                "Share what you appreciate about your partner.",
            ));
        }
        let mood = mood.map(str::trim).filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MOOD);
        if !GRATITUDE_MOODS.contains(&mood) {
            return Err(HeartlineError::validation(format!("'{}' is not a gratitude mood.", mood)));
        }
        let partner = self.session.partner()?;

        let mut fields = Map::new();
        fields.insert("message".into(), message.into());
        fields.insert("senderEmail".into(), self.session.email.as_str().into());
        fields.insert("receiverEmail".into(), partner.into());
        fields.insert("senderNickname".into(), self.session.nickname.as_str().into());
        fields.insert("mood".into(), mood.into());

        let doc = run_blocking(&self.store, move |store| store.insert(GRATITUDE, fields))
            .await
            .map_err(HeartlineError::write)?;
        self.dispatcher.notify(GRATITUDE);

        info!("{} sent gratitude to {}", self.session.email, partner);
        decode(doc).ok_or_else(|| HeartlineError::Write("stored note did not decode".into()))
    }

    /// The newest notes addressed to me.
    pub async fn recent(&self) -> Result<Vec<GratitudeNote>> {
        let filters = vec![Filter::eq(RECEIVER_EMAIL, self.session.email.as_str())];
        let mut docs = run_blocking(&self.store, move |store| store.query(GRATITUDE, &filters))
            .await
            .map_err(HeartlineError::unavailable)?;

        heartline_types::documents::sort_newest_first(&mut docs);
        Ok(docs.into_iter().filter_map(decode).take(RECENT_LIMIT).collect())
    }
}

fn decode(doc: Document) -> Option<GratitudeNote> {
    let id = doc.id;
    let mut fields = doc.fields;
    fields.insert("id".into(), Value::String(id.to_string()));
    fields.insert(
        "timestamp".into(),
        serde_json::to_value(doc.timestamp).unwrap_or(Value::Null),
    );

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| warn!("Skipping gratitude note {}: {}", id, e))
        .ok()
}

async fn service(state: &AppState, claims: &Claims) -> Result<GratitudeService> {
    let session = state.session(claims).await?;
    Ok(GratitudeService::new(
        state.store.clone(),
        state.dispatcher.clone(),
        session,
    ))
}

pub async fn send_gratitude(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendGratitudeRequest>,
) -> Result<impl IntoResponse> {
    let note = service(&state, &claims)
        .await?
        .send(&req.message, req.mood.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn recent_gratitude(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<GratitudeNote>>> {
    Ok(Json(service(&state, &claims).await?.recent().await?))
}
