use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use heartline_db::models::NewProfile;
use heartline_db::{Database, DocumentStore};
use heartline_gateway::Dispatcher;
use heartline_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use heartline_types::models::user_icon;

use crate::directory::{Directory, normalize_email, validate_email};
use crate::error::{HeartlineError, Result};
use crate::protocol::{ClearAllProtocol, ClearConfirmation};
use crate::repository::MessageRepository;
use crate::session::Session;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub store: Arc<dyn DocumentStore>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    /// Requesters who proceeded past an acceptance and have not yet
    /// confirmed or cancelled, keyed by user id.
    pub pending_clears: Mutex<HashMap<Uuid, ClearConfirmation>>,
}

impl AppStateInner {
    /// State backed by one database that is both directory and document store.
    pub fn new(db: Arc<Database>, jwt_secret: String) -> Self {
        let store: Arc<dyn DocumentStore> = db.clone();
        Self::with_store(db, store, jwt_secret)
    }

    pub fn with_store(db: Arc<Database>, store: Arc<dyn DocumentStore>, jwt_secret: String) -> Self {
        Self {
            db,
            store,
            dispatcher: Dispatcher::new(),
            jwt_secret,
            pending_clears: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> Directory {
        Directory::new(self.db.clone())
    }

    pub fn repository(&self) -> MessageRepository {
        MessageRepository::new(self.store.clone(), self.dispatcher.clone())
    }

    pub async fn session(&self, claims: &Claims) -> Result<Session> {
        Session::load(&self.directory(), claims).await
    }

    pub async fn protocol(&self, claims: &Claims) -> Result<ClearAllProtocol> {
        let session = self.session(claims).await?;
        Ok(ClearAllProtocol::new(self.repository(), session))
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let email = normalize_email(&req.email);
    let partner_email = normalize_email(&req.partner_email);
    let nickname = req.nickname.trim().to_string();

    validate_email(&email)?;
    validate_email(&partner_email)?;
    if req.password.len() < 8 {
        return Err(HeartlineError::validation(
            "Password must be at least 8 characters.",
        ));
    }
    if nickname.is_empty() {
        return Err(HeartlineError::validation("Please choose a nickname."));
    }
    if email == partner_email {
        return Err(HeartlineError::validation(
            "Your partner's email must be different from yours.",
        ));
    }

    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    let db = state.db.clone();

    let created = tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        if db.get_user_by_email(&email)?.is_some() {
            return Ok(false);
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        db.create_account(
            &uid,
            &email,
            &password_hash,
            &NewProfile {
                nickname: &nickname,
                partner_email: &partner_email,
                user_icon: user_icon(&uid),
                love_language: None,
            },
        )?;
        Ok(true)
    })
    .await
    .map_err(|e| HeartlineError::write(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
    .map_err(HeartlineError::write)?;

    if !created {
        return Err(HeartlineError::Conflict(
            "An account with that email already exists.".into(),
        ));
    }

    let email = normalize_email(&req.email);
    let token = create_token(&state.jwt_secret, user_id, &email).map_err(|e| {
        error!("Failed to sign token: {}", e);
        HeartlineError::Unauthorized
    })?;

    info!("Registered {}", email);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let email = normalize_email(&req.email);
    let db = state.db.clone();

    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&email))
        .await
        .map_err(|e| HeartlineError::unavailable(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(HeartlineError::unavailable)?
        .ok_or(HeartlineError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("Stored hash for {} is unreadable: {}", user.email, e);
        HeartlineError::Unauthorized
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| HeartlineError::Unauthorized)?;

    let user_id: Uuid = user.id.parse().map_err(|_| HeartlineError::Unauthorized)?;

    let token = create_token(&state.jwt_secret, user_id, &user.email).map_err(|e| {
        error!("Failed to sign token: {}", e);
        HeartlineError::Unauthorized
    })?;

    Ok(Json(LoginResponse {
        user_id,
        email: user.email,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
