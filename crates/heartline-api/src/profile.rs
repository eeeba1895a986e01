use axum::{Extension, Json, extract::State};

use heartline_types::api::{Claims, MeResponse, UpdateProfileRequest};
use heartline_types::models::Profile;

use crate::auth::AppState;
use crate::directory::ProfileUpdate;
use crate::error::{HeartlineError, Result};

/// The signed-in user and their profile.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MeResponse>> {
    let profile = state
        .directory()
        .profile(claims.sub)
        .await?
        .ok_or(HeartlineError::Unauthorized)?;

    Ok(Json(MeResponse {
        user_id: claims.sub,
        email: profile.email.clone(),
        profile,
    }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>> {
    let profile = state
        .directory()
        .update(
            claims.sub,
            ProfileUpdate {
                nickname: req.nickname,
                partner_email: req.partner_email,
                love_language: req.love_language,
            },
        )
        .await?;
    Ok(Json(profile))
}

/// The partner's profile, once they have signed up.
pub async fn partner(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Profile>> {
    let session = state.session(&claims).await?;
    let partner = state
        .directory()
        .find_by_email(session.partner()?)
        .await?
        .ok_or(HeartlineError::NotFound("partner account"))?;
    Ok(Json(partner))
}
