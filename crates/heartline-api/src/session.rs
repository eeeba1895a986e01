use uuid::Uuid;

use heartline_types::api::Claims;
use heartline_types::models::Profile;

use crate::directory::Directory;
use crate::error::{HeartlineError, Result};

/// The signed-in user and their directory profile, passed explicitly to
/// every service that acts on their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub nickname: String,
    /// Empty until the user names a partner.
    pub partner_email: String,
    pub partner_nickname: Option<String>,
    pub user_icon: String,
}

impl Session {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            user_id: profile.user_id,
            email: profile.email.clone(),
            nickname: profile.nickname.clone(),
            partner_email: profile.partner_email.clone(),
            partner_nickname: profile.partner_nickname.clone(),
            user_icon: profile.user_icon.clone(),
        }
    }

    /// Resolve the session for a validated token.
    pub async fn load(directory: &Directory, claims: &Claims) -> Result<Self> {
        let profile = directory
            .profile(claims.sub)
            .await?
            .ok_or(HeartlineError::Unauthorized)?;
        Ok(Self::from_profile(&profile))
    }

    pub fn partner(&self) -> Result<&str> {
        if self.partner_email.is_empty() {
            return Err(HeartlineError::validation(
                "Add your partner's email to your profile first.",
            ));
        }
        Ok(&self.partner_email)
    }
}
