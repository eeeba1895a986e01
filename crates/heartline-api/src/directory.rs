use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use heartline_db::Database;
use heartline_db::models::ProfileRow;
use heartline_types::models::{Profile, love_language};

use crate::error::{HeartlineError, Result};

/// Profile edits accepted from the owner.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub nickname: String,
    pub partner_email: String,
    pub love_language: Option<String>,
}

/// User directory: profiles keyed by user id, queryable by email.
#[derive(Clone)]
pub struct Directory {
    db: Arc<Database>,
}

impl Directory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        let db = self.db.clone();
        let row = tokio::task::spawn_blocking(move || db.get_profile(&user_id.to_string()))
            .await
            .map_err(|e| HeartlineError::unavailable(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
            .map_err(HeartlineError::unavailable)?;
        Ok(row.map(into_profile))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let db = self.db.clone();
        let email = normalize_email(email);
        let row = tokio::task::spawn_blocking(move || db.find_profile_by_email(&email))
            .await
            .map_err(|e| HeartlineError::unavailable(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
            .map_err(HeartlineError::unavailable)?;
        Ok(row.map(into_profile))
    }

    pub async fn update(&self, user_id: Uuid, update: ProfileUpdate) -> Result<Profile> {
        let nickname = update.nickname.trim().to_string();
        let partner_email = normalize_email(&update.partner_email);
        if nickname.is_empty() {
            return Err(HeartlineError::validation("Please choose a nickname."));
        }
        validate_email(&partner_email)?;
        if let Some(id) = update.love_language.as_deref() {
            if love_language(id).is_none() {
                return Err(HeartlineError::validation("Unknown love language."));
            }
        }

        let db = self.db.clone();
        let uid = user_id.to_string();
        let updated = tokio::task::spawn_blocking(move || {
            db.update_profile(
                &uid,
                &nickname,
                &partner_email,
                update.love_language.as_deref(),
            )
        })
        .await
        .map_err(|e| HeartlineError::write(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(HeartlineError::write)?;

        if !updated {
            return Err(HeartlineError::NotFound("profile"));
        }

        self.profile(user_id)
            .await?
            .ok_or(HeartlineError::NotFound("profile"))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(HeartlineError::validation("Please enter a valid email address."))
    }
}

fn into_profile(row: ProfileRow) -> Profile {
    Profile {
        user_id: row.user_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt user_id '{}' on profile: {}", row.user_id, e);
            Uuid::default()
        }),
        updated_at: parse_sqlite_time(&row.updated_at).unwrap_or_else(|| {
            warn!("Corrupt updated_at '{}' on profile '{}'", row.updated_at, row.user_id);
            DateTime::default()
        }),
        email: row.email,
        nickname: row.nickname,
        partner_email: row.partner_email,
        partner_nickname: row.partner_nickname,
        user_icon: row.user_icon,
        love_language: row.love_language,
    }
}

/// SQLite `datetime('now')` is "YYYY-MM-DD HH:MM:SS" without timezone.
fn parse_sqlite_time(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized_and_checked() {
        assert_eq!(normalize_email("  Bo@X.com "), "bo@x.com");
        assert!(validate_email("bo@x.com").is_ok());
        assert!(validate_email("bo@x").is_err());
        assert!(validate_email("@x.com").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn parses_sqlite_timestamps() {
        let ts = parse_sqlite_time("2026-02-14 09:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-02-14T09:30:00+00:00");
        assert!(parse_sqlite_time("yesterday").is_none());
    }

    #[tokio::test]
    async fn update_rejects_unknown_love_language() {
        let directory = Directory::new(Arc::new(Database::open_in_memory().unwrap()));
        let err = directory
            .update(
                Uuid::new_v4(),
                ProfileUpdate {
                    nickname: "Ari".into(),
                    partner_email: "b@x.com".into(),
                    love_language: Some("telepathy".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HeartlineError::Validation(_)));
    }
}
