use crate::Database;
use crate::models::{NewProfile, ProfileRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const PROFILE_SELECT: &str = "
    SELECT p.user_id, p.email, p.nickname, p.partner_email, q.nickname,
           p.user_icon, p.love_language, p.updated_at
    FROM profiles p
    LEFT JOIN profiles q ON q.email = p.partner_email";

impl Database {
    // -- Users --

    /// Create the account and its directory profile in one transaction.
    pub fn create_account(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        profile: &NewProfile<'_>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, password) VALUES (?1, ?2, ?3)",
                (id, email, password_hash),
            )?;
            tx.execute(
                "INSERT INTO profiles (user_id, email, nickname, partner_email, user_icon, love_language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    email,
                    profile.nickname,
                    profile.partner_email,
                    profile.user_icon,
                    profile.love_language,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Profiles --

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "p.user_id", user_id))
    }

    pub fn find_profile_by_email(&self, email: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "p.email", email))
    }

    /// Returns false if no profile exists for `user_id`.
    pub fn update_profile(
        &self,
        user_id: &str,
        nickname: &str,
        partner_email: &str,
        love_language: Option<&str>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE profiles
                 SET nickname = ?2, partner_email = ?3, love_language = ?4,
                     updated_at = datetime('now')
                 WHERE user_id = ?1",
                rusqlite::params![user_id, nickname, partner_email, love_language],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is one of two literals above, never user input
    let sql = format!("SELECT id, email, password, created_at FROM users WHERE {} = ?1", column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_profile(conn: &Connection, column: &str, value: &str) -> Result<Option<ProfileRow>> {
    let sql = format!("{} WHERE {} = ?1", PROFILE_SELECT, column);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], map_profile).optional()?;
    Ok(row)
}

fn map_profile(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        user_id: row.get(0)?,
        email: row.get(1)?,
        nickname: row.get(2)?,
        partner_email: row.get(3)?,
        partner_nickname: row.get(4)?,
        user_icon: row.get(5)?,
        love_language: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile<'a>(nickname: &'a str, partner: &'a str) -> NewProfile<'a> {
        NewProfile {
            nickname,
            partner_email: partner,
            user_icon: "💜",
            love_language: None,
        }
    }

    #[test]
    fn partner_nickname_is_joined_once_partner_signs_up() {
        let db = Database::open_in_memory().unwrap();
        db.create_account("u-a", "a@x.com", "hash", &profile("Ari", "b@x.com"))
            .unwrap();

        let a = db.get_profile("u-a").unwrap().unwrap();
        assert_eq!(a.partner_nickname, None);

        db.create_account("u-b", "b@x.com", "hash", &profile("Bo", "a@x.com"))
            .unwrap();

        let a = db.get_profile("u-a").unwrap().unwrap();
        assert_eq!(a.partner_nickname.as_deref(), Some("Bo"));

        let b = db.find_profile_by_email("b@x.com").unwrap().unwrap();
        assert_eq!(b.user_id, "u-b");
    }

    #[test]
    fn duplicate_email_is_rejected_without_orphan_profile() {
        let db = Database::open_in_memory().unwrap();
        db.create_account("u-a", "a@x.com", "hash", &profile("Ari", "b@x.com"))
            .unwrap();
        assert!(
            db.create_account("u-c", "a@x.com", "hash", &profile("Cy", "b@x.com"))
                .is_err()
        );
        assert!(db.get_profile("u-c").unwrap().is_none());
        assert!(db.get_user_by_id("u-c").unwrap().is_none());
    }

    #[test]
    fn update_profile_reports_missing_user() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.update_profile("nobody", "N", "m@x.com", None).unwrap());

        db.create_account("u-a", "a@x.com", "hash", &profile("Ari", "b@x.com"))
            .unwrap();
        assert!(
            db.update_profile("u-a", "Ariel", "c@x.com", Some("quality_time"))
                .unwrap()
        );

        let a = db.get_profile("u-a").unwrap().unwrap();
        assert_eq!(a.nickname, "Ariel");
        assert_eq!(a.partner_email, "c@x.com");
        assert_eq!(a.love_language.as_deref(), Some("quality_time"));
        assert_eq!(db.get_user_by_email("a@x.com").unwrap().unwrap().id, "u-a");
    }
}
