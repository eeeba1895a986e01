/// Database row types. These map directly to SQLite rows.
/// Distinct from heartline-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub user_id: String,
    pub email: String,
    pub nickname: String,
    pub partner_email: String,
    /// Joined from the partner's own profile, if they have signed up.
    pub partner_nickname: Option<String>,
    pub user_icon: String,
    pub love_language: Option<String>,
    pub updated_at: String,
}

/// Fields written when a profile is created or edited.
pub struct NewProfile<'a> {
    pub nickname: &'a str,
    pub partner_email: &'a str,
    pub user_icon: &'a str,
    pub love_language: Option<&'a str>,
}
