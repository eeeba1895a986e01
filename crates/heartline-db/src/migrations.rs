use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (documents, users, profiles)");
        conn.execute_batch(
            "
            CREATE TABLE documents (
                id          TEXT PRIMARY KEY,
                collection  TEXT NOT NULL,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_documents_collection
                ON documents(collection, created_at);

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE profiles (
                user_id         TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                email           TEXT NOT NULL UNIQUE,
                nickname        TEXT NOT NULL,
                partner_email   TEXT NOT NULL,
                user_icon       TEXT NOT NULL,
                love_language   TEXT,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_profiles_partner
                ON profiles(partner_email);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (participant indexes)");
        conn.execute_batch(
            "
            CREATE INDEX idx_documents_sender
                ON documents(collection, json_extract(body, '$.senderEmail'));

            CREATE INDEX idx_documents_receiver
                ON documents(collection, json_extract(body, '$.receiverEmail'));

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
