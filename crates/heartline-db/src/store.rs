use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};
use uuid::Uuid;

use heartline_types::documents::{Document, Filter, FilterOp, Patch};

use crate::Database;
use crate::queries::OptionalExt;

/// Insert / update / delete / query over schemaless documents.
///
/// Calls block; async callers run them on `spawn_blocking`. Live
/// subscriptions are layered on top by the gateway, which re-runs
/// [`DocumentStore::query`] whenever a collection changes.
pub trait DocumentStore: Send + Sync {
    /// Persist a new document. The store assigns `id` and `timestamp`;
    /// any such keys inside `fields` are dropped.
    fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<Document>;

    fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>>;

    /// Returns `Ok(false)` when the document does not exist.
    fn update(&self, collection: &str, id: Uuid, patch: &Patch) -> Result<bool>;

    /// Returns `Ok(false)` when there was nothing to delete.
    fn delete(&self, collection: &str, id: Uuid) -> Result<bool>;

    /// All documents matching every filter, newest first.
    fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>>;
}

impl DocumentStore for Database {
    fn insert(&self, collection: &str, mut fields: Map<String, Value>) -> Result<Document> {
        strip_reserved(&mut fields);

        let doc = Document {
            id: Uuid::new_v4(),
            // Stored at millisecond precision; keep the returned copy identical
            timestamp: Utc::now().trunc_subsecs(3),
            fields,
        };
        let body = serde_json::to_string(&doc.fields)?;

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO documents (id, collection, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    doc.id.to_string(),
                    collection,
                    body,
                    format_timestamp(&doc.timestamp),
                ],
            )?;
            Ok(())
        })?;

        Ok(doc)
    }

    fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>> {
        self.with_conn(|conn| query_one(conn, collection, id))
    }

    fn update(&self, collection: &str, id: Uuid, patch: &Patch) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let Some(mut doc) = query_one(&tx, collection, id)? else {
                return Ok(false);
            };

            patch.apply(&mut doc.fields);
            strip_reserved(&mut doc.fields);

            tx.execute(
                "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id.to_string(), serde_json::to_string(&doc.fields)?],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    fn delete(&self, collection: &str, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id.to_string()],
            )?;
            Ok(deleted > 0)
        })
    }

    fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>> {
        let mut sql =
            String::from("SELECT id, body, created_at FROM documents WHERE collection = ?1");
        let mut params: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];

        for filter in filters {
            if !Filter::is_valid_field(&filter.field) {
                bail!("Invalid filter field '{}'", filter.field);
            }

            params.push(SqlValue::Text(format!("$.{}", filter.field)));
            let path_idx = params.len();
            params.push(to_sql_value(&filter.value));
            let value_idx = params.len();

            let op = match filter.op {
                FilterOp::Eq => "=",
                FilterOp::Ne => "IS NOT",
            };
            sql.push_str(&format!(
                " AND json_extract(body, ?{}) {} ?{}",
                path_idx, op, value_idx
            ));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, body, created_at)| decode_row(&id, &body, &created_at))
                .collect()
        })
    }
}

fn query_one(conn: &Connection, collection: &str, id: Uuid) -> Result<Option<Document>> {
    let row = conn
        .query_row(
            "SELECT id, body, created_at FROM documents WHERE collection = ?1 AND id = ?2",
            rusqlite::params![collection, id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, body, created_at)| decode_row(&id, &body, &created_at))
        .transpose()
}

fn decode_row(id: &str, body: &str, created_at: &str) -> Result<Document> {
    let id: Uuid = id
        .parse()
        .map_err(|e| anyhow!("Corrupt document id '{}': {}", id, e))?;
    let timestamp = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| anyhow!("Corrupt created_at '{}' on document '{}': {}", created_at, id, e))?
        .with_timezone(&Utc);
    let fields: Map<String, Value> = serde_json::from_str(body)?;

    Ok(Document {
        id,
        timestamp,
        fields,
    })
}

/// Millisecond RFC 3339 in UTC sorts lexicographically in time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn strip_reserved(fields: &mut Map<String, Value>) {
    fields.remove("id");
    fields.remove("timestamp");
}

/// Map a JSON scalar onto what `json_extract` yields for it.
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
