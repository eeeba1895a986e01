//! Generic document-store contract shared by the store, the live-query
//! gateway and the repository. Everything here is schemaless; the typed view
//! lives in [`crate::models`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Collection holding messages and the clear-all protocol documents.
pub const MESSAGES: &str = "grievances";

/// Collection holding daily gratitude notes.
pub const GRATITUDE: &str = "gratitude";

/// A stored document: store-assigned identity plus free-form top-level fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Newest first, id as tie-breaker so snapshots are stable.
pub fn sort_newest_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
}

/// A single top-level field predicate. Query filters are ANDed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FilterOp::Ne,
            value: value.into(),
        }
    }

    /// Field names are restricted to plain identifiers.
    pub fn is_valid_field(field: &str) -> bool {
        !field.is_empty()
            && field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// `Ne` matches documents where the field is missing.
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.field(&self.field);
        match self.op {
            FilterOp::Eq => actual == Some(&self.value),
            FilterOp::Ne => actual != Some(&self.value),
        }
    }
}

/// Partial update: `set` merges top-level fields, `append` unions values into
/// list fields without clobbering existing entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub set: Map<String, Value>,
    pub append: Vec<(String, Value)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into());
        self
    }

    pub fn append(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.append.push((field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.append.is_empty()
    }

    /// Apply to a document body in place. Used by the store implementation.
    pub fn apply(&self, fields: &mut Map<String, Value>) {
        for (key, value) in &self.set {
            fields.insert(key.clone(), value.clone());
        }

        for (key, value) in &self.append {
            let entry = fields
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(items) = entry {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> Document {
        Document {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            fields: fields.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn ne_matches_missing_field() {
        let d = doc(json!({ "senderEmail": "a@x.com" }));
        assert!(Filter::ne("type", "broken_heart_request").matches(&d));
        assert!(!Filter::eq("type", "message").matches(&d));
        assert!(Filter::eq("senderEmail", "a@x.com").matches(&d));
    }

    #[test]
    fn append_is_a_union() {
        let mut fields = json!({ "responses": [{ "id": "1" }] })
            .as_object()
            .cloned()
            .unwrap();

        Patch::new()
            .append("responses", json!({ "id": "1" }))
            .append("responses", json!({ "id": "2" }))
            .set("status", "responded")
            .apply(&mut fields);

        assert_eq!(fields["responses"].as_array().unwrap().len(), 2);
        assert_eq!(fields["status"], "responded");
    }

    #[test]
    fn rejects_odd_field_names() {
        assert!(Filter::is_valid_field("receiverEmail"));
        assert!(!Filter::is_valid_field("a.b"));
        assert!(!Filter::is_valid_field("x') OR 1=1 --"));
        assert!(!Filter::is_valid_field(""));
    }

    #[test]
    fn sorts_newest_first() {
        let mut older = doc(json!({}));
        older.timestamp = Utc::now() - chrono::Duration::minutes(5);
        let newer = doc(json!({}));
        let mut docs = vec![older.clone(), newer.clone()];
        sort_newest_first(&mut docs);
        assert_eq!(docs[0].id, newer.id);
        assert_eq!(docs[1].id, older.id);
    }
}
