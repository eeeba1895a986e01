use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::documents::Document;

/// Internal notification that a collection changed. Live queries re-run on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub collection: String,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, email: String },

    /// Full recomputed result set of a watch, newest first
    Snapshot {
        watch_id: String,
        documents: Vec<Document>,
    },

    /// A watch command was refused
    WatchRejected { watch_id: String, reason: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Open a live query on the messages collection: `field == value`.
    Watch {
        watch_id: String,
        field: String,
        value: String,
    },

    /// Tear down a live query
    Unwatch { watch_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_adjacent_tagging() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"Watch","data":{"watch_id":"inbox","field":"receiverEmail","value":"a@x.com"}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, GatewayCommand::Watch { ref field, .. } if field == "receiverEmail"));
    }
}
