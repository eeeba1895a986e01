use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use heartline_db::DocumentStore;
use heartline_types::documents::{self, Filter, MESSAGES};
use heartline_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time allowed between upgrade and a valid Identify command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Fields a client may open a live query on. The value must be its own email.
const WATCHABLE_FIELDS: &[&str] = &["senderEmail", "receiverEmail"];

/// Handle a single WebSocket connection: Identify handshake, then live
/// queries streamed as snapshots until the socket closes.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    store: Arc<dyn DocumentStore>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let identified = wait_for_identify(&mut receiver, &jwt_secret, IDENTIFY_TIMEOUT).await;
    let (user_id, email) = match identified {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", email, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        email: email.clone(),
    };
    let Ok(text) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward snapshots -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = out_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let email_recv = email.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut watches = WatchSet::new(dispatcher, store, email_recv.clone(), out_tx);

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => watches.handle(cmd),
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            email_recv,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        // Dropping `watches` tears down every live query of this connection
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from gateway", email, user_id);
}

/// A snapshot forwarder. It owns its subscription, so aborting it (on drop,
/// replace or unwatch) tears the live query down too.
struct WatchTask(JoinHandle<()>);

impl Drop for WatchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Decide whether `email` may watch `field == value`.
pub fn watch_allowed(email: &str, field: &str, value: &str) -> Result<(), &'static str> {
    if !WATCHABLE_FIELDS.contains(&field) {
        return Err("only senderEmail and receiverEmail can be watched");
    }
    if !value.eq_ignore_ascii_case(email) {
        return Err("you can only watch your own messages");
    }
    Ok(())
}

/// The live queries of one connection, keyed by client-chosen watch id.
/// Dropping the set stops all of them.
pub struct WatchSet {
    dispatcher: Dispatcher,
    store: Arc<dyn DocumentStore>,
    email: String,
    out_tx: mpsc::UnboundedSender<GatewayEvent>,
    watches: HashMap<String, WatchTask>,
}

impl WatchSet {
    pub fn new(
        dispatcher: Dispatcher,
        store: Arc<dyn DocumentStore>,
        email: String,
        out_tx: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            dispatcher,
            store,
            email,
            out_tx,
            watches: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn handle(&mut self, cmd: GatewayCommand) {
        match cmd {
            GatewayCommand::Identify { .. } => {} // Already handled

            GatewayCommand::Watch {
                watch_id,
                field,
                value,
            } => {
                let email = self.email.as_str();
                if let Err(reason) = watch_allowed(email, &field, &value) {
                    warn!("{} watch '{}' rejected: {}", email, watch_id, reason);
                    let _ = self.out_tx.send(GatewayEvent::WatchRejected {
                        watch_id,
                        reason: reason.to_string(),
                    });
                    return;
                }

                info!("{} watching {} == {} as '{}'", email, field, value, watch_id);
                let mut subscription = self.dispatcher.watch(
                    self.store.clone(),
                    MESSAGES,
                    vec![Filter::eq(&field, email)],
                );

                let out = self.out_tx.clone();
                let id = watch_id.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(mut docs) = subscription.next().await {
                        documents::sort_newest_first(&mut docs);
                        let event = GatewayEvent::Snapshot {
                            watch_id: id.clone(),
                            documents: docs,
                        };
                        if out.send(event).is_err() {
                            break;
                        }
                    }
                    subscription.unsubscribe().await;
                });

                // A reused watch id replaces (and drops) the previous forwarder
                self.watches.insert(watch_id, WatchTask(forwarder));
            }

            GatewayCommand::Unwatch { watch_id } => {
                if self.watches.remove(&watch_id).is_some() {
                    info!("{} stopped watching '{}'", self.email, watch_id);
                }
            }
        }
    }
}

/// Wait up to `limit` for a valid Identify. `None` on timeout, a bad token or
/// a closed socket.
async fn wait_for_identify<S, E>(
    receiver: &mut S,
    jwt_secret: &str,
    limit: Duration,
) -> Option<(Uuid, String)>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    use heartline_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(limit, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.email));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}
