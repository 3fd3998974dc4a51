use crate::history::HistoryBuffer;
use crate::registry::{
    next_connection_id, Connection, ConnectionRegistry, CAPACITY_CLOSE_CODE,
    CAPACITY_CLOSE_REASON,
};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use mc_core::{
    ClientFrame, ConnectedData, ErrorData, Event, EventKind, Inbound, PongData, ServerFrame,
    SubscribedData,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// Buffer of the custom-message channel handed to producers.
const CUSTOM_BUFFER_SIZE: usize = 256;

/// History events returned by `getHistory` when no limit is given.
const DEFAULT_HISTORY_REPLY: usize = 50;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub heartbeat_interval: Duration,
    pub max_connections: usize,
    pub history_capacity: usize,
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_connections: 100,
            history_capacity: 100,
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// An inbound frame the hub does not recognize, handed off verbatim for
/// producer-specific handling.
#[derive(Debug, Clone)]
pub struct CustomMessage {
    pub connection_id: String,
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubMetrics {
    pub clients: ClientMetrics,
    pub messages: MessageMetrics,
    pub uptime: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetrics {
    pub total: usize,
    pub max: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetrics {
    pub history_size: usize,
    pub max_history: usize,
}

/// Server-side broadcast hub.
///
/// Owns the connection registry and the history buffer. Producers call
/// [`BroadcastHub::publish`] (or one of the typed helpers); the hub fans the
/// event out to every connection whose subscription filter matches. Delivery
/// is best effort per connection: a failed send never aborts the loop and
/// never surfaces to the publisher.
pub struct BroadcastHub {
    config: HubConfig,
    registry: ConnectionRegistry,
    history: RwLock<HistoryBuffer>,
    custom_tx: broadcast::Sender<CustomMessage>,
    started_at: Instant,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        let (custom_tx, _) = broadcast::channel(CUSTOM_BUFFER_SIZE);
        Self {
            registry: ConnectionRegistry::new(config.max_connections),
            history: RwLock::new(HistoryBuffer::new(config.history_capacity)),
            custom_tx,
            started_at: Instant::now(),
            config,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Receiver for frames the hub does not recognize.
    pub fn subscribe_custom(&self) -> broadcast::Receiver<CustomMessage> {
        self.custom_tx.subscribe()
    }

    /// Append to history, then deliver to every matching connection.
    /// Returns the number of connections actually reached.
    pub async fn publish(&self, event: Event) -> usize {
        self.publish_excluding(event, None).await
    }

    async fn publish_excluding(&self, event: Event, exclude: Option<&str>) -> usize {
        {
            let mut history = self.history.write().await;
            history.push(event.clone());
        }
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "encode_error", error = %err);
                return 0;
            }
        };
        let mut delivered = 0;
        for conn in self.registry.snapshot().await {
            if exclude == Some(conn.id.as_str()) {
                continue;
            }
            if !conn.matches(&event.kind).await {
                continue;
            }
            if conn.send_text(text.clone()).await {
                delivered += 1;
            } else {
                // writer gone means the socket is dying; the reader loop
                // handles the eviction
                warn!(event = "send_error", conn_id = %conn.id);
            }
        }
        delivered
    }

    /// Route one inbound client frame.
    pub async fn handle_inbound(&self, conn: &Arc<Connection>, text: &str) {
        conn.touch().await;
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(event = "frame_invalid", conn_id = %conn.id, error = %err);
                self.send_frame(
                    conn,
                    &ServerFrame::Error {
                        data: ErrorData {
                            message: "invalid JSON message".to_string(),
                        },
                    },
                )
                .await;
                return;
            }
        };
        match inbound {
            Inbound::Frame(ClientFrame::Subscribe { events }) => {
                let full_set = conn.subscribe(events).await;
                info!(event = "subscribed", conn_id = %conn.id, count = full_set.len());
                self.send_frame(
                    conn,
                    &ServerFrame::Subscribed {
                        data: SubscribedData { events: full_set },
                    },
                )
                .await;
            }
            Inbound::Frame(ClientFrame::Unsubscribe { events }) => {
                conn.unsubscribe(&events).await;
            }
            Inbound::Frame(ClientFrame::Ping) => {
                self.send_frame(
                    conn,
                    &ServerFrame::Pong {
                        data: PongData {
                            time: Utc::now().timestamp_millis(),
                        },
                    },
                )
                .await;
            }
            Inbound::Frame(ClientFrame::Pong { .. }) => {
                // liveness already refreshed above
            }
            Inbound::Frame(ClientFrame::GetHistory { limit }) => {
                let events = {
                    let history = self.history.read().await;
                    history.recent(limit.unwrap_or(DEFAULT_HISTORY_REPLY))
                };
                self.send_frame(conn, &ServerFrame::History { data: events })
                    .await;
            }
            Inbound::Custom { kind, payload } => {
                let _ = self.custom_tx.send(CustomMessage {
                    connection_id: conn.id.clone(),
                    kind,
                    payload,
                });
            }
        }
    }

    async fn send_frame(&self, conn: &Connection, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => conn.send_text(text).await,
            Err(err) => {
                warn!(event = "encode_error", error = %err);
                false
            }
        }
    }

    /// Register a transport-level connection. Returns the connection plus the
    /// receiver its writer task must drain, or `None` at capacity.
    pub async fn attach(
        self: &Arc<Self>,
        remote: SocketAddr,
        user_agent: Option<String>,
    ) -> Option<(Arc<Connection>, mpsc::Receiver<Message>)> {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        let conn = Arc::new(Connection::new(
            next_connection_id(),
            remote,
            user_agent,
            tx,
        ));
        if !self.registry.add(conn.clone()).await {
            warn!(event = "capacity_reached", remote = %remote, max = self.registry.capacity());
            return None;
        }
        info!(event = "client_connected", conn_id = %conn.id, remote = %conn.remote);

        // welcome and viewer-count notification go out off the accept path
        let hub = self.clone();
        let welcome_conn = conn.clone();
        tokio::spawn(async move {
            let frame = ServerFrame::Connected {
                data: ConnectedData {
                    client_id: welcome_conn.id.clone(),
                    server_time: Utc::now(),
                    available_events: EventKind::known_types()
                        .iter()
                        .map(|kind| kind.to_string())
                        .collect(),
                },
            };
            hub.send_frame(&welcome_conn, &frame).await;
        });
        let hub = self.clone();
        let exclude = conn.id.clone();
        tokio::spawn(async move {
            let count = hub.registry.len().await;
            hub.publish_excluding(
                Event::new(EventKind::ClientConnected, json!({ "clientCount": count })),
                Some(&exclude),
            )
            .await;
        });
        Some((conn, rx))
    }

    /// Deregister a connection and tell the remaining viewers.
    pub async fn detach(&self, conn: &Connection, reason: &str) {
        if self.registry.remove(&conn.id).await.is_none() {
            return;
        }
        info!(event = "client_disconnected", conn_id = %conn.id, reason = reason);
        let count = self.registry.len().await;
        self.publish_excluding(
            Event::new(
                EventKind::ClientDisconnected,
                json!({ "clientCount": count }),
            ),
            None,
        )
        .await;
    }

    /// Drive one accepted WebSocket until it closes.
    pub async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        remote: SocketAddr,
        user_agent: Option<String>,
    ) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let Some((conn, mut rx)) = self.attach(remote, user_agent).await else {
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: CAPACITY_CLOSE_CODE,
                    reason: CAPACITY_CLOSE_REASON.into(),
                })))
                .await;
            return;
        };

        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let send = ws_sender.send(msg);
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    return;
                }
            }
        });

        let mut close_reason = "disconnect";
        loop {
            let result = tokio::select! {
                result = ws_receiver.next() => match result {
                    Some(result) => result,
                    None => break,
                },
                _ = conn.wait_terminated() => {
                    close_reason = "terminated";
                    break;
                }
            };
            let msg = match result {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %conn.id, error = %err);
                    close_reason = "read_error";
                    break;
                }
            };
            match msg {
                Message::Text(text) => self.handle_inbound(&conn, &text).await,
                Message::Binary(bytes) => {
                    if let Ok(text) = String::from_utf8(bytes) {
                        self.handle_inbound(&conn, &text).await;
                    }
                }
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %conn.id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => conn.touch().await,
            }
        }

        self.detach(&conn, close_reason).await;
        drop(conn);
        let _ = write_task.await;
    }

    /// Spawn the heartbeat task: evict silent peers, ping the rest.
    pub fn start_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                hub.heartbeat_sweep().await;
            }
        })
    }

    /// One heartbeat tick. A peer silent for more than two intervals is a
    /// dead-peer eviction, so missing a single tick never evicts anyone.
    pub async fn heartbeat_sweep(&self) {
        let timeout = self.config.heartbeat_interval * 2;
        let now = Instant::now();
        for conn in self.registry.snapshot().await {
            if now.duration_since(conn.last_seen().await) > timeout {
                warn!(event = "heartbeat_evict", conn_id = %conn.id);
                conn.send_close(1001, "heartbeat timeout").await;
                self.detach(&conn, "heartbeat_timeout").await;
                // a dead peer never answers the close; drop the socket task
                conn.terminate();
            } else {
                self.send_frame(&conn, &ServerFrame::Ping).await;
            }
        }
    }

    /// Close every live connection with a normal close. Run on process
    /// shutdown so clients classify it as clean and do not reconnect.
    pub async fn shutdown(&self) {
        for conn in self.registry.snapshot().await {
            conn.send_close(1000, "server shutting down").await;
        }
    }

    pub async fn metrics(&self) -> HubMetrics {
        let history = self.history.read().await;
        HubMetrics {
            clients: ClientMetrics {
                total: self.registry.len().await,
                max: self.registry.capacity(),
            },
            messages: MessageMetrics {
                history_size: history.len(),
                max_history: history.capacity(),
            },
            uptime: self.uptime().as_secs(),
        }
    }

    // ---- typed producer helpers -------------------------------------------
    //
    // The inbound contract for the event-source adapters (file watcher, task
    // queue, token tracker, agent poller). Each builds the payload its
    // dashboard consumers expect and publishes it.

    pub async fn publish_agent_status(
        &self,
        agent_id: &str,
        status: &str,
        details: Value,
    ) -> usize {
        let mut data = json!({ "agentId": agent_id, "status": status });
        merge_into(&mut data, details);
        self.publish(Event::new(EventKind::AgentStatusChange, data))
            .await
    }

    pub async fn publish_lead_added(&self, lead: Value) -> usize {
        self.publish(Event::new(EventKind::LeadAdded, json!({ "lead": lead })))
            .await
    }

    pub async fn publish_lead_updated(&self, lead_id: &str, updates: Value) -> usize {
        self.publish(Event::new(
            EventKind::LeadUpdated,
            json!({ "leadId": lead_id, "updates": updates }),
        ))
        .await
    }

    pub async fn publish_lead_scored(&self, lead_id: &str, score: f64, factors: Value) -> usize {
        self.publish(Event::new(
            EventKind::LeadScored,
            json!({ "leadId": lead_id, "score": score, "factors": factors }),
        ))
        .await
    }

    pub async fn publish_task_created(&self, task: Value) -> usize {
        self.publish(Event::new(EventKind::TaskCreated, json!({ "task": task })))
            .await
    }

    pub async fn publish_task_updated(&self, task_id: &str, updates: Value) -> usize {
        self.publish(Event::new(
            EventKind::TaskUpdated,
            json!({ "taskId": task_id, "updates": updates }),
        ))
        .await
    }

    pub async fn publish_task_completed(&self, task_id: &str, result: Value) -> usize {
        self.publish(Event::new(
            EventKind::TaskCompleted,
            json!({ "taskId": task_id, "result": result }),
        ))
        .await
    }

    pub async fn publish_task_assigned(
        &self,
        task_id: &str,
        agent_id: &str,
        assigned_by: &str,
    ) -> usize {
        self.publish(Event::new(
            EventKind::TaskAssigned,
            json!({ "taskId": task_id, "agentId": agent_id, "assignedBy": assigned_by }),
        ))
        .await
    }

    pub async fn publish_token_usage(
        &self,
        agent: &str,
        tokens: u64,
        cost: f64,
        session: Value,
    ) -> usize {
        self.publish(Event::new(
            EventKind::TokenUsage,
            json!({ "agent": agent, "tokens": tokens, "cost": cost, "session": session }),
        ))
        .await
    }

    pub async fn publish_token_threshold(
        &self,
        agent: &str,
        current_cost: f64,
        threshold: f64,
        percent_used: f64,
    ) -> usize {
        let alert = if percent_used >= 100.0 {
            "critical"
        } else if percent_used >= 80.0 {
            "warning"
        } else {
            "info"
        };
        self.publish(Event::new(
            EventKind::TokenThreshold,
            json!({
                "agent": agent,
                "currentCost": current_cost,
                "threshold": threshold,
                "percentUsed": percent_used,
                "alert": alert,
            }),
        ))
        .await
    }

    pub async fn publish_system_alert(&self, level: &str, message: &str, details: Value) -> usize {
        self.publish(Event::new(
            EventKind::SystemAlert,
            json!({ "level": level, "message": message, "details": details }),
        ))
        .await
    }

    pub async fn publish_system_status(&self, status: &str, details: Value) -> usize {
        self.publish(Event::new(
            EventKind::SystemStatus,
            json!({ "status": status, "details": details }),
        ))
        .await
    }

    pub async fn publish_file_change(&self, action: &str, path: &str, details: Value) -> usize {
        let mut data = json!({ "action": action, "path": path });
        merge_into(&mut data, details);
        self.publish(Event::new(EventKind::FileChange, data)).await
    }
}

fn merge_into(data: &mut Value, extra: Value) {
    if let (Some(target), Some(source)) = (data.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
}
