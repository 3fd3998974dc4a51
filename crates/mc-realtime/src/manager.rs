use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, HandlerId};
use crate::history::LocalHistory;
use crate::poller::Poller;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use mc_core::{ClientFrame, Event, Outbound, ServerFrame};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMMAND_BUFFER_SIZE: usize = 32;

/// Connectivity as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// WebSocket down, HTTP polling fallback active.
    Polling,
    Error,
}

enum Command {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Handle to the connection driver task.
///
/// All mutation of connection state happens inside the driver; the handle
/// only sends commands and reads the `watch`ed state, so it is cheap to
/// clone into UI code.
#[derive(Clone)]
pub struct RealtimeClient {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    dispatcher: Arc<Dispatcher>,
    history: Arc<Mutex<LocalHistory>>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = Arc::new(Dispatcher::new());
        let history = Arc::new(Mutex::new(LocalHistory::new(config.history_limit)));
        let driver = Driver {
            config,
            cmd_rx,
            state_tx,
            dispatcher: dispatcher.clone(),
            history: history.clone(),
            subscriptions: BTreeSet::new(),
            client_id: None,
            attempt: 0,
            poller: None,
        };
        tokio::spawn(driver.run());
        Self {
            cmd_tx,
            state_rx,
            dispatcher,
            history,
        }
    }

    /// Start connecting. No-op while already connecting or connected.
    pub async fn connect(&self) {
        let _ = self.cmd_tx.send(Command::Connect).await;
    }

    /// Tear everything down: transport, reconnect timer, heartbeat, polling.
    /// Returns once the driver has confirmed; idempotent.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub async fn subscribe(&self, events: Vec<String>) {
        let _ = self.cmd_tx.send(Command::Subscribe(events)).await;
    }

    pub async fn unsubscribe(&self, events: Vec<String>) {
        let _ = self.cmd_tx.send(Command::Unsubscribe(events)).await;
    }

    /// Register a handler for one event type and subscribe to it on the hub
    /// when a connection is up.
    pub fn on(&self, kind: &str, handler: impl Fn(&Event) + Send + Sync + 'static) -> HandlerId {
        let id = self.dispatcher.on(kind, handler);
        let _ = self.cmd_tx.try_send(Command::Subscribe(vec![kind.to_string()]));
        id
    }

    /// Deregister a handler. The hub-side subscription is left in place.
    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        self.dispatcher.off(kind, id)
    }

    pub fn on_any(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> HandlerId {
        self.dispatcher.on_any(handler)
    }

    pub fn off_any(&self, id: HandlerId) -> bool {
        self.dispatcher.off_any(id)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn history(&self) -> Vec<Event> {
        self.history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .snapshot()
    }
}

enum SessionEnd {
    /// Peer closed the connection cleanly; do not reconnect.
    CleanClose,
    /// Transport dropped without a close handshake; reconnect.
    Lost,
    /// Disconnect requested (or the handle was dropped).
    Stopped(Option<oneshot::Sender<()>>),
}

struct Driver {
    config: ClientConfig,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    dispatcher: Arc<Dispatcher>,
    history: Arc<Mutex<LocalHistory>>,
    subscriptions: BTreeSet<String>,
    client_id: Option<String>,
    attempt: u32,
    poller: Option<tokio::task::JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let Some(cmd) = self.cmd_rx.recv().await else {
                break;
            };
            match cmd {
                Command::Connect => self.run_session().await,
                Command::Disconnect(ack) => {
                    self.stop_polling();
                    self.set_state(ConnectionState::Disconnected);
                    let _ = ack.send(());
                }
                Command::Subscribe(events) => {
                    self.subscriptions.extend(events);
                }
                Command::Unsubscribe(events) => {
                    for event in &events {
                        self.subscriptions.remove(event);
                    }
                }
            }
        }
        self.stop_polling();
    }

    /// One connect-and-reconnect cycle. Returns when the session ends for
    /// good: clean peer close, explicit disconnect, or attempts exhausted.
    async fn run_session(&mut self) {
        self.attempt = 0;
        loop {
            // while the poller carries the data path, keep reporting Polling
            // instead of flapping through Connecting/Reconnecting
            if self.poller.is_none() {
                self.set_state(ConnectionState::Connecting);
            }
            match connect_async(self.config.url.as_str()).await {
                Ok((mut ws, _)) => {
                    info!(event = "hub_connect", url = %self.config.url);
                    self.attempt = 0;
                    self.stop_polling();
                    self.set_state(ConnectionState::Connected);
                    match self.drive(&mut ws).await {
                        SessionEnd::CleanClose => {
                            info!(event = "hub_closed");
                            self.set_state(ConnectionState::Disconnected);
                            return;
                        }
                        SessionEnd::Stopped(ack) => {
                            let _ = ws.close(None).await;
                            self.stop_polling();
                            self.set_state(ConnectionState::Disconnected);
                            if let Some(ack) = ack {
                                let _ = ack.send(());
                            }
                            return;
                        }
                        SessionEnd::Lost => {
                            self.attempt += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(event = "hub_connect_error", error = %err, attempt = self.attempt + 1);
                    self.attempt += 1;
                    if self.config.polling_enabled && self.poller.is_none() {
                        self.set_state(ConnectionState::Error);
                        self.start_polling();
                        self.set_state(ConnectionState::Polling);
                    }
                }
            }

            if self.attempt >= self.config.max_reconnect_attempts {
                warn!(event = "reconnect_exhausted", attempts = self.attempt);
                if self.config.polling_enabled {
                    self.start_polling();
                    self.set_state(ConnectionState::Polling);
                } else {
                    self.set_state(ConnectionState::Error);
                }
                return;
            }

            if self.poller.is_none() {
                self.set_state(ConnectionState::Reconnecting);
            }
            let delay = self.config.backoff_delay(self.attempt);
            debug!(event = "reconnect_wait", delay_ms = delay.as_millis() as u64);
            // commands arriving mid-wait must not shorten the delay, so the
            // same sleep is polled again after each one
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(Command::Disconnect(ack)) => {
                            self.stop_polling();
                            self.set_state(ConnectionState::Disconnected);
                            let _ = ack.send(());
                            return;
                        }
                        Some(Command::Connect) => {}
                        Some(Command::Subscribe(events)) => {
                            self.subscriptions.extend(events);
                        }
                        Some(Command::Unsubscribe(events)) => {
                            for event in &events {
                                self.subscriptions.remove(event);
                            }
                        }
                        None => {
                            self.stop_polling();
                            return;
                        }
                    },
                }
            }
        }
    }

    /// Run one open connection until it ends.
    async fn drive(&mut self, ws: &mut WsStream) -> SessionEnd {
        if !self.subscriptions.is_empty() {
            let events = self.subscriptions.iter().cloned().collect();
            if !send_frame(ws, &ClientFrame::Subscribe { events }).await {
                return SessionEnd::Lost;
            }
        }
        let history_frame = ClientFrame::GetHistory {
            limit: Some(self.config.history_request),
        };
        if !send_frame(ws, &history_frame).await {
            return SessionEnd::Lost;
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(ws, &text).await,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => return SessionEnd::CleanClose,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "read_error", error = %err);
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                },
                _ = heartbeat.tick() => {
                    if !send_frame(ws, &ClientFrame::Ping).await {
                        return SessionEnd::Lost;
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect) => {
                        debug!(event = "already_connected");
                    }
                    Some(Command::Disconnect(ack)) => return SessionEnd::Stopped(Some(ack)),
                    Some(Command::Subscribe(events)) => {
                        self.subscriptions.extend(events.iter().cloned());
                        let _ = send_frame(ws, &ClientFrame::Subscribe { events }).await;
                    }
                    Some(Command::Unsubscribe(events)) => {
                        for event in &events {
                            self.subscriptions.remove(event);
                        }
                        let _ = send_frame(ws, &ClientFrame::Unsubscribe { events }).await;
                    }
                    None => return SessionEnd::Stopped(None),
                },
            }
        }
    }

    async fn handle_frame(&mut self, ws: &mut WsStream, text: &str) {
        let outbound = match Outbound::parse(text) {
            Ok(outbound) => outbound,
            Err(err) => {
                warn!(event = "frame_invalid", error = %err);
                return;
            }
        };
        match outbound {
            Outbound::Frame(ServerFrame::Connected { data }) => {
                info!(event = "hub_welcome", client_id = %data.client_id);
                self.client_id = Some(data.client_id);
            }
            Outbound::Frame(ServerFrame::Subscribed { data }) => {
                debug!(event = "subscribed", count = data.events.len());
            }
            Outbound::Frame(ServerFrame::Pong { .. }) => {
                debug!(event = "pong");
            }
            Outbound::Frame(ServerFrame::Ping) => {
                let pong = ClientFrame::Pong {
                    time: Some(Utc::now().timestamp_millis()),
                };
                let _ = send_frame(ws, &pong).await;
            }
            Outbound::Frame(ServerFrame::History { data }) => {
                debug!(event = "history", count = data.len());
                self.history
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .merge(data);
            }
            Outbound::Frame(ServerFrame::Error { data }) => {
                warn!(event = "hub_error", message = %data.message);
            }
            Outbound::Event(event) => {
                self.history
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(event.clone());
                self.dispatcher.dispatch(&event);
            }
        }
    }

    fn start_polling(&mut self) {
        if self.poller.is_some() {
            return;
        }
        info!(event = "polling_start", base = %self.config.http_base);
        self.poller = Some(Poller::spawn(
            self.config.http_base.clone(),
            self.config.polling_interval,
            self.dispatcher.clone(),
        ));
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            info!(event = "polling_stop");
            poller.abort();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

async fn send_frame(ws: &mut WsStream, frame: &ClientFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => ws.send(Message::Text(text)).await.is_ok(),
        Err(err) => {
            warn!(event = "encode_error", error = %err);
            false
        }
    }
}
