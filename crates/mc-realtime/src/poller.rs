use crate::dispatch::Dispatcher;
use mc_core::{Event, EventKind};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// REST endpoints queried while the WebSocket is down. The results reach the
/// application as synthetic `poll:update` events through the dispatcher.
const ENDPOINTS: [(&str, &str); 3] = [
    ("agents", "/api/agents"),
    ("tasks", "/api/tasks"),
    ("events", "/api/system/events?limit=10"),
];

pub struct Poller {
    base_url: String,
    interval: Duration,
    http: reqwest::Client,
    dispatcher: Arc<Dispatcher>,
}

impl Poller {
    /// Spawn the polling loop: one immediate pass, then one per interval.
    /// Aborted by the connection driver when the transport comes back.
    pub fn spawn(
        base_url: String,
        interval: Duration,
        dispatcher: Arc<Dispatcher>,
    ) -> tokio::task::JoinHandle<()> {
        let poller = Self {
            base_url,
            interval,
            http: reqwest::Client::new(),
            dispatcher,
        };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                poller.poll_once().await;
            }
        })
    }

    async fn poll_once(&self) {
        for (source, path) in ENDPOINTS {
            match self.fetch(path).await {
                Ok(data) => {
                    debug!(event = "poll_ok", source = source);
                    self.dispatcher.dispatch(&Event::new(
                        EventKind::Custom("poll:update".to_string()),
                        json!({ "source": source, "data": data }),
                    ));
                }
                Err(err) => {
                    warn!(event = "poll_error", source = source, error = %err);
                }
            }
        }
    }

    async fn fetch(&self, path: &str) -> Result<Value, reqwest::Error> {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
