use std::time::Duration;

/// Knobs for the connection manager. Defaults mirror the hub's server-side
/// defaults (30s heartbeat, 100-event history).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the hub.
    pub url: String,
    /// Base URL for the HTTP polling fallback.
    pub http_base: String,
    pub reconnect_base: Duration,
    pub reconnect_decay: f64,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub polling_enabled: bool,
    pub polling_interval: Duration,
    /// Cap of the local rolling event history.
    pub history_limit: usize,
    /// How many events to request from the hub after (re)connecting.
    pub history_request: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: resolve_hub_url(),
            http_base: resolve_http_base(),
            reconnect_base: Duration::from_millis(1000),
            reconnect_decay: 1.5,
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            polling_enabled: true,
            polling_interval: Duration::from_secs(30),
            history_limit: 100,
            history_request: 50,
        }
    }
}

impl ClientConfig {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `base * decay^(attempt-1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.reconnect_decay.powi(attempt.saturating_sub(1) as i32);
        let millis = self.reconnect_base.as_millis() as f64 * exp;
        let capped = millis.min(self.reconnect_cap.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

pub fn resolve_hub_url() -> String {
    if let Ok(value) = std::env::var("MC_HUB_URL") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    "ws://127.0.0.1:3002/api/ws".to_string()
}

pub fn resolve_http_base() -> String {
    if let Ok(value) = std::env::var("MC_HUB_HTTP") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    "http://127.0.0.1:3002".to_string()
}
