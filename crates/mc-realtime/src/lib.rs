//! Client-side connection manager for the Mission Control hub.
//!
//! [`RealtimeClient`] owns a single driver task that runs the connection
//! state machine: connect, re-subscribe, heartbeat, exponential-backoff
//! reconnect, and an HTTP polling fallback when the WebSocket cannot be
//! established. Consumers register event handlers through the dispatch
//! layer and observe connectivity through a `watch` channel.

pub mod config;
pub mod dispatch;
pub mod history;
pub mod manager;
pub mod poller;

pub use config::ClientConfig;
pub use dispatch::{Dispatcher, HandlerId};
pub use history::LocalHistory;
pub use manager::{ConnectionState, RealtimeClient};
