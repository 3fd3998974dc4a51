//! Broadcast hub for the Mission Control dashboard.
//!
//! Producers publish domain events into the hub; the hub fans them out over
//! WebSocket to every connected dashboard whose subscription filter matches,
//! keeps a short replay buffer for (re)connecting clients, and evicts dead
//! peers on a heartbeat.

pub mod history;
pub mod hub;
pub mod registry;
pub mod server;
