//! Shared wire protocol for the Mission Control real-time feed.
//!
//! Both the hub server and the dashboard client speak JSON frames over a
//! persistent WebSocket; the types here define that contract in one place.

pub mod event;
pub mod filter;
pub mod frame;

pub use event::{Event, EventKind};
pub use filter::SubscriptionFilter;
pub use frame::{
    ClientFrame, ConnectedData, ErrorData, Inbound, Outbound, PongData, ProtocolError,
    ServerFrame, SubscribedData,
};
