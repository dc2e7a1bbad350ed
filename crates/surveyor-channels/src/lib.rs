//! Streaming channels for the Surveyor console.
//!
//! Each [`ChannelKind`](surveyor_types::ChannelKind) gets one
//! [`ReconnectSupervisor`], which drives a [`ChannelSupervisor`] over a
//! [`Transport`]. Inbound messages and connection changes are published on
//! the console event bus.

pub mod config;
pub mod hub;
pub mod reconnect;
pub mod supervisor;
pub mod traits;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::ChannelsConfig;
pub use hub::ChannelHub;
pub use reconnect::{ReconnectContext, ReconnectSupervisor, SubscriptionState};
pub use supervisor::{ChannelSupervisor, Lifecycle, ReadEnd};
pub use traits::{ConnectError, Connection, Frame, Transport, NORMAL_CLOSE};
pub use websocket::WebSocketTransport;
