use serde::{Deserialize, Serialize};

use crate::channel::{ChannelKind, ChannelMessage};
use crate::device::{ConnectionState, DeviceMode};
use crate::notification::Notification;
use crate::route::Route;

/// Every cross-component signal in the console. Consumers match exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleEvent {
    ConnectionOpened {
        channel: ChannelKind,
    },
    ConnectionClosed {
        channel: ChannelKind,
        clean: bool,
    },
    ConnectionStateChanged {
        channel: ChannelKind,
        state: ConnectionState,
    },
    MessageReceived(ChannelMessage),
    ModeChanged {
        mode: DeviceMode,
    },
    Authenticated,
    ReconciliationStarted {
        mode: DeviceMode,
    },
    ReconciliationCompleted {
        mode: DeviceMode,
    },
    ReconciliationCancelled {
        mode: DeviceMode,
    },
    Navigate {
        route: Route,
    },
    Notification(Notification),
}

impl ConsoleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsoleEvent::ConnectionOpened { .. } => "connection.opened",
            ConsoleEvent::ConnectionClosed { .. } => "connection.closed",
            ConsoleEvent::ConnectionStateChanged { .. } => "connection.state",
            ConsoleEvent::MessageReceived(_) => "message.received",
            ConsoleEvent::ModeChanged { .. } => "mode.changed",
            ConsoleEvent::Authenticated => "auth.succeeded",
            ConsoleEvent::ReconciliationStarted { .. } => "reconcile.started",
            ConsoleEvent::ReconciliationCompleted { .. } => "reconcile.completed",
            ConsoleEvent::ReconciliationCancelled { .. } => "reconcile.cancelled",
            ConsoleEvent::Navigate { .. } => "navigate",
            ConsoleEvent::Notification(_) => "notification",
        }
    }

    /// Everything except routing/point-cloud/autocapture stream traffic.
    /// Control events must reach their consumers even when stream data
    /// floods the bus.
    pub fn is_control(&self) -> bool {
        match self {
            ConsoleEvent::MessageReceived(msg) => msg.channel == ChannelKind::System,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_data_stream_messages_are_bulk_traffic() {
        let data = ConsoleEvent::MessageReceived(ChannelMessage {
            channel: ChannelKind::PointCloud,
            payload: json!({"points": []}),
        });
        let system = ConsoleEvent::MessageReceived(ChannelMessage {
            channel: ChannelKind::System,
            payload: json!({"type": "mode", "mode": "active"}),
        });
        assert!(!data.is_control());
        assert!(system.is_control());
        assert!(ConsoleEvent::ConnectionClosed {
            channel: ChannelKind::PointCloud,
            clean: false
        }
        .is_control());
    }
}
