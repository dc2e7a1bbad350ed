use async_trait::async_trait;
use surveyor_types::{ChannelKind, ConnectionState};

/// What reconciliation needs from the stream layer.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    fn connection_state(&self, channel: ChannelKind) -> ConnectionState;
    async fn subscribe(&self, channel: ChannelKind);
    async fn unsubscribe(&self, channel: ChannelKind);
}
