//! Stream settings derived from the console configuration.

use std::time::Duration;

use surveyor_core::ConsoleConfig;
use surveyor_types::ChannelKind;

#[derive(Debug, Clone)]
pub struct ChannelsConfig {
    /// Root of the streaming endpoints, e.g. `ws://10.0.0.2:8080`.
    pub stream_base_url: String,
    /// Sent as `Authorization: Bearer <token>`.
    pub api_token: Option<String>,
    pub reconnect_delay: Duration,
}

impl ChannelsConfig {
    pub fn from_console(config: &ConsoleConfig) -> Self {
        Self {
            stream_base_url: config.server.stream_base_url(),
            api_token: config
                .server
                .api_token
                .clone()
                .filter(|t| !t.trim().is_empty()),
            reconnect_delay: config.channels.reconnect_delay(),
        }
    }

    pub fn endpoint(&self, channel: ChannelKind) -> String {
        format!(
            "{}{}",
            self.stream_base_url.trim_end_matches('/'),
            channel.stream_path()
        )
    }
}
