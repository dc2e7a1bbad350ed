//! Owns one streaming connection for one channel.

use std::sync::Arc;

use surveyor_core::EventBus;
use surveyor_types::{ChannelKind, ChannelMessage, ConsoleEvent};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::traits::{ConnectError, Connection, Frame, Transport, NORMAL_CLOSE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Closed,
    Connecting,
    Open,
    Failed,
}

/// Why a read loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEnd {
    Cancelled,
    Closed { clean: bool },
}

pub struct ChannelSupervisor {
    channel: ChannelKind,
    endpoint: String,
    token: Option<String>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    lifecycle: watch::Sender<Lifecycle>,
    connection: Option<Box<dyn Connection>>,
}

impl ChannelSupervisor {
    pub fn new(
        channel: ChannelKind,
        endpoint: String,
        token: Option<String>,
        transport: Arc<dyn Transport>,
        bus: EventBus,
    ) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Closed);
        Self {
            channel,
            endpoint,
            token,
            transport,
            bus,
            lifecycle,
            connection: None,
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Opens the connection. Failures are reported, never retried here.
    pub async fn open(&mut self) -> Result<(), ConnectError> {
        if self.connection.is_some() {
            return Ok(());
        }
        self.lifecycle.send_replace(Lifecycle::Connecting);
        debug!(channel = %self.channel, endpoint = %self.endpoint, "opening stream");
        match self
            .transport
            .open(&self.endpoint, self.token.as_deref())
            .await
        {
            Ok(connection) => {
                self.connection = Some(connection);
                self.lifecycle.send_replace(Lifecycle::Open);
                info!(channel = %self.channel, "stream open");
                self.bus.publish(ConsoleEvent::ConnectionOpened {
                    channel: self.channel,
                });
                Ok(())
            }
            Err(err) => {
                self.lifecycle.send_replace(Lifecycle::Failed);
                Err(err)
            }
        }
    }

    /// Forwards every inbound message to the bus until the stream ends or
    /// `cancel` fires. On cancellation the connection is left open for the
    /// caller to close.
    pub async fn read(&mut self, cancel: &CancellationToken) -> ReadEnd {
        let Some(connection) = self.connection.as_mut() else {
            return ReadEnd::Closed { clean: true };
        };
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadEnd::Cancelled,
                next = connection.next_frame() => next,
            };
            match next {
                Some(Ok(Frame::Text(text))) => {
                    forward_lines(&self.bus, self.channel, &text);
                }
                Some(Ok(Frame::Close { code, reason })) => {
                    let clean = code == Some(NORMAL_CLOSE);
                    if !clean {
                        warn!(channel = %self.channel, ?code, %reason, "stream closed abnormally");
                    }
                    return self.finish(clean);
                }
                Some(Err(err)) => {
                    warn!(channel = %self.channel, "stream error: {err:#}");
                    return self.finish(false);
                }
                None => {
                    warn!(channel = %self.channel, "stream dropped");
                    return self.finish(false);
                }
            }
        }
    }

    /// Closes the live connection, if any.
    pub async fn close(&mut self, code: u16, reason: &str) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.close(code, reason).await;
        self.lifecycle.send_replace(Lifecycle::Closed);
        info!(channel = %self.channel, code, "stream closed");
        self.bus.publish(ConsoleEvent::ConnectionClosed {
            channel: self.channel,
            clean: code == NORMAL_CLOSE,
        });
    }

    fn finish(&mut self, clean: bool) -> ReadEnd {
        self.connection = None;
        self.lifecycle.send_replace(if clean {
            Lifecycle::Closed
        } else {
            Lifecycle::Failed
        });
        self.bus.publish(ConsoleEvent::ConnectionClosed {
            channel: self.channel,
            clean,
        });
        ReadEnd::Closed { clean }
    }
}

fn forward_lines(bus: &EventBus, channel: ChannelKind, text: &str) {
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str(line) {
            Ok(payload) => bus.publish(ConsoleEvent::MessageReceived(ChannelMessage {
                channel,
                payload,
            })),
            Err(err) => warn!(channel = %channel, "dropping malformed frame: {err}"),
        }
    }
}
