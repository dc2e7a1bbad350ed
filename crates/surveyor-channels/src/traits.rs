use async_trait::async_trait;

/// One inbound unit from a stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Newline-delimited JSON; may carry several messages.
    Text(String),
    /// Peer-initiated close. `None` code means the peer sent no status.
    Close { code: Option<u16>, reason: String },
}

pub const NORMAL_CLOSE: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connect failed: {reason}")]
pub struct ConnectError {
    pub reason: String,
}

impl ConnectError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A live duplex stream. Not restartable: once `next_frame` yields `None`
/// or a close, the connection is spent.
#[async_trait]
pub trait Connection: Send {
    /// `None` when the stream ended without a close frame.
    async fn next_frame(&mut self) -> Option<anyhow::Result<Frame>>;

    async fn close(&mut self, code: u16, reason: &str);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn Connection>, ConnectError>;
}
