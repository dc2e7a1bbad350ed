//! `tokio-tungstenite` transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::traits::{ConnectError, Connection, Frame, Transport};

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        endpoint: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| ConnectError::new(format!("invalid endpoint {endpoint}: {e}")))?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ConnectError::new(format!("invalid token: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }
        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ConnectError::new(e.to_string()))?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn next_frame(&mut self) -> Option<anyhow::Result<Frame>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => Frame::Text(text),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Frame::Text(text),
                    Err(_) => {
                        debug!("skipping non-utf8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Close(close)) => Frame::Close {
                    code: close.as_ref().map(|c| u16::from(c.code)),
                    reason: close.map(|c| c.reason.into_owned()).unwrap_or_default(),
                },
                // Pings are answered by tungstenite on the next read.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(err) => return Some(Err(err.into())),
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(err) = self.stream.close(Some(frame)).await {
            debug!("close handshake failed: {err}");
        }
        let _ = self.stream.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_malformed_endpoint() {
        let result = WebSocketTransport.open("not a url", None).await;
        let Err(err) = result else {
            panic!("expected an error");
        };
        assert!(err.reason.contains("invalid endpoint"));
    }
}
