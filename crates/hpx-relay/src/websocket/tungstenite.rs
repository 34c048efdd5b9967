//! Default [`Connector`] backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tracing::debug;

use super::protocol::{Connector, WsMessage, WsSocket, WsWriter};
use crate::error::{TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens plain `ws://` sockets with tokio-tungstenite.
///
/// Protocol-level ping/pong is answered by tungstenite itself and never
/// reaches the relay.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> TransportResult<WsSocket> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::websocket(format!("Failed to connect to {url}: {e}")))?;
        debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (sink, source) = ws.split();
        let reader = source
            .map(|frame| match frame {
                Ok(Message::Text(text)) => Some(Ok(WsMessage::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(WsMessage::Binary(data.to_vec()))),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("closed by peer: {} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "closed by peer".to_string());
                    Some(Err(TransportError::connection_lost(reason)))
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(TransportError::websocket(e.to_string()))),
            })
            .filter_map(|item| async move { item })
            .boxed();

        Ok(WsSocket::new(reader, TungsteniteWriter { sink }))
    }
}

struct TungsteniteWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl WsWriter for TungsteniteWriter {
    async fn send_ws(&mut self, message: WsMessage) -> TransportResult<()> {
        let frame = match message {
            WsMessage::Text(text) => Message::text(text),
            WsMessage::Binary(data) => Message::binary(data),
        };
        self.sink
            .send(frame)
            .await
            .map_err(|e| TransportError::websocket(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::websocket(e.to_string()))
    }
}
