//! WebSocket transport over tokio-tungstenite

use super::{CloseInfo, Connector, Transport, TransportError, TransportEvent, TransportMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` and `wss://` connections
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(url = %url, "WebSocket connected");

        Ok(Box::new(WebSocketTransport { stream }))
    }
}

/// A live WebSocket connection
pub struct WebSocketTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: TransportMessage) -> Result<(), TransportError> {
        let message = match message {
            TransportMessage::Text(text) => Message::Text(text),
            TransportMessage::Binary(bytes) => Message::Binary(bytes),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Message(TransportMessage::Text(text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return TransportEvent::Message(TransportMessage::Binary(bytes));
                }
                Some(Ok(Message::Close(frame))) => {
                    return TransportEvent::Closed(frame.map(|f| CloseInfo {
                        code: f.code.into(),
                        reason: f.reason.into_owned(),
                    }));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Pongs are queued by tungstenite and flushed on the next write
                }
                Some(Err(e)) => {
                    return TransportEvent::Error(TransportError::Receive(e.to_string()));
                }
                None => return TransportEvent::Closed(None),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
