//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError, UrlError};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::transport::{Connection, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` and `wss://` connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create the transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (ws, response) = connect_async(uri).await?;
        debug!(status = response.status().as_u16(), "websocket handshake complete");
        Ok(Box::new(WebSocketConnection { ws, closed: false }))
    }
}

/// One open WebSocket.
pub struct WebSocketConnection {
    ws: WsStream,
    closed: bool,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.ws.send(Message::text(text)).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        // `StreamExt::next` is cancel-safe; a frame is only consumed when
        // this future resolves.
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes.to_vec())
                        .map_err(|e| TransportError::Protocol(format!("binary frame: {e}")));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed websocket");
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
                Some(Err(e)) => {
                    let err = TransportError::from(e);
                    if err.is_closed() {
                        self.closed = true;
                    }
                    return Err(err);
                }
                None => {
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            WsError::Url(UrlError::UnsupportedUrlScheme) => {
                Self::InvalidUri("unsupported URL scheme".into())
            }
            WsError::Url(e) => Self::InvalidUri(e.to_string()),
            WsError::HttpFormat(e) => Self::InvalidUri(e.to_string()),
            WsError::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
            },
            WsError::Capacity(e @ CapacityError::MessageTooLong { .. }) => {
                Self::PayloadTooBig(e.to_string())
            }
            WsError::Protocol(e) => Self::Protocol(e.to_string()),
            WsError::Io(e) => Self::Io(e),
            other => Self::Other(other.to_string()),
        }
    }
}
