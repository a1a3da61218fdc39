//! Transport seam.
//!
//! The driver only ever opens, sends on, receives from and closes a
//! connection. [`Transport`] opens; [`Connection`] does the rest.
//! [`crate::websocket::WebSocketTransport`] is the production implementation.

use async_trait::async_trait;
use herald_core::Reason;
use thiserror::Error;

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The URI could not be parsed or uses an unsupported scheme.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// The server answered the opening handshake with a non-upgrade status.
    #[error("handshake rejected with HTTP {status}")]
    Rejected {
        /// HTTP status code of the response.
        status: u16,
    },

    /// The opening handshake failed without an HTTP status.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// A frame exceeded the size limit.
    #[error("payload too big: {0}")]
    PayloadTooBig(String),

    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Reason code this fault maps to.
    pub fn reason(&self) -> Reason {
        match self {
            Self::InvalidUri(_) => Reason::InvalidUri,
            Self::Rejected { status: 401 } => Reason::Unauthorized,
            Self::Rejected { status: 403 } => Reason::Forbidden,
            Self::Rejected { .. } | Self::Handshake(_) => Reason::InvalidHandshake,
            Self::Closed | Self::Io(_) => Reason::ConnectionClosed,
            Self::PayloadTooBig(_) => Reason::PayloadTooBig,
            Self::Protocol(_) => Reason::ProtocolFailure,
            Self::Other(_) => Reason::Ambiguous,
        }
    }

    /// Whether this fault means the connection is already gone.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Opens connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `uri`.
    async fn open(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open duplex connection.
#[async_trait]
pub trait Connection: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next text payload.
    ///
    /// Must be cancel-safe: the driver races it against timers and drops it
    /// when a timer wins, and no payload may be lost when that happens.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the connection. Closing an already-closed connection reports
    /// [`TransportError::Closed`].
    async fn close(&mut self) -> Result<(), TransportError>;
}
