//! Failure taxonomy for the notification channel.
//!
//! Every failure the driver raises is a [`ChannelError`]: an [`ErrorKind`]
//! saying *which operation* failed, a [`Reason`] code saying *why*, an
//! optional human-readable message and an optional underlying cause.
//!
//! The kinds form a small hierarchy, encoded by [`ErrorKind::parent`]:
//!
//! ```text
//! Expiring                        (signal, not a failure)
//! ChannelFailure
//! Initialization ─┬─ Connection ── Authorization
//!                 └─ Subscription
//! Receive
//! Recovery ───────┬─ LifetimeExtension
//!                 ├─ Reconnect
//!                 └─ Rollover
//! ```
//!
//! [`ChannelError::is`] walks that chain, so `err.is(ErrorKind::Initialization)`
//! holds for a connection, authorization or subscription failure alike.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed underlying cause.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

// ─────────────────────────────────────────────────────────────────────────────
// Reason codes
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable reason attached to every [`ChannelError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The transport connection was closed.
    ConnectionClosed,
    /// The opening handshake was rejected for a reason other than 401/403.
    InvalidHandshake,
    /// The handshake was rejected with HTTP 401.
    Unauthorized,
    /// The handshake was rejected with HTTP 403.
    Forbidden,
    /// The channel URI could not be parsed or uses an unsupported scheme.
    InvalidUri,
    /// A frame exceeded the transport's size limit.
    PayloadTooBig,
    /// The transport reported a protocol violation.
    ProtocolFailure,
    /// The token the channel was created with has expired.
    TokenExpired,
    /// The channel reached its hard lifetime.
    ChannelExpired,
    /// The server warned that it is about to close the channel.
    ChannelClosing,
    /// The server no longer knows the channel (404).
    ChannelNotFound,
    /// The server rejected a topic subscription.
    SubscriptionRejected,
    /// A payload could not be decoded into a mapping.
    MalformedMessage,
    /// An operation needed a live transport and there was none.
    NotConnected,
    /// Unknown or ambiguous.
    Ambiguous,
}

impl Reason {
    /// Stable `snake_case` name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection_closed",
            Self::InvalidHandshake => "invalid_handshake",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InvalidUri => "invalid_uri",
            Self::PayloadTooBig => "payload_too_big",
            Self::ProtocolFailure => "protocol_failure",
            Self::TokenExpired => "token_expired",
            Self::ChannelExpired => "channel_expired",
            Self::ChannelClosing => "channel_closing",
            Self::ChannelNotFound => "channel_not_found",
            Self::SubscriptionRejected => "subscription_rejected",
            Self::MalformedMessage => "malformed_message",
            Self::NotConnected => "not_connected",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Which part of the channel lifecycle failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Hard lifetime reached or close warning received; the caller should
    /// roll the channel over. A signal rather than a fault.
    Expiring,
    /// The server reported the channel gone (expired, replaced over quota,
    /// or its token expired). Not locally recoverable.
    ChannelFailure,
    /// `initialize()` failed.
    Initialization,
    /// Opening the transport failed.
    Connection,
    /// The handshake was refused with 401 or 403.
    Authorization,
    /// Topic subscription failed or was rejected.
    Subscription,
    /// Receiving from an open channel failed.
    Receive,
    /// A recovery attempt itself failed.
    Recovery,
    /// Re-subscribing to push back the lifetime failed.
    LifetimeExtension,
    /// Re-opening the transport failed.
    Reconnect,
    /// Opening the replacement channel failed.
    Rollover,
}

impl ErrorKind {
    /// The more general kind this one specializes, if any.
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Connection | Self::Subscription => Some(Self::Initialization),
            Self::Authorization => Some(Self::Connection),
            Self::LifetimeExtension | Self::Reconnect | Self::Rollover => Some(Self::Recovery),
            Self::Expiring
            | Self::ChannelFailure
            | Self::Initialization
            | Self::Receive
            | Self::Recovery => None,
        }
    }

    /// Whether `self` equals `ancestor` or descends from it.
    pub fn is_a(self, ancestor: Self) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Expiring => "channel is expiring",
            Self::ChannelFailure => "notification channel failed",
            Self::Initialization => "channel initialization failed",
            Self::Connection => "could not open channel connection",
            Self::Authorization => "channel connection was not authorized",
            Self::Subscription => "could not subscribe to notification topics",
            Self::Receive => "failed to receive from open channel",
            Self::Recovery => "could not recover channel",
            Self::LifetimeExtension => "could not extend channel lifetime",
            Self::Reconnect => "could not reconnect to channel",
            Self::Rollover => "could not roll over to new channel",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChannelError
// ─────────────────────────────────────────────────────────────────────────────

/// A failure raised by the channel driver. Immutable once built.
#[derive(Debug, Error)]
#[error("{kind} ({reason}){}", message_suffix(.message.as_deref()))]
pub struct ChannelError {
    kind: ErrorKind,
    reason: Reason,
    message: Option<String>,
    source: Option<BoxError>,
}

fn message_suffix(message: Option<&str>) -> String {
    message.map(|m| format!(": {m}")).unwrap_or_default()
}

impl ChannelError {
    /// Create an error with no message or cause.
    #[must_use]
    pub fn new(kind: ErrorKind, reason: Reason) -> Self {
        Self {
            kind,
            reason,
            message: None,
            source: None,
        }
    }

    /// Attach a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Wrap `cause` as a `kind` failure, inheriting its reason code.
    #[must_use]
    pub fn wrap(kind: ErrorKind, cause: ChannelError) -> Self {
        Self::new(kind, cause.reason).with_source(cause)
    }

    /// Channel-expiring signal.
    #[must_use]
    pub fn expiring(reason: Reason) -> Self {
        Self::new(ErrorKind::Expiring, reason)
    }

    /// Server-reported channel failure (404).
    #[must_use]
    pub fn channel_failure(message: Option<String>) -> Self {
        Self {
            message,
            ..Self::new(ErrorKind::ChannelFailure, Reason::ChannelNotFound)
        }
    }

    /// Receive failure with the given reason.
    #[must_use]
    pub fn receive(reason: Reason) -> Self {
        Self::new(ErrorKind::Receive, reason)
    }

    /// The failure kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The reason code.
    pub fn reason(&self) -> Reason {
        self.reason
    }

    /// The human-readable message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The underlying cause, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Whether this error is a `kind` failure, directly or by specialization.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind.is_a(kind)
    }

    /// Whether this is the channel-expiring signal rather than a fault.
    pub fn is_expiring(&self) -> bool {
        self.kind == ErrorKind::Expiring
    }

    /// Walk the source chain to the innermost [`ChannelError`].
    ///
    /// Useful for recovery failures, which always wrap the failure that
    /// caused them.
    pub fn root(&self) -> &ChannelError {
        let mut current = self;
        while let Some(inner) = current
            .source
            .as_deref()
            .and_then(|s| s.downcast_ref::<ChannelError>())
        {
            current = inner;
        }
        current
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn authorization_is_connection_and_initialization() {
        let err = ChannelError::new(ErrorKind::Authorization, Reason::Unauthorized);
        assert!(err.is(ErrorKind::Authorization));
        assert!(err.is(ErrorKind::Connection));
        assert!(err.is(ErrorKind::Initialization));
        assert!(!err.is(ErrorKind::Subscription));
        assert!(!err.is(ErrorKind::Recovery));
    }

    #[test]
    fn recovery_children() {
        for kind in [
            ErrorKind::LifetimeExtension,
            ErrorKind::Reconnect,
            ErrorKind::Rollover,
        ] {
            assert_eq!(kind.parent(), Some(ErrorKind::Recovery));
            assert!(kind.is_a(ErrorKind::Recovery));
            assert!(!kind.is_a(ErrorKind::Initialization));
        }
    }

    #[test]
    fn roots_have_no_parent() {
        for kind in [
            ErrorKind::Expiring,
            ErrorKind::ChannelFailure,
            ErrorKind::Initialization,
            ErrorKind::Receive,
            ErrorKind::Recovery,
        ] {
            assert_eq!(kind.parent(), None);
        }
    }

    #[test]
    fn display_without_message() {
        let err = ChannelError::expiring(Reason::ChannelExpired);
        assert_eq!(err.to_string(), "channel is expiring (channel_expired)");
    }

    #[test]
    fn display_with_message() {
        let err = ChannelError::channel_failure(Some("gone".into()));
        assert_eq!(
            err.to_string(),
            "notification channel failed (channel_not_found): gone"
        );
        assert_eq!(err.message(), Some("gone"));
    }

    #[test]
    fn wrap_keeps_reason_and_cause() {
        let inner = ChannelError::new(ErrorKind::Connection, Reason::ConnectionClosed)
            .with_message("refused");
        let outer = ChannelError::wrap(ErrorKind::Reconnect, inner);

        assert_eq!(outer.kind(), ErrorKind::Reconnect);
        assert_eq!(outer.reason(), Reason::ConnectionClosed);
        let cause = outer.cause().expect("cause");
        let inner = cause.downcast_ref::<ChannelError>().expect("channel error");
        assert_eq!(inner.kind(), ErrorKind::Connection);
        assert_eq!(inner.message(), Some("refused"));
    }

    #[test]
    fn std_source_chain_is_exposed() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = ChannelError::receive(Reason::ConnectionClosed).with_source(io);
        let source = StdError::source(&err).expect("source");
        assert!(source.to_string().contains("reset"));
    }

    #[test]
    fn root_walks_nested_channel_errors() {
        let leaf = ChannelError::new(ErrorKind::Authorization, Reason::Forbidden);
        let mid = ChannelError::wrap(ErrorKind::Initialization, leaf);
        let top = ChannelError::wrap(ErrorKind::Rollover, mid);

        assert_eq!(top.root().kind(), ErrorKind::Authorization);
        assert_eq!(top.reason(), Reason::Forbidden);
    }

    #[test]
    fn expiring_is_signal() {
        let err = ChannelError::expiring(Reason::ChannelClosing);
        assert!(err.is_expiring());
        assert_matches!(err.kind(), ErrorKind::Expiring);
        assert!(!ChannelError::receive(Reason::MalformedMessage).is_expiring());
    }

    #[test]
    fn reason_names_are_snake_case() {
        assert_eq!(Reason::InvalidUri.to_string(), "invalid_uri");
        assert_eq!(Reason::PayloadTooBig.as_str(), "payload_too_big");
    }
}
