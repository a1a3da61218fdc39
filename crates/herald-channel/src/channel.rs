//! The channel driver.
//!
//! A [`Channel`] owns one transport connection, the topic set and a
//! [`Timeouts`] registry. [`Channel::next`] races "a payload arrived" against
//! "a timer fired" and handles everything that is not a real notification
//! internally: heartbeats push back the liveness timer, timer expiry triggers
//! extension or reconnection, transport faults trigger reconnection, and
//! server control messages cancel timers or surface typed failures.

use std::fmt;

use futures::Stream;
use herald_core::{ChannelError, CorrelationId, ErrorKind, Reason, Result};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, info_span, warn};

use crate::codec::{Codec, JsonCodec};
use crate::config::{ChannelConfig, CloseWarningPolicy, MalformedPolicy};
use crate::messages::{
    Classified, ControlMessage, Notification, classify, ping_request, subscribe_request,
};
use crate::timeouts::{Timeout, Timeouts};
use crate::transport::{Connection, Transport, TransportError};

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a [`Channel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed, nothing opened yet.
    Uninitialized,
    /// Opening the transport.
    Connecting,
    /// Transport open, initial subscribe in flight.
    Subscribing,
    /// Initialized and receiving.
    Active,
    /// Closed for good.
    Closed,
}

impl ChannelState {
    /// Name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closes a [`Channel`] from another task.
///
/// Closing interrupts an in-flight [`Channel::next`], which then closes the
/// transport and returns `Ok(None)` without attempting any recovery.
#[derive(Clone, Debug)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    /// Request the channel to close.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether close has been requested.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Outcome of one receive/timer race.
enum Event {
    Closed,
    Received(std::result::Result<String, TransportError>),
    Fired(Timeout),
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

/// A long-lived push-notification channel.
pub struct Channel {
    config: ChannelConfig,
    transport: Box<dyn Transport>,
    codec: Box<dyn Codec>,
    connection: Option<Box<dyn Connection>>,
    timeouts: Timeouts,
    state: ChannelState,
    extensions: u64,
    rollovers: u64,
    last_correlation_id: Option<CorrelationId>,
    closed: CancellationToken,
    span: Span,
}

impl Channel {
    /// Create a channel without opening anything.
    pub fn new(config: ChannelConfig, transport: impl Transport + 'static) -> Self {
        let span = info_span!("channel", uri = %config.uri);
        Self {
            config,
            transport: Box::new(transport),
            codec: Box::new(JsonCodec),
            connection: None,
            timeouts: Timeouts::new(),
            state: ChannelState::Uninitialized,
            extensions: 0,
            rollovers: 0,
            last_correlation_id: None,
            closed: CancellationToken::new(),
            span,
        }
    }

    /// Create a channel and [`initialize`](Self::initialize) it.
    pub async fn open(config: ChannelConfig, transport: impl Transport + 'static) -> Result<Self> {
        let mut channel = Self::new(config, transport);
        channel.initialize().await?;
        Ok(channel)
    }

    /// Replace the JSON codec.
    #[must_use]
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Emit every log event under `span` instead of the default `channel` span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Current URI. Changes on rollover.
    pub fn uri(&self) -> &str {
        &self.config.uri
    }

    /// Subscribed topics.
    pub fn topics(&self) -> &[String] {
        &self.config.topics
    }

    /// Lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether a transport connection is held.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Successful lifetime extensions.
    pub fn extensions(&self) -> u64 {
        self.extensions
    }

    /// Successful rollovers.
    pub fn rollovers(&self) -> u64 {
        self.rollovers
    }

    /// Id of the last subscribe request sent.
    pub fn last_correlation_id(&self) -> Option<&CorrelationId> {
        self.last_correlation_id.as_ref()
    }

    /// The channel's timer registry.
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Handle that closes this channel from elsewhere.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            token: self.closed.clone(),
        }
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Open the transport at the current URI, closing any held connection
    /// first.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(ChannelError::new(ErrorKind::Connection, Reason::ConnectionClosed)
                .with_message("channel is closed"));
        }
        self.state = ChannelState::Connecting;
        self.drop_connection().await;

        let connection = match self.transport.open(&self.config.uri).await {
            Ok(connection) => connection,
            Err(e) => {
                self.state = ChannelState::Uninitialized;
                return Err(connection_error(e));
            }
        };
        self.connection = Some(connection);
        info!(parent: &self.span, uri = %self.config.uri, "channel connected");
        Ok(())
    }

    /// Send a subscribe request for the topic set with a fresh correlation id
    /// and arm `NoSubscriptionConfirmation`.
    pub async fn subscribe(&mut self) -> Result<()> {
        let Some(connection) = self.connection.as_deref_mut() else {
            return Err(ChannelError::new(ErrorKind::Subscription, Reason::NotConnected)
                .with_message("no open transport"));
        };
        let id = send_subscribe(connection, self.codec.as_ref(), &self.config.topics).await?;
        self.timeouts
            .schedule(Timeout::NoSubscriptionConfirmation, self.config.response_timeout);
        debug!(parent: &self.span, correlation_id = %id, topics = self.config.topics.len(), "subscribe sent");
        self.last_correlation_id = Some(id);
        Ok(())
    }

    /// Connect and subscribe, then arm the lifetime and heartbeat timers.
    pub async fn initialize(&mut self) -> Result<()> {
        self.connect()
            .await
            .map_err(|e| ChannelError::wrap(ErrorKind::Initialization, e))?;
        self.state = ChannelState::Subscribing;
        self.subscribe()
            .await
            .map_err(|e| ChannelError::wrap(ErrorKind::Initialization, e))?;

        self.timeouts
            .schedule(Timeout::ChannelExpired, self.config.lifetime);
        self.timeouts
            .schedule(Timeout::NoHeartbeat, self.config.heartbeat_timeout);
        self.state = ChannelState::Active;
        debug!(parent: &self.span, "channel initialized");
        Ok(())
    }

    /// Send a health probe and arm `NoHealthCheckResponse`.
    pub async fn check(&mut self) -> Result<()> {
        let Some(connection) = self.connection.as_deref_mut() else {
            return Err(ChannelError::receive(Reason::NotConnected).with_message("no open transport"));
        };
        send_request(connection, self.codec.as_ref(), &ping_request(), ErrorKind::Receive).await?;
        self.timeouts
            .schedule(Timeout::NoHealthCheckResponse, self.config.response_timeout);
        debug!(parent: &self.span, "health check sent");
        Ok(())
    }

    /// Re-subscribe to push back the channel lifetime.
    pub async fn extend(&mut self) -> Result<()> {
        self.subscribe()
            .await
            .map_err(|e| ChannelError::wrap(ErrorKind::LifetimeExtension, e))?;
        self.extensions += 1;
        self.timeouts
            .schedule(Timeout::ChannelExpired, self.config.lifetime);
        info!(parent: &self.span, extensions = self.extensions, "channel lifetime extended");
        Ok(())
    }

    /// Close the held connection and open a new one at the same URI.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.connect()
            .await
            .map_err(|e| ChannelError::wrap(ErrorKind::Reconnect, e))?;
        self.timeouts
            .schedule(Timeout::NoHeartbeat, self.config.heartbeat_timeout);
        let _ = self.timeouts.cancel(Timeout::NoHealthCheckResponse);
        self.state = ChannelState::Active;
        info!(parent: &self.span, uri = %self.config.uri, "channel reconnected");
        Ok(())
    }

    /// Replace the connection with a freshly opened and subscribed one at
    /// `new_uri`.
    ///
    /// The held connection is only closed once the new one is live. On
    /// failure it is left untouched and usable.
    pub async fn rollover(&mut self, new_uri: impl Into<String>) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(ChannelError::wrap(
                ErrorKind::Rollover,
                ChannelError::new(ErrorKind::Connection, Reason::ConnectionClosed)
                    .with_message("channel is closed"),
            ));
        }
        let new_uri = new_uri.into();
        let rollover_error = |e: ChannelError| {
            ChannelError::wrap(
                ErrorKind::Rollover,
                ChannelError::wrap(ErrorKind::Initialization, e),
            )
        };

        let mut fresh = self
            .transport
            .open(&new_uri)
            .await
            .map_err(|e| rollover_error(connection_error(e)))?;
        let id = match send_subscribe(fresh.as_mut(), self.codec.as_ref(), &self.config.topics).await
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(close_err) = fresh.close().await {
                    debug!(parent: &self.span, error = %close_err, "new connection already closed");
                }
                return Err(rollover_error(e));
            }
        };

        let previous = self.connection.replace(fresh);
        let old_uri = std::mem::replace(&mut self.config.uri, new_uri);
        if let Some(mut previous) = previous {
            if let Err(e) = previous.close().await {
                debug!(parent: &self.span, error = %e, "previous connection already closed");
            }
        }

        self.rollovers += 1;
        self.last_correlation_id = Some(id);
        self.timeouts
            .schedule(Timeout::ChannelExpired, self.config.lifetime);
        self.timeouts
            .schedule(Timeout::NoHeartbeat, self.config.heartbeat_timeout);
        self.timeouts
            .schedule(Timeout::NoSubscriptionConfirmation, self.config.response_timeout);
        let _ = self.timeouts.cancel(Timeout::NoHealthCheckResponse);
        self.state = ChannelState::Active;
        info!(
            parent: &self.span,
            from = %old_uri,
            to = %self.config.uri,
            rollovers = self.rollovers,
            "channel rolled over"
        );
        Ok(())
    }

    /// Disarm every timer and close the connection. Idempotent.
    pub async fn close(&mut self) {
        self.closed.cancel();
        self.timeouts.clear();
        self.drop_connection().await;
        if self.state != ChannelState::Closed {
            self.state = ChannelState::Closed;
            info!(parent: &self.span, "channel closed");
        }
    }

    /// Wait for the next notification.
    ///
    /// Returns `Ok(None)` once the channel is closed. Control messages and
    /// timer expiry are handled internally and never returned.
    pub async fn next(&mut self) -> Result<Option<Notification>> {
        loop {
            if self.closed.is_cancelled() {
                self.close().await;
            }
            if self.state == ChannelState::Closed {
                return Ok(None);
            }

            let event = {
                let Some(connection) = self.connection.as_deref_mut() else {
                    return Err(ChannelError::receive(Reason::NotConnected)
                        .with_message("channel is not initialized"));
                };
                tokio::select! {
                    biased;
                    () = self.closed.cancelled() => Event::Closed,
                    received = connection.receive() => Event::Received(received),
                    fired = self.timeouts.wait() => Event::Fired(fired),
                }
            };

            match event {
                Event::Closed => {
                    self.close().await;
                    return Ok(None);
                }
                Event::Fired(timeout) => self.on_timeout(timeout).await?,
                Event::Received(Err(e)) => self.on_transport_fault(e).await?,
                Event::Received(Ok(text)) => {
                    if let Some(notification) = self.on_payload(&text).await? {
                        return Ok(Some(notification));
                    }
                }
            }
        }
    }

    /// Drive [`next`](Self::next) as a stream. The stream ends when the
    /// channel closes or after the first error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Notification>> + Send {
        async_stream::stream! {
            loop {
                match self.next().await {
                    Ok(Some(notification)) => yield Ok(notification),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }

    // ── Handlers ────────────────────────────────────────────────────────────

    async fn on_timeout(&mut self, timeout: Timeout) -> Result<()> {
        match timeout {
            Timeout::ChannelExpired if self.config.autoextend => {
                info!(parent: &self.span, "channel lifetime reached, extending");
                self.extend().await
            }
            Timeout::ChannelExpired => Err(ChannelError::expiring(Reason::ChannelExpired)),
            Timeout::NoHeartbeat | Timeout::NoHealthCheckResponse => {
                warn!(parent: &self.span, %timeout, "timer fired, reconnecting");
                self.reconnect().await
            }
            Timeout::NoSubscriptionConfirmation => {
                warn!(parent: &self.span, %timeout, "timer fired, reconnecting");
                self.reconnect().await?;
                self.subscribe()
                    .await
                    .map_err(|e| ChannelError::wrap(ErrorKind::Reconnect, e))
            }
        }
    }

    async fn on_transport_fault(&mut self, err: TransportError) -> Result<()> {
        if !self.config.reconnect_on_failure {
            return Err(ChannelError::receive(err.reason()).with_source(err));
        }
        warn!(parent: &self.span, error = %err, "transport failed, reconnecting");
        self.reconnect().await
    }

    async fn on_payload(&mut self, text: &str) -> Result<Option<Notification>> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                return match self.config.malformed {
                    MalformedPolicy::Raise => {
                        Err(ChannelError::receive(Reason::MalformedMessage).with_source(e))
                    }
                    MalformedPolicy::Skip => {
                        warn!(parent: &self.span, error = %e, "skipping malformed payload");
                        Ok(None)
                    }
                };
            }
        };

        match classify(message) {
            Classified::Notification(notification) => Ok(Some(notification)),
            Classified::Control(control) => {
                self.on_control(control).await?;
                Ok(None)
            }
        }
    }

    async fn on_control(&mut self, control: ControlMessage) -> Result<()> {
        match control {
            ControlMessage::Heartbeat => {
                debug!(parent: &self.span, "heartbeat");
                self.timeouts
                    .schedule(Timeout::NoHeartbeat, self.config.heartbeat_timeout);
                Ok(())
            }
            ControlMessage::ChannelFailure { message } => Err(ChannelError::channel_failure(message)),
            ControlMessage::HealthCheckReply => {
                debug!(parent: &self.span, "health check answered");
                let _ = self.timeouts.cancel(Timeout::NoHealthCheckResponse);
                Ok(())
            }
            ControlMessage::CloseWarning => match self.config.close_warning {
                CloseWarningPolicy::Raise => Err(ChannelError::expiring(Reason::ChannelClosing)),
                CloseWarningPolicy::Rollover => {
                    info!(parent: &self.span, "server closing channel, rolling over");
                    let uri = self.config.uri.clone();
                    self.rollover(uri).await
                }
            },
            ControlMessage::Subscribed { correlation_id } => {
                match (correlation_id, &self.last_correlation_id) {
                    (Some(received), Some(expected)) if received != *expected => {
                        debug!(
                            parent: &self.span,
                            received = %received,
                            expected = %expected,
                            "ignoring stale subscription confirmation"
                        );
                    }
                    _ => {
                        let _ = self.timeouts.cancel(Timeout::NoSubscriptionConfirmation);
                        debug!(parent: &self.span, "subscription confirmed");
                    }
                }
                Ok(())
            }
            ControlMessage::SubscriptionFailure { message } => {
                let err = ChannelError::new(ErrorKind::Subscription, Reason::SubscriptionRejected);
                Err(match message {
                    Some(message) => err.with_message(message),
                    None => err,
                })
            }
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!(parent: &self.span, error = %e, "connection already closed");
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// 401 and 403 are authorization failures; everything else is a plain
/// connection failure.
fn connection_error(err: TransportError) -> ChannelError {
    let kind = if matches!(err, TransportError::Rejected { status: 401 | 403 }) {
        ErrorKind::Authorization
    } else {
        ErrorKind::Connection
    };
    ChannelError::new(kind, err.reason()).with_source(err)
}

async fn send_request(
    connection: &mut dyn Connection,
    codec: &dyn Codec,
    message: &Notification,
    kind: ErrorKind,
) -> Result<()> {
    let text = codec
        .encode(message)
        .map_err(|e| ChannelError::new(kind, Reason::MalformedMessage).with_source(e))?;
    connection
        .send(text)
        .await
        .map_err(|e| ChannelError::new(kind, e.reason()).with_source(e))
}

async fn send_subscribe(
    connection: &mut dyn Connection,
    codec: &dyn Codec,
    topics: &[String],
) -> Result<CorrelationId> {
    let id = CorrelationId::random();
    send_request(
        connection,
        codec,
        &subscribe_request(topics, &id),
        ErrorKind::Subscription,
    )
    .await?;
    Ok(id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
