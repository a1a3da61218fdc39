//! Message classification and the requests the driver sends.
//!
//! [`classify`] scans an ordered table of control-message matchers; the first
//! match wins and anything unmatched is an opaque [`Notification`].

use herald_core::CorrelationId;
use serde_json::{Map, Value, json};

/// A decoded message: string keys to JSON values.
pub type Notification = Map<String, Value>;

/// Topic carrying heartbeats and health-check replies.
pub const CHANNEL_METADATA_TOPIC: &str = "channel.metadata";
/// Topic of the server's imminent-close warning.
pub const SOCKET_CLOSING_TOPIC: &str = "v2.system.socket_closing";
/// Body message of a server heartbeat.
pub const HEARTBEAT_MESSAGE: &str = "WebSocket Heartbeat";
/// Body message of a health-check reply.
pub const PONG_MESSAGE: &str = "pong";

/// A recognized protocol-management message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Periodic server liveness signal.
    Heartbeat,
    /// The server no longer knows the channel.
    ChannelFailure {
        /// Server-supplied explanation.
        message: Option<String>,
    },
    /// Reply to a `ping` health probe.
    HealthCheckReply,
    /// The server will close the channel shortly.
    CloseWarning,
    /// A subscribe request was accepted.
    Subscribed {
        /// Id echoed from the request, if present.
        correlation_id: Option<CorrelationId>,
    },
    /// A subscribe request was rejected.
    SubscriptionFailure {
        /// Server-supplied explanation.
        message: Option<String>,
    },
}

/// Outcome of [`classify`].
#[derive(Clone, Debug, PartialEq)]
pub enum Classified {
    /// Handled internally by the driver.
    Control(ControlMessage),
    /// Handed to the caller unchanged.
    Notification(Notification),
}

type Matcher = fn(&Notification) -> Option<ControlMessage>;

/// Control matchers in priority order.
const MATCHERS: [Matcher; 6] = [
    match_heartbeat,
    match_channel_failure,
    match_health_check_reply,
    match_close_warning,
    match_subscribed,
    match_subscription_failure,
];

/// Classify a decoded message.
pub fn classify(message: Notification) -> Classified {
    MATCHERS
        .iter()
        .find_map(|matcher| matcher(&message))
        .map_or(Classified::Notification(message), Classified::Control)
}

// ── Matchers ────────────────────────────────────────────────────────────────

fn match_heartbeat(msg: &Notification) -> Option<ControlMessage> {
    (is_metadata(msg) && event_message(msg) == Some(HEARTBEAT_MESSAGE))
        .then_some(ControlMessage::Heartbeat)
}

fn match_channel_failure(msg: &Notification) -> Option<ControlMessage> {
    result_is(msg, 404).then(|| ControlMessage::ChannelFailure {
        message: string_field(msg, "message"),
    })
}

fn match_health_check_reply(msg: &Notification) -> Option<ControlMessage> {
    (is_metadata(msg) && event_message(msg) == Some(PONG_MESSAGE))
        .then_some(ControlMessage::HealthCheckReply)
}

fn match_close_warning(msg: &Notification) -> Option<ControlMessage> {
    (str_field(msg, "topicName") == Some(SOCKET_CLOSING_TOPIC))
        .then_some(ControlMessage::CloseWarning)
}

fn match_subscribed(msg: &Notification) -> Option<ControlMessage> {
    (result_is(msg, 200) && str_field(msg, "status") == Some("subscribed")).then(|| {
        ControlMessage::Subscribed {
            correlation_id: string_field(msg, "correlationId").map(CorrelationId::from_string),
        }
    })
}

fn match_subscription_failure(msg: &Notification) -> Option<ControlMessage> {
    let failed = matches!(
        str_field(msg, "status"),
        Some("failure" | "failed" | "error")
    );
    (result_is(msg, 400) && failed).then(|| ControlMessage::SubscriptionFailure {
        message: string_field(msg, "message"),
    })
}

// ── Field helpers ───────────────────────────────────────────────────────────

fn str_field<'a>(msg: &'a Notification, key: &str) -> Option<&'a str> {
    msg.get(key).and_then(Value::as_str)
}

fn string_field(msg: &Notification, key: &str) -> Option<String> {
    str_field(msg, key).map(String::from)
}

fn is_metadata(msg: &Notification) -> bool {
    str_field(msg, "topicName") == Some(CHANNEL_METADATA_TOPIC)
}

fn event_message(msg: &Notification) -> Option<&str> {
    msg.get("eventBody")?.get("message")?.as_str()
}

/// `result` may arrive as `"404"` or `404`. Strings must match exactly.
fn result_is(msg: &Notification, code: u64) -> bool {
    match msg.get("result") {
        Some(Value::String(s)) => *s == code.to_string(),
        Some(Value::Number(n)) => n.as_u64() == Some(code),
        _ => false,
    }
}

// ── Outgoing requests ───────────────────────────────────────────────────────

/// `{"message":"subscribe","topics":[...],"correlationId":"..."}`
pub fn subscribe_request(topics: &[String], correlation_id: &CorrelationId) -> Notification {
    to_map(json!({
        "message": "subscribe",
        "topics": topics,
        "correlationId": correlation_id,
    }))
}

/// `{"message":"ping"}`
pub fn ping_request() -> Notification {
    to_map(json!({ "message": "ping" }))
}

fn to_map(value: Value) -> Notification {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
