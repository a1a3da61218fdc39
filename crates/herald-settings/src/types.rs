//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! overrides the keys it names.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// Notification channel settings.
    pub channel: ChannelSettings,
    /// Logging output settings.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Reject values the driver cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.channel.validate()
    }
}

/// What the driver does with a payload that does not decode to a mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Surface a receive failure to the caller.
    #[default]
    Raise,
    /// Log and keep listening.
    Skip,
}

/// What the driver does when the server warns it will close the channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseWarningPolicy {
    /// Raise channel-expiring so the caller can roll over.
    #[default]
    Raise,
    /// Roll over onto the current URI and keep listening.
    Rollover,
}

/// Notification channel settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Channel URI (`wss://...`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Hard channel lifetime in milliseconds.
    pub lifetime_ms: u64,
    /// Maximum silence between server heartbeats in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// How long to wait for a subscription or health-check reply in milliseconds.
    pub response_timeout_ms: u64,
    /// Re-subscribe automatically when the lifetime runs out.
    pub autoextend: bool,
    /// Reconnect automatically when the transport fails.
    pub reconnect_on_failure: bool,
    /// Handling of undecodable payloads.
    pub malformed_messages: MalformedPolicy,
    /// Handling of server close warnings.
    pub close_warning: CloseWarningPolicy,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            uri: None,
            topics: Vec::new(),
            lifetime_ms: 23 * 60 * 60 * 1000,
            heartbeat_timeout_ms: 40_000,
            response_timeout_ms: 7_000,
            autoextend: true,
            reconnect_on_failure: true,
            malformed_messages: MalformedPolicy::Raise,
            close_warning: CloseWarningPolicy::Raise,
        }
    }
}

impl ChannelSettings {
    /// Reject zero durations.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("lifetimeMs", self.lifetime_ms),
            ("heartbeatTimeoutMs", self.heartbeat_timeout_ms),
            ("responseTimeoutMs", self.response_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Logging output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
