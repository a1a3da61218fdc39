//! Runtime configuration for a [`crate::Channel`].

use std::time::Duration;

use herald_settings::ChannelSettings;
pub use herald_settings::{CloseWarningPolicy, MalformedPolicy};

/// Default hard lifetime of a channel (23 hours).
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(23 * 60 * 60);
/// Default maximum silence between heartbeats.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(40);
/// Default wait for subscription and health-check replies.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(7);

/// Everything a channel needs to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Channel URI.
    pub uri: String,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Hard lifetime.
    pub lifetime: Duration,
    /// Maximum silence between heartbeats.
    pub heartbeat_timeout: Duration,
    /// Wait for subscription and health-check replies.
    pub response_timeout: Duration,
    /// Re-subscribe when the lifetime runs out instead of raising expiring.
    pub autoextend: bool,
    /// Reconnect on transport faults instead of raising a receive failure.
    pub reconnect_on_failure: bool,
    /// Handling of undecodable payloads.
    pub malformed: MalformedPolicy,
    /// Handling of server close warnings.
    pub close_warning: CloseWarningPolicy,
}

impl ChannelConfig {
    /// Config for `uri` and `topics` with every other field at its default.
    pub fn new(uri: impl Into<String>, topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            uri: uri.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            lifetime: DEFAULT_LIFETIME,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            autoextend: true,
            reconnect_on_failure: true,
            malformed: MalformedPolicy::default(),
            close_warning: CloseWarningPolicy::default(),
        }
    }

    /// Build from loaded settings. `uri` and `topics` come from the caller
    /// because settings may leave them unset.
    pub fn from_settings(uri: impl Into<String>, topics: Vec<String>, settings: &ChannelSettings) -> Self {
        Self {
            uri: uri.into(),
            topics,
            lifetime: Duration::from_millis(settings.lifetime_ms),
            heartbeat_timeout: Duration::from_millis(settings.heartbeat_timeout_ms),
            response_timeout: Duration::from_millis(settings.response_timeout_ms),
            autoextend: settings.autoextend,
            reconnect_on_failure: settings.reconnect_on_failure,
            malformed: settings.malformed_messages,
            close_warning: settings.close_warning,
        }
    }

    /// Set the hard lifetime.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the heartbeat timeout.
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Enable or disable automatic lifetime extension.
    #[must_use]
    pub fn with_autoextend(mut self, autoextend: bool) -> Self {
        self.autoextend = autoextend;
        self
    }

    /// Enable or disable reconnect on transport faults.
    #[must_use]
    pub fn with_reconnect_on_failure(mut self, reconnect: bool) -> Self {
        self.reconnect_on_failure = reconnect;
        self
    }

    /// Set the malformed-payload policy.
    #[must_use]
    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }

    /// Set the close-warning policy.
    #[must_use]
    pub fn with_close_warning_policy(mut self, policy: CloseWarningPolicy) -> Self {
        self.close_warning = policy;
        self
    }
}
