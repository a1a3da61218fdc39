//! Correlation id newtype.
//!
//! Every subscribe request carries a fresh [`CorrelationId`] so its
//! confirmation can be told apart from a stale one for an earlier request.

use std::fmt;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

/// Number of characters in a generated correlation id.
pub const CORRELATION_ID_LEN: usize = 16;

/// Random token pairing a sent request with its confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new random id of [`CORRELATION_ID_LEN`] ASCII alphanumerics.
    #[must_use]
    pub fn random() -> Self {
        let id = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(CORRELATION_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Wrap an id received from the server.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for CorrelationId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}
