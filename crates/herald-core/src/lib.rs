//! # herald-core
//!
//! Foundation types shared by the Herald crates:
//!
//! - **Errors**: [`ChannelError`] with its [`ErrorKind`] hierarchy and [`Reason`] codes
//! - **Correlation ids**: [`CorrelationId`], the token pairing a subscribe
//!   request with its confirmation
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{ChannelError, ErrorKind, Reason, Result};
pub use ids::CorrelationId;
