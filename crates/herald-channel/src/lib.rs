//! # herald-channel
//!
//! Client-side driver for a long-lived push-notification channel.
//!
//! - **Timeouts**: [`Timeouts`], named deadlines raced against incoming data
//! - **Messages**: [`classify`] splits control messages from notifications
//! - **Transport / codec**: [`Transport`] and [`Codec`] seams, with
//!   [`WebSocketTransport`] and [`JsonCodec`] as the production implementations
//! - **Channel**: [`Channel`], whose [`Channel::next`] yields one notification
//!   at a time while absorbing reconnects, extensions and rollovers

#![deny(unsafe_code)]

pub mod channel;
pub mod codec;
pub mod config;
pub mod messages;
pub mod timeouts;
pub mod transport;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use channel::{Channel, ChannelState, CloseHandle};
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{ChannelConfig, CloseWarningPolicy, MalformedPolicy};
pub use messages::{Classified, ControlMessage, Notification, classify};
pub use timeouts::{Timeout, TimeoutError, Timeouts};
pub use transport::{Connection, Transport, TransportError};
pub use websocket::WebSocketTransport;
