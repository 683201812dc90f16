//! Session channel to the launcher server.
//!
//! A WebSocket carrying `{"event", "data"}` JSON frames. The channel owns the
//! connection state machine (`Disconnected → Connecting → Connected`, with
//! `Reconnecting` after a dropped transport) and this client's current
//! session record.

pub mod backoff;
pub mod channel;
pub mod error;
mod subscribers;

pub use {
    backoff::{Backoff, ReconnectPolicy},
    channel::{ChannelOptions, SessionChannel, websocket_url},
    error::ChannelError,
    subscribers::Subscription,
};
