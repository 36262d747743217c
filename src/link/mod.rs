//! Network link to the remote application
//!
//! Two paired TCP connections: the bridge sends commands on one and receives
//! updates on the other. Both halves reconnect on their own with a bounded
//! linear backoff.

pub mod frame;
pub mod inbound;
pub mod outbound;

use std::fmt;

pub use frame::{encode_frame, InboundMessage, LineFramer};
pub use inbound::{InboundLink, LinkEvent, LinkHandler};
pub use outbound::OutboundLink;

/// Connection state of one link half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}
