//! Transport seam between the control plane and the packet network
//!
//! The node never performs blocking I/O itself. It asks a [`Transport`] to
//! open, write to and close connections; completions and received frames
//! come back as [`TransportEvent`]s on a channel drained by the poll
//! scheduler.

pub mod directory;
pub mod frame;
pub mod tcp;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransportError;
use crate::link::LinkMode;

pub use directory::{NodeDirectory, StaticDirectory};
pub use frame::LinkFrame;
pub use tcp::TcpTransport;

/// Transport-level connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Completion or readiness reported by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer connected to us and introduced itself
    Incoming {
        conn: ConnId,
        node: String,
        mode: LinkMode,
    },
    /// An outbound connection request succeeded
    Connected { conn: ConnId },
    /// An outbound connection request failed
    ConnectFailed { conn: ConnId, reason: String },
    /// One frame arrived on a connection
    Frame { conn: ConnId, frame: LinkFrame },
    /// The connection went away
    Closed { conn: ConnId },
}

impl TransportEvent {
    pub fn conn(&self) -> ConnId {
        match self {
            TransportEvent::Incoming { conn, .. }
            | TransportEvent::Connected { conn }
            | TransportEvent::ConnectFailed { conn, .. }
            | TransportEvent::Frame { conn, .. }
            | TransportEvent::Closed { conn } => *conn,
        }
    }
}

/// Packet transport used by the node.
///
/// Implementations must not block: `request_connection` only starts the
/// attempt, `send` only enqueues.
pub trait Transport: Send + Sync {
    /// Begin connecting to `address`; completion is reported as
    /// [`TransportEvent::Connected`] or [`TransportEvent::ConnectFailed`].
    fn request_connection(&self, address: &str, mode: LinkMode) -> Result<ConnId, TransportError>;

    /// Queue a frame for a connection.
    fn send(&self, conn: ConnId, frame: LinkFrame) -> Result<(), TransportError>;

    /// Close a connection. Closing an unknown connection is a no-op.
    fn close(&self, conn: ConnId);
}
