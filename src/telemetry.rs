//! Telemetry and announcement events
//!
//! The control plane reports user-visible happenings (link up/down,
//! courtesy tones, relayed text, keying edges) through a [`Telemetry`]
//! sink. Sinks are fire-and-forget: `notify` must never block the poll
//! loop.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback for per-node keying edges: `(node name, keyed)`
pub type KeyListener = Box<dyn Fn(&str, bool) + Send + Sync>;

/// Something the announcement subsystem may want to voice or log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TelemetryEvent {
    /// Outbound connect started
    ConnectStarted { node: String },
    /// Connect requested for a link already up in that mode
    AlreadyConnected { node: String },
    /// Connect requested for a node missing from the directory
    NodeNotFound { node: String },
    /// Handshake completed for the first time on this link
    Connected { node: String },
    /// Outbound link gave up without ever connecting
    ConnectFailed { node: String, at: DateTime<Utc> },
    /// Link that had been up went away for good
    Disconnected { node: String, at: DateTime<Utc> },
    /// Debounced keying edge of a peer
    KeyChanged { node: String, keyed: bool },
    /// Courtesy tone after a linked node unkeys
    LinkUnkey { node: String },
    /// Courtesy tone after the local receiver unkeys
    Unkey,
    TextMessage { src: String, text: String },
    Variable { src: String, payload: String },
    Dtmf { cmd_node: String, src: String, digit: char },
    ToneControl { src: String, group: String, directive: String },
    Ident { src: String, payload: String },
    Location { src: String, coords: String },
    TopKey { node: String, secs: u64 },
    VoteWinner { winner: String },
}

/// Telemetry sink
pub trait Telemetry: Send + Sync {
    fn notify(&self, event: TelemetryEvent);
}

/// Writes every event to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn notify(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::ConnectFailed { node, at } => {
                warn!(node = %node, at = %at.to_rfc3339(), "connect failed");
            }
            TelemetryEvent::Disconnected { node, at } => {
                info!(node = %node, at = %at.to_rfc3339(), "link disconnected");
            }
            TelemetryEvent::KeyChanged { .. } => debug!(?event, "telemetry"),
            _ => info!(?event, "telemetry"),
        }
    }
}

/// Hands events to another thread over a bounded channel.
///
/// A full channel drops the event and counts it.
#[derive(Clone)]
pub struct ChannelTelemetry {
    tx: Sender<TelemetryEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelTelemetry {
    pub fn bounded(capacity: usize) -> (Self, Receiver<TelemetryEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Telemetry for ChannelTelemetry {
    fn notify(&self, event: TelemetryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Forwards to several sinks in order
pub struct FanOut(pub Vec<Arc<dyn Telemetry>>);

impl Telemetry for FanOut {
    fn notify(&self, event: TelemetryEvent) {
        if let Some((last, rest)) = self.0.split_last() {
            for sink in rest {
                sink.notify(event.clone());
            }
            last.notify(event);
        }
    }
}
