//! # rptlink
//!
//! Control plane for a network of linked voice-radio repeater nodes.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              NODE                                     │
//! │                                                                       │
//! │   radio rx ──► set_local_rx / local_audio                             │
//! │                      │                                                │
//! │                      ▼                                                │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │                Node context (node::Node)                        │  │
//! │  │                                                                 │  │
//! │  │   lifecycle ──► LinkRegistry ◄── dispatch (protocol codec)      │  │
//! │  │                      │                                          │  │
//! │  │                      ▼                                          │  │
//! │  │   keying (debounce, aggregate rx/tx) ──► voting (arbitrator)    │  │
//! │  └────────────┬──────────────────────────────┬────────────────────┘  │
//! │               │ tick / events                │ gated audio            │
//! │  ┌────────────┴───────────┐        ┌─────────▼─────────┐              │
//! │  │  Poll scheduler        │        │  MixBus            │──► mixer    │
//! │  │  (scheduler)           │        │  (audio::mixbus)   │              │
//! │  └────────────┬───────────┘        └───────────────────┘              │
//! │               │ TransportEvent                                        │
//! │  ┌────────────┴───────────────────────────────────────────────────┐  │
//! │  │        TCP transport (network::tcp) - one task pair per peer    │  │
//! │  │        Frames: [len u32 BE | bincode LinkFrame]                  │  │
//! │  └────────────┬───────────────────────────────────────────────────┘  │
//! └───────────────┼───────────────────────────────────────────────────────┘
//!                 │ TCP
//!                 ▼
//!           linked nodes
//! ```
//!
//! Management front-ends reach the node through [`node::NodeHandle`]; the
//! bundled HTTP API lives in [`api`].

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod link;
pub mod network;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod telemetry;
pub mod timer;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Scheduler period
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

    /// Delay between outbound connection attempts
    pub const DEFAULT_RETRY_MS: u64 = 5000;

    /// Hold-off before an edge-reporting peer is treated as unkeyed
    pub const DEFAULT_RX_LINGER_MS: u64 = 50;

    /// How long to wait for the capability handshake
    pub const DEFAULT_NEWKEY_MS: u64 = 2000;

    /// Key indication refresh period for redundant-retransmit peers
    pub const DEFAULT_REDUNDANT_TX_MS: u64 = 2000;

    /// Node-list advertisement period
    pub const DEFAULT_LINKLIST_MS: u64 = 10_000;

    /// Early advertisement after a topology or keying change
    pub const DEFAULT_LINKLIST_SHORT_MS: u64 = 200;

    /// Delay between sending DISCONNECT and closing the connection
    pub const DEFAULT_DISC_GRACE_MS: u64 = 250;

    /// Attempts for an on-demand link
    pub const MAX_RETRIES_DEMAND: u32 = 5;

    /// Attempts for a permanent link (effectively forever)
    pub const MAX_RETRIES_PERMANENT: u32 = 1_000_000_000;

    pub const MAX_LINKS: usize = 64;

    pub const MAX_NODE_NAME_LEN: usize = 32;

    /// Demand-mode value meaning "permanently on"
    pub const MAX_FOLLOW_MS: u64 = 25_000_000;

    /// Largest encoded link frame
    pub const MAX_FRAME_LEN: usize = 64 * 1024;

    pub const DEFAULT_LINK_PORT: u16 = 4570;

    pub const DEFAULT_API_PORT: u16 = 8080;
}
