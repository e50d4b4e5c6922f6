//! Link records
//!
//! A [`Link`] is one peer connection. It is owned by the
//! [`LinkRegistry`] from creation until it is reaped; everything else
//! refers to it by [`LinkId`].

pub mod registry;
pub mod stats;

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::constants::MAX_FOLLOW_MS;
use crate::network::ConnId;
use crate::protocol::KeyProtocol;
use crate::timer::Countdown;

pub use registry::LinkRegistry;
pub use stats::{ChanStats, StatCategory};

/// Registry handle, allocated in connection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Requested traffic direction of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkMode {
    /// Receive only
    Monitor = 0,
    /// Full two-way
    Transceive = 1,
    /// Receive only, local console attachment
    LocalMonitor = 2,
}

impl LinkMode {
    pub fn transmits(self) -> bool {
        self == LinkMode::Transceive
    }
}

/// Dynamic demand gating of a link, as a countdown in milliseconds.
///
/// `0` off, `1` armed on demand, `[2, MAX_FOLLOW_MS)` follow countdown,
/// `MAX_FOLLOW_MS` permanently on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DemandMode(u64);

impl DemandMode {
    pub const OFF: DemandMode = DemandMode(0);
    pub const DEMAND: DemandMode = DemandMode(1);
    pub const ON: DemandMode = DemandMode(MAX_FOLLOW_MS);

    pub fn follow(duration: Duration) -> Self {
        let ms = duration.as_millis().min(u128::from(MAX_FOLLOW_MS - 1)) as u64;
        DemandMode(ms.max(2))
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether traffic flows to the link right now
    pub fn passes(self, node_keyed: bool) -> bool {
        self.0 >= 2 || (self.0 == 1 && node_keyed)
    }

    /// Raise an armed link into its follow countdown while traffic is up
    pub fn trigger(&mut self, follow: Duration) {
        if (1..MAX_FOLLOW_MS).contains(&self.0) {
            *self = DemandMode::follow(follow);
        }
    }

    /// Decay a follow countdown; it settles back at armed
    pub fn advance(&mut self, elapsed: Duration) {
        if self.0 >= 2 && self.0 < MAX_FOLLOW_MS {
            let ms = elapsed.as_millis().min(u128::from(u64::MAX)) as u64;
            self.0 = self.0.saturating_sub(ms).max(1);
        }
    }
}

/// One peer connection
#[derive(Debug)]
pub struct Link {
    pub id: LinkId,
    pub name: String,

    // Direction and mode
    pub outbound: bool,
    pub mode: LinkMode,
    pub perma: bool,
    pub demand: DemandMode,

    // Connection state
    pub conn: Option<ConnId>,
    pub address: Option<String>,
    pub connected: bool,
    pub this_connected: bool,
    pub has_connected: bool,
    pub disced: bool,
    pub kill_me: bool,
    pub retries: u32,
    pub max_retries: u32,
    pub retry_timer: Countdown,
    pub disc_timer: Countdown,
    pub elapsed: Duration,
    pub connect_time: Option<chrono::DateTime<chrono::Utc>>,

    // Keying state
    pub last_rx: bool,
    pub last_real_rx: bool,
    pub last_rx1: bool,
    pub rx_linger_timer: Countdown,
    pub new_key: KeyProtocol,
    pub new_key_timer: Countdown,
    pub rx_failsafe_timer: Countdown,
    /// Key indication last sent to the peer
    pub last_tx: bool,
    pub retx_timer: Countdown,

    // Voting
    pub voter_link: bool,
    pub vote_winner: bool,
    pub rssi: u8,

    // Protocol bookkeeping
    pub link_list: String,
    pub link_list_timer: Countdown,
    pub link_list_age: Countdown,
    text_queue: ArrayQueue<String>,
    pub queue_dropped: u64,
    pub stats: ChanStats,
}

impl Link {
    pub fn new(id: LinkId, name: impl Into<String>, mode: LinkMode, queue_len: usize) -> Self {
        Self {
            id,
            name: name.into(),
            outbound: false,
            mode,
            perma: false,
            demand: DemandMode::ON,
            conn: None,
            address: None,
            connected: false,
            this_connected: false,
            has_connected: false,
            disced: false,
            kill_me: false,
            retries: 0,
            max_retries: 0,
            retry_timer: Countdown::IDLE,
            disc_timer: Countdown::IDLE,
            elapsed: Duration::ZERO,
            connect_time: None,
            last_rx: false,
            last_real_rx: false,
            last_rx1: false,
            rx_linger_timer: Countdown::IDLE,
            new_key: KeyProtocol::Legacy,
            new_key_timer: Countdown::IDLE,
            rx_failsafe_timer: Countdown::IDLE,
            last_tx: false,
            retx_timer: Countdown::IDLE,
            voter_link: false,
            vote_winner: false,
            rssi: 0,
            link_list: String::new(),
            link_list_timer: Countdown::IDLE,
            link_list_age: Countdown::IDLE,
            text_queue: ArrayQueue::new(queue_len.max(1)),
            queue_dropped: 0,
            stats: ChanStats::default(),
        }
    }

    /// Network peer, as opposed to a local console/monitor attachment
    pub fn is_peer(&self) -> bool {
        is_peer_name(&self.name)
    }

    /// Live and not on its way out
    pub fn is_active(&self) -> bool {
        !self.kill_me
    }

    /// Reset per-connection state ahead of a (re)connection attempt
    pub fn reset_session(&mut self) {
        self.connected = false;
        self.this_connected = false;
        self.last_rx = false;
        self.last_real_rx = false;
        self.rx_linger_timer.disarm();
        self.new_key = KeyProtocol::Legacy;
        self.new_key_timer.disarm();
        self.rx_failsafe_timer.disarm();
        self.last_tx = false;
        self.retx_timer.disarm();
        self.rssi = 0;
        self.link_list.clear();
        self.link_list_timer.disarm();
        self.link_list_age.disarm();
    }

    /// Queue a text frame for when the link comes up. Returns `false` if
    /// the queue is full and the frame was dropped.
    pub fn queue_text(&mut self, line: String) -> bool {
        match self.text_queue.push(line) {
            Ok(()) => true,
            Err(_) => {
                self.queue_dropped += 1;
                false
            }
        }
    }

    pub fn pop_text(&self) -> Option<String> {
        self.text_queue.pop()
    }

    pub fn queued_text(&self) -> usize {
        self.text_queue.len()
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            name: self.name.clone(),
            outbound: self.outbound,
            mode: self.mode,
            permanent: self.perma,
            state: self.state(),
            demand_ms: self.demand.raw(),
            key_protocol: self.new_key,
            keyed: self.last_real_rx,
            transmitting: self.last_tx,
            voter: self.voter_link,
            vote_winner: self.vote_winner,
            rssi: self.rssi,
            retries: self.retries,
            connected_secs: self.connect_time.map(|t| {
                (chrono::Utc::now() - t).num_seconds().max(0) as u64
            }),
            link_list: self.link_list.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn state(&self) -> LinkState {
        if self.kill_me {
            LinkState::Closing
        } else if self.disced {
            LinkState::Disconnecting
        } else if self.this_connected {
            LinkState::Up
        } else if self.connected {
            LinkState::Handshaking
        } else if self.retry_timer.is_running() {
            LinkState::Retrying
        } else {
            LinkState::Connecting
        }
    }
}

pub fn is_peer_name(name: &str) -> bool {
    !name.starts_with('0')
}

/// Coarse link state for status reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    Connecting,
    Handshaking,
    Up,
    Retrying,
    Disconnecting,
    Closing,
}

/// Snapshot of one link for management front-ends
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub name: String,
    pub outbound: bool,
    pub mode: LinkMode,
    pub permanent: bool,
    pub state: LinkState,
    /// Demand gate countdown in ms, see [`DemandMode`]
    pub demand_ms: u64,
    pub key_protocol: KeyProtocol,
    pub keyed: bool,
    pub transmitting: bool,
    pub voter: bool,
    pub vote_winner: bool,
    pub rssi: u8,
    pub retries: u32,
    pub connected_secs: Option<u64>,
    pub link_list: String,
    pub stats: ChanStats,
}
