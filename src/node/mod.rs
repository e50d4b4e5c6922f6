//! Node context
//!
//! [`Node`] is the explicit per-instance context: it owns the link
//! registry, the policy loaded from configuration and the aggregate
//! keying/voting state. All components are `impl Node` blocks split by
//! concern:
//!
//! - [`lifecycle`]: connect, disconnect, retry, reap
//! - [`dispatch`]: control-frame decoding and routing
//! - [`keying`]: per-link debounce and aggregate receive/transmit state
//! - [`voting`]: receiver arbitration
//!
//! The node never blocks. The poll scheduler drives it through
//! [`Node::tick`] and [`Node::handle_transport_event`] while holding the
//! node lock.

pub mod dispatch;
pub mod handle;
pub mod keying;
pub mod lifecycle;
pub mod voting;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::audio::{AudioSource, MixFrame, SharedMixBus};
use crate::config::NodeConfig;
use crate::link::{Link, LinkId, LinkRegistry, LinkStatus, StatCategory};
use crate::network::{LinkFrame, NodeDirectory, Transport, TransportEvent};
use crate::protocol::linklist::{self, EntryMode, NodeEntry};
use crate::protocol::{KeyProtocol, Message};
use crate::telemetry::{KeyListener, Telemetry, TelemetryEvent};
use crate::timer::Countdown;

pub use handle::NodeHandle;
pub use lifecycle::ConnectOutcome;
pub use voting::{Arbitrator, VoteMode, VoteWinner};

/// One running repeater node
pub struct Node {
    name: String,
    config: NodeConfig,
    links: LinkRegistry,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn NodeDirectory>,
    telemetry: Arc<dyn Telemetry>,
    mix_bus: Option<SharedMixBus>,
    key_listener: Option<KeyListener>,

    /// Local receiver active
    keyed: bool,
    /// Transmitter active
    tx_keyed: bool,
    /// Any peer link debounced-keyed
    remote_rx: bool,
    rx_rssi: u8,
    rx_active_prev: bool,
    hang_timer: Countdown,
    last_key_edge: Instant,

    arbitrator: Arbitrator,
    /// Weak reference to the winning link; lookup only
    voted_link: Option<LinkId>,

    top_keys: BTreeMap<String, DateTime<Utc>>,
    seq: u32,
}

/// Snapshot of the node for management front-ends
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub keyed: bool,
    pub tx_keyed: bool,
    pub remote_rx: bool,
    pub rx_rssi: u8,
    pub vote_mode: VoteMode,
    pub vote_winner: VoteWinner,
    pub link_count: usize,
    pub links: Vec<LinkStatus>,
    pub reachable: Vec<NodeEntry>,
    pub top_keyed: Vec<TopKey>,
}

/// Last time a node was reported keyed
#[derive(Debug, Clone, Serialize)]
pub struct TopKey {
    pub node: String,
    pub at: DateTime<Utc>,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn NodeDirectory>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let arbitrator = Arbitrator::new(
            config.voting.mode,
            config.voting.margin,
            config.voting.interval_ticks,
        );
        Self {
            name: config.node.name.clone(),
            links: LinkRegistry::new(config.links.max_links),
            config,
            transport,
            directory,
            telemetry,
            mix_bus: None,
            key_listener: None,
            keyed: false,
            tx_keyed: false,
            remote_rx: false,
            rx_rssi: 0,
            rx_active_prev: false,
            hang_timer: Countdown::IDLE,
            last_key_edge: Instant::now(),
            arbitrator,
            voted_link: None,
            top_keys: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Route gated audio to a mix bus
    pub fn set_mix_bus(&mut self, bus: SharedMixBus) {
        self.mix_bus = Some(bus);
    }

    /// Register the keying-edge callback
    pub fn set_key_listener(&mut self, listener: KeyListener) {
        self.key_listener = Some(listener);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links
            .find_by_name(name)
            .and_then(|id| self.links.get(id))
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub fn is_tx_keyed(&self) -> bool {
        self.tx_keyed
    }

    pub fn remote_rx(&self) -> bool {
        self.remote_rx
    }

    /// One scheduler tick: timers, keying, voting, reaping, advertising
    pub fn tick(&mut self, elapsed: Duration) {
        let adverts = self.advance_timers(elapsed);
        self.recompute_keying();
        self.send_key_indications();
        self.run_vote();
        self.reap();
        for id in adverts {
            self.advertise(id);
        }
    }

    /// Apply one transport completion or received frame
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        trace!("Transport event on {}", event.conn());
        match event {
            TransportEvent::Incoming { conn, node, mode } => self.accept_inbound(conn, node, mode),
            TransportEvent::Connected { conn } => match self.links.find_by_conn(conn) {
                Some(id) => self.on_transport_up(id),
                None => {
                    debug!("Connect completed for orphaned {}, closing", conn);
                    self.transport.close(conn);
                }
            },
            TransportEvent::ConnectFailed { conn, reason } => {
                if let Some(id) = self.links.find_by_conn(conn) {
                    self.on_link_failure(id, &reason);
                }
            }
            TransportEvent::Closed { conn } => {
                if let Some(id) = self.links.find_by_conn(conn) {
                    self.on_link_failure(id, "connection closed");
                }
            }
            TransportEvent::Frame { conn, frame } => {
                let Some(id) = self.links.find_by_conn(conn) else {
                    trace!("Frame for unknown {}", conn);
                    return;
                };
                if self.links.get(id).map_or(true, |l| l.kill_me) {
                    return;
                }
                self.handle_frame(id, frame);
            }
        }
    }

    fn handle_frame(&mut self, id: LinkId, frame: LinkFrame) {
        match frame {
            LinkFrame::Text(line) => self.handle_text(id, &line),
            LinkFrame::Voice { rssi, samples } => self.on_voice(id, rssi, samples),
            LinkFrame::Key => self.on_key_frame(id, true),
            LinkFrame::Unkey => self.on_key_frame(id, false),
            LinkFrame::Hello { node, .. } => {
                debug!("Ignoring repeated hello from {} on {}", node, id);
            }
        }
    }

    /// Advance every countdown. Returns links due a node-list advertisement.
    fn advance_timers(&mut self, elapsed: Duration) -> Vec<LinkId> {
        let mut retries = Vec::new();
        let mut closes = Vec::new();
        let mut handshakes = Vec::new();
        let mut adverts = Vec::new();

        for link in self.links.iter_mut().filter(|l| l.is_active()) {
            link.elapsed += elapsed;
            link.demand.advance(elapsed);

            if link.retry_timer.advance(elapsed) {
                retries.push(link.id);
            }
            if link.disc_timer.advance(elapsed) {
                closes.push(link.id);
            }
            if link.new_key_timer.advance(elapsed) {
                handshakes.push(link.id);
            }
            if link.rx_linger_timer.advance(elapsed) && link.new_key == KeyProtocol::Linger {
                link.last_rx = false;
                link.last_real_rx = false;
            }
            if link.rx_failsafe_timer.advance(elapsed) && link.last_real_rx {
                warn!("No key refresh from {}, forcing unkey", link.name);
                link.last_rx = false;
                link.last_real_rx = false;
            }
            link.retx_timer.advance(elapsed);
            if link.link_list_age.advance(elapsed) {
                debug!("Node list from {} went stale", link.name);
                link.link_list.clear();
            }
            if link.link_list_timer.advance(elapsed) {
                adverts.push(link.id);
            }
        }
        self.hang_timer.advance(elapsed);

        for id in handshakes {
            debug!("No capability handshake on {}, treating peer as legacy", id);
            self.complete_handshake(id);
        }
        for id in closes {
            self.finish_disconnect(id);
        }
        for id in retries {
            self.retry_connection(id);
        }
        adverts
    }

    /// Send a frame on a link's connection, if it has one up
    fn send_frame(&mut self, id: LinkId, frame: LinkFrame) -> bool {
        let Some(link) = self.links.get_mut(id) else {
            return false;
        };
        let Some(conn) = link.conn.filter(|_| link.connected) else {
            return false;
        };
        let category = match &frame {
            LinkFrame::Text(_) | LinkFrame::Hello { .. } => StatCategory::Text,
            LinkFrame::Voice { .. } => StatCategory::Voice,
            LinkFrame::Key => StatCategory::Key,
            LinkFrame::Unkey => StatCategory::Unkey,
        };
        match self.transport.send(conn, frame) {
            Ok(()) => {
                link.stats.count_tx(category);
                true
            }
            Err(e) => {
                warn!("Send to {} failed: {}", link.name, e);
                false
            }
        }
    }

    /// Send a control line, queueing it while the link is still coming up
    fn send_text(&mut self, id: LinkId, line: String) {
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        if link.connected && link.conn.is_some() {
            self.send_frame(id, LinkFrame::Text(line));
        } else if !link.queue_text(line) {
            debug!("Text queue full for {}, dropped frame", link.name);
        }
    }

    fn flush_text(&mut self, id: LinkId) {
        while let Some(line) = self.links.get(id).and_then(|l| l.pop_text()) {
            self.send_frame(id, LinkFrame::Text(line));
        }
    }

    /// Send our node list to one peer
    fn advertise(&mut self, id: LinkId) {
        let Some(target) = self.links.get(id) else {
            return;
        };
        if !target.is_active() || !target.is_peer() || !target.connected {
            return;
        }
        let mut builder = linklist::NodeListBuilder::new();
        for link in self.links.iter() {
            if link.id == id || !link.is_active() || !link.is_peer() {
                continue;
            }
            let mode = EntryMode::for_link(link.mode, link.this_connected);
            builder.push(mode, &link.name, &link.link_list);
        }
        let message = Message::NodeList(builder.finish());
        self.send_frame(id, LinkFrame::Text(message.to_string()));

        let period = self.config.timers.linklist();
        if let Some(link) = self.links.get_mut(id) {
            link.link_list_timer.arm(period);
        }
    }

    /// Schedule an early node-list advertisement to every peer
    fn hurry_adverts(&mut self, except: Option<LinkId>) {
        let short = self.config.timers.linklist_short();
        for link in self.links.iter_mut() {
            if Some(link.id) != except && link.connected {
                link.link_list_timer.arm_sooner(short);
            }
        }
    }

    fn notify(&self, event: TelemetryEvent) {
        self.telemetry.notify(event);
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Push audio to the mix bus, silenced if it lost the vote
    fn write_audio(&self, source: AudioSource, samples: Vec<i16>) {
        let Some(bus) = &self.mix_bus else {
            return;
        };
        let mut frame = MixFrame::new(source, samples);
        if !self.audio_passes(&frame.source) {
            frame.silence();
        }
        bus.push(frame);
    }

    /// Every node reachable through our links, excluding ourselves
    pub fn reachable_nodes(&self) -> Vec<NodeEntry> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for link in self.links.iter().filter(|l| l.is_active() && l.is_peer()) {
            let direct = NodeEntry {
                mode: EntryMode::for_link(link.mode, link.this_connected),
                name: link.name.clone(),
            };
            for entry in std::iter::once(direct).chain(linklist::parse(&link.link_list)) {
                if entry.name != self.name && seen.insert(entry.name.clone()) {
                    out.push(entry);
                }
            }
        }
        out
    }

    /// Most recently keyed nodes first
    pub fn top_keyed(&self) -> Vec<TopKey> {
        let mut keys: Vec<TopKey> = self
            .top_keys
            .iter()
            .map(|(node, at)| TopKey {
                node: node.clone(),
                at: *at,
            })
            .collect();
        keys.sort_by(|a, b| b.at.cmp(&a.at));
        keys
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            name: self.name.clone(),
            keyed: self.keyed,
            tx_keyed: self.tx_keyed,
            remote_rx: self.remote_rx,
            rx_rssi: self.rx_rssi,
            vote_mode: self.arbitrator.mode(),
            vote_winner: self.current_vote_winner(),
            link_count: self.links.peer_count(),
            links: self
                .links
                .iter()
                .filter(|l| l.is_active())
                .map(Link::status)
                .collect(),
            reachable: self.reachable_nodes(),
            top_keyed: self.top_keyed(),
        }
    }
}
