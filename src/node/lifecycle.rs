//! Link lifecycle: connect, accept, handshake, retry, disconnect, reap

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Node;
use crate::error::LinkError;
use crate::link::{DemandMode, Link, LinkId, LinkMode};
use crate::network::{ConnId, LinkFrame};
use crate::protocol::{KeyProtocol, Message, NEWKEY1};
use crate::telemetry::TelemetryEvent;

/// Successful result of [`Node::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectOutcome {
    /// A new connection attempt is under way
    Connecting,
    /// An existing link in another mode was torn down and is being rebuilt
    ModeChanged,
    /// A link in the requested mode already exists
    AlreadyConnected,
}

impl Node {
    /// Request an outbound link to `name`.
    ///
    /// Policy failures are rejected before any connection attempt. The
    /// transport completes the attempt later through
    /// [`Node::handle_transport_event`].
    pub fn connect(
        &mut self,
        name: &str,
        mode: LinkMode,
        permanent: bool,
    ) -> Result<ConnectOutcome, LinkError> {
        self.validate_name(name)?;
        if name == self.name {
            return Err(LinkError::SelfConnect);
        }

        let existing = self.links.find_by_name(name);
        // a link still in its disconnect grace period is replaced, not reused
        let closing = existing
            .and_then(|id| self.links.get(id))
            .is_some_and(|l| l.disced);
        if let Some(id) = existing.filter(|_| !closing) {
            let budget = self.config.links.max_retries_permanent;
            if let Some(link) = self.links.get_mut(id).filter(|l| l.mode == mode) {
                if permanent && !link.perma {
                    link.perma = true;
                    link.max_retries = budget;
                }
                debug!("Link to {} already up in {:?} mode", name, mode);
                self.notify(TelemetryEvent::AlreadyConnected { node: name.into() });
                return Ok(ConnectOutcome::AlreadyConnected);
            }
        }

        let Some(address) = self.directory.lookup(name) else {
            warn!("Node {} not found in directory", name);
            self.notify(TelemetryEvent::NodeNotFound { node: name.into() });
            return Err(LinkError::NotFound(name.into()));
        };

        // the link being replaced frees its slot
        if existing.is_none() && !self.links.has_room() {
            return Err(LinkError::Capacity(self.links.capacity()));
        }
        if let Some(id) = existing {
            if closing {
                info!("Reconnecting {} before its disconnect completed", name);
            } else {
                info!("Changing link mode to {} ({:?})", name, mode);
            }
            self.drop_link(id);
        }

        let conn = self
            .transport
            .request_connection(&address, mode)
            .map_err(|e| LinkError::TransportFailure {
                node: name.into(),
                reason: e.to_string(),
            })?;

        let mut link = self.new_link(name, mode);
        link.outbound = true;
        link.perma = permanent;
        link.max_retries = self.retry_budget(permanent);
        link.address = Some(address);
        link.conn = Some(conn);
        if let Err(e) = self.links.insert(link) {
            self.transport.close(conn);
            return Err(e);
        }

        info!(
            "Connecting to {} ({:?}{}) on {}",
            name,
            mode,
            if permanent { ", permanent" } else { "" },
            conn
        );
        self.notify(TelemetryEvent::ConnectStarted { node: name.into() });
        Ok(match existing {
            Some(_) if !closing => ConnectOutcome::ModeChanged,
            _ => ConnectOutcome::Connecting,
        })
    }

    /// Tear down the link to `name`.
    ///
    /// Permanent links are only dropped with `permanent_override`. The peer
    /// is told to disconnect and the connection is closed after a short
    /// grace period; no reconnect is attempted.
    pub fn disconnect(&mut self, name: &str, permanent_override: bool) -> Result<(), LinkError> {
        let id = self
            .links
            .find_by_name(name)
            .ok_or_else(|| LinkError::NotConnected(name.into()))?;
        if self.links.get(id).is_some_and(|l| l.perma) && !permanent_override {
            return Err(LinkError::Permanent(name.into()));
        }
        info!("Disconnecting {}", name);
        self.begin_disconnect(id);
        Ok(())
    }

    /// Politely drop every link, for daemon shutdown
    pub fn shutdown(&mut self) {
        for id in self.links.ids() {
            if self.links.get(id).is_some_and(|l| l.is_active()) {
                self.begin_disconnect(id);
                self.finish_disconnect(id);
            }
        }
        self.reap();
    }

    fn validate_name(&self, name: &str) -> Result<(), LinkError> {
        if name.is_empty()
            || name.len() > self.config.links.max_name_len
            || name.contains(|c: char| c.is_whitespace() || c == ',')
        {
            return Err(LinkError::InvalidName(name.into()));
        }
        Ok(())
    }

    /// Fresh link record with the per-node voting and demand policy applied
    fn new_link(&mut self, name: &str, mode: LinkMode) -> Link {
        let id = self.links.allocate_id();
        let mut link = Link::new(id, name, mode, self.config.links.text_queue_len);
        link.voter_link = self.config.is_voter_node(name);
        if self.config.is_demand_node(name) {
            link.demand = DemandMode::DEMAND;
        }
        link
    }

    fn retry_budget(&self, permanent: bool) -> u32 {
        if permanent {
            self.config.links.max_retries_permanent
        } else {
            self.config.links.max_retries_demand
        }
    }

    /// A peer dialled us and introduced itself
    pub(super) fn accept_inbound(&mut self, conn: ConnId, node: String, mode: LinkMode) {
        if node == self.name || self.validate_name(&node).is_err() {
            warn!("Rejecting inbound {} claiming to be {:?}", conn, node);
            self.transport.close(conn);
            return;
        }

        let existing = self.links.find_by_name(&node);
        if existing.is_none() && !self.links.has_room() {
            warn!("Rejecting inbound {} from {}: registry full", conn, node);
            self.transport.close(conn);
            return;
        }
        if let Some(id) = existing {
            info!("{} reconnected, replacing old link", node);
            self.drop_link(id);
        }

        let mut link = self.new_link(&node, mode);
        link.conn = Some(conn);
        let Ok(id) = self.links.insert(link) else {
            self.transport.close(conn);
            return;
        };
        info!("Accepted {} from {} ({:?})", conn, node, mode);
        self.on_transport_up(id);
    }

    /// The connection is established; start the capability handshake
    pub(super) fn on_transport_up(&mut self, id: LinkId) {
        let newkey = self.config.timers.newkey();
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.connected = true;
        link.retry_timer.disarm();
        link.new_key_timer.arm(newkey);
        debug!("Transport up to {}, waiting for capability handshake", link.name);
        self.send_frame(id, LinkFrame::Text(NEWKEY1.to_string()));
        self.flush_text(id);
    }

    /// Peer announced its keying capability
    pub(super) fn on_capability(&mut self, id: LinkId, level: KeyProtocol) {
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        if level > link.new_key {
            debug!("{} speaks {:?} keying", link.name, level);
            link.new_key = level;
        }
        link.new_key_timer.disarm();
        if !link.this_connected {
            self.complete_handshake(id);
        }
    }

    pub(super) fn complete_handshake(&mut self, id: LinkId) {
        let short = self.config.timers.linklist_short();
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        if link.this_connected {
            return;
        }
        link.this_connected = true;
        link.retries = 0;
        link.connect_time = Some(Utc::now());
        link.link_list_timer.arm_sooner(short);
        let first = !link.has_connected;
        link.has_connected = true;
        let name = link.name.clone();

        info!("Link to {} up", name);
        if first {
            self.notify(TelemetryEvent::Connected { node: name });
        }
        self.hurry_adverts(Some(id));
    }

    /// Connect attempt failed or an established connection dropped
    pub(super) fn on_link_failure(&mut self, id: LinkId, reason: &str) {
        let retry = self.config.timers.retry();
        if self.links.get(id).is_some_and(|l| l.is_active()) {
            self.withdraw_voter(id);
        }
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        if link.kill_me {
            return;
        }
        link.conn = None;
        link.reset_session();

        if link.disced || !link.outbound {
            debug!("Link to {} closed: {}", link.name, reason);
            link.kill_me = true;
            let event = link.has_connected.then(|| TelemetryEvent::Disconnected {
                node: link.name.clone(),
                at: Utc::now(),
            });
            if let Some(event) = event {
                self.notify(event);
            }
            return;
        }

        link.retries = link.retries.saturating_add(1);
        if link.retries < link.max_retries {
            info!(
                "Link to {} failed ({}), retry {} of {} in {:?}",
                link.name, reason, link.retries, link.max_retries, retry
            );
            link.retry_timer.arm(retry);
            return;
        }

        warn!(
            "Giving up on {} after {} attempts: {}",
            link.name, link.retries, reason
        );
        link.kill_me = true;
        let node = link.name.clone();
        let at = Utc::now();
        let event = if link.has_connected {
            TelemetryEvent::Disconnected { node, at }
        } else {
            TelemetryEvent::ConnectFailed { node, at }
        };
        self.notify(event);
    }

    /// Retry timer fired
    pub(super) fn retry_connection(&mut self, id: LinkId) {
        let Some(link) = self.links.get(id) else {
            return;
        };
        if link.kill_me || link.disced {
            return;
        }
        let Some(address) = link.address.clone() else {
            return;
        };
        let mode = link.mode;
        debug!("Retrying {} at {}", link.name, address);
        match self.transport.request_connection(&address, mode) {
            Ok(conn) => {
                if let Some(link) = self.links.get_mut(id) {
                    link.conn = Some(conn);
                }
            }
            Err(e) => self.on_link_failure(id, &e.to_string()),
        }
    }

    /// Mark the link disconnected and tell the peer; the hard close
    /// follows after the grace period
    pub(super) fn begin_disconnect(&mut self, id: LinkId) {
        let grace = self.config.timers.disc_grace();
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.disced = true;
        link.retries = link.max_retries.saturating_add(1);
        link.retry_timer.disarm();
        link.demand = DemandMode::OFF;
        if link.connected {
            link.disc_timer.arm(grace);
            self.send_frame(id, LinkFrame::Text(Message::Disconnect.to_string()));
        } else {
            self.finish_disconnect(id);
        }
    }

    /// Grace period over: close the connection and mark for reaping
    pub(super) fn finish_disconnect(&mut self, id: LinkId) {
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        if link.kill_me {
            return;
        }
        link.kill_me = true;
        link.disc_timer.disarm();
        if let Some(conn) = link.conn.take() {
            self.transport.close(conn);
        }
        let event = link.has_connected.then(|| TelemetryEvent::Disconnected {
            node: link.name.clone(),
            at: Utc::now(),
        });
        if let Some(event) = event {
            self.notify(event);
        }
    }

    /// Peer sent DISCONNECT
    pub(super) fn on_remote_disconnect(&mut self, id: LinkId) {
        if let Some(link) = self.links.get_mut(id) {
            info!("{} requested disconnect", link.name);
            link.disced = true;
            link.retries = link.max_retries.saturating_add(1);
        }
        self.finish_disconnect(id);
    }

    /// Silently replace a link (mode change or peer reconnect)
    fn drop_link(&mut self, id: LinkId) {
        if let Some(link) = self.links.get_mut(id) {
            link.disced = true;
            link.kill_me = true;
            if let Some(conn) = link.conn.take() {
                self.transport.close(conn);
            }
        }
    }

    /// Remove links marked for teardown. Runs at the end of each tick,
    /// never while the registry is being walked.
    pub(super) fn reap(&mut self) {
        for link in self.links.reap() {
            if let Some(conn) = link.conn {
                self.transport.close(conn);
            }
            if link.queued_text() > 0 {
                debug!("Discarding {} queued frames for {}", link.queued_text(), link.name);
            }
            self.withdraw_voter(link.id);
            if link.last_rx1 {
                self.key_edge(&link.name, false);
            }
            debug!("Reaped link to {}", link.name);
        }
    }
}
