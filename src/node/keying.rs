//! Keying state machine
//!
//! Each link debounces the raw key indications of its peer into
//! `last_real_rx` according to the capability learned at handshake:
//!
//! ```text
//! Legacy     key/voice -> keyed, unkey -> unkeyed
//! Redundant  key/voice -> keyed and reload failsafe, unkey or failsafe
//!            expiry -> unkeyed
//! Linger     key/voice -> keyed and reload linger; unkey only drops the
//!            raw state, linger expiry -> unkeyed
//! ```
//!
//! Once per tick the node ORs the debounced states into `remote_rx`,
//! reports per-link edges, drives the transmitter and sends our own key
//! indications to peers that understand them.

use std::time::Instant;
use tracing::{debug, info};

use super::Node;
use crate::audio::AudioSource;
use crate::link::{LinkId, StatCategory};
use crate::network::LinkFrame;
use crate::protocol::KeyProtocol;
use crate::telemetry::TelemetryEvent;

impl Node {
    /// Local receiver state from the radio interface
    pub fn set_local_rx(&mut self, keyed: bool, rssi: u8) {
        self.rx_rssi = rssi;
        if keyed == self.keyed {
            return;
        }
        self.keyed = keyed;
        self.last_key_edge = Instant::now();
        info!("Local receiver {}", if keyed { "keyed" } else { "unkeyed" });

        if let Some(listener) = &self.key_listener {
            listener(&self.name, keyed);
        }
        if !keyed && self.config.node.courtesy_tones && self.config.node.duplex > 0 {
            self.notify(TelemetryEvent::Unkey);
        }
    }

    /// One frame of local receiver audio
    pub fn local_audio(&mut self, samples: Vec<i16>) {
        self.write_audio(AudioSource::Local, samples);
    }

    pub(super) fn on_voice(&mut self, id: LinkId, rssi: u8, samples: Vec<i16>) {
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.stats.count_rx(StatCategory::Voice);
        if link.voter_link {
            link.rssi = rssi;
        }
        let source = AudioSource::Link(link.name.clone());
        self.apply_rx(id, true);
        self.write_audio(source, samples);
    }

    pub(super) fn on_key_frame(&mut self, id: LinkId, keyed: bool) {
        if let Some(link) = self.links.get_mut(id) {
            link.stats.count_rx(if keyed {
                StatCategory::Key
            } else {
                StatCategory::Unkey
            });
        }
        self.apply_rx(id, keyed);
    }

    /// Feed one raw key indication through the link's debounce
    fn apply_rx(&mut self, id: LinkId, keyed: bool) {
        let linger = self.config.timers.rx_linger();
        let failsafe = self.config.timers.rx_failsafe();
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.last_rx = keyed;
        match link.new_key {
            KeyProtocol::Legacy => link.last_real_rx = keyed,
            KeyProtocol::Redundant => {
                link.last_real_rx = keyed;
                if keyed {
                    link.rx_failsafe_timer.arm(failsafe);
                } else {
                    link.rx_failsafe_timer.disarm();
                }
            }
            KeyProtocol::Linger => {
                if keyed {
                    link.last_real_rx = true;
                    link.rx_linger_timer.arm(linger);
                }
            }
        }
    }

    /// Report per-link edges and update the aggregate receive and
    /// transmit state
    pub(super) fn recompute_keying(&mut self) {
        let mut edges = Vec::new();
        let mut remote_rx = false;
        for link in self.links.iter_mut().filter(|l| l.is_active()) {
            if link.last_real_rx != link.last_rx1 {
                link.last_rx1 = link.last_real_rx;
                edges.push((link.name.clone(), link.last_real_rx));
            }
            if link.last_real_rx && link.is_peer() {
                remote_rx = true;
            }
        }
        for (name, keyed) in edges {
            self.key_edge(&name, keyed);
        }
        self.remote_rx = remote_rx;

        if self.keyed || remote_rx {
            let follow = self.config.timers.link_follow();
            for link in self.links.iter_mut() {
                link.demand.trigger(follow);
            }
        }
        self.update_transmitter();
    }

    /// Debounced keying edge of a link
    pub(super) fn key_edge(&mut self, name: &str, keyed: bool) {
        info!("{} {}", name, if keyed { "keyed" } else { "unkeyed" });
        if let Some(listener) = &self.key_listener {
            listener(name, keyed);
        }
        self.notify(TelemetryEvent::KeyChanged {
            node: name.to_string(),
            keyed,
        });
        self.hurry_adverts(None);
        if !keyed && self.config.node.duplex >= 2 {
            self.notify(TelemetryEvent::LinkUnkey {
                node: name.to_string(),
            });
        }
    }

    fn update_transmitter(&mut self) {
        let rx_active = (self.keyed && self.config.node.duplex > 0) || self.remote_rx;
        let hang = self.config.timers.hang_time();

        if rx_active {
            self.hang_timer.disarm();
            self.tx_keyed = true;
        } else if self.rx_active_prev && !hang.is_zero() {
            self.hang_timer.arm(hang);
        } else if !self.hang_timer.is_running() {
            self.tx_keyed = false;
        }
        self.rx_active_prev = rx_active;
    }

    /// Send Key/Unkey to every peer whose wanted state changed, and
    /// refresh redundant-retransmit peers
    pub(super) fn send_key_indications(&mut self) {
        let redundant_tx = self.config.timers.redundant_tx();
        let local = self.keyed;

        let sources: Vec<LinkId> = self
            .links
            .iter()
            .filter(|l| l.is_active() && l.is_peer() && l.last_real_rx && l.mode.transmits())
            .map(|l| l.id)
            .collect();

        for id in self.links.ids() {
            let Some(link) = self.links.get_mut(id) else {
                continue;
            };
            if !link.is_active() || !link.this_connected {
                continue;
            }
            let relayed = sources.iter().any(|&s| s != id);
            let want = link.mode.transmits()
                && link.demand.passes(local)
                && (local || relayed);

            let frame = if want { LinkFrame::Key } else { LinkFrame::Unkey };
            if want != link.last_tx {
                link.last_tx = want;
                if link.new_key == KeyProtocol::Legacy {
                    continue;
                }
                debug!("Sending {:?} to {}", frame, link.name);
                if link.new_key == KeyProtocol::Redundant {
                    link.retx_timer.arm(redundant_tx);
                }
                self.send_frame(id, frame);
            } else if link.new_key == KeyProtocol::Redundant
                && link.demand.passes(local)
                && !link.retx_timer.is_running()
            {
                link.retx_timer.arm(redundant_tx);
                self.send_frame(id, frame);
            }
        }
    }
}
