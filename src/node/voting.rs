//! Receiver voting
//!
//! When several receivers (the local one plus links whose far end is a
//! voting receiver) hear the same transmission, only the strongest is
//! passed to the mix. The arbitrator runs every `interval_ticks` ticks and
//! only while something is keyed.
//!
//! Hysteresis: a challenger replaces the incumbent only when its RSSI
//! exceeds the incumbent's by more than the margin. Ties between
//! challengers go to the earliest one in connection order.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use super::Node;
use crate::audio::AudioSource;
use crate::link::LinkId;
use crate::telemetry::TelemetryEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoteMode {
    #[default]
    Off,
    /// Winner holds until every source unkeys
    OneShot,
    /// Winner may change mid-transmission, subject to the margin
    Continuous,
}

/// Current voting winner, for status reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoteWinner {
    None,
    Local,
    Link(String),
}

impl fmt::Display for VoteWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteWinner::None => f.write_str("none"),
            VoteWinner::Local => f.write_str("local"),
            VoteWinner::Link(name) => f.write_str(name),
        }
    }
}

/// A receiver taking part in the vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voter {
    Local,
    Link(LinkId),
}

/// One voting-capable link as seen by the arbitrator
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub id: LinkId,
    pub keyed: bool,
    pub rssi: u8,
}

/// Winner selection, independent of the node so it can be driven directly
#[derive(Debug, Clone)]
pub struct Arbitrator {
    mode: VoteMode,
    margin: u32,
    interval_ticks: u32,
    counter: u32,
    winner: Option<Voter>,
}

impl Arbitrator {
    pub fn new(mode: VoteMode, margin: u32, interval_ticks: u32) -> Self {
        Self {
            mode,
            margin,
            interval_ticks: interval_ticks.max(1),
            counter: 0,
            winner: None,
        }
    }

    pub fn mode(&self) -> VoteMode {
        self.mode
    }

    pub fn winner(&self) -> Option<Voter> {
        self.winner
    }

    /// Drop a departed link from the vote. Returns true if it was the
    /// winner; the next evaluation picks a new one regardless of mode.
    pub fn forget(&mut self, id: LinkId) -> bool {
        if self.winner == Some(Voter::Link(id)) {
            self.winner = None;
            true
        } else {
            false
        }
    }

    /// Count one tick; true when an evaluation is due
    pub fn due(&mut self) -> bool {
        if self.mode == VoteMode::Off {
            return false;
        }
        self.counter += 1;
        if self.counter >= self.interval_ticks {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    /// Run one evaluation. Returns true if the winner changed.
    pub fn evaluate(&mut self, local_keyed: bool, local_rssi: u8, candidates: &[Candidate]) -> bool {
        if self.mode == VoteMode::Off {
            return false;
        }
        let any_keyed = local_keyed || candidates.iter().any(|c| c.keyed);
        if !any_keyed {
            return self.set(None);
        }
        let incumbent_present = match self.winner {
            Some(Voter::Local) => true,
            Some(Voter::Link(id)) => candidates.iter().any(|c| c.id == id),
            None => false,
        };
        if self.mode == VoteMode::OneShot && incumbent_present {
            return false;
        }

        let mut max_rssi = if local_keyed { u32::from(local_rssi) } else { 0 };
        let mut best = local_keyed.then_some(Voter::Local);
        for c in candidates.iter().filter(|c| c.keyed) {
            if u32::from(c.rssi) > max_rssi {
                max_rssi = u32::from(c.rssi);
                best = Some(Voter::Link(c.id));
            }
        }
        if best == self.winner {
            return false;
        }

        let incumbent = match self.winner {
            Some(Voter::Local) if local_keyed => Some(u32::from(local_rssi)),
            Some(Voter::Link(id)) => candidates
                .iter()
                .find(|c| c.id == id && c.keyed)
                .map(|c| u32::from(c.rssi)),
            _ => None,
        };
        match incumbent {
            Some(rssi) if max_rssi <= rssi + self.margin => false,
            _ => self.set(best),
        }
    }

    fn set(&mut self, winner: Option<Voter>) -> bool {
        if self.winner == winner {
            return false;
        }
        self.winner = winner;
        true
    }
}

impl Node {
    /// Advance the vote counter and evaluate when due
    pub(super) fn run_vote(&mut self) {
        if !self.arbitrator.due() {
            return;
        }
        let candidates: Vec<Candidate> = self
            .links
            .iter()
            .filter(|l| l.is_active() && l.is_peer() && l.voter_link)
            .map(|l| Candidate {
                id: l.id,
                keyed: l.last_real_rx,
                rssi: l.rssi,
            })
            .collect();
        if !self
            .arbitrator
            .evaluate(self.keyed, self.rx_rssi, &candidates)
        {
            return;
        }

        let winner = self.arbitrator.winner();
        self.voted_link = match winner {
            Some(Voter::Link(id)) => Some(id),
            _ => None,
        };
        for link in self.links.iter_mut() {
            link.vote_winner = winner == Some(Voter::Link(link.id));
        }
        let winner = self.current_vote_winner();
        info!("Vote winner: {}", winner);
        self.notify(TelemetryEvent::VoteWinner {
            winner: winner.to_string(),
        });
    }

    /// A link lost its connection or is being removed; it can no longer
    /// hold the vote
    pub(super) fn withdraw_voter(&mut self, id: LinkId) {
        if self.voted_link == Some(id) {
            self.voted_link = None;
        }
        if let Some(link) = self.links.get_mut(id) {
            link.vote_winner = false;
        }
        if self.arbitrator.forget(id) {
            info!("Vote winner withdrawn, revoting");
        }
    }

    pub fn current_vote_winner(&self) -> VoteWinner {
        match self.arbitrator.winner() {
            None => VoteWinner::None,
            Some(Voter::Local) => VoteWinner::Local,
            Some(Voter::Link(_)) => self
                .voted_link
                .and_then(|id| self.links.get(id))
                .map_or(VoteWinner::None, |l| VoteWinner::Link(l.name.clone())),
        }
    }

    /// Whether audio from `source` may reach the mix. Sources that do not
    /// take part in voting always pass.
    pub(super) fn audio_passes(&self, source: &AudioSource) -> bool {
        if self.arbitrator.mode() == VoteMode::Off {
            return true;
        }
        match source {
            AudioSource::Local => self.arbitrator.winner() == Some(Voter::Local),
            AudioSource::Link(name) => match self.link(name) {
                Some(link) if link.voter_link => self.voted_link == Some(link.id),
                _ => true,
            },
        }
    }
}
