//! Shared handle to a running node
//!
//! Management front-ends (the HTTP API, the daemon's startup code, tests)
//! reach the node through a [`NodeHandle`]. Every call takes the node lock
//! briefly, so commands are serialized with the poll scheduler.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use super::{ConnectOutcome, Node, NodeStatus, VoteWinner};
use crate::error::LinkError;
use crate::link::{LinkMode, LinkStatus};

#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<Mutex<Node>>,
}

impl NodeHandle {
    pub fn new(node: Node) -> Self {
        Self {
            inner: Arc::new(Mutex::new(node)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Node> {
        self.inner.lock()
    }

    pub fn connect_link(
        &self,
        name: &str,
        mode: LinkMode,
        permanent: bool,
    ) -> Result<ConnectOutcome, LinkError> {
        self.inner.lock().connect(name, mode, permanent)
    }

    pub fn disconnect_link(&self, name: &str, permanent_override: bool) -> Result<(), LinkError> {
        self.inner.lock().disconnect(name, permanent_override)
    }

    pub fn query_link_status(&self, name: &str) -> Option<LinkStatus> {
        self.inner.lock().link(name).map(|l| l.status())
    }

    pub fn current_vote_winner(&self) -> VoteWinner {
        self.inner.lock().current_vote_winner()
    }

    pub fn status(&self) -> NodeStatus {
        self.inner.lock().status()
    }

    pub fn set_local_rx(&self, keyed: bool, rssi: u8) {
        self.inner.lock().set_local_rx(keyed, rssi);
    }

    pub fn local_audio(&self, samples: Vec<i16>) {
        self.inner.lock().local_audio(samples);
    }

    pub fn send_text_message(&self, dest: &str, text: &str) {
        self.inner.lock().send_text_message(dest, text);
    }
}
