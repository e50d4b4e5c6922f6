//! Link registry
//!
//! Index-stable, connection-ordered store of links. Links are never
//! unlinked while the node is iterating or dispatching: teardown marks
//! `kill_me` and [`LinkRegistry::reap`] removes marked links at the end of
//! a scheduler tick.

use std::collections::BTreeMap;

use super::{Link, LinkId};
use crate::error::LinkError;
use crate::network::ConnId;

pub struct LinkRegistry {
    links: BTreeMap<LinkId, Link>,
    next_id: u64,
    capacity: usize,
}

impl LinkRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            links: BTreeMap::new(),
            next_id: 1,
            capacity,
        }
    }

    /// Reserve the handle for a link about to be inserted
    pub fn allocate_id(&mut self) -> LinkId {
        let id = LinkId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a link, rejecting it when the registry is full
    pub fn insert(&mut self, link: Link) -> Result<LinkId, LinkError> {
        if self.active_count() >= self.capacity {
            return Err(LinkError::Capacity(self.capacity));
        }
        let id = link.id;
        self.links.insert(id, link);
        Ok(id)
    }

    pub fn has_room(&self) -> bool {
        self.active_count() < self.capacity
    }

    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(&id)
    }

    /// Live link with this name
    pub fn find_by_name(&self, name: &str) -> Option<LinkId> {
        self.links
            .values()
            .find(|l| l.is_active() && l.name == name)
            .map(|l| l.id)
    }

    /// Link currently bound to a transport connection, marked or not
    pub fn find_by_conn(&self, conn: ConnId) -> Option<LinkId> {
        self.links
            .values()
            .find(|l| l.conn == Some(conn))
            .map(|l| l.id)
    }

    /// Links in registry (connection) order
    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Link> {
        self.links.values_mut()
    }

    /// Snapshot of handles, for loops that need `&mut self` elsewhere
    pub fn ids(&self) -> Vec<LinkId> {
        self.links.keys().copied().collect()
    }

    /// Remove and return every link marked for teardown
    pub fn reap(&mut self) -> Vec<Link> {
        let doomed: Vec<LinkId> = self
            .links
            .values()
            .filter(|l| l.kill_me)
            .map(|l| l.id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.links.remove(&id))
            .collect()
    }

    /// Links not marked for teardown
    pub fn active_count(&self) -> usize {
        self.links.values().filter(|l| l.is_active()).count()
    }

    /// Live network peers, excluding local monitor attachments
    pub fn peer_count(&self) -> usize {
        self.links
            .values()
            .filter(|l| l.is_active() && l.is_peer())
            .count()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
