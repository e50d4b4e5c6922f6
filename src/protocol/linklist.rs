//! Node-list advertisement strings.
//!
//! A node list is a comma-separated set of entries, each a one-character
//! mode flag followed by a node name: `T` transceive, `R` receive-only
//! (monitor), `C` still connecting. When advertising to a peer, each
//! directly linked node is followed by the list that node last advertised
//! to us, so the string describes everything reachable through this node.

use serde::Serialize;

use crate::link::LinkMode;

/// Mode flag of one node-list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryMode {
    Transceive,
    Monitor,
    Connecting,
}

impl EntryMode {
    pub fn flag(self) -> char {
        match self {
            EntryMode::Transceive => 'T',
            EntryMode::Monitor => 'R',
            EntryMode::Connecting => 'C',
        }
    }

    pub fn from_flag(flag: char) -> Option<Self> {
        match flag {
            'T' => Some(EntryMode::Transceive),
            'R' => Some(EntryMode::Monitor),
            'C' => Some(EntryMode::Connecting),
            _ => None,
        }
    }

    /// Flag for a direct link in the given state
    pub fn for_link(mode: LinkMode, handshake_done: bool) -> Self {
        if !handshake_done {
            EntryMode::Connecting
        } else if mode == LinkMode::Transceive {
            EntryMode::Transceive
        } else {
            EntryMode::Monitor
        }
    }
}

/// One parsed node-list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub mode: EntryMode,
    pub name: String,
}

/// Incrementally builds an advertisement
#[derive(Debug, Default)]
pub struct NodeListBuilder {
    buf: String,
}

impl NodeListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a direct peer and the downstream list it reported
    pub fn push(&mut self, mode: EntryMode, name: &str, downstream: &str) {
        if !self.buf.is_empty() {
            self.buf.push(',');
        }
        self.buf.push(mode.flag());
        self.buf.push_str(name);
        let downstream = downstream.trim_matches(',');
        if !downstream.is_empty() {
            self.buf.push(',');
            self.buf.push_str(downstream);
        }
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Parse a node list. Entries with an unknown flag or no name are skipped.
pub fn parse(list: &str) -> Vec<NodeEntry> {
    list.split(',').filter_map(parse_entry).collect()
}

fn parse_entry(entry: &str) -> Option<NodeEntry> {
    let entry = entry.trim();
    let mut chars = entry.chars();
    let mode = EntryMode::from_flag(chars.next()?)?;
    let name = chars.as_str();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some(NodeEntry {
        mode,
        name: name.to_string(),
    })
}

/// Drop entries naming `node` so a list echoed back to us does not
/// advertise ourselves. Other entries are kept verbatim.
pub fn without_node(list: &str, node: &str) -> String {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter(|entry| parse_entry(entry).map_or(true, |e| e.name != node))
        .collect::<Vec<_>>()
        .join(",")
}
