//! Control-frame dispatch and relay
//!
//! Frames carrying our own name as source are dropped on arrival, which
//! is what stops broadcast storms in a meshed network. Everything else is
//! consumed locally, forwarded, or both, depending on its route. A frame
//! is never relayed back over the link it arrived on.

use chrono::Utc;
use tracing::{debug, trace, warn};

use super::Node;
use crate::link::{is_peer_name, LinkId, StatCategory};
use crate::protocol::linklist;
use crate::protocol::{Message, Route, TopKeySince, BROADCAST};
use crate::telemetry::TelemetryEvent;

impl Node {
    pub(super) fn handle_text(&mut self, id: LinkId, line: &str) {
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.stats.count_rx(StatCategory::Text);
        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                link.stats.malformed += 1;
                warn!("Dropping malformed frame from {}: {} ({:?})", link.name, e, line);
                return;
            }
        };
        trace!("{} -> {:?}", link.name, msg);

        match msg {
            Message::Disconnect => self.on_remote_disconnect(id),
            Message::NewKey(level) => self.on_capability(id, level),
            Message::NodeList(list) => self.on_node_list(id, &list),
            msg => self.route(Some(id), msg),
        }
    }

    /// Consume and/or forward a routed message. `from` is the arrival
    /// link, or `None` for messages originated here.
    fn route(&mut self, from: Option<LinkId>, msg: Message) {
        if from.is_some() && msg.source() == Some(self.name.as_str()) {
            debug!("Dropping looped {:?} frame", msg.opcode());
            return;
        }
        // local attachments never feed the network
        let relay = from.map_or(true, |id| self.links.get(id).is_some_and(|l| l.is_peer()));

        match msg.route() {
            Route::LinkLocal => {}
            Route::Broadcast => {
                if from.is_some() {
                    self.consume(&msg);
                }
                if relay {
                    self.relay_except(from, &msg);
                }
            }
            Route::Node(dest) if dest == self.name => {
                if from.is_some() {
                    self.consume(&msg);
                }
            }
            Route::Node(dest) => {
                if !relay {
                    return;
                }
                if !is_peer_name(dest) {
                    debug!("Not forwarding frame to local attachment {}", dest);
                    return;
                }
                match self.links.find_by_name(dest) {
                    Some(to) if Some(to) == from => {
                        debug!("Not echoing frame for {} back to it", dest);
                    }
                    Some(to) => self.send_text(to, msg.to_string()),
                    None => self.relay_except(from, &msg),
                }
            }
        }
    }

    /// Send to every peer but the arrival link and the originator
    fn relay_except(&mut self, from: Option<LinkId>, msg: &Message) {
        let line = msg.to_string();
        let source = msg.source();
        let targets: Vec<LinkId> = self
            .links
            .iter()
            .filter(|l| l.is_active() && l.is_peer() && !l.disced)
            .filter(|l| Some(l.id) != from && Some(l.name.as_str()) != source)
            .map(|l| l.id)
            .collect();
        for id in targets {
            self.send_text(id, line.clone());
        }
    }

    /// Act on a message addressed to us (or to everyone)
    fn consume(&mut self, msg: &Message) {
        let event = match msg {
            Message::Dtmf {
                cmd_node,
                src,
                digit,
                ..
            } => TelemetryEvent::Dtmf {
                cmd_node: cmd_node.clone(),
                src: src.clone(),
                digit: *digit,
            },
            Message::Text { src, text, .. } => TelemetryEvent::TextMessage {
                src: src.clone(),
                text: text.clone(),
            },
            Message::Telemetry { src, payload, .. } => TelemetryEvent::Variable {
                src: src.clone(),
                payload: payload.clone(),
            },
            Message::ToneControl {
                src,
                group,
                directive,
            } => {
                let ours = &self.config.node.ctcss_group;
                if ours == BROADCAST || group != ours {
                    trace!("Ignoring tone control for group {}", group);
                    return;
                }
                TelemetryEvent::ToneControl {
                    src: src.clone(),
                    group: group.clone(),
                    directive: directive.clone(),
                }
            }
            Message::TopKey { src, since, .. } => match since {
                TopKeySince::Query => {
                    self.answer_top_key(src);
                    return;
                }
                TopKeySince::Seconds(secs) => {
                    let secs_ago = (*secs).min(u64::from(u32::MAX)) as i64;
                    let at = Utc::now() - chrono::Duration::seconds(secs_ago);
                    self.top_keys.insert(src.clone(), at);
                    TelemetryEvent::TopKey {
                        node: src.clone(),
                        secs: *secs,
                    }
                }
            },
            Message::Ident { src, payload } => TelemetryEvent::Ident {
                src: src.clone(),
                payload: payload.clone(),
            },
            Message::Location { src, coords } => TelemetryEvent::Location {
                src: src.clone(),
                coords: coords.clone(),
            },
            Message::Disconnect | Message::NewKey(_) | Message::NodeList(_) => return,
        };
        self.notify(event);
    }

    fn answer_top_key(&mut self, requester: &str) {
        let seq = self.next_seq();
        let reply = Message::TopKey {
            dest: requester.to_string(),
            src: self.name.clone(),
            seq,
            since: TopKeySince::Seconds(self.last_key_edge.elapsed().as_secs()),
        };
        self.route(None, reply);
    }

    fn on_node_list(&mut self, id: LinkId, list: &str) {
        let stale = self.config.timers.linklist_stale();
        let own = linklist::without_node(list, &self.name);
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.link_list_age.arm(stale);
        if link.link_list != own {
            trace!("Node list from {}: {}", link.name, own);
            link.link_list = own;
            self.hurry_adverts(Some(id));
        }
    }

    /// Originate a text message from this node
    pub fn send_text_message(&mut self, dest: &str, text: &str) {
        let msg = Message::Text {
            dest: dest.to_string(),
            src: self.name.clone(),
            text: text.to_string(),
        };
        self.route(None, msg);
    }

    /// Relay a DTMF digit for `cmd_node` to `dest`
    pub fn send_dtmf(&mut self, cmd_node: &str, dest: &str, digit: char) {
        let seq = self.next_seq();
        let msg = Message::Dtmf {
            cmd_node: cmd_node.to_string(),
            src: self.name.clone(),
            dest: dest.to_string(),
            seq,
            digit,
        };
        self.route(None, msg);
    }

    /// Ask every node for its last-keyed time
    pub fn query_top_keys(&mut self) {
        let seq = self.next_seq();
        let msg = Message::TopKey {
            dest: BROADCAST.to_string(),
            src: self.name.clone(),
            seq,
            since: TopKeySince::Query,
        };
        self.route(None, msg);
    }
}
