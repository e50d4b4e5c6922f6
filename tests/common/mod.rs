//! Shared fixtures: a recording transport and a node harness
#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rptlink::config::NodeConfig;
use rptlink::error::TransportError;
use rptlink::link::LinkMode;
use rptlink::network::{ConnId, LinkFrame, StaticDirectory, Transport, TransportEvent};
use rptlink::node::Node;
use rptlink::protocol::NEWKEY1;
use rptlink::telemetry::{ChannelTelemetry, TelemetryEvent};

pub const LOCAL: &str = "2000";

/// Transport that records every call and never touches the network
#[derive(Default)]
pub struct MockTransport {
    next_conn: AtomicU64,
    pub fail_connects: AtomicBool,
    requests: Mutex<Vec<(String, LinkMode, ConnId)>>,
    sent: Mutex<Vec<(ConnId, LinkFrame)>>,
    closed: Mutex<Vec<ConnId>>,
}

impl MockTransport {
    pub fn allocate(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn requests(&self) -> Vec<(String, LinkMode, ConnId)> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> ConnId {
        self.requests.lock().last().map(|r| r.2).expect("no connection requested")
    }

    pub fn sent_to(&self, conn: ConnId) -> Vec<LinkFrame> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn texts_to(&self, conn: ConnId) -> Vec<String> {
        self.sent_to(conn)
            .into_iter()
            .filter_map(|f| match f {
                LinkFrame::Text(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn was_closed(&self, conn: ConnId) -> bool {
        self.closed.lock().contains(&conn)
    }
}

impl Transport for MockTransport {
    fn request_connection(&self, address: &str, mode: LinkMode) -> Result<ConnId, TransportError> {
        if self.fail_connects.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionFailed("no route to host".into()));
        }
        let conn = self.allocate();
        self.requests.lock().push((address.to_string(), mode, conn));
        Ok(conn)
    }

    fn send(&self, conn: ConnId, frame: LinkFrame) -> Result<(), TransportError> {
        self.sent.lock().push((conn, frame));
        Ok(())
    }

    fn close(&self, conn: ConnId) {
        self.closed.lock().push(conn);
    }
}

/// A node named [`LOCAL`] wired to a [`MockTransport`]
pub struct Harness {
    pub node: Node,
    pub transport: Arc<MockTransport>,
    pub edges: Arc<Mutex<Vec<(String, bool)>>>,
    events: crossbeam_channel::Receiver<TelemetryEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut NodeConfig)) -> Self {
        let mut config = NodeConfig::default();
        config.node.name = LOCAL.to_string();
        config
            .directory
            .insert("20??".to_string(), "{node}.example.net:4570".to_string());
        config
            .directory
            .insert("2101".to_string(), "voter.example.net:4570".to_string());
        tweak(&mut config);

        let directory = Arc::new(StaticDirectory::from_entries(&config.directory));
        let transport = Arc::new(MockTransport::default());
        let (telemetry, events) = ChannelTelemetry::bounded(1024);
        let mut node = Node::new(config, transport.clone(), directory, Arc::new(telemetry));

        let edges = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&edges);
        node.set_key_listener(Box::new(move |name, keyed| {
            sink.lock().push((name.to_string(), keyed));
        }));

        Self {
            node,
            transport,
            edges,
            events,
        }
    }

    pub fn tick_ms(&mut self, ms: u64) {
        self.node.tick(Duration::from_millis(ms));
    }

    pub fn event(&mut self, event: TransportEvent) {
        self.node.handle_transport_event(event);
    }

    pub fn frame(&mut self, conn: ConnId, frame: LinkFrame) {
        self.event(TransportEvent::Frame { conn, frame });
    }

    pub fn text(&mut self, conn: ConnId, line: &str) {
        self.frame(conn, LinkFrame::Text(line.to_string()));
    }

    /// Dial `name` and complete the handshake as an edge-reporting peer
    pub fn link_up(&mut self, name: &str, mode: LinkMode) -> ConnId {
        self.link_up_with(name, mode, false, Some(NEWKEY1))
    }

    pub fn link_up_with(
        &mut self,
        name: &str,
        mode: LinkMode,
        permanent: bool,
        sentinel: Option<&str>,
    ) -> ConnId {
        self.node.connect(name, mode, permanent).expect("connect");
        let conn = self.transport.last_request();
        self.event(TransportEvent::Connected { conn });
        if let Some(sentinel) = sentinel {
            self.text(conn, sentinel);
        }
        conn
    }

    /// Accept an inbound link from `name` and complete the handshake
    pub fn accept(&mut self, name: &str, mode: LinkMode) -> ConnId {
        let conn = self.transport.allocate();
        self.event(TransportEvent::Incoming {
            conn,
            node: name.to_string(),
            mode,
        });
        self.text(conn, NEWKEY1);
        conn
    }

    pub fn drain_events(&self) -> Vec<TelemetryEvent> {
        self.events.try_iter().collect()
    }

    pub fn edges(&self) -> Vec<(String, bool)> {
        self.edges.lock().clone()
    }

    pub fn keyed(&self, name: &str) -> bool {
        self.node.link(name).map_or(false, |l| l.last_real_rx)
    }
}
