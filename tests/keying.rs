mod common;

use common::Harness;
use rptlink::link::LinkMode;
use rptlink::network::{ConnId, LinkFrame, TransportEvent};
use rptlink::protocol::KeyProtocol;
use rptlink::telemetry::TelemetryEvent;

fn voice(rssi: u8) -> LinkFrame {
    LinkFrame::Voice {
        rssi,
        samples: vec![0; 160],
    }
}

fn unkeys(h: &Harness, name: &str) -> usize {
    h.edges()
        .iter()
        .filter(|(n, keyed)| n == name && !keyed)
        .count()
}

#[test]
fn test_linger_unkey_fires_once_after_silence() {
    let mut h = Harness::new();
    let conn = h.link_up("2001", LinkMode::Transceive);
    assert_eq!(h.node.link("2001").unwrap().new_key, KeyProtocol::Linger);

    h.frame(conn, LinkFrame::Key);
    h.tick_ms(20);
    assert!(h.keyed("2001"));
    assert!(h.node.remote_rx());

    // unkey is absorbed until the linger interval runs out
    h.frame(conn, LinkFrame::Unkey);
    h.tick_ms(20);
    assert!(h.keyed("2001"));
    h.tick_ms(20);
    assert!(!h.keyed("2001"));
    assert!(!h.node.remote_rx());

    for _ in 0..10 {
        h.tick_ms(20);
    }
    assert_eq!(
        h.edges(),
        vec![("2001".to_string(), true), ("2001".to_string(), false)]
    );
}

#[test]
fn test_linger_absorbs_short_unkey() {
    let mut h = Harness::new();
    let conn = h.link_up("2001", LinkMode::Transceive);

    h.frame(conn, LinkFrame::Key);
    h.tick_ms(20);
    h.frame(conn, LinkFrame::Unkey);
    h.tick_ms(20);
    h.frame(conn, voice(0));
    h.tick_ms(20);
    h.tick_ms(20);
    assert!(h.keyed("2001"));
    assert_eq!(unkeys(&h, "2001"), 0);

    h.tick_ms(60);
    assert!(!h.keyed("2001"));
    assert_eq!(unkeys(&h, "2001"), 1);
}

#[test]
fn test_legacy_peer_after_handshake_timeout() {
    let mut h = Harness::new();
    let conn = h.link_up_with("2001", LinkMode::Transceive, false, None);
    assert!(!h.node.link("2001").unwrap().this_connected);

    h.tick_ms(2000);
    let link = h.node.link("2001").unwrap();
    assert!(link.this_connected);
    assert_eq!(link.new_key, KeyProtocol::Legacy);

    h.frame(conn, voice(0));
    h.tick_ms(20);
    assert!(h.keyed("2001"));
    h.frame(conn, LinkFrame::Unkey);
    h.tick_ms(20);
    assert!(!h.keyed("2001"));
}

#[test]
fn test_redundant_peer_failsafe_unkeys() {
    let mut h = Harness::new();
    let conn = h.link_up_with("2001", LinkMode::Transceive, false, Some("!NEWKEY!"));
    assert_eq!(h.node.link("2001").unwrap().new_key, KeyProtocol::Redundant);

    h.frame(conn, LinkFrame::Key);
    h.tick_ms(20);
    assert!(h.keyed("2001"));

    // refreshed key indications hold the link keyed
    h.tick_ms(4000);
    h.frame(conn, LinkFrame::Key);
    h.tick_ms(4000);
    assert!(h.keyed("2001"));

    h.tick_ms(2000);
    assert!(!h.keyed("2001"));
    assert_eq!(unkeys(&h, "2001"), 1);
}

#[test]
fn test_redundant_peer_receives_periodic_refresh() {
    let mut h = Harness::new();
    let conn = h.link_up_with("2001", LinkMode::Transceive, false, Some("!NEWKEY!"));
    h.transport.clear_sent();

    h.tick_ms(20);
    let refreshes = |h: &Harness| {
        h.transport
            .sent_to(conn)
            .into_iter()
            .filter(|f| *f == LinkFrame::Unkey)
            .count()
    };
    assert_eq!(refreshes(&h), 1);
    h.tick_ms(1000);
    assert_eq!(refreshes(&h), 1);
    h.tick_ms(1000);
    assert_eq!(refreshes(&h), 2);
}

#[test]
fn test_keying_relayed_to_other_peers_only() {
    let mut h = Harness::new();
    let a = h.link_up("2001", LinkMode::Transceive);
    let b = h.link_up("2002", LinkMode::Transceive);
    let monitor = h.link_up("2003", LinkMode::Monitor);
    h.transport.clear_sent();

    h.frame(a, LinkFrame::Key);
    h.tick_ms(20);
    assert!(h.transport.sent_to(b).contains(&LinkFrame::Key));
    assert!(!h.transport.sent_to(a).contains(&LinkFrame::Key));
    assert!(!h.transport.sent_to(monitor).contains(&LinkFrame::Key));

    h.frame(a, LinkFrame::Unkey);
    h.tick_ms(60);
    assert!(h.transport.sent_to(b).contains(&LinkFrame::Unkey));
}

#[test]
fn test_local_key_reaches_every_transceive_peer() {
    let mut h = Harness::new();
    let a = h.link_up("2001", LinkMode::Transceive);
    let b = h.accept("2002", LinkMode::Transceive);
    h.transport.clear_sent();

    h.node.set_local_rx(true, 40);
    h.tick_ms(20);
    assert!(h.node.is_tx_keyed());
    for conn in [a, b] {
        assert_eq!(h.transport.sent_to(conn), vec![LinkFrame::Key]);
    }
    // edges only, no repeats
    h.tick_ms(20);
    assert_eq!(h.transport.sent_to(a).len(), 1);
}

#[test]
fn test_transmitter_follows_remote_rx() {
    let mut h = Harness::new();
    let conn = h.link_up("2001", LinkMode::Transceive);

    h.frame(conn, voice(0));
    h.tick_ms(20);
    assert!(h.node.is_tx_keyed());

    h.tick_ms(60);
    assert!(!h.node.remote_rx());
    assert!(!h.node.is_tx_keyed());
}

#[test]
fn test_hang_time_holds_transmitter() {
    let mut h = Harness::with_config(|c| c.timers.hang_time_ms = 500);
    h.node.set_local_rx(true, 0);
    h.tick_ms(20);
    assert!(h.node.is_tx_keyed());

    h.node.set_local_rx(false, 0);
    h.tick_ms(20);
    assert!(h.node.is_tx_keyed());
    h.tick_ms(400);
    assert!(h.node.is_tx_keyed());
    h.tick_ms(100);
    assert!(!h.node.is_tx_keyed());
}

#[test]
fn test_half_duplex_local_rx_does_not_key_transmitter() {
    let mut h = Harness::with_config(|c| c.node.duplex = 0);
    h.node.set_local_rx(true, 0);
    h.tick_ms(20);
    assert!(!h.node.is_tx_keyed());
}

#[test]
fn test_courtesy_tone_telemetry() {
    let mut h = Harness::new();
    let conn = h.link_up("2001", LinkMode::Transceive);
    h.drain_events();

    h.node.set_local_rx(true, 0);
    h.node.set_local_rx(false, 0);
    assert!(h.drain_events().contains(&TelemetryEvent::Unkey));

    h.frame(conn, LinkFrame::Key);
    h.tick_ms(20);
    h.frame(conn, LinkFrame::Unkey);
    h.tick_ms(60);
    let events = h.drain_events();
    assert!(events.contains(&TelemetryEvent::KeyChanged {
        node: "2001".into(),
        keyed: true
    }));
    assert!(events.contains(&TelemetryEvent::LinkUnkey {
        node: "2001".into()
    }));
}

#[test]
fn test_local_key_edge_reported_to_listener() {
    let mut h = Harness::new();
    h.node.set_local_rx(true, 0);
    h.node.set_local_rx(true, 0);
    h.node.set_local_rx(false, 0);
    assert_eq!(
        h.edges(),
        vec![("2000".to_string(), true), ("2000".to_string(), false)]
    );
}

#[test]
fn test_keyed_link_torn_down_reports_unkey() {
    let mut h = Harness::new();
    let conn = h.accept("2001", LinkMode::Transceive);
    h.frame(conn, LinkFrame::Key);
    h.tick_ms(20);
    assert!(h.node.remote_rx());

    h.event(TransportEvent::Closed { conn });
    h.tick_ms(20);
    assert!(h.node.link("2001").is_none());
    assert!(!h.node.remote_rx());
    assert_eq!(unkeys(&h, "2001"), 1);
}

#[test]
fn test_local_monitor_does_not_key_node() {
    let mut h = Harness::new();
    let conn = h.accept("0console", LinkMode::LocalMonitor);
    h.frame(conn, LinkFrame::Key);
    h.tick_ms(20);
    assert!(!h.node.remote_rx());
    assert!(!h.node.is_tx_keyed());
}

fn key_frames(h: &Harness, conn: ConnId) -> Vec<LinkFrame> {
    h.transport
        .sent_to(conn)
        .into_iter()
        .filter(|f| matches!(f, LinkFrame::Key | LinkFrame::Unkey))
        .collect()
}

#[test]
fn test_demand_link_silent_until_traffic() {
    let mut h = Harness::with_config(|c| c.links.demand_nodes = vec!["2001".into()]);
    let armed = h.link_up_with("2001", LinkMode::Transceive, false, Some("!NEWKEY!"));
    let talker = h.link_up("2002", LinkMode::Transceive);
    assert_eq!(h.node.link("2001").unwrap().status().demand_ms, 1);
    h.transport.clear_sent();

    // an idle armed link gets no redundant refreshes
    for _ in 0..5 {
        h.tick_ms(1000);
    }
    assert!(key_frames(&h, armed).is_empty());

    h.frame(talker, LinkFrame::Key);
    h.tick_ms(20);
    assert_eq!(key_frames(&h, armed), vec![LinkFrame::Key]);
    assert!(h.node.link("2001").unwrap().status().demand_ms > 1);

    h.frame(talker, LinkFrame::Unkey);
    h.tick_ms(60);
    assert_eq!(
        key_frames(&h, armed).last(),
        Some(&LinkFrame::Unkey)
    );

    // the follow window runs out and the link settles back to armed
    h.tick_ms(31_000);
    assert_eq!(h.node.link("2001").unwrap().status().demand_ms, 1);
    h.transport.clear_sent();
    for _ in 0..5 {
        h.tick_ms(1000);
    }
    assert!(key_frames(&h, armed).is_empty());
}
