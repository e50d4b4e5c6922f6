mod common;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use std::time::Instant;

use common::Harness;
use rptlink::api::handlers::{self, ConnectRequest, DisconnectParams, MessageRequest};
use rptlink::api::server::AppState;
use rptlink::api::ApiServer;
use rptlink::link::LinkMode;
use rptlink::node::{ConnectOutcome, NodeHandle};

fn state() -> (Arc<AppState>, Arc<common::MockTransport>) {
    let Harness {
        node, transport, ..
    } = Harness::new();
    let state = Arc::new(AppState {
        node: NodeHandle::new(node),
        started: Instant::now(),
    });
    (state, transport)
}

fn connect(node: &str, permanent: bool) -> Json<ConnectRequest> {
    Json(ConnectRequest {
        node: node.into(),
        mode: LinkMode::Transceive,
        permanent,
    })
}

#[tokio::test]
async fn test_connect_and_list_links() {
    let (state, transport) = state();

    let (status, Json(body)) = handlers::connect_link(State(state.clone()), connect("2001", false)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body.data, Some(ConnectOutcome::Connecting));
    assert_eq!(transport.requests().len(), 1);

    let (status, Json(body)) = handlers::connect_link(State(state.clone()), connect("2001", false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.data, Some(ConnectOutcome::AlreadyConnected));

    let Json(links) = handlers::get_links(State(state.clone())).await;
    let links = links.data.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].name, "2001");

    let (status, _) = handlers::get_link(State(state.clone()), Path("2001".into())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_connect_errors_map_to_status_codes() {
    let (state, _) = state();
    let (status, Json(body)) = handlers::connect_link(State(state.clone()), connect("2000", false)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body.success);

    let (status, _) = handlers::connect_link(State(state.clone()), connect("3001", false)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = handlers::get_link(State(state), Path("2001".into())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_disconnect_permanent_needs_flag() {
    let (state, _) = state();
    handlers::connect_link(State(state.clone()), connect("2001", true)).await;

    let (status, _) = handlers::disconnect_link(
        State(state.clone()),
        Path("2001".into()),
        Query(DisconnectParams { permanent: false }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = handlers::disconnect_link(
        State(state.clone()),
        Path("2001".into()),
        Query(DisconnectParams { permanent: true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.node.query_link_status("2001").is_none());
}

#[tokio::test]
async fn test_status_and_vote() {
    let (state, _) = state();
    state.node.set_local_rx(true, 42);

    let Json(body) = handlers::get_status(State(state.clone())).await;
    let status = body.data.unwrap();
    assert_eq!(status.node.name, "2000");
    assert!(status.node.keyed);
    assert_eq!(status.node.rx_rssi, 42);

    let json = serde_json::to_value(&handlers::get_vote(State(state)).await.0).unwrap();
    assert_eq!(json["data"]["mode"], "off");
    assert_eq!(json["data"]["winner"], "none");
}

#[tokio::test]
async fn test_send_message_validates_input() {
    let (state, _) = state();
    let (status, _) = handlers::send_message(
        State(state.clone()),
        Json(MessageRequest {
            dest: "0".into(),
            text: "   ".into(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = handlers::send_message(
        State(state),
        Json(MessageRequest {
            dest: "0".into(),
            text: "net tonight".into(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_router_builds() {
    let (state, _) = state();
    let config = rptlink::config::ApiConfig::default();
    let _router = ApiServer::new(config, state.node.clone()).router();
}
