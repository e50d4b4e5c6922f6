//! HTTP API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::server::AppState;
use crate::error::LinkError;
use crate::link::{LinkMode, LinkStatus};
use crate::node::{ConnectOutcome, NodeStatus, VoteMode, VoteWinner};

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn link_error<T>(e: LinkError) -> Reply<T> {
    let status = match e {
        LinkError::NotFound(_) | LinkError::NotConnected(_) => StatusCode::NOT_FOUND,
        LinkError::SelfConnect | LinkError::InvalidName(_) => StatusCode::BAD_REQUEST,
        LinkError::Permanent(_) => StatusCode::CONFLICT,
        LinkError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
        LinkError::TransportFailure { .. } => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

#[derive(Serialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub node: NodeStatus,
    pub uptime_seconds: u64,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    Json(ApiResponse::ok(SystemStatus {
        node: state.node.status(),
        uptime_seconds: state.started.elapsed().as_secs(),
    }))
}

pub async fn get_links(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<LinkStatus>>> {
    Json(ApiResponse::ok(state.node.status().links))
}

pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Reply<LinkStatus> {
    match state.node.query_link_status(&name) {
        Some(status) => (StatusCode::OK, Json(ApiResponse::ok(status))),
        None => link_error(LinkError::NotConnected(name)),
    }
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    pub node: String,
    #[serde(default = "default_mode")]
    pub mode: LinkMode,
    #[serde(default)]
    pub permanent: bool,
}

fn default_mode() -> LinkMode {
    LinkMode::Transceive
}

pub async fn connect_link(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> Reply<ConnectOutcome> {
    match state.node.connect_link(&req.node, req.mode, req.permanent) {
        Ok(ConnectOutcome::AlreadyConnected) => (
            StatusCode::OK,
            Json(ApiResponse::ok(ConnectOutcome::AlreadyConnected)),
        ),
        Ok(outcome) => (StatusCode::ACCEPTED, Json(ApiResponse::ok(outcome))),
        Err(e) => link_error(e),
    }
}

#[derive(Deserialize)]
pub struct DisconnectParams {
    #[serde(default)]
    pub permanent: bool,
}

pub async fn disconnect_link(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<DisconnectParams>,
) -> Reply<()> {
    match state.node.disconnect_link(&name, params.permanent) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => link_error(e),
    }
}

#[derive(Serialize)]
pub struct VoteStatus {
    pub mode: VoteMode,
    pub winner: VoteWinner,
}

pub async fn get_vote(State(state): State<Arc<AppState>>) -> Json<ApiResponse<VoteStatus>> {
    let status = state.node.status();
    Json(ApiResponse::ok(VoteStatus {
        mode: status.vote_mode,
        winner: status.vote_winner,
    }))
}

#[derive(Deserialize)]
pub struct MessageRequest {
    /// Destination node, `"0"` for everyone
    pub dest: String,
    pub text: String,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MessageRequest>,
) -> Reply<()> {
    if req.text.trim().is_empty() || req.dest.is_empty() || req.dest.contains(char::is_whitespace) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("dest and text are required")),
        );
    }
    let text = req.text.trim().replace(['\r', '\n'], " ");
    state.node.send_text_message(&req.dest, &text);
    (StatusCode::ACCEPTED, Json(ApiResponse::ok(())))
}
