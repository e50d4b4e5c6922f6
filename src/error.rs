//! Error types for the link control plane

use thiserror::Error;

use crate::network::ConnId;

/// Main error type for the node
#[derive(Error, Debug)]
pub enum Error {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Link lifecycle errors.
///
/// Policy violations and resource exhaustion are rejected synchronously;
/// no connection attempt is made for any of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Refusing to connect node to itself")]
    SelfConnect,

    #[error("Node not found in directory: {0}")]
    NotFound(String),

    #[error("Invalid node name: {0:?}")]
    InvalidName(String),

    #[error("Link registry at capacity ({0} links)")]
    Capacity(usize),

    #[error("Transport failure connecting to {node}: {reason}")]
    TransportFailure { node: String, reason: String },

    #[error("Not connected to node: {0}")]
    NotConnected(String),

    #[error("Link to {0} is permanent; override required")]
    Permanent(String),
}

/// Protocol codec errors. Frames producing these are logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown opcode: {0:?}")]
    UnknownOpcode(String),

    #[error("Opcode {opcode} expects {expected} fields, got {got}")]
    FieldCount {
        opcode: char,
        expected: usize,
        got: usize,
    },

    #[error("Invalid {field} field: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Transport layer errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnId),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Frame encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
