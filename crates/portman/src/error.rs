//! Error types, one per concern.

use thiserror::Error;

use crate::types::PortRef;

/// Failures talking to the audio-graph service or reading the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("audio server unavailable: {0}")]
    Unavailable(String),

    #[error("failed to connect {a} -> {b}: {message}")]
    Connect { a: String, b: String, message: String },

    #[error("failed to disconnect {a} -x {b}: {message}")]
    Disconnect { a: String, b: String, message: String },

    #[error("failed to enumerate ports: {0}")]
    Enumerate(String),

    #[error("port {0} is not in the graph")]
    UnknownPort(PortRef),

    #[error("client {0:?} could not be resolved")]
    UnknownClient(String),
}

/// Failures opening or driving a hardware mixer control.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixerError {
    #[error("failed to open mixer control {control:?} on card {card}: {message}")]
    Open {
        card: u32,
        control: String,
        message: String,
    },

    #[error("mixer control {control:?} has no setting {setting:?}")]
    UnknownSetting { control: String, setting: String },

    #[error("mixer control {control:?}: {message}")]
    Io { control: String, message: String },
}

/// Failures constructing or driving a connection track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error("{kind} needs equal, pairable halves (got {left} and {right})")]
    Arity {
        kind: &'static str,
        left: usize,
        right: usize,
    },

    #[error("{0} needs at least one track")]
    Empty(&'static str),
}

/// Snapshot queries that could not find a usable port layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("no client named {0:?}")]
    NoClient(String),

    #[error("don't know how to get a stereo ref from {0}")]
    Unrecognized(String),

    #[error("channel {channel:?} matches {matches} ports of {client:?}")]
    Ambiguous {
        client: String,
        channel: String,
        matches: usize,
    },
}
