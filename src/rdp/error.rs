//! Peer error types

use thiserror::Error;

use crate::clipboard::ClipboardError;
use crate::dispatch::DispatchError;
use crate::ids::IdError;
use crate::input::InputError;
use crate::multimon::TopologyError;

/// Result type for peer operations
pub type Result<T> = std::result::Result<T, PeerError>;

/// Peer-level errors
#[derive(Error, Debug)]
pub enum PeerError {
    /// The protocol library reported a failure
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Client did not advertise surface commands
    #[error("Client does not support surface commands")]
    SurfaceCommandsUnsupported,

    /// Remote-application mode needs a single peer and a shell
    #[error("Remote application mode refused: {0}")]
    RemoteAppRefused(&'static str),

    /// Operation not valid in the current peer state
    #[error("Peer is {0}")]
    InvalidState(&'static str),

    /// Encoder failure
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Monitor layout rejected
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Keymap or seat setup failed
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// Clipboard failure
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),

    /// Id space exhausted
    #[error("Id allocation failed: {0}")]
    Id(#[from] IdError),

    /// Cross-thread queue failure
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PeerError {
    /// Whether the peer has to be disconnected
    ///
    /// Bad monitor reports only drop the PDU; clipboard transfer failures
    /// only fail the transfer.
    pub fn is_fatal_for_peer(&self) -> bool {
        match self {
            PeerError::Topology(e) => !e.is_client_violation(),
            PeerError::Clipboard(e) => e.is_protocol_violation(),
            _ => true,
        }
    }
}
