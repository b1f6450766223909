//! Backend error types

use thiserror::Error;

use crate::clipboard::ClipboardError;
use crate::rdp::{PeerError, PeerId};

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// Registering an event source failed
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// Binding or adopting a socket failed
    #[error("Listener error: {0}")]
    Listener(String),

    /// TLS material could not be prepared
    #[error("TLS error: {0}")]
    Tls(String),

    /// No peer with this id
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Clipboard redirection is off for the peer
    #[error("Clipboard not redirected for peer {0}")]
    ClipboardDisabled(PeerId),

    /// Peer-level failure
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// Clipboard failure
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    /// The protocol library could not create a peer
    #[error("Peer creation failed: {0}")]
    PeerFactory(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<calloop::InsertError<T>> for BackendError {
    fn from(e: calloop::InsertError<T>) -> Self {
        BackendError::EventLoop(e.error.to_string())
    }
}
