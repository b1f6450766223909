//! Clipboard Error Types

use thiserror::Error;

use super::source::SourceState;

/// Result type for clipboard operations
pub type Result<T> = std::result::Result<T, ClipboardError>;

/// Clipboard module error types
#[derive(Error, Debug)]
pub enum ClipboardError {
    /// Format conversion error
    #[error("Format conversion failed: {0}")]
    FormatConversionFailed(String),

    /// Invalid UTF-8 data
    #[error("Invalid UTF-8 data")]
    InvalidUtf8,

    /// Invalid UTF-16 data
    #[error("Invalid UTF-16 data")]
    InvalidUtf16,

    /// Invalid data structure
    #[error("Invalid data structure: {0}")]
    InvalidData(String),

    /// Zero-length payload
    #[error("Empty clipboard payload")]
    EmptyPayload,

    /// Mime type not in the format table
    #[error("Unsupported mime type: {0}")]
    UnsupportedMimeType(String),

    /// Wire format not offered by the current source
    #[error("Format 0x{0:04X} not offered")]
    FormatNotOffered(u32),

    /// No source to serve the request
    #[error("No clipboard source available")]
    NoSource,

    /// A transfer is already running on this source
    #[error("Clipboard transfer already in progress")]
    TransferInProgress,

    /// State machine violation
    #[error("Invalid clipboard transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state
        from: SourceState,
        /// Requested state
        to: SourceState,
    },

    /// Client asked for data while a previous request is outstanding
    #[error("Format data request while another is outstanding")]
    NestedRequest,

    /// Client answered a request nobody made
    #[error("Format data response without a request")]
    UnexpectedResponse,

    /// The producer answered with a failure response
    #[error("Clipboard data request failed")]
    RequestFailed,

    /// Queueing onto the display thread failed
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    /// Virtual channel send failed
    #[error("Clipboard channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipe syscall error
    #[error("Pipe error: {0}")]
    Pipe(#[from] nix::errno::Errno),
}

impl ClipboardError {
    /// Whether the peer broke the CLIPRDR protocol and must be disconnected
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ClipboardError::NestedRequest | ClipboardError::UnexpectedResponse
        )
    }

    /// Whether the error only fails the current transfer
    pub fn is_transfer_failure(&self) -> bool {
        !self.is_protocol_violation()
    }
}
