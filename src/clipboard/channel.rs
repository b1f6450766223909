//! CLIPRDR server channel
//!
//! The protocol library owns PDU encoding; the bridge only needs to emit
//! the five server-side messages below. Implementations must be callable
//! from both the display thread and the channel's worker thread.

use super::error::Result;
use super::formats::ClipboardFormat;

/// Server side of the clipboard virtual channel
#[cfg_attr(test, mockall::automock)]
pub trait ClipboardChannel: Send + Sync {
    /// Clipboard capabilities PDU
    fn send_capabilities(&self) -> Result<()>;

    /// Format list PDU
    fn send_format_list(&self, formats: &[ClipboardFormat]) -> Result<()>;

    /// Format list response PDU
    fn send_format_list_response(&self, ok: bool) -> Result<()>;

    /// Format data request PDU
    fn send_format_data_request(&self, format_id: u32) -> Result<()>;

    /// Format data response PDU; `data` is empty on failure
    fn send_format_data_response(&self, ok: bool, data: &[u8]) -> Result<()>;
}
