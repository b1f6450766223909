//! Worker-thread clipboard entry points
//!
//! The protocol library calls these from the clipboard channel's worker
//! thread. They do the parsing that needs no compositor state and queue
//! the rest for the display thread.

use tracing::{debug, trace};

use super::error::Result;
use super::formats::ClipboardFormat;
use super::source::ClipboardSource;
use crate::dispatch::DispatchHandle;
use crate::rdp::PeerId;

/// A clipboard PDU bound for the display thread
#[derive(Debug)]
pub enum ClipboardEvent {
    /// Client format list, already parsed into a source
    FormatList(ClipboardSource),
    /// Client acknowledged our format list
    FormatListResponse(bool),
    /// Client wants our data in this wire format
    DataRequest(u32),
    /// Client answered our data request
    DataResponse {
        /// `CB_RESPONSE_OK`
        ok: bool,
        /// Raw wire payload
        data: Vec<u8>,
    },
}

/// Display-thread owner of the per-peer clipboard bridges
pub trait ClipboardHost {
    /// Handle a clipboard event from `peer`
    fn clipboard_event(&mut self, peer: PeerId, event: ClipboardEvent);
}

/// Worker-side clipboard handle for one peer
pub struct ClipboardWorker<D> {
    peer: PeerId,
    dispatch: DispatchHandle<D>,
}

impl<D> Clone for ClipboardWorker<D> {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer,
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<D: ClipboardHost + 'static> ClipboardWorker<D> {
    /// Create a handle posting to `dispatch`
    pub fn new(peer: PeerId, dispatch: DispatchHandle<D>) -> Self {
        Self { peer, dispatch }
    }

    /// Client format list PDU
    pub fn on_client_format_list(&self, formats: &[ClipboardFormat]) -> Result<()> {
        let source = ClipboardSource::from_client_format_list(formats)?;
        debug!(
            "Peer {} offers {} formats, {} bridged",
            self.peer,
            formats.len(),
            source.mime_types().len()
        );
        self.post(ClipboardEvent::FormatList(source))
    }

    /// Client format list response PDU
    pub fn on_client_format_list_response(&self, ok: bool) -> Result<()> {
        self.post(ClipboardEvent::FormatListResponse(ok))
    }

    /// Client format data request PDU
    pub fn on_client_format_data_request(&self, format_id: u32) -> Result<()> {
        self.post(ClipboardEvent::DataRequest(format_id))
    }

    /// Client format data response PDU
    pub fn on_client_format_data_response(&self, ok: bool, data: Vec<u8>) -> Result<()> {
        self.post(ClipboardEvent::DataResponse { ok, data })
    }

    fn post(&self, event: ClipboardEvent) -> Result<()> {
        let peer = self.peer;
        self.dispatch.dispatch(move |host: Option<&mut D>| match host {
            Some(host) => host.clipboard_event(peer, event),
            None => trace!("Releasing clipboard event for closed peer {}", peer),
        })?;
        Ok(())
    }
}
