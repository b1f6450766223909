//! Clipboard Data Source
//!
//! One in-flight clipboard offer and its transfers. The state is an explicit
//! tag and every change goes through [`ClipboardSource::transition`]:
//!
//! ```text
//! Allocated → FormatListReady → Published
//! Published → RequestData → ReceivedData → Transferring → Transferred
//! Transferred | Canceled | Failed → RequestData   (next consumer)
//! non-terminal → CancelPending → Canceled
//! any → Failed
//! ```
//!
//! The same machine serves both directions. For a client-offered source the
//! payload arrives on the wire and is written to a compositor pipe; for a
//! compositor-offered source it is read from a compositor pipe and sent on
//! the wire.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::{debug, trace, warn};

use super::error::{ClipboardError, Result};
use super::formats::{
    entry, entry_for_mime, match_wire_format, transcode, ClipboardFormat, TransferDirection,
    FORMAT_COUNT,
};

/// Data source state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceState {
    /// Created, formats not yet parsed
    Allocated,
    /// Formats parsed
    FormatListReady,
    /// Offered to the other side
    Published,
    /// Payload requested from the producer
    RequestData,
    /// Raw payload cached
    ReceivedData,
    /// Payload being delivered
    Transferring,
    /// Payload delivered in full
    Transferred,
    /// Consumer went away mid-transfer
    CancelPending,
    /// Cancellation drained
    Canceled,
    /// Transfer failed
    Failed,
}

impl SourceState {
    /// Per-transfer end states
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SourceState::Transferred | SourceState::Canceled | SourceState::Failed
        )
    }

    /// A request is in flight
    pub fn is_transfer_active(self) -> bool {
        matches!(
            self,
            SourceState::RequestData
                | SourceState::ReceivedData
                | SourceState::Transferring
                | SourceState::CancelPending
        )
    }

    /// Whether `next` is an arrow of the state graph
    pub fn can_transition_to(self, next: SourceState) -> bool {
        use SourceState::*;

        match (self, next) {
            (Failed, Failed) => false,
            (_, Failed) => true,
            (Allocated, FormatListReady)
            | (FormatListReady, Published)
            | (Published, RequestData)
            | (RequestData, ReceivedData)
            | (ReceivedData, Transferring)
            | (Transferring, Transferred)
            | (CancelPending, Canceled) => true,
            (Transferred | Canceled | Failed, RequestData) => true,
            (from, CancelPending) => !from.is_terminal() && from != CancelPending,
            _ => false,
        }
    }
}

/// Which side offered the clipboard contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDirection {
    /// The RDP client copied; the compositor pastes
    ClientOffered,
    /// The compositor copied; the RDP client pastes
    CompositorOffered,
}

/// Progress of a pipe pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// The pipe would block; wait for the next wake-up
    Pending,
    /// The transfer reached a terminal state
    Finished,
}

/// Clipboard data source
#[derive(Debug)]
pub struct ClipboardSource {
    /// Offering side
    direction: SourceDirection,

    /// Current state
    state: SourceState,

    /// Advertised mime types, in table order of first appearance
    mime_types: Vec<String>,

    /// Wire id per format index: the client's ids for a client offer,
    /// the server's for a compositor offer
    client_format_ids: [Option<u32>; FORMAT_COUNT],

    /// Format of the cached payload
    format_index: Option<usize>,

    /// `data` has been transcoded
    processed: bool,

    /// Cached payload
    data: Vec<u8>,

    /// Bytes of `data` already written to the consumer
    written: usize,

    /// Times the pipe would have blocked
    retries: u32,

    /// Consumer write end or producer read end
    pipe: Option<File>,
}

impl ClipboardSource {
    /// Create a source in `Allocated`
    pub fn new(direction: SourceDirection) -> Self {
        Self {
            direction,
            state: SourceState::Allocated,
            mime_types: Vec::new(),
            client_format_ids: [None; FORMAT_COUNT],
            format_index: None,
            processed: false,
            data: Vec::new(),
            written: 0,
            retries: 0,
            pipe: None,
        }
    }

    /// Parse a client format list
    ///
    /// Each recognised table entry is kept once, with the first id the
    /// client used for it.
    pub fn from_client_format_list(formats: &[ClipboardFormat]) -> Result<Self> {
        let mut source = Self::new(SourceDirection::ClientOffered);

        for format in formats {
            match match_wire_format(format) {
                Some(entry) if source.client_format_ids[entry.index].is_none() => {
                    source.client_format_ids[entry.index] = Some(format.format_id);
                    source.mime_types.push(entry.mime_type.to_string());
                }
                Some(_) => trace!("Duplicate client format 0x{:04X}", format.format_id),
                None => trace!(
                    "Ignoring client format 0x{:04X} {:?}",
                    format.format_id,
                    format.format_name
                ),
            }
        }

        source.transition(SourceState::FormatListReady)?;
        Ok(source)
    }

    /// Intersect a compositor selection with the format table
    pub fn from_compositor_selection(mime_types: &[String]) -> Result<Self> {
        let mut source = Self::new(SourceDirection::CompositorOffered);

        for mime_type in mime_types {
            if let Some(entry) = entry_for_mime(mime_type) {
                if source.client_format_ids[entry.index].is_none() {
                    source.client_format_ids[entry.index] = Some(entry.format_id);
                    source.mime_types.push(entry.mime_type.to_string());
                }
            }
        }

        source.transition(SourceState::FormatListReady)?;
        Ok(source)
    }

    /// Move to `next`, rejecting anything that is not an arrow of the graph
    pub fn transition(&mut self, next: SourceState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ClipboardError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Clipboard source {:?}: {:?} -> {:?}", self.direction, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Current state
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Offering side
    pub fn direction(&self) -> SourceDirection {
        self.direction
    }

    /// Advertised mime types
    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    /// Wire id recorded for a format index
    pub fn client_format_id(&self, index: usize) -> Option<u32> {
        self.client_format_ids.get(index).copied().flatten()
    }

    /// Format index for a wire id
    pub fn index_for_format_id(&self, format_id: u32) -> Option<usize> {
        self.client_format_ids
            .iter()
            .position(|id| *id == Some(format_id))
    }

    /// Format list to advertise for this source
    pub fn offered_formats(&self) -> Vec<ClipboardFormat> {
        self.client_format_ids
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                let entry = entry(index)?;
                Some(ClipboardFormat::new(
                    (*id)?,
                    entry.format_name.unwrap_or_default(),
                ))
            })
            .collect()
    }

    /// Format of the cached payload
    pub fn format_index(&self) -> Option<usize> {
        self.format_index
    }

    /// Cached payload, transcoded once [`is_processed`](Self::is_processed)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the cached payload has been transcoded
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Bytes written to the consumer so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Times the pipe would have blocked in this transfer
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Duplicate of the pipe fd, for event loop registration
    pub fn try_clone_pipe_fd(&self) -> Result<OwnedFd> {
        let pipe = self.pipe.as_ref().ok_or(ClipboardError::NoSource)?;
        Ok(pipe.as_fd().try_clone_to_owned()?)
    }

    /// Attach the pipe for the next transfer, switching it to non-blocking
    pub fn attach_pipe(&mut self, fd: OwnedFd) -> Result<()> {
        let raw = fd.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
        fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        self.pipe = Some(File::from(fd));
        Ok(())
    }

    /// Start a transfer of `index`
    ///
    /// Returns `true` when the producer must be asked for the payload and
    /// `false` when the cached payload already matches.
    pub fn begin_request(&mut self, index: usize) -> Result<bool> {
        self.transition(SourceState::RequestData)?;
        self.written = 0;
        self.retries = 0;

        if self.format_index == Some(index) && !self.data.is_empty() {
            debug!("Clipboard cache hit for format index {}", index);
            self.transition(SourceState::ReceivedData)?;
            return Ok(false);
        }

        self.format_index = Some(index);
        self.data.clear();
        self.processed = false;
        Ok(true)
    }

    /// Store the producer's raw payload
    pub fn receive_data(&mut self, ok: bool, data: Vec<u8>) -> Result<()> {
        if !ok {
            self.fail();
            return Err(ClipboardError::RequestFailed);
        }
        if data.is_empty() {
            self.fail();
            return Err(ClipboardError::EmptyPayload);
        }

        self.data = data;
        self.processed = false;
        self.transition(SourceState::ReceivedData)
    }

    /// Transcode the cached payload once and enter `Transferring`
    fn prepare_payload(&mut self) -> Result<()> {
        if !self.processed {
            let entry = self
                .format_index
                .and_then(entry)
                .ok_or(ClipboardError::NoSource)?;
            let direction = match self.direction {
                SourceDirection::ClientOffered => TransferDirection::WireToCompositor,
                SourceDirection::CompositorOffered => TransferDirection::CompositorToWire,
            };
            self.data = transcode(entry, direction, &self.data)?;
            self.processed = true;
        }
        self.transition(SourceState::Transferring)
    }

    /// Write as much of the payload to the consumer pipe as it takes
    ///
    /// The source reaches `Transferred` only once every transcoded byte
    /// has been written.
    pub fn pump_to_consumer(&mut self) -> Result<PumpStatus> {
        match self.state {
            SourceState::CancelPending => {
                self.finish_cancel();
                return Ok(PumpStatus::Finished);
            }
            SourceState::ReceivedData => {
                if let Err(e) = self.prepare_payload() {
                    self.fail();
                    return Err(e);
                }
            }
            SourceState::Transferring => {}
            state if state.is_terminal() => return Ok(PumpStatus::Finished),
            state => {
                return Err(ClipboardError::InvalidTransition {
                    from: state,
                    to: SourceState::Transferring,
                })
            }
        }

        let Some(pipe) = self.pipe.as_mut() else {
            self.fail();
            return Err(ClipboardError::NoSource);
        };

        while self.written < self.data.len() {
            match pipe.write(&self.data[self.written..]) {
                Ok(0) => break,
                Ok(n) => self.written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.retries += 1;
                    trace!(
                        "Clipboard pipe full at {}/{} bytes (retry {})",
                        self.written,
                        self.data.len(),
                        self.retries
                    );
                    return Ok(PumpStatus::Pending);
                }
                Err(e) => {
                    warn!("Clipboard consumer write failed: {}", e);
                    self.fail();
                    return Err(e.into());
                }
            }
        }

        if self.written != self.data.len() {
            self.fail();
            return Err(ClipboardError::InvalidData(format!(
                "short write: {} of {} bytes",
                self.written,
                self.data.len()
            )));
        }

        self.pipe = None;
        self.transition(SourceState::Transferred)?;
        Ok(PumpStatus::Finished)
    }

    /// Drain the producer pipe; on EOF the payload is transcoded for the wire
    pub fn read_from_producer(&mut self) -> Result<PumpStatus> {
        if self.state == SourceState::CancelPending {
            self.finish_cancel();
            return Ok(PumpStatus::Finished);
        }
        if self.state != SourceState::RequestData {
            return Err(ClipboardError::InvalidTransition {
                from: self.state,
                to: SourceState::ReceivedData,
            });
        }

        let Some(pipe) = self.pipe.as_mut() else {
            self.fail();
            return Err(ClipboardError::NoSource);
        };

        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.data.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.retries += 1;
                    return Ok(PumpStatus::Pending);
                }
                Err(e) => {
                    warn!("Clipboard producer read failed: {}", e);
                    self.fail();
                    return Err(e.into());
                }
            }
        }

        self.pipe = None;
        let data = std::mem::take(&mut self.data);
        self.receive_data(true, data)?;
        if let Err(e) = self.prepare_payload() {
            self.fail();
            return Err(e);
        }
        Ok(PumpStatus::Finished)
    }

    /// Ready the cached payload for the wire after a cache hit
    pub fn take_cached_payload(&mut self) -> Result<&[u8]> {
        if let Err(e) = self.prepare_payload() {
            self.fail();
            return Err(e);
        }
        Ok(&self.data)
    }

    /// The wire payload was sent
    pub fn complete_send(&mut self) -> Result<()> {
        self.written = self.data.len();
        self.transition(SourceState::Transferred)
    }

    /// Cancel the current transfer
    ///
    /// Returns `true` when the cancellation has to be drained by the next
    /// pump or response, `false` when it completed immediately.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_transfer_active() {
            if self.state != SourceState::CancelPending {
                self.state = SourceState::CancelPending;
                debug!("Clipboard source {:?}: cancel pending", self.direction);
            }
            return true;
        }
        if !self.state.is_terminal() {
            self.state = SourceState::CancelPending;
            self.finish_cancel();
        }
        false
    }

    /// Complete a pending cancellation
    pub fn finish_cancel(&mut self) {
        self.pipe = None;
        if self.state == SourceState::CancelPending {
            self.state = SourceState::Canceled;
            debug!("Clipboard source {:?}: canceled", self.direction);
        }
    }

    /// Mark the transfer failed and release the pipe
    pub fn fail(&mut self) {
        self.pipe = None;
        if self.state != SourceState::Failed {
            debug!("Clipboard source {:?}: {:?} -> Failed", self.direction, self.state);
            self.state = SourceState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::formats::format_id::*;
    use nix::unistd::pipe;
    use std::os::fd::OwnedFd;

    fn published_client_source() -> ClipboardSource {
        let mut source = ClipboardSource::from_client_format_list(&[
            ClipboardFormat::new(CF_UNICODETEXT, ""),
            ClipboardFormat::new(0xC0AA, "HTML Format"),
        ])
        .unwrap();
        source.transition(SourceState::Published).unwrap();
        source
    }

    fn read_all(fd: OwnedFd) -> Vec<u8> {
        let mut out = Vec::new();
        File::from(fd).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_graph_arrows() {
        use SourceState::*;
        assert!(Allocated.can_transition_to(FormatListReady));
        assert!(!Allocated.can_transition_to(Published));
        assert!(!Published.can_transition_to(ReceivedData));
        assert!(!ReceivedData.can_transition_to(Transferred));
        assert!(Transferred.can_transition_to(RequestData));
        assert!(Transferring.can_transition_to(CancelPending));
        assert!(!Canceled.can_transition_to(CancelPending));
        assert!(Allocated.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut source = ClipboardSource::new(SourceDirection::ClientOffered);
        let err = source.transition(SourceState::Transferred).unwrap_err();
        assert!(matches!(err, ClipboardError::InvalidTransition { .. }));
        assert_eq!(source.state(), SourceState::Allocated);
    }

    #[test]
    fn test_client_format_list_keeps_private_ids() {
        let source = ClipboardSource::from_client_format_list(&[
            ClipboardFormat::new(CF_UNICODETEXT, ""),
            ClipboardFormat::new(0xC0AA, "HTML Format"),
            ClipboardFormat::new(0xC0AB, "HTML Format"),
            ClipboardFormat::new(0xC0F0, "Some Private Format"),
        ])
        .unwrap();

        assert_eq!(source.state(), SourceState::FormatListReady);
        assert_eq!(
            source.mime_types(),
            ["text/plain;charset=utf-8", "text/html"]
        );
        assert_eq!(source.client_format_id(3), Some(0xC0AA));
        assert_eq!(source.index_for_format_id(0xC0AA), Some(3));
    }

    #[test]
    fn test_compositor_selection_intersection() {
        let source = ClipboardSource::from_compositor_selection(&[
            "text/uri-list".to_string(),
            "text/html".to_string(),
            "text/plain;charset=utf-8".to_string(),
        ])
        .unwrap();

        let formats = source.offered_formats();
        assert_eq!(
            formats,
            vec![
                ClipboardFormat::new(CF_UNICODETEXT, ""),
                ClipboardFormat::new(CF_PRIVATE_HTML, "HTML Format"),
            ]
        );
    }

    #[test]
    fn test_full_client_transfer() {
        let mut source = published_client_source();
        let (read, write) = pipe().unwrap();
        source.attach_pipe(write).unwrap();

        assert!(source.begin_request(0).unwrap());
        assert_eq!(source.state(), SourceState::RequestData);

        let wire = utf8_to_wire("hello");
        source.receive_data(true, wire).unwrap();
        assert_eq!(source.state(), SourceState::ReceivedData);

        assert_eq!(source.pump_to_consumer().unwrap(), PumpStatus::Finished);
        assert_eq!(source.state(), SourceState::Transferred);
        assert_eq!(source.written(), source.data().len());
        assert_eq!(read_all(read), b"hello");
    }

    fn utf8_to_wire(s: &str) -> Vec<u8> {
        crate::clipboard::formats::utf8_to_utf16(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_cache_hit_skips_request() {
        let mut source = published_client_source();
        let (_read, write) = pipe().unwrap();
        source.attach_pipe(write).unwrap();
        source.begin_request(0).unwrap();
        source.receive_data(true, utf8_to_wire("again")).unwrap();
        source.pump_to_consumer().unwrap();

        let (read, write) = pipe().unwrap();
        source.attach_pipe(write).unwrap();
        assert!(!source.begin_request(0).unwrap());
        assert_eq!(source.state(), SourceState::ReceivedData);
        source.pump_to_consumer().unwrap();
        assert_eq!(read_all(read), b"again");

        assert!(source.begin_request(3).unwrap());
    }

    #[test]
    fn test_zero_byte_payload_fails() {
        let mut source = published_client_source();
        source.begin_request(0).unwrap();
        let err = source.receive_data(true, Vec::new()).unwrap_err();
        assert!(matches!(err, ClipboardError::EmptyPayload));
        assert_eq!(source.state(), SourceState::Failed);
    }

    #[test]
    fn test_rejected_request_fails() {
        let mut source = published_client_source();
        source.begin_request(0).unwrap();
        assert!(source.receive_data(false, Vec::new()).is_err());
        assert_eq!(source.state(), SourceState::Failed);
        assert!(source.begin_request(0).unwrap());
    }

    #[test]
    fn test_partial_writes_retry() {
        let mut source = published_client_source();
        let (read, write) = pipe().unwrap();
        source.attach_pipe(write).unwrap();
        source.begin_request(0).unwrap();

        let text = "x".repeat(200_000);
        source.receive_data(true, utf8_to_wire(&text)).unwrap();
        assert_eq!(source.pump_to_consumer().unwrap(), PumpStatus::Pending);
        assert_eq!(source.state(), SourceState::Transferring);
        assert!(source.retries() >= 1);

        let reader = std::thread::spawn(move || read_all(read));
        loop {
            if source.pump_to_consumer().unwrap() == PumpStatus::Finished {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(reader.join().unwrap().len(), 200_000);
        assert_eq!(source.state(), SourceState::Transferred);
    }

    #[test]
    fn test_cancel_drains_on_next_pump() {
        let mut source = published_client_source();
        let (_read, write) = pipe().unwrap();
        source.attach_pipe(write).unwrap();
        source.begin_request(0).unwrap();

        assert!(source.cancel());
        assert_eq!(source.state(), SourceState::CancelPending);
        assert_eq!(source.pump_to_consumer().unwrap(), PumpStatus::Finished);
        assert_eq!(source.state(), SourceState::Canceled);
    }

    #[test]
    fn test_producer_read_and_transcode() {
        let mut source =
            ClipboardSource::from_compositor_selection(&["text/plain;charset=utf-8".to_string()])
                .unwrap();
        source.transition(SourceState::Published).unwrap();
        assert!(source.begin_request(0).unwrap());

        let (read, write) = pipe().unwrap();
        source.attach_pipe(read).unwrap();
        File::from(write).write_all("héllo".as_bytes()).unwrap();

        assert_eq!(source.read_from_producer().unwrap(), PumpStatus::Finished);
        assert_eq!(source.state(), SourceState::Transferring);
        assert_eq!(
            source.data(),
            [0x68, 0x00, 0xE9, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00, 0x00, 0x00]
        );
        source.complete_send().unwrap();
        assert_eq!(source.state(), SourceState::Transferred);
    }

    #[test]
    fn test_producer_pending_until_eof() {
        let mut source =
            ClipboardSource::from_compositor_selection(&["text/rtf".to_string()]).unwrap();
        source.transition(SourceState::Published).unwrap();
        source.begin_request(2).unwrap();

        let (read, write) = pipe().unwrap();
        source.attach_pipe(read).unwrap();
        let mut writer = File::from(write);
        writer.write_all(b"{\\rtf1 ").unwrap();
        assert_eq!(source.read_from_producer().unwrap(), PumpStatus::Pending);

        writer.write_all(b"x}").unwrap();
        drop(writer);
        assert_eq!(source.read_from_producer().unwrap(), PumpStatus::Finished);
        assert_eq!(source.data(), b"{\\rtf1 x}");
    }
}
