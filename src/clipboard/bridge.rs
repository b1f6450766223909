//! Display-thread clipboard bridge
//!
//! One bridge per peer. It holds at most two sources: the client's current
//! offer (published to the compositor as the selection) and the
//! compositor's current offer (advertised to the client).
//!
//! The bridge never blocks. Pipe work is split into steps driven by the
//! backend's event loop: methods that start a pipe transfer return a
//! [`Watch`] carrying a duplicate of the pipe fd to register, and the loop
//! calls [`ClipboardBridge::on_consumer_writable`] or
//! [`ClipboardBridge::on_producer_readable`] on each wake-up.

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use tracing::{debug, info, warn};

use super::channel::ClipboardChannel;
use super::error::{ClipboardError, Result};
use super::formats::{entry, entry_for_mime};
use super::source::{ClipboardSource, PumpStatus, SourceState};
use crate::compositor::Compositor;
use crate::rdp::PeerId;

/// A pipe the event loop has to watch for this bridge
#[derive(Debug)]
pub enum Watch {
    /// Consumer pipe; call [`ClipboardBridge::on_consumer_writable`]
    Writable(OwnedFd),
    /// Producer pipe; call [`ClipboardBridge::on_producer_readable`]
    Readable(OwnedFd),
}

/// Per-peer clipboard bridge
pub struct ClipboardBridge {
    peer: PeerId,
    channel: Arc<dyn ClipboardChannel>,

    /// Client offer currently published as the selection
    client_source: Option<ClipboardSource>,
    /// Our data request has not been answered yet
    awaiting_response: bool,

    /// Compositor offer currently advertised to the client
    server_source: Option<ClipboardSource>,
    /// The client's data request has not been answered yet
    request_pending: bool,
}

impl std::fmt::Debug for ClipboardBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardBridge")
            .field("peer", &self.peer)
            .field("client_source", &self.client_source)
            .field("awaiting_response", &self.awaiting_response)
            .field("server_source", &self.server_source)
            .field("request_pending", &self.request_pending)
            .finish()
    }
}

impl ClipboardBridge {
    /// Create a bridge for `peer`
    pub fn new(peer: PeerId, channel: Arc<dyn ClipboardChannel>) -> Self {
        Self {
            peer,
            channel,
            client_source: None,
            awaiting_response: false,
            server_source: None,
            request_pending: false,
        }
    }

    /// Announce server capabilities once the channel is up
    pub fn start(&self) -> Result<()> {
        info!("Clipboard redirection started for peer {}", self.peer);
        self.channel.send_capabilities()
    }

    /// Client offer currently published
    pub fn client_source(&self) -> Option<&ClipboardSource> {
        self.client_source.as_ref()
    }

    /// Compositor offer currently advertised
    pub fn server_source(&self) -> Option<&ClipboardSource> {
        self.server_source.as_ref()
    }

    // ===== Client offers, compositor consumes =====

    /// Publish a parsed client format list as the compositor selection
    pub fn publish_client_formats(
        &mut self,
        mut source: ClipboardSource,
        compositor: &mut dyn Compositor,
    ) -> Result<()> {
        let had_selection = match self.client_source.take() {
            Some(mut previous) => {
                previous.cancel();
                true
            }
            None => false,
        };

        if source.mime_types().is_empty() {
            debug!("Peer {} offered no bridged formats", self.peer);
            source.fail();
            if had_selection {
                compositor.clear_selection(self.peer);
            }
            return self.channel.send_format_list_response(false);
        }

        source.transition(SourceState::Published)?;
        compositor.set_selection(self.peer, source.mime_types());
        self.client_source = Some(source);
        self.channel.send_format_list_response(true)
    }

    /// A compositor consumer wants the client's data as `mime_type`
    ///
    /// `fd` is the consumer's write end. It is closed on error.
    pub fn request_from_client(&mut self, mime_type: &str, fd: OwnedFd) -> Result<Option<Watch>> {
        let entry = entry_for_mime(mime_type)
            .ok_or_else(|| ClipboardError::UnsupportedMimeType(mime_type.to_string()))?;
        let source = self.client_source.as_mut().ok_or(ClipboardError::NoSource)?;

        if self.awaiting_response || source.state().is_transfer_active() {
            warn!("Peer {}: rejecting {} while a transfer is active", self.peer, mime_type);
            return Err(ClipboardError::TransferInProgress);
        }

        let format_id = source
            .client_format_id(entry.index)
            .ok_or_else(|| ClipboardError::UnsupportedMimeType(mime_type.to_string()))?;

        source.attach_pipe(fd)?;
        if source.begin_request(entry.index)? {
            debug!(
                "Peer {}: requesting format 0x{:04X} for {}",
                self.peer, format_id, mime_type
            );
            if let Err(e) = self.channel.send_format_data_request(format_id) {
                source.fail();
                return Err(e);
            }
            self.awaiting_response = true;
            return Ok(None);
        }

        Ok(Some(Watch::Writable(source.try_clone_pipe_fd()?)))
    }

    /// The client answered our data request
    pub fn on_client_data_response(&mut self, ok: bool, data: Vec<u8>) -> Result<Option<Watch>> {
        if !self.awaiting_response {
            return Err(ClipboardError::UnexpectedResponse);
        }
        self.awaiting_response = false;

        let Some(source) = self.client_source.as_mut() else {
            debug!("Peer {}: response for a withdrawn offer", self.peer);
            return Ok(None);
        };

        match source.state() {
            SourceState::RequestData => {
                source.receive_data(ok, data)?;
                Ok(Some(Watch::Writable(source.try_clone_pipe_fd()?)))
            }
            SourceState::CancelPending => {
                source.finish_cancel();
                Ok(None)
            }
            state => {
                debug!("Peer {}: response ignored in {:?}", self.peer, state);
                Ok(None)
            }
        }
    }

    /// The consumer pipe can take more bytes
    pub fn on_consumer_writable(&mut self) -> Result<PumpStatus> {
        match self.client_source.as_mut() {
            Some(source) => source.pump_to_consumer(),
            None => Ok(PumpStatus::Finished),
        }
    }

    /// The compositor consumer gave up on the transfer
    pub fn cancel_client_transfer(&mut self) {
        if let Some(source) = self.client_source.as_mut() {
            source.cancel();
        }
    }

    // ===== Compositor offers, client consumes =====

    /// The compositor selection changed to an offer with `mime_types`
    ///
    /// The format list is sent even when nothing is bridged, so the client
    /// drops its stale view.
    pub fn compositor_selection_changed(&mut self, mime_types: &[String]) -> Result<()> {
        if self.request_pending {
            debug!("Peer {}: failing request against replaced selection", self.peer);
            self.request_pending = false;
            self.channel.send_format_data_response(false, &[])?;
        }
        if let Some(mut previous) = self.server_source.take() {
            previous.cancel();
        }

        let mut source = ClipboardSource::from_compositor_selection(mime_types)?;
        let formats = source.offered_formats();
        source.transition(SourceState::Published)?;
        self.server_source = Some(source);

        debug!("Peer {}: advertising {} formats", self.peer, formats.len());
        self.channel.send_format_list(&formats)
    }

    /// The client acknowledged our format list
    pub fn on_client_format_list_response(&mut self, ok: bool) {
        if ok {
            debug!("Peer {} accepted the format list", self.peer);
        } else {
            warn!("Peer {} rejected the format list", self.peer);
        }
    }

    /// The client wants the compositor selection in `format_id`
    ///
    /// Failures answer the client with a failure response before returning.
    pub fn on_client_data_request(
        &mut self,
        format_id: u32,
        compositor: &mut dyn Compositor,
    ) -> Result<Option<Watch>> {
        if self.request_pending {
            return Err(ClipboardError::NestedRequest);
        }
        self.request_pending = true;

        match self.start_server_transfer(format_id, compositor) {
            Ok(watch) => Ok(watch),
            Err(e) => {
                self.fail_client_request();
                Err(e)
            }
        }
    }

    fn start_server_transfer(
        &mut self,
        format_id: u32,
        compositor: &mut dyn Compositor,
    ) -> Result<Option<Watch>> {
        let source = self.server_source.as_mut().ok_or(ClipboardError::NoSource)?;
        let index = source
            .index_for_format_id(format_id)
            .ok_or(ClipboardError::FormatNotOffered(format_id))?;
        let entry = entry(index).ok_or(ClipboardError::FormatNotOffered(format_id))?;

        if !source.begin_request(index)? {
            self.send_server_payload(true)?;
            return Ok(None);
        }

        let (read, write) = pipe2(OFlag::O_CLOEXEC)?;
        debug!(
            "Peer {}: reading {} from compositor on fd {}",
            self.peer,
            entry.mime_type,
            read.as_raw_fd()
        );
        if !compositor.send_selection(entry.mime_type, write) {
            source.fail();
            return Err(ClipboardError::NoSource);
        }
        source.attach_pipe(read)?;
        Ok(Some(Watch::Readable(source.try_clone_pipe_fd()?)))
    }

    /// The compositor producer pipe has data or hit EOF
    pub fn on_producer_readable(&mut self) -> Result<PumpStatus> {
        let Some(source) = self.server_source.as_mut() else {
            return Ok(PumpStatus::Finished);
        };

        match source.read_from_producer() {
            Ok(PumpStatus::Pending) => Ok(PumpStatus::Pending),
            Ok(PumpStatus::Finished) if source.state() == SourceState::Transferring => {
                self.send_server_payload(false)?;
                Ok(PumpStatus::Finished)
            }
            Ok(PumpStatus::Finished) => Ok(PumpStatus::Finished),
            Err(e) => {
                self.fail_client_request();
                Err(e)
            }
        }
    }

    fn send_server_payload(&mut self, from_cache: bool) -> Result<()> {
        let source = self.server_source.as_mut().ok_or(ClipboardError::NoSource)?;
        let payload = if from_cache {
            source.take_cached_payload()?
        } else {
            source.data()
        };

        self.channel.send_format_data_response(true, payload)?;
        source.complete_send()?;
        self.request_pending = false;
        Ok(())
    }

    fn fail_client_request(&mut self) {
        if let Some(source) = self.server_source.as_mut() {
            source.fail();
        }
        if self.request_pending {
            self.request_pending = false;
            if let Err(e) = self.channel.send_format_data_response(false, &[]) {
                warn!("Peer {}: failure response not sent: {}", self.peer, e);
            }
        }
    }

    /// Release both offers at peer teardown
    pub fn shutdown(&mut self, compositor: &mut dyn Compositor) {
        if let Some(mut source) = self.client_source.take() {
            source.cancel();
            compositor.clear_selection(self.peer);
        }
        if let Some(mut source) = self.server_source.take() {
            source.cancel();
        }
        self.awaiting_response = false;
        self.request_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::channel::MockClipboardChannel;
    use crate::clipboard::formats::format_id::*;
    use crate::clipboard::formats::ClipboardFormat;
    use crate::compositor::{CompositorEvent, HeadlessCompositor};
    use mockall::predicate::eq;
    use nix::unistd::pipe;
    use std::collections::HashMap;
    use std::fs::File;
    use std::io::Read;

    fn client_text_offer() -> ClipboardSource {
        ClipboardSource::from_client_format_list(&[ClipboardFormat::new(CF_UNICODETEXT, "")])
            .unwrap()
    }

    fn bridge(channel: MockClipboardChannel) -> ClipboardBridge {
        ClipboardBridge::new(PeerId(1), Arc::new(channel))
    }

    fn drain_writable(bridge: &mut ClipboardBridge) {
        while bridge.on_consumer_writable().unwrap() == PumpStatus::Pending {}
    }

    fn drain_readable(bridge: &mut ClipboardBridge) {
        loop {
            match bridge.on_producer_readable().unwrap() {
                PumpStatus::Finished => break,
                PumpStatus::Pending => std::thread::sleep(std::time::Duration::from_millis(1)),
            }
        }
    }

    #[test]
    fn test_publish_sets_selection() {
        let mut channel = MockClipboardChannel::new();
        channel
            .expect_send_format_list_response()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));
        let mut bridge = bridge(channel);
        let mut compositor = HeadlessCompositor::new();

        bridge
            .publish_client_formats(client_text_offer(), &mut compositor)
            .unwrap();

        assert_eq!(
            bridge.client_source().map(|s| s.state()),
            Some(SourceState::Published)
        );
        assert_eq!(
            compositor.events().lock()[0],
            CompositorEvent::SelectionSet(
                PeerId(1),
                vec!["text/plain;charset=utf-8".to_string()]
            )
        );
    }

    #[test]
    fn test_empty_offer_clears_previous_selection() {
        let mut channel = MockClipboardChannel::new();
        channel
            .expect_send_format_list_response()
            .returning(|_| Ok(()));
        let mut bridge = bridge(channel);
        let mut compositor = HeadlessCompositor::new();

        bridge
            .publish_client_formats(client_text_offer(), &mut compositor)
            .unwrap();
        let empty = ClipboardSource::from_client_format_list(&[]).unwrap();
        bridge.publish_client_formats(empty, &mut compositor).unwrap();

        assert!(bridge.client_source().is_none());
        assert_eq!(
            compositor.events().lock().last(),
            Some(&CompositorEvent::SelectionCleared(PeerId(1)))
        );
    }

    #[test]
    fn test_client_to_compositor_paste() {
        let mut channel = MockClipboardChannel::new();
        channel
            .expect_send_format_list_response()
            .returning(|_| Ok(()));
        channel
            .expect_send_format_data_request()
            .with(eq(CF_UNICODETEXT))
            .times(1)
            .returning(|_| Ok(()));
        let mut bridge = bridge(channel);
        let mut compositor = HeadlessCompositor::new();
        bridge
            .publish_client_formats(client_text_offer(), &mut compositor)
            .unwrap();

        let (read, write) = pipe().unwrap();
        let watch = bridge
            .request_from_client("text/plain;charset=utf-8", write)
            .unwrap();
        assert!(watch.is_none());

        let wire = vec![0x68, 0x00, 0x69, 0x00, 0x0D, 0x00, 0x0A, 0x00, 0x00, 0x00];
        let watch = bridge.on_client_data_response(true, wire).unwrap();
        assert!(matches!(watch, Some(Watch::Writable(_))));
        drop(watch);
        drain_writable(&mut bridge);

        let mut out = Vec::new();
        File::from(read).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hi");
        assert_eq!(
            bridge.client_source().map(|s| s.state()),
            Some(SourceState::Transferred)
        );
    }

    #[test]
    fn test_second_request_rejected_while_active() {
        let mut channel = MockClipboardChannel::new();
        channel
            .expect_send_format_list_response()
            .returning(|_| Ok(()));
        channel
            .expect_send_format_data_request()
            .times(1)
            .returning(|_| Ok(()));
        let mut bridge = bridge(channel);
        let mut compositor = HeadlessCompositor::new();
        bridge
            .publish_client_formats(client_text_offer(), &mut compositor)
            .unwrap();

        let (_r1, w1) = pipe().unwrap();
        bridge
            .request_from_client("text/plain;charset=utf-8", w1)
            .unwrap();
        let (_r2, w2) = pipe().unwrap();
        assert!(matches!(
            bridge.request_from_client("text/plain;charset=utf-8", w2),
            Err(ClipboardError::TransferInProgress)
        ));
    }

    #[test]
    fn test_unsolicited_response_is_violation() {
        let mut bridge = bridge(MockClipboardChannel::new());
        let err = bridge.on_client_data_response(true, vec![1, 2]).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_zero_byte_response_fails_transfer() {
        let mut channel = MockClipboardChannel::new();
        channel
            .expect_send_format_list_response()
            .returning(|_| Ok(()));
        channel
            .expect_send_format_data_request()
            .returning(|_| Ok(()));
        let mut bridge = bridge(channel);
        let mut compositor = HeadlessCompositor::new();
        bridge
            .publish_client_formats(client_text_offer(), &mut compositor)
            .unwrap();
        let (_read, write) = pipe().unwrap();
        bridge
            .request_from_client("text/plain;charset=utf-8", write)
            .unwrap();

        let err = bridge.on_client_data_response(true, Vec::new()).unwrap_err();
        assert!(!err.is_protocol_violation());
        assert_eq!(
            bridge.client_source().map(|s| s.state()),
            Some(SourceState::Failed)
        );
    }

    #[test]
    fn test_compositor_to_client_hello() {
        let mut channel = MockClipboardChannel::new();
        channel
            .expect_send_format_list()
            .withf(|formats| formats == [ClipboardFormat::new(CF_UNICODETEXT, "")])
            .times(1)
            .returning(|_| Ok(()));
        channel
            .expect_send_format_data_response()
            .withf(|ok, data| {
                *ok && data == [0x68, 0x00, 0xE9, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00, 0x00, 0x00]
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut bridge = bridge(channel);

        let mut compositor = HeadlessCompositor::new();
        compositor.set_local_selection(HashMap::from([(
            "text/plain;charset=utf-8".to_string(),
            vec![0x68, 0xC3, 0xA9, 0x6C, 0x6C, 0x6F],
        )]));

        bridge
            .compositor_selection_changed(&["text/plain;charset=utf-8".to_string()])
            .unwrap();
        let watch = bridge
            .on_client_data_request(CF_UNICODETEXT, &mut compositor)
            .unwrap();
        assert!(matches!(watch, Some(Watch::Readable(_))));
        drain_readable(&mut bridge);

        assert_eq!(
            bridge.server_source().map(|s| s.state()),
            Some(SourceState::Transferred)
        );
    }

    #[test]
    fn test_nested_request_is_violation() {
        let mut channel = MockClipboardChannel::new();
        channel.expect_send_format_list().returning(|_| Ok(()));
        let mut bridge = bridge(channel);
        let mut compositor = HeadlessCompositor::new();
        compositor.set_local_selection(HashMap::from([(
            "text/rtf".to_string(),
            b"{\\rtf1}".to_vec(),
        )]));

        bridge
            .compositor_selection_changed(&["text/rtf".to_string()])
            .unwrap();
        bridge
            .on_client_data_request(CF_PRIVATE_RTF, &mut compositor)
            .unwrap();
        let err = bridge
            .on_client_data_request(CF_PRIVATE_RTF, &mut compositor)
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_request_for_unoffered_format_answers_failure() {
        let mut channel = MockClipboardChannel::new();
        channel.expect_send_format_list().returning(|_| Ok(()));
        channel
            .expect_send_format_data_response()
            .withf(|ok, data| !*ok && data.is_empty())
            .times(2)
            .returning(|_, _| Ok(()));
        let mut bridge = bridge(channel);
        let mut compositor = HeadlessCompositor::new();

        bridge
            .compositor_selection_changed(&["text/html".to_string()])
            .unwrap();
        let err = bridge
            .on_client_data_request(CF_DIB, &mut compositor)
            .unwrap_err();
        assert!(matches!(err, ClipboardError::FormatNotOffered(CF_DIB)));

        // The failed request is settled; a new one is not nested.
        assert!(!matches!(
            bridge.on_client_data_request(CF_DIB, &mut compositor),
            Err(ClipboardError::NestedRequest)
        ));
    }

    #[test]
    fn test_empty_compositor_offer_still_sends_list() {
        let mut channel = MockClipboardChannel::new();
        channel
            .expect_send_format_list()
            .withf(|formats| formats.is_empty())
            .times(1)
            .returning(|_| Ok(()));
        let mut bridge = bridge(channel);
        bridge
            .compositor_selection_changed(&["application/x-unknown".to_string()])
            .unwrap();
    }
}
