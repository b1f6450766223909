//! A scripted RDP client for driving the backend through its event loop
//!
//! The fake connection stands in for the protocol library: events queued
//! on [`Remote`] are delivered through a socketpair the backend watches,
//! and everything the backend sends is recorded in [`Wire`].

#![allow(dead_code)]

use calloop::EventLoop;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use lamco_rdp_compositor::clipboard::{ClipboardChannel, ClipboardFormat, ClipboardWorker};
use lamco_rdp_compositor::compositor::{CompositorEvent, HeadlessCompositor};
use lamco_rdp_compositor::config::Config;
use lamco_rdp_compositor::damage::Rect;
use lamco_rdp_compositor::multimon::{GraphicsReset, MonitorDescriptor};
use lamco_rdp_compositor::rdp::{
    DisplayControlHandle, FrameAction, PeerConnection, PeerError, PeerEvent, PeerId,
    PeerSettings, SurfaceBits, SurfaceCodecs,
};
use lamco_rdp_compositor::server::RdpBackend;

/// A clipboard PDU the server sent
#[derive(Debug, Clone, PartialEq)]
pub enum ClipboardPdu {
    Capabilities,
    FormatList(Vec<ClipboardFormat>),
    FormatListResponse(bool),
    DataRequest(u32),
    DataResponse(bool, Vec<u8>),
}

/// Everything the server put on the wire
#[derive(Debug, Default)]
pub struct Wire {
    pub surface_bits: Vec<SurfaceBits>,
    pub frame_markers: Vec<(FrameAction, u32)>,
    pub resets: Vec<GraphicsReset>,
    pub clipboard: Vec<ClipboardPdu>,
    pub disconnects: usize,
    pub break_transport: bool,
}

struct RecordingChannel {
    wire: Arc<Mutex<Wire>>,
}

impl RecordingChannel {
    fn record(&self, pdu: ClipboardPdu) -> lamco_rdp_compositor::clipboard::Result<()> {
        self.wire.lock().clipboard.push(pdu);
        Ok(())
    }
}

impl ClipboardChannel for RecordingChannel {
    fn send_capabilities(&self) -> lamco_rdp_compositor::clipboard::Result<()> {
        self.record(ClipboardPdu::Capabilities)
    }
    fn send_format_list(
        &self,
        formats: &[ClipboardFormat],
    ) -> lamco_rdp_compositor::clipboard::Result<()> {
        self.record(ClipboardPdu::FormatList(formats.to_vec()))
    }
    fn send_format_list_response(&self, ok: bool) -> lamco_rdp_compositor::clipboard::Result<()> {
        self.record(ClipboardPdu::FormatListResponse(ok))
    }
    fn send_format_data_request(
        &self,
        format_id: u32,
    ) -> lamco_rdp_compositor::clipboard::Result<()> {
        self.record(ClipboardPdu::DataRequest(format_id))
    }
    fn send_format_data_response(
        &self,
        ok: bool,
        data: &[u8],
    ) -> lamco_rdp_compositor::clipboard::Result<()> {
        self.record(ClipboardPdu::DataResponse(ok, data.to_vec()))
    }
}

struct SolidCodecs;

impl SurfaceCodecs for SolidCodecs {
    fn reset(&mut self, _width: u32, _height: u32) -> lamco_rdp_compositor::rdp::Result<()> {
        Ok(())
    }
    fn encode_rfx(
        &mut self,
        rects: &[Rect],
        _data: &[u8],
        _width: u32,
        _height: u32,
        _stride: usize,
    ) -> lamco_rdp_compositor::rdp::Result<Vec<u8>> {
        Ok(vec![0xCC; rects.len() * 8])
    }
    fn encode_nsc(
        &mut self,
        _data: &[u8],
        _width: u32,
        _height: u32,
        _stride: usize,
    ) -> lamco_rdp_compositor::rdp::Result<Vec<u8>> {
        Ok(vec![0xCC; 8])
    }
}

type Slot<T> = Arc<Mutex<Option<T>>>;

struct FakeConnection {
    settings: PeerSettings,
    desktop: (u32, u32),
    wire: Arc<Mutex<Wire>>,
    inbox: Arc<Mutex<VecDeque<PeerEvent>>>,
    bell: UnixStream,
    clipboard: Slot<ClipboardWorker<RdpBackend>>,
    display: Slot<DisplayControlHandle<RdpBackend>>,
}

impl PeerConnection for FakeConnection {
    fn initialize(&mut self) -> lamco_rdp_compositor::rdp::Result<()> {
        self.settings.surface_commands_enabled = true;
        self.settings.desktop_width = self.desktop.0;
        self.settings.desktop_height = self.desktop.1;
        Ok(())
    }
    fn settings(&self) -> &PeerSettings {
        &self.settings
    }
    fn settings_mut(&mut self) -> &mut PeerSettings {
        &mut self.settings
    }
    fn event_fds(&self) -> std::io::Result<Vec<OwnedFd>> {
        Ok(vec![OwnedFd::from(self.bell.try_clone()?)])
    }
    fn channel_manager_fd(&self) -> Option<OwnedFd> {
        None
    }
    fn check_fds(&mut self) -> lamco_rdp_compositor::rdp::Result<Vec<PeerEvent>> {
        let mut buf = [0u8; 64];
        loop {
            match self.bell.read(&mut buf) {
                Ok(0) => return Err(PeerError::Protocol("client hung up".into())),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if self.wire.lock().break_transport {
            return Err(PeerError::Protocol("transport broken".into()));
        }
        Ok(self.inbox.lock().drain(..).collect())
    }
    fn check_channel_manager(&mut self) -> lamco_rdp_compositor::rdp::Result<()> {
        Ok(())
    }
    fn open_dynamic_channels(&mut self) -> lamco_rdp_compositor::rdp::Result<()> {
        Ok(())
    }
    fn send_surface_bits(&mut self, bits: &SurfaceBits) -> lamco_rdp_compositor::rdp::Result<()> {
        self.wire.lock().surface_bits.push(bits.clone());
        Ok(())
    }
    fn send_frame_marker(
        &mut self,
        action: FrameAction,
        frame_id: u32,
    ) -> lamco_rdp_compositor::rdp::Result<()> {
        self.wire.lock().frame_markers.push((action, frame_id));
        Ok(())
    }
    fn send_graphics_reset(
        &mut self,
        reset: &GraphicsReset,
    ) -> lamco_rdp_compositor::rdp::Result<()> {
        self.wire.lock().resets.push(reset.clone());
        Ok(())
    }
    fn send_monitor_layout(
        &mut self,
        _monitors: &[MonitorDescriptor],
    ) -> lamco_rdp_compositor::rdp::Result<()> {
        Ok(())
    }
    fn create_codecs(&mut self) -> lamco_rdp_compositor::rdp::Result<Box<dyn SurfaceCodecs>> {
        Ok(Box::new(SolidCodecs))
    }
    fn start_display_control(
        &mut self,
        handle: DisplayControlHandle<RdpBackend>,
    ) -> lamco_rdp_compositor::rdp::Result<()> {
        *self.display.lock() = Some(handle);
        Ok(())
    }
    fn start_clipboard(
        &mut self,
        worker: ClipboardWorker<RdpBackend>,
    ) -> lamco_rdp_compositor::rdp::Result<Arc<dyn ClipboardChannel>> {
        *self.clipboard.lock() = Some(worker);
        Ok(Arc::new(RecordingChannel {
            wire: Arc::clone(&self.wire),
        }))
    }
    fn disconnect(&mut self) {
        self.wire.lock().disconnects += 1;
    }
}

/// Client end of a fake connection
pub struct Remote {
    pub id: PeerId,
    pub wire: Arc<Mutex<Wire>>,
    inbox: Arc<Mutex<VecDeque<PeerEvent>>>,
    bell: UnixStream,
    clipboard: Slot<ClipboardWorker<RdpBackend>>,
    display: Slot<DisplayControlHandle<RdpBackend>>,
}

impl Remote {
    /// Queue an event and wake the backend
    pub fn send(&mut self, event: PeerEvent) {
        self.inbox.lock().push_back(event);
        self.bell.write_all(&[1]).unwrap();
    }

    /// Clipboard worker handed to the protocol library, once started
    pub fn clipboard_worker(&self) -> ClipboardWorker<RdpBackend> {
        self.clipboard.lock().clone().expect("clipboard not started")
    }

    /// Display-control handle handed to the protocol library, once started
    pub fn display_control(&self) -> DisplayControlHandle<RdpBackend> {
        self.display.lock().clone().expect("display control not started")
    }

    pub fn clipboard_pdus(&self) -> Vec<ClipboardPdu> {
        self.wire.lock().clipboard.clone()
    }
}

/// Backend plus the loop that drives it
pub struct Harness {
    pub event_loop: EventLoop<'static, RdpBackend>,
    pub backend: RdpBackend,
    pub events: Arc<Mutex<Vec<CompositorEvent>>>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::with_compositor(config, HeadlessCompositor::new())
    }

    pub fn with_compositor(config: Config, compositor: HeadlessCompositor) -> Self {
        let event_loop = EventLoop::try_new().unwrap();
        let events = compositor.events();
        let backend = RdpBackend::new(config, Box::new(compositor), event_loop.handle());
        Self {
            event_loop,
            backend,
            events,
        }
    }

    /// Accept a client with a `width`x`height` desktop
    pub fn connect(&mut self, width: u32, height: u32) -> Remote {
        let (server, client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();

        let wire = Arc::new(Mutex::new(Wire::default()));
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let clipboard = Arc::new(Mutex::new(None));
        let display = Arc::new(Mutex::new(None));

        let conn = FakeConnection {
            settings: PeerSettings::default(),
            desktop: (width, height),
            wire: Arc::clone(&wire),
            inbox: Arc::clone(&inbox),
            bell: server,
            clipboard: Arc::clone(&clipboard),
            display: Arc::clone(&display),
        };
        let id = self.backend.add_peer(Box::new(conn), true).unwrap();

        Remote {
            id,
            wire,
            inbox,
            bell: client,
            clipboard,
            display,
        }
    }

    /// Connect and walk the client through activation
    pub fn connect_active(&mut self, width: u32, height: u32) -> Remote {
        let mut remote = self.connect(width, height);
        remote.send(PeerEvent::Capabilities);
        remote.send(PeerEvent::Activated);
        let id = remote.id;
        self.run_until(|backend| backend.peer(id).is_some_and(|p| p.is_active()));
        remote
    }

    /// One non-blocking loop iteration
    pub fn turn(&mut self) {
        self.event_loop
            .dispatch(Some(Duration::ZERO), &mut self.backend)
            .unwrap();
    }

    /// Run the loop until `done` holds, panicking after two seconds
    pub fn run_until(&mut self, mut done: impl FnMut(&RdpBackend) -> bool) {
        for _ in 0..200 {
            if done(&self.backend) {
                return;
            }
            self.event_loop
                .dispatch(Some(Duration::from_millis(10)), &mut self.backend)
                .unwrap();
        }
        panic!("condition not reached");
    }

    /// Run the loop until the wire satisfies `done`
    pub fn run_until_wire(&mut self, remote: &Remote, mut done: impl FnMut(&Wire) -> bool) {
        let wire = Arc::clone(&remote.wire);
        self.run_until(move |_| done(&wire.lock()));
    }
}
