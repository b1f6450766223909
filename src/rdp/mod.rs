//! RDP peer plumbing
//!
//! The protocol engine (PDU codec, TLS, virtual channel transport, RFX/NSC
//! codecs) is an external library. This module holds what the backend
//! layers on top of it:
//!
//! - [`PeerConnection`] / [`SurfaceCodecs`]: the seams to the library
//! - [`settings`]: connect-time settings and capability negotiation
//! - [`encoder`]: damage to surface-bits commands
//! - [`peer`]: per-peer state and lifecycle
//!
//! Every peer is identified by a [`PeerId`] handed out by the backend.

pub mod encoder;
pub mod error;
pub mod peer;
pub mod settings;

pub use encoder::{Codec, FrameAction, SurfaceBits, SurfaceEncoder};
pub use error::{PeerError, Result};
pub use peer::{DisplayControlHandle, DisplayHost, Peer, PeerState};
pub use settings::{PeerSettings, RailLevel};

use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use crate::clipboard::{ClipboardChannel, ClipboardWorker};
use crate::damage::Rect;
use crate::input::InputEvent;
use crate::multimon::{GraphicsReset, MonitorDescriptor};
use crate::server::RdpBackend;

/// Backend-assigned peer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something the protocol library decoded for the display thread
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Client capabilities are in; negotiate before the confirm-active
    Capabilities,
    /// Connect-time monitor layout, before activation
    AdjustMonitorLayout(Vec<MonitorDescriptor>),
    /// Client finished the connection sequence
    Activated,
    /// Fast-path or slow-path input
    Input(InputEvent),
    /// Suppress-output PDU
    SuppressOutput {
        /// Whether updates are allowed again
        allow: bool,
        /// Visible area when allowed
        area: Option<Rect>,
    },
    /// Transport closed or the client logged off
    Disconnected,
}

/// One connected client as seen through the protocol library
///
/// All methods are called on the display thread.
#[cfg_attr(test, mockall::automock)]
pub trait PeerConnection {
    /// Run the library's per-connection initialisation
    fn initialize(&mut self) -> Result<()>;

    /// Negotiated settings
    fn settings(&self) -> &PeerSettings;

    /// Mutable settings, for server-side configuration
    fn settings_mut(&mut self) -> &mut PeerSettings;

    /// Descriptors to poll for readable input
    fn event_fds(&self) -> std::io::Result<Vec<OwnedFd>>;

    /// Virtual channel manager descriptor, once channels exist
    fn channel_manager_fd(&self) -> Option<OwnedFd>;

    /// Read pending PDUs and return the resulting events
    fn check_fds(&mut self) -> Result<Vec<PeerEvent>>;

    /// Service the virtual channel manager
    fn check_channel_manager(&mut self) -> Result<()>;

    /// Open DRDYNVC and the static channels negotiated at connect
    fn open_dynamic_channels(&mut self) -> Result<()>;

    /// Send one surface-bits command
    fn send_surface_bits(&mut self, bits: &SurfaceBits) -> Result<()>;

    /// Send a surface frame marker
    fn send_frame_marker(&mut self, action: FrameAction, frame_id: u32) -> Result<()>;

    /// Tell the client to rebuild its surfaces
    fn send_graphics_reset(&mut self, reset: &GraphicsReset) -> Result<()>;

    /// Monitor-layout PDU
    fn send_monitor_layout(&mut self, monitors: &[MonitorDescriptor]) -> Result<()>;

    /// RFX/NSC encoder contexts for this connection
    fn create_codecs(&mut self) -> Result<Box<dyn SurfaceCodecs>>;

    /// Start the display-control channel
    fn start_display_control(&mut self, handle: DisplayControlHandle<RdpBackend>) -> Result<()>;

    /// Start the CLIPRDR server and return its outgoing side
    fn start_clipboard(
        &mut self,
        worker: ClipboardWorker<RdpBackend>,
    ) -> Result<Arc<dyn ClipboardChannel>>;

    /// Close the connection
    fn disconnect(&mut self);
}

/// RemoteFX and NSCodec encoders supplied by the protocol library
#[cfg_attr(test, mockall::automock)]
pub trait SurfaceCodecs {
    /// Resize the encoder contexts
    fn reset(&mut self, width: u32, height: u32) -> Result<()>;

    /// Encode `rects` of a BGRA frame with RemoteFX (RLGR3)
    fn encode_rfx(
        &mut self,
        rects: &[Rect],
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
    ) -> Result<Vec<u8>>;

    /// Encode a BGRA region with NSCodec
    fn encode_nsc(&mut self, data: &[u8], width: u32, height: u32, stride: usize)
        -> Result<Vec<u8>>;
}
