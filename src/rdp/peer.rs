//! Per-peer state and lifecycle
//!
//! A [`Peer`] owns everything that exists for one client connection: the
//! protocol library handle, the cross-thread dispatcher its channel workers
//! post to, the surface encoder, the input translator, the clipboard bridge
//! and the RAIL id allocators.
//!
//! ```text
//! accept ──> new ──> Connected ──capabilities──> negotiate
//!                        │
//!                        └──activate──> Active ──disconnect──> teardown ──> Closed
//! ```

use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::encoder::SurfaceEncoder;
use super::error::{PeerError, Result};
use super::settings::{Negotiated, NegotiationPolicy, PeerSettings};
use super::{PeerConnection, PeerId};
use crate::clipboard::{ClipboardBridge, ClipboardWorker};
use crate::compositor::{Compositor, SeatInfo};
use crate::config::Config;
use crate::damage::Region;
use crate::dispatch::{DispatchHandle, Dispatcher};
use crate::ids::IdAllocator;
use crate::input::{compile_keymap, resolve_names, InputEvent, InputTranslator};
use crate::multimon::{MonitorDescriptor, ShadowBuffer, Topology, TopologyError, MAX_MONITORS};
use crate::server::RdpBackend;
use crate::shm::SharedMemoryPool;

/// RAIL window ids
const WINDOW_ID_RANGE: (u32, u32) = (1, 0x7FFF_FFFF);
/// GFX surface ids
const SURFACE_ID_RANGE: (u32, u32) = (1, 0xFFFF);
/// Shared-memory pool ids
const POOL_ID_RANGE: (u32, u32) = (1, u32::MAX);
/// Shared-memory buffer ids
const BUFFER_ID_RANGE: (u32, u32) = (1, u32::MAX);

/// Display-thread owner of monitor topology
pub trait DisplayHost {
    /// Apply a monitor layout reported by `peer`
    fn monitor_layout(&mut self, peer: PeerId, monitors: Vec<MonitorDescriptor>);
}

/// Worker-side handle for the display-control channel
pub struct DisplayControlHandle<D> {
    peer: PeerId,
    dispatch: DispatchHandle<D>,
}

impl<D> Clone for DisplayControlHandle<D> {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer,
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<D> std::fmt::Debug for DisplayControlHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayControlHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl<D: DisplayHost + 'static> DisplayControlHandle<D> {
    /// Create a handle posting to `dispatch`
    pub fn new(peer: PeerId, dispatch: DispatchHandle<D>) -> Self {
        Self { peer, dispatch }
    }

    /// Monitor-layout PDU from the client
    ///
    /// Oversized layouts are refused here without reaching the display
    /// thread.
    pub fn on_monitor_layout(&self, monitors: Vec<MonitorDescriptor>) -> Result<()> {
        if monitors.len() > MAX_MONITORS {
            warn!(
                "Peer {} sent {} monitors, dropping layout",
                self.peer,
                monitors.len()
            );
            return Err(TopologyError::TooManyMonitors(monitors.len()).into());
        }

        let peer = self.peer;
        self.dispatch
            .dispatch(move |host: Option<&mut D>| match host {
                Some(host) => host.monitor_layout(peer, monitors),
                None => trace!("Releasing monitor layout for closed peer {}", peer),
            })?;
        Ok(())
    }
}

/// Peer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Connection sequence running
    Connected,
    /// Activated, seat and channels up
    Active,
    /// Torn down
    Closed,
}

/// Conditions checked at activation that live outside the peer
#[derive(Debug, Clone, Copy)]
pub struct ActivationContext<'a> {
    /// Backend configuration
    pub config: &'a Config,
    /// Another peer already holds the remote-application slot
    pub rail_slot_taken: bool,
    /// A shell is available for remote applications
    pub shell_available: bool,
}

/// One connected client
pub struct Peer {
    id: PeerId,
    connection: Box<dyn PeerConnection>,
    state: PeerState,
    dispatcher: Rc<Dispatcher<RdpBackend>>,
    encoder: Option<SurfaceEncoder>,
    input: Option<InputTranslator>,
    clipboard: Option<ClipboardBridge>,
    seat: bool,
    windows: IdAllocator<u64>,
    surfaces: IdAllocator<u64>,
    pools: IdAllocator<Arc<SharedMemoryPool>>,
    buffers: IdAllocator<u64>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("encoder", &self.encoder)
            .field("clipboard", &self.clipboard)
            .field("seat", &self.seat)
            .finish_non_exhaustive()
    }
}

impl Peer {
    /// Configure and initialise a freshly accepted connection
    pub fn new(
        id: PeerId,
        mut connection: Box<dyn PeerConnection>,
        config: &Config,
        local_connection: bool,
    ) -> Result<Self> {
        connection
            .settings_mut()
            .configure_server(config, local_connection);
        connection.initialize()?;

        let dispatcher = Rc::new(Dispatcher::new(format!("peer-{}", id))?);

        debug!("Peer {} initialised (local={})", id, local_connection);

        Ok(Self {
            id,
            connection,
            state: PeerState::Connected,
            dispatcher,
            encoder: None,
            input: None,
            clipboard: None,
            seat: false,
            windows: IdAllocator::new("window", WINDOW_ID_RANGE.0, WINDOW_ID_RANGE.1)?,
            surfaces: IdAllocator::new("surface", SURFACE_ID_RANGE.0, SURFACE_ID_RANGE.1)?,
            pools: IdAllocator::new("pool", POOL_ID_RANGE.0, POOL_ID_RANGE.1)?,
            buffers: IdAllocator::new("buffer", BUFFER_ID_RANGE.0, BUFFER_ID_RANGE.1)?,
        })
    }

    /// Peer id
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Lifecycle state
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Whether the peer is activated
    pub fn is_active(&self) -> bool {
        self.state == PeerState::Active
    }

    /// Negotiated settings
    pub fn settings(&self) -> &PeerSettings {
        self.connection.settings()
    }

    /// Whether the peer runs in remote-application mode
    pub fn is_remote_app(&self) -> bool {
        self.connection.settings().remote_application_mode
    }

    /// Protocol library handle
    pub fn connection(&self) -> &dyn PeerConnection {
        self.connection.as_ref()
    }

    /// Protocol library handle, mutably
    pub fn connection_mut(&mut self) -> &mut dyn PeerConnection {
        self.connection.as_mut()
    }

    /// Cross-thread queue for this peer's workers
    pub fn dispatcher(&self) -> &Rc<Dispatcher<RdpBackend>> {
        &self.dispatcher
    }

    /// Clipboard bridge, when redirection is on
    pub fn clipboard_mut(&mut self) -> Option<&mut ClipboardBridge> {
        self.clipboard.as_mut()
    }

    /// Surface encoder, once active
    pub fn encoder(&self) -> Option<&SurfaceEncoder> {
        self.encoder.as_ref()
    }

    /// Input translator, once active
    pub fn input(&self) -> Option<&InputTranslator> {
        self.input.as_ref()
    }

    /// Capability exchange
    pub fn on_capabilities(&mut self, policy: &NegotiationPolicy) -> Result<Negotiated> {
        let outcome = self.connection.settings_mut().negotiate(policy)?;
        if outcome.desktop_resized {
            let settings = self.connection.settings();
            let monitor =
                MonitorDescriptor::new(0, 0, settings.desktop_width, settings.desktop_height, true);
            self.connection.send_monitor_layout(&[monitor])?;
        }
        Ok(outcome)
    }

    /// Bring the peer up after the client finished connecting
    pub fn activate(
        &mut self,
        ctx: &ActivationContext<'_>,
        compositor: &mut dyn Compositor,
    ) -> Result<()> {
        if self.state != PeerState::Connected {
            return Err(PeerError::InvalidState("already activated"));
        }

        let settings = self.connection.settings().clone();
        if !settings.surface_commands_enabled {
            return Err(PeerError::SurfaceCommandsUnsupported);
        }
        if settings.remote_application_mode {
            if ctx.rail_slot_taken {
                return Err(PeerError::RemoteAppRefused("another peer is connected"));
            }
            if !ctx.shell_available {
                return Err(PeerError::RemoteAppRefused("no shell available"));
            }
        }

        self.connection.open_dynamic_channels()?;

        if settings.redirect_clipboard && ctx.config.clipboard.enabled {
            let worker = ClipboardWorker::new(self.id, self.dispatcher.handle());
            let channel = self.connection.start_clipboard(worker)?;
            let bridge = ClipboardBridge::new(self.id, channel);
            bridge.start()?;
            self.clipboard = Some(bridge);
        }

        if settings.support_monitor_layout_pdu {
            let handle = DisplayControlHandle::new(self.id, self.dispatcher.handle());
            self.connection.start_display_control(handle)?;
        }

        let names = resolve_names(&settings.keyboard);
        let keymap = match compile_keymap(&names) {
            Ok(keymap) => Some(keymap),
            Err(e) => {
                warn!("Using the default keymap for peer {}: {}", self.id, e);
                None
            }
        };
        compositor.seat_created(
            self.id,
            &SeatInfo {
                name: format!("RDP peer {}", self.id),
                keymap,
            },
        );
        self.seat = true;
        self.input = Some(InputTranslator::new(self.id, &settings.keyboard));

        let codecs = self.connection.create_codecs()?;
        self.encoder = Some(SurfaceEncoder::new(&settings, codecs));

        self.state = PeerState::Active;
        info!(
            "Peer {} activated: {}x{}, codec {:?}",
            self.id,
            settings.desktop_width,
            settings.desktop_height,
            self.encoder.as_ref().map(|e| e.codec())
        );
        Ok(())
    }

    /// Route an input PDU to the seat
    pub fn handle_input(
        &mut self,
        event: InputEvent,
        topology: &Topology,
        compositor: &mut dyn Compositor,
    ) {
        match self.input.as_mut() {
            Some(input) => input.handle_event(event, topology, compositor),
            None => trace!("Peer {} not active, dropping {:?}", self.id, event),
        }
    }

    /// Encode and send damage of one output
    pub fn send_frame(
        &mut self,
        shadow: &ShadowBuffer,
        damage: &Region,
        origin: (i32, i32),
    ) -> Result<usize> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.send(self.connection.as_mut(), shadow, damage, origin),
            None => Ok(0),
        }
    }

    /// Track a RAIL window
    pub fn register_window(&self, handle: u64) -> Result<u32> {
        Ok(self.windows.allocate(handle)?)
    }

    /// Forget a RAIL window
    pub fn release_window(&self, id: u32) -> Option<u64> {
        self.windows.free(id)
    }

    /// Track a GFX surface
    pub fn register_surface(&self, handle: u64) -> Result<u32> {
        Ok(self.surfaces.allocate(handle)?)
    }

    /// Forget a GFX surface
    pub fn release_surface(&self, id: u32) -> Option<u64> {
        self.surfaces.free(id)
    }

    /// Track a shared-memory buffer
    pub fn register_buffer(&self, handle: u64) -> Result<u32> {
        Ok(self.buffers.allocate(handle)?)
    }

    /// Forget a shared-memory buffer
    pub fn release_buffer(&self, id: u32) -> Option<u64> {
        self.buffers.free(id)
    }

    /// Create a shared-memory pool under `dir`
    pub fn create_pool(&self, dir: &Path, size: usize) -> Result<(u32, Arc<SharedMemoryPool>)> {
        let pool = Arc::new(SharedMemoryPool::create(dir, size)?);
        let id = self.pools.allocate(Arc::clone(&pool))?;
        debug!("Peer {} pool {} is {}", self.id, id, pool.name());
        Ok((id, pool))
    }

    /// Look up a shared-memory pool
    pub fn pool(&self, id: u32) -> Option<Arc<SharedMemoryPool>> {
        self.pools.lookup(id)
    }

    /// Destroy a shared-memory pool
    pub fn release_pool(&self, id: u32) -> bool {
        self.pools.free(id).is_some()
    }

    /// Release everything the peer holds
    ///
    /// The caller removes the peer's event sources first so no new work
    /// can arrive. Queued worker tasks are released without running.
    pub fn teardown(&mut self, compositor: &mut dyn Compositor) {
        if self.state == PeerState::Closed {
            return;
        }

        self.connection.disconnect();

        if let Some(mut bridge) = self.clipboard.take() {
            bridge.shutdown(compositor);
        }

        let released = self.dispatcher.close();
        if released > 0 {
            debug!("Peer {}: released {} queued tasks", self.id, released);
        }

        self.windows.clear();
        self.surfaces.clear();
        self.pools.clear();
        self.buffers.clear();

        if self.seat {
            compositor.seat_released(self.id);
            self.seat = false;
        }

        self.input = None;
        self.encoder = None;
        self.state = PeerState::Closed;
        info!("Peer {} closed", self.id);
    }
}
