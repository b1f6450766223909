//! RDP backend
//!
//! Owns the topology and every connected peer, and wires them into the
//! display thread's calloop event loop:
//!
//! | source                     | interest | handler                    |
//! |----------------------------|----------|----------------------------|
//! | listening socket           | read     | accept, create peer        |
//! | peer transport fds         | read     | decode PDUs to events      |
//! | virtual channel manager    | read     | service static channels    |
//! | peer dispatcher eventfd    | read     | run one queued worker task |
//! | clipboard consumer pipe    | write    | pump client data out       |
//! | clipboard producer pipe    | read     | collect compositor data    |
//! | per-output repaint timer   | timer    | encode and send damage     |
//!
//! Everything here runs on the display thread and asserts it. Peers that
//! fail inside an event callback are disconnected from an idle callback,
//! after the current source has returned.

use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, error, info, info_span, trace, warn};

use super::error::{BackendError, Result};
use super::listener::{connect_env_socket, Listener};
use super::PeerFactory;
use crate::clipboard::{ClipboardEvent, ClipboardHost, PumpStatus, Watch};
use crate::compositor::Compositor;
use crate::config::Config;
use crate::damage::Region;
use crate::multimon::{
    validate_monitors, MonitorDescriptor, MonitorMode, OutputId, ScalePolicy, Topology,
};
use crate::rdp::peer::ActivationContext;
use crate::rdp::settings::{scale_policy, NegotiationPolicy};
use crate::rdp::{DisplayHost, Peer, PeerConnection, PeerError, PeerEvent, PeerId};
use crate::security::TlsMaterial;

/// Which side of a clipboard transfer a pipe watch pumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PipeEnd {
    /// Client data flowing out to a compositor consumer
    Consumer,
    /// Compositor data flowing in from a producer
    Producer,
}

/// The RDP backend state, also the calloop data type
pub struct RdpBackend {
    config: Config,
    compositor: Box<dyn Compositor>,
    topology: Topology,
    scale_policy: ScalePolicy,
    peers: BTreeMap<PeerId, Peer>,
    sources: HashMap<PeerId, Vec<RegistrationToken>>,
    clipboard_pipes: HashMap<(PeerId, PipeEnd), RegistrationToken>,
    repaint_timers: HashMap<OutputId, RegistrationToken>,
    pending_disconnects: HashSet<PeerId>,
    next_peer_id: u32,
    rail_peer: Option<PeerId>,
    shell_available: bool,
    handle: LoopHandle<'static, RdpBackend>,
    display_thread: ThreadId,
}

impl std::fmt::Debug for RdpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdpBackend")
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .field("rail_peer", &self.rail_peer)
            .field("heads", &self.topology.heads().len())
            .finish_non_exhaustive()
    }
}

impl RdpBackend {
    /// Create the backend on the display thread
    pub fn new(
        config: Config,
        compositor: Box<dyn Compositor>,
        handle: LoopHandle<'static, RdpBackend>,
    ) -> Self {
        let topology = Topology::new(config.remote_app.enabled, config.refresh_mhz());
        let scale_policy = scale_policy(&config.remote_app);

        info!(
            "RDP backend created: refresh {} mHz, remote app {}",
            config.refresh_mhz(),
            config.remote_app.enabled
        );

        Self {
            config,
            compositor,
            topology,
            scale_policy,
            peers: BTreeMap::new(),
            sources: HashMap::new(),
            clipboard_pipes: HashMap::new(),
            repaint_timers: HashMap::new(),
            pending_disconnects: HashSet::new(),
            next_peer_id: 1,
            rail_peer: None,
            shell_available: true,
            handle,
            display_thread: thread::current().id(),
        }
    }

    fn assert_display_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.display_thread,
            "RDP backend used off the display thread"
        );
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Head and output topology
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Compositor collaborator
    pub fn compositor(&self) -> &dyn Compositor {
        self.compositor.as_ref()
    }

    /// Connected peer
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Connected peer ids in connection order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Peer holding the remote-application slot
    pub fn rail_peer(&self) -> Option<PeerId> {
        self.rail_peer
    }

    /// Whether a repaint timer is armed for `output`
    pub fn repaint_pending(&self, output: OutputId) -> bool {
        self.repaint_timers.contains_key(&output)
    }

    /// Whether a shell collaborator is present for remote applications
    pub fn set_shell_available(&mut self, available: bool) {
        self.shell_available = available;
    }

    // ===== Connections =====

    /// Start taking connections as configured
    ///
    /// In env-socket mode the single pre-connected peer is added directly;
    /// otherwise a TCP or vsock listener is bound.
    pub fn start(&mut self, mut factory: Box<dyn PeerFactory>) -> Result<()> {
        if self.config.server.env_socket {
            let tls = self.resolve_tls(true)?;
            let (connection, local) =
                connect_env_socket(&self.config, factory.as_mut(), tls.as_ref())?;
            self.add_peer(connection, local)?;
            return Ok(());
        }

        let listener = Listener::bind(&self.config)?;
        let tls = self.resolve_tls(listener.is_local())?;
        self.add_listener(listener, factory, tls)?;
        Ok(())
    }

    fn resolve_tls(&self, local: bool) -> Result<Option<TlsMaterial>> {
        let tls = TlsMaterial::resolve(&self.config.security, local)
            .map_err(|e| BackendError::Tls(format!("{:#}", e)))?;
        if let Some(material) = &tls {
            debug!(
                "TLS material ready ({} certificates, self-signed {})",
                material.certificates().len(),
                material.is_self_signed()
            );
        }
        Ok(tls)
    }

    /// Accept connections from `listener`
    pub fn add_listener(
        &mut self,
        listener: Listener,
        mut factory: Box<dyn PeerFactory>,
        tls: Option<TlsMaterial>,
    ) -> Result<RegistrationToken> {
        let fd = listener.try_clone_fd()?;
        let token = self.handle.insert_source(
            Generic::new(fd, Interest::READ, Mode::Level),
            move |_, _, backend: &mut RdpBackend| {
                loop {
                    match listener.accept() {
                        Ok(Some((socket, local))) => {
                            backend.accept(socket, local, factory.as_mut(), tls.as_ref())
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            break;
                        }
                    }
                }
                Ok(PostAction::Continue)
            },
        )?;
        Ok(token)
    }

    fn accept(
        &mut self,
        socket: OwnedFd,
        local: bool,
        factory: &mut dyn PeerFactory,
        tls: Option<&TlsMaterial>,
    ) {
        if !local && tls.is_none() && self.config.security.rdp_key.is_none() {
            warn!("Refusing non-local connection: no TLS material");
            return;
        }
        let connection = match factory.create_peer(socket, local, tls) {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to create peer: {}", e);
                return;
            }
        };
        if let Err(e) = self.add_peer(connection, local) {
            error!("Failed to set up peer: {}", e);
        }
    }

    /// Take over a connection created by the protocol library
    pub fn add_peer(
        &mut self,
        connection: Box<dyn PeerConnection>,
        local_connection: bool,
    ) -> Result<PeerId> {
        self.assert_display_thread();

        let id = PeerId(self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1).max(1);
        let _span = info_span!("rdp_peer", id = %id).entered();

        let mut peer = Peer::new(id, connection, &self.config, local_connection)?;

        let mut tokens = Vec::new();
        if let Err(e) = self.register_peer_sources(&peer, &mut tokens) {
            for token in tokens {
                self.handle.remove(token);
            }
            peer.teardown(self.compositor.as_mut());
            return Err(e);
        }

        self.sources.insert(id, tokens);
        self.peers.insert(id, peer);
        info!("Peer {} connected (local={})", id, local_connection);
        Ok(id)
    }

    fn register_peer_sources(
        &self,
        peer: &Peer,
        tokens: &mut Vec<RegistrationToken>,
    ) -> Result<()> {
        let id = peer.id();

        for fd in peer.connection().event_fds()? {
            let token = self.handle.insert_source(
                Generic::new(fd, Interest::READ, Mode::Level),
                move |_, _, backend: &mut RdpBackend| Ok(backend.on_peer_readable(id)),
            )?;
            tokens.push(token);
        }

        let dispatcher = Rc::clone(peer.dispatcher());
        let fd = dispatcher.try_clone_fd()?;
        let token = self.handle.insert_source(
            Generic::new(fd, Interest::READ, Mode::Level),
            move |_, _, backend: &mut RdpBackend| {
                dispatcher.dispatch_one(backend);
                Ok(PostAction::Continue)
            },
        )?;
        tokens.push(token);

        Ok(())
    }

    fn register_channel_manager(&mut self, id: PeerId) -> Result<()> {
        let Some(fd) = self
            .peers
            .get(&id)
            .and_then(|peer| peer.connection().channel_manager_fd())
        else {
            return Ok(());
        };
        let token = self.handle.insert_source(
            Generic::new(fd, Interest::READ, Mode::Level),
            move |_, _, backend: &mut RdpBackend| Ok(backend.on_channel_manager_readable(id)),
        )?;
        self.sources.entry(id).or_default().push(token);
        Ok(())
    }

    fn on_peer_readable(&mut self, id: PeerId) -> PostAction {
        let _span = info_span!("rdp_peer", id = %id).entered();

        let Some(peer) = self.peers.get_mut(&id) else {
            return PostAction::Remove;
        };
        let events = match peer.connection_mut().check_fds() {
            Ok(events) => events,
            Err(e) => {
                info!("Peer {} transport failed: {}", id, e);
                self.request_disconnect(id);
                return PostAction::Continue;
            }
        };

        for event in events {
            self.handle_peer_event(id, event);
        }
        PostAction::Continue
    }

    fn on_channel_manager_readable(&mut self, id: PeerId) -> PostAction {
        let Some(peer) = self.peers.get_mut(&id) else {
            return PostAction::Remove;
        };
        if let Err(e) = peer.connection_mut().check_channel_manager() {
            warn!("Peer {} channel manager failed: {}", id, e);
            self.request_disconnect(id);
        }
        PostAction::Continue
    }

    /// Act on one event decoded by the protocol library
    pub fn handle_peer_event(&mut self, id: PeerId, event: PeerEvent) {
        self.assert_display_thread();
        if !self.peers.contains_key(&id) || self.pending_disconnects.contains(&id) {
            trace!("Dropping {:?} for departing peer {}", event, id);
            return;
        }

        let result = match event {
            PeerEvent::Capabilities => self.on_capabilities(id),
            PeerEvent::AdjustMonitorLayout(monitors) => {
                self.adjust_monitor_layout(id, monitors);
                Ok(())
            }
            PeerEvent::Activated => self.activate_peer(id),
            PeerEvent::Input(input) => {
                if let Some(peer) = self.peers.get_mut(&id) {
                    peer.handle_input(input, &self.topology, self.compositor.as_mut());
                }
                Ok(())
            }
            PeerEvent::SuppressOutput { allow, area } => {
                self.suppress_output(id, allow, area.is_some());
                Ok(())
            }
            PeerEvent::Disconnected => {
                info!("Peer {} disconnected", id);
                self.request_disconnect(id);
                Ok(())
            }
        };

        if let Err(e) = result {
            if e.is_fatal_for_peer() {
                warn!("Disconnecting peer {}: {}", id, e);
                self.request_disconnect(id);
            } else {
                debug!("Peer {}: {}", id, e);
            }
        }
    }

    fn on_capabilities(&mut self, id: PeerId) -> std::result::Result<(), PeerError> {
        let server_size = if self.topology.heads().is_empty() {
            None
        } else {
            let extents = self.topology.client_extents();
            Some((extents.width, extents.height))
        };
        let policy = NegotiationPolicy {
            force_no_compression: self.config.server.force_no_compression,
            no_clients_resize: self.config.server.no_clients_resize,
            server_size,
        };

        if let Some(peer) = self.peers.get_mut(&id) {
            peer.on_capabilities(&policy)?;
        }
        Ok(())
    }

    fn adjust_monitor_layout(&mut self, id: PeerId, monitors: Vec<MonitorDescriptor>) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };

        let settings = peer.connection_mut().settings_mut();
        match validate_monitors(&monitors) {
            Ok(()) => settings.monitor_defs = monitors,
            Err(e) => {
                warn!("Peer {} connect-time layout rejected ({}), using primary only", id, e);
                let primary = monitors
                    .iter()
                    .find(|m| m.is_primary)
                    .or_else(|| monitors.first())
                    .map(|m| MonitorDescriptor {
                        x: 0,
                        y: 0,
                        is_primary: true,
                        ..*m
                    });
                settings.monitor_defs = primary.into_iter().collect();
            }
        }
    }

    fn activate_peer(&mut self, id: PeerId) -> std::result::Result<(), PeerError> {
        let ctx = ActivationContext {
            config: &self.config,
            rail_slot_taken: self.rail_peer.is_some_and(|p| p != id),
            shell_available: self.shell_available,
        };
        let Some(peer) = self.peers.get_mut(&id) else {
            return Ok(());
        };
        peer.activate(&ctx, self.compositor.as_mut())?;

        if peer.is_remote_app() {
            self.rail_peer = Some(id);
        }

        if self.topology.heads().is_empty() {
            let modes = peer.settings().initial_monitors(&self.scale_policy);
            let desktop = peer.settings().desktop_rect();
            if let Err(e) = self.topology.reconcile(&modes, self.compositor.as_mut()) {
                if !e.is_client_violation() {
                    return Err(e.into());
                }
                warn!("Initial layout rejected ({}), using the desktop size", e);
                let fallback = MonitorMode::new(
                    MonitorDescriptor::new(0, 0, desktop.width, desktop.height, true),
                    &self.scale_policy,
                );
                self.topology
                    .reconcile(&[fallback], self.compositor.as_mut())?;
            }
        }

        if let Err(e) = self.register_channel_manager(id) {
            warn!("Peer {}: no channel manager source: {}", id, e);
        }

        self.attach_active_peers();
        self.damage_all_outputs();
        Ok(())
    }

    fn suppress_output(&mut self, id: PeerId, allow: bool, has_area: bool) {
        debug!(
            "Peer {} suppress output: allow={} area={}",
            id, allow, has_area
        );
        let power = self.config.remote_app.enable_display_power_by_screenupdate;

        let mut resumed = Vec::new();
        for output in self.topology.outputs_mut() {
            if !output.peers.contains(&id) {
                continue;
            }
            output.repaint_suppressed = !allow;
            if power && output.enabled == !allow {
                output.enabled = allow;
                if allow {
                    self.compositor.output_enabled(&output.info());
                } else {
                    self.compositor.output_disabled(&output.name);
                }
            }
            if allow {
                output.damage_all();
                resumed.push(output.id);
            }
        }
        for output in resumed {
            self.schedule_repaint(output);
        }
    }

    /// Disconnect after the current event source returns
    pub fn request_disconnect(&mut self, id: PeerId) {
        if self.peers.contains_key(&id) && self.pending_disconnects.insert(id) {
            self.handle
                .insert_idle(move |backend: &mut RdpBackend| backend.disconnect_peer(id));
        }
    }

    /// Tear a peer down now
    pub fn disconnect_peer(&mut self, id: PeerId) {
        self.assert_display_thread();
        self.pending_disconnects.remove(&id);

        let Some(mut peer) = self.peers.remove(&id) else {
            return;
        };
        let _span = info_span!("rdp_peer", id = %id).entered();

        for token in self.sources.remove(&id).unwrap_or_default() {
            self.handle.remove(token);
        }
        for end in [PipeEnd::Consumer, PipeEnd::Producer] {
            if let Some(token) = self.clipboard_pipes.remove(&(id, end)) {
                self.handle.remove(token);
            }
        }
        for output in self.topology.outputs_mut() {
            output.detach_peer(id);
        }
        if self.rail_peer == Some(id) {
            self.rail_peer = None;
        }

        peer.teardown(self.compositor.as_mut());
        info!("Peer {} removed, {} remaining", id, self.peers.len());
    }

    /// Disconnect every peer and destroy the topology
    pub fn shutdown(&mut self) {
        self.assert_display_thread();
        for id in self.peer_ids() {
            self.disconnect_peer(id);
        }
        for (_, token) in self.repaint_timers.drain() {
            self.handle.remove(token);
        }
        self.topology.clear(self.compositor.as_mut());
        info!("RDP backend shut down");
    }

    // ===== Repaint =====

    fn attach_active_peers(&mut self) {
        let active: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.id())
            .collect();
        for output in self.topology.outputs_mut() {
            for id in &active {
                output.attach_peer(*id);
            }
        }
    }

    fn damage_all_outputs(&mut self) {
        let mut ids = Vec::new();
        for output in self.topology.outputs_mut() {
            output.damage_all();
            self.compositor.output_damaged(&output.name);
            ids.push(output.id);
        }
        for id in ids {
            self.schedule_repaint(id);
        }
    }

    /// Add compositor damage to an output and schedule its repaint
    ///
    /// `damage` is in native output pixels.
    pub fn damage_output(&mut self, id: OutputId, damage: &Region) {
        self.assert_display_thread();
        let Some(output) = self.topology.output_mut(id) else {
            return;
        };
        output.damage.union_with(damage);
        self.schedule_repaint(id);
    }

    /// Write access to an output's shadow buffer
    pub fn with_shadow<R>(
        &mut self,
        id: OutputId,
        f: impl FnOnce(&mut crate::multimon::ShadowBuffer) -> R,
    ) -> Option<R> {
        self.assert_display_thread();
        self.topology
            .output_mut(id)
            .and_then(|output| output.shadow.as_mut())
            .map(f)
    }

    fn schedule_repaint(&mut self, id: OutputId) {
        if self.repaint_timers.contains_key(&id) {
            return;
        }
        let Some(output) = self.topology.output(id) else {
            return;
        };

        let delay = output.repaint.delay_to_next_vsync(Instant::now());
        let inserted = self.handle.insert_source(
            Timer::from_duration(delay),
            move |_, _, backend: &mut RdpBackend| {
                backend.repaint_timers.remove(&id);
                backend.finish_frame(id);
                TimeoutAction::Drop
            },
        );
        match inserted {
            Ok(token) => {
                self.repaint_timers.insert(id, token);
            }
            Err(e) => error!("Failed to arm repaint timer: {}", e.error),
        }
    }

    fn finish_frame(&mut self, id: OutputId) {
        self.repaint_output(id);
        if let Some(output) = self.topology.output_mut(id) {
            output.repaint.presented(Instant::now());
        }
    }

    /// Send an output's pending damage to its peers
    ///
    /// Returns the number of surface commands sent.
    pub fn repaint_output(&mut self, id: OutputId) -> usize {
        self.assert_display_thread();

        let Some(output) = self.topology.output_mut(id) else {
            return 0;
        };
        if output.repaint_suppressed || output.damage.is_empty() {
            return 0;
        }
        let damage = std::mem::take(&mut output.damage);

        let Some(output) = self.topology.output(id) else {
            return 0;
        };
        let Some(shadow) = output.shadow.as_ref() else {
            trace!("Output {} has no shadow buffer", output.name);
            return 0;
        };
        let origin = output
            .head
            .and_then(|head| self.topology.head(head))
            .map(|head| {
                let rect = head.client_rect();
                (rect.x, rect.y)
            })
            .unwrap_or((0, 0));

        let mut sent = 0;
        let mut failed = Vec::new();
        for peer_id in &output.peers {
            let Some(peer) = self.peers.get_mut(peer_id) else {
                continue;
            };
            if !peer.is_active() {
                continue;
            }
            match peer.send_frame(shadow, &damage, origin) {
                Ok(n) => sent += n,
                Err(e) => {
                    warn!("Repaint of {} for peer {} failed: {}", output.name, peer_id, e);
                    failed.push(*peer_id);
                }
            }
        }

        for peer_id in failed {
            self.request_disconnect(peer_id);
        }
        sent
    }

    // ===== Clipboard, compositor side =====

    /// A compositor consumer wants the selection `peer` published
    ///
    /// `fd` is the consumer's write end.
    pub fn request_client_selection(
        &mut self,
        peer: PeerId,
        mime_type: &str,
        fd: OwnedFd,
    ) -> Result<()> {
        self.assert_display_thread();
        let bridge = self
            .peers
            .get_mut(&peer)
            .ok_or(BackendError::UnknownPeer(peer))?
            .clipboard_mut()
            .ok_or(BackendError::ClipboardDisabled(peer))?;

        if let Some(watch) = bridge.request_from_client(mime_type, fd)? {
            self.watch_clipboard_pipe(peer, watch);
        }
        Ok(())
    }

    /// The consumer of `peer`'s selection went away
    pub fn cancel_client_selection(&mut self, peer: PeerId) {
        self.assert_display_thread();
        if let Some(bridge) = self.peers.get_mut(&peer).and_then(|p| p.clipboard_mut()) {
            bridge.cancel_client_transfer();
        }
    }

    /// The compositor selection changed
    ///
    /// `owner` is the peer whose offer became the selection, if any; it is
    /// not told about its own offer.
    pub fn selection_changed(&mut self, owner: Option<PeerId>, mime_types: &[String]) {
        self.assert_display_thread();
        let mut violators = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            if Some(*id) == owner {
                continue;
            }
            let Some(bridge) = peer.clipboard_mut() else {
                continue;
            };
            if let Err(e) = bridge.compositor_selection_changed(mime_types) {
                warn!("Peer {}: selection update failed: {}", id, e);
                if e.is_protocol_violation() {
                    violators.push(*id);
                }
            }
        }
        for id in violators {
            self.request_disconnect(id);
        }
    }

    /// Clipboard pipes currently registered with the loop for `peer`
    pub fn clipboard_pipe_count(&self, peer: PeerId) -> usize {
        self.clipboard_pipes
            .keys()
            .filter(|(id, _)| *id == peer)
            .count()
    }

    fn watch_clipboard_pipe(&mut self, peer: PeerId, watch: Watch) {
        let (fd, interest, end) = match watch {
            Watch::Writable(fd) => (fd, Interest::WRITE, PipeEnd::Consumer),
            Watch::Readable(fd) => (fd, Interest::READ, PipeEnd::Producer),
        };
        // A new transfer replaces whatever pipe the previous one left behind.
        if let Some(stale) = self.clipboard_pipes.remove(&(peer, end)) {
            self.handle.remove(stale);
        }
        let inserted = self.handle.insert_source(
            Generic::new(fd, interest, Mode::Level),
            move |_, _, backend: &mut RdpBackend| Ok(backend.on_clipboard_pipe(peer, end)),
        );
        match inserted {
            Ok(token) => {
                self.clipboard_pipes.insert((peer, end), token);
            }
            Err(e) => warn!("Peer {}: cannot watch clipboard pipe: {}", peer, e.error),
        }
    }

    fn on_clipboard_pipe(&mut self, peer: PeerId, end: PipeEnd) -> PostAction {
        let status = match self.peers.get_mut(&peer).and_then(|p| p.clipboard_mut()) {
            Some(bridge) => match end {
                PipeEnd::Consumer => bridge.on_consumer_writable(),
                PipeEnd::Producer => bridge.on_producer_readable(),
            },
            None => Ok(PumpStatus::Finished),
        };

        match status {
            Ok(PumpStatus::Pending) => return PostAction::Continue,
            Ok(PumpStatus::Finished) => {}
            Err(e) => {
                if e.is_protocol_violation() {
                    self.request_disconnect(peer);
                }
                debug!("Peer {}: clipboard transfer ended: {}", peer, e);
            }
        }
        self.clipboard_pipes.remove(&(peer, end));
        PostAction::Remove
    }
}

impl ClipboardHost for RdpBackend {
    fn clipboard_event(&mut self, peer: PeerId, event: ClipboardEvent) {
        self.assert_display_thread();
        let _span = info_span!("rdp_peer", id = %peer).entered();

        let compositor = self.compositor.as_mut();
        let Some(bridge) = self.peers.get_mut(&peer).and_then(|p| p.clipboard_mut()) else {
            debug!("Dropping clipboard event for peer {} without clipboard", peer);
            return;
        };

        let result = match event {
            ClipboardEvent::FormatList(source) => bridge
                .publish_client_formats(source, compositor)
                .map(|_| None),
            ClipboardEvent::FormatListResponse(ok) => {
                bridge.on_client_format_list_response(ok);
                Ok(None)
            }
            ClipboardEvent::DataRequest(format_id) => {
                bridge.on_client_data_request(format_id, compositor)
            }
            ClipboardEvent::DataResponse { ok, data } => bridge.on_client_data_response(ok, data),
        };

        match result {
            Ok(Some(watch)) => self.watch_clipboard_pipe(peer, watch),
            Ok(None) => {}
            Err(e) if e.is_protocol_violation() => {
                warn!("Peer {} broke the clipboard protocol: {}", peer, e);
                self.request_disconnect(peer);
            }
            Err(e) => debug!("Peer {}: clipboard: {}", peer, e),
        }
    }
}

impl DisplayHost for RdpBackend {
    fn monitor_layout(&mut self, peer: PeerId, monitors: Vec<MonitorDescriptor>) {
        self.assert_display_thread();
        let _span = info_span!("rdp_peer", id = %peer).entered();

        if !self.peers.contains_key(&peer) {
            return;
        }
        if self.config.server.no_clients_resize {
            debug!("Ignoring monitor layout from peer {}", peer);
            return;
        }

        let modes: Vec<MonitorMode> = monitors
            .iter()
            .map(|m| MonitorMode::new(*m, &self.scale_policy))
            .collect();

        let outcome = match self.topology.reconcile(&modes, self.compositor.as_mut()) {
            Ok(outcome) => outcome,
            Err(e) if e.is_client_violation() => {
                warn!("Dropping monitor layout from peer {}: {}", peer, e);
                return;
            }
            Err(e) => {
                error!("Monitor layout failed for peer {}: {}", peer, e);
                self.request_disconnect(peer);
                return;
            }
        };

        if let Some(p) = self.peers.get_mut(&peer) {
            let settings = p.connection_mut().settings_mut();
            settings.desktop_width = outcome.reset.width;
            settings.desktop_height = outcome.reset.height;
            settings.monitor_defs = outcome.reset.monitors.clone();
            if let Err(e) = p.connection_mut().send_graphics_reset(&outcome.reset) {
                warn!("Peer {}: graphics reset failed: {}", peer, e);
                self.request_disconnect(peer);
                return;
            }
        }

        self.attach_active_peers();
        self.damage_all_outputs();
    }
}
