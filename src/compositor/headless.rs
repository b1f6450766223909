//! Recording compositor for headless operation
//!
//! Keeps just enough state to answer the backend's queries (pressed keys,
//! the current local selection) and logs every call as a
//! [`CompositorEvent`]. The event log is shared, so a caller can keep a
//! [`HeadlessCompositor::events`] handle after moving the compositor into
//! the backend.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AxisEvent, Compositor, LockState, SeatInfo};
use crate::multimon::{HeadInfo, OutputInfo};
use crate::rdp::PeerId;

/// One recorded compositor call
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    /// `head_added`
    HeadAdded(HeadInfo),
    /// `head_changed`
    HeadChanged(HeadInfo),
    /// `head_removed`
    HeadRemoved(String),
    /// `output_created`
    OutputCreated(OutputInfo),
    /// `output_enabled`
    OutputEnabled(OutputInfo),
    /// `output_configured`
    OutputConfigured(OutputInfo),
    /// `output_disabled`
    OutputDisabled(String),
    /// `output_destroyed`
    OutputDestroyed(String),
    /// `output_damaged`
    OutputDamaged(String),
    /// `seat_created`
    SeatCreated(PeerId, SeatInfo),
    /// `seat_released`
    SeatReleased(PeerId),
    /// `pointer_motion`
    PointerMotion(PeerId, f64, f64),
    /// `pointer_button`
    PointerButton(PeerId, u32, bool),
    /// `pointer_axis`
    PointerAxis(PeerId, AxisEvent),
    /// `pointer_frame`
    PointerFrame(PeerId),
    /// `keyboard_key`
    Key(PeerId, u32, bool),
    /// `keyboard_locks`
    Locks(PeerId, LockState),
    /// `set_selection`
    SelectionSet(PeerId, Vec<String>),
    /// `clear_selection`
    SelectionCleared(PeerId),
    /// `send_selection`
    SelectionSent(String),
}

/// Shared event log
pub type EventLog = Arc<Mutex<Vec<CompositorEvent>>>;

/// Compositor stand-in that records calls
#[derive(Debug, Default)]
pub struct HeadlessCompositor {
    events: EventLog,
    pressed: HashMap<PeerId, HashSet<u32>>,
    local_selection: HashMap<String, Vec<u8>>,
}

impl HeadlessCompositor {
    /// Empty compositor
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the event log
    pub fn events(&self) -> EventLog {
        Arc::clone(&self.events)
    }

    /// Contents served by [`Compositor::send_selection`]
    pub fn set_local_selection(&mut self, contents: HashMap<String, Vec<u8>>) {
        self.local_selection = contents;
    }

    fn record(&self, event: CompositorEvent) {
        self.events.lock().push(event);
    }
}

impl Compositor for HeadlessCompositor {
    fn head_added(&mut self, head: &HeadInfo) {
        self.record(CompositorEvent::HeadAdded(head.clone()));
    }

    fn head_changed(&mut self, head: &HeadInfo) {
        self.record(CompositorEvent::HeadChanged(head.clone()));
    }

    fn head_removed(&mut self, name: &str) {
        self.record(CompositorEvent::HeadRemoved(name.to_string()));
    }

    fn output_created(&mut self, output: &OutputInfo) {
        self.record(CompositorEvent::OutputCreated(output.clone()));
    }

    fn output_enabled(&mut self, output: &OutputInfo) {
        self.record(CompositorEvent::OutputEnabled(output.clone()));
    }

    fn output_configured(&mut self, output: &OutputInfo) {
        self.record(CompositorEvent::OutputConfigured(output.clone()));
    }

    fn output_disabled(&mut self, name: &str) {
        self.record(CompositorEvent::OutputDisabled(name.to_string()));
    }

    fn output_destroyed(&mut self, name: &str) {
        self.record(CompositorEvent::OutputDestroyed(name.to_string()));
    }

    fn output_damaged(&mut self, name: &str) {
        self.record(CompositorEvent::OutputDamaged(name.to_string()));
    }

    fn seat_created(&mut self, peer: PeerId, seat: &SeatInfo) {
        self.pressed.entry(peer).or_default();
        self.record(CompositorEvent::SeatCreated(peer, seat.clone()));
    }

    fn seat_released(&mut self, peer: PeerId) {
        self.pressed.remove(&peer);
        self.record(CompositorEvent::SeatReleased(peer));
    }

    fn pointer_motion(&mut self, peer: PeerId, x: f64, y: f64) {
        self.record(CompositorEvent::PointerMotion(peer, x, y));
    }

    fn pointer_button(&mut self, peer: PeerId, button: u32, pressed: bool) {
        self.record(CompositorEvent::PointerButton(peer, button, pressed));
    }

    fn pointer_axis(&mut self, peer: PeerId, event: AxisEvent) {
        self.record(CompositorEvent::PointerAxis(peer, event));
    }

    fn pointer_frame(&mut self, peer: PeerId) {
        self.record(CompositorEvent::PointerFrame(peer));
    }

    fn keyboard_key(&mut self, peer: PeerId, key: u32, pressed: bool) {
        let keys = self.pressed.entry(peer).or_default();
        if pressed {
            keys.insert(key);
        } else {
            keys.remove(&key);
        }
        self.record(CompositorEvent::Key(peer, key, pressed));
    }

    fn keyboard_locks(&mut self, peer: PeerId, locks: LockState) {
        self.record(CompositorEvent::Locks(peer, locks));
    }

    fn is_key_pressed(&self, peer: PeerId, key: u32) -> bool {
        self.pressed
            .get(&peer)
            .is_some_and(|keys| keys.contains(&key))
    }

    fn set_selection(&mut self, peer: PeerId, mime_types: &[String]) {
        self.record(CompositorEvent::SelectionSet(peer, mime_types.to_vec()));
    }

    fn clear_selection(&mut self, peer: PeerId) {
        self.record(CompositorEvent::SelectionCleared(peer));
    }

    fn send_selection(&mut self, mime_type: &str, fd: OwnedFd) -> bool {
        let Some(data) = self.local_selection.get(mime_type).cloned() else {
            debug!("No local selection for {}", mime_type);
            return false;
        };
        self.record(CompositorEvent::SelectionSent(mime_type.to_string()));

        // The reader is on this thread's event loop, so write from another
        // thread to avoid filling the pipe while nobody drains it.
        std::thread::spawn(move || {
            let mut file = std::fs::File::from(fd);
            if let Err(e) = file.write_all(&data) {
                warn!("Headless selection write failed: {}", e);
            }
        });
        true
    }
}
