//! Host compositor interface
//!
//! The backend does not implement a compositor; it drives one. Everything
//! it needs from the host (head and output lifecycle, seat input delivery,
//! selection ownership) goes through the [`Compositor`] trait.
//!
//! All methods are called on the display thread.
//!
//! ```text
//! RdpBackend
//!   ├─> heads      head_added / head_changed / head_removed
//!   ├─> outputs    output_created / enabled / configured / disabled / destroyed
//!   ├─> seats      pointer_* / keyboard_* (one seat per peer)
//!   └─> selection  set_selection / send_selection
//! ```
//!
//! [`HeadlessCompositor`] is a recording implementation used for headless
//! operation and tests.

use std::os::fd::OwnedFd;

use crate::multimon::{HeadInfo, OutputInfo};
use crate::rdp::PeerId;

pub mod headless;

pub use headless::{CompositorEvent, HeadlessCompositor};

/// Scroll axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Vertical wheel
    Vertical,
    /// Horizontal wheel
    Horizontal,
}

/// A scroll notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisEvent {
    /// Which wheel
    pub axis: Axis,
    /// Continuous value in scroll steps (positive = down/right)
    pub value: f64,
    /// Whole notches
    pub discrete: i32,
}

/// Lock-key state from a keyboard synchronize event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockState {
    /// Scroll lock
    pub scroll_lock: bool,
    /// Num lock
    pub num_lock: bool,
    /// Caps lock
    pub caps_lock: bool,
    /// Kana lock
    pub kana_lock: bool,
}

/// Seat description handed to the compositor when a peer activates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatInfo {
    /// Seat name
    pub name: String,
    /// xkb keymap in text v1 format, if one could be compiled
    pub keymap: Option<String>,
}

/// Host compositor operations used by the backend
pub trait Compositor {
    /// A new head appeared
    fn head_added(&mut self, head: &HeadInfo);
    /// A head changed mode, scale or physical size
    fn head_changed(&mut self, head: &HeadInfo);
    /// A head went away
    fn head_removed(&mut self, name: &str);

    /// An output was created for a head
    fn output_created(&mut self, output: &OutputInfo);
    /// An output was enabled
    fn output_enabled(&mut self, output: &OutputInfo);
    /// An output moved or changed mode
    fn output_configured(&mut self, output: &OutputInfo);
    /// An output was disabled
    fn output_disabled(&mut self, name: &str);
    /// An output was destroyed
    fn output_destroyed(&mut self, name: &str);
    /// Request a full repaint of an output
    fn output_damaged(&mut self, name: &str);

    /// A peer's seat became available
    fn seat_created(&mut self, peer: PeerId, seat: &SeatInfo);
    /// A peer's seat went away
    fn seat_released(&mut self, peer: PeerId);

    /// Absolute pointer motion in compositor space
    fn pointer_motion(&mut self, peer: PeerId, x: f64, y: f64);
    /// Pointer button (evdev code)
    fn pointer_button(&mut self, peer: PeerId, button: u32, pressed: bool);
    /// Scroll
    fn pointer_axis(&mut self, peer: PeerId, event: AxisEvent);
    /// End of a pointer event group
    fn pointer_frame(&mut self, peer: PeerId);

    /// Key press or release (evdev code)
    fn keyboard_key(&mut self, peer: PeerId, key: u32, pressed: bool);
    /// Lock-key state
    fn keyboard_locks(&mut self, peer: PeerId, locks: LockState);
    /// Whether the compositor considers `key` held on the peer's seat
    fn is_key_pressed(&self, peer: PeerId, key: u32) -> bool;

    /// A peer's clipboard contents became the selection
    fn set_selection(&mut self, peer: PeerId, mime_types: &[String]);
    /// The peer-owned selection was withdrawn
    fn clear_selection(&mut self, peer: PeerId);
    /// Write the current selection as `mime_type` into `fd` and close it
    ///
    /// Returns `false` when there is no selection offering that type.
    fn send_selection(&mut self, mime_type: &str, fd: OwnedFd) -> bool;
}
