//! Input Event Translator
//!
//! Per-peer coordinator that routes decoded RDP input PDUs to the mouse
//! and keyboard handlers and hands the results to the peer's compositor
//! seat. Runs on the display thread.

use crate::compositor::Compositor;
use crate::input::keyboard::{KeyAction, KeyboardHandler};
use crate::input::keymap::KeyboardInfo;
use crate::input::mouse::{MouseHandler, PointerAction};
use crate::multimon::Topology;
use crate::rdp::PeerId;
use tracing::{debug, trace};

/// RDP input PDUs as delivered by the protocol library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Scancode key event
    Keyboard {
        /// `KBD_FLAGS_*`
        flags: u16,
        /// Set-1 scancode
        code: u8,
    },
    /// Unicode key event
    Unicode {
        /// `KBD_FLAGS_*`
        flags: u16,
        /// UTF-16 code unit
        code: u16,
    },
    /// Lock-key synchronisation
    Synchronize {
        /// `TS_SYNC_*`
        flags: u32,
    },
    /// Pointer event
    Mouse {
        /// `PTR_FLAGS_*`
        flags: u16,
        /// Client-space x
        x: u16,
        /// Client-space y
        y: u16,
    },
    /// Extended pointer event
    ExtendedMouse {
        /// `PTR_XFLAGS_*`
        flags: u16,
        /// Client-space x
        x: u16,
        /// Client-space y
        y: u16,
    },
}

/// Statistics for one peer's input stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    /// PDUs seen
    pub events_processed: u64,
    /// PDUs that produced nothing
    pub events_dropped: u64,
}

/// Input event translator
#[derive(Debug)]
pub struct InputTranslator {
    /// Seat owner
    peer: PeerId,

    /// Keyboard event handler
    keyboard: KeyboardHandler,

    /// Mouse event handler
    mouse: MouseHandler,

    /// Counters
    stats: InputStats,
}

impl InputTranslator {
    /// Create a translator for a peer's seat
    pub fn new(peer: PeerId, keyboard: &KeyboardInfo) -> Self {
        Self {
            peer,
            keyboard: KeyboardHandler::new(keyboard),
            mouse: MouseHandler::new(),
            stats: InputStats::default(),
        }
    }

    /// Translate one PDU and deliver it to the compositor
    pub fn handle_event(
        &mut self,
        event: InputEvent,
        topology: &Topology,
        compositor: &mut dyn Compositor,
    ) {
        self.stats.events_processed += 1;

        let delivered = match event {
            InputEvent::Keyboard { flags, code } => {
                let peer = self.peer;
                let result = self
                    .keyboard
                    .handle_scancode(flags, code, |key| compositor.is_key_pressed(peer, key));
                match result {
                    Ok(actions) => self.apply_keys(&actions, compositor),
                    Err(e) => {
                        debug!("Dropping keyboard event: {}", e);
                        false
                    }
                }
            }
            InputEvent::Unicode { flags, code } => {
                self.keyboard.handle_unicode(flags, code);
                false
            }
            InputEvent::Synchronize { flags } => {
                let action = self.keyboard.handle_synchronize(flags);
                self.apply_keys(&[action], compositor)
            }
            InputEvent::Mouse { flags, x, y } => {
                let actions = self.mouse.handle_mouse_event(flags, x, y, topology);
                self.apply_pointer(&actions, compositor)
            }
            InputEvent::ExtendedMouse { flags, x, y } => {
                let actions = self
                    .mouse
                    .handle_extended_mouse_event(flags, x, y, topology);
                self.apply_pointer(&actions, compositor)
            }
        };

        if !delivered {
            self.stats.events_dropped += 1;
        }
    }

    /// Counters so far
    pub fn stats(&self) -> InputStats {
        self.stats
    }

    /// Mouse handler state
    pub fn mouse(&self) -> &MouseHandler {
        &self.mouse
    }

    fn apply_pointer(&self, actions: &[PointerAction], compositor: &mut dyn Compositor) -> bool {
        if actions.is_empty() {
            return false;
        }

        for action in actions {
            trace!("Pointer action for {}: {:?}", self.peer, action);
            match *action {
                PointerAction::Motion(point) => {
                    compositor.pointer_motion(self.peer, point.x, point.y)
                }
                PointerAction::Button { button, pressed } => {
                    compositor.pointer_button(self.peer, button.to_linux_button(), pressed)
                }
                PointerAction::Axis(event) => compositor.pointer_axis(self.peer, event),
            }
        }
        compositor.pointer_frame(self.peer);
        true
    }

    fn apply_keys(&self, actions: &[KeyAction], compositor: &mut dyn Compositor) -> bool {
        for action in actions {
            match *action {
                KeyAction::Key { keycode, pressed } => {
                    compositor.keyboard_key(self.peer, keycode, pressed)
                }
                KeyAction::Locks(locks) => compositor.keyboard_locks(self.peer, locks),
            }
        }
        !actions.is_empty()
    }
}
