//! Keyboard Event Handling
//!
//! Turns RDP keyboard PDUs into key actions for the compositor seat.
//! Translation goes through [`ScancodeMapper`]; this layer adds the
//! stateful rules on top:
//!
//! - Hangul and Hanja never send a release, so one is synthesised right
//!   after the press.
//! - A release for a key the compositor does not consider held is dropped.
//! - The `E1 1D 45` Pause sequence produces a single Pause key.

use crate::compositor::LockState;
use crate::input::error::Result;
use crate::input::keymap::{is_korean_103, KeyboardInfo};
use crate::input::mapper::keycodes::{KEY_HANGEUL, KEY_HANJA};
use crate::input::mapper::ScancodeMapper;
use tracing::{debug, trace};

/// `TS_KEYBOARD_EVENT` flags
pub mod keyboard_flags {
    /// E0-prefixed scancode
    pub const EXTENDED: u16 = 0x0100;
    /// E1-prefixed scancode (Pause)
    pub const EXTENDED1: u16 = 0x0200;
    /// Key was already down (repeat)
    pub const DOWN: u16 = 0x4000;
    /// Key released
    pub const RELEASE: u16 = 0x8000;
}

/// `TS_SYNC_EVENT` toggle flags
pub mod sync_flags {
    /// Scroll lock on
    pub const SCROLL_LOCK: u32 = 0x0001;
    /// Num lock on
    pub const NUM_LOCK: u32 = 0x0002;
    /// Caps lock on
    pub const CAPS_LOCK: u32 = 0x0004;
    /// Kana lock on
    pub const KANA_LOCK: u32 = 0x0008;
}

/// One thing the compositor keyboard should be told
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Key transition (evdev keycode)
    Key {
        /// evdev keycode
        keycode: u32,
        /// Pressed or released
        pressed: bool,
    },
    /// Lock-key state
    Locks(LockState),
}

/// Keyboard event handler
#[derive(Debug, Default)]
pub struct KeyboardHandler {
    /// Scancode mapper
    mapper: ScancodeMapper,

    /// An E1 event was just seen; swallow the trailing NumLock scancode
    pause_pending: bool,
}

impl KeyboardHandler {
    /// Create a handler for the client's keyboard
    pub fn new(info: &KeyboardInfo) -> Self {
        let mut mapper = ScancodeMapper::new();
        mapper.set_korean_103(is_korean_103(info));
        Self {
            mapper,
            pause_pending: false,
        }
    }

    /// Process a scancode PDU
    ///
    /// `is_pressed` reports whether the compositor considers a keycode held.
    pub fn handle_scancode(
        &mut self,
        flags: u16,
        scancode: u8,
        is_pressed: impl Fn(u32) -> bool,
    ) -> Result<Vec<KeyAction>> {
        let extended = flags & keyboard_flags::EXTENDED != 0;
        let extended1 = flags & keyboard_flags::EXTENDED1 != 0;
        let pressed = flags & keyboard_flags::RELEASE == 0;

        if std::mem::take(&mut self.pause_pending) && !extended && scancode == 0x45 {
            trace!("Swallowing NumLock half of the Pause sequence");
            return Ok(Vec::new());
        }
        self.pause_pending = extended1;

        let translation = self.mapper.translate_scancode(scancode, extended, extended1)?;
        let keycode = translation.keycode;

        if keycode == KEY_HANGEUL || keycode == KEY_HANJA {
            if !pressed {
                return Ok(Vec::new());
            }
            debug!("Synthesising release for keycode {}", keycode);
            return Ok(vec![
                KeyAction::Key {
                    keycode,
                    pressed: true,
                },
                KeyAction::Key {
                    keycode,
                    pressed: false,
                },
            ]);
        }

        if !pressed && !is_pressed(keycode) {
            trace!("Dropping release of unpressed keycode {}", keycode);
            return Ok(Vec::new());
        }

        Ok(vec![KeyAction::Key { keycode, pressed }])
    }

    /// Process a synchronize PDU
    pub fn handle_synchronize(&mut self, flags: u32) -> KeyAction {
        self.pause_pending = false;
        KeyAction::Locks(LockState {
            scroll_lock: flags & sync_flags::SCROLL_LOCK != 0,
            num_lock: flags & sync_flags::NUM_LOCK != 0,
            caps_lock: flags & sync_flags::CAPS_LOCK != 0,
            kana_lock: flags & sync_flags::KANA_LOCK != 0,
        })
    }

    /// Process a unicode PDU; these are not delivered
    pub fn handle_unicode(&mut self, flags: u16, code: u16) {
        debug!(
            "Dropping unicode keyboard event: code=0x{:04X} flags=0x{:04X}",
            code, flags
        );
    }
}
