//! Input Event Handling
//!
//! Translates RDP input PDUs into compositor seat events.
//!
//! # Architecture
//!
//! ```text
//! RDP Input PDUs
//!       ↓
//! ┌─────────────────────────┐
//! │  InputTranslator        │ ← one per peer
//! └─────────────────────────┘
//!       ↓               ↓
//! ┌──────────┐    ┌──────────┐
//! │ Keyboard │    │  Mouse   │
//! │ Handler  │    │ Handler  │
//! └──────────┘    └──────────┘
//!       ↓               ↓
//! ┌──────────┐    ┌───────────────┐
//! │ Scancode │    │  Coordinates  │
//! │  Mapper  │    │ (head layout) │
//! └──────────┘    └───────────────┘
//! ```
//!
//! Pointer positions are hit-tested against the client-space head regions
//! and scaled into compositor space. Buttons are validated against the
//! last known state so repeated presses are not forwarded. Wheel
//! rotation is accumulated and reported every 12 units, with a discrete
//! notch every 120.
//!
//! Keyboard scancodes go through a virtual-key table to evdev keycodes.
//! The seat keymap is chosen from the client's keyboard layout, type and
//! subtype (see [`keymap`]).

pub mod coordinates;
pub mod error;
pub mod keyboard;
pub mod keymap;
pub mod mapper;
pub mod mouse;
pub mod translator;

pub use coordinates::{rect_to_client, rect_to_compositor, to_client, to_compositor, CompositorPoint};
pub use error::{InputError, Result};
pub use keyboard::{KeyAction, KeyboardHandler};
pub use keymap::{compile_keymap, resolve_names, KeyboardInfo, XkbNames};
pub use mapper::ScancodeMapper;
pub use mouse::{MouseButton, MouseHandler, PointerAction};
pub use translator::{InputEvent, InputStats, InputTranslator};
