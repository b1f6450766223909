//! Input Handling Error Types

use thiserror::Error;

/// Result type for input operations
pub type Result<T> = std::result::Result<T, InputError>;

/// Input module error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Unknown scancode (E0-prefixed codes carry 0xE000)
    #[error("Unknown scancode: 0x{0:04X}")]
    UnknownScancode(u16),

    /// Virtual key with no evdev equivalent
    #[error("Unknown virtual key: 0x{0:04X}")]
    UnknownVirtualKey(u16),

    /// Keymap could not be compiled
    #[error("XKB error: {0}")]
    XkbError(String),

    /// Unsupported keyboard layout id
    #[error("Keyboard layout not found: 0x{0:08X}")]
    LayoutNotFound(u32),
}

impl InputError {
    /// Whether the event should simply be dropped
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            InputError::UnknownScancode(_) | InputError::UnknownVirtualKey(_)
        )
    }
}
