//! Scancode Mapping Tables
//!
//! RDP delivers set-1 scancodes with an extended (E0) flag. They are mapped
//! in two steps, the way Windows itself does it:
//!
//! ```text
//! scancode (+E0/E1)  ──►  virtual key  ──►  evdev keycode
//! ```
//!
//! The intermediate virtual key is what distinguishes the numeric keypad
//! from the navigation cluster and the left/right modifier pairs.

use crate::input::error::{InputError, Result};
use std::collections::HashMap;

/// Linux evdev keycodes
pub mod keycodes {
    pub const KEY_ESC: u32 = 1;
    pub const KEY_1: u32 = 2;
    pub const KEY_2: u32 = 3;
    pub const KEY_3: u32 = 4;
    pub const KEY_4: u32 = 5;
    pub const KEY_5: u32 = 6;
    pub const KEY_6: u32 = 7;
    pub const KEY_7: u32 = 8;
    pub const KEY_8: u32 = 9;
    pub const KEY_9: u32 = 10;
    pub const KEY_0: u32 = 11;
    pub const KEY_MINUS: u32 = 12;
    pub const KEY_EQUAL: u32 = 13;
    pub const KEY_BACKSPACE: u32 = 14;
    pub const KEY_TAB: u32 = 15;
    pub const KEY_Q: u32 = 16;
    pub const KEY_W: u32 = 17;
    pub const KEY_E: u32 = 18;
    pub const KEY_R: u32 = 19;
    pub const KEY_T: u32 = 20;
    pub const KEY_Y: u32 = 21;
    pub const KEY_U: u32 = 22;
    pub const KEY_I: u32 = 23;
    pub const KEY_O: u32 = 24;
    pub const KEY_P: u32 = 25;
    pub const KEY_LEFTBRACE: u32 = 26;
    pub const KEY_RIGHTBRACE: u32 = 27;
    pub const KEY_ENTER: u32 = 28;
    pub const KEY_LEFTCTRL: u32 = 29;
    pub const KEY_A: u32 = 30;
    pub const KEY_S: u32 = 31;
    pub const KEY_D: u32 = 32;
    pub const KEY_F: u32 = 33;
    pub const KEY_G: u32 = 34;
    pub const KEY_H: u32 = 35;
    pub const KEY_J: u32 = 36;
    pub const KEY_K: u32 = 37;
    pub const KEY_L: u32 = 38;
    pub const KEY_SEMICOLON: u32 = 39;
    pub const KEY_APOSTROPHE: u32 = 40;
    pub const KEY_GRAVE: u32 = 41;
    pub const KEY_LEFTSHIFT: u32 = 42;
    pub const KEY_BACKSLASH: u32 = 43;
    pub const KEY_Z: u32 = 44;
    pub const KEY_X: u32 = 45;
    pub const KEY_C: u32 = 46;
    pub const KEY_V: u32 = 47;
    pub const KEY_B: u32 = 48;
    pub const KEY_N: u32 = 49;
    pub const KEY_M: u32 = 50;
    pub const KEY_COMMA: u32 = 51;
    pub const KEY_DOT: u32 = 52;
    pub const KEY_SLASH: u32 = 53;
    pub const KEY_RIGHTSHIFT: u32 = 54;
    pub const KEY_KPASTERISK: u32 = 55;
    pub const KEY_LEFTALT: u32 = 56;
    pub const KEY_SPACE: u32 = 57;
    pub const KEY_CAPSLOCK: u32 = 58;

    // Function keys
    pub const KEY_F1: u32 = 59;
    pub const KEY_F2: u32 = 60;
    pub const KEY_F3: u32 = 61;
    pub const KEY_F4: u32 = 62;
    pub const KEY_F5: u32 = 63;
    pub const KEY_F6: u32 = 64;
    pub const KEY_F7: u32 = 65;
    pub const KEY_F8: u32 = 66;
    pub const KEY_F9: u32 = 67;
    pub const KEY_F10: u32 = 68;
    pub const KEY_NUMLOCK: u32 = 69;
    pub const KEY_SCROLLLOCK: u32 = 70;

    // Numpad
    pub const KEY_KP7: u32 = 71;
    pub const KEY_KP8: u32 = 72;
    pub const KEY_KP9: u32 = 73;
    pub const KEY_KPMINUS: u32 = 74;
    pub const KEY_KP4: u32 = 75;
    pub const KEY_KP5: u32 = 76;
    pub const KEY_KP6: u32 = 77;
    pub const KEY_KPPLUS: u32 = 78;
    pub const KEY_KP1: u32 = 79;
    pub const KEY_KP2: u32 = 80;
    pub const KEY_KP3: u32 = 81;
    pub const KEY_KP0: u32 = 82;
    pub const KEY_KPDOT: u32 = 83;

    pub const KEY_102ND: u32 = 86;
    pub const KEY_F11: u32 = 87;
    pub const KEY_F12: u32 = 88;
    pub const KEY_RO: u32 = 89;
    pub const KEY_HENKAN: u32 = 92;
    pub const KEY_KATAKANAHIRAGANA: u32 = 93;
    pub const KEY_MUHENKAN: u32 = 94;
    pub const KEY_KPENTER: u32 = 96;
    pub const KEY_RIGHTCTRL: u32 = 97;
    pub const KEY_KPSLASH: u32 = 98;
    pub const KEY_SYSRQ: u32 = 99;
    pub const KEY_RIGHTALT: u32 = 100;
    pub const KEY_HOME: u32 = 102;
    pub const KEY_UP: u32 = 103;
    pub const KEY_PAGEUP: u32 = 104;
    pub const KEY_LEFT: u32 = 105;
    pub const KEY_RIGHT: u32 = 106;
    pub const KEY_END: u32 = 107;
    pub const KEY_DOWN: u32 = 108;
    pub const KEY_PAGEDOWN: u32 = 109;
    pub const KEY_INSERT: u32 = 110;
    pub const KEY_DELETE: u32 = 111;
    pub const KEY_MUTE: u32 = 113;
    pub const KEY_VOLUMEDOWN: u32 = 114;
    pub const KEY_VOLUMEUP: u32 = 115;
    pub const KEY_PAUSE: u32 = 119;
    pub const KEY_KPCOMMA: u32 = 121;
    pub const KEY_HANGEUL: u32 = 122;
    pub const KEY_HANJA: u32 = 123;
    pub const KEY_YEN: u32 = 124;
    pub const KEY_LEFTMETA: u32 = 125;
    pub const KEY_RIGHTMETA: u32 = 126;
    pub const KEY_COMPOSE: u32 = 127;
    pub const KEY_SLEEP: u32 = 142;
    pub const KEY_MAIL: u32 = 155;
    pub const KEY_BACK: u32 = 158;
    pub const KEY_FORWARD: u32 = 159;
    pub const KEY_NEXTSONG: u32 = 163;
    pub const KEY_PLAYPAUSE: u32 = 164;
    pub const KEY_PREVIOUSSONG: u32 = 165;
    pub const KEY_STOPCD: u32 = 166;
    pub const KEY_HOMEPAGE: u32 = 172;
    pub const KEY_REFRESH: u32 = 173;
    pub const KEY_F13: u32 = 183;
    pub const KEY_SEARCH: u32 = 217;
}

/// Windows virtual-key codes
///
/// [`KBDEXT`] is or'ed in where the same virtual key exists on both the
/// main block and the extended block.
pub mod vk {
    pub const KBDEXT: u16 = 0x0100;

    pub const VK_CANCEL: u16 = 0x03;
    pub const VK_BACK: u16 = 0x08;
    pub const VK_TAB: u16 = 0x09;
    pub const VK_RETURN: u16 = 0x0D;
    pub const VK_PAUSE: u16 = 0x13;
    pub const VK_CAPITAL: u16 = 0x14;
    pub const VK_HANGUL: u16 = 0x15;
    pub const VK_HANJA: u16 = 0x19;
    pub const VK_ESCAPE: u16 = 0x1B;
    pub const VK_CONVERT: u16 = 0x1C;
    pub const VK_NONCONVERT: u16 = 0x1D;
    pub const VK_SPACE: u16 = 0x20;
    pub const VK_PRIOR: u16 = 0x21;
    pub const VK_NEXT: u16 = 0x22;
    pub const VK_END: u16 = 0x23;
    pub const VK_HOME: u16 = 0x24;
    pub const VK_LEFT: u16 = 0x25;
    pub const VK_UP: u16 = 0x26;
    pub const VK_RIGHT: u16 = 0x27;
    pub const VK_DOWN: u16 = 0x28;
    pub const VK_SNAPSHOT: u16 = 0x2C;
    pub const VK_INSERT: u16 = 0x2D;
    pub const VK_DELETE: u16 = 0x2E;
    pub const VK_KEY_0: u16 = 0x30;
    pub const VK_KEY_A: u16 = 0x41;
    pub const VK_LWIN: u16 = 0x5B;
    pub const VK_RWIN: u16 = 0x5C;
    pub const VK_APPS: u16 = 0x5D;
    pub const VK_SLEEP: u16 = 0x5F;
    pub const VK_NUMPAD0: u16 = 0x60;
    pub const VK_NUMPAD1: u16 = 0x61;
    pub const VK_NUMPAD2: u16 = 0x62;
    pub const VK_NUMPAD3: u16 = 0x63;
    pub const VK_NUMPAD4: u16 = 0x64;
    pub const VK_NUMPAD5: u16 = 0x65;
    pub const VK_NUMPAD6: u16 = 0x66;
    pub const VK_NUMPAD7: u16 = 0x67;
    pub const VK_NUMPAD8: u16 = 0x68;
    pub const VK_NUMPAD9: u16 = 0x69;
    pub const VK_MULTIPLY: u16 = 0x6A;
    pub const VK_ADD: u16 = 0x6B;
    pub const VK_SUBTRACT: u16 = 0x6D;
    pub const VK_DECIMAL: u16 = 0x6E;
    pub const VK_DIVIDE: u16 = 0x6F;
    pub const VK_F1: u16 = 0x70;
    pub const VK_F13: u16 = 0x7C;
    pub const VK_F24: u16 = 0x87;
    pub const VK_NUMLOCK: u16 = 0x90;
    pub const VK_SCROLL: u16 = 0x91;
    pub const VK_LSHIFT: u16 = 0xA0;
    pub const VK_RSHIFT: u16 = 0xA1;
    pub const VK_LCONTROL: u16 = 0xA2;
    pub const VK_RCONTROL: u16 = 0xA3;
    pub const VK_LMENU: u16 = 0xA4;
    pub const VK_RMENU: u16 = 0xA5;
    pub const VK_BROWSER_BACK: u16 = 0xA6;
    pub const VK_BROWSER_FORWARD: u16 = 0xA7;
    pub const VK_BROWSER_REFRESH: u16 = 0xA8;
    pub const VK_BROWSER_SEARCH: u16 = 0xAA;
    pub const VK_BROWSER_HOME: u16 = 0xAC;
    pub const VK_VOLUME_MUTE: u16 = 0xAD;
    pub const VK_VOLUME_DOWN: u16 = 0xAE;
    pub const VK_VOLUME_UP: u16 = 0xAF;
    pub const VK_MEDIA_NEXT_TRACK: u16 = 0xB0;
    pub const VK_MEDIA_PREV_TRACK: u16 = 0xB1;
    pub const VK_MEDIA_STOP: u16 = 0xB2;
    pub const VK_MEDIA_PLAY_PAUSE: u16 = 0xB3;
    pub const VK_LAUNCH_MAIL: u16 = 0xB4;
    pub const VK_OEM_1: u16 = 0xBA;
    pub const VK_OEM_PLUS: u16 = 0xBB;
    pub const VK_OEM_COMMA: u16 = 0xBC;
    pub const VK_OEM_MINUS: u16 = 0xBD;
    pub const VK_OEM_PERIOD: u16 = 0xBE;
    pub const VK_OEM_2: u16 = 0xBF;
    pub const VK_OEM_3: u16 = 0xC0;
    pub const VK_ABNT_C1: u16 = 0xC1;
    pub const VK_ABNT_C2: u16 = 0xC2;
    pub const VK_OEM_4: u16 = 0xDB;
    pub const VK_OEM_5: u16 = 0xDC;
    pub const VK_OEM_6: u16 = 0xDD;
    pub const VK_OEM_7: u16 = 0xDE;
    pub const VK_OEM_8: u16 = 0xDF;
    pub const VK_OEM_102: u16 = 0xE2;
    pub const VK_DBE_HIRAGANA: u16 = 0xF2;
}

use keycodes::*;
use vk::*;

/// Extended flag folded into a scancode table key
const EXT: u16 = 0x0100;

/// Set-1 scancode (with [`EXT`] for E0-prefixed keys) to virtual key
const SCANCODE_TO_VK: &[(u16, u16)] = &[
    (0x01, VK_ESCAPE),
    (0x02, VK_KEY_0 + 1),
    (0x03, VK_KEY_0 + 2),
    (0x04, VK_KEY_0 + 3),
    (0x05, VK_KEY_0 + 4),
    (0x06, VK_KEY_0 + 5),
    (0x07, VK_KEY_0 + 6),
    (0x08, VK_KEY_0 + 7),
    (0x09, VK_KEY_0 + 8),
    (0x0A, VK_KEY_0 + 9),
    (0x0B, VK_KEY_0),
    (0x0C, VK_OEM_MINUS),
    (0x0D, VK_OEM_PLUS),
    (0x0E, VK_BACK),
    (0x0F, VK_TAB),
    (0x10, b'Q' as u16),
    (0x11, b'W' as u16),
    (0x12, b'E' as u16),
    (0x13, b'R' as u16),
    (0x14, b'T' as u16),
    (0x15, b'Y' as u16),
    (0x16, b'U' as u16),
    (0x17, b'I' as u16),
    (0x18, b'O' as u16),
    (0x19, b'P' as u16),
    (0x1A, VK_OEM_4),
    (0x1B, VK_OEM_6),
    (0x1C, VK_RETURN),
    (0x1D, VK_LCONTROL),
    (0x1E, b'A' as u16),
    (0x1F, b'S' as u16),
    (0x20, b'D' as u16),
    (0x21, b'F' as u16),
    (0x22, b'G' as u16),
    (0x23, b'H' as u16),
    (0x24, b'J' as u16),
    (0x25, b'K' as u16),
    (0x26, b'L' as u16),
    (0x27, VK_OEM_1),
    (0x28, VK_OEM_7),
    (0x29, VK_OEM_3),
    (0x2A, VK_LSHIFT),
    (0x2B, VK_OEM_5),
    (0x2C, b'Z' as u16),
    (0x2D, b'X' as u16),
    (0x2E, b'C' as u16),
    (0x2F, b'V' as u16),
    (0x30, b'B' as u16),
    (0x31, b'N' as u16),
    (0x32, b'M' as u16),
    (0x33, VK_OEM_COMMA),
    (0x34, VK_OEM_PERIOD),
    (0x35, VK_OEM_2),
    (0x36, VK_RSHIFT),
    (0x37, VK_MULTIPLY),
    (0x38, VK_LMENU),
    (0x39, VK_SPACE),
    (0x3A, VK_CAPITAL),
    (0x3B, VK_F1),
    (0x3C, VK_F1 + 1),
    (0x3D, VK_F1 + 2),
    (0x3E, VK_F1 + 3),
    (0x3F, VK_F1 + 4),
    (0x40, VK_F1 + 5),
    (0x41, VK_F1 + 6),
    (0x42, VK_F1 + 7),
    (0x43, VK_F1 + 8),
    (0x44, VK_F1 + 9),
    (0x45, VK_NUMLOCK),
    (0x46, VK_SCROLL),
    (0x47, VK_NUMPAD7),
    (0x48, VK_NUMPAD8),
    (0x49, VK_NUMPAD9),
    (0x4A, VK_SUBTRACT),
    (0x4B, VK_NUMPAD4),
    (0x4C, VK_NUMPAD5),
    (0x4D, VK_NUMPAD6),
    (0x4E, VK_ADD),
    (0x4F, VK_NUMPAD1),
    (0x50, VK_NUMPAD2),
    (0x51, VK_NUMPAD3),
    (0x52, VK_NUMPAD0),
    (0x53, VK_DECIMAL),
    (0x56, VK_OEM_102),
    (0x57, VK_F1 + 10),
    (0x58, VK_F1 + 11),
    (0x64, VK_F13),
    (0x65, VK_F13 + 1),
    (0x66, VK_F13 + 2),
    (0x67, VK_F13 + 3),
    (0x68, VK_F13 + 4),
    (0x69, VK_F13 + 5),
    (0x6A, VK_F13 + 6),
    (0x6B, VK_F13 + 7),
    (0x6C, VK_F13 + 8),
    (0x6D, VK_F13 + 9),
    (0x6E, VK_F13 + 10),
    (0x70, VK_DBE_HIRAGANA),
    (0x71, VK_HANJA),
    (0x72, VK_HANGUL),
    (0x73, VK_ABNT_C1),
    (0x76, VK_F24),
    (0x79, VK_CONVERT),
    (0x7B, VK_NONCONVERT),
    (0x7D, VK_OEM_8),
    (0x7E, VK_ABNT_C2),
    // E0-prefixed
    (EXT | 0x10, VK_MEDIA_PREV_TRACK),
    (EXT | 0x19, VK_MEDIA_NEXT_TRACK),
    (EXT | 0x1C, VK_RETURN | KBDEXT),
    (EXT | 0x1D, VK_RCONTROL),
    (EXT | 0x20, VK_VOLUME_MUTE),
    (EXT | 0x22, VK_MEDIA_PLAY_PAUSE),
    (EXT | 0x24, VK_MEDIA_STOP),
    (EXT | 0x2E, VK_VOLUME_DOWN),
    (EXT | 0x30, VK_VOLUME_UP),
    (EXT | 0x32, VK_BROWSER_HOME),
    (EXT | 0x35, VK_DIVIDE),
    (EXT | 0x37, VK_SNAPSHOT),
    (EXT | 0x38, VK_RMENU),
    (EXT | 0x45, VK_NUMLOCK),
    (EXT | 0x46, VK_CANCEL),
    (EXT | 0x47, VK_HOME),
    (EXT | 0x48, VK_UP),
    (EXT | 0x49, VK_PRIOR),
    (EXT | 0x4B, VK_LEFT),
    (EXT | 0x4D, VK_RIGHT),
    (EXT | 0x4F, VK_END),
    (EXT | 0x50, VK_DOWN),
    (EXT | 0x51, VK_NEXT),
    (EXT | 0x52, VK_INSERT),
    (EXT | 0x53, VK_DELETE),
    (EXT | 0x5B, VK_LWIN),
    (EXT | 0x5C, VK_RWIN),
    (EXT | 0x5D, VK_APPS),
    (EXT | 0x5F, VK_SLEEP),
    (EXT | 0x65, VK_BROWSER_SEARCH),
    (EXT | 0x67, VK_BROWSER_REFRESH),
    (EXT | 0x69, VK_BROWSER_FORWARD),
    (EXT | 0x6A, VK_BROWSER_BACK),
    (EXT | 0x6C, VK_LAUNCH_MAIL),
];

/// Virtual key to evdev keycode
const VK_TO_KEYCODE: &[(u16, u32)] = &[
    (VK_CANCEL, KEY_PAUSE),
    (VK_BACK, KEY_BACKSPACE),
    (VK_TAB, KEY_TAB),
    (VK_RETURN, KEY_ENTER),
    (VK_RETURN | KBDEXT, KEY_KPENTER),
    (VK_PAUSE, KEY_PAUSE),
    (VK_CAPITAL, KEY_CAPSLOCK),
    (VK_HANGUL, KEY_HANGEUL),
    (VK_HANJA, KEY_HANJA),
    (VK_ESCAPE, KEY_ESC),
    (VK_CONVERT, KEY_HENKAN),
    (VK_NONCONVERT, KEY_MUHENKAN),
    (VK_SPACE, KEY_SPACE),
    (VK_PRIOR, KEY_PAGEUP),
    (VK_NEXT, KEY_PAGEDOWN),
    (VK_END, KEY_END),
    (VK_HOME, KEY_HOME),
    (VK_LEFT, KEY_LEFT),
    (VK_UP, KEY_UP),
    (VK_RIGHT, KEY_RIGHT),
    (VK_DOWN, KEY_DOWN),
    (VK_SNAPSHOT, KEY_SYSRQ),
    (VK_INSERT, KEY_INSERT),
    (VK_DELETE, KEY_DELETE),
    (VK_KEY_0, KEY_0),
    (VK_KEY_0 + 1, KEY_1),
    (VK_KEY_0 + 2, KEY_2),
    (VK_KEY_0 + 3, KEY_3),
    (VK_KEY_0 + 4, KEY_4),
    (VK_KEY_0 + 5, KEY_5),
    (VK_KEY_0 + 6, KEY_6),
    (VK_KEY_0 + 7, KEY_7),
    (VK_KEY_0 + 8, KEY_8),
    (VK_KEY_0 + 9, KEY_9),
    (b'A' as u16, KEY_A),
    (b'B' as u16, KEY_B),
    (b'C' as u16, KEY_C),
    (b'D' as u16, KEY_D),
    (b'E' as u16, KEY_E),
    (b'F' as u16, KEY_F),
    (b'G' as u16, KEY_G),
    (b'H' as u16, KEY_H),
    (b'I' as u16, KEY_I),
    (b'J' as u16, KEY_J),
    (b'K' as u16, KEY_K),
    (b'L' as u16, KEY_L),
    (b'M' as u16, KEY_M),
    (b'N' as u16, KEY_N),
    (b'O' as u16, KEY_O),
    (b'P' as u16, KEY_P),
    (b'Q' as u16, KEY_Q),
    (b'R' as u16, KEY_R),
    (b'S' as u16, KEY_S),
    (b'T' as u16, KEY_T),
    (b'U' as u16, KEY_U),
    (b'V' as u16, KEY_V),
    (b'W' as u16, KEY_W),
    (b'X' as u16, KEY_X),
    (b'Y' as u16, KEY_Y),
    (b'Z' as u16, KEY_Z),
    (VK_LWIN, KEY_LEFTMETA),
    (VK_RWIN, KEY_RIGHTMETA),
    (VK_APPS, KEY_COMPOSE),
    (VK_SLEEP, KEY_SLEEP),
    (VK_NUMPAD0, KEY_KP0),
    (VK_NUMPAD1, KEY_KP1),
    (VK_NUMPAD2, KEY_KP2),
    (VK_NUMPAD3, KEY_KP3),
    (VK_NUMPAD4, KEY_KP4),
    (VK_NUMPAD5, KEY_KP5),
    (VK_NUMPAD6, KEY_KP6),
    (VK_NUMPAD7, KEY_KP7),
    (VK_NUMPAD8, KEY_KP8),
    (VK_NUMPAD9, KEY_KP9),
    (VK_MULTIPLY, KEY_KPASTERISK),
    (VK_ADD, KEY_KPPLUS),
    (VK_SUBTRACT, KEY_KPMINUS),
    (VK_DECIMAL, KEY_KPDOT),
    (VK_DIVIDE, KEY_KPSLASH),
    (VK_F1, KEY_F1),
    (VK_F1 + 1, KEY_F2),
    (VK_F1 + 2, KEY_F3),
    (VK_F1 + 3, KEY_F4),
    (VK_F1 + 4, KEY_F5),
    (VK_F1 + 5, KEY_F6),
    (VK_F1 + 6, KEY_F7),
    (VK_F1 + 7, KEY_F8),
    (VK_F1 + 8, KEY_F9),
    (VK_F1 + 9, KEY_F10),
    (VK_F1 + 10, KEY_F11),
    (VK_F1 + 11, KEY_F12),
    (VK_F13, KEY_F13),
    (VK_F13 + 1, KEY_F13 + 1),
    (VK_F13 + 2, KEY_F13 + 2),
    (VK_F13 + 3, KEY_F13 + 3),
    (VK_F13 + 4, KEY_F13 + 4),
    (VK_F13 + 5, KEY_F13 + 5),
    (VK_F13 + 6, KEY_F13 + 6),
    (VK_F13 + 7, KEY_F13 + 7),
    (VK_F13 + 8, KEY_F13 + 8),
    (VK_F13 + 9, KEY_F13 + 9),
    (VK_F13 + 10, KEY_F13 + 10),
    (VK_F13 + 11, KEY_F13 + 11),
    (VK_NUMLOCK, KEY_NUMLOCK),
    (VK_SCROLL, KEY_SCROLLLOCK),
    (VK_LSHIFT, KEY_LEFTSHIFT),
    (VK_RSHIFT, KEY_RIGHTSHIFT),
    (VK_LCONTROL, KEY_LEFTCTRL),
    (VK_RCONTROL, KEY_RIGHTCTRL),
    (VK_LMENU, KEY_LEFTALT),
    (VK_RMENU, KEY_RIGHTALT),
    (VK_BROWSER_BACK, KEY_BACK),
    (VK_BROWSER_FORWARD, KEY_FORWARD),
    (VK_BROWSER_REFRESH, KEY_REFRESH),
    (VK_BROWSER_SEARCH, KEY_SEARCH),
    (VK_BROWSER_HOME, KEY_HOMEPAGE),
    (VK_VOLUME_MUTE, KEY_MUTE),
    (VK_VOLUME_DOWN, KEY_VOLUMEDOWN),
    (VK_VOLUME_UP, KEY_VOLUMEUP),
    (VK_MEDIA_NEXT_TRACK, KEY_NEXTSONG),
    (VK_MEDIA_PREV_TRACK, KEY_PREVIOUSSONG),
    (VK_MEDIA_STOP, KEY_STOPCD),
    (VK_MEDIA_PLAY_PAUSE, KEY_PLAYPAUSE),
    (VK_LAUNCH_MAIL, KEY_MAIL),
    (VK_OEM_1, KEY_SEMICOLON),
    (VK_OEM_PLUS, KEY_EQUAL),
    (VK_OEM_COMMA, KEY_COMMA),
    (VK_OEM_MINUS, KEY_MINUS),
    (VK_OEM_PERIOD, KEY_DOT),
    (VK_OEM_2, KEY_SLASH),
    (VK_OEM_3, KEY_GRAVE),
    (VK_ABNT_C1, KEY_RO),
    (VK_ABNT_C2, KEY_KPCOMMA),
    (VK_OEM_4, KEY_LEFTBRACE),
    (VK_OEM_5, KEY_BACKSLASH),
    (VK_OEM_6, KEY_RIGHTBRACE),
    (VK_OEM_7, KEY_APOSTROPHE),
    (VK_OEM_8, KEY_YEN),
    (VK_OEM_102, KEY_102ND),
    (VK_DBE_HIRAGANA, KEY_KATAKANAHIRAGANA),
];

/// A scancode resolved through both tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// Intermediate virtual key
    pub vk: u16,
    /// evdev keycode
    pub keycode: u32,
}

/// Scancode mapper handles RDP scancode to evdev keycode translation
#[derive(Debug)]
pub struct ScancodeMapper {
    /// Scancode (with E0 folded in) to virtual key
    vk_map: HashMap<u16, u16>,

    /// Virtual key to evdev keycode
    keycode_map: HashMap<u16, u32>,

    /// Right Ctrl and right Alt act as Hanja and Hangul
    korean_103: bool,
}

impl ScancodeMapper {
    /// Create a new scancode mapper
    pub fn new() -> Self {
        Self {
            vk_map: SCANCODE_TO_VK.iter().copied().collect(),
            keycode_map: VK_TO_KEYCODE.iter().copied().collect(),
            korean_103: false,
        }
    }

    /// Treat right Ctrl/Alt as Hanja/Hangul (Korean 103-key keyboards)
    pub fn set_korean_103(&mut self, enabled: bool) {
        self.korean_103 = enabled;
    }

    /// Map a scancode to its virtual key
    pub fn virtual_key(&self, scancode: u8, extended: bool) -> Option<u16> {
        if self.korean_103 && extended {
            match scancode {
                0x1D => return Some(VK_HANJA),
                0x38 => return Some(VK_HANGUL),
                _ => {}
            }
        }
        let key = u16::from(scancode) | if extended { EXT } else { 0 };
        self.vk_map.get(&key).copied()
    }

    /// Map a virtual key to an evdev keycode
    pub fn keycode(&self, vk: u16) -> Option<u32> {
        self.keycode_map.get(&vk).copied()
    }

    /// Translate a scancode all the way to an evdev keycode
    ///
    /// `extended1` marks the E1 prefix, which only Pause uses.
    pub fn translate_scancode(
        &self,
        scancode: u8,
        extended: bool,
        extended1: bool,
    ) -> Result<Translation> {
        let vk = if extended1 {
            match scancode {
                0x1D => Some(VK_PAUSE),
                _ => None,
            }
        } else {
            self.virtual_key(scancode, extended)
        };

        let full = u16::from(scancode) | if extended { 0xE000 } else { 0 };
        let vk = vk.ok_or(InputError::UnknownScancode(full))?;
        let keycode = self
            .keycode(vk)
            .ok_or(InputError::UnknownVirtualKey(vk))?;
        Ok(Translation { vk, keycode })
    }

    /// Check if scancode is mapped
    pub fn is_mapped(&self, scancode: u8, extended: bool) -> bool {
        self.translate_scancode(scancode, extended, false).is_ok()
    }
}

impl Default for ScancodeMapper {
    fn default() -> Self {
        Self::new()
    }
}
