//! Mouse Event Handling
//!
//! Decodes RDP pointer PDUs into pointer actions: absolute motion resolved
//! through the head layout, button transitions with duplicate suppression,
//! and wheel rotation accumulated into smooth and discrete scroll steps.

use crate::compositor::{Axis, AxisEvent};
use crate::input::coordinates::{to_compositor, CompositorPoint};
use crate::multimon::Topology;
use tracing::{debug, trace};

/// `TS_POINTER_EVENT` flags
pub mod pointer_flags {
    /// Horizontal wheel rotation
    pub const HWHEEL: u16 = 0x0400;
    /// Vertical wheel rotation
    pub const WHEEL: u16 = 0x0200;
    /// Rotation value is negative (9-bit two's complement)
    pub const WHEEL_NEGATIVE: u16 = 0x0100;
    /// Rotation bits including the sign bit
    pub const WHEEL_ROTATION_MASK: u16 = 0x01FF;
    /// Pointer moved
    pub const MOVE: u16 = 0x0800;
    /// Button went down (otherwise up)
    pub const DOWN: u16 = 0x8000;
    /// Left button
    pub const BUTTON1: u16 = 0x1000;
    /// Right button
    pub const BUTTON2: u16 = 0x2000;
    /// Middle button
    pub const BUTTON3: u16 = 0x4000;
}

/// `TS_POINTERX_EVENT` flags
pub mod pointer_x_flags {
    /// Button went down (otherwise up)
    pub const DOWN: u16 = 0x8000;
    /// First extended button
    pub const BUTTON1: u16 = 0x0001;
    /// Second extended button
    pub const BUTTON2: u16 = 0x0002;
}

/// Wheel units per smooth scroll step
pub const WHEEL_UNITS_PER_STEP: i32 = 12;

/// Wheel units per discrete notch
pub const WHEEL_UNITS_PER_NOTCH: i32 = 120;

/// Mouse button identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Left mouse button
    Left,
    /// Right mouse button
    Right,
    /// Middle mouse button
    Middle,
    /// Extra button 1 (side button)
    Extra1,
    /// Extra button 2 (side button)
    Extra2,
}

impl MouseButton {
    /// Convert to Linux button code
    pub fn to_linux_button(&self) -> u32 {
        match self {
            MouseButton::Left => 0x110,   // BTN_LEFT
            MouseButton::Right => 0x111,  // BTN_RIGHT
            MouseButton::Middle => 0x112, // BTN_MIDDLE
            MouseButton::Extra1 => 0x113, // BTN_SIDE
            MouseButton::Extra2 => 0x114, // BTN_EXTRA
        }
    }

    /// Button named by a standard pointer PDU
    pub fn from_pointer_flags(flags: u16) -> Option<Self> {
        if flags & pointer_flags::BUTTON1 != 0 {
            Some(MouseButton::Left)
        } else if flags & pointer_flags::BUTTON2 != 0 {
            Some(MouseButton::Right)
        } else if flags & pointer_flags::BUTTON3 != 0 {
            Some(MouseButton::Middle)
        } else {
            None
        }
    }

    /// Button named by an extended pointer PDU
    pub fn from_pointer_x_flags(flags: u16) -> Option<Self> {
        if flags & pointer_x_flags::BUTTON1 != 0 {
            Some(MouseButton::Extra1)
        } else if flags & pointer_x_flags::BUTTON2 != 0 {
            Some(MouseButton::Extra2)
        } else {
            None
        }
    }

    fn index(&self) -> usize {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
            MouseButton::Extra1 => 3,
            MouseButton::Extra2 => 4,
        }
    }
}

/// One thing the compositor should be told
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerAction {
    /// Absolute motion in compositor space
    Motion(CompositorPoint),
    /// Button transition
    Button {
        /// Which button
        button: MouseButton,
        /// Pressed or released
        pressed: bool,
    },
    /// Scroll
    Axis(AxisEvent),
}

/// Decode the signed rotation carried in the low nine bits of `flags`
pub fn wheel_rotation(flags: u16) -> i32 {
    let raw = i32::from(flags & pointer_flags::WHEEL_ROTATION_MASK);
    if flags & pointer_flags::WHEEL_NEGATIVE != 0 {
        raw - 0x200
    } else {
        raw
    }
}

/// Per-axis wheel accumulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollAccumulator {
    precise: i32,
    discrete: i32,
}

impl ScrollAccumulator {
    /// Add `units` and return `(value, notches)` once a full step has built up
    pub fn accumulate(&mut self, units: i32) -> Option<(f64, i32)> {
        self.precise += units;
        self.discrete += units;

        if self.precise.abs() < WHEEL_UNITS_PER_STEP {
            return None;
        }

        let value = f64::from(self.precise) / f64::from(WHEEL_UNITS_PER_STEP);
        let notches = self.discrete / WHEEL_UNITS_PER_NOTCH;
        self.precise %= WHEEL_UNITS_PER_STEP;
        self.discrete %= WHEEL_UNITS_PER_NOTCH;
        Some((value, notches))
    }

    /// Units not yet reported as a smooth step
    pub fn pending(&self) -> i32 {
        self.precise
    }
}

/// Mouse event handler
#[derive(Debug, Default)]
pub struct MouseHandler {
    /// Button states
    button_states: [bool; 5],

    /// Vertical wheel accumulator
    vertical: ScrollAccumulator,

    /// Horizontal wheel accumulator
    horizontal: ScrollAccumulator,
}

impl MouseHandler {
    /// Create a new mouse handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a standard pointer PDU
    ///
    /// Motion over a point no head covers is dropped; buttons and wheel
    /// in the same PDU are still processed.
    pub fn handle_mouse_event(
        &mut self,
        flags: u16,
        x: u16,
        y: u16,
        topology: &Topology,
    ) -> Vec<PointerAction> {
        let mut actions = Vec::new();

        if flags & pointer_flags::MOVE != 0 {
            self.push_motion(&mut actions, x, y, topology);
        }

        if let Some(button) = MouseButton::from_pointer_flags(flags) {
            let pressed = flags & pointer_flags::DOWN != 0;
            if let Some(action) = self.button(button, pressed) {
                actions.push(action);
            }
        }

        if flags & pointer_flags::WHEEL != 0 {
            if let Some(event) = self.handle_wheel(Axis::Vertical, flags) {
                actions.push(PointerAction::Axis(event));
            }
        }

        if flags & pointer_flags::HWHEEL != 0 {
            if let Some(event) = self.handle_wheel(Axis::Horizontal, flags) {
                actions.push(PointerAction::Axis(event));
            }
        }

        actions
    }

    /// Handle an extended pointer PDU (side buttons)
    pub fn handle_extended_mouse_event(
        &mut self,
        flags: u16,
        x: u16,
        y: u16,
        topology: &Topology,
    ) -> Vec<PointerAction> {
        let mut actions = Vec::new();
        self.push_motion(&mut actions, x, y, topology);

        if let Some(button) = MouseButton::from_pointer_x_flags(flags) {
            let pressed = flags & pointer_x_flags::DOWN != 0;
            if let Some(action) = self.button(button, pressed) {
                actions.push(action);
            }
        }

        actions
    }

    /// Accumulate one wheel PDU
    ///
    /// The vertical direction is inverted: RDP reports positive rotation
    /// away from the user, which scrolls up.
    pub fn handle_wheel(&mut self, axis: Axis, flags: u16) -> Option<AxisEvent> {
        let mut units = wheel_rotation(flags);
        let accumulator = match axis {
            Axis::Vertical => {
                units = -units;
                &mut self.vertical
            }
            Axis::Horizontal => &mut self.horizontal,
        };

        let (value, discrete) = accumulator.accumulate(units)?;
        trace!("Scroll {:?}: value={} discrete={}", axis, value, discrete);
        Some(AxisEvent {
            axis,
            value,
            discrete,
        })
    }

    /// Check if a button is pressed
    pub fn is_button_pressed(&self, button: MouseButton) -> bool {
        self.button_states[button.index()]
    }

    /// Units accumulated on `axis` but not yet reported
    pub fn pending_scroll(&self, axis: Axis) -> i32 {
        match axis {
            Axis::Vertical => self.vertical.pending(),
            Axis::Horizontal => self.horizontal.pending(),
        }
    }

    /// Reset handler state
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn push_motion(&self, actions: &mut Vec<PointerAction>, x: u16, y: u16, topology: &Topology) {
        match to_compositor(topology, i32::from(x), i32::from(y)) {
            Some(point) => actions.push(PointerAction::Motion(point)),
            None => trace!("Pointer at ({}, {}) is outside every head", x, y),
        }
    }

    fn button(&mut self, button: MouseButton, pressed: bool) -> Option<PointerAction> {
        let state = &mut self.button_states[button.index()];
        if *state == pressed {
            debug!("Ignoring repeated {:?} pressed={}", button, pressed);
            return None;
        }
        *state = pressed;
        Some(PointerAction::Button { button, pressed })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::HeadlessCompositor;
    use crate::multimon::{MonitorDescriptor, MonitorMode, ScalePolicy};

    fn single() -> Topology {
        let mode = MonitorMode::new(
            MonitorDescriptor::new(0, 0, 1024, 768, true),
            &ScalePolicy::default(),
        );
        let mut topology = Topology::new(false, 60_000);
        topology
            .reconcile(&[mode], &mut HeadlessCompositor::new())
            .unwrap();
        topology
    }

    #[test]
    fn test_button_mapping() {
        assert_eq!(MouseButton::Left.to_linux_button(), 0x110);
        assert_eq!(MouseButton::Extra2.to_linux_button(), 0x114);
        assert_eq!(
            MouseButton::from_pointer_flags(pointer_flags::BUTTON3 | pointer_flags::DOWN),
            Some(MouseButton::Middle)
        );
        assert_eq!(
            MouseButton::from_pointer_x_flags(pointer_x_flags::BUTTON1),
            Some(MouseButton::Extra1)
        );
    }

    #[test]
    fn test_wheel_rotation_sign() {
        assert_eq!(wheel_rotation(pointer_flags::WHEEL | 0x0078), 120);
        assert_eq!(wheel_rotation(pointer_flags::WHEEL | 0x0188), -120);
        assert_eq!(wheel_rotation(pointer_flags::WHEEL | 0x01FF), -1);
    }

    #[test]
    fn test_duplicate_press_suppressed() {
        let topology = single();
        let mut handler = MouseHandler::new();
        let down = pointer_flags::BUTTON1 | pointer_flags::DOWN;

        let first = handler.handle_mouse_event(down, 10, 10, &topology);
        assert_eq!(first.len(), 1);
        assert!(handler.is_button_pressed(MouseButton::Left));

        assert!(handler.handle_mouse_event(down, 10, 10, &topology).is_empty());

        let up = handler.handle_mouse_event(pointer_flags::BUTTON1, 10, 10, &topology);
        assert_eq!(
            up,
            vec![PointerAction::Button {
                button: MouseButton::Left,
                pressed: false
            }]
        );
    }

    #[test]
    fn test_motion_outside_heads_dropped() {
        let topology = single();
        let mut handler = MouseHandler::new();
        assert!(handler
            .handle_mouse_event(pointer_flags::MOVE, 2000, 10, &topology)
            .is_empty());

        let actions = handler.handle_mouse_event(pointer_flags::MOVE, 100, 50, &topology);
        assert!(matches!(actions[0], PointerAction::Motion(p) if p.x == 100.0 && p.y == 50.0));
    }

    #[test]
    fn test_small_increments_accumulate() {
        let mut handler = MouseHandler::new();
        for _ in 0..10 {
            assert_eq!(
                handler.handle_wheel(Axis::Horizontal, pointer_flags::HWHEEL | 1),
                None
            );
        }
        let event = handler
            .handle_wheel(Axis::Horizontal, pointer_flags::HWHEEL | 2)
            .unwrap();
        assert_eq!(event.value, 1.0);
        assert_eq!(event.discrete, 0);
        assert_eq!(handler.pending_scroll(Axis::Horizontal), 0);
    }

    #[test]
    fn test_vertical_is_inverted() {
        let mut handler = MouseHandler::new();
        let event = handler
            .handle_wheel(Axis::Vertical, pointer_flags::WHEEL | 120)
            .unwrap();
        assert_eq!(event.value, -10.0);
        assert_eq!(event.discrete, -1);
    }

    #[test]
    fn test_extended_buttons() {
        let topology = single();
        let mut handler = MouseHandler::new();
        let actions = handler.handle_extended_mouse_event(
            pointer_x_flags::BUTTON2 | pointer_x_flags::DOWN,
            5,
            5,
            &topology,
        );
        assert_eq!(actions.len(), 2);
        assert!(handler.is_button_pressed(MouseButton::Extra2));
    }
}
