//! Client monitor descriptors and heads

use crate::damage::{Rect, Region};

/// Scaling switches taken from the remote-application configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalePolicy {
    /// Honour the client's desktop scale factor at all
    pub hi_dpi: bool,
    /// Keep non-integer client scales
    pub fractional: bool,
    /// Round half-up instead of truncating
    pub roundup: bool,
    /// Forced desktop scale factor in percent (0 = use the client's)
    pub debug_factor: u32,
}

impl ScalePolicy {
    /// Client (float) and compositor (integer) scale for a desktop scale factor
    pub fn scales_for(&self, desktop_scale_factor: u32) -> (f32, u32) {
        if !self.hi_dpi {
            return (1.0, 1);
        }

        let percent = if self.debug_factor != 0 {
            self.debug_factor
        } else if desktop_scale_factor == 0 {
            100
        } else {
            desktop_scale_factor
        };
        let factor = percent as f32 / 100.0;

        let rounded = if self.roundup {
            factor.round()
        } else {
            factor.trunc()
        };
        let client_scale = if self.fractional { factor } else { rounded }.max(1.0);
        let scale = (rounded as u32).max(1);

        (client_scale, scale)
    }
}

/// One monitor as reported by the client (client space)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorDescriptor {
    /// Left edge in client pixels
    pub x: i32,
    /// Top edge in client pixels
    pub y: i32,
    /// Width in client pixels
    pub width: u32,
    /// Height in client pixels
    pub height: u32,
    /// Primary monitor flag
    pub is_primary: bool,
    /// Physical width in millimetres
    pub physical_width: u32,
    /// Physical height in millimetres
    pub physical_height: u32,
    /// Orientation in degrees (0, 90, 180, 270)
    pub orientation: u32,
    /// Desktop scale factor in percent
    pub desktop_scale_factor: u32,
    /// Device scale factor in percent
    pub device_scale_factor: u32,
}

impl MonitorDescriptor {
    /// A 100% monitor without physical attributes
    pub fn new(x: i32, y: i32, width: u32, height: u32, is_primary: bool) -> Self {
        Self {
            x,
            y,
            width,
            height,
            is_primary,
            physical_width: 0,
            physical_height: 0,
            orientation: 0,
            desktop_scale_factor: 100,
            device_scale_factor: 100,
        }
    }

    /// Same descriptor with a different desktop scale factor
    pub fn with_scale_factor(mut self, desktop_scale_factor: u32) -> Self {
        self.desktop_scale_factor = desktop_scale_factor;
        self
    }

    /// Client-space rectangle
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// A descriptor with its derived scales
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorMode {
    /// Client-space descriptor
    pub monitor: MonitorDescriptor,
    /// Integer compositor scale
    pub scale: u32,
    /// Float client scale
    pub client_scale: f32,
}

impl MonitorMode {
    /// Derive scales for `monitor` under `policy`
    pub fn new(monitor: MonitorDescriptor, policy: &ScalePolicy) -> Self {
        let (client_scale, scale) = policy.scales_for(monitor.desktop_scale_factor);
        Self {
            monitor,
            scale,
            client_scale,
        }
    }

    /// Same mode with scaling turned off
    pub fn unscaled(&self) -> Self {
        Self {
            monitor: self.monitor,
            scale: 1,
            client_scale: 1.0,
        }
    }

    /// Whether two modes have the same size and integer scale
    pub fn same_size(&self, other: &MonitorMode) -> bool {
        self.monitor.width == other.monitor.width
            && self.monitor.height == other.monitor.height
            && self.scale == other.scale
    }

    /// Whether two modes sit at the same client position
    pub fn same_position(&self, other: &MonitorMode) -> bool {
        self.monitor.x == other.monitor.x && self.monitor.y == other.monitor.y
    }
}

/// Stable head index, assigned monotonically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeadId(pub u32);

impl HeadId {
    /// Compositor-visible head name
    pub fn name(&self) -> String {
        format!("rdp-{:x}", self.0)
    }
}

impl std::fmt::Display for HeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rdp-{:x}", self.0)
    }
}

/// A monitor identity known to the compositor
#[derive(Debug, Clone)]
pub struct Head {
    /// Stable index
    pub id: HeadId,
    /// `rdp-<index>`
    pub name: String,
    /// Current mode in client space
    pub mode: MonitorMode,
    /// Client-space region covered by this head
    pub region: Region,
    /// Compositor-space rectangle from the last layout
    pub compositor_rect: Rect,
    /// Attached output
    pub output: Option<super::output::OutputId>,
    pub(super) matched: bool,
}

impl Head {
    pub(super) fn new(id: HeadId, mode: MonitorMode) -> Self {
        Self {
            id,
            name: id.name(),
            mode,
            region: Region::from_rect(mode.monitor.rect()),
            compositor_rect: Rect::default(),
            output: None,
            matched: true,
        }
    }

    /// Primary flag
    pub fn is_primary(&self) -> bool {
        self.mode.monitor.is_primary
    }

    /// Client-space rectangle
    pub fn client_rect(&self) -> Rect {
        self.mode.monitor.rect()
    }

    /// Snapshot passed to the compositor
    pub fn info(&self) -> HeadInfo {
        HeadInfo {
            name: self.name.clone(),
            width: self.mode.monitor.width,
            height: self.mode.monitor.height,
            scale: self.mode.scale,
            physical_width: self.mode.monitor.physical_width,
            physical_height: self.mode.monitor.physical_height,
            is_primary: self.is_primary(),
        }
    }
}

/// Head attributes as seen by the compositor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadInfo {
    /// Head name
    pub name: String,
    /// Preferred mode width (client pixels)
    pub width: u32,
    /// Preferred mode height (client pixels)
    pub height: u32,
    /// Integer scale
    pub scale: u32,
    /// Physical width in millimetres
    pub physical_width: u32,
    /// Physical height in millimetres
    pub physical_height: u32,
    /// Primary flag
    pub is_primary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_name_is_hex() {
        assert_eq!(HeadId(0).name(), "rdp-0");
        assert_eq!(HeadId(26).name(), "rdp-1a");
    }

    #[test]
    fn test_scales_without_hi_dpi() {
        let policy = ScalePolicy::default();
        assert_eq!(policy.scales_for(200), (1.0, 1));
    }

    #[test]
    fn test_scales_truncate_and_roundup() {
        let mut policy = ScalePolicy {
            hi_dpi: true,
            ..Default::default()
        };
        assert_eq!(policy.scales_for(150), (1.0, 1));
        assert_eq!(policy.scales_for(200), (2.0, 2));
        assert_eq!(policy.scales_for(0), (1.0, 1));

        policy.roundup = true;
        assert_eq!(policy.scales_for(150), (2.0, 2));
        assert_eq!(policy.scales_for(125), (1.0, 1));
    }

    #[test]
    fn test_scales_fractional() {
        let policy = ScalePolicy {
            hi_dpi: true,
            fractional: true,
            ..Default::default()
        };
        assert_eq!(policy.scales_for(150), (1.5, 1));
    }

    #[test]
    fn test_debug_factor_overrides_client() {
        let policy = ScalePolicy {
            hi_dpi: true,
            debug_factor: 300,
            ..Default::default()
        };
        assert_eq!(policy.scales_for(100), (3.0, 3));
    }
}
