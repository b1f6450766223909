//! Compositor-space layout calculation
//!
//! Client monitors are laid out in client pixels. With integer scaling the
//! compositor sees each monitor at `size / scale`, so positions have to be
//! recomputed. That is only well defined when the monitors form a single
//! horizontal or vertical strip; any other arrangement is laid out
//! unscaled.

use tracing::{debug, warn};

use super::head::MonitorMode;
use crate::damage::Rect;

/// Shape of a monitor arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// A single monitor
    Single,
    /// Monitors side by side, left to right
    HorizontalStrip,
    /// Monitors stacked top to bottom
    VerticalStrip,
    /// Anything else
    Complex,
}

/// Result of laying out a set of monitor modes
#[derive(Debug, Clone)]
pub struct CompositorLayout {
    /// Detected arrangement
    pub kind: LayoutKind,
    /// Modes after scaling decisions, in input order
    pub modes: Vec<MonitorMode>,
    /// Compositor-space rectangle per mode, in input order
    pub rects: Vec<Rect>,
    /// Scaling was requested but had to be dropped
    pub scaling_disabled: bool,
}

impl CompositorLayout {
    /// Compositor-space bounding box
    pub fn extents(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, rect| acc.union(rect))
    }
}

/// Classify the arrangement of `modes`
pub fn detect_layout(modes: &[MonitorMode]) -> LayoutKind {
    match modes.len() {
        0 | 1 => LayoutKind::Single,
        _ if is_horizontal_strip(modes) => LayoutKind::HorizontalStrip,
        _ if is_vertical_strip(modes) => LayoutKind::VerticalStrip,
        _ => LayoutKind::Complex,
    }
}

fn sorted_rects(modes: &[MonitorMode], key: impl Fn(&Rect) -> i32) -> Vec<Rect> {
    let mut rects: Vec<Rect> = modes.iter().map(|m| m.monitor.rect()).collect();
    rects.sort_by_key(|r| key(r));
    rects
}

fn is_horizontal_strip(modes: &[MonitorMode]) -> bool {
    let rects = sorted_rects(modes, |r| r.x);
    rects.windows(2).all(|pair| {
        let (prev, next) = (pair[0], pair[1]);
        next.x == prev.right() && next.y < prev.bottom() && prev.y < next.bottom()
    })
}

fn is_vertical_strip(modes: &[MonitorMode]) -> bool {
    let rects = sorted_rects(modes, |r| r.y);
    rects.windows(2).all(|pair| {
        let (prev, next) = (pair[0], pair[1]);
        next.y == prev.bottom() && next.x < prev.right() && prev.x < next.right()
    })
}

/// Compute compositor-space rectangles for `modes`
///
/// The primary monitor always lands at compositor `(0, 0)`. Unscaled
/// layouts keep client positions verbatim.
pub fn compute_layout(modes: &[MonitorMode]) -> CompositorLayout {
    let kind = detect_layout(modes);
    let scaled = modes.iter().any(|m| m.scale != 1);

    if !scaled {
        return CompositorLayout {
            kind,
            modes: modes.to_vec(),
            rects: modes.iter().map(|m| m.monitor.rect()).collect(),
            scaling_disabled: false,
        };
    }

    match kind {
        LayoutKind::Single | LayoutKind::HorizontalStrip => CompositorLayout {
            kind,
            modes: modes.to_vec(),
            rects: lay_out_strip(modes, Axis::Horizontal),
            scaling_disabled: false,
        },
        LayoutKind::VerticalStrip => CompositorLayout {
            kind,
            modes: modes.to_vec(),
            rects: lay_out_strip(modes, Axis::Vertical),
            scaling_disabled: false,
        },
        LayoutKind::Complex => {
            warn!("Complex monitor placement cannot be scaled, disabling scaling");
            let modes: Vec<MonitorMode> = modes.iter().map(MonitorMode::unscaled).collect();
            CompositorLayout {
                kind,
                rects: modes.iter().map(|m| m.monitor.rect()).collect(),
                modes,
                scaling_disabled: true,
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

fn lay_out_strip(modes: &[MonitorMode], axis: Axis) -> Vec<Rect> {
    let scaled: Vec<Rect> = modes
        .iter()
        .map(|m| {
            let s = m.scale.max(1);
            Rect::new(
                m.monitor.x / s as i32,
                m.monitor.y / s as i32,
                m.monitor.width / s,
                m.monitor.height / s,
            )
        })
        .collect();

    let along = |m: &MonitorMode| match axis {
        Axis::Horizontal => m.monitor.x,
        Axis::Vertical => m.monitor.y,
    };

    let mut order: Vec<usize> = (0..modes.len()).collect();
    order.sort_by_key(|&i| along(&modes[i]));

    let primary = order
        .iter()
        .position(|&i| modes[i].monitor.is_primary)
        .unwrap_or(0);

    let mut rects = scaled.clone();
    let place = |rect: &mut Rect, offset: i32| match axis {
        Axis::Horizontal => rect.x = offset,
        Axis::Vertical => rect.y = offset,
    };
    let extent = |rect: &Rect| match axis {
        Axis::Horizontal => rect.width as i32,
        Axis::Vertical => rect.height as i32,
    };

    place(&mut rects[order[primary]], 0);

    // Walk away from the primary in both directions.
    let mut offset = extent(&rects[order[primary]]);
    for &i in &order[primary + 1..] {
        place(&mut rects[i], offset);
        offset += extent(&rects[i]);
    }

    let mut offset = 0;
    for &i in order[..primary].iter().rev() {
        offset -= extent(&rects[i]);
        place(&mut rects[i], offset);
    }

    debug!("Strip layout: {:?}", rects);
    rects
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::head::{MonitorDescriptor, ScalePolicy};

    fn mode(x: i32, y: i32, w: u32, h: u32, primary: bool, scale_pct: u32) -> MonitorMode {
        let policy = ScalePolicy {
            hi_dpi: true,
            ..Default::default()
        };
        MonitorMode::new(
            MonitorDescriptor::new(x, y, w, h, primary).with_scale_factor(scale_pct),
            &policy,
        )
    }

    #[test]
    fn test_detect_horizontal() {
        let modes = [
            mode(0, 0, 1920, 1080, true, 100),
            mode(1920, 0, 1280, 1024, false, 100),
        ];
        assert_eq!(detect_layout(&modes), LayoutKind::HorizontalStrip);
    }

    #[test]
    fn test_detect_vertical() {
        let modes = [
            mode(0, 0, 1920, 1080, true, 100),
            mode(0, -1024, 1280, 1024, false, 100),
        ];
        assert_eq!(detect_layout(&modes), LayoutKind::VerticalStrip);
    }

    #[test]
    fn test_detect_complex_gap() {
        let modes = [
            mode(0, 0, 1920, 1080, true, 100),
            mode(2000, 0, 1280, 1024, false, 100),
        ];
        assert_eq!(detect_layout(&modes), LayoutKind::Complex);
    }

    #[test]
    fn test_detect_complex_l_shape() {
        let modes = [
            mode(0, 0, 1000, 1000, true, 100),
            mode(1000, 0, 1000, 1000, false, 100),
            mode(0, 1000, 1000, 1000, false, 100),
        ];
        assert_eq!(detect_layout(&modes), LayoutKind::Complex);
    }

    #[test]
    fn test_unscaled_keeps_client_rects() {
        let modes = [
            mode(0, 0, 1920, 1080, true, 100),
            mode(1920, 0, 1280, 1024, false, 100),
        ];
        let layout = compute_layout(&modes);
        assert_eq!(layout.rects[1], Rect::new(1920, 0, 1280, 1024));
        assert_eq!(layout.extents(), Rect::new(0, 0, 3200, 1080));
    }

    #[test]
    fn test_scaled_horizontal_strip() {
        let modes = [
            mode(-1920, 0, 1920, 1080, false, 100),
            mode(0, 0, 3840, 2160, true, 200),
            mode(3840, 0, 2560, 1440, false, 200),
        ];
        let layout = compute_layout(&modes);
        assert!(!layout.scaling_disabled);
        assert_eq!(layout.rects[0], Rect::new(-1920, 0, 1920, 1080));
        assert_eq!(layout.rects[1], Rect::new(0, 0, 1920, 1080));
        assert_eq!(layout.rects[2], Rect::new(1920, 0, 1280, 720));
    }

    #[test]
    fn test_scaled_vertical_strip() {
        let modes = [
            mode(0, 0, 3840, 2160, true, 200),
            mode(0, 2160, 1920, 1080, false, 100),
        ];
        let layout = compute_layout(&modes);
        assert_eq!(layout.kind, LayoutKind::VerticalStrip);
        assert_eq!(layout.rects[0], Rect::new(0, 0, 1920, 1080));
        assert_eq!(layout.rects[1], Rect::new(0, 1080, 1920, 1080));
    }

    #[test]
    fn test_complex_scaled_falls_back() {
        let modes = [
            mode(0, 0, 2000, 2000, true, 200),
            mode(2000, 0, 1000, 1000, false, 100),
            mode(0, 2000, 1000, 1000, false, 100),
        ];
        let layout = compute_layout(&modes);
        assert!(layout.scaling_disabled);
        assert!(layout.modes.iter().all(|m| m.scale == 1));
        assert_eq!(layout.rects[0], Rect::new(0, 0, 2000, 2000));
    }
}
