//! Multi-Monitor Topology
//!
//! Turns client monitor reports into compositor heads and outputs.
//!
//! # Overview
//!
//! RDP clients describe their monitors in *client space*: pixel rectangles
//! with the primary monitor at `(0, 0)` and a per-monitor desktop scale
//! factor. The compositor wants *compositor space*: the same monitors at
//! `size / scale`, laid out end to end.
//!
//! Monitor reports arrive three ways and all go through
//! [`Topology::reconcile`]:
//!
//! - the `MonitorDefArray` at connect time,
//! - a single monitor synthesised from the desktop size when the client
//!   sends none,
//! - a display-control monitor-layout PDU at any time after activation.
//!
//! # Head identity
//!
//! Heads are never recreated when an existing one can be reused. Matching
//! runs four passes with progressively weaker predicates:
//!
//! ```text
//! pass 1  both primary
//! pass 2  same width, height and integer scale
//! pass 3  same client position
//! pass 4  anything left
//! ```
//!
//! so swapping two monitors keeps both heads and only moves their outputs.
//!
//! # Layout
//!
//! ```text
//! client space (200% + 100%)          compositor space
//! ┌──────────────┬───────┐            ┌───────┬───────┐
//! │ 3840x2160 P  │1920x  │    ──►     │1920x  │1920x  │
//! │   @200%      │1080   │            │1080 P │1080   │
//! └──────────────┴───────┘            └───────┴───────┘
//! ```
//!
//! Scaling is only possible for single horizontal or vertical strips; other
//! arrangements are laid out unscaled.

mod head;
mod layout;
mod output;
mod reconciler;

pub use head::{Head, HeadId, HeadInfo, MonitorDescriptor, MonitorMode, ScalePolicy};
pub use layout::{compute_layout, detect_layout, CompositorLayout, LayoutKind};
pub use output::{Output, OutputId, OutputInfo, RepaintClock, ShadowBuffer};
pub use reconciler::{validate_monitors, GraphicsReset, ReconcileOutcome, Topology};

use thiserror::Error;

/// Most monitors a client may report
pub const MAX_MONITORS: usize = 16;

/// Smallest monitor width or height a client may report
pub const MIN_MONITOR_SIZE: u32 = 200;

/// Largest monitor width or height a client may report
pub const MAX_MONITOR_SIZE: u32 = 8192;

/// Bound on every monitor edge in client space
///
/// Sixteen maximum-size monitors side by side in either direction.
pub const MAX_MONITOR_COORDINATE: i32 = MAX_MONITORS as i32 * MAX_MONITOR_SIZE as i32;

/// Topology errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Empty monitor list
    #[error("No monitors reported")]
    NoMonitors,

    /// More than [`MAX_MONITORS`] monitors
    #[error("Too many monitors: {0} (maximum {max})", max = MAX_MONITORS)]
    TooManyMonitors(usize),

    /// Zero or several primary monitors
    #[error("Expected exactly one primary monitor, found {0}")]
    PrimaryCount(usize),

    /// Primary monitor not at the client origin
    #[error("Primary monitor at ({x}, {y}) instead of (0, 0)")]
    PrimaryNotAtOrigin {
        /// Reported left edge
        x: i32,
        /// Reported top edge
        y: i32,
    },

    /// Width or height outside [`MIN_MONITOR_SIZE`]..=[`MAX_MONITOR_SIZE`]
    #[error("Invalid monitor dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    /// A monitor edge beyond [`MAX_MONITOR_COORDINATE`]
    #[error("Monitor at ({x}, {y}) lies outside the virtual desktop bounds")]
    OutOfBounds {
        /// Reported left edge
        x: i32,
        /// Reported top edge
        y: i32,
    },

    /// Output already has a head (cloning)
    #[error("Output {0} already has a head attached")]
    CloneRejected(String),

    /// Output id not in the topology
    #[error("Unknown output {0}")]
    UnknownOutput(u32),
}

impl TopologyError {
    /// Whether the error stems from a bad client report (drop the PDU)
    pub fn is_client_violation(&self) -> bool {
        matches!(
            self,
            TopologyError::NoMonitors
                | TopologyError::TooManyMonitors(_)
                | TopologyError::PrimaryCount(_)
                | TopologyError::PrimaryNotAtOrigin { .. }
                | TopologyError::InvalidDimensions(..)
                | TopologyError::OutOfBounds { .. }
        )
    }
}

/// Result type for topology operations
pub type Result<T> = std::result::Result<T, TopologyError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{CompositorEvent, HeadlessCompositor};
    use crate::damage::Rect;

    fn modes(monitors: &[MonitorDescriptor]) -> Vec<MonitorMode> {
        let policy = ScalePolicy {
            hi_dpi: true,
            ..Default::default()
        };
        monitors.iter().map(|m| MonitorMode::new(*m, &policy)).collect()
    }

    // =========================================================================
    // Sanity Check Tests
    // =========================================================================

    #[test]
    fn test_rejects_two_primaries() {
        let monitors = [
            MonitorDescriptor::new(0, 0, 800, 600, true),
            MonitorDescriptor::new(800, 0, 800, 600, true),
        ];
        assert_eq!(
            validate_monitors(&monitors),
            Err(TopologyError::PrimaryCount(2))
        );
    }

    #[test]
    fn test_rejects_offset_primary() {
        let monitors = [MonitorDescriptor::new(10, 0, 800, 600, true)];
        assert!(matches!(
            validate_monitors(&monitors),
            Err(TopologyError::PrimaryNotAtOrigin { x: 10, y: 0 })
        ));
    }

    #[test]
    fn test_rejects_seventeen_monitors() {
        let mut monitors = vec![MonitorDescriptor::new(0, 0, 200, 200, true)];
        for i in 1..17 {
            monitors.push(MonitorDescriptor::new(i * 200, 0, 200, 200, false));
        }
        let err = validate_monitors(&monitors).unwrap_err();
        assert_eq!(err, TopologyError::TooManyMonitors(17));
        assert!(err.is_client_violation());
    }

    #[test]
    fn test_accepts_sixteen_monitors() {
        let mut monitors = vec![MonitorDescriptor::new(0, 0, 200, 200, true)];
        for i in 1..16 {
            monitors.push(MonitorDescriptor::new(i * 200, 0, 200, 200, false));
        }
        assert!(validate_monitors(&monitors).is_ok());
    }

    #[test]
    fn test_rejects_sizes_outside_range() {
        for (w, h) in [(0, 768), (1024, 0), (199, 768), (8193, 768), (1024, 8193)] {
            let monitors = [MonitorDescriptor::new(0, 0, w, h, true)];
            assert_eq!(
                validate_monitors(&monitors),
                Err(TopologyError::InvalidDimensions(w, h))
            );
        }
        let edges = [MonitorDescriptor::new(0, 0, 8192, 200, true)];
        assert!(validate_monitors(&edges).is_ok());
    }

    #[test]
    fn test_rejects_far_away_monitor() {
        let monitors = [
            MonitorDescriptor::new(0, 0, 1024, 768, true),
            MonitorDescriptor::new(2_000_000_000, 0, 4096, 768, false),
        ];
        let err = validate_monitors(&monitors).unwrap_err();
        assert_eq!(
            err,
            TopologyError::OutOfBounds {
                x: 2_000_000_000,
                y: 0
            }
        );
        assert!(err.is_client_violation());

        let negative = [
            MonitorDescriptor::new(0, 0, 1024, 768, true),
            MonitorDescriptor::new(0, -MAX_MONITOR_COORDINATE - 1, 1024, 768, false),
        ];
        assert!(matches!(
            validate_monitors(&negative),
            Err(TopologyError::OutOfBounds { .. })
        ));
    }

    // =========================================================================
    // Reconciliation Tests
    // =========================================================================

    #[test]
    fn test_single_monitor() {
        let mut compositor = HeadlessCompositor::new();
        let mut topology = Topology::new(false, 60_000);

        let outcome = topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 1920, 1080, true)]),
                &mut compositor,
            )
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(topology.heads()[0].name, "rdp-0");
        let output = topology.output(topology.default_output().unwrap()).unwrap();
        assert_eq!(output.rect(), Rect::new(0, 0, 1920, 1080));
        assert_eq!(output.scale, 1);
        assert!(output.shadow.is_some());
        assert_eq!(outcome.reset.width, 1920);
    }

    #[test]
    fn test_resize_keeps_head() {
        let mut compositor = HeadlessCompositor::new();
        let events = compositor.events();
        let mut topology = Topology::new(false, 60_000);

        topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 1920, 1080, true)]),
                &mut compositor,
            )
            .unwrap();
        events.lock().clear();

        let outcome = topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 2560, 1440, true)]),
                &mut compositor,
            )
            .unwrap();

        assert!(outcome.created.is_empty());
        assert_eq!(outcome.changed, vec![HeadId(0)]);
        let log = events.lock();
        assert!(matches!(&log[0], CompositorEvent::HeadChanged(h) if h.width == 2560));
        assert!(log
            .iter()
            .any(|e| matches!(e, CompositorEvent::OutputConfigured(o) if o.width == 2560)));
    }

    #[test]
    fn test_removed_monitor_reaps_head_and_output() {
        let mut compositor = HeadlessCompositor::new();
        let events = compositor.events();
        let mut topology = Topology::new(false, 60_000);

        topology
            .reconcile(
                &modes(&[
                    MonitorDescriptor::new(0, 0, 1920, 1080, true),
                    MonitorDescriptor::new(1920, 0, 1920, 1080, false),
                ]),
                &mut compositor,
            )
            .unwrap();

        let outcome = topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 1920, 1080, true)]),
                &mut compositor,
            )
            .unwrap();

        assert_eq!(outcome.removed, vec![HeadId(1)]);
        assert_eq!(topology.outputs().count(), 1);
        let log = events.lock();
        assert!(log.contains(&CompositorEvent::OutputDestroyed("rdp-1".into())));
        assert!(log.contains(&CompositorEvent::HeadRemoved("rdp-1".into())));
    }

    #[test]
    fn test_head_indices_are_monotonic() {
        let mut compositor = HeadlessCompositor::new();
        let mut topology = Topology::new(false, 60_000);
        let two = modes(&[
            MonitorDescriptor::new(0, 0, 1920, 1080, true),
            MonitorDescriptor::new(1920, 0, 1920, 1080, false),
        ]);
        let one = modes(&[MonitorDescriptor::new(0, 0, 1920, 1080, true)]);

        topology.reconcile(&two, &mut compositor).unwrap();
        topology.reconcile(&one, &mut compositor).unwrap();
        let outcome = topology.reconcile(&two, &mut compositor).unwrap();

        assert_eq!(outcome.created, vec![HeadId(2)]);
        assert!(topology.head_by_name("rdp-2").is_some());
    }

    #[test]
    fn test_scale_change_disables_and_reenables() {
        let mut compositor = HeadlessCompositor::new();
        let events = compositor.events();
        let mut topology = Topology::new(false, 60_000);

        topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 3840, 2160, true)]),
                &mut compositor,
            )
            .unwrap();
        events.lock().clear();

        topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 3840, 2160, true).with_scale_factor(200)]),
                &mut compositor,
            )
            .unwrap();

        let log = events.lock();
        let disabled = log
            .iter()
            .position(|e| matches!(e, CompositorEvent::OutputDisabled(_)))
            .unwrap();
        let enabled = log
            .iter()
            .position(|e| matches!(e, CompositorEvent::OutputEnabled(o) if o.scale == 2))
            .unwrap();
        assert!(disabled < enabled);

        let output = topology.output(topology.default_output().unwrap()).unwrap();
        assert_eq!(output.rect(), Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_remote_app_has_no_shadow() {
        let mut compositor = HeadlessCompositor::new();
        let mut topology = Topology::new(true, 60_000);
        topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 1024, 768, true)]),
                &mut compositor,
            )
            .unwrap();
        assert!(topology.outputs().all(|o| o.shadow.is_none()));
    }

    #[test]
    fn test_clear_destroys_everything() {
        let mut compositor = HeadlessCompositor::new();
        let mut topology = Topology::new(false, 60_000);
        topology
            .reconcile(
                &modes(&[MonitorDescriptor::new(0, 0, 1024, 768, true)]),
                &mut compositor,
            )
            .unwrap();
        topology.clear(&mut compositor);
        assert!(topology.heads().is_empty());
        assert_eq!(topology.outputs().count(), 0);
        assert_eq!(topology.default_output(), None);
    }
}
