use lamco_rdp_compositor::compositor::{CompositorEvent, HeadlessCompositor};
use lamco_rdp_compositor::damage::Rect;
use lamco_rdp_compositor::input::{to_client, to_compositor};
use lamco_rdp_compositor::multimon::{
    MonitorDescriptor, MonitorMode, ScalePolicy, Topology, TopologyError,
};
use proptest::prelude::*;

fn modes(monitors: &[MonitorDescriptor]) -> Vec<MonitorMode> {
    let policy = ScalePolicy {
        hi_dpi: true,
        ..Default::default()
    };
    monitors.iter().map(|m| MonitorMode::new(*m, &policy)).collect()
}

fn dual() -> Vec<MonitorDescriptor> {
    vec![
        MonitorDescriptor::new(0, 0, 1920, 1080, true),
        MonitorDescriptor::new(1920, 0, 1280, 1024, false),
    ]
}

#[test]
fn test_single_monitor_connect() {
    let mut compositor = HeadlessCompositor::new();
    let mut topology = Topology::new(false, 60_000);

    topology
        .reconcile(
            &modes(&[MonitorDescriptor::new(0, 0, 1920, 1080, true)]),
            &mut compositor,
        )
        .unwrap();

    assert_eq!(topology.heads().len(), 1);
    assert_eq!(topology.heads()[0].name, "rdp-0");
    let output = topology.outputs().next().unwrap();
    assert_eq!((output.x, output.y), (0, 0));
    assert_eq!((output.mode_width, output.mode_height), (1920, 1080));
    assert_eq!(output.scale, 1);
}

#[test]
fn test_dual_monitor_horizontal() {
    let mut compositor = HeadlessCompositor::new();
    let mut topology = Topology::new(false, 60_000);

    topology.reconcile(&modes(&dual()), &mut compositor).unwrap();

    let names: Vec<&str> = topology.heads().iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, ["rdp-0", "rdp-1"]);
    assert_eq!(topology.compositor_extents(), Rect::new(0, 0, 3200, 1080));

    let primary = topology.primary_head().unwrap();
    let output = topology.output(primary.output.unwrap()).unwrap();
    assert_eq!((output.x, output.y), (0, 0));
}

#[test]
fn test_swapped_positions_keep_heads() {
    let mut compositor = HeadlessCompositor::new();
    let events = compositor.events();
    let mut topology = Topology::new(false, 60_000);
    topology.reconcile(&modes(&dual()), &mut compositor).unwrap();
    events.lock().clear();

    let swapped = [
        MonitorDescriptor::new(0, 0, 1920, 1080, true),
        MonitorDescriptor::new(-1280, 0, 1280, 1024, false),
    ];
    let outcome = topology.reconcile(&modes(&swapped), &mut compositor).unwrap();

    assert!(outcome.created.is_empty());
    assert!(outcome.removed.is_empty());
    assert_eq!(outcome.moved.len(), 1);
    assert_eq!(outcome.reset.width, 3200);
    assert_eq!(outcome.reset.monitors, swapped.to_vec());

    let secondary = topology.head_by_name("rdp-1").unwrap();
    assert_eq!(secondary.client_rect(), Rect::new(-1280, 0, 1280, 1024));
    assert!(!events
        .lock()
        .iter()
        .any(|e| matches!(e, CompositorEvent::HeadAdded(_) | CompositorEvent::HeadRemoved(_))));
}

#[test]
fn test_seventeen_monitors_rejected_without_mutation() {
    let mut compositor = HeadlessCompositor::new();
    let events = compositor.events();
    let mut topology = Topology::new(false, 60_000);
    topology.reconcile(&modes(&dual()), &mut compositor).unwrap();
    events.lock().clear();

    let mut monitors = vec![MonitorDescriptor::new(0, 0, 200, 200, true)];
    monitors.extend((1..17).map(|i| MonitorDescriptor::new(i * 200, 0, 200, 200, false)));

    let err = topology
        .reconcile(&modes(&monitors), &mut compositor)
        .unwrap_err();
    assert_eq!(err, TopologyError::TooManyMonitors(17));
    assert_eq!(topology.heads().len(), 2);
    assert!(events.lock().is_empty());
}

#[test]
fn test_out_of_range_geometry_rejected_without_mutation() {
    let mut compositor = HeadlessCompositor::new();
    let events = compositor.events();
    let mut topology = Topology::new(false, 60_000);
    topology.reconcile(&modes(&dual()), &mut compositor).unwrap();
    events.lock().clear();

    let far_away = [
        MonitorDescriptor::new(0, 0, 1024, 768, true),
        MonitorDescriptor::new(2_000_000_000, 0, 1_000_000_000, 768, false),
    ];
    let err = topology
        .reconcile(&modes(&far_away), &mut compositor)
        .unwrap_err();
    assert!(err.is_client_violation());

    let huge = [MonitorDescriptor::new(0, 0, 100_000, 100_000, true)];
    assert_eq!(
        topology.reconcile(&modes(&huge), &mut compositor).unwrap_err(),
        TopologyError::InvalidDimensions(100_000, 100_000)
    );

    let distant = [
        MonitorDescriptor::new(0, 0, 1024, 768, true),
        MonitorDescriptor::new(0, -2_000_000_000, 1024, 768, false),
    ];
    assert!(matches!(
        topology.reconcile(&modes(&distant), &mut compositor),
        Err(TopologyError::OutOfBounds { .. })
    ));

    assert_eq!(topology.heads().len(), 2);
    assert_eq!(topology.compositor_extents(), Rect::new(0, 0, 3200, 1080));
    assert!(events.lock().is_empty());
}

#[test]
fn test_pointer_over_gap_maps_to_nothing() {
    let mut compositor = HeadlessCompositor::new();
    let mut topology = Topology::new(false, 60_000);
    topology.reconcile(&modes(&dual()), &mut compositor).unwrap();

    // Below the shorter secondary
    assert!(to_compositor(&topology, 2000, 1050).is_none());
    assert!(to_compositor(&topology, 2000, 1000).is_some());
}

fn strip() -> impl Strategy<Value = Vec<MonitorDescriptor>> {
    prop::collection::vec((200u32..2000, 200u32..1200), 1..=4).prop_map(|sizes| {
        let mut x = 0i32;
        sizes
            .into_iter()
            .enumerate()
            .map(|(i, (w, h))| {
                let monitor = MonitorDescriptor::new(x, 0, w, h, i == 0);
                x += w as i32;
                monitor
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_heads_match_descriptors(first in strip(), second in strip()) {
        let mut compositor = HeadlessCompositor::new();
        let mut topology = Topology::new(false, 60_000);
        topology.reconcile(&modes(&first), &mut compositor).unwrap();
        topology.reconcile(&modes(&second), &mut compositor).unwrap();

        prop_assert_eq!(topology.heads().len(), second.len());
        for head in topology.heads() {
            let matching = second.iter().filter(|m| **m == head.mode.monitor).count();
            prop_assert_eq!(matching, 1);
        }

        let primaries: Vec<_> = topology.heads().iter().filter(|h| h.is_primary()).collect();
        prop_assert_eq!(primaries.len(), 1);
        prop_assert_eq!((primaries[0].client_rect().x, primaries[0].client_rect().y), (0, 0));
    }

    #[test]
    fn prop_point_round_trip(monitors in strip(), fx in 0.0f64..1.0, fy in 0.0f64..1.0) {
        let mut compositor = HeadlessCompositor::new();
        let mut topology = Topology::new(false, 60_000);
        topology.reconcile(&modes(&monitors), &mut compositor).unwrap();

        for head in topology.heads() {
            let rect = head.client_rect();
            let x = rect.x + (fx * f64::from(rect.width - 1)) as i32;
            let y = rect.y + (fy * f64::from(rect.height - 1)) as i32;

            let point = to_compositor(&topology, x, y).unwrap();
            prop_assert_eq!(Some(point.output), head.output);
            prop_assert_eq!(to_client(&topology, point.output, point.x, point.y), Some((x, y)));
        }
    }
}
