//! Head/output topology reconciliation
//!
//! Brings the backend's heads and outputs into agreement with a fresh list
//! of client monitor descriptors while preserving head identity wherever
//! possible:
//!
//! 1. sanity check (no mutation on failure)
//! 2. four match passes: both primary, same size and scale, same
//!    position, anything left
//! 3. reap unmatched heads
//! 4. create heads for unmatched descriptors
//! 5. compositor-space layout (scales are settled before matching)
//! 6. reattach outputs: rescale, mode, physical size, position
//! 7. report the graphics reset for the client

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::head::{Head, HeadId, MonitorDescriptor, MonitorMode};
use super::layout::{compute_layout, LayoutKind};
use super::output::{Output, OutputId};
use super::{
    Result, TopologyError, MAX_MONITORS, MAX_MONITOR_COORDINATE, MAX_MONITOR_SIZE,
    MIN_MONITOR_SIZE,
};
use crate::compositor::Compositor;
use crate::damage::Rect;

/// Monitor definitions the client must rebuild its surfaces for
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsReset {
    /// Virtual desktop width
    pub width: u32,
    /// Virtual desktop height
    pub height: u32,
    /// Monitors in client space
    pub monitors: Vec<MonitorDescriptor>,
}

/// What a reconciliation did
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Arrangement of the new layout
    pub kind: LayoutKind,
    /// Scaling was requested but dropped
    pub scaling_disabled: bool,
    /// Heads created
    pub created: Vec<HeadId>,
    /// Heads destroyed
    pub removed: Vec<HeadId>,
    /// Existing heads whose mode or scale changed
    pub changed: Vec<HeadId>,
    /// Outputs that were moved
    pub moved: Vec<OutputId>,
    /// Graphics reset to send to the client
    pub reset: GraphicsReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchPass {
    Primary,
    SameSize,
    SamePosition,
    Any,
}

impl MatchPass {
    const ORDER: [MatchPass; 4] = [
        MatchPass::Primary,
        MatchPass::SameSize,
        MatchPass::SamePosition,
        MatchPass::Any,
    ];

    fn matches(self, head: &Head, mode: &MonitorMode) -> bool {
        match self {
            MatchPass::Primary => head.is_primary() && mode.monitor.is_primary,
            MatchPass::SameSize => head.mode.same_size(mode),
            MatchPass::SamePosition => head.mode.same_position(mode),
            MatchPass::Any => true,
        }
    }
}

/// Check a monitor list before anything is touched
pub fn validate_monitors(monitors: &[MonitorDescriptor]) -> Result<()> {
    if monitors.is_empty() {
        return Err(TopologyError::NoMonitors);
    }
    if monitors.len() > MAX_MONITORS {
        return Err(TopologyError::TooManyMonitors(monitors.len()));
    }

    let primaries: Vec<&MonitorDescriptor> =
        monitors.iter().filter(|m| m.is_primary).collect();
    if primaries.len() != 1 {
        return Err(TopologyError::PrimaryCount(primaries.len()));
    }
    let primary = primaries[0];
    if primary.x != 0 || primary.y != 0 {
        return Err(TopologyError::PrimaryNotAtOrigin {
            x: primary.x,
            y: primary.y,
        });
    }

    let size_range = MIN_MONITOR_SIZE..=MAX_MONITOR_SIZE;
    if let Some(bad) = monitors
        .iter()
        .find(|m| !size_range.contains(&m.width) || !size_range.contains(&m.height))
    {
        return Err(TopologyError::InvalidDimensions(bad.width, bad.height));
    }

    // Sizes are bounded above, so the far edges cannot overflow.
    let edge_range = -MAX_MONITOR_COORDINATE..=MAX_MONITOR_COORDINATE;
    if let Some(bad) = monitors.iter().find(|m| {
        !edge_range.contains(&m.x)
            || !edge_range.contains(&m.y)
            || !edge_range.contains(&(m.x + m.width as i32))
            || !edge_range.contains(&(m.y + m.height as i32))
    }) {
        return Err(TopologyError::OutOfBounds { x: bad.x, y: bad.y });
    }

    Ok(())
}

/// Heads and outputs owned by the backend
#[derive(Debug)]
pub struct Topology {
    heads: Vec<Head>,
    outputs: BTreeMap<OutputId, Output>,
    default_output: Option<OutputId>,
    next_head: u32,
    next_output: u32,
    remote_app: bool,
    refresh_mhz: u32,
}

impl Topology {
    /// Empty topology
    pub fn new(remote_app: bool, refresh_mhz: u32) -> Self {
        Self {
            heads: Vec::new(),
            outputs: BTreeMap::new(),
            default_output: None,
            next_head: 0,
            next_output: 1,
            remote_app,
            refresh_mhz,
        }
    }

    /// Heads in creation order
    pub fn heads(&self) -> &[Head] {
        &self.heads
    }

    /// Head by id
    pub fn head(&self, id: HeadId) -> Option<&Head> {
        self.heads.iter().find(|h| h.id == id)
    }

    /// Head by name
    pub fn head_by_name(&self, name: &str) -> Option<&Head> {
        self.heads.iter().find(|h| h.name == name)
    }

    /// The primary head
    pub fn primary_head(&self) -> Option<&Head> {
        self.heads.iter().find(|h| h.is_primary())
    }

    /// Outputs by id
    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    /// Mutable outputs
    pub fn outputs_mut(&mut self) -> impl Iterator<Item = &mut Output> {
        self.outputs.values_mut()
    }

    /// Output by id
    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    /// Mutable output by id
    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.get_mut(&id)
    }

    /// Output attached to the primary head
    pub fn default_output(&self) -> Option<OutputId> {
        self.default_output
    }

    /// Client-space bounding box of all heads
    pub fn client_extents(&self) -> Rect {
        self.heads
            .iter()
            .fold(Rect::default(), |acc, h| acc.union(&h.client_rect()))
    }

    /// Compositor-space bounding box of all outputs
    pub fn compositor_extents(&self) -> Rect {
        self.outputs
            .values()
            .fold(Rect::default(), |acc, o| acc.union(&o.rect()))
    }

    /// Bring heads and outputs into agreement with `modes`
    pub fn reconcile(
        &mut self,
        modes: &[MonitorMode],
        compositor: &mut dyn Compositor,
    ) -> Result<ReconcileOutcome> {
        let descriptors: Vec<MonitorDescriptor> = modes.iter().map(|m| m.monitor).collect();
        validate_monitors(&descriptors)?;

        let layout = compute_layout(modes);
        let modes = &layout.modes;

        let mut outcome = ReconcileOutcome {
            kind: layout.kind,
            scaling_disabled: layout.scaling_disabled,
            created: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
            moved: Vec::new(),
            reset: GraphicsReset {
                width: 0,
                height: 0,
                monitors: descriptors,
            },
        };

        // Match
        for head in &mut self.heads {
            head.matched = false;
        }
        let mut head_for_mode: Vec<Option<HeadId>> = vec![None; modes.len()];

        for pass in MatchPass::ORDER {
            for (mode_index, mode) in modes.iter().enumerate() {
                if head_for_mode[mode_index].is_some() {
                    continue;
                }
                let candidate = self
                    .heads
                    .iter_mut()
                    .find(|h| !h.matched && pass.matches(h, mode));
                if let Some(head) = candidate {
                    debug!("{} matched monitor {} ({:?})", head.name, mode_index, pass);
                    head.matched = true;
                    head_for_mode[mode_index] = Some(head.id);
                    if update_head(head, mode, compositor) {
                        outcome.changed.push(head.id);
                    }
                }
            }
        }

        // Reap
        let (kept, reaped): (Vec<Head>, Vec<Head>) =
            std::mem::take(&mut self.heads).into_iter().partition(|h| h.matched);
        self.heads = kept;
        for head in reaped {
            let id = head.id;
            self.destroy_head(head, compositor);
            outcome.removed.push(id);
        }

        // Create
        for (mode_index, mode) in modes.iter().enumerate() {
            if head_for_mode[mode_index].is_none() {
                let id = self.create_head(*mode, compositor)?;
                head_for_mode[mode_index] = Some(id);
                outcome.created.push(id);
            }
        }

        // Reattach
        for (mode_index, rect) in layout.rects.iter().enumerate() {
            let Some(head_id) = head_for_mode[mode_index] else {
                continue;
            };
            if let Some(head) = self.heads.iter_mut().find(|h| h.id == head_id) {
                head.compositor_rect = *rect;
            }
            if let Some(moved) = self.reattach_output(head_id, rect, compositor) {
                outcome.moved.push(moved);
            }
        }

        self.default_output = self.primary_head().and_then(|h| h.output);
        self.check_postconditions(modes);

        let extents = self.client_extents();
        outcome.reset.width = extents.width;
        outcome.reset.height = extents.height;

        info!(
            "Topology reconciled: {} heads ({} new, {} removed, {} changed), {:?}",
            self.heads.len(),
            outcome.created.len(),
            outcome.removed.len(),
            outcome.changed.len(),
            outcome.kind
        );

        Ok(outcome)
    }

    /// Destroy every head and output
    pub fn clear(&mut self, compositor: &mut dyn Compositor) {
        for head in std::mem::take(&mut self.heads) {
            self.destroy_head(head, compositor);
        }
        self.default_output = None;
    }

    fn create_head(
        &mut self,
        mode: MonitorMode,
        compositor: &mut dyn Compositor,
    ) -> Result<HeadId> {
        let id = HeadId(self.next_head);
        self.next_head += 1;

        let head = Head::new(id, mode);
        compositor.head_added(&head.info());
        debug!("Created head {} {:?}", head.name, head.client_rect());
        let name = head.name.clone();
        self.heads.push(head);

        let output_id = OutputId(self.next_output);
        self.next_output += 1;
        self.outputs
            .insert(output_id, Output::new(output_id, name, self.refresh_mhz));
        self.attach_head(output_id, id)?;

        Ok(id)
    }

    /// Attach a head to an output; an output takes at most one head
    fn attach_head(&mut self, output_id: OutputId, head_id: HeadId) -> Result<()> {
        let output = self
            .outputs
            .get_mut(&output_id)
            .ok_or(TopologyError::UnknownOutput(output_id.0))?;
        if let Some(existing) = output.head {
            if existing != head_id {
                return Err(TopologyError::CloneRejected(output.name.clone()));
            }
        }
        output.head = Some(head_id);

        if let Some(head) = self.heads.iter_mut().find(|h| h.id == head_id) {
            head.output = Some(output_id);
            if head.is_primary() {
                self.default_output = Some(output_id);
            }
        }
        Ok(())
    }

    fn destroy_head(&mut self, head: Head, compositor: &mut dyn Compositor) {
        if let Some(output_id) = head.output {
            if let Some(output) = self.outputs.remove(&output_id) {
                if output.enabled {
                    compositor.output_disabled(&output.name);
                }
                compositor.output_destroyed(&output.name);
            }
            if self.default_output == Some(output_id) {
                self.default_output = None;
            }
        }
        debug!("Destroyed head {}", head.name);
        compositor.head_removed(&head.name);
    }

    fn reattach_output(
        &mut self,
        head_id: HeadId,
        rect: &Rect,
        compositor: &mut dyn Compositor,
    ) -> Option<OutputId> {
        let head = self.heads.iter().find(|h| h.id == head_id)?;
        let mode = head.mode;
        let output_id = head.output?;
        let with_shadow = !self.remote_app;
        let output = self.outputs.get_mut(&output_id)?;

        let first_enable = !output.enabled;
        let moved = output.x != rect.x || output.y != rect.y;

        if first_enable {
            output.scale = mode.scale;
            output.set_mode(mode.monitor.width, mode.monitor.height, with_shadow);
            output.physical_width = mode.monitor.physical_width;
            output.physical_height = mode.monitor.physical_height;
            output.x = rect.x;
            output.y = rect.y;
            output.enabled = true;
            compositor.output_created(&output.info());
            compositor.output_enabled(&output.info());
        } else {
            let rescale = output.scale != mode.scale;
            if rescale {
                compositor.output_disabled(&output.name);
                output.enabled = false;
                output.scale = mode.scale;
            }
            let remode = output.mode_width != mode.monitor.width
                || output.mode_height != mode.monitor.height;
            output.set_mode(mode.monitor.width, mode.monitor.height, with_shadow);
            output.physical_width = mode.monitor.physical_width;
            output.physical_height = mode.monitor.physical_height;
            output.x = rect.x;
            output.y = rect.y;
            if rescale {
                output.enabled = true;
                compositor.output_enabled(&output.info());
            } else if remode || moved {
                compositor.output_configured(&output.info());
            }
        }

        assert_eq!(
            (output.width(), output.height()),
            (rect.width, rect.height),
            "output {} does not match its compositor-space layout",
            output.name
        );

        (moved && !first_enable).then_some(output_id)
    }

    fn check_postconditions(&self, modes: &[MonitorMode]) {
        let primaries: Vec<&Head> = self.heads.iter().filter(|h| h.is_primary()).collect();
        assert_eq!(primaries.len(), 1, "exactly one primary head");
        assert_eq!(
            (primaries[0].mode.monitor.x, primaries[0].mode.monitor.y),
            (0, 0),
            "primary head at client origin"
        );
        assert_eq!(self.heads.len(), modes.len(), "one head per monitor");
        if self.heads.iter().any(|h| h.output.is_none()) {
            warn!("Head without output after reconciliation");
        }
    }
}

fn update_head(head: &mut Head, mode: &MonitorMode, compositor: &mut dyn Compositor) -> bool {
    let old = head.mode;
    head.mode = *mode;
    head.region = crate::damage::Region::from_rect(mode.monitor.rect());

    let resized = old.monitor.width != mode.monitor.width
        || old.monitor.height != mode.monitor.height;
    let rescaled = old.scale != mode.scale || old.client_scale != mode.client_scale;

    if resized || rescaled {
        debug!(
            "{} changed: {}x{}@{} -> {}x{}@{}",
            head.name,
            old.monitor.width,
            old.monitor.height,
            old.scale,
            mode.monitor.width,
            mode.monitor.height,
            mode.scale
        );
        compositor.head_changed(&head.info());
    }
    resized || rescaled
}
