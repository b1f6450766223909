//! Client ↔ compositor coordinate mapping
//!
//! Client coordinates are resolved against head regions: the head whose
//! client-space region contains the point decides which output the point
//! lands on and which scale applies.
//!
//! ```text
//! compositor = (client - head.origin) / client_scale + output.origin
//! client     = (compositor - output.origin) * client_scale + head.origin
//! ```
//!
//! A client point outside every head maps to nothing, which is how pointer
//! events over gaps between monitors are dropped.

use crate::damage::Rect;
use crate::multimon::{OutputId, Topology};

/// A point in compositor space with the output it falls on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorPoint {
    /// Output under the point
    pub output: OutputId,
    /// Compositor-space x
    pub x: f64,
    /// Compositor-space y
    pub y: f64,
}

/// Map a client-space point to compositor space
pub fn to_compositor(topology: &Topology, x: i32, y: i32) -> Option<CompositorPoint> {
    let head = topology.heads().iter().find(|h| h.region.contains(x, y))?;
    let output = topology.output(head.output?)?;
    let origin = head.client_rect();
    let scale = f64::from(head.mode.client_scale);

    Some(CompositorPoint {
        output: output.id,
        x: f64::from(x - origin.x) / scale + f64::from(output.x),
        y: f64::from(y - origin.y) / scale + f64::from(output.y),
    })
}

/// Map a client-space rectangle to compositor space
///
/// The rectangle's origin selects the head; the size is scaled with it.
pub fn rect_to_compositor(topology: &Topology, rect: &Rect) -> Option<(OutputId, Rect)> {
    let point = to_compositor(topology, rect.x, rect.y)?;
    let head = topology
        .heads()
        .iter()
        .find(|h| h.output == Some(point.output))?;
    let scale = head.mode.client_scale;

    Some((
        point.output,
        Rect::new(
            point.x.round() as i32,
            point.y.round() as i32,
            (rect.width as f32 / scale).round() as u32,
            (rect.height as f32 / scale).round() as u32,
        ),
    ))
}

/// Map a compositor-space point on `output` back to client space
pub fn to_client(topology: &Topology, output: OutputId, x: f64, y: f64) -> Option<(i32, i32)> {
    let output = topology.output(output)?;
    let head = topology.head(output.head?)?;
    let origin = head.client_rect();
    let scale = f64::from(head.mode.client_scale);

    Some((
        ((x - f64::from(output.x)) * scale).round() as i32 + origin.x,
        ((y - f64::from(output.y)) * scale).round() as i32 + origin.y,
    ))
}

/// Map a compositor-space rectangle on `output` back to client space
pub fn rect_to_client(topology: &Topology, output: OutputId, rect: &Rect) -> Option<Rect> {
    let (x, y) = to_client(topology, output, f64::from(rect.x), f64::from(rect.y))?;
    let head = topology.head(topology.output(output)?.head?)?;
    let scale = head.mode.client_scale;

    Some(Rect::new(
        x,
        y,
        (rect.width as f32 * scale).round() as u32,
        (rect.height as f32 * scale).round() as u32,
    ))
}
