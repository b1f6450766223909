//! Compositor outputs backing RDP heads
//!
//! An [`Output`] is the compositor-side surface for one head. Outside
//! remote-application mode it owns a BGRA shadow framebuffer in native
//! (client) pixels that the frame encoder reads from.

use std::time::{Duration, Instant};

use super::head::HeadId;
use crate::damage::{Rect, Region};
use crate::rdp::PeerId;

/// Stable output identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

/// Output attributes as seen by the compositor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// Output name (same as its head)
    pub name: String,
    /// Compositor-space left edge
    pub x: i32,
    /// Compositor-space top edge
    pub y: i32,
    /// Compositor-space width
    pub width: u32,
    /// Compositor-space height
    pub height: u32,
    /// Native mode width (client pixels)
    pub mode_width: u32,
    /// Native mode height (client pixels)
    pub mode_height: u32,
    /// Integer scale
    pub scale: u32,
    /// Refresh rate in mHz
    pub refresh_mhz: u32,
}

/// BGRA little-endian framebuffer, top-down rows
#[derive(Debug, Clone)]
pub struct ShadowBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ShadowBuffer {
    /// Zero-filled buffer
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    /// Raw pixel bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Full buffer rectangle
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Write one pixel as `0xAARRGGBB`
    pub fn put_pixel(&mut self, x: u32, y: u32, argb: u32) {
        if x < self.width && y < self.height {
            let offset = y as usize * self.stride() + x as usize * 4;
            self.data[offset..offset + 4].copy_from_slice(&argb.to_le_bytes());
        }
    }
}

/// Refresh-rate clock for the finish-frame timer
#[derive(Debug, Clone, Copy)]
pub struct RepaintClock {
    refresh_mhz: u32,
    last_presentation: Option<Instant>,
}

impl RepaintClock {
    /// Clock for a refresh rate in mHz
    pub fn new(refresh_mhz: u32) -> Self {
        Self {
            refresh_mhz: refresh_mhz.max(1),
            last_presentation: None,
        }
    }

    /// Refresh rate in mHz
    pub fn refresh_mhz(&self) -> u32 {
        self.refresh_mhz
    }

    /// One refresh period
    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000_000 / u64::from(self.refresh_mhz))
    }

    /// Delay until the next vsync after `now`
    ///
    /// Missed vsyncs are skipped: the target is the first multiple of the
    /// period after the last presentation that lies in the future.
    pub fn delay_to_next_vsync(&self, now: Instant) -> Duration {
        let period = self.period();
        let Some(last) = self.last_presentation else {
            return Duration::ZERO;
        };

        let elapsed = now.saturating_duration_since(last);
        let period_ns = period.as_nanos().max(1);
        let periods = elapsed.as_nanos() / period_ns + 1;
        let target = Duration::from_nanos((periods * period_ns) as u64);
        target.saturating_sub(elapsed)
    }

    /// Record a presentation at `when`
    pub fn presented(&mut self, when: Instant) {
        self.last_presentation = Some(when);
    }
}

/// Compositor-side output for a head
#[derive(Debug)]
pub struct Output {
    /// Identifier
    pub id: OutputId,
    /// Name, same as the attached head's
    pub name: String,
    /// Attached head
    pub head: Option<HeadId>,
    /// Compositor-space left edge
    pub x: i32,
    /// Compositor-space top edge
    pub y: i32,
    /// Native mode width
    pub mode_width: u32,
    /// Native mode height
    pub mode_height: u32,
    /// Integer scale
    pub scale: u32,
    /// Physical width in millimetres
    pub physical_width: u32,
    /// Physical height in millimetres
    pub physical_height: u32,
    /// Whether the compositor has the output enabled
    pub enabled: bool,
    /// Shadow framebuffer (absent in remote-application mode)
    pub shadow: Option<ShadowBuffer>,
    /// Peers receiving this output
    pub peers: Vec<PeerId>,
    /// Finish-frame clock
    pub repaint: RepaintClock,
    /// Client asked to stop screen updates
    pub repaint_suppressed: bool,
    /// Pending damage in native output pixels
    pub damage: Region,
}

impl Output {
    pub(super) fn new(id: OutputId, name: String, refresh_mhz: u32) -> Self {
        Self {
            id,
            name,
            head: None,
            x: 0,
            y: 0,
            mode_width: 0,
            mode_height: 0,
            scale: 0,
            physical_width: 0,
            physical_height: 0,
            enabled: false,
            shadow: None,
            peers: Vec::new(),
            repaint: RepaintClock::new(refresh_mhz),
            repaint_suppressed: false,
            damage: Region::new(),
        }
    }

    /// Compositor-space width
    pub fn width(&self) -> u32 {
        self.mode_width / self.scale.max(1)
    }

    /// Compositor-space height
    pub fn height(&self) -> u32 {
        self.mode_height / self.scale.max(1)
    }

    /// Compositor-space rectangle
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width(), self.height())
    }

    /// Switch the native mode, reallocating the shadow buffer if present
    pub(super) fn set_mode(&mut self, width: u32, height: u32, with_shadow: bool) {
        let resized = self.mode_width != width || self.mode_height != height;
        self.mode_width = width;
        self.mode_height = height;
        if with_shadow && (resized || self.shadow.is_none()) {
            self.shadow = Some(ShadowBuffer::new(width, height));
        }
        if resized {
            self.damage = Region::from_rect(Rect::new(0, 0, width, height));
        }
    }

    /// Mark the whole output damaged
    pub fn damage_all(&mut self) {
        self.damage = Region::from_rect(Rect::new(0, 0, self.mode_width, self.mode_height));
    }

    /// Attach a peer if not already attached
    pub fn attach_peer(&mut self, peer: PeerId) {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    /// Detach a peer
    pub fn detach_peer(&mut self, peer: PeerId) {
        self.peers.retain(|p| *p != peer);
    }

    /// Snapshot passed to the compositor
    pub fn info(&self) -> OutputInfo {
        OutputInfo {
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            width: self.width(),
            height: self.height(),
            mode_width: self.mode_width,
            mode_height: self.mode_height,
            scale: self.scale,
            refresh_mhz: self.repaint.refresh_mhz(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_scaled_size() {
        let mut output = Output::new(OutputId(1), "rdp-0".into(), 60_000);
        output.scale = 2;
        output.set_mode(3840, 2160, true);
        assert_eq!(output.width(), 1920);
        assert_eq!(output.height(), 1080);
        assert_eq!(output.shadow.as_ref().map(|s| s.width()), Some(3840));
        assert_eq!(output.damage.extents(), Rect::new(0, 0, 3840, 2160));
    }

    #[test]
    fn test_no_shadow_in_remote_app_mode() {
        let mut output = Output::new(OutputId(1), "rdp-0".into(), 60_000);
        output.scale = 1;
        output.set_mode(800, 600, false);
        assert!(output.shadow.is_none());
    }

    #[test]
    fn test_shadow_put_pixel() {
        let mut shadow = ShadowBuffer::new(2, 2);
        shadow.put_pixel(1, 1, 0xFF11_2233);
        assert_eq!(&shadow.data()[12..16], &[0x33, 0x22, 0x11, 0xFF]);
        shadow.put_pixel(5, 5, 0);
    }

    #[test]
    fn test_repaint_first_frame_immediate() {
        let clock = RepaintClock::new(60_000);
        assert_eq!(clock.delay_to_next_vsync(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_repaint_coalesces_missed_frames() {
        let mut clock = RepaintClock::new(50_000); // 20ms period
        let start = Instant::now();
        clock.presented(start);

        let delay = clock.delay_to_next_vsync(start + Duration::from_millis(5));
        assert_eq!(delay, Duration::from_millis(15));

        // Two and a half periods late: aim for the third vsync
        let delay = clock.delay_to_next_vsync(start + Duration::from_millis(50));
        assert_eq!(delay, Duration::from_millis(10));
    }

    #[test]
    fn test_peer_attach_is_idempotent() {
        let mut output = Output::new(OutputId(1), "rdp-0".into(), 60_000);
        output.attach_peer(PeerId(3));
        output.attach_peer(PeerId(3));
        assert_eq!(output.peers.len(), 1);
        output.detach_peer(PeerId(3));
        assert!(output.peers.is_empty());
    }
}
