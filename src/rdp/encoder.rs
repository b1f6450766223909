//! Surface encoder
//!
//! Turns an output's damage into surface-bits commands during repaint.
//!
//! Codec preference is RemoteFX, then NSCodec, then raw bitmaps:
//!
//! - **RemoteFX** encodes the damaged rectangles of the whole output in one
//!   command.
//! - **NSCodec** encodes the damage bounding box in one command.
//! - **Raw** sends every damaged rectangle in horizontal bands small enough
//!   for a single fragment, rows bottom-up, wrapped in frame markers.

use tracing::{debug, trace};

use super::error::{PeerError, Result};
use super::settings::PeerSettings;
use super::{PeerConnection, SurfaceCodecs};
use crate::damage::{Rect, Region};
use crate::multimon::ShadowBuffer;

/// `RDP_CODEC_ID_*` values
pub mod codec_id {
    /// Uncompressed bitmap
    pub const NONE: u16 = 0;
    /// NSCodec
    pub const NSCODEC: u16 = 1;
    /// RemoteFX
    pub const REMOTEFX: u16 = 3;
}

/// Per-command header overhead counted against the fragment size
const RAW_COMMAND_OVERHEAD: u32 = 16;

const BYTES_PER_PIXEL: usize = 4;

/// Codec used for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// RemoteFX (RLGR3)
    RemoteFx,
    /// NSCodec
    Nsc,
    /// Uncompressed 32-bpp
    Raw,
}

impl Codec {
    /// Best codec the peer supports
    pub fn select(settings: &PeerSettings) -> Self {
        if settings.remote_fx_codec {
            Codec::RemoteFx
        } else if settings.ns_codec {
            Codec::Nsc
        } else {
            Codec::Raw
        }
    }

    /// Wire codec id
    pub fn id(self) -> u16 {
        match self {
            Codec::RemoteFx => codec_id::REMOTEFX,
            Codec::Nsc => codec_id::NSCODEC,
            Codec::Raw => codec_id::NONE,
        }
    }
}

/// `SURFACECMD_FRAMEACTION_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Start of a frame
    Begin,
    /// End of a frame
    End,
}

/// One surface-bits command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceBits {
    /// Destination in client space
    pub dest: Rect,
    /// Bits per pixel
    pub bpp: u8,
    /// Wire codec id
    pub codec_id: u16,
    /// Bitmap width
    pub width: u32,
    /// Bitmap height
    pub height: u32,
    /// Encoded bitmap
    pub data: Vec<u8>,
}

/// Commands for one repaint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Surface-bits commands in send order
    pub commands: Vec<SurfaceBits>,
    /// Wrap the commands in frame markers
    pub framed: bool,
}

impl EncodedFrame {
    /// Encoded bytes across all commands
    pub fn payload_len(&self) -> usize {
        self.commands.iter().map(|c| c.data.len()).sum()
    }
}

/// Rows per raw command for a rectangle `width` pixels wide
pub fn raw_band_height(width: u32, multifrag_max_request_size: u32) -> u32 {
    let row_cost = RAW_COMMAND_OVERHEAD + width * BYTES_PER_PIXEL as u32;
    (multifrag_max_request_size / row_cost).max(1)
}

/// Raw commands for one rectangle of `shadow`
///
/// `origin` is the output's client-space position.
pub fn encode_raw(
    shadow: &ShadowBuffer,
    rect: Rect,
    multifrag_max_request_size: u32,
    origin: (i32, i32),
) -> Vec<SurfaceBits> {
    let rect = match rect.intersect(&shadow.bounds()) {
        Some(r) if !r.is_empty() => r,
        _ => return Vec::new(),
    };

    let band = raw_band_height(rect.width, multifrag_max_request_size);
    let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
    let stride = shadow.stride();
    let src = shadow.data();

    let mut commands = Vec::with_capacity(rect.height.div_ceil(band) as usize);
    let mut top = rect.y as u32;
    let bottom = rect.bottom() as u32;

    while top < bottom {
        let height = band.min(bottom - top);
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in (top..top + height).rev() {
            let start = row as usize * stride + rect.x as usize * BYTES_PER_PIXEL;
            data.extend_from_slice(&src[start..start + row_bytes]);
        }

        commands.push(SurfaceBits {
            dest: Rect::new(rect.x, top as i32, rect.width, height).translate(origin.0, origin.1),
            bpp: 32,
            codec_id: codec_id::NONE,
            width: rect.width,
            height,
            data,
        });
        top += height;
    }

    commands
}

/// Per-peer encoder state
pub struct SurfaceEncoder {
    codec: Codec,
    codecs: Box<dyn SurfaceCodecs>,
    multifrag_max_request_size: u32,
    size: Option<(u32, u32)>,
    frame_id: u32,
}

impl std::fmt::Debug for SurfaceEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceEncoder")
            .field("codec", &self.codec)
            .field("size", &self.size)
            .field("frame_id", &self.frame_id)
            .finish_non_exhaustive()
    }
}

impl SurfaceEncoder {
    /// Create an encoder for the negotiated settings
    pub fn new(settings: &PeerSettings, codecs: Box<dyn SurfaceCodecs>) -> Self {
        let codec = Codec::select(settings);
        debug!("Surface encoder using {:?}", codec);
        Self {
            codec,
            codecs,
            multifrag_max_request_size: settings.multifrag_max_request_size,
            size: None,
            frame_id: 0,
        }
    }

    /// Selected codec
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Frames sent so far
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Encode `damage` of `shadow`
    pub fn encode(
        &mut self,
        shadow: &ShadowBuffer,
        damage: &Region,
        origin: (i32, i32),
    ) -> Result<EncodedFrame> {
        let region = damage.intersect(&shadow.bounds());
        if region.is_empty() {
            return Ok(EncodedFrame::default());
        }

        let size = (shadow.width(), shadow.height());
        if self.size != Some(size) && self.codec != Codec::Raw {
            self.codecs.reset(size.0, size.1)?;
        }
        self.size = Some(size);

        let frame = match self.codec {
            Codec::RemoteFx => {
                let data = self
                    .codecs
                    .encode_rfx(region.rects(), shadow.data(), size.0, size.1, shadow.stride())?;
                EncodedFrame {
                    commands: vec![SurfaceBits {
                        dest: shadow.bounds().translate(origin.0, origin.1),
                        bpp: 32,
                        codec_id: codec_id::REMOTEFX,
                        width: size.0,
                        height: size.1,
                        data,
                    }],
                    framed: false,
                }
            }
            Codec::Nsc => {
                let extents = region.extents();
                let offset = extents.y as usize * shadow.stride()
                    + extents.x as usize * BYTES_PER_PIXEL;
                let data = shadow
                    .data()
                    .get(offset..)
                    .ok_or_else(|| PeerError::Encoder("damage outside shadow".to_string()))?;
                let data = self.codecs.encode_nsc(
                    data,
                    extents.width,
                    extents.height,
                    shadow.stride(),
                )?;
                EncodedFrame {
                    commands: vec![SurfaceBits {
                        dest: extents.translate(origin.0, origin.1),
                        bpp: 32,
                        codec_id: codec_id::NSCODEC,
                        width: extents.width,
                        height: extents.height,
                        data,
                    }],
                    framed: false,
                }
            }
            Codec::Raw => EncodedFrame {
                commands: region
                    .rects()
                    .iter()
                    .flat_map(|r| encode_raw(shadow, *r, self.multifrag_max_request_size, origin))
                    .collect(),
                framed: true,
            },
        };

        trace!(
            "Encoded {} commands, {} bytes",
            frame.commands.len(),
            frame.payload_len()
        );
        Ok(frame)
    }

    /// Encode and send one repaint
    ///
    /// Returns the number of surface-bits commands sent.
    pub fn send(
        &mut self,
        connection: &mut dyn PeerConnection,
        shadow: &ShadowBuffer,
        damage: &Region,
        origin: (i32, i32),
    ) -> Result<usize> {
        let frame = self.encode(shadow, damage, origin)?;
        if frame.commands.is_empty() {
            return Ok(0);
        }

        if frame.framed {
            self.frame_id = self.frame_id.wrapping_add(1);
            connection.send_frame_marker(FrameAction::Begin, self.frame_id)?;
        }
        for command in &frame.commands {
            connection.send_surface_bits(command)?;
        }
        if frame.framed {
            connection.send_frame_marker(FrameAction::End, self.frame_id)?;
        }

        Ok(frame.commands.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdp::{MockPeerConnection, MockSurfaceCodecs};
    use mockall::predicate::*;
    use mockall::Sequence;

    fn gradient(width: u32, height: u32) -> ShadowBuffer {
        let mut shadow = ShadowBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                shadow.put_pixel(x, y, 0xFF00_0000 | (y << 8) | x);
            }
        }
        shadow
    }

    fn raw_settings(multifrag: u32) -> PeerSettings {
        PeerSettings {
            remote_fx_codec: false,
            ns_codec: false,
            multifrag_max_request_size: multifrag,
            ..PeerSettings::default()
        }
    }

    #[test]
    fn test_codec_preference() {
        let mut settings = PeerSettings {
            remote_fx_codec: true,
            ns_codec: true,
            ..PeerSettings::default()
        };
        assert_eq!(Codec::select(&settings), Codec::RemoteFx);
        settings.remote_fx_codec = false;
        assert_eq!(Codec::select(&settings), Codec::Nsc);
        settings.ns_codec = false;
        assert_eq!(Codec::select(&settings), Codec::Raw);
        assert_eq!(Codec::RemoteFx.id(), 3);
    }

    #[test]
    fn test_band_height() {
        // 100 px wide: 16 + 400 bytes per row
        assert_eq!(raw_band_height(100, 0xFFFF), 0xFFFF / 416);
        assert_eq!(raw_band_height(20000, 0xFFFF), 1);
    }

    #[test]
    fn test_raw_rows_bottom_up() {
        let shadow = gradient(4, 4);
        let commands = encode_raw(&shadow, Rect::new(1, 1, 2, 2), 0xFFFF, (0, 0));
        assert_eq!(commands.len(), 1);

        let cmd = &commands[0];
        assert_eq!(cmd.dest, Rect::new(1, 1, 2, 2));
        assert_eq!(cmd.codec_id, codec_id::NONE);
        assert_eq!(cmd.data.len(), 2 * 2 * 4);

        // First row sent is y = 2
        let first = u32::from_le_bytes([cmd.data[0], cmd.data[1], cmd.data[2], cmd.data[3]]);
        assert_eq!(first, 0xFF00_0000 | (2 << 8) | 1);
        let last = u32::from_le_bytes([cmd.data[12], cmd.data[13], cmd.data[14], cmd.data[15]]);
        assert_eq!(last, 0xFF00_0000 | (1 << 8) | 2);
    }

    #[test]
    fn test_raw_splits_into_bands() {
        let shadow = gradient(64, 64);
        // Two rows of 64 px per command
        let multifrag = 2 * (16 + 64 * 4);
        let commands = encode_raw(&shadow, Rect::new(0, 0, 64, 5), multifrag, (100, 0));

        let heights: Vec<u32> = commands.iter().map(|c| c.height).collect();
        assert_eq!(heights, vec![2, 2, 1]);
        assert_eq!(commands[1].dest, Rect::new(100, 2, 64, 2));
        for c in &commands {
            assert!(c.data.len() as u32 + 16 <= multifrag);
        }
    }

    #[test]
    fn test_raw_clipped_to_shadow() {
        let shadow = gradient(8, 8);
        let commands = encode_raw(&shadow, Rect::new(6, 6, 10, 10), 0xFFFF, (0, 0));
        assert_eq!(commands[0].dest, Rect::new(6, 6, 2, 2));
        assert!(encode_raw(&shadow, Rect::new(20, 20, 4, 4), 0xFFFF, (0, 0)).is_empty());
    }

    #[test]
    fn test_raw_frame_wrapped_in_markers() {
        let shadow = gradient(16, 16);
        let mut encoder =
            SurfaceEncoder::new(&raw_settings(0xFFFF), Box::new(MockSurfaceCodecs::new()));

        let mut seq = Sequence::new();
        let mut conn = MockPeerConnection::new();
        conn.expect_send_frame_marker()
            .with(eq(FrameAction::Begin), eq(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        conn.expect_send_surface_bits()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        conn.expect_send_frame_marker()
            .with(eq(FrameAction::End), eq(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut damage = Region::from_rect(Rect::new(0, 0, 4, 4));
        damage.add(Rect::new(10, 10, 4, 4));
        assert_eq!(encoder.send(&mut conn, &shadow, &damage, (0, 0)).unwrap(), 2);
        assert_eq!(encoder.frame_id(), 1);
    }

    #[test]
    fn test_empty_damage_sends_nothing() {
        let shadow = gradient(16, 16);
        let mut encoder =
            SurfaceEncoder::new(&raw_settings(0xFFFF), Box::new(MockSurfaceCodecs::new()));
        let mut conn = MockPeerConnection::new();
        assert_eq!(encoder.send(&mut conn, &shadow, &Region::new(), (0, 0)).unwrap(), 0);
    }

    #[test]
    fn test_rfx_single_command_over_output() {
        let shadow = gradient(32, 16);
        let mut codecs = MockSurfaceCodecs::new();
        codecs
            .expect_reset()
            .with(eq(32), eq(16))
            .times(1)
            .returning(|_, _| Ok(()));
        codecs
            .expect_encode_rfx()
            .times(2)
            .returning(|rects, _, _, _, _| Ok(vec![rects.len() as u8; 8]));

        let settings = PeerSettings {
            remote_fx_codec: true,
            ..PeerSettings::default()
        };
        let mut encoder = SurfaceEncoder::new(&settings, Box::new(codecs));

        let mut damage = Region::from_rect(Rect::new(0, 0, 4, 4));
        damage.add(Rect::new(20, 8, 4, 4));
        let frame = encoder.encode(&shadow, &damage, (1920, 0)).unwrap();
        assert!(!frame.framed);
        assert_eq!(frame.commands.len(), 1);
        assert_eq!(frame.commands[0].dest, Rect::new(1920, 0, 32, 16));
        assert_eq!(frame.commands[0].codec_id, codec_id::REMOTEFX);

        // Same size: no second reset
        encoder.encode(&shadow, &damage, (1920, 0)).unwrap();
    }

    #[test]
    fn test_nsc_encodes_extents() {
        let shadow = gradient(32, 16);
        let mut codecs = MockSurfaceCodecs::new();
        codecs.expect_reset().returning(|_, _| Ok(()));
        codecs
            .expect_encode_nsc()
            .withf(|data, w, h, stride| {
                // Starts at pixel (2, 3)
                let first = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                first == (0xFF00_0000 | (3 << 8) | 2) && *w == 10 && *h == 5 && *stride == 128
            })
            .times(1)
            .returning(|_, _, _, _| Ok(vec![0xAA; 4]));

        let settings = PeerSettings {
            ns_codec: true,
            ..PeerSettings::default()
        };
        let mut encoder = SurfaceEncoder::new(&settings, Box::new(codecs));
        let mut damage = Region::from_rect(Rect::new(2, 3, 2, 2));
        damage.add(Rect::new(8, 6, 4, 2));

        let frame = encoder.encode(&shadow, &damage, (0, 0)).unwrap();
        assert_eq!(frame.commands[0].dest, Rect::new(2, 3, 10, 5));
        assert_eq!(frame.commands[0].codec_id, codec_id::NSCODEC);
    }
}
