//! Clipboard Format Table and Transcoding
//!
//! Four formats are bridged, identified by a stable index:
//!
//! | idx | wire format          | mime type                  |
//! |-----|----------------------|----------------------------|
//! | 0   | `CF_UNICODETEXT`     | `text/plain;charset=utf-8` |
//! | 1   | `CF_DIB`             | `image/bmp`                |
//! | 2   | "Rich Text Format"   | `text/rtf`                 |
//! | 3   | "HTML Format"        | `text/html`                |
//!
//! RTF and HTML are registered formats whose ids differ per client, so they
//! are matched by name.

use bytes::{BufMut, BytesMut};
use tracing::debug;

use super::error::{ClipboardError, Result};

/// Standard clipboard format ids
pub mod format_id {
    /// Device-independent bitmap
    pub const CF_DIB: u32 = 8;
    /// UTF-16LE text
    pub const CF_UNICODETEXT: u32 = 13;
    /// Id the server advertises for RTF
    pub const CF_PRIVATE_RTF: u32 = 0xC09D;
    /// Id the server advertises for HTML
    pub const CF_PRIVATE_HTML: u32 = 0xC0FD;
}

use format_id::*;

/// Payload conversion applied between wire and compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcoding {
    /// UTF-16LE on the wire, UTF-8 locally
    Utf16Text,
    /// DIB on the wire, BMP file locally
    DibBmp,
    /// Bytes pass through
    Identity,
    /// CF_HTML envelope on the wire, plain HTML locally
    HtmlEnvelope,
}

/// One row of the format table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatEntry {
    /// Stable index
    pub index: usize,
    /// Wire id this server uses
    pub format_id: u32,
    /// Registered name, if the format is matched by name
    pub format_name: Option<&'static str>,
    /// Compositor mime type
    pub mime_type: &'static str,
    /// Payload conversion
    pub transcoding: Transcoding,
}

/// Number of bridged formats
pub const FORMAT_COUNT: usize = 4;

/// The format table
pub const FORMATS: [FormatEntry; FORMAT_COUNT] = [
    FormatEntry {
        index: 0,
        format_id: CF_UNICODETEXT,
        format_name: None,
        mime_type: "text/plain;charset=utf-8",
        transcoding: Transcoding::Utf16Text,
    },
    FormatEntry {
        index: 1,
        format_id: CF_DIB,
        format_name: None,
        mime_type: "image/bmp",
        transcoding: Transcoding::DibBmp,
    },
    FormatEntry {
        index: 2,
        format_id: CF_PRIVATE_RTF,
        format_name: Some("Rich Text Format"),
        mime_type: "text/rtf",
        transcoding: Transcoding::Identity,
    },
    FormatEntry {
        index: 3,
        format_id: CF_PRIVATE_HTML,
        format_name: Some("HTML Format"),
        mime_type: "text/html",
        transcoding: Transcoding::HtmlEnvelope,
    },
];

/// A (format id, format name) pair as carried by a format-list PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardFormat {
    /// Format ID
    pub format_id: u32,
    /// Format name, empty for standard formats
    pub format_name: String,
}

impl ClipboardFormat {
    /// Create a format descriptor
    pub fn new(format_id: u32, format_name: impl Into<String>) -> Self {
        Self {
            format_id,
            format_name: format_name.into(),
        }
    }
}

impl From<&FormatEntry> for ClipboardFormat {
    fn from(entry: &FormatEntry) -> Self {
        Self::new(entry.format_id, entry.format_name.unwrap_or_default())
    }
}

/// Match a client-advertised format against the table
///
/// Named entries match by name only; unnamed entries match by id.
pub fn match_wire_format(format: &ClipboardFormat) -> Option<&'static FormatEntry> {
    FORMATS.iter().find(|entry| match entry.format_name {
        Some(name) => format.format_name == name,
        None => format.format_id == entry.format_id,
    })
}

/// Look up a mime type
pub fn entry_for_mime(mime_type: &str) -> Option<&'static FormatEntry> {
    FORMATS.iter().find(|entry| entry.mime_type == mime_type)
}

/// Look up a stable index
pub fn entry(index: usize) -> Option<&'static FormatEntry> {
    FORMATS.get(index)
}

/// Which way a payload is travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Client data delivered to a compositor consumer
    WireToCompositor,
    /// Compositor data sent to the client
    CompositorToWire,
}

/// Transcode a payload for the given table row
pub fn transcode(
    entry: &FormatEntry,
    direction: TransferDirection,
    data: &[u8],
) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(ClipboardError::EmptyPayload);
    }

    let out = match (entry.transcoding, direction) {
        (Transcoding::Utf16Text, TransferDirection::WireToCompositor) => utf16_to_utf8(data)?,
        (Transcoding::Utf16Text, TransferDirection::CompositorToWire) => utf8_to_utf16(data)?,
        (Transcoding::DibBmp, TransferDirection::WireToCompositor) => dib_to_bmp(data)?,
        (Transcoding::DibBmp, TransferDirection::CompositorToWire) => bmp_to_dib(data)?,
        (Transcoding::Identity, _) => data.to_vec(),
        (Transcoding::HtmlEnvelope, TransferDirection::WireToCompositor) => unwrap_cf_html(data)?,
        (Transcoding::HtmlEnvelope, TransferDirection::CompositorToWire) => wrap_cf_html(data)?,
    };

    debug!(
        "Transcoded {} {:?}: {} -> {} bytes",
        entry.mime_type,
        direction,
        data.len(),
        out.len()
    );
    Ok(out)
}

// ===== Text Conversion Functions =====

/// Convert UTF-16LE to UTF-8, dropping the terminator and trailing line ends
pub fn utf16_to_utf8(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(ClipboardError::InvalidData(
            "UTF-16 data must have even length".to_string(),
        ));
    }

    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();

    let text = String::from_utf16(&units).map_err(|_| ClipboardError::InvalidUtf16)?;
    let trimmed = text.trim_end_matches(['\r', '\n', '\0']);
    if trimmed.is_empty() {
        return Err(ClipboardError::EmptyPayload);
    }
    Ok(trimmed.as_bytes().to_vec())
}

/// Convert UTF-8 text to NUL-terminated UTF-16LE
pub fn utf8_to_utf16(data: &[u8]) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(data).map_err(|_| ClipboardError::InvalidUtf8)?;

    let mut result = Vec::with_capacity((text.len() + 1) * 2);
    for unit in text.encode_utf16() {
        result.extend_from_slice(&unit.to_le_bytes());
    }
    result.extend_from_slice(&[0u8, 0u8]);
    Ok(result)
}

// ===== Bitmap Conversion Functions =====

const BMP_FILE_HEADER_SIZE: usize = 14;
const BITMAPINFOHEADER_SIZE: usize = 40;
const BI_BITFIELDS: u32 = 3;

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Header and size facts of a DIB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DibLayout {
    /// Info header plus color table
    header_size: usize,
    /// Info header plus color table plus rows
    total_size: usize,
}

fn dib_layout(dib: &[u8]) -> Result<DibLayout> {
    if dib.len() < BITMAPINFOHEADER_SIZE {
        return Err(ClipboardError::InvalidData("DIB too small".to_string()));
    }

    let info_size = read_u32(dib, 0) as usize;
    if info_size < BITMAPINFOHEADER_SIZE || info_size > dib.len() {
        return Err(ClipboardError::InvalidData(format!(
            "bad BITMAPINFOHEADER size {}",
            info_size
        )));
    }

    let width = i32::from_le_bytes([dib[4], dib[5], dib[6], dib[7]]).unsigned_abs() as usize;
    let height = i32::from_le_bytes([dib[8], dib[9], dib[10], dib[11]]).unsigned_abs() as usize;
    let bit_count = read_u16(dib, 14) as usize;
    let compression = read_u32(dib, 16);
    let colors_used = read_u32(dib, 32) as usize;

    let color_table = if compression == BI_BITFIELDS && info_size == BITMAPINFOHEADER_SIZE {
        Some(3 * 4)
    } else if colors_used > 0 {
        colors_used.checked_mul(4)
    } else if bit_count <= 8 {
        Some((1usize << bit_count) * 4)
    } else {
        Some(0)
    };

    let header_size = color_table.and_then(|table| info_size.checked_add(table));
    let rows = width
        .checked_mul(bit_count)
        .map(|bits| bits.div_ceil(32))
        .and_then(|words| words.checked_mul(4))
        .and_then(|stride| stride.checked_mul(height));
    match (header_size, rows) {
        (Some(header_size), Some(_)) if header_size > dib.len() => {
            Err(ClipboardError::InvalidData(format!(
                "DIB color table ends at {} of {} bytes",
                header_size,
                dib.len()
            )))
        }
        (Some(header_size), Some(rows)) => match header_size.checked_add(rows) {
            Some(total_size) => Ok(DibLayout {
                header_size,
                total_size,
            }),
            None => Err(dib_too_large(width, height, bit_count)),
        },
        _ => Err(dib_too_large(width, height, bit_count)),
    }
}

fn dib_too_large(width: usize, height: usize, bit_count: usize) -> ClipboardError {
    ClipboardError::InvalidData(format!(
        "DIB {}x{} at {} bpp exceeds addressable size",
        width, height, bit_count
    ))
}

/// Prepend a BMP file header to a DIB
pub fn dib_to_bmp(dib: &[u8]) -> Result<Vec<u8>> {
    let layout = dib_layout(dib)?;
    let dib = &dib[..layout.total_size.min(dib.len())];

    let mut bmp = BytesMut::with_capacity(BMP_FILE_HEADER_SIZE + dib.len());
    bmp.put_slice(b"BM");
    bmp.put_u32_le((BMP_FILE_HEADER_SIZE + dib.len()) as u32);
    bmp.put_u16_le(0);
    bmp.put_u16_le(0);
    bmp.put_u32_le((BMP_FILE_HEADER_SIZE + layout.header_size) as u32);
    bmp.put_slice(dib);
    Ok(bmp.to_vec())
}

/// Strip the BMP file header, keeping exactly the DIB bytes
pub fn bmp_to_dib(bmp: &[u8]) -> Result<Vec<u8>> {
    if bmp.len() < BMP_FILE_HEADER_SIZE + BITMAPINFOHEADER_SIZE || &bmp[..2] != b"BM" {
        return Err(ClipboardError::InvalidData("not a BMP file".to_string()));
    }

    let dib = &bmp[BMP_FILE_HEADER_SIZE..];
    let layout = dib_layout(dib)?;
    if dib.len() < layout.total_size {
        return Err(ClipboardError::InvalidData(format!(
            "BMP truncated: {} of {} bytes",
            dib.len(),
            layout.total_size
        )));
    }
    Ok(dib[..layout.total_size].to_vec())
}

// ===== HTML Conversion Functions =====

const HTML_HEADER_PREFIX: &str = "Version:0.9\r\nStartHTML:-1\r\nEndHTML:-1\r\n";
const FRAGMENT_START: &str = "<!--StartFragment-->";
const FRAGMENT_END: &str = "<!--EndFragment-->";
const OFFSET_PLACEHOLDER: &str = "00000000";

fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

fn rfind_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len())
        .rev()
        .find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Remove `<meta ...charset...>` tags
fn strip_charset_meta(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(start) = find_ascii_ci(html, "<meta", cursor) {
        let Some(close) = html[start..].find('>') else {
            break;
        };
        let end = start + close + 1;
        out.push_str(&html[cursor..start]);
        if find_ascii_ci(&html[start..end], "charset", 0).is_none() {
            out.push_str(&html[start..end]);
        }
        cursor = end;
    }

    out.push_str(&html[cursor..]);
    out
}

/// Split a document into (up to and including `<body ...>`, body, from `</body>`)
fn split_body(html: &str) -> (String, &str, String) {
    let open = find_ascii_ci(html, "<body", 0)
        .and_then(|start| html[start..].find('>').map(|close| start + close + 1));
    let close = rfind_ascii_ci(html, "</body");

    match (open, close) {
        (Some(open), Some(close)) if open <= close => (
            html[..open].to_string(),
            &html[open..close],
            html[close..].to_string(),
        ),
        _ => (
            "<html><body>".to_string(),
            html,
            "</body></html>".to_string(),
        ),
    }
}

/// Wrap an HTML document in a CF_HTML envelope
///
/// The fragment offsets are written as 8-digit placeholders and patched
/// once the body has been assembled.
pub fn wrap_cf_html(data: &[u8]) -> Result<Vec<u8>> {
    let html = std::str::from_utf8(data).map_err(|_| ClipboardError::InvalidUtf8)?;
    let html = strip_charset_meta(html.trim_end_matches('\0'));
    let (head, fragment, tail) = split_body(&html);

    let mut out = String::with_capacity(html.len() + 160);
    out.push_str(HTML_HEADER_PREFIX);
    out.push_str("StartFragment:");
    let start_slot = out.len();
    out.push_str(OFFSET_PLACEHOLDER);
    out.push_str("\r\nEndFragment:");
    let end_slot = out.len();
    out.push_str(OFFSET_PLACEHOLDER);
    out.push_str("\r\n");

    out.push_str(&head);
    out.push_str(FRAGMENT_START);
    out.push_str("\r\n");
    let start_fragment = out.len();
    out.push_str(fragment);
    let end_fragment = out.len();
    out.push_str(FRAGMENT_END);
    out.push_str("\r\n");
    out.push_str(&tail);

    if end_fragment > 99_999_999 {
        return Err(ClipboardError::FormatConversionFailed(
            "HTML too large for CF_HTML offsets".to_string(),
        ));
    }

    out.replace_range(start_slot..start_slot + 8, &format!("{:08}", start_fragment));
    out.replace_range(end_slot..end_slot + 8, &format!("{:08}", end_fragment));
    Ok(out.into_bytes())
}

fn header_offset(text: &str, key: &str) -> Option<usize> {
    text.lines()
        .take_while(|line| !line.starts_with('<'))
        .find_map(|line| line.strip_prefix(key))
        .and_then(|value| value.trim().parse::<usize>().ok())
}

/// Extract the fragment from a CF_HTML envelope and frame it as a document
pub fn unwrap_cf_html(data: &[u8]) -> Result<Vec<u8>> {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let data = &data[..end];
    let text = std::str::from_utf8(data).map_err(|_| ClipboardError::InvalidUtf8)?;

    if !text.starts_with("Version:") {
        return Err(ClipboardError::InvalidData(
            "missing CF_HTML header".to_string(),
        ));
    }

    let start = header_offset(text, "StartFragment:");
    let end = header_offset(text, "EndFragment:");
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) if start <= end && end <= data.len() => (start, end),
        _ => {
            return Err(ClipboardError::InvalidData(
                "bad CF_HTML fragment offsets".to_string(),
            ))
        }
    };

    let fragment = text.get(start..end).ok_or_else(|| {
        ClipboardError::InvalidData("CF_HTML offsets split a character".to_string())
    })?;

    let mut out = Vec::with_capacity(fragment.len() + 26);
    out.extend_from_slice(b"<html><body>");
    out.extend_from_slice(fragment.as_bytes());
    out.extend_from_slice(b"</body></html>");
    Ok(out)
}
