//! Clipboard Bridge
//!
//! Copy and paste between the compositor's selection and the RDP client's
//! CLIPRDR channel, in both directions.
//!
//! # Architecture
//!
//! ```text
//! CLIPRDR worker thread              display thread
//! ━━━━━━━━━━━━━━━━━━━━━              ━━━━━━━━━━━━━━
//!
//! format list ──> ClipboardWorker ──dispatch──> ClipboardBridge ──> set_selection
//!                 (parse, match)                      │
//! data response ─────────────────────dispatch──>      ├─ consumer pipe (writable)
//! data request  ─────────────────────dispatch──>      └─ producer pipe (readable)
//!                                                     │
//!                      ClipboardChannel <─────────────┘
//! ```
//!
//! Each offer is a [`ClipboardSource`] with an explicit state machine.
//! Payloads are transcoded between the wire format and the compositor's
//! mime type by [`formats`]: UTF-16LE text, DIB bitmaps, RTF and CF_HTML.
//!
//! A client that sends a data request while another is outstanding, or a
//! data response nobody asked for, breaks the protocol and is disconnected
//! by the backend ([`ClipboardError::is_protocol_violation`]).

pub mod bridge;
pub mod channel;
pub mod error;
pub mod formats;
pub mod source;
pub mod worker;

pub use bridge::{ClipboardBridge, Watch};
pub use channel::ClipboardChannel;
pub use error::{ClipboardError, Result};
pub use formats::{ClipboardFormat, FormatEntry, Transcoding, FORMATS};
pub use source::{ClipboardSource, PumpStatus, SourceDirection, SourceState};
pub use worker::{ClipboardEvent, ClipboardHost, ClipboardWorker};
