//! # lamco-rdp-compositor
//!
//! RDP backend core for a Wayland compositor: the compositor exposes its
//! desktop to RDP clients, one seat per client, with multi-monitor layouts
//! driven by the client.
//!
//! The RDP protocol engine and the compositor framework are external
//! collaborators behind traits ([`rdp::PeerConnection`],
//! [`server::PeerFactory`], [`compositor::Compositor`],
//! [`clipboard::ClipboardChannel`]). This crate owns what sits between
//! them.
//!
//! # Architecture
//!
//! ```text
//! lamco-rdp-compositor
//!   ├─> server     calloop backend, listeners, per-peer event sources
//!   ├─> rdp        peer lifecycle, capability negotiation, surface encoder
//!   ├─> multimon   head/output topology and the four-pass reconciler
//!   ├─> input      scancodes, pointer, wheel, keymaps
//!   ├─> clipboard  CLIPRDR <-> selection bridge with per-offer state machine
//!   ├─> dispatch   worker thread -> display thread task queue
//!   ├─> ids        bounded id tables for windows, surfaces, pools, buffers
//!   ├─> shm        named shared-memory pools
//!   └─> security   TLS material and self-signed certificates
//! ```
//!
//! # Threads
//!
//! Protocol channel workers never touch compositor state. They post
//! closures through [`dispatch::DispatchHandle`]; the display thread runs
//! them from its event loop, one per wake-up.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Clipboard redirection
pub mod clipboard;

/// Host compositor interface
pub mod compositor;

/// Configuration
pub mod config;

/// Rectangles and damage
pub mod damage;

/// Cross-thread dispatch
pub mod dispatch;

/// Identifier allocation
pub mod ids;

/// Input translation
pub mod input;

/// Monitor topology
pub mod multimon;

/// Peer plumbing
pub mod rdp;

/// TLS material
pub mod security;

/// Backend and listeners
pub mod server;

/// Shared-memory pools
pub mod shm;

/// Operator utilities
pub mod utils;
