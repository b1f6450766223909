//! RDP backend server side
//!
//! The backend runs on the compositor's display thread inside a calloop
//! event loop. Everything the protocol library produces reaches it either
//! as readiness on a peer fd or as a task posted through the peer's
//! [`Dispatcher`](crate::dispatch::Dispatcher).
//!
//! ```text
//! Listener ──accept──> PeerFactory ──> Peer ──> RdpBackend
//!                                        │          ├─> Topology ─> Compositor
//!   channel workers ──DispatchHandle──────┘          ├─> ClipboardBridge
//!                                                   └─> SurfaceEncoder
//! ```
//!
//! # Example
//!
//! ```no_run
//! use calloop::EventLoop;
//! use lamco_rdp_compositor::compositor::HeadlessCompositor;
//! use lamco_rdp_compositor::config::Config;
//! use lamco_rdp_compositor::server::{PeerFactory, RdpBackend};
//!
//! fn run(factory: Box<dyn PeerFactory>) -> anyhow::Result<()> {
//!     let mut event_loop = EventLoop::<RdpBackend>::try_new()?;
//!     let config = Config::default().apply_env();
//!     let mut backend = RdpBackend::new(
//!         config,
//!         Box::new(HeadlessCompositor::new()),
//!         event_loop.handle(),
//!     );
//!     backend.start(factory)?;
//!     event_loop.run(None, &mut backend, |_| {})?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod listener;

pub use backend::RdpBackend;
pub use error::{BackendError, Result};
pub use listener::Listener;

use std::os::fd::OwnedFd;

use crate::rdp::PeerConnection;
use crate::security::TlsMaterial;

/// Protocol library constructor for accepted sockets
pub trait PeerFactory {
    /// Wrap `socket` in a protocol library peer
    ///
    /// `tls` is `None` when the transport is connection-local and no
    /// certificate was configured.
    fn create_peer(
        &mut self,
        socket: OwnedFd,
        transport_is_local: bool,
        tls: Option<&TlsMaterial>,
    ) -> Result<Box<dyn PeerConnection>>;
}
