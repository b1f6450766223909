//! Listening sockets and transport classification
//!
//! Three ways in:
//!
//! - TCP on `bind_address:port` (default)
//! - AF_VSOCK, either bound here or adopted from `USE_VSOCK=<fd>`
//! - a single pre-connected socket from `RDP_FD`
//!
//! AF_UNIX and AF_VSOCK sockets are connection-local and may skip TLS.

use nix::sys::socket::{
    self, bind, getsockname, socket, AddressFamily, Backlog, SockFlag, SockType, SockaddrLike,
    SockaddrStorage, VsockAddr,
};
use std::io;
use std::net::TcpListener;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use tracing::{debug, info};

use super::error::{BackendError, Result};
use super::PeerFactory;
use crate::config::Config;
use crate::rdp::PeerConnection;
use crate::security::TlsMaterial;

/// `VMADDR_CID_ANY`
const VMADDR_CID_ANY: u32 = u32::MAX;

const LISTEN_BACKLOG: i32 = 16;

/// A bound listening socket
#[derive(Debug)]
pub enum Listener {
    /// TCP
    Tcp(TcpListener),
    /// AF_VSOCK stream socket
    Vsock(OwnedFd),
}

impl Listener {
    /// Bind the listener described by `config`
    pub fn bind(config: &Config) -> Result<Self> {
        if config.server.vsock {
            return match config.server.vsock_fd {
                Some(fd) => {
                    info!("Using pre-opened vsock listener fd {}", fd);
                    Ok(Listener::Vsock(adopt_fd(fd)?))
                }
                None => Self::bind_vsock(u32::from(config.server.port)),
            };
        }

        let addr = config
            .listen_addr()
            .map_err(|e| BackendError::Listener(e.to_string()))?;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("Listening on {}", addr);
        Ok(Listener::Tcp(listener))
    }

    fn bind_vsock(port: u32) -> Result<Self> {
        let fd = socket(
            AddressFamily::Vsock,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            None,
        )
        .map_err(io::Error::from)?;
        bind(fd.as_raw_fd(), &VsockAddr::new(VMADDR_CID_ANY, port)).map_err(io::Error::from)?;
        listen(fd.as_fd())?;
        info!("Listening on vsock port {}", port);
        Ok(Listener::Vsock(fd))
    }

    /// Accept one pending connection
    ///
    /// Returns the socket and whether it is connection-local, or `None`
    /// when nothing is pending.
    pub fn accept(&self) -> io::Result<Option<(OwnedFd, bool)>> {
        let socket = match self {
            Listener::Tcp(listener) => match listener.accept() {
                Ok((stream, addr)) => {
                    debug!("Accepted TCP connection from {}", addr);
                    OwnedFd::from(stream)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            },
            Listener::Vsock(fd) => match accept4(fd.as_fd()) {
                Ok(socket) => socket,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            },
        };
        let local = is_local_transport(socket.as_fd());
        Ok(Some((socket, local)))
    }

    /// Descriptor to poll for incoming connections
    pub fn try_clone_fd(&self) -> io::Result<OwnedFd> {
        match self {
            Listener::Tcp(listener) => listener.as_fd().try_clone_to_owned(),
            Listener::Vsock(fd) => fd.try_clone(),
        }
    }

    /// Whether accepted sockets are connection-local
    pub fn is_local(&self) -> bool {
        match self {
            Listener::Tcp(listener) => is_local_transport(listener.as_fd()),
            Listener::Vsock(fd) => is_local_transport(fd.as_fd()),
        }
    }
}

/// Take ownership of an inherited descriptor
pub fn adopt_fd(fd: RawFd) -> Result<OwnedFd> {
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD)
        .map_err(|e| BackendError::Listener(format!("fd {} is not open: {}", fd, e)))?;
    // SAFETY: the descriptor was inherited for our exclusive use and was
    // just checked to be open.
    #[allow(unsafe_code)]
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    Ok(owned)
}

/// Whether `fd` is an AF_UNIX or AF_VSOCK socket
pub fn is_local_transport(fd: BorrowedFd<'_>) -> bool {
    match getsockname::<SockaddrStorage>(fd.as_raw_fd()) {
        Ok(addr) => matches!(
            addr.family(),
            Some(AddressFamily::Unix) | Some(AddressFamily::Vsock)
        ),
        Err(e) => {
            debug!("getsockname failed: {}", e);
            false
        }
    }
}

/// Build the connection for the pre-connected `RDP_FD` socket
pub fn connect_env_socket(
    config: &Config,
    factory: &mut dyn PeerFactory,
    tls: Option<&TlsMaterial>,
) -> Result<(Box<dyn PeerConnection>, bool)> {
    let fd = config
        .server
        .peer_fd
        .ok_or_else(|| BackendError::Listener("RDP_FD not set".to_string()))?;
    let socket = adopt_fd(fd)?;
    let local = is_local_transport(socket.as_fd());
    info!("Using pre-connected peer fd {} (local={})", fd, local);
    let connection = factory.create_peer(socket, local, tls)?;
    Ok((connection, local))
}

fn listen(fd: BorrowedFd<'_>) -> io::Result<()> {
    let backlog = Backlog::new(LISTEN_BACKLOG).map_err(io::Error::from)?;
    socket::listen(&fd, backlog).map_err(io::Error::from)
}

fn accept4(fd: BorrowedFd<'_>) -> io::Result<OwnedFd> {
    let raw = socket::accept4(
        fd.as_raw_fd(),
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
    )
    .map_err(io::Error::from)?;
    // SAFETY: accept4 just returned this descriptor and nothing else holds it.
    #[allow(unsafe_code)]
    let owned = unsafe { OwnedFd::from_raw_fd(raw) };
    Ok(owned)
}
