//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Listener and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the TCP listener to
    pub bind_address: String,

    /// TCP port (ignored for vsock / env-socket transports)
    pub port: u16,

    /// Take a single pre-connected peer from `RDP_FD` instead of listening
    pub env_socket: bool,

    /// Listen on AF_VSOCK instead of TCP
    pub vsock: bool,

    /// Pre-opened listening socket fd (from `USE_VSOCK=<fd>`)
    pub vsock_fd: Option<i32>,

    /// Pre-connected peer fd (from `RDP_FD`)
    pub peer_fd: Option<i32>,

    /// Ignore client-requested desktop sizes and keep the server's
    pub no_clients_resize: bool,

    /// Disable bulk compression on the wire
    pub force_no_compression: bool,

    /// Monitor refresh rate in Hz
    pub refresh_rate: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3389,
            env_socket: false,
            vsock: false,
            vsock_fd: None,
            peer_fd: None,
            no_clients_resize: false,
            force_no_compression: false,
            refresh_rate: 60,
        }
    }
}

/// TLS and RDP security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Standard RDP security key
    pub rdp_key: Option<PathBuf>,

    /// TLS certificate (generated when absent and a key is present)
    pub server_cert: Option<PathBuf>,

    /// TLS private key
    pub server_key: Option<PathBuf>,

    /// Common name of the generated certificate
    pub self_signed_common_name: String,

    /// Lifetime of the generated certificate in seconds
    pub self_signed_validity_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rdp_key: None,
            server_cert: None,
            server_key: None,
            self_signed_common_name: "weston".to_string(),
            self_signed_validity_secs: 60,
        }
    }
}

/// Clipboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardConfig {
    /// Redirect the clipboard over CLIPRDR
    pub enabled: bool,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Audio redirection flags
///
/// Only the switches and socket names are carried; the splicing threads
/// belong to the audio collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Enable RDPSND playback
    pub playback: bool,

    /// Enable AUDIN capture
    pub capture: bool,

    /// Sink socket path (`PULSE_AUDIO_RDP_SINK`)
    pub sink_socket: Option<PathBuf>,

    /// Source socket path (`PULSE_AUDIO_RDP_SOURCE`)
    pub source_socket: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback: true,
            capture: true,
            sink_socket: None,
            source_socket: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Backend debug level 0-5
    pub debug_level: Option<u8>,

    /// Clipboard debug level 0-5
    pub clipboard_debug_level: Option<u8>,
}

/// Remote application (RAIL) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteAppConfig {
    /// Run in remote-application mode
    pub enabled: bool,
    /// Use the APPLIST channel
    pub use_rdpapplist: bool,
    /// Share window buffers through a GUID-named memory pool
    pub use_shared_memory: bool,
    /// Honour the client's desktop scale factor
    pub enable_hi_dpi_support: bool,
    /// Allow non-integer client scales
    pub enable_fractional_hi_dpi_support: bool,
    /// Round fractional scales up instead of down
    pub enable_fractional_hi_dpi_roundup: bool,
    /// Override the client's desktop scale factor (0 = off, 100-500)
    pub debug_desktop_scaling_factor: u32,
    /// Keep client window z-order in sync
    pub enable_window_zorder_sync: bool,
    /// Allow client-side window snapping
    pub enable_window_snap_arrange: bool,
    /// Remote window shadows
    pub enable_window_shadow_remoting: bool,
    /// Append the distro name to window titles
    pub enable_distro_name_title: bool,
    /// Mark copied windows in their title
    pub enable_copy_warning_title: bool,
    /// Power displays on/off with suppress-output
    pub enable_display_power_by_screenupdate: bool,
    /// Directory for shared-memory pool files
    pub shared_memory_dir: PathBuf,
}

impl Default for RemoteAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_rdpapplist: false,
            use_shared_memory: false,
            enable_hi_dpi_support: true,
            enable_fractional_hi_dpi_support: false,
            enable_fractional_hi_dpi_roundup: false,
            debug_desktop_scaling_factor: 0,
            enable_window_zorder_sync: true,
            enable_window_snap_arrange: false,
            enable_window_shadow_remoting: true,
            enable_distro_name_title: true,
            enable_copy_warning_title: false,
            enable_display_power_by_screenupdate: false,
            shared_memory_dir: PathBuf::from("/dev/shm"),
        }
    }
}
