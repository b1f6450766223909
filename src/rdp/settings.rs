//! Peer settings and capability negotiation
//!
//! [`PeerSettings`] mirrors the subset of the protocol library's settings
//! block the backend reads or writes. The server side is filled in by
//! [`PeerSettings::configure_server`] before the library initialises the
//! connection; the client side arrives with the capability exchange and is
//! checked by [`PeerSettings::negotiate`].

use std::ops::BitOr;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::error::{PeerError, Result};
use crate::config::{Config, RemoteAppConfig};
use crate::damage::Rect;
use crate::input::KeyboardInfo;
use crate::multimon::{MonitorDescriptor, MonitorMode, ScalePolicy};

/// `OSMAJORTYPE_UNIX`
pub const OS_MAJOR_TYPE_UNIX: u32 = 4;
/// `OSMINORTYPE_PSEUDO_XSERVER`
pub const OS_MINOR_TYPE_PSEUDO_XSERVER: u32 = 7;
/// Largest fragmented update the client accepts unless it says otherwise
pub const DEFAULT_MULTIFRAG_MAX_REQUEST_SIZE: u32 = 0xFFFF;

/// RAIL handshake support level flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RailLevel(pub u32);

impl RailLevel {
    /// `RAIL_LEVEL_SUPPORTED`
    pub const SUPPORTED: RailLevel = RailLevel(0x01);
    /// `RAIL_LEVEL_DOCKED_LANGBAR_SUPPORTED`
    pub const DOCKED_LANGBAR: RailLevel = RailLevel(0x02);
    /// `RAIL_LEVEL_SHELL_INTEGRATION_SUPPORTED`
    pub const SHELL_INTEGRATION: RailLevel = RailLevel(0x04);
    /// `RAIL_LEVEL_LANGUAGE_IME_SYNC_SUPPORTED`
    pub const LANGUAGE_IME_SYNC: RailLevel = RailLevel(0x08);
    /// `RAIL_LEVEL_SERVER_TO_CLIENT_IME_SYNC_SUPPORTED`
    pub const SERVER_TO_CLIENT_IME_SYNC: RailLevel = RailLevel(0x10);
    /// `RAIL_LEVEL_HIDE_MINIMIZED_APPS_SUPPORTED`
    pub const HIDE_MINIMIZED: RailLevel = RailLevel(0x20);
    /// `RAIL_LEVEL_WINDOW_CLOAKING_SUPPORTED`
    pub const WINDOW_CLOAKING: RailLevel = RailLevel(0x40);
    /// `RAIL_LEVEL_HANDSHAKE_EX_SUPPORTED`
    pub const HANDSHAKE_EX: RailLevel = RailLevel(0x80);

    /// Level the server advertises
    pub fn server_default() -> Self {
        Self::SUPPORTED
            | Self::SHELL_INTEGRATION
            | Self::LANGUAGE_IME_SYNC
            | Self::SERVER_TO_CLIENT_IME_SYNC
            | Self::HANDSHAKE_EX
    }

    /// Whether every bit of `other` is set
    pub fn contains(self, other: RailLevel) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RailLevel {
    type Output = RailLevel;

    fn bitor(self, rhs: RailLevel) -> RailLevel {
        RailLevel(self.0 | rhs.0)
    }
}

/// Server-side switches applied during negotiation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationPolicy {
    /// Turn bulk compression off even if the client offers it
    pub force_no_compression: bool,
    /// Keep the server's desktop size
    pub no_clients_resize: bool,
    /// Current virtual desktop size, if any output exists
    pub server_size: Option<(u32, u32)>,
}

/// Result of a successful negotiation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// Desktop size was changed and the client must be told
    pub desktop_resized: bool,
}

/// Connection settings shared with the protocol library
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSettings {
    /// Server OS major type
    pub os_major_type: u32,
    /// Server OS minor type
    pub os_minor_type: u32,
    /// Bits per pixel
    pub color_depth: u32,
    /// Surface commands (client capability)
    pub surface_commands_enabled: bool,
    /// Surface frame markers
    pub surface_frame_marker_enabled: bool,
    /// Frame marker command
    pub frame_marker_command_enabled: bool,
    /// RemoteFX codec
    pub remote_fx_codec: bool,
    /// NSCodec
    pub ns_codec: bool,
    /// Desktop width
    pub desktop_width: u32,
    /// Desktop height
    pub desktop_height: u32,
    /// Desktop scale factor in percent
    pub desktop_scale_factor: u32,
    /// Device scale factor in percent
    pub device_scale_factor: u32,
    /// Connect-time `MonitorDefArray`
    pub monitor_defs: Vec<MonitorDescriptor>,
    /// Monitor-layout PDU support
    pub support_monitor_layout_pdu: bool,
    /// Remote applications (RAIL)
    pub remote_application_mode: bool,
    /// RAIL support level
    pub remote_app_level: RailLevel,
    /// RDPGFX
    pub support_graphics_pipeline: bool,
    /// CLIPRDR
    pub redirect_clipboard: bool,
    /// Extended mouse events
    pub has_extended_mouse_event: bool,
    /// Horizontal wheel events
    pub has_horizontal_wheel: bool,
    /// TLS security layer
    pub tls_security: bool,
    /// Standard RDP security layer
    pub rdp_security: bool,
    /// Connection-local transport (AF_UNIX, AF_VSOCK)
    pub local_connection: bool,
    /// Bulk compression
    pub compression_enabled: bool,
    /// Largest fragmented update accepted by the client
    pub multifrag_max_request_size: u32,
    /// Client keyboard
    pub keyboard: KeyboardInfo,
    /// Standard RDP security key
    pub rdp_key_file: Option<PathBuf>,
    /// TLS certificate
    pub certificate_file: Option<PathBuf>,
    /// TLS key
    pub private_key_file: Option<PathBuf>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            os_major_type: 0,
            os_minor_type: 0,
            color_depth: 32,
            surface_commands_enabled: false,
            surface_frame_marker_enabled: false,
            frame_marker_command_enabled: false,
            remote_fx_codec: false,
            ns_codec: false,
            desktop_width: 0,
            desktop_height: 0,
            desktop_scale_factor: 100,
            device_scale_factor: 100,
            monitor_defs: Vec::new(),
            support_monitor_layout_pdu: false,
            remote_application_mode: false,
            remote_app_level: RailLevel::default(),
            support_graphics_pipeline: false,
            redirect_clipboard: false,
            has_extended_mouse_event: false,
            has_horizontal_wheel: false,
            tls_security: true,
            rdp_security: false,
            local_connection: false,
            compression_enabled: true,
            multifrag_max_request_size: DEFAULT_MULTIFRAG_MAX_REQUEST_SIZE,
            keyboard: KeyboardInfo::default(),
            rdp_key_file: None,
            certificate_file: None,
            private_key_file: None,
        }
    }
}

impl PeerSettings {
    /// Fill in the server side before the library initialises the peer
    pub fn configure_server(&mut self, config: &Config, local_connection: bool) {
        self.os_major_type = OS_MAJOR_TYPE_UNIX;
        self.os_minor_type = OS_MINOR_TYPE_PSEUDO_XSERVER;
        self.color_depth = 32;
        self.surface_frame_marker_enabled = true;
        self.frame_marker_command_enabled = true;
        self.remote_fx_codec = true;
        self.ns_codec = true;

        self.remote_application_mode = config.remote_app.enabled;
        self.remote_app_level = RailLevel::server_default();
        self.support_graphics_pipeline = true;
        self.support_monitor_layout_pdu = true;
        self.redirect_clipboard = config.clipboard.enabled;
        self.has_extended_mouse_event = true;
        self.has_horizontal_wheel = true;

        self.local_connection = local_connection;
        self.rdp_key_file = config.security.rdp_key.clone();
        self.certificate_file = config.security.server_cert.clone();
        self.private_key_file = config.security.server_key.clone();
        self.rdp_security = self.rdp_key_file.is_some();
        // Local transports may skip TLS
        self.tls_security = self.private_key_file.is_some() || !local_connection;

        if config.server.force_no_compression {
            self.compression_enabled = false;
        }

        debug!(
            "Server settings: local={} tls={} rail={} clipboard={}",
            self.local_connection,
            self.tls_security,
            self.remote_application_mode,
            self.redirect_clipboard
        );
    }

    /// Check the client's capabilities and settle the negotiated settings
    pub fn negotiate(&mut self, policy: &NegotiationPolicy) -> Result<Negotiated> {
        if !self.surface_commands_enabled {
            warn!("Client doesn't support required SurfaceCommands");
            return Err(PeerError::SurfaceCommandsUnsupported);
        }

        if policy.force_no_compression && self.compression_enabled {
            info!("Forcing compression off");
            self.compression_enabled = false;
        }

        if !self.remote_fx_codec {
            debug!("Client does not support RemoteFX");
        }

        let mut outcome = Negotiated::default();

        if !self.monitor_defs.is_empty() {
            let bounds = self
                .monitor_defs
                .iter()
                .map(|m| m.rect())
                .reduce(|a, b| a.union(&b))
                .unwrap_or_default();
            if bounds.width != self.desktop_width || bounds.height != self.desktop_height {
                debug!(
                    "Clamping desktop {}x{} to monitor bounds {}x{}",
                    self.desktop_width, self.desktop_height, bounds.width, bounds.height
                );
                self.desktop_width = bounds.width;
                self.desktop_height = bounds.height;
            }
        }

        if let (true, Some((width, height))) = (policy.no_clients_resize, policy.server_size) {
            if self.desktop_width != width || self.desktop_height != height {
                info!(
                    "Client asked for {}x{}, keeping server size {}x{}",
                    self.desktop_width, self.desktop_height, width, height
                );
                self.desktop_width = width;
                self.desktop_height = height;
                self.monitor_defs.clear();
                outcome.desktop_resized = true;
            }
        }

        Ok(outcome)
    }

    /// Monitor modes for the first reconciliation
    ///
    /// Without a usable `MonitorDefArray` a single primary monitor covering
    /// the desktop is synthesised.
    pub fn initial_monitors(&self, policy: &ScalePolicy) -> Vec<MonitorMode> {
        if self.support_monitor_layout_pdu && !self.monitor_defs.is_empty() {
            return self
                .monitor_defs
                .iter()
                .map(|m| MonitorMode::new(*m, policy))
                .collect();
        }

        let monitor = MonitorDescriptor::new(0, 0, self.desktop_width, self.desktop_height, true)
            .with_scale_factor(self.desktop_scale_factor);
        vec![MonitorMode::new(monitor, policy)]
    }

    /// Desktop rectangle
    pub fn desktop_rect(&self) -> Rect {
        Rect::new(0, 0, self.desktop_width, self.desktop_height)
    }
}

/// Scale policy from the remote-application configuration
pub fn scale_policy(config: &RemoteAppConfig) -> ScalePolicy {
    ScalePolicy {
        hi_dpi: config.enable_hi_dpi_support,
        fractional: config.enable_fractional_hi_dpi_support,
        roundup: config.enable_fractional_hi_dpi_roundup,
        debug_factor: config.debug_desktop_scaling_factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_settings() -> PeerSettings {
        PeerSettings {
            surface_commands_enabled: true,
            desktop_width: 1920,
            desktop_height: 1080,
            ..PeerSettings::default()
        }
    }

    #[test]
    fn test_configure_server() {
        let mut config = Config::default();
        config.remote_app.enabled = true;
        config.server.force_no_compression = true;

        let mut settings = PeerSettings::default();
        settings.configure_server(&config, false);

        assert_eq!(settings.os_major_type, OS_MAJOR_TYPE_UNIX);
        assert_eq!(settings.os_minor_type, OS_MINOR_TYPE_PSEUDO_XSERVER);
        assert_eq!(settings.color_depth, 32);
        assert!(settings.surface_frame_marker_enabled);
        assert!(settings.remote_application_mode);
        assert!(settings.remote_app_level.contains(RailLevel::HANDSHAKE_EX));
        assert!(!settings.remote_app_level.contains(RailLevel::DOCKED_LANGBAR));
        assert!(settings.has_horizontal_wheel);
        assert!(settings.tls_security);
        assert!(!settings.compression_enabled);
    }

    #[test]
    fn test_local_transport_tls_optional() {
        let mut settings = PeerSettings::default();
        settings.configure_server(&Config::default(), true);
        assert!(settings.local_connection);
        assert!(!settings.tls_security);
    }

    #[test]
    fn test_rail_level_default() {
        assert_eq!(RailLevel::server_default().0, 0x01 | 0x04 | 0x08 | 0x10 | 0x80);
    }

    #[test]
    fn test_negotiate_requires_surface_commands() {
        let mut settings = PeerSettings::default();
        let err = settings.negotiate(&NegotiationPolicy::default()).unwrap_err();
        assert!(matches!(err, PeerError::SurfaceCommandsUnsupported));
    }

    #[test]
    fn test_negotiate_forces_compression_off() {
        let mut settings = client_settings();
        let policy = NegotiationPolicy {
            force_no_compression: true,
            ..Default::default()
        };
        settings.negotiate(&policy).unwrap();
        assert!(!settings.compression_enabled);
    }

    #[test]
    fn test_negotiate_clamps_to_monitor_bounds() {
        let mut settings = client_settings();
        settings.monitor_defs = vec![
            MonitorDescriptor::new(0, 0, 1920, 1080, true),
            MonitorDescriptor::new(1920, 0, 1280, 1024, false),
        ];
        settings.negotiate(&NegotiationPolicy::default()).unwrap();
        assert_eq!((settings.desktop_width, settings.desktop_height), (3200, 1080));
    }

    #[test]
    fn test_no_clients_resize_keeps_server_size() {
        let mut settings = client_settings();
        let policy = NegotiationPolicy {
            no_clients_resize: true,
            server_size: Some((1280, 720)),
            ..Default::default()
        };
        let outcome = settings.negotiate(&policy).unwrap();
        assert!(outcome.desktop_resized);
        assert_eq!((settings.desktop_width, settings.desktop_height), (1280, 720));

        let outcome = settings.negotiate(&policy).unwrap();
        assert!(!outcome.desktop_resized);
    }

    #[test]
    fn test_initial_monitor_synthesised() {
        let mut settings = client_settings();
        settings.desktop_scale_factor = 200;
        let policy = ScalePolicy {
            hi_dpi: true,
            ..Default::default()
        };

        let modes = settings.initial_monitors(&policy);
        assert_eq!(modes.len(), 1);
        assert!(modes[0].monitor.is_primary);
        assert_eq!(modes[0].monitor.rect(), Rect::new(0, 0, 1920, 1080));
        assert_eq!(modes[0].scale, 2);
    }

    #[test]
    fn test_initial_monitors_from_defs() {
        let mut settings = client_settings();
        settings.support_monitor_layout_pdu = true;
        settings.monitor_defs = vec![
            MonitorDescriptor::new(0, 0, 1920, 1080, true),
            MonitorDescriptor::new(-1024, 0, 1024, 768, false),
        ];
        let modes = settings.initial_monitors(&ScalePolicy::default());
        assert_eq!(modes.len(), 2);
        assert_eq!(modes[1].monitor.x, -1024);

        settings.support_monitor_layout_pdu = false;
        assert_eq!(settings.initial_monitors(&ScalePolicy::default()).len(), 1);
    }

    #[test]
    fn test_scale_policy_from_config() {
        let mut config = RemoteAppConfig::default();
        config.debug_desktop_scaling_factor = 150;
        config.enable_fractional_hi_dpi_roundup = true;
        let policy = scale_policy(&config);
        assert!(policy.hi_dpi);
        assert!(policy.roundup);
        assert_eq!(policy.scales_for(100), (2.0, 2));
    }
}
