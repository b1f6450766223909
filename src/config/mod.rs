//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - Environment variables
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::{debug, warn};

pub mod types;

pub use types::{
    AudioConfig, ClipboardConfig, LoggingConfig, RemoteAppConfig, SecurityConfig, ServerConfig,
};

/// Highest accepted debug level (maps to `trace`)
pub const MAX_DEBUG_LEVEL: u8 = 5;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Clipboard configuration
    pub clipboard: ClipboardConfig,
    /// Audio configuration
    pub audio: AudioConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Remote application configuration
    pub remote_app: RemoteAppConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Apply environment overrides from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("USE_VSOCK") {
            self.server.vsock = true;
            match value.trim().parse::<i32>() {
                Ok(fd) if fd >= 0 => self.server.vsock_fd = Some(fd),
                _ => self.server.vsock_fd = None,
            }
            debug!("USE_VSOCK set, vsock listener fd {:?}", self.server.vsock_fd);
        }

        if let Some(value) = lookup("RDP_FD") {
            match value.trim().parse::<i32>() {
                Ok(fd) if fd >= 0 => {
                    self.server.env_socket = true;
                    self.server.peer_fd = Some(fd);
                }
                _ => warn!("Ignoring invalid RDP_FD value: {:?}", value),
            }
        }

        if let Some(level) = parse_level(&lookup, "WESTON_RDP_DEBUG_LEVEL") {
            self.logging.debug_level = Some(level);
        }
        if let Some(level) = parse_level(&lookup, "WESTON_RDP_DEBUG_CLIPBOARD_LEVEL") {
            self.logging.clipboard_debug_level = Some(level);
        }

        if let Some(value) = lookup("WESTON_RDP_MONITOR_REFRESH_RATE") {
            match value.trim().parse::<u32>() {
                Ok(rate) if rate > 0 => self.server.refresh_rate = rate,
                _ => warn!("Ignoring invalid monitor refresh rate: {:?}", value),
            }
        }

        if lookup("WESTON_RDP_DISABLE_CLIPBOARD").is_some_and(|v| is_truthy(&v)) {
            self.clipboard.enabled = false;
        }
        if lookup("WESTON_RDP_DISABLE_AUDIO_PLAYBACK").is_some_and(|v| is_truthy(&v)) {
            self.audio.playback = false;
        }
        if lookup("WESTON_RDP_DISABLE_AUDIO_CAPTURE").is_some_and(|v| is_truthy(&v)) {
            self.audio.capture = false;
        }

        if let Some(path) = lookup("PULSE_AUDIO_RDP_SINK") {
            self.audio.sink_socket = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("PULSE_AUDIO_RDP_SOURCE") {
            self.audio.source_socket = Some(PathBuf::from(path));
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.uses_local_transport() {
            self.listen_addr()?;

            if self.server.port == 0 {
                anyhow::bail!("Port 0 is only valid with vsock or env-socket transports");
            }

            if self.security.rdp_key.is_none() && self.security.server_key.is_none() {
                anyhow::bail!(
                    "TLS is mandatory on TCP: configure security.server_key or security.rdp_key"
                );
            }
        }

        if !(1..=1000).contains(&self.server.refresh_rate) {
            anyhow::bail!(
                "Invalid refresh rate: {} (expected 1-1000 Hz)",
                self.server.refresh_rate
            );
        }

        for (name, level) in [
            ("debug_level", self.logging.debug_level),
            ("clipboard_debug_level", self.logging.clipboard_debug_level),
        ] {
            if let Some(level) = level {
                if level > MAX_DEBUG_LEVEL {
                    anyhow::bail!("Invalid {}: {} (expected 0-5)", name, level);
                }
            }
        }

        let factor = self.remote_app.debug_desktop_scaling_factor;
        if factor != 0 && !(100..=500).contains(&factor) {
            anyhow::bail!(
                "Invalid debug_desktop_scaling_factor: {} (expected 0 or 100-500)",
                factor
            );
        }

        if let Some(cert) = &self.security.server_cert {
            if self.security.server_key.is_none() {
                anyhow::bail!("server_cert {:?} configured without server_key", cert);
            }
        }

        Ok(())
    }

    /// Whether the configured transport is connection-local (vsock or a passed fd)
    pub fn uses_local_transport(&self) -> bool {
        self.server.vsock || self.server.env_socket
    }

    /// TCP listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .context(format!("Invalid bind address: {}", self.server.bind_address))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Refresh period in mHz as used by the repaint clock
    pub fn refresh_mhz(&self) -> u32 {
        self.server.refresh_rate.saturating_mul(1000)
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, address: Option<String>, port: Option<u16>) -> Self {
        if let Some(address) = address {
            self.server.bind_address = address;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }
}

fn parse_level<F>(lookup: &F, name: &str) -> Option<u8>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name)?;
    match value.trim().parse::<u8>() {
        Ok(level) if level <= MAX_DEBUG_LEVEL => Some(level),
        _ => {
            warn!("Ignoring invalid {} value: {:?}", name, value);
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
