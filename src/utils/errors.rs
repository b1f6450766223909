//! Operator-facing error formatting
//!
//! Startup failures are printed with a short list of likely causes.

use std::fmt::Write;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Kind of failure, guessed from the error chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Certificate or key problems
    Tls,
    /// vsock listener or inherited fds
    Vsock,
    /// TCP bind
    Network,
    /// Keyboard layout compilation
    Keymap,
    /// Config file or environment
    Config,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Classify an error by its full message chain
    pub fn of(error: &anyhow::Error) -> Self {
        let msg = format!("{:#}", error).to_lowercase();

        if msg.contains("tls") || msg.contains("certificate") || msg.contains("private key") {
            ErrorCategory::Tls
        } else if msg.contains("vsock") || msg.contains("rdp_fd") || msg.contains("not open") {
            ErrorCategory::Vsock
        } else if msg.contains("bind") || msg.contains("address") || msg.contains("listen") {
            ErrorCategory::Network
        } else if msg.contains("keymap") || msg.contains("xkb") {
            ErrorCategory::Keymap
        } else if msg.contains("config") || msg.contains("toml") {
            ErrorCategory::Config
        } else {
            ErrorCategory::Other
        }
    }
}

/// Format an error for the operator
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(output).ok();
    writeln!(output, "ERROR").ok();
    writeln!(output, "{}", RULE).ok();

    let (title, causes): (&str, &[&str]) = match ErrorCategory::of(error) {
        ErrorCategory::Tls => (
            "TLS Setup Error",
            &[
                "Certificate or key file missing: check [security] server_cert and server_key",
                "Only a key configured: a self-signed certificate is generated, the key must be PEM",
                "Create a pair with: lamco-rdp-compositor generate-cert",
                "Non-local transports need server_key or rdp_key",
            ],
        ),
        ErrorCategory::Vsock => (
            "vsock Transport Error",
            &[
                "USE_VSOCK=<fd> or RDP_FD=<fd> names a descriptor that is not open",
                "The vsock kernel module is not loaded (modprobe vmw_vsock_virtio_transport)",
                "Another process already listens on the vsock port",
            ],
        ),
        ErrorCategory::Network => (
            "Network Binding Error",
            &[
                "Port already in use: check with ss -tlnp | grep 3389",
                "Ports below 1024 need privileges",
                "bind_address is not a valid IP address",
            ],
        ),
        ErrorCategory::Keymap => (
            "Keyboard Layout Error",
            &[
                "xkeyboard-config is not installed",
                "The client reported a layout without an xkb equivalent",
            ],
        ),
        ErrorCategory::Config => (
            "Configuration Error",
            &[
                "The file does not exist or is not readable",
                "Invalid TOML syntax",
                "A value is out of range: run check-config for details",
            ],
        ),
        ErrorCategory::Other => (
            "Backend Error",
            &["Run with -vvv or WESTON_RDP_DEBUG_LEVEL=5 for detailed logs"],
        ),
    };

    writeln!(output, "{}", title).ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    for (i, cause) in causes.iter().enumerate() {
        writeln!(output, "  {}. {}", i + 1, cause).ok();
    }

    writeln!(output).ok();
    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Technical Details:").ok();
    writeln!(output).ok();
    writeln!(output, "{:#}", error).ok();

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_format_user_error() {
        let error = anyhow::anyhow!("Failed to read certificate /etc/rdp/cert.pem");
        let formatted = format_user_error(&error);
        assert!(formatted.contains("ERROR"));
        assert!(formatted.contains("TLS Setup Error"));
        assert!(formatted.contains("/etc/rdp/cert.pem"));
    }

    #[test]
    fn test_category_uses_context_chain() {
        let error = Err::<(), _>(anyhow::anyhow!("permission denied"))
            .context("Failed to load config file")
            .unwrap_err();
        assert_eq!(ErrorCategory::of(&error), ErrorCategory::Config);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ErrorCategory::of(&anyhow::anyhow!("fd 7 is not open")),
            ErrorCategory::Vsock
        );
        assert_eq!(
            ErrorCategory::of(&anyhow::anyhow!("Address already in use")),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::of(&anyhow::anyhow!("something odd")),
            ErrorCategory::Other
        );
    }
}
