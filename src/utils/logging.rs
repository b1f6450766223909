//! Log filter construction
//!
//! The backend's numeric debug levels (0 to 5) become tracing directives:
//!
//! | level | directive |
//! |-------|-----------|
//! | 0     | `off`     |
//! | 1     | `error`   |
//! | 2     | `warn`    |
//! | 3     | `info`    |
//! | 4     | `debug`   |
//! | 5     | `trace`   |
//!
//! The clipboard bridge has its own level. `RUST_LOG`, when set, replaces
//! both.

use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = "lamco_rdp_compositor";
const CLIPBOARD_TARGET: &str = "lamco_rdp_compositor::clipboard";

/// Level used when none is configured
pub const DEFAULT_LEVEL: u8 = 3;

/// Directive name for a numeric level; levels above 5 saturate
pub fn level_name(level: u8) -> &'static str {
    match level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

/// Filter directives for the configured levels
///
/// The clipboard level defaults to the general one.
pub fn filter_directives(level: Option<u8>, clipboard_level: Option<u8>) -> String {
    let level = level.unwrap_or(DEFAULT_LEVEL);
    let clipboard_level = clipboard_level.unwrap_or(level);
    format!(
        "{}={},{}={},warn",
        CRATE_TARGET,
        level_name(level),
        CLIPBOARD_TARGET,
        level_name(clipboard_level)
    )
}

/// Build the subscriber filter
pub fn build_env_filter(level: Option<u8>, clipboard_level: Option<u8>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level, clipboard_level)))
}

/// Numeric level from `-v` flags, counted up from the default
pub fn level_from_verbosity(verbose: u8) -> Option<u8> {
    match verbose {
        0 => None,
        n => Some(DEFAULT_LEVEL.saturating_add(n).min(5)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        let names: Vec<_> = (0..=6).map(level_name).collect();
        assert_eq!(
            names,
            ["off", "error", "warn", "info", "debug", "trace", "trace"]
        );
    }

    #[test]
    fn test_directives_default() {
        assert_eq!(
            filter_directives(None, None),
            "lamco_rdp_compositor=info,lamco_rdp_compositor::clipboard=info,warn"
        );
    }

    #[test]
    fn test_clipboard_level_separate() {
        let directives = filter_directives(Some(1), Some(5));
        assert!(directives.contains("lamco_rdp_compositor=error"));
        assert!(directives.contains("lamco_rdp_compositor::clipboard=trace"));
    }

    #[test]
    fn test_directives_parse() {
        let directives = filter_directives(Some(0), Some(4));
        assert!(directives.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(level_from_verbosity(0), None);
        assert_eq!(level_from_verbosity(1), Some(4));
        assert_eq!(level_from_verbosity(7), Some(5));
    }
}
