//! Operator utilities
//!
//! - [`logging`]: numeric debug levels to `tracing` filters
//! - [`errors`]: startup failures with troubleshooting hints
//!
//! ```rust
//! use lamco_rdp_compositor::utils::{filter_directives, format_user_error};
//!
//! assert!(filter_directives(Some(4), None).contains("=debug"));
//!
//! let error = anyhow::anyhow!("TLS is required");
//! assert!(format_user_error(&error).contains("TLS"));
//! ```

pub mod errors;
pub mod logging;

pub use errors::{format_user_error, ErrorCategory};
pub use logging::{build_env_filter, filter_directives, level_from_verbosity, level_name};
