//! lamco-rdp-compositor - operator tool
//!
//! The backend itself is linked into a compositor. This binary checks the
//! configuration the backend would run with, generates TLS material and
//! shows the keymap a client layout resolves to.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_rdp_compositor::config::Config;
use lamco_rdp_compositor::input::{compile_keymap, resolve_names, KeyboardInfo};
use lamco_rdp_compositor::security::{CertificateGenerator, TlsMaterial};
use lamco_rdp_compositor::utils::{build_env_filter, format_user_error, level_from_verbosity};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "lamco-rdp-compositor")]
#[command(version, about = "RDP compositor backend tool", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "LAMCO_RDP_CONFIG")]
    pub config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "LAMCO_RDP_ADDRESS")]
    pub address: Option<String>,

    /// Listen port
    #[arg(short, long, env = "LAMCO_RDP_PORT")]
    pub port: Option<u16>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stderr)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load, apply the environment, validate and print the effective configuration
    CheckConfig,

    /// Write a self-signed certificate and key
    GenerateCert {
        /// Certificate output path
        #[arg(long, default_value = "cert.pem")]
        cert: PathBuf,
        /// Private key output path
        #[arg(long, default_value = "key.pem")]
        key: PathBuf,
        /// Common name
        #[arg(long, default_value = "weston")]
        common_name: String,
        /// Validity in seconds
        #[arg(long, default_value_t = 365 * 24 * 3600)]
        validity_secs: u64,
    },

    /// Show the xkb names a client keyboard resolves to
    Keymap {
        /// Keyboard layout id, e.g. 0x409
        #[arg(value_parser = parse_number)]
        layout: u32,
        /// Keyboard type (1-8)
        #[arg(long, default_value_t = 4)]
        keyboard_type: u32,
        /// OEM subtype
        #[arg(long, default_value_t = 0)]
        subtype: u32,
        /// Also compile the keymap
        #[arg(long)]
        compile: bool,
    },
}

fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            return Err(e);
        }
    };

    init_logging(&args, &config)?;
    info!(
        "lamco-rdp-compositor v{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATE"),
        env!("GIT_HASH")
    );

    let result = match &args.command {
        Command::CheckConfig => check_config(&config),
        Command::GenerateCert {
            cert,
            key,
            common_name,
            validity_secs,
        } => CertificateGenerator::generate_and_save(
            common_name,
            Duration::from_secs(*validity_secs),
            cert,
            key,
        ),
        Command::Keymap {
            layout,
            keyboard_type,
            subtype,
            compile,
        } => show_keymap(
            KeyboardInfo {
                layout: *layout,
                keyboard_type: *keyboard_type,
                subtype: *subtype,
            },
            *compile,
        ),
    };

    if let Err(e) = &result {
        eprintln!("{}", format_user_error(e));
    }
    result
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    Ok(config
        .apply_env()
        .with_overrides(args.address.clone(), args.port))
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;
    debug!("Config: {:?}", config);

    let tls = TlsMaterial::resolve(&config.security, config.uses_local_transport())?;
    match &tls {
        Some(material) => info!(
            "TLS ready: {} certificate(s), self-signed {}",
            material.certificates().len(),
            material.is_self_signed()
        ),
        None => info!("TLS not required for this transport"),
    }

    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    println!("{}", rendered);
    Ok(())
}

fn show_keymap(info: KeyboardInfo, compile: bool) -> Result<()> {
    let names = resolve_names(&info);
    println!("{}", serde_json::to_string_pretty(&names)?);

    if compile {
        let keymap = compile_keymap(&names).context("Failed to compile keymap")?;
        info!("Keymap compiled ({} bytes)", keymap.len());
    }
    Ok(())
}

fn init_logging(args: &Args, config: &Config) -> Result<()> {
    use std::fs::File;

    let level = level_from_verbosity(args.verbose).or(config.logging.debug_level);
    let env_filter = build_env_filter(level, config.logging.clipboard_debug_level);

    let file_layer = match &args.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match args.log_format.as_str() {
        "json" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        "compact" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init(),
        _ => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    Ok(())
}
