//! Command-line interface for concierge
//!
//! Provides argument parsing using clap derive macros.

use crate::persona::{AssistantFunction, Industry};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Real-time voice concierge session
#[derive(Parser, Debug)]
#[command(
    name = "concierge",
    version,
    about = "Talk to a real-time voice session from the terminal"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: session info, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print session snapshots as JSON lines on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Audio input device (see `concierge devices`)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device (see `concierge devices`)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Prebuilt voice for the reply
    #[arg(long, global = true, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Business the concierge speaks for (e.g. "Real Estate", healthcare)
    #[arg(long, global = true, value_name = "INDUSTRY")]
    pub industry: Option<Industry>,

    /// What the concierge handles: Appointments, Sales, Support, LeadQual, Other
    #[arg(long, global = true, value_name = "FUNCTION")]
    pub function: Option<AssistantFunction>,

    /// Hang up after this long. Examples: 30s, 5m, 1h30m
    #[arg(long, short = 'd', global = true, value_name = "DURATION", value_parser = parse_duration_secs)]
    pub duration: Option<u64>,

    /// Loopback echo gain (0.0 mutes the reply)
    #[arg(long, global = true, value_name = "GAIN")]
    pub gain: Option<f32>,
}

/// Parse a duration string into seconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start a voice session and talk until Ctrl+C or --duration
    Run,

    /// List available audio input and output devices
    Devices,

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment overrides)
    Show,

    /// Print the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
