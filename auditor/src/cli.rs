//! Command-line interface definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sandbox-audit - Check running processes against a sandboxing baseline
#[derive(Parser, Debug)]
#[command(name = "sandbox-audit")]
#[command(author, version, about)]
#[command(after_help = "EXAMPLES:
    # Audit the live system (default)
    sudo sandbox-audit

    # Audit with a board-specific baseline and write JSON
    sudo sandbox-audit --config /etc/sandbox-audit/board.toml audit --format json -o report.json

    # Capture a snapshot now, audit it later
    sudo sandbox-audit snapshot -o snapshot.json
    sandbox-audit audit --snapshot snapshot.json

    # Memory-sanitizer build: skip seccomp checks
    sudo sandbox-audit --msan

    # Validate configuration
    sandbox-audit validate --config /path/to/config.toml

    # List the effective baseline
    sandbox-audit list-baseline --detailed
")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Treat the system as a memory-sanitizer build (seccomp is not checked)
    #[arg(long, global = true)]
    pub msan: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Audit running processes (default if no command specified)
    Audit {
        /// Audit a saved snapshot instead of the live system
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// Report format
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Capture a snapshot of the live system as JSON
    Snapshot {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Show every baseline entry
        #[arg(long)]
        detailed: bool,
    },

    /// List the effective baseline
    ListBaseline {
        /// Show exclusions and ignored ancestors too
        #[arg(long)]
        detailed: bool,
    },

    /// Show loaded configuration
    ShowConfig {
        /// Output format (toml, json)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Show version and build info
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }
}
