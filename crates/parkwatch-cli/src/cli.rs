//! Clap derive structures for the `parkwatch` CLI.
//!
//! Defines the command tree, global flags, and shared argument types.

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// parkwatch -- operator CLI for the parking detection backend
#[derive(Debug, Parser)]
#[command(
    name = "parkwatch",
    version,
    about = "Tail the detection stream, probe backend health, manage configuration",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Detection stream WebSocket URL (overrides config)
    #[arg(long, env = "PARKWATCH_STREAM_URL", global = true)]
    pub stream_url: Option<String>,

    /// Backend health endpoint URL (overrides config)
    #[arg(long, env = "PARKWATCH_HEALTH_URL", global = true)]
    pub health_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Tail the detection event stream as JSON lines
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Probe the backend health endpoint once
    Health(HealthArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Reconnect backoff unit in seconds (overrides config)
    #[arg(long)]
    pub base_delay: Option<u64>,

    /// Reconnect attempt budget (overrides config)
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Exit after printing this many events
    #[arg(long)]
    pub limit: Option<u64>,
}

// ── Health ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Probe timeout in seconds
    #[arg(long, default_value = "5")]
    pub timeout: u64,

    /// Keep probing and print each reachability transition
    #[arg(long)]
    pub monitor: bool,

    /// Probe period in seconds while monitoring (overrides config)
    #[arg(long, requires = "monitor")]
    pub interval: Option<u64>,

    /// Stop monitoring after this many seconds
    #[arg(long, requires = "monitor")]
    pub duration: Option<u64>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a starter config file with the default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the resolved configuration
    Show,

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
