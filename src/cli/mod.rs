//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for AltPool.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "altpool")]
#[command(about = "AltPool session manager")]
#[command(long_about = "Manages a pool of automated game-client alts and streams their state to observer consoles")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Observer listen port, overrides configuration and PORT
    #[arg(long)]
    pub port: Option<u16>,

    /// Dry-run mode: show resolved configuration without starting the server
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone, Default)]
pub enum Commands {
    /// Run the session manager and observer server
    #[default]
    Serve,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the default configuration to the config file
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Resolve the log level from flags, falling back to the configured one
    pub fn effective_log_level(&self, configured: &str) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.to_string())
        }
    }

    /// Check if we're running in dry-run mode
    pub fn is_dry_run_mode(&self) -> bool {
        self.dry_run
    }
}
