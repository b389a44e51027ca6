//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use switchbot_core::SwitchbotModel;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable device selection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device alias or address, or use SWITCHBOT_DEVICE env var
    #[arg(env = "SWITCHBOT_DEVICE")]
    pub device: String,

    /// Model, required for devices missing from the config file
    #[arg(short, long, value_parser = parse_model)]
    pub model: Option<SwitchbotModel>,
}

#[derive(Parser)]
#[command(name = "switchbot")]
#[command(author, version, about = "CLI for SwitchBot BLE devices", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Use this config file instead of the default one
    #[arg(long, global = true, env = "SWITCHBOT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby SwitchBot devices
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,

        /// Scan again this many times while nothing is found
        #[arg(short, long, default_value = "0")]
        retry: u32,

        /// List every BLE peripheral, not just SwitchBot ones
        #[arg(long)]
        all: bool,
    },

    /// Read battery and firmware from a device
    Info(DeviceArgs),

    /// Turn a Bot or Plug Mini on
    On(DeviceArgs),

    /// Turn a Bot or Plug Mini off
    Off(DeviceArgs),

    /// Press a Bot
    Press(DeviceArgs),

    /// Lock a lock
    Lock(DeviceArgs),

    /// Unlock a lock
    Unlock {
        #[command(flatten)]
        device: DeviceArgs,

        /// Leave the latch engaged
        #[arg(long)]
        no_unlatch: bool,
    },

    /// Fetch a lock's encryption key from a SwitchBot account
    GetKey {
        /// Lock MAC address
        #[arg(long)]
        mac: String,

        /// SwitchBot account user name (e-mail)
        #[arg(long, env = "SWITCHBOT_USERNAME")]
        username: String,

        /// SwitchBot account password
        #[arg(long, env = "SWITCHBOT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Show the config file path
    Path,

    /// Show the current configuration
    Show,
}

fn parse_model(s: &str) -> Result<SwitchbotModel, String> {
    s.parse().map_err(|e| format!("{e}"))
}
