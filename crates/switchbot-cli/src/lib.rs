//! Command-line interface for SwitchBot BLE devices.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby SwitchBot devices |
//! | `info` | Read battery and firmware |
//! | `on` / `off` / `press` | Drive a Bot or Plug Mini |
//! | `lock` / `unlock` | Drive a lock |
//! | `get-key` | Fetch a lock's encryption key from a SwitchBot account |
//! | `config` | Show the config file path or contents |
//!
//! # Configuration
//!
//! The CLI reads `~/.config/switchbot/config.toml` (or platform equivalent):
//!
//! ```toml
//! [connection]
//! retry_count = 4
//! disconnect_delay = 8.5
//!
//! [[devices]]
//! alias = "front-door"
//! address = "AA:BB:CC:DD:EE:FF"
//! model = "lock_pro"
//! key_id = "ff"
//! encryption_key = "2b7e151628aed2a6abf7158809cf4f3c"
//! ```
//!
//! Devices are named by alias or address. Devices missing from the file can
//! be used with `--model`.
//!
//! # Environment Variables
//!
//! - `SWITCHBOT_DEVICE`: default device (overridden by the positional argument)
//! - `SWITCHBOT_CONFIG`: config file path
//! - `RUST_LOG`: log filter when neither `--verbose` nor `--quiet` is given

pub mod cli;
pub mod commands;
pub mod config;
pub mod util;

pub use switchbot_core;
