//! BLE command/response engine for SwitchBot devices.
//!
//! This crate drives SwitchBot peripherals (Bot, Plug Mini, the lock family)
//! over Bluetooth Low Energy: it owns the connection lifecycle, frames and
//! correlates commands, negotiates the per-session cipher for encrypted
//! models and keeps a merged view of broadcast and connected state.
//!
//! # Features
//!
//! - **Lazy connections**: connect on the first command, drop after 8.5 s idle
//! - **Request/response over notifications**: one command in flight per device
//! - **Retries**: transient bus faults are retried with a reconnect in between
//! - **Encryption**: AES-128-CTR session cipher with an IV negotiated per connection
//! - **State cache**: broadcasts and connected reads merged into one snapshot
//! - **Model profiles**: command tables as data, not subclasses
//! - **Account keys** (feature `account`): fetch lock keys from a SwitchBot account
//!
//! # Supported Devices
//!
//! | Device | Commands | Encrypted |
//! |--------|----------|-----------|
//! | Bot | on, off, press | no |
//! | Plug Mini | on, off | no |
//! | Lock, Lock Lite, Lock Pro, Lock Ultra | lock, unlock, unlock without unlatch | yes |
//!
//! # Platform Differences
//!
//! On macOS the peripheral address is a CoreBluetooth UUID rather than the
//! MAC. [`Device::address()`] returns whichever the platform exposes.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchbot_core::{BleTransport, Device, DeviceProfile};
//! use switchbot_types::DeviceIdentity;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BleTransport::new().await?);
//!     let bot = Device::new(
//!         transport,
//!         DeviceIdentity::new("AA:BB:CC:DD:EE:FF"),
//!         DeviceProfile::bot(),
//!     )?;
//!
//!     bot.press().await?;
//!     println!("battery: {:?}", bot.battery_percent());
//!     Ok(())
//! }
//! ```

#[cfg(feature = "account")]
pub mod account;
pub mod advertisement;
pub mod ble;
pub mod cipher;
pub mod commands;
pub mod config;
pub mod connection;
pub mod device;
pub mod encryption;
pub mod error;
pub mod events;
pub mod mock;
pub mod profiles;
pub mod protocol;
pub mod scan;
pub mod state;
pub mod traits;
pub mod util;

pub use switchbot_types::types;
pub use switchbot_types::uuid;

// Core exports
pub use advertisement::{Advertisement, AdvertisementPolicy};
pub use ble::{BleLink, BleTransport};
pub use cipher::{DeviceKey, SessionCipher};
pub use config::DeviceConfig;
pub use device::{Device, DeviceBuilder, StatusDecoder};
pub use encryption::EncryptionStrategy;
pub use error::{DeviceNotFoundReason, Error, FaultClass, Result};
pub use events::{DeviceEvent, DisconnectReason, EventReceiver, EventSender};
pub use mock::MockTransport;
pub use profiles::{AfterAction, DeviceProfile, LockCommands};
pub use scan::{BleScanner, ScanOptions};
pub use state::{StateMap, Subscription};
pub use traits::{Link, Scanner, Transport};

/// A device on the system Bluetooth adapter.
pub type BleDevice = Device<BleTransport>;

/// Shared device reference.
///
/// `Device` is not `Clone`; wrap it in `Arc` to use it from several tasks.
pub type SharedDevice<T = BleTransport> = std::sync::Arc<Device<T>>;

pub use switchbot_types::{DeviceIdentity, SwitchbotModel};
