//! Utility functions for CLI operations.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use switchbot_core::{BleDevice, BleTransport, Device, DeviceConfig, DeviceProfile, EncryptionStrategy};

use crate::cli::OutputFormat;
use crate::config::DeviceEntry;

/// Open a configured device on the first Bluetooth adapter.
///
/// Nothing is connected yet; the first command does that.
pub async fn open_device(entry: &DeviceEntry, config: &DeviceConfig) -> Result<BleDevice> {
    let profile = DeviceProfile::for_model(entry.model)?;
    let encryption = if entry.model.is_encrypted() {
        let (Some(key_id), Some(key)) = (&entry.key_id, &entry.encryption_key) else {
            bail!(
                "{} needs key_id and encryption_key in the config file.\n\
                 Run 'switchbot get-key' to fetch them from your SwitchBot account.",
                entry.model
            );
        };
        EncryptionStrategy::session(key_id, key)?
    } else {
        EncryptionStrategy::None
    };

    let transport = BleTransport::new()
        .await
        .context("Failed to open Bluetooth adapter")?
        .lookup_timeout(config.scan_timeout);

    let mut builder = Device::builder(Arc::new(transport), entry.identity(), profile)
        .config(config.clone())
        .encryption(encryption);
    if let Some(password) = &entry.password {
        builder = builder.password(password.clone());
    }
    Ok(builder.build()?)
}

/// Print `value` as JSON, or `text` otherwise.
pub fn print_output<T: Serialize>(format: OutputFormat, value: &T, text: &str) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
            println!("{json}");
        }
        OutputFormat::Text => println!("{text}"),
    }
    Ok(())
}
