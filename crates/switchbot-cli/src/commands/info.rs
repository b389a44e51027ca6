//! Info command implementation.

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use switchbot_core::DeviceConfig;

use crate::cli::OutputFormat;
use crate::config::DeviceEntry;
use crate::util::{open_device, print_output};

pub async fn cmd_info(entry: &DeviceEntry, config: &DeviceConfig, format: OutputFormat) -> Result<()> {
    let device = open_device(entry, config).await?;
    let info = device
        .get_basic_info()
        .await
        .with_context(|| format!("Failed to read info from {}", device.identity()))?;
    device.disconnect().await;

    let Some(info) = info else {
        bail!("{} did not return basic info, please try again", device.identity());
    };

    let mut text = format!("{} ({})", device.identity(), entry.model);
    for (key, value) in &info {
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!("\n  {key:<10} {shown}"));
    }

    let output = json!({
        "address": device.address(),
        "model": entry.model,
        "info": info,
    });
    print_output(format, &output, &text)
}
