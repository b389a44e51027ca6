//! Switch and lock commands.

use anyhow::{Context, Result, bail};
use serde_json::json;
use switchbot_core::DeviceConfig;
use tracing::info;

use crate::cli::OutputFormat;
use crate::config::DeviceEntry;
use crate::util::{open_device, print_output};

/// A one-shot device action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TurnOn,
    TurnOff,
    Press,
    Lock,
    Unlock,
    UnlockWithoutUnlatch,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::TurnOn => "turn_on",
            Action::TurnOff => "turn_off",
            Action::Press => "press",
            Action::Lock => "lock",
            Action::Unlock => "unlock",
            Action::UnlockWithoutUnlatch => "unlock_without_unlatch",
        }
    }
}

pub async fn cmd_control(
    entry: &DeviceEntry,
    config: &DeviceConfig,
    action: Action,
    format: OutputFormat,
) -> Result<()> {
    let device = open_device(entry, config).await?;
    info!(device = %device.identity(), action = action.name(), "sending command");

    let result = match action {
        Action::TurnOn => device.turn_on().await,
        Action::TurnOff => device.turn_off().await,
        Action::Press => device.press().await,
        Action::Lock => device.lock().await,
        Action::Unlock => device.unlock().await,
        Action::UnlockWithoutUnlatch => device.unlock_without_unlatch().await,
    };
    device.disconnect().await;
    let ok = result.with_context(|| format!("{} failed on {}", action.name(), device.identity()))?;

    let battery = device.battery_percent();
    let mut text = format!(
        "{}: {}",
        action.name(),
        if ok { "ok" } else { "rejected by device" }
    );
    if let Some(battery) = battery {
        text.push_str(&format!(" (battery {battery}%)"));
    }

    let output = json!({
        "address": device.address(),
        "action": action.name(),
        "success": ok,
        "battery": battery,
        "state": device.parsed_data(),
    });
    print_output(format, &output, &text)?;
    if !ok {
        bail!("{} was rejected by {}", action.name(), device.identity());
    }
    Ok(())
}
