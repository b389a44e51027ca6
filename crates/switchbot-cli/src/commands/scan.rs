//! Scan command implementation.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use switchbot_core::scan::{ScanOptions, discover};
use switchbot_core::Advertisement;
use switchbot_core::advertisement::UNKNOWN_RSSI;

use crate::cli::OutputFormat;
use crate::config::Config;

pub async fn cmd_scan(
    timeout: u64,
    retry: u32,
    all: bool,
    format: OutputFormat,
    config: &Config,
) -> Result<()> {
    let mut options = ScanOptions::new().duration_secs(timeout).retry(retry);
    if all {
        options = options.all_devices();
    }

    let found = discover(options)
        .await
        .context("Failed to scan for devices")?;

    let mut devices: Vec<Advertisement> = found.into_values().collect();
    devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));

    let text = format_scan_text(&devices, config);
    crate::util::print_output(format, &devices, &text)
}

fn format_scan_text(devices: &[Advertisement], config: &Config) -> String {
    if devices.is_empty() {
        return "No devices found.".to_string();
    }
    let mut out = format!("Found {} device(s):\n", devices.len());
    for adv in devices {
        let alias = config
            .find(&adv.identity.address)
            .and_then(|d| d.alias.as_deref())
            .map(|a| format!(" [{a}]"))
            .unwrap_or_default();
        let rssi = if adv.rssi == UNKNOWN_RSSI {
            "?".to_string()
        } else {
            adv.rssi.to_string()
        };
        let _ = writeln!(
            out,
            "  {:<20} {:<17} rssi {:>4}{}",
            adv.identity.name.as_deref().unwrap_or("Unknown"),
            adv.identity.address,
            rssi,
            alias
        );
    }
    out.trim_end().to_string()
}
