//! Example: Scanning for SwitchBot devices
//!
//! Lists every peripheral broadcasting SwitchBot service data, the command
//! service or the SwitchBot manufacturer id.
//!
//! Run with: `cargo run --example scan_devices`

use switchbot_core::scan::{self, ScanOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Scanning for SwitchBot devices...");
    println!();

    let options = ScanOptions::default().duration_secs(10).retry(1);
    let devices = scan::discover(options).await?;

    if devices.is_empty() {
        println!("No SwitchBot devices found.");
        println!();
        println!("Make sure:");
        println!("  - Bluetooth is enabled on this computer");
        println!("  - The device is within range");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    println!();

    let mut devices: Vec<_> = devices.into_values().collect();
    devices.sort_by_key(|adv| std::cmp::Reverse(adv.rssi));
    for adv in &devices {
        let name = adv.identity.name.as_deref().unwrap_or("Unknown");
        println!("  {}", name);
        println!("    Address: {}", adv.identity.address);
        println!("    RSSI: {} dBm", adv.rssi);
        if let Some(raw) = adv.data.get("rawServiceData").and_then(|v| v.as_str()) {
            println!("    Service data: {}", raw);
        }
        if let Some(raw) = adv.data.get("rawManufacturerData").and_then(|v| v.as_str()) {
            println!("    Mfg data: {}", raw);
        }
        println!();
    }

    Ok(())
}
