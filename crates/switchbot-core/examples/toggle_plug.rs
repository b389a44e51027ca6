//! Example: Switching a Plug Mini
//!
//! Turns a Plug Mini on, waits, and turns it off again.
//!
//! Run with: `cargo run --example toggle_plug -- AA:BB:CC:DD:EE:FF`

use std::sync::Arc;
use std::time::Duration;

use switchbot_core::{BleTransport, Device, DeviceProfile, DeviceIdentity};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let Some(address) = std::env::args().nth(1) else {
        eprintln!("usage: toggle_plug <address>");
        std::process::exit(2);
    };

    let transport = Arc::new(BleTransport::new().await?);
    let plug = Device::new(
        transport,
        DeviceIdentity::new(address),
        DeviceProfile::plug_mini(),
    )?;

    let _sub = plug.subscribe(|| println!("state changed"));

    println!("on: {}", plug.turn_on().await?);
    println!("isOn = {:?}", plug.is_on());

    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("off: {}", plug.turn_off().await?);
    println!("isOn = {:?}", plug.is_on());

    plug.disconnect().await;
    Ok(())
}
