//! Hardware integration tests for switchbot-core
//!
//! These tests require actual BLE hardware and should be run with:
//! ```
//! cargo test --package switchbot-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure devices via environment variables:
//! - `SWITCHBOT_BOT`: address of a Bot
//! - `SWITCHBOT_LOCK`: address of a lock, together with
//!   `SWITCHBOT_KEY_ID` and `SWITCHBOT_ENCRYPTION_KEY`
//!
//! Example:
//! ```
//! SWITCHBOT_BOT="AA:BB:CC:DD:EE:FF" cargo test --package switchbot-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use switchbot_core::scan::{ScanOptions, discover};
use switchbot_core::{BleTransport, Device, DeviceIdentity, DeviceProfile, SwitchbotModel};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

// =============================================================================
// Scan Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_discovers_devices() {
    let options = ScanOptions::new().duration_secs(10);

    match timeout(BLE_TIMEOUT, discover(options)).await {
        Ok(Ok(devices)) => {
            println!("Scan discovered {} devices:", devices.len());
            for adv in devices.values() {
                println!("  - {} rssi {}", adv.identity, adv.rssi);
            }
        }
        Ok(Err(e)) => panic!("Scan failed: {}", e),
        Err(_) => panic!("Scan timed out after 30 seconds"),
    }
}

// =============================================================================
// Command Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_bot_basic_info() {
    let Some(address) = env_var("SWITCHBOT_BOT") else {
        println!("SKIP: No bot configured (set SWITCHBOT_BOT env var)");
        return;
    };

    let transport = Arc::new(BleTransport::new().await.expect("no adapter"));
    let bot = Device::new(transport, DeviceIdentity::new(address), DeviceProfile::bot())
        .expect("invalid device config");

    let info = timeout(BLE_TIMEOUT, bot.get_basic_info())
        .await
        .expect("basic info timed out")
        .expect("basic info failed");
    println!("Basic info: {:?}", info);
    assert!(info.is_some_and(|i| i.contains_key("battery")));

    bot.disconnect().await;
    assert!(!bot.is_connected().await);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_lock_key_verification() {
    let (Some(address), Some(key_id), Some(key)) = (
        env_var("SWITCHBOT_LOCK"),
        env_var("SWITCHBOT_KEY_ID"),
        env_var("SWITCHBOT_ENCRYPTION_KEY"),
    ) else {
        println!("SKIP: No lock configured");
        return;
    };

    let transport = Arc::new(BleTransport::new().await.expect("no adapter"));
    let verified = timeout(
        BLE_TIMEOUT,
        Device::verify_encryption_key(
            transport,
            DeviceIdentity::new(address),
            SwitchbotModel::Lock,
            &key_id,
            &key,
        ),
    )
    .await
    .expect("verification timed out")
    .expect("verification failed");
    assert!(verified, "key was rejected by the lock");
}
