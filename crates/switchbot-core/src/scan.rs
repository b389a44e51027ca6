//! Device discovery and scanning.
//!
//! A discovery pass collects every peripheral that looks like a SwitchBot
//! and turns its broadcast into an [`Advertisement`] with empty decoded
//! state. Model specific decoding is left to the caller.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use switchbot_types::DeviceIdentity;
use switchbot_types::uuid::{ADVERTISEMENT_SERVICE_DATA, MANUFACTURER_ID, SWITCHBOT_SERVICE};

use crate::advertisement::{Advertisement, UNKNOWN_RSSI};
use crate::ble::map_ble_error;
use crate::config::DEFAULT_SCAN_TIMEOUT;
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::traits::Scanner;
use crate::util::create_identifier;

const RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Options for a discovery pass.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long each scan runs.
    pub duration: Duration,
    /// Scans repeated while nothing is found.
    pub retry: u32,
    /// Report every peripheral, not just SwitchBot ones.
    pub all_devices: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: DEFAULT_SCAN_TIMEOUT,
            retry: 0,
            all_devices: false,
        }
    }
}

impl ScanOptions {
    /// Create scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set scan duration in seconds.
    #[must_use]
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = Duration::from_secs(secs);
        self
    }

    /// Set how many times an empty scan is repeated.
    #[must_use]
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Include peripherals that are not SwitchBot devices.
    #[must_use]
    pub fn all_devices(mut self) -> Self {
        self.all_devices = true;
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(map_ble_error)?;
    let adapters = manager.adapters().await.map_err(map_ble_error)?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Whether the broadcast carries SwitchBot service data, the command
/// service, or the SwitchBot manufacturer id.
pub fn is_switchbot(properties: &PeripheralProperties) -> bool {
    properties.manufacturer_data.contains_key(&MANUFACTURER_ID)
        || properties
            .service_data
            .keys()
            .any(|uuid| *uuid == ADVERTISEMENT_SERVICE_DATA || *uuid == SWITCHBOT_SERVICE)
        || properties.services.contains(&SWITCHBOT_SERVICE)
}

/// Build a snapshot from broadcast properties.
pub fn advertisement_from_properties(
    identifier: String,
    properties: &PeripheralProperties,
) -> Advertisement {
    let identity = DeviceIdentity {
        address: identifier,
        name: properties.local_name.clone(),
    };
    let service_data = properties
        .service_data
        .get(&ADVERTISEMENT_SERVICE_DATA)
        .or_else(|| properties.service_data.get(&SWITCHBOT_SERVICE));
    Advertisement::from_raw(
        identity,
        properties.rssi.unwrap_or(UNKNOWN_RSSI),
        properties
            .manufacturer_data
            .get(&MANUFACTURER_ID)
            .map(Vec::as_slice),
        service_data.map(Vec::as_slice),
    )
}

/// Run discovery passes until something is found or the retries run out.
#[tracing::instrument(level = "info", skip_all, fields(duration = ?options.duration, retry = options.retry))]
pub async fn discover(options: ScanOptions) -> Result<HashMap<String, Advertisement>> {
    let adapter = get_adapter().await?;
    discover_with_adapter(&adapter, &options).await
}

/// [`discover`] on a specific adapter.
pub async fn discover_with_adapter(
    adapter: &Adapter,
    options: &ScanOptions,
) -> Result<HashMap<String, Advertisement>> {
    let mut attempt = 0;
    let mut delay = RETRY_DELAY;

    loop {
        let found = scan_once(adapter, options).await?;
        if !found.is_empty() || attempt >= options.retry {
            return Ok(found);
        }
        attempt += 1;
        warn!(attempt, max = options.retry, "no devices found, retrying");
        sleep(delay).await;
        delay = delay.saturating_mul(2).min(MAX_RETRY_DELAY);
    }
}

async fn scan_once(
    adapter: &Adapter,
    options: &ScanOptions,
) -> Result<HashMap<String, Advertisement>> {
    info!("Starting BLE scan for {} seconds...", options.duration.as_secs_f32());

    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(map_ble_error)?;
    sleep(options.duration).await;
    adapter.stop_scan().await.map_err(map_ble_error)?;

    let mut discovered = HashMap::new();
    for peripheral in adapter.peripherals().await.map_err(map_ble_error)? {
        match process_peripheral(&peripheral, options.all_devices).await {
            Ok(Some(advertisement)) => {
                debug!(device = %advertisement.identity, rssi = advertisement.rssi, "found device");
                discovered.insert(advertisement.identity.address.clone(), advertisement);
            }
            Ok(None) => {}
            Err(err) => debug!(error = %err, "error processing peripheral"),
        }
    }

    info!("Scan complete. Found {} device(s)", discovered.len());
    Ok(discovered)
}

async fn process_peripheral(
    peripheral: &Peripheral,
    all_devices: bool,
) -> Result<Option<Advertisement>> {
    let Some(properties) = peripheral.properties().await.map_err(map_ble_error)? else {
        return Ok(None);
    };
    if !all_devices && !is_switchbot(&properties) {
        return Ok(None);
    }
    let identifier = create_identifier(&properties.address.to_string(), &peripheral.id());
    Ok(Some(advertisement_from_properties(identifier, &properties)))
}

/// [`Scanner`] backed by a btleplug adapter.
#[derive(Debug, Clone)]
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    /// Scan with the first Bluetooth adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self {
            adapter: get_adapter().await?,
        })
    }

    /// Scan with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Scanner for BleScanner {
    async fn discover(
        &self,
        retry: u32,
        scan_timeout: Duration,
    ) -> Result<HashMap<String, Advertisement>> {
        let options = ScanOptions::new().duration(scan_timeout).retry(retry);
        discover_with_adapter(&self.adapter, &options).await
    }
}
