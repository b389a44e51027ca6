//! btleplug binding of the [`Transport`] trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use switchbot_types::DeviceIdentity;

use crate::error::{Error, Result};
use crate::scan::get_adapter;
use crate::traits::{DisconnectCallback, Link, NotificationCallback, Transport};
use crate::util::{create_identifier, same_address};

/// Default time spent scanning for a peripheral the adapter has not seen yet.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const LOOKUP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Translate a btleplug error into the engine's fault categories.
///
/// BlueZ reports transient D-Bus failures as `org.bluez.Error.*` strings;
/// those get the short backoff of [`Error::BusError`].
pub fn map_ble_error(err: btleplug::Error) -> Error {
    match err {
        btleplug::Error::DeviceNotFound => Error::device_not_found("peripheral"),
        btleplug::Error::NotConnected => Error::NotConnected,
        btleplug::Error::TimedOut(duration) => Error::timeout("BLE operation", duration),
        btleplug::Error::Other(inner) if inner.to_string().contains("org.bluez.Error") => {
            Error::BusError(inner.to_string())
        }
        btleplug::Error::RuntimeError(msg) if msg.contains("org.bluez.Error") => {
            Error::BusError(msg)
        }
        other => Error::Bluetooth(other),
    }
}

/// Connects to SwitchBot peripherals through a btleplug adapter.
#[derive(Debug, Clone)]
pub struct BleTransport {
    adapter: Adapter,
    lookup_timeout: Duration,
}

impl BleTransport {
    /// Use the first Bluetooth adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// How long to scan for a peripheral the adapter does not know yet.
    #[must_use]
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// The adapter in use.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn cached_peripheral(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await.map_err(map_ble_error)? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let identifier = create_identifier(&props.address.to_string(), &peripheral.id());
            if same_address(&identifier, address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.cached_peripheral(address).await? {
            debug!(address, "found peripheral in adapter cache");
            return Ok(peripheral);
        }

        info!(address, timeout = ?self.lookup_timeout, "peripheral not cached, scanning");
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(map_ble_error)?;
        let deadline = Instant::now() + self.lookup_timeout;
        let found = loop {
            if let Some(peripheral) = self.cached_peripheral(address).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(LOOKUP_POLL_INTERVAL).await;
        };
        if let Err(err) = self.adapter.stop_scan().await {
            debug!(error = %err, "failed to stop scan");
        }
        found.ok_or_else(|| Error::device_not_found(address))
    }
}

/// Runs `cleanup` when dropped unless [`SetupGuard::disarm`] was called.
///
/// Covers both an error return and the caller dropping the connect future.
struct SetupGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> SetupGuard<F> {
    fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for SetupGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Invokes the disconnect callback at most once per link.
struct DisconnectNotifier {
    fired: AtomicBool,
    callback: DisconnectCallback,
}

impl DisconnectNotifier {
    fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            (self.callback)();
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Link = BleLink;

    #[tracing::instrument(level = "debug", skip_all, fields(device = %identity))]
    async fn connect(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<BleLink> {
        let peripheral = self.find_peripheral(&identity.address).await?;

        // Listen before connecting so a drop during setup is not missed
        let mut events = self.adapter.events().await.map_err(map_ble_error)?;

        let half_open = peripheral.clone();
        let setup = SetupGuard::new(move || {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            runtime.spawn(async move {
                debug!("dropping half-open connection");
                if let Err(err) = half_open.disconnect().await {
                    debug!(error = %err, "failed to drop half-open connection");
                }
            });
        });

        if !peripheral.is_connected().await.unwrap_or(false) {
            debug!("connecting");
            peripheral.connect().await.map_err(map_ble_error)?;
        }
        peripheral.discover_services().await.map_err(map_ble_error)?;

        let characteristics: HashMap<Uuid, Characteristic> = peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid, c))
            .collect();
        let service_count = peripheral.services().len();
        debug!(
            services = service_count,
            characteristics = characteristics.len(),
            "services discovered"
        );

        let notifier = Arc::new(DisconnectNotifier {
            fired: AtomicBool::new(false),
            callback: on_disconnect,
        });
        let watched = peripheral.id();
        let watch_notifier = Arc::clone(&notifier);
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event
                    && id == watched
                {
                    debug!("adapter reported disconnect");
                    watch_notifier.fire();
                    break;
                }
            }
        });

        setup.disarm();
        Ok(BleLink {
            peripheral,
            characteristics,
            service_count,
            notifier,
            tasks: Mutex::new(vec![watcher]),
        })
    }
}

/// An established btleplug connection.
pub struct BleLink {
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    service_count: usize,
    notifier: Arc<DisconnectNotifier>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleLink")
            .field("peripheral", &self.peripheral.id())
            .field("characteristics", &self.characteristics.len())
            .field("service_count", &self.service_count)
            .finish_non_exhaustive()
    }
}

impl BleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&uuid)
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), self.service_count))
    }

    fn abort_tasks(&self) {
        for handle in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl Link for BleLink {
    fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.characteristics.contains_key(&uuid)
    }

    fn service_count(&self) -> usize {
        self.service_count
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(characteristic, data, WriteType::WithoutResponse)
            .await
            .map_err(map_ble_error)
    }

    async fn subscribe(&self, characteristic: Uuid, callback: NotificationCallback) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .subscribe(target)
            .await
            .map_err(map_ble_error)?;

        let mut stream = self.peripheral.notifications().await.map_err(map_ble_error)?;
        let handle = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == characteristic {
                    callback(Bytes::from(notification.value));
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    async fn clear_service_cache(&self) -> Result<()> {
        // btleplug rediscovers services on every connect
        debug!(peripheral = ?self.peripheral.id(), "no persistent service cache to clear");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_tasks();
        let result = self.peripheral.disconnect().await.map_err(map_ble_error);
        if let Err(err) = &result {
            warn!(error = %err, "peripheral disconnect failed");
        }
        self.notifier.fire();
        result
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
