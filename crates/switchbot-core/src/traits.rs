//! Transport abstractions.
//!
//! The protocol engine talks to a device only through [`Transport`] and the
//! [`Link`] it hands out, so the same engine drives a real BLE peripheral
//! ([`crate::ble::BleTransport`]) and the scripted
//! [`crate::mock::MockTransport`] used in tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use switchbot_types::DeviceIdentity;

use crate::advertisement::Advertisement;
use crate::error::Result;

/// Called with the payload of every notification on a subscribed characteristic.
pub type NotificationCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Called once when the link drops.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Opens connections to peripherals.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection handle produced by [`connect`](Self::connect).
    type Link: Link;

    /// Connect to the peripheral and discover its services.
    ///
    /// `on_disconnect` must be invoked when the link drops for any reason,
    /// including an explicit [`Link::disconnect`].
    async fn connect(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<Self::Link>;
}

/// An established connection.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Whether the discovered GATT table has this characteristic.
    fn has_characteristic(&self, uuid: Uuid) -> bool;

    /// Number of services discovered, for diagnostics.
    fn service_count(&self) -> usize {
        0
    }

    /// Whether the link is still up.
    async fn is_connected(&self) -> bool;

    /// Write without response.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Start notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid, callback: NotificationCallback) -> Result<()>;

    /// Drop any cached GATT table so the next connection rediscovers it.
    async fn clear_service_cache(&self) -> Result<()> {
        Ok(())
    }

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;
}

/// Produces advertisement snapshots from a discovery pass.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan for `scan_timeout`, repeating up to `retry` times while nothing
    /// is found. Results are keyed by address.
    async fn discover(
        &self,
        retry: u32,
        scan_timeout: Duration,
    ) -> Result<HashMap<String, Advertisement>>;
}
