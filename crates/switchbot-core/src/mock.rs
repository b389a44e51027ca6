//! Scripted transport for testing.
//!
//! [`MockTransport`] stands in for a BLE peripheral without any hardware.
//! Each write can be answered from a queue of scripted replies or by a
//! responder closure; connect and write faults can be injected; and the
//! link can be dropped from the "device" side to exercise recovery paths.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use switchbot_core::{Device, DeviceProfile, MockTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(MockTransport::new());
//!     transport.push_reply([0x01]);
//!     let device = Device::new(
//!         Arc::clone(&transport),
//!         transport.identity(),
//!         DeviceProfile::bot(),
//!     )
//!     .unwrap();
//!     let reply = device.send_command("570100", None).await.unwrap();
//!     assert_eq!(&reply[..], &[0x01]);
//!     assert_eq!(transport.writes(), vec![vec![0x57, 0x01, 0x00]]);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use switchbot_types::DeviceIdentity;
use switchbot_types::uuid::{READ_CHARACTERISTIC, WRITE_CHARACTERISTIC};

use crate::error::{Error, Result};
use crate::traits::{DisconnectCallback, Link, NotificationCallback, Transport};

/// Computes a reply for a written command; `None` means stay silent.
pub type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

enum Reply {
    Notify(Vec<u8>),
    Silent,
}

#[derive(Default)]
struct MockState {
    replies: VecDeque<Reply>,
    responder: Option<Responder>,
    connect_failures: VecDeque<Error>,
    write_failures: VecDeque<Error>,
    writes: Vec<Vec<u8>>,
    reply_delay: Duration,
    current: Option<Arc<LinkShared>>,
}

struct LinkShared {
    connected: AtomicBool,
    subscriber: Mutex<Option<NotificationCallback>>,
    on_disconnect: DisconnectCallback,
}

impl LinkShared {
    fn drop_link(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            (self.on_disconnect)();
        }
    }

    fn deliver(&self, data: Vec<u8>) {
        let subscriber = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = subscriber {
            callback(Bytes::from(data));
        }
    }
}

/// A scripted peripheral.
pub struct MockTransport {
    address: String,
    state: Arc<Mutex<MockState>>,
    missing_characteristic: AtomicBool,
    connects: AtomicU32,
    disconnects: Arc<AtomicU32>,
    cache_clears: Arc<AtomicU32>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("address", &self.address)
            .field("connects", &self.connect_count())
            .field("disconnects", &self.disconnect_count())
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a mock with a random address.
    pub fn new() -> Self {
        Self::with_address(format!(
            "MOCK-{:06X}",
            rand::random::<u32>() % 0xFFFFFF
        ))
    }

    /// Create a mock with a fixed address.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Arc::new(Mutex::new(MockState::default())),
            missing_characteristic: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            disconnects: Arc::new(AtomicU32::new(0)),
            cache_clears: Arc::new(AtomicU32::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address of the simulated peripheral.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Identity of the simulated peripheral.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.address.clone())
    }

    /// Queue a reply notification for the next unanswered write.
    pub fn push_reply(&self, reply: impl AsRef<[u8]>) {
        self.state()
            .replies
            .push_back(Reply::Notify(reply.as_ref().to_vec()));
    }

    /// Let the next unanswered write go without a reply.
    pub fn push_silence(&self) {
        self.state().replies.push_back(Reply::Silent);
    }

    /// Answer writes the queue does not cover.
    pub fn set_responder(&self, responder: Responder) {
        self.state().responder = Some(responder);
    }

    /// Delay reply notifications by `delay`.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.state().reply_delay = delay;
    }

    /// Fail the next connect with `error`.
    pub fn fail_next_connect(&self, error: Error) {
        self.state().connect_failures.push_back(error);
    }

    /// Fail the next write with `error`.
    pub fn fail_next_write(&self, error: Error) {
        self.state().write_failures.push_back(error);
    }

    /// Make the GATT table lack the SwitchBot characteristics.
    pub fn set_missing_characteristic(&self, missing: bool) {
        self.missing_characteristic.store(missing, Ordering::SeqCst);
    }

    /// Drop the current link from the device side.
    pub fn trigger_disconnect(&self) {
        let current = self.state().current.take();
        if let Some(link) = current {
            link.drop_link();
        }
    }

    /// Send an unsolicited notification on the current link.
    pub fn notify(&self, data: impl AsRef<[u8]>) {
        let current = self.state().current.clone();
        if let Some(link) = current {
            link.deliver(data.as_ref().to_vec());
        }
    }

    /// Every payload written so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of disconnects requested by the client.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of service cache clears.
    pub fn cache_clear_count(&self) -> u32 {
        self.cache_clears.load(Ordering::SeqCst)
    }

    /// Whether a link is currently up.
    pub fn is_connected(&self) -> bool {
        self.state()
            .current
            .as_ref()
            .is_some_and(|link| link.connected.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn connect(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<MockLink> {
        let shared = {
            let mut state = self.state();
            if let Some(err) = state.connect_failures.pop_front() {
                debug!(device = %identity, error = %err, "mock connect failure");
                return Err(err);
            }
            let shared = Arc::new(LinkShared {
                connected: AtomicBool::new(true),
                subscriber: Mutex::new(None),
                on_disconnect,
            });
            state.current = Some(Arc::clone(&shared));
            shared
        };
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockLink {
            shared,
            state: Arc::clone(&self.state),
            has_characteristics: !self.missing_characteristic.load(Ordering::SeqCst),
            disconnects: Arc::clone(&self.disconnects),
            cache_clears: Arc::clone(&self.cache_clears),
        })
    }
}

/// Link handed out by [`MockTransport`].
pub struct MockLink {
    shared: Arc<LinkShared>,
    state: Arc<Mutex<MockState>>,
    has_characteristics: bool,
    disconnects: Arc<AtomicU32>,
    cache_clears: Arc<AtomicU32>,
}

impl MockLink {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Link for MockLink {
    fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.has_characteristics && (uuid == READ_CHARACTERISTIC || uuid == WRITE_CHARACTERISTIC)
    }

    fn service_count(&self) -> usize {
        1
    }

    async fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if characteristic != WRITE_CHARACTERISTIC {
            return Err(Error::characteristic_not_found(characteristic.to_string(), 1));
        }
        let (scripted, responder, delay) = {
            let mut state = self.state();
            state.writes.push(data.to_vec());
            if let Some(err) = state.write_failures.pop_front() {
                return Err(err);
            }
            (
                state.replies.pop_front(),
                state.responder.clone(),
                state.reply_delay,
            )
        };
        let reply = match scripted {
            Some(Reply::Notify(reply)) => Some(reply),
            Some(Reply::Silent) => None,
            None => responder.and_then(|respond| respond(data)),
        };

        let Some(reply) = reply else {
            return Ok(());
        };
        if delay.is_zero() {
            self.shared.deliver(reply);
        } else {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.deliver(reply);
            });
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid, callback: NotificationCallback) -> Result<()> {
        if characteristic != READ_CHARACTERISTIC {
            return Err(Error::characteristic_not_found(characteristic.to_string(), 1));
        }
        *self
            .shared
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
        Ok(())
    }

    async fn clear_service_cache(&self) -> Result<()> {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state();
            if state
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &self.shared))
            {
                state.current = None;
            }
        }
        self.shared.drop_link();
        Ok(())
    }
}
