//! SwitchBot device client.
//!
//! A [`Device`] composes the command [`Engine`], the [`StateCache`] and a
//! [`DeviceProfile`]. Model differences are data on the profile; the engine
//! and cache are shared by every model.

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use switchbot_types::{DeviceIdentity, SwitchbotModel};

use crate::advertisement::{Advertisement, SEQUENCE_NUMBER_KEY};
use crate::commands::{self, GET_BASIC_SETTINGS};
use crate::config::DeviceConfig;
use crate::connection::ConnectionManager;
use crate::encryption::EncryptionStrategy;
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, DisconnectReason, EventDispatcher, EventReceiver};
use crate::profiles::{AfterAction, DeviceProfile, LOCK_SUCCESS_VALUES, LockCommands};
use crate::protocol::Engine;
use crate::state::{StateCache, StateMap, Subscription};
use crate::traits::{Scanner, Transport};

/// Decodes a model specific status block (lock info replies and pushes).
pub type StatusDecoder = Arc<dyn Fn(&[u8]) -> StateMap + Send + Sync>;

/// Builder for [`Device`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use switchbot_core::{Device, DeviceConfig, DeviceProfile, EncryptionStrategy, MockTransport};
/// use switchbot_types::SwitchbotModel;
///
/// let transport = Arc::new(MockTransport::new());
/// let device = Device::builder(
///     Arc::clone(&transport),
///     transport.identity(),
///     DeviceProfile::lock(SwitchbotModel::Lock).unwrap(),
/// )
/// .config(DeviceConfig::default().retry_count(4))
/// .encryption(EncryptionStrategy::session("01", "2b7e151628aed2a6abf7158809cf4f3c").unwrap())
/// .build()
/// .unwrap();
/// assert!(device.is_encrypted());
/// ```
pub struct DeviceBuilder<T: Transport> {
    transport: Arc<T>,
    identity: DeviceIdentity,
    profile: DeviceProfile,
    config: DeviceConfig,
    password: Option<String>,
    encryption: EncryptionStrategy,
    decoder: Option<StatusDecoder>,
    event_capacity: usize,
}

impl<T: Transport> DeviceBuilder<T> {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: DeviceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the device password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the encryption strategy.
    #[must_use]
    pub fn encryption(mut self, encryption: EncryptionStrategy) -> Self {
        self.encryption = encryption;
        self
    }

    /// Register the decoder for status blocks.
    #[must_use]
    pub fn status_decoder(mut self, decoder: StatusDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Device<T>> {
        self.config.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be non-zero"));
        }
        if self.profile.requires_encryption() && !self.encryption.is_encrypted() {
            return Err(Error::invalid_config("key_id is missing"));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> Device<T> {
        let events = EventDispatcher::new(self.event_capacity.max(1));
        let connection = ConnectionManager::new(
            self.transport,
            self.identity,
            self.config.clone(),
            events.clone(),
        );
        let state = Arc::new(StateCache::new(self.config.passive_poll_interval));
        let engine = Engine::new(
            connection,
            Arc::clone(&state),
            self.encryption,
            self.password.as_deref(),
            events.clone(),
        );
        let (refresh_tx, refresh_rx) = mpsc::channel(1);

        let inner = Arc::new(DeviceInner {
            engine,
            state,
            profile: self.profile,
            decoder: RwLock::new(self.decoder),
            events,
            refresh_tx,
            refresh_rx: std::sync::Mutex::new(Some(refresh_rx)),
        });
        let weak: Weak<DeviceInner<T>> = Arc::downgrade(&inner);
        inner
            .connection()
            .set_notification_handler(Arc::new(move |data: Bytes| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_notification(data);
                }
            }));
        Device { inner }
    }
}

/// A SwitchBot device.
///
/// Commands are serialized per device; state reads never block on them.
/// Wrap in `Arc` to share across tasks.
pub struct Device<T: Transport> {
    inner: Arc<DeviceInner<T>>,
}

struct DeviceInner<T: Transport> {
    engine: Engine<T>,
    state: Arc<StateCache>,
    profile: DeviceProfile,
    decoder: RwLock<Option<StatusDecoder>>,
    events: EventDispatcher,
    refresh_tx: mpsc::Sender<()>,
    refresh_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl<T: Transport> std::fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.identity())
            .field("model", &self.inner.profile.model)
            .field("engine", &self.inner.engine)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Device<T> {
    /// Create an unencrypted device with default configuration.
    ///
    /// Profiles that need a key (locks) are rejected with
    /// [`Error::InvalidConfig`]; use [`Device::builder`] for those.
    pub fn new(
        transport: Arc<T>,
        identity: DeviceIdentity,
        profile: DeviceProfile,
    ) -> Result<Self> {
        Self::builder(transport, identity, profile).build()
    }

    /// Start building a device.
    pub fn builder(
        transport: Arc<T>,
        identity: DeviceIdentity,
        profile: DeviceProfile,
    ) -> DeviceBuilder<T> {
        DeviceBuilder {
            transport,
            identity,
            profile,
            config: DeviceConfig::default(),
            password: None,
            encryption: EncryptionStrategy::None,
            decoder: None,
            event_capacity: 64,
        }
    }

    /// Build an encrypted device and check the key with a basic-info round
    /// trip.
    ///
    /// Invalid key material, a refused handshake or a rejected command
    /// yields `Ok(false)`; transport failures propagate.
    pub async fn verify_encryption_key(
        transport: Arc<T>,
        identity: DeviceIdentity,
        model: SwitchbotModel,
        key_id: &str,
        encryption_key: &str,
    ) -> Result<bool> {
        let Ok(encryption) = EncryptionStrategy::session(key_id, encryption_key) else {
            return Ok(false);
        };
        let device = Self::builder(transport, identity, DeviceProfile::for_model(model)?)
            .encryption(encryption)
            .build()?;
        let verified = match device.get_basic_info().await {
            Ok(info) => Ok(info.is_some()),
            Err(Error::CommandFailed { .. } | Error::EncryptionNotInitialized) => Ok(false),
            Err(err) => Err(err),
        };
        device.disconnect().await;
        verified
    }

    /// Peripheral identity.
    pub fn identity(&self) -> DeviceIdentity {
        self.inner.connection().identity()
    }

    /// Display name, if known.
    pub fn name(&self) -> Option<String> {
        self.identity().name
    }

    /// Device address.
    pub fn address(&self) -> String {
        self.identity().address
    }

    /// Profile in use.
    pub fn profile(&self) -> &DeviceProfile {
        &self.inner.profile
    }

    /// Whether commands are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.inner.engine.is_encrypted()
    }

    /// Whether a connection is up.
    pub async fn is_connected(&self) -> bool {
        self.inner.connection().is_connected().await
    }

    /// Send a raw command key and return the reply.
    pub async fn send_command(&self, key: &str, retry: Option<u32>) -> Result<Bytes> {
        self.inner.engine.send(key, retry).await
    }

    /// Send a raw command key outside the session cipher.
    pub async fn send_command_unencrypted(&self, key: &str, retry: Option<u32>) -> Result<Bytes> {
        self.inner.engine.send_unencrypted(key, retry).await
    }

    /// Read battery and firmware (plus the status block on locks).
    pub async fn get_basic_info(&self) -> Result<Option<StateMap>> {
        self.inner.get_basic_info().await
    }

    /// Refresh state over a connection.
    pub async fn update(&self) -> Result<()> {
        self.inner.update().await
    }

    /// Turn the device on.
    pub async fn turn_on(&self) -> Result<bool> {
        self.inner.switch_action(Action::TurnOn).await
    }

    /// Turn the device off.
    pub async fn turn_off(&self) -> Result<bool> {
        self.inner.switch_action(Action::TurnOff).await
    }

    /// Press.
    pub async fn press(&self) -> Result<bool> {
        self.inner.switch_action(Action::Press).await
    }

    /// Lock.
    pub async fn lock(&self) -> Result<bool> {
        let key = self.inner.lock_commands("lock")?.lock.clone();
        self.inner.lock_action(&key).await
    }

    /// Unlock (and unlatch, where the firmware supports it).
    pub async fn unlock(&self) -> Result<bool> {
        let key = self.inner.lock_commands("unlock")?.unlock.clone();
        self.inner.lock_action(&key).await
    }

    /// Unlock without unlatching.
    pub async fn unlock_without_unlatch(&self) -> Result<bool> {
        let key = self
            .inner
            .lock_commands("unlock_without_unlatch")?
            .unlock_without_unlatch
            .clone();
        self.inner.lock_action(&key).await
    }

    /// Ask the device to push status changes.
    pub async fn enable_notifications(&self) -> Result<bool> {
        self.inner.enable_notifications().await
    }

    /// Stop status pushes.
    pub async fn disable_notifications(&self) -> Result<bool> {
        self.inner.disable_notifications().await
    }

    /// Feed a broadcast through the profile's acceptance policy.
    pub fn update_from_advertisement(&self, advertisement: Advertisement) {
        self.inner.update_from_advertisement(advertisement);
    }

    /// Refresh the snapshot from a discovery pass.
    pub async fn get_device_data<S: Scanner>(&self, scanner: &S) -> Result<Option<Arc<Advertisement>>> {
        let config = self.inner.connection().config();
        let mut found = scanner
            .discover(config.retry_count, config.scan_timeout)
            .await?;
        if let Some(advertisement) = found.remove(&self.address()) {
            self.inner.state.replace_snapshot(advertisement);
        }
        Ok(self.inner.state.snapshot())
    }

    /// Whether the caller should poll. Devices that never need polling
    /// always say no.
    pub fn poll_needed(&self, since_last_poll: Option<Duration>) -> bool {
        self.inner.profile.poll && self.inner.state.poll_needed(since_last_poll)
    }

    /// Register a state change callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.state.subscribe(Arc::new(callback))
    }

    /// Receive device events.
    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Signal strength of the latest snapshot, or −127.
    pub fn rssi(&self) -> i16 {
        self.inner.state.rssi()
    }

    /// Raw snapshot data.
    pub fn data(&self) -> StateMap {
        self.inner.state.data()
    }

    /// Decoded state.
    pub fn parsed_data(&self) -> StateMap {
        self.inner.state.parsed_data()
    }

    /// Read a state field, override layer first.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.inner.state.value(key)
    }

    /// Read a per-channel state field.
    pub fn channel_value(&self, channel: u8, key: &str) -> Option<Value> {
        self.inner.state.channel_value(channel, key)
    }

    /// Battery level in percent.
    pub fn battery_percent(&self) -> Option<u8> {
        self.value("battery")
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
    }

    /// Switch mode (Bot), from cache.
    pub fn switch_mode(&self) -> Option<bool> {
        self.value("switchMode").and_then(|v| v.as_bool())
    }

    /// Switch state, from cache.
    pub fn is_on(&self) -> Option<bool> {
        self.value("isOn").and_then(|v| v.as_bool())
    }

    /// Start the task that serves refresh requests.
    ///
    /// Requests raised by broadcasts coalesce into a single pending refresh.
    /// Returns `None` if the worker was already started.
    pub fn spawn_refresh_worker(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self
            .inner
            .refresh_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let weak = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = rx.recv() => {
                        if request.is_none() {
                            break;
                        }
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        if let Err(err) = inner.update().await {
                            warn!(device = %inner.connection().identity(), error = %err, "background refresh failed");
                        }
                    }
                }
            }
            debug!("refresh worker stopped");
        }))
    }

    /// Disconnect now.
    pub async fn disconnect(&self) {
        self.inner
            .connection()
            .force_disconnect(DisconnectReason::Requested)
            .await;
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    TurnOn,
    TurnOff,
    Press,
}

impl Action {
    fn name(self) -> &'static str {
        match self {
            Action::TurnOn => "turn_on",
            Action::TurnOff => "turn_off",
            Action::Press => "press",
        }
    }
}

impl<T: Transport> DeviceInner<T> {
    fn connection(&self) -> &Arc<ConnectionManager<T>> {
        self.engine.connection()
    }

    fn display_name(&self) -> String {
        self.connection().identity().to_string()
    }

    fn check_result(&self, reply: &[u8], index: usize, expected: &[u8]) -> Result<bool> {
        commands::check_command_result(
            Some(reply),
            index,
            expected,
            &self.display_name(),
            self.state.rssi(),
        )
    }

    fn fire_callbacks(&self) {
        self.state.fire_callbacks();
        self.events.send(DeviceEvent::StateChanged {
            device: self.connection().identity(),
            data: self.state.parsed_data(),
        });
    }

    fn decode_status(&self, block: &[u8]) -> Option<StateMap> {
        let decoder = self
            .decoder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match decoder {
            Some(decode) => Some(decode(block)),
            None => {
                debug!(block = %hex::encode(block), "no status decoder registered");
                None
            }
        }
    }

    async fn basic_info_reply(&self) -> Result<Option<Bytes>> {
        let reply = self.engine.send(GET_BASIC_SETTINGS, None).await?;
        if commands::is_unsuccessful(&reply) {
            error!(device = %self.display_name(), "unsuccessful, please try again");
            return Ok(None);
        }
        Ok(Some(reply))
    }

    async fn get_basic_info(&self) -> Result<Option<StateMap>> {
        let Some(lock) = &self.profile.lock else {
            return Ok(self
                .basic_info_reply()
                .await?
                .and_then(|reply| commands::parse_basic_info(&reply)));
        };

        let lock_info = self.engine.send(&lock.info, None).await?;
        if !self.check_result(&lock_info, 0, LOCK_SUCCESS_VALUES)? {
            error!(device = %self.display_name(), "unsuccessful, please try again");
            return Ok(None);
        }
        debug!(lock_info = %hex::encode(&lock_info), "lock info");
        let Some(basic) = self.basic_info_reply().await? else {
            return Ok(None);
        };
        let mut info = self
            .decode_status(lock_info.get(1..).unwrap_or_default())
            .unwrap_or_default();
        if let Some(parsed) = commands::parse_basic_info(&basic) {
            info.extend(parsed);
        }
        Ok(Some(info))
    }

    async fn update(&self) -> Result<()> {
        if !self.profile.poll {
            // State arrives in every broadcast
            self.state.record_full_update();
            return Ok(());
        }
        if let Some(info) = self.get_basic_info().await? {
            self.state.record_full_update();
            self.state
                .update_parsed(&self.connection().identity(), &info);
            self.fire_callbacks();
        }
        Ok(())
    }

    async fn switch_action(&self, action: Action) -> Result<bool> {
        let key = match action {
            Action::TurnOn => &self.profile.turn_on,
            Action::TurnOff => &self.profile.turn_off,
            Action::Press => &self.profile.press,
        };
        let Some(key) = key else {
            return Err(Error::unsupported(
                action.name(),
                self.connection().identity().address,
            ));
        };

        let reply = self.engine.send(key, None).await?;
        let ok = self.check_result(
            &reply,
            self.profile.success_index,
            &self.profile.success_values,
        )?;

        match (self.profile.after_action, action) {
            (AfterAction::Refresh, _) => self.update().await?,
            (AfterAction::OverrideSwitch, Action::TurnOn | Action::TurnOff) => {
                let mut fields = StateMap::new();
                fields.insert(
                    "isOn".to_string(),
                    Value::Bool(matches!(action, Action::TurnOn)),
                );
                self.state
                    .override_state(&self.connection().identity(), fields);
                self.fire_callbacks();
            }
            (AfterAction::OverrideSwitch, Action::Press) => {}
        }
        Ok(ok)
    }

    fn lock_commands(&self, operation: &str) -> Result<&LockCommands> {
        self.profile.lock.as_ref().ok_or_else(|| {
            Error::unsupported(operation, self.connection().identity().address)
        })
    }

    async fn lock_action(&self, key: &str) -> Result<bool> {
        self.enable_notifications().await?;
        let reply = self.engine.send(key, None).await?;
        let ok = self.check_result(&reply, 0, LOCK_SUCCESS_VALUES)?;

        if let Some(basic) = self.basic_info_reply().await? {
            self.state.record_full_update();
            match commands::parse_basic_info(&basic) {
                Some(info) => {
                    self.state
                        .update_parsed(&self.connection().identity(), &info);
                }
                None => warn!(basic = %hex::encode(&basic), "invalid basic data received"),
            }
            self.fire_callbacks();
        }
        Ok(ok)
    }

    async fn enable_notifications(&self) -> Result<bool> {
        if self.connection().notifications_enabled() {
            return Ok(true);
        }
        let key = self.lock_commands("enable_notifications")?.enable_notifications.clone();
        let reply = self.engine.send(&key, None).await?;
        if self.check_result(&reply, 0, LOCK_SUCCESS_VALUES)? {
            self.connection().set_notifications_enabled(true);
        }
        Ok(self.connection().notifications_enabled())
    }

    async fn disable_notifications(&self) -> Result<bool> {
        if !self.connection().notifications_enabled() {
            return Ok(true);
        }
        let key = self.lock_commands("disable_notifications")?.disable_notifications.clone();
        let reply = self.engine.send(&key, None).await?;
        if self.check_result(&reply, 0, LOCK_SUCCESS_VALUES)? {
            self.connection().set_notifications_enabled(false);
        }
        Ok(!self.connection().notifications_enabled())
    }

    fn handle_notification(&self, data: Bytes) {
        let is_push = self.profile.push_prefix.is_some_and(|prefix| {
            self.connection().notifications_enabled() && data.first() == Some(&prefix)
        });
        if !is_push {
            self.engine.handle_notification(data);
            return;
        }
        if self.connection().expected_disconnect() {
            debug!("ignoring push during expected disconnect");
            return;
        }
        self.handle_push(&data);
    }

    fn handle_push(&self, data: &[u8]) {
        let identity = self.connection().identity();
        self.events.send(DeviceEvent::PushReceived {
            device: identity.clone(),
            payload: hex::encode(data),
        });

        let block = data.get(4..).unwrap_or_default();
        let block = if self.engine.is_encrypted() {
            match self.connection().decrypt(block) {
                Ok(plain) => plain,
                Err(err) => {
                    warn!(device = %identity, error = %err, "failed to decrypt push");
                    return;
                }
            }
        } else {
            block.to_vec()
        };
        let Some(status) = self.decode_status(&block) else {
            return;
        };
        if self.state.update_parsed(&identity, &status) {
            // Leave notifications on in case the device is operated by hand
            // before the link goes idle.
            self.connection().reset_disconnect_timer();
            self.fire_callbacks();
        }
    }

    fn update_from_advertisement(&self, advertisement: Advertisement) {
        let connection = self.connection();
        if connection.identity().has_changed(&advertisement.identity) {
            connection.set_identity(advertisement.identity.clone());
        }

        let policy = self.profile.policy;
        if !policy.accepts(connection.has_session()) {
            debug!(device = %connection.identity(), "ignoring advertisement data during connection");
            return;
        }

        let before = self.state.value(SEQUENCE_NUMBER_KEY);
        let changed = self.state.apply_advertisement(advertisement);
        let after = self.state.value(SEQUENCE_NUMBER_KEY);
        debug!(?before, ?after, changed, "advertisement applied");

        if policy.needs_refresh(before.as_ref(), after.as_ref()) {
            self.request_refresh();
        }
        if changed {
            self.fire_callbacks();
        }
    }

    fn request_refresh(&self) {
        match self.refresh_tx.try_send(()) {
            Ok(()) => info!(device = %self.display_name(), "sequence changed, refresh scheduled"),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("refresh already pending");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("refresh worker stopped, dropping request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::mock::MockTransport;

    fn bot(transport: &Arc<MockTransport>) -> Device<MockTransport> {
        Device::new(
            Arc::clone(transport),
            transport.identity(),
            DeviceProfile::bot(),
        )
        .unwrap()
    }

    fn parsed(value: Value) -> StateMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_refreshes_after_action() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply([0x01]);
        transport.push_reply([0x01, 0x5a, 0x2d]);
        let device = bot(&transport);

        assert!(device.press().await.unwrap());
        assert_eq!(device.battery_percent(), Some(90));
        assert_eq!(device.value("firmware"), Some(json!(4.5)));
        assert_eq!(
            transport.writes(),
            vec![vec![0x57, 0x01, 0x00], vec![0x57, 0x02]]
        );
        assert!(!device.poll_needed(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsuccessful_basic_info() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply([0x07]);
        let device = bot(&transport);
        assert_eq!(device.get_basic_info().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_action_skips_transport() {
        let transport = Arc::new(MockTransport::new());
        let device = Device::new(
            Arc::clone(&transport),
            transport.identity(),
            DeviceProfile::plug_mini(),
        )
        .unwrap();
        let err = device.press().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert!(err.to_string().contains("does not support press"));
        assert!(matches!(device.lock().await, Err(Error::Unsupported { .. })));
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plug_override_and_callbacks() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply([0x01, 0x80]);
        let device = Device::new(
            Arc::clone(&transport),
            transport.identity(),
            DeviceProfile::plug_mini(),
        )
        .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = device.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(device.turn_on().await.unwrap());
        assert_eq!(device.is_on(), Some(true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!device.poll_needed(None));

        // Ignored while the link is up
        let mut adv = Advertisement::placeholder(transport.identity())
            .with_parsed(parsed(json!({"isOn": false})));
        adv.rssi = -50;
        device.update_from_advertisement(adv.clone());
        assert_eq!(device.is_on(), Some(true));

        device.disconnect().await;
        device.update_from_advertisement(adv);
        assert_eq!(device.is_on(), Some(false));
        assert_eq!(device.rssi(), -50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_failed_on_short_reply() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply([0x01]);
        let device = Device::new(
            Arc::clone(&transport),
            transport.identity(),
            DeviceProfile::plug_mini(),
        )
        .unwrap();
        assert!(matches!(
            device.turn_off().await,
            Err(Error::CommandFailed { index: 1, .. })
        ));
    }

    struct FixedScanner(HashMap<String, Advertisement>);

    #[async_trait]
    impl Scanner for FixedScanner {
        async fn discover(
            &self,
            _retry: u32,
            _scan_timeout: Duration,
        ) -> Result<HashMap<String, Advertisement>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_get_device_data() {
        let transport = Arc::new(MockTransport::with_address("AA:BB:CC:DD:EE:FF"));
        let device = bot(&transport);
        let mut adv = Advertisement::placeholder(transport.identity());
        adv.rssi = -42;
        let scanner = FixedScanner(HashMap::from([(
            "AA:BB:CC:DD:EE:FF".to_string(),
            adv,
        )]));

        let snapshot = device.get_device_data(&scanner).await.unwrap().unwrap();
        assert_eq!(snapshot.rssi, -42);

        let empty = FixedScanner(HashMap::new());
        assert!(device.get_device_data(&empty).await.unwrap().is_some());
    }
}
