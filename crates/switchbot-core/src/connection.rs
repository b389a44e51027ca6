//! Connection lifetime for a single device.
//!
//! A [`ConnectionManager`] owns at most one live [`Link`]. Connections are
//! opened lazily by the first command and closed by an idle timer that is
//! re-armed on every use. The session cipher lives here too because its IV
//! is only valid for the connection it was negotiated on.
//!
//! # Locking
//!
//! - The connect lock serializes connect and disconnect.
//! - The operation lock serializes whole commands (retries included). The
//!   idle timer consults it to avoid tearing down a link mid-command.
//! - Bookkeeping sits behind a short-lived std mutex that is never held
//!   across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use switchbot_types::DeviceIdentity;
use switchbot_types::uuid::{READ_CHARACTERISTIC, WRITE_CHARACTERISTIC};

use crate::cipher::{DeviceKey, SessionCipher};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, DisconnectReason, EventDispatcher};
use crate::traits::{DisconnectCallback, Link, NotificationCallback, Transport};

struct Session<L> {
    link: Arc<L>,
    epoch: u64,
}

struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SessionState<L> {
    session: Option<Session<L>>,
    cipher: Option<SessionCipher>,
    expected_disconnect: bool,
    notifications_enabled: bool,
    timer: Option<IdleTimer>,
    timer_generation: u64,
    epoch: u64,
}

impl<L> Default for SessionState<L> {
    fn default() -> Self {
        Self {
            session: None,
            cipher: None,
            expected_disconnect: false,
            notifications_enabled: false,
            timer: None,
            timer_generation: 0,
            epoch: 0,
        }
    }
}

/// Lazily connecting, idle-disconnecting link owner.
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    identity: RwLock<DeviceIdentity>,
    config: DeviceConfig,
    connect_lock: tokio::sync::Mutex<()>,
    operation_lock: tokio::sync::Mutex<()>,
    state: Mutex<SessionState<T::Link>>,
    notification_handler: Mutex<Option<NotificationCallback>>,
    events: EventDispatcher,
    weak_self: Weak<Self>,
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ConnectionManager")
            .field("identity", &self.identity())
            .field("connected", &state.session.is_some())
            .field("cipher", &state.cipher)
            .field("expected_disconnect", &state.expected_disconnect)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager. Nothing is connected until the first command.
    pub fn new(
        transport: Arc<T>,
        identity: DeviceIdentity,
        config: DeviceConfig,
        events: EventDispatcher,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            transport,
            identity: RwLock::new(identity),
            config,
            connect_lock: tokio::sync::Mutex::new(()),
            operation_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SessionState::default()),
            notification_handler: Mutex::new(None),
            events,
            weak_self: weak_self.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState<T::Link>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Peripheral this manager connects to.
    pub fn identity(&self) -> DeviceIdentity {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rebind to a new peripheral identity. Takes effect on the next connect.
    pub fn set_identity(&self, identity: DeviceIdentity) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// Configuration in use.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Route every notification from the read characteristic to `handler`.
    pub fn set_notification_handler(&self, handler: NotificationCallback) {
        *self
            .notification_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Acquire the operation lock, noting contention.
    pub async fn lock_operation(&self) -> tokio::sync::MutexGuard<'_, ()> {
        if let Ok(guard) = self.operation_lock.try_lock() {
            return guard;
        }
        debug!(device = %self.identity(), "operation already in progress, waiting for it to complete");
        self.operation_lock.lock().await
    }

    /// Whether a command currently holds the operation lock.
    pub fn operation_in_progress(&self) -> bool {
        self.operation_lock.try_lock().is_err()
    }

    fn current_link(&self) -> Option<Arc<T::Link>> {
        self.state()
            .session
            .as_ref()
            .map(|session| Arc::clone(&session.link))
    }

    async fn live_link(&self) -> Option<Arc<T::Link>> {
        let link = self.current_link()?;
        link.is_connected().await.then_some(link)
    }

    /// Whether a link is held, without probing it.
    pub fn has_session(&self) -> bool {
        self.state().session.is_some()
    }

    /// Whether a link is up.
    pub async fn is_connected(&self) -> bool {
        self.live_link().await.is_some()
    }

    /// Make sure a link is up, connecting if needed.
    ///
    /// Re-arms the idle timer either way. A new link must expose both the
    /// read and the write characteristic; otherwise the service cache is
    /// dropped, the link is closed and
    /// [`Error::CharacteristicNotFound`] is returned.
    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.identity()))]
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.live_link().await.is_some() {
            self.reset_disconnect_timer();
            return Ok(());
        }
        if self.connect_lock.try_lock().is_err() {
            debug!("connection already in progress, waiting for lock");
        }
        let _connect = self.connect_lock.lock().await;
        if self.live_link().await.is_some() {
            self.reset_disconnect_timer();
            return Ok(());
        }

        let identity = self.identity();
        let epoch = {
            let mut state = self.state();
            state.epoch += 1;
            state.epoch
        };
        let weak = self.weak_self.clone();
        let on_disconnect: DisconnectCallback = Arc::new(move || {
            if let Some(this) = weak.upgrade() {
                this.handle_disconnected(epoch);
            }
        });

        info!("connecting");
        let link = timeout(
            self.config.connect_timeout,
            self.transport.connect(&identity, on_disconnect),
        )
        .await
        .map_err(|_| Error::timeout("connect to device", self.config.connect_timeout))??;
        let link = Arc::new(link);

        for uuid in [READ_CHARACTERISTIC, WRITE_CHARACTERISTIC] {
            if link.has_characteristic(uuid) {
                continue;
            }
            warn!(%uuid, "characteristic missing, clearing service cache");
            if let Err(err) = link.clear_service_cache().await {
                debug!(error = %err, "failed to clear service cache");
            }
            self.cancel_disconnect_timer();
            self.state().expected_disconnect = true;
            if let Err(err) = link.disconnect().await {
                warn!(error = %err, "error disconnecting");
            }
            return Err(Error::characteristic_not_found(
                uuid.to_string(),
                link.service_count(),
            ));
        }

        self.state().session = Some(Session {
            link: Arc::clone(&link),
            epoch,
        });
        self.reset_disconnect_timer();

        if let Err(err) = link.subscribe(READ_CHARACTERISTIC, self.notification_sink()).await {
            warn!(error = %err, "failed to start notifications");
            self.cancel_disconnect_timer();
            self.teardown(DisconnectReason::Requested).await;
            return Err(err);
        }

        debug!("connected, notifications started");
        self.events.send(DeviceEvent::Connected { device: identity });
        Ok(())
    }

    fn notification_sink(&self) -> NotificationCallback {
        let weak = self.weak_self.clone();
        Arc::new(move |data: Bytes| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let handler = this
                .notification_handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            match handler {
                Some(handler) => handler(data),
                None => debug!(data = %hex::encode(&data), "notification without handler"),
            }
        })
    }

    /// Write a command to the write characteristic.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let link = self.current_link().ok_or(Error::NotConnected)?;
        link.write(WRITE_CHARACTERISTIC, data).await
    }

    /// Restart the idle countdown and clear the expected-disconnect flag.
    pub fn reset_disconnect_timer(&self) {
        let mut state = self.state();
        if let Some(timer) = state.timer.take() {
            timer.handle.abort();
        }
        state.expected_disconnect = false;
        state.timer_generation += 1;
        let generation = state.timer_generation;

        let weak = self.weak_self.clone();
        let delay = self.config.disconnect_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = weak.upgrade() {
                this.on_idle_timer(generation).await;
            }
        });
        state.timer = Some(IdleTimer { generation, handle });
    }

    /// Stop the idle countdown without disconnecting.
    pub fn cancel_disconnect_timer(&self) {
        if let Some(timer) = self.state().timer.take() {
            timer.handle.abort();
        }
    }

    /// Whether an idle countdown is pending.
    pub fn disconnect_timer_armed(&self) -> bool {
        self.state().timer.is_some()
    }

    async fn on_idle_timer(&self, generation: u64) {
        {
            let mut state = self.state();
            match &state.timer {
                Some(timer) if timer.generation == generation => state.timer = None,
                _ => {
                    debug!(generation, "stale idle timer");
                    return;
                }
            }
        }

        if self.operation_in_progress() && self.is_connected().await {
            debug!(
                device = %self.identity(),
                "operation in progress, re-arming idle timer"
            );
            self.reset_disconnect_timer();
            return;
        }

        debug!(
            device = %self.identity(),
            delay = ?self.config.disconnect_delay,
            "disconnecting after idle timeout"
        );
        self.execute_disconnect(DisconnectReason::Idle).await;
    }

    /// Cancel the idle timer and disconnect now.
    pub async fn force_disconnect(&self, reason: DisconnectReason) {
        self.cancel_disconnect_timer();
        self.execute_disconnect(reason).await;
    }

    async fn execute_disconnect(&self, reason: DisconnectReason) {
        let _connect = self.connect_lock.lock().await;
        self.teardown(reason).await;
    }

    // Caller holds the connect lock.
    async fn teardown(&self, reason: DisconnectReason) {
        let session = {
            let mut state = self.state();
            if state.timer.is_some() {
                debug!("idle timer re-armed, skipping disconnect");
                return;
            }
            state.expected_disconnect = true;
            state.cipher = None;
            state.notifications_enabled = false;
            state.session.take()
        };
        let Some(session) = session else {
            return;
        };

        let identity = self.identity();
        debug!(device = %identity, ?reason, "disconnecting");
        match timeout(self.config.connect_timeout, session.link.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(device = %identity, error = %err, "error disconnecting"),
            Err(_) => warn!(device = %identity, "timed out disconnecting"),
        }
        self.events.send(DeviceEvent::Disconnected {
            device: identity,
            reason,
        });
    }

    fn handle_disconnected(&self, epoch: u64) {
        let expected = {
            let mut state = self.state();
            if state.epoch != epoch {
                debug!(epoch, current = state.epoch, "disconnect from a stale link");
                return;
            }
            let expected = state.expected_disconnect;
            let had_session = state.session.take().is_some();
            state.cipher = None;
            state.notifications_enabled = false;
            if !expected && let Some(timer) = state.timer.take() {
                timer.handle.abort();
            }
            expected || !had_session
        };

        let identity = self.identity();
        if expected {
            debug!(device = %identity, "disconnected");
            return;
        }
        warn!(device = %identity, "disconnected unexpectedly");
        self.events.send(DeviceEvent::Disconnected {
            device: identity,
            reason: DisconnectReason::Unexpected,
        });
    }

    /// Whether the current teardown was initiated locally.
    pub fn expected_disconnect(&self) -> bool {
        self.state().expected_disconnect
    }

    /// Whether a session cipher is installed.
    pub fn has_cipher(&self) -> bool {
        self.state().cipher.is_some()
    }

    /// The session cipher, if a handshake completed on this connection.
    pub fn cipher(&self) -> Option<SessionCipher> {
        self.state().cipher.clone()
    }

    /// Install the IV returned by the handshake.
    pub fn install_iv(&self, key: &DeviceKey, iv: &[u8]) -> Result<()> {
        let cipher = SessionCipher::new(key, iv)?;
        debug!(?cipher, "session cipher installed");
        self.state().cipher = Some(cipher);
        Ok(())
    }

    /// Decrypt a payload with the session cipher.
    ///
    /// Empty input decrypts to empty output. During an expected disconnect
    /// the cipher may already be gone; the payload is then dropped.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state();
        match &state.cipher {
            Some(cipher) => Ok(cipher.decrypt(data)),
            None if state.expected_disconnect => {
                debug!("cipher cleared by expected disconnect, dropping payload");
                Ok(Vec::new())
            }
            None => Err(Error::EncryptionNotInitialized),
        }
    }

    /// Whether push notifications were enabled on this connection.
    pub fn notifications_enabled(&self) -> bool {
        self.state().notifications_enabled
    }

    /// Record the push notification state.
    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.state().notifications_enabled = enabled;
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.state().timer.take() {
            timer.handle.abort();
        }
    }
}
