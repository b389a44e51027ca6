//! Command/response engine.
//!
//! Every command follows the same cycle: take the operation lock, make sure
//! a link is up, arm the single reply slot, write, and wait for the reply
//! notification. Failed attempts are classified by
//! [`Error::fault_class`](crate::error::Error::fault_class) and retried up to
//! the configured bound. Encrypted devices add a per-connection IV handshake
//! and wrap each command with the session cipher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::cipher::DeviceKey;
use crate::commands::{self, GET_CK_IV, PASSWORD_INCORRECT, PASSWORD_REQUIRED};
use crate::config::DeviceConfig;
use crate::connection::ConnectionManager;
use crate::encryption::EncryptionStrategy;
use crate::error::{Error, FaultClass, Result};
use crate::events::{DeviceEvent, DisconnectReason, EventDispatcher};
use crate::state::StateCache;
use crate::traits::Transport;

/// Serializes commands to one device and matches replies to them.
pub struct Engine<T: Transport> {
    connection: Arc<ConnectionManager<T>>,
    state: Arc<StateCache>,
    encryption: EncryptionStrategy,
    password_hash: Option<String>,
    config: DeviceConfig,
    reply: Mutex<Option<oneshot::Sender<Bytes>>>,
    events: EventDispatcher,
}

impl<T: Transport> std::fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connection", &self.connection)
            .field("encrypted", &self.encryption.is_encrypted())
            .field("password", &self.password_hash.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Engine<T> {
    /// Create an engine on top of a connection manager.
    pub fn new(
        connection: Arc<ConnectionManager<T>>,
        state: Arc<StateCache>,
        encryption: EncryptionStrategy,
        password: Option<&str>,
        events: EventDispatcher,
    ) -> Self {
        let config = connection.config().clone();
        Self {
            connection,
            state,
            encryption,
            password_hash: password.and_then(commands::password_hash),
            config,
            reply: Mutex::new(None),
            events,
        }
    }

    /// Connection manager under this engine.
    pub fn connection(&self) -> &Arc<ConnectionManager<T>> {
        &self.connection
    }

    /// Whether commands are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_encrypted()
    }

    fn reply_slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<Bytes>>> {
        self.reply.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a command key and return the (decrypted) reply.
    ///
    /// `retry` overrides the configured retry count.
    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.connection.identity()))]
    pub async fn send(&self, key: &str, retry: Option<u32>) -> Result<Bytes> {
        let retry = retry.unwrap_or(self.config.retry_count);
        let _operation = self.connection.lock_operation().await;
        let result = match &self.encryption {
            EncryptionStrategy::None => self.send_plain_with_retry(key, retry).await,
            EncryptionStrategy::Session { key_id, key: device_key } => {
                self.send_encrypted_with_retry(key, key_id, device_key, retry)
                    .await
            }
        };
        self.report(result)
    }

    /// Send a command key outside the session cipher.
    ///
    /// On encrypted devices the key is rewritten with the `000000` filler the
    /// firmware expects for plaintext frames.
    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.connection.identity()))]
    pub async fn send_unencrypted(&self, key: &str, retry: Option<u32>) -> Result<Bytes> {
        let retry = retry.unwrap_or(self.config.retry_count);
        let key = if self.encryption.is_encrypted() {
            commands::unencrypted_key(key)?
        } else {
            key.to_string()
        };
        let _operation = self.connection.lock_operation().await;
        let result = self.send_plain_with_retry(&key, retry).await;
        self.report(result)
    }

    fn report(&self, result: Result<Bytes>) -> Result<Bytes> {
        if let Err(err) = &result {
            self.events.send(DeviceEvent::CommandFailed {
                device: self.connection.identity(),
                error: err.to_string(),
            });
        }
        result
    }

    async fn send_plain_with_retry(&self, key: &str, retry: u32) -> Result<Bytes> {
        let command = commands::encode(key, self.password_hash.as_deref())?;
        let mut attempt = 0;
        loop {
            match self.send_locked(key, &command).await {
                Ok(reply) => return Ok(reply),
                Err(err) => self.retry_or_fail(err, attempt, retry)?,
            }
            attempt += 1;
        }
    }

    async fn send_encrypted_with_retry(
        &self,
        key: &str,
        key_id: &str,
        device_key: &DeviceKey,
        retry: u32,
    ) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            match self.send_encrypted_once(key, key_id, device_key).await {
                Ok(reply) => return Ok(reply),
                Err(err) => self.retry_or_fail(err, attempt, retry)?,
            }
            attempt += 1;
        }
    }

    // A failed attempt may have torn the link down and with it the IV, so
    // the handshake check and the wrapping happen per attempt.
    async fn send_encrypted_once(
        &self,
        key: &str,
        key_id: &str,
        device_key: &DeviceKey,
    ) -> Result<Bytes> {
        self.ensure_encryption_initialized(key_id, device_key)
            .await?;
        let cipher = self
            .connection
            .cipher()
            .ok_or(Error::EncryptionNotInitialized)?;
        let wrapped = commands::encrypt_key(key, key_id, &cipher)?;
        let command = commands::encode(&wrapped, self.password_hash.as_deref())?;
        let reply = self.send_locked(key, &command).await?;
        self.decrypt_reply(&reply)
    }

    fn decrypt_reply(&self, reply: &[u8]) -> Result<Bytes> {
        let status = reply.get(..1).unwrap_or_default();
        let payload = self
            .connection
            .decrypt(reply.get(4..).unwrap_or_default())?;
        let mut out = BytesMut::with_capacity(status.len() + payload.len());
        out.put_slice(status);
        out.put_slice(&payload);
        Ok(out.freeze())
    }

    async fn ensure_encryption_initialized(&self, key_id: &str, device_key: &DeviceKey) -> Result<()> {
        if self.connection.has_cipher() {
            return Ok(());
        }
        debug!("initializing encryption");
        let handshake = commands::unencrypted_key(&format!("{GET_CK_IV}{key_id}"))?;
        let command = commands::encode(&handshake, self.password_hash.as_deref())?;
        let reply = self.send_locked(&handshake, &command).await?;

        let ok = commands::check_command_result(
            Some(&reply[..]),
            0,
            &[0x01],
            &self.connection.identity().to_string(),
            self.state.rssi(),
        )?;
        if !ok {
            error!(reply = %hex::encode(&reply), "failed to initialize encryption");
            return Err(Error::EncryptionNotInitialized);
        }
        self.connection
            .install_iv(device_key, reply.get(4..).unwrap_or_default())
    }

    fn retry_or_fail(&self, err: Error, attempt: u32, retry: u32) -> Result<()> {
        let rssi = self.state.rssi();
        match err.fault_class() {
            FaultClass::Fatal => {
                if matches!(err, Error::DeviceNotFound(_)) {
                    error!(rssi, error = %err, "device not found");
                }
                Err(err)
            }
            FaultClass::MissingCharacteristic | FaultClass::TransientBus | FaultClass::Retryable => {
                if attempt >= retry {
                    error!(rssi, attempts = attempt + 1, error = %err, "communication failed; stopping trying");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt + 1,
                        rssi,
                        source: Box::new(err),
                    });
                }
                debug!(rssi, attempt, error = %err, "communication failed, retrying");
                Ok(())
            }
        }
    }

    // One attempt. Caller holds the operation lock.
    async fn send_locked(&self, key: &str, command: &[u8]) -> Result<Bytes> {
        self.connection.ensure_connected().await?;
        match self.execute_locked(key, command).await {
            Ok(reply) => {
                self.connection.reset_disconnect_timer();
                Ok(reply)
            }
            Err(err) => {
                match err.fault_class() {
                    FaultClass::TransientBus => {
                        warn!(error = %err, "bus error, backing off");
                        tokio::time::sleep(self.config.bus_error_backoff).await;
                        self.connection
                            .force_disconnect(DisconnectReason::Requested)
                            .await;
                    }
                    FaultClass::Retryable | FaultClass::MissingCharacteristic => {
                        self.connection
                            .force_disconnect(DisconnectReason::Requested)
                            .await;
                    }
                    FaultClass::Fatal => {}
                }
                Err(err)
            }
        }
    }

    async fn execute_locked(&self, key: &str, command: &[u8]) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        *self.reply_slot() = Some(tx);

        debug!(key, command = %hex::encode(command), rssi = self.state.rssi(), "sending command");
        if let Err(err) = self.connection.write(command).await {
            self.reply_slot().take();
            return Err(err);
        }

        let outcome = timeout(self.config.command_timeout, rx).await;
        self.reply_slot().take();
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::Communication("reply slot dropped".to_string())),
            Err(_) => {
                return Err(Error::timeout(
                    "wait for notification",
                    self.config.command_timeout,
                ));
            }
        };

        debug!(key, reply = %hex::encode(&reply), "received reply");
        match &reply[..] {
            [PASSWORD_REQUIRED] => error!("password required"),
            [PASSWORD_INCORRECT] => error!("password incorrect"),
            _ => {}
        }
        Ok(reply)
    }

    /// Offer a notification to the pending command.
    ///
    /// Returns `false` when no command is waiting; the payload is then an
    /// unsolicited push.
    pub fn handle_notification(&self, data: Bytes) -> bool {
        let Some(tx) = self.reply_slot().take() else {
            debug!(data = %hex::encode(&data), "received unsolicited notification");
            return false;
        };
        if tx.send(data).is_err() {
            debug!("reply arrived after the command gave up");
        }
        true
    }
}
