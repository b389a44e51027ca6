//! AES-128-CTR session cipher.
//!
//! The key is fixed per device; the counter block is the 16-byte IV the
//! device hands out at the start of every connection. Each message starts a
//! fresh keystream from that IV.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::error::{Error, Result};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Length of the device key in bytes.
pub const KEY_LEN: usize = 16;

/// Length of the session IV in bytes.
pub const IV_LEN: usize = 16;

/// Per-device encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKey([u8; KEY_LEN]);

impl DeviceKey {
    /// Parse the 32 hex character provisioning secret.
    pub fn from_hex(encryption_key: &str) -> Result<Self> {
        if encryption_key.is_empty() {
            return Err(Error::invalid_config("encryption_key is missing"));
        }
        if encryption_key.len() != KEY_LEN * 2 {
            return Err(Error::invalid_config("encryption_key is invalid"));
        }
        let mut key = [0u8; KEY_LEN];
        hex::decode_to_slice(encryption_key, &mut key)
            .map_err(|_| Error::invalid_config("encryption_key is invalid"))?;
        Ok(Self(key))
    }

    /// Build a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self(key)
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeviceKey(..)")
    }
}

/// Cipher bound to one session IV.
///
/// Never reused across IV changes: a new IV means a new `SessionCipher`.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl SessionCipher {
    /// Bind `key` to a negotiated IV. The IV must be exactly 16 bytes.
    pub fn new(key: &DeviceKey, iv: &[u8]) -> Result<Self> {
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| {
            Error::InvalidData(format!("IV must be {} bytes, got {}", IV_LEN, iv.len()))
        })?;
        Ok(Self { key: key.0, iv })
    }

    /// The IV this cipher was derived from.
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Encrypt a payload. Empty input yields empty output.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.apply(data)
    }

    /// Decrypt a payload. Empty input yields empty output.
    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        self.apply(data)
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        if data.is_empty() {
            return Vec::new();
        }
        let mut buf = data.to_vec();
        let mut cipher = Aes128Ctr::new(&self.key.into(), &self.iv.into());
        cipher.apply_keystream(&mut buf);
        buf
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("iv", &hex::encode(self.iv))
            .finish_non_exhaustive()
    }
}
