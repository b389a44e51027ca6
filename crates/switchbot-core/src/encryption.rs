//! Per-device encryption credentials.

use crate::cipher::DeviceKey;
use crate::error::{Error, Result};

/// Length of the key id in hex characters.
pub const KEY_ID_LEN: usize = 2;

/// How commands to a device are protected.
#[derive(Debug, Clone, Default)]
pub enum EncryptionStrategy {
    /// Plain command keys.
    #[default]
    None,
    /// AES-128-CTR with a per-connection IV negotiated by handshake.
    Session {
        /// Two hex character key slot identifier.
        key_id: String,
        /// Device key.
        key: DeviceKey,
    },
}

impl EncryptionStrategy {
    /// Validate provisioning material and build a session strategy.
    ///
    /// # Example
    ///
    /// ```
    /// use switchbot_core::EncryptionStrategy;
    ///
    /// let strategy = EncryptionStrategy::session("ff", "2b7e151628aed2a6abf7158809cf4f3c").unwrap();
    /// assert!(strategy.is_encrypted());
    /// assert!(EncryptionStrategy::session("f", "2b7e151628aed2a6abf7158809cf4f3c").is_err());
    /// ```
    pub fn session(key_id: &str, encryption_key: &str) -> Result<Self> {
        if key_id.is_empty() {
            return Err(Error::invalid_config("key_id is missing"));
        }
        if key_id.len() != KEY_ID_LEN || !key_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_config("key_id is invalid"));
        }
        Ok(Self::Session {
            key_id: key_id.to_ascii_lowercase(),
            key: DeviceKey::from_hex(encryption_key)?,
        })
    }

    /// Whether commands are encrypted.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Session { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";

    #[test]
    fn test_default_is_plain() {
        assert!(!EncryptionStrategy::default().is_encrypted());
    }

    #[test]
    fn test_key_id_validation() {
        assert!(matches!(
            EncryptionStrategy::session("", KEY),
            Err(Error::InvalidConfig(msg)) if msg == "key_id is missing"
        ));
        assert!(matches!(
            EncryptionStrategy::session("abc", KEY),
            Err(Error::InvalidConfig(msg)) if msg == "key_id is invalid"
        ));
        assert!(EncryptionStrategy::session("zz", KEY).is_err());
    }

    #[test]
    fn test_encryption_key_validation() {
        assert!(matches!(
            EncryptionStrategy::session("01", ""),
            Err(Error::InvalidConfig(msg)) if msg == "encryption_key is missing"
        ));
        assert!(matches!(
            EncryptionStrategy::session("01", "abcd"),
            Err(Error::InvalidConfig(msg)) if msg == "encryption_key is invalid"
        ));
    }

    #[test]
    fn test_key_id_is_lowercased() {
        let EncryptionStrategy::Session { key_id, .. } = EncryptionStrategy::session("AB", KEY).unwrap()
        else {
            panic!("expected session");
        };
        assert_eq!(key_id, "ab");
    }
}
