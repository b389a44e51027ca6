//! Error types for switchbot-core.
//!
//! This module defines all error types that can occur when talking to
//! SwitchBot devices over Bluetooth Low Energy or when provisioning keys
//! through the SwitchBot account service.
//!
//! # Retry classification
//!
//! The command engine retries a failed attempt according to
//! [`Error::fault_class`]:
//!
//! | Fault class | Errors | Behaviour |
//! |-------------|--------|-----------|
//! | [`FaultClass::Fatal`] | [`Error::DeviceNotFound`], account and local errors | Surfaced immediately |
//! | [`FaultClass::MissingCharacteristic`] | [`Error::CharacteristicNotFound`] | Retried up to the bound, then fatal |
//! | [`FaultClass::TransientBus`] | [`Error::BusError`] | Short backoff, disconnect, retry |
//! | [`FaultClass::Retryable`] | [`Error::Timeout`], [`Error::Bluetooth`], [`Error::Communication`], [`Error::NotConnected`] | Disconnect, retry |
//!
//! Once the bound is exhausted the last cause is wrapped in
//! [`Error::RetriesExhausted`] together with the signal strength seen at the
//! time of failure.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when communicating with SwitchBot devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found, no longer in range, or signal too weak.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Transient error reported by the system Bluetooth bus.
    #[error("Bluetooth bus error: {0}")]
    BusError(String),

    /// Generic transport communication failure.
    #[error("Communication failed: {0}")]
    Communication(String),

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// An encrypted exchange needed a session IV that is not available.
    #[error("Encryption session is not initialized")]
    EncryptionNotInitialized,

    /// The device replied, but not with an expected result.
    #[error(
        "{device}: Sending command failed (result={} index={index} expected={expected:?} rssi={rssi})",
        .result.as_deref().unwrap_or("None")
    )]
    CommandFailed {
        /// Display name of the device.
        device: String,
        /// Hex encoded reply, if any.
        result: Option<String>,
        /// Index of the status byte that was checked.
        index: usize,
        /// Accepted values at that index.
        expected: Vec<u8>,
        /// Signal strength when the command failed.
        rssi: i16,
    },

    /// Every attempt of a command failed.
    #[error("Command failed after {attempts} attempts (rssi={rssi}): {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Signal strength at the time of the last failure.
        rssi: i16,
        /// The failure of the last attempt.
        #[source]
        source: Box<Error>,
    },

    /// The device model does not expose this capability.
    #[error("Current device {address} does not support {operation}")]
    Unsupported {
        /// The requested operation.
        operation: String,
        /// Device address.
        address: String,
    },

    /// Logging into the SwitchBot account failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The SwitchBot account service could not be reached or misbehaved.
    #[error("Account connection error: {0}")]
    AccountConnection(String),

    /// The SwitchBot account API returned an error status.
    #[error("{message}, status code: {status}")]
    Api {
        /// HTTP or API status code.
        status: i64,
        /// Message returned by the service.
        message: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed data (command key, reply, key material).
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// How the command engine treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Abort immediately, no further attempts.
    Fatal,
    /// The GATT table lacked a characteristic; retry against a fresh table.
    MissingCharacteristic,
    /// Transient bus error; back off briefly before retrying.
    TransientBus,
    /// Any other recoverable transport fault.
    Retryable,
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No devices found during scan.
    NoDevicesInRange,
    /// Device with specified address not found.
    NotFound { identifier: String },
    /// Scan timed out before finding device.
    ScanTimeout { duration: Duration },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDevicesInRange => write!(f, "no devices in range"),
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>, address: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            address: address.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Classify this error for the retry loop.
    pub fn fault_class(&self) -> FaultClass {
        match self {
            Self::DeviceNotFound(_) => FaultClass::Fatal,
            Self::Bluetooth(btleplug::Error::DeviceNotFound) => FaultClass::Fatal,
            Self::CharacteristicNotFound { .. } => FaultClass::MissingCharacteristic,
            Self::BusError(_) => FaultClass::TransientBus,
            Self::Bluetooth(_)
            | Self::Communication(_)
            | Self::NotConnected
            | Self::Timeout { .. } => FaultClass::Retryable,
            _ => FaultClass::Fatal,
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        self.fault_class() != FaultClass::Fatal
    }

    /// Whether this error came from the account service.
    pub fn is_account_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::AccountConnection(_) | Self::Api { .. }
        )
    }
}

impl From<switchbot_types::ParseError> for Error {
    fn from(err: switchbot_types::ParseError) -> Self {
        match err {
            switchbot_types::ParseError::InsufficientBytes { expected, actual } => {
                Error::InvalidData(format!("expected {} bytes, got {}", expected, actual))
            }
            switchbot_types::ParseError::InvalidValue(msg) => Error::InvalidData(msg),
            switchbot_types::ParseError::UnknownModel(name) => {
                Error::InvalidConfig(format!("Unknown model: {}", name))
            }
            // Handle future ParseError variants (non_exhaustive)
            _ => Error::InvalidData(format!("Parse error: {}", err)),
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::InvalidData(format!("invalid hex: {}", err))
    }
}

/// Result type alias using switchbot-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("AA:BB:CC:DD:EE:FF");
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::characteristic_not_found("cba20003", 3);
        assert!(err.to_string().contains("cba20003"));
        assert!(err.to_string().contains("3 services"));

        let err = Error::timeout("wait for notification", Duration::from_secs(5));
        assert!(err.to_string().contains("wait for notification"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_command_failed_display() {
        let err = Error::CommandFailed {
            device: "WoHand (AA:BB:CC:DD:EE:FF)".to_string(),
            result: None,
            index: 0,
            expected: vec![1],
            rssi: -70,
        };
        let msg = err.to_string();
        assert!(msg.contains("result=None"));
        assert!(msg.contains("index=0"));
        assert!(msg.contains("rssi=-70"));

        let err = Error::CommandFailed {
            device: "Plug".to_string(),
            result: Some("01".to_string()),
            index: 1,
            expected: vec![0x80],
            rssi: -127,
        };
        assert!(err.to_string().contains("result=01"));
    }

    #[test]
    fn test_fault_classification() {
        assert_eq!(
            Error::device_not_found("x").fault_class(),
            FaultClass::Fatal
        );
        assert_eq!(
            Error::characteristic_not_found("x", 0).fault_class(),
            FaultClass::MissingCharacteristic
        );
        assert_eq!(
            Error::BusError("org.bluez.Error.Failed".into()).fault_class(),
            FaultClass::TransientBus
        );
        assert_eq!(
            Error::timeout("x", Duration::from_secs(1)).fault_class(),
            FaultClass::Retryable
        );
        assert_eq!(
            Error::Communication("x".into()).fault_class(),
            FaultClass::Retryable
        );
        assert_eq!(
            Error::EncryptionNotInitialized.fault_class(),
            FaultClass::Fatal
        );
        assert_eq!(
            Error::Authentication("bad password".into()).fault_class(),
            FaultClass::Fatal
        );
    }

    #[test]
    fn test_btleplug_device_not_found_is_fatal() {
        let err = Error::Bluetooth(btleplug::Error::DeviceNotFound);
        assert!(!err.is_retryable());
        let err = Error::Bluetooth(btleplug::Error::NotConnected);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retries_exhausted_keeps_source() {
        use std::error::Error as _;

        let err = Error::RetriesExhausted {
            attempts: 3,
            rssi: -80,
            source: Box::new(Error::timeout("wait for notification", Duration::from_secs(5))),
        };
        assert!(err.to_string().contains("3 attempts"));
        let source = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("wait for notification"));
        assert_eq!(err.fault_class(), FaultClass::Fatal);
    }

    #[test]
    fn test_account_errors() {
        let err = Error::Api {
            status: 190,
            message: "token expired".into(),
        };
        assert_eq!(err.to_string(), "token expired, status code: 190");
        assert!(err.is_account_error());
        assert!(!Error::NotConnected.is_account_error());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = switchbot_types::ParseError::UnknownModel("toaster".into()).into();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
