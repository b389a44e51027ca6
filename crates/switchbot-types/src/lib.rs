//! Platform-agnostic types for SwitchBot BLE devices.
//!
//! This crate provides the identifiers shared by the protocol engine
//! (switchbot-core) and its front ends.
//!
//! # Features
//!
//! - Device identity and model enumeration
//! - UUID constants for the command service
//! - Error types for parsing
//!
//! # Example
//!
//! ```
//! use switchbot_types::{DeviceIdentity, SwitchbotModel};
//!
//! let identity = DeviceIdentity::with_name("AA:BB:CC:DD:EE:FF", "WoHand");
//! assert_eq!(identity.to_string(), "WoHand (AA:BB:CC:DD:EE:FF)");
//! assert!(SwitchbotModel::Lock.is_encrypted());
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{DeviceIdentity, SwitchbotModel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_without_name() {
        let identity = DeviceIdentity::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(identity.to_string(), "None (AA:BB:CC:DD:EE:FF)");
    }

    #[test]
    fn test_identity_has_changed() {
        let a = DeviceIdentity::with_name("AA:BB:CC:DD:EE:FF", "WoHand");
        let same = DeviceIdentity::with_name("AA:BB:CC:DD:EE:FF", "WoHand");
        let renamed = DeviceIdentity::with_name("AA:BB:CC:DD:EE:FF", "Kitchen");
        let moved = DeviceIdentity::with_name("11:22:33:44:55:66", "WoHand");

        assert!(!a.has_changed(&same));
        assert!(a.has_changed(&renamed));
        assert!(a.has_changed(&moved));
    }

    #[test]
    fn test_compact_address() {
        let identity = DeviceIdentity::new("aa:bb:cc-dd:ee:ff");
        assert_eq!(identity.compact_address(), "AABBCCDDEEFF");
    }

    #[test]
    fn test_model_round_trips_through_name() {
        for model in SwitchbotModel::ALL {
            assert_eq!(model.as_str().parse::<SwitchbotModel>(), Ok(model));
        }
    }

    #[test]
    fn test_only_locks_are_encrypted() {
        assert!(!SwitchbotModel::Bot.is_encrypted());
        assert!(!SwitchbotModel::PlugMini.is_encrypted());
        assert!(SwitchbotModel::LockUltra.is_encrypted());
    }

    #[test]
    fn test_unknown_model_error() {
        let err = "toaster".parse::<SwitchbotModel>().unwrap_err();
        assert_eq!(err, ParseError::UnknownModel("toaster".to_string()));
        assert!(err.to_string().contains("toaster"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_model_serde_snake_case() {
        let json = serde_json::to_string(&SwitchbotModel::PlugMini).unwrap();
        assert_eq!(json, "\"plug_mini\"");
        let back: SwitchbotModel = serde_json::from_str("\"lock_pro\"").unwrap();
        assert_eq!(back, SwitchbotModel::LockPro);
    }
}
