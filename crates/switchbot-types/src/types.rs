//! Core types shared by every SwitchBot device model.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Identity of a BLE peripheral.
///
/// The address is fixed for the lifetime of a client; the display name is
/// refreshed whenever a newer advertisement is seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    /// MAC address on Linux/Windows, CoreBluetooth UUID on macOS.
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl DeviceIdentity {
    /// Create an identity with no known name.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    /// Create an identity with a display name.
    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Whether `other` describes a different peripheral binding than `self`.
    ///
    /// A changed name counts as a change since it is what the advertisement
    /// source reports when a device is re-provisioned.
    #[must_use]
    pub fn has_changed(&self, other: &DeviceIdentity) -> bool {
        self.address != other.address || self.name != other.name
    }

    /// Address with separators removed and upper-cased (`AABBCCDDEEFF`).
    #[must_use]
    pub fn compact_address(&self) -> String {
        self.address
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect::<String>()
            .to_uppercase()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "None ({})", self.address),
        }
    }
}

/// SwitchBot product family.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new models
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum SwitchbotModel {
    /// Bot (button pusher).
    Bot,
    /// Plug Mini.
    PlugMini,
    /// Lock.
    Lock,
    /// Lock Lite.
    LockLite,
    /// Lock Pro.
    LockPro,
    /// Lock Ultra.
    LockUltra,
}

impl SwitchbotModel {
    /// All known models.
    pub const ALL: [SwitchbotModel; 6] = [
        SwitchbotModel::Bot,
        SwitchbotModel::PlugMini,
        SwitchbotModel::Lock,
        SwitchbotModel::LockLite,
        SwitchbotModel::LockPro,
        SwitchbotModel::LockUltra,
    ];

    /// Stable snake_case name, as used in config files.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchbotModel::Bot => "bot",
            SwitchbotModel::PlugMini => "plug_mini",
            SwitchbotModel::Lock => "lock",
            SwitchbotModel::LockLite => "lock_lite",
            SwitchbotModel::LockPro => "lock_pro",
            SwitchbotModel::LockUltra => "lock_ultra",
        }
    }

    /// Whether commands to this model go through the session cipher.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.is_lock()
    }

    /// Whether this is one of the lock models.
    #[must_use]
    pub fn is_lock(&self) -> bool {
        matches!(
            self,
            SwitchbotModel::Lock
                | SwitchbotModel::LockLite
                | SwitchbotModel::LockPro
                | SwitchbotModel::LockUltra
        )
    }
}

impl FromStr for SwitchbotModel {
    type Err = ParseError;

    /// Parse a model name, accepting `-`, `_` and space as separators.
    ///
    /// ```
    /// use switchbot_types::SwitchbotModel;
    ///
    /// assert_eq!("plug-mini".parse(), Ok(SwitchbotModel::PlugMini));
    /// assert_eq!("Lock Pro".parse(), Ok(SwitchbotModel::LockPro));
    /// assert!("toaster".parse::<SwitchbotModel>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        SwitchbotModel::ALL
            .into_iter()
            .find(|model| model.as_str() == normalized)
            .ok_or_else(|| ParseError::UnknownModel(s.to_string()))
    }
}

impl fmt::Display for SwitchbotModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchbotModel::Bot => write!(f, "Bot"),
            SwitchbotModel::PlugMini => write!(f, "Plug Mini"),
            SwitchbotModel::Lock => write!(f, "Lock"),
            SwitchbotModel::LockLite => write!(f, "Lock Lite"),
            SwitchbotModel::LockPro => write!(f, "Lock Pro"),
            SwitchbotModel::LockUltra => write!(f, "Lock Ultra"),
        }
    }
}
