//! Per-model command tables.
//!
//! The engine knows nothing about individual models. A [`DeviceProfile`]
//! supplies the command keys, how to judge a reply, what to do after a
//! successful action, and how broadcasts are consumed.

use serde::{Deserialize, Serialize};

use switchbot_types::SwitchbotModel;

use crate::advertisement::AdvertisementPolicy;
use crate::error::{Error, Result};

/// Turn on (Bot).
pub const BOT_ON_KEY: &str = "570101";
/// Turn off (Bot).
pub const BOT_OFF_KEY: &str = "570102";
/// Press (Bot).
pub const BOT_PRESS_KEY: &str = "570100";

/// Turn on (Plug Mini).
pub const PLUG_ON_KEY: &str = "570f50010180";
/// Turn off (Plug Mini).
pub const PLUG_OFF_KEY: &str = "570f50010100";

/// Enable lock status pushes.
pub const LOCK_ENABLE_NOTIFICATIONS_KEY: &str = "570e01001e00008101";
/// Disable lock status pushes.
pub const LOCK_DISABLE_NOTIFICATIONS_KEY: &str = "570e00";

/// Lock replies: 1 is success, 6 is success with a low battery.
pub const LOCK_SUCCESS_VALUES: &[u8] = &[0x01, 0x06];

/// First byte of a lock status push.
pub const LOCK_PUSH_PREFIX: u8 = 0x0f;

/// What happens after a successful turn on / turn off / press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterAction {
    /// Run a basic-info round trip to pick up the new state.
    Refresh,
    /// Write `isOn` into the override layer and fire callbacks.
    OverrideSwitch,
}

/// Command keys specific to locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCommands {
    /// Lock.
    pub lock: String,
    /// Unlock (and unlatch on firmware that supports it).
    pub unlock: String,
    /// Unlock without unlatching.
    pub unlock_without_unlatch: String,
    /// Read the lock status block.
    pub info: String,
    /// Turn status pushes on.
    pub enable_notifications: String,
    /// Turn status pushes off.
    pub disable_notifications: String,
}

impl LockCommands {
    /// Command table for a lock model.
    pub fn for_model(model: SwitchbotModel) -> Result<Self> {
        let (lock, unlock, unlatch, info) = match model {
            SwitchbotModel::Lock | SwitchbotModel::LockLite => (
                "570f4e01011000",
                "570f4e01011080",
                "570f4e010110a0",
                "570f4f8101",
            ),
            SwitchbotModel::LockPro => (
                "570f4e0101000000",
                "570f4e0101000080",
                "570f4e01010000a0",
                "570f4f8104",
            ),
            SwitchbotModel::LockUltra => (
                "570f4e0101000000",
                "570f4e0101000080",
                "570f4e01010000a0",
                "570f4f8107",
            ),
            other => {
                return Err(Error::invalid_config(format!(
                    "{other} is not a lock model"
                )));
            }
        };
        Ok(Self {
            lock: lock.to_string(),
            unlock: unlock.to_string(),
            unlock_without_unlatch: unlatch.to_string(),
            info: info.to_string(),
            enable_notifications: LOCK_ENABLE_NOTIFICATIONS_KEY.to_string(),
            disable_notifications: LOCK_DISABLE_NOTIFICATIONS_KEY.to_string(),
        })
    }
}

/// Everything model specific the engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Model this profile describes.
    pub model: SwitchbotModel,
    /// Turn on key, if supported.
    pub turn_on: Option<String>,
    /// Turn off key, if supported.
    pub turn_off: Option<String>,
    /// Press key, if supported.
    pub press: Option<String>,
    /// Reply byte checked for success.
    pub success_index: usize,
    /// Accepted values at `success_index`.
    pub success_values: Vec<u8>,
    /// Step run after a successful action.
    pub after_action: AfterAction,
    /// How broadcasts are consumed.
    pub policy: AdvertisementPolicy,
    /// Whether the device ever needs active polling.
    pub poll: bool,
    /// First byte of unsolicited status pushes, if the model sends them.
    pub push_prefix: Option<u8>,
    /// Lock commands, for lock models.
    pub lock: Option<LockCommands>,
}

impl DeviceProfile {
    /// SwitchBot Bot.
    pub fn bot() -> Self {
        Self {
            model: SwitchbotModel::Bot,
            turn_on: Some(BOT_ON_KEY.to_string()),
            turn_off: Some(BOT_OFF_KEY.to_string()),
            press: Some(BOT_PRESS_KEY.to_string()),
            success_index: 0,
            success_values: vec![0x01],
            after_action: AfterAction::Refresh,
            policy: AdvertisementPolicy::AlwaysAccept,
            poll: true,
            push_prefix: None,
            lock: None,
        }
    }

    /// SwitchBot Plug Mini.
    ///
    /// Broadcasts are stale while connected, so they are ignored then, and
    /// the plug reports state in every broadcast so it is never polled.
    pub fn plug_mini() -> Self {
        Self {
            model: SwitchbotModel::PlugMini,
            turn_on: Some(PLUG_ON_KEY.to_string()),
            turn_off: Some(PLUG_OFF_KEY.to_string()),
            press: None,
            success_index: 1,
            success_values: vec![0x80],
            after_action: AfterAction::OverrideSwitch,
            policy: AdvertisementPolicy::IgnoreWhileConnected,
            poll: false,
            push_prefix: None,
            lock: None,
        }
    }

    /// A SwitchBot lock.
    pub fn lock(model: SwitchbotModel) -> Result<Self> {
        Ok(Self {
            model,
            turn_on: None,
            turn_off: None,
            press: None,
            success_index: 0,
            success_values: LOCK_SUCCESS_VALUES.to_vec(),
            after_action: AfterAction::Refresh,
            policy: AdvertisementPolicy::SequenceAware,
            poll: true,
            push_prefix: Some(LOCK_PUSH_PREFIX),
            lock: Some(LockCommands::for_model(model)?),
        })
    }

    /// Built-in profile for `model`.
    pub fn for_model(model: SwitchbotModel) -> Result<Self> {
        match model {
            SwitchbotModel::Bot => Ok(Self::bot()),
            SwitchbotModel::PlugMini => Ok(Self::plug_mini()),
            m if m.is_lock() => Self::lock(m),
            other => Err(Error::invalid_config(format!("no profile for {other}"))),
        }
    }

    /// Whether commands to this model must be encrypted.
    pub fn requires_encryption(&self) -> bool {
        self.model.is_encrypted()
    }
}
