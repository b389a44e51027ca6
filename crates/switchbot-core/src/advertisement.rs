//! Broadcast snapshots and the policies that decide whether to accept them.
//!
//! An [`Advertisement`] is the value produced by the discovery layer for one
//! device: identity, signal strength, whether it came from an active scan,
//! and a mapping whose `"data"` entry holds the decoded device state.
//! Snapshots are replaced, never mutated in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchbot_types::DeviceIdentity;

use crate::state::StateMap;

/// Reported when no signal strength is known.
pub const UNKNOWN_RSSI: i16 = -127;

/// Key of the decoded state inside [`Advertisement::data`].
pub const PARSED_DATA_KEY: &str = "data";

/// One broadcast-derived snapshot of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Peripheral the broadcast came from.
    pub identity: DeviceIdentity,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Whether the broadcast was a scan response to an active scan.
    pub active: bool,
    /// Raw fields plus the decoded state under `"data"`.
    pub data: StateMap,
}

impl Advertisement {
    /// Create a snapshot.
    pub fn new(identity: DeviceIdentity, rssi: i16, active: bool, data: StateMap) -> Self {
        Self {
            identity,
            rssi,
            active,
            data,
        }
    }

    /// Build a snapshot from raw broadcast payloads, with empty decoded state.
    pub fn from_raw(
        identity: DeviceIdentity,
        rssi: i16,
        manufacturer_data: Option<&[u8]>,
        service_data: Option<&[u8]>,
    ) -> Self {
        let mut data = StateMap::new();
        data.insert(
            "address".to_string(),
            Value::String(identity.address.clone()),
        );
        data.insert(
            "rawManufacturerData".to_string(),
            manufacturer_data.map_or(Value::Null, |d| Value::String(hex::encode(d))),
        );
        data.insert(
            "rawServiceData".to_string(),
            service_data.map_or(Value::Null, |d| Value::String(hex::encode(d))),
        );
        data.insert(PARSED_DATA_KEY.to_string(), Value::Object(StateMap::new()));
        Self::new(identity, rssi, false, data)
    }

    /// Stand-in snapshot for a device that has not been heard from yet.
    pub fn placeholder(identity: DeviceIdentity) -> Self {
        Self::from_raw(identity, UNKNOWN_RSSI, None, None)
    }

    /// Replace the decoded state.
    #[must_use]
    pub fn with_parsed(mut self, parsed: StateMap) -> Self {
        self.data
            .insert(PARSED_DATA_KEY.to_string(), Value::Object(parsed));
        self
    }

    /// Decoded state, if present.
    pub fn parsed(&self) -> Option<&StateMap> {
        self.data.get(PARSED_DATA_KEY).and_then(Value::as_object)
    }

    /// Decoded state, or an empty map.
    pub fn parsed_or_empty(&self) -> StateMap {
        self.parsed().cloned().unwrap_or_default()
    }

    /// Whether `self` differs from the snapshot currently held.
    ///
    /// True when nothing is held yet, when the peripheral binding changed, or
    /// when the payload differs.
    pub fn changed_from(&self, previous: Option<&Advertisement>) -> bool {
        match previous {
            None => true,
            Some(old) => old.identity.has_changed(&self.identity) || old.data != self.data,
        }
    }
}

/// Whether broadcasts are consumed, and what they trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertisementPolicy {
    /// Consume every broadcast.
    #[default]
    AlwaysAccept,
    /// Defer to connected reads while a session is open.
    IgnoreWhileConnected,
    /// Consume every broadcast and schedule a full refresh when the
    /// broadcast sequence counter moves.
    SequenceAware,
}

/// Name of the broadcast sequence counter field.
pub const SEQUENCE_NUMBER_KEY: &str = "sequence_number";

impl AdvertisementPolicy {
    /// Whether a broadcast should be merged given the connection state.
    pub fn accepts(&self, connected: bool) -> bool {
        !(connected && matches!(self, Self::IgnoreWhileConnected))
    }

    /// Whether a move of the sequence counter from `before` to `after`
    /// should trigger a refresh.
    pub fn needs_refresh(&self, before: Option<&Value>, after: Option<&Value>) -> bool {
        match (self, before) {
            (Self::SequenceAware, Some(before)) => after != Some(before),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::with_name("AA:BB:CC:DD:EE:FF", "WoLock")
    }

    #[test]
    fn test_from_raw_layout() {
        let adv = Advertisement::from_raw(identity(), -60, Some(&[0x69, 0x09]), None);
        assert_eq!(adv.data["address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(adv.data["rawManufacturerData"], "6909");
        assert_eq!(adv.data["rawServiceData"], Value::Null);
        assert!(adv.parsed().unwrap().is_empty());
        assert!(!adv.active);
    }

    #[test]
    fn test_placeholder_has_unknown_rssi() {
        let adv = Advertisement::placeholder(identity());
        assert_eq!(adv.rssi, UNKNOWN_RSSI);
    }

    #[test]
    fn test_with_parsed() {
        let mut parsed = StateMap::new();
        parsed.insert("isOn".into(), json!(true));
        let adv = Advertisement::placeholder(identity()).with_parsed(parsed);
        assert_eq!(adv.parsed().unwrap()["isOn"], true);
    }

    #[test]
    fn test_changed_from() {
        let adv = Advertisement::placeholder(identity());
        assert!(adv.changed_from(None));
        assert!(!adv.changed_from(Some(&adv.clone())));

        let renamed = Advertisement::placeholder(DeviceIdentity::with_name(
            "AA:BB:CC:DD:EE:FF",
            "Front door",
        ));
        assert!(renamed.changed_from(Some(&adv)));

        let mut parsed = StateMap::new();
        parsed.insert("battery".into(), json!(90));
        let updated = adv.clone().with_parsed(parsed);
        assert!(updated.changed_from(Some(&adv)));
    }

    #[test]
    fn test_rssi_only_change_is_not_a_change() {
        let adv = Advertisement::placeholder(identity());
        let mut louder = adv.clone();
        louder.rssi = -40;
        assert!(!louder.changed_from(Some(&adv)));
    }

    #[test]
    fn test_policy_acceptance() {
        assert!(AdvertisementPolicy::AlwaysAccept.accepts(true));
        assert!(AdvertisementPolicy::SequenceAware.accepts(true));
        assert!(AdvertisementPolicy::IgnoreWhileConnected.accepts(false));
        assert!(!AdvertisementPolicy::IgnoreWhileConnected.accepts(true));
    }

    #[test]
    fn test_sequence_refresh() {
        let policy = AdvertisementPolicy::SequenceAware;
        assert!(policy.needs_refresh(Some(&json!(4)), Some(&json!(5))));
        assert!(!policy.needs_refresh(Some(&json!(5)), Some(&json!(5))));
        assert!(!policy.needs_refresh(None, Some(&json!(5))));
        assert!(!AdvertisementPolicy::AlwaysAccept.needs_refresh(Some(&json!(4)), Some(&json!(5))));
    }
}
