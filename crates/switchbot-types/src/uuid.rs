//! Bluetooth UUIDs and identifiers used by SwitchBot devices.

use uuid::{Uuid, uuid};

/// Primary GATT service carrying the command/response characteristics.
pub const SWITCHBOT_SERVICE: Uuid = uuid!("cba20d00-224d-11e6-9fb8-0002a5d5c51b");

/// Characteristic commands are written to (tx, write without response).
pub const WRITE_CHARACTERISTIC: Uuid = uuid!("cba20002-224d-11e6-9fb8-0002a5d5c51b");

/// Characteristic replies are notified on (rx).
pub const READ_CHARACTERISTIC: Uuid = uuid!("cba20003-224d-11e6-9fb8-0002a5d5c51b");

/// 16-bit service-data UUID used in SwitchBot advertisements.
pub const ADVERTISEMENT_SERVICE_DATA: Uuid = uuid!("0000fd3d-0000-1000-8000-00805f9b34fb");

/// Woan Technology (SwitchBot) Bluetooth SIG company identifier.
pub const MANUFACTURER_ID: u16 = 0x0969;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_characteristics_share_base() {
        assert_eq!(
            WRITE_CHARACTERISTIC.to_string(),
            "cba20002-224d-11e6-9fb8-0002a5d5c51b"
        );
        assert_eq!(
            READ_CHARACTERISTIC.to_string(),
            "cba20003-224d-11e6-9fb8-0002a5d5c51b"
        );
        assert_ne!(WRITE_CHARACTERISTIC, READ_CHARACTERISTIC);
    }

    #[test]
    fn test_manufacturer_id() {
        assert_eq!(MANUFACTURER_ID, 2409);
    }
}
