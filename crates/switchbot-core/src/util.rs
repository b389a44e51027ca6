//! Helpers shared by the BLE transport and discovery.

use btleplug::platform::PeripheralId;

/// Address btleplug reports on platforms that hide the MAC (macOS).
pub const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. Elsewhere they wrap the MAC address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Address used to key a peripheral: the MAC when the platform exposes one,
/// the peripheral ID otherwise.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == HIDDEN_ADDRESS {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

/// Whether two addresses name the same peripheral, ignoring case and
/// separators.
pub fn same_address(a: &str, b: &str) -> bool {
    let strip = |s: &str| {
        s.chars()
            .filter(|c| *c != ':' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect::<String>()
    };
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_address() {
        assert!(same_address("AA:BB:CC:DD:EE:FF", "aabbccddeeff"));
        assert!(same_address("aa-bb-cc-dd-ee-ff", "AA:BB:CC:DD:EE:FF"));
        assert!(!same_address("AA:BB:CC:DD:EE:FF", "AA:BB:CC:DD:EE:00"));
    }
}
