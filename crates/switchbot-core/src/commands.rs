//! Command key codec.
//!
//! Command keys are hex strings such as `"5702"`. Before hitting the wire a
//! key may be folded with a password hash, rewritten for the unencrypted path
//! of an encrypted device, or wrapped with the session cipher.

use crc::{CRC_32_ISO_HDLC, Crc};
use serde_json::{Value, json};

use crate::cipher::SessionCipher;
use crate::error::{Error, Result};
use crate::state::StateMap;

/// Read battery and firmware version.
pub const GET_BASIC_SETTINGS: &str = "5702";

/// Request the session IV (suffixed with the key id).
pub const GET_CK_IV: &str = "570f2103";

/// Prefix of every password-folded key.
pub const KEY_PASSWORD_PREFIX: &str = "571";

/// Single byte reply: a password is configured on the device.
pub const PASSWORD_REQUIRED: u8 = 0x07;

/// Single byte reply: the supplied password was wrong.
pub const PASSWORD_INCORRECT: u8 = 0x09;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Hash a device password: CRC-32 of the ASCII bytes, 8 lowercase hex chars.
///
/// Returns `None` for an empty password.
pub fn password_hash(password: &str) -> Option<String> {
    if password.is_empty() {
        return None;
    }
    Some(format!("{:08x}", CRC32.checksum(password.as_bytes())))
}

/// Splice a password hash into a key.
///
/// `"570100"` with hash `h` becomes `"5711" + h + "00"`: the fixed `571`
/// prefix, the key's 4th hex digit, the hash, then the rest of the key.
pub fn fold_password(key: &str, password_hash: Option<&str>) -> Result<String> {
    let Some(hash) = password_hash else {
        return Ok(key.to_string());
    };
    let action = key_part(key, 3..4)?;
    let suffix = key_part(key, 4..)?;
    Ok(format!("{KEY_PASSWORD_PREFIX}{action}{hash}{suffix}"))
}

/// Rewrite a key for the unencrypted path of an encrypted device.
pub fn unencrypted_key(key: &str) -> Result<String> {
    let (head, tail) = split_key(key)?;
    Ok(format!("{head}000000{tail}"))
}

/// Wrap a key with the session cipher.
///
/// Produces `key[..2] || key_id || hex(iv[..2]) || hex(encrypt(key[2..]))`.
pub fn encrypt_key(key: &str, key_id: &str, cipher: &SessionCipher) -> Result<String> {
    let (head, payload) = split_key(key)?;
    let payload = hex::decode(payload)?;
    let iv = cipher.iv();
    Ok(format!(
        "{head}{key_id}{}{}",
        hex::encode(&iv[..2]),
        hex::encode(cipher.encrypt(&payload))
    ))
}

/// Fold the password into `key` and decode it to wire bytes.
pub fn encode(key: &str, password_hash: Option<&str>) -> Result<Vec<u8>> {
    let folded = fold_password(key, password_hash)?;
    Ok(hex::decode(folded)?)
}

/// Check that `result[index]` is one of `expected`.
///
/// A missing or too short reply is an error rather than `false`.
pub fn check_command_result(
    result: Option<&[u8]>,
    index: usize,
    expected: &[u8],
    device: &str,
    rssi: i16,
) -> Result<bool> {
    match result.and_then(|r| r.get(index)) {
        Some(byte) => Ok(expected.contains(byte)),
        None => Err(Error::CommandFailed {
            device: device.to_string(),
            result: result.filter(|r| !r.is_empty()).map(hex::encode),
            index,
            expected: expected.to_vec(),
            rssi,
        }),
    }
}

/// Whether a basic-info style reply signals failure.
pub fn is_unsuccessful(reply: &[u8]) -> bool {
    matches!(reply, [] | [PASSWORD_REQUIRED] | [0x00])
}

/// Decode the generic basic-info reply: battery and firmware version.
pub fn parse_basic_info(reply: &[u8]) -> Option<StateMap> {
    let [_, battery, firmware, ..] = reply else {
        return None;
    };
    let mut map = StateMap::new();
    map.insert("battery".to_string(), json!(battery));
    map.insert(
        "firmware".to_string(),
        Value::from(f64::from(*firmware) / 10.0),
    );
    Some(map)
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    Ok((key_part(key, ..2)?, key_part(key, 2..)?))
}

fn key_part<R>(key: &str, range: R) -> Result<&str>
where
    R: std::slice::SliceIndex<str, Output = str>,
{
    if !key.is_ascii() {
        return Err(Error::InvalidData(format!("command key is not hex: {key}")));
    }
    key.get(range)
        .ok_or_else(|| Error::InvalidData(format!("command key too short: {key}")))
}
