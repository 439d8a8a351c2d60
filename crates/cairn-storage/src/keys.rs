//! System key layout.
//!
//! System keys live under `\x00\x00` and always sort before user keys, which
//! start at `\x00\x01`.

use cairn_types::Key;

pub const SYSTEM_PREFIX: &[u8] = b"\x00\x00";
pub const USER_KEY_MIN: &[u8] = b"\x00\x01";

const DESCRIPTOR_INFIX: &[u8] = b"desc-";
const META_INFIX: &[u8] = b"meta-";

/// `\x00\x00desc- ++ start_key`: the descriptor of the range starting at `start_key`.
pub fn range_descriptor_key(start_key: &[u8]) -> Key {
    system_key(DESCRIPTOR_INFIX, start_key)
}

/// `\x00\x00meta- ++ end_key`: addressing record of the range ending at `end_key`.
///
/// Keyed by end key so that the first record above a key names its range.
pub fn range_meta_key(end_key: &[u8]) -> Key {
    system_key(META_INFIX, end_key)
}

fn system_key(infix: &[u8], suffix: &[u8]) -> Key {
    let mut buf = Vec::with_capacity(SYSTEM_PREFIX.len() + infix.len() + suffix.len());
    buf.extend_from_slice(SYSTEM_PREFIX);
    buf.extend_from_slice(infix);
    buf.extend_from_slice(suffix);
    buf
}

pub fn is_user_key(key: &[u8]) -> bool {
    key >= USER_KEY_MIN && key < cairn_types::KEY_MAX
}

/// The smallest key strictly greater than `key`.
pub fn next_key(key: &[u8]) -> Key {
    let mut buf = Vec::with_capacity(key.len() + 1);
    buf.extend_from_slice(key);
    buf.push(0x00);
    buf
}
