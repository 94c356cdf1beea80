//! Message ids and lock receipts.
//!
//! Receipts are `{serial-base36}-{pop_count-base36}`: an opaque token
//! naming one lock instance of one message. Any re-pop increments the
//! pop count and therefore invalidates all previously issued receipts.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Longest accepted client-supplied message id.
pub const MAX_ID_LENGTH: usize = 256;

/// Length of server-assigned message ids.
const GENERATED_ID_LENGTH: usize = 24;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a random server-assigned message id.
///
/// Generated ids are plain alphanumeric and therefore always pass
/// [`validate_id`].
pub fn random_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(GENERATED_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Check a client-supplied message id.
///
/// Ids are 1..=256 characters of `[A-Za-z0-9_-]` and must not begin with
/// an underscore (reserved).
pub fn validate_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_ID_LENGTH || id.starts_with('_') {
        return false;
    }
    id.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Encode a value in lowercase base36.
pub fn encode_base36(mut value: u64) -> String {
    let mut buf = [0_u8; 13];
    let mut at = buf.len();
    loop {
        at -= 1;
        buf[at] = BASE36_DIGITS[usize::try_from(value % 36).unwrap_or_default()];
        value /= 36;
        if value == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&buf[at..]).into_owned()
}

/// Decode a lowercase base36 value. Returns `None` on empty input, a
/// foreign digit, or overflow.
pub fn decode_base36(text: &str) -> Option<u64> {
    if text.is_empty() || text.len() > 13 {
        return None;
    }
    let mut value: u64 = 0;
    for b in text.bytes() {
        let digit = match b {
            b'0'..=b'9' => u64::from(b - b'0'),
            b'a'..=b'z' => u64::from(b - b'a') + 10,
            _ => return None,
        };
        value = value.checked_mul(36)?.checked_add(digit)?;
    }
    Some(value)
}

/// Build the receipt for one lock instance.
pub fn make_receipt(serial: u64, pop_count: i64) -> String {
    let count = u64::try_from(pop_count).unwrap_or_default();
    format!("{}-{}", encode_base36(serial), encode_base36(count))
}

/// Split a receipt back into `(serial, pop_count)`.
pub fn parse_receipt(receipt: &str) -> Option<(u64, i64)> {
    let (serial, count) = receipt.split_once('-')?;
    let serial = decode_base36(serial)?;
    let count = i64::try_from(decode_base36(count)?).ok()?;
    Some((serial, count))
}
