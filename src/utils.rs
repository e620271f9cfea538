//! Pure helpers shared across the crate

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Hash any serializable value to a stable integer.
///
/// The value is serialized through `serde_json::Value` first so map keys are
/// ordered, which keeps the hash independent of `HashMap` iteration order.
pub fn object_hash_code<T: Serialize + ?Sized>(value: &T) -> Result<i64> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    let digest = Sha256::digest(&bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Ok(i64::from_be_bytes(head))
}

/// Hex form of the full digest, for log fields
pub fn object_hash_hex<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
