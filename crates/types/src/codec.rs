//! Canonical, deterministic binary codec for all persisted entities.
//!
//! Thin wrappers around `parity-scale-codec` (SCALE). Centralizing the codec
//! in the base `types` crate guarantees that every component serializes
//! entities identically, so a value written by one crate always round-trips
//! through another.

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from its canonical byte representation.
///
/// Fails fast on trailing bytes or malformed input; a decode failure on a
/// stored entity always indicates corruption or a schema mismatch and must
/// never be silently tolerated.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}
