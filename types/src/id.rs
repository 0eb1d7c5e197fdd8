//! Content-addressed identifiers.
//!
//! Every identity in the voting store is a UUID v5 derived from raw bytes
//! under a single fixed namespace: validators from their public key,
//! resolution types from their name, and resolutions from `type || body`.
//! Deriving ids this way keeps index keys a uniform 16 bytes and lets every
//! node compute the same id from the same input without coordination.

use uuid::Uuid;

/// Identifies a resolution. Derived by the event producer as
/// `uuid_v5(type_name || body)`; the store never reassigns ids.
pub type ResolutionId = Uuid;

/// Identifies a voter, derived as `uuid_v5(pub_key)`.
pub type VoterId = Uuid;

/// Namespace under which all Tessera ids are derived.
const ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0xd1, 0x3e, 0x0b, 0x4a, 0x7c, 0x61, 0x4b, 0x90, 0x8a, 0x2f, 0x5e, 0xa6, 0x33, 0x18, 0xc4, 0x7d,
]);

/// Derive a deterministic UUID v5 from raw bytes.
pub fn uuid_v5(data: &[u8]) -> Uuid {
    Uuid::new_v5(&ID_NAMESPACE, data)
}
