/// Core identity types for the membership log.
///
/// - `PublicKey`: 32-byte Ed25519 public key of a member, device, or group founder
/// - `GroupID`: 32-byte group identifier derived from the founding key
/// - `EntryHash`: 32-byte content hash of a log entry

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain separator for group identifier derivation.
const GROUP_ID_DOMAIN: &[u8] = b"TL-GROUP";

fn fixed_from_hex<const N: usize>(s: &str) -> Result<[u8; N], hex::FromHexError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != N {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Raw Ed25519 public key. Ordering is bytewise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        fixed_from_hex(s).map(PublicKey)
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// GroupID
// ---------------------------------------------------------------------------

/// Group identifier: BLAKE3("TL-GROUP" || founding_key).
///
/// Deterministic: every peer holding the founding key derives the same id,
/// which the log uses as its address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupID(pub [u8; 32]);

impl GroupID {
    /// Derive the identifier for a founding public key.
    pub fn derive(founding_key: &PublicKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(GROUP_ID_DOMAIN);
        hasher.update(founding_key.as_bytes());
        GroupID(*hasher.finalize().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        GroupID(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        fixed_from_hex(s).map(GroupID)
    }
}

impl fmt::Debug for GroupID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupID({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for GroupID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// EntryHash
// ---------------------------------------------------------------------------

/// Content hash of a log entry.
///
/// Assigned by the log and stable across peers. `EntryHash::of` gives the
/// BLAKE3 hash used when the log does not supply one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryHash(pub [u8; 32]);

impl EntryHash {
    pub fn of(payload: &[u8]) -> Self {
        EntryHash(*blake3::hash(payload).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        EntryHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        fixed_from_hex(s).map(EntryHash)
    }
}

impl fmt::Debug for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryHash({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_deterministic() {
        let founder = PublicKey([1u8; 32]);
        assert_eq!(GroupID::derive(&founder), GroupID::derive(&founder));
    }

    #[test]
    fn test_group_id_unique_per_founder() {
        let a = GroupID::derive(&PublicKey([1u8; 32]));
        let b = GroupID::derive(&PublicKey([2u8; 32]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_group_id_is_domain_separated() {
        let founder = PublicKey([9u8; 32]);
        let plain = *blake3::hash(founder.as_bytes()).as_bytes();
        assert_ne!(GroupID::derive(&founder).0, plain);
    }

    #[test]
    fn test_entry_hash_content_deterministic() {
        assert_eq!(EntryHash::of(b"entry"), EntryHash::of(b"entry"));
        assert_ne!(EntryHash::of(b"entry"), EntryHash::of(b"entry2"));
    }

    #[test]
    fn test_hex_roundtrips() {
        let key = PublicKey([0xAB; 32]);
        assert_eq!(PublicKey::from_hex(&key.to_hex()).unwrap(), key);

        let gid = GroupID::derive(&key);
        assert_eq!(GroupID::from_hex(&gid.to_hex()).unwrap(), gid);

        let hash = EntryHash::of(b"x");
        assert_eq!(EntryHash::from_hex(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(GroupID::from_hex(&"00".repeat(16)).is_err());
    }

    #[test]
    fn test_short_display() {
        let key = PublicKey([0xAB; 32]);
        assert_eq!(key.short(), "abababab");
        assert_eq!(format!("{:?}", key), "PublicKey(abababab)");
    }
}
