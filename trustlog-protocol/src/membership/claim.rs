/// Trust claim codec: the payload format of a membership log entry.
///
/// A claim says "device D, acting for member M, was invited by device I".
///
/// - Outer envelope: bincode-serialized, signed by the claimed device
/// - Inner payload: CBOR-serialized via ciborium
/// - Signing: Ed25519 over BLAKE3(domain || fields)
///
/// Four signatures must hold before a claim is accepted:
/// 1. the inviter device signed the invitation key for this group,
/// 2. the invitation key signed the (member, device) pair,
/// 3. the member key signed the device key,
/// 4. the device key signed the envelope.
///
/// Decoding is a pure function of the bytes and the group anchor. Any failure
/// is terminal for the entry.
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;

use crate::crypto::signing::{is_valid_public_key, Keypair, SignatureVerifier};
use crate::membership::group::GroupAnchor;
use crate::membership::ids::{GroupID, PublicKey};
use crate::membership::limits::{check_entry_size, EntrySizeStatus, CLAIM_ENVELOPE_VERSION};

const INVITATION_DOMAIN: &[u8] = b"TL-INVITE";
const REDEMPTION_DOMAIN: &[u8] = b"TL-REDEEM";
const MEMBER_DEVICE_DOMAIN: &[u8] = b"TL-MEMBER-DEVICE";
const ENVELOPE_DOMAIN: &[u8] = b"TL-ENVELOPE";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Malformed entry: {0}")]
    Malformed(String),

    #[error("Bad signature: {0}")]
    BadSignature(&'static str),

    #[error("Entry targets group {found}, expected {expected}")]
    WrongGroup { expected: GroupID, found: GroupID },

    #[error("Claim encoding failed: {0}")]
    Encode(String),
}

/// Diagnostic class of a rejected entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Malformed,
    BadSignature,
    WrongGroup,
}

impl ClaimError {
    pub fn reason(&self) -> RejectReason {
        match self {
            ClaimError::Malformed(_) | ClaimError::Encode(_) => RejectReason::Malformed,
            ClaimError::BadSignature(_) => RejectReason::BadSignature,
            ClaimError::WrongGroup { .. } => RejectReason::WrongGroup,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Inner claim payload (CBOR-encoded inside `ClaimEnvelope.payload`).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClaimPayload {
    pub member_pubkey: [u8; 32],
    pub device_pubkey: [u8; 32],
    pub inviter_device_pubkey: [u8; 32],
    /// One-time key handed out in the invitation.
    pub invitation_pubkey: [u8; 32],
    /// Inviter device over `invitation_message(group, invitation_pubkey)`.
    #[serde(with = "BigArray")]
    pub inviter_signature: [u8; 64],
    /// Invitation key over `redemption_message(group, member, device)`.
    #[serde(with = "BigArray")]
    pub invitation_signature: [u8; 64],
    /// Member key over `member_device_message(group, device)`.
    #[serde(with = "BigArray")]
    pub member_signature: [u8; 64],
}

/// Outer envelope: the raw bytes stored in the log.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClaimEnvelope {
    pub version: u8,
    pub group_id: GroupID,
    /// CBOR-encoded `ClaimPayload`.
    pub payload: Vec<u8>,
    /// Must equal the payload's device key.
    pub device_pubkey: [u8; 32],
    /// Device key over BLAKE3(signable_bytes).
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl ClaimEnvelope {
    /// Wrap an encoded payload and sign it with the device key.
    pub fn seal(group_id: GroupID, payload: &ClaimPayload, device: &Keypair) -> Result<Self, ClaimError> {
        let mut envelope = ClaimEnvelope {
            version: CLAIM_ENVELOPE_VERSION,
            group_id,
            payload: cbor_encode(payload)?,
            device_pubkey: device.public,
            signature: [0u8; 64],
        };
        let hash = blake3::hash(&envelope.signable_bytes()?);
        envelope.signature = device.sign(hash.as_bytes());
        Ok(envelope)
    }

    /// Canonical bytes covered by the device signature: every field except
    /// the signature itself, bincode-encoded in declaration order.
    fn signable_bytes(&self) -> Result<Vec<u8>, ClaimError> {
        let signable = (
            ENVELOPE_DOMAIN,
            self.version,
            &self.group_id,
            &self.payload,
            &self.device_pubkey,
        );
        bincode::serialize(&signable).map_err(|e| ClaimError::Encode(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ClaimError> {
        bincode::serialize(self).map_err(|e| ClaimError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClaimError> {
        bincode::deserialize(bytes).map_err(|e| ClaimError::Malformed(format!("envelope: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Decoded claim
// ---------------------------------------------------------------------------

/// A decoded, fully verified membership claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustClaim {
    pub member: PublicKey,
    pub device: PublicKey,
    pub inviter: PublicKey,
    pub invitation: PublicKey,
}

// ---------------------------------------------------------------------------
// Signed messages
// ---------------------------------------------------------------------------

fn domain_hash(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Message an inviter signs to hand out an invitation key.
pub fn invitation_message(group_id: &GroupID, invitation_pubkey: &[u8; 32]) -> [u8; 32] {
    domain_hash(INVITATION_DOMAIN, &[group_id.as_bytes(), invitation_pubkey])
}

/// Message the invitation key signs when a member device redeems it.
pub fn redemption_message(group_id: &GroupID, member: &[u8; 32], device: &[u8; 32]) -> [u8; 32] {
    domain_hash(REDEMPTION_DOMAIN, &[group_id.as_bytes(), member, device])
}

/// Message a member key signs to vouch for one of its devices.
pub fn member_device_message(group_id: &GroupID, device: &[u8; 32]) -> [u8; 32] {
    domain_hash(MEMBER_DEVICE_DOMAIN, &[group_id.as_bytes(), device])
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Everything needed to write a claim for a new device.
pub struct ClaimSigners<'a> {
    pub group_id: GroupID,
    pub inviter_device: PublicKey,
    pub inviter_signature: [u8; 64],
    pub invitation: &'a Keypair,
    pub member: &'a Keypair,
    pub device: &'a Keypair,
}

/// Build, sign, and serialize a claim. Returns the raw log-entry payload.
pub fn encode_claim(signers: &ClaimSigners<'_>) -> Result<Vec<u8>, ClaimError> {
    let gid = &signers.group_id;
    let member = signers.member.public;
    let device = signers.device.public;

    let payload = ClaimPayload {
        member_pubkey: member,
        device_pubkey: device,
        inviter_device_pubkey: signers.inviter_device.0,
        invitation_pubkey: signers.invitation.public,
        inviter_signature: signers.inviter_signature,
        invitation_signature: signers.invitation.sign(&redemption_message(gid, &member, &device)),
        member_signature: signers.member.sign(&member_device_message(gid, &device)),
    };

    ClaimEnvelope::seal(*gid, &payload, signers.device)?.to_bytes()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode and verify a raw log-entry payload against a group anchor.
///
/// Gates run in order: size, envelope, group, structure, signatures.
pub fn decode_claim(
    raw: &[u8],
    anchor: &GroupAnchor,
    verifier: &dyn SignatureVerifier,
    max_entry_bytes: usize,
) -> Result<TrustClaim, ClaimError> {
    match check_entry_size(raw.len(), max_entry_bytes) {
        EntrySizeStatus::Ok => {}
        EntrySizeStatus::Empty => return Err(ClaimError::Malformed("empty payload".into())),
        EntrySizeStatus::TooLarge => {
            return Err(ClaimError::Malformed(format!(
                "payload is {} bytes, max {}",
                raw.len(),
                max_entry_bytes
            )))
        }
    }

    let envelope = ClaimEnvelope::from_bytes(raw)?;

    if envelope.version != CLAIM_ENVELOPE_VERSION {
        return Err(ClaimError::Malformed(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }

    if envelope.group_id != anchor.group_id() {
        return Err(ClaimError::WrongGroup {
            expected: anchor.group_id(),
            found: envelope.group_id,
        });
    }

    let payload: ClaimPayload = cbor_decode(&envelope.payload)?;
    check_structure(&envelope, &payload, anchor)?;
    check_signatures(&envelope, &payload, verifier)?;

    Ok(TrustClaim {
        member: PublicKey(payload.member_pubkey),
        device: PublicKey(payload.device_pubkey),
        inviter: PublicKey(payload.inviter_device_pubkey),
        invitation: PublicKey(payload.invitation_pubkey),
    })
}

fn check_structure(
    envelope: &ClaimEnvelope,
    payload: &ClaimPayload,
    anchor: &GroupAnchor,
) -> Result<(), ClaimError> {
    if envelope.device_pubkey != payload.device_pubkey {
        return Err(ClaimError::Malformed("envelope signer is not the claimed device".into()));
    }

    let keys = [
        ("member", &payload.member_pubkey),
        ("device", &payload.device_pubkey),
        ("inviter", &payload.inviter_device_pubkey),
        ("invitation", &payload.invitation_pubkey),
    ];
    for (name, key) in keys {
        if !is_valid_public_key(key) {
            return Err(ClaimError::Malformed(format!("{} key is not a valid Ed25519 point", name)));
        }
    }

    if payload.device_pubkey == payload.inviter_device_pubkey {
        return Err(ClaimError::Malformed("device cannot invite itself".into()));
    }

    // The founding key only ever appears as an inviter.
    let founding = anchor.founding_key().0;
    if payload.device_pubkey == founding || payload.member_pubkey == founding {
        return Err(ClaimError::Malformed("founding key used as member or device".into()));
    }

    Ok(())
}

fn check_signatures(
    envelope: &ClaimEnvelope,
    payload: &ClaimPayload,
    verifier: &dyn SignatureVerifier,
) -> Result<(), ClaimError> {
    let gid = &envelope.group_id;

    let signable = envelope.signable_bytes()?;
    let envelope_hash = blake3::hash(&signable);
    if !verifier.verify(&envelope.device_pubkey, envelope_hash.as_bytes(), &envelope.signature) {
        return Err(ClaimError::BadSignature("device"));
    }

    if !verifier.verify(
        &payload.inviter_device_pubkey,
        &invitation_message(gid, &payload.invitation_pubkey),
        &payload.inviter_signature,
    ) {
        return Err(ClaimError::BadSignature("inviter"));
    }

    if !verifier.verify(
        &payload.invitation_pubkey,
        &redemption_message(gid, &payload.member_pubkey, &payload.device_pubkey),
        &payload.invitation_signature,
    ) {
        return Err(ClaimError::BadSignature("invitation"));
    }

    if !verifier.verify(
        &payload.member_pubkey,
        &member_device_message(gid, &payload.device_pubkey),
        &payload.member_signature,
    ) {
        return Err(ClaimError::BadSignature("member"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// CBOR helpers
// ---------------------------------------------------------------------------

fn cbor_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ClaimError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ClaimError::Encode(e.to_string()))?;
    Ok(buf)
}

fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ClaimError> {
    ciborium::from_reader(bytes).map_err(|e| ClaimError::Malformed(format!("payload: {}", e)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::Ed25519Verifier;
    use crate::membership::limits::MAX_ENTRY_PAYLOAD_BYTES;

    struct Fixture {
        founder: Keypair,
        anchor: GroupAnchor,
    }

    fn fixture() -> Fixture {
        let founder = Keypair::generate();
        let anchor = GroupAnchor::new(PublicKey(founder.public)).unwrap();
        Fixture { founder, anchor }
    }

    /// Root claim: invited directly by the founding key.
    fn root_claim(fx: &Fixture, member: &Keypair, device: &Keypair) -> Vec<u8> {
        invited_claim(fx.anchor.group_id(), &fx.founder, member, device)
    }

    fn invited_claim(gid: GroupID, inviter: &Keypair, member: &Keypair, device: &Keypair) -> Vec<u8> {
        let invitation = Keypair::generate();
        encode_claim(&ClaimSigners {
            group_id: gid,
            inviter_device: PublicKey(inviter.public),
            inviter_signature: inviter.sign(&invitation_message(&gid, &invitation.public)),
            invitation: &invitation,
            member,
            device,
        })
        .unwrap()
    }

    fn decode(fx: &Fixture, raw: &[u8]) -> Result<TrustClaim, ClaimError> {
        decode_claim(raw, &fx.anchor, &Ed25519Verifier, MAX_ENTRY_PAYLOAD_BYTES)
    }

    /// Re-seal a tampered payload with a valid device signature so only the
    /// inner signature under test is wrong.
    fn reseal(fx: &Fixture, raw: &[u8], device: &Keypair, tamper: impl FnOnce(&mut ClaimPayload)) -> Vec<u8> {
        let envelope = ClaimEnvelope::from_bytes(raw).unwrap();
        let mut payload: ClaimPayload = cbor_decode(&envelope.payload).unwrap();
        tamper(&mut payload);
        ClaimEnvelope::seal(fx.anchor.group_id(), &payload, device)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_root_claim_decodes() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let claim = decode(&fx, &root_claim(&fx, &member, &device)).unwrap();

        assert_eq!(claim.member, PublicKey(member.public));
        assert_eq!(claim.device, PublicKey(device.public));
        assert_eq!(claim.inviter, fx.anchor.founding_key());
    }

    #[test]
    fn test_invited_claim_decodes() {
        let fx = fixture();
        let inviter = Keypair::generate();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = invited_claim(fx.anchor.group_id(), &inviter, &member, &device);

        let claim = decode(&fx, &raw).unwrap();
        assert_eq!(claim.inviter, PublicKey(inviter.public));
    }

    #[test]
    fn test_wrong_group_rejected() {
        let fx = fixture();
        let other = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = root_claim(&other, &member, &device);

        let err = decode(&fx, &raw).unwrap_err();
        assert!(matches!(err, ClaimError::WrongGroup { .. }));
        assert_eq!(err.reason(), RejectReason::WrongGroup);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let fx = fixture();
        let err = decode(&fx, b"definitely not a claim").unwrap_err();
        assert_eq!(err.reason(), RejectReason::Malformed);
    }

    #[test]
    fn test_empty_and_oversize_are_malformed() {
        let fx = fixture();
        assert_eq!(decode(&fx, &[]).unwrap_err().reason(), RejectReason::Malformed);

        let big = vec![0u8; MAX_ENTRY_PAYLOAD_BYTES + 1];
        assert_eq!(decode(&fx, &big).unwrap_err().reason(), RejectReason::Malformed);
    }

    #[test]
    fn test_corrupted_device_signature() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = root_claim(&fx, &member, &device);

        let mut envelope = ClaimEnvelope::from_bytes(&raw).unwrap();
        envelope.signature[0] ^= 0xFF;
        let err = decode(&fx, &envelope.to_bytes().unwrap()).unwrap_err();
        assert_eq!(err, ClaimError::BadSignature("device"));
    }

    #[test]
    fn test_payload_tamper_breaks_device_signature() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = root_claim(&fx, &member, &device);

        let mut envelope = ClaimEnvelope::from_bytes(&raw).unwrap();
        let mut payload: ClaimPayload = cbor_decode(&envelope.payload).unwrap();
        payload.member_pubkey = Keypair::generate().public;
        envelope.payload = cbor_encode(&payload).unwrap();

        let err = decode(&fx, &envelope.to_bytes().unwrap()).unwrap_err();
        assert_eq!(err, ClaimError::BadSignature("device"));
    }

    #[test]
    fn test_forged_root_inviter_signature() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        // Attacker signs the invitation with its own key but claims the founder.
        let attacker = Keypair::generate();
        let raw = root_claim(&fx, &member, &device);
        let forged = reseal(&fx, &raw, &device, |p| {
            p.inviter_signature = attacker.sign(&invitation_message(
                &fx.anchor.group_id(),
                &p.invitation_pubkey,
            ));
        });

        assert_eq!(decode(&fx, &forged).unwrap_err(), ClaimError::BadSignature("inviter"));
    }

    #[test]
    fn test_bad_invitation_signature() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = root_claim(&fx, &member, &device);
        let bad = reseal(&fx, &raw, &device, |p| p.invitation_signature = [7u8; 64]);

        assert_eq!(decode(&fx, &bad).unwrap_err(), ClaimError::BadSignature("invitation"));
    }

    #[test]
    fn test_member_must_vouch_for_device() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let impostor = Keypair::generate();
        let raw = root_claim(&fx, &member, &device);
        let bad = reseal(&fx, &raw, &device, |p| {
            p.member_signature =
                impostor.sign(&member_device_message(&fx.anchor.group_id(), &p.device_pubkey));
        });

        assert_eq!(decode(&fx, &bad).unwrap_err(), ClaimError::BadSignature("member"));
    }

    #[test]
    fn test_envelope_signer_must_match_device() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = root_claim(&fx, &member, &device);
        // Sealed by a different key than the device named in the payload.
        let other = Keypair::generate();
        let bad = reseal(&fx, &raw, &other, |_| {});

        assert_eq!(decode(&fx, &bad).unwrap_err().reason(), RejectReason::Malformed);
    }

    #[test]
    fn test_self_invitation_is_malformed() {
        let fx = fixture();
        let member = Keypair::generate();
        let device = Keypair::generate();
        let raw = invited_claim(fx.anchor.group_id(), &device, &member, &device);

        assert_eq!(decode(&fx, &raw).unwrap_err().reason(), RejectReason::Malformed);
    }

    #[test]
    fn test_founding_key_as_device_is_malformed() {
        let fx = fixture();
        let member = Keypair::generate();
        let inviter = Keypair::generate();
        let raw = invited_claim(fx.anchor.group_id(), &inviter, &member, &fx.founder);

        assert_eq!(decode(&fx, &raw).unwrap_err().reason(), RejectReason::Malformed);
    }

    #[test]
    fn test_unsupported_version_is_malformed() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let mut envelope = ClaimEnvelope::from_bytes(&root_claim(&fx, &member, &device)).unwrap();
        envelope.version = CLAIM_ENVELOPE_VERSION + 1;

        let err = decode(&fx, &envelope.to_bytes().unwrap()).unwrap_err();
        assert_eq!(err.reason(), RejectReason::Malformed);
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = root_claim(&fx, &member, &device);
        assert_eq!(decode(&fx, &raw).unwrap(), decode(&fx, &raw).unwrap());
    }

    /// A verifier that refuses everything, to check the seam is honoured.
    struct RejectAll;

    impl SignatureVerifier for RejectAll {
        fn verify(&self, _: &[u8; 32], _: &[u8], _: &[u8; 64]) -> bool {
            false
        }
    }

    #[test]
    fn test_uses_injected_verifier() {
        let fx = fixture();
        let (member, device) = (Keypair::generate(), Keypair::generate());
        let raw = root_claim(&fx, &member, &device);

        let err = decode_claim(&raw, &fx.anchor, &RejectAll, MAX_ENTRY_PAYLOAD_BYTES).unwrap_err();
        assert_eq!(err.reason(), RejectReason::BadSignature);
    }
}
