use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

/// Signature verification primitive consumed by the claim codec.
///
/// Implementations must be pure and deterministic: the same inputs always
/// yield the same answer, and the answer is treated as ground truth.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool;
}

/// Default verifier backed by `ed25519-dalek` (strict verification).
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let sig = Signature::from_bytes(signature);
        verifying_key.verify_strict(message, &sig).is_ok()
    }
}

/// Ed25519 keypair. The secret half is wiped on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Keypair {
    pub public: [u8; 32],
    pub secret: [u8; 32],
}

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let (public, secret) = generate_keypair();
        Keypair { public, secret }
    }

    /// Rebuild a keypair from its 32-byte secret.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let public = SigningKey::from_bytes(&secret).verifying_key().to_bytes();
        Keypair { public, secret }
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.secret).sign(data).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({}..)", hex::encode(&self.public[..4]))
    }
}

/// Generate an Ed25519 keypair
///
/// # Returns
/// (public_key, private_key) - Both as 32-byte arrays
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);

    let secret_key = signing_key.to_bytes();
    let public_key = signing_key.verifying_key().to_bytes();

    (public_key, secret_key)
}

/// Whether 32 bytes decode to a usable Ed25519 public key.
///
/// Rejects non-canonical encodings and small-order points, which
/// `verify_strict` would refuse anyway.
pub fn is_valid_public_key(public_key: &[u8; 32]) -> bool {
    match VerifyingKey::from_bytes(public_key) {
        Ok(key) => !key.is_weak(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let kp = Keypair::generate();
        let data = b"Test message for signing";

        let signature = kp.sign(data);
        assert!(Ed25519Verifier.verify(&kp.public, data, &signature));
    }

    #[test]
    fn test_verify_invalid_signature() {
        let kp = Keypair::generate();
        assert!(!Ed25519Verifier.verify(&kp.public, b"Test message", &[0u8; 64]));
    }

    #[test]
    fn test_verify_rejects_invalid_key() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"x");
        // Not a curve point.
        assert!(!Ed25519Verifier.verify(&[0xFFu8; 32], b"x", &sig));
    }

    #[test]
    fn test_keypair_signature_is_deterministic() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"payload");
        assert_eq!(sig, kp.sign(b"payload"));
        assert!(Ed25519Verifier.verify(&kp.public, b"payload", &sig));
        assert!(!Ed25519Verifier.verify(&kp.public, b"other", &sig));
    }

    #[test]
    fn test_keypair_from_secret_roundtrip() {
        let kp = Keypair::generate();
        let rebuilt = Keypair::from_secret(kp.secret);
        assert_eq!(kp.public, rebuilt.public);
        assert_eq!(rebuilt.sign(b"m"), kp.sign(b"m"));
    }

    #[test]
    fn test_public_key_validity() {
        let kp = Keypair::generate();
        assert!(is_valid_public_key(&kp.public));
        // Identity point is small-order.
        let mut identity = [0u8; 32];
        identity[0] = 1;
        assert!(!is_valid_public_key(&identity));
    }
}
