//! Cryptographic primitives: Ed25519 keys, signing, and the verification
//! seam used by the claim codec.

pub mod signing;

pub use signing::{generate_keypair, is_valid_public_key, Ed25519Verifier, Keypair, SignatureVerifier};
