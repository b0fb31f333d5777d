//! # Trustlog Protocol
//!
//! **Verifiable group membership derived from an append-only, gossiped log.**
//!
//! A group is anchored by a founding public key. Members join by redeeming an
//! invitation, which produces a signed log entry chaining their device back to
//! an already-trusted device. Peers replicate the log in any order; each peer
//! runs a [`MemberIndex`] that turns whatever entries it has seen into the list
//! of (member, device) pairs whose chain of trust is complete.
//!
//! ## Quick Start
//!
//! ```rust
//! use trustlog_protocol::{Group, GroupContext, IndexConfig, MemberIdentity};
//!
//! let (group, founding_invitation) = Group::create().unwrap();
//! let ctx = GroupContext::new(group, MemberIdentity::generate(), IndexConfig::default()).unwrap();
//!
//! // The returned write is what gets appended to the shared log.
//! let write = ctx.redeem_invitation(&founding_invitation).unwrap();
//! assert_eq!(ctx.list_members().unwrap().len(), 1);
//! assert!(write.is_authorized_by(&ctx.group().write_key(), &trustlog_protocol::Ed25519Verifier));
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`crypto`] | Ed25519 keys, signing, and the signature verification seam |
//! | [`membership`] | Claim codec, trust entries, membership index, group context |

// Crate-level lint configuration: stylistic lints only.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments,
    clippy::type_complexity,
    clippy::new_without_default,
    clippy::len_without_is_empty
)]

// ── Public modules ──────────────────────────────────────────────────────────

/// Cryptographic primitives: keypairs, signing, verification.
pub mod crypto;

/// Trust-chain membership over an append-only log.
pub mod membership;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use crypto::{Ed25519Verifier, Keypair, SignatureVerifier};

pub use membership::{
    ClaimError, ConfigError, ContextError, Dispute, EntryHash, Group, GroupAnchor, GroupContext,
    GroupHolder, GroupID, IndexConfig, IndexError, IngestReport, Invitation, LogEntry,
    LogWrite, MemberDevice, MemberIdentity, MemberIndex, MembershipEvent, PublicKey, SharedIndex,
};

// ── Library metadata ────────────────────────────────────────────────────────

/// Trustlog Protocol version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string.
pub fn version() -> &'static str {
    VERSION
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }

    #[test]
    fn test_two_peers_converge() {
        let (group, founding) = Group::create().expect("create");
        let exported = group.to_base64().expect("export");

        let alice = GroupContext::new(group, MemberIdentity::generate(), IndexConfig::default())
            .expect("alice");
        let bob_group = Group::from_base64(&exported).expect("import");
        let bob = GroupContext::new(bob_group, MemberIdentity::generate(), IndexConfig::default())
            .expect("bob");

        let mut log = vec![alice.redeem_invitation(&founding).expect("alice joins").entry];
        let invite = Invitation::from_base64(&alice.issue_invitation().to_base64().expect("export"))
            .expect("import invite");
        log.push(bob.redeem_invitation(&invite).expect("bob joins").entry);

        // Each peer replays the full log, Bob's view in reverse.
        alice.ingest(&log).expect("alice ingest");
        log.reverse();
        bob.ingest(&log).expect("bob ingest");

        assert_eq!(alice.list_members().unwrap(), bob.list_members().unwrap());
        assert_eq!(alice.list_members().unwrap().len(), 2);
    }
}
