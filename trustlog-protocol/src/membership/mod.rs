/// Trust-log membership: who belongs to a group, derived from its log.
///
/// Every log entry is a signed claim that a device, acting for a member, was
/// invited by another device. A device counts as a member only when an
/// unbroken chain of valid claims leads back to the group's founding key.
/// Entries arrive in any order; the index resolves chains incrementally.
///
/// # Module structure
/// - `ids`: PublicKey, GroupID, EntryHash identity types
/// - `limits`: Protocol constants and entry size checks
/// - `config`: IndexConfig and ConfigError
/// - `claim`: Claim envelope/payload codec with signature verification
/// - `entry`: LogEntry input and TrustEntry lifecycle
/// - `events`: MemberDevice, Dispute, MembershipEvent
/// - `index`: MemberIndex (ingest, propagation, queries)
/// - `group`: GroupAnchor, Group, Invitation, GroupContext, GroupHolder
pub mod claim;
pub mod config;
pub mod entry;
pub mod events;
pub mod group;
pub mod ids;
pub mod index;
pub mod limits;

// Re-export core types for convenience
pub use claim::{decode_claim, encode_claim, ClaimEnvelope, ClaimError, ClaimPayload, ClaimSigners, RejectReason, TrustClaim};
pub use config::{ConfigError, IndexConfig};
pub use entry::{Classification, EntryState, LogEntry, ParentLink, TrustEntry};
pub use events::{Dispute, MemberDevice, MembershipEvent};
pub use group::{
    ContextError, Group, GroupAnchor, GroupContext, GroupHolder, IndexConstructor, Invitation,
    LogWrite, MemberIdentity, SharedIndex, StoreManifest,
};
pub use ids::{EntryHash, GroupID, PublicKey};
pub use index::{IndexError, IngestReport, MemberIndex};
pub use limits::{check_entry_size, EntrySizeStatus, MEMBER_STORE_TYPE};
