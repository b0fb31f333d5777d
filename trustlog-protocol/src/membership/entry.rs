/// Trust entries: one node per distinct log entry, keyed by content hash.
///
/// Parent and child links are stored as `EntryHash` references into the
/// index's arena, never as direct references.

use crate::membership::claim::{RejectReason, TrustClaim};
use crate::membership::ids::EntryHash;

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// A raw entry as delivered by the log: content hash plus opaque payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: EntryHash,
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Wrap a payload, hashing it with BLAKE3.
    pub fn new(payload: Vec<u8>) -> Self {
        LogEntry {
            hash: EntryHash::of(&payload),
            payload,
        }
    }

    /// Wrap a payload whose hash was computed by the log.
    pub fn with_hash(hash: EntryHash, payload: Vec<u8>) -> Self {
        LogEntry { hash, payload }
    }
}

// ---------------------------------------------------------------------------
// Classification / links / lifecycle
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Parsed, but no entry for the inviter device has been seen yet.
    Unclassified,
    /// Invited directly by the group's founding key.
    RootCandidate,
    /// Invited by a device some other entry claims.
    InvitedCandidate,
    /// Failed decoding. Terminal.
    Rejected(RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentLink {
    Unresolved,
    Resolved(EntryHash),
    /// Root entries have no parent entry; the founding key is the anchor.
    Root,
}

/// Observable lifecycle stage. Stages only move forward.
///
/// Classification and local validity are granted together, so a classified
/// entry is always at least `LocallyValid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryState {
    RejectedAtParse,
    Unclassified,
    LocallyValid,
    FullyValid,
}

// ---------------------------------------------------------------------------
// TrustEntry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TrustEntry {
    hash: EntryHash,
    /// BLAKE3 of the payload first seen under `hash`.
    payload_digest: [u8; 32],
    claim: Option<TrustClaim>,
    classification: Classification,
    parent: ParentLink,
    locally_valid: bool,
    fully_valid: bool,
    /// Distance to the founding key; meaningful once fully valid.
    depth: u32,
    /// Set when another fully-valid entry already holds this entry's device.
    shadowed_by: Option<EntryHash>,
    children: Vec<EntryHash>,
}

impl TrustEntry {
    pub(crate) fn parsed(hash: EntryHash, payload_digest: [u8; 32], claim: TrustClaim) -> Self {
        TrustEntry {
            hash,
            payload_digest,
            claim: Some(claim),
            classification: Classification::Unclassified,
            parent: ParentLink::Unresolved,
            locally_valid: false,
            fully_valid: false,
            depth: 0,
            shadowed_by: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn rejected(hash: EntryHash, payload_digest: [u8; 32], reason: RejectReason) -> Self {
        TrustEntry {
            hash,
            payload_digest,
            claim: None,
            classification: Classification::Rejected(reason),
            parent: ParentLink::Unresolved,
            locally_valid: false,
            fully_valid: false,
            depth: 0,
            shadowed_by: None,
            children: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn hash(&self) -> EntryHash {
        self.hash
    }

    pub fn payload_digest(&self) -> &[u8; 32] {
        &self.payload_digest
    }

    pub fn claim(&self) -> Option<&TrustClaim> {
        self.claim.as_ref()
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn parent(&self) -> ParentLink {
        self.parent
    }

    pub fn children(&self) -> &[EntryHash] {
        &self.children
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.classification, Classification::Rejected(_))
    }

    pub fn is_locally_valid(&self) -> bool {
        self.locally_valid
    }

    pub fn is_fully_valid(&self) -> bool {
        self.fully_valid
    }

    /// Chain depth (root = 0), once fully valid.
    pub fn depth(&self) -> Option<u32> {
        self.fully_valid.then_some(self.depth)
    }

    pub fn shadowed_by(&self) -> Option<EntryHash> {
        self.shadowed_by
    }

    /// True when nothing can change this entry any more.
    pub fn is_settled(&self) -> bool {
        self.fully_valid || self.is_rejected() || self.shadowed_by.is_some()
    }

    pub fn state(&self) -> EntryState {
        if self.is_rejected() {
            EntryState::RejectedAtParse
        } else if self.fully_valid {
            EntryState::FullyValid
        } else if self.locally_valid {
            EntryState::LocallyValid
        } else {
            EntryState::Unclassified
        }
    }

    // -----------------------------------------------------------------------
    // Transitions, driven by the index only
    // -----------------------------------------------------------------------

    /// Root entries are locally valid as soon as they are classified.
    pub(crate) fn classify_root(&mut self) {
        self.classification = Classification::RootCandidate;
        self.parent = ParentLink::Root;
        self.locally_valid = true;
    }

    /// Point at a parent entry. Returns the previous parent if this replaces one.
    pub(crate) fn link_parent(&mut self, parent: EntryHash) -> Option<EntryHash> {
        let previous = match self.parent {
            ParentLink::Resolved(old) if old != parent => Some(old),
            _ => None,
        };
        self.classification = Classification::InvitedCandidate;
        self.parent = ParentLink::Resolved(parent);
        self.locally_valid = true;
        previous
    }

    pub(crate) fn add_child(&mut self, child: EntryHash) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: &EntryHash) {
        self.children.retain(|c| c != child);
    }

    pub(crate) fn mark_fully_valid(&mut self, depth: u32) {
        debug_assert!(self.locally_valid && !self.is_rejected());
        self.fully_valid = true;
        self.depth = depth;
    }

    pub(crate) fn mark_shadowed(&mut self, holder: EntryHash) {
        self.shadowed_by = Some(holder);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::ids::PublicKey;

    fn claim(device: u8, inviter: u8) -> TrustClaim {
        TrustClaim {
            member: PublicKey([device.wrapping_add(100); 32]),
            device: PublicKey([device; 32]),
            inviter: PublicKey([inviter; 32]),
            invitation: PublicKey([0xEE; 32]),
        }
    }

    fn parsed(tag: &[u8]) -> TrustEntry {
        let hash = EntryHash::of(tag);
        TrustEntry::parsed(hash, hash.0, claim(1, 2))
    }

    #[test]
    fn test_log_entry_hash_is_content_hash() {
        let entry = LogEntry::new(b"payload".to_vec());
        assert_eq!(entry.hash, EntryHash::of(b"payload"));
    }

    #[test]
    fn test_parsed_starts_unclassified() {
        let entry = parsed(b"a");
        assert_eq!(entry.state(), EntryState::Unclassified);
        assert_eq!(entry.parent(), ParentLink::Unresolved);
        assert!(entry.depth().is_none());
        assert!(!entry.is_settled());
    }

    #[test]
    fn test_rejected_is_terminal_state() {
        let hash = EntryHash::of(b"bad");
        let entry = TrustEntry::rejected(hash, hash.0, RejectReason::BadSignature);
        assert_eq!(entry.state(), EntryState::RejectedAtParse);
        assert!(entry.claim().is_none());
        assert!(entry.is_settled());
    }

    #[test]
    fn test_root_lifecycle() {
        let mut entry = parsed(b"root");
        entry.classify_root();
        assert_eq!(entry.state(), EntryState::LocallyValid);
        assert_eq!(entry.parent(), ParentLink::Root);

        entry.mark_fully_valid(0);
        assert_eq!(entry.state(), EntryState::FullyValid);
        assert_eq!(entry.depth(), Some(0));
    }

    #[test]
    fn test_link_parent_reports_replaced_parent() {
        let mut entry = parsed(b"child");
        let p1 = EntryHash::of(b"p1");
        let p2 = EntryHash::of(b"p2");

        assert_eq!(entry.link_parent(p1), None);
        assert_eq!(entry.classification(), Classification::InvitedCandidate);
        assert!(entry.is_locally_valid());

        assert_eq!(entry.link_parent(p1), None);
        assert_eq!(entry.link_parent(p2), Some(p1));
        assert_eq!(entry.parent(), ParentLink::Resolved(p2));
    }

    #[test]
    fn test_children_are_an_ordered_set() {
        let mut entry = parsed(b"parent");
        let a = EntryHash::of(b"a");
        let b = EntryHash::of(b"b");
        entry.add_child(a);
        entry.add_child(b);
        entry.add_child(a);
        assert_eq!(entry.children(), &[a, b]);

        entry.remove_child(&a);
        assert_eq!(entry.children(), &[b]);
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(EntryState::Unclassified < EntryState::LocallyValid);
        assert!(EntryState::LocallyValid < EntryState::FullyValid);
    }
}
