/// Membership index: the incremental trust-chain resolver for one group.
///
/// `MemberIndex` owns every `TrustEntry` seen for the group, keyed by content
/// hash, and derives the ordered list of verified (member, device) pairs.
/// Log entries flow through `ingest` in any order, any number of times:
///
/// 1. hash lookup (repeat delivery only re-runs propagation)
/// 2. decode + verify the claim (failures are rejected for good)
/// 3. classify as root / invited / unclassified
/// 4. resolve the parent link by inviter device
/// 5. propagate full validity down to everything waiting on a newly valid device
///
/// **Invariant:** an entry is fully valid only if its parent is, so the member
/// list never contains a device with a broken chain. Validity is never
/// revoked.
///
/// Calls must be serialized per instance (`&mut self` enforces this; share
/// across threads through `SharedIndex`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::crypto::signing::{Ed25519Verifier, SignatureVerifier};
use crate::membership::claim::{decode_claim, RejectReason, TrustClaim};
use crate::membership::config::{ConfigError, IndexConfig};
use crate::membership::entry::{LogEntry, ParentLink, TrustEntry};
use crate::membership::events::{Dispute, MemberDevice, MembershipEvent};
use crate::membership::group::GroupAnchor;
use crate::membership::ids::{EntryHash, PublicKey};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invariant violations. Each aborts the current `ingest` call; entries
/// processed before the failure keep their state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("Entry {0} was delivered again with different content")]
    HashCollision(EntryHash),

    #[error("Ancestor chain of {0} loops back on itself")]
    CycleDetected(EntryHash),

    #[error("Entry {entry} links to unknown parent {parent}")]
    DanglingParent { entry: EntryHash, parent: EntryHash },
}

// ---------------------------------------------------------------------------
// IngestReport
// ---------------------------------------------------------------------------

/// Summary of one `ingest` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// New entries that decoded successfully.
    pub accepted: usize,
    /// Entries whose hash was already known.
    pub duplicates: usize,
    /// New entries that failed decoding, with the reason.
    pub rejected: Vec<(EntryHash, RejectReason)>,
    /// Entries that became fully valid during this call.
    pub newly_valid: usize,
    /// Entries still waiting on an ancestor after this call.
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// DeviceSlot
// ---------------------------------------------------------------------------

/// Everything the index knows about one device key.
#[derive(Debug, Default)]
struct DeviceSlot {
    /// Parsed entries claiming this device, in ingestion order.
    claims: Vec<EntryHash>,
    /// The fully-valid entry holding this device. Set once.
    holder: Option<EntryHash>,
    /// Unsettled entries whose inviter is this device.
    dependents: Vec<EntryHash>,
}

// ---------------------------------------------------------------------------
// MemberIndex
// ---------------------------------------------------------------------------

pub struct MemberIndex {
    anchor: GroupAnchor,
    config: IndexConfig,
    verifier: Arc<dyn SignatureVerifier>,
    entries: HashMap<EntryHash, TrustEntry>,
    devices: HashMap<PublicKey, DeviceSlot>,
    /// Verified pairs in first-validated order.
    members: Vec<MemberDevice>,
    disputes: Vec<Dispute>,
    events: broadcast::Sender<MembershipEvent>,
}

impl MemberIndex {
    /// Create an index verifying signatures with Ed25519.
    pub fn new(anchor: GroupAnchor, config: IndexConfig) -> Result<Self, ConfigError> {
        Self::with_verifier(anchor, config, Arc::new(Ed25519Verifier))
    }

    /// Create an index with a caller-supplied verification primitive.
    pub fn with_verifier(
        anchor: GroupAnchor,
        config: IndexConfig,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Ok(MemberIndex {
            anchor,
            config,
            verifier,
            entries: HashMap::new(),
            devices: HashMap::new(),
            members: Vec::new(),
            disputes: Vec::new(),
            events,
        })
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Ingest a batch of log entries in delivery order.
    ///
    /// Per-entry decode failures are recorded in the report and do not stop
    /// the batch. Only invariant violations return `Err`.
    pub fn ingest(&mut self, batch: &[LogEntry]) -> Result<IngestReport, IndexError> {
        let mut report = IngestReport::default();
        for log_entry in batch {
            self.ingest_entry(log_entry, &mut report)?;
        }
        report.pending = self.pending_count();

        log::debug!(
            "Ingested {} entries for group {:?}: {} new, {} dup, {} rejected, {} validated, {} pending",
            batch.len(),
            self.anchor.group_id(),
            report.accepted,
            report.duplicates,
            report.rejected.len(),
            report.newly_valid,
            report.pending,
        );
        Ok(report)
    }

    fn ingest_entry(&mut self, log_entry: &LogEntry, report: &mut IngestReport) -> Result<(), IndexError> {
        let hash = log_entry.hash;
        let digest = *blake3::hash(&log_entry.payload).as_bytes();

        if let Some(existing) = self.entries.get(&hash) {
            if existing.payload_digest() != &digest {
                log::error!("Hash collision on entry {:?}: content differs from first delivery", hash);
                return Err(IndexError::HashCollision(hash));
            }
            report.duplicates += 1;
            if existing.is_rejected() {
                return Ok(());
            }
            return self.propagate(hash, report);
        }

        let claim = match decode_claim(
            &log_entry.payload,
            &self.anchor,
            self.verifier.as_ref(),
            self.config.max_entry_bytes,
        ) {
            Ok(claim) => claim,
            Err(e) => {
                log::warn!("Rejected entry {:?}: {}", hash, e);
                self.entries
                    .insert(hash, TrustEntry::rejected(hash, digest, e.reason()));
                report.rejected.push((hash, e.reason()));
                return Ok(());
            }
        };

        log::debug!(
            "Entry {:?}: device {} member {} invited by {}",
            hash,
            claim.device.short(),
            claim.member.short(),
            claim.inviter.short(),
        );

        self.entries.insert(hash, TrustEntry::parsed(hash, digest, claim));
        self.devices.entry(claim.device).or_default().claims.push(hash);
        report.accepted += 1;

        // Entries parked on this device now have a candidate parent.
        for dependent in self.dependents_of(&claim.device) {
            self.resolve_parent(dependent)?;
        }

        self.propagate(hash, report)
    }

    /// Worklist walk: settle `start`, and whenever an entry becomes fully
    /// valid, re-examine every entry invited by its device.
    ///
    /// Terminates because an entry turns fully valid at most once and only
    /// such transitions push work.
    fn propagate(&mut self, start: EntryHash, report: &mut IngestReport) -> Result<(), IndexError> {
        let mut worklist = vec![start];

        while let Some(hash) = worklist.pop() {
            self.resolve_parent(hash)?;

            let Some(depth) = self.chain_depth(hash)? else {
                continue;
            };
            let Some(device) = self.admit(hash, depth, report) else {
                continue;
            };

            // This entry's children are among the dependents; the others
            // were linked to a losing claim and get relinked on resolve.
            let mut waiting = self.dependents_of(&device);
            waiting.reverse();
            worklist.extend(waiting);
        }

        Ok(())
    }

    /// Classify `hash` and link it to a parent entry if one is known.
    ///
    /// Prefers the device's fully-valid holder; otherwise links to the first
    /// claim seen for the inviter device. A link to a non-holder is upgraded
    /// once a holder exists. Links to a holder are final.
    fn resolve_parent(&mut self, hash: EntryHash) -> Result<(), IndexError> {
        let Some(entry) = self.entries.get(&hash) else {
            return Ok(());
        };
        if entry.is_settled() {
            return Ok(());
        }
        let Some(claim) = entry.claim().copied() else {
            return Ok(());
        };
        let current = entry.parent();

        if claim.inviter == self.anchor.founding_key() {
            if current != ParentLink::Root {
                if let Some(entry) = self.entries.get_mut(&hash) {
                    entry.classify_root();
                }
                log::debug!("Entry {:?} classified as root", hash);
            }
            return Ok(());
        }

        let slot = self.devices.entry(claim.inviter).or_default();
        if !slot.dependents.contains(&hash) {
            slot.dependents.push(hash);
        }
        let Some(target) = slot.holder.or_else(|| slot.claims.first().copied()) else {
            return Ok(());
        };
        if current == ParentLink::Resolved(target) {
            return Ok(());
        }
        if !self.entries.contains_key(&target) {
            return Err(IndexError::DanglingParent { entry: hash, parent: target });
        }

        let previous = match self.entries.get_mut(&hash) {
            Some(entry) => entry.link_parent(target),
            None => None,
        };
        if let Some(old) = previous {
            if let Some(old_parent) = self.entries.get_mut(&old) {
                old_parent.remove_child(&hash);
            }
        }
        if let Some(parent) = self.entries.get_mut(&target) {
            parent.add_child(hash);
        }

        log::debug!("Entry {:?} linked to parent {:?}", hash, target);
        Ok(())
    }

    /// Depth the entry would have if its chain is complete, `None` otherwise.
    fn chain_depth(&self, hash: EntryHash) -> Result<Option<u32>, IndexError> {
        let Some(entry) = self.entries.get(&hash) else {
            return Ok(None);
        };
        if entry.is_settled() {
            return Ok(None);
        }

        match entry.parent() {
            ParentLink::Root => Ok(Some(0)),
            ParentLink::Unresolved => Ok(None),
            ParentLink::Resolved(parent_hash) => {
                let parent = self.entries.get(&parent_hash).ok_or(IndexError::DanglingParent {
                    entry: hash,
                    parent: parent_hash,
                })?;
                let Some(parent_depth) = parent.depth() else {
                    return Ok(None);
                };
                let depth = parent_depth.saturating_add(1);
                // A chain longer than the arena must revisit an entry.
                if depth as usize > self.entries.len() {
                    log::error!("Entry {:?} has depth {} beyond arena size", hash, depth);
                    return Err(IndexError::CycleDetected(hash));
                }
                Ok(Some(depth))
            }
        }
    }

    /// Make a chain-complete entry fully valid, unless its device is already
    /// held. Returns the device key when the entry was admitted.
    fn admit(&mut self, hash: EntryHash, depth: u32, report: &mut IngestReport) -> Option<PublicKey> {
        let claim = self.entries.get(&hash)?.claim().copied()?;

        let slot = self.devices.entry(claim.device).or_default();
        if let Some(holder) = slot.holder {
            self.shadow(hash, holder, claim);
            return None;
        }
        slot.holder = Some(hash);

        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.mark_fully_valid(depth);
        }
        self.forget_dependent(&claim.inviter, &hash);

        let member_device = MemberDevice {
            member: claim.member,
            device: claim.device,
        };
        self.members.push(member_device);
        report.newly_valid += 1;

        log::info!(
            "Member {} device {} verified at depth {} (group {:?})",
            claim.member.short(),
            claim.device.short(),
            depth,
            self.anchor.group_id(),
        );
        // No receivers is fine; the member list is the source of truth.
        let _ = self.events.send(MembershipEvent::MemberAdded {
            entry: hash,
            member_device,
            depth,
        });

        Some(claim.device)
    }

    /// Record that `hash` lost its device to `holder`.
    fn shadow(&mut self, hash: EntryHash, holder: EntryHash, claim: TrustClaim) {
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.mark_shadowed(holder);
        }
        self.forget_dependent(&claim.inviter, &hash);

        let holder_member = self
            .entries
            .get(&holder)
            .and_then(|e| e.claim())
            .map(|c| c.member);

        match holder_member {
            Some(holder_member) if holder_member != claim.member => {
                let dispute = Dispute {
                    device: claim.device,
                    holder,
                    holder_member,
                    challenger: hash,
                    challenger_member: claim.member,
                };
                log::warn!(
                    "Device {} claimed by member {} but already held by member {}",
                    claim.device.short(),
                    claim.member.short(),
                    holder_member.short(),
                );
                self.disputes.push(dispute);
                let _ = self.events.send(MembershipEvent::DeviceDisputed(dispute));
            }
            _ => {
                log::debug!("Entry {:?} superseded by {:?} for device {}", hash, holder, claim.device.short());
            }
        }
    }

    fn dependents_of(&self, device: &PublicKey) -> Vec<EntryHash> {
        self.devices
            .get(device)
            .map(|slot| slot.dependents.clone())
            .unwrap_or_default()
    }

    fn forget_dependent(&mut self, inviter: &PublicKey, hash: &EntryHash) {
        if let Some(slot) = self.devices.get_mut(inviter) {
            slot.dependents.retain(|h| h != hash);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Snapshot of verified pairs, in the order they were validated.
    pub fn list_members(&self) -> Vec<MemberDevice> {
        self.members.clone()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Subscribe to membership changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    pub fn anchor(&self) -> &GroupAnchor {
        &self.anchor
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Whether a device is held by a fully-valid entry.
    pub fn is_member_device(&self, device: &PublicKey) -> bool {
        self.devices
            .get(device)
            .map_or(false, |slot| slot.holder.is_some())
    }

    /// Verified devices of one member, in validation order.
    pub fn devices_of(&self, member: &PublicKey) -> Vec<PublicKey> {
        self.members
            .iter()
            .filter(|m| &m.member == member)
            .map(|m| m.device)
            .collect()
    }

    pub fn entry(&self, hash: &EntryHash) -> Option<&TrustEntry> {
        self.entries.get(hash)
    }

    /// Number of distinct entries seen, rejected ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that may still become fully valid.
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| !e.is_settled()).count()
    }

    pub fn disputes(&self) -> &[Dispute] {
        &self.disputes
    }

    /// Walk parent links from `hash` upward.
    ///
    /// Returns the entry followed by its ancestors, ending at a root entry or
    /// at the first unresolved link.
    pub fn chain_of(&self, hash: &EntryHash) -> Result<Vec<EntryHash>, IndexError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = *hash;

        loop {
            if !seen.insert(cursor) {
                return Err(IndexError::CycleDetected(*hash));
            }
            let entry = match self.entries.get(&cursor) {
                Some(entry) => entry,
                None if chain.is_empty() => return Ok(chain),
                None => {
                    let child = chain.last().copied().unwrap_or(*hash);
                    return Err(IndexError::DanglingParent { entry: child, parent: cursor });
                }
            };
            chain.push(cursor);

            match entry.parent() {
                ParentLink::Resolved(parent) => cursor = parent,
                ParentLink::Root | ParentLink::Unresolved => return Ok(chain),
            }
        }
    }
}

impl std::fmt::Debug for MemberIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberIndex")
            .field("group", &self.anchor.group_id())
            .field("entries", &self.entries.len())
            .field("members", &self.members.len())
            .field("disputes", &self.disputes.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
