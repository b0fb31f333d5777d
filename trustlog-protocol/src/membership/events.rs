/// Membership output types and change notifications.
///
/// Events are broadcast by the index after each state change. A receiver
/// created after an event was sent does not see it; read `list_members()`
/// for the current snapshot and subscribe for what follows.
use serde::{Deserialize, Serialize};

use crate::membership::ids::{EntryHash, PublicKey};

/// A verified (member, device) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberDevice {
    pub member: PublicKey,
    pub device: PublicKey,
}

/// Two entries with fully valid chains claim one device for different members.
///
/// The holder validated first and keeps the device; the challenger is never
/// listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub device: PublicKey,
    pub holder: EntryHash,
    pub holder_member: PublicKey,
    pub challenger: EntryHash,
    pub challenger_member: PublicKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipEvent {
    /// An entry became fully valid and its pair was appended to the member list.
    MemberAdded {
        entry: EntryHash,
        member_device: MemberDevice,
        depth: u32,
    },
    /// A conflicting claim for an already-held device was recorded.
    DeviceDisputed(Dispute),
}
