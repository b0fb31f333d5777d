/// Groups, invitations, and the per-group context that owns a membership index.
///
/// - `GroupAnchor`: founding key + derived group id (the trust anchor)
/// - `Group`: anchor plus the log-write signing key, exportable as base64
/// - `Invitation`: a one-time key signed by an inviting device
/// - `GroupContext`: one group bound to one `MemberIndex` and a local identity
/// - `GroupHolder`: explicit registry of contexts, keyed by group id

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use zeroize::Zeroize;

use crate::crypto::signing::{is_valid_public_key, Ed25519Verifier, Keypair, SignatureVerifier};
use crate::membership::claim::{encode_claim, invitation_message, ClaimError, ClaimSigners};
use crate::membership::config::{ConfigError, IndexConfig};
use crate::membership::entry::LogEntry;
use crate::membership::events::{MemberDevice, MembershipEvent};
use crate::membership::ids::{EntryHash, GroupID, PublicKey};
use crate::membership::index::{IndexError, IngestReport, MemberIndex};
use crate::membership::limits::MEMBER_STORE_TYPE;

/// Index handle shared between a group context and the store feeding it.
pub type SharedIndex = Arc<Mutex<MemberIndex>>;

/// Hands a store layer the index of one group. Every call yields the same handle.
pub type IndexConstructor = Box<dyn Fn() -> SharedIndex + Send + Sync>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Claim error: {0}")]
    Claim(#[from] ClaimError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Invitation is for group {found}, expected {expected}")]
    WrongGroup { expected: GroupID, found: GroupID },

    #[error("Index lock poisoned")]
    LockPoisoned,
}

// ---------------------------------------------------------------------------
// GroupAnchor
// ---------------------------------------------------------------------------

/// The founding public key and the group id derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupAnchor {
    founding_key: PublicKey,
    group_id: GroupID,
}

impl GroupAnchor {
    pub fn new(founding_key: PublicKey) -> Result<Self, ConfigError> {
        if !is_valid_public_key(founding_key.as_bytes()) {
            return Err(ConfigError::InvalidFoundingKey);
        }
        Ok(GroupAnchor {
            founding_key,
            group_id: GroupID::derive(&founding_key),
        })
    }

    /// Anchor from a key and an id received separately; they must agree.
    pub fn with_group_id(founding_key: PublicKey, group_id: GroupID) -> Result<Self, ConfigError> {
        let anchor = Self::new(founding_key)?;
        if anchor.group_id != group_id {
            return Err(ConfigError::GroupIdMismatch);
        }
        Ok(anchor)
    }

    pub fn founding_key(&self) -> PublicKey {
        self.founding_key
    }

    pub fn group_id(&self) -> GroupID {
        self.group_id
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
struct GroupWire {
    founding_key: [u8; 32],
    group_id: [u8; 32],
    log_secret: [u8; 32],
}

#[derive(Clone, Debug)]
pub struct Group {
    anchor: GroupAnchor,
    /// Signs writes to the group's log. Shared by all members.
    log_key: Keypair,
}

impl Group {
    /// Create a new group and its founding invitation.
    ///
    /// The founding secret only exists long enough to sign that invitation;
    /// every root entry is a redemption of it.
    pub fn create() -> Result<(Group, Invitation), ConfigError> {
        let founder = Keypair::generate();
        let anchor = GroupAnchor::new(PublicKey(founder.public))?;
        let group = Group {
            anchor,
            log_key: Keypair::generate(),
        };
        let invitation = Invitation::new(&founder, anchor.group_id());

        log::info!("Created group {:?}", anchor.group_id());
        Ok((group, invitation))
    }

    pub fn anchor(&self) -> &GroupAnchor {
        &self.anchor
    }

    pub fn group_id(&self) -> GroupID {
        self.anchor.group_id()
    }

    /// Public half of the log-write key.
    pub fn write_key(&self) -> PublicKey {
        PublicKey(self.log_key.public)
    }

    /// Hex public key an external log access controller should authorize.
    pub fn write_authority(&self) -> String {
        hex::encode(self.log_key.public)
    }

    /// Sign a log write with the group's log key.
    pub fn sign_write(&self, data: &[u8]) -> [u8; 64] {
        self.log_key.sign(data)
    }

    pub fn to_base64(&self) -> Result<String, ConfigError> {
        let wire = GroupWire {
            founding_key: self.anchor.founding_key().0,
            group_id: self.anchor.group_id().0,
            log_secret: self.log_key.secret,
        };
        let bytes = bincode::serialize(&wire).map_err(|e| ConfigError::Encoding(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Import an exported group. The group id must match the founding key.
    pub fn from_base64(s: &str) -> Result<Self, ConfigError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| ConfigError::Encoding(e.to_string()))?;
        let wire: GroupWire =
            bincode::deserialize(&bytes).map_err(|e| ConfigError::Encoding(e.to_string()))?;

        let anchor = GroupAnchor::with_group_id(
            PublicKey(wire.founding_key),
            GroupID(wire.group_id),
        )?;
        Ok(Group {
            anchor,
            log_key: Keypair::from_secret(wire.log_secret),
        })
    }
}

// ---------------------------------------------------------------------------
// Invitation
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
struct InvitationWire {
    group_id: [u8; 32],
    inviter_device: [u8; 32],
    invitation_secret: [u8; 32],
    #[serde(with = "BigArray")]
    inviter_signature: [u8; 64],
}

/// A one-time key handed to a prospective member out of band.
#[derive(Clone, Debug)]
pub struct Invitation {
    group_id: GroupID,
    inviter_device: PublicKey,
    invitation_key: Keypair,
    inviter_signature: [u8; 64],
}

impl Invitation {
    /// Issue an invitation signed by `inviter` (a member device, or the
    /// founding key for the founding invitation).
    pub fn new(inviter: &Keypair, group_id: GroupID) -> Self {
        let invitation_key = Keypair::generate();
        let inviter_signature = inviter.sign(&invitation_message(&group_id, &invitation_key.public));
        Invitation {
            group_id,
            inviter_device: PublicKey(inviter.public),
            invitation_key,
            inviter_signature,
        }
    }

    pub fn group_id(&self) -> GroupID {
        self.group_id
    }

    pub fn inviter_device(&self) -> PublicKey {
        self.inviter_device
    }

    pub fn invitation_key(&self) -> PublicKey {
        PublicKey(self.invitation_key.public)
    }

    pub fn to_base64(&self) -> Result<String, ConfigError> {
        let wire = InvitationWire {
            group_id: self.group_id.0,
            inviter_device: self.inviter_device.0,
            invitation_secret: self.invitation_key.secret,
            inviter_signature: self.inviter_signature,
        };
        let bytes = bincode::serialize(&wire).map_err(|e| ConfigError::Encoding(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Import an invitation, checking the inviter's signature over it.
    pub fn from_base64(s: &str) -> Result<Self, ConfigError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| ConfigError::Encoding(e.to_string()))?;
        let wire: InvitationWire =
            bincode::deserialize(&bytes).map_err(|e| ConfigError::Encoding(e.to_string()))?;

        let invitation = Invitation {
            group_id: GroupID(wire.group_id),
            inviter_device: PublicKey(wire.inviter_device),
            invitation_key: Keypair::from_secret(wire.invitation_secret),
            inviter_signature: wire.inviter_signature,
        };
        let message = invitation_message(&invitation.group_id, &invitation.invitation_key.public);
        if !Ed25519Verifier.verify(
            invitation.inviter_device.as_bytes(),
            &message,
            &invitation.inviter_signature,
        ) {
            return Err(ConfigError::InvalidInvitation);
        }
        Ok(invitation)
    }
}

// ---------------------------------------------------------------------------
// MemberIdentity
// ---------------------------------------------------------------------------

/// The local member key and the key of the device we run on.
#[derive(Clone, Debug)]
pub struct MemberIdentity {
    pub member: Keypair,
    pub device: Keypair,
}

impl MemberIdentity {
    pub fn generate() -> Self {
        MemberIdentity {
            member: Keypair::generate(),
            device: Keypair::generate(),
        }
    }

    /// Another device for the same member.
    pub fn new_device(&self) -> Self {
        MemberIdentity {
            member: self.member.clone(),
            device: Keypair::generate(),
        }
    }

    pub fn member_device(&self) -> MemberDevice {
        MemberDevice {
            member: PublicKey(self.member.public),
            device: PublicKey(self.device.public),
        }
    }
}

// ---------------------------------------------------------------------------
// LogWrite
// ---------------------------------------------------------------------------

/// A log entry ready to append, signed with the group's log-write key over
/// its content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogWrite {
    pub entry: LogEntry,
    pub writer: PublicKey,
    pub signature: [u8; 64],
}

impl LogWrite {
    /// Whether the write is signed by `authority` and covers this entry.
    pub fn is_authorized_by(&self, authority: &PublicKey, verifier: &dyn SignatureVerifier) -> bool {
        self.writer == *authority
            && self.entry.hash == EntryHash::of(&self.entry.payload)
            && verifier.verify(authority.as_bytes(), self.entry.hash.as_bytes(), &self.signature)
    }
}

// ---------------------------------------------------------------------------
// GroupContext
// ---------------------------------------------------------------------------

pub struct GroupContext {
    group: Group,
    identity: MemberIdentity,
    index: SharedIndex,
}

impl GroupContext {
    pub fn new(group: Group, identity: MemberIdentity, config: IndexConfig) -> Result<Self, ConfigError> {
        Self::with_verifier(group, identity, config, Arc::new(Ed25519Verifier))
    }

    pub fn with_verifier(
        group: Group,
        identity: MemberIdentity,
        config: IndexConfig,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, ConfigError> {
        let index = MemberIndex::with_verifier(*group.anchor(), config, verifier)?;
        Ok(GroupContext {
            group,
            identity,
            index: Arc::new(Mutex::new(index)),
        })
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn identity(&self) -> &MemberIdentity {
        &self.identity
    }

    /// Shared handle to this group's index.
    pub fn index(&self) -> SharedIndex {
        Arc::clone(&self.index)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemberIndex>, ContextError> {
        self.index.lock().map_err(|_| ContextError::LockPoisoned)
    }

    pub fn ingest(&self, batch: &[LogEntry]) -> Result<IngestReport, ContextError> {
        Ok(self.lock()?.ingest(batch)?)
    }

    pub fn list_members(&self) -> Result<Vec<MemberDevice>, ContextError> {
        Ok(self.lock()?.list_members())
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<MembershipEvent>, ContextError> {
        Ok(self.lock()?.subscribe())
    }

    /// Invite someone new, signed by the local device.
    pub fn issue_invitation(&self) -> Invitation {
        Invitation::new(&self.identity.device, self.group.group_id())
    }

    /// Turn an invitation into a log write for the local identity.
    ///
    /// The entry is ingested locally before it is returned; the caller is
    /// responsible for appending it to the shared log.
    pub fn redeem_invitation(&self, invitation: &Invitation) -> Result<LogWrite, ContextError> {
        let expected = self.group.group_id();
        if invitation.group_id != expected {
            return Err(ContextError::WrongGroup {
                expected,
                found: invitation.group_id,
            });
        }

        let raw = encode_claim(&ClaimSigners {
            group_id: expected,
            inviter_device: invitation.inviter_device,
            inviter_signature: invitation.inviter_signature,
            invitation: &invitation.invitation_key,
            member: &self.identity.member,
            device: &self.identity.device,
        })?;
        let entry = LogEntry::new(raw);

        log::debug!(
            "Redeemed invitation from {} as device {}",
            invitation.inviter_device.short(),
            hex::encode(&self.identity.device.public[..4]),
        );
        self.ingest(std::slice::from_ref(&entry))?;
        Ok(self.sign_write(entry))
    }

    /// Sign an entry with the group's log-write key.
    pub fn sign_write(&self, entry: LogEntry) -> LogWrite {
        let signature = self.group.sign_write(entry.hash.as_bytes());
        LogWrite {
            entry,
            writer: self.group.write_key(),
            signature,
        }
    }

    /// Factory a store layer calls to obtain this group's index.
    pub fn index_constructor(&self) -> IndexConstructor {
        let index = Arc::clone(&self.index);
        Box::new(move || Arc::clone(&index))
    }
}

impl std::fmt::Debug for GroupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupContext")
            .field("group", &self.group.group_id())
            .field("identity", &self.identity.member_device())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// GroupHolder
// ---------------------------------------------------------------------------

/// What an external log needs to open a group's member store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub store_type: String,
    /// Hex group id.
    pub group_id: String,
    /// Hex log-write keys allowed to append.
    pub write: Vec<String>,
}

/// Registry of open groups. One context (and so one index) per group id.
///
/// Log-write keys are tracked separately so a group's log can be replicated
/// by peers that do not hold the group itself.
pub struct GroupHolder {
    groups: HashMap<GroupID, Arc<GroupContext>>,
    sig_pubkeys: HashMap<GroupID, PublicKey>,
    config: IndexConfig,
    verifier: Arc<dyn SignatureVerifier>,
}

impl GroupHolder {
    pub fn new(config: IndexConfig) -> Result<Self, ConfigError> {
        Self::with_verifier(config, Arc::new(Ed25519Verifier))
    }

    pub fn with_verifier(config: IndexConfig, verifier: Arc<dyn SignatureVerifier>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(GroupHolder {
            groups: HashMap::new(),
            sig_pubkeys: HashMap::new(),
            config,
            verifier,
        })
    }

    /// Register a group. Registering the same group id twice is an error.
    pub fn add_group(&mut self, group: Group, identity: MemberIdentity) -> Result<Arc<GroupContext>, ConfigError> {
        let gid = group.group_id();
        if self.groups.contains_key(&gid) {
            return Err(ConfigError::DuplicateGroup(gid));
        }
        let context = Arc::new(GroupContext::with_verifier(
            group,
            identity,
            self.config.clone(),
            Arc::clone(&self.verifier),
        )?);
        self.set_group_sig_pubkey(gid, context.group().write_key())?;
        self.groups.insert(gid, Arc::clone(&context));

        log::info!(
            "Registered {} for group {:?} ({} open)",
            MEMBER_STORE_TYPE,
            gid,
            self.groups.len()
        );
        Ok(context)
    }

    /// Record the log-write key of a group, held or not.
    pub fn set_group_sig_pubkey(&mut self, group_id: GroupID, key: PublicKey) -> Result<(), ConfigError> {
        if !is_valid_public_key(key.as_bytes()) {
            return Err(ConfigError::InvalidWriteKey);
        }
        if let Some(previous) = self.sig_pubkeys.insert(group_id, key) {
            if previous != key {
                log::warn!("Write key for group {:?} replaced ({} -> {})", group_id, previous.short(), key.short());
            }
        }
        Ok(())
    }

    pub fn group_sig_pubkey(&self, group_id: &GroupID) -> Option<PublicKey> {
        self.sig_pubkeys.get(group_id).copied()
    }

    /// Store manifest for a group whose write key is known.
    pub fn manifest(&self, group_id: &GroupID) -> Result<StoreManifest, ConfigError> {
        let key = self
            .group_sig_pubkey(group_id)
            .ok_or(ConfigError::UnknownGroup(*group_id))?;
        Ok(StoreManifest {
            store_type: MEMBER_STORE_TYPE.to_string(),
            group_id: group_id.to_hex(),
            write: vec![key.to_hex()],
        })
    }

    /// Resolve a store manifest to the index of a held group.
    pub fn open_store(&self, manifest: &StoreManifest) -> Result<SharedIndex, ConfigError> {
        if manifest.store_type != MEMBER_STORE_TYPE {
            return Err(ConfigError::UnknownStoreType(manifest.store_type.clone()));
        }
        let group_id =
            GroupID::from_hex(&manifest.group_id).map_err(|e| ConfigError::Encoding(e.to_string()))?;
        self.open_index(&group_id)
    }

    pub fn get(&self, group_id: &GroupID) -> Result<Arc<GroupContext>, ConfigError> {
        self.groups
            .get(group_id)
            .cloned()
            .ok_or(ConfigError::UnknownGroup(*group_id))
    }

    /// The index for a registered group. Repeated calls return the same handle.
    pub fn open_index(&self, group_id: &GroupID) -> Result<SharedIndex, ConfigError> {
        Ok(self.get(group_id)?.index())
    }

    pub fn remove_group(&mut self, group_id: &GroupID) -> Option<Arc<GroupContext>> {
        let removed = self.groups.remove(group_id);
        if removed.is_some() {
            log::info!("Closed group {:?}", group_id);
        }
        removed
    }

    /// Registered group ids, sorted.
    pub fn group_ids(&self) -> Vec<GroupID> {
        let mut ids: Vec<GroupID> = self.groups.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
