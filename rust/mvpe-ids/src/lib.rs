//! Deterministic ID allocator and lockfile (component C4).
//!
//! Assigns stable numeric IDs to service, method, and message symbols so
//! that names produce the same ID across builds, deletions can never be
//! silently reused, and renames carry the old ID forward. See
//! `SPEC_FULL.md` section 4.4.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

pub mod lockfile;

pub use lockfile::IdsLock;

/// Default lockfile name, resolved relative to the schema directory by the
/// build-tool surface (section 6.4).
pub const DEFAULT_LOCKFILE_NAME: &str = ".mvpe.ids.lock";

/// An inclusive numeric ID range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpace {
    pub min: u16,
    pub max: u16,
    pub name: &'static str,
}

impl IdSpace {
    pub const fn contains(&self, id: u16) -> bool {
        id >= self.min && id <= self.max
    }

    fn size(&self) -> u32 {
        (self.max as u32) - (self.min as u32) + 1
    }
}

/// Services: `[32, 64999]` (section 3).
pub const SERVICE_SPACE: IdSpace = IdSpace {
    min: 32,
    max: 64999,
    name: "service",
};
/// Messages: `[32, 64000]` (section 3).
pub const MESSAGE_SPACE: IdSpace = IdSpace {
    min: 32,
    max: 64000,
    name: "message",
};
/// Methods (per service): `[16, 239]` (section 3).
pub const METHOD_SPACE: IdSpace = IdSpace {
    min: 16,
    max: 239,
    name: "method",
};

/// Which kind of symbol an ID is being assigned to. Determines the ID
/// space and probe attempt cap (section 4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Service,
    Message,
    Method,
}

impl IdKind {
    pub const fn space(self) -> IdSpace {
        match self {
            IdKind::Service => SERVICE_SPACE,
            IdKind::Message => MESSAGE_SPACE,
            IdKind::Method => METHOD_SPACE,
        }
    }

    /// Maximum probe attempts before giving up (section 4.4.2): 4096 for
    /// the global service/message spaces, 1024 for the per-service method
    /// space.
    const fn probe_limit(self) -> u32 {
        match self {
            IdKind::Service | IdKind::Message => 4096,
            IdKind::Method => 1024,
        }
    }
}

/// The mode the allocator runs in (section 4.4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Allocate without consulting or writing the lockfile.
    Off,
    /// Load the lockfile, fail on anything new or drifted, never write.
    Check,
    /// Load the lockfile, allocate missing IDs, overwrite drift, persist.
    Write,
}

/// Errors surfaced by the ID allocator (section 7 `IdError` taxonomy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    OutOfRange { id: u16, space: &'static str },
    AlreadyInUse { id: u16, symbol: String },
    Tombstoned { id: u16 },
    LockDrift { symbol: String, locked: u16, requested: u16 },
    MissingInLockCheckMode { symbol: String },
    AliasCycle { name: String },
    ProbeExhausted { canonical: String },
    Io(String),
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdError::OutOfRange { id, space } => {
                write!(f, "id {id} is outside the {space} id space")
            }
            IdError::AlreadyInUse { id, symbol } => {
                write!(f, "id {id} is already in use by `{symbol}`")
            }
            IdError::Tombstoned { id } => write!(f, "id {id} has been tombstoned and cannot be reused"),
            IdError::LockDrift {
                symbol,
                locked,
                requested,
            } => write!(
                f,
                "`{symbol}` is locked to id {locked} but the schema requests {requested}"
            ),
            IdError::MissingInLockCheckMode { symbol } => write!(
                f,
                "`{symbol}` has no lockfile entry; run in WRITE mode locally and commit the updated lockfile"
            ),
            IdError::AliasCycle { name } => {
                write!(f, "alias chain starting at `{name}` exceeds 10 hops or cycles")
            }
            IdError::ProbeExhausted { canonical } => write!(
                f,
                "exhausted probe attempts looking for a free id for `{canonical}`"
            ),
            IdError::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IdError {}

/// 32-bit FNV-1a hash (section 4.4.1).
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn map_hash_to_id(hash: u32, space: &IdSpace) -> u16 {
    space.min + (hash % space.size()) as u16
}

/// Canonical hash input for a service name (section 4.4.1).
pub fn canonical_service_name(service: &str) -> String {
    format!("Service:{service}")
}

/// Canonical hash input for a message name (section 4.4.1).
pub fn canonical_message_name(message: &str) -> String {
    format!("Message:{message}")
}

/// Canonical hash input for a qualified method name (section 4.4.1).
pub fn canonical_method_name(service: &str, method: &str) -> String {
    format!("{service}.{method}")
}

/// The key a method is stored under in [`IdsLock::methods`].
pub fn method_key(service: &str, method: &str) -> String {
    format!("{service}.{method}")
}

/// Follow an alias chain `old -> new` up to 10 hops (section 4.4.6).
/// Returns the terminal (canonical) name.
pub fn resolve_alias_chain(name: &str, aliases: &HashMap<String, String>) -> Result<String, IdError> {
    let mut current = name.to_string();
    let mut seen = HashSet::new();
    for _ in 0..=10 {
        match aliases.get(&current) {
            Some(next) => {
                if !seen.insert(current.clone()) {
                    return Err(IdError::AliasCycle { name: name.to_string() });
                }
                current = next.clone();
            }
            None => return Ok(current),
        }
    }
    Err(IdError::AliasCycle { name: name.to_string() })
}

/// Deterministic, persistent ID assignment (section 4.4.7).
///
/// One `IdAllocator` is constructed per build invocation, fed schema
/// symbols one at a time by the schema/codegen layer, then finalized to
/// persist the lock (WRITE mode only).
pub struct IdAllocator {
    lock: IdsLock,
    mode: Mode,
    lockfile_path: Option<PathBuf>,
    dirty: bool,
}

impl IdAllocator {
    /// Construct an allocator around an already-loaded lock.
    pub fn new(mode: Mode, lock: IdsLock, lockfile_path: Option<PathBuf>) -> Self {
        IdAllocator {
            lock,
            mode,
            lockfile_path,
            dirty: false,
        }
    }

    /// Load the lock from `path` (an absent file is an empty lock at
    /// version 1) and construct an allocator for it.
    pub fn load(mode: Mode, path: impl Into<PathBuf>) -> Result<Self, IdError> {
        let path = path.into();
        let lock = lockfile::load(&path)?;
        Ok(IdAllocator::new(mode, lock, Some(path)))
    }

    /// Construct an allocator with no backing lockfile (implies effectively
    /// [`Mode::Off`] semantics for persistence even if another mode value is
    /// passed; callers should pass `Mode::Off` here).
    pub fn in_memory(mode: Mode) -> Self {
        IdAllocator::new(mode, IdsLock::empty(), None)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn lock(&self) -> &IdsLock {
        &self.lock
    }

    /// Resolve a service name through `aliases.services`.
    pub fn resolve_service_alias(&self, name: &str) -> Result<String, IdError> {
        resolve_alias_chain(name, &self.lock.alias_services)
    }

    /// Resolve a message name through `aliases.messages`.
    pub fn resolve_message_alias(&self, name: &str) -> Result<String, IdError> {
        resolve_alias_chain(name, &self.lock.alias_messages)
    }

    fn is_service_id_free(&self, owner: &str, id: u16) -> bool {
        if self.lock.tombstones_services.contains(&id) {
            return false;
        }
        !self
            .lock
            .services
            .iter()
            .any(|(name, &used)| used == id && name != owner)
    }

    fn is_message_id_free(&self, owner: &str, id: u16) -> bool {
        if self.lock.tombstones_messages.contains(&id) {
            return false;
        }
        !self
            .lock
            .messages
            .iter()
            .any(|(name, &used)| used == id && name != owner)
    }

    fn is_method_id_free(&self, service: &str, owner_key: &str, id: u16) -> bool {
        if self
            .lock
            .tombstones_methods
            .get(service)
            .is_some_and(|t| t.contains(&id))
        {
            return false;
        }
        let prefix = format!("{service}.");
        !self.lock.methods.iter().any(|(key, &used)| {
            used == id && key.starts_with(&prefix) && key != owner_key
        })
    }

    fn probe(&self, canonical_name: &str, kind: IdKind, is_free: impl Fn(&Self, u16) -> bool) -> Result<u16, IdError> {
        let space = kind.space();
        for attempt in 0..kind.probe_limit() {
            let probed = if attempt == 0 {
                canonical_name.to_string()
            } else {
                format!("{canonical_name}#{attempt}")
            };
            let id = map_hash_to_id(fnv1a(probed.as_bytes()), &space);
            if is_free(self, id) {
                return Ok(id);
            }
        }
        Err(IdError::ProbeExhausted {
            canonical: canonical_name.to_string(),
        })
    }

    /// Determine the ID for a service (already alias-resolved), per section
    /// 4.4.7 steps 2-3.
    pub fn assign_service_id(&mut self, service: &str, explicit_id: Option<u16>) -> Result<u16, IdError> {
        if let Some(id) = explicit_id {
            self.check_explicit(IdKind::Service, service, id, |me, id| me.is_service_id_free(service, id))?;
            match self.mode {
                Mode::Off => {}
                Mode::Check => {
                    if let Some(&locked) = self.lock.services.get(service) {
                        if locked != id {
                            return Err(IdError::LockDrift {
                                symbol: service.to_string(),
                                locked,
                                requested: id,
                            });
                        }
                    }
                }
                Mode::Write => {
                    if self.lock.services.get(service) != Some(&id) {
                        self.lock.services.insert(service.to_string(), id);
                        self.dirty = true;
                    }
                }
            }
            return Ok(id);
        }

        match self.mode {
            Mode::Off => self.probe(&canonical_service_name(service), IdKind::Service, |me, id| {
                me.is_service_id_free(service, id)
            }),
            Mode::Check => self
                .lock
                .services
                .get(service)
                .copied()
                .ok_or_else(|| IdError::MissingInLockCheckMode {
                    symbol: service.to_string(),
                }),
            Mode::Write => {
                if let Some(&id) = self.lock.services.get(service) {
                    return Ok(id);
                }
                let id = self.probe(&canonical_service_name(service), IdKind::Service, |me, id| {
                    me.is_service_id_free(service, id)
                })?;
                self.lock.services.insert(service.to_string(), id);
                self.dirty = true;
                Ok(id)
            }
        }
    }

    /// Determine the ID for a method within `service`, per section 4.4.7
    /// step 4.
    pub fn assign_method_id(
        &mut self,
        service: &str,
        method: &str,
        explicit_id: Option<u16>,
    ) -> Result<u16, IdError> {
        let key = method_key(service, method);
        if let Some(id) = explicit_id {
            self.check_explicit(IdKind::Method, &key, id, |me, id| {
                me.is_method_id_free(service, &key, id)
            })?;
            match self.mode {
                Mode::Off => {}
                Mode::Check => {
                    if let Some(&locked) = self.lock.methods.get(&key) {
                        if locked != id {
                            return Err(IdError::LockDrift {
                                symbol: key.clone(),
                                locked,
                                requested: id,
                            });
                        }
                    }
                }
                Mode::Write => {
                    if self.lock.methods.get(&key) != Some(&id) {
                        self.lock.methods.insert(key.clone(), id);
                        self.dirty = true;
                    }
                }
            }
            return Ok(id);
        }

        let canonical = canonical_method_name(service, method);
        match self.mode {
            Mode::Off => self.probe(&canonical, IdKind::Method, |me, id| {
                me.is_method_id_free(service, &key, id)
            }),
            Mode::Check => self
                .lock
                .methods
                .get(&key)
                .copied()
                .ok_or_else(|| IdError::MissingInLockCheckMode { symbol: key.clone() }),
            Mode::Write => {
                if let Some(&id) = self.lock.methods.get(&key) {
                    return Ok(id);
                }
                let id = self.probe(&canonical, IdKind::Method, |me, id| {
                    me.is_method_id_free(service, &key, id)
                })?;
                self.lock.methods.insert(key.clone(), id);
                self.dirty = true;
                Ok(id)
            }
        }
    }

    /// Determine the ID for a message (already alias-resolved), per
    /// section 4.4.7 step 5.
    pub fn assign_message_id(&mut self, message: &str, explicit_id: Option<u16>) -> Result<u16, IdError> {
        if let Some(id) = explicit_id {
            self.check_explicit(IdKind::Message, message, id, |me, id| me.is_message_id_free(message, id))?;
            match self.mode {
                Mode::Off => {}
                Mode::Check => {
                    if let Some(&locked) = self.lock.messages.get(message) {
                        if locked != id {
                            return Err(IdError::LockDrift {
                                symbol: message.to_string(),
                                locked,
                                requested: id,
                            });
                        }
                    }
                }
                Mode::Write => {
                    if self.lock.messages.get(message) != Some(&id) {
                        self.lock.messages.insert(message.to_string(), id);
                        self.dirty = true;
                    }
                }
            }
            return Ok(id);
        }

        match self.mode {
            Mode::Off => self.probe(&canonical_message_name(message), IdKind::Message, |me, id| {
                me.is_message_id_free(message, id)
            }),
            Mode::Check => self
                .lock
                .messages
                .get(message)
                .copied()
                .ok_or_else(|| IdError::MissingInLockCheckMode {
                    symbol: message.to_string(),
                }),
            Mode::Write => {
                if let Some(&id) = self.lock.messages.get(message) {
                    return Ok(id);
                }
                let id = self.probe(&canonical_message_name(message), IdKind::Message, |me, id| {
                    me.is_message_id_free(message, id)
                })?;
                self.lock.messages.insert(message.to_string(), id);
                self.dirty = true;
                Ok(id)
            }
        }
    }

    fn check_explicit(
        &self,
        kind: IdKind,
        owner: &str,
        id: u16,
        is_free: impl Fn(&Self, u16) -> bool,
    ) -> Result<(), IdError> {
        let space = kind.space();
        if !space.contains(id) {
            return Err(IdError::OutOfRange { id, space: space.name });
        }
        let tombstoned = match kind {
            IdKind::Service => self.lock.tombstones_services.contains(&id),
            IdKind::Message => self.lock.tombstones_messages.contains(&id),
            IdKind::Method => {
                let service = owner.split_once('.').map(|(s, _)| s).unwrap_or(owner);
                self.lock
                    .tombstones_methods
                    .get(service)
                    .is_some_and(|t| t.contains(&id))
            }
        };
        if tombstoned {
            return Err(IdError::Tombstoned { id });
        }
        if !is_free(self, id) {
            return Err(IdError::AlreadyInUse {
                id,
                symbol: owner.to_string(),
            });
        }
        Ok(())
    }

    /// Whether any in-memory change is pending persistence.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persist the lock if `mode == Write` and changes were made; a no-op
    /// otherwise (section 4.4.7 step 6).
    pub fn finalize(&mut self) -> Result<(), IdError> {
        if self.mode != Mode::Write {
            return Ok(());
        }
        let Some(path) = &self.lockfile_path else {
            return Ok(());
        };
        if self.dirty {
            lockfile::save(&self.lock, path)?;
            tracing::info!(path = %path.display(), "persisted ids lockfile");
            self.dirty = false;
        }
        Ok(())
    }

    /// Consume the allocator, returning the (possibly updated) lock.
    pub fn into_lock(self) -> IdsLock {
        self.lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_is_deterministic() {
        assert_eq!(fnv1a(b"hello"), fnv1a(b"hello"));
        assert_ne!(fnv1a(b"hello"), fnv1a(b"world"));
    }

    #[test]
    fn deterministic_allocation_on_empty_lock_is_stable() {
        // Testable property 4 / scenario S5.
        let mut a = IdAllocator::in_memory(Mode::Off);
        let mut b = IdAllocator::in_memory(Mode::Off);
        let service_a = a.assign_service_id("AccountService", None).unwrap();
        let service_b = b.assign_service_id("AccountService", None).unwrap();
        assert_eq!(service_a, service_b);

        let m1_a = a.assign_method_id("AccountService", "GetBalance", None).unwrap();
        let m1_b = b.assign_method_id("AccountService", "GetBalance", None).unwrap();
        assert_eq!(m1_a, m1_b);

        let m2_a = a.assign_method_id("AccountService", "TransferFunds", None).unwrap();
        let m2_b = b.assign_method_id("AccountService", "TransferFunds", None).unwrap();
        assert_eq!(m2_a, m2_b);
    }

    #[test]
    fn tombstone_blocks_explicit_reuse_and_deflects_probe() {
        // Scenario S6.
        let mut lock = IdsLock::empty();
        lock.services.insert("OldSvc".to_string(), 500);
        lock.tombstones_services.insert(500);
        let mut allocator = IdAllocator::new(Mode::Write, lock, None);

        let err = allocator.assign_service_id("NewSvc", Some(500)).unwrap_err();
        assert_eq!(err, IdError::Tombstoned { id: 500 });

        // Find a name whose first-choice hash collides with 500, to exercise
        // the probing-past-tombstone path deterministically.
        let mut probing_name = None;
        for candidate in ["NewSvc", "Svc2", "Svc3", "Svc4", "Svc5", "Billing", "Accounts"] {
            let h = fnv1a(canonical_service_name(candidate).as_bytes());
            if SERVICE_SPACE.min + (h % SERVICE_SPACE.size()) as u16 == 500 {
                probing_name = Some(candidate);
                break;
            }
        }
        // Whether or not we found a natural collision, any deterministic
        // allocation must simply never equal the tombstoned id.
        let name = probing_name.unwrap_or("NewSvc");
        let id = allocator.assign_service_id(name, None).unwrap();
        assert_ne!(id, 500);
    }

    #[test]
    fn check_mode_after_write_mode_has_no_drift() {
        // Testable property 6.
        let mut write_lock = IdsLock::empty();
        let mut writer = IdAllocator::new(Mode::Write, write_lock.clone(), None);
        let service_id = writer.assign_service_id("AccountService", None).unwrap();
        let method_id = writer
            .assign_method_id("AccountService", "GetBalance", None)
            .unwrap();
        let message_id = writer.assign_message_id("GetBalanceRequest", None).unwrap();
        write_lock = writer.into_lock();

        let mut checker = IdAllocator::new(Mode::Check, write_lock, None);
        assert_eq!(
            checker.assign_service_id("AccountService", None).unwrap(),
            service_id
        );
        assert_eq!(
            checker
                .assign_method_id("AccountService", "GetBalance", None)
                .unwrap(),
            method_id
        );
        assert_eq!(
            checker.assign_message_id("GetBalanceRequest", None).unwrap(),
            message_id
        );
        assert!(!checker.is_dirty());
    }

    #[test]
    fn check_mode_rejects_unmapped_symbol() {
        let mut checker = IdAllocator::new(Mode::Check, IdsLock::empty(), None);
        let err = checker.assign_message_id("Unknown", None).unwrap_err();
        assert_eq!(
            err,
            IdError::MissingInLockCheckMode {
                symbol: "Unknown".to_string()
            }
        );
    }

    #[test]
    fn rename_alias_preserves_id_across_check() {
        // Scenario S7.
        let mut lock = IdsLock::empty();
        lock.messages.insert("GetBalanceRequest".to_string(), 101);
        lock.alias_messages
            .insert("GetBalanceRequest".to_string(), "GetBalanceRequestV2".to_string());
        let allocator = IdAllocator::new(Mode::Check, lock, None);

        let canonical = allocator.resolve_message_alias("GetBalanceRequest").unwrap();
        assert_eq!(canonical, "GetBalanceRequestV2");
    }

    #[test]
    fn alias_chain_beyond_ten_hops_fails() {
        let mut aliases = HashMap::new();
        for i in 0..12 {
            aliases.insert(format!("n{i}"), format!("n{}", i + 1));
        }
        let err = resolve_alias_chain("n0", &aliases).unwrap_err();
        assert!(matches!(err, IdError::AliasCycle { .. }));
    }

    #[test]
    fn alias_self_cycle_fails() {
        let mut aliases = HashMap::new();
        aliases.insert("A".to_string(), "B".to_string());
        aliases.insert("B".to_string(), "A".to_string());
        let err = resolve_alias_chain("A", &aliases).unwrap_err();
        assert!(matches!(err, IdError::AliasCycle { .. }));
    }

    #[test]
    fn explicit_id_out_of_range_is_rejected() {
        let mut allocator = IdAllocator::in_memory(Mode::Off);
        let err = allocator.assign_service_id("Svc", Some(1)).unwrap_err();
        assert_eq!(
            err,
            IdError::OutOfRange {
                id: 1,
                space: "service"
            }
        );
    }

    #[test]
    fn explicit_id_conflict_is_rejected() {
        let mut allocator = IdAllocator::in_memory(Mode::Write);
        allocator.assign_service_id("Svc1", Some(100)).unwrap();
        let err = allocator.assign_service_id("Svc2", Some(100)).unwrap_err();
        assert!(matches!(err, IdError::AlreadyInUse { id: 100, .. }));
    }

    #[test]
    fn write_mode_overwrites_drifted_explicit_id() {
        let mut lock = IdsLock::empty();
        lock.services.insert("Svc".to_string(), 100);
        let mut allocator = IdAllocator::new(Mode::Write, lock, None);
        let id = allocator.assign_service_id("Svc", Some(200)).unwrap();
        assert_eq!(id, 200);
        assert!(allocator.is_dirty());
        assert_eq!(allocator.lock().services.get("Svc"), Some(&200));
    }

    #[test]
    fn check_mode_rejects_drifted_explicit_id() {
        let mut lock = IdsLock::empty();
        lock.services.insert("Svc".to_string(), 100);
        let mut allocator = IdAllocator::new(Mode::Check, lock, None);
        let err = allocator.assign_service_id("Svc", Some(200)).unwrap_err();
        assert!(matches!(err, IdError::LockDrift { .. }));
    }

    #[test]
    fn method_ids_are_scoped_per_service() {
        let mut allocator = IdAllocator::in_memory(Mode::Write);
        let id = allocator.assign_method_id("SvcA", "M", Some(20)).unwrap();
        // A different service may reuse the same numeric method id.
        let id2 = allocator.assign_method_id("SvcB", "M", Some(20)).unwrap();
        assert_eq!(id, id2);
    }
}
