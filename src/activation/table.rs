//! The process-wide module activation table.
//!
//! One [`ModuleEntry`] per module seen, holding the fixup records of its slots, the module's
//! queried flag and the lock first-time activation runs under.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::debug;

use crate::{
    activation::{FixupRecord, ModuleIdentity, SlotId},
    image::Token,
};

/// Activation state of one module.
///
/// Records live in an append-only arena and are never removed, so a [`FixupRecord`] handed
/// out once stays valid for the life of the entry. The slot index maps a [`SlotId`] to its
/// arena position.
pub struct ModuleEntry {
    module: ModuleIdentity,
    records: boxcar::Vec<Arc<FixupRecord>>,
    index: DashMap<SlotId, usize>,
    ever_queried: AtomicBool,
    declared: AtomicBool,
    lock: ReentrantMutex<()>,
}

impl ModuleEntry {
    fn new(module: ModuleIdentity) -> ModuleEntry {
        ModuleEntry {
            module,
            records: boxcar::Vec::new(),
            index: DashMap::new(),
            ever_queried: AtomicBool::new(false),
            declared: AtomicBool::new(false),
            lock: ReentrantMutex::new(()),
        }
    }

    /// The module this entry belongs to.
    #[must_use]
    pub fn module(&self) -> ModuleIdentity {
        self.module
    }

    /// Returns `true` once any slot of the module has started activation.
    ///
    /// Monotonic: never returns to `false`.
    #[must_use]
    pub fn ever_queried(&self) -> bool {
        self.ever_queried.load(Ordering::Acquire)
    }

    /// Returns `true` if a module image declared this module's slots.
    #[must_use]
    pub fn is_declared(&self) -> bool {
        self.declared.load(Ordering::Acquire)
    }

    /// Number of slots known for this module, declared or created on first call.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.records.count()
    }

    /// The record for `slot`, if one exists.
    #[must_use]
    pub fn record(&self, slot: SlotId) -> Option<Arc<FixupRecord>> {
        let position = *self.index.get(&slot)?;
        self.records.get(position).cloned()
    }

    /// The declared token of `slot`.
    #[must_use]
    pub fn token_for(&self, slot: SlotId) -> Option<Token> {
        self.record(slot)?.token()
    }

    /// All records in creation order.
    pub fn records(&self) -> impl Iterator<Item = &Arc<FixupRecord>> + '_ {
        self.records.iter().map(|(_, record)| record)
    }

    /// The record for `slot`, created unresolved if the module has none yet.
    ///
    /// Takes the module lock, so two threads racing on the same new slot end up sharing one
    /// record.
    pub fn record_or_insert(&self, slot: SlotId, token: Option<Token>) -> Arc<FixupRecord> {
        let _guard = self.lock();
        self.insert_locked(slot, token)
    }

    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    // Caller holds the module lock.
    fn insert_locked(&self, slot: SlotId, token: Option<Token>) -> Arc<FixupRecord> {
        if let Some(record) = self.record(slot) {
            if let Some(token) = token {
                record.attach_token(token);
            }
            return record;
        }

        let record = Arc::new(FixupRecord::new(slot, token));
        let position = self.records.push(record.clone());
        self.index.insert(slot, position);
        record
    }

    // Returns `true` for the call that flipped the flag.
    pub(crate) fn mark_queried(&self) -> bool {
        !self.ever_queried.swap(true, Ordering::AcqRel)
    }
}

/// Process-wide map from module identity to its activation state.
///
/// Entries are created on first reference and never removed. Lookups are lock-free.
///
/// # Examples
///
/// ```rust
/// use ijwhost::activation::{ModuleActivationTable, ModuleIdentity, SlotId};
///
/// let table = ModuleActivationTable::new();
/// let module = ModuleIdentity::from_base(0x1000_0000);
///
/// assert!(!table.query_ever_activated(module));
/// let entry = table.get_or_create(module);
/// let record = entry.record_or_insert(SlotId::new(0x2000), None);
/// assert!(!record.is_resolved());
/// assert_eq!(table.len(), 1);
/// ```
#[derive(Default)]
pub struct ModuleActivationTable {
    modules: SkipMap<ModuleIdentity, Arc<ModuleEntry>>,
}

impl ModuleActivationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> ModuleActivationTable {
        ModuleActivationTable {
            modules: SkipMap::new(),
        }
    }

    /// Returns the entry for `module`, creating an empty one on first reference.
    ///
    /// Concurrent first references agree on a single entry.
    pub fn get_or_create(&self, module: ModuleIdentity) -> Arc<ModuleEntry> {
        if let Some(entry) = self.modules.get(&module) {
            return entry.value().clone();
        }

        self.modules
            .get_or_insert_with(module, || {
                debug!(%module, "registering module");
                Arc::new(ModuleEntry::new(module))
            })
            .value()
            .clone()
    }

    /// Returns the entry for `module` without creating one.
    #[must_use]
    pub fn get(&self, module: ModuleIdentity) -> Option<Arc<ModuleEntry>> {
        self.modules.get(&module).map(|entry| entry.value().clone())
    }

    /// Returns `true` if any slot of `module` has ever started activation.
    ///
    /// Unknown modules report `false`.
    #[must_use]
    pub fn query_ever_activated(&self, module: ModuleIdentity) -> bool {
        self.modules
            .get(&module)
            .is_some_and(|entry| entry.value().ever_queried())
    }

    /// Declares the slots of `module`, typically from its image's `VTableFixups` directory.
    ///
    /// Slots that already have a record keep it. A declared token is attached to such a record
    /// if it has none yet. Returns the number of distinct slots declared by this call.
    pub fn declare<I>(&self, module: ModuleIdentity, slots: I) -> usize
    where
        I: IntoIterator<Item = (SlotId, Option<Token>)>,
    {
        let entry = self.get_or_create(module);
        let _guard = entry.lock();

        let before = entry.slot_count();
        let mut seen = 0usize;
        for (slot, token) in slots {
            entry.insert_locked(slot, token);
            seen += 1;
        }
        entry.declared.store(true, Ordering::Release);

        debug!(
            %module,
            seen,
            new = entry.slot_count() - before,
            "declared module slots"
        );
        seen
    }

    /// Number of known modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no module has been referenced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Identities of all known modules, in address order.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleIdentity> {
        self.modules.iter().map(|entry| *entry.key()).collect()
    }
}
