//! Fixup thunk dispatch.
//!
//! A [`FixupThunk`] stands in for one native export of a mixed-mode module. The first call
//! through it activates the slot: it makes sure the execution host is running, asks the host
//! for the slot's target and publishes that target on the slot's [`FixupRecord`]. Every later
//! call reads the published target without locking and forwards straight to it.
//!
//! # Activation Flow
//!
//! 1. Fast path: the record already has a target, forward.
//! 2. Take the module lock. Re-check the target, another thread may have just published it.
//! 3. A record already `Resolving` under this lock means this thread re-entered its own
//!    activation: fail with [`Error::ReentrantActivation`].
//! 4. If an attempt on the record failed while this caller waited for the lock, return that
//!    attempt's error. Callers arriving after the failure start a fresh attempt.
//! 5. Mark the module queried, move the record to `Resolving`.
//! 6. Ensure the host, resolve the slot. On success publish the target, on failure record the
//!    error and reset the record to `Unresolved`.
//! 7. Release the lock, then forward. The forwarded call never runs under the module lock.

use std::{fmt, sync::Arc};

use tracing::{debug, trace, warn};

use crate::{
    activation::{
        FixupRecord, FixupState, ModuleActivationTable, ModuleEntry, ModuleIdentity, SlotId,
        Target,
    },
    host::{HostInitializer, ResolveRequest},
    ActivationConfig, Error, Result,
};

/// The stand-in for one native export of a mixed-mode module.
///
/// Cheap to clone. Holds its module entry and record alive, so a thunk obtained once can be
/// called any number of times without touching the activation table again.
#[derive(Clone)]
pub struct FixupThunk {
    entry: Arc<ModuleEntry>,
    record: Arc<FixupRecord>,
}

impl FixupThunk {
    /// The module this thunk belongs to.
    #[must_use]
    pub fn module(&self) -> ModuleIdentity {
        self.entry.module()
    }

    /// The slot this thunk activates.
    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.record.slot()
    }

    /// Current resolution state of the slot.
    #[must_use]
    pub fn state(&self) -> FixupState {
        self.record.state()
    }

    /// The published target, `None` before activation.
    #[must_use]
    pub fn target(&self) -> Option<Target> {
        self.record.target()
    }
}

impl fmt::Debug for FixupThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixupThunk")
            .field("module", &self.module())
            .field("record", &self.record)
            .finish()
    }
}

/// Drives fixup thunks through activation.
///
/// Owns the module activation table and the host initializer. Any number of threads may
/// dispatch concurrently through any number of modules.
pub struct ThunkDispatcher {
    table: ModuleActivationTable,
    host: HostInitializer,
    strict_slots: bool,
}

impl ThunkDispatcher {
    /// Creates a dispatcher over an empty table.
    #[must_use]
    pub fn new(host: HostInitializer, config: &ActivationConfig) -> ThunkDispatcher {
        ThunkDispatcher {
            table: ModuleActivationTable::new(),
            host,
            strict_slots: config.strict_slots,
        }
    }

    /// The module activation table.
    #[must_use]
    pub fn table(&self) -> &ModuleActivationTable {
        &self.table
    }

    /// The host initializer.
    #[must_use]
    pub fn host(&self) -> &HostInitializer {
        &self.host
    }

    /// Returns the thunk for `slot` of `module`.
    ///
    /// Creates the module entry and an unresolved record on first reference. Does not
    /// activate anything.
    ///
    /// # Errors
    /// Returns [`Error::UnknownSlot`] if strict slots are enabled, the module declared its
    /// slots, and `slot` is not one of them.
    pub fn thunk(&self, module: ModuleIdentity, slot: SlotId) -> Result<FixupThunk> {
        let entry = self.table.get_or_create(module);

        let record = match entry.record(slot) {
            Some(record) => record,
            None if self.strict_slots && entry.is_declared() => {
                warn!(%module, %slot, "call through undeclared slot");
                return Err(Error::UnknownSlot { module, slot });
            }
            None => entry.record_or_insert(slot, None),
        };

        Ok(FixupThunk { entry, record })
    }

    /// Calls through `thunk`, activating its slot first if needed.
    ///
    /// `forward` receives the slot's target and performs the actual call with the caller's
    /// arguments, see [`Target::as_fn`]. Its return value is handed back unchanged.
    ///
    /// # Errors
    /// - [`Error::HostBringUpFailed`] / [`Error::ReentrantBringUp`] if the host is not running
    /// - [`Error::ResolutionFailed`] if the host could not resolve the slot
    /// - [`Error::ReentrantActivation`] if this thread is already activating the slot
    ///
    /// On error `forward` is not called and the slot stays retryable.
    pub fn call<R, F>(&self, thunk: &FixupThunk, forward: F) -> Result<R>
    where
        F: FnOnce(Target) -> R,
    {
        if let Some(target) = thunk.record.target() {
            return Ok(forward(target));
        }

        let target = self.activate(&thunk.entry, &thunk.record)?;
        Ok(forward(target))
    }

    /// Looks up the thunk for `slot` of `module` and calls through it.
    ///
    /// # Errors
    /// See [`ThunkDispatcher::thunk`] and [`ThunkDispatcher::call`].
    pub fn dispatch<R, F>(&self, module: ModuleIdentity, slot: SlotId, forward: F) -> Result<R>
    where
        F: FnOnce(Target) -> R,
    {
        let thunk = self.thunk(module, slot)?;
        self.call(&thunk, forward)
    }

    /// Activates `thunk` without calling through it.
    ///
    /// # Errors
    /// See [`ThunkDispatcher::call`].
    pub fn activate_thunk(&self, thunk: &FixupThunk) -> Result<Target> {
        match thunk.record.target() {
            Some(target) => Ok(target),
            None => self.activate(&thunk.entry, &thunk.record),
        }
    }

    fn activate(&self, entry: &ModuleEntry, record: &FixupRecord) -> Result<Target> {
        let module = entry.module();
        let slot = record.slot();

        // Sampled before blocking, so a failure that happens while waiting is recognised
        let generation = record.failure_generation();
        let host_failures = self.host.failures();
        let _guard = entry.lock();

        if let Some(target) = record.target() {
            return Ok(target);
        }

        if record.state() == FixupState::Resolving {
            warn!(%module, %slot, "fixup slot re-entered during its own activation");
            return Err(Error::ReentrantActivation(slot));
        }

        if let Some(error) = record.failure_since(generation) {
            debug!(%module, %slot, %error, "reporting failure of the attempt waited on");
            return Err(error);
        }

        if entry.mark_queried() {
            debug!(%module, "first activation in module");
        }

        record.begin_resolving();
        trace!(%module, %slot, token = ?record.token(), "resolving fixup slot");

        match self.resolve(module, record, host_failures) {
            Ok(target) => {
                let target = record.publish(target);
                debug!(%module, %slot, ?target, "fixup slot resolved");
                Ok(target)
            }
            Err(error) => {
                record.record_failure(&error);
                record.abandon();
                warn!(%module, %slot, %error, "fixup slot activation failed");
                Err(error)
            }
        }
    }

    fn resolve(
        &self,
        module: ModuleIdentity,
        record: &FixupRecord,
        host_failures: usize,
    ) -> Result<Target> {
        let handle = self.host.ensure_host_after(host_failures)?;
        let request = ResolveRequest {
            module,
            slot: record.slot(),
            token: record.token(),
        };

        self.host
            .resolve(handle, &request)
            .map_err(|source| Error::ResolutionFailed {
                slot: record.slot(),
                source,
            })
    }
}
