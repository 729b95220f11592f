//! Per-module activation state.
//!
//! Every loaded mixed-mode module gets one [`ModuleEntry`] in the [`ModuleActivationTable`].
//! The entry owns one [`FixupRecord`] per patchable call site, a monotonic "ever queried" flag,
//! and the re-entrant lock that serialises activation of the module's slots.
//!
//! # Key Components
//!
//! - [`ModuleIdentity`] - Opaque module key, the base load address
//! - [`SlotId`] - Call site within a module
//! - [`FixupRecord`] - Resolution state and published [`Target`] of one slot
//! - [`ModuleActivationTable`] - Lock-free map of module entries
//!
//! # Thread Safety
//!
//! Lookups on the table, entries and records never block. Creating records and driving them
//! through resolution takes the module lock; the lock is re-entrant so a resolution that calls
//! back into the same module on the same thread does not deadlock.

mod identity;
mod record;
mod table;

pub use identity::ModuleIdentity;
pub use record::{FixupRecord, FixupState, SlotId, Target};
pub use table::{ModuleActivationTable, ModuleEntry};
