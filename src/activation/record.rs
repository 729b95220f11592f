//! Fixup records: one per patchable call site.
//!
//! A [`FixupRecord`] moves through [`FixupState::Unresolved`], [`FixupState::Resolving`] and
//! [`FixupState::Resolved`]. The last state is terminal. Its [`Target`] is written exactly once
//! and becomes visible to other threads before the record reports `Resolved`: the target cell
//! is initialised first, then the state is stored with release ordering and loaded with acquire
//! ordering.
//!
//! All transitions happen under the owning module entry's lock, see
//! [`crate::dispatch::ThunkDispatcher`]. Readers never lock.
//!
//! A failed attempt bumps the record's failure generation and keeps the error. Callers that
//! sampled the generation before blocking on the module lock receive that error instead of
//! starting an attempt of their own.

use std::{
    fmt,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        OnceLock,
    },
};

use parking_lot::Mutex;

use crate::{host::HostError, image::Token, Error};

/// Identifies a call site within a module's dispatch table.
///
/// For slots declared from an image this is the RVA of the vtable entry. Unique within a
/// module, meaningless across modules.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

impl SlotId {
    /// Creates a slot id from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        SlotId(value)
    }

    /// The raw value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for SlotId {
    fn from(value: u32) -> Self {
        SlotId(value)
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId(0x{:08x})", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// A directly callable entry point inside the execution host.
///
/// Never null: a record can only ever forward to an address the host handed out.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target(NonZeroUsize);

impl Target {
    /// Wraps a non-null entry point address.
    #[must_use]
    pub const fn new(address: NonZeroUsize) -> Self {
        Target(address)
    }

    /// Wraps an entry point address, `None` for null.
    #[must_use]
    pub fn from_address(address: usize) -> Option<Self> {
        NonZeroUsize::new(address).map(Target)
    }

    /// The raw entry point address.
    #[must_use]
    pub const fn address(&self) -> usize {
        self.0.get()
    }

    /// Reinterprets the entry point as a concrete function pointer type.
    ///
    /// `F` is the exact signature the module's export declares, e.g.
    /// `extern "C" fn(i32) -> i32`. Forwarding through it keeps the calling convention,
    /// arguments and return value of the original call intact.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type whose signature and ABI match the code at this
    /// address.
    ///
    /// # Panics
    ///
    /// Panics if `F` is not pointer sized.
    #[must_use]
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<usize>(),
            "entry points can only be reinterpreted as pointer sized function types"
        );
        let address = self.0.get();
        std::mem::transmute_copy::<usize, F>(&address)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({:#x})", self.0)
    }
}

/// Resolution state of a [`FixupRecord`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupState {
    /// Never resolved, or the last attempt failed
    Unresolved = 0,
    /// A thread holding the module lock is resolving the slot
    Resolving = 1,
    /// Terminal, the target is published
    Resolved = 2,
}

impl FixupState {
    fn from_u8(value: u8) -> FixupState {
        match value {
            2 => FixupState::Resolved,
            1 => FixupState::Resolving,
            _ => FixupState::Unresolved,
        }
    }
}

// The error of the most recent failed attempt, kept for the callers that waited on it.
#[derive(Clone)]
enum AttemptFailure {
    BringUp(HostError),
    Resolution(HostError),
}

/// State of one patchable call site.
pub struct FixupRecord {
    slot: SlotId,
    token: OnceLock<Token>,
    state: AtomicU8,
    target: OnceLock<Target>,
    failures: AtomicU64,
    last_failure: Mutex<Option<AttemptFailure>>,
}

impl FixupRecord {
    pub(crate) fn new(slot: SlotId, token: Option<Token>) -> FixupRecord {
        let record = FixupRecord {
            slot,
            token: OnceLock::new(),
            state: AtomicU8::new(FixupState::Unresolved as u8),
            target: OnceLock::new(),
            failures: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        };
        if let Some(token) = token {
            record.attach_token(token);
        }
        record
    }

    /// The call site this record describes.
    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// The metadata token of the slot, if the module image declared it.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        self.token.get().copied()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> FixupState {
        FixupState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The published target, `None` until the record has been resolved.
    #[must_use]
    pub fn target(&self) -> Option<Target> {
        self.target.get().copied()
    }

    /// Returns `true` once the record has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state() == FixupState::Resolved
    }

    // The first token wins, a declared token is never replaced.
    pub(crate) fn attach_token(&self, token: Token) {
        let _ = self.token.set(token);
    }

    pub(crate) fn begin_resolving(&self) {
        debug_assert_eq!(self.state(), FixupState::Unresolved);
        self.state
            .store(FixupState::Resolving as u8, Ordering::Release);
    }

    pub(crate) fn abandon(&self) {
        debug_assert_eq!(self.state(), FixupState::Resolving);
        self.state
            .store(FixupState::Unresolved as u8, Ordering::Release);
    }

    // Sampled before blocking on the module lock.
    pub(crate) fn failure_generation(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    // Keeps a host failure for the callers queued behind this attempt. Re-entrancy errors
    // belong to the thread that hit them and are not recorded.
    pub(crate) fn record_failure(&self, error: &Error) {
        let failure = match error {
            Error::HostBringUpFailed(source) => AttemptFailure::BringUp(source.clone()),
            Error::ResolutionFailed { source, .. } => AttemptFailure::Resolution(source.clone()),
            _ => return,
        };

        *self.last_failure.lock() = Some(failure);
        self.failures.fetch_add(1, Ordering::Release);
    }

    /// The error of the last failed attempt, if one failed after `generation` was sampled.
    pub(crate) fn failure_since(&self, generation: u64) -> Option<Error> {
        if self.failure_generation() == generation {
            return None;
        }

        self.last_failure.lock().clone().map(|failure| match failure {
            AttemptFailure::BringUp(source) => Error::HostBringUpFailed(source),
            AttemptFailure::Resolution(source) => Error::ResolutionFailed {
                slot: self.slot,
                source,
            },
        })
    }

    pub(crate) fn publish(&self, target: Target) -> Target {
        let published = *self.target.get_or_init(|| target);
        self.state.store(FixupState::Resolved as u8, Ordering::Release);
        published
    }
}

impl fmt::Debug for FixupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixupRecord")
            .field("slot", &self.slot)
            .field("token", &self.token())
            .field("state", &self.state())
            .field("target", &self.target())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add_one(value: i32) -> i32 {
        value + 1
    }

    #[test]
    fn lifecycle() {
        let record = FixupRecord::new(SlotId::new(0x2000), None);
        assert_eq!(record.state(), FixupState::Unresolved);
        assert!(record.target().is_none());

        record.begin_resolving();
        assert_eq!(record.state(), FixupState::Resolving);
        assert!(record.target().is_none());

        let target = Target::from_address(0x1234).unwrap();
        assert_eq!(record.publish(target), target);
        assert!(record.is_resolved());
        assert_eq!(record.target(), Some(target));
    }

    #[test]
    fn abandon_is_retryable() {
        let record = FixupRecord::new(SlotId::new(0x2000), None);
        record.begin_resolving();
        record.abandon();
        assert_eq!(record.state(), FixupState::Unresolved);
        assert!(record.target().is_none());

        record.begin_resolving();
        record.publish(Target::from_address(0x10).unwrap());
        assert!(record.is_resolved());
    }

    #[test]
    fn first_token_wins() {
        let record = FixupRecord::new(SlotId::new(4), Some(Token::new(0x0600_0001)));
        record.attach_token(Token::new(0x0600_0002));
        assert_eq!(record.token(), Some(Token::new(0x0600_0001)));

        let record = FixupRecord::new(SlotId::new(4), None);
        assert_eq!(record.token(), None);
        record.attach_token(Token::new(0x0600_0002));
        assert_eq!(record.token(), Some(Token::new(0x0600_0002)));
    }

    #[test]
    fn failure_generation() {
        let record = FixupRecord::new(SlotId::new(0x2000), None);
        let before = record.failure_generation();
        assert!(record.failure_since(before).is_none());

        // Not a host failure, nothing to replay
        record.record_failure(&Error::ReentrantBringUp);
        assert!(record.failure_since(before).is_none());

        record.record_failure(&Error::ResolutionFailed {
            slot: SlotId::new(0x2000),
            source: HostError::new("method not found"),
        });
        assert!(matches!(
            record.failure_since(before),
            Some(Error::ResolutionFailed { slot, source })
                if slot == SlotId::new(0x2000) && source.message() == "method not found"
        ));

        let after = record.failure_generation();
        assert!(record.failure_since(after).is_none());

        record.record_failure(&Error::HostBringUpFailed(HostError::new("hostfxr missing")));
        assert!(matches!(
            record.failure_since(after),
            Some(Error::HostBringUpFailed(_))
        ));
    }

    #[test]
    #[should_panic]
    fn target_as_narrow_type() {
        let target = Target::from_address(0x1234).unwrap();
        let _ = unsafe { target.as_fn::<u8>() };
    }

    #[test]
    fn null_target_is_unrepresentable() {
        assert!(Target::from_address(0).is_none());
    }

    #[test]
    fn call_through_target() {
        let target = Target::from_address(add_one as extern "C" fn(i32) -> i32 as usize).unwrap();
        let forward = unsafe { target.as_fn::<extern "C" fn(i32) -> i32>() };
        assert_eq!(forward(41), 42);
    }

    #[test]
    fn formatting() {
        assert_eq!(SlotId::new(0x2010).to_string(), "0x00002010");
        assert_eq!(format!("{:?}", SlotId::new(0x10)), "SlotId(0x00000010)");
        assert_eq!(
            format!("{:?}", Target::from_address(0xdead).unwrap()),
            "Target(0xdead)"
        );
    }
}
