//! The managed execution host seam.
//!
//! Activation never talks to a runtime directly. It goes through an [`ExecutionHost`], which
//! knows how to start the runtime once per process and how to turn a fixup slot into a callable
//! entry point. [`HostInitializer`] wraps the host and guarantees that bring-up runs at most
//! once at a time and is never repeated after it succeeded.
//!
//! # Examples
//!
//! ```rust
//! use ijwhost::activation::Target;
//! use ijwhost::host::{ExecutionHost, HostError, HostHandle, ResolveRequest};
//!
//! extern "C" fn managed_entry() -> i32 {
//!     100
//! }
//!
//! struct StaticHost;
//!
//! impl ExecutionHost for StaticHost {
//!     fn ensure_started(&self) -> Result<HostHandle, HostError> {
//!         HostHandle::from_raw(1).ok_or_else(|| HostError::new("null host handle"))
//!     }
//!
//!     fn resolve(&self, _host: HostHandle, _request: &ResolveRequest) -> Result<Target, HostError> {
//!         Target::from_address(managed_entry as extern "C" fn() -> i32 as usize)
//!             .ok_or_else(|| HostError::new("null entry point"))
//!     }
//! }
//! ```

mod initializer;

use std::{fmt, num::NonZeroUsize, sync::Arc};

use thiserror::Error;

use crate::{
    activation::{ModuleIdentity, SlotId, Target},
    image::Token,
};

pub use initializer::HostInitializer;

/// Handle of a running execution host.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle(NonZeroUsize);

impl HostHandle {
    /// Wraps a non-null host handle.
    #[must_use]
    pub const fn new(raw: NonZeroUsize) -> Self {
        HostHandle(raw)
    }

    /// Wraps a raw host handle, `None` for null.
    #[must_use]
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(HostHandle)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn raw(&self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostHandle({:#x})", self.0)
    }
}

/// Failure reported by an [`ExecutionHost`].
///
/// Carries the host's message and, where the host speaks in status codes (`HRESULT`), the
/// code. Cloneable so that one failed bring-up can be reported to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}{}", status_suffix(.code))]
pub struct HostError {
    message: String,
    code: Option<i32>,
}

fn status_suffix(code: &Option<i32>) -> String {
    // Status codes read as unsigned hex, the way HRESULTs are written
    code.map(|code| format!(" (0x{:08X})", code as u32))
        .unwrap_or_default()
}

impl HostError {
    /// Creates an error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        HostError {
            message: message.into(),
            code: None,
        }
    }

    /// Creates an error from a message and a host status code.
    #[must_use]
    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        HostError {
            message: message.into(),
            code: Some(code),
        }
    }

    /// The host's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The host's status code, if it reported one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

/// What the host needs to produce a target for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveRequest {
    /// The module the slot belongs to
    pub module: ModuleIdentity,
    /// The slot being activated
    pub slot: SlotId,
    /// The metadata token the module declared for the slot, if any
    pub token: Option<Token>,
}

/// A managed execution environment that fixup thunks forward into.
///
/// Implementations are shared across threads. Both operations may be slow and may themselves
/// call back into fixup thunks; [`HostInitializer`] and the dispatcher deal with the
/// re-entrancy, the host does not need to.
pub trait ExecutionHost: Send + Sync {
    /// Starts the host, or returns the handle of the already running one.
    ///
    /// Called at most once at a time. Never called again after it succeeded.
    ///
    /// # Errors
    /// Returns a [`HostError`] if the host could not be started.
    fn ensure_started(&self) -> Result<HostHandle, HostError>;

    /// Resolves a slot to a callable entry point.
    ///
    /// # Errors
    /// Returns a [`HostError`] if the slot cannot be resolved.
    fn resolve(&self, host: HostHandle, request: &ResolveRequest) -> Result<Target, HostError>;
}

impl<T: ExecutionHost + ?Sized> ExecutionHost for Arc<T> {
    fn ensure_started(&self) -> Result<HostHandle, HostError> {
        (**self).ensure_started()
    }

    fn resolve(&self, host: HostHandle, request: &ResolveRequest) -> Result<Target, HostError> {
        (**self).resolve(host, request)
    }
}

impl<T: ExecutionHost + ?Sized> ExecutionHost for Box<T> {
    fn ensure_started(&self) -> Result<HostHandle, HostError> {
        (**self).ensure_started()
    }

    fn resolve(&self, host: HostHandle, request: &ResolveRequest) -> Result<Target, HostError> {
        (**self).resolve(host, request)
    }
}
