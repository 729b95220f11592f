//! # ijwhost Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the ijwhost library. Import it to get the essentials for activating mixed-mode modules.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ijwhost operations
pub use crate::Error;

/// The result type used throughout ijwhost
pub use crate::Result;

/// Activation policies
pub use crate::ActivationConfig;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The activation facade
pub use crate::Activator;

/// Thunks and the dispatcher that drives them
pub use crate::dispatch::{FixupThunk, ThunkDispatcher};

// ================================================================================================
// Activation State
// ================================================================================================

/// Module identity, slot identity and resolved entry points
pub use crate::activation::{FixupState, ModuleIdentity, SlotId, Target};

// ================================================================================================
// Execution Host
// ================================================================================================

/// The host seam
pub use crate::host::{ExecutionHost, HostError, HostHandle, ResolveRequest};

// ================================================================================================
// Image Reading
// ================================================================================================

/// Mixed-mode image and its fixup directory
pub use crate::image::{DeclaredSlot, MixedModeImage, Token, VTableFixup, VTableFixupFlags};

/// Low-level file parsing utilities
pub use crate::{File, Parser};
