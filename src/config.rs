//! Activation configuration.
//!
//! [`ActivationConfig`] controls the policies an [`crate::Activator`] applies: what happens
//! after a failed host bring-up, whether undeclared slots are accepted, and which fixup runs of
//! an image are declared.
//!
//! # Example
//!
//! ```rust
//! use ijwhost::ActivationConfig;
//!
//! // Defaults: retry bring-up, accept any slot, declare only unmanaged-callable fixups
//! let config = ActivationConfig::default();
//! assert!(config.retry_failed_bring_up);
//!
//! // Or customize
//! let config = ActivationConfig::new()
//!     .without_bring_up_retry()
//!     .with_strict_slots();
//! assert!(config.strict_slots);
//! ```

/// Policies of an [`crate::Activator`].
///
/// # Default Configuration
///
/// - A failed host bring-up is retried by the next caller
/// - Slots the module never declared are created on first call
/// - Only `FROM_UNMANAGED` fixup runs of an attached image are declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationConfig {
    /// Start a fresh host bring-up for callers arriving after a failed one.
    ///
    /// When `false` the first failure is cached and replayed to every later caller for the
    /// rest of the process.
    pub retry_failed_bring_up: bool,

    /// Reject calls to slots a declared module does not list.
    ///
    /// Only affects modules whose slots were declared, e.g. through
    /// [`crate::Activator::attach_image`]. Modules never declared accept any slot.
    pub strict_slots: bool,

    /// Declare only fixup runs that native code reaches through thunks.
    ///
    /// When `false` every slot of the `VTableFixups` directory is declared.
    pub from_unmanaged_only: bool,
}

impl ActivationConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches the first bring-up failure instead of retrying.
    #[must_use]
    pub fn without_bring_up_retry(mut self) -> Self {
        self.retry_failed_bring_up = false;
        self
    }

    /// Rejects undeclared slots of declared modules with [`crate::Error::UnknownSlot`].
    #[must_use]
    pub fn with_strict_slots(mut self) -> Self {
        self.strict_slots = true;
        self
    }

    /// Declares every fixup run of an attached image, not only the unmanaged-callable ones.
    #[must_use]
    pub fn with_all_fixups(mut self) -> Self {
        self.from_unmanaged_only = false;
        self
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        ActivationConfig {
            retry_failed_bring_up: true,
            strict_slots: false,
            from_unmanaged_only: true,
        }
    }
}
