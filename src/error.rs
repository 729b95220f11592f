use thiserror::Error;

use crate::{
    activation::{ModuleIdentity, SlotId},
    host::HostError,
};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into two groups. Activation errors are produced on the call path of a
/// fixup thunk and are what a native caller observes when an entry point could not be
/// activated. Image errors are produced while reading the CLR header and `VTableFixups`
/// directory of a mixed-mode module.
///
/// # Error Categories
///
/// ## Activation Errors
/// - [`Error::HostBringUpFailed`] - The managed execution host could not be started
/// - [`Error::ResolutionFailed`] - The host is running but a slot could not be resolved
/// - [`Error::ReentrantActivation`] - A thread re-entered an activation it is still performing
/// - [`Error::ReentrantBringUp`] - A thread re-entered the host bring-up it is still performing
/// - [`Error::UnknownSlot`] - Strict mode rejected a slot the module never declared
/// - [`Error::AlreadyInstalled`] - A process-wide activator was installed twice
///
/// ## Image Errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond file boundaries
/// - [`Error::NotSupported`] - Unsupported file format or feature
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from goblin crate
///
/// A query on a module that was never seen is not an error: the introspection surface simply
/// answers `false`.
///
/// # Examples
///
/// ```rust,no_run
/// use ijwhost::{Error, activation::{ModuleIdentity, SlotId}};
/// # fn demo(activator: &ijwhost::Activator) {
/// let module = ModuleIdentity::from_base(0x1000_0000);
/// match activator.dispatch(module, SlotId::new(0x2000), |_target| 0) {
///     Ok(value) => println!("returned {value}"),
///     Err(Error::HostBringUpFailed(err)) => eprintln!("no runtime: {err}"),
///     Err(Error::ResolutionFailed { slot, source }) => eprintln!("{slot}: {source}"),
///     Err(e) => eprintln!("activation failed: {e}"),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Activation Errors
    /// The managed execution host could not be created.
    ///
    /// Raised for the caller that triggered the bring-up and for every caller that was waiting
    /// on the same attempt. Unless retries were disabled through
    /// [`crate::ActivationConfig::without_bring_up_retry`], a later call starts a fresh attempt.
    #[error("Failed to bring up the execution host - {0}")]
    HostBringUpFailed(#[source] HostError),

    /// The execution host is running but could not resolve this slot to a target.
    ///
    /// The affected fixup record stays unresolved, so the next call through the same thunk
    /// asks the host again.
    #[error("Failed to resolve fixup slot {slot} - {source}")]
    ResolutionFailed {
        /// The slot whose resolution failed
        slot: SlotId,
        /// The error reported by the execution host
        #[source]
        source: HostError,
    },

    /// A thread called back into an activation that it is itself still performing.
    ///
    /// This happens when the execution host, while starting or while resolving `slot`, invokes
    /// the very thunk that triggered it. Blocking would deadlock, so the inner call fails.
    #[error("Re-entrant activation of fixup slot {0}")]
    ReentrantActivation(SlotId),

    /// The execution host, while being started, called a fixup thunk on the same thread.
    ///
    /// No target can be produced before the host is up, so the inner call fails instead of
    /// waiting on itself.
    #[error("Execution host bring-up re-entered on the thread performing it")]
    ReentrantBringUp,

    /// The module declared its slots from its image and this slot is not one of them.
    ///
    /// Only raised when [`crate::ActivationConfig::with_strict_slots`] is in effect.
    #[error("Slot {slot} is not declared by module {module}")]
    UnknownSlot {
        /// The module that was called
        module: ModuleIdentity,
        /// The undeclared slot
        slot: SlotId,
    },

    /// A process-wide activator has already been installed.
    #[error("A process-wide activator is already installed")]
    AlreadyInstalled,

    // Image Errors
    /// The file is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Indicates that the input is not a mixed-mode PE image, or that it uses a fixup layout
    /// this library does not handle.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}

impl Error {
    /// Returns `true` for the errors that leave a fixup record retryable.
    ///
    /// Both host bring-up and slot resolution failures reset the record to unresolved; a
    /// re-entrant call never touched the record at all.
    #[must_use]
    pub fn is_activation_failure(&self) -> bool {
        matches!(
            self,
            Error::HostBringUpFailed(_)
                | Error::ResolutionFailed { .. }
                | Error::ReentrantActivation(_)
                | Error::ReentrantBringUp
        )
    }
}
