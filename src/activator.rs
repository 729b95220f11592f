//! The activation facade.
//!
//! An [`Activator`] bundles a [`ThunkDispatcher`] with its configuration. Embedders usually
//! create one, attach the images of the mixed-mode modules they load, and install it as the
//! process-wide activator the exported introspection entry points consult.

use std::{path::Path, sync::OnceLock};

use tracing::info;

use crate::{
    activation::{ModuleActivationTable, ModuleIdentity, SlotId, Target},
    dispatch::{FixupThunk, ThunkDispatcher},
    host::{ExecutionHost, HostInitializer},
    image::{MixedModeImage, Token},
    ActivationConfig, Error, Result,
};

static PROCESS_ACTIVATOR: OnceLock<Activator> = OnceLock::new();

/// Activates fixup thunks of mixed-mode modules against one execution host.
///
/// # Examples
///
/// ```rust
/// use ijwhost::{Activator, activation::{ModuleIdentity, SlotId, Target}};
/// use ijwhost::host::{ExecutionHost, HostError, HostHandle, ResolveRequest};
///
/// extern "C" fn managed_add(a: i32, b: i32) -> i32 {
///     a + b
/// }
///
/// struct Host;
///
/// impl ExecutionHost for Host {
///     fn ensure_started(&self) -> Result<HostHandle, HostError> {
///         HostHandle::from_raw(1).ok_or_else(|| HostError::new("null handle"))
///     }
///
///     fn resolve(&self, _: HostHandle, _: &ResolveRequest) -> Result<Target, HostError> {
///         Target::from_address(managed_add as extern "C" fn(i32, i32) -> i32 as usize)
///             .ok_or_else(|| HostError::new("null entry point"))
///     }
/// }
///
/// let activator = Activator::new(Host);
/// let module = ModuleIdentity::from_base(0x1000_0000);
///
/// let sum = activator.dispatch(module, SlotId::new(0x2000), |target| {
///     let add = unsafe { target.as_fn::<extern "C" fn(i32, i32) -> i32>() };
///     add(40, 2)
/// })?;
/// assert_eq!(sum, 42);
/// assert!(activator.was_module_queried(module));
/// # Ok::<(), ijwhost::Error>(())
/// ```
pub struct Activator {
    dispatcher: ThunkDispatcher,
    config: ActivationConfig,
}

impl Activator {
    /// Creates an activator with the default configuration.
    pub fn new(host: impl ExecutionHost + 'static) -> Activator {
        Self::with_config(host, ActivationConfig::default())
    }

    /// Creates an activator with `config`.
    pub fn with_config(host: impl ExecutionHost + 'static, config: ActivationConfig) -> Activator {
        let initializer = HostInitializer::new(host, config.retry_failed_bring_up);
        Activator {
            dispatcher: ThunkDispatcher::new(initializer, &config),
            config,
        }
    }

    /// Installs this activator as the process-wide one.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyInstalled`] if an activator was installed before; `self` is
    /// dropped in that case.
    pub fn install(self) -> Result<&'static Activator> {
        let mut installed_now = false;
        let activator = PROCESS_ACTIVATOR.get_or_init(|| {
            installed_now = true;
            self
        });

        if installed_now {
            info!("process-wide activator installed");
            Ok(activator)
        } else {
            Err(Error::AlreadyInstalled)
        }
    }

    /// The process-wide activator, if one was installed.
    #[must_use]
    pub fn installed() -> Option<&'static Activator> {
        PROCESS_ACTIVATOR.get()
    }

    /// The configuration this activator was created with.
    #[must_use]
    pub fn config(&self) -> &ActivationConfig {
        &self.config
    }

    /// The underlying dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &ThunkDispatcher {
        &self.dispatcher
    }

    /// The module activation table.
    #[must_use]
    pub fn table(&self) -> &ModuleActivationTable {
        self.dispatcher.table()
    }

    /// The host initializer.
    #[must_use]
    pub fn host(&self) -> &HostInitializer {
        self.dispatcher.host()
    }

    /// Returns the thunk for `slot` of `module`. See [`ThunkDispatcher::thunk`].
    ///
    /// # Errors
    /// Returns [`Error::UnknownSlot`] for undeclared slots under strict slots.
    pub fn thunk(&self, module: ModuleIdentity, slot: SlotId) -> Result<FixupThunk> {
        self.dispatcher.thunk(module, slot)
    }

    /// Calls through `thunk`. See [`ThunkDispatcher::call`].
    ///
    /// # Errors
    /// Returns the activation error if the slot could not be activated.
    pub fn call<R, F>(&self, thunk: &FixupThunk, forward: F) -> Result<R>
    where
        F: FnOnce(Target) -> R,
    {
        self.dispatcher.call(thunk, forward)
    }

    /// Calls through the thunk for `slot` of `module`. See [`ThunkDispatcher::dispatch`].
    ///
    /// # Errors
    /// Returns the activation error if the slot could not be activated.
    pub fn dispatch<R, F>(&self, module: ModuleIdentity, slot: SlotId, forward: F) -> Result<R>
    where
        F: FnOnce(Target) -> R,
    {
        self.dispatcher.dispatch(module, slot, forward)
    }

    /// Declares the slots of a loaded image for `module`.
    ///
    /// Only fixup runs native code reaches through thunks are declared, unless the
    /// configuration asks for all of them. Returns the number of slots declared.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for IL-only images, which have no native callers.
    pub fn attach_image(&self, module: ModuleIdentity, image: &MixedModeImage) -> Result<usize> {
        if image.header().is_il_only() {
            return Err(Error::NotSupported);
        }

        let from_unmanaged_only = self.config.from_unmanaged_only;
        let slots = image
            .slots()
            .iter()
            .filter(|slot| !from_unmanaged_only || slot.is_from_unmanaged())
            .map(|slot| (slot.slot, Some(slot.token)));

        let declared = self.table().declare(module, slots);
        info!(
            %module,
            declared,
            fixups = image.fixups().len(),
            "attached mixed-mode image"
        );
        Ok(declared)
    }

    /// Loads the image at `path` and attaches it for `module`.
    ///
    /// # Errors
    /// Returns an error if the image cannot be read, see [`MixedModeImage::from_file`], or
    /// cannot be attached, see [`Activator::attach_image`].
    pub fn attach_image_file(&self, module: ModuleIdentity, path: &Path) -> Result<usize> {
        let image = MixedModeImage::from_file(path)?;
        self.attach_image(module, &image)
    }

    /// Returns `true` if any thunk of `module` has ever started activation.
    #[must_use]
    pub fn was_module_queried(&self, module: ModuleIdentity) -> bool {
        self.table().query_ever_activated(module)
    }

    /// The metadata token declared for `slot` of `module`.
    #[must_use]
    pub fn token_for(&self, module: ModuleIdentity, slot: SlotId) -> Option<Token> {
        self.table().get(module)?.token_for(slot)
    }
}
