use std::{ffi::c_void, fmt};

/// Opaque identity of a loaded module, its base load address.
///
/// The value is only ever compared and hashed, never dereferenced. It stays valid for as long
/// as the module is loaded; this crate never unloads modules, so it never sees one reused.
///
/// # Examples
///
/// ```rust
/// use ijwhost::activation::ModuleIdentity;
///
/// let module = ModuleIdentity::from_base(0x1000_0000);
/// assert_eq!(module.base(), 0x1000_0000);
/// assert_eq!(module.to_string(), "0x10000000");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleIdentity(usize);

impl ModuleIdentity {
    /// Creates an identity from a module base address.
    #[must_use]
    pub const fn from_base(base: usize) -> Self {
        ModuleIdentity(base)
    }

    /// Creates an identity from a native module handle (`HMODULE` / `dlopen` handle).
    #[must_use]
    pub fn from_handle(handle: *const c_void) -> Self {
        ModuleIdentity(handle as usize)
    }

    /// The base address this identity was created from.
    #[must_use]
    pub const fn base(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleIdentity({:#x})", self.0)
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
