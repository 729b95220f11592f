//! C entry points of the host shim.
//!
//! These are the symbols a loader or test harness resolves from the shim library by name.
//! Both consult the activator installed with [`crate::Activator::install`] and answer
//! "nothing known" when none is installed.

#![allow(non_snake_case)]

use std::ffi::c_void;

use crate::{
    activation::{ModuleIdentity, SlotId},
    Activator,
};

/// Returns `true` if any fixup thunk of the module at `module` has ever started activation.
///
/// `module` is the module's base address / handle. Unknown modules, a null handle and a
/// process without an installed activator all report `false`.
#[no_mangle]
pub extern "C" fn WasModuleVTableQueried(module: *const c_void) -> bool {
    if module.is_null() {
        return false;
    }

    Activator::installed()
        .is_some_and(|activator| activator.was_module_queried(ModuleIdentity::from_handle(module)))
}

/// Returns the metadata token declared for the vtable entry at `entry` of `module`.
///
/// The slot is identified by the entry's offset from the module base. Returns 0 when the
/// entry lies outside the module's 32-bit RVA range, the slot was never declared, or no
/// activator is installed. Neither pointer is dereferenced.
#[no_mangle]
pub extern "C" fn GetTokenForVTableEntry(
    module: *const c_void,
    entry: *const *const c_void,
) -> u32 {
    if module.is_null() || entry.is_null() {
        return 0;
    }

    let Some(rva) = (entry as usize)
        .checked_sub(module as usize)
        .and_then(|offset| u32::try_from(offset).ok())
    else {
        return 0;
    };

    Activator::installed()
        .and_then(|activator| {
            activator.token_for(ModuleIdentity::from_handle(module), SlotId::new(rva))
        })
        .map_or(0, |token| token.value())
}
