// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'activation/record.rs' reinterprets a target address as a function pointer
// - 'file/backend.rs' uses mmap to map a file into memory

//! # ijwhost
//!
//! Lazy activation of mixed-mode (IJW) modules.
//!
//! A mixed-mode module exports native entry points whose implementation lives in a managed
//! execution host. Nothing is started when such a module loads. Instead every export goes
//! through a fixup thunk, and the first call through any thunk brings the host up, asks it for
//! the entry point behind the thunk's slot, and publishes that entry point so every later call
//! forwards straight to it.
//!
//! ## Features
//!
//! - **Lazy host bring-up** - The host starts on the first call, at most once per process
//! - **Per-slot resolution** - Each thunk is resolved once and then called without locking
//! - **Thread safe** - Any number of threads may call through any number of thunks at once
//! - **Re-entrancy aware** - A host calling back into a thunk it is resolving gets an error, not
//!   a deadlock
//! - **Image reading** - Declares a module's slots from the `VTableFixups` directory of its CLR
//!   header
//! - **Introspection** - `WasModuleVTableQueried` and `GetTokenForVTableEntry` C exports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ijwhost::prelude::*;
//! use std::path::Path;
//!
//! # fn host() -> std::sync::Arc<dyn ExecutionHost> { unimplemented!() }
//! let activator = Activator::new(host()).install()?;
//!
//! let module = ModuleIdentity::from_base(0x1000_0000);
//! activator.attach_image_file(module, Path::new("IjwNativeDll.dll"))?;
//!
//! let value = activator.dispatch(module, SlotId::new(0x2000), |target| {
//!     let entry = unsafe { target.as_fn::<extern "C" fn() -> i32>() };
//!     entry()
//! })?;
//! println!("managed code returned {value}");
//! # Ok::<(), ijwhost::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`activation`] - Module table, fixup records and their states
//! - [`host`] - The [`host::ExecutionHost`] seam and the once-only [`host::HostInitializer`]
//! - [`dispatch`] - Fixup thunks and the activation protocol
//! - [`image`] - CLR header and `VTableFixups` reading
//! - [`exports`] - C entry points for loaders and test harnesses
//! - [`Activator`] - Facade tying the above together, optionally installed process-wide
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! All activation events are emitted through [`tracing`]: host bring-up attempts at `info`,
//! failures and re-entrancy at `warn`, per-slot resolution at `debug` / `trace`. Install any
//! `tracing` subscriber to see them.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use ijwhost::prelude::*;
///
/// let config = ActivationConfig::new().with_strict_slots();
/// let module = ModuleIdentity::from_base(0x1000_0000);
/// # let _ = (config, module);
/// ```
pub mod prelude;

pub mod activation;
pub mod dispatch;
pub mod exports;
pub mod host;
pub mod image;

mod activator;
mod config;

/// `ijwhost` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ijwhost` Error type
///
/// See [`Error`] for the activation and image error variants.
pub use error::Error;

/// Activation facade, see [`Activator`].
pub use activator::Activator;

/// Activation policies, see [`ActivationConfig`].
pub use config::ActivationConfig;

/// Low-level PE access and the cursor the image readers are built on.
///
/// # Example
///
/// ```rust,no_run
/// use ijwhost::File;
/// let file = File::from_file(std::path::Path::new("IjwNativeDll.dll"))?;
/// println!("CLR header at RVA {:#x}", file.clr().0);
/// # Ok::<(), ijwhost::Error>(())
/// ```
pub use file::{parser::Parser, File};
