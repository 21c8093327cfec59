//! # cubin_loader
//!
//! **cubin_loader** turns a compiled GPU binary image (a cubin container) into
//! a fully resident, addressable module on the device, and hands out handles
//! to its entry points and global symbols for later dispatch.
//!
//! The crate owns the load/construct/resolve/unload lifecycle and nothing
//! else: device memory and transfers come from a caller-supplied
//! [`DeviceContext`] session, and the binary container is extracted through
//! the pluggable [`ImageParser`] seam (with [`CubinParser`] as the built-in
//! front end). Kernel launch, scheduling, and device bring-up are outside
//! this crate.
//!
//! ## Core guarantees
//!
//! * **Atomicity**: a load either commits a [`Module`] whose kernels and
//!   globals all resolve to addresses inside its allocated device segments,
//!   or it fails and releases every device allocation it made, in exact
//!   reverse order of acquisition. Partially constructed modules are never
//!   observable.
//! * **Immutability after commit**: a committed [`Module`] is never mutated,
//!   so concurrent name lookups need no synchronization.
//! * **No silent stubs**: driver surfaces this loader does not implement
//!   (fat binaries, JIT-option loading, texture references) fail with
//!   [`Error::Unimplemented`] instead of succeeding without effect.
//!
//! ## Quick start
//!
//! ```no_run
//! use cubin_loader::{DeviceContext, Loader};
//!
//! fn run(ctx: &impl DeviceContext) -> cubin_loader::Result<()> {
//!     let bytes = std::fs::read("kernels.cubin").unwrap();
//!     let mut loader = Loader::new();
//!     let module = loader.load_module(ctx, &bytes)?;
//!
//!     let kernel = module.get_function("add_vectors")?;
//!     let (dptr, size) = module.get_global("lookup_table")?;
//!     // ... hand kernel.entry_addr(), dptr and size to the launch layer ...
//!     # let _ = (kernel, dptr, size);
//!
//!     module.unload(ctx)
//! }
//! ```
#![no_std]
#![warn(
    missing_docs,
    clippy::unnecessary_wraps,
    clippy::unnecessary_lazy_evaluations,
    clippy::collapsible_if,
    clippy::cast_lossless,
    clippy::explicit_iter_loop,
    clippy::manual_assert,
    clippy::needless_question_mark,
    clippy::needless_return,
    clippy::redundant_clone,
    clippy::redundant_else,
    clippy::redundant_static_lifetimes
)]
extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

pub mod context;
pub mod cubin;
mod error;
mod kernel;
mod layout;
mod loader;
mod module;

pub(crate) use error::*;

pub use context::{DeviceContext, DevicePtr};
pub use cubin::{CubinImage, CubinParser, ImageParser};
pub use error::Error;
pub use kernel::{Kernel, ResourceUsage};
pub use loader::{LoadOption, Loader};
pub use module::{GlobalSymbol, Module, TexRef};

/// A type alias for `Result`s returned by `cubin_loader` functions.
///
/// This is a convenience alias that eliminates the need to repeatedly
/// specify the [`Error`] type in function signatures.
pub type Result<T> = core::result::Result<T, Error>;
