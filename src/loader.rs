//! The module load orchestrator.
//!
//! [`Loader`] drives a strictly sequential pipeline from raw container bytes
//! to a committed [`Module`]:
//!
//! ```text
//! parse -> arch check -> construct kernels -> alloc sdata -> locate sdata
//!       -> alloc code -> locate code -> stage on host -> transfer -> commit
//! ```
//!
//! Each stage either succeeds or fails the whole load. Device allocations
//! are held in guards that release on drop, so an early return from any
//! stage unwinds exactly the resources acquired so far, in reverse order of
//! acquisition. A partially constructed module is never observable: the
//! [`Module`] value is only assembled at commit, after the guards have been
//! disarmed.

use crate::context::{DeviceAlloc, DeviceContext};
use crate::cubin::{CubinParser, ImageParser};
use crate::module::Module;
use crate::{
    Result, arch_error, host_oom_error, invalid_argument, kernel, layout, transfer_error,
    unimplemented_error,
};
use alloc::vec::Vec;

/// A JIT tuning option of the extended load surface. Accepted for API
/// compatibility only; option-driven loading is unsupported.
#[derive(Clone, Copy, Debug)]
pub struct LoadOption {
    /// Driver-defined option key.
    pub key: u32,
    /// Option value, reinterpreted per key.
    pub value: u64,
}

/// The cubin module loader.
///
/// A `Loader` is a reusable front end over the load pipeline; it holds the
/// container parser and no per-module state, so one loader may load any
/// number of modules. Loads are synchronous and blocking; the loader takes
/// no internal locks.
///
/// # Examples
/// ```no_run
/// use cubin_loader::{DeviceContext, Loader};
///
/// fn load(ctx: &impl DeviceContext) -> cubin_loader::Result<()> {
///     let bytes = std::fs::read("kernels.cubin").unwrap();
///     let mut loader = Loader::new();
///     let module = loader.load_module(ctx, &bytes)?;
///     let kernel = module.get_function("k")?;
///     assert_eq!(kernel.entry_addr(), module.code_addr());
///     module.unload(ctx)
/// }
/// ```
pub struct Loader<P = CubinParser>
where
    P: ImageParser,
{
    parser: P,
}

impl Loader<CubinParser> {
    /// Creates a loader using the built-in framed-container parser.
    pub fn new() -> Self {
        Self {
            parser: CubinParser,
        }
    }
}

impl Default for Loader<CubinParser> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ImageParser> Loader<P> {
    /// Creates a loader with a custom binary section extractor.
    pub fn with_parser(parser: P) -> Self {
        Self { parser }
    }

    /// Loads a module from an in-memory binary image against `ctx`.
    ///
    /// On success the returned [`Module`] is fully resident on the device
    /// and every kernel and global resolves to an address within its
    /// allocated segments. On failure no device allocation outlives the
    /// call.
    pub fn load_module<C: DeviceContext>(&mut self, ctx: &C, bytes: &[u8]) -> Result<Module> {
        if bytes.is_empty() {
            return Err(invalid_argument("empty binary image"));
        }

        // Parse. Nothing acquired yet beyond the extracted image itself.
        let image = self.parser.parse(bytes)?;
        #[cfg(feature = "log")]
        log::debug!(
            "parsed image: arch 0x{:x}, {} function(s), {} symbol(s)",
            image.arch,
            image.functions.len(),
            image.symbols.len()
        );

        // Arch check. Only the low byte of the device tag names the chipset
        // generation.
        let device_arch = ctx.arch_tag() & 0xff;
        if device_arch != image.arch {
            return Err(arch_error(device_arch, image.arch));
        }

        // Construct kernels. Plain owned data; dropped as one on failure.
        let built = kernel::construct(&image)?;
        let mut kernels = built.kernels;
        let mut symbols = built.symbols;
        #[cfg(feature = "log")]
        log::debug!(
            "constructed {} kernel(s), code segment {} bytes, sdata {} bytes",
            kernels.len(),
            built.code_size,
            built.sdata_size
        );

        // Allocate static data. Zero size is a valid no-op branch: the
        // allocator must not be invoked at all.
        let sdata = if built.sdata_size > 0 {
            Some(DeviceAlloc::new(ctx, u64::from(built.sdata_size))?)
        } else {
            None
        };

        // Locate static data.
        layout::locate_sdata(
            &mut symbols,
            sdata.as_ref().map(DeviceAlloc::addr),
            built.sdata_size,
        )?;

        // Allocate code, then locate it.
        let code = DeviceAlloc::new(ctx, u64::from(built.code_size))?;
        layout::locate_code(&mut kernels, code.addr(), built.code_size)?;

        // Stage on host: assemble the sparse fragments into one contiguous
        // zeroed image.
        let mut staging: Vec<u8> = Vec::new();
        staging
            .try_reserve_exact(built.code_size as usize)
            .map_err(|_| host_oom_error(u64::from(built.code_size)))?;
        staging.resize(built.code_size as usize, 0);
        layout::stage(&image, &kernels, &mut staging);

        // Transfer to device in one bulk copy.
        #[cfg(feature = "log")]
        log::debug!(
            "transferring code image: {} bytes to 0x{:x}",
            staging.len(),
            code.addr()
        );
        ctx.copy_to_device(code.addr(), &staging)
            .map_err(|e| transfer_error(alloc::format!("bulk code copy: {e}")))?;

        // Commit: disarm the guards and hand ownership to the module. The
        // staging buffer is no longer needed once the image is resident.
        drop(staging);
        let sdata = sdata.map(|guard| (guard.into_raw(), built.sdata_size));
        let module = Module::new(
            image.arch,
            code.into_raw(),
            built.code_size,
            sdata,
            kernels,
            symbols,
        );

        #[cfg(feature = "log")]
        log::info!("loaded module: {module:?}");
        Ok(module)
    }

    /// Loads a module from a file on disk.
    ///
    /// This is a convenience wrapper over [`load_module`]; an unreadable
    /// path is an [`InvalidArgument`] error.
    ///
    /// [`load_module`]: Loader::load_module
    /// [`InvalidArgument`]: crate::Error::InvalidArgument
    #[cfg(feature = "std")]
    pub fn load_module_file<C: DeviceContext>(&mut self, ctx: &C, path: &str) -> Result<Module> {
        let bytes = std::fs::read(path)
            .map_err(|e| invalid_argument(alloc::format!("cannot read '{path}': {e}")))?;
        self.load_module(ctx, &bytes)
    }

    /// Loading pre-linked multi-architecture fat binaries is not supported;
    /// always fails with [`Unimplemented`] rather than pretending to
    /// succeed.
    ///
    /// [`Unimplemented`]: crate::Error::Unimplemented
    pub fn load_fat_binary<C: DeviceContext>(
        &mut self,
        _ctx: &C,
        _fat_bin: &[u8],
    ) -> Result<Module> {
        Err(unimplemented_error("fat binary modules"))
    }

    /// Loading with JIT options is not supported; always fails with
    /// [`Unimplemented`] rather than pretending to succeed.
    ///
    /// [`Unimplemented`]: crate::Error::Unimplemented
    pub fn load_data_ex<C: DeviceContext>(
        &mut self,
        _ctx: &C,
        _image: &[u8],
        _options: &[LoadOption],
    ) -> Result<Module> {
        Err(unimplemented_error("loading with JIT options"))
    }
}
