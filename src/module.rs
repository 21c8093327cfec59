//! The device-resident module, its resolver, and its unloader.

use crate::context::DeviceContext;
use crate::kernel::Kernel;
use crate::{DevicePtr, Result, not_found_error, unimplemented_error};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;
use hashbrown::HashMap;

/// One named global variable of a loaded module.
///
/// Owned by exactly one [`Module`] and immutable once the module is
/// committed.
#[derive(Clone, Debug)]
pub struct GlobalSymbol {
    pub(crate) name: String,
    /// Offset within the static-data segment.
    pub(crate) offset: u32,
    pub(crate) size: u32,
    /// Absolute device address, written by the static-data layout pass.
    pub(crate) addr: DevicePtr,
}

impl GlobalSymbol {
    /// Returns the symbol's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the symbol's absolute device address.
    #[inline]
    pub fn addr(&self) -> DevicePtr {
        self.addr
    }

    /// Returns the symbol's size in bytes.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Handle to a texture reference. Texture references are not supported by
/// this loader; the type is uninhabited so the lookup surface can be
/// expressed while no value of it can ever be produced.
#[derive(Debug)]
pub enum TexRef {}

/// A fully loaded, device-resident module.
///
/// A `Module` only ever exists in its committed form: every kernel and
/// global already resolves to an address inside the module's device
/// segments, and nothing mutates it afterwards. That makes concurrent
/// lookups from multiple threads safe without synchronization.
///
/// The module does not own its context. The caller must keep the session
/// alive for as long as the module's device addresses are in use, and must
/// eventually hand the module back to [`unload`](Module::unload) against
/// the same context it was loaded with.
pub struct Module {
    pub(crate) arch: u32,
    pub(crate) code_addr: DevicePtr,
    pub(crate) code_size: u32,
    /// `None` when the image had no static data; never a zero address
    /// standing in for "absent".
    pub(crate) sdata: Option<(DevicePtr, u32)>,
    pub(crate) kernels: Vec<Kernel>,
    pub(crate) symbols: Vec<GlobalSymbol>,
    kernel_index: HashMap<String, usize>,
    symbol_index: HashMap<String, usize>,
}

impl Debug for Module {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Module")
            .field("arch", &format_args!("0x{:x}", self.arch))
            .field(
                "code",
                &format_args!("0x{:x}+{}", self.code_addr, self.code_size),
            )
            .field(
                "sdata",
                &self
                    .sdata
                    .map(|(addr, size)| alloc::format!("0x{addr:x}+{size}")),
            )
            .field(
                "kernels",
                &self.kernels.iter().map(|k| k.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Module {
    pub(crate) fn new(
        arch: u32,
        code_addr: DevicePtr,
        code_size: u32,
        sdata: Option<(DevicePtr, u32)>,
        kernels: Vec<Kernel>,
        symbols: Vec<GlobalSymbol>,
    ) -> Self {
        // Name uniqueness was enforced at construction, so the indices are
        // total over the descriptor sets.
        let kernel_index = kernels
            .iter()
            .enumerate()
            .map(|(i, k)| (k.name.clone(), i))
            .collect();
        let symbol_index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self {
            arch,
            code_addr,
            code_size,
            sdata,
            kernels,
            symbols,
            kernel_index,
            symbol_index,
        }
    }

    /// Returns the architecture tag the module was compiled for.
    #[inline]
    pub fn arch_tag(&self) -> u32 {
        self.arch
    }

    /// Returns the base device address of the code segment.
    #[inline]
    pub fn code_addr(&self) -> DevicePtr {
        self.code_addr
    }

    /// Returns the size of the code segment in bytes.
    #[inline]
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// Returns the static-data segment as `(address, size)`, or `None` if
    /// the module has no static data.
    #[inline]
    pub fn sdata(&self) -> Option<(DevicePtr, u32)> {
        self.sdata
    }

    /// Returns the module's kernels in image order.
    #[inline]
    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Returns the module's global symbols in image order.
    #[inline]
    pub fn globals(&self) -> &[GlobalSymbol] {
        &self.symbols
    }

    /// Looks up a kernel by name.
    ///
    /// The match is exact and case-sensitive; a miss is [`NotFound`].
    ///
    /// [`NotFound`]: crate::Error::NotFound
    pub fn get_function(&self, name: &str) -> Result<&Kernel> {
        self.kernel_index
            .get(name)
            .map(|&i| &self.kernels[i])
            .ok_or_else(|| not_found_error(name))
    }

    /// Looks up a global variable by name, returning its device address and
    /// size in bytes.
    ///
    /// The match is exact and case-sensitive; a miss is [`NotFound`].
    ///
    /// [`NotFound`]: crate::Error::NotFound
    pub fn get_global(&self, name: &str) -> Result<(DevicePtr, u32)> {
        self.symbol_index
            .get(name)
            .map(|&i| {
                let sym = &self.symbols[i];
                (sym.addr, sym.size)
            })
            .ok_or_else(|| not_found_error(name))
    }

    /// Texture references are not supported; always fails with
    /// [`Unimplemented`] rather than pretending to succeed.
    ///
    /// [`Unimplemented`]: crate::Error::Unimplemented
    pub fn get_tex_ref(&self, _name: &str) -> Result<TexRef> {
        Err(unimplemented_error("texture references"))
    }

    /// Releases every resource the module owns.
    ///
    /// The device allocations are freed in reverse order of acquisition:
    /// the code segment first, then the static-data segment if one was
    /// made. A failed release does not stop the remaining releases; the
    /// first error encountered is returned once everything has been
    /// attempted. Consuming `self` makes a second unload of the same
    /// module unrepresentable.
    ///
    /// `ctx` must be the same session the module was loaded against.
    pub fn unload<C: DeviceContext>(self, ctx: &C) -> Result<()> {
        #[cfg(feature = "log")]
        log::debug!(
            "unloading module: code 0x{:x}, sdata {:?}",
            self.code_addr,
            self.sdata
        );

        let mut first_err = None;
        if let Err(e) = ctx.free(self.code_addr) {
            first_err.get_or_insert(e);
        }
        if let Some((addr, _)) = self.sdata {
            if let Err(e) = ctx.free(addr) {
                first_err.get_or_insert(e);
            }
        }
        // Kernel and symbol descriptors are released by dropping `self`.
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn tex_ref_lookup_is_unimplemented() {
        let module = Module::new(0xc0, 0x1000, 64, None, Vec::new(), Vec::new());
        assert!(matches!(
            module.get_tex_ref("tex"),
            Err(Error::Unimplemented { .. })
        ));
    }

    #[test]
    fn lookup_miss_is_not_found() {
        let module = Module::new(0xc0, 0x1000, 64, None, Vec::new(), Vec::new());
        assert!(matches!(
            module.get_function("missing"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            module.get_global("missing"),
            Err(Error::NotFound { .. })
        ));
    }
}
