//! Device-memory layout resolution.
//!
//! The constructor stage leaves every kernel and global symbol with an
//! offset relative to the start of its segment. The two passes here rewrite
//! those offsets into absolute device addresses once the segments have been
//! allocated, and they run independently because the static-data segment is
//! allocated and located before the code segment exists:
//!
//! * [`locate_sdata`] resolves the globals against the static-data base.
//! * [`locate_code`] resolves the kernels (and their constant data) against
//!   the code base.
//!
//! An offset that falls outside its declared segment signals a corrupt or
//! incompatible binary; the pass fails with a [`NotFound`]-class error
//! naming the offending descriptor, and the orchestrator rolls the load
//! attempt back.
//!
//! [`stage`] assembles the final contiguous code image on the host: the
//! extractor yields sparse per-kernel fragments rather than one blob, so the
//! fragments are written into a zeroed staging buffer at their planned
//! offsets and transferred to the device in a single bulk copy.
//!
//! [`NotFound`]: crate::Error::NotFound

use crate::cubin::CubinImage;
use crate::kernel::Kernel;
use crate::module::GlobalSymbol;
use crate::{DevicePtr, Result, not_found_error};

/// Alignment of each kernel's code within the code segment.
pub(crate) const CODE_ALIGN: u32 = 0x100;
/// Alignment of constant data within the code segment.
pub(crate) const CONST_ALIGN: u32 = 0x10;

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
pub(crate) fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Static-data pass: rewrites every global's offset into an absolute device
/// address within the allocated static-data segment.
///
/// `base` is `None` exactly when the image has no static-data segment; any
/// global symbol is then unresolvable by definition.
pub(crate) fn locate_sdata(
    symbols: &mut [GlobalSymbol],
    base: Option<DevicePtr>,
    sdata_size: u32,
) -> Result<()> {
    let Some(base) = base else {
        return match symbols.first() {
            Some(sym) => Err(not_found_error(sym.name.as_str())),
            None => Ok(()),
        };
    };
    for sym in symbols {
        match sym.offset.checked_add(sym.size) {
            Some(end) if end <= sdata_size => {}
            _ => return Err(not_found_error(sym.name.as_str())),
        }
        sym.addr = base + DevicePtr::from(sym.offset);
    }
    Ok(())
}

/// Code pass: rewrites every kernel's code and constant offsets into
/// absolute device addresses within the allocated code segment.
pub(crate) fn locate_code(kernels: &mut [Kernel], base: DevicePtr, code_size: u32) -> Result<()> {
    for kernel in kernels {
        match kernel.code_offset.checked_add(kernel.code_size) {
            Some(end) if end <= code_size => {}
            _ => return Err(not_found_error(kernel.name.as_str())),
        }
        kernel.addr = base + DevicePtr::from(kernel.code_offset);
        if let Some(cmem) = &mut kernel.cmem {
            match cmem.offset.checked_add(cmem.size) {
                Some(end) if end <= code_size => {}
                _ => return Err(not_found_error(kernel.name.as_str())),
            }
            cmem.addr = base + DevicePtr::from(cmem.offset);
        }
    }
    Ok(())
}

/// Assembles the contiguous code image into the zeroed staging buffer.
///
/// Offsets were computed by the constructor from the same section sizes the
/// copies below use, so the writes cannot run past the buffer.
pub(crate) fn stage(image: &CubinImage, kernels: &[Kernel], staging: &mut [u8]) {
    for kernel in kernels {
        let code = &image.sections[kernel.section].bytes;
        let start = kernel.code_offset as usize;
        staging[start..start + code.len()].copy_from_slice(code);
        if let Some(cmem) = &kernel.cmem {
            let bytes = &image.sections[cmem.section].bytes;
            let start = cmem.offset as usize;
            staging[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use alloc::string::String;
    use alloc::vec::Vec;

    fn sym(name: &str, offset: u32, size: u32) -> GlobalSymbol {
        GlobalSymbol {
            name: String::from(name),
            offset,
            size,
            addr: 0,
        }
    }

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, CODE_ALIGN), 0);
        assert_eq!(align_up(1, CODE_ALIGN), CODE_ALIGN);
        assert_eq!(align_up(CODE_ALIGN, CODE_ALIGN), CODE_ALIGN);
        assert_eq!(align_up(17, CONST_ALIGN), 32);
    }

    #[test]
    fn sdata_pass_resolves_within_bounds() {
        let mut symbols = alloc::vec![sym("g", 16, 8)];
        locate_sdata(&mut symbols, Some(0x1000), 64).unwrap();
        assert_eq!(symbols[0].addr, 0x1010);
    }

    #[test]
    fn sdata_pass_rejects_out_of_bounds_symbol() {
        let mut symbols = alloc::vec![sym("g", 60, 8)];
        let err = locate_sdata(&mut symbols, Some(0x1000), 64).unwrap_err();
        assert!(matches!(err, Error::NotFound { name } if name == "g"));
    }

    #[test]
    fn sdata_pass_rejects_symbols_without_segment() {
        let mut symbols = alloc::vec![sym("g", 0, 0)];
        assert!(locate_sdata(&mut symbols, None, 0).is_err());
        assert!(locate_sdata(&mut Vec::new(), None, 0).is_ok());
    }
}
