//! Kernel descriptor construction.
//!
//! This is the first resource-producing stage of the load pipeline: it turns
//! the raw per-function metadata of an extracted [`CubinImage`] into owned
//! [`Kernel`] descriptors, assigns every piece of code and constant data a
//! placement relative to the start of the future code segment, and computes
//! the total segment sizes. All offsets stay segment-relative here; the
//! layout passes rewrite them into absolute device addresses once the
//! segments have been allocated.

use crate::cubin::{CubinImage, ParamInfo, SectionFlags};
use crate::layout::{CODE_ALIGN, CONST_ALIGN, align_up};
use crate::module::GlobalSymbol;
use crate::{DevicePtr, Result, malformed_error};
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashSet;

/// Per-thread resource requirements of a kernel, preserved for the launch
/// layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Number of registers used per thread.
    pub regs: u32,
    /// Shared-memory usage in bytes.
    pub smem_size: u32,
    /// Local-memory usage in bytes per thread.
    pub lmem_size: u32,
}

/// Placement of a kernel's constant data within the code segment.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ConstSegment {
    pub(crate) section: usize,
    pub(crate) offset: u32,
    pub(crate) size: u32,
    /// Absolute device address, written by the code layout pass.
    pub(crate) addr: DevicePtr,
}

/// One callable entry point of a loaded module.
///
/// A `Kernel` is owned by exactly one [`Module`](crate::Module) and is
/// immutable once the module is committed.
#[derive(Clone, Debug)]
pub struct Kernel {
    pub(crate) name: String,
    /// Index of the image section holding this kernel's code.
    pub(crate) section: usize,
    /// Offset of the code within the code segment.
    pub(crate) code_offset: u32,
    pub(crate) code_size: u32,
    pub(crate) cmem: Option<ConstSegment>,
    pub(crate) resources: ResourceUsage,
    pub(crate) param_size: u32,
    pub(crate) params: Vec<ParamInfo>,
    /// Absolute device address of the entry point, written by the code
    /// layout pass.
    pub(crate) addr: DevicePtr,
}

impl Kernel {
    /// Returns the kernel's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the absolute device address of the kernel's entry point.
    #[inline]
    pub fn entry_addr(&self) -> DevicePtr {
        self.addr
    }

    /// Returns the size of the kernel's code in bytes.
    #[inline]
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// Returns the absolute device address of the kernel's constant data,
    /// if it has any.
    #[inline]
    pub fn const_addr(&self) -> Option<DevicePtr> {
        self.cmem.map(|c| c.addr)
    }

    /// Returns the kernel's per-thread resource requirements.
    #[inline]
    pub fn resources(&self) -> ResourceUsage {
        self.resources
    }

    /// Returns the total size of the kernel's parameter block in bytes.
    #[inline]
    pub fn param_size(&self) -> u32 {
        self.param_size
    }

    /// Returns the layout of the individual parameters within the block.
    #[inline]
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }
}

/// Everything the constructor stage produces: the descriptor sets plus the
/// planned segment sizes. Dropping this releases the whole partially-built
/// set at once, which is what the orchestrator's rollback relies on.
pub(crate) struct Construction {
    pub(crate) kernels: Vec<Kernel>,
    pub(crate) symbols: Vec<GlobalSymbol>,
    pub(crate) code_size: u32,
    pub(crate) sdata_size: u32,
}

/// Builds kernel and global-symbol descriptors from an extracted image.
///
/// Rejects metadata that is inconsistent with the section table: bad section
/// indices, sections whose flags do not match their role, declared code
/// sizes that disagree with the actual section contents, parameter entries
/// that fall outside the declared parameter block, and duplicate names.
pub(crate) fn construct(image: &CubinImage) -> Result<Construction> {
    if image.functions.is_empty() {
        return Err(malformed_error("image defines no kernels"));
    }

    let mut kernels = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor: u32 = 0;

    for func in &image.functions {
        if !seen.insert(func.name.as_str()) {
            return Err(malformed_error(alloc::format!(
                "duplicate kernel name '{}'",
                func.name
            )));
        }

        let code = image.sections.get(func.code_section).ok_or_else(|| {
            malformed_error(alloc::format!(
                "kernel '{}' references missing code section {}",
                func.name, func.code_section
            ))
        })?;
        if !code.flags.contains(SectionFlags::EXEC) {
            return Err(malformed_error(alloc::format!(
                "kernel '{}' code section is not executable",
                func.name
            )));
        }
        if func.code_size == 0 {
            return Err(malformed_error(alloc::format!(
                "kernel '{}' has no code",
                func.name
            )));
        }
        if func.code_size as usize != code.bytes.len() {
            return Err(malformed_error(alloc::format!(
                "kernel '{}' declares {} code bytes but its section holds {}",
                func.name,
                func.code_size,
                code.bytes.len()
            )));
        }

        for param in &func.params {
            match param.offset.checked_add(param.size) {
                Some(end) if end <= func.param_size => {}
                _ => {
                    return Err(malformed_error(alloc::format!(
                        "kernel '{}' parameter exceeds its {}-byte parameter block",
                        func.name, func.param_size
                    )));
                }
            }
        }

        let code_offset = align_up(cursor, CODE_ALIGN);
        cursor = code_offset
            .checked_add(func.code_size)
            .ok_or_else(|| malformed_error("code segment size overflow"))?;

        kernels.push(Kernel {
            name: func.name.clone(),
            section: func.code_section,
            code_offset,
            code_size: func.code_size,
            cmem: None,
            resources: ResourceUsage {
                regs: func.regs,
                smem_size: func.smem_size,
                lmem_size: func.lmem_size,
            },
            param_size: func.param_size,
            params: func.params.clone(),
            addr: 0,
        });
    }

    // Constant data goes behind all kernel code, in function order.
    for (kernel, func) in kernels.iter_mut().zip(&image.functions) {
        let Some(idx) = func.const_section else {
            continue;
        };
        let section = image.sections.get(idx).ok_or_else(|| {
            malformed_error(alloc::format!(
                "kernel '{}' references missing constant section {idx}",
                func.name
            ))
        })?;
        if !section.flags.contains(SectionFlags::CONST) {
            return Err(malformed_error(alloc::format!(
                "kernel '{}' constant section lacks the CONST flag",
                func.name
            )));
        }
        let size = u32::try_from(section.bytes.len())
            .map_err(|_| malformed_error("constant section too large"))?;
        let offset = align_up(cursor, CONST_ALIGN);
        cursor = offset
            .checked_add(size)
            .ok_or_else(|| malformed_error("code segment size overflow"))?;
        kernel.cmem = Some(ConstSegment {
            section: idx,
            offset,
            size,
            addr: 0,
        });
    }

    let mut symbols = Vec::new();
    let mut seen_syms = HashSet::new();
    for sym in &image.symbols {
        if !seen_syms.insert(sym.name.as_str()) {
            return Err(malformed_error(alloc::format!(
                "duplicate global symbol '{}'",
                sym.name
            )));
        }
        symbols.push(GlobalSymbol {
            name: sym.name.clone(),
            offset: sym.offset,
            size: sym.size,
            addr: 0,
        });
    }

    let sdata_size = u32::try_from(image.sdata.len())
        .map_err(|_| malformed_error("static-data blob too large"))?;

    Ok(Construction {
        kernels,
        symbols,
        code_size: cursor,
        sdata_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::cubin::{CodeSection, CubinImage, FunctionInfo};

    fn image_with(functions: Vec<FunctionInfo>, sections: Vec<CodeSection>) -> CubinImage {
        CubinImage {
            arch: 0xc0,
            sections,
            functions,
            symbols: Vec::new(),
            sdata: Vec::new(),
        }
    }

    fn func(name: &str, code_section: usize, code_size: u32) -> FunctionInfo {
        FunctionInfo {
            name: String::from(name),
            code_section,
            const_section: None,
            code_size,
            regs: 8,
            smem_size: 0,
            lmem_size: 0,
            param_size: 0,
            params: Vec::new(),
        }
    }

    fn exec_section(len: usize) -> CodeSection {
        CodeSection {
            flags: SectionFlags::EXEC,
            bytes: alloc::vec![0x90; len],
        }
    }

    #[test]
    fn assigns_aligned_relative_offsets() {
        let image = image_with(
            alloc::vec![func("a", 0, 8), func("b", 1, 8)],
            alloc::vec![exec_section(8), exec_section(8)],
        );
        let built = construct(&image).unwrap();
        assert_eq!(built.kernels[0].code_offset, 0);
        assert_eq!(built.kernels[1].code_offset, CODE_ALIGN);
        assert_eq!(built.code_size, CODE_ALIGN + 8);
    }

    #[test]
    fn places_constants_behind_all_code() {
        let mut f = func("a", 0, 8);
        f.const_section = Some(1);
        let image = image_with(
            alloc::vec![f],
            alloc::vec![
                exec_section(8),
                CodeSection {
                    flags: SectionFlags::CONST,
                    bytes: alloc::vec![0xaa; 4],
                },
            ],
        );
        let built = construct(&image).unwrap();
        let cmem = built.kernels[0].cmem.unwrap();
        assert_eq!(cmem.offset, align_up(8, CONST_ALIGN));
        assert_eq!(built.code_size, cmem.offset + 4);
    }

    #[test]
    fn rejects_declared_size_mismatch() {
        let image = image_with(alloc::vec![func("a", 0, 64)], alloc::vec![exec_section(8)]);
        assert!(matches!(
            construct(&image),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_kernel_names() {
        let image = image_with(
            alloc::vec![func("a", 0, 8), func("a", 1, 8)],
            alloc::vec![exec_section(8), exec_section(8)],
        );
        assert!(matches!(
            construct(&image),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_missing_section() {
        let image = image_with(alloc::vec![func("a", 3, 8)], alloc::vec![exec_section(8)]);
        assert!(matches!(
            construct(&image),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_param_outside_block() {
        let mut f = func("a", 0, 8);
        f.param_size = 8;
        f.params.push(ParamInfo { offset: 4, size: 8 });
        let image = image_with(alloc::vec![f], alloc::vec![exec_section(8)]);
        assert!(matches!(
            construct(&image),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_empty_function_table() {
        let image = image_with(Vec::new(), Vec::new());
        assert!(matches!(
            construct(&image),
            Err(Error::MalformedBinary { .. })
        ));
    }
}
