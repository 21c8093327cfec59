//! Cubin container model and section extraction.
//!
//! A cubin is the compiled binary container produced by a device compiler:
//! it carries per-kernel code sections, constant data, a static-data blob
//! for global variables, and per-function resource metadata. This module
//! defines the extracted, in-memory form of such a container
//! ([`CubinImage`]) together with the extraction seam ([`ImageParser`]):
//! the loader only ever consumes a `CubinImage`, so a custom front end for
//! another container framing can be plugged in without touching the load
//! pipeline. [`CubinParser`] is the built-in front end for the framed
//! container format described in [`parse`](self::parse).

use crate::Result;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;

pub use parse::{CUBIN_MAGIC, CUBIN_VERSION, CubinParser, NO_SECTION};

mod parse;

bitflags! {
    /// Attribute flags of one code-segment section.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// The section holds executable kernel code.
        const EXEC = 1;
        /// The section holds constant data referenced by a kernel.
        const CONST = 2;
    }
}

/// One raw section destined for the device code segment.
#[derive(Clone, Debug)]
pub struct CodeSection {
    /// Attribute flags describing the section's role.
    pub flags: SectionFlags,
    /// The raw section contents.
    pub bytes: Vec<u8>,
}

/// Location of one kernel parameter within the parameter block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamInfo {
    /// Byte offset of the parameter within the parameter block.
    pub offset: u32,
    /// Size of the parameter in bytes.
    pub size: u32,
}

/// Raw per-function metadata extracted from the container.
///
/// Offsets and indices here are container-relative; the kernel constructor
/// validates them against the section table and turns each record into a
/// [`Kernel`](crate::Kernel) descriptor.
#[derive(Clone, Debug)]
pub struct FunctionInfo {
    /// Name of the kernel entry point.
    pub name: String,
    /// Index of the section holding this function's code.
    pub code_section: usize,
    /// Index of the section holding this function's constant data, if any.
    pub const_section: Option<usize>,
    /// Code size in bytes as declared by the metadata record. Must agree
    /// with the referenced code section's actual size.
    pub code_size: u32,
    /// Number of registers the kernel uses per thread.
    pub regs: u32,
    /// Shared-memory usage in bytes.
    pub smem_size: u32,
    /// Local-memory usage in bytes per thread.
    pub lmem_size: u32,
    /// Total size of the kernel's parameter block in bytes.
    pub param_size: u32,
    /// Layout of the individual parameters within the block.
    pub params: Vec<ParamInfo>,
}

/// One entry of the container's global symbol table.
#[derive(Clone, Debug)]
pub struct SymbolInfo {
    /// Name of the global variable.
    pub name: String,
    /// Byte offset of the variable within the static-data blob.
    pub offset: u32,
    /// Size of the variable in bytes.
    pub size: u32,
}

/// A fully extracted cubin container.
#[derive(Clone, Debug)]
pub struct CubinImage {
    /// Architecture tag the binary was compiled for.
    pub arch: u32,
    /// Sections destined for the device code segment.
    pub sections: Vec<CodeSection>,
    /// Per-function metadata records.
    pub functions: Vec<FunctionInfo>,
    /// Global symbol table over the static-data blob.
    pub symbols: Vec<SymbolInfo>,
    /// Initial contents of the static-data segment. May be empty, in which
    /// case the module gets no static-data allocation at all.
    pub sdata: Vec<u8>,
}

/// Binary section extractor: turns raw container bytes into a [`CubinImage`].
///
/// Failure is reported as [`Error::MalformedBinary`]; the parser acquires no
/// resources beyond the returned image, so the loader can abandon a parse
/// result by simply dropping it.
///
/// [`Error::MalformedBinary`]: crate::Error::MalformedBinary
pub trait ImageParser {
    /// Parses `bytes` into an extracted image.
    fn parse(&mut self, bytes: &[u8]) -> Result<CubinImage>;
}
