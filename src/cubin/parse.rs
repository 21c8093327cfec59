//! Built-in parser for the framed cubin container.
//!
//! The framing is a flat little-endian layout:
//!
//! ```text
//! header (28 bytes):
//!   +0   magic       b"CUBN"
//!   +4   version     u16 (currently 1)
//!   +6   reserved    u16 (must be zero)
//!   +8   arch        u32
//!   +12  n_sections  u32
//!   +16  n_functions u32
//!   +20  n_symbols   u32
//!   +24  sdata_size  u32
//! section records:  flags u32 | size u32 | bytes[size]
//! function records: name | code_section u32 | const_section u32
//!                   | code_size u32 | regs u32 | smem u32 | lmem u32
//!                   | param_size u32 | n_params u16 | n_params x (off u32, size u32)
//! symbol records:   name | offset u32 | size u32
//! sdata blob:       bytes[sdata_size]
//! ```
//!
//! Names are a u16 length followed by that many UTF-8 bytes. A
//! `const_section` of `0xffff_ffff` means the function has no constant data.
//! Trailing bytes after the sdata blob are rejected.

use super::{
    CodeSection, CubinImage, FunctionInfo, ImageParser, ParamInfo, SectionFlags, SymbolInfo,
};
use crate::{Result, malformed_error};
use alloc::string::String;
use alloc::vec::Vec;

/// Magic bytes identifying the framed cubin container.
pub const CUBIN_MAGIC: [u8; 4] = *b"CUBN";
/// Container format version understood by this parser.
pub const CUBIN_VERSION: u16 = 1;
/// `const_section` sentinel for "no constant data".
pub const NO_SECTION: u32 = u32::MAX;

const HEADER_SIZE: usize = 28;

/// The built-in extractor for the framed cubin container format.
#[derive(Clone, Copy, Debug, Default)]
pub struct CubinParser;

impl ImageParser for CubinParser {
    fn parse(&mut self, bytes: &[u8]) -> Result<CubinImage> {
        let mut cur = Cursor::new(bytes);

        let magic = cur.take(4)?;
        if magic != CUBIN_MAGIC {
            return Err(malformed_error("bad container magic"));
        }
        let version = cur.read_u16()?;
        if version != CUBIN_VERSION {
            return Err(malformed_error(alloc::format!(
                "unsupported container version {version}"
            )));
        }
        let reserved = cur.read_u16()?;
        if reserved != 0 {
            return Err(malformed_error("non-zero reserved header field"));
        }
        let arch = cur.read_u32()?;
        let n_sections = cur.read_u32()?;
        let n_functions = cur.read_u32()?;
        let n_symbols = cur.read_u32()?;
        let sdata_size = cur.read_u32()?;

        let mut sections = Vec::new();
        for _ in 0..n_sections {
            let raw_flags = cur.read_u32()?;
            let flags = SectionFlags::from_bits(raw_flags)
                .ok_or_else(|| malformed_error("unknown section flags"))?;
            let size = cur.read_u32()?;
            let bytes = cur.take(size as usize)?.to_vec();
            sections.push(CodeSection { flags, bytes });
        }

        let mut functions = Vec::new();
        for _ in 0..n_functions {
            let name = cur.read_name()?;
            let code_section = cur.read_u32()? as usize;
            let const_section = match cur.read_u32()? {
                NO_SECTION => None,
                idx => Some(idx as usize),
            };
            let code_size = cur.read_u32()?;
            let regs = cur.read_u32()?;
            let smem_size = cur.read_u32()?;
            let lmem_size = cur.read_u32()?;
            let param_size = cur.read_u32()?;
            let n_params = cur.read_u16()?;
            let mut params = Vec::new();
            for _ in 0..n_params {
                let offset = cur.read_u32()?;
                let size = cur.read_u32()?;
                params.push(ParamInfo { offset, size });
            }
            functions.push(FunctionInfo {
                name,
                code_section,
                const_section,
                code_size,
                regs,
                smem_size,
                lmem_size,
                param_size,
                params,
            });
        }

        let mut symbols = Vec::new();
        for _ in 0..n_symbols {
            let name = cur.read_name()?;
            let offset = cur.read_u32()?;
            let size = cur.read_u32()?;
            symbols.push(SymbolInfo { name, offset, size });
        }

        let sdata = cur.take(sdata_size as usize)?.to_vec();

        if !cur.is_empty() {
            return Err(malformed_error("trailing bytes after sdata blob"));
        }

        Ok(CubinImage {
            arch,
            sections,
            functions,
            symbols,
            sdata,
        })
    }
}

/// Bounds-checked reader over the raw container bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| malformed_error("truncated container"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_name(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        if len == 0 {
            return Err(malformed_error("empty name"));
        }
        let bytes = self.take(len)?;
        let name =
            core::str::from_utf8(bytes).map_err(|_| malformed_error("name is not valid UTF-8"))?;
        Ok(String::from(name))
    }
}

// The header size above is the sum of the fixed fields; keep them in sync.
const _: () = assert!(HEADER_SIZE == 4 + 2 + 2 + 4 + 4 + 4 + 4 + 4);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn header(arch: u32, nsec: u32, nfun: u32, nsym: u32, sdata: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&CUBIN_MAGIC);
        out.extend_from_slice(&CUBIN_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&arch.to_le_bytes());
        out.extend_from_slice(&nsec.to_le_bytes());
        out.extend_from_slice(&nfun.to_le_bytes());
        out.extend_from_slice(&nsym.to_le_bytes());
        out.extend_from_slice(&sdata.to_le_bytes());
        out
    }

    #[test]
    fn empty_image_parses() {
        let bytes = header(0xc0, 0, 0, 0, 0);
        let image = CubinParser.parse(&bytes).unwrap();
        assert_eq!(image.arch, 0xc0);
        assert!(image.sections.is_empty());
        assert!(image.functions.is_empty());
        assert!(image.symbols.is_empty());
        assert!(image.sdata.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = header(0xc0, 0, 0, 0, 0);
        bytes[0] = b'X';
        assert!(matches!(
            CubinParser.parse(&bytes),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = header(0xc0, 0, 0, 0, 0);
        assert!(matches!(
            CubinParser.parse(&bytes[..HEADER_SIZE - 1]),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_truncated_section() {
        let mut bytes = header(0xc0, 1, 0, 0, 0);
        bytes.extend_from_slice(&SectionFlags::EXEC.bits().to_le_bytes());
        bytes.extend_from_slice(&64u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]); // claims 64 bytes, delivers 16
        assert!(matches!(
            CubinParser.parse(&bytes),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_unknown_section_flags() {
        let mut bytes = header(0xc0, 1, 0, 0, 0);
        bytes.extend_from_slice(&0x80u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            CubinParser.parse(&bytes),
            Err(Error::MalformedBinary { .. })
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = header(0xc0, 0, 0, 0, 0);
        bytes.push(0);
        assert!(matches!(
            CubinParser.parse(&bytes),
            Err(Error::MalformedBinary { .. })
        ));
    }
}
