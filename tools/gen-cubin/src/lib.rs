//! Writer for the framed cubin container format.
//!
//! This crate is the test-side counterpart of the loader's built-in parser:
//! it assembles syntactically valid (or deliberately skewed) container
//! images so the test suite does not depend on a device compiler. The
//! binary layout is documented in the loader crate; the two must be kept in
//! sync.

/// Section flag bit: executable kernel code.
pub const SEC_EXEC: u32 = 1;
/// Section flag bit: constant data.
pub const SEC_CONST: u32 = 2;
/// `const_section` sentinel for "no constant data".
pub const NO_SECTION: u32 = u32::MAX;

const MAGIC: [u8; 4] = *b"CUBN";
const VERSION: u16 = 1;

/// Description of one kernel to place in the image.
#[derive(Clone, Debug)]
pub struct FunctionDesc {
    /// Kernel name.
    pub name: String,
    /// Raw code bytes; emitted as an EXEC section owned by this function.
    pub code: Vec<u8>,
    /// Optional constant data; emitted as a CONST section.
    pub cmem: Option<Vec<u8>>,
    /// Declared code size. `None` mirrors the actual code length; a `Some`
    /// value lets tests declare an inconsistent size on purpose.
    pub declared_code_size: Option<u32>,
    /// Registers per thread.
    pub regs: u32,
    /// Shared-memory bytes.
    pub smem_size: u32,
    /// Local-memory bytes per thread.
    pub lmem_size: u32,
    /// Total parameter block size.
    pub param_size: u32,
    /// Parameter placements as `(offset, size)` pairs.
    pub params: Vec<(u32, u32)>,
}

impl FunctionDesc {
    /// A minimal kernel description with the given name and code.
    pub fn new(name: &str, code: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_vec(),
            cmem: None,
            declared_code_size: None,
            regs: 8,
            smem_size: 0,
            lmem_size: 0,
            param_size: 0,
            params: Vec::new(),
        }
    }
}

/// Description of one global symbol over the static-data blob.
#[derive(Clone, Debug)]
pub struct SymbolDesc {
    /// Symbol name.
    pub name: String,
    /// Offset within the static-data blob.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
}

/// Builder for a framed cubin image.
#[derive(Clone, Debug)]
pub struct CubinWriter {
    arch: u32,
    functions: Vec<FunctionDesc>,
    symbols: Vec<SymbolDesc>,
    sdata: Vec<u8>,
}

impl CubinWriter {
    /// Starts an image targeting the given architecture tag.
    pub fn new(arch: u32) -> Self {
        Self {
            arch,
            functions: Vec::new(),
            symbols: Vec::new(),
            sdata: Vec::new(),
        }
    }

    /// Adds a minimal kernel with the given name and code bytes.
    pub fn function(mut self, name: &str, code: &[u8]) -> Self {
        self.functions.push(FunctionDesc::new(name, code));
        self
    }

    /// Adds a fully described kernel.
    pub fn function_desc(mut self, desc: FunctionDesc) -> Self {
        self.functions.push(desc);
        self
    }

    /// Adds a global symbol over the static-data blob.
    pub fn symbol(mut self, name: &str, offset: u32, size: u32) -> Self {
        self.symbols.push(SymbolDesc {
            name: name.to_string(),
            offset,
            size,
        });
        self
    }

    /// Sets the static-data blob contents.
    pub fn sdata(mut self, bytes: &[u8]) -> Self {
        self.sdata = bytes.to_vec();
        self
    }

    /// Serializes the image.
    pub fn build(self) -> Vec<u8> {
        // Each function owns one EXEC section, plus one CONST section if it
        // carries constant data. Section indices are assigned in that order.
        let mut sections: Vec<(u32, &[u8])> = Vec::new();
        let mut func_sections: Vec<(u32, u32)> = Vec::new();
        for func in &self.functions {
            let code_idx = sections.len() as u32;
            sections.push((SEC_EXEC, &func.code));
            let const_idx = match &func.cmem {
                Some(bytes) => {
                    sections.push((SEC_CONST, bytes));
                    code_idx + 1
                }
                None => NO_SECTION,
            };
            func_sections.push((code_idx, const_idx));
        }

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.arch.to_le_bytes());
        out.extend_from_slice(&(sections.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.functions.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.symbols.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.sdata.len() as u32).to_le_bytes());

        for (flags, bytes) in &sections {
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }

        for (func, (code_idx, const_idx)) in self.functions.iter().zip(&func_sections) {
            write_name(&mut out, &func.name);
            out.extend_from_slice(&code_idx.to_le_bytes());
            out.extend_from_slice(&const_idx.to_le_bytes());
            let code_size = func
                .declared_code_size
                .unwrap_or(func.code.len() as u32);
            out.extend_from_slice(&code_size.to_le_bytes());
            out.extend_from_slice(&func.regs.to_le_bytes());
            out.extend_from_slice(&func.smem_size.to_le_bytes());
            out.extend_from_slice(&func.lmem_size.to_le_bytes());
            out.extend_from_slice(&func.param_size.to_le_bytes());
            out.extend_from_slice(&(func.params.len() as u16).to_le_bytes());
            for (offset, size) in &func.params {
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&size.to_le_bytes());
            }
        }

        for sym in &self.symbols {
            write_name(&mut out, &sym.name);
            out.extend_from_slice(&sym.offset.to_le_bytes());
            out.extend_from_slice(&sym.size.to_le_bytes());
        }

        out.extend_from_slice(&self.sdata);
        out
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
}
