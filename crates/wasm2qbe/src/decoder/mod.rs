//! Binary decoder: bytes → [`Module`].
//!
//! Checks only structural well-formedness (magic, version, section order and
//! sizes, LEB128 encodings, UTF-8 names) and [`ParserLimits`]. Every count is
//! compared against its limit before anything is allocated for it, and
//! vectors reserve at most one slot per remaining input byte, so a lying count
//! cannot exhaust memory. Cross-references are left to the validator.

pub mod limits;
pub mod module;
pub mod operators;
pub mod reader;
pub mod simd;
pub mod types;

pub use limits::ParserLimits;
pub use module::*;
pub use operators::{LoadOp, MemArg, NumericOp, Operator, OperatorsReader, SimdImm, StoreOp};
pub use types::*;

use crate::error::ParseError;
use reader::{BinaryReader, Result};

const WASM_MAGIC: &[u8; 4] = b"\0asm";
const WASM_VERSION: u32 = 1;

/// Section ids in canonical order. Custom sections (id 0) may appear
/// anywhere and are not ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SectionId {
    Type,
    Import,
    Function,
    Table,
    Memory,
    Tag,
    Global,
    Export,
    Start,
    Element,
    DataCount,
    Code,
    Data,
}

impl SectionId {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            13 => SectionId::Tag,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            12 => SectionId::DataCount,
            10 => SectionId::Code,
            11 => SectionId::Data,
            _ => return None,
        })
    }
}

/// Decode a binary module.
pub fn decode(bytes: &[u8], limits: &ParserLimits) -> std::result::Result<Module, ParseError> {
    let mut r = BinaryReader::new(bytes);
    let magic = r
        .read_bytes(4)
        .map_err(|_| ParseError::new(0, "unexpected end, magic header expected"))?;
    if magic != WASM_MAGIC {
        return Err(ParseError::new(0, "magic header not detected"));
    }
    let version = r
        .read_u32_le()
        .map_err(|_| ParseError::new(4, "unexpected end, version expected"))?;
    if version != WASM_VERSION {
        return Err(ParseError::new(4, format!("unknown binary version {}", version)));
    }

    let mut decoder = Decoder {
        limits,
        module: Module::default(),
    };
    let mut last: Option<SectionId> = None;
    let mut function_count: Option<(u32, usize)> = None;

    while !r.is_eof() {
        let section_offset = r.offset();
        let id = r.read_u8()?;
        let size = r.read_var_u32()? as usize;
        let mut section = r.sub_reader(size)?;

        if id == 0 {
            decoder.custom_section(&mut section)?;
            continue;
        }

        let sid = SectionId::from_byte(id).ok_or_else(|| {
            ParseError::new(section_offset, format!("malformed section id {}", id))
        })?;
        if last.is_some_and(|prev| sid <= prev) {
            return Err(ParseError::new(
                section_offset,
                format!("unexpected section {:?} (duplicate or out of order)", sid),
            ));
        }
        last = Some(sid);
        log::trace!("section {:?} at {:#x}, {} bytes", sid, section_offset, size);

        match sid {
            SectionId::Type => decoder.type_section(&mut section)?,
            SectionId::Import => decoder.import_section(&mut section)?,
            SectionId::Function => {
                let offset = section.offset();
                decoder.function_section(&mut section)?;
                function_count = Some((decoder.module.functions.len() as u32, offset));
            }
            SectionId::Table => decoder.table_section(&mut section)?,
            SectionId::Memory => decoder.memory_section(&mut section)?,
            SectionId::Tag => decoder.tag_section(&mut section)?,
            SectionId::Global => decoder.global_section(&mut section)?,
            SectionId::Export => decoder.export_section(&mut section)?,
            SectionId::Start => {
                let offset = section.offset();
                decoder.module.start = Some((section.read_var_u32()?, offset));
            }
            SectionId::Element => decoder.element_section(&mut section)?,
            SectionId::DataCount => decoder.module.data_count = Some(section.read_var_u32()?),
            SectionId::Code => decoder.code_section(&mut section)?,
            SectionId::Data => decoder.data_section(&mut section)?,
        }

        if !section.is_eof() {
            return Err(section.error("section size mismatch"));
        }
    }

    let module = decoder.module;
    let declared = function_count.map_or(0, |(n, _)| n);
    if declared as usize != module.code.len() {
        let offset = function_count.map_or(bytes.len(), |(_, o)| o);
        return Err(ParseError::new(
            offset,
            "function and code section have inconsistent lengths",
        ));
    }
    if let Some(count) = module.data_count {
        if count as usize != module.data.len() {
            return Err(ParseError::new(
                bytes.len(),
                "data count and data section have inconsistent lengths",
            ));
        }
    }

    log::debug!(
        "decoded module: {} types, {} imports, {} functions, {} exports",
        module.types.len(),
        module.imports.len(),
        module.functions.len(),
        module.exports.len()
    );
    Ok(module)
}

struct Decoder<'l> {
    limits: &'l ParserLimits,
    module: Module,
}

impl Decoder<'_> {
    fn vector_len(&self, r: &mut BinaryReader, what: &str) -> Result<u32> {
        r.read_length(self.limits.max_vector_size, what)
    }

    /// Count of defined functions; imported functions share the same
    /// `max_function_count` budget.
    fn function_count(&self, r: &mut BinaryReader, what: &str) -> Result<u32> {
        let offset = r.offset();
        let count = r.read_length(self.limits.max_function_count, what)?;
        let imported = self.module.num_imported_funcs() as usize;
        if imported + count as usize > self.limits.max_function_count {
            return Err(ParseError::new(
                offset,
                format!(
                    "{} count {} plus {} imported exceeds limit {}",
                    what, count, imported, self.limits.max_function_count
                ),
            ));
        }
        Ok(count)
    }

    fn type_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "type")?;
        self.module.types.reserve(r.capacity_for(count));
        for _ in 0..count {
            if r.peek_u8()? == 0x4E {
                r.read_u8()?;
                let group = self.vector_len(r, "recursion group member")?;
                for _ in 0..group {
                    let st = r.read_sub_type(self.limits.max_vector_size)?;
                    self.push_type(r, st)?;
                }
            } else {
                let st = r.read_sub_type(self.limits.max_vector_size)?;
                self.push_type(r, st)?;
            }
        }
        Ok(())
    }

    fn push_type(&mut self, r: &BinaryReader, st: SubType) -> Result<()> {
        if self.module.types.len() >= self.limits.max_vector_size {
            return Err(r.error("type count exceeds limit"));
        }
        self.module.types.push(st);
        Ok(())
    }

    fn import_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "import")?;
        self.module.imports.reserve(r.capacity_for(count));
        let mut funcs = 0usize;
        for _ in 0..count {
            let offset = r.offset();
            let module = r.read_name(self.limits.max_name_length)?;
            let name = r.read_name(self.limits.max_name_length)?;
            let kind_offset = r.offset();
            let kind = match r.read_u8()? {
                0x00 => {
                    funcs += 1;
                    if funcs > self.limits.max_function_count {
                        return Err(ParseError::new(
                            kind_offset,
                            format!(
                                "imported function count exceeds limit {}",
                                self.limits.max_function_count
                            ),
                        ));
                    }
                    ImportKind::Func(r.read_var_u32()?)
                }
                0x01 => ImportKind::Table(r.read_table_type()?),
                0x02 => ImportKind::Memory(r.read_memory_type()?),
                0x03 => ImportKind::Global(r.read_global_type()?),
                0x04 => ImportKind::Tag(r.read_tag_type()?),
                b => {
                    return Err(ParseError::new(
                        kind_offset,
                        format!("malformed import kind {:#04x}", b),
                    ))
                }
            };
            self.module.imports.push(Import {
                module,
                name,
                kind,
                offset,
            });
        }
        Ok(())
    }

    fn function_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        self.module.function_section_offset = r.offset();
        let count = self.function_count(r, "function")?;
        self.module.functions.reserve(r.capacity_for(count));
        for _ in 0..count {
            self.module.functions.push(r.read_var_u32()?);
        }
        Ok(())
    }

    fn table_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "table")?;
        self.module.tables.reserve(r.capacity_for(count));
        for _ in 0..count {
            let table = if r.peek_u8()? == 0x40 {
                r.read_u8()?;
                let offset = r.offset();
                if r.read_u8()? != 0x00 {
                    return Err(ParseError::new(offset, "malformed table"));
                }
                let ty = r.read_table_type()?;
                let init = Some(self.const_expr(r)?);
                Table { ty, init }
            } else {
                Table {
                    ty: r.read_table_type()?,
                    init: None,
                }
            };
            self.module.tables.push(table);
        }
        Ok(())
    }

    fn memory_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "memory")?;
        self.module.memories.reserve(r.capacity_for(count));
        for _ in 0..count {
            self.module.memories.push(r.read_memory_type()?);
        }
        Ok(())
    }

    fn tag_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "tag")?;
        self.module.tags.reserve(r.capacity_for(count));
        for _ in 0..count {
            self.module.tags.push(r.read_tag_type()?);
        }
        Ok(())
    }

    fn global_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "global")?;
        self.module.globals.reserve(r.capacity_for(count));
        for _ in 0..count {
            let ty = r.read_global_type()?;
            let init = self.const_expr(r)?;
            self.module.globals.push(Global { ty, init });
        }
        Ok(())
    }

    fn export_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "export")?;
        self.module.exports.reserve(r.capacity_for(count));
        for _ in 0..count {
            let offset = r.offset();
            let name = r.read_name(self.limits.max_name_length)?;
            let kind_offset = r.offset();
            let kind = match r.read_u8()? {
                0x00 => ExternalKind::Func,
                0x01 => ExternalKind::Table,
                0x02 => ExternalKind::Memory,
                0x03 => ExternalKind::Global,
                0x04 => ExternalKind::Tag,
                b => {
                    return Err(ParseError::new(
                        kind_offset,
                        format!("malformed export kind {:#04x}", b),
                    ))
                }
            };
            let index = r.read_var_u32()?;
            self.module.exports.push(Export {
                name,
                kind,
                index,
                offset,
            });
        }
        Ok(())
    }

    fn func_indices(&self, r: &mut BinaryReader) -> Result<Vec<u32>> {
        let count = self.vector_len(r, "element item")?;
        let mut items = Vec::with_capacity(r.capacity_for(count));
        for _ in 0..count {
            items.push(r.read_var_u32()?);
        }
        Ok(items)
    }

    fn expr_items(&self, r: &mut BinaryReader) -> Result<Vec<ConstExpr>> {
        let count = self.vector_len(r, "element item")?;
        let mut items = Vec::with_capacity(r.capacity_for(count));
        for _ in 0..count {
            items.push(self.const_expr(r)?);
        }
        Ok(items)
    }

    fn elem_kind(&self, r: &mut BinaryReader) -> Result<RefType> {
        let offset = r.offset();
        match r.read_u8()? {
            0x00 => Ok(RefType::FUNCREF),
            b => Err(ParseError::new(
                offset,
                format!("malformed element kind {:#04x}", b),
            )),
        }
    }

    fn element_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "element segment")?;
        self.module.elements.reserve(r.capacity_for(count));
        for _ in 0..count {
            let offset = r.offset();
            let flags = r.read_var_u32()?;
            let non_null_funcref = RefType::non_null(HeapType::Func);
            let (ty, mode, items) = match flags {
                0 => {
                    let offset_expr = self.const_expr(r)?;
                    let items = ElementItems::Functions(self.func_indices(r)?);
                    let mode = ElementMode::Active {
                        table: 0,
                        offset: offset_expr,
                    };
                    (non_null_funcref, mode, items)
                }
                1 | 3 => {
                    let ty = self.elem_kind(r)?;
                    let items = ElementItems::Functions(self.func_indices(r)?);
                    let mode = if flags == 1 {
                        ElementMode::Passive
                    } else {
                        ElementMode::Declarative
                    };
                    (ty, mode, items)
                }
                2 => {
                    let table = r.read_var_u32()?;
                    let offset_expr = self.const_expr(r)?;
                    let ty = self.elem_kind(r)?;
                    let items = ElementItems::Functions(self.func_indices(r)?);
                    let mode = ElementMode::Active {
                        table,
                        offset: offset_expr,
                    };
                    (ty, mode, items)
                }
                4 => {
                    let offset_expr = self.const_expr(r)?;
                    let items = ElementItems::Expressions(self.expr_items(r)?);
                    let mode = ElementMode::Active {
                        table: 0,
                        offset: offset_expr,
                    };
                    (RefType::FUNCREF, mode, items)
                }
                5 | 7 => {
                    let ty = r.read_ref_type()?;
                    let items = ElementItems::Expressions(self.expr_items(r)?);
                    let mode = if flags == 5 {
                        ElementMode::Passive
                    } else {
                        ElementMode::Declarative
                    };
                    (ty, mode, items)
                }
                6 => {
                    let table = r.read_var_u32()?;
                    let offset_expr = self.const_expr(r)?;
                    let ty = r.read_ref_type()?;
                    let items = ElementItems::Expressions(self.expr_items(r)?);
                    let mode = ElementMode::Active {
                        table,
                        offset: offset_expr,
                    };
                    (ty, mode, items)
                }
                _ => {
                    return Err(ParseError::new(
                        offset,
                        format!("malformed elements segment kind {}", flags),
                    ))
                }
            };
            self.module.elements.push(ElementSegment {
                ty,
                mode,
                items,
                offset,
            });
        }
        Ok(())
    }

    fn code_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.function_count(r, "function body")?;
        self.module.code.reserve(r.capacity_for(count));
        for _ in 0..count {
            let offset = r.offset();
            let size = r.read_var_u32()? as usize;
            let mut body = r.sub_reader(size)?;

            let groups = self.vector_len(&mut body, "local group")?;
            let mut locals = Vec::with_capacity(body.capacity_for(groups));
            let mut total: usize = 0;
            for _ in 0..groups {
                let group_offset = body.offset();
                let n = body.read_var_u32()?;
                total = total
                    .checked_add(n as usize)
                    .filter(|t| *t <= self.limits.max_local_count)
                    .ok_or_else(|| {
                        ParseError::new(
                            group_offset,
                            format!(
                                "too many locals (limit {})",
                                self.limits.max_local_count
                            ),
                        )
                    })?;
                locals.push((n, body.read_val_type()?));
            }

            let code_offset = body.offset();
            let code = body.rest().to_vec();
            if code.last() != Some(&0x0B) {
                return Err(ParseError::new(
                    code_offset + code.len(),
                    "END opcode expected",
                ));
            }
            self.module.code.push(FunctionBody {
                locals,
                code,
                code_offset,
                offset,
            });
        }
        Ok(())
    }

    fn data_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let count = self.vector_len(r, "data segment")?;
        self.module.data.reserve(r.capacity_for(count));
        for _ in 0..count {
            let offset = r.offset();
            let mode = match r.read_var_u32()? {
                0 => DataMode::Active {
                    memory: 0,
                    offset: self.const_expr(r)?,
                },
                1 => DataMode::Passive,
                2 => {
                    let memory = r.read_var_u32()?;
                    DataMode::Active {
                        memory,
                        offset: self.const_expr(r)?,
                    }
                }
                flags => {
                    return Err(ParseError::new(
                        offset,
                        format!("malformed data segment kind {}", flags),
                    ))
                }
            };
            let len = r.read_length(self.limits.max_data_segment_size, "data segment byte")?;
            let data = r.read_bytes(len as usize)?.to_vec();
            self.module.data.push(DataSegment { mode, data, offset });
        }
        Ok(())
    }

    fn custom_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        let offset = r.offset();
        let name = r.read_name(self.limits.max_name_length)?;
        if name == "name" {
            let mut names = r.clone();
            // A broken name section never makes the module invalid.
            if let Err(e) = self.name_section(&mut names) {
                log::debug!("ignoring malformed name section: {}", e);
            }
        }
        let data = r.read_bytes(r.remaining())?.to_vec();
        self.module.customs.push(CustomSection { name, data, offset });
        Ok(())
    }

    fn name_section(&mut self, r: &mut BinaryReader) -> Result<()> {
        while !r.is_eof() {
            let id = r.read_u8()?;
            let size = r.read_var_u32()? as usize;
            let mut sub = r.sub_reader(size)?;
            if id != 1 {
                continue;
            }
            let count = self.vector_len(&mut sub, "function name")?;
            for _ in 0..count {
                let idx = sub.read_var_u32()?;
                let name = sub.read_name(self.limits.max_name_length)?;
                self.module.func_names.insert(idx, name);
            }
        }
        Ok(())
    }

    /// Read a constant expression up to and including its `end`.
    fn const_expr(&self, r: &mut BinaryReader) -> Result<ConstExpr> {
        let offset = r.offset();
        let rest = r.rest();
        let mut ops = OperatorsReader::new(rest, offset, self.limits.max_vector_size);
        let mut depth = 0usize;
        loop {
            let (_, op) = ops.read()?;
            match op {
                Operator::Block { .. }
                | Operator::Loop { .. }
                | Operator::If { .. }
                | Operator::Try { .. } => depth += 1,
                Operator::End if depth == 0 => break,
                Operator::End => depth -= 1,
                _ => {}
            }
        }
        let len = ops.offset() - offset;
        let bytes = r.read_bytes(len)?.to_vec();
        Ok(ConstExpr { bytes, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wat(src: &str) -> Vec<u8> {
        wat::parse_str(src).unwrap()
    }

    #[test]
    fn rejects_bad_magic() {
        let err = decode(b"\0asx\x01\0\0\0", &ParserLimits::default()).unwrap_err();
        assert_eq!(err.offset, 0);
        assert!(err.reason.contains("magic"));
    }

    #[test]
    fn rejects_bad_version() {
        let err = decode(b"\0asm\x02\0\0\0", &ParserLimits::default()).unwrap_err();
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn empty_module() {
        let m = decode(b"\0asm\x01\0\0\0", &ParserLimits::default()).unwrap();
        assert!(m.types.is_empty());
        assert!(m.code.is_empty());
    }

    #[test]
    fn truncated_section_is_located() {
        // type section claims 5 bytes but only 2 follow
        let err = decode(b"\0asm\x01\0\0\0\x01\x05\x01\x60", &ParserLimits::default())
            .unwrap_err();
        assert!(err.reason.contains("unexpected end"));
    }

    #[test]
    fn out_of_order_sections() {
        // function section (3) followed by type section (1)
        let bytes = b"\0asm\x01\0\0\0\x03\x01\x00\x01\x01\x00";
        let err = decode(bytes, &ParserLimits::default()).unwrap_err();
        assert!(err.reason.contains("out of order"));
    }

    #[test]
    fn decodes_functions_exports_and_names() {
        let bytes = wat(r#"
            (module
              (func $add (export "add") (param i32 i32) (result i32)
                (local i64 i64)
                local.get 0
                local.get 1
                i32.add)
              (memory 1 2)
              (global $g (mut i32) (i32.const 7))
              (data (i32.const 16) "hi"))
        "#);
        let m = decode(&bytes, &ParserLimits::default()).unwrap();
        assert_eq!(m.functions, vec![0]);
        assert_eq!(m.code[0].locals, vec![(2, ValType::I64)]);
        assert_eq!(m.code[0].code.last(), Some(&0x0B));
        assert_eq!(m.exports[0].name, "add");
        assert_eq!(m.func_names.get(&0).map(String::as_str), Some("add"));
        assert_eq!(m.memories[0].limits.max, Some(2));
        assert!(m.globals[0].ty.mutable);
        assert_eq!(m.data[0].data, b"hi");
    }

    #[test]
    fn function_count_limit_fails_before_allocation() {
        // function section declaring 2^32-1 entries in a 5-byte LEB
        let bytes = b"\0asm\x01\0\0\0\x03\x05\xFF\xFF\xFF\xFF\x0F";
        let limits = ParserLimits {
            max_function_count: 1000,
            ..ParserLimits::default()
        };
        let err = decode(bytes, &limits).unwrap_err();
        assert_eq!(err.offset, 10);
        assert!(err.reason.contains("function count"));
    }

    #[test]
    fn function_count_limit_includes_imports() {
        let bytes = wat(r#"(module
            (import "env" "a" (func))
            (import "env" "b" (func))
            (func) (func))"#);
        let limits = ParserLimits {
            max_function_count: 3,
            ..ParserLimits::default()
        };
        let err = decode(&bytes, &limits).unwrap_err();
        assert!(err.reason.contains("plus 2 imported exceeds limit 3"), "{}", err.reason);

        let limits = ParserLimits {
            max_function_count: 4,
            ..ParserLimits::default()
        };
        assert!(decode(&bytes, &limits).is_ok());
    }

    #[test]
    fn local_count_limit() {
        let bytes = wat(r#"(module (func (local i32 i32 i32 i32)))"#);
        let limits = ParserLimits {
            max_local_count: 3,
            ..ParserLimits::default()
        };
        let err = decode(&bytes, &limits).unwrap_err();
        assert!(err.reason.contains("too many locals"));
    }

    #[test]
    fn data_segment_size_limit() {
        let bytes = wat(r#"(module (memory 1) (data (i32.const 0) "0123456789"))"#);
        let limits = ParserLimits {
            max_data_segment_size: 4,
            ..ParserLimits::default()
        };
        assert!(decode(&bytes, &limits).is_err());
    }

    #[test]
    fn name_length_limit() {
        let bytes = wat(r#"(module (func (export "a_rather_long_export_name")))"#);
        let limits = ParserLimits {
            max_name_length: 8,
            ..ParserLimits::default()
        };
        let err = decode(&bytes, &limits).unwrap_err();
        assert!(err.reason.contains("name length"));
    }

    #[test]
    fn element_segments() {
        let bytes = wat(r#"
            (module
              (table 4 funcref)
              (func $f)
              (elem (i32.const 1) $f $f)
              (elem declare func $f))
        "#);
        let m = decode(&bytes, &ParserLimits::default()).unwrap();
        assert_eq!(m.elements.len(), 2);
        assert!(matches!(m.elements[0].mode, ElementMode::Active { table: 0, .. }));
        assert_eq!(m.elements[0].items, ElementItems::Functions(vec![0, 0]));
        assert_eq!(m.elements[1].mode, ElementMode::Declarative);
    }

    #[test]
    fn const_expr_keeps_end() {
        let bytes = wat(r#"(module (global i64 (i64.const -5)))"#);
        let m = decode(&bytes, &ParserLimits::default()).unwrap();
        let init = &m.globals[0].init;
        assert_eq!(init.bytes, vec![0x42, 0x7B, 0x0B]);
    }

    #[test]
    fn function_code_mismatch() {
        // one function declared, no code section
        let bytes = b"\0asm\x01\0\0\0\x01\x04\x01\x60\x00\x00\x03\x02\x01\x00";
        let err = decode(bytes, &ParserLimits::default()).unwrap_err();
        assert!(err.reason.contains("inconsistent lengths"));
    }

    #[test]
    fn gc_rec_group_is_flattened() {
        let bytes = wat(r#"
            (module
              (rec
                (type $a (struct (field (ref null $b))))
                (type $b (array (mut i8)))))
        "#);
        let m = decode(&bytes, &ParserLimits::default()).unwrap();
        assert_eq!(m.types.len(), 2);
        assert!(m.types[0].as_struct().is_some());
        assert_eq!(m.types[1].as_array().unwrap().storage, StorageType::I8);
    }
}
