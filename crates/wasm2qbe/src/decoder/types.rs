//! Type-level structures of a decoded module and their binary readers.

use super::reader::{BinaryReader, Result};
use std::fmt;

/// Wasm value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    Ref(RefType),
}

/// A reference type: nullability plus a heap type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefType {
    pub nullable: bool,
    pub heap: HeapType,
}

/// Heap types of the GC proposal. Concrete types index the type section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    Func,
    NoFunc,
    Extern,
    NoExtern,
    Any,
    Eq,
    I31,
    Struct,
    Array,
    None,
    Concrete(u32),
}

impl RefType {
    pub const FUNCREF: RefType = RefType {
        nullable: true,
        heap: HeapType::Func,
    };
    pub const EXTERNREF: RefType = RefType {
        nullable: true,
        heap: HeapType::Extern,
    };

    pub fn nullable(heap: HeapType) -> Self {
        Self {
            nullable: true,
            heap,
        }
    }

    pub fn non_null(heap: HeapType) -> Self {
        Self {
            nullable: false,
            heap,
        }
    }
}

impl HeapType {
    /// Map an abstract heap type byte (`0x6A..=0x73`) to a heap type.
    fn from_abstract_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x70 => HeapType::Func,
            0x6F => HeapType::Extern,
            0x6E => HeapType::Any,
            0x6D => HeapType::Eq,
            0x6C => HeapType::I31,
            0x6B => HeapType::Struct,
            0x6A => HeapType::Array,
            0x71 => HeapType::None,
            0x72 => HeapType::NoExtern,
            0x73 => HeapType::NoFunc,
            _ => return None,
        })
    }

    /// The s33 code used by the binary format (negative for abstract types).
    /// `ref.test`/`ref.cast` pass this to the runtime as the type argument.
    pub fn code(self) -> i64 {
        let byte = match self {
            HeapType::Concrete(idx) => return i64::from(idx),
            HeapType::Func => 0x70,
            HeapType::Extern => 0x6F,
            HeapType::Any => 0x6E,
            HeapType::Eq => 0x6D,
            HeapType::I31 => 0x6C,
            HeapType::Struct => 0x6B,
            HeapType::Array => 0x6A,
            HeapType::None => 0x71,
            HeapType::NoExtern => 0x72,
            HeapType::NoFunc => 0x73,
        };
        i64::from(byte) - 0x80
    }
}

impl fmt::Display for HeapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapType::Func => write!(f, "func"),
            HeapType::NoFunc => write!(f, "nofunc"),
            HeapType::Extern => write!(f, "extern"),
            HeapType::NoExtern => write!(f, "noextern"),
            HeapType::Any => write!(f, "any"),
            HeapType::Eq => write!(f, "eq"),
            HeapType::I31 => write!(f, "i31"),
            HeapType::Struct => write!(f, "struct"),
            HeapType::Array => write!(f, "array"),
            HeapType::None => write!(f, "none"),
            HeapType::Concrete(idx) => write!(f, "{}", idx),
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "(ref null {})", self.heap)
        } else {
            write!(f, "(ref {})", self.heap)
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
            ValType::F32 => write!(f, "f32"),
            ValType::F64 => write!(f, "f64"),
            ValType::V128 => write!(f, "v128"),
            ValType::Ref(rt) => write!(f, "{}", rt),
        }
    }
}

impl ValType {
    pub const FUNCREF: ValType = ValType::Ref(RefType::FUNCREF);
    pub const EXTERNREF: ValType = ValType::Ref(RefType::EXTERNREF);

    /// Whether a local of this type has a default (zero/null) value.
    pub fn is_defaultable(&self) -> bool {
        match self {
            ValType::Ref(rt) => rt.nullable,
            _ => true,
        }
    }

    pub fn is_num(&self) -> bool {
        matches!(self, ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64)
    }
}

/// Function signature. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: Vec<ValType>, results: Vec<ValType>) -> Self {
        Self { params, results }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "] -> [")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", r)?;
        }
        write!(f, "]")
    }
}

/// Packed or full storage of a struct field / array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    I8,
    I16,
    Val(ValType),
}

impl StorageType {
    /// The type seen on the operand stack after unpacking.
    pub fn unpacked(&self) -> ValType {
        match self {
            StorageType::I8 | StorageType::I16 => ValType::I32,
            StorageType::Val(vt) => *vt,
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, StorageType::I8 | StorageType::I16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldType {
    pub storage: StorageType,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompositeType {
    Func(FuncType),
    Struct(Vec<FieldType>),
    Array(FieldType),
}

/// One entry of the type section, after flattening `rec` groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubType {
    pub is_final: bool,
    pub supertype: Option<u32>,
    pub composite: CompositeType,
}

impl SubType {
    pub fn as_func(&self) -> Option<&FuncType> {
        match &self.composite {
            CompositeType::Func(ft) => Some(ft),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[FieldType]> {
        match &self.composite {
            CompositeType::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&FieldType> {
        match &self.composite {
            CompositeType::Array(ft) => Some(ft),
            _ => None,
        }
    }
}

/// Type annotation of a structured control instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValType),
    Func(u32),
}

/// Size limits of a table or memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub element: RefType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
    pub shared: bool,
    pub memory64: bool,
}

impl MemoryType {
    /// Type of addresses and page counts for this memory.
    pub fn index_type(&self) -> ValType {
        if self.memory64 {
            ValType::I64
        } else {
            ValType::I32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub content: ValType,
    pub mutable: bool,
}

/// Exception tag; `type_idx` names a function type whose params are the
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagType {
    pub type_idx: u32,
}

impl<'a> BinaryReader<'a> {
    pub fn read_val_type(&mut self) -> Result<ValType> {
        let offset = self.offset();
        let b = self.read_u8()?;
        Ok(match b {
            0x7F => ValType::I32,
            0x7E => ValType::I64,
            0x7D => ValType::F32,
            0x7C => ValType::F64,
            0x7B => ValType::V128,
            0x64 => ValType::Ref(RefType::non_null(self.read_heap_type()?)),
            0x63 => ValType::Ref(RefType::nullable(self.read_heap_type()?)),
            _ => match HeapType::from_abstract_byte(b) {
                Some(heap) => ValType::Ref(RefType::nullable(heap)),
                None => {
                    return Err(crate::error::ParseError::new(
                        offset,
                        format!("invalid value type {:#04x}", b),
                    ))
                }
            },
        })
    }

    pub fn read_ref_type(&mut self) -> Result<RefType> {
        let offset = self.offset();
        match self.read_val_type()? {
            ValType::Ref(rt) => Ok(rt),
            other => Err(crate::error::ParseError::new(
                offset,
                format!("expected reference type, found {}", other),
            )),
        }
    }

    pub fn read_heap_type(&mut self) -> Result<HeapType> {
        let offset = self.offset();
        let code = self.read_var_s33()?;
        if code >= 0 {
            return u32::try_from(code)
                .map(HeapType::Concrete)
                .map_err(|_| self.error("type index too large"));
        }
        let byte = (code & 0x7f) as u8;
        if code < -0x40 {
            return Err(crate::error::ParseError::new(offset, "invalid heap type"));
        }
        HeapType::from_abstract_byte(byte).ok_or_else(|| {
            crate::error::ParseError::new(offset, format!("invalid heap type {:#04x}", byte))
        })
    }

    pub fn read_block_type(&mut self) -> Result<BlockType> {
        let b = self.peek_u8()?;
        if b == 0x40 {
            self.read_u8()?;
            return Ok(BlockType::Empty);
        }
        // Single-byte value types and `ref`/`ref null` prefixes.
        if matches!(b, 0x63 | 0x64 | 0x6A..=0x7F) {
            return Ok(BlockType::Value(self.read_val_type()?));
        }
        let offset = self.offset();
        let idx = self.read_var_s33()?;
        u32::try_from(idx)
            .map(BlockType::Func)
            .map_err(|_| crate::error::ParseError::new(offset, "invalid block type"))
    }

    pub fn read_limits(&mut self, memory: bool) -> Result<(Limits, bool, bool)> {
        let offset = self.offset();
        let flags = self.read_u8()?;
        let allowed = if memory { 0x07 } else { 0x01 };
        if flags & !allowed != 0 {
            return Err(crate::error::ParseError::new(
                offset,
                format!("invalid limits flags {:#04x}", flags),
            ));
        }
        let has_max = flags & 0x01 != 0;
        let shared = flags & 0x02 != 0;
        let is64 = flags & 0x04 != 0;
        let (min, max) = if is64 {
            let min = self.read_var_u64()?;
            let max = if has_max {
                Some(self.read_var_u64()?)
            } else {
                None
            };
            (min, max)
        } else {
            let min = u64::from(self.read_var_u32()?);
            let max = if has_max {
                Some(u64::from(self.read_var_u32()?))
            } else {
                None
            };
            (min, max)
        };
        Ok((Limits { min, max }, shared, is64))
    }

    pub fn read_table_type(&mut self) -> Result<TableType> {
        let element = self.read_ref_type()?;
        let (limits, _, _) = self.read_limits(false)?;
        Ok(TableType { element, limits })
    }

    pub fn read_memory_type(&mut self) -> Result<MemoryType> {
        let (limits, shared, memory64) = self.read_limits(true)?;
        Ok(MemoryType {
            limits,
            shared,
            memory64,
        })
    }

    pub fn read_global_type(&mut self) -> Result<GlobalType> {
        let content = self.read_val_type()?;
        let offset = self.offset();
        let mutable = match self.read_u8()? {
            0 => false,
            1 => true,
            b => {
                return Err(crate::error::ParseError::new(
                    offset,
                    format!("invalid mutability {:#04x}", b),
                ))
            }
        };
        Ok(GlobalType { content, mutable })
    }

    pub fn read_tag_type(&mut self) -> Result<TagType> {
        let offset = self.offset();
        let attribute = self.read_u8()?;
        if attribute != 0 {
            return Err(crate::error::ParseError::new(
                offset,
                "invalid tag attribute",
            ));
        }
        Ok(TagType {
            type_idx: self.read_var_u32()?,
        })
    }

    fn read_storage_type(&mut self) -> Result<StorageType> {
        match self.peek_u8()? {
            0x78 => {
                self.read_u8()?;
                Ok(StorageType::I8)
            }
            0x77 => {
                self.read_u8()?;
                Ok(StorageType::I16)
            }
            _ => Ok(StorageType::Val(self.read_val_type()?)),
        }
    }

    fn read_field_type(&mut self) -> Result<FieldType> {
        let storage = self.read_storage_type()?;
        let offset = self.offset();
        let mutable = match self.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(crate::error::ParseError::new(offset, "invalid mutability")),
        };
        Ok(FieldType { storage, mutable })
    }

    fn read_value_types(&mut self, limit: usize) -> Result<Vec<ValType>> {
        let count = self.read_length(limit, "value type")?;
        let mut types = Vec::with_capacity(self.capacity_for(count));
        for _ in 0..count {
            types.push(self.read_val_type()?);
        }
        Ok(types)
    }

    pub fn read_composite_type(&mut self, limit: usize) -> Result<CompositeType> {
        let offset = self.offset();
        match self.read_u8()? {
            0x60 => {
                let params = self.read_value_types(limit)?;
                let results = self.read_value_types(limit)?;
                Ok(CompositeType::Func(FuncType { params, results }))
            }
            0x5F => {
                let count = self.read_length(limit, "struct field")?;
                let mut fields = Vec::with_capacity(self.capacity_for(count));
                for _ in 0..count {
                    fields.push(self.read_field_type()?);
                }
                Ok(CompositeType::Struct(fields))
            }
            0x5E => Ok(CompositeType::Array(self.read_field_type()?)),
            b => Err(crate::error::ParseError::new(
                offset,
                format!("invalid composite type form {:#04x}", b),
            )),
        }
    }

    /// One `subtype` (or a bare composite type, which is final with no
    /// supertype).
    pub fn read_sub_type(&mut self, limit: usize) -> Result<SubType> {
        let form = self.peek_u8()?;
        if form == 0x50 || form == 0x4F {
            self.read_u8()?;
            let count = self.read_length(1, "supertype")?;
            let supertype = if count == 1 {
                Some(self.read_var_u32()?)
            } else {
                None
            };
            let composite = self.read_composite_type(limit)?;
            Ok(SubType {
                is_final: form == 0x4F,
                supertype,
                composite,
            })
        } else {
            Ok(SubType {
                is_final: true,
                supertype: None,
                composite: self.read_composite_type(limit)?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_type_codes_round_trip_through_s33() {
        for heap in [
            HeapType::Func,
            HeapType::Extern,
            HeapType::Any,
            HeapType::Eq,
            HeapType::I31,
            HeapType::Struct,
            HeapType::Array,
            HeapType::None,
            HeapType::NoExtern,
            HeapType::NoFunc,
        ] {
            let byte = (heap.code() & 0x7f) as u8;
            let mut r = BinaryReader::new(std::slice::from_ref(&byte));
            assert_eq!(r.read_heap_type().unwrap(), heap);
        }
        assert_eq!(HeapType::Func.code(), -16);
        assert_eq!(HeapType::Concrete(3).code(), 3);
    }

    #[test]
    fn read_nullable_and_non_null_refs() {
        let mut r = BinaryReader::new(&[0x70, 0x64, 0x02, 0x63, 0x6C]);
        assert_eq!(r.read_val_type().unwrap(), ValType::FUNCREF);
        assert_eq!(
            r.read_val_type().unwrap(),
            ValType::Ref(RefType::non_null(HeapType::Concrete(2)))
        );
        assert_eq!(
            r.read_val_type().unwrap(),
            ValType::Ref(RefType::nullable(HeapType::I31))
        );
    }

    #[test]
    fn invalid_val_type() {
        let mut r = BinaryReader::new(&[0x42]);
        let err = r.read_val_type().unwrap_err();
        assert!(err.reason.contains("invalid value type"));
    }

    #[test]
    fn block_types() {
        let mut r = BinaryReader::new(&[0x40, 0x7F, 0x03]);
        assert_eq!(r.read_block_type().unwrap(), BlockType::Empty);
        assert_eq!(r.read_block_type().unwrap(), BlockType::Value(ValType::I32));
        assert_eq!(r.read_block_type().unwrap(), BlockType::Func(3));
    }

    #[test]
    fn memory64_limits() {
        let mut r = BinaryReader::new(&[0x05, 0x01, 0x80, 0x80, 0x04]);
        let mt = r.read_memory_type().unwrap();
        assert!(mt.memory64);
        assert_eq!(mt.limits.min, 1);
        assert_eq!(mt.limits.max, Some(65536));
        assert_eq!(mt.index_type(), ValType::I64);
    }

    #[test]
    fn table_limits_reject_memory_flags() {
        let mut r = BinaryReader::new(&[0x70, 0x02, 0x01]);
        assert!(r.read_table_type().is_err());
    }

    #[test]
    fn struct_and_sub_types() {
        // sub final (no supertypes) struct { i8 mut, i64 }
        let bytes = [0x4F, 0x00, 0x5F, 0x02, 0x78, 0x01, 0x7E, 0x00];
        let mut r = BinaryReader::new(&bytes);
        let st = r.read_sub_type(100).unwrap();
        assert!(st.is_final);
        let fields = st.as_struct().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].storage, StorageType::I8);
        assert!(fields[0].mutable);
        assert_eq!(fields[1].storage.unpacked(), ValType::I64);
    }

    #[test]
    fn display_names() {
        assert_eq!(ValType::V128.to_string(), "v128");
        assert_eq!(ValType::FUNCREF.to_string(), "(ref null func)");
        let ft = FuncType::new(vec![ValType::I32, ValType::I64], vec![ValType::F32]);
        assert_eq!(ft.to_string(), "[i32 i64] -> [f32]");
    }
}
