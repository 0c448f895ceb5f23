//! The decoded module.
//!
//! A `Module` is produced once by [`decode`](super::decode) and is read-only
//! afterwards. It is not checked for cross-references; index spaces (imports
//! first, then definitions) are resolved through the helpers below, which
//! return `None` for out-of-range indices so the validator can report them.

use super::types::{
    FuncType, GlobalType, MemoryType, RefType, SubType, TableType, TagType, ValType,
};
use std::collections::BTreeMap;

/// A constant expression, kept as undecoded bytes (including the final
/// `end`) and the absolute offset of its first instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstExpr {
    pub bytes: Vec<u8>,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
    Tag(TagType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub ty: TableType,
    pub init: Option<ConstExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementMode {
    Passive,
    Declarative,
    Active { table: u32, offset: ConstExpr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementItems {
    Functions(Vec<u32>),
    Expressions(Vec<ConstExpr>),
}

impl ElementItems {
    pub fn len(&self) -> usize {
        match self {
            ElementItems::Functions(f) => f.len(),
            ElementItems::Expressions(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    pub ty: RefType,
    pub mode: ElementMode,
    pub items: ElementItems,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMode {
    Passive,
    Active { memory: u32, offset: ConstExpr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub data: Vec<u8>,
    pub offset: usize,
}

/// A code section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody {
    /// Declared locals, run-length encoded as in the binary.
    pub locals: Vec<(u32, ValType)>,
    /// Instruction bytes including the final `end`.
    pub code: Vec<u8>,
    /// Absolute offset of `code[0]`.
    pub code_offset: usize,
    /// Absolute offset of the body's size field.
    pub offset: usize,
}

impl FunctionBody {
    /// Declared locals expanded one entry per local.
    pub fn local_types(&self) -> impl Iterator<Item = ValType> + '_ {
        self.locals
            .iter()
            .flat_map(|(n, ty)| std::iter::repeat(*ty).take(*n as usize))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSection {
    pub name: String,
    pub data: Vec<u8>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    /// Type section with `rec` groups flattened.
    pub types: Vec<SubType>,
    pub imports: Vec<Import>,
    /// Type index of every defined function.
    pub functions: Vec<u32>,
    pub tables: Vec<Table>,
    pub memories: Vec<MemoryType>,
    pub tags: Vec<TagType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<(u32, usize)>,
    pub elements: Vec<ElementSegment>,
    pub data_count: Option<u32>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<DataSegment>,
    pub customs: Vec<CustomSection>,
    /// Function names from the `name` custom section.
    pub func_names: BTreeMap<u32, String>,
    /// Offset of the function section's count, for count mismatch reports.
    pub function_section_offset: usize,
}

impl Module {
    pub fn num_imported_funcs(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Func(_)))
            .count() as u32
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Global(_)))
            .count() as u32
    }

    pub fn num_imported_tables(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Table(_)))
            .count() as u32
    }

    pub fn num_imported_memories(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Memory(_)))
            .count() as u32
    }

    pub fn num_funcs(&self) -> u32 {
        self.num_imported_funcs() + self.functions.len() as u32
    }

    pub fn num_globals(&self) -> u32 {
        self.num_imported_globals() + self.globals.len() as u32
    }

    pub fn num_tables(&self) -> u32 {
        self.num_imported_tables() + self.tables.len() as u32
    }

    pub fn num_memories(&self) -> u32 {
        self.num_imported_memories() + self.memories.len() as u32
    }

    pub fn num_tags(&self) -> u32 {
        self.imported_tags().count() as u32 + self.tags.len() as u32
    }

    pub fn imported_funcs(&self) -> impl Iterator<Item = (&Import, u32)> {
        self.imports.iter().filter_map(|i| match i.kind {
            ImportKind::Func(ty) => Some((i, ty)),
            _ => None,
        })
    }

    fn imported_tags(&self) -> impl Iterator<Item = TagType> + '_ {
        self.imports.iter().filter_map(|i| match i.kind {
            ImportKind::Tag(t) => Some(t),
            _ => None,
        })
    }

    /// Function type at a type index, if that type is a function type.
    pub fn func_type_at(&self, type_idx: u32) -> Option<&FuncType> {
        self.types.get(type_idx as usize)?.as_func()
    }

    /// Type index of a function in the function index space.
    pub fn func_type_idx(&self, func_idx: u32) -> Option<u32> {
        let mut n = 0;
        for imp in &self.imports {
            if let ImportKind::Func(ty) = imp.kind {
                if n == func_idx {
                    return Some(ty);
                }
                n += 1;
            }
        }
        self.functions.get((func_idx - n) as usize).copied()
    }

    pub fn func_type(&self, func_idx: u32) -> Option<&FuncType> {
        self.func_type_at(self.func_type_idx(func_idx)?)
    }

    pub fn global_type(&self, idx: u32) -> Option<GlobalType> {
        let mut n = 0;
        for imp in &self.imports {
            if let ImportKind::Global(gt) = imp.kind {
                if n == idx {
                    return Some(gt);
                }
                n += 1;
            }
        }
        self.globals.get((idx - n) as usize).map(|g| g.ty)
    }

    pub fn table_type(&self, idx: u32) -> Option<TableType> {
        let mut n = 0;
        for imp in &self.imports {
            if let ImportKind::Table(tt) = imp.kind {
                if n == idx {
                    return Some(tt);
                }
                n += 1;
            }
        }
        self.tables.get((idx - n) as usize).map(|t| t.ty)
    }

    pub fn memory_type(&self, idx: u32) -> Option<MemoryType> {
        let mut n = 0;
        for imp in &self.imports {
            if let ImportKind::Memory(mt) = imp.kind {
                if n == idx {
                    return Some(mt);
                }
                n += 1;
            }
        }
        self.memories.get((idx - n) as usize).copied()
    }

    pub fn tag_type(&self, idx: u32) -> Option<TagType> {
        let imported: Vec<TagType> = self.imported_tags().collect();
        match imported.get(idx as usize) {
            Some(t) => Some(*t),
            None => self.tags.get(idx as usize - imported.len()).copied(),
        }
    }

    /// Import describing function `func_idx`, if it is imported.
    pub fn func_import(&self, func_idx: u32) -> Option<&Import> {
        self.imported_funcs()
            .nth(func_idx as usize)
            .map(|(imp, _)| imp)
    }

    /// Import describing global `idx`, if it is imported.
    pub fn global_import(&self, idx: u32) -> Option<&Import> {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Global(_)))
            .nth(idx as usize)
    }

    /// Human-readable function name: the `name` section entry, else the
    /// first export name, else `func_<idx>`.
    pub fn func_name(&self, func_idx: u32) -> String {
        if let Some(name) = self.func_names.get(&func_idx) {
            return name.clone();
        }
        self.exports
            .iter()
            .find(|e| e.kind == ExternalKind::Func && e.index == func_idx)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| format!("func_{}", func_idx))
    }

    /// Index of the first type structurally equal to `type_idx`. Indirect
    /// call signature checks compare these ids.
    pub fn canonical_type_idx(&self, type_idx: u32) -> u32 {
        let Some(ty) = self.types.get(type_idx as usize) else {
            return type_idx;
        };
        self.types
            .iter()
            .position(|t| t == ty)
            .map_or(type_idx, |p| p as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::types::{CompositeType, Limits};

    fn func_type(params: Vec<ValType>, results: Vec<ValType>) -> SubType {
        SubType {
            is_final: true,
            supertype: None,
            composite: CompositeType::Func(FuncType::new(params, results)),
        }
    }

    fn sample() -> Module {
        Module {
            types: vec![
                func_type(vec![ValType::I32], vec![ValType::I32]),
                func_type(vec![], vec![]),
                func_type(vec![ValType::I32], vec![ValType::I32]),
            ],
            imports: vec![
                Import {
                    module: "env".into(),
                    name: "log".into(),
                    kind: ImportKind::Func(1),
                    offset: 0,
                },
                Import {
                    module: "env".into(),
                    name: "g".into(),
                    kind: ImportKind::Global(GlobalType {
                        content: ValType::I64,
                        mutable: false,
                    }),
                    offset: 0,
                },
                Import {
                    module: "env".into(),
                    name: "mem".into(),
                    kind: ImportKind::Memory(MemoryType {
                        limits: Limits { min: 1, max: None },
                        shared: false,
                        memory64: false,
                    }),
                    offset: 0,
                },
            ],
            functions: vec![0, 2],
            exports: vec![Export {
                name: "square".into(),
                kind: ExternalKind::Func,
                index: 2,
                offset: 0,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn function_index_space_puts_imports_first() {
        let m = sample();
        assert_eq!(m.num_funcs(), 3);
        assert_eq!(m.func_type_idx(0), Some(1));
        assert_eq!(m.func_type_idx(1), Some(0));
        assert_eq!(m.func_type_idx(2), Some(2));
        assert_eq!(m.func_type_idx(3), None);
        assert_eq!(m.func_import(0).unwrap().name, "log");
        assert!(m.func_import(1).is_none());
    }

    #[test]
    fn global_and_memory_index_spaces() {
        let m = sample();
        assert_eq!(m.global_type(0).unwrap().content, ValType::I64);
        assert!(m.global_type(1).is_none());
        assert_eq!(m.num_memories(), 1);
        assert!(m.memory_type(0).is_some());
    }

    #[test]
    fn canonical_types_are_structural() {
        let m = sample();
        assert_eq!(m.canonical_type_idx(2), 0);
        assert_eq!(m.canonical_type_idx(1), 1);
    }

    #[test]
    fn func_name_priority() {
        let mut m = sample();
        assert_eq!(m.func_name(2), "square");
        assert_eq!(m.func_name(1), "func_1");
        m.func_names.insert(2, "sq".into());
        assert_eq!(m.func_name(2), "sq");
    }
}
