//! Static validation of a decoded module.
//!
//! Module-level rules (limits, exports, start function, constant
//! expressions, segments) are checked first. Every defined function body is
//! then type checked by a [`FunctionValidator`](func::FunctionValidator),
//! optionally in parallel. All errors are collected and reported together,
//! module-level errors first and function errors in function index order.

mod func;
pub mod subtype;

pub use func::MaybeType;

use crate::decoder::{
    CompositeType, DataMode, ElementItems, ElementMode, ExternalKind, FuncType, HeapType,
    ImportKind, Limits, Module, ParserLimits, RefType, ValType,
};
use crate::error::{ValidationError, ValidationErrors};
use fnv::{FnvHashMap, FnvHashSet};
use func::FunctionValidator;
use rayon::prelude::*;
use subtype::Subtyping;

/// Maximum pages of a 32-bit memory.
const MAX_PAGES_32: u64 = 1 << 16;
/// Maximum pages of a 64-bit memory.
const MAX_PAGES_64: u64 = 1 << 48;
const MAX_TABLE_SIZE: u64 = u32::MAX as u64;

/// Facts about the whole module needed while checking function bodies.
#[derive(Debug, Default)]
pub(crate) struct ModuleContext {
    /// Functions that `ref.func` may name outside constant expressions.
    pub declared_funcs: FnvHashSet<u32>,
}

impl ModuleContext {
    fn new(module: &Module) -> Self {
        let mut declared_funcs = FnvHashSet::default();
        for export in &module.exports {
            if export.kind == ExternalKind::Func {
                declared_funcs.insert(export.index);
            }
        }
        for seg in &module.elements {
            match &seg.items {
                ElementItems::Functions(funcs) => declared_funcs.extend(funcs.iter().copied()),
                ElementItems::Expressions(exprs) => {
                    for e in exprs {
                        declared_funcs.extend(ref_funcs_in(&e.bytes));
                    }
                }
            }
        }
        for g in &module.globals {
            declared_funcs.extend(ref_funcs_in(&g.init.bytes));
        }
        for t in &module.tables {
            if let Some(init) = &t.init {
                declared_funcs.extend(ref_funcs_in(&init.bytes));
            }
        }
        Self { declared_funcs }
    }
}

/// Function indices named by `ref.func` in a constant expression.
fn ref_funcs_in(bytes: &[u8]) -> Vec<u32> {
    let mut reader = crate::decoder::OperatorsReader::new(bytes, 0, usize::MAX);
    let mut out = Vec::new();
    while !reader.is_eof() {
        match reader.read() {
            Ok((_, crate::decoder::Operator::RefFunc { func })) => out.push(func),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    out
}

/// Validate `module`, checking function bodies sequentially.
pub fn validate(module: &Module, limits: &ParserLimits) -> Result<(), ValidationErrors> {
    validate_module(module, limits, false)
}

/// Validate `module`; with `parallel` set, function bodies are checked on
/// the rayon pool. The result does not depend on `parallel`.
pub fn validate_module(
    module: &Module,
    limits: &ParserLimits,
    parallel: bool,
) -> Result<(), ValidationErrors> {
    let ctx = ModuleContext::new(module);
    let mut errors = ModuleChecker::new(module, &ctx, limits).run();

    let first = module.num_imported_funcs();
    let count = module.code.len().min(module.functions.len()) as u32;
    let check = |idx: u32| -> Option<ValidationError> {
        FunctionValidator::new(module, &ctx, limits)
            .validate_function(idx)
            .err()
    };
    let func_errors: Vec<ValidationError> = if parallel {
        (first..first + count)
            .into_par_iter()
            .filter_map(check)
            .collect()
    } else {
        (first..first + count).filter_map(check).collect()
    };
    errors.extend(func_errors);

    if errors.is_empty() {
        log::debug!("validated {} function bodies", count);
        Ok(())
    } else {
        errors.sort_by_key(|e| e.func_idx);
        log::debug!("validation failed with {} error(s)", errors.len());
        Err(ValidationErrors { errors })
    }
}

struct ModuleChecker<'a> {
    module: &'a Module,
    ctx: &'a ModuleContext,
    limits: &'a ParserLimits,
    sub: Subtyping<'a>,
    errors: Vec<ValidationError>,
}

impl<'a> ModuleChecker<'a> {
    fn new(module: &'a Module, ctx: &'a ModuleContext, limits: &'a ParserLimits) -> Self {
        Self {
            module,
            ctx,
            limits,
            sub: Subtyping::new(module),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, offset: usize, message: impl Into<String>) {
        self.errors.push(ValidationError::in_module(offset, message));
    }

    fn run(mut self) -> Vec<ValidationError> {
        let m = self.module;
        if m.code.len() != m.functions.len() {
            self.error(
                m.function_section_offset,
                "function and code section have inconsistent lengths",
            );
        }
        self.types();
        self.imports();
        for (i, type_idx) in m.functions.iter().enumerate() {
            if m.func_type_at(*type_idx).is_none() {
                let offset = m.code.get(i).map_or(m.function_section_offset, |b| b.offset);
                self.error(offset, format!("unknown function type {}", type_idx));
            }
        }
        for (i, t) in m.tables.iter().enumerate() {
            let offset = t.init.as_ref().map_or(0, |e| e.offset);
            self.table_limits(t.ty.limits, offset);
            self.heap_index(t.ty.element.heap, offset);
            match &t.init {
                Some(init) => self.const_expr(
                    &init.bytes,
                    init.offset,
                    ValType::Ref(t.ty.element),
                    m.num_globals(),
                ),
                None if !t.ty.element.nullable => self.error(
                    offset,
                    format!("table {} of non-nullable type requires an initializer", i),
                ),
                None => {}
            }
        }
        for mem in &m.memories {
            self.memory_limits(mem.limits, mem.memory64, 0);
        }
        for tag in &m.tags {
            self.tag_type(tag.type_idx, 0);
        }
        let imported_globals = m.num_imported_globals();
        for (i, g) in m.globals.iter().enumerate() {
            self.val_type(g.ty.content, g.init.offset);
            self.const_expr(
                &g.init.bytes,
                g.init.offset,
                g.ty.content,
                imported_globals + i as u32,
            );
        }
        self.exports();
        self.start();
        self.elements();
        self.data();
        self.errors
    }

    fn heap_index(&mut self, heap: HeapType, offset: usize) {
        if let HeapType::Concrete(idx) = heap {
            if idx as usize >= self.module.types.len() {
                self.error(offset, format!("unknown type {}", idx));
            }
        }
    }

    fn val_type(&mut self, ty: ValType, offset: usize) {
        if let ValType::Ref(rt) = ty {
            self.heap_index(rt.heap, offset);
        }
    }

    fn types(&mut self) {
        let m = self.module;
        for (i, t) in m.types.iter().enumerate() {
            if let Some(sup) = t.supertype {
                match m.types.get(sup as usize) {
                    Some(s) if (sup as usize) < i => {
                        if s.is_final {
                            self.error(0, format!("type {} extends final type {}", i, sup));
                        }
                        let same_kind = matches!(
                            (&t.composite, &s.composite),
                            (CompositeType::Func(_), CompositeType::Func(_))
                                | (CompositeType::Struct(_), CompositeType::Struct(_))
                                | (CompositeType::Array(_), CompositeType::Array(_))
                        );
                        if !same_kind {
                            self.error(
                                0,
                                format!("type {} does not match the kind of supertype {}", i, sup),
                            );
                        }
                    }
                    _ => self.error(0, format!("unknown supertype {} of type {}", sup, i)),
                }
            }
            let mut vals = Vec::new();
            match &t.composite {
                CompositeType::Func(ft) => {
                    vals.extend(ft.params.iter().chain(&ft.results).copied());
                }
                CompositeType::Struct(fields) => {
                    vals.extend(fields.iter().map(|f| f.storage.unpacked()));
                }
                CompositeType::Array(f) => vals.push(f.storage.unpacked()),
            }
            for v in vals {
                self.val_type(v, 0);
            }
        }
    }

    fn imports(&mut self) {
        let m = self.module;
        for import in &m.imports {
            match import.kind {
                ImportKind::Func(type_idx) => {
                    if m.func_type_at(type_idx).is_none() {
                        self.error(import.offset, format!("unknown function type {}", type_idx));
                    }
                }
                ImportKind::Table(t) => {
                    self.table_limits(t.limits, import.offset);
                    self.heap_index(t.element.heap, import.offset);
                }
                ImportKind::Memory(mem) => {
                    self.memory_limits(mem.limits, mem.memory64, import.offset)
                }
                ImportKind::Global(g) => self.val_type(g.content, import.offset),
                ImportKind::Tag(tag) => self.tag_type(tag.type_idx, import.offset),
            }
        }
    }

    fn tag_type(&mut self, type_idx: u32, offset: usize) {
        match self.module.func_type_at(type_idx) {
            Some(ft) if !ft.results.is_empty() => {
                self.error(offset, "tag type must not have results")
            }
            Some(_) => {}
            None => self.error(offset, format!("unknown tag type {}", type_idx)),
        }
    }

    fn table_limits(&mut self, limits: Limits, offset: usize) {
        self.limits_in_range(limits, MAX_TABLE_SIZE, "table size", offset);
    }

    fn memory_limits(&mut self, limits: Limits, memory64: bool, offset: usize) {
        let max = if memory64 { MAX_PAGES_64 } else { MAX_PAGES_32 };
        self.limits_in_range(limits, max, "memory size", offset);
    }

    fn limits_in_range(&mut self, limits: Limits, max: u64, what: &str, offset: usize) {
        if limits.min > max || limits.max.is_some_and(|m| m > max) {
            self.error(offset, format!("{} must be at most {}", what, max));
        }
        if limits.max.is_some_and(|m| m < limits.min) {
            self.error(offset, "size minimum must not be greater than maximum");
        }
    }

    fn exports(&mut self) {
        let m = self.module;
        let mut seen: FnvHashMap<&str, usize> = FnvHashMap::default();
        for export in &m.exports {
            if seen.insert(export.name.as_str(), export.offset).is_some() {
                self.error(export.offset, format!("duplicate export name {:?}", export.name));
            }
            let (count, what) = match export.kind {
                ExternalKind::Func => (m.num_funcs(), "function"),
                ExternalKind::Table => (m.num_tables(), "table"),
                ExternalKind::Memory => (m.num_memories(), "memory"),
                ExternalKind::Global => (m.num_globals(), "global"),
                ExternalKind::Tag => (m.num_tags(), "tag"),
            };
            if export.index >= count {
                self.error(export.offset, format!("unknown {} {}", what, export.index));
            }
        }
    }

    fn start(&mut self) {
        let m = self.module;
        let Some((func, offset)) = m.start else {
            return;
        };
        match m.func_type(func).filter(|_| func < m.num_funcs()) {
            None => self.error(offset, format!("unknown function {}", func)),
            Some(ft) if *ft != FuncType::default() => {
                self.error(offset, format!("start function must have type [] -> [], found {}", ft))
            }
            Some(_) => {}
        }
    }

    fn elements(&mut self) {
        let m = self.module;
        for (i, seg) in m.elements.iter().enumerate() {
            self.heap_index(seg.ty.heap, seg.offset);
            match &seg.items {
                ElementItems::Functions(funcs) => {
                    for f in funcs {
                        if *f >= m.num_funcs() {
                            self.error(seg.offset, format!("unknown function {}", f));
                        }
                    }
                    if !self.sub.reference(RefType::non_null(HeapType::Func), seg.ty) {
                        self.error(seg.offset, format!("type mismatch in elem segment {}", i));
                    }
                }
                ElementItems::Expressions(exprs) => {
                    for e in exprs {
                        self.const_expr(&e.bytes, e.offset, ValType::Ref(seg.ty), m.num_globals());
                    }
                }
            }
            if let ElementMode::Active { table, offset } = &seg.mode {
                match m.table_type(*table).filter(|_| *table < m.num_tables()) {
                    None => self.error(seg.offset, format!("unknown table {}", table)),
                    Some(t) => {
                        if !self.sub.reference(seg.ty, t.element) {
                            self.error(
                                seg.offset,
                                format!(
                                    "type mismatch: elem segment {} of {} for table of {}",
                                    i, seg.ty, t.element
                                ),
                            );
                        }
                    }
                }
                self.const_expr(&offset.bytes, offset.offset, ValType::I32, m.num_globals());
            }
        }
    }

    fn data(&mut self) {
        let m = self.module;
        for seg in &m.data {
            if let DataMode::Active { memory, offset } = &seg.mode {
                match m.memory_type(*memory).filter(|_| *memory < m.num_memories()) {
                    None => self.error(seg.offset, format!("unknown memory {}", memory)),
                    Some(mem) => {
                        self.const_expr(&offset.bytes, offset.offset, mem.index_type(), m.num_globals())
                    }
                }
            }
        }
    }

    fn const_expr(&mut self, bytes: &[u8], offset: usize, ty: ValType, visible_globals: u32) {
        let mut v = FunctionValidator::new(self.module, self.ctx, self.limits);
        if let Err(e) = v.validate_const_expr(bytes, offset, ty, visible_globals) {
            self.errors.push(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;

    fn check(wat: &str) -> Result<(), ValidationErrors> {
        let bytes = wat::parse_str(wat).unwrap();
        let module = decode(&bytes, &ParserLimits::default()).unwrap();
        validate(&module, &ParserLimits::default())
    }

    fn first_message(wat: &str) -> String {
        check(wat).unwrap_err().first().unwrap().message.clone()
    }

    #[test]
    fn test_valid_arithmetic() {
        check(
            r#"(module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        )
        .unwrap();
    }

    #[test]
    fn test_operand_type_mismatch() {
        let msg = first_message(
            r#"(module
                (func (result i32)
                    i32.const 1
                    i64.const 2
                    i32.add))"#,
        );
        assert!(msg.contains("type mismatch"), "{}", msg);
    }

    #[test]
    fn test_br_if_arity_error_points_at_instruction() {
        let bytes = wat::parse_str(
            r#"(module
                (func
                    (block (result i32 i32)
                        i32.const 1
                        br_if 0
                        unreachable)
                    drop
                    drop))"#,
        )
        .unwrap();
        let br_if_offset = bytes
            .windows(3)
            .position(|w| w == [0x41, 0x01, 0x0D])
            .unwrap()
            + 2;
        let module = decode(&bytes, &ParserLimits::default()).unwrap();
        let errs = validate(&module, &ParserLimits::default()).unwrap_err();
        let e = errs.first().unwrap();
        assert_eq!(e.func_idx, Some(0));
        assert_eq!(e.offset, br_if_offset);
        assert!(e.message.contains("type mismatch"));
    }

    #[test]
    fn test_unreachable_code_is_polymorphic() {
        check(
            r#"(module
                (func (result i32)
                    unreachable
                    i32.add)
                (func (result i64)
                    (block (result i64)
                        i64.const 0
                        br 0
                        f32.const 0
                        drop)))"#,
        )
        .unwrap();
    }

    #[test]
    fn test_unknown_local() {
        let msg = first_message("(module (func (local i32) local.get 1 drop))");
        assert!(msg.contains("unknown local 1"));
    }

    #[test]
    fn test_immutable_global_set() {
        let msg = first_message(
            "(module (global i32 (i32.const 0)) (func i32.const 1 global.set 0))",
        );
        assert!(msg.contains("immutable"));
    }

    #[test]
    fn test_if_without_else_must_not_change_stack() {
        let msg = first_message(
            "(module (func (result i32) (if (result i32) (i32.const 1) (then i32.const 2))))",
        );
        assert!(msg.contains("if without else"));
    }

    #[test]
    fn test_undeclared_function_reference() {
        let msg = first_message("(module (func (ref.func 0) drop))");
        assert!(msg.contains("undeclared function reference"));
        check("(module (func (export \"f\") (ref.func 0) drop))").unwrap();
        check("(module (elem declare func 0) (func (ref.func 0) drop))").unwrap();
    }

    #[test]
    fn test_uninitialized_non_defaultable_local() {
        let msg = first_message(
            r#"(module
                (type $t (func))
                (func (local (ref $t))
                    local.get 0
                    drop))"#,
        );
        assert!(msg.contains("uninitialized local"));
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut body = String::new();
        for _ in 0..10 {
            body.push_str("(block ");
        }
        for _ in 0..10 {
            body.push(')');
        }
        let bytes = wat::parse_str(format!("(module (func {}))", body)).unwrap();
        let limits = ParserLimits {
            max_nesting_depth: 5,
            ..ParserLimits::default()
        };
        let module = decode(&bytes, &limits).unwrap();
        let errs = validate(&module, &limits).unwrap_err();
        assert!(errs.first().unwrap().message.contains("nesting depth"));
        assert!(validate(&module, &ParserLimits::default()).is_ok());
    }

    #[test]
    fn test_duplicate_export() {
        let errs = check(
            r#"(module
                (func (export "f"))
                (func (export "f")))"#,
        )
        .unwrap_err();
        assert_eq!(errs.first().unwrap().func_idx, None);
        assert!(errs.first().unwrap().message.contains("duplicate export"));
    }

    #[test]
    fn test_start_function_signature() {
        let msg = first_message("(module (func $s (param i32)) (start $s))");
        assert!(msg.contains("start function"));
    }

    #[test]
    fn test_memory_page_limit() {
        let msg = first_message("(module (memory 65537))");
        assert!(msg.contains("memory size"));
        check("(module (memory i64 65537))").unwrap();
    }

    #[test]
    fn test_global_init_may_not_read_later_globals() {
        let msg = first_message(
            r#"(module
                (global i32 (global.get 1))
                (global i32 (i32.const 0)))"#,
        );
        assert!(msg.contains("earlier globals"));
        check(
            r#"(module
                (global i32 (i32.const 7))
                (global i32 (global.get 0)))"#,
        )
        .unwrap();
    }

    #[test]
    fn test_non_constant_init_rejected() {
        let msg = first_message("(module (global i32 (i32.div_s (i32.const 1) (i32.const 2))))");
        assert!(msg.contains("constant expression required"));
    }

    #[test]
    fn test_errors_sorted_by_function() {
        let errs = check(
            r#"(module
                (func i64.const 0)
                (func)
                (func i32.const 0))"#,
        )
        .unwrap_err();
        let funcs: Vec<_> = errs.errors.iter().map(|e| e.func_idx).collect();
        assert_eq!(funcs, vec![Some(0), Some(2)]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let bytes = wat::parse_str(
            r#"(module
                (func i64.const 0)
                (func (result i32) i32.const 1)
                (func i32.const 0 i32.eqz))"#,
        )
        .unwrap();
        let module = decode(&bytes, &ParserLimits::default()).unwrap();
        let limits = ParserLimits::default();
        assert_eq!(
            validate_module(&module, &limits, true).unwrap_err(),
            validate_module(&module, &limits, false).unwrap_err()
        );
    }

    #[test]
    fn test_exceptions_and_tail_calls() {
        check(
            r#"(module
                (tag $e (param i32))
                (func $f (param i32) (result i32)
                    try (result i32)
                        local.get 0
                        throw $e
                    catch $e
                    catch_all
                        i32.const 0
                    end)
                (func (param i32) (result i32)
                    local.get 0
                    return_call $f))"#,
        )
        .unwrap();
        let msg = first_message(
            r#"(module
                (func $g (result i64) i64.const 0)
                (func (result i32) return_call $g))"#,
        );
        assert!(msg.contains("tail call"));
    }
}
