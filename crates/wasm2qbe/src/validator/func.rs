//! Per-function type checking.
//!
//! `FunctionValidator` replays a body against a symbolic stack of operand
//! types and a stack of control frames. Code after an unconditional transfer
//! is still checked, but pops below the frame's entry height yield
//! [`MaybeType::Unknown`] (stack polymorphism).

use super::subtype::Subtyping;
use super::ModuleContext;
use crate::decoder::simd::SimdShape;
use crate::decoder::{
    BlockType, FieldType, FuncType, HeapType, MemArg, MemoryType, Module, NumericOp, Operator,
    OperatorsReader, ParserLimits, RefType, SimdImm, ValType,
};
use crate::error::ValidationError;
use crate::stack::SymbolicStack;

/// An operand type, or `Unknown` when popped from an unreachable frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaybeType {
    Unknown,
    Known(ValType),
}

impl MaybeType {
    fn as_ref_type(self) -> Option<RefType> {
        match self {
            MaybeType::Known(ValType::Ref(rt)) => Some(rt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
    Try,
    Catch,
    CatchAll,
}

#[derive(Debug, Clone)]
struct ControlFrame {
    kind: FrameKind,
    start_types: Vec<ValType>,
    end_types: Vec<ValType>,
    height: usize,
    /// Length of `initialized` when the frame was entered.
    init_height: usize,
    unreachable: bool,
}

impl ControlFrame {
    fn label_types(&self) -> &[ValType] {
        if self.kind == FrameKind::Loop {
            &self.start_types
        } else {
            &self.end_types
        }
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

/// Numeric operations allowed in extended constant expressions.
const CONST_NUMERIC: &[NumericOp] = &[
    NumericOp::I32Add,
    NumericOp::I32Sub,
    NumericOp::I32Mul,
    NumericOp::I64Add,
    NumericOp::I64Sub,
    NumericOp::I64Mul,
];

pub(super) struct FunctionValidator<'a> {
    module: &'a Module,
    ctx: &'a ModuleContext,
    limits: &'a ParserLimits,
    sub: Subtyping<'a>,
    func_idx: Option<u32>,
    locals: Vec<ValType>,
    /// Non-defaultable locals set so far; truncated when frames end.
    initialized: Vec<u32>,
    results: Vec<ValType>,
    operands: SymbolicStack<MaybeType>,
    frames: Vec<ControlFrame>,
    /// In constant expressions: the number of globals that may be read.
    const_globals: Option<u32>,
    offset: usize,
}

impl<'a> FunctionValidator<'a> {
    pub(super) fn new(module: &'a Module, ctx: &'a ModuleContext, limits: &'a ParserLimits) -> Self {
        Self {
            module,
            ctx,
            limits,
            sub: Subtyping::new(module),
            func_idx: None,
            locals: Vec::new(),
            initialized: Vec::new(),
            results: Vec::new(),
            operands: SymbolicStack::new(),
            frames: Vec::new(),
            const_globals: None,
            offset: 0,
        }
    }

    fn err(&self, message: impl Into<String>) -> ValidationError {
        match self.func_idx {
            Some(idx) => ValidationError::in_function(idx, self.offset, message),
            None => ValidationError::in_module(self.offset, message),
        }
    }

    /// Validate defined function `func_idx` (function index space).
    pub(super) fn validate_function(&mut self, func_idx: u32) -> Result<()> {
        let module = self.module;
        self.func_idx = Some(func_idx);
        let defined = (func_idx - module.num_imported_funcs()) as usize;
        let body = &module.code[defined];
        self.offset = body.offset;
        let ty = module
            .func_type(func_idx)
            .ok_or_else(|| self.err("function has no function type"))?;

        self.locals = ty.params.clone();
        for local in body.local_types() {
            self.check_val_type(local)?;
            self.locals.push(local);
        }
        self.results = ty.results.clone();
        self.run(&body.code, body.code_offset, Vec::new(), ty.results.clone())
    }

    /// Validate a constant expression producing `ty`. Only the first
    /// `visible_globals` globals may be read, and they must be immutable.
    pub(super) fn validate_const_expr(
        &mut self,
        bytes: &[u8],
        offset: usize,
        ty: ValType,
        visible_globals: u32,
    ) -> Result<()> {
        self.func_idx = None;
        self.const_globals = Some(visible_globals);
        self.locals.clear();
        self.results = vec![ty];
        self.run(bytes, offset, Vec::new(), vec![ty])
    }

    fn run(
        &mut self,
        code: &[u8],
        base: usize,
        params: Vec<ValType>,
        results: Vec<ValType>,
    ) -> Result<()> {
        self.operands.clear();
        self.frames.clear();
        self.initialized.clear();
        self.frames.push(ControlFrame {
            kind: FrameKind::Function,
            start_types: params,
            end_types: results,
            height: 0,
            init_height: 0,
            unreachable: false,
        });

        let mut reader = OperatorsReader::new(code, base, self.limits.max_vector_size);
        while !reader.is_eof() {
            if self.frames.is_empty() {
                self.offset = reader.offset();
                return Err(self.err("operators remaining after end of function"));
            }
            let (offset, op) = reader.read().map_err(|e| {
                let mut err = self.err(e.reason.clone());
                err.offset = e.offset;
                err
            })?;
            self.offset = offset;
            self.operator(op)?;
        }
        if !self.frames.is_empty() {
            self.offset = reader.offset();
            return Err(self.err("unexpected end of function body"));
        }
        Ok(())
    }

    // ─── Operand stack ─────────────────────────────────────────────────────

    fn push(&mut self, ty: ValType) {
        self.operands.push(MaybeType::Known(ty));
    }

    fn push_all(&mut self, types: &[ValType]) {
        for ty in types {
            self.push(*ty);
        }
    }

    fn frame(&self) -> Result<&ControlFrame> {
        self.frames.last().ok_or_else(|| self.err("control frame missing"))
    }

    fn pop(&mut self) -> Result<MaybeType> {
        let frame = self.frame()?;
        if self.operands.len() == frame.height {
            if frame.unreachable {
                return Ok(MaybeType::Unknown);
            }
            return Err(self.err("type mismatch: expected a value but the stack is empty"));
        }
        self.operands
            .pop()
            .ok_or_else(|| self.err("type mismatch: operand stack underflow"))
    }

    fn pop_expect(&mut self, expected: ValType) -> Result<MaybeType> {
        let actual = self.pop()?;
        if let MaybeType::Known(ty) = actual {
            if !self.sub.val(ty, expected) {
                return Err(self.err(format!(
                    "type mismatch: expected {}, found {}",
                    expected, ty
                )));
            }
        }
        Ok(actual)
    }

    fn pop_all(&mut self, types: &[ValType]) -> Result<Vec<MaybeType>> {
        let mut popped = Vec::with_capacity(types.len());
        for ty in types.iter().rev() {
            popped.push(self.pop_expect(*ty)?);
        }
        popped.reverse();
        Ok(popped)
    }

    /// Pop any reference; `Unknown` from unreachable code is accepted.
    fn pop_ref(&mut self) -> Result<Option<RefType>> {
        match self.pop()? {
            MaybeType::Unknown => Ok(None),
            MaybeType::Known(ValType::Ref(rt)) => Ok(Some(rt)),
            MaybeType::Known(ty) => Err(self.err(format!(
                "type mismatch: expected a reference, found {}",
                ty
            ))),
        }
    }

    fn unreachable(&mut self) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| ValidationError::in_module(self.offset, "control frame missing"))?;
        frame.unreachable = true;
        let height = frame.height;
        self.operands.truncate(height);
        Ok(())
    }

    // ─── Control frames ────────────────────────────────────────────────────

    fn push_frame(&mut self, kind: FrameKind, start: Vec<ValType>, end: Vec<ValType>) -> Result<()> {
        if self.frames.len() >= self.limits.max_nesting_depth {
            return Err(self.err(format!(
                "control nesting depth exceeds limit {}",
                self.limits.max_nesting_depth
            )));
        }
        self.frames.push(ControlFrame {
            kind,
            start_types: start,
            end_types: end,
            height: self.operands.len(),
            init_height: self.initialized.len(),
            unreachable: false,
        });
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<ControlFrame> {
        let end_types = self.frame()?.end_types.clone();
        self.pop_all(&end_types)?;
        let frame = self.frame()?;
        if self.operands.len() != frame.height {
            return Err(self.err("type mismatch: values remaining on stack at end of block"));
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| self.err("control frame missing"))?;
        self.initialized.truncate(frame.init_height);
        Ok(frame)
    }

    fn label(&self, depth: u32) -> Result<&ControlFrame> {
        let idx = self
            .frames
            .len()
            .checked_sub(depth as usize + 1)
            .ok_or_else(|| self.err(format!("unknown label {}", depth)))?;
        Ok(&self.frames[idx])
    }

    fn label_types(&self, depth: u32) -> Result<Vec<ValType>> {
        Ok(self.label(depth)?.label_types().to_vec())
    }

    fn block_sig(&self, ty: BlockType) -> Result<(Vec<ValType>, Vec<ValType>)> {
        match ty {
            BlockType::Empty => Ok((Vec::new(), Vec::new())),
            BlockType::Value(vt) => {
                self.check_val_type(vt)?;
                Ok((Vec::new(), vec![vt]))
            }
            BlockType::Func(idx) => {
                let ft = self.func_type_at(idx)?;
                Ok((ft.params.clone(), ft.results.clone()))
            }
        }
    }

    // ─── Index checks ──────────────────────────────────────────────────────

    fn func_type_at(&self, idx: u32) -> Result<&'a FuncType> {
        match self.module.types.get(idx as usize) {
            Some(t) => t
                .as_func()
                .ok_or_else(|| self.err(format!("type {} is not a function type", idx))),
            None => Err(self.err(format!("unknown type {}", idx))),
        }
    }

    fn func_type(&self, func: u32) -> Result<&'a FuncType> {
        if func >= self.module.num_funcs() {
            return Err(self.err(format!("unknown function {}", func)));
        }
        self.module
            .func_type(func)
            .ok_or_else(|| self.err(format!("function {} has no function type", func)))
    }

    fn struct_type(&self, idx: u32) -> Result<&'a [FieldType]> {
        match self.module.types.get(idx as usize) {
            Some(t) => t
                .as_struct()
                .ok_or_else(|| self.err(format!("type {} is not a struct type", idx))),
            None => Err(self.err(format!("unknown type {}", idx))),
        }
    }

    fn struct_field(&self, idx: u32, field: u32) -> Result<FieldType> {
        self.struct_type(idx)?
            .get(field as usize)
            .copied()
            .ok_or_else(|| self.err(format!("unknown field {} of type {}", field, idx)))
    }

    fn array_type(&self, idx: u32) -> Result<FieldType> {
        match self.module.types.get(idx as usize) {
            Some(t) => t
                .as_array()
                .copied()
                .ok_or_else(|| self.err(format!("type {} is not an array type", idx))),
            None => Err(self.err(format!("unknown type {}", idx))),
        }
    }

    fn memory(&self, mem: u32) -> Result<MemoryType> {
        self.module
            .memory_type(mem)
            .filter(|_| mem < self.module.num_memories())
            .ok_or_else(|| self.err(format!("unknown memory {}", mem)))
    }

    fn table_elem(&self, table: u32) -> Result<RefType> {
        if table >= self.module.num_tables() {
            return Err(self.err(format!("unknown table {}", table)));
        }
        self.module
            .table_type(table)
            .map(|t| t.element)
            .ok_or_else(|| self.err(format!("unknown table {}", table)))
    }

    fn elem_segment(&self, elem: u32) -> Result<RefType> {
        self.module
            .elements
            .get(elem as usize)
            .map(|e| e.ty)
            .ok_or_else(|| self.err(format!("unknown elem segment {}", elem)))
    }

    fn data_segment(&self, data: u32) -> Result<()> {
        let count = self
            .module
            .data_count
            .ok_or_else(|| self.err("data count section required"))?;
        if data >= count {
            return Err(self.err(format!("unknown data segment {}", data)));
        }
        Ok(())
    }

    fn tag_params(&self, tag: u32) -> Result<Vec<ValType>> {
        if tag >= self.module.num_tags() {
            return Err(self.err(format!("unknown tag {}", tag)));
        }
        let tt = self
            .module
            .tag_type(tag)
            .ok_or_else(|| self.err(format!("unknown tag {}", tag)))?;
        Ok(self.func_type_at(tt.type_idx)?.params.clone())
    }

    fn check_heap_type(&self, heap: HeapType) -> Result<()> {
        if let HeapType::Concrete(idx) = heap {
            if idx as usize >= self.module.types.len() {
                return Err(self.err(format!("unknown type {}", idx)));
            }
        }
        Ok(())
    }

    fn check_val_type(&self, ty: ValType) -> Result<()> {
        match ty {
            ValType::Ref(rt) => self.check_heap_type(rt.heap),
            _ => Ok(()),
        }
    }

    fn check_memarg(&self, memarg: &MemArg, natural: u32) -> Result<MemoryType> {
        let mem = self.memory(memarg.memory)?;
        if memarg.align > natural.trailing_zeros() {
            return Err(self.err("alignment must not be larger than natural"));
        }
        if !mem.memory64 && memarg.offset > u64::from(u32::MAX) {
            return Err(self.err("offset out of range for 32-bit memory"));
        }
        Ok(mem)
    }

    fn check_local(&self, idx: u32) -> Result<ValType> {
        self.locals
            .get(idx as usize)
            .copied()
            .ok_or_else(|| self.err(format!("unknown local {}", idx)))
    }

    fn mark_initialized(&mut self, idx: u32, ty: ValType) {
        if !ty.is_defaultable() && !self.initialized.contains(&idx) {
            self.initialized.push(idx);
        }
    }

    fn is_const_op(op: &Operator) -> bool {
        match op {
            Operator::I32Const { .. }
            | Operator::I64Const { .. }
            | Operator::F32Const { .. }
            | Operator::F64Const { .. }
            | Operator::RefNull { .. }
            | Operator::RefFunc { .. }
            | Operator::GlobalGet { .. }
            | Operator::StructNew { .. }
            | Operator::StructNewDefault { .. }
            | Operator::ArrayNew { .. }
            | Operator::ArrayNewDefault { .. }
            | Operator::ArrayNewFixed { .. }
            | Operator::RefI31
            | Operator::AnyConvertExtern
            | Operator::ExternConvertAny
            | Operator::End => true,
            Operator::Numeric(n) => CONST_NUMERIC.contains(n),
            Operator::Simd { op, .. } => op.shape == SimdShape::Const,
            _ => false,
        }
    }

    // ─── Instructions ──────────────────────────────────────────────────────

    fn operator(&mut self, op: Operator) -> Result<()> {
        if self.const_globals.is_some() && !Self::is_const_op(&op) {
            return Err(self.err(format!(
                "constant expression required, found {}",
                op.name()
            )));
        }

        match op {
            Operator::Unreachable => self.unreachable()?,
            Operator::Nop => {}

            Operator::Block { ty } => {
                let (params, results) = self.block_sig(ty)?;
                self.pop_all(&params)?;
                self.push_frame(FrameKind::Block, params.clone(), results)?;
                self.push_all(&params);
            }
            Operator::Loop { ty } => {
                let (params, results) = self.block_sig(ty)?;
                self.pop_all(&params)?;
                self.push_frame(FrameKind::Loop, params.clone(), results)?;
                self.push_all(&params);
            }
            Operator::If { ty } => {
                let (params, results) = self.block_sig(ty)?;
                self.pop_expect(ValType::I32)?;
                self.pop_all(&params)?;
                self.push_frame(FrameKind::If, params.clone(), results)?;
                self.push_all(&params);
            }
            Operator::Else => {
                if self.frame()?.kind != FrameKind::If {
                    return Err(self.err("else found outside of an if block"));
                }
                let frame = self.pop_frame()?;
                self.push_frame(FrameKind::Else, frame.start_types.clone(), frame.end_types)?;
                self.push_all(&frame.start_types);
            }
            Operator::End => {
                let frame = self.pop_frame()?;
                if frame.kind == FrameKind::If && frame.start_types != frame.end_types {
                    return Err(self.err("type mismatch: if without else must not change the stack"));
                }
                if !self.frames.is_empty() {
                    self.push_all(&frame.end_types);
                }
            }

            Operator::Try { ty } => {
                let (params, results) = self.block_sig(ty)?;
                self.pop_all(&params)?;
                self.push_frame(FrameKind::Try, params.clone(), results)?;
                self.push_all(&params);
            }
            Operator::Catch { tag } => {
                if !matches!(self.frame()?.kind, FrameKind::Try | FrameKind::Catch) {
                    return Err(self.err("catch found outside of a try block"));
                }
                let params = self.tag_params(tag)?;
                let frame = self.pop_frame()?;
                self.push_frame(FrameKind::Catch, frame.start_types, frame.end_types)?;
                self.push_all(&params);
            }
            Operator::CatchAll => {
                if !matches!(self.frame()?.kind, FrameKind::Try | FrameKind::Catch) {
                    return Err(self.err("catch_all found outside of a try block"));
                }
                let frame = self.pop_frame()?;
                self.push_frame(FrameKind::CatchAll, frame.start_types, frame.end_types)?;
            }
            Operator::Delegate { depth } => {
                if self.frame()?.kind != FrameKind::Try {
                    return Err(self.err("delegate found outside of a try block"));
                }
                // The label is resolved relative to the frames enclosing the try.
                if depth as usize + 1 >= self.frames.len() {
                    return Err(self.err(format!("unknown label {}", depth)));
                }
                let frame = self.pop_frame()?;
                self.push_all(&frame.end_types);
            }
            Operator::Throw { tag } => {
                let params = self.tag_params(tag)?;
                self.pop_all(&params)?;
                self.unreachable()?;
            }
            Operator::Rethrow { depth } => {
                if !matches!(self.label(depth)?.kind, FrameKind::Catch | FrameKind::CatchAll) {
                    return Err(self.err("rethrow target is not a catch block"));
                }
                self.unreachable()?;
            }

            Operator::Br { depth } => {
                let types = self.label_types(depth)?;
                self.pop_all(&types)?;
                self.unreachable()?;
            }
            Operator::BrIf { depth } => {
                self.pop_expect(ValType::I32)?;
                let types = self.label_types(depth)?;
                self.pop_all(&types)?;
                self.push_all(&types);
            }
            Operator::BrTable { targets, default } => {
                self.pop_expect(ValType::I32)?;
                let arity = self.label_types(default)?.len();
                for depth in targets {
                    let types = self.label_types(depth)?;
                    if types.len() != arity {
                        return Err(self.err("type mismatch: br_table targets have inconsistent arity"));
                    }
                    let popped = self.pop_all(&types)?;
                    self.operands.extend(popped);
                }
                let types = self.label_types(default)?;
                self.pop_all(&types)?;
                self.unreachable()?;
            }
            Operator::Return => {
                let results = self.results.clone();
                self.pop_all(&results)?;
                self.unreachable()?;
            }

            Operator::Call { func } => {
                let ft = self.func_type(func)?;
                self.pop_all(&ft.params)?;
                self.push_all(&ft.results);
            }
            Operator::CallIndirect { type_idx, table } => {
                let ft = self.call_indirect_type(type_idx, table)?;
                self.pop_expect(ValType::I32)?;
                self.pop_all(&ft.params)?;
                self.push_all(&ft.results);
            }
            Operator::ReturnCall { func } => {
                let ft = self.func_type(func)?;
                self.check_tail_results(ft)?;
                self.pop_all(&ft.params)?;
                self.unreachable()?;
            }
            Operator::ReturnCallIndirect { type_idx, table } => {
                let ft = self.call_indirect_type(type_idx, table)?;
                self.check_tail_results(ft)?;
                self.pop_expect(ValType::I32)?;
                self.pop_all(&ft.params)?;
                self.unreachable()?;
            }
            Operator::CallRef { type_idx } => {
                let ft = self.func_type_at(type_idx)?;
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
                self.pop_all(&ft.params)?;
                self.push_all(&ft.results);
            }
            Operator::ReturnCallRef { type_idx } => {
                let ft = self.func_type_at(type_idx)?;
                self.check_tail_results(ft)?;
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
                self.pop_all(&ft.params)?;
                self.unreachable()?;
            }

            Operator::Drop => {
                self.pop()?;
            }
            Operator::Select => {
                self.pop_expect(ValType::I32)?;
                let a = self.pop()?;
                let b = self.pop()?;
                for t in [a, b] {
                    if let MaybeType::Known(ValType::Ref(_)) = t {
                        return Err(self.err("type mismatch: select without type requires numeric or vector operands"));
                    }
                }
                match (a, b) {
                    (MaybeType::Known(x), MaybeType::Known(y)) if x != y => {
                        return Err(self.err(format!(
                            "type mismatch: select operands differ ({} and {})",
                            y, x
                        )));
                    }
                    (MaybeType::Known(_), _) => self.operands.push(a),
                    _ => self.operands.push(b),
                }
            }
            Operator::TypedSelect { ty } => {
                self.check_val_type(ty)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ty)?;
                self.pop_expect(ty)?;
                self.push(ty);
            }

            Operator::LocalGet { idx } => {
                let ty = self.check_local(idx)?;
                if !ty.is_defaultable() && !self.initialized.contains(&idx) {
                    return Err(self.err(format!("uninitialized local {}", idx)));
                }
                self.push(ty);
            }
            Operator::LocalSet { idx } => {
                let ty = self.check_local(idx)?;
                self.pop_expect(ty)?;
                self.mark_initialized(idx, ty);
            }
            Operator::LocalTee { idx } => {
                let ty = self.check_local(idx)?;
                self.pop_expect(ty)?;
                self.mark_initialized(idx, ty);
                self.push(ty);
            }
            Operator::GlobalGet { idx } => {
                let gt = self
                    .module
                    .global_type(idx)
                    .filter(|_| idx < self.module.num_globals())
                    .ok_or_else(|| self.err(format!("unknown global {}", idx)))?;
                if let Some(visible) = self.const_globals {
                    if idx >= visible {
                        return Err(self.err(format!(
                            "unknown global {}: constant expressions may only read earlier globals",
                            idx
                        )));
                    }
                    if gt.mutable {
                        return Err(self.err("constant expression required: global is mutable"));
                    }
                }
                self.push(gt.content);
            }
            Operator::GlobalSet { idx } => {
                let gt = self
                    .module
                    .global_type(idx)
                    .filter(|_| idx < self.module.num_globals())
                    .ok_or_else(|| self.err(format!("unknown global {}", idx)))?;
                if !gt.mutable {
                    return Err(self.err(format!("global {} is immutable", idx)));
                }
                self.pop_expect(gt.content)?;
            }

            Operator::TableGet { table } => {
                let elem = self.table_elem(table)?;
                self.pop_expect(ValType::I32)?;
                self.push(ValType::Ref(elem));
            }
            Operator::TableSet { table } => {
                let elem = self.table_elem(table)?;
                self.pop_expect(ValType::Ref(elem))?;
                self.pop_expect(ValType::I32)?;
            }
            Operator::TableSize { table } => {
                self.table_elem(table)?;
                self.push(ValType::I32);
            }
            Operator::TableGrow { table } => {
                let elem = self.table_elem(table)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::Ref(elem))?;
                self.push(ValType::I32);
            }
            Operator::TableFill { table } => {
                let elem = self.table_elem(table)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::Ref(elem))?;
                self.pop_expect(ValType::I32)?;
            }
            Operator::TableCopy { dst, src } => {
                let d = self.table_elem(dst)?;
                let s = self.table_elem(src)?;
                if !self.sub.reference(s, d) {
                    return Err(self.err(format!("type mismatch: cannot copy {} into {}", s, d)));
                }
                self.pop_all(&[ValType::I32, ValType::I32, ValType::I32])?;
            }
            Operator::TableInit { elem, table } => {
                let t = self.table_elem(table)?;
                let e = self.elem_segment(elem)?;
                if !self.sub.reference(e, t) {
                    return Err(self.err(format!("type mismatch: cannot init {} from {}", t, e)));
                }
                self.pop_all(&[ValType::I32, ValType::I32, ValType::I32])?;
            }
            Operator::ElemDrop { elem } => {
                self.elem_segment(elem)?;
            }

            Operator::Load { op, memarg } => {
                let mem = self.check_memarg(&memarg, op.bytes())?;
                self.pop_expect(mem.index_type())?;
                self.push(op.result_type());
            }
            Operator::Store { op, memarg } => {
                let mem = self.check_memarg(&memarg, op.bytes())?;
                self.pop_expect(op.value_type())?;
                self.pop_expect(mem.index_type())?;
            }
            Operator::MemorySize { mem } => {
                let m = self.memory(mem)?;
                self.push(m.index_type());
            }
            Operator::MemoryGrow { mem } => {
                let m = self.memory(mem)?;
                self.pop_expect(m.index_type())?;
                self.push(m.index_type());
            }
            Operator::MemoryInit { data, mem } => {
                let m = self.memory(mem)?;
                self.data_segment(data)?;
                self.pop_all(&[m.index_type(), ValType::I32, ValType::I32])?;
            }
            Operator::DataDrop { data } => self.data_segment(data)?,
            Operator::MemoryCopy { dst, src } => {
                let d = self.memory(dst)?.index_type();
                let s = self.memory(src)?.index_type();
                let n = if d == ValType::I64 && s == ValType::I64 {
                    ValType::I64
                } else {
                    ValType::I32
                };
                self.pop_all(&[d, s, n])?;
            }
            Operator::MemoryFill { mem } => {
                let t = self.memory(mem)?.index_type();
                self.pop_all(&[t, ValType::I32, t])?;
            }

            Operator::I32Const { .. } => self.push(ValType::I32),
            Operator::I64Const { .. } => self.push(ValType::I64),
            Operator::F32Const { .. } => self.push(ValType::F32),
            Operator::F64Const { .. } => self.push(ValType::F64),
            Operator::Numeric(n) => {
                let (params, result) = n.signature();
                self.pop_all(params)?;
                self.push(result);
            }

            Operator::RefNull { heap } => {
                self.check_heap_type(heap)?;
                self.push(ValType::Ref(RefType::nullable(heap)));
            }
            Operator::RefIsNull => {
                self.pop_ref()?;
                self.push(ValType::I32);
            }
            Operator::RefFunc { func } => {
                self.func_type(func)?;
                if self.const_globals.is_none() && !self.ctx.declared_funcs.contains(&func) {
                    return Err(self.err(format!("undeclared function reference {}", func)));
                }
                let type_idx = self
                    .module
                    .func_type_idx(func)
                    .ok_or_else(|| self.err(format!("unknown function {}", func)))?;
                self.push(ValType::Ref(RefType::non_null(HeapType::Concrete(type_idx))));
            }
            Operator::RefEq => {
                let eqref = ValType::Ref(RefType::nullable(HeapType::Eq));
                self.pop_expect(eqref)?;
                self.pop_expect(eqref)?;
                self.push(ValType::I32);
            }
            Operator::RefAsNonNull => match self.pop_ref()? {
                Some(rt) => self.push(ValType::Ref(RefType::non_null(rt.heap))),
                None => self.operands.push(MaybeType::Unknown),
            },
            Operator::BrOnNull { depth } => {
                let rt = self.pop_ref()?;
                let types = self.label_types(depth)?;
                self.pop_all(&types)?;
                self.push_all(&types);
                match rt {
                    Some(rt) => self.push(ValType::Ref(RefType::non_null(rt.heap))),
                    None => self.operands.push(MaybeType::Unknown),
                }
            }
            Operator::BrOnNonNull { depth } => {
                let rt = self.pop_ref()?;
                let types = self.label_types(depth)?;
                let Some((last, rest)) = types.split_last() else {
                    return Err(self.err("type mismatch: br_on_non_null target has no values"));
                };
                if let Some(rt) = rt {
                    let nn = ValType::Ref(RefType::non_null(rt.heap));
                    if !self.sub.val(nn, *last) {
                        return Err(self.err(format!(
                            "type mismatch: expected {}, found {}",
                            last, nn
                        )));
                    }
                } else if !matches!(last, ValType::Ref(_)) {
                    return Err(self.err("type mismatch: br_on_non_null target must take a reference"));
                }
                self.pop_all(rest)?;
                self.push_all(rest);
            }

            Operator::StructNew { type_idx } => {
                let fields = self.struct_type(type_idx)?;
                let types: Vec<ValType> = fields.iter().map(|f| f.storage.unpacked()).collect();
                self.pop_all(&types)?;
                self.push(ValType::Ref(RefType::non_null(HeapType::Concrete(type_idx))));
            }
            Operator::StructNewDefault { type_idx } => {
                let fields = self.struct_type(type_idx)?;
                if fields.iter().any(|f| !f.storage.unpacked().is_defaultable()) {
                    return Err(self.err("struct.new_default requires defaultable fields"));
                }
                self.push(ValType::Ref(RefType::non_null(HeapType::Concrete(type_idx))));
            }
            Operator::StructGet { type_idx, field } => {
                let f = self.struct_field(type_idx, field)?;
                if f.storage.is_packed() {
                    return Err(self.err("struct.get on a packed field requires get_s or get_u"));
                }
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
                self.push(f.storage.unpacked());
            }
            Operator::StructGetS { type_idx, field } | Operator::StructGetU { type_idx, field } => {
                let f = self.struct_field(type_idx, field)?;
                if !f.storage.is_packed() {
                    return Err(self.err("struct.get_s/get_u requires a packed field"));
                }
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
                self.push(ValType::I32);
            }
            Operator::StructSet { type_idx, field } => {
                let f = self.struct_field(type_idx, field)?;
                if !f.mutable {
                    return Err(self.err(format!("field {} is immutable", field)));
                }
                self.pop_expect(f.storage.unpacked())?;
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
            }
            Operator::ArrayNew { type_idx } => {
                let elem = self.array_type(type_idx)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(elem.storage.unpacked())?;
                self.push(ValType::Ref(RefType::non_null(HeapType::Concrete(type_idx))));
            }
            Operator::ArrayNewDefault { type_idx } => {
                let elem = self.array_type(type_idx)?;
                if !elem.storage.unpacked().is_defaultable() {
                    return Err(self.err("array.new_default requires a defaultable element type"));
                }
                self.pop_expect(ValType::I32)?;
                self.push(ValType::Ref(RefType::non_null(HeapType::Concrete(type_idx))));
            }
            Operator::ArrayNewFixed { type_idx, len } => {
                let elem = self.array_type(type_idx)?;
                if len as usize > self.limits.max_vector_size {
                    return Err(self.err(format!("array.new_fixed length {} exceeds limit", len)));
                }
                for _ in 0..len {
                    self.pop_expect(elem.storage.unpacked())?;
                }
                self.push(ValType::Ref(RefType::non_null(HeapType::Concrete(type_idx))));
            }
            Operator::ArrayGet { type_idx } => {
                let elem = self.array_type(type_idx)?;
                if elem.storage.is_packed() {
                    return Err(self.err("array.get on a packed array requires get_s or get_u"));
                }
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
                self.push(elem.storage.unpacked());
            }
            Operator::ArrayGetS { type_idx } | Operator::ArrayGetU { type_idx } => {
                let elem = self.array_type(type_idx)?;
                if !elem.storage.is_packed() {
                    return Err(self.err("array.get_s/get_u requires a packed array"));
                }
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
                self.push(ValType::I32);
            }
            Operator::ArraySet { type_idx } => {
                let elem = self.array_type(type_idx)?;
                if !elem.mutable {
                    return Err(self.err(format!("array type {} is immutable", type_idx)));
                }
                self.pop_expect(elem.storage.unpacked())?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Concrete(type_idx))))?;
            }
            Operator::ArrayLen => {
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Array)))?;
                self.push(ValType::I32);
            }
            Operator::ArrayNewData { .. }
            | Operator::ArrayNewElem { .. }
            | Operator::ArrayFill { .. }
            | Operator::ArrayCopy { .. }
            | Operator::ArrayInitData { .. }
            | Operator::ArrayInitElem { .. } => {
                return Err(self.err(format!("unsupported instruction {}", op.name())));
            }
            Operator::RefTest { heap, nullable } => {
                self.check_heap_type(heap)?;
                let rt = self.pop_ref()?;
                self.check_same_hierarchy(rt, heap)?;
                let _ = nullable;
                self.push(ValType::I32);
            }
            Operator::RefCast { heap, nullable } => {
                self.check_heap_type(heap)?;
                let rt = self.pop_ref()?;
                self.check_same_hierarchy(rt, heap)?;
                self.push(ValType::Ref(RefType { nullable, heap }));
            }
            Operator::BrOnCast { depth, from, to } | Operator::BrOnCastFail { depth, from, to } => {
                let on_fail = matches!(op, Operator::BrOnCastFail { .. });
                let rt1 = RefType {
                    nullable: from.0,
                    heap: from.1,
                };
                let rt2 = RefType {
                    nullable: to.0,
                    heap: to.1,
                };
                self.check_heap_type(rt1.heap)?;
                self.check_heap_type(rt2.heap)?;
                if !self.sub.reference(rt2, rt1) {
                    return Err(self.err(format!(
                        "type mismatch: cast target {} is not a subtype of {}",
                        rt2, rt1
                    )));
                }
                // Type of the value when the cast fails.
                let diff = RefType {
                    nullable: rt1.nullable && !rt2.nullable,
                    heap: rt1.heap,
                };
                let (branch_ty, fall_ty) = if on_fail { (diff, rt2) } else { (rt2, diff) };
                self.pop_expect(ValType::Ref(rt1))?;
                let types = self.label_types(depth)?;
                let Some((last, rest)) = types.split_last() else {
                    return Err(self.err("type mismatch: cast branch target has no values"));
                };
                if !self.sub.val(ValType::Ref(branch_ty), *last) {
                    return Err(self.err(format!(
                        "type mismatch: expected {}, found {}",
                        last, branch_ty
                    )));
                }
                self.pop_all(rest)?;
                self.push_all(rest);
                self.push(ValType::Ref(fall_ty));
            }
            Operator::AnyConvertExtern => {
                let rt = self.pop_expect(ValType::EXTERNREF)?;
                let nullable = rt.as_ref_type().map_or(true, |r| r.nullable);
                self.push(ValType::Ref(RefType {
                    nullable,
                    heap: HeapType::Any,
                }));
            }
            Operator::ExternConvertAny => {
                let rt = self.pop_expect(ValType::Ref(RefType::nullable(HeapType::Any)))?;
                let nullable = rt.as_ref_type().map_or(true, |r| r.nullable);
                self.push(ValType::Ref(RefType {
                    nullable,
                    heap: HeapType::Extern,
                }));
            }
            Operator::RefI31 => {
                self.pop_expect(ValType::I32)?;
                self.push(ValType::Ref(RefType::non_null(HeapType::I31)));
            }
            Operator::I31GetS | Operator::I31GetU => {
                self.pop_expect(ValType::Ref(RefType::nullable(HeapType::I31)))?;
                self.push(ValType::I32);
            }

            Operator::Simd { op: info, imm } => self.simd(info.shape, imm)?,
        }
        Ok(())
    }

    fn call_indirect_type(&self, type_idx: u32, table: u32) -> Result<&'a FuncType> {
        let elem = self.table_elem(table)?;
        if !self.sub.reference(elem, RefType::FUNCREF) {
            return Err(self.err(format!("type mismatch: table {} is not a funcref table", table)));
        }
        self.func_type_at(type_idx)
    }

    fn check_tail_results(&self, callee: &FuncType) -> Result<()> {
        let ok = callee.results.len() == self.results.len()
            && callee
                .results
                .iter()
                .zip(&self.results)
                .all(|(c, r)| self.sub.val(*c, *r));
        if !ok {
            return Err(self.err(format!(
                "type mismatch: tail call results {:?} do not match function results {:?}",
                callee.results, self.results
            )));
        }
        Ok(())
    }

    fn check_same_hierarchy(&self, operand: Option<RefType>, target: HeapType) -> Result<()> {
        if let Some(rt) = operand {
            if self.sub.hierarchy(rt.heap) != self.sub.hierarchy(target) {
                return Err(self.err(format!(
                    "type mismatch: cannot cast {} to {}",
                    rt, target
                )));
            }
        }
        Ok(())
    }

    fn simd(&mut self, shape: SimdShape, imm: SimdImm) -> Result<()> {
        let mut addr = ValType::I32;
        match (shape, imm) {
            (SimdShape::Load { align } | SimdShape::Store { align }, SimdImm::MemArg(m)) => {
                addr = self.check_simd_memarg(&m, align)?;
            }
            (
                SimdShape::LoadLane { align, lanes } | SimdShape::StoreLane { align, lanes },
                SimdImm::MemArgLane(m, lane),
            ) => {
                addr = self.check_simd_memarg(&m, align)?;
                if lane >= lanes {
                    return Err(self.err(format!("invalid lane index {}", lane)));
                }
            }
            (
                SimdShape::ExtractLane { lanes, .. } | SimdShape::ReplaceLane { lanes, .. },
                SimdImm::Lane(lane),
            ) => {
                if lane >= lanes {
                    return Err(self.err(format!("invalid lane index {}", lane)));
                }
            }
            (SimdShape::Shuffle, SimdImm::Shuffle(lanes)) => {
                if lanes.iter().any(|l| *l >= 32) {
                    return Err(self.err("invalid lane index in shuffle"));
                }
            }
            _ => {}
        }
        let (params, result) = shape.signature(addr);
        self.pop_all(&params)?;
        if let Some(r) = result {
            self.push(r);
        }
        Ok(())
    }

    fn check_simd_memarg(&self, memarg: &MemArg, max_align: u32) -> Result<ValType> {
        let mem = self.memory(memarg.memory)?;
        if memarg.align > max_align {
            return Err(self.err("alignment must not be larger than natural"));
        }
        if !mem.memory64 && memarg.offset > u64::from(u32::MAX) {
            return Err(self.err("offset out of range for 32-bit memory"));
        }
        Ok(mem.index_type())
    }
}
