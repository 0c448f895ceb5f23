//! Core IR builder state and control flow management.
//!
//! This module contains the `IrBuilder` state machine that translates Wasm bytecode
//! to SSA-form IR by simulating the Wasm evaluation stack.

use super::super::types::*;
use crate::decoder::{BlockType, Module, OperatorsReader, ValType};
use crate::error::CompileError;
use crate::stack::SymbolicStack;
use crate::CompileOptions;
use anyhow::{bail, Context, Result};
use wasm2qbe_abi::RuntimeFn;

/// Control flow frame for tracking nested blocks/loops/if/try.
#[derive(Debug, Clone)]
pub(super) struct ControlFrame {
    pub(super) kind: ControlKind,

    pub(super) params: Vec<ValType>,
    pub(super) results: Vec<ValType>,

    /// Operand stack height below the frame's parameters.
    pub(super) height: usize,

    /// Continuation block (where forward branches go). Allocated on the first
    /// branch to the frame, so blocks nobody branches to cost nothing.
    pub(super) cont: Option<BlockId>,

    /// Phi destinations of `cont`, one per result.
    pub(super) cont_phis: Vec<VarId>,

    /// Loop header (where backward branches go) and its parameter phis.
    pub(super) header: Option<BlockId>,
    pub(super) header_phis: Vec<VarId>,

    /// Else block (for If constructs - where the false branch goes)
    pub(super) else_block: Option<BlockId>,

    /// Values the else arm starts with.
    pub(super) if_params: Vec<VarId>,

    /// Handler state of `try` frames.
    pub(super) exception: Option<ExceptionState>,
}

/// Dispatch state of a `try` frame.
#[derive(Debug, Clone)]
pub(super) struct ExceptionState {
    /// Entered when the handler pushed by `try` receives an exception.
    pub(super) dispatch: BlockId,
    /// The caught exception and its tag, read in `dispatch`.
    pub(super) exn: Option<VarId>,
    pub(super) tag: Option<VarId>,
    /// Where the next `catch` clause tests its tag.
    pub(super) chain: Option<BlockId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ControlKind {
    Function,
    Block,
    Loop,
    If,
    Else,
    /// Inside a try body: a handler is installed.
    Try,
    Catch,
    CatchAll,
}

/// Where a branch to a label goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BranchTarget {
    /// The label is the function body: the branch returns.
    Return,
    Block { block: BlockId, has_phis: bool },
}

/// IR builder state for one function.
pub struct IrBuilder<'m> {
    pub(super) module: &'m Module,
    pub(super) self_tail_call_loops: bool,

    /// Function being translated, `None` for the module initialiser.
    pub(super) func_idx: Option<u32>,

    /// All blocks created so far, indexed by `BlockId`.
    pub(super) blocks: Vec<IrBlock>,

    /// Current block being built
    pub(super) current_block: BlockId,

    /// Type of every variable allocated so far, indexed by `VarId`.
    pub(super) var_types: Vec<ValType>,

    /// Wasm value stack (SSA variables instead of actual values)
    pub(super) value_stack: SymbolicStack<VarId>,

    /// Control flow stack for nested block/loop/if/try
    pub(super) control_stack: Vec<ControlFrame>,

    pub(super) params: Vec<ValType>,
    pub(super) results: Vec<ValType>,

    /// Types of all local slots, parameters first.
    pub(super) locals: Vec<ValType>,

    /// Whether the current position can execute. Cleared by unconditional
    /// transfers, set again when a block with predecessors is entered.
    pub(super) reachable: bool,

    /// Structured instructions opened while unreachable; they get no frame.
    pub(super) dead_depth: u32,

    /// Offset of the operator being translated, for diagnostics.
    pub(super) offset: usize,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m Module, options: &CompileOptions) -> Self {
        Self {
            module,
            self_tail_call_loops: options.self_tail_call_loops,
            func_idx: None,
            blocks: Vec::new(),
            current_block: BlockId(0),
            var_types: Vec::new(),
            value_stack: SymbolicStack::new(),
            control_stack: Vec::new(),
            params: Vec::new(),
            results: Vec::new(),
            locals: Vec::new(),
            reachable: false,
            dead_depth: 0,
            offset: 0,
        }
    }

    /// Reset per-function state and open the entry block and function frame.
    ///
    /// INVARIANT: the entry block is the first block created, `BlockId(0)`.
    pub(super) fn begin(
        &mut self,
        func_idx: Option<u32>,
        params: Vec<ValType>,
        results: Vec<ValType>,
        locals: Vec<ValType>,
    ) {
        self.func_idx = func_idx;
        self.blocks.clear();
        self.var_types.clear();
        self.value_stack.clear();
        self.control_stack.clear();
        self.params = params;
        self.results = results.clone();
        self.locals = locals;
        self.dead_depth = 0;
        self.offset = 0;

        let entry = self.new_block();
        self.switch_to(entry);
        self.control_stack
            .push(Self::frame(ControlKind::Function, Vec::new(), results, 0));
    }

    /// Package the blocks built since `begin`.
    pub(super) fn finish(&mut self, name: String, type_idx: Option<u32>) -> IrFunction {
        IrFunction {
            func_idx: self.func_idx,
            name,
            type_idx,
            params: std::mem::take(&mut self.params),
            results: std::mem::take(&mut self.results),
            locals: std::mem::take(&mut self.locals),
            blocks: std::mem::take(&mut self.blocks),
            entry_block: BlockId(0),
            var_types: std::mem::take(&mut self.var_types),
        }
    }

    /// Translate defined function `func_idx` (function index space).
    pub fn translate_function(&mut self, func_idx: u32) -> Result<IrFunction, CompileError> {
        let name = self.module.func_name(func_idx);
        self.translate_body(func_idx).map_err(|err| CompileError {
            func_idx,
            instr_offset: self.offset,
            func_name: name.clone(),
            message: format!("{:#}", err),
        })?;
        let type_idx = self.module.func_type_idx(func_idx);
        log::debug!(
            "built {} ({} blocks, {} vars)",
            name,
            self.blocks.len(),
            self.var_types.len()
        );
        Ok(self.finish(name, type_idx))
    }

    fn translate_body(&mut self, func_idx: u32) -> Result<()> {
        let module = self.module;
        let defined = func_idx
            .checked_sub(module.num_imported_funcs())
            .context("function is imported")?;
        let body = module
            .code
            .get(defined as usize)
            .context("function has no body")?;
        let ty = module
            .func_type(func_idx)
            .context("function has no function type")?;

        let mut locals = ty.params.clone();
        locals.extend(body.local_types());
        self.begin(Some(func_idx), ty.params.clone(), ty.results.clone(), locals);

        let mut reader = OperatorsReader::new(&body.code, body.code_offset, usize::MAX);
        while !reader.is_eof() {
            let (offset, op) = reader.read()?;
            self.offset = offset;
            log::trace!("{:#x}: {}", offset, op.name());
            self.translate_operator(op)
                .with_context(|| format!("translating operator at offset {:#x}", offset))?;
        }
        if !self.control_stack.is_empty() {
            bail!("function body ended with {} open frames", self.control_stack.len());
        }
        Ok(())
    }

    pub(super) fn frame(
        kind: ControlKind,
        params: Vec<ValType>,
        results: Vec<ValType>,
        height: usize,
    ) -> ControlFrame {
        ControlFrame {
            kind,
            params,
            results,
            height,
            cont: None,
            cont_phis: Vec::new(),
            header: None,
            header_phis: Vec::new(),
            else_block: None,
            if_params: Vec::new(),
            exception: None,
        }
    }

    // ─── Allocation ────────────────────────────────────────────────────────

    /// Allocate a new SSA variable.
    pub(super) fn new_var(&mut self, ty: ValType) -> VarId {
        let id = VarId(self.var_types.len() as u32);
        self.var_types.push(ty);
        id
    }

    /// Allocate a new basic block.
    pub(super) fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(IrBlock {
            id,
            phis: Vec::new(),
            instructions: Vec::new(),
            terminator: IrTerminator::Unreachable,
        });
        id
    }

    pub(super) fn var_type(&self, var: VarId) -> ValType {
        self.var_types[var.0 as usize]
    }

    // ─── Emission ──────────────────────────────────────────────────────────

    /// Emit an instruction to the current block.
    pub(super) fn emit(&mut self, instr: IrInstr) {
        self.blocks[self.current_block.0 as usize]
            .instructions
            .push(instr);
    }

    /// Set the terminator for the current block. The operand stack is left
    /// alone; see [`Self::mark_unreachable`].
    pub(super) fn terminate(&mut self, term: IrTerminator) {
        self.blocks[self.current_block.0 as usize].terminator = term;
    }

    /// Code after an unconditional transfer is dead until the frame's next
    /// `else`/`catch`/`end`.
    pub(super) fn mark_unreachable(&mut self) -> Result<()> {
        let height = self.top_frame()?.height;
        self.value_stack.truncate(height);
        self.reachable = false;
        Ok(())
    }

    /// Continue emitting into `block`.
    pub(super) fn switch_to(&mut self, block: BlockId) {
        self.current_block = block;
        self.reachable = true;
    }

    pub(super) fn emit_const(&mut self, value: IrValue) -> VarId {
        let dest = self.new_var(value.ty());
        self.emit(IrInstr::Const { dest, value });
        dest
    }

    pub(super) fn emit_binop(&mut self, op: BinOp, lhs: VarId, rhs: VarId) -> VarId {
        let dest = self.new_var(op.result_type());
        self.emit(IrInstr::BinOp { dest, op, lhs, rhs });
        dest
    }

    pub(super) fn emit_unop(&mut self, op: UnOp, operand: VarId) -> VarId {
        let dest = self.new_var(op.result_type());
        self.emit(IrInstr::UnOp { dest, op, operand });
        dest
    }

    pub(super) fn emit_select(&mut self, cond: VarId, if_true: VarId, if_false: VarId) -> VarId {
        let dest = self.new_var(self.var_type(if_true));
        self.emit(IrInstr::Select {
            dest,
            cond,
            if_true,
            if_false,
        });
        dest
    }

    /// Call a runtime helper; the result variable takes `result_ty`.
    pub(super) fn emit_runtime(
        &mut self,
        func: RuntimeFn,
        args: Vec<VarId>,
        result_ty: Option<ValType>,
    ) -> Option<VarId> {
        let dest = result_ty.map(|ty| self.new_var(ty));
        self.emit(IrInstr::CallRuntime { dest, func, args });
        dest
    }

    /// Call a runtime helper that returns a value.
    pub(super) fn emit_runtime_value(
        &mut self,
        func: RuntimeFn,
        args: Vec<VarId>,
        result_ty: ValType,
    ) -> Result<VarId> {
        self.emit_runtime(func, args, Some(result_ty))
            .with_context(|| format!("runtime helper {:?} returned no value", func))
    }

    /// Call a helper that never returns and close the block.
    pub(super) fn emit_noreturn(&mut self, func: RuntimeFn, args: Vec<VarId>) -> Result<()> {
        self.emit(IrInstr::CallRuntime {
            dest: None,
            func,
            args,
        });
        self.terminate(IrTerminator::Halt);
        self.mark_unreachable()
    }

    pub(super) fn emit_trap_if(&mut self, cond: VarId, trap: wasm2qbe_abi::TrapKind) {
        self.emit(IrInstr::TrapIf { cond, trap });
    }

    /// Trap with `null_reference` when `r` is null.
    pub(super) fn emit_null_check(&mut self, r: VarId) {
        let zero = self.emit_const(IrValue::I64(0));
        let is_null = self.emit_binop(BinOp::I64Eq, r, zero);
        self.emit_trap_if(is_null, wasm2qbe_abi::TrapKind::NullReference);
    }

    /// Zero (or null) value of `ty`.
    pub(super) fn emit_zero(&mut self, ty: ValType) -> VarId {
        match IrValue::zero(ty) {
            Some(value) => {
                let dest = self.new_var(ty);
                self.emit(IrInstr::Const { dest, value });
                dest
            }
            None => {
                let dest = self.new_var(ValType::V128);
                self.emit(IrInstr::CallSimd {
                    dest: Some(dest),
                    name: "v128.const",
                    args: vec![SimdArg::Imm(0), SimdArg::Imm(0)],
                });
                dest
            }
        }
    }

    /// Widen an i32 address or length to 64 bits; i64 values pass through.
    pub(super) fn emit_to_i64(&mut self, v: VarId) -> VarId {
        if self.var_type(v) == ValType::I32 {
            self.emit_unop(UnOp::I64ExtendI32U, v)
        } else {
            v
        }
    }

    // ─── Operand stack ─────────────────────────────────────────────────────

    pub(super) fn push(&mut self, var: VarId) {
        self.value_stack.push(var);
    }

    pub(super) fn push_all(&mut self, vars: &[VarId]) {
        self.value_stack.extend(vars.iter().copied());
    }

    pub(super) fn pop(&mut self) -> Result<VarId> {
        let height = self.top_frame()?.height;
        if self.value_stack.len() <= height {
            bail!("operand stack underflow");
        }
        self.value_stack.pop().context("operand stack underflow")
    }

    /// Pop `n` values, returned bottom-first.
    pub(super) fn pop_n(&mut self, n: usize) -> Result<Vec<VarId>> {
        let height = self.top_frame()?.height;
        if self.value_stack.len() < height + n {
            bail!("operand stack underflow: need {} values", n);
        }
        self.value_stack
            .pop_n(n)
            .context("operand stack underflow")
    }

    /// The top `n` values without popping them, bottom-first.
    pub(super) fn peek_n(&self, n: usize) -> Result<Vec<VarId>> {
        let height = self.top_frame()?.height;
        if self.value_stack.len() < height + n {
            bail!("operand stack underflow: need {} values", n);
        }
        self.value_stack
            .peek_n(n)
            .map(<[VarId]>::to_vec)
            .context("operand stack underflow")
    }

    // ─── Control frames ────────────────────────────────────────────────────

    pub(super) fn top_frame(&self) -> Result<&ControlFrame> {
        self.control_stack
            .last()
            .context("control stack underflow")
    }

    pub(super) fn top_frame_mut(&mut self) -> Result<&mut ControlFrame> {
        self.control_stack
            .last_mut()
            .context("control stack underflow")
    }

    /// Push a control frame whose parameters are the top `params.len()`
    /// values of the stack.
    pub(super) fn push_control(
        &mut self,
        kind: ControlKind,
        params: Vec<ValType>,
        results: Vec<ValType>,
    ) -> Result<&mut ControlFrame> {
        let height = self
            .value_stack
            .len()
            .checked_sub(params.len())
            .context("operand stack underflow at block entry")?;
        self.control_stack
            .push(Self::frame(kind, params, results, height));
        self.top_frame_mut()
    }

    /// Pop a control frame from the control stack.
    pub(super) fn pop_control(&mut self) -> Result<ControlFrame> {
        self.control_stack
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Control stack underflow"))
    }

    /// Index into `control_stack` of the frame at relative depth `depth`.
    ///
    /// Depth 0 = innermost frame, depth 1 = next outer, etc.
    pub(super) fn frame_index(&self, depth: u32) -> Result<usize> {
        self.control_stack
            .len()
            .checked_sub(depth as usize + 1)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Branch depth {} exceeds control stack depth {}",
                    depth,
                    self.control_stack.len()
                )
            })
    }

    pub(super) fn block_signature(&self, ty: BlockType) -> Result<(Vec<ValType>, Vec<ValType>)> {
        match ty {
            BlockType::Empty => Ok((Vec::new(), Vec::new())),
            BlockType::Value(vt) => Ok((Vec::new(), vec![vt])),
            BlockType::Func(idx) => {
                let ft = self
                    .module
                    .func_type_at(idx)
                    .with_context(|| format!("block type {} is not a function type", idx))?;
                Ok((ft.params.clone(), ft.results.clone()))
            }
        }
    }

    /// Number of values a branch to depth `depth` carries.
    pub(super) fn label_arity(&self, depth: u32) -> Result<usize> {
        let frame = &self.control_stack[self.frame_index(depth)?];
        Ok(match frame.kind {
            ControlKind::Loop => frame.params.len(),
            _ => frame.results.len(),
        })
    }

    /// The continuation of frame `idx`, allocated with its phis on first use.
    pub(super) fn cont_of(&mut self, idx: usize) -> BlockId {
        if let Some(cont) = self.control_stack[idx].cont {
            return cont;
        }
        let cont = self.new_block();
        let results = self.control_stack[idx].results.clone();
        let phis: Vec<VarId> = results.iter().map(|ty| self.new_var(*ty)).collect();
        self.blocks[cont.0 as usize].phis = phis
            .iter()
            .map(|dest| IrPhi {
                dest: *dest,
                incoming: Vec::new(),
            })
            .collect();
        let frame = &mut self.control_stack[idx];
        frame.cont = Some(cont);
        frame.cont_phis = phis;
        cont
    }

    /// Record `values` as the phi operands of `target` for the edge from `from`.
    pub(super) fn add_phi_incoming(
        &mut self,
        target: BlockId,
        from: BlockId,
        values: &[VarId],
    ) -> Result<()> {
        let phis = &mut self.blocks[target.0 as usize].phis;
        if phis.len() != values.len() {
            bail!(
                "branch to {} carries {} values for {} phis",
                target,
                values.len(),
                phis.len()
            );
        }
        for (phi, value) in phis.iter_mut().zip(values) {
            phi.incoming.push((from, *value));
        }
        Ok(())
    }

    /// Resolve the label at `depth` and count the exception handlers that a
    /// branch to it leaves.
    pub(super) fn branch_target(&mut self, depth: u32) -> Result<(BranchTarget, usize)> {
        let idx = self.frame_index(depth)?;
        let target = match self.control_stack[idx].kind {
            ControlKind::Function => BranchTarget::Return,
            ControlKind::Loop => {
                let frame = &self.control_stack[idx];
                BranchTarget::Block {
                    block: frame.header.context("loop frame without header")?,
                    has_phis: !frame.header_phis.is_empty(),
                }
            }
            _ => {
                let block = self.cont_of(idx);
                BranchTarget::Block {
                    block,
                    has_phis: !self.control_stack[idx].results.is_empty(),
                }
            }
        };
        let pops = match target {
            BranchTarget::Return => self.handlers_above(0),
            BranchTarget::Block { .. } => self.handlers_above(idx),
        };
        Ok((target, pops))
    }

    /// Installed handlers in frames `from..`.
    pub(super) fn handlers_above(&self, from: usize) -> usize {
        self.control_stack[from..]
            .iter()
            .filter(|f| f.kind == ControlKind::Try)
            .count()
    }

    pub(super) fn emit_handler_pops(&mut self, n: usize) {
        for _ in 0..n {
            self.emit_runtime(RuntimeFn::PopExceptionHandler, Vec::new(), None);
        }
    }

    /// Leave the current block towards `target` with `values`: pop handlers,
    /// then return or jump (recording phi operands).
    pub(super) fn emit_branch(
        &mut self,
        target: BranchTarget,
        pops: usize,
        values: Vec<VarId>,
    ) -> Result<()> {
        self.emit_handler_pops(pops);
        match target {
            BranchTarget::Return => self.terminate(IrTerminator::Return { values }),
            BranchTarget::Block { block, .. } => {
                let from = self.current_block;
                self.add_phi_incoming(block, from, &values)?;
                self.terminate(IrTerminator::Jump { target: block });
            }
        }
        Ok(())
    }

    /// Branch to `depth` when `cond` is non-zero, continuing in a fresh
    /// block otherwise. The carried values stay on the stack. Edges that
    /// need phi operands or handler pops get their own block, so a block
    /// with phis is only ever entered by `Jump`.
    pub(super) fn branch_if(&mut self, cond: VarId, depth: u32) -> Result<()> {
        let arity = self.label_arity(depth)?;
        let values = self.peek_n(arity)?;
        let (target, pops) = self.branch_target(depth)?;
        let fall = self.new_block();
        match target {
            BranchTarget::Block {
                block,
                has_phis: false,
            } if pops == 0 => {
                self.terminate(IrTerminator::BranchIf {
                    condition: cond,
                    if_true: block,
                    if_false: fall,
                });
            }
            _ => {
                let edge = self.new_block();
                self.terminate(IrTerminator::BranchIf {
                    condition: cond,
                    if_true: edge,
                    if_false: fall,
                });
                self.switch_to(edge);
                self.emit_branch(target, pops, values)?;
            }
        }
        self.switch_to(fall);
        Ok(())
    }

    /// Fall off the end of frame `idx` into its continuation.
    pub(super) fn fallthrough_to_cont(&mut self, idx: usize) -> Result<()> {
        let arity = self.control_stack[idx].results.len();
        let values = self.pop_n(arity)?;
        let cont = self.cont_of(idx);
        let from = self.current_block;
        self.add_phi_incoming(cont, from, &values)?;
        self.terminate(IrTerminator::Jump { target: cont });
        self.reachable = false;
        Ok(())
    }

    /// After popping `frame`, continue in its continuation (pushing the
    /// phi results) or stay unreachable if nothing branches there.
    pub(super) fn enter_cont(&mut self, frame: &ControlFrame) {
        self.value_stack.truncate(frame.height);
        match frame.cont {
            Some(cont) => {
                self.switch_to(cont);
                self.push_all(&frame.cont_phis);
            }
            None => self.reachable = false,
        }
    }
}
