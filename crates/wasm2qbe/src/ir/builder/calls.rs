//! Direct, indirect and reference calls, including their tail-call forms.

use super::core::{BranchTarget, IrBuilder};
use crate::decoder::ValType;
use crate::ir::types::*;
use anyhow::{Context, Result};
use wasm2qbe_abi::{RuntimeFn, TrapKind, FUNCREF_TYPE_OFFSET};

impl<'m> IrBuilder<'m> {
    pub(super) fn translate_call(&mut self, func: u32, tail: bool) -> Result<()> {
        let ft = self
            .module
            .func_type(func)
            .with_context(|| format!("call to unknown function {}", func))?;
        let (params, results) = (ft.params.clone(), ft.results.clone());
        let args = self.pop_n(params.len())?;

        if tail && self.self_tail_call_loops && self.func_idx == Some(func) {
            return self.self_tail_call(args);
        }

        if tail {
            self.emit_handler_pops(self.handlers_above(0));
        }
        let dests: Vec<VarId> = results.iter().map(|ty| self.new_var(*ty)).collect();
        self.emit(IrInstr::Call {
            dests: dests.clone(),
            func,
            args,
        });
        self.finish_call(dests, tail)
    }

    /// `return_call` to the function itself: rebind the parameters, reset
    /// the other locals and jump back to the entry block.
    fn self_tail_call(&mut self, args: Vec<VarId>) -> Result<()> {
        let num_params = args.len();
        for (local, value) in args.into_iter().enumerate() {
            self.emit(IrInstr::LocalSet {
                local: local as u32,
                value,
            });
        }
        let declared: Vec<ValType> = self.locals[num_params..].to_vec();
        for (i, ty) in declared.into_iter().enumerate() {
            let value = self.emit_zero(ty);
            self.emit(IrInstr::LocalSet {
                local: (num_params + i) as u32,
                value,
            });
        }
        self.emit_handler_pops(self.handlers_above(0));
        self.terminate(IrTerminator::Jump { target: BlockId(0) });
        log::trace!("self tail call lowered to a jump");
        self.mark_unreachable()
    }

    /// `call_indirect`: fetch the descriptor, check it is non-null and has
    /// the expected signature, then call through it.
    pub(super) fn translate_call_indirect(
        &mut self,
        type_idx: u32,
        table: u32,
        tail: bool,
    ) -> Result<()> {
        let index = self.pop()?;
        let params = self.call_params(type_idx)?;
        let args = self.pop_n(params.len())?;

        let table_var = self.emit_const(IrValue::I32(table as i32));
        let target = self.emit_runtime_value(
            RuntimeFn::TableGet,
            vec![table_var, index],
            ValType::FUNCREF,
        )?;
        self.emit_null_check(target);

        let actual = self.new_var(ValType::I64);
        self.emit(IrInstr::FieldLoad {
            dest: actual,
            ty: ValType::I64,
            width: MemoryAccessWidth::Full,
            sign: None,
            base: target,
            offset: FUNCREF_TYPE_OFFSET as u32,
        });
        let canonical = self.module.canonical_type_idx(type_idx);
        let expected = self.emit_const(IrValue::I64(canonical as i64));
        let mismatch = self.emit_binop(BinOp::I64Ne, actual, expected);
        self.emit_trap_if(mismatch, TrapKind::CastFailure);

        self.emit_call_ref(type_idx, target, args, tail)
    }

    pub(super) fn translate_call_ref(&mut self, type_idx: u32, tail: bool) -> Result<()> {
        let target = self.pop()?;
        let params = self.call_params(type_idx)?;
        let args = self.pop_n(params.len())?;
        self.emit_null_check(target);
        self.emit_call_ref(type_idx, target, args, tail)
    }

    fn emit_call_ref(
        &mut self,
        type_idx: u32,
        target: VarId,
        args: Vec<VarId>,
        tail: bool,
    ) -> Result<()> {
        let results = self
            .module
            .func_type_at(type_idx)
            .with_context(|| format!("type {} is not a function type", type_idx))?
            .results
            .clone();
        if tail {
            self.emit_handler_pops(self.handlers_above(0));
        }
        let dests: Vec<VarId> = results.iter().map(|ty| self.new_var(*ty)).collect();
        self.emit(IrInstr::CallRef {
            dests: dests.clone(),
            type_idx,
            target,
            args,
        });
        self.finish_call(dests, tail)
    }

    /// Push the call results, or return them for a tail call. Handlers were
    /// popped before the call.
    fn finish_call(&mut self, dests: Vec<VarId>, tail: bool) -> Result<()> {
        if tail {
            self.emit_branch(BranchTarget::Return, 0, dests)?;
            self.mark_unreachable()
        } else {
            self.push_all(&dests);
            Ok(())
        }
    }

    fn call_params(&self, type_idx: u32) -> Result<Vec<ValType>> {
        Ok(self
            .module
            .func_type_at(type_idx)
            .with_context(|| format!("type {} is not a function type", type_idx))?
            .params
            .clone())
    }
}
