//! Legacy exception handling: try, catch, catch_all, throw, rethrow and
//! delegate.
//!
//! A `try` installs a runtime handler and branches on its result:
//!
//! ```text
//!   h = push_exception_handler()
//!   jnz h, @dispatch, @body
//! @dispatch:                     ; exception delivered, handler removed
//!   exn = get_exception()
//!   tag = exception_tag(exn)
//!   jnz tag == T0, @catch0, @next0
//! @next0:
//!   ...                          ; further catch clauses, catch_all
//!   rethrow(exn)                 ; no clause matched
//! ```
//!
//! Every normal exit from a try body (fall-through, branches, returns and
//! tail calls) pops the handler first.

use super::core::{ControlKind, ExceptionState, IrBuilder};
use crate::decoder::{BlockType, ValType};
use crate::ir::types::*;
use anyhow::{bail, Context, Result};
use wasm2qbe_abi::{RuntimeFn, EXCEPTION_SLOT_SIZE};

impl<'m> IrBuilder<'m> {
    pub(super) fn translate_try(&mut self, ty: BlockType) -> Result<()> {
        let (params, results) = self.block_signature(ty)?;
        let installed =
            self.emit_runtime_value(RuntimeFn::PushExceptionHandler, Vec::new(), ValType::I32)?;
        let dispatch = self.new_block();
        let body = self.new_block();
        self.terminate(IrTerminator::BranchIf {
            condition: installed,
            if_true: dispatch,
            if_false: body,
        });
        self.switch_to(body);

        let frame = self.push_control(ControlKind::Try, params, results)?;
        frame.exception = Some(ExceptionState {
            dispatch,
            exn: None,
            tag: None,
            chain: None,
        });
        Ok(())
    }

    /// Close the current arm of frame `idx` if control reaches its end.
    fn finish_arm(&mut self, idx: usize) -> Result<()> {
        if !self.reachable {
            return Ok(());
        }
        if self.control_stack[idx].kind == ControlKind::Try {
            self.emit_handler_pops(1);
        }
        self.fallthrough_to_cont(idx)
    }

    /// Start a `catch` clause (`tag` is `Some`) or the `catch_all` clause.
    pub(super) fn translate_catch(&mut self, tag: Option<u32>) -> Result<()> {
        let idx = self.control_stack.len() - 1;
        let kind = self.control_stack[idx].kind;
        if !matches!(kind, ControlKind::Try | ControlKind::Catch) {
            bail!("catch outside of try");
        }
        self.finish_arm(idx)?;

        let mut state = self.control_stack[idx]
            .exception
            .clone()
            .context("try frame without handler state")?;
        let (exn, tag_var, chain) = match kind {
            ControlKind::Try => {
                self.switch_to(state.dispatch);
                let exn =
                    self.emit_runtime_value(RuntimeFn::GetException, Vec::new(), ValType::I64)?;
                let tag_var =
                    self.emit_runtime_value(RuntimeFn::ExceptionTag, vec![exn], ValType::I32)?;
                (exn, tag_var, state.dispatch)
            }
            _ => (
                state.exn.context("catch without exception")?,
                state.tag.context("catch without exception tag")?,
                state.chain.context("catch after catch_all")?,
            ),
        };
        state.exn = Some(exn);
        state.tag = Some(tag_var);
        self.switch_to(chain);
        let height = self.control_stack[idx].height;
        self.value_stack.truncate(height);

        match tag {
            Some(tag) => {
                let expected = self.emit_const(IrValue::I32(tag as i32));
                let matches = self.emit_binop(BinOp::I32Eq, tag_var, expected);
                let handler = self.new_block();
                let next = self.new_block();
                self.terminate(IrTerminator::BranchIf {
                    condition: matches,
                    if_true: handler,
                    if_false: next,
                });
                self.switch_to(handler);
                for (i, ty) in self.tag_params(tag)?.into_iter().enumerate() {
                    let index = self.emit_const(IrValue::I32(i as i32));
                    let slot = self.emit_runtime_value(
                        RuntimeFn::ExceptionPayload,
                        vec![exn, index],
                        ValType::I64,
                    )?;
                    let dest = self.new_var(ty);
                    self.emit(IrInstr::FieldLoad {
                        dest,
                        ty,
                        width: MemoryAccessWidth::Full,
                        sign: None,
                        base: slot,
                        offset: 0,
                    });
                    self.push(dest);
                }
                state.chain = Some(next);
                let frame = &mut self.control_stack[idx];
                frame.kind = ControlKind::Catch;
                frame.exception = Some(state);
            }
            None => {
                state.chain = None;
                let frame = &mut self.control_stack[idx];
                frame.kind = ControlKind::CatchAll;
                frame.exception = Some(state);
            }
        }
        Ok(())
    }

    /// `end` of a try/catch construct: unmatched exceptions propagate.
    pub(super) fn end_try(&mut self, idx: usize) -> Result<()> {
        self.finish_arm(idx)?;
        let state = self.control_stack[idx]
            .exception
            .clone()
            .context("try frame without handler state")?;
        match self.control_stack[idx].kind {
            ControlKind::Try => {
                // try without clauses
                self.switch_to(state.dispatch);
                let exn =
                    self.emit_runtime_value(RuntimeFn::GetException, Vec::new(), ValType::I64)?;
                self.emit_noreturn(RuntimeFn::Rethrow, vec![exn])?;
            }
            ControlKind::Catch => {
                let chain = state.chain.context("catch without fall-through chain")?;
                let exn = state.exn.context("catch without exception")?;
                self.switch_to(chain);
                self.emit_noreturn(RuntimeFn::Rethrow, vec![exn])?;
            }
            _ => {}
        }
        let frame = self.pop_control()?;
        self.enter_cont(&frame);
        Ok(())
    }

    /// `delegate`: close the try body and forward its exceptions to the
    /// handler of the label at `depth`.
    pub(super) fn translate_delegate(&mut self, depth: u32) -> Result<()> {
        let idx = self.control_stack.len() - 1;
        if self.control_stack[idx].kind != ControlKind::Try {
            bail!("delegate outside of try");
        }
        self.finish_arm(idx)?;
        let frame = self.pop_control()?;
        let state = frame
            .exception
            .clone()
            .context("try frame without handler state")?;

        let target = self.frame_index(depth)?;
        let skipped = self.handlers_above(target + 1);
        self.switch_to(state.dispatch);
        let exn = self.emit_runtime_value(RuntimeFn::GetException, Vec::new(), ValType::I64)?;
        self.emit_handler_pops(skipped);
        self.emit(IrInstr::CallRuntime {
            dest: None,
            func: RuntimeFn::Rethrow,
            args: vec![exn],
        });
        self.terminate(IrTerminator::Halt);

        self.enter_cont(&frame);
        Ok(())
    }

    pub(super) fn translate_throw(&mut self, tag: u32) -> Result<()> {
        let params = self.tag_params(tag)?;
        let values = self.pop_n(params.len())?;
        let payload = if values.is_empty() {
            self.emit_const(IrValue::I64(0))
        } else {
            let dest = self.new_var(ValType::I64);
            self.emit(IrInstr::StackSlot {
                dest,
                size: values.len() as u32 * EXCEPTION_SLOT_SIZE,
            });
            for (i, (value, ty)) in values.iter().zip(&params).enumerate() {
                self.emit(IrInstr::FieldStore {
                    ty: *ty,
                    width: MemoryAccessWidth::Full,
                    base: dest,
                    offset: i as u32 * EXCEPTION_SLOT_SIZE,
                    value: *value,
                });
            }
            dest
        };
        let tag_var = self.emit_const(IrValue::I32(tag as i32));
        let count = self.emit_const(IrValue::I32(values.len() as i32));
        self.emit_noreturn(RuntimeFn::Throw, vec![tag_var, payload, count])
    }

    pub(super) fn translate_rethrow(&mut self, depth: u32) -> Result<()> {
        let idx = self.frame_index(depth)?;
        let exn = self.control_stack[idx]
            .exception
            .as_ref()
            .and_then(|state| state.exn)
            .context("rethrow target is not a catch clause")?;
        self.emit_noreturn(RuntimeFn::Rethrow, vec![exn])
    }

    fn tag_params(&self, tag: u32) -> Result<Vec<ValType>> {
        let ty = self
            .module
            .tag_type(tag)
            .with_context(|| format!("unknown tag {}", tag))?;
        let ft = self
            .module
            .func_type_at(ty.type_idx)
            .with_context(|| format!("tag {} has no function type", tag))?;
        Ok(ft.params.clone())
    }
}
