//! Operator dispatch.
//!
//! Maps each decoded [`Operator`] to the builder method that lowers it.
//! Code after an unconditional transfer is skipped: structured instructions
//! opened there only bump `dead_depth`, so the matching `end` can be found.

use super::core::IrBuilder;
use crate::decoder::Operator;
use crate::ir::types::*;
use anyhow::{bail, Result};

impl<'m> IrBuilder<'m> {
    /// Translate a single Wasm operator to IR.
    pub(super) fn translate_operator(&mut self, op: Operator) -> Result<()> {
        if !self.reachable {
            return self.translate_dead(op);
        }

        match op {
            // === Control flow ===
            Operator::Unreachable => {
                self.terminate(IrTerminator::Unreachable);
                self.mark_unreachable()?;
            }
            Operator::Nop => {}
            Operator::Block { ty } => self.translate_block(ty)?,
            Operator::Loop { ty } => self.translate_loop(ty)?,
            Operator::If { ty } => self.translate_if(ty)?,
            Operator::Else => self.translate_else()?,
            Operator::End => self.translate_end()?,
            Operator::Br { depth } => self.translate_br(depth)?,
            Operator::BrIf { depth } => {
                let cond = self.pop()?;
                self.branch_if(cond, depth)?;
            }
            Operator::BrTable { targets, default } => self.translate_br_table(&targets, default)?,
            Operator::Return => self.translate_return()?,

            // === Exceptions ===
            Operator::Try { ty } => self.translate_try(ty)?,
            Operator::Catch { tag } => self.translate_catch(Some(tag))?,
            Operator::CatchAll => self.translate_catch(None)?,
            Operator::Throw { tag } => self.translate_throw(tag)?,
            Operator::Rethrow { depth } => self.translate_rethrow(depth)?,
            Operator::Delegate { depth } => self.translate_delegate(depth)?,

            // === Calls ===
            Operator::Call { func } => self.translate_call(func, false)?,
            Operator::ReturnCall { func } => self.translate_call(func, true)?,
            Operator::CallIndirect { type_idx, table } => {
                self.translate_call_indirect(type_idx, table, false)?
            }
            Operator::ReturnCallIndirect { type_idx, table } => {
                self.translate_call_indirect(type_idx, table, true)?
            }
            Operator::CallRef { type_idx } => self.translate_call_ref(type_idx, false)?,
            Operator::ReturnCallRef { type_idx } => self.translate_call_ref(type_idx, true)?,

            // === Parametric ===
            Operator::Drop => {
                self.pop()?;
            }
            Operator::Select | Operator::TypedSelect { .. } => {
                let cond = self.pop()?;
                let if_false = self.pop()?;
                let if_true = self.pop()?;
                let dest = self.emit_select(cond, if_true, if_false);
                self.push(dest);
            }

            // === Variables ===
            Operator::LocalGet { idx } => {
                let ty = self.local_type(idx)?;
                let dest = self.new_var(ty);
                self.emit(IrInstr::LocalGet { dest, local: idx });
                self.push(dest);
            }
            Operator::LocalSet { idx } => {
                let value = self.pop()?;
                self.emit(IrInstr::LocalSet { local: idx, value });
            }
            Operator::LocalTee { idx } => {
                let value = self.pop()?;
                self.emit(IrInstr::LocalSet { local: idx, value });
                self.push(value);
            }
            Operator::GlobalGet { idx } => {
                let ty = self
                    .module
                    .global_type(idx)
                    .ok_or_else(|| anyhow::anyhow!("unknown global {}", idx))?
                    .content;
                let dest = self.new_var(ty);
                self.emit(IrInstr::GlobalGet { dest, global: idx });
                self.push(dest);
            }
            Operator::GlobalSet { idx } => {
                let value = self.pop()?;
                self.emit(IrInstr::GlobalSet { global: idx, value });
            }

            // === Tables ===
            Operator::TableGet { table } => self.translate_table_get(table)?,
            Operator::TableSet { table } => self.translate_table_set(table)?,
            Operator::TableSize { table } => self.translate_table_size(table)?,
            Operator::TableGrow { table } => self.translate_table_grow(table)?,
            Operator::TableFill { table } => self.translate_table_fill(table)?,
            Operator::TableCopy { dst, src } => self.translate_table_copy(dst, src)?,
            Operator::TableInit { elem, table } => self.translate_table_init(elem, table)?,
            Operator::ElemDrop { elem } => self.translate_elem_drop(elem),

            // === Memory ===
            Operator::Load { op, memarg } => self.translate_load(op, memarg)?,
            Operator::Store { op, memarg } => self.translate_store(op, memarg)?,
            Operator::MemorySize { mem } => self.translate_memory_size(mem)?,
            Operator::MemoryGrow { mem } => self.translate_memory_grow(mem)?,
            Operator::MemoryInit { data, mem } => self.translate_memory_init(data, mem)?,
            Operator::DataDrop { data } => self.translate_data_drop(data),
            Operator::MemoryCopy { dst, src } => self.translate_memory_copy(dst, src)?,
            Operator::MemoryFill { mem } => self.translate_memory_fill(mem)?,

            // === Constants and numeric ===
            Operator::I32Const { value } => {
                let dest = self.emit_const(IrValue::I32(value));
                self.push(dest);
            }
            Operator::I64Const { value } => {
                let dest = self.emit_const(IrValue::I64(value));
                self.push(dest);
            }
            Operator::F32Const { bits } => {
                let dest = self.emit_const(IrValue::F32(bits));
                self.push(dest);
            }
            Operator::F64Const { bits } => {
                let dest = self.emit_const(IrValue::F64(bits));
                self.push(dest);
            }
            Operator::Numeric(op) => self.translate_numeric(op)?,

            // === References ===
            Operator::RefNull { .. } => {
                let dest = self.emit_const(IrValue::I64(0));
                self.push(dest);
            }
            Operator::RefIsNull => self.translate_ref_is_null()?,
            Operator::RefFunc { func } => {
                let dest = self.new_var(crate::decoder::ValType::FUNCREF);
                self.emit(IrInstr::RefFunc { dest, func });
                self.push(dest);
            }
            Operator::RefEq => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let dest = self.emit_binop(BinOp::I64Eq, lhs, rhs);
                self.push(dest);
            }
            Operator::RefAsNonNull => {
                let r = self.pop()?;
                self.emit_null_check(r);
                self.push(r);
            }
            Operator::BrOnNull { depth } => self.translate_br_on_null(depth)?,
            Operator::BrOnNonNull { depth } => self.translate_br_on_non_null(depth)?,

            // === GC ===
            Operator::StructNew { type_idx } => self.translate_struct_new(type_idx, false)?,
            Operator::StructNewDefault { type_idx } => {
                self.translate_struct_new(type_idx, true)?
            }
            Operator::StructGet { type_idx, field } | Operator::StructGetS { type_idx, field } => {
                self.translate_struct_get(type_idx, field, true)?
            }
            Operator::StructGetU { type_idx, field } => {
                self.translate_struct_get(type_idx, field, false)?
            }
            Operator::StructSet { type_idx, field } => self.translate_struct_set(type_idx, field)?,
            Operator::ArrayNew { type_idx } => self.translate_array_new(type_idx, false)?,
            Operator::ArrayNewDefault { type_idx } => self.translate_array_new(type_idx, true)?,
            Operator::ArrayNewFixed { type_idx, len } => {
                self.translate_array_new_fixed(type_idx, len)?
            }
            Operator::ArrayGet { type_idx } | Operator::ArrayGetS { type_idx } => {
                self.translate_array_get(type_idx, true)?
            }
            Operator::ArrayGetU { type_idx } => self.translate_array_get(type_idx, false)?,
            Operator::ArraySet { type_idx } => self.translate_array_set(type_idx)?,
            Operator::ArrayLen => self.translate_array_len()?,
            Operator::RefTest { heap, nullable } => self.translate_ref_test(heap, nullable)?,
            Operator::RefCast { heap, nullable } => self.translate_ref_cast(heap, nullable)?,
            Operator::BrOnCast { depth, to, .. } => self.translate_br_on_cast(depth, to, false)?,
            Operator::BrOnCastFail { depth, to, .. } => {
                self.translate_br_on_cast(depth, to, true)?
            }
            Operator::AnyConvertExtern | Operator::ExternConvertAny => {}
            Operator::RefI31 => self.translate_ref_i31()?,
            Operator::I31GetS => self.translate_i31_get(true)?,
            Operator::I31GetU => self.translate_i31_get(false)?,

            // === SIMD ===
            Operator::Simd { op, imm } => self.translate_simd(op, imm)?,

            op @ (Operator::ArrayNewData { .. }
            | Operator::ArrayNewElem { .. }
            | Operator::ArrayFill { .. }
            | Operator::ArrayCopy { .. }
            | Operator::ArrayInitData { .. }
            | Operator::ArrayInitElem { .. }) => {
                bail!("unsupported instruction {}", op.name());
            }
        }
        Ok(())
    }

    /// Skip an operator in dead code, tracking structure so the
    /// frame-closing instruction is recognised.
    fn translate_dead(&mut self, op: Operator) -> Result<()> {
        match op {
            Operator::Block { .. }
            | Operator::Loop { .. }
            | Operator::If { .. }
            | Operator::Try { .. } => self.dead_depth += 1,
            Operator::End | Operator::Delegate { .. } if self.dead_depth > 0 => {
                self.dead_depth -= 1
            }
            Operator::End => self.translate_end()?,
            Operator::Delegate { depth } => self.translate_delegate(depth)?,
            Operator::Else if self.dead_depth == 0 => self.translate_else()?,
            Operator::Catch { tag } if self.dead_depth == 0 => self.translate_catch(Some(tag))?,
            Operator::CatchAll if self.dead_depth == 0 => self.translate_catch(None)?,
            _ => {}
        }
        Ok(())
    }

    pub(super) fn local_type(&self, idx: u32) -> Result<crate::decoder::ValType> {
        self.locals
            .get(idx as usize)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown local {}", idx))
    }
}
