//! Function emission: signature, `@start` prologue, blocks and phis.
//!
//! QBE lowers its own input to SSA, so the emitter is free to define an
//! emitter temporary in several places (select arms do). IR phis still
//! become QBE phis. Blocks are rendered first and assembled afterwards,
//! because a phi must name the label its predecessor *ends* in, and
//! instructions that trap split a block into several labels.

use super::EmitContext;
use crate::decoder::{FuncType, ValType};
use crate::error::CompileError;
use crate::ir::{BlockId, IrFunction, IrInstr, VarId};
use crate::types::{alloc_op, class_of, lower_signature, slot_size, AbiSignature, ResultLoc};
use anyhow::{Context, Result};
use wasm2qbe_abi::{Class, TrapKind, RESERVED_PREFIX, V128_SIZE};

/// Emits one IR function as QBE text.
pub(super) struct FunctionEmitter<'a> {
    pub(super) ctx: &'a EmitContext<'a>,
    pub(super) func: &'a IrFunction,
    pub(super) sig: AbiSignature,
    /// Text of the block being rendered.
    out: String,
    /// Label the next instruction lands in.
    pub(super) label: String,
    pub(super) block: BlockId,
    splits: u32,
    temps: u32,
    traps: Vec<TrapKind>,
}

/// Emit `func` under `symbol`.
pub fn emit_function(
    ctx: &EmitContext<'_>,
    func: &IrFunction,
    symbol: &str,
    export: bool,
) -> Result<String, CompileError> {
    log::debug!("emitting {} as ${}", func.name, symbol);
    let mut emitter = FunctionEmitter::new(ctx, func);
    emitter.emit(symbol, export).map_err(|err| CompileError {
        func_idx: func.func_idx.unwrap_or_else(|| ctx.module.num_funcs()),
        instr_offset: 0,
        func_name: func.name.clone(),
        message: format!("{:#}", err),
    })
}

impl<'a> FunctionEmitter<'a> {
    fn new(ctx: &'a EmitContext<'a>, func: &'a IrFunction) -> Self {
        let sig = lower_signature(&FuncType::new(func.params.clone(), func.results.clone()));
        Self {
            ctx,
            func,
            sig,
            out: String::new(),
            label: String::new(),
            block: BlockId(0),
            splits: 0,
            temps: 0,
            traps: Vec::new(),
        }
    }

    fn emit(&mut self, symbol: &str, export: bool) -> Result<String> {
        let func = self.func;
        let mut bodies = Vec::with_capacity(func.blocks.len());
        let mut exits = Vec::with_capacity(func.blocks.len());
        for block in &func.blocks {
            self.block = block.id;
            self.label = block.id.to_string();
            self.splits = 0;
            log::trace!("{}: {} instructions", block.id, block.instructions.len());
            for instr in &block.instructions {
                self.emit_instr(instr)
                    .with_context(|| format!("in block {}", block.id))?;
            }
            self.emit_terminator(&block.terminator)
                .with_context(|| format!("terminator of block {}", block.id))?;
            exits.push(self.label.clone());
            bodies.push(std::mem::take(&mut self.out));
        }

        let mut text = String::new();
        text.push_str(&self.header(symbol, export));
        text.push_str("@start\n");
        text.push_str(&self.prologue());
        text.push_str(&format!("\tjmp @{}\n", func.entry_block));

        for (block, body) in func.blocks.iter().zip(bodies) {
            text.push_str(&format!("@{}\n", block.id));
            let mut staged = String::new();
            for phi in &block.phis {
                if phi.incoming.is_empty() {
                    continue;
                }
                if func.var_type(phi.dest) == ValType::V128 {
                    self.out.clear();
                    self.copy_v128(&staging(phi.dest), &var(phi.dest));
                    staged.push_str(&std::mem::take(&mut self.out));
                    continue;
                }
                let operands: Vec<String> = phi
                    .incoming
                    .iter()
                    .map(|(pred, value)| format!("@{} {}", exits[pred.0 as usize], var(*value)))
                    .collect();
                text.push_str(&format!(
                    "\t{} ={} phi {}\n",
                    var(phi.dest),
                    self.class(phi.dest),
                    operands.join(", ")
                ));
            }
            text.push_str(&staged);
            text.push_str(&body);
        }

        for trap in &self.traps {
            text.push_str(&format!("@{}\n", trap_label(*trap)));
            text.push_str(&format!("\tcall ${}()\n", trap.symbol()));
            text.push_str("\thlt\n");
        }
        text.push_str("}\n");
        Ok(text)
    }

    fn header(&self, symbol: &str, export: bool) -> String {
        let mut params: Vec<String> = self
            .func
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} %p{}", class_of(*ty), i))
            .collect();
        params.extend((0..self.sig.out_pointers).map(|k| format!("l %out{}", k)));
        format!(
            "{}function {}${}({}) {{\n",
            if export { "export " } else { "" },
            self.sig.ret.map(|c| format!("{} ", c)).unwrap_or_default(),
            symbol,
            params.join(", ")
        )
    }

    /// Stack storage, parameter spills and local zeroing. All `alloc`s live
    /// here so the backend can lay out a fixed frame.
    fn prologue(&mut self) -> String {
        let func = self.func;
        let mut text = String::new();
        for (i, ty) in func.locals.iter().enumerate() {
            text.push_str(&format!("\t%l{} =l {} {}\n", i, alloc_op(*ty), slot_size(*ty)));
        }
        for (i, ty) in func.var_types.iter().enumerate() {
            if *ty == ValType::V128 {
                text.push_str(&format!("\t%v{} =l alloc16 {}\n", i, V128_SIZE));
            }
        }
        for block in &func.blocks {
            for phi in &block.phis {
                if func.var_type(phi.dest) == ValType::V128 {
                    text.push_str(&format!("\t{} =l alloc16 {}\n", staging(phi.dest), V128_SIZE));
                }
            }
            for instr in &block.instructions {
                match instr {
                    IrInstr::StackSlot { dest, size } => {
                        text.push_str(&format!("\t{} =l alloc16 {}\n", var(*dest), (*size).max(8)));
                    }
                    IrInstr::Call { .. } | IrInstr::CallRef { .. } => {
                        for dest in self.out_slots(instr) {
                            text.push_str(&format!("\t{} =l alloc8 8\n", result_slot(dest)));
                        }
                    }
                    _ => {}
                }
            }
        }

        self.out.clear();
        for (i, ty) in func.locals.iter().enumerate() {
            let slot = format!("%l{}", i);
            if i < func.params.len() {
                let param = format!("%p{}", i);
                if *ty == ValType::V128 {
                    self.copy_v128(&param, &slot);
                } else {
                    self.ins(format!("store{} {}, {}", class_of(*ty), param, slot));
                }
                continue;
            }
            match slot_size(*ty) {
                4 => self.ins(format!("storew 0, {}", slot)),
                8 => self.ins(format!("storel 0, {}", slot)),
                _ => {
                    self.ins(format!("storel 0, {}", slot));
                    let hi = self.temp();
                    self.ins(format!("{} =l add {}, 8", hi, slot));
                    self.ins(format!("storel 0, {}", hi));
                }
            }
        }
        text.push_str(&std::mem::take(&mut self.out));
        text
    }

    /// Scalar results of a call that come back through an out-pointer and
    /// need a stack slot to land in. `v128` results are written straight
    /// into their own storage.
    pub(super) fn out_slots(&self, instr: &IrInstr) -> Vec<VarId> {
        let Some((ft, dests)) = self.call_type(instr) else {
            return Vec::new();
        };
        lower_signature(ft)
            .results
            .iter()
            .zip(dests)
            .filter(|(loc, dest)| {
                matches!(loc, ResultLoc::OutPointer(_))
                    && self.func.var_type(**dest) != ValType::V128
            })
            .map(|(_, dest)| *dest)
            .collect()
    }

    pub(super) fn call_type<'i>(
        &self,
        instr: &'i IrInstr,
    ) -> Option<(&'a FuncType, &'i [VarId])> {
        let module = self.ctx.module;
        match instr {
            IrInstr::Call { dests, func, .. } => Some((module.func_type(*func)?, dests)),
            IrInstr::CallRef {
                dests, type_idx, ..
            } => Some((module.func_type_at(*type_idx)?, dests)),
            _ => None,
        }
    }

    // ─── Text helpers ──────────────────────────────────────────────────────

    /// Append one instruction line.
    pub(super) fn ins(&mut self, text: String) {
        self.out.push('\t');
        self.out.push_str(&text);
        self.out.push('\n');
    }

    pub(super) fn temp(&mut self) -> String {
        let t = format!("%t{}", self.temps);
        self.temps += 1;
        t
    }

    pub(super) fn class(&self, v: VarId) -> Class {
        class_of(self.func.var_type(v))
    }

    /// A fresh continuation label of the current block.
    pub(super) fn split_label(&mut self) -> String {
        self.splits += 1;
        format!("{}_{}", self.block, self.splits)
    }

    pub(super) fn start_label(&mut self, label: String) {
        self.out.push_str(&format!("@{}\n", label));
        self.label = label;
    }

    /// Leave for the trap handler when `cond` is non-zero, otherwise
    /// continue in a new label.
    pub(super) fn branch_to_trap(&mut self, cond: &str, trap: TrapKind) {
        if !self.traps.contains(&trap) {
            self.traps.push(trap);
        }
        let next = self.split_label();
        self.ins(format!("jnz {}, @{}, @{}", cond, trap_label(trap), next));
        self.start_label(next);
    }

    /// Copy 16 bytes between two addresses.
    pub(super) fn copy_v128(&mut self, src: &str, dst: &str) {
        let lo = self.temp();
        self.ins(format!("{} =l loadl {}", lo, src));
        self.ins(format!("storel {}, {}", lo, dst));
        let src_hi = self.temp();
        let dst_hi = self.temp();
        let hi = self.temp();
        self.ins(format!("{} =l add {}, 8", src_hi, src));
        self.ins(format!("{} =l add {}, 8", dst_hi, dst));
        self.ins(format!("{} =l loadl {}", hi, src_hi));
        self.ins(format!("storel {}, {}", hi, dst_hi));
    }
}

/// QBE name of an IR variable. A `v128` variable names its storage.
pub(super) fn var(v: VarId) -> String {
    format!("%{}", v)
}

/// Staging storage of a `v128` phi.
pub(super) fn staging(v: VarId) -> String {
    format!("%s{}", v.0)
}

/// Landing slot of a scalar out-pointer call result.
pub(super) fn result_slot(v: VarId) -> String {
    format!("%r{}", v.0)
}

fn trap_label(trap: TrapKind) -> &'static str {
    trap.symbol().trim_start_matches(RESERVED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_labels_drop_the_prefix() {
        assert_eq!(trap_label(TrapKind::DivByZero), "trap_div_by_zero");
        assert_eq!(trap_label(TrapKind::OutOfBounds), "trap_out_of_bounds");
    }

    #[test]
    fn test_names() {
        assert_eq!(var(VarId(3)), "%v3");
        assert_eq!(staging(VarId(3)), "%s3");
        assert_eq!(result_slot(VarId(9)), "%r9");
    }
}
