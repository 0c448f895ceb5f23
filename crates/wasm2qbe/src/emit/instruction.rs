//! Instruction and terminator lowering.

use super::function::{result_slot, staging, var, FunctionEmitter};
use crate::decoder::{FuncType, ValType};
use crate::ir::*;
use crate::types::{class_of, load_op, lower_signature, store_op, ResultLoc};
use anyhow::{bail, Context, Result};
use wasm2qbe_abi::{simd_symbol, Class, RuntimeFn, TrapKind, MEMORY_BASE, MEMORY_SIZE};

impl<'a> FunctionEmitter<'a> {
    pub(super) fn emit_instr(&mut self, instr: &IrInstr) -> Result<()> {
        match instr {
            IrInstr::Const { dest, value } => self.emit_const(*dest, *value),

            IrInstr::BinOp { dest, op, lhs, rhs } => {
                let (name, class) = binop(*op);
                self.ins(format!("{} ={} {} {}, {}", var(*dest), class, name, var(*lhs), var(*rhs)));
            }

            IrInstr::UnOp { dest, op, operand } => self.emit_unop(*dest, *op, *operand),

            IrInstr::Select {
                dest,
                cond,
                if_true,
                if_false,
            } => self.emit_select(*dest, *cond, *if_true, *if_false),

            IrInstr::LocalGet { dest, local } => {
                self.load_value(*dest, &format!("%l{}", local));
            }
            IrInstr::LocalSet { local, value } => {
                self.store_value(*value, &format!("%l{}", local));
            }

            IrInstr::GlobalGet { dest, global } => {
                let sym = format!("${}", self.global_symbol(*global)?);
                self.load_value(*dest, &sym);
            }
            IrInstr::GlobalSet { global, value } => {
                let sym = format!("${}", self.global_symbol(*global)?);
                self.store_value(*value, &sym);
            }

            IrInstr::Load {
                dest,
                ty,
                width,
                sign,
                memory,
                addr,
                offset,
            } => {
                let ptr = self.linear_address(*memory, *addr, *offset, width.bytes(*ty))?;
                self.ins(format!(
                    "{} ={} {} {}",
                    var(*dest),
                    class_of(*ty),
                    load_op(*ty, *width, *sign),
                    ptr
                ));
            }
            IrInstr::Store {
                ty,
                width,
                memory,
                addr,
                value,
                offset,
            } => {
                let ptr = self.linear_address(*memory, *addr, *offset, width.bytes(*ty))?;
                self.ins(format!("{} {}, {}", store_op(*ty, *width), var(*value), ptr));
            }

            IrInstr::FieldLoad {
                dest,
                ty,
                width,
                sign,
                base,
                offset,
            } => {
                let ptr = self.field_address(*base, *offset);
                if *ty == ValType::V128 {
                    self.copy_v128(&ptr, &var(*dest));
                } else {
                    self.ins(format!(
                        "{} ={} {} {}",
                        var(*dest),
                        class_of(*ty),
                        load_op(*ty, *width, *sign),
                        ptr
                    ));
                }
            }
            IrInstr::FieldStore {
                ty,
                width,
                base,
                offset,
                value,
            } => {
                let ptr = self.field_address(*base, *offset);
                if *ty == ValType::V128 {
                    self.copy_v128(&var(*value), &ptr);
                } else {
                    self.ins(format!("{} {}, {}", store_op(*ty, *width), var(*value), ptr));
                }
            }

            IrInstr::Call { dests, func, args } => {
                let module = self.ctx.module;
                let ft = module
                    .func_type(*func)
                    .with_context(|| format!("no type for function {}", func))?;
                let callee = format!("${}", self.func_symbol(*func)?);
                self.emit_call(&callee, ft, dests, args, instr);
            }
            IrInstr::CallRef {
                dests,
                type_idx,
                target,
                args,
            } => {
                let module = self.ctx.module;
                let ft = module
                    .func_type_at(*type_idx)
                    .with_context(|| format!("type {} is not a function type", type_idx))?;
                let code = self.field_address(*target, wasm2qbe_abi::FUNCREF_CODE_OFFSET as u32);
                let callee = self.temp();
                self.ins(format!("{} =l loadl {}", callee, code));
                self.emit_call(&callee, ft, dests, args, instr);
            }

            IrInstr::CallRuntime { dest, func, args } => self.emit_runtime(*dest, *func, args)?,

            IrInstr::CallSimd { dest, name, args } => self.emit_simd(*dest, name, args)?,

            IrInstr::RefFunc { dest, func } => {
                let desc = self
                    .ctx
                    .symbols
                    .descriptors
                    .get(func)
                    .with_context(|| format!("function {} has no descriptor", func))?;
                self.ins(format!("{} =l copy ${}", var(*dest), desc));
            }

            IrInstr::DataAddr { dest, data } => {
                let symbols = self.ctx.symbols;
                let sym = match data {
                    DataRef::Data(i) => symbols.data.get(*i as usize),
                    DataRef::Elem(i) => symbols.elems.get(*i as usize),
                }
                .with_context(|| format!("unknown segment {:?}", data))?;
                self.ins(format!("{} =l copy ${}", var(*dest), sym));
            }

            // Allocated in the prologue.
            IrInstr::StackSlot { .. } => {}

            IrInstr::TrapIf { cond, trap } => self.branch_to_trap(&var(*cond), *trap),
        }
        Ok(())
    }

    pub(super) fn emit_terminator(&mut self, term: &IrTerminator) -> Result<()> {
        match term {
            IrTerminator::Return { values } => {
                if values.len() != self.sig.results.len() {
                    bail!(
                        "returning {} values from a function with {} results",
                        values.len(),
                        self.sig.results.len()
                    );
                }
                let mut ret = None;
                for (value, loc) in values.iter().zip(self.sig.results.clone()) {
                    match loc {
                        ResultLoc::Register => ret = Some(*value),
                        ResultLoc::OutPointer(k) => {
                            let out = format!("%out{}", k);
                            self.store_value(*value, &out);
                        }
                    }
                }
                match ret {
                    Some(v) => self.ins(format!("ret {}", var(v))),
                    None => self.ins("ret".to_string()),
                }
            }

            IrTerminator::Jump { target } => {
                let func = self.func;
                for phi in &func.block(*target).phis {
                    if func.var_type(phi.dest) != ValType::V128 {
                        continue;
                    }
                    if let Some((_, value)) = phi.incoming.iter().find(|(b, _)| *b == self.block) {
                        self.copy_v128(&var(*value), &staging(phi.dest));
                    }
                }
                self.ins(format!("jmp @{}", target));
            }

            IrTerminator::BranchIf {
                condition,
                if_true,
                if_false,
            } => {
                self.ins(format!("jnz {}, @{}, @{}", var(*condition), if_true, if_false));
            }

            // A compare chain; br_table targets never carry phis, so the
            // labels the chain passes through do not matter to successors.
            IrTerminator::BranchTable {
                index,
                targets,
                default,
            } => {
                for (i, target) in targets.iter().enumerate() {
                    let hit = self.temp();
                    self.ins(format!("{} =w ceqw {}, {}", hit, var(*index), i));
                    let next = self.split_label();
                    self.ins(format!("jnz {}, @{}, @{}", hit, target, next));
                    self.start_label(next);
                }
                self.ins(format!("jmp @{}", default));
            }

            IrTerminator::Unreachable => {
                self.ins(format!("call ${}()", TrapKind::Unreachable.symbol()));
                self.ins("hlt".to_string());
            }

            IrTerminator::Halt => self.ins("hlt".to_string()),
        }
        Ok(())
    }

    fn emit_const(&mut self, dest: VarId, value: IrValue) {
        match value {
            IrValue::I32(v) => self.ins(format!("{} =w copy {}", var(dest), v)),
            IrValue::I64(v) => self.ins(format!("{} =l copy {}", var(dest), v)),
            // Floats go through their bit pattern so NaN payloads survive.
            IrValue::F32(bits) => {
                let t = self.temp();
                self.ins(format!("{} =w copy {}", t, bits as i32));
                self.ins(format!("{} =s cast {}", var(dest), t));
            }
            IrValue::F64(bits) => {
                let t = self.temp();
                self.ins(format!("{} =l copy {}", t, bits as i64));
                self.ins(format!("{} =d cast {}", var(dest), t));
            }
        }
    }

    fn emit_unop(&mut self, dest: VarId, op: UnOp, operand: VarId) {
        let class = class_of(op.result_type());
        let (d, x) = (var(dest), var(operand));
        let text = match op {
            UnOp::I32Eqz => format!("{} =w ceqw {}, 0", d, x),
            UnOp::I64Eqz => format!("{} =w ceql {}, 0", d, x),
            _ => format!("{} ={} {} {}", d, class, unop(op), x),
        };
        self.ins(text);
    }

    /// `select` becomes a diamond that writes `dest` in both arms.
    fn emit_select(&mut self, dest: VarId, cond: VarId, if_true: VarId, if_false: VarId) {
        let yes = self.split_label();
        let no = self.split_label();
        let join = self.split_label();
        self.ins(format!("jnz {}, @{}, @{}", var(cond), yes, no));
        for (label, value) in [(yes, if_true), (no, if_false)] {
            self.start_label(label);
            if self.func.var_type(dest) == ValType::V128 {
                self.copy_v128(&var(value), &var(dest));
            } else {
                let class = self.class(dest);
                self.ins(format!("{} ={} copy {}", var(dest), class, var(value)));
            }
            self.ins(format!("jmp @{}", join));
        }
        self.start_label(join);
    }

    fn emit_call(
        &mut self,
        callee: &str,
        ft: &FuncType,
        dests: &[VarId],
        args: &[VarId],
        instr: &IrInstr,
    ) {
        let sig = lower_signature(ft);
        let mut operands: Vec<String> = args
            .iter()
            .zip(&sig.params)
            .map(|(a, c)| format!("{} {}", c, var(*a)))
            .collect();
        let slots = self.out_slots(instr);
        let mut ret = None;
        for (dest, loc) in dests.iter().zip(&sig.results) {
            match loc {
                ResultLoc::Register => ret = Some(*dest),
                ResultLoc::OutPointer(_) if slots.contains(dest) => {
                    operands.push(format!("l {}", result_slot(*dest)));
                }
                ResultLoc::OutPointer(_) => operands.push(format!("l {}", var(*dest))),
            }
        }
        let call = format!("call {}({})", callee, operands.join(", "));
        match (ret, sig.ret) {
            (Some(dest), Some(class)) => self.ins(format!("{} ={} {}", var(dest), class, call)),
            _ => self.ins(call),
        }
        for dest in slots {
            let class = self.class(dest);
            self.ins(format!("{} ={} load{} {}", var(dest), class, class, result_slot(dest)));
        }
    }

    fn emit_runtime(&mut self, dest: Option<VarId>, func: RuntimeFn, args: &[VarId]) -> Result<()> {
        let sig = func.signature();
        if args.len() != sig.params.len() {
            bail!(
                "{} takes {} arguments, got {}",
                func.symbol(),
                sig.params.len(),
                args.len()
            );
        }
        let operands: Vec<String> = args
            .iter()
            .zip(sig.params)
            .map(|(a, c)| format!("{} {}", c, var(*a)))
            .collect();
        let call = format!("call ${}({})", func.symbol(), operands.join(", "));
        match (dest, sig.result) {
            (Some(d), Some(class)) => self.ins(format!("{} ={} {}", var(d), class, call)),
            (None, _) => self.ins(call),
            (Some(_), None) => bail!("{} returns nothing", func.symbol()),
        }
        Ok(())
    }

    /// SIMD fallbacks take a `v128` destination as a pointer in front of
    /// their operands; `v128` operands are passed by address too.
    fn emit_simd(&mut self, dest: Option<VarId>, name: &str, args: &[SimdArg]) -> Result<()> {
        let mut operands = Vec::with_capacity(args.len() + 1);
        let vector_dest = dest.filter(|d| self.func.var_type(*d) == ValType::V128);
        if let Some(d) = vector_dest {
            operands.push(format!("l {}", var(d)));
        }
        for arg in args {
            let operand = match *arg {
                SimdArg::Var(v) => format!("{} {}", self.class(v), var(v)),
                SimdArg::Lane(lane) => format!("w {}", lane),
                SimdArg::Imm(bits) => format!("l {}", bits as i64),
                SimdArg::Address {
                    memory,
                    addr,
                    offset,
                    bytes,
                } => format!("l {}", self.linear_address(memory, addr, offset, bytes)?),
            };
            operands.push(operand);
        }
        let call = format!("call ${}({})", simd_symbol(name), operands.join(", "));
        match dest {
            Some(d) if vector_dest.is_none() => {
                let class = self.class(d);
                self.ins(format!("{} ={} {}", var(d), class, call));
            }
            _ => self.ins(call),
        }
        Ok(())
    }

    // ─── Addresses and values ──────────────────────────────────────────────

    /// Host address of `bytes` bytes at `addr + offset` in linear memory
    /// `memory`, after the bounds check.
    fn linear_address(&mut self, memory: u32, addr: VarId, offset: u64, bytes: u32) -> Result<String> {
        let mem = self
            .ctx
            .module
            .memory_type(memory)
            .with_context(|| format!("unknown memory {}", memory))?;
        let addr = if mem.memory64 {
            var(addr)
        } else {
            let wide = self.temp();
            self.ins(format!("{} =l extuw {}", wide, var(addr)));
            wide
        };
        let effective = if offset == 0 {
            addr.clone()
        } else {
            let t = self.temp();
            self.ins(format!("{} =l add {}, {}", t, addr, offset as i64));
            t
        };

        if self.ctx.bounds_checks {
            let end = self.temp();
            self.ins(format!("{} =l add {}, {}", end, effective, bytes));
            let size = self.memory_word(memory, MEMORY_SIZE, RuntimeFn::MemoryBytes);
            let mut oob = self.temp();
            self.ins(format!("{} =w cugtl {}, {}", oob, end, size));
            if mem.memory64 {
                // A 64-bit address can wrap when adding the offset or the
                // access size; either carry is out of bounds.
                let mut carries = vec![(end.clone(), effective.clone())];
                if offset != 0 {
                    carries.push((effective.clone(), addr.clone()));
                }
                for (sum, operand) in carries {
                    let wrapped = self.temp();
                    self.ins(format!("{} =w cultl {}, {}", wrapped, sum, operand));
                    let either = self.temp();
                    self.ins(format!("{} =w or {}, {}", either, oob, wrapped));
                    oob = either;
                }
            }
            self.branch_to_trap(&oob, TrapKind::OutOfBounds);
        }

        let base = self.memory_word(memory, MEMORY_BASE, RuntimeFn::MemoryBase);
        let ptr = self.temp();
        self.ins(format!("{} =l add {}, {}", ptr, base, effective));
        Ok(ptr)
    }

    /// Memory 0 publishes its base and size in data symbols; other memories
    /// are asked through the runtime.
    fn memory_word(&mut self, memory: u32, symbol: &str, helper: RuntimeFn) -> String {
        let t = self.temp();
        if memory == 0 {
            self.ins(format!("{} =l loadl ${}", t, symbol));
        } else {
            self.ins(format!("{} =l call ${}(w {})", t, helper.symbol(), memory));
        }
        t
    }

    fn field_address(&mut self, base: VarId, offset: u32) -> String {
        if offset == 0 {
            return var(base);
        }
        let t = self.temp();
        self.ins(format!("{} =l add {}, {}", t, var(base), offset));
        t
    }

    /// Read a value stored at `addr` into `dest`.
    fn load_value(&mut self, dest: VarId, addr: &str) {
        if self.func.var_type(dest) == ValType::V128 {
            self.copy_v128(addr, &var(dest));
        } else {
            let class = self.class(dest);
            self.ins(format!("{} ={} load{} {}", var(dest), class, class, addr));
        }
    }

    fn store_value(&mut self, value: VarId, addr: &str) {
        if self.func.var_type(value) == ValType::V128 {
            self.copy_v128(&var(value), addr);
        } else {
            let class = self.class(value);
            self.ins(format!("store{} {}, {}", class, var(value), addr));
        }
    }

    fn func_symbol(&self, func: u32) -> Result<&'a str> {
        self.ctx
            .symbols
            .funcs
            .get(func as usize)
            .map(String::as_str)
            .with_context(|| format!("unknown function {}", func))
    }

    fn global_symbol(&self, global: u32) -> Result<&'a str> {
        self.ctx
            .symbols
            .globals
            .get(global as usize)
            .map(String::as_str)
            .with_context(|| format!("unknown global {}", global))
    }
}

/// QBE instruction and result class of a binary operation.
fn binop(op: BinOp) -> (&'static str, Class) {
    use BinOp::*;
    let name = match op {
        I32Add | I64Add | F32Add | F64Add => "add",
        I32Sub | I64Sub | F32Sub | F64Sub => "sub",
        I32Mul | I64Mul | F32Mul | F64Mul => "mul",
        I32DivS | I64DivS | F32Div | F64Div => "div",
        I32DivU | I64DivU => "udiv",
        I32RemS | I64RemS => "rem",
        I32RemU | I64RemU => "urem",
        I32And | I64And => "and",
        I32Or | I64Or => "or",
        I32Xor | I64Xor => "xor",
        I32Shl | I64Shl => "shl",
        I32ShrS | I64ShrS => "sar",
        I32ShrU | I64ShrU => "shr",

        I32Eq => "ceqw",
        I32Ne => "cnew",
        I32LtS => "csltw",
        I32LtU => "cultw",
        I32GtS => "csgtw",
        I32GtU => "cugtw",
        I32LeS => "cslew",
        I32LeU => "culew",
        I32GeS => "csgew",
        I32GeU => "cugew",

        I64Eq => "ceql",
        I64Ne => "cnel",
        I64LtS => "csltl",
        I64LtU => "cultl",
        I64GtS => "csgtl",
        I64GtU => "cugtl",
        I64LeS => "cslel",
        I64LeU => "culel",
        I64GeS => "csgel",
        I64GeU => "cugel",

        F32Eq => "ceqs",
        F32Ne => "cnes",
        F32Lt => "clts",
        F32Gt => "cgts",
        F32Le => "cles",
        F32Ge => "cges",
        F32Unordered => "cuos",

        F64Eq => "ceqd",
        F64Ne => "cned",
        F64Lt => "cltd",
        F64Gt => "cgtd",
        F64Le => "cled",
        F64Ge => "cged",
        F64Unordered => "cuod",
    };
    (name, class_of(op.result_type()))
}

/// QBE instruction of a unary operation other than `eqz`.
fn unop(op: UnOp) -> &'static str {
    use UnOp::*;
    match op {
        I32Eqz | I64Eqz => "ceq",
        F32Neg | F64Neg => "neg",
        I32WrapI64 => "copy",
        I64ExtendI32S | I64Extend32S => "extsw",
        I64ExtendI32U => "extuw",
        I32Extend8S | I64Extend8S => "extsb",
        I32Extend16S | I64Extend16S => "extsh",
        I32TruncF32S | I64TruncF32S => "stosi",
        I32TruncF32U | I64TruncF32U => "stoui",
        I32TruncF64S | I64TruncF64S => "dtosi",
        I32TruncF64U | I64TruncF64U => "dtoui",
        F32ConvertI32S | F64ConvertI32S => "swtof",
        F32ConvertI32U | F64ConvertI32U => "uwtof",
        F32ConvertI64S | F64ConvertI64S => "sltof",
        F32ConvertI64U | F64ConvertI64U => "ultof",
        F32DemoteF64 => "truncd",
        F64PromoteF32 => "exts",
        I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => "cast",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparisons_produce_words() {
        assert_eq!(binop(BinOp::I64LtU), ("cultl", Class::W));
        assert_eq!(binop(BinOp::F64Unordered), ("cuod", Class::W));
        assert_eq!(binop(BinOp::F32Ge), ("cges", Class::W));
    }

    #[test]
    fn test_arithmetic_keeps_operand_class() {
        assert_eq!(binop(BinOp::I64ShrS), ("sar", Class::L));
        assert_eq!(binop(BinOp::F32Div), ("div", Class::S));
        assert_eq!(binop(BinOp::I32RemU), ("urem", Class::W));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(unop(UnOp::I64TruncF64U), "dtoui");
        assert_eq!(unop(UnOp::F32ConvertI64U), "ultof");
        assert_eq!(unop(UnOp::F64PromoteF32), "exts");
        assert_eq!(unop(UnOp::I64Extend32S), "extsw");
    }
}
