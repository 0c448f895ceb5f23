//! The module initialiser.
//!
//! Everything instantiation does at run time is collected into one
//! generated function, in order:
//! 1. create defined memories and tables
//! 2. evaluate global initialisers that are not plain constants
//! 3. fill element segment items that are not plain constants, apply
//!    active element segments, drop active and declarative ones
//! 4. apply active data segments and drop them
//! 5. call the start function

use super::core::IrBuilder;
use crate::decoder::{
    ConstExpr, DataMode, ElementItems, ElementMode, Operator, OperatorsReader, RefType, ValType,
};
use crate::error::CompileError;
use crate::ir::types::*;
use anyhow::{bail, Context, Result};
use wasm2qbe_abi::{RuntimeFn, FIELD_SIZE, MODULE_INIT};

/// A constant initialiser that can be written as static data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticInit {
    Value(IrValue),
    /// Address of a function's descriptor.
    Func(u32),
}

/// The static form of `expr`, when it is a single constant instruction.
pub fn static_init(expr: &ConstExpr, ty: ValType) -> Option<StaticInit> {
    let mut reader = OperatorsReader::new(&expr.bytes, expr.offset, 0);
    let (_, first) = reader.read().ok()?;
    let (_, second) = reader.read().ok()?;
    if second != Operator::End || !reader.is_eof() {
        return None;
    }
    let init = match first {
        Operator::I32Const { value } => StaticInit::Value(IrValue::I32(value)),
        Operator::I64Const { value } => StaticInit::Value(IrValue::I64(value)),
        Operator::F32Const { bits } => StaticInit::Value(IrValue::F32(bits)),
        Operator::F64Const { bits } => StaticInit::Value(IrValue::F64(bits)),
        Operator::RefNull { .. } => StaticInit::Value(IrValue::I64(0)),
        Operator::RefFunc { func } => StaticInit::Func(func),
        _ => return None,
    };
    match init {
        StaticInit::Value(v) if v.ty() != ty && !matches!(ty, ValType::Ref(_)) => None,
        _ => Some(init),
    }
}

impl<'m> IrBuilder<'m> {
    /// Build the module initialiser.
    pub fn translate_module_init(&mut self) -> Result<IrFunction, CompileError> {
        self.begin(None, Vec::new(), Vec::new(), Vec::new());
        self.build_init().map_err(|err| CompileError {
            func_idx: self.module.num_funcs(),
            instr_offset: self.offset,
            func_name: MODULE_INIT.to_string(),
            message: format!("{:#}", err),
        })?;
        Ok(self.finish(MODULE_INIT.to_string(), None))
    }

    fn build_init(&mut self) -> Result<()> {
        let module = self.module;

        for (i, mem) in module.memories.iter().enumerate() {
            let idx = module.num_imported_memories() + i as u32;
            let idx = self.emit_const(IrValue::I32(idx as i32));
            let min = self.emit_const(IrValue::I64(mem.limits.min as i64));
            let max = self.emit_const(IrValue::I64(mem.limits.max.map_or(-1, |m| m as i64)));
            let is64 = self.emit_const(IrValue::I32(mem.memory64 as i32));
            self.emit_runtime(RuntimeFn::MemoryNew, vec![idx, min, max, is64], None);
        }

        for (i, table) in module.tables.iter().enumerate() {
            let idx = module.num_imported_tables() + i as u32;
            let init = match &table.init {
                Some(expr) => self.translate_const_expr(expr)?,
                None => self.emit_const(IrValue::I64(0)),
            };
            let idx = self.emit_const(IrValue::I32(idx as i32));
            let min = self.emit_const(IrValue::I32(table.ty.limits.min as i32));
            let max = self.emit_const(IrValue::I32(
                table.ty.limits.max.map_or(-1, |m| m as i32),
            ));
            self.emit_runtime(RuntimeFn::TableNew, vec![idx, min, max, init], None);
        }

        for (i, global) in module.globals.iter().enumerate() {
            if static_init(&global.init, global.ty.content).is_some() {
                continue;
            }
            let idx = module.num_imported_globals() + i as u32;
            self.offset = global.init.offset;
            let value = self.translate_const_expr(&global.init)?;
            self.emit(IrInstr::GlobalSet { global: idx, value });
        }

        for (i, seg) in module.elements.iter().enumerate() {
            let elem = i as u32;
            self.offset = seg.offset;
            if let ElementItems::Expressions(exprs) = &seg.items {
                let elem_ty = ValType::Ref(seg.ty);
                for (j, expr) in exprs.iter().enumerate() {
                    if static_init(expr, elem_ty).is_some() {
                        continue;
                    }
                    let value = self.translate_const_expr(expr)?;
                    let items = self.new_var(ValType::I64);
                    self.emit(IrInstr::DataAddr {
                        dest: items,
                        data: DataRef::Elem(elem),
                    });
                    self.emit(IrInstr::FieldStore {
                        ty: ValType::Ref(RefType::FUNCREF),
                        width: MemoryAccessWidth::Full,
                        base: items,
                        offset: j as u32 * FIELD_SIZE,
                        value,
                    });
                }
            }
            match &seg.mode {
                ElementMode::Active { table, offset } => {
                    let dst = self.translate_const_expr(offset)?;
                    let src = self.emit_const(IrValue::I32(0));
                    let len = self.emit_const(IrValue::I32(seg.items.len() as i32));
                    self.emit_table_init(elem, *table, dst, src, len)?;
                    self.translate_elem_drop(elem);
                }
                ElementMode::Declarative => self.translate_elem_drop(elem),
                ElementMode::Passive => {}
            }
        }

        for (i, seg) in module.data.iter().enumerate() {
            let DataMode::Active { memory, offset } = &seg.mode else {
                continue;
            };
            self.offset = seg.offset;
            let data = i as u32;
            let dst = self.translate_const_expr(offset)?;
            self.push(dst);
            let src = self.emit_const(IrValue::I32(0));
            self.push(src);
            let len = self.emit_const(IrValue::I32(seg.data.len() as i32));
            self.push(len);
            self.translate_memory_init(data, *memory)?;
            self.translate_data_drop(data);
        }

        if let Some((start, offset)) = module.start {
            self.offset = offset;
            self.emit(IrInstr::Call {
                dests: Vec::new(),
                func: start,
                args: Vec::new(),
            });
        }

        self.terminate(IrTerminator::Return { values: Vec::new() });
        Ok(())
    }

    /// Translate a constant expression in the current block and return the
    /// variable holding its value.
    pub(super) fn translate_const_expr(&mut self, expr: &ConstExpr) -> Result<VarId> {
        let height = self.value_stack.len();
        let mut reader = OperatorsReader::new(&expr.bytes, expr.offset, 0);
        while !reader.is_eof() {
            let (offset, op) = reader.read()?;
            self.offset = offset;
            if op == Operator::End {
                break;
            }
            self.translate_operator(op)
                .with_context(|| format!("constant expression at offset {:#x}", offset))?;
        }
        let value = self.pop()?;
        if self.value_stack.len() != height {
            bail!("constant expression left extra values on the stack");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(bytes: &[u8]) -> ConstExpr {
        ConstExpr {
            bytes: bytes.to_vec(),
            offset: 0,
        }
    }

    #[test]
    fn test_static_constants() {
        assert_eq!(
            static_init(&expr(&[0x41, 0x2A, 0x0B]), ValType::I32),
            Some(StaticInit::Value(IrValue::I32(42)))
        );
        assert_eq!(
            static_init(&expr(&[0xD2, 0x03, 0x0B]), ValType::FUNCREF),
            Some(StaticInit::Func(3))
        );
        assert_eq!(
            static_init(&expr(&[0xD0, 0x70, 0x0B]), ValType::FUNCREF),
            Some(StaticInit::Value(IrValue::I64(0)))
        );
    }

    #[test]
    fn test_computed_initialisers_are_not_static() {
        // global.get 0
        assert_eq!(static_init(&expr(&[0x23, 0x00, 0x0B]), ValType::I32), None);
        // i32.const 1; i32.const 2; i32.add
        assert_eq!(
            static_init(&expr(&[0x41, 0x01, 0x41, 0x02, 0x6A, 0x0B]), ValType::I32),
            None
        );
    }
}
