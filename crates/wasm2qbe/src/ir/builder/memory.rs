//! Linear memory and table instructions.
//!
//! Loads and stores stay single IR instructions; the emitter adds the bounds
//! check. Bulk memory, `memory.size`/`memory.grow` and every table operation
//! call the runtime.

use super::core::IrBuilder;
use crate::decoder::{LoadOp, MemArg, StoreOp, ValType};
use crate::ir::types::*;
use anyhow::{Context, Result};
use wasm2qbe_abi::RuntimeFn;

impl<'m> IrBuilder<'m> {
    pub(super) fn translate_load(&mut self, op: LoadOp, memarg: MemArg) -> Result<()> {
        let addr = self.pop()?;
        let ty = op.result_type();
        let (width, sign) = load_width(op);
        let dest = self.new_var(ty);
        self.emit(IrInstr::Load {
            dest,
            ty,
            width,
            sign,
            memory: memarg.memory,
            addr,
            offset: memarg.offset,
        });
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_store(&mut self, op: StoreOp, memarg: MemArg) -> Result<()> {
        let value = self.pop()?;
        let addr = self.pop()?;
        self.emit(IrInstr::Store {
            ty: op.value_type(),
            width: store_width(op),
            memory: memarg.memory,
            addr,
            value,
            offset: memarg.offset,
        });
        Ok(())
    }

    fn is_memory64(&self, mem: u32) -> Result<bool> {
        Ok(self
            .module
            .memory_type(mem)
            .with_context(|| format!("unknown memory {}", mem))?
            .memory64)
    }

    pub(super) fn translate_memory_size(&mut self, mem: u32) -> Result<()> {
        let mem_var = self.emit_const(IrValue::I32(mem as i32));
        let dest = if self.is_memory64(mem)? {
            self.emit_runtime_value(RuntimeFn::MemorySizePages64, vec![mem_var], ValType::I64)?
        } else {
            self.emit_runtime_value(RuntimeFn::MemorySizePages, vec![mem_var], ValType::I32)?
        };
        self.push(dest);
        Ok(())
    }

    /// `memory.grow`: the runtime returns the old size in pages, or -1.
    pub(super) fn translate_memory_grow(&mut self, mem: u32) -> Result<()> {
        let delta = self.pop()?;
        let mem_var = self.emit_const(IrValue::I32(mem as i32));
        let dest = if self.is_memory64(mem)? {
            self.emit_runtime_value(RuntimeFn::MemoryGrow64, vec![mem_var, delta], ValType::I64)?
        } else {
            self.emit_runtime_value(RuntimeFn::MemoryGrow, vec![mem_var, delta], ValType::I32)?
        };
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_memory_init(&mut self, data: u32, mem: u32) -> Result<()> {
        let len = self.pop()?;
        let src = self.pop()?;
        let dst = self.pop()?;
        let dst = self.emit_to_i64(dst);
        let data_len = self
            .module
            .data
            .get(data as usize)
            .with_context(|| format!("unknown data segment {}", data))?
            .data
            .len();

        let mem_var = self.emit_const(IrValue::I32(mem as i32));
        let seg = self.emit_const(IrValue::I32(data as i32));
        let bytes = self.new_var(ValType::I64);
        self.emit(IrInstr::DataAddr {
            dest: bytes,
            data: DataRef::Data(data),
        });
        let bytes_len = self.emit_const(IrValue::I32(data_len as i32));
        self.emit_runtime(
            RuntimeFn::MemoryInit,
            vec![mem_var, seg, bytes, bytes_len, dst, src, len],
            None,
        );
        Ok(())
    }

    pub(super) fn translate_data_drop(&mut self, data: u32) {
        let seg = self.emit_const(IrValue::I32(data as i32));
        self.emit_runtime(RuntimeFn::DataDrop, vec![seg], None);
    }

    pub(super) fn translate_memory_copy(&mut self, dst_mem: u32, src_mem: u32) -> Result<()> {
        let len = self.pop()?;
        let src = self.pop()?;
        let dst = self.pop()?;
        let len = self.emit_to_i64(len);
        let src = self.emit_to_i64(src);
        let dst = self.emit_to_i64(dst);
        let dst_mem = self.emit_const(IrValue::I32(dst_mem as i32));
        let src_mem = self.emit_const(IrValue::I32(src_mem as i32));
        self.emit_runtime(
            RuntimeFn::MemoryCopy,
            vec![dst_mem, src_mem, dst, src, len],
            None,
        );
        Ok(())
    }

    pub(super) fn translate_memory_fill(&mut self, mem: u32) -> Result<()> {
        let len = self.pop()?;
        let value = self.pop()?;
        let dst = self.pop()?;
        let len = self.emit_to_i64(len);
        let dst = self.emit_to_i64(dst);
        let mem_var = self.emit_const(IrValue::I32(mem as i32));
        self.emit_runtime(RuntimeFn::MemoryFill, vec![mem_var, dst, value, len], None);
        Ok(())
    }

    // ─── Tables ────────────────────────────────────────────────────────────

    fn table_element(&self, table: u32) -> Result<ValType> {
        Ok(ValType::Ref(
            self.module
                .table_type(table)
                .with_context(|| format!("unknown table {}", table))?
                .element,
        ))
    }

    pub(super) fn translate_table_get(&mut self, table: u32) -> Result<()> {
        let index = self.pop()?;
        let ty = self.table_element(table)?;
        let table_var = self.emit_const(IrValue::I32(table as i32));
        let dest = self.emit_runtime_value(RuntimeFn::TableGet, vec![table_var, index], ty)?;
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_table_set(&mut self, table: u32) -> Result<()> {
        let value = self.pop()?;
        let index = self.pop()?;
        let table_var = self.emit_const(IrValue::I32(table as i32));
        self.emit_runtime(RuntimeFn::TableSet, vec![table_var, index, value], None);
        Ok(())
    }

    pub(super) fn translate_table_size(&mut self, table: u32) -> Result<()> {
        let table_var = self.emit_const(IrValue::I32(table as i32));
        let dest = self.emit_runtime_value(RuntimeFn::TableSize, vec![table_var], ValType::I32)?;
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_table_grow(&mut self, table: u32) -> Result<()> {
        let delta = self.pop()?;
        let init = self.pop()?;
        let table_var = self.emit_const(IrValue::I32(table as i32));
        let dest = self.emit_runtime_value(
            RuntimeFn::TableGrow,
            vec![table_var, init, delta],
            ValType::I32,
        )?;
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_table_fill(&mut self, table: u32) -> Result<()> {
        let len = self.pop()?;
        let value = self.pop()?;
        let dst = self.pop()?;
        let table_var = self.emit_const(IrValue::I32(table as i32));
        self.emit_runtime(RuntimeFn::TableFill, vec![table_var, dst, value, len], None);
        Ok(())
    }

    pub(super) fn translate_table_copy(&mut self, dst_table: u32, src_table: u32) -> Result<()> {
        let len = self.pop()?;
        let src = self.pop()?;
        let dst = self.pop()?;
        let dst_table = self.emit_const(IrValue::I32(dst_table as i32));
        let src_table = self.emit_const(IrValue::I32(src_table as i32));
        self.emit_runtime(
            RuntimeFn::TableCopy,
            vec![dst_table, src_table, dst, src, len],
            None,
        );
        Ok(())
    }

    pub(super) fn translate_table_init(&mut self, elem: u32, table: u32) -> Result<()> {
        let len = self.pop()?;
        let src = self.pop()?;
        let dst = self.pop()?;
        self.emit_table_init(elem, table, dst, src, len)
    }

    /// Copy `len` items of element segment `elem` starting at `src` into
    /// `table` at `dst`.
    pub(super) fn emit_table_init(
        &mut self,
        elem: u32,
        table: u32,
        dst: VarId,
        src: VarId,
        len: VarId,
    ) -> Result<()> {
        let items_len = self
            .module
            .elements
            .get(elem as usize)
            .with_context(|| format!("unknown element segment {}", elem))?
            .items
            .len();
        let table_var = self.emit_const(IrValue::I32(table as i32));
        let seg = self.emit_const(IrValue::I32(elem as i32));
        let items = self.new_var(ValType::I64);
        self.emit(IrInstr::DataAddr {
            dest: items,
            data: DataRef::Elem(elem),
        });
        let items_len = self.emit_const(IrValue::I32(items_len as i32));
        self.emit_runtime(
            RuntimeFn::TableInit,
            vec![table_var, seg, items, items_len, dst, src, len],
            None,
        );
        Ok(())
    }

    pub(super) fn translate_elem_drop(&mut self, elem: u32) {
        let seg = self.emit_const(IrValue::I32(elem as i32));
        self.emit_runtime(RuntimeFn::ElemDrop, vec![seg], None);
    }
}

fn load_width(op: LoadOp) -> (MemoryAccessWidth, Option<SignExtension>) {
    let width = match (op.result_type(), op.bytes()) {
        (_, 1) => MemoryAccessWidth::I8,
        (_, 2) => MemoryAccessWidth::I16,
        (ValType::I64, 4) => MemoryAccessWidth::I32,
        _ => MemoryAccessWidth::Full,
    };
    let sign = match width {
        MemoryAccessWidth::Full => None,
        _ if op.is_signed() => Some(SignExtension::Signed),
        _ => Some(SignExtension::Unsigned),
    };
    (width, sign)
}

fn store_width(op: StoreOp) -> MemoryAccessWidth {
    match (op.value_type(), op.bytes()) {
        (_, 1) => MemoryAccessWidth::I8,
        (_, 2) => MemoryAccessWidth::I16,
        (ValType::I64, 4) => MemoryAccessWidth::I32,
        _ => MemoryAccessWidth::Full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_widths() {
        assert_eq!(load_width(LoadOp::I32Load), (MemoryAccessWidth::Full, None));
        assert_eq!(
            load_width(LoadOp::I64Load32U),
            (MemoryAccessWidth::I32, Some(SignExtension::Unsigned))
        );
        assert_eq!(
            load_width(LoadOp::I32Load8S),
            (MemoryAccessWidth::I8, Some(SignExtension::Signed))
        );
        assert_eq!(load_width(LoadOp::F64Load), (MemoryAccessWidth::Full, None));
    }

    #[test]
    fn test_store_widths() {
        assert_eq!(store_width(StoreOp::I64Store32), MemoryAccessWidth::I32);
        assert_eq!(store_width(StoreOp::I32Store16), MemoryAccessWidth::I16);
        assert_eq!(store_width(StoreOp::F32Store), MemoryAccessWidth::Full);
    }
}
