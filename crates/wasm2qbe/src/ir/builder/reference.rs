//! Reference and GC instructions.
//!
//! References are `l` handles: 0 is null, odd values are `i31ref`s (the
//! payload shifted left by one) and everything else points at a runtime
//! object. Struct fields and array elements are read and written inline;
//! allocation and type tests go through the runtime.

use super::core::IrBuilder;
use crate::decoder::{FieldType, HeapType, RefType, ValType};
use crate::ir::types::*;
use crate::types::{array_elements_offset, field_slot_size, storage_access, struct_layout};
use anyhow::{bail, Context, Result};
use wasm2qbe_abi::{RuntimeFn, TrapKind};

impl<'m> IrBuilder<'m> {
    pub(super) fn translate_ref_is_null(&mut self) -> Result<()> {
        let r = self.pop()?;
        let zero = self.emit_const(IrValue::I64(0));
        let dest = self.emit_binop(BinOp::I64Eq, r, zero);
        self.push(dest);
        Ok(())
    }

    /// `br_on_null`: branch (dropping the reference) when it is null.
    pub(super) fn translate_br_on_null(&mut self, depth: u32) -> Result<()> {
        let r = self.pop()?;
        let zero = self.emit_const(IrValue::I64(0));
        let is_null = self.emit_binop(BinOp::I64Eq, r, zero);
        self.branch_if(is_null, depth)?;
        self.push(r);
        Ok(())
    }

    /// `br_on_non_null`: branch with the reference when it is not null.
    pub(super) fn translate_br_on_non_null(&mut self, depth: u32) -> Result<()> {
        let r = self.pop()?;
        let zero = self.emit_const(IrValue::I64(0));
        let non_null = self.emit_binop(BinOp::I64Ne, r, zero);
        self.push(r);
        self.branch_if(non_null, depth)?;
        self.pop()?;
        Ok(())
    }

    // ─── Structs ───────────────────────────────────────────────────────────

    fn struct_fields(&self, type_idx: u32) -> Result<Vec<FieldType>> {
        Ok(self
            .module
            .types
            .get(type_idx as usize)
            .and_then(|t| t.as_struct())
            .with_context(|| format!("type {} is not a struct type", type_idx))?
            .to_vec())
    }

    fn array_field(&self, type_idx: u32) -> Result<FieldType> {
        self.module
            .types
            .get(type_idx as usize)
            .and_then(|t| t.as_array())
            .copied()
            .with_context(|| format!("type {} is not an array type", type_idx))
    }

    pub(super) fn translate_struct_new(&mut self, type_idx: u32, default: bool) -> Result<()> {
        let fields = self.struct_fields(type_idx)?;
        let (offsets, slots) = struct_layout(&fields);
        let values = if default {
            Vec::new()
        } else {
            self.pop_n(fields.len())?
        };

        let ty = self.emit_const(IrValue::I32(type_idx as i32));
        let slots = self.emit_const(IrValue::I32(slots as i32));
        let func = if default {
            RuntimeFn::StructNewDefault
        } else {
            RuntimeFn::StructNew
        };
        let obj = self.emit_runtime_value(func, vec![ty, slots], ref_to(type_idx))?;
        for ((field, offset), value) in fields.iter().zip(&offsets).zip(values) {
            let (ty, width, _) = storage_access(field.storage, false);
            self.emit(IrInstr::FieldStore {
                ty,
                width,
                base: obj,
                offset: *offset,
                value,
            });
        }
        self.push(obj);
        Ok(())
    }

    pub(super) fn translate_struct_get(&mut self, type_idx: u32, field: u32, signed: bool) -> Result<()> {
        let fields = self.struct_fields(type_idx)?;
        let (offsets, _) = struct_layout(&fields);
        let storage = fields
            .get(field as usize)
            .with_context(|| format!("struct type {} has no field {}", type_idx, field))?
            .storage;

        let obj = self.pop()?;
        self.emit_null_check(obj);
        let (ty, width, sign) = storage_access(storage, signed);
        let dest = self.new_var(ty);
        self.emit(IrInstr::FieldLoad {
            dest,
            ty,
            width,
            sign: if storage.is_packed() { sign } else { None },
            base: obj,
            offset: offsets[field as usize],
        });
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_struct_set(&mut self, type_idx: u32, field: u32) -> Result<()> {
        let fields = self.struct_fields(type_idx)?;
        let (offsets, _) = struct_layout(&fields);
        let storage = fields
            .get(field as usize)
            .with_context(|| format!("struct type {} has no field {}", type_idx, field))?
            .storage;

        let value = self.pop()?;
        let obj = self.pop()?;
        self.emit_null_check(obj);
        let (ty, width, _) = storage_access(storage, false);
        self.emit(IrInstr::FieldStore {
            ty,
            width,
            base: obj,
            offset: offsets[field as usize],
            value,
        });
        Ok(())
    }

    // ─── Arrays ────────────────────────────────────────────────────────────

    /// Bit pattern of an array initialiser as the runtime's `l` argument.
    fn init_bits(&mut self, value: VarId) -> Result<VarId> {
        Ok(match self.var_type(value) {
            ValType::I32 => self.emit_unop(UnOp::I64ExtendI32U, value),
            ValType::F32 => {
                let bits = self.emit_unop(UnOp::I32ReinterpretF32, value);
                self.emit_unop(UnOp::I64ExtendI32U, bits)
            }
            ValType::F64 => self.emit_unop(UnOp::I64ReinterpretF64, value),
            ValType::I64 | ValType::Ref(_) => value,
            ValType::V128 => bail!("unsupported: arrays of v128"),
        })
    }

    pub(super) fn translate_array_new(&mut self, type_idx: u32, default: bool) -> Result<()> {
        let field = self.array_field(type_idx)?;
        if field_slot_size(field.storage) != wasm2qbe_abi::FIELD_SIZE {
            bail!("unsupported: arrays of v128");
        }
        let len = self.pop()?;
        let ty = self.emit_const(IrValue::I32(type_idx as i32));
        let arr = if default {
            self.emit_runtime_value(RuntimeFn::ArrayNewDefault, vec![ty, len], ref_to(type_idx))?
        } else {
            let init = self.pop()?;
            let bits = self.init_bits(init)?;
            self.emit_runtime_value(RuntimeFn::ArrayNew, vec![ty, bits, len], ref_to(type_idx))?
        };
        self.push(arr);
        Ok(())
    }

    pub(super) fn translate_array_new_fixed(&mut self, type_idx: u32, len: u32) -> Result<()> {
        let field = self.array_field(type_idx)?;
        if field_slot_size(field.storage) != wasm2qbe_abi::FIELD_SIZE {
            bail!("unsupported: arrays of v128");
        }
        let values = self.pop_n(len as usize)?;
        let ty = self.emit_const(IrValue::I32(type_idx as i32));
        let len_var = self.emit_const(IrValue::I32(len as i32));
        let arr = self.emit_runtime_value(
            RuntimeFn::ArrayNewDefault,
            vec![ty, len_var],
            ref_to(type_idx),
        )?;
        let (elem_ty, width, _) = storage_access(field.storage, false);
        for (i, value) in values.into_iter().enumerate() {
            self.emit(IrInstr::FieldStore {
                ty: elem_ty,
                width,
                base: arr,
                offset: array_elements_offset() + i as u32 * wasm2qbe_abi::FIELD_SIZE,
                value,
            });
        }
        self.push(arr);
        Ok(())
    }

    /// Null-check `arr`, bounds-check `index` against its length and return
    /// the address of the element minus the header size.
    fn array_element_base(&mut self, arr: VarId, index: VarId) -> VarId {
        self.emit_null_check(arr);
        let len = self.new_var(ValType::I32);
        self.emit(IrInstr::FieldLoad {
            dest: len,
            ty: ValType::I32,
            width: MemoryAccessWidth::Full,
            sign: None,
            base: arr,
            offset: 0,
        });
        let oob = self.emit_binop(BinOp::I32GeU, index, len);
        self.emit_trap_if(oob, TrapKind::OutOfBounds);

        let index = self.emit_unop(UnOp::I64ExtendI32U, index);
        let shift = self.emit_const(IrValue::I64(wasm2qbe_abi::FIELD_SIZE.trailing_zeros() as i64));
        let scaled = self.emit_binop(BinOp::I64Shl, index, shift);
        self.emit_binop(BinOp::I64Add, arr, scaled)
    }

    pub(super) fn translate_array_get(&mut self, type_idx: u32, signed: bool) -> Result<()> {
        let field = self.array_field(type_idx)?;
        let index = self.pop()?;
        let arr = self.pop()?;
        let base = self.array_element_base(arr, index);
        let (ty, width, sign) = storage_access(field.storage, signed);
        let dest = self.new_var(ty);
        self.emit(IrInstr::FieldLoad {
            dest,
            ty,
            width,
            sign: if field.storage.is_packed() { sign } else { None },
            base,
            offset: array_elements_offset(),
        });
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_array_set(&mut self, type_idx: u32) -> Result<()> {
        let field = self.array_field(type_idx)?;
        let value = self.pop()?;
        let index = self.pop()?;
        let arr = self.pop()?;
        let base = self.array_element_base(arr, index);
        let (ty, width, _) = storage_access(field.storage, false);
        self.emit(IrInstr::FieldStore {
            ty,
            width,
            base,
            offset: array_elements_offset(),
            value,
        });
        Ok(())
    }

    pub(super) fn translate_array_len(&mut self) -> Result<()> {
        let arr = self.pop()?;
        self.emit_null_check(arr);
        let dest = self.new_var(ValType::I32);
        self.emit(IrInstr::FieldLoad {
            dest,
            ty: ValType::I32,
            width: MemoryAccessWidth::Full,
            sign: None,
            base: arr,
            offset: 0,
        });
        self.push(dest);
        Ok(())
    }

    // ─── Casts and i31 ─────────────────────────────────────────────────────

    fn emit_ref_test(&mut self, r: VarId, heap: HeapType, nullable: bool) -> Result<VarId> {
        let code = self.emit_const(IrValue::I32(heap.code() as i32));
        let func = if nullable {
            RuntimeFn::RefTestNull
        } else {
            RuntimeFn::RefTest
        };
        self.emit_runtime_value(func, vec![r, code], ValType::I32)
    }

    pub(super) fn translate_ref_test(&mut self, heap: HeapType, nullable: bool) -> Result<()> {
        let r = self.pop()?;
        let dest = self.emit_ref_test(r, heap, nullable)?;
        self.push(dest);
        Ok(())
    }

    /// `ref.cast`: the runtime traps with `cast_failure` on mismatch.
    pub(super) fn translate_ref_cast(&mut self, heap: HeapType, nullable: bool) -> Result<()> {
        let r = self.pop()?;
        let code = self.emit_const(IrValue::I32(heap.code() as i32));
        let func = if nullable {
            RuntimeFn::RefCastNull
        } else {
            RuntimeFn::RefCast
        };
        let ty = ValType::Ref(RefType { nullable, heap });
        let dest = self.emit_runtime_value(func, vec![r, code], ty)?;
        self.push(dest);
        Ok(())
    }

    /// `br_on_cast` (`fail` false) and `br_on_cast_fail` (`fail` true). The
    /// reference itself is the carried value either way.
    pub(super) fn translate_br_on_cast(
        &mut self,
        depth: u32,
        to: (bool, HeapType),
        fail: bool,
    ) -> Result<()> {
        let r = self.pop()?;
        let (nullable, heap) = to;
        let matches = self.emit_ref_test(r, heap, nullable)?;
        let cond = if fail {
            self.emit_unop(UnOp::I32Eqz, matches)
        } else {
            matches
        };
        self.push(r);
        self.branch_if(cond, depth)
    }

    pub(super) fn translate_ref_i31(&mut self) -> Result<()> {
        let value = self.pop()?;
        let one = self.emit_const(IrValue::I32(1));
        let shifted = self.emit_binop(BinOp::I32Shl, value, one);
        let tagged = self.emit_binop(BinOp::I32Or, shifted, one);
        let dest = self.emit_unop(UnOp::I64ExtendI32U, tagged);
        self.push(dest);
        Ok(())
    }

    pub(super) fn translate_i31_get(&mut self, signed: bool) -> Result<()> {
        let r = self.pop()?;
        self.emit_null_check(r);
        let low = self.emit_unop(UnOp::I32WrapI64, r);
        let one = self.emit_const(IrValue::I32(1));
        let shift = if signed { BinOp::I32ShrS } else { BinOp::I32ShrU };
        let dest = self.emit_binop(shift, low, one);
        self.push(dest);
        Ok(())
    }
}

fn ref_to(type_idx: u32) -> ValType {
    ValType::Ref(RefType::non_null(HeapType::Concrete(type_idx)))
}

