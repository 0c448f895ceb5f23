//! Type mapping from WebAssembly types to QBE representations.
//!
//! | Wasm            | QBE                                          |
//! |-----------------|----------------------------------------------|
//! | `i32`           | `w`                                          |
//! | `i64`           | `l`                                          |
//! | `f32`           | `s`                                          |
//! | `f64`           | `d`                                          |
//! | `v128`          | `l` pointer to 16-byte aligned storage       |
//! | references      | `l` handle (0 is null, odd values are i31)   |

use crate::decoder::{FieldType, FuncType, StorageType, ValType};
use crate::ir::{MemoryAccessWidth, SignExtension};
use wasm2qbe_abi::{Class, ARRAY_HEADER_SIZE, FIELD_SIZE, FIELD_SIZE_V128, V128_SIZE};

/// Register class holding a value of `ty`.
pub fn class_of(ty: ValType) -> Class {
    match ty {
        ValType::I32 => Class::W,
        ValType::I64 => Class::L,
        ValType::F32 => Class::S,
        ValType::F64 => Class::D,
        ValType::V128 | ValType::Ref(_) => Class::L,
    }
}

/// Bytes occupied by a value of `ty` in memory (locals, globals, payloads).
pub fn slot_size(ty: ValType) -> u32 {
    match ty {
        ValType::I32 | ValType::F32 => 4,
        ValType::I64 | ValType::F64 | ValType::Ref(_) => 8,
        ValType::V128 => V128_SIZE,
    }
}

/// The `alloc` instruction reserving a slot for `ty`.
pub fn alloc_op(ty: ValType) -> &'static str {
    match slot_size(ty) {
        4 => "alloc4",
        8 => "alloc8",
        _ => "alloc16",
    }
}

/// QBE load instruction for an access of `ty` with the given width.
pub fn load_op(ty: ValType, width: MemoryAccessWidth, sign: Option<SignExtension>) -> &'static str {
    let signed = sign != Some(SignExtension::Unsigned);
    match (width, signed) {
        (MemoryAccessWidth::I8, true) => "loadsb",
        (MemoryAccessWidth::I8, false) => "loadub",
        (MemoryAccessWidth::I16, true) => "loadsh",
        (MemoryAccessWidth::I16, false) => "loaduh",
        (MemoryAccessWidth::I32, true) => "loadsw",
        (MemoryAccessWidth::I32, false) => "loaduw",
        (MemoryAccessWidth::Full, _) => match class_of(ty) {
            Class::W => "loadw",
            Class::L => "loadl",
            Class::S => "loads",
            Class::D => "loadd",
        },
    }
}

/// QBE store instruction for an access of `ty` with the given width.
pub fn store_op(ty: ValType, width: MemoryAccessWidth) -> &'static str {
    match width {
        MemoryAccessWidth::I8 => "storeb",
        MemoryAccessWidth::I16 => "storeh",
        MemoryAccessWidth::I32 => "storew",
        MemoryAccessWidth::Full => match class_of(ty) {
            Class::W => "storew",
            Class::L => "storel",
            Class::S => "stores",
            Class::D => "stored",
        },
    }
}

/// Where a function result travels at the ABI level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultLoc {
    /// Returned in the return register.
    Register,
    /// Written through the n-th out-pointer appended after the parameters.
    OutPointer(usize),
}

/// A function signature lowered to QBE classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiSignature {
    pub params: Vec<Class>,
    pub ret: Option<Class>,
    /// One entry per Wasm result, in result order.
    pub results: Vec<ResultLoc>,
    /// Number of out-pointer parameters following `params`.
    pub out_pointers: usize,
}

/// Lower a Wasm signature: result 0 is returned in a register unless it is
/// `v128`; every other result goes through an `l` out-pointer.
pub fn lower_signature(ft: &FuncType) -> AbiSignature {
    let params = ft.params.iter().map(|t| class_of(*t)).collect();
    let mut ret = None;
    let mut results = Vec::with_capacity(ft.results.len());
    let mut out_pointers = 0;
    for (i, ty) in ft.results.iter().enumerate() {
        if i == 0 && *ty != ValType::V128 {
            ret = Some(class_of(*ty));
            results.push(ResultLoc::Register);
        } else {
            results.push(ResultLoc::OutPointer(out_pointers));
            out_pointers += 1;
        }
    }
    AbiSignature {
        params,
        ret,
        results,
        out_pointers,
    }
}

/// Access width and extension for a GC field of `storage` type.
pub fn storage_access(storage: StorageType, signed: bool) -> (ValType, MemoryAccessWidth, Option<SignExtension>) {
    let sign = Some(if signed {
        SignExtension::Signed
    } else {
        SignExtension::Unsigned
    });
    match storage {
        StorageType::I8 => (ValType::I32, MemoryAccessWidth::I8, sign),
        StorageType::I16 => (ValType::I32, MemoryAccessWidth::I16, sign),
        StorageType::Val(ty) => (ty, MemoryAccessWidth::Full, None),
    }
}

/// Size of one GC struct field or array element slot.
pub fn field_slot_size(storage: StorageType) -> u32 {
    if storage == StorageType::Val(ValType::V128) {
        FIELD_SIZE_V128
    } else {
        FIELD_SIZE
    }
}

/// Byte offset of every field and the total size in 8-byte slots.
pub fn struct_layout(fields: &[FieldType]) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut offset = 0;
    for f in fields {
        offsets.push(offset);
        offset += field_slot_size(f.storage);
    }
    (offsets, offset / FIELD_SIZE)
}

/// Byte offset of the first array element.
pub fn array_elements_offset() -> u32 {
    ARRAY_HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RefType;

    #[test]
    fn test_class_mapping() {
        assert_eq!(class_of(ValType::I32), Class::W);
        assert_eq!(class_of(ValType::F64), Class::D);
        assert_eq!(class_of(ValType::V128), Class::L);
        assert_eq!(class_of(ValType::Ref(RefType::EXTERNREF)), Class::L);
    }

    #[test]
    fn test_load_store_ops() {
        assert_eq!(load_op(ValType::I32, MemoryAccessWidth::Full, None), "loadw");
        assert_eq!(
            load_op(ValType::I64, MemoryAccessWidth::I32, Some(SignExtension::Unsigned)),
            "loaduw"
        );
        assert_eq!(
            load_op(ValType::I32, MemoryAccessWidth::I8, Some(SignExtension::Signed)),
            "loadsb"
        );
        assert_eq!(store_op(ValType::F32, MemoryAccessWidth::Full), "stores");
        assert_eq!(store_op(ValType::I64, MemoryAccessWidth::I16), "storeh");
    }

    #[test]
    fn test_slot_sizes() {
        assert_eq!(slot_size(ValType::F32), 4);
        assert_eq!(slot_size(ValType::FUNCREF), 8);
        assert_eq!(alloc_op(ValType::V128), "alloc16");
        assert_eq!(alloc_op(ValType::I32), "alloc4");
    }

    #[test]
    fn test_signature_lowering() {
        let ft = FuncType::new(
            vec![ValType::I32, ValType::F64],
            vec![ValType::I64, ValType::F32, ValType::I32],
        );
        let sig = lower_signature(&ft);
        assert_eq!(sig.params, vec![Class::W, Class::D]);
        assert_eq!(sig.ret, Some(Class::L));
        assert_eq!(
            sig.results,
            vec![
                ResultLoc::Register,
                ResultLoc::OutPointer(0),
                ResultLoc::OutPointer(1)
            ]
        );
        assert_eq!(sig.out_pointers, 2);
    }

    #[test]
    fn test_v128_result_goes_through_pointer() {
        let sig = lower_signature(&FuncType::new(vec![], vec![ValType::V128]));
        assert_eq!(sig.ret, None);
        assert_eq!(sig.results, vec![ResultLoc::OutPointer(0)]);
    }

    #[test]
    fn test_struct_layout() {
        let f = |storage| FieldType {
            storage,
            mutable: true,
        };
        let (offsets, slots) = struct_layout(&[
            f(StorageType::I8),
            f(StorageType::Val(ValType::V128)),
            f(StorageType::Val(ValType::F64)),
        ]);
        assert_eq!(offsets, vec![0, 8, 24]);
        assert_eq!(slots, 4);
    }
}
