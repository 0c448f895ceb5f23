//! Runtime helper functions called by compiled code.
//!
//! Each helper has a fixed symbol and a fixed signature expressed in the four
//! QBE base classes. Memory addresses and lengths are always passed as `l`,
//! so memory32 and memory64 share one entry point; table indices are `w`.

/// QBE base value class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    /// 32-bit integer.
    W,
    /// 64-bit integer (also pointers and references).
    L,
    /// 32-bit float.
    S,
    /// 64-bit float.
    D,
}

impl Class {
    /// The single-letter QBE spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Class::W => "w",
            Class::L => "l",
            Class::S => "s",
            Class::D => "d",
        }
    }

    /// Size in bytes.
    pub fn size(self) -> u32 {
        match self {
            Class::W | Class::S => 4,
            Class::L | Class::D => 8,
        }
    }
}

impl core::fmt::Display for Class {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter and result classes of a runtime helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [Class],
    pub result: Option<Class>,
}

const fn sig(params: &'static [Class], result: Option<Class>) -> Signature {
    Signature { params, result }
}

use Class::{D, L, S, W};

/// A runtime helper symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFn {
    // Integer bit operations without a QBE instruction
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Rotl,
    I32Rotr,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Rotl,
    I64Rotr,

    // Float operations without a QBE instruction
    F32Abs,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Min,
    F32Max,
    F32Copysign,
    F64Abs,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Min,
    F64Max,
    F64Copysign,

    // Linear memory
    MemoryNew,
    MemoryBase,
    MemoryBytes,
    MemorySizePages,
    MemorySizePages64,
    MemoryGrow,
    MemoryGrow64,
    MemoryInit,
    DataDrop,
    MemoryCopy,
    MemoryFill,

    // Tables
    TableNew,
    TableGet,
    TableSet,
    TableSize,
    TableGrow,
    TableFill,
    TableCopy,
    TableInit,
    ElemDrop,

    // Exceptions
    PushExceptionHandler,
    PopExceptionHandler,
    Throw,
    Rethrow,
    GetException,
    ExceptionTag,
    ExceptionPayload,

    // GC
    StructNew,
    StructNewDefault,
    ArrayNew,
    ArrayNewDefault,
    RefTest,
    RefTestNull,
    RefCast,
    RefCastNull,
}

impl RuntimeFn {
    /// Every helper, in declaration order.
    pub const ALL: &'static [RuntimeFn] = &[
        RuntimeFn::I32Clz,
        RuntimeFn::I32Ctz,
        RuntimeFn::I32Popcnt,
        RuntimeFn::I32Rotl,
        RuntimeFn::I32Rotr,
        RuntimeFn::I64Clz,
        RuntimeFn::I64Ctz,
        RuntimeFn::I64Popcnt,
        RuntimeFn::I64Rotl,
        RuntimeFn::I64Rotr,
        RuntimeFn::F32Abs,
        RuntimeFn::F32Ceil,
        RuntimeFn::F32Floor,
        RuntimeFn::F32Trunc,
        RuntimeFn::F32Nearest,
        RuntimeFn::F32Sqrt,
        RuntimeFn::F32Min,
        RuntimeFn::F32Max,
        RuntimeFn::F32Copysign,
        RuntimeFn::F64Abs,
        RuntimeFn::F64Ceil,
        RuntimeFn::F64Floor,
        RuntimeFn::F64Trunc,
        RuntimeFn::F64Nearest,
        RuntimeFn::F64Sqrt,
        RuntimeFn::F64Min,
        RuntimeFn::F64Max,
        RuntimeFn::F64Copysign,
        RuntimeFn::MemoryNew,
        RuntimeFn::MemoryBase,
        RuntimeFn::MemoryBytes,
        RuntimeFn::MemorySizePages,
        RuntimeFn::MemorySizePages64,
        RuntimeFn::MemoryGrow,
        RuntimeFn::MemoryGrow64,
        RuntimeFn::MemoryInit,
        RuntimeFn::DataDrop,
        RuntimeFn::MemoryCopy,
        RuntimeFn::MemoryFill,
        RuntimeFn::TableNew,
        RuntimeFn::TableGet,
        RuntimeFn::TableSet,
        RuntimeFn::TableSize,
        RuntimeFn::TableGrow,
        RuntimeFn::TableFill,
        RuntimeFn::TableCopy,
        RuntimeFn::TableInit,
        RuntimeFn::ElemDrop,
        RuntimeFn::PushExceptionHandler,
        RuntimeFn::PopExceptionHandler,
        RuntimeFn::Throw,
        RuntimeFn::Rethrow,
        RuntimeFn::GetException,
        RuntimeFn::ExceptionTag,
        RuntimeFn::ExceptionPayload,
        RuntimeFn::StructNew,
        RuntimeFn::StructNewDefault,
        RuntimeFn::ArrayNew,
        RuntimeFn::ArrayNewDefault,
        RuntimeFn::RefTest,
        RuntimeFn::RefTestNull,
        RuntimeFn::RefCast,
        RuntimeFn::RefCastNull,
    ];

    /// Linker symbol of the helper.
    pub fn symbol(self) -> &'static str {
        match self {
            RuntimeFn::I32Clz => "__wasm_i32_clz",
            RuntimeFn::I32Ctz => "__wasm_i32_ctz",
            RuntimeFn::I32Popcnt => "__wasm_i32_popcnt",
            RuntimeFn::I32Rotl => "__wasm_i32_rotl",
            RuntimeFn::I32Rotr => "__wasm_i32_rotr",
            RuntimeFn::I64Clz => "__wasm_i64_clz",
            RuntimeFn::I64Ctz => "__wasm_i64_ctz",
            RuntimeFn::I64Popcnt => "__wasm_i64_popcnt",
            RuntimeFn::I64Rotl => "__wasm_i64_rotl",
            RuntimeFn::I64Rotr => "__wasm_i64_rotr",
            RuntimeFn::F32Abs => "__wasm_f32_abs",
            RuntimeFn::F32Ceil => "__wasm_f32_ceil",
            RuntimeFn::F32Floor => "__wasm_f32_floor",
            RuntimeFn::F32Trunc => "__wasm_f32_trunc",
            RuntimeFn::F32Nearest => "__wasm_f32_nearest",
            RuntimeFn::F32Sqrt => "__wasm_f32_sqrt",
            RuntimeFn::F32Min => "__wasm_f32_min",
            RuntimeFn::F32Max => "__wasm_f32_max",
            RuntimeFn::F32Copysign => "__wasm_f32_copysign",
            RuntimeFn::F64Abs => "__wasm_f64_abs",
            RuntimeFn::F64Ceil => "__wasm_f64_ceil",
            RuntimeFn::F64Floor => "__wasm_f64_floor",
            RuntimeFn::F64Trunc => "__wasm_f64_trunc",
            RuntimeFn::F64Nearest => "__wasm_f64_nearest",
            RuntimeFn::F64Sqrt => "__wasm_f64_sqrt",
            RuntimeFn::F64Min => "__wasm_f64_min",
            RuntimeFn::F64Max => "__wasm_f64_max",
            RuntimeFn::F64Copysign => "__wasm_f64_copysign",
            RuntimeFn::MemoryNew => "__wasm_memory_new",
            RuntimeFn::MemoryBase => "__wasm_memory_base",
            RuntimeFn::MemoryBytes => "__wasm_memory_bytes",
            RuntimeFn::MemorySizePages => "__wasm_memory_size_pages",
            RuntimeFn::MemorySizePages64 => "__wasm_memory_size_pages64",
            RuntimeFn::MemoryGrow => "__wasm_memory_grow",
            RuntimeFn::MemoryGrow64 => "__wasm_memory_grow64",
            RuntimeFn::MemoryInit => "__wasm_memory_init_seg",
            RuntimeFn::DataDrop => "__wasm_data_drop",
            RuntimeFn::MemoryCopy => "__wasm_memory_copy",
            RuntimeFn::MemoryFill => "__wasm_memory_fill",
            RuntimeFn::TableNew => "__wasm_table_new",
            RuntimeFn::TableGet => "__wasm_table_get",
            RuntimeFn::TableSet => "__wasm_table_set",
            RuntimeFn::TableSize => "__wasm_table_size_op",
            RuntimeFn::TableGrow => "__wasm_table_grow",
            RuntimeFn::TableFill => "__wasm_table_fill",
            RuntimeFn::TableCopy => "__wasm_table_copy",
            RuntimeFn::TableInit => "__wasm_table_init",
            RuntimeFn::ElemDrop => "__wasm_elem_drop",
            RuntimeFn::PushExceptionHandler => "__wasm_push_exception_handler",
            RuntimeFn::PopExceptionHandler => "__wasm_pop_exception_handler",
            RuntimeFn::Throw => "__wasm_throw",
            RuntimeFn::Rethrow => "__wasm_rethrow",
            RuntimeFn::GetException => "__wasm_get_exception",
            RuntimeFn::ExceptionTag => "__wasm_exception_tag",
            RuntimeFn::ExceptionPayload => "__wasm_exception_payload",
            RuntimeFn::StructNew => "__wasm_struct_new",
            RuntimeFn::StructNewDefault => "__wasm_struct_new_default",
            RuntimeFn::ArrayNew => "__wasm_array_new",
            RuntimeFn::ArrayNewDefault => "__wasm_array_new_default",
            RuntimeFn::RefTest => "__wasm_ref_test",
            RuntimeFn::RefTestNull => "__wasm_ref_test_null",
            RuntimeFn::RefCast => "__wasm_ref_cast",
            RuntimeFn::RefCastNull => "__wasm_ref_cast_null",
        }
    }

    /// Parameter and result classes.
    ///
    /// Memory helpers take the memory index first; addresses and lengths are
    /// `l`. `MemoryNew` takes `(mem, min_pages, max_pages, is64)` with
    /// `max_pages = -1` for "no maximum". `MemoryInit` takes
    /// `(mem, seg, data, data_len, dest, src, len)` so the runtime needs no
    /// segment registry beyond the dropped flags.
    ///
    /// `StructNew` takes `(type_idx, slots)` where `slots` counts 8-byte
    /// units (a `v128` field takes two); the fields are stored by compiled
    /// code afterwards. `ArrayNew` takes `(type_idx, init_bits, len)`.
    /// `RefTest`/`RefCast` take the target heap type code: a type index, or
    /// the negative binary code of an abstract heap type.
    ///
    /// `PushExceptionHandler` returns twice: 0 when the handler is installed
    /// and non-zero when an exception is delivered to it. Delivery removes
    /// the handler, so only handlers left normally are popped by compiled code.
    pub fn signature(self) -> Signature {
        match self {
            RuntimeFn::I32Clz | RuntimeFn::I32Ctz | RuntimeFn::I32Popcnt => sig(&[W], Some(W)),
            RuntimeFn::I32Rotl | RuntimeFn::I32Rotr => sig(&[W, W], Some(W)),
            RuntimeFn::I64Clz | RuntimeFn::I64Ctz | RuntimeFn::I64Popcnt => sig(&[L], Some(L)),
            RuntimeFn::I64Rotl | RuntimeFn::I64Rotr => sig(&[L, L], Some(L)),
            RuntimeFn::F32Abs
            | RuntimeFn::F32Ceil
            | RuntimeFn::F32Floor
            | RuntimeFn::F32Trunc
            | RuntimeFn::F32Nearest
            | RuntimeFn::F32Sqrt => sig(&[S], Some(S)),
            RuntimeFn::F32Min | RuntimeFn::F32Max | RuntimeFn::F32Copysign => {
                sig(&[S, S], Some(S))
            }
            RuntimeFn::F64Abs
            | RuntimeFn::F64Ceil
            | RuntimeFn::F64Floor
            | RuntimeFn::F64Trunc
            | RuntimeFn::F64Nearest
            | RuntimeFn::F64Sqrt => sig(&[D], Some(D)),
            RuntimeFn::F64Min | RuntimeFn::F64Max | RuntimeFn::F64Copysign => {
                sig(&[D, D], Some(D))
            }
            RuntimeFn::MemoryNew => sig(&[W, L, L, W], None),
            RuntimeFn::MemoryBase | RuntimeFn::MemoryBytes => sig(&[W], Some(L)),
            RuntimeFn::MemorySizePages => sig(&[W], Some(W)),
            RuntimeFn::MemorySizePages64 => sig(&[W], Some(L)),
            RuntimeFn::MemoryGrow => sig(&[W, W], Some(W)),
            RuntimeFn::MemoryGrow64 => sig(&[W, L], Some(L)),
            RuntimeFn::MemoryInit => sig(&[W, W, L, W, L, W, W], None),
            RuntimeFn::DataDrop => sig(&[W], None),
            RuntimeFn::MemoryCopy => sig(&[W, W, L, L, L], None),
            RuntimeFn::MemoryFill => sig(&[W, L, W, L], None),
            RuntimeFn::TableNew => sig(&[W, W, W, L], None),
            RuntimeFn::TableGet => sig(&[W, W], Some(L)),
            RuntimeFn::TableSet => sig(&[W, W, L], None),
            RuntimeFn::TableSize => sig(&[W], Some(W)),
            RuntimeFn::TableGrow => sig(&[W, L, W], Some(W)),
            RuntimeFn::TableFill => sig(&[W, W, L, W], None),
            RuntimeFn::TableCopy => sig(&[W, W, W, W, W], None),
            RuntimeFn::TableInit => sig(&[W, W, L, W, W, W, W], None),
            RuntimeFn::ElemDrop => sig(&[W], None),
            RuntimeFn::PushExceptionHandler => sig(&[], Some(W)),
            RuntimeFn::PopExceptionHandler => sig(&[], None),
            RuntimeFn::Throw => sig(&[W, L, W], None),
            RuntimeFn::Rethrow => sig(&[L], None),
            RuntimeFn::GetException => sig(&[], Some(L)),
            RuntimeFn::ExceptionTag => sig(&[L], Some(W)),
            RuntimeFn::ExceptionPayload => sig(&[L, W], Some(L)),
            RuntimeFn::StructNew | RuntimeFn::StructNewDefault => sig(&[W, W], Some(L)),
            RuntimeFn::ArrayNew => sig(&[W, L, W], Some(L)),
            RuntimeFn::ArrayNewDefault => sig(&[W, W], Some(L)),
            RuntimeFn::RefTest | RuntimeFn::RefTestNull => sig(&[L, W], Some(W)),
            RuntimeFn::RefCast | RuntimeFn::RefCastNull => sig(&[L, W], Some(L)),
        }
    }

    /// Helpers that transfer control away and never return normally.
    pub fn is_noreturn(self) -> bool {
        matches!(self, RuntimeFn::Throw | RuntimeFn::Rethrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_use_reserved_prefix() {
        for f in [
            RuntimeFn::I32Clz,
            RuntimeFn::F64Copysign,
            RuntimeFn::MemoryGrow64,
            RuntimeFn::TableInit,
            RuntimeFn::PushExceptionHandler,
            RuntimeFn::RefCastNull,
        ] {
            assert!(f.symbol().starts_with(crate::RESERVED_PREFIX), "{:?}", f);
        }
    }

    #[test]
    fn memory_helpers_take_long_addresses() {
        let fill = RuntimeFn::MemoryFill.signature();
        assert_eq!(fill.params, &[W, L, W, L]);
        assert_eq!(fill.result, None);
        assert_eq!(RuntimeFn::MemoryBase.signature().result, Some(L));
    }

    #[test]
    fn throw_is_noreturn() {
        assert!(RuntimeFn::Throw.is_noreturn());
        assert!(RuntimeFn::Rethrow.is_noreturn());
        assert!(!RuntimeFn::GetException.is_noreturn());
    }

    #[test]
    fn all_symbols_are_distinct() {
        for (i, a) in RuntimeFn::ALL.iter().enumerate() {
            for b in &RuntimeFn::ALL[i + 1..] {
                assert_ne!(a.symbol(), b.symbol());
            }
        }
    }

    #[test]
    fn class_sizes() {
        assert_eq!(Class::W.size(), 4);
        assert_eq!(Class::D.size(), 8);
        assert_eq!(Class::S.as_str(), "s");
    }
}
