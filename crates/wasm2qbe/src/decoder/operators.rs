//! Instruction decoding.
//!
//! Function bodies stay as bytes in the [`Module`](super::Module); the
//! validator and the IR builder each stream them through an
//! [`OperatorsReader`], which yields `(offset, Operator)` pairs.

use super::reader::{BinaryReader, Result};
use super::simd::{self, SimdOpInfo, SimdShape};
use super::types::{BlockType, HeapType, ValType};
use crate::error::ParseError;

/// Memory immediate: alignment exponent, memory index and static offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align: u32,
    pub memory: u32,
    pub offset: u64,
}

/// Memory load instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    I32Load,
    I64Load,
    F32Load,
    F64Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
}

impl LoadOp {
    /// Type pushed on the stack.
    pub fn result_type(self) -> ValType {
        match self {
            LoadOp::I32Load
            | LoadOp::I32Load8S
            | LoadOp::I32Load8U
            | LoadOp::I32Load16S
            | LoadOp::I32Load16U => ValType::I32,
            LoadOp::F32Load => ValType::F32,
            LoadOp::F64Load => ValType::F64,
            _ => ValType::I64,
        }
    }

    /// Access width in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            LoadOp::I32Load8S | LoadOp::I32Load8U | LoadOp::I64Load8S | LoadOp::I64Load8U => 1,
            LoadOp::I32Load16S | LoadOp::I32Load16U | LoadOp::I64Load16S | LoadOp::I64Load16U => 2,
            LoadOp::I32Load | LoadOp::F32Load | LoadOp::I64Load32S | LoadOp::I64Load32U => 4,
            LoadOp::I64Load | LoadOp::F64Load => 8,
        }
    }

    /// Whether a narrow load sign-extends (full-width loads return false).
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            LoadOp::I32Load8S
                | LoadOp::I32Load16S
                | LoadOp::I64Load8S
                | LoadOp::I64Load16S
                | LoadOp::I64Load32S
        )
    }
}

/// Memory store instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    I32Store,
    I64Store,
    F32Store,
    F64Store,
    I32Store8,
    I32Store16,
    I64Store8,
    I64Store16,
    I64Store32,
}

impl StoreOp {
    /// Type popped as the stored value.
    pub fn value_type(self) -> ValType {
        match self {
            StoreOp::I32Store | StoreOp::I32Store8 | StoreOp::I32Store16 => ValType::I32,
            StoreOp::F32Store => ValType::F32,
            StoreOp::F64Store => ValType::F64,
            _ => ValType::I64,
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            StoreOp::I32Store8 | StoreOp::I64Store8 => 1,
            StoreOp::I32Store16 | StoreOp::I64Store16 => 2,
            StoreOp::I32Store | StoreOp::F32Store | StoreOp::I64Store32 => 4,
            StoreOp::I64Store | StoreOp::F64Store => 8,
        }
    }
}

macro_rules! numeric_ops {
    ($($code:literal => $name:ident, $text:literal, [$($p:ident),*] -> $r:ident;)*) => {
        /// Stack-only numeric instructions: comparisons, arithmetic,
        /// conversions, sign extension and saturating truncation.
        ///
        /// Codes above `0xFF` are `0xFC`-prefixed (`0xFC00 | subopcode`).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NumericOp {
            $($name,)*
        }

        impl NumericOp {
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(NumericOp::$name),)*
                    _ => None,
                }
            }

            /// Operand types (in stack order) and result type.
            pub fn signature(self) -> (&'static [ValType], ValType) {
                match self {
                    $(NumericOp::$name => (&[$(ValType::$p),*], ValType::$r),)*
                }
            }

            /// Text-format mnemonic.
            pub fn name(self) -> &'static str {
                match self {
                    $(NumericOp::$name => $text,)*
                }
            }
        }
    };
}

numeric_ops! {
    0x45 => I32Eqz, "i32.eqz", [I32] -> I32;
    0x46 => I32Eq, "i32.eq", [I32, I32] -> I32;
    0x47 => I32Ne, "i32.ne", [I32, I32] -> I32;
    0x48 => I32LtS, "i32.lt_s", [I32, I32] -> I32;
    0x49 => I32LtU, "i32.lt_u", [I32, I32] -> I32;
    0x4A => I32GtS, "i32.gt_s", [I32, I32] -> I32;
    0x4B => I32GtU, "i32.gt_u", [I32, I32] -> I32;
    0x4C => I32LeS, "i32.le_s", [I32, I32] -> I32;
    0x4D => I32LeU, "i32.le_u", [I32, I32] -> I32;
    0x4E => I32GeS, "i32.ge_s", [I32, I32] -> I32;
    0x4F => I32GeU, "i32.ge_u", [I32, I32] -> I32;
    0x50 => I64Eqz, "i64.eqz", [I64] -> I32;
    0x51 => I64Eq, "i64.eq", [I64, I64] -> I32;
    0x52 => I64Ne, "i64.ne", [I64, I64] -> I32;
    0x53 => I64LtS, "i64.lt_s", [I64, I64] -> I32;
    0x54 => I64LtU, "i64.lt_u", [I64, I64] -> I32;
    0x55 => I64GtS, "i64.gt_s", [I64, I64] -> I32;
    0x56 => I64GtU, "i64.gt_u", [I64, I64] -> I32;
    0x57 => I64LeS, "i64.le_s", [I64, I64] -> I32;
    0x58 => I64LeU, "i64.le_u", [I64, I64] -> I32;
    0x59 => I64GeS, "i64.ge_s", [I64, I64] -> I32;
    0x5A => I64GeU, "i64.ge_u", [I64, I64] -> I32;
    0x5B => F32Eq, "f32.eq", [F32, F32] -> I32;
    0x5C => F32Ne, "f32.ne", [F32, F32] -> I32;
    0x5D => F32Lt, "f32.lt", [F32, F32] -> I32;
    0x5E => F32Gt, "f32.gt", [F32, F32] -> I32;
    0x5F => F32Le, "f32.le", [F32, F32] -> I32;
    0x60 => F32Ge, "f32.ge", [F32, F32] -> I32;
    0x61 => F64Eq, "f64.eq", [F64, F64] -> I32;
    0x62 => F64Ne, "f64.ne", [F64, F64] -> I32;
    0x63 => F64Lt, "f64.lt", [F64, F64] -> I32;
    0x64 => F64Gt, "f64.gt", [F64, F64] -> I32;
    0x65 => F64Le, "f64.le", [F64, F64] -> I32;
    0x66 => F64Ge, "f64.ge", [F64, F64] -> I32;
    0x67 => I32Clz, "i32.clz", [I32] -> I32;
    0x68 => I32Ctz, "i32.ctz", [I32] -> I32;
    0x69 => I32Popcnt, "i32.popcnt", [I32] -> I32;
    0x6A => I32Add, "i32.add", [I32, I32] -> I32;
    0x6B => I32Sub, "i32.sub", [I32, I32] -> I32;
    0x6C => I32Mul, "i32.mul", [I32, I32] -> I32;
    0x6D => I32DivS, "i32.div_s", [I32, I32] -> I32;
    0x6E => I32DivU, "i32.div_u", [I32, I32] -> I32;
    0x6F => I32RemS, "i32.rem_s", [I32, I32] -> I32;
    0x70 => I32RemU, "i32.rem_u", [I32, I32] -> I32;
    0x71 => I32And, "i32.and", [I32, I32] -> I32;
    0x72 => I32Or, "i32.or", [I32, I32] -> I32;
    0x73 => I32Xor, "i32.xor", [I32, I32] -> I32;
    0x74 => I32Shl, "i32.shl", [I32, I32] -> I32;
    0x75 => I32ShrS, "i32.shr_s", [I32, I32] -> I32;
    0x76 => I32ShrU, "i32.shr_u", [I32, I32] -> I32;
    0x77 => I32Rotl, "i32.rotl", [I32, I32] -> I32;
    0x78 => I32Rotr, "i32.rotr", [I32, I32] -> I32;
    0x79 => I64Clz, "i64.clz", [I64] -> I64;
    0x7A => I64Ctz, "i64.ctz", [I64] -> I64;
    0x7B => I64Popcnt, "i64.popcnt", [I64] -> I64;
    0x7C => I64Add, "i64.add", [I64, I64] -> I64;
    0x7D => I64Sub, "i64.sub", [I64, I64] -> I64;
    0x7E => I64Mul, "i64.mul", [I64, I64] -> I64;
    0x7F => I64DivS, "i64.div_s", [I64, I64] -> I64;
    0x80 => I64DivU, "i64.div_u", [I64, I64] -> I64;
    0x81 => I64RemS, "i64.rem_s", [I64, I64] -> I64;
    0x82 => I64RemU, "i64.rem_u", [I64, I64] -> I64;
    0x83 => I64And, "i64.and", [I64, I64] -> I64;
    0x84 => I64Or, "i64.or", [I64, I64] -> I64;
    0x85 => I64Xor, "i64.xor", [I64, I64] -> I64;
    0x86 => I64Shl, "i64.shl", [I64, I64] -> I64;
    0x87 => I64ShrS, "i64.shr_s", [I64, I64] -> I64;
    0x88 => I64ShrU, "i64.shr_u", [I64, I64] -> I64;
    0x89 => I64Rotl, "i64.rotl", [I64, I64] -> I64;
    0x8A => I64Rotr, "i64.rotr", [I64, I64] -> I64;
    0x8B => F32Abs, "f32.abs", [F32] -> F32;
    0x8C => F32Neg, "f32.neg", [F32] -> F32;
    0x8D => F32Ceil, "f32.ceil", [F32] -> F32;
    0x8E => F32Floor, "f32.floor", [F32] -> F32;
    0x8F => F32Trunc, "f32.trunc", [F32] -> F32;
    0x90 => F32Nearest, "f32.nearest", [F32] -> F32;
    0x91 => F32Sqrt, "f32.sqrt", [F32] -> F32;
    0x92 => F32Add, "f32.add", [F32, F32] -> F32;
    0x93 => F32Sub, "f32.sub", [F32, F32] -> F32;
    0x94 => F32Mul, "f32.mul", [F32, F32] -> F32;
    0x95 => F32Div, "f32.div", [F32, F32] -> F32;
    0x96 => F32Min, "f32.min", [F32, F32] -> F32;
    0x97 => F32Max, "f32.max", [F32, F32] -> F32;
    0x98 => F32Copysign, "f32.copysign", [F32, F32] -> F32;
    0x99 => F64Abs, "f64.abs", [F64] -> F64;
    0x9A => F64Neg, "f64.neg", [F64] -> F64;
    0x9B => F64Ceil, "f64.ceil", [F64] -> F64;
    0x9C => F64Floor, "f64.floor", [F64] -> F64;
    0x9D => F64Trunc, "f64.trunc", [F64] -> F64;
    0x9E => F64Nearest, "f64.nearest", [F64] -> F64;
    0x9F => F64Sqrt, "f64.sqrt", [F64] -> F64;
    0xA0 => F64Add, "f64.add", [F64, F64] -> F64;
    0xA1 => F64Sub, "f64.sub", [F64, F64] -> F64;
    0xA2 => F64Mul, "f64.mul", [F64, F64] -> F64;
    0xA3 => F64Div, "f64.div", [F64, F64] -> F64;
    0xA4 => F64Min, "f64.min", [F64, F64] -> F64;
    0xA5 => F64Max, "f64.max", [F64, F64] -> F64;
    0xA6 => F64Copysign, "f64.copysign", [F64, F64] -> F64;
    0xA7 => I32WrapI64, "i32.wrap_i64", [I64] -> I32;
    0xA8 => I32TruncF32S, "i32.trunc_f32_s", [F32] -> I32;
    0xA9 => I32TruncF32U, "i32.trunc_f32_u", [F32] -> I32;
    0xAA => I32TruncF64S, "i32.trunc_f64_s", [F64] -> I32;
    0xAB => I32TruncF64U, "i32.trunc_f64_u", [F64] -> I32;
    0xAC => I64ExtendI32S, "i64.extend_i32_s", [I32] -> I64;
    0xAD => I64ExtendI32U, "i64.extend_i32_u", [I32] -> I64;
    0xAE => I64TruncF32S, "i64.trunc_f32_s", [F32] -> I64;
    0xAF => I64TruncF32U, "i64.trunc_f32_u", [F32] -> I64;
    0xB0 => I64TruncF64S, "i64.trunc_f64_s", [F64] -> I64;
    0xB1 => I64TruncF64U, "i64.trunc_f64_u", [F64] -> I64;
    0xB2 => F32ConvertI32S, "f32.convert_i32_s", [I32] -> F32;
    0xB3 => F32ConvertI32U, "f32.convert_i32_u", [I32] -> F32;
    0xB4 => F32ConvertI64S, "f32.convert_i64_s", [I64] -> F32;
    0xB5 => F32ConvertI64U, "f32.convert_i64_u", [I64] -> F32;
    0xB6 => F32DemoteF64, "f32.demote_f64", [F64] -> F32;
    0xB7 => F64ConvertI32S, "f64.convert_i32_s", [I32] -> F64;
    0xB8 => F64ConvertI32U, "f64.convert_i32_u", [I32] -> F64;
    0xB9 => F64ConvertI64S, "f64.convert_i64_s", [I64] -> F64;
    0xBA => F64ConvertI64U, "f64.convert_i64_u", [I64] -> F64;
    0xBB => F64PromoteF32, "f64.promote_f32", [F32] -> F64;
    0xBC => I32ReinterpretF32, "i32.reinterpret_f32", [F32] -> I32;
    0xBD => I64ReinterpretF64, "i64.reinterpret_f64", [F64] -> I64;
    0xBE => F32ReinterpretI32, "f32.reinterpret_i32", [I32] -> F32;
    0xBF => F64ReinterpretI64, "f64.reinterpret_i64", [I64] -> F64;
    0xC0 => I32Extend8S, "i32.extend8_s", [I32] -> I32;
    0xC1 => I32Extend16S, "i32.extend16_s", [I32] -> I32;
    0xC2 => I64Extend8S, "i64.extend8_s", [I64] -> I64;
    0xC3 => I64Extend16S, "i64.extend16_s", [I64] -> I64;
    0xC4 => I64Extend32S, "i64.extend32_s", [I64] -> I64;
    0xFC00 => I32TruncSatF32S, "i32.trunc_sat_f32_s", [F32] -> I32;
    0xFC01 => I32TruncSatF32U, "i32.trunc_sat_f32_u", [F32] -> I32;
    0xFC02 => I32TruncSatF64S, "i32.trunc_sat_f64_s", [F64] -> I32;
    0xFC03 => I32TruncSatF64U, "i32.trunc_sat_f64_u", [F64] -> I32;
    0xFC04 => I64TruncSatF32S, "i64.trunc_sat_f32_s", [F32] -> I64;
    0xFC05 => I64TruncSatF32U, "i64.trunc_sat_f32_u", [F32] -> I64;
    0xFC06 => I64TruncSatF64S, "i64.trunc_sat_f64_s", [F64] -> I64;
    0xFC07 => I64TruncSatF64U, "i64.trunc_sat_f64_u", [F64] -> I64;
}

/// Immediate operand of a SIMD instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdImm {
    None,
    MemArg(MemArg),
    MemArgLane(MemArg, u8),
    Lane(u8),
    V128(u128),
    Shuffle([u8; 16]),
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    // Control
    Unreachable,
    Nop,
    Block { ty: BlockType },
    Loop { ty: BlockType },
    If { ty: BlockType },
    Else,
    Try { ty: BlockType },
    Catch { tag: u32 },
    Throw { tag: u32 },
    Rethrow { depth: u32 },
    Delegate { depth: u32 },
    CatchAll,
    End,
    Br { depth: u32 },
    BrIf { depth: u32 },
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call { func: u32 },
    CallIndirect { type_idx: u32, table: u32 },
    ReturnCall { func: u32 },
    ReturnCallIndirect { type_idx: u32, table: u32 },
    CallRef { type_idx: u32 },
    ReturnCallRef { type_idx: u32 },

    // Parametric
    Drop,
    Select,
    TypedSelect { ty: ValType },

    // Variables
    LocalGet { idx: u32 },
    LocalSet { idx: u32 },
    LocalTee { idx: u32 },
    GlobalGet { idx: u32 },
    GlobalSet { idx: u32 },

    // Tables
    TableGet { table: u32 },
    TableSet { table: u32 },
    TableInit { elem: u32, table: u32 },
    ElemDrop { elem: u32 },
    TableCopy { dst: u32, src: u32 },
    TableGrow { table: u32 },
    TableSize { table: u32 },
    TableFill { table: u32 },

    // Memory
    Load { op: LoadOp, memarg: MemArg },
    Store { op: StoreOp, memarg: MemArg },
    MemorySize { mem: u32 },
    MemoryGrow { mem: u32 },
    MemoryInit { data: u32, mem: u32 },
    DataDrop { data: u32 },
    MemoryCopy { dst: u32, src: u32 },
    MemoryFill { mem: u32 },

    // Numeric
    I32Const { value: i32 },
    I64Const { value: i64 },
    F32Const { bits: u32 },
    F64Const { bits: u64 },
    Numeric(NumericOp),

    // References
    RefNull { heap: HeapType },
    RefIsNull,
    RefFunc { func: u32 },
    RefEq,
    RefAsNonNull,
    BrOnNull { depth: u32 },
    BrOnNonNull { depth: u32 },

    // GC
    StructNew { type_idx: u32 },
    StructNewDefault { type_idx: u32 },
    StructGet { type_idx: u32, field: u32 },
    StructGetS { type_idx: u32, field: u32 },
    StructGetU { type_idx: u32, field: u32 },
    StructSet { type_idx: u32, field: u32 },
    ArrayNew { type_idx: u32 },
    ArrayNewDefault { type_idx: u32 },
    ArrayNewFixed { type_idx: u32, len: u32 },
    ArrayNewData { type_idx: u32, data: u32 },
    ArrayNewElem { type_idx: u32, elem: u32 },
    ArrayGet { type_idx: u32 },
    ArrayGetS { type_idx: u32 },
    ArrayGetU { type_idx: u32 },
    ArraySet { type_idx: u32 },
    ArrayLen,
    ArrayFill { type_idx: u32 },
    ArrayCopy { dst: u32, src: u32 },
    ArrayInitData { type_idx: u32, data: u32 },
    ArrayInitElem { type_idx: u32, elem: u32 },
    RefTest { heap: HeapType, nullable: bool },
    RefCast { heap: HeapType, nullable: bool },
    BrOnCast { depth: u32, from: (bool, HeapType), to: (bool, HeapType) },
    BrOnCastFail { depth: u32, from: (bool, HeapType), to: (bool, HeapType) },
    AnyConvertExtern,
    ExternConvertAny,
    RefI31,
    I31GetS,
    I31GetU,

    // SIMD
    Simd { op: &'static SimdOpInfo, imm: SimdImm },
}

impl Operator {
    /// Text-format mnemonic, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Unreachable => "unreachable",
            Operator::Nop => "nop",
            Operator::Block { .. } => "block",
            Operator::Loop { .. } => "loop",
            Operator::If { .. } => "if",
            Operator::Else => "else",
            Operator::Try { .. } => "try",
            Operator::Catch { .. } => "catch",
            Operator::Throw { .. } => "throw",
            Operator::Rethrow { .. } => "rethrow",
            Operator::Delegate { .. } => "delegate",
            Operator::CatchAll => "catch_all",
            Operator::End => "end",
            Operator::Br { .. } => "br",
            Operator::BrIf { .. } => "br_if",
            Operator::BrTable { .. } => "br_table",
            Operator::Return => "return",
            Operator::Call { .. } => "call",
            Operator::CallIndirect { .. } => "call_indirect",
            Operator::ReturnCall { .. } => "return_call",
            Operator::ReturnCallIndirect { .. } => "return_call_indirect",
            Operator::CallRef { .. } => "call_ref",
            Operator::ReturnCallRef { .. } => "return_call_ref",
            Operator::Drop => "drop",
            Operator::Select | Operator::TypedSelect { .. } => "select",
            Operator::LocalGet { .. } => "local.get",
            Operator::LocalSet { .. } => "local.set",
            Operator::LocalTee { .. } => "local.tee",
            Operator::GlobalGet { .. } => "global.get",
            Operator::GlobalSet { .. } => "global.set",
            Operator::TableGet { .. } => "table.get",
            Operator::TableSet { .. } => "table.set",
            Operator::TableInit { .. } => "table.init",
            Operator::ElemDrop { .. } => "elem.drop",
            Operator::TableCopy { .. } => "table.copy",
            Operator::TableGrow { .. } => "table.grow",
            Operator::TableSize { .. } => "table.size",
            Operator::TableFill { .. } => "table.fill",
            Operator::Load { .. } => "load",
            Operator::Store { .. } => "store",
            Operator::MemorySize { .. } => "memory.size",
            Operator::MemoryGrow { .. } => "memory.grow",
            Operator::MemoryInit { .. } => "memory.init",
            Operator::DataDrop { .. } => "data.drop",
            Operator::MemoryCopy { .. } => "memory.copy",
            Operator::MemoryFill { .. } => "memory.fill",
            Operator::I32Const { .. } => "i32.const",
            Operator::I64Const { .. } => "i64.const",
            Operator::F32Const { .. } => "f32.const",
            Operator::F64Const { .. } => "f64.const",
            Operator::Numeric(op) => op.name(),
            Operator::RefNull { .. } => "ref.null",
            Operator::RefIsNull => "ref.is_null",
            Operator::RefFunc { .. } => "ref.func",
            Operator::RefEq => "ref.eq",
            Operator::RefAsNonNull => "ref.as_non_null",
            Operator::BrOnNull { .. } => "br_on_null",
            Operator::BrOnNonNull { .. } => "br_on_non_null",
            Operator::StructNew { .. } => "struct.new",
            Operator::StructNewDefault { .. } => "struct.new_default",
            Operator::StructGet { .. } => "struct.get",
            Operator::StructGetS { .. } => "struct.get_s",
            Operator::StructGetU { .. } => "struct.get_u",
            Operator::StructSet { .. } => "struct.set",
            Operator::ArrayNew { .. } => "array.new",
            Operator::ArrayNewDefault { .. } => "array.new_default",
            Operator::ArrayNewFixed { .. } => "array.new_fixed",
            Operator::ArrayNewData { .. } => "array.new_data",
            Operator::ArrayNewElem { .. } => "array.new_elem",
            Operator::ArrayGet { .. } => "array.get",
            Operator::ArrayGetS { .. } => "array.get_s",
            Operator::ArrayGetU { .. } => "array.get_u",
            Operator::ArraySet { .. } => "array.set",
            Operator::ArrayLen => "array.len",
            Operator::ArrayFill { .. } => "array.fill",
            Operator::ArrayCopy { .. } => "array.copy",
            Operator::ArrayInitData { .. } => "array.init_data",
            Operator::ArrayInitElem { .. } => "array.init_elem",
            Operator::RefTest { .. } => "ref.test",
            Operator::RefCast { .. } => "ref.cast",
            Operator::BrOnCast { .. } => "br_on_cast",
            Operator::BrOnCastFail { .. } => "br_on_cast_fail",
            Operator::AnyConvertExtern => "any.convert_extern",
            Operator::ExternConvertAny => "extern.convert_any",
            Operator::RefI31 => "ref.i31",
            Operator::I31GetS => "i31.get_s",
            Operator::I31GetU => "i31.get_u",
            Operator::Simd { op, .. } => op.name,
        }
    }
}

/// Streaming decoder over a function body or constant expression.
pub struct OperatorsReader<'a> {
    reader: BinaryReader<'a>,
    max_targets: usize,
}

impl<'a> OperatorsReader<'a> {
    /// `base` is the absolute offset of `code[0]`; `max_targets` bounds the
    /// `br_table` label vector.
    pub fn new(code: &'a [u8], base: usize, max_targets: usize) -> Self {
        Self {
            reader: BinaryReader::new_at(code, base),
            max_targets,
        }
    }

    pub fn offset(&self) -> usize {
        self.reader.offset()
    }

    pub fn is_eof(&self) -> bool {
        self.reader.is_eof()
    }

    /// Decode the next instruction and its offset.
    pub fn read(&mut self) -> Result<(usize, Operator)> {
        let offset = self.reader.offset();
        let op = self.read_operator()?;
        Ok((offset, op))
    }

    fn unknown(&self, offset: usize, prefix: &str, code: u32) -> ParseError {
        ParseError::new(offset, format!("illegal opcode {}{:#04x}", prefix, code))
    }

    fn memarg(&mut self) -> Result<MemArg> {
        let offset = self.reader.offset();
        let flags = self.reader.read_var_u32()?;
        // Bit 6 signals an explicit memory index (multi-memory).
        let memory = if flags & 0x40 != 0 {
            self.reader.read_var_u32()?
        } else {
            0
        };
        let align = flags & !0x40;
        if align >= 64 {
            return Err(ParseError::new(offset, "malformed memop flags"));
        }
        let offset = self.reader.read_var_u64()?;
        Ok(MemArg {
            align,
            memory,
            offset,
        })
    }

    fn load(&mut self, op: LoadOp) -> Result<Operator> {
        Ok(Operator::Load {
            op,
            memarg: self.memarg()?,
        })
    }

    fn store(&mut self, op: StoreOp) -> Result<Operator> {
        Ok(Operator::Store {
            op,
            memarg: self.memarg()?,
        })
    }

    fn read_operator(&mut self) -> Result<Operator> {
        let offset = self.reader.offset();
        let code = self.reader.read_u8()?;
        let max_targets = self.max_targets;
        let r = &mut self.reader;
        Ok(match code {
            0x00 => Operator::Unreachable,
            0x01 => Operator::Nop,
            0x02 => Operator::Block {
                ty: r.read_block_type()?,
            },
            0x03 => Operator::Loop {
                ty: r.read_block_type()?,
            },
            0x04 => Operator::If {
                ty: r.read_block_type()?,
            },
            0x05 => Operator::Else,
            0x06 => Operator::Try {
                ty: r.read_block_type()?,
            },
            0x07 => Operator::Catch {
                tag: r.read_var_u32()?,
            },
            0x08 => Operator::Throw {
                tag: r.read_var_u32()?,
            },
            0x09 => Operator::Rethrow {
                depth: r.read_var_u32()?,
            },
            0x0A => {
                return Err(ParseError::new(
                    offset,
                    "unsupported instruction throw_ref",
                ))
            }
            0x0B => Operator::End,
            0x0C => Operator::Br {
                depth: r.read_var_u32()?,
            },
            0x0D => Operator::BrIf {
                depth: r.read_var_u32()?,
            },
            0x0E => {
                let count = r.read_length(max_targets, "br_table target")?;
                let mut targets = Vec::with_capacity(r.capacity_for(count));
                for _ in 0..count {
                    targets.push(r.read_var_u32()?);
                }
                let default = r.read_var_u32()?;
                Operator::BrTable { targets, default }
            }
            0x0F => Operator::Return,
            0x10 => Operator::Call {
                func: r.read_var_u32()?,
            },
            0x11 => {
                let type_idx = r.read_var_u32()?;
                let table = r.read_var_u32()?;
                Operator::CallIndirect { type_idx, table }
            }
            0x12 => Operator::ReturnCall {
                func: r.read_var_u32()?,
            },
            0x13 => {
                let type_idx = r.read_var_u32()?;
                let table = r.read_var_u32()?;
                Operator::ReturnCallIndirect { type_idx, table }
            }
            0x14 => Operator::CallRef {
                type_idx: r.read_var_u32()?,
            },
            0x15 => Operator::ReturnCallRef {
                type_idx: r.read_var_u32()?,
            },
            0x18 => Operator::Delegate {
                depth: r.read_var_u32()?,
            },
            0x19 => Operator::CatchAll,
            0x1A => Operator::Drop,
            0x1B => Operator::Select,
            0x1C => {
                let count_offset = r.offset();
                let count = r.read_var_u32()?;
                if count != 1 {
                    return Err(ParseError::new(count_offset, "invalid result arity"));
                }
                Operator::TypedSelect {
                    ty: r.read_val_type()?,
                }
            }
            0x1F => {
                return Err(ParseError::new(
                    offset,
                    "unsupported instruction try_table",
                ))
            }
            0x20 => Operator::LocalGet {
                idx: r.read_var_u32()?,
            },
            0x21 => Operator::LocalSet {
                idx: r.read_var_u32()?,
            },
            0x22 => Operator::LocalTee {
                idx: r.read_var_u32()?,
            },
            0x23 => Operator::GlobalGet {
                idx: r.read_var_u32()?,
            },
            0x24 => Operator::GlobalSet {
                idx: r.read_var_u32()?,
            },
            0x25 => Operator::TableGet {
                table: r.read_var_u32()?,
            },
            0x26 => Operator::TableSet {
                table: r.read_var_u32()?,
            },
            0x28 => return self.load(LoadOp::I32Load),
            0x29 => return self.load(LoadOp::I64Load),
            0x2A => return self.load(LoadOp::F32Load),
            0x2B => return self.load(LoadOp::F64Load),
            0x2C => return self.load(LoadOp::I32Load8S),
            0x2D => return self.load(LoadOp::I32Load8U),
            0x2E => return self.load(LoadOp::I32Load16S),
            0x2F => return self.load(LoadOp::I32Load16U),
            0x30 => return self.load(LoadOp::I64Load8S),
            0x31 => return self.load(LoadOp::I64Load8U),
            0x32 => return self.load(LoadOp::I64Load16S),
            0x33 => return self.load(LoadOp::I64Load16U),
            0x34 => return self.load(LoadOp::I64Load32S),
            0x35 => return self.load(LoadOp::I64Load32U),
            0x36 => return self.store(StoreOp::I32Store),
            0x37 => return self.store(StoreOp::I64Store),
            0x38 => return self.store(StoreOp::F32Store),
            0x39 => return self.store(StoreOp::F64Store),
            0x3A => return self.store(StoreOp::I32Store8),
            0x3B => return self.store(StoreOp::I32Store16),
            0x3C => return self.store(StoreOp::I64Store8),
            0x3D => return self.store(StoreOp::I64Store16),
            0x3E => return self.store(StoreOp::I64Store32),
            0x3F => Operator::MemorySize {
                mem: r.read_var_u32()?,
            },
            0x40 => Operator::MemoryGrow {
                mem: r.read_var_u32()?,
            },
            0x41 => Operator::I32Const {
                value: r.read_var_i32()?,
            },
            0x42 => Operator::I64Const {
                value: r.read_var_i64()?,
            },
            0x43 => Operator::F32Const {
                bits: r.read_u32_le()?,
            },
            0x44 => Operator::F64Const {
                bits: r.read_u64_le()?,
            },
            0x45..=0xC4 => match NumericOp::from_code(u32::from(code)) {
                Some(op) => Operator::Numeric(op),
                None => return Err(self.unknown(offset, "", u32::from(code))),
            },
            0xD0 => Operator::RefNull {
                heap: r.read_heap_type()?,
            },
            0xD1 => Operator::RefIsNull,
            0xD2 => Operator::RefFunc {
                func: r.read_var_u32()?,
            },
            0xD3 => Operator::RefEq,
            0xD4 => Operator::RefAsNonNull,
            0xD5 => Operator::BrOnNull {
                depth: r.read_var_u32()?,
            },
            0xD6 => Operator::BrOnNonNull {
                depth: r.read_var_u32()?,
            },
            0xFB => return self.read_gc_operator(offset),
            0xFC => return self.read_misc_operator(offset),
            0xFD => return self.read_simd_operator(offset),
            _ => return Err(self.unknown(offset, "", u32::from(code))),
        })
    }

    fn read_misc_operator(&mut self, offset: usize) -> Result<Operator> {
        let sub = self.reader.read_var_u32()?;
        let r = &mut self.reader;
        Ok(match sub {
            0..=7 => match NumericOp::from_code(0xFC00 | sub) {
                Some(op) => Operator::Numeric(op),
                None => return Err(self.unknown(offset, "0xfc ", sub)),
            },
            8 => {
                let data = r.read_var_u32()?;
                let mem = r.read_var_u32()?;
                Operator::MemoryInit { data, mem }
            }
            9 => Operator::DataDrop {
                data: r.read_var_u32()?,
            },
            10 => {
                let dst = r.read_var_u32()?;
                let src = r.read_var_u32()?;
                Operator::MemoryCopy { dst, src }
            }
            11 => Operator::MemoryFill {
                mem: r.read_var_u32()?,
            },
            12 => {
                let elem = r.read_var_u32()?;
                let table = r.read_var_u32()?;
                Operator::TableInit { elem, table }
            }
            13 => Operator::ElemDrop {
                elem: r.read_var_u32()?,
            },
            14 => {
                let dst = r.read_var_u32()?;
                let src = r.read_var_u32()?;
                Operator::TableCopy { dst, src }
            }
            15 => Operator::TableGrow {
                table: r.read_var_u32()?,
            },
            16 => Operator::TableSize {
                table: r.read_var_u32()?,
            },
            17 => Operator::TableFill {
                table: r.read_var_u32()?,
            },
            _ => return Err(self.unknown(offset, "0xfc ", sub)),
        })
    }

    fn read_gc_operator(&mut self, offset: usize) -> Result<Operator> {
        let sub = self.reader.read_var_u32()?;
        let r = &mut self.reader;
        let mut idx = || r.read_var_u32();
        Ok(match sub {
            0 => Operator::StructNew { type_idx: idx()? },
            1 => Operator::StructNewDefault { type_idx: idx()? },
            2..=5 => {
                let type_idx = idx()?;
                let field = idx()?;
                match sub {
                    2 => Operator::StructGet { type_idx, field },
                    3 => Operator::StructGetS { type_idx, field },
                    4 => Operator::StructGetU { type_idx, field },
                    _ => Operator::StructSet { type_idx, field },
                }
            }
            6 => Operator::ArrayNew { type_idx: idx()? },
            7 => Operator::ArrayNewDefault { type_idx: idx()? },
            8 => {
                let type_idx = idx()?;
                let len = idx()?;
                Operator::ArrayNewFixed { type_idx, len }
            }
            9 => {
                let type_idx = idx()?;
                let data = idx()?;
                Operator::ArrayNewData { type_idx, data }
            }
            10 => {
                let type_idx = idx()?;
                let elem = idx()?;
                Operator::ArrayNewElem { type_idx, elem }
            }
            11 => Operator::ArrayGet { type_idx: idx()? },
            12 => Operator::ArrayGetS { type_idx: idx()? },
            13 => Operator::ArrayGetU { type_idx: idx()? },
            14 => Operator::ArraySet { type_idx: idx()? },
            15 => Operator::ArrayLen,
            16 => Operator::ArrayFill { type_idx: idx()? },
            17 => {
                let dst = idx()?;
                let src = idx()?;
                Operator::ArrayCopy { dst, src }
            }
            18 => {
                let type_idx = idx()?;
                let data = idx()?;
                Operator::ArrayInitData { type_idx, data }
            }
            19 => {
                let type_idx = idx()?;
                let elem = idx()?;
                Operator::ArrayInitElem { type_idx, elem }
            }
            20..=23 => {
                let heap = r.read_heap_type()?;
                let nullable = sub == 21 || sub == 23;
                if sub <= 21 {
                    Operator::RefTest { heap, nullable }
                } else {
                    Operator::RefCast { heap, nullable }
                }
            }
            24 | 25 => {
                let flags_offset = r.offset();
                let flags = r.read_u8()?;
                if flags & !0x03 != 0 {
                    return Err(ParseError::new(flags_offset, "invalid br_on_cast flags"));
                }
                let depth = r.read_var_u32()?;
                let from = (flags & 0x01 != 0, r.read_heap_type()?);
                let to = (flags & 0x02 != 0, r.read_heap_type()?);
                if sub == 24 {
                    Operator::BrOnCast { depth, from, to }
                } else {
                    Operator::BrOnCastFail { depth, from, to }
                }
            }
            26 => Operator::AnyConvertExtern,
            27 => Operator::ExternConvertAny,
            28 => Operator::RefI31,
            29 => Operator::I31GetS,
            30 => Operator::I31GetU,
            _ => return Err(self.unknown(offset, "0xfb ", sub)),
        })
    }

    fn read_simd_operator(&mut self, offset: usize) -> Result<Operator> {
        let sub = self.reader.read_var_u32()?;
        let op = simd::lookup(sub).ok_or_else(|| self.unknown(offset, "0xfd ", sub))?;
        let imm = match op.shape {
            SimdShape::Load { .. } | SimdShape::Store { .. } => SimdImm::MemArg(self.memarg()?),
            SimdShape::LoadLane { .. } | SimdShape::StoreLane { .. } => {
                let memarg = self.memarg()?;
                SimdImm::MemArgLane(memarg, self.reader.read_u8()?)
            }
            SimdShape::Const => SimdImm::V128(self.reader.read_u128_le()?),
            SimdShape::Shuffle => {
                let mut lanes = [0u8; 16];
                lanes.copy_from_slice(self.reader.read_bytes(16)?);
                SimdImm::Shuffle(lanes)
            }
            SimdShape::ExtractLane { .. } | SimdShape::ReplaceLane { .. } => {
                SimdImm::Lane(self.reader.read_u8()?)
            }
            _ => SimdImm::None,
        };
        Ok(Operator::Simd { op, imm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Operator> {
        let mut r = OperatorsReader::new(bytes, 0, 1000);
        let mut ops = Vec::new();
        while !r.is_eof() {
            ops.push(r.read().unwrap().1);
        }
        ops
    }

    #[test]
    fn decodes_simple_body() {
        // local.get 0; local.get 1; i32.add; end
        let ops = decode_all(&[0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B]);
        assert_eq!(
            ops,
            vec![
                Operator::LocalGet { idx: 0 },
                Operator::LocalGet { idx: 1 },
                Operator::Numeric(NumericOp::I32Add),
                Operator::End,
            ]
        );
    }

    #[test]
    fn offsets_are_absolute() {
        let mut r = OperatorsReader::new(&[0x01, 0x41, 0x7F], 100, 10);
        assert_eq!(r.read().unwrap().0, 100);
        let (off, op) = r.read().unwrap();
        assert_eq!(off, 101);
        assert_eq!(op, Operator::I32Const { value: -1 });
    }

    #[test]
    fn memarg_with_memory_index() {
        // i32.load align=2 (flag 0x42 = 2 | multi-memory bit) mem=1 offset=8
        let ops = decode_all(&[0x28, 0x42, 0x01, 0x08]);
        assert_eq!(
            ops[0],
            Operator::Load {
                op: LoadOp::I32Load,
                memarg: MemArg {
                    align: 2,
                    memory: 1,
                    offset: 8
                }
            }
        );
    }

    #[test]
    fn v128_store_reads_memarg() {
        // v128.store align=4 offset=16
        let ops = decode_all(&[0xFD, 0x0B, 0x04, 0x10]);
        match &ops[0] {
            Operator::Simd { op, imm } => {
                assert_eq!(op.name, "v128.store");
                assert_eq!(
                    *imm,
                    SimdImm::MemArg(MemArg {
                        align: 4,
                        memory: 0,
                        offset: 16
                    })
                );
            }
            other => panic!("expected v128.store, got {:?}", other),
        }
    }

    #[test]
    fn br_table_target_limit() {
        let mut r = OperatorsReader::new(&[0x0E, 0x05, 0, 0, 0, 0, 0, 0], 0, 4);
        assert!(r.read().is_err());
    }

    #[test]
    fn saturating_truncations_are_numeric() {
        let ops = decode_all(&[0xFC, 0x00, 0xFC, 0x07]);
        assert_eq!(ops[0], Operator::Numeric(NumericOp::I32TruncSatF32S));
        assert_eq!(ops[1], Operator::Numeric(NumericOp::I64TruncSatF64U));
    }

    #[test]
    fn gc_ref_cast_nullable() {
        let ops = decode_all(&[0xFB, 0x17, 0x6B]);
        assert_eq!(
            ops[0],
            Operator::RefCast {
                heap: HeapType::Struct,
                nullable: true
            }
        );
    }

    #[test]
    fn simd_add_and_const() {
        let mut bytes = vec![0xFD, 0xAE, 0x01, 0xFD, 0x0C];
        bytes.extend_from_slice(&[0x11; 16]);
        let ops = decode_all(&bytes);
        match &ops[0] {
            Operator::Simd { op, imm } => {
                assert_eq!(op.name, "i32x4.add");
                assert_eq!(*imm, SimdImm::None);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &ops[1] {
            Operator::Simd { imm, .. } => {
                assert_eq!(*imm, SimdImm::V128(0x1111_1111_1111_1111_1111_1111_1111_1111))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn illegal_opcode() {
        let mut r = OperatorsReader::new(&[0xFF], 7, 10);
        let err = r.read().unwrap_err();
        assert_eq!(err.offset, 7);
        assert!(err.reason.contains("illegal opcode"));
    }

    #[test]
    fn numeric_signatures() {
        assert_eq!(
            NumericOp::I64Eqz.signature(),
            (&[ValType::I64][..], ValType::I32)
        );
        assert_eq!(NumericOp::F64Copysign.name(), "f64.copysign");
    }
}
