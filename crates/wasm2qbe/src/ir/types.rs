//! IR type definitions.
//!
//! These types represent an SSA-form control-flow graph of a single
//! WebAssembly function. Each Wasm instruction is translated to one or more
//! IR instructions with explicit variables (v0, v1, ...) instead of the
//! implicit operand stack. Locals live in addressable slots and are accessed
//! with `LocalGet`/`LocalSet`; block results merge through phis.

use crate::decoder::ValType;
use std::fmt;
use wasm2qbe_abi::{RuntimeFn, TrapKind};

/// Unique identifier for a variable in SSA form.
/// Variables are numbered sequentially: v0, v1, v2, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Unique identifier for a basic block; doubles as its index in
/// `IrFunction::blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// IR representation of a complete function.
#[derive(Debug, Clone)]
pub struct IrFunction {
    /// Index in the function index space, `None` for the module initialiser.
    pub func_idx: Option<u32>,

    /// Debug name (from the name section when present).
    pub name: String,

    /// Type section index of the signature, `None` for the module initialiser.
    pub type_idx: Option<u32>,

    pub params: Vec<ValType>,
    pub results: Vec<ValType>,

    /// Types of every local slot: parameters first, then declared locals.
    pub locals: Vec<ValType>,

    /// All basic blocks, indexed by `BlockId`.
    pub blocks: Vec<IrBlock>,

    /// Entry block (where execution starts)
    ///
    /// INVARIANT: This is always `BlockId(0)`.
    pub entry_block: BlockId,

    /// Type of every SSA variable, indexed by `VarId`.
    pub var_types: Vec<ValType>,
}

impl IrFunction {
    pub fn var_type(&self, var: VarId) -> ValType {
        self.var_types[var.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &IrBlock {
        &self.blocks[id.0 as usize]
    }

    /// Number of predecessor edges of every block.
    pub fn predecessor_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.blocks.len()];
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                counts[succ.0 as usize] += 1;
            }
        }
        counts
    }
}

/// A phi node: `dest` takes the value of `incoming[i].1` when control
/// arrives from block `incoming[i].0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrPhi {
    pub dest: VarId,
    pub incoming: Vec<(BlockId, VarId)>,
}

/// A basic block: phis, then instructions with a single entry and exit.
#[derive(Debug, Clone)]
pub struct IrBlock {
    /// Unique identifier for this block
    pub id: BlockId,

    pub phis: Vec<IrPhi>,

    /// Instructions in this block (no control flow within)
    pub instructions: Vec<IrInstr>,

    /// How control exits this block
    pub terminator: IrTerminator,
}

/// Width of a memory access.
///
/// Wasm supports sub-width loads/stores (e.g., `i32.load8_s` loads 1 byte
/// and sign-extends to i32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessWidth {
    /// Full type width (i32=4 bytes, i64=8 bytes, f32=4, f64=8, v128=16)
    Full,
    /// 8-bit access
    I8,
    /// 16-bit access
    I16,
    /// 32-bit access (only valid for i64 loads/stores)
    I32,
}

impl MemoryAccessWidth {
    /// Number of bytes touched by an access of type `ty`.
    pub fn bytes(self, ty: ValType) -> u32 {
        match self {
            MemoryAccessWidth::I8 => 1,
            MemoryAccessWidth::I16 => 2,
            MemoryAccessWidth::I32 => 4,
            MemoryAccessWidth::Full => crate::types::slot_size(ty),
        }
    }
}

/// Sign extension for sub-width loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignExtension {
    Signed,
    Unsigned,
}

/// Data symbols the module emits besides globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRef {
    /// Payload of data segment `n`.
    Data(u32),
    /// Descriptor addresses of element segment `n`.
    Elem(u32),
}

/// Extra operand of a SIMD fallback call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdArg {
    Var(VarId),
    /// Lane index immediate.
    Lane(u8),
    /// 64-bit immediate (halves of `v128.const`, shuffle masks).
    Imm(u64),
    /// A bounds-checked linear memory address of `bytes` bytes, passed to
    /// the fallback as a host pointer.
    Address {
        memory: u32,
        addr: VarId,
        offset: u64,
        bytes: u32,
    },
}

/// A single IR instruction (SSA form: each produces at most one new
/// variable, except calls which produce one per result).
#[derive(Debug, Clone)]
pub enum IrInstr {
    /// Define a variable from a constant value
    Const { dest: VarId, value: IrValue },

    /// Binary operation (dest = lhs op rhs)
    BinOp {
        dest: VarId,
        op: BinOp,
        lhs: VarId,
        rhs: VarId,
    },

    /// Unary operation (dest = op operand)
    UnOp {
        dest: VarId,
        op: UnOp,
        operand: VarId,
    },

    /// Conditional select (dest = if cond != 0 { if_true } else { if_false })
    Select {
        dest: VarId,
        cond: VarId,
        if_true: VarId,
        if_false: VarId,
    },

    /// Read local slot `local`
    LocalGet { dest: VarId, local: u32 },

    /// Write local slot `local`
    LocalSet { local: u32, value: VarId },

    /// Read a global's data symbol
    GlobalGet { dest: VarId, global: u32 },

    /// Write a mutable global's data symbol
    GlobalSet { global: u32, value: VarId },

    /// Linear memory load (dest = memory[addr + offset])
    ///
    /// For sub-width loads, `width` specifies the access width and `sign`
    /// specifies sign/zero extension. For full-width loads, `width` is `Full`
    /// and `sign` is `None`. The emitter inserts the bounds check.
    Load {
        dest: VarId,
        ty: ValType,
        width: MemoryAccessWidth,
        sign: Option<SignExtension>,
        memory: u32,
        addr: VarId,
        offset: u64,
    },

    /// Linear memory store (memory[addr + offset] = value)
    Store {
        ty: ValType,
        width: MemoryAccessWidth,
        memory: u32,
        addr: VarId,
        value: VarId,
        offset: u64,
    },

    /// Load from a host pointer (GC objects, descriptors, payload buffers).
    /// No bounds check.
    FieldLoad {
        dest: VarId,
        ty: ValType,
        width: MemoryAccessWidth,
        sign: Option<SignExtension>,
        base: VarId,
        offset: u32,
    },

    /// Store to a host pointer.
    FieldStore {
        ty: ValType,
        width: MemoryAccessWidth,
        base: VarId,
        offset: u32,
        value: VarId,
    },

    /// Direct call (defined or imported function)
    Call {
        dests: Vec<VarId>,
        func: u32,
        args: Vec<VarId>,
    },

    /// Call through a function-reference descriptor with the signature of
    /// `type_idx`. Null and signature checks are separate instructions.
    CallRef {
        dests: Vec<VarId>,
        type_idx: u32,
        target: VarId,
        args: Vec<VarId>,
    },

    /// Call a runtime helper
    CallRuntime {
        dest: Option<VarId>,
        func: RuntimeFn,
        args: Vec<VarId>,
    },

    /// Call the scalar fallback of a SIMD operation. A `v128` destination is
    /// passed as the first argument.
    CallSimd {
        dest: Option<VarId>,
        name: &'static str,
        args: Vec<SimdArg>,
    },

    /// Address of the descriptor of function `func`
    RefFunc { dest: VarId, func: u32 },

    /// Address of a data symbol
    DataAddr { dest: VarId, data: DataRef },

    /// Address of `size` bytes of 16-byte aligned stack storage, valid until
    /// the function returns
    StackSlot { dest: VarId, size: u32 },

    /// Trap with `trap` when `cond` (an i32) is non-zero
    TrapIf { cond: VarId, trap: TrapKind },
}

/// Block terminator: how control flow exits a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrTerminator {
    /// Return from function
    Return { values: Vec<VarId> },

    /// Unconditional jump to target block
    Jump { target: BlockId },

    /// Conditional branch
    BranchIf {
        condition: VarId,
        if_true: BlockId,
        if_false: BlockId,
    },

    /// Multi-way branch (for br_table)
    BranchTable {
        index: VarId,
        targets: Vec<BlockId>,
        default: BlockId,
    },

    /// Trap with `TrapKind::Unreachable`
    Unreachable,

    /// Control never gets here (follows a non-returning runtime call)
    Halt,
}

impl IrTerminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            IrTerminator::Jump { target } => vec![*target],
            IrTerminator::BranchIf {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            IrTerminator::BranchTable {
                targets, default, ..
            } => {
                let mut out = targets.clone();
                out.push(*default);
                out
            }
            IrTerminator::Return { .. } | IrTerminator::Unreachable | IrTerminator::Halt => {
                Vec::new()
            }
        }
    }
}

/// Constant value in the IR. Floats are kept as bit patterns so NaN
/// payloads survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrValue {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
}

impl IrValue {
    pub fn ty(&self) -> ValType {
        match self {
            IrValue::I32(_) => ValType::I32,
            IrValue::I64(_) => ValType::I64,
            IrValue::F32(_) => ValType::F32,
            IrValue::F64(_) => ValType::F64,
        }
    }

    /// Zero of a scalar or reference type; references are null pointers.
    pub fn zero(ty: ValType) -> Option<Self> {
        match ty {
            ValType::I32 => Some(IrValue::I32(0)),
            ValType::I64 | ValType::Ref(_) => Some(IrValue::I64(0)),
            ValType::F32 => Some(IrValue::F32(0)),
            ValType::F64 => Some(IrValue::F64(0)),
            ValType::V128 => None,
        }
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::I32(v) => write!(f, "{}i32", v),
            IrValue::I64(v) => write!(f, "{}i64", v),
            IrValue::F32(bits) => write!(f, "{}f32", f32::from_bits(*bits)),
            IrValue::F64(bits) => write!(f, "{}f64", f64::from_bits(*bits)),
        }
    }
}

/// Binary operations with a direct backend instruction. Rotations, float
/// min/max and copysign are runtime calls instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // i32 operations
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,

    // i32 comparisons
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 operations (same pattern as i32)
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,

    // i64 comparisons
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // f32 operations
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,

    // f32 comparisons
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    /// Either operand is NaN
    F32Unordered,

    // f64 operations
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,

    // f64 comparisons
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,
    F64Unordered,
}

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    I32Eqz,
    I64Eqz,
    F32Neg,
    F64Neg,

    // Conversions: integer truncation/extension
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // Conversions: float → integer. These are the raw backend conversions;
    // range and NaN handling is done by the builder around them.
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,

    // Conversions: integer → float
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,

    // Conversions: float precision
    F32DemoteF64,
    F64PromoteF32,

    // Reinterpretations (bitcast)
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
}

impl BinOp {
    /// Returns the type of the result produced by this operation.
    ///
    /// Note: all comparison operations return i32 (0 or 1), even for i64/f32/f64 operands.
    pub fn result_type(&self) -> ValType {
        match self {
            BinOp::I32Add
            | BinOp::I32Sub
            | BinOp::I32Mul
            | BinOp::I32DivS
            | BinOp::I32DivU
            | BinOp::I32RemS
            | BinOp::I32RemU
            | BinOp::I32And
            | BinOp::I32Or
            | BinOp::I32Xor
            | BinOp::I32Shl
            | BinOp::I32ShrS
            | BinOp::I32ShrU => ValType::I32,

            BinOp::I64Add
            | BinOp::I64Sub
            | BinOp::I64Mul
            | BinOp::I64DivS
            | BinOp::I64DivU
            | BinOp::I64RemS
            | BinOp::I64RemU
            | BinOp::I64And
            | BinOp::I64Or
            | BinOp::I64Xor
            | BinOp::I64Shl
            | BinOp::I64ShrS
            | BinOp::I64ShrU => ValType::I64,

            BinOp::F32Add | BinOp::F32Sub | BinOp::F32Mul | BinOp::F32Div => ValType::F32,
            BinOp::F64Add | BinOp::F64Sub | BinOp::F64Mul | BinOp::F64Div => ValType::F64,

            // comparisons → i32
            _ => ValType::I32,
        }
    }

    /// Type of both operands.
    pub fn operand_type(&self) -> ValType {
        use BinOp::*;
        match self {
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Eq | I32Ne | I32LtS | I32LtU | I32GtS
            | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU => ValType::I32,
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
            | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Eq | I64Ne | I64LtS | I64LtU | I64GtS
            | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU => ValType::I64,
            F32Add | F32Sub | F32Mul | F32Div | F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge
            | F32Unordered => ValType::F32,
            F64Add | F64Sub | F64Mul | F64Div | F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge
            | F64Unordered => ValType::F64,
        }
    }
}

impl UnOp {
    /// Returns the type of the result produced by this operation.
    pub fn result_type(&self) -> ValType {
        match self {
            UnOp::I32Eqz
            | UnOp::I64Eqz
            | UnOp::I32WrapI64
            | UnOp::I32Extend8S
            | UnOp::I32Extend16S
            | UnOp::I32TruncF32S
            | UnOp::I32TruncF32U
            | UnOp::I32TruncF64S
            | UnOp::I32TruncF64U
            | UnOp::I32ReinterpretF32 => ValType::I32,

            UnOp::I64ExtendI32S
            | UnOp::I64ExtendI32U
            | UnOp::I64Extend8S
            | UnOp::I64Extend16S
            | UnOp::I64Extend32S
            | UnOp::I64TruncF32S
            | UnOp::I64TruncF32U
            | UnOp::I64TruncF64S
            | UnOp::I64TruncF64U
            | UnOp::I64ReinterpretF64 => ValType::I64,

            UnOp::F32Neg
            | UnOp::F32ConvertI32S
            | UnOp::F32ConvertI32U
            | UnOp::F32ConvertI64S
            | UnOp::F32ConvertI64U
            | UnOp::F32DemoteF64
            | UnOp::F32ReinterpretI32 => ValType::F32,

            UnOp::F64Neg
            | UnOp::F64ConvertI32S
            | UnOp::F64ConvertI32U
            | UnOp::F64ConvertI64S
            | UnOp::F64ConvertI64U
            | UnOp::F64PromoteF32
            | UnOp::F64ReinterpretI64 => ValType::F64,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::I32Add => "i32.add",
            BinOp::I32Sub => "i32.sub",
            BinOp::I32Mul => "i32.mul",
            BinOp::I64Add => "i64.add",
            BinOp::I64Sub => "i64.sub",
            BinOp::I64Mul => "i64.mul",
            BinOp::F32Add => "f32.add",
            BinOp::F32Sub => "f32.sub",
            BinOp::F32Mul => "f32.mul",
            BinOp::F64Add => "f64.add",
            BinOp::F64Sub => "f64.sub",
            BinOp::F64Mul => "f64.mul",
            _ => return fmt::Debug::fmt(self, f),
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_id_display() {
        assert_eq!(VarId(0).to_string(), "v0");
        assert_eq!(VarId(42).to_string(), "v42");
    }

    #[test]
    fn test_block_id_display() {
        assert_eq!(BlockId(0).to_string(), "b0");
        assert_eq!(BlockId(7).to_string(), "b7");
    }

    #[test]
    fn test_ir_value_type_and_display() {
        assert_eq!(IrValue::I32(5).ty(), ValType::I32);
        assert_eq!(IrValue::F64(0).ty(), ValType::F64);
        assert_eq!(IrValue::I64(-3).to_string(), "-3i64");
        assert_eq!(IrValue::F32(1.5f32.to_bits()).to_string(), "1.5f32");
    }

    #[test]
    fn test_ir_value_zero() {
        assert_eq!(IrValue::zero(ValType::FUNCREF), Some(IrValue::I64(0)));
        assert_eq!(IrValue::zero(ValType::F32), Some(IrValue::F32(0)));
        assert_eq!(IrValue::zero(ValType::V128), None);
    }

    #[test]
    fn test_binop_result_type() {
        assert_eq!(BinOp::I32Add.result_type(), ValType::I32);
        assert_eq!(BinOp::I64ShrU.result_type(), ValType::I64);
        assert_eq!(BinOp::I64LtS.result_type(), ValType::I32);
        assert_eq!(BinOp::F32Div.result_type(), ValType::F32);
        assert_eq!(BinOp::F64Unordered.result_type(), ValType::I32);
    }

    #[test]
    fn test_binop_operand_type() {
        assert_eq!(BinOp::I64Eq.operand_type(), ValType::I64);
        assert_eq!(BinOp::F32Unordered.operand_type(), ValType::F32);
        assert_eq!(BinOp::F64Ge.operand_type(), ValType::F64);
    }

    #[test]
    fn test_unop_result_type() {
        assert_eq!(UnOp::I64Eqz.result_type(), ValType::I32);
        assert_eq!(UnOp::I32WrapI64.result_type(), ValType::I32);
        assert_eq!(UnOp::I64Extend32S.result_type(), ValType::I64);
        assert_eq!(UnOp::F32DemoteF64.result_type(), ValType::F32);
        assert_eq!(UnOp::F64ReinterpretI64.result_type(), ValType::F64);
    }

    #[test]
    fn test_terminator_successors() {
        let t = IrTerminator::BranchTable {
            index: VarId(0),
            targets: vec![BlockId(1), BlockId(2)],
            default: BlockId(3),
        };
        assert_eq!(t.successors(), vec![BlockId(1), BlockId(2), BlockId(3)]);
        assert!(IrTerminator::Halt.successors().is_empty());
    }

    #[test]
    fn test_access_width_bytes() {
        assert_eq!(MemoryAccessWidth::I16.bytes(ValType::I64), 2);
        assert_eq!(MemoryAccessWidth::Full.bytes(ValType::F64), 8);
        assert_eq!(MemoryAccessWidth::Full.bytes(ValType::V128), 16);
    }
}
