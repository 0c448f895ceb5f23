//! Numeric instructions.
//!
//! Most operators map to one QBE instruction. The rest are expanded here:
//! division and remainder get their trap checks, trapping float-to-int
//! conversions check for NaN and range first, saturating conversions clamp
//! with selects, and bit counts, rotations and the float operations QBE
//! lacks become runtime calls.

use super::core::IrBuilder;
use crate::decoder::{NumericOp, ValType};
use crate::ir::types::*;
use anyhow::{bail, Result};
use wasm2qbe_abi::{RuntimeFn, TrapKind};

/// Range accepted by a float-to-int conversion: `lo` (inclusive or not)
/// up to `hi` exclusive, plus the saturation values.
struct TruncBounds {
    lo: f64,
    lo_inclusive: bool,
    hi: f64,
    min: IrValue,
    max: IrValue,
}

impl<'m> IrBuilder<'m> {
    pub(super) fn translate_numeric(&mut self, op: NumericOp) -> Result<()> {
        use NumericOp as N;

        if let Some(bin) = simple_binop(op) {
            let rhs = self.pop()?;
            let lhs = self.pop()?;
            let dest = self.emit_binop(bin, lhs, rhs);
            self.push(dest);
            return Ok(());
        }
        if let Some(un) = simple_unop(op) {
            let operand = self.pop()?;
            let dest = self.emit_unop(un, operand);
            self.push(dest);
            return Ok(());
        }
        if let Some(func) = runtime_op(op) {
            let (params, result) = op.signature();
            let args = self.pop_n(params.len())?;
            let dest = self.emit_runtime_value(func, args, result)?;
            self.push(dest);
            return Ok(());
        }

        let dest = match op {
            N::I32DivS | N::I32DivU | N::I32RemS | N::I32RemU => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.emit_division(op, false, lhs, rhs)?
            }
            N::I64DivS | N::I64DivU | N::I64RemS | N::I64RemU => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.emit_division(op, true, lhs, rhs)?
            }
            N::I32TruncF32S
            | N::I32TruncF32U
            | N::I32TruncF64S
            | N::I32TruncF64U
            | N::I64TruncF32S
            | N::I64TruncF32U
            | N::I64TruncF64S
            | N::I64TruncF64U => {
                let x = self.pop()?;
                self.emit_trapping_trunc(op, x)?
            }
            N::I32TruncSatF32S
            | N::I32TruncSatF32U
            | N::I32TruncSatF64S
            | N::I32TruncSatF64U
            | N::I64TruncSatF32S
            | N::I64TruncSatF32U
            | N::I64TruncSatF64S
            | N::I64TruncSatF64U => {
                let x = self.pop()?;
                self.emit_saturating_trunc(op, x)?
            }
            _ => bail!("no lowering for {}", op.name()),
        };
        self.push(dest);
        Ok(())
    }

    /// Integer division and remainder: trap on a zero divisor, trap on
    /// `MIN / -1`, and compute `MIN % -1` as `MIN % 1` so the hardware
    /// instruction cannot fault.
    fn emit_division(&mut self, op: NumericOp, is64: bool, lhs: VarId, rhs: VarId) -> Result<VarId> {
        use NumericOp as N;

        let int = |v: i64| if is64 { IrValue::I64(v) } else { IrValue::I32(v as i32) };
        let eq = if is64 { BinOp::I64Eq } else { BinOp::I32Eq };

        let zero = self.emit_const(int(0));
        let is_zero = self.emit_binop(eq, rhs, zero);
        self.emit_trap_if(is_zero, TrapKind::DivByZero);

        let dest = match op {
            N::I32DivS | N::I64DivS => {
                let min = if is64 { i64::MIN } else { i32::MIN as i64 };
                let min = self.emit_const(int(min));
                let minus_one = self.emit_const(int(-1));
                let lhs_min = self.emit_binop(eq, lhs, min);
                let rhs_neg = self.emit_binop(eq, rhs, minus_one);
                let overflow = self.emit_binop(BinOp::I32And, lhs_min, rhs_neg);
                self.emit_trap_if(overflow, TrapKind::IntegerOverflow);
                let div = if is64 { BinOp::I64DivS } else { BinOp::I32DivS };
                self.emit_binop(div, lhs, rhs)
            }
            N::I32RemS | N::I64RemS => {
                let minus_one = self.emit_const(int(-1));
                let one = self.emit_const(int(1));
                let rhs_neg = self.emit_binop(eq, rhs, minus_one);
                let divisor = self.emit_select(rhs_neg, one, rhs);
                let rem = if is64 { BinOp::I64RemS } else { BinOp::I32RemS };
                self.emit_binop(rem, lhs, divisor)
            }
            N::I32DivU => self.emit_binop(BinOp::I32DivU, lhs, rhs),
            N::I64DivU => self.emit_binop(BinOp::I64DivU, lhs, rhs),
            N::I32RemU => self.emit_binop(BinOp::I32RemU, lhs, rhs),
            N::I64RemU => self.emit_binop(BinOp::I64RemU, lhs, rhs),
            _ => bail!("{} is not a division", op.name()),
        };
        Ok(dest)
    }

    /// `iNN.trunc_fMM_*`: NaN traps with `invalid_conversion`, values that
    /// do not fit trap with `integer_overflow`.
    fn emit_trapping_trunc(&mut self, op: NumericOp, x: VarId) -> Result<VarId> {
        let (raw, bounds) = trunc_lowering(op)?;
        let src = raw_source_type(raw);

        let nan = self.emit_binop(unordered(src), x, x);
        self.emit_trap_if(nan, TrapKind::InvalidConversion);

        let lo = self.emit_const(float_const(src, bounds.lo));
        let hi = self.emit_const(float_const(src, bounds.hi));
        let below_op = if bounds.lo_inclusive { lt(src) } else { le(src) };
        let below = self.emit_binop(below_op, x, lo);
        let above = self.emit_binop(ge(src), x, hi);
        let out_of_range = self.emit_binop(BinOp::I32Or, below, above);
        self.emit_trap_if(out_of_range, TrapKind::IntegerOverflow);

        Ok(self.emit_unop(raw, x))
    }

    /// `iNN.trunc_sat_fMM_*`: the raw conversion only ever sees in-range
    /// input; the result is then clamped and NaN mapped to zero.
    fn emit_saturating_trunc(&mut self, op: NumericOp, x: VarId) -> Result<VarId> {
        let (raw, bounds) = trunc_lowering(op)?;
        let src = raw_source_type(raw);
        let dst = raw.result_type();

        let nan = self.emit_binop(unordered(src), x, x);
        let lo = self.emit_const(float_const(src, bounds.lo));
        let hi = self.emit_const(float_const(src, bounds.hi));
        let lo_op = if bounds.lo_inclusive { ge(src) } else { gt(src) };
        let in_lo = self.emit_binop(lo_op, x, lo);
        let in_hi = self.emit_binop(lt(src), x, hi);
        let in_range = self.emit_binop(BinOp::I32And, in_lo, in_hi);

        let zero_f = self.emit_const(float_const(src, 0.0));
        let safe = self.emit_select(in_range, x, zero_f);
        let converted = self.emit_unop(raw, safe);

        let max = self.emit_const(bounds.max);
        let min = self.emit_const(bounds.min);
        let zero = self.emit_zero(dst);
        let clamped_hi = self.emit_select(in_hi, converted, max);
        let clamped = self.emit_select(in_lo, clamped_hi, min);
        Ok(self.emit_select(nan, zero, clamped))
    }
}

fn simple_binop(op: NumericOp) -> Option<BinOp> {
    use NumericOp as N;
    Some(match op {
        N::I32Eq => BinOp::I32Eq,
        N::I32Ne => BinOp::I32Ne,
        N::I32LtS => BinOp::I32LtS,
        N::I32LtU => BinOp::I32LtU,
        N::I32GtS => BinOp::I32GtS,
        N::I32GtU => BinOp::I32GtU,
        N::I32LeS => BinOp::I32LeS,
        N::I32LeU => BinOp::I32LeU,
        N::I32GeS => BinOp::I32GeS,
        N::I32GeU => BinOp::I32GeU,
        N::I64Eq => BinOp::I64Eq,
        N::I64Ne => BinOp::I64Ne,
        N::I64LtS => BinOp::I64LtS,
        N::I64LtU => BinOp::I64LtU,
        N::I64GtS => BinOp::I64GtS,
        N::I64GtU => BinOp::I64GtU,
        N::I64LeS => BinOp::I64LeS,
        N::I64LeU => BinOp::I64LeU,
        N::I64GeS => BinOp::I64GeS,
        N::I64GeU => BinOp::I64GeU,
        N::F32Eq => BinOp::F32Eq,
        N::F32Ne => BinOp::F32Ne,
        N::F32Lt => BinOp::F32Lt,
        N::F32Gt => BinOp::F32Gt,
        N::F32Le => BinOp::F32Le,
        N::F32Ge => BinOp::F32Ge,
        N::F64Eq => BinOp::F64Eq,
        N::F64Ne => BinOp::F64Ne,
        N::F64Lt => BinOp::F64Lt,
        N::F64Gt => BinOp::F64Gt,
        N::F64Le => BinOp::F64Le,
        N::F64Ge => BinOp::F64Ge,
        N::I32Add => BinOp::I32Add,
        N::I32Sub => BinOp::I32Sub,
        N::I32Mul => BinOp::I32Mul,
        N::I32And => BinOp::I32And,
        N::I32Or => BinOp::I32Or,
        N::I32Xor => BinOp::I32Xor,
        N::I32Shl => BinOp::I32Shl,
        N::I32ShrS => BinOp::I32ShrS,
        N::I32ShrU => BinOp::I32ShrU,
        N::I64Add => BinOp::I64Add,
        N::I64Sub => BinOp::I64Sub,
        N::I64Mul => BinOp::I64Mul,
        N::I64And => BinOp::I64And,
        N::I64Or => BinOp::I64Or,
        N::I64Xor => BinOp::I64Xor,
        N::I64Shl => BinOp::I64Shl,
        N::I64ShrS => BinOp::I64ShrS,
        N::I64ShrU => BinOp::I64ShrU,
        N::F32Add => BinOp::F32Add,
        N::F32Sub => BinOp::F32Sub,
        N::F32Mul => BinOp::F32Mul,
        N::F32Div => BinOp::F32Div,
        N::F64Add => BinOp::F64Add,
        N::F64Sub => BinOp::F64Sub,
        N::F64Mul => BinOp::F64Mul,
        N::F64Div => BinOp::F64Div,
        _ => return None,
    })
}

fn simple_unop(op: NumericOp) -> Option<UnOp> {
    use NumericOp as N;
    Some(match op {
        N::I32Eqz => UnOp::I32Eqz,
        N::I64Eqz => UnOp::I64Eqz,
        N::F32Neg => UnOp::F32Neg,
        N::F64Neg => UnOp::F64Neg,
        N::I32WrapI64 => UnOp::I32WrapI64,
        N::I64ExtendI32S => UnOp::I64ExtendI32S,
        N::I64ExtendI32U => UnOp::I64ExtendI32U,
        N::I32Extend8S => UnOp::I32Extend8S,
        N::I32Extend16S => UnOp::I32Extend16S,
        N::I64Extend8S => UnOp::I64Extend8S,
        N::I64Extend16S => UnOp::I64Extend16S,
        N::I64Extend32S => UnOp::I64Extend32S,
        N::F32ConvertI32S => UnOp::F32ConvertI32S,
        N::F32ConvertI32U => UnOp::F32ConvertI32U,
        N::F32ConvertI64S => UnOp::F32ConvertI64S,
        N::F32ConvertI64U => UnOp::F32ConvertI64U,
        N::F64ConvertI32S => UnOp::F64ConvertI32S,
        N::F64ConvertI32U => UnOp::F64ConvertI32U,
        N::F64ConvertI64S => UnOp::F64ConvertI64S,
        N::F64ConvertI64U => UnOp::F64ConvertI64U,
        N::F32DemoteF64 => UnOp::F32DemoteF64,
        N::F64PromoteF32 => UnOp::F64PromoteF32,
        N::I32ReinterpretF32 => UnOp::I32ReinterpretF32,
        N::I64ReinterpretF64 => UnOp::I64ReinterpretF64,
        N::F32ReinterpretI32 => UnOp::F32ReinterpretI32,
        N::F64ReinterpretI64 => UnOp::F64ReinterpretI64,
        _ => return None,
    })
}

fn runtime_op(op: NumericOp) -> Option<RuntimeFn> {
    use NumericOp as N;
    Some(match op {
        N::I32Clz => RuntimeFn::I32Clz,
        N::I32Ctz => RuntimeFn::I32Ctz,
        N::I32Popcnt => RuntimeFn::I32Popcnt,
        N::I32Rotl => RuntimeFn::I32Rotl,
        N::I32Rotr => RuntimeFn::I32Rotr,
        N::I64Clz => RuntimeFn::I64Clz,
        N::I64Ctz => RuntimeFn::I64Ctz,
        N::I64Popcnt => RuntimeFn::I64Popcnt,
        N::I64Rotl => RuntimeFn::I64Rotl,
        N::I64Rotr => RuntimeFn::I64Rotr,
        N::F32Abs => RuntimeFn::F32Abs,
        N::F32Ceil => RuntimeFn::F32Ceil,
        N::F32Floor => RuntimeFn::F32Floor,
        N::F32Trunc => RuntimeFn::F32Trunc,
        N::F32Nearest => RuntimeFn::F32Nearest,
        N::F32Sqrt => RuntimeFn::F32Sqrt,
        N::F32Min => RuntimeFn::F32Min,
        N::F32Max => RuntimeFn::F32Max,
        N::F32Copysign => RuntimeFn::F32Copysign,
        N::F64Abs => RuntimeFn::F64Abs,
        N::F64Ceil => RuntimeFn::F64Ceil,
        N::F64Floor => RuntimeFn::F64Floor,
        N::F64Trunc => RuntimeFn::F64Trunc,
        N::F64Nearest => RuntimeFn::F64Nearest,
        N::F64Sqrt => RuntimeFn::F64Sqrt,
        N::F64Min => RuntimeFn::F64Min,
        N::F64Max => RuntimeFn::F64Max,
        N::F64Copysign => RuntimeFn::F64Copysign,
        _ => return None,
    })
}

/// The raw (non-checking) conversion behind a float-to-int operator and
/// the range it is defined on.
fn trunc_lowering(op: NumericOp) -> Result<(UnOp, TruncBounds)> {
    use NumericOp as N;

    const I32_SIGNED: (IrValue, IrValue) = (IrValue::I32(i32::MIN), IrValue::I32(i32::MAX));
    const I32_UNSIGNED: (IrValue, IrValue) = (IrValue::I32(0), IrValue::I32(-1));
    const I64_SIGNED: (IrValue, IrValue) = (IrValue::I64(i64::MIN), IrValue::I64(i64::MAX));
    const I64_UNSIGNED: (IrValue, IrValue) = (IrValue::I64(0), IrValue::I64(-1));
    const TWO_31: f64 = 2147483648.0;
    const TWO_32: f64 = 4294967296.0;
    const TWO_63: f64 = 9223372036854775808.0;
    const TWO_64: f64 = 18446744073709551616.0;

    let bounds = |lo, lo_inclusive, hi, (min, max): (IrValue, IrValue)| TruncBounds {
        lo,
        lo_inclusive,
        hi,
        min,
        max,
    };
    Ok(match op {
        // -2^31 - 1 has no f32 representation; -2^31 itself converts.
        N::I32TruncF32S | N::I32TruncSatF32S => (
            UnOp::I32TruncF32S,
            bounds(-TWO_31, true, TWO_31, I32_SIGNED),
        ),
        N::I32TruncF64S | N::I32TruncSatF64S => (
            UnOp::I32TruncF64S,
            bounds(-TWO_31 - 1.0, false, TWO_31, I32_SIGNED),
        ),
        N::I32TruncF32U | N::I32TruncSatF32U => (
            UnOp::I32TruncF32U,
            bounds(-1.0, false, TWO_32, I32_UNSIGNED),
        ),
        N::I32TruncF64U | N::I32TruncSatF64U => (
            UnOp::I32TruncF64U,
            bounds(-1.0, false, TWO_32, I32_UNSIGNED),
        ),
        N::I64TruncF32S | N::I64TruncSatF32S => (
            UnOp::I64TruncF32S,
            bounds(-TWO_63, true, TWO_63, I64_SIGNED),
        ),
        N::I64TruncF64S | N::I64TruncSatF64S => (
            UnOp::I64TruncF64S,
            bounds(-TWO_63, true, TWO_63, I64_SIGNED),
        ),
        N::I64TruncF32U | N::I64TruncSatF32U => (
            UnOp::I64TruncF32U,
            bounds(-1.0, false, TWO_64, I64_UNSIGNED),
        ),
        N::I64TruncF64U | N::I64TruncSatF64U => (
            UnOp::I64TruncF64U,
            bounds(-1.0, false, TWO_64, I64_UNSIGNED),
        ),
        _ => bail!("{} is not a float-to-int conversion", op.name()),
    })
}

fn raw_source_type(raw: UnOp) -> ValType {
    match raw {
        UnOp::I32TruncF32S | UnOp::I32TruncF32U | UnOp::I64TruncF32S | UnOp::I64TruncF32U => {
            ValType::F32
        }
        _ => ValType::F64,
    }
}

fn float_const(ty: ValType, value: f64) -> IrValue {
    if ty == ValType::F32 {
        IrValue::F32((value as f32).to_bits())
    } else {
        IrValue::F64(value.to_bits())
    }
}

fn unordered(ty: ValType) -> BinOp {
    if ty == ValType::F32 {
        BinOp::F32Unordered
    } else {
        BinOp::F64Unordered
    }
}

fn lt(ty: ValType) -> BinOp {
    if ty == ValType::F32 {
        BinOp::F32Lt
    } else {
        BinOp::F64Lt
    }
}

fn le(ty: ValType) -> BinOp {
    if ty == ValType::F32 {
        BinOp::F32Le
    } else {
        BinOp::F64Le
    }
}

fn gt(ty: ValType) -> BinOp {
    if ty == ValType::F32 {
        BinOp::F32Gt
    } else {
        BinOp::F64Gt
    }
}

fn ge(ty: ValType) -> BinOp {
    if ty == ValType::F32 {
        BinOp::F32Ge
    } else {
        BinOp::F64Ge
    }
}
