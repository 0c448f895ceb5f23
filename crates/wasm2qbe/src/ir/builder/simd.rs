//! SIMD instructions.
//!
//! QBE has no vector types, so every `v128` operation becomes a call to its
//! scalar fallback in the runtime. The decoder's opcode table supplies the
//! operand shape; this module only arranges the arguments.

use super::core::IrBuilder;
use crate::decoder::simd::{SimdOpInfo, SimdShape};
use crate::decoder::{MemArg, SimdImm, ValType};
use crate::ir::types::*;
use anyhow::{bail, Context, Result};

impl<'m> IrBuilder<'m> {
    pub(super) fn translate_simd(&mut self, op: &'static SimdOpInfo, imm: SimdImm) -> Result<()> {
        let addr_ty = match imm {
            SimdImm::MemArg(memarg) | SimdImm::MemArgLane(memarg, _) => self
                .module
                .memory_type(memarg.memory)
                .with_context(|| format!("unknown memory {}", memarg.memory))?
                .index_type(),
            _ => ValType::I32,
        };
        let (params, result) = op.shape.signature(addr_ty);
        let operands = self.pop_n(params.len())?;
        let args = simd_args(op, imm, &operands)?;

        let dest = result.map(|ty| self.new_var(ty));
        self.emit(IrInstr::CallSimd {
            dest,
            name: op.name,
            args,
        });
        if let Some(dest) = dest {
            self.push(dest);
        }
        Ok(())
    }
}

/// Fallback arguments for `op`: memory operands become one address
/// argument, immediates follow the vector operands.
fn simd_args(op: &SimdOpInfo, imm: SimdImm, operands: &[VarId]) -> Result<Vec<SimdArg>> {
    let address = |memarg: MemArg, align: u32, addr: VarId| SimdArg::Address {
        memory: memarg.memory,
        addr,
        offset: memarg.offset,
        // The natural alignment of every SIMD memory access is its size.
        bytes: 1 << align,
    };
    let vars = |vs: &[VarId]| vs.iter().map(|v| SimdArg::Var(*v)).collect::<Vec<_>>();

    Ok(match (op.shape, imm) {
        (SimdShape::Load { align }, SimdImm::MemArg(memarg)) => {
            vec![address(memarg, align, operands[0])]
        }
        (SimdShape::Store { align }, SimdImm::MemArg(memarg)) => {
            vec![address(memarg, align, operands[0]), SimdArg::Var(operands[1])]
        }
        (
            SimdShape::LoadLane { align, .. } | SimdShape::StoreLane { align, .. },
            SimdImm::MemArgLane(memarg, lane),
        ) => {
            vec![
                address(memarg, align, operands[0]),
                SimdArg::Var(operands[1]),
                SimdArg::Lane(lane),
            ]
        }
        (SimdShape::Const, SimdImm::V128(bits)) => {
            vec![SimdArg::Imm(bits as u64), SimdArg::Imm((bits >> 64) as u64)]
        }
        (SimdShape::Shuffle, SimdImm::Shuffle(lanes)) => {
            let mask = u128::from_le_bytes(lanes);
            let mut args = vars(operands);
            args.push(SimdArg::Imm(mask as u64));
            args.push(SimdArg::Imm((mask >> 64) as u64));
            args
        }
        (SimdShape::ExtractLane { .. }, SimdImm::Lane(lane)) => {
            vec![SimdArg::Var(operands[0]), SimdArg::Lane(lane)]
        }
        (SimdShape::ReplaceLane { .. }, SimdImm::Lane(lane)) => {
            vec![
                SimdArg::Var(operands[0]),
                SimdArg::Lane(lane),
                SimdArg::Var(operands[1]),
            ]
        }
        (
            SimdShape::Splat { .. }
            | SimdShape::Unary
            | SimdShape::Binary
            | SimdShape::Ternary
            | SimdShape::Test
            | SimdShape::Shift,
            SimdImm::None,
        ) => vars(operands),
        (shape, imm) => bail!("{}: immediate {:?} does not fit shape {:?}", op.name, imm, shape),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::simd::lookup;

    #[test]
    fn test_const_splits_into_halves() {
        let op = lookup(0x0C).unwrap();
        let args = simd_args(op, SimdImm::V128(0x1122_u128 << 64 | 0x33), &[]).unwrap();
        assert_eq!(args, vec![SimdArg::Imm(0x33), SimdArg::Imm(0x1122)]);
    }

    #[test]
    fn test_load_becomes_address() {
        let op = lookup(0x00).unwrap();
        let memarg = MemArg {
            align: 4,
            memory: 0,
            offset: 32,
        };
        let args = simd_args(op, SimdImm::MemArg(memarg), &[VarId(7)]).unwrap();
        assert_eq!(
            args,
            vec![SimdArg::Address {
                memory: 0,
                addr: VarId(7),
                offset: 32,
                bytes: 16
            }]
        );
    }

    #[test]
    fn test_mismatched_immediate_is_rejected() {
        let op = lookup(0x0C).unwrap();
        assert!(simd_args(op, SimdImm::None, &[]).is_err());
    }
}
