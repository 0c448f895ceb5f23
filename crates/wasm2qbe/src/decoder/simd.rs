//! SIMD and relaxed-SIMD opcode table.
//!
//! Every `0xFD`-prefixed instruction is described by its text name and an
//! operand shape. The shape drives immediate decoding, validation and
//! lowering; all SIMD operations compile to calls of scalar fallbacks.

use super::types::ValType;

/// Operand shape of a SIMD instruction. `align` is the maximum alignment
/// exponent; `lanes` bounds the lane immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdShape {
    /// `[addr] -> [v128]`
    Load { align: u32 },
    /// `[addr v128] -> []`
    Store { align: u32 },
    /// `[addr v128] -> [v128]`
    LoadLane { align: u32, lanes: u8 },
    /// `[addr v128] -> []`
    StoreLane { align: u32, lanes: u8 },
    /// `[] -> [v128]`
    Const,
    /// `[v128 v128] -> [v128]` with 16 lane indices
    Shuffle,
    /// `[t] -> [v128]`
    Splat { ty: ValType },
    /// `[v128] -> [t]`
    ExtractLane { ty: ValType, lanes: u8 },
    /// `[v128 t] -> [v128]`
    ReplaceLane { ty: ValType, lanes: u8 },
    /// `[v128] -> [v128]`
    Unary,
    /// `[v128 v128] -> [v128]`
    Binary,
    /// `[v128 v128 v128] -> [v128]`
    Ternary,
    /// `[v128] -> [i32]`
    Test,
    /// `[v128 i32] -> [v128]`
    Shift,
}

impl SimdShape {
    /// Operand types in stack order (the address type is supplied by the
    /// caller for memory shapes) and the optional result.
    pub fn signature(&self, addr: ValType) -> (Vec<ValType>, Option<ValType>) {
        use ValType::{I32, V128};
        match *self {
            SimdShape::Load { .. } => (vec![addr], Some(V128)),
            SimdShape::Store { .. } => (vec![addr, V128], None),
            SimdShape::LoadLane { .. } => (vec![addr, V128], Some(V128)),
            SimdShape::StoreLane { .. } => (vec![addr, V128], None),
            SimdShape::Const => (vec![], Some(V128)),
            SimdShape::Shuffle | SimdShape::Binary => (vec![V128, V128], Some(V128)),
            SimdShape::Splat { ty } => (vec![ty], Some(V128)),
            SimdShape::ExtractLane { ty, .. } => (vec![V128], Some(ty)),
            SimdShape::ReplaceLane { ty, .. } => (vec![V128, ty], Some(V128)),
            SimdShape::Unary => (vec![V128], Some(V128)),
            SimdShape::Ternary => (vec![V128, V128, V128], Some(V128)),
            SimdShape::Test => (vec![V128], Some(I32)),
            SimdShape::Shift => (vec![V128, I32], Some(V128)),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            SimdShape::Load { .. }
                | SimdShape::Store { .. }
                | SimdShape::LoadLane { .. }
                | SimdShape::StoreLane { .. }
        )
    }
}

/// One row of the opcode table.
#[derive(Debug, PartialEq, Eq)]
pub struct SimdOpInfo {
    pub opcode: u32,
    pub name: &'static str,
    pub shape: SimdShape,
}

const fn op(opcode: u32, name: &'static str, shape: SimdShape) -> SimdOpInfo {
    SimdOpInfo {
        opcode,
        name,
        shape,
    }
}

use SimdShape::*;

/// Sorted by opcode.
static SIMD_OPS: &[SimdOpInfo] = &[
    op(0x000, "v128.load", Load { align: 4 }),
    op(0x001, "v128.load8x8_s", Load { align: 3 }),
    op(0x002, "v128.load8x8_u", Load { align: 3 }),
    op(0x003, "v128.load16x4_s", Load { align: 3 }),
    op(0x004, "v128.load16x4_u", Load { align: 3 }),
    op(0x005, "v128.load32x2_s", Load { align: 3 }),
    op(0x006, "v128.load32x2_u", Load { align: 3 }),
    op(0x007, "v128.load8_splat", Load { align: 0 }),
    op(0x008, "v128.load16_splat", Load { align: 1 }),
    op(0x009, "v128.load32_splat", Load { align: 2 }),
    op(0x00a, "v128.load64_splat", Load { align: 3 }),
    op(0x00b, "v128.store", Store { align: 4 }),
    op(0x00c, "v128.const", Const),
    op(0x00d, "i8x16.shuffle", Shuffle),
    op(0x00e, "i8x16.swizzle", Binary),
    op(0x00f, "i8x16.splat", Splat { ty: ValType::I32 }),
    op(0x010, "i16x8.splat", Splat { ty: ValType::I32 }),
    op(0x011, "i32x4.splat", Splat { ty: ValType::I32 }),
    op(0x012, "i64x2.splat", Splat { ty: ValType::I64 }),
    op(0x013, "f32x4.splat", Splat { ty: ValType::F32 }),
    op(0x014, "f64x2.splat", Splat { ty: ValType::F64 }),
    op(0x015, "i8x16.extract_lane_s", ExtractLane { ty: ValType::I32, lanes: 16 }),
    op(0x016, "i8x16.extract_lane_u", ExtractLane { ty: ValType::I32, lanes: 16 }),
    op(0x017, "i8x16.replace_lane", ReplaceLane { ty: ValType::I32, lanes: 16 }),
    op(0x018, "i16x8.extract_lane_s", ExtractLane { ty: ValType::I32, lanes: 8 }),
    op(0x019, "i16x8.extract_lane_u", ExtractLane { ty: ValType::I32, lanes: 8 }),
    op(0x01a, "i16x8.replace_lane", ReplaceLane { ty: ValType::I32, lanes: 8 }),
    op(0x01b, "i32x4.extract_lane", ExtractLane { ty: ValType::I32, lanes: 4 }),
    op(0x01c, "i32x4.replace_lane", ReplaceLane { ty: ValType::I32, lanes: 4 }),
    op(0x01d, "i64x2.extract_lane", ExtractLane { ty: ValType::I64, lanes: 2 }),
    op(0x01e, "i64x2.replace_lane", ReplaceLane { ty: ValType::I64, lanes: 2 }),
    op(0x01f, "f32x4.extract_lane", ExtractLane { ty: ValType::F32, lanes: 4 }),
    op(0x020, "f32x4.replace_lane", ReplaceLane { ty: ValType::F32, lanes: 4 }),
    op(0x021, "f64x2.extract_lane", ExtractLane { ty: ValType::F64, lanes: 2 }),
    op(0x022, "f64x2.replace_lane", ReplaceLane { ty: ValType::F64, lanes: 2 }),
    op(0x023, "i8x16.eq", Binary),
    op(0x024, "i8x16.ne", Binary),
    op(0x025, "i8x16.lt_s", Binary),
    op(0x026, "i8x16.lt_u", Binary),
    op(0x027, "i8x16.gt_s", Binary),
    op(0x028, "i8x16.gt_u", Binary),
    op(0x029, "i8x16.le_s", Binary),
    op(0x02a, "i8x16.le_u", Binary),
    op(0x02b, "i8x16.ge_s", Binary),
    op(0x02c, "i8x16.ge_u", Binary),
    op(0x02d, "i16x8.eq", Binary),
    op(0x02e, "i16x8.ne", Binary),
    op(0x02f, "i16x8.lt_s", Binary),
    op(0x030, "i16x8.lt_u", Binary),
    op(0x031, "i16x8.gt_s", Binary),
    op(0x032, "i16x8.gt_u", Binary),
    op(0x033, "i16x8.le_s", Binary),
    op(0x034, "i16x8.le_u", Binary),
    op(0x035, "i16x8.ge_s", Binary),
    op(0x036, "i16x8.ge_u", Binary),
    op(0x037, "i32x4.eq", Binary),
    op(0x038, "i32x4.ne", Binary),
    op(0x039, "i32x4.lt_s", Binary),
    op(0x03a, "i32x4.lt_u", Binary),
    op(0x03b, "i32x4.gt_s", Binary),
    op(0x03c, "i32x4.gt_u", Binary),
    op(0x03d, "i32x4.le_s", Binary),
    op(0x03e, "i32x4.le_u", Binary),
    op(0x03f, "i32x4.ge_s", Binary),
    op(0x040, "i32x4.ge_u", Binary),
    op(0x041, "f32x4.eq", Binary),
    op(0x042, "f32x4.ne", Binary),
    op(0x043, "f32x4.lt", Binary),
    op(0x044, "f32x4.gt", Binary),
    op(0x045, "f32x4.le", Binary),
    op(0x046, "f32x4.ge", Binary),
    op(0x047, "f64x2.eq", Binary),
    op(0x048, "f64x2.ne", Binary),
    op(0x049, "f64x2.lt", Binary),
    op(0x04a, "f64x2.gt", Binary),
    op(0x04b, "f64x2.le", Binary),
    op(0x04c, "f64x2.ge", Binary),
    op(0x04d, "v128.not", Unary),
    op(0x04e, "v128.and", Binary),
    op(0x04f, "v128.andnot", Binary),
    op(0x050, "v128.or", Binary),
    op(0x051, "v128.xor", Binary),
    op(0x052, "v128.bitselect", Ternary),
    op(0x053, "v128.any_true", Test),
    op(0x054, "v128.load8_lane", LoadLane { align: 0, lanes: 16 }),
    op(0x055, "v128.load16_lane", LoadLane { align: 1, lanes: 8 }),
    op(0x056, "v128.load32_lane", LoadLane { align: 2, lanes: 4 }),
    op(0x057, "v128.load64_lane", LoadLane { align: 3, lanes: 2 }),
    op(0x058, "v128.store8_lane", StoreLane { align: 0, lanes: 16 }),
    op(0x059, "v128.store16_lane", StoreLane { align: 1, lanes: 8 }),
    op(0x05a, "v128.store32_lane", StoreLane { align: 2, lanes: 4 }),
    op(0x05b, "v128.store64_lane", StoreLane { align: 3, lanes: 2 }),
    op(0x05c, "v128.load32_zero", Load { align: 2 }),
    op(0x05d, "v128.load64_zero", Load { align: 3 }),
    op(0x05e, "f32x4.demote_f64x2_zero", Unary),
    op(0x05f, "f64x2.promote_low_f32x4", Unary),
    op(0x060, "i8x16.abs", Unary),
    op(0x061, "i8x16.neg", Unary),
    op(0x062, "i8x16.popcnt", Unary),
    op(0x063, "i8x16.all_true", Test),
    op(0x064, "i8x16.bitmask", Test),
    op(0x065, "i8x16.narrow_i16x8_s", Binary),
    op(0x066, "i8x16.narrow_i16x8_u", Binary),
    op(0x067, "f32x4.ceil", Unary),
    op(0x068, "f32x4.floor", Unary),
    op(0x069, "f32x4.trunc", Unary),
    op(0x06a, "f32x4.nearest", Unary),
    op(0x06b, "i8x16.shl", Shift),
    op(0x06c, "i8x16.shr_s", Shift),
    op(0x06d, "i8x16.shr_u", Shift),
    op(0x06e, "i8x16.add", Binary),
    op(0x06f, "i8x16.add_sat_s", Binary),
    op(0x070, "i8x16.add_sat_u", Binary),
    op(0x071, "i8x16.sub", Binary),
    op(0x072, "i8x16.sub_sat_s", Binary),
    op(0x073, "i8x16.sub_sat_u", Binary),
    op(0x074, "f64x2.ceil", Unary),
    op(0x075, "f64x2.floor", Unary),
    op(0x076, "i8x16.min_s", Binary),
    op(0x077, "i8x16.min_u", Binary),
    op(0x078, "i8x16.max_s", Binary),
    op(0x079, "i8x16.max_u", Binary),
    op(0x07a, "f64x2.trunc", Unary),
    op(0x07b, "i8x16.avgr_u", Binary),
    op(0x07c, "i16x8.extadd_pairwise_i8x16_s", Unary),
    op(0x07d, "i16x8.extadd_pairwise_i8x16_u", Unary),
    op(0x07e, "i32x4.extadd_pairwise_i16x8_s", Unary),
    op(0x07f, "i32x4.extadd_pairwise_i16x8_u", Unary),
    op(0x080, "i16x8.abs", Unary),
    op(0x081, "i16x8.neg", Unary),
    op(0x082, "i16x8.q15mulr_sat_s", Binary),
    op(0x083, "i16x8.all_true", Test),
    op(0x084, "i16x8.bitmask", Test),
    op(0x085, "i16x8.narrow_i32x4_s", Binary),
    op(0x086, "i16x8.narrow_i32x4_u", Binary),
    op(0x087, "i16x8.extend_low_i8x16_s", Unary),
    op(0x088, "i16x8.extend_high_i8x16_s", Unary),
    op(0x089, "i16x8.extend_low_i8x16_u", Unary),
    op(0x08a, "i16x8.extend_high_i8x16_u", Unary),
    op(0x08b, "i16x8.shl", Shift),
    op(0x08c, "i16x8.shr_s", Shift),
    op(0x08d, "i16x8.shr_u", Shift),
    op(0x08e, "i16x8.add", Binary),
    op(0x08f, "i16x8.add_sat_s", Binary),
    op(0x090, "i16x8.add_sat_u", Binary),
    op(0x091, "i16x8.sub", Binary),
    op(0x092, "i16x8.sub_sat_s", Binary),
    op(0x093, "i16x8.sub_sat_u", Binary),
    op(0x094, "f64x2.nearest", Unary),
    op(0x095, "i16x8.mul", Binary),
    op(0x096, "i16x8.min_s", Binary),
    op(0x097, "i16x8.min_u", Binary),
    op(0x098, "i16x8.max_s", Binary),
    op(0x099, "i16x8.max_u", Binary),
    op(0x09b, "i16x8.avgr_u", Binary),
    op(0x09c, "i16x8.extmul_low_i8x16_s", Binary),
    op(0x09d, "i16x8.extmul_high_i8x16_s", Binary),
    op(0x09e, "i16x8.extmul_low_i8x16_u", Binary),
    op(0x09f, "i16x8.extmul_high_i8x16_u", Binary),
    op(0x0a0, "i32x4.abs", Unary),
    op(0x0a1, "i32x4.neg", Unary),
    op(0x0a3, "i32x4.all_true", Test),
    op(0x0a4, "i32x4.bitmask", Test),
    op(0x0a7, "i32x4.extend_low_i16x8_s", Unary),
    op(0x0a8, "i32x4.extend_high_i16x8_s", Unary),
    op(0x0a9, "i32x4.extend_low_i16x8_u", Unary),
    op(0x0aa, "i32x4.extend_high_i16x8_u", Unary),
    op(0x0ab, "i32x4.shl", Shift),
    op(0x0ac, "i32x4.shr_s", Shift),
    op(0x0ad, "i32x4.shr_u", Shift),
    op(0x0ae, "i32x4.add", Binary),
    op(0x0b1, "i32x4.sub", Binary),
    op(0x0b5, "i32x4.mul", Binary),
    op(0x0b6, "i32x4.min_s", Binary),
    op(0x0b7, "i32x4.min_u", Binary),
    op(0x0b8, "i32x4.max_s", Binary),
    op(0x0b9, "i32x4.max_u", Binary),
    op(0x0ba, "i32x4.dot_i16x8_s", Binary),
    op(0x0bc, "i32x4.extmul_low_i16x8_s", Binary),
    op(0x0bd, "i32x4.extmul_high_i16x8_s", Binary),
    op(0x0be, "i32x4.extmul_low_i16x8_u", Binary),
    op(0x0bf, "i32x4.extmul_high_i16x8_u", Binary),
    op(0x0c0, "i64x2.abs", Unary),
    op(0x0c1, "i64x2.neg", Unary),
    op(0x0c3, "i64x2.all_true", Test),
    op(0x0c4, "i64x2.bitmask", Test),
    op(0x0c7, "i64x2.extend_low_i32x4_s", Unary),
    op(0x0c8, "i64x2.extend_high_i32x4_s", Unary),
    op(0x0c9, "i64x2.extend_low_i32x4_u", Unary),
    op(0x0ca, "i64x2.extend_high_i32x4_u", Unary),
    op(0x0cb, "i64x2.shl", Shift),
    op(0x0cc, "i64x2.shr_s", Shift),
    op(0x0cd, "i64x2.shr_u", Shift),
    op(0x0ce, "i64x2.add", Binary),
    op(0x0d1, "i64x2.sub", Binary),
    op(0x0d5, "i64x2.mul", Binary),
    op(0x0d6, "i64x2.eq", Binary),
    op(0x0d7, "i64x2.ne", Binary),
    op(0x0d8, "i64x2.lt_s", Binary),
    op(0x0d9, "i64x2.gt_s", Binary),
    op(0x0da, "i64x2.le_s", Binary),
    op(0x0db, "i64x2.ge_s", Binary),
    op(0x0dc, "i64x2.extmul_low_i32x4_s", Binary),
    op(0x0dd, "i64x2.extmul_high_i32x4_s", Binary),
    op(0x0de, "i64x2.extmul_low_i32x4_u", Binary),
    op(0x0df, "i64x2.extmul_high_i32x4_u", Binary),
    op(0x0e0, "f32x4.abs", Unary),
    op(0x0e1, "f32x4.neg", Unary),
    op(0x0e3, "f32x4.sqrt", Unary),
    op(0x0e4, "f32x4.add", Binary),
    op(0x0e5, "f32x4.sub", Binary),
    op(0x0e6, "f32x4.mul", Binary),
    op(0x0e7, "f32x4.div", Binary),
    op(0x0e8, "f32x4.min", Binary),
    op(0x0e9, "f32x4.max", Binary),
    op(0x0ea, "f32x4.pmin", Binary),
    op(0x0eb, "f32x4.pmax", Binary),
    op(0x0ec, "f64x2.abs", Unary),
    op(0x0ed, "f64x2.neg", Unary),
    op(0x0ef, "f64x2.sqrt", Unary),
    op(0x0f0, "f64x2.add", Binary),
    op(0x0f1, "f64x2.sub", Binary),
    op(0x0f2, "f64x2.mul", Binary),
    op(0x0f3, "f64x2.div", Binary),
    op(0x0f4, "f64x2.min", Binary),
    op(0x0f5, "f64x2.max", Binary),
    op(0x0f6, "f64x2.pmin", Binary),
    op(0x0f7, "f64x2.pmax", Binary),
    op(0x0f8, "i32x4.trunc_sat_f32x4_s", Unary),
    op(0x0f9, "i32x4.trunc_sat_f32x4_u", Unary),
    op(0x0fa, "f32x4.convert_i32x4_s", Unary),
    op(0x0fb, "f32x4.convert_i32x4_u", Unary),
    op(0x0fc, "i32x4.trunc_sat_f64x2_s_zero", Unary),
    op(0x0fd, "i32x4.trunc_sat_f64x2_u_zero", Unary),
    op(0x0fe, "f64x2.convert_low_i32x4_s", Unary),
    op(0x0ff, "f64x2.convert_low_i32x4_u", Unary),
    op(0x100, "i8x16.relaxed_swizzle", Binary),
    op(0x101, "i32x4.relaxed_trunc_f32x4_s", Unary),
    op(0x102, "i32x4.relaxed_trunc_f32x4_u", Unary),
    op(0x103, "i32x4.relaxed_trunc_f64x2_s_zero", Unary),
    op(0x104, "i32x4.relaxed_trunc_f64x2_u_zero", Unary),
    op(0x105, "f32x4.relaxed_madd", Ternary),
    op(0x106, "f32x4.relaxed_nmadd", Ternary),
    op(0x107, "f64x2.relaxed_madd", Ternary),
    op(0x108, "f64x2.relaxed_nmadd", Ternary),
    op(0x109, "i8x16.relaxed_laneselect", Ternary),
    op(0x10a, "i16x8.relaxed_laneselect", Ternary),
    op(0x10b, "i32x4.relaxed_laneselect", Ternary),
    op(0x10c, "i64x2.relaxed_laneselect", Ternary),
    op(0x10d, "f32x4.relaxed_min", Binary),
    op(0x10e, "f32x4.relaxed_max", Binary),
    op(0x10f, "f64x2.relaxed_min", Binary),
    op(0x110, "f64x2.relaxed_max", Binary),
    op(0x111, "i16x8.relaxed_q15mulr_s", Binary),
    op(0x112, "i16x8.relaxed_dot_i8x16_i7x16_s", Binary),
    op(0x113, "i32x4.relaxed_dot_i8x16_i7x16_add_s", Ternary),
];

/// Look up a `0xFD` sub-opcode.
pub fn lookup(opcode: u32) -> Option<&'static SimdOpInfo> {
    SIMD_OPS
        .binary_search_by_key(&opcode, |info| info.opcode)
        .ok()
        .map(|i| &SIMD_OPS[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_unique() {
        assert!(SIMD_OPS.windows(2).all(|w| w[0].opcode < w[1].opcode));
    }

    #[test]
    fn lookup_known_and_reserved() {
        assert_eq!(lookup(0x0c).unwrap().name, "v128.const");
        assert_eq!(lookup(0xff).unwrap().name, "f64x2.convert_low_i32x4_u");
        assert_eq!(lookup(0x113).unwrap().shape, Ternary);
        assert!(lookup(0x9a).is_none());
        assert!(lookup(0x114).is_none());
    }

    #[test]
    fn lane_shapes() {
        let extract = lookup(0x15).unwrap();
        assert_eq!(
            extract.shape,
            ExtractLane {
                ty: ValType::I32,
                lanes: 16
            }
        );
        let (params, result) = lookup(0x5b).unwrap().shape.signature(ValType::I64);
        assert_eq!(params, vec![ValType::I64, ValType::V128]);
        assert_eq!(result, None);
    }
}
