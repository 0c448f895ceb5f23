//! Float-to-integer conversions: trapping and saturating forms.

use wasm2qbe::ir::IrValue;
use wasm2qbe::CompileOptions;
use wasm2qbe_abi::TrapKind;
use wasm2qbe_tests::{EvalError, Instance};

const CONVERSIONS: &str = r#"
(module
  (func (export "sat_i32_f32_s") (param f32) (result i32) local.get 0 i32.trunc_sat_f32_s)
  (func (export "sat_i32_f32_u") (param f32) (result i32) local.get 0 i32.trunc_sat_f32_u)
  (func (export "sat_i32_f64_s") (param f64) (result i32) local.get 0 i32.trunc_sat_f64_s)
  (func (export "sat_i32_f64_u") (param f64) (result i32) local.get 0 i32.trunc_sat_f64_u)
  (func (export "sat_i64_f32_s") (param f32) (result i64) local.get 0 i64.trunc_sat_f32_s)
  (func (export "sat_i64_f32_u") (param f32) (result i64) local.get 0 i64.trunc_sat_f32_u)
  (func (export "sat_i64_f64_s") (param f64) (result i64) local.get 0 i64.trunc_sat_f64_s)
  (func (export "sat_i64_f64_u") (param f64) (result i64) local.get 0 i64.trunc_sat_f64_u)
  (func (export "trunc_i32_f32_s") (param f32) (result i32) local.get 0 i32.trunc_f32_s)
  (func (export "trunc_i32_f64_u") (param f64) (result i32) local.get 0 i32.trunc_f64_u)
  (func (export "trunc_i64_f64_s") (param f64) (result i64) local.get 0 i64.trunc_f64_s)
  (func (export "trunc_i64_f32_u") (param f32) (result i64) local.get 0 i64.trunc_f32_u)
  (func (export "min") (param f64 f64) (result f64) local.get 0 local.get 1 f64.min)
  (func (export "nearest") (param f32) (result f32) local.get 0 f32.nearest)
  (func (export "rotl") (param i32 i32) (result i32) local.get 0 local.get 1 i32.rotl)
  (func (export "clz") (param i64) (result i64) local.get 0 i64.clz))
"#;

fn instance() -> Instance {
    Instance::from_wat(CONVERSIONS, &CompileOptions::default()).unwrap()
}

fn f32v(v: f32) -> IrValue {
    IrValue::F32(v.to_bits())
}

fn f64v(v: f64) -> IrValue {
    IrValue::F64(v.to_bits())
}

fn call(m: &mut Instance, name: &str, arg: IrValue) -> IrValue {
    let results = m.call_export(name, &[arg]).unwrap();
    assert_eq!(results.len(), 1, "{}", name);
    results[0]
}

fn trap(m: &mut Instance, name: &str, arg: IrValue) -> TrapKind {
    match m.call_export(name, &[arg]) {
        Err(EvalError::Trap(kind)) => kind,
        other => panic!("{}({:?}) should trap, got {:?}", name, arg, other),
    }
}

#[test]
fn test_saturating_i32() {
    let mut m = instance();
    let cases = [
        ("sat_i32_f32_s", f32v(f32::NAN), 0),
        ("sat_i32_f32_s", f32v(3.0e10), i32::MAX),
        ("sat_i32_f32_s", f32v(-3.0e10), i32::MIN),
        ("sat_i32_f32_s", f32v(-1.9), -1),
        ("sat_i32_f32_u", f32v(f32::NAN), 0),
        ("sat_i32_f32_u", f32v(5.0e9), u32::MAX as i32),
        ("sat_i32_f32_u", f32v(-7.0), 0),
        ("sat_i32_f32_u", f32v(-0.9), 0),
        ("sat_i32_f64_s", f64v(f64::NAN), 0),
        ("sat_i32_f64_s", f64v(2147483647.9), i32::MAX),
        ("sat_i32_f64_s", f64v(-2147483648.9), i32::MIN),
        ("sat_i32_f64_s", f64v(f64::NEG_INFINITY), i32::MIN),
        ("sat_i32_f64_u", f64v(f64::NAN), 0),
        ("sat_i32_f64_u", f64v(4294967295.5), u32::MAX as i32),
        ("sat_i32_f64_u", f64v(f64::INFINITY), u32::MAX as i32),
        ("sat_i32_f64_u", f64v(-1.0), 0),
    ];
    for (name, arg, expected) in cases {
        assert_eq!(
            call(&mut m, name, arg),
            IrValue::I32(expected),
            "{}({:?})",
            name,
            arg
        );
    }
}

#[test]
fn test_saturating_i64() {
    let mut m = instance();
    let cases = [
        ("sat_i64_f32_s", f32v(f32::NAN), 0),
        ("sat_i64_f32_s", f32v(1.0e19), i64::MAX),
        ("sat_i64_f32_s", f32v(-1.0e19), i64::MIN),
        ("sat_i64_f32_s", f32v(12.75), 12),
        ("sat_i64_f32_u", f32v(f32::NAN), 0),
        ("sat_i64_f32_u", f32v(1.0e20), u64::MAX as i64),
        ("sat_i64_f32_u", f32v(-5.0), 0),
        ("sat_i64_f64_s", f64v(f64::NAN), 0),
        ("sat_i64_f64_s", f64v(9.3e18), i64::MAX),
        ("sat_i64_f64_s", f64v(-9.3e18), i64::MIN),
        ("sat_i64_f64_s", f64v(-42.5), -42),
        ("sat_i64_f64_u", f64v(f64::NAN), 0),
        ("sat_i64_f64_u", f64v(1.9e19), u64::MAX as i64),
        ("sat_i64_f64_u", f64v(-0.5), 0),
        ("sat_i64_f64_u", f64v(1.0e19), 10_000_000_000_000_000_000u64 as i64),
    ];
    for (name, arg, expected) in cases {
        assert_eq!(
            call(&mut m, name, arg),
            IrValue::I64(expected),
            "{}({:?})",
            name,
            arg
        );
    }
}

#[test]
fn test_trapping_conversions() {
    let mut m = instance();
    assert_eq!(
        trap(&mut m, "trunc_i32_f32_s", f32v(f32::NAN)),
        TrapKind::InvalidConversion
    );
    assert_eq!(
        trap(&mut m, "trunc_i32_f32_s", f32v(2147483648.0)),
        TrapKind::IntegerOverflow
    );
    assert_eq!(
        call(&mut m, "trunc_i32_f32_s", f32v(-2147483648.0)),
        IrValue::I32(i32::MIN)
    );
    assert_eq!(
        trap(&mut m, "trunc_i32_f64_u", f64v(-1.0)),
        TrapKind::IntegerOverflow
    );
    assert_eq!(
        call(&mut m, "trunc_i32_f64_u", f64v(-0.99)),
        IrValue::I32(0)
    );
    assert_eq!(
        call(&mut m, "trunc_i32_f64_u", f64v(4294967295.9)),
        IrValue::I32(-1)
    );
    assert_eq!(
        trap(&mut m, "trunc_i64_f64_s", f64v(9.223372036854775808e18)),
        TrapKind::IntegerOverflow
    );
    assert_eq!(
        trap(&mut m, "trunc_i64_f32_u", f32v(f32::INFINITY)),
        TrapKind::IntegerOverflow
    );
    assert_eq!(
        call(&mut m, "trunc_i64_f32_u", f32v(1.5)),
        IrValue::I64(1)
    );
}

#[test]
fn test_runtime_numeric_helpers() {
    let mut m = instance();
    let min = m.call_export("min", &[f64v(0.0), f64v(-0.0)]).unwrap();
    assert_eq!(min, vec![f64v(-0.0)]);
    assert_eq!(call(&mut m, "nearest", f32v(2.5)), f32v(2.0));
    assert_eq!(call(&mut m, "nearest", f32v(-3.5)), f32v(-4.0));
    assert_eq!(
        m.call_export("rotl", &[IrValue::I32(0x8000_0001u32 as i32), IrValue::I32(33)])
            .unwrap(),
        vec![IrValue::I32(3)]
    );
    assert_eq!(call(&mut m, "clz", IrValue::I64(1)), IrValue::I64(63));
}
