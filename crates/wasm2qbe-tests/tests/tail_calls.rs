//! Self tail calls compiled as loops behave like real calls, without
//! consuming stack.

use wasm2qbe::ir::IrValue;
use wasm2qbe::CompileOptions;
use wasm2qbe_tests::{collatz_steps_orig, programs, EvalError, Instance};

fn options(loops: bool) -> CompileOptions {
    CompileOptions {
        self_tail_call_loops: loops,
        ..CompileOptions::default()
    }
}

const COUNTDOWN: &str = r#"
(module
  (func $down (export "down") (param $n i32) (param $acc i64) (result i64)
    local.get $n
    i32.eqz
    if (result i64)
      local.get $acc
    else
      local.get $n
      i32.const 1
      i32.sub
      local.get $acc
      local.get $n
      i64.extend_i32_u
      i64.add
      return_call $down
    end))
"#;

#[test]
fn test_loop_and_call_agree() {
    for loops in [true, false] {
        let mut m = Instance::from_wat(programs::COLLATZ, &options(loops)).unwrap();
        for n in [1i64, 6, 27, 97] {
            let rec = m
                .call_export("collatz_rec", &[IrValue::I64(n), IrValue::I32(0)])
                .unwrap();
            assert_eq!(
                rec,
                vec![IrValue::I32(collatz_steps_orig(n))],
                "n = {}, loops = {}",
                n,
                loops
            );
        }

        let mut m = Instance::from_wat(programs::GCD, &options(loops)).unwrap();
        assert_eq!(m.call_i32("gcd_rec", &[252, 105]).unwrap(), 21);
    }
}

#[test]
fn test_deep_tail_recursion_needs_loops() {
    let args = [IrValue::I32(100_000), IrValue::I64(0)];
    let expected = vec![IrValue::I64(100_000 * 100_001 / 2)];

    let mut looped = Instance::from_wat(COUNTDOWN, &options(true)).unwrap();
    assert_eq!(looped.call_export("down", &args).unwrap(), expected);

    let mut called = Instance::from_wat(COUNTDOWN, &options(false)).unwrap();
    assert!(matches!(
        called.call_export("down", &args),
        Err(EvalError::CallStackExhausted)
    ));
    // Shallow recursion is fine either way.
    let shallow = [IrValue::I32(10), IrValue::I64(0)];
    assert_eq!(
        called.call_export("down", &shallow).unwrap(),
        vec![IrValue::I64(55)]
    );
}

#[test]
fn test_parameters_are_rebound_each_iteration() {
    // Arguments are evaluated before any parameter is overwritten.
    let swap = r#"
    (module
      (func $f (export "f") (param $a i32) (param $b i32) (param $n i32) (result i32)
        local.get $n
        i32.eqz
        if (result i32)
          local.get $a
          i32.const 10
          i32.mul
          local.get $b
          i32.add
        else
          local.get $b
          local.get $a
          local.get $n
          i32.const 1
          i32.sub
          return_call $f
        end))
    "#;
    for loops in [true, false] {
        let mut m = Instance::from_wat(swap, &options(loops)).unwrap();
        assert_eq!(m.call_i32("f", &[1, 2, 3]).unwrap(), 21, "loops = {}", loops);
        assert_eq!(m.call_i32("f", &[1, 2, 4]).unwrap(), 12, "loops = {}", loops);
    }
}
