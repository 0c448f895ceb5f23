//! Execution tests for the sample programs under `data/`.
//!
//! Each program is compiled to IR and run by the evaluator; results are
//! checked against host implementations.

use wasm2qbe::ir::IrValue;
use wasm2qbe::CompileOptions;
use wasm2qbe_abi::TrapKind;
use wasm2qbe_tests::{collatz_steps_orig, fib_orig, gcd_orig, programs, EvalError, Instance};

fn instance(source: &str) -> Instance {
    Instance::from_wat(source, &CompileOptions::default()).expect("program compiles")
}

fn trap_of<T: std::fmt::Debug>(result: Result<T, EvalError>) -> TrapKind {
    match result {
        Err(EvalError::Trap(kind)) => kind,
        other => panic!("expected a trap, got {:?}", other),
    }
}

#[test]
fn test_collatz() {
    let mut m = instance(programs::COLLATZ);
    let steps = m.call_export("collatz", &[IrValue::I64(27)]).unwrap();
    assert_eq!(steps, vec![IrValue::I32(111)]);
    for n in [1i64, 2, 7, 97, 871] {
        let steps = m.call_export("collatz", &[IrValue::I64(n)]).unwrap();
        assert_eq!(steps, vec![IrValue::I32(collatz_steps_orig(n))], "n = {}", n);
    }
}

#[test]
fn test_fib() {
    let mut m = instance(programs::FIB);
    assert_eq!(m.call_i32("fib", &[20]).unwrap(), 6765);
    assert_eq!(m.call_i32("fib_rec", &[15]).unwrap(), fib_orig(15));
    assert_eq!(m.call_i32("fib_mod", &[20]).unwrap(), 109);
    for n in 0..30 {
        assert_eq!(m.call_i32("fib", &[n]).unwrap(), fib_orig(n), "n = {}", n);
    }
}

#[test]
fn test_fib_wraps() {
    let mut m = instance(programs::FIB);
    // fib(50) overflows i32; Wasm arithmetic wraps.
    assert_eq!(m.call_i32("fib", &[50]).unwrap(), fib_orig(50));
}

#[test]
fn test_gcd() {
    let mut m = instance(programs::GCD);
    assert_eq!(m.call_i32("sum", &[]).unwrap(), 27);
    for (a, b) in [(48, 18), (252, 105), (17, 5), (0, 9), (9, 0), (-12, 8)] {
        let expected = gcd_orig(a, b);
        assert_eq!(m.call_i32("gcd", &[a, b]).unwrap(), expected, "gcd({}, {})", a, b);
        assert_eq!(m.call_i32("gcd_rec", &[a, b]).unwrap(), expected, "gcd_rec({}, {})", a, b);
    }
}

#[test]
fn test_active_data_segment_is_applied() {
    let m = instance(programs::MEMORY);
    let memory = m.memory(0).unwrap();
    assert_eq!(memory.len(), 65536);
    assert_eq!(&memory[16..21], &[1, 2, 3, 4, 0xff]);
}

#[test]
fn test_memory_loads_and_stores() {
    let mut m = instance(programs::MEMORY);
    assert_eq!(m.call_i32("sum_bytes", &[16, 5]).unwrap(), 265);
    assert_eq!(m.call_i32("load_signed", &[20]).unwrap(), -1);

    m.call_export("store_word", &[IrValue::I32(100), IrValue::I32(0x1234_5678)])
        .unwrap();
    assert_eq!(m.call_i32("load_word", &[100]).unwrap(), 0x1234_5678);
    assert_eq!(m.memory(0).unwrap()[104], 0x78);
    assert_eq!(m.global(0), Some(IrValue::I32(1)));
}

#[test]
fn test_memory_out_of_bounds() {
    let mut m = instance(programs::MEMORY);
    // The last word of the page is addressable; one byte further is not.
    assert_eq!(m.call_i32("load_word", &[65528]).unwrap(), 0);
    assert_eq!(trap_of(m.call_i32("load_word", &[65529])), TrapKind::OutOfBounds);
    // Offsets are added without wrapping.
    assert_eq!(trap_of(m.call_i32("load_word", &[-1])), TrapKind::OutOfBounds);
}

#[test]
fn test_passive_segment_init_and_drop() {
    let mut m = instance(programs::MEMORY);
    assert_eq!(
        m.call_i32("init_tail", &[200]).unwrap(),
        i32::from_le_bytes(*b"wasm")
    );
    m.call_export("drop_tail", &[]).unwrap();
    assert_eq!(trap_of(m.call_i32("init_tail", &[200])), TrapKind::OutOfBounds);
}

#[test]
fn test_bulk_fill_and_copy() {
    let mut m = instance(programs::MEMORY);
    assert_eq!(m.call_i32("fill_copy", &[300]).unwrap(), 0x0707_0707);
    assert_eq!(&m.memory(0).unwrap()[300..316], &[7; 16]);
}

#[test]
fn test_memory_grow_respects_maximum() {
    let mut m = instance(programs::MEMORY);
    assert_eq!(m.call_i32("size", &[]).unwrap(), 1);
    assert_eq!(m.call_i32("grow", &[1]).unwrap(), 1);
    assert_eq!(m.call_i32("grow", &[1]).unwrap(), 2);
    assert_eq!(m.call_i32("grow", &[1]).unwrap(), -1);
    assert_eq!(m.call_i32("size", &[]).unwrap(), 3);
    assert_eq!(m.memory(0).unwrap().len(), 3 * 65536);
}

#[test]
fn test_call_indirect() {
    let mut m = instance(programs::DISPATCH);
    assert_eq!(m.call_i32("apply", &[0, 2, 3]).unwrap(), 5);
    assert_eq!(m.call_i32("apply", &[1, 2, 3]).unwrap(), -1);
    assert_eq!(m.call_i32("apply", &[2, 2, 3]).unwrap(), 6);
}

#[test]
fn test_call_indirect_traps() {
    let mut m = instance(programs::DISPATCH);
    // Slot 3 holds a function of another type.
    assert_eq!(trap_of(m.call_i32("apply", &[3, 2, 3])), TrapKind::CastFailure);
    assert_eq!(trap_of(m.call_i32("apply", &[4, 2, 3])), TrapKind::OutOfBounds);
}

#[test]
fn test_br_table() {
    let mut m = instance(programs::DISPATCH);
    assert_eq!(m.call_i32("classify", &[0]).unwrap(), 100);
    assert_eq!(m.call_i32("classify", &[1]).unwrap(), 101);
    assert_eq!(m.call_i32("classify", &[2]).unwrap(), 102);
    assert_eq!(m.call_i32("classify", &[3]).unwrap(), -1);
    assert_eq!(m.call_i32("classify", &[-1]).unwrap(), -1);
}

#[test]
fn test_select_and_multi_value() {
    let mut m = instance(programs::DISPATCH);
    let picked = m
        .call_export("pick", &[IrValue::I32(1), IrValue::I64(5), IrValue::I64(9)])
        .unwrap();
    assert_eq!(picked, vec![IrValue::I64(5)]);
    let picked = m
        .call_export("pick", &[IrValue::I32(0), IrValue::I64(5), IrValue::I64(9)])
        .unwrap();
    assert_eq!(picked, vec![IrValue::I64(9)]);

    let qr = m
        .call_export("divmod", &[IrValue::I32(17), IrValue::I32(5)])
        .unwrap();
    assert_eq!(qr, vec![IrValue::I32(3), IrValue::I32(2)]);
    let err = m.call_export("divmod", &[IrValue::I32(1), IrValue::I32(0)]);
    assert_eq!(trap_of(err), TrapKind::DivByZero);
}

#[test]
fn test_parallel_translation_runs_the_same() {
    let options = CompileOptions {
        parallel: true,
        ..CompileOptions::default()
    };
    let mut m = Instance::from_wat(programs::FIB, &options).unwrap();
    assert_eq!(m.call_i32("fib", &[20]).unwrap(), 6765);
}
