//! End-to-end integration tests for wasm2qbe.
//!
//! These tests verify the complete pipeline: Wasm → IR → QBE IL.

use anyhow::{Context, Result};
use pretty_assertions::assert_eq;
use wasm2qbe::{compile, CompileOptions, Error};

/// Helper to compile WAT source to QBE IL.
fn compile_wat(wat_source: &str) -> Result<String> {
    let wasm_bytes = wat::parse_str(wat_source).context("failed to parse WAT")?;
    Ok(compile(&wasm_bytes, &CompileOptions::default())?)
}

fn compile_err(wat_source: &str) -> Error {
    let wasm_bytes = wat::parse_str(wat_source).expect("valid WAT syntax");
    compile(&wasm_bytes, &CompileOptions::default()).unwrap_err()
}

#[test]
fn test_simple_add() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add
            )
        )
    "#,
    )?;

    println!("Generated QBE:\n{}", qbe);

    assert!(qbe.contains("export function w $wasm_add(w %p0, w %p1) {"));
    assert!(qbe.contains("%l0 =l alloc4 4"));
    assert!(qbe.contains(" =w add %v"));
    assert!(qbe.contains("\tret %v"));
    Ok(())
}

#[test]
fn test_i64_and_float_signatures() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (func (export "mix") (param i64 f32 f64) (result f64)
                local.get 2
            )
        )
    "#,
    )?;
    assert!(qbe.contains("export function d $wasm_mix(l %p0, s %p1, d %p2) {"));
    assert!(qbe.contains("stored %p2, %l2"));
    Ok(())
}

#[test]
fn test_float_constants_keep_bits() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (func (export "nan") (result f32)
                f32.const nan:0x200000
            )
        )
    "#,
    )?;
    // 0x7fa00000
    assert!(qbe.contains(&format!("=w copy {}", 0x7fa0_0000_i32)));
    assert!(qbe.contains("=s cast %t"));
    Ok(())
}

#[test]
fn test_loop_uses_jumps() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (func (export "count") (param i32) (result i32)
                (local i32)
                block
                  loop
                    local.get 0
                    i32.eqz
                    br_if 1
                    local.get 0
                    i32.const 1
                    i32.sub
                    local.set 0
                    local.get 1
                    i32.const 1
                    i32.add
                    local.set 1
                    br 0
                  end
                end
                local.get 1
            )
        )
    "#,
    )?;
    assert!(qbe.contains("jnz "));
    assert!(qbe.contains("ceqw "));
    assert!(qbe.contains("storew 0, %l1"));
    Ok(())
}

#[test]
fn test_division_traps() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (func (export "div") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s
            )
        )
    "#,
    )?;
    assert!(qbe.contains("@trap_div_by_zero\n\tcall $__wasm_trap_div_by_zero()\n\thlt\n"));
    assert!(qbe.contains("@trap_integer_overflow"));
    assert!(qbe.contains(" =w div %v"));
    Ok(())
}

#[test]
fn test_call_indirect_checks_signature() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (type $t (func (result i32)))
            (table 1 funcref)
            (func $one (type $t) i32.const 1)
            (elem (i32.const 0) $one)
            (func (export "dispatch") (param i32) (result i32)
                local.get 0
                call_indirect (type $t)
            )
        )
    "#,
    )?;
    assert!(qbe.contains("call $__wasm_table_get("));
    assert!(qbe.contains("@trap_null_reference"));
    assert!(qbe.contains("@trap_cast_failure"));
    // Indirect call through the descriptor's code pointer.
    assert!(qbe.contains(" =w call %t"));
    Ok(())
}

#[test]
fn test_module_init_applies_segments_and_start() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (memory 1)
            (global $g (mut i32) (i32.const 5))
            (data (i32.const 8) "abc")
            (func $init (global.set $g (i32.const 6)))
            (start $init)
        )
    "#,
    )?;
    assert!(qbe.contains("data $__wasm_global_0 = align 8 { w 5 }"));
    assert!(qbe.contains("data $__wasm_data_0 = { b 97 98 99 }"));

    let init = qbe
        .split("export function $__wasm_module_init() {")
        .nth(1)
        .context("module initialiser missing")?;
    let memory_new = init.find("$__wasm_memory_new(").context("memory_new")?;
    let data_init = init.find("$__wasm_memory_init_seg(").context("memory_init")?;
    let data_drop = init.find("$__wasm_data_drop(").context("data_drop")?;
    let start = init.find("call $__wasm_f0_init()").context("start call")?;
    assert!(memory_new < data_init && data_init < data_drop && data_drop < start);
    Ok(())
}

#[test]
fn test_exported_global_symbol() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (global (export "counter") (mut i64) (i64.const -1))
        )
    "#,
    )?;
    assert!(qbe.contains("export data $wasm_counter = align 8 { l -1 }"));
    Ok(())
}

#[test]
fn test_simd_calls_fallbacks() -> Result<()> {
    let qbe = compile_wat(
        r#"
        (module
            (func (export "add4") (param v128 v128) (result v128)
                local.get 0
                local.get 1
                i32x4.add
            )
        )
    "#,
    )?;
    // v128 results travel through an out-pointer, operands by address.
    assert!(qbe.contains("export function $wasm_add4(l %p0, l %p1, l %out0) {"));
    assert!(qbe.contains("call $__wasm_simd_i32x4_add(l %v"));
    Ok(())
}

#[test]
fn test_validation_error_is_reported() {
    let err = compile_err(
        r#"
        (module
            (func (result i32)
                i64.const 1
            )
        )
    "#,
    );
    assert_eq!(err.kind(), "validation");
    let Error::Validation(errors) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(errors.first().and_then(|e| e.func_idx), Some(0));
}

#[test]
fn test_br_if_missing_label_values() {
    let bytes = wat::parse_str(
        r#"
        (module
            (func (result i32 i32)
                block (result i32 i32)
                    i32.const 1
                    br_if 0
                    unreachable
                end
            )
        )
    "#,
    )
    .unwrap();
    let br_if = bytes
        .windows(4)
        .position(|w| w == [0x41, 0x01, 0x0D, 0x00])
        .unwrap()
        + 2;
    let err = compile(&bytes, &CompileOptions::default()).unwrap_err();
    let Error::Validation(errors) = err else {
        panic!("expected a validation error");
    };
    let first = errors.first().unwrap();
    assert_eq!(first.func_idx, Some(0));
    assert_eq!(first.offset, br_if);
}

#[test]
fn test_parse_error_for_garbage() {
    let err = compile(b"\0asm\x02\0\0\0", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), "parse");
    assert!(err.to_string().contains("offset"));
}

#[test]
fn test_parallel_output_matches_sequential() -> Result<()> {
    let wat = r#"
        (module
            (func $sq (param i32) (result i32) local.get 0 local.get 0 i32.mul)
            (func $cube (param i32) (result i32) local.get 0 call $sq local.get 0 i32.mul)
            (func (export "f") (param i32) (result i32) local.get 0 call $cube call $sq)
        )
    "#;
    let bytes = wat::parse_str(wat)?;
    let sequential = compile(&bytes, &CompileOptions::default())?;
    let parallel = compile(
        &bytes,
        &CompileOptions {
            parallel: true,
            ..CompileOptions::default()
        },
    )?;
    assert_eq!(sequential, parallel);
    Ok(())
}
