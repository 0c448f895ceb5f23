//! Accept/reject agreement with `wasmparser` on small modules.
//!
//! Each case is assembled with `wat` and fed to both validators; wasm2qbe
//! must accept exactly the modules wasmparser accepts.

use wasm2qbe::{compile, CompileOptions};
use wasmparser::Validator;

fn agrees(name: &str, wat_source: &str) {
    let bytes = wat::parse_str(wat_source).unwrap_or_else(|e| panic!("{}: bad WAT: {}", name, e));
    let reference = Validator::new().validate_all(&bytes).is_ok();
    let ours = compile(&bytes, &CompileOptions::default());
    assert_eq!(
        ours.is_ok(),
        reference,
        "{}: wasm2qbe {} but wasmparser {}: {:?}",
        name,
        if ours.is_ok() { "accepted" } else { "rejected" },
        if reference { "accepted" } else { "rejected" },
        ours.err().map(|e| e.to_string())
    );
}

const VALID: &[(&str, &str)] = &[
    ("empty", "(module)"),
    (
        "arith",
        r#"(module (func (param i32 i64) (result i64)
            local.get 1 local.get 0 i64.extend_i32_u i64.mul))"#,
    ),
    (
        "block_results",
        r#"(module (func (result i32)
            block (result i32) i32.const 1 end))"#,
    ),
    (
        "if_else",
        r#"(module (func (param i32) (result f32)
            local.get 0
            if (result f32) f32.const 1 else f32.const 2 end))"#,
    ),
    (
        "br_table",
        r#"(module (func (param i32) (result i32)
            block block local.get 0 br_table 0 1 1 end i32.const 1 return end
            i32.const 2))"#,
    ),
    (
        "unreachable_is_polymorphic",
        r#"(module (func (result i32 i64)
            unreachable i32.add drop))"#,
    ),
    (
        "memory_ops",
        r#"(module (memory 1)
            (func (param i32) (result i32)
                local.get 0 i32.const 7 i32.store8 offset=3
                local.get 0 i32.load16_s align=1
                memory.size i32.add
                i32.const 1 memory.grow i32.add))"#,
    ),
    (
        "globals",
        r#"(module (global $g (mut f64) (f64.const 1.5))
            (func (result f64) global.get $g f64.const 2 f64.mul global.set $g global.get $g))"#,
    ),
    (
        "call_indirect",
        r#"(module (type $t (func (param i32) (result i32)))
            (table 2 funcref)
            (func $id (type $t) local.get 0)
            (elem (i32.const 0) $id $id)
            (func (result i32) i32.const 5 i32.const 1 call_indirect (type $t)))"#,
    ),
    (
        "multi_value_loop",
        r#"(module (func (param i32) (result i32)
            local.get 0
            loop (param i32) (result i32) i32.const 1 i32.sub end))"#,
    ),
    (
        "select_typed",
        r#"(module (func (param i64 i64 i32) (result i64)
            local.get 0 local.get 1 local.get 2 select (result i64)))"#,
    ),
    (
        "bulk_memory",
        r#"(module (memory 1) (data $d "xyz")
            (func i32.const 0 i32.const 0 i32.const 3 memory.init $d data.drop $d
                  i32.const 0 i32.const 1 i32.const 2 memory.copy))"#,
    ),
    (
        "tail_call",
        r#"(module (func $f (param i32) (result i32)
            local.get 0 i32.eqz if (result i32) i32.const 0 else
            local.get 0 i32.const 1 i32.sub return_call $f end))"#,
    ),
    (
        "start_function",
        r#"(module (func $s) (start $s))"#,
    ),
];

const INVALID: &[(&str, &str)] = &[
    ("result_type", "(module (func (result i32) i64.const 1))"),
    ("missing_operand", "(module (func (result i32) i32.add))"),
    ("extra_value", "(module (func i32.const 1))"),
    ("bad_local", "(module (func (local i32) local.get 1 drop))"),
    ("label_depth", "(module (func block br 2 end))"),
    (
        "if_without_else_result",
        "(module (func (result i32) i32.const 0 if (result i32) i32.const 1 end))",
    ),
    (
        "memory_without_memory",
        "(module (func (result i32) i32.const 0 i32.load))",
    ),
    (
        "alignment_too_large",
        "(module (memory 1) (func (result i32) i32.const 0 i32.load align=8))",
    ),
    (
        "immutable_global",
        "(module (global i32 (i32.const 0)) (func i32.const 1 global.set 0))",
    ),
    (
        "start_with_params",
        "(module (func $s (param i32)) (start $s))",
    ),
    (
        "select_mixed",
        "(module (func (result i32) i32.const 1 i64.const 2 i32.const 0 select))",
    ),
    (
        "br_if_label_arity",
        "(module (func (result i32 i32) block (result i32 i32) i32.const 1 br_if 0 unreachable end))",
    ),
];

#[test]
fn accepts_what_wasmparser_accepts() {
    for (name, wat) in VALID {
        agrees(name, wat);
    }
}

#[test]
fn rejects_what_wasmparser_rejects() {
    for (name, wat) in INVALID {
        agrees(name, wat);
    }
}
