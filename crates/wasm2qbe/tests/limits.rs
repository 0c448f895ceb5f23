//! Parser limits applied through the public entry point.

use anyhow::Result;
use wasm2qbe::{compile, CompileOptions, Error, ParserLimits};

fn with_limits(limits: ParserLimits) -> CompileOptions {
    CompileOptions {
        limits,
        ..CompileOptions::default()
    }
}

fn compile_wat(wat_source: &str, options: &CompileOptions) -> Result<String, Error> {
    let bytes = wat::parse_str(wat_source).expect("valid WAT syntax");
    compile(&bytes, options)
}

#[test]
fn test_function_count_limit() {
    let options = with_limits(ParserLimits {
        max_function_count: 2,
        ..ParserLimits::default()
    });
    let wat = "(module (func) (func) (func))";
    let err = compile_wat(wat, &options).unwrap_err();
    assert_eq!(err.kind(), "parse");
    assert!(err.to_string().contains("exceeds limit 2"), "{}", err);

    let ok = "(module (func) (func))";
    assert!(compile_wat(ok, &options).is_ok());
}

#[test]
fn test_nesting_depth_limit() {
    let nested = |depth: usize| {
        format!(
            "(module (func {} {}))",
            "block ".repeat(depth),
            "end ".repeat(depth)
        )
    };
    let strict = with_limits(ParserLimits::strict());
    let max = ParserLimits::strict().max_nesting_depth;

    // The function body itself is one level.
    assert!(compile_wat(&nested(max - 1), &strict).is_ok());

    let err = compile_wat(&nested(max + 1), &strict).unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(err.to_string().contains("nesting depth"), "{}", err);

    // Default limits accept the same module.
    assert!(compile_wat(&nested(max + 1), &CompileOptions::default()).is_ok());
}

#[test]
fn test_local_count_limit() {
    let options = with_limits(ParserLimits {
        max_local_count: 4,
        ..ParserLimits::default()
    });
    let err = compile_wat("(module (func (local i32 i32 i64 i64 f32)))", &options).unwrap_err();
    assert_eq!(err.kind(), "parse");
    assert!(compile_wat("(module (func (local i32 i32 i64 i64)))", &options).is_ok());
}

#[test]
fn test_data_segment_size_limit() {
    let options = with_limits(ParserLimits {
        max_data_segment_size: 3,
        ..ParserLimits::default()
    });
    let err = compile_wat(r#"(module (memory 1) (data (i32.const 0) "abcd"))"#, &options)
        .unwrap_err();
    assert_eq!(err.kind(), "parse");
    assert!(compile_wat(r#"(module (memory 1) (data (i32.const 0) "abc"))"#, &options).is_ok());
}

#[test]
fn test_export_name_length_limit() {
    let options = with_limits(ParserLimits {
        max_name_length: 8,
        ..ParserLimits::default()
    });
    let err = compile_wat(r#"(module (func (export "much_too_long")))"#, &options).unwrap_err();
    assert_eq!(err.kind(), "parse");
}
