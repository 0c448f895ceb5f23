//! wasm2qbe: ahead-of-time WebAssembly compiler targeting QBE.
//!
//! This crate provides the compilation pipeline that turns a WebAssembly
//! binary into QBE intermediate language text, which `qbe` lowers to
//! assembly for amd64, arm64 or rv64:
//!
//! ```text
//! bytes ─→ decoder ─→ validator ─→ ir::builder ─→ emit ─→ QBE IL
//! ```
//!
//! Compiled code relies on a runtime library for memories, tables, traps,
//! exceptions and GC objects; the symbol contract lives in `wasm2qbe-abi`.

pub mod decoder;
pub mod emit;
pub mod error;
pub mod ir;
pub mod stack;
pub mod types;
pub mod validator;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use decoder::ParserLimits;
pub use error::{CompileError, Error, ParseError, ValidationError, ValidationErrors};

/// Configuration options for compilation
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Decoding ceilings for untrusted input
    pub limits: ParserLimits,
    /// Turn self-recursive tail calls into jumps back to the function entry
    pub self_tail_call_loops: bool,
    /// Check every linear memory access against the current memory size
    pub bounds_checks: bool,
    /// Validate and lower functions on the rayon thread pool
    pub parallel: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            limits: ParserLimits::default(),
            self_tail_call_loops: true,
            bounds_checks: true,
            parallel: false,
        }
    }
}

/// Compile a WebAssembly module to QBE IL.
///
/// The module is decoded and fully validated before anything is lowered, so
/// an ill-formed module never reaches the translator. Output is identical
/// whether or not `options.parallel` is set.
///
/// # Example
/// ```no_run
/// use wasm2qbe::{compile, CompileOptions};
///
/// let wasm_bytes = std::fs::read("input.wasm").unwrap();
/// let qbe = compile(&wasm_bytes, &CompileOptions::default()).unwrap();
/// std::fs::write("output.ssa", qbe).unwrap();
/// ```
pub fn compile(wasm_bytes: &[u8], options: &CompileOptions) -> std::result::Result<String, Error> {
    let module = decoder::decode(wasm_bytes, &options.limits)?;
    log::info!(
        "decoded {} functions ({} imported), {} types",
        module.num_funcs(),
        module.num_imported_funcs(),
        module.types.len()
    );

    validator::validate_module(&module, &options.limits, options.parallel)?;
    log::info!("validated module");

    let functions = ir::build_functions(&module, options)?;
    let init = ir::build_module_init(&module, options)?;
    log::info!("lowered {} functions to IR", functions.len());

    let qbe = emit::emit_module(&module, &functions, &init, options)?;
    log::info!("emitted {} bytes of QBE IL", qbe.len());
    Ok(qbe)
}

/// Parse WebAssembly text format into a binary, for inputs ending in `.wat`.
pub fn wat_to_wasm(source: &str) -> Result<Vec<u8>> {
    wat::parse_str(source).context("failed to parse WebAssembly text")
}
