//! `wasm2qbe-abi`: calling contract between wasm2qbe output and its runtime.
//!
//! The compiler never implements runtime behaviour itself. Everything that
//! compiled code needs from the outside world is a symbol listed here:
//! - `RuntimeFn` for memory, table, exception, GC and numeric helpers
//! - `TrapKind` for the non-returning trap handlers
//! - the layout of function-reference descriptors, exception payloads and
//!   GC objects
//! - WASI Preview 1 import naming
//!
//! This crate is `#![no_std]` so the runtime side can share the constants.

#![no_std]

/// WebAssembly page size: 64 KiB.
pub const PAGE_SIZE: u64 = 65536;

/// Prefix reserved for runtime and compiler-generated symbols.
pub const RESERVED_PREFIX: &str = "__wasm_";

/// Prefix given to mangled export names.
pub const EXPORT_PREFIX: &str = "wasm_";

/// Data symbol holding the base address of memory 0.
pub const MEMORY_BASE: &str = "__wasm_memory";

/// Data symbol holding the current byte size of memory 0 (an `l`).
pub const MEMORY_SIZE: &str = "__wasm_memory_size";

/// Generated function that initialises memories, tables, globals and
/// segments, then runs the start function.
pub const MODULE_INIT: &str = "__wasm_module_init";

mod runtime;
pub use runtime::{Class, RuntimeFn, Signature};

mod trap;
pub use trap::TrapKind;

mod layout;
pub use layout::{
    ARRAY_HEADER_SIZE, EXCEPTION_SLOT_SIZE, FIELD_SIZE, FIELD_SIZE_V128,
    FUNCREF_CODE_OFFSET, FUNCREF_TYPE_OFFSET, V128_ALIGN, V128_SIZE,
};

mod wasi;
pub use wasi::{is_wasi_module, wasi_symbol, WasiSymbol, WASI_PREVIEW1_FUNCTIONS};

/// Symbol of the scalar fallback for a SIMD operation, e.g.
/// `simd_symbol("i32x4.add")` is `__wasm_simd_i32x4_add`.
pub fn simd_symbol(name: &str) -> SimdSymbol<'_> {
    SimdSymbol(name)
}

/// Display adapter produced by [`simd_symbol`]; avoids allocating in `no_std`.
#[derive(Debug, Clone, Copy)]
pub struct SimdSymbol<'a>(&'a str);

impl core::fmt::Display for SimdSymbol<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("__wasm_simd_")?;
        for c in self.0.chars() {
            let c = if c == '.' { '_' } else { c };
            core::fmt::Write::write_char(f, c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::string::ToString;

    #[test]
    fn simd_symbol_replaces_dots() {
        assert_eq!(simd_symbol("i32x4.add").to_string(), "__wasm_simd_i32x4_add");
        assert_eq!(
            simd_symbol("v128.load8x8_s").to_string(),
            "__wasm_simd_v128_load8x8_s"
        );
    }

    #[test]
    fn reserved_prefixes_nest() {
        assert!(MEMORY_BASE.starts_with(RESERVED_PREFIX));
        assert!(MODULE_INIT.starts_with(RESERVED_PREFIX));
        assert!(!EXPORT_PREFIX.starts_with(RESERVED_PREFIX));
    }
}
