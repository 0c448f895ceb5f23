//! Symbol naming.
//!
//! QBE identifiers are limited to `[A-Za-z0-9_]` here (anything else is
//! escaped as `_xHH`) and to [`MAX_SYMBOL_LEN`] bytes. A per-module
//! [`SymbolTable`] hands out names so that no two entities share a symbol,
//! and no entity takes a runtime symbol.

use fnv::{FnvHashSet, FnvHasher};
use heck::ToSnakeCase;
use std::hash::Hasher;
use wasm2qbe_abi::{
    RuntimeFn, TrapKind, EXPORT_PREFIX, MEMORY_BASE, MEMORY_SIZE, MODULE_INIT, RESERVED_PREFIX,
};

/// Longest symbol emitted. QBE rejects identifiers of 80 bytes or more.
pub const MAX_SYMBOL_LEN: usize = 64;

/// Escape every byte outside `[A-Za-z0-9_]`, and a leading digit.
pub fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, b) in name.bytes().enumerate() {
        match b {
            b'0'..=b'9' if i == 0 => {
                out.push('_');
                out.push(b as char);
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' => out.push(b as char),
            _ => out.push_str(&format!("_x{:02x}", b)),
        }
    }
    out
}

/// Linker name of an export.
///
/// Names get the `wasm_` prefix unless they already carry it (or the
/// reserved `__wasm_` prefix) or are `_start`. Applying this twice gives the
/// same result as applying it once.
pub fn mangle_export(name: &str) -> String {
    let escaped = escape(name);
    if escaped == "_start"
        || escaped.starts_with(EXPORT_PREFIX)
        || escaped.starts_with(RESERVED_PREFIX)
    {
        escaped
    } else {
        format!("{}{}", EXPORT_PREFIX, escaped)
    }
}

/// Linker name of an imported function or global.
///
/// WASI imports resolve to the runtime's `__wasi_<name>`; `env` imports keep
/// their bare name so they link against plain C functions; anything else is
/// `<module>_<name>`.
pub fn import_symbol(module: &str, name: &str) -> String {
    if let Some(sym) = wasm2qbe_abi::wasi_symbol(module, name) {
        return escape(&sym.to_string());
    }
    if module == "env" {
        escape(name)
    } else {
        escape(&format!("{}_{}", module, name))
    }
}

/// Internal symbol of defined function `idx`, with its debug name when it
/// has one.
pub fn internal_func_name(idx: u32, debug_name: Option<&str>) -> String {
    match debug_name {
        Some(name) => {
            let snake = escape(&name.to_snake_case());
            format!("{}f{}_{}", RESERVED_PREFIX, idx, snake.trim_start_matches('_'))
        }
        None => format!("{}f{}", RESERVED_PREFIX, idx),
    }
}

/// Shorten `sym` to [`MAX_SYMBOL_LEN`] by replacing its tail with the
/// FNV-1a hash of the whole name.
pub fn shorten(sym: &str) -> String {
    if sym.len() <= MAX_SYMBOL_LEN {
        return sym.to_string();
    }
    let mut hasher = FnvHasher::default();
    hasher.write(sym.as_bytes());
    let hash = format!("_{:016x}", hasher.finish());
    // Escaped symbols are ASCII, so any byte index is a char boundary.
    format!("{}{}", &sym[..MAX_SYMBOL_LEN - hash.len()], hash)
}

/// Symbols already handed out in one module.
#[derive(Debug)]
pub struct SymbolTable {
    used: FnvHashSet<String>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A table with every runtime symbol already taken.
    pub fn new() -> Self {
        let mut used = FnvHashSet::default();
        for f in RuntimeFn::ALL {
            used.insert(f.symbol().to_string());
        }
        for t in TrapKind::ALL {
            used.insert(t.symbol().to_string());
        }
        for s in [MEMORY_BASE, MEMORY_SIZE, MODULE_INIT] {
            used.insert(s.to_string());
        }
        Self { used }
    }

    pub fn contains(&self, sym: &str) -> bool {
        self.used.contains(sym)
    }

    /// Claim an exact name that must not change, such as an import.
    /// Several claims of the same name share it.
    pub fn claim(&mut self, sym: &str) {
        self.used.insert(sym.to_string());
    }

    /// Hand out a fresh symbol as close to `wanted` as possible: shortened
    /// if too long, then suffixed with `_<n>` until unused.
    pub fn intern(&mut self, wanted: &str) -> String {
        let base = shorten(wanted);
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let suffix = format!("_{}", n);
            let candidate = if base.len() + suffix.len() > MAX_SYMBOL_LEN {
                format!("{}{}", &base[..MAX_SYMBOL_LEN - suffix.len()], suffix)
            } else {
                format!("{}{}", base, suffix)
            };
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_prefix() {
        assert_eq!(mangle_export("main"), "wasm_main");
        assert_eq!(mangle_export("wasm_main"), "wasm_main");
        assert_eq!(mangle_export("__wasm_call_ctors"), "__wasm_call_ctors");
        assert_eq!(mangle_export("_start"), "_start");
    }

    #[test]
    fn test_mangle_is_idempotent() {
        for name in ["add", "a.b-c", "wasm_x", "_start", "1st", "héllo", "", "__wasm_f"] {
            let once = mangle_export(name);
            assert_eq!(mangle_export(&once), once, "{:?}", name);
        }
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a.b"), "a_x2eb");
        assert_eq!(escape("9lives"), "_9lives");
        assert_eq!(escape("ok_name"), "ok_name");
    }

    #[test]
    fn test_import_symbols() {
        assert_eq!(import_symbol("wasi_snapshot_preview1", "fd_write"), "__wasi_fd_write");
        assert_eq!(import_symbol("env", "puts"), "puts");
        assert_eq!(import_symbol("math", "sin"), "math_sin");
    }

    #[test]
    fn test_internal_names_use_snake_case() {
        assert_eq!(internal_func_name(3, Some("computeSum")), "__wasm_f3_compute_sum");
        assert_eq!(internal_func_name(7, None), "__wasm_f7");
    }

    #[test]
    fn test_long_names_are_shortened_deterministically() {
        let long = "x".repeat(200);
        let a = shorten(&long);
        assert_eq!(a.len(), MAX_SYMBOL_LEN);
        assert_eq!(a, shorten(&long));
        assert_ne!(a, shorten(&format!("{}y", long)));
    }

    #[test]
    fn test_table_is_injective() {
        let mut table = SymbolTable::new();
        let a = table.intern("wasm_f");
        let b = table.intern("wasm_f");
        let c = table.intern("wasm_f");
        assert_eq!(a, "wasm_f");
        assert_eq!(b, "wasm_f_1");
        assert_eq!(c, "wasm_f_2");
    }

    #[test]
    fn test_runtime_symbols_are_reserved() {
        let mut table = SymbolTable::new();
        assert_eq!(table.intern("__wasm_memory"), "__wasm_memory_1");
        assert!(table.contains("__wasm_trap_unreachable"));
    }

    #[test]
    fn test_shortened_collisions_stay_in_bounds() {
        let mut table = SymbolTable::new();
        let long = "y".repeat(100);
        let a = table.intern(&long);
        let b = table.intern(&long);
        assert_ne!(a, b);
        assert!(b.len() <= MAX_SYMBOL_LEN);
    }
}
