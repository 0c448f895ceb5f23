//! Code emission: QBE IL text from IR.
//!
//! # Overview
//!
//! ```text
//!   Module + IR functions + module initialiser
//!                   │
//!                   ▼
//!          ModuleSymbols::new()        one SymbolTable per module:
//!                   │                  imports, exports, internals,
//!                   │                  segments, descriptors
//!                   ▼
//!          data::emit_data()           globals, data/elem segments,
//!                   │                  function-reference descriptors
//!                   ▼
//!          function::emit_function()   per function (rayon when parallel)
//!                   │
//!                   ▼
//!          export::emit_thunk()        extra export names
//!                   │
//!                   ▼
//!               QBE IL text
//! ```
//!
//! # Sub-modules
//!
//! - **`mangle`**: escaping, export prefixing, shortening, [`mangle::SymbolTable`]
//! - **`data`**: data definitions
//! - **`function`**: signatures, prologue, blocks and phis
//! - **`instruction`**: per-instruction lowering, bounds checks, calls
//! - **`export`**: forwarding thunks for functions exported more than once

pub mod data;
pub mod export;
pub mod function;
pub mod instruction;
pub mod mangle;

use crate::decoder::{ElementItems, ExternalKind, ImportKind, Module};
use crate::error::CompileError;
use crate::ir::{static_init, IrFunction, IrInstr, StaticInit};
use crate::CompileOptions;
use mangle::{import_symbol, internal_func_name, mangle_export, SymbolTable};
use rayon::prelude::*;
use std::collections::BTreeMap;
use wasm2qbe_abi::MODULE_INIT;

/// Everything the emitters share about the module being compiled.
pub struct EmitContext<'a> {
    pub module: &'a Module,
    pub symbols: &'a ModuleSymbols,
    pub bounds_checks: bool,
}

/// Symbols of every entity in one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleSymbols {
    /// Code symbol per function index, imports first.
    pub funcs: Vec<String>,
    /// Whether the function's own definition carries an export name.
    pub exported_funcs: Vec<bool>,
    /// Export names served by forwarding thunks, with their function.
    pub thunks: Vec<(String, u32)>,
    /// Data symbol per global index, imports first.
    pub globals: Vec<String>,
    pub exported_globals: Vec<bool>,
    pub data: Vec<String>,
    pub elems: Vec<String>,
    /// Descriptor symbols of the functions whose address is taken.
    pub descriptors: BTreeMap<u32, String>,
}

impl ModuleSymbols {
    /// Name everything in `module`. Imports are claimed first because their
    /// names are fixed by the linker, then exports in declaration order,
    /// then internal names.
    pub fn new(module: &Module, functions: &[IrFunction], init: &IrFunction) -> Self {
        let mut table = SymbolTable::new();
        let num_funcs = module.num_funcs() as usize;
        let num_globals = module.num_globals() as usize;
        let mut funcs: Vec<Option<String>> = vec![None; num_funcs];
        let mut globals: Vec<Option<String>> = vec![None; num_globals];
        let mut exported_funcs = vec![false; num_funcs];
        let mut exported_globals = vec![false; num_globals];
        let mut thunks = Vec::new();

        let (mut func_idx, mut global_idx) = (0, 0);
        for import in &module.imports {
            match import.kind {
                ImportKind::Func(_) => {
                    let sym = import_symbol(&import.module, &import.name);
                    table.claim(&sym);
                    funcs[func_idx] = Some(sym);
                    func_idx += 1;
                }
                ImportKind::Global(_) => {
                    let sym = import_symbol(&import.module, &import.name);
                    table.claim(&sym);
                    globals[global_idx] = Some(sym);
                    global_idx += 1;
                }
                _ => {}
            }
        }

        for export in &module.exports {
            let idx = export.index as usize;
            match export.kind {
                ExternalKind::Func if idx < num_funcs => {
                    let sym = table.intern(&mangle_export(&export.name));
                    if funcs[idx].is_none() {
                        funcs[idx] = Some(sym);
                        exported_funcs[idx] = true;
                    } else {
                        thunks.push((sym, export.index));
                    }
                }
                ExternalKind::Global if idx < num_globals => {
                    if globals[idx].is_none() {
                        globals[idx] = Some(table.intern(&mangle_export(&export.name)));
                        exported_globals[idx] = true;
                    } else {
                        log::warn!(
                            "global {} is already named; export {:?} is not emitted",
                            idx,
                            export.name
                        );
                    }
                }
                _ => log::debug!(
                    "export {:?} ({:?}) is provided by the runtime",
                    export.name,
                    export.kind
                ),
            }
        }

        let funcs = funcs
            .into_iter()
            .enumerate()
            .map(|(i, sym)| {
                sym.unwrap_or_else(|| {
                    let name = module.func_names.get(&(i as u32)).map(String::as_str);
                    table.intern(&internal_func_name(i as u32, name))
                })
            })
            .collect();
        let globals = globals
            .into_iter()
            .enumerate()
            .map(|(i, sym)| sym.unwrap_or_else(|| table.intern(&format!("__wasm_global_{}", i))))
            .collect();
        let data = (0..module.data.len())
            .map(|i| table.intern(&format!("__wasm_data_{}", i)))
            .collect();
        let elems = (0..module.elements.len())
            .map(|i| table.intern(&format!("__wasm_elem_{}", i)))
            .collect();
        let descriptors = referenced_functions(module, functions, init)
            .into_iter()
            .filter(|f| (*f as usize) < num_funcs)
            .map(|f| (f, table.intern(&format!("__wasm_funcref_{}", f))))
            .collect();

        Self {
            funcs,
            exported_funcs,
            thunks,
            globals,
            exported_globals,
            data,
            elems,
            descriptors,
        }
    }
}

/// Functions whose descriptor address is needed: `ref.func` targets and
/// function references in globals and element segments.
fn referenced_functions(module: &Module, functions: &[IrFunction], init: &IrFunction) -> Vec<u32> {
    let mut refs = Vec::new();
    for func in functions.iter().chain(std::iter::once(init)) {
        for block in &func.blocks {
            for instr in &block.instructions {
                if let IrInstr::RefFunc { func, .. } = instr {
                    refs.push(*func);
                }
            }
        }
    }
    for global in &module.globals {
        if let Some(StaticInit::Func(f)) = static_init(&global.init, global.ty.content) {
            refs.push(f);
        }
    }
    for seg in &module.elements {
        match &seg.items {
            ElementItems::Functions(funcs) => refs.extend(funcs),
            ElementItems::Expressions(exprs) => {
                let ty = crate::decoder::ValType::Ref(seg.ty);
                refs.extend(exprs.iter().filter_map(|e| match static_init(e, ty) {
                    Some(StaticInit::Func(f)) => Some(f),
                    _ => None,
                }));
            }
        }
    }
    refs.sort_unstable();
    refs.dedup();
    refs
}

/// Emit the whole module: data definitions, every function, the module
/// initialiser and export thunks.
pub fn emit_module(
    module: &Module,
    functions: &[IrFunction],
    init: &IrFunction,
    options: &CompileOptions,
) -> Result<String, CompileError> {
    let symbols = ModuleSymbols::new(module, functions, init);
    let ctx = EmitContext {
        module,
        symbols: &symbols,
        bounds_checks: options.bounds_checks,
    };

    let mut out = String::new();
    out.push_str("# generated by wasm2qbe\n\n");
    out.push_str(&data::emit_data(&ctx)?);

    let emit_one = |func: &IrFunction| -> Result<String, CompileError> {
        let idx = func.func_idx.unwrap_or_default() as usize;
        function::emit_function(
            &ctx,
            func,
            &symbols.funcs[idx],
            symbols.exported_funcs[idx],
        )
    };
    let texts: Vec<String> = if options.parallel {
        functions.par_iter().map(emit_one).collect::<Result<_, _>>()?
    } else {
        functions.iter().map(emit_one).collect::<Result<_, _>>()?
    };
    for text in texts {
        out.push('\n');
        out.push_str(&text);
    }

    out.push('\n');
    out.push_str(&function::emit_function(&ctx, init, MODULE_INIT, true)?);

    for (sym, func) in &symbols.thunks {
        out.push('\n');
        out.push_str(&export::emit_thunk(&ctx, sym, *func)?);
    }
    Ok(out)
}
