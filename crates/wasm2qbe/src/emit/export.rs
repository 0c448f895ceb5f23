//! Forwarding thunks.
//!
//! A function gets one symbol; each further export name (or any export name
//! of an imported function) becomes a thunk that calls it.

use super::EmitContext;
use crate::error::CompileError;
use crate::types::lower_signature;

/// A thunk exported as `symbol` that forwards to function `func`.
pub fn emit_thunk(ctx: &EmitContext<'_>, symbol: &str, func: u32) -> Result<String, CompileError> {
    let ft = ctx.module.func_type(func).ok_or_else(|| CompileError {
        func_idx: func,
        instr_offset: 0,
        func_name: ctx.module.func_name(func),
        message: "exported function has no type".to_string(),
    })?;
    let sig = lower_signature(ft);

    let mut params: Vec<String> = sig
        .params
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} %p{}", c, i))
        .collect();
    params.extend((0..sig.out_pointers).map(|k| format!("l %out{}", k)));
    let args = params.join(", ");
    let call = format!("call ${}({})", ctx.symbols.funcs[func as usize], args);

    let mut code = String::new();
    code.push_str(&format!(
        "export function {}${}({}) {{\n@start\n",
        sig.ret.map(|c| format!("{} ", c)).unwrap_or_default(),
        symbol,
        args
    ));
    match sig.ret {
        Some(class) => {
            code.push_str(&format!("\t%r ={} {}\n", class, call));
            code.push_str("\tret %r\n");
        }
        None => {
            code.push_str(&format!("\t{}\n", call));
            code.push_str("\tret\n");
        }
    }
    code.push_str("}\n");
    Ok(code)
}
