//! Data definitions: globals, segments and function-reference descriptors.
//!
//! Constant initialisers are written straight into the data; anything else
//! starts zeroed and is filled in by the module initialiser. Float values
//! are written as their integer bit patterns.

use super::EmitContext;
use crate::decoder::{ElementItems, ValType};
use crate::error::CompileError;
use crate::ir::{static_init, IrValue, StaticInit};
use crate::types::slot_size;
use wasm2qbe_abi::{FIELD_SIZE, V128_ALIGN};

/// Every data definition of the module.
pub fn emit_data(ctx: &EmitContext<'_>) -> Result<String, CompileError> {
    let module = ctx.module;
    let symbols = ctx.symbols;
    let mut out = String::new();

    let first_global = module.num_imported_globals() as usize;
    for (i, global) in module.globals.iter().enumerate() {
        let idx = first_global + i;
        let ty = global.ty.content;
        let item = match static_init(&global.init, ty) {
            Some(init) => static_item(ctx, init)?,
            None => format!("z {}", slot_size(ty)),
        };
        let align = if ty == ValType::V128 { V128_ALIGN } else { 8 };
        out.push_str(&format!(
            "{}data ${} = align {} {{ {} }}\n",
            if symbols.exported_globals[idx] { "export " } else { "" },
            symbols.globals[idx],
            align,
            item
        ));
    }

    for (seg, sym) in module.data.iter().zip(&symbols.data) {
        out.push_str(&format!("data ${} = {{ {} }}\n", sym, bytes_item(&seg.data)));
    }

    for (i, (seg, sym)) in module.elements.iter().zip(&symbols.elems).enumerate() {
        let items: Vec<String> = match &seg.items {
            ElementItems::Functions(funcs) => funcs
                .iter()
                .map(|f| static_item(ctx, StaticInit::Func(*f)))
                .collect::<Result<_, _>>()?,
            ElementItems::Expressions(exprs) => exprs
                .iter()
                .map(|e| match static_init(e, ValType::Ref(seg.ty)) {
                    Some(init) => static_item(ctx, init),
                    // Filled in by the module initialiser.
                    None => Ok("l 0".to_string()),
                })
                .collect::<Result<_, _>>()?,
        };
        let body = if items.is_empty() {
            format!("z {}", FIELD_SIZE)
        } else {
            items.join(", ")
        };
        log::trace!("element segment {}: {} items", i, seg.items.len());
        out.push_str(&format!("data ${} = align 8 {{ {} }}\n", sym, body));
    }

    for (func, sym) in &symbols.descriptors {
        let type_idx = module.func_type_idx(*func).ok_or_else(|| CompileError {
            func_idx: *func,
            instr_offset: 0,
            func_name: module.func_name(*func),
            message: "function has no type".to_string(),
        })?;
        out.push_str(&format!(
            "data ${} = align 8 {{ l ${}, l {} }}\n",
            sym,
            symbols.funcs[*func as usize],
            module.canonical_type_idx(type_idx)
        ));
    }
    Ok(out)
}

fn static_item(ctx: &EmitContext<'_>, init: StaticInit) -> Result<String, CompileError> {
    Ok(match init {
        StaticInit::Value(IrValue::I32(v)) => format!("w {}", v),
        StaticInit::Value(IrValue::I64(v)) => format!("l {}", v),
        StaticInit::Value(IrValue::F32(bits)) => format!("w {}", bits as i32),
        StaticInit::Value(IrValue::F64(bits)) => format!("l {}", bits as i64),
        StaticInit::Func(f) => {
            let sym = ctx.symbols.descriptors.get(&f).ok_or_else(|| CompileError {
                func_idx: f,
                instr_offset: 0,
                func_name: ctx.module.func_name(f),
                message: "referenced function has no descriptor".to_string(),
            })?;
            format!("l ${}", sym)
        }
    })
}

/// Segment payload as a byte list. Empty segments still get one byte so the
/// symbol has an address.
fn bytes_item(data: &[u8]) -> String {
    if data.is_empty() {
        return "z 1".to_string();
    }
    let bytes: Vec<String> = data.iter().map(|b| b.to_string()).collect();
    format!("b {}", bytes.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_item() {
        assert_eq!(bytes_item(b"hi\n"), "b 104 105 10");
        assert_eq!(bytes_item(&[]), "z 1");
    }
}
