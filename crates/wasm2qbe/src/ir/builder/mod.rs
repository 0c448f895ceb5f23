//! # IR Builder
//!
//! Translates a validated [`Module`] into one [`IrFunction`] per defined
//! function plus the module initialiser.
//!
//! ## Pipeline overview
//!
//! ```text
//! Module (validated)
//!      │
//!      ├─[translate]──────────────────────────────────────────┐
//!      │  build_functions()                                   │
//!      │    └── for each defined function (rayon when         │
//!      │        parallel):                                    │
//!      │          IrBuilder::translate_function()             │
//!      │            └── for each Operator:                    │
//!      │                  translate_operator()                │
//!      │                    ├── control    block/loop/if/br…  │
//!      │                    ├── exceptions try/catch/throw…   │
//!      │                    ├── calls      call/call_indirect │
//!      │                    ├── numeric    div/trunc/clz…     │
//!      │                    ├── memory     load/store/table…  │
//!      │                    ├── reference  ref.*/struct/array │
//!      │                    └── simd       v128 fallbacks     │
//!      │          ─► Vec<IrFunction>                          │
//!      │                                                      │
//!      └─[init]───────────────────────────────────────────────┤
//!         build_module_init()                                 │
//!           memories, tables, globals, segments, start        │
//!          ─► IrFunction                                      │
//!                                                             ▼
//!                                                        emit (QBE IL)
//! ```
//!
//! ## Architecture
//!
//! | Module        | Responsibility                                              |
//! |---------------|-------------------------------------------------------------|
//! | [`core`]      | `IrBuilder` state, SSA allocation, control stack, branches  |
//! | `translate`   | Wasm operator → builder method dispatch, dead code skipping |
//! | `control`     | block, loop, if/else, end, br, br_if, br_table, return      |
//! | `exceptions`  | try, catch, catch_all, throw, rethrow, delegate             |
//! | `calls`       | direct, indirect and reference calls, tail calls            |
//! | `numeric`     | numeric operators and their trap checks                     |
//! | `memory`      | loads, stores, bulk memory, tables                          |
//! | `reference`   | reference types, GC structs/arrays, casts, i31              |
//! | `simd`        | `v128` operations as fallback calls                         |
//! | [`init`]      | the module initialiser and static initialiser detection     |
//!
//! The `IrBuilder` is a stack machine interpreter that:
//! - Simulates the WebAssembly evaluation stack using SSA variables (`VarId`)
//! - Maintains a control-flow stack tracking nested `block`/`loop`/`if`/`try` frames
//! - Allocates merge blocks lazily, with one phi per result
//! - Routes every edge into a block with phis through a `Jump`
//! - Pops exception handlers on every normal exit from a `try` body

mod calls;
pub mod core;
mod control;
mod exceptions;
pub mod init;
mod memory;
mod numeric;
mod reference;
mod simd;
mod translate;

pub use self::core::IrBuilder;
pub use init::{static_init, StaticInit};

use super::types::IrFunction;
use crate::decoder::Module;
use crate::error::CompileError;
use crate::CompileOptions;
use rayon::prelude::*;

/// Translate every defined function of `module`, in function index order.
///
/// The module must have passed validation.
pub fn build_functions(
    module: &Module,
    options: &CompileOptions,
) -> Result<Vec<IrFunction>, CompileError> {
    let first = module.num_imported_funcs();
    let last = first + module.code.len() as u32;
    if options.parallel {
        (first..last)
            .into_par_iter()
            .map(|idx| IrBuilder::new(module, options).translate_function(idx))
            .collect()
    } else {
        let mut builder = IrBuilder::new(module, options);
        (first..last)
            .map(|idx| builder.translate_function(idx))
            .collect()
    }
}

/// Build the module initialiser.
pub fn build_module_init(
    module: &Module,
    options: &CompileOptions,
) -> Result<IrFunction, CompileError> {
    IrBuilder::new(module, options).translate_module_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{self, ParserLimits, ValType};
    use crate::ir::types::*;
    use wasm2qbe_abi::{RuntimeFn, TrapKind};

    fn build(wat: &str) -> Vec<IrFunction> {
        build_with(wat, &CompileOptions::default())
    }

    fn build_with(wat: &str, options: &CompileOptions) -> Vec<IrFunction> {
        let bytes = wat::parse_str(wat).unwrap();
        let module = decoder::decode(&bytes, &ParserLimits::default()).unwrap();
        crate::validator::validate(&module, &ParserLimits::default()).unwrap();
        build_functions(&module, options).unwrap()
    }

    fn instrs(func: &IrFunction) -> impl Iterator<Item = &IrInstr> {
        func.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Every phi has exactly one operand per predecessor edge, and every
    /// predecessor of a block with phis ends in a jump.
    fn assert_phis_well_formed(func: &IrFunction) {
        let counts = func.predecessor_counts();
        for block in &func.blocks {
            if block.phis.is_empty() {
                continue;
            }
            for phi in &block.phis {
                assert_eq!(
                    phi.incoming.len(),
                    counts[block.id.0 as usize],
                    "phi {} in {}",
                    phi.dest,
                    block.id
                );
                for (pred, _) in &phi.incoming {
                    assert_eq!(
                        func.block(*pred).terminator,
                        IrTerminator::Jump { target: block.id },
                        "edge {} -> {}",
                        pred,
                        block.id
                    );
                }
            }
        }
    }

    #[test]
    fn test_add_function() {
        let funcs = build(
            r#"(module (func (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add))"#,
        );
        assert_eq!(funcs.len(), 1);
        let f = &funcs[0];
        assert_eq!(f.blocks.len(), 1);
        assert!(matches!(
            f.blocks[0].instructions[2],
            IrInstr::BinOp {
                op: BinOp::I32Add,
                ..
            }
        ));
        match &f.blocks[0].terminator {
            IrTerminator::Return { values } => assert_eq!(values.len(), 1),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_merges_with_phi() {
        let funcs = build(
            r#"(module (func (param i32) (result i32)
                local.get 0
                if (result i32) i32.const 1 else i32.const 2 end))"#,
        );
        let f = &funcs[0];
        let merges: Vec<_> = f.blocks.iter().filter(|b| !b.phis.is_empty()).collect();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].phis.len(), 1);
        assert_eq!(merges[0].phis[0].incoming.len(), 2);
        assert_phis_well_formed(f);
    }

    #[test]
    fn test_if_without_else_passes_params() {
        let funcs = build(
            r#"(module
                (type $t (func (param i32) (result i32)))
                (func (param i32 i32) (result i32)
                  local.get 0
                  local.get 1
                  if (type $t) i32.const 1 i32.add end))"#,
        );
        assert_phis_well_formed(&funcs[0]);
    }

    #[test]
    fn test_loop_header_phis() {
        let funcs = build(
            r#"(module
                (type $t (func (param i32) (result i32)))
                (func (param i32) (result i32)
                  local.get 0
                  loop (type $t)
                    i32.const 1
                    i32.sub
                    local.tee 0
                    local.get 0
                    br_if 0
                  end))"#,
        );
        let f = &funcs[0];
        let header = f.blocks.iter().find(|b| !b.phis.is_empty()).unwrap();
        assert_eq!(header.phis[0].incoming.len(), 2);
        assert_phis_well_formed(f);
    }

    #[test]
    fn test_br_table_uses_edge_blocks_for_phis() {
        let funcs = build(
            r#"(module (func (param i32) (result i32)
                block (result i32)
                  block (result i32)
                    i32.const 7
                    local.get 0
                    br_table 0 1 0
                  end
                  i32.const 1
                  i32.add
                end))"#,
        );
        let f = &funcs[0];
        assert_phis_well_formed(f);
        let table = f
            .blocks
            .iter()
            .find_map(|b| match &b.terminator {
                IrTerminator::BranchTable { targets, default, .. } => {
                    Some((targets.clone(), *default))
                }
                _ => None,
            })
            .unwrap();
        // depth 0 appears twice but shares one edge block
        assert_eq!(table.0.len(), 2);
        assert_eq!(table.0[0], table.1);
        assert_ne!(table.0[0], table.0[1]);
    }

    #[test]
    fn test_dead_code_after_br_is_skipped() {
        let funcs = build(
            r#"(module (func (result i32)
                block (result i32)
                  i32.const 1
                  br 0
                  i32.const 2
                  drop
                  block
                    unreachable
                  end
                end))"#,
        );
        let f = &funcs[0];
        let consts = instrs(f)
            .filter(|i| matches!(i, IrInstr::Const { .. }))
            .count();
        assert_eq!(consts, 1);
        assert_phis_well_formed(f);
    }

    #[test]
    fn test_division_traps() {
        let funcs = build(
            r#"(module (func (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.div_s))"#,
        );
        let traps: Vec<TrapKind> = instrs(&funcs[0])
            .filter_map(|i| match i {
                IrInstr::TrapIf { trap, .. } => Some(*trap),
                _ => None,
            })
            .collect();
        assert_eq!(traps, vec![TrapKind::DivByZero, TrapKind::IntegerOverflow]);
    }

    #[test]
    fn test_rem_s_guards_minus_one() {
        let funcs = build(
            r#"(module (func (param i64 i64) (result i64)
                local.get 0 local.get 1 i64.rem_s))"#,
        );
        let f = &funcs[0];
        assert!(instrs(f).any(|i| matches!(i, IrInstr::Select { .. })));
        assert!(!instrs(f).any(|i| matches!(
            i,
            IrInstr::TrapIf {
                trap: TrapKind::IntegerOverflow,
                ..
            }
        )));
    }

    #[test]
    fn test_trapping_truncation_checks() {
        let funcs = build(
            r#"(module (func (param f64) (result i32)
                local.get 0 i32.trunc_f64_s))"#,
        );
        let traps: Vec<TrapKind> = instrs(&funcs[0])
            .filter_map(|i| match i {
                IrInstr::TrapIf { trap, .. } => Some(*trap),
                _ => None,
            })
            .collect();
        assert_eq!(
            traps,
            vec![TrapKind::InvalidConversion, TrapKind::IntegerOverflow]
        );
    }

    #[test]
    fn test_rotl_is_runtime_call() {
        let funcs = build(
            r#"(module (func (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.rotl))"#,
        );
        assert!(instrs(&funcs[0]).any(|i| matches!(
            i,
            IrInstr::CallRuntime {
                func: RuntimeFn::I32Rotl,
                ..
            }
        )));
    }

    #[test]
    fn test_self_tail_call_becomes_jump() {
        let wat = r#"(module (func $f (param i32) (result i32)
            (local i64)
            local.get 0
            i32.eqz
            if (result i32)
              i32.const 0
            else
              local.get 0
              i32.const 1
              i32.sub
              return_call $f
            end))"#;
        let funcs = build(wat);
        let f = &funcs[0];
        assert!(f
            .blocks
            .iter()
            .any(|b| b.terminator == IrTerminator::Jump { target: BlockId(0) }));
        assert!(!instrs(f).any(|i| matches!(i, IrInstr::Call { .. })));

        let options = CompileOptions {
            self_tail_call_loops: false,
            ..CompileOptions::default()
        };
        let funcs = build_with(wat, &options);
        assert!(instrs(&funcs[0]).any(|i| matches!(i, IrInstr::Call { .. })));
    }

    #[test]
    fn test_call_indirect_checks() {
        let funcs = build(
            r#"(module
                (type $t (func (result i32)))
                (table 1 funcref)
                (func (param i32) (result i32)
                  local.get 0
                  call_indirect (type $t)))"#,
        );
        let f = &funcs[0];
        let traps: Vec<TrapKind> = instrs(f)
            .filter_map(|i| match i {
                IrInstr::TrapIf { trap, .. } => Some(*trap),
                _ => None,
            })
            .collect();
        assert_eq!(traps, vec![TrapKind::NullReference, TrapKind::CastFailure]);
        assert!(instrs(f).any(|i| matches!(i, IrInstr::CallRef { .. })));
    }

    #[test]
    fn test_try_catch_structure() {
        let funcs = build(
            r#"(module
                (tag $e (param i32))
                (func (result i32)
                  try (result i32)
                    i32.const 1
                    throw $e
                  catch $e
                  catch_all
                    i32.const 0
                  end))"#,
        );
        let f = &funcs[0];
        let runtime: Vec<RuntimeFn> = instrs(f)
            .filter_map(|i| match i {
                IrInstr::CallRuntime { func, .. } => Some(*func),
                _ => None,
            })
            .collect();
        assert!(runtime.contains(&RuntimeFn::PushExceptionHandler));
        assert!(runtime.contains(&RuntimeFn::Throw));
        assert!(runtime.contains(&RuntimeFn::GetException));
        assert!(runtime.contains(&RuntimeFn::ExceptionPayload));
        assert_phis_well_formed(f);
    }

    #[test]
    fn test_branch_out_of_try_pops_handler() {
        let funcs = build(
            r#"(module (func (param i32)
                block
                  try
                    local.get 0
                    br_if 1
                  catch_all
                  end
                end))"#,
        );
        let pops = instrs(&funcs[0])
            .filter(|i| {
                matches!(
                    i,
                    IrInstr::CallRuntime {
                        func: RuntimeFn::PopExceptionHandler,
                        ..
                    }
                )
            })
            .count();
        // the br_if edge and the fall-through each pop once
        assert_eq!(pops, 2);
    }

    #[test]
    fn test_delegate_pops_intervening_handlers() {
        let funcs = build(
            r#"(module
                (tag $e)
                (func
                  try
                    try
                      try
                        throw $e
                      delegate 1
                    catch_all
                    end
                  catch_all
                  end))"#,
        );
        let f = &funcs[0];
        let blocks: Vec<&IrBlock> = f
            .blocks
            .iter()
            .filter(|b| {
                b.instructions.iter().any(|i| {
                    matches!(
                        i,
                        IrInstr::CallRuntime {
                            func: RuntimeFn::Rethrow,
                            ..
                        }
                    )
                })
            })
            .collect();
        assert_eq!(blocks.len(), 1);
        let runtime: Vec<RuntimeFn> = blocks[0]
            .instructions
            .iter()
            .filter_map(|i| match i {
                IrInstr::CallRuntime { func, .. } => Some(*func),
                _ => None,
            })
            .collect();
        assert_eq!(
            runtime,
            vec![
                RuntimeFn::GetException,
                RuntimeFn::PopExceptionHandler,
                RuntimeFn::Rethrow
            ]
        );
    }

    #[test]
    fn test_rethrow_reuses_caught_exception() {
        let funcs = build(
            r#"(module
                (tag $e)
                (func
                  try
                    throw $e
                  catch $e
                    rethrow 0
                  end))"#,
        );
        let f = &funcs[0];
        let caught: Vec<VarId> = instrs(f)
            .filter_map(|i| match i {
                IrInstr::CallRuntime {
                    dest: Some(dest),
                    func: RuntimeFn::GetException,
                    ..
                } => Some(*dest),
                _ => None,
            })
            .collect();
        assert_eq!(caught.len(), 1);
        let rethrown: Vec<&Vec<VarId>> = instrs(f)
            .filter_map(|i| match i {
                IrInstr::CallRuntime {
                    func: RuntimeFn::Rethrow,
                    args,
                    ..
                } => Some(args),
                _ => None,
            })
            .collect();
        // the explicit rethrow and the unmatched-tag fallback
        assert_eq!(rethrown.len(), 2);
        for args in rethrown {
            assert_eq!(args, &vec![caught[0]]);
        }
    }

    #[test]
    fn test_i31_is_tagged_integer() {
        let funcs = build(
            r#"(module
                (func (param i32) (result (ref i31))
                  local.get 0
                  ref.i31)
                (func (param (ref null i31)) (result i32)
                  local.get 0
                  i31.get_s)
                (func (param (ref null i31)) (result i32)
                  local.get 0
                  i31.get_u))"#,
        );
        let ops: Vec<BinOp> = instrs(&funcs[0])
            .filter_map(|i| match i {
                IrInstr::BinOp { op, .. } => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec![BinOp::I32Shl, BinOp::I32Or]);
        let ones = instrs(&funcs[0])
            .filter(|i| {
                matches!(
                    i,
                    IrInstr::Const {
                        value: IrValue::I32(1),
                        ..
                    }
                )
            })
            .count();
        assert_eq!(ones, 1);
        assert!(instrs(&funcs[0]).any(|i| matches!(
            i,
            IrInstr::UnOp {
                op: UnOp::I64ExtendI32U,
                ..
            }
        )));

        let shift = |f: &IrFunction| {
            instrs(f).find_map(|i| match i {
                IrInstr::BinOp {
                    op: op @ (BinOp::I32ShrS | BinOp::I32ShrU),
                    ..
                } => Some(*op),
                _ => None,
            })
        };
        assert_eq!(shift(&funcs[1]), Some(BinOp::I32ShrS));
        assert_eq!(shift(&funcs[2]), Some(BinOp::I32ShrU));
    }

    #[test]
    fn test_struct_fields_are_inline() {
        let funcs = build(
            r#"(module
                (type $p (struct (field i32) (field (mut i64))))
                (func (param i32 i64) (result i64)
                  local.get 0
                  local.get 1
                  struct.new $p
                  struct.get $p 1))"#,
        );
        let f = &funcs[0];
        assert!(instrs(f).any(|i| matches!(
            i,
            IrInstr::CallRuntime {
                func: RuntimeFn::StructNew,
                ..
            }
        )));
        let stores = instrs(f)
            .filter(|i| matches!(i, IrInstr::FieldStore { .. }))
            .count();
        assert_eq!(stores, 2);
        assert!(instrs(f).any(|i| matches!(i, IrInstr::FieldLoad { offset: 8, .. })));
        assert!(instrs(f).any(|i| matches!(
            i,
            IrInstr::TrapIf {
                trap: TrapKind::NullReference,
                ..
            }
        )));
    }

    #[test]
    fn test_array_access_is_bounds_checked() {
        let funcs = build(
            r#"(module
                (type $a (array (mut i32)))
                (func (param (ref null $a) i32) (result i32)
                  local.get 0
                  local.get 1
                  array.get $a))"#,
        );
        let traps: Vec<TrapKind> = instrs(&funcs[0])
            .filter_map(|i| match i {
                IrInstr::TrapIf { trap, .. } => Some(*trap),
                _ => None,
            })
            .collect();
        assert_eq!(traps, vec![TrapKind::NullReference, TrapKind::OutOfBounds]);
    }

    #[test]
    fn test_multi_value_call() {
        let funcs = build(
            r#"(module
                (func $pair (result i32 i64) i32.const 1 i64.const 2)
                (func (result i64) (local i64)
                  call $pair
                  local.set 0
                  drop
                  local.get 0))"#,
        );
        let call = instrs(&funcs[1])
            .find_map(|i| match i {
                IrInstr::Call { dests, .. } => Some(dests.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.len(), 2);
        assert_eq!(funcs[1].var_type(call[1]), ValType::I64);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let wat = r#"(module
            (func (param i32) (result i32) local.get 0 i32.const 1 i32.add)
            (func (param i64) (result i64) local.get 0 i64.const 3 i64.mul)
            (func (result f32) f32.const 1.5))"#;
        let seq = build_with(
            wat,
            &CompileOptions {
                parallel: false,
                ..CompileOptions::default()
            },
        );
        let par = build_with(
            wat,
            &CompileOptions {
                parallel: true,
                ..CompileOptions::default()
            },
        );
        assert_eq!(seq.len(), par.len());
        for (a, b) in seq.iter().zip(&par) {
            assert_eq!(a.func_idx, b.func_idx);
            assert_eq!(a.var_types, b.var_types);
            assert_eq!(a.blocks.len(), b.blocks.len());
        }
    }

    #[test]
    fn test_module_init_order() {
        let bytes = wat::parse_str(
            r#"(module
                (memory 1)
                (table 2 funcref)
                (global $g (mut i32) (i32.const 5))
                (global $h i32 (i32.add (i32.const 1) (i32.const 2)))
                (func $f)
                (elem (i32.const 0) $f)
                (data (i32.const 8) "hi")
                (start $f))"#,
        )
        .unwrap();
        let module = decoder::decode(&bytes, &ParserLimits::default()).unwrap();
        let init = build_module_init(&module, &CompileOptions::default()).unwrap();
        let order: Vec<&str> = init.blocks[0]
            .instructions
            .iter()
            .filter_map(|i| match i {
                IrInstr::CallRuntime { func, .. } => Some(func.symbol()),
                IrInstr::GlobalSet { .. } => Some("global.set"),
                IrInstr::Call { .. } => Some("start"),
                _ => None,
            })
            .collect();
        assert_eq!(
            order,
            vec![
                RuntimeFn::MemoryNew.symbol(),
                RuntimeFn::TableNew.symbol(),
                "global.set",
                RuntimeFn::TableInit.symbol(),
                RuntimeFn::ElemDrop.symbol(),
                RuntimeFn::MemoryInit.symbol(),
                RuntimeFn::DataDrop.symbol(),
                "start",
            ]
        );
    }
}
