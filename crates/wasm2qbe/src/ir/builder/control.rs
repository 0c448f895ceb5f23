//! Structured control flow: block, loop, if/else, end, br, br_if, br_table
//! and return.

use super::core::{BranchTarget, ControlKind, IrBuilder};
use crate::decoder::BlockType;
use crate::ir::types::*;
use anyhow::{bail, Context, Result};

impl<'m> IrBuilder<'m> {
    pub(super) fn translate_block(&mut self, ty: BlockType) -> Result<()> {
        let (params, results) = self.block_signature(ty)?;
        self.push_control(ControlKind::Block, params, results)?;
        Ok(())
    }

    /// The loop header gets one phi per parameter; the entry edge and every
    /// back edge feed them.
    pub(super) fn translate_loop(&mut self, ty: BlockType) -> Result<()> {
        let (params, results) = self.block_signature(ty)?;
        let entry_values = self.pop_n(params.len())?;
        let from = self.current_block;
        let header = self.new_block();
        let phis: Vec<VarId> = params.iter().map(|ty| self.new_var(*ty)).collect();
        self.blocks[header.0 as usize].phis = phis
            .iter()
            .zip(&entry_values)
            .map(|(dest, value)| IrPhi {
                dest: *dest,
                incoming: vec![(from, *value)],
            })
            .collect();
        self.terminate(IrTerminator::Jump { target: header });
        self.switch_to(header);
        self.push_all(&phis);

        let frame = self.push_control(ControlKind::Loop, params, results)?;
        frame.header = Some(header);
        frame.header_phis = phis;
        Ok(())
    }

    pub(super) fn translate_if(&mut self, ty: BlockType) -> Result<()> {
        let (params, results) = self.block_signature(ty)?;
        let cond = self.pop()?;
        let if_params = self.peek_n(params.len())?;
        let then_block = self.new_block();
        let else_block = self.new_block();
        self.terminate(IrTerminator::BranchIf {
            condition: cond,
            if_true: then_block,
            if_false: else_block,
        });
        self.switch_to(then_block);

        let frame = self.push_control(ControlKind::If, params, results)?;
        frame.else_block = Some(else_block);
        frame.if_params = if_params;
        Ok(())
    }

    /// Close the then arm and start the else arm with the `if` parameters.
    pub(super) fn translate_else(&mut self) -> Result<()> {
        let idx = self.control_stack.len() - 1;
        if self.control_stack[idx].kind != ControlKind::If {
            bail!("else without matching if");
        }
        if self.reachable {
            self.fallthrough_to_cont(idx)?;
        }
        let frame = &mut self.control_stack[idx];
        frame.kind = ControlKind::Else;
        let else_block = frame.else_block.take().context("if frame without else block")?;
        let height = frame.height;
        let if_params = std::mem::take(&mut frame.if_params);

        self.value_stack.truncate(height);
        self.switch_to(else_block);
        self.push_all(&if_params);
        Ok(())
    }

    pub(super) fn translate_end(&mut self) -> Result<()> {
        let idx = self.control_stack.len() - 1;
        match self.control_stack[idx].kind {
            ControlKind::Function => {
                if self.reachable {
                    let values = self.pop_n(self.results.len())?;
                    self.terminate(IrTerminator::Return { values });
                }
                self.pop_control()?;
                self.reachable = false;
                Ok(())
            }
            ControlKind::Block | ControlKind::Loop if self.control_stack[idx].cont.is_none() => {
                // Nothing branches to the end: values stay where they are.
                let frame = self.pop_control()?;
                if !self.reachable {
                    self.value_stack.truncate(frame.height);
                }
                Ok(())
            }
            ControlKind::Block | ControlKind::Loop | ControlKind::Else => {
                if self.reachable {
                    self.fallthrough_to_cont(idx)?;
                }
                let frame = self.pop_control()?;
                self.enter_cont(&frame);
                Ok(())
            }
            ControlKind::If => {
                if self.reachable {
                    self.fallthrough_to_cont(idx)?;
                }
                // No else arm: the false edge carries the parameters through.
                let else_block = self.control_stack[idx]
                    .else_block
                    .context("if frame without else block")?;
                let if_params = self.control_stack[idx].if_params.clone();
                let cont = self.cont_of(idx);
                self.switch_to(else_block);
                self.add_phi_incoming(cont, else_block, &if_params)?;
                self.terminate(IrTerminator::Jump { target: cont });
                let frame = self.pop_control()?;
                self.enter_cont(&frame);
                Ok(())
            }
            ControlKind::Try | ControlKind::Catch | ControlKind::CatchAll => self.end_try(idx),
        }
    }

    pub(super) fn translate_br(&mut self, depth: u32) -> Result<()> {
        let arity = self.label_arity(depth)?;
        let values = self.pop_n(arity)?;
        let (target, pops) = self.branch_target(depth)?;
        self.emit_branch(target, pops, values)?;
        self.mark_unreachable()
    }

    /// Lower `br_table`. Labels that need phi operands or handler pops are
    /// reached through one edge block per distinct depth.
    pub(super) fn translate_br_table(&mut self, targets: &[u32], default: u32) -> Result<()> {
        let index = self.pop()?;
        let arity = self.label_arity(default)?;
        let values = self.peek_n(arity)?;
        let source = self.current_block;

        let mut edges: Vec<(u32, BlockId)> = Vec::new();
        let mut resolve = |this: &mut Self, depth: u32| -> Result<BlockId> {
            if let Some((_, block)) = edges.iter().find(|(d, _)| *d == depth) {
                return Ok(*block);
            }
            let (target, pops) = this.branch_target(depth)?;
            let block = match target {
                BranchTarget::Block {
                    block,
                    has_phis: false,
                } if pops == 0 => block,
                _ => {
                    let edge = this.new_block();
                    this.switch_to(edge);
                    this.emit_branch(target, pops, values.clone())?;
                    edge
                }
            };
            edges.push((depth, block));
            Ok(block)
        };

        let mut table = Vec::with_capacity(targets.len());
        for depth in targets {
            table.push(resolve(self, *depth)?);
        }
        let default = resolve(self, default)?;

        self.switch_to(source);
        self.terminate(IrTerminator::BranchTable {
            index,
            targets: table,
            default,
        });
        self.mark_unreachable()
    }

    pub(super) fn translate_return(&mut self) -> Result<()> {
        let values = self.pop_n(self.results.len())?;
        let pops = self.handlers_above(0);
        self.emit_branch(BranchTarget::Return, pops, values)?;
        self.mark_unreachable()
    }
}
