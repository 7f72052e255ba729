//! Legalization: walks every instruction, probes it with
//! `EMIT_CAN_ENCODE`, and inserts the register-materializing copy a
//! non-`Zero` result calls for.
//!
//! Only the two fixed-register hints, `Left2Rax` and `Right2Rcx`, are
//! actually reachable here once register allocation has replaced every
//! virtual register: `Left2Reg`/`Right2Reg` are handled the same way as a
//! defensive fallback, even though the concrete encoder only ever returns
//! them for a still-virtual operand. `Right2Cst`, `ForceZero32` and
//! `NotSupported` are never synthesized by this encoder and are treated as
//! a legalizer bug -- this crate's own lowering never builds the operand
//! shapes that would trigger them.

use super::{push_raw, PassContext};
use crate::arena::StorageArena;
use crate::encoder::{ConformanceQuery, EncodeResult, Encoder};
use crate::ir::{DebugInfo, EmitFlags, MicroInstr, MicroInstrOperand, MicroOpBits, MicroOpcode};
use crate::reg::{gpr, MicroReg};
use crate::result::{CodegenError, CodegenResult};
use MicroInstrOperand as Op;

fn width_of(ops: &[MicroInstrOperand]) -> MicroOpBits {
    ops.iter()
        .find_map(|o| match o {
            MicroInstrOperand::Width(w) if *w != MicroOpBits::Zero => Some(*w),
            _ => None,
        })
        .unwrap_or(MicroOpBits::B64)
}

/// Move `ops[slot]` into `target` with a copy inserted just before the
/// instruction, if it isn't already there. Returns the register that was
/// displaced, so the caller can move the result back afterward.
fn materialize_slot(
    instrs: &mut StorageArena<MicroInstr>,
    operands: &mut StorageArena<MicroInstrOperand>,
    ops: &mut [MicroInstrOperand],
    slot: usize,
    target: MicroReg,
    debug_info: Option<DebugInfo>,
) -> Option<MicroReg> {
    let original = ops[slot].unwrap_reg();
    if original == target {
        return None;
    }
    let width = width_of(ops);
    push_raw(
        instrs,
        operands,
        MicroOpcode::LoadRegReg,
        EmitFlags::NONE,
        &[Op::Reg(target), Op::Reg(original), Op::Width(width)],
        debug_info,
    );
    ops[slot] = Op::Reg(target);
    Some(original)
}

/// Probe and, where needed, rewrite every instruction once. Returns
/// whether anything was rewritten.
pub fn run(ctx: &mut PassContext) -> CodegenResult<bool> {
    let mut changed = false;
    let old_instrs = std::mem::replace(&mut ctx.builder.instrs, StorageArena::new());
    let old_operands = std::mem::replace(&mut ctx.builder.operands, StorageArena::new());
    let mut new_instrs = StorageArena::new();
    let mut new_operands = StorageArena::new();
    let encoder = Encoder::new(ctx.symbols, ctx.text_base, 0);

    for r in old_instrs.iter_refs() {
        let inst = *old_instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        let mut ops = old_operands.collect_span(&inst.operands);

        let probe_flags = inst.emit_flags.union(EmitFlags::EMIT_CAN_ENCODE);
        let probe = MicroInstr { emit_flags: probe_flags, ..inst };
        let result = encoder.query_conformance_issue(&probe, &ops);

        match result {
            EncodeResult::Zero => {
                push_raw(&mut new_instrs, &mut new_operands, inst.opcode, inst.emit_flags, &ops, inst.debug_info);
            }
            EncodeResult::Left2Reg | EncodeResult::Left2Rax | EncodeResult::Right2Reg | EncodeResult::Right2Rcx => {
                let (slot, target, writeback) = match result {
                    EncodeResult::Left2Reg => (0, MicroReg::phys_int(10), false),
                    EncodeResult::Left2Rax => (0, gpr::RAX, true),
                    EncodeResult::Right2Reg => (1, MicroReg::phys_int(11), false),
                    EncodeResult::Right2Rcx => (1, gpr::RCX, false),
                    _ => unreachable!(),
                };
                let moved = materialize_slot(&mut new_instrs, &mut new_operands, &mut ops, slot, target, inst.debug_info);
                if moved.is_some() {
                    changed = true;
                }
                push_raw(&mut new_instrs, &mut new_operands, inst.opcode, inst.emit_flags, &ops, inst.debug_info);
                if writeback {
                    if let Some(original) = moved {
                        let width = width_of(&ops);
                        push_raw(
                            &mut new_instrs,
                            &mut new_operands,
                            MicroOpcode::LoadRegReg,
                            EmitFlags::NONE,
                            &[Op::Reg(original), Op::Reg(target), Op::Width(width)],
                            inst.debug_info,
                        );
                    }
                }
            }
            other => {
                return Err(CodegenError::EncoderRejectedAtEmit(format!(
                    "{:?} is not legalizable for {:?}",
                    other, inst.opcode
                )));
            }
        }
    }

    ctx.builder.instrs = new_instrs;
    ctx.builder.operands = new_operands;
    Ok(changed)
}
