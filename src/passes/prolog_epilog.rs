//! Function entry/exit scaffolding: saves the callee-saved registers the
//! function actually clobbers, reserves the stack frame register
//! allocation's spill slots need, and mirrors both before every `Ret`.
//!
//! A classic frame-pointer-based prolog/epilog pair, the same shape every
//! calling convention in [`crate::ir::CallConvKind`] expects: the choice of
//! *which* registers are callee-saved is the only ABI-specific knob, read
//! from [`crate::reg::callee_saved`].

use super::{copy_instr, push_raw, PassContext};
use crate::arena::StorageArena;
use crate::ir::{EmitFlags, MicroInstrOperand, MicroOp, MicroOpBits, MicroOpcode};
use crate::reg::{callee_saved, gpr, MicroReg};
use crate::result::CodegenResult;
use MicroInstrOperand as Op;

fn round_up_16(n: u32) -> u32 {
    (n + 15) & !15
}

/// Is this the register allocator's `[rbp + disp]` spill load/store shape?
/// These are the only `rbp`-based memory accesses this backend ever
/// produces at this point in the pipeline, so this also identifies exactly
/// which instructions need their baked-in displacement corrected for the
/// callee-saved block pushed between `mov rbp, rsp` and the locals area.
fn is_rbp_spill_access(opcode: MicroOpcode, ops: &[MicroInstrOperand]) -> bool {
    match opcode {
        MicroOpcode::LoadRegMem => ops[1] == Op::Reg(gpr::RBP),
        MicroOpcode::LoadMemReg => ops[0] == Op::Reg(gpr::RBP),
        _ => false,
    }
}

/// Wrap the function body in a `push rbp; mov rbp, rsp; push <clobbered
/// callee-saved regs>; sub rsp, <locals>` prolog sized to `spill_bytes`,
/// and mirror it in reverse immediately before every `Ret`.
pub fn run(ctx: &mut PassContext, spill_bytes: u32) -> CodegenResult<bool> {
    let call_conv = ctx.call_conv;
    let old_instrs = std::mem::replace(&mut ctx.builder.instrs, StorageArena::new());
    let old_operands = std::mem::replace(&mut ctx.builder.operands, StorageArena::new());

    let candidates = callee_saved(call_conv);
    let mut clobbered: Vec<MicroReg> = Vec::new();
    for r in old_instrs.iter_refs() {
        let inst = old_instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        for op in old_operands.collect_span(&inst.operands) {
            if let Op::Reg(reg) = op {
                if candidates.contains(&reg) && !clobbered.contains(&reg) {
                    clobbered.push(reg);
                }
            }
        }
    }

    let locals_size = round_up_16(spill_bytes);
    let changed = !clobbered.is_empty() || locals_size > 0;

    // Spill slots are addressed `[rbp - (slot+1)*8]` by the register
    // allocator, which runs before the clobbered-register set is known and
    // so assumes its slots sit directly below the saved frame pointer. The
    // `push`es below for `clobbered` land in exactly that range, so every
    // slot address baked in by regalloc is shifted down by one slot per
    // saved register to land below them instead.
    let spill_shift = (clobbered.len() as i32) * 8;

    let mut new_instrs = StorageArena::new();
    let mut new_operands = StorageArena::new();

    push_raw(&mut new_instrs, &mut new_operands, MicroOpcode::Push, EmitFlags::NONE, &[Op::Reg(gpr::RBP)], None);
    push_raw(
        &mut new_instrs,
        &mut new_operands,
        MicroOpcode::LoadRegReg,
        EmitFlags::NONE,
        &[Op::Reg(gpr::RBP), Op::Reg(gpr::RSP), Op::Width(MicroOpBits::B64)],
        None,
    );
    for &reg in &clobbered {
        push_raw(&mut new_instrs, &mut new_operands, MicroOpcode::Push, EmitFlags::NONE, &[Op::Reg(reg)], None);
    }
    if locals_size > 0 {
        push_raw(
            &mut new_instrs,
            &mut new_operands,
            MicroOpcode::OpBinaryRegImm,
            EmitFlags::NONE,
            &[Op::Reg(gpr::RSP), Op::Op(MicroOp::Sub), Op::Width(MicroOpBits::B64), Op::ImmI32(locals_size as i32)],
            None,
        );
    }

    for r in old_instrs.iter_refs() {
        let inst = *old_instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        if inst.opcode == MicroOpcode::Ret {
            if locals_size > 0 {
                push_raw(
                    &mut new_instrs,
                    &mut new_operands,
                    MicroOpcode::OpBinaryRegImm,
                    EmitFlags::NONE,
                    &[Op::Reg(gpr::RSP), Op::Op(MicroOp::Add), Op::Width(MicroOpBits::B64), Op::ImmI32(locals_size as i32)],
                    None,
                );
            }
            for &reg in clobbered.iter().rev() {
                push_raw(&mut new_instrs, &mut new_operands, MicroOpcode::Pop, EmitFlags::NONE, &[Op::Reg(reg)], None);
            }
            push_raw(&mut new_instrs, &mut new_operands, MicroOpcode::Pop, EmitFlags::NONE, &[Op::Reg(gpr::RBP)], None);
        }

        let mut ops = old_operands.collect_span(&inst.operands);
        if spill_shift != 0 && is_rbp_spill_access(inst.opcode, &ops) {
            let offset_idx = ops.len() - 1;
            if let Op::ImmI32(off) = ops[offset_idx] {
                ops[offset_idx] = Op::ImmI32(off - spill_shift);
            }
            push_raw(&mut new_instrs, &mut new_operands, inst.opcode, inst.emit_flags, &ops, inst.debug_info);
        } else {
            copy_instr(&mut new_instrs, &mut new_operands, &old_operands, &inst);
        }
    }

    ctx.builder.instrs = new_instrs;
    ctx.builder.operands = new_operands;
    Ok(changed)
}
