//! Register allocation: replaces every virtual register with a physical
//! one, spilling to a stack slot once a class's fixed pool is exhausted.
//!
//! Simplified to a single first-occurrence linear scan rather than true
//! live-range coloring or graph coloring: grounded on the flat
//! `Unassigned | Stack | Reg(class)` affinity model, minus register
//! subclasses and minus any attempt at live-range splitting, since this
//! backend's micro IR has no loops or blocks to make splitting pay for
//! itself. Every virtual register keeps the same physical register (or
//! stack slot) for its entire lifetime.

use super::{push_raw, PassContext};
use crate::arena::StorageArena;
use crate::ir::{EmitFlags, MicroInstr, MicroInstrOperand, MicroOpBits, MicroOpcode};
use crate::reg::{gpr, MicroReg, RegClass};
use crate::result::CodegenResult;
use std::collections::{HashMap, HashSet};
use MicroInstrOperand as Op;

/// Physical GPRs assignable to virtual integer registers, in
/// assignment-priority order. `R10`/`R11` are held back as spill-code
/// scratch registers and never assigned to a live value.
const INT_POOL: &[MicroReg] = &[
    gpr::RAX,
    gpr::RBX,
    gpr::RDX,
    gpr::RSI,
    gpr::RDI,
    MicroReg::phys_int(8),
    MicroReg::phys_int(9),
    MicroReg::phys_int(12),
    MicroReg::phys_int(13),
    MicroReg::phys_int(14),
    MicroReg::phys_int(15),
    gpr::RCX,
];

/// Physical XMMs assignable to virtual float registers. `Xmm14`/`Xmm15`
/// are held back as spill-code scratch registers.
const FLOAT_POOL: &[MicroReg] = &[
    MicroReg::phys_float(0),
    MicroReg::phys_float(1),
    MicroReg::phys_float(2),
    MicroReg::phys_float(3),
    MicroReg::phys_float(4),
    MicroReg::phys_float(5),
    MicroReg::phys_float(6),
    MicroReg::phys_float(7),
    MicroReg::phys_float(8),
    MicroReg::phys_float(9),
    MicroReg::phys_float(10),
    MicroReg::phys_float(11),
    MicroReg::phys_float(12),
    MicroReg::phys_float(13),
];

const INT_SCRATCH: [MicroReg; 2] = [MicroReg::phys_int(10), MicroReg::phys_int(11)];
const FLOAT_SCRATCH: [MicroReg; 2] = [MicroReg::phys_float(14), MicroReg::phys_float(15)];

#[derive(Clone, Copy)]
enum Assignment {
    Phys(MicroReg),
    Spill(u32),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Def,
    Use,
    DefUse,
    NotReg,
}

/// Whether the register-bearing operand at `index` of `opcode` is read,
/// written, or both -- read off the positional layout each
/// `MicroIrBuilder` entry point builds its operand span in.
fn operand_role(opcode: MicroOpcode, index: usize) -> Role {
    use MicroOpcode::*;
    use Role::*;
    match (opcode, index) {
        (Push, 0) => Use,
        (Pop, 0) => Def,
        (JumpReg, 0) => Use,
        (JumpTable, 0) | (JumpTable, 1) => DefUse,
        (JumpTable, 2) => Use,
        (CallIndirect, 0) => Use,
        (LoadRegImm, 0) => Def,
        (LoadRegReg, 0) => Def,
        (LoadRegReg, 1) => Use,
        (LoadRegMem, 0) => Def,
        (LoadRegMem, 1) => Use,
        (LoadMemReg, 0) | (LoadMemReg, 1) => Use,
        (LoadMemImm, 0) => Use,
        (LoadSignedExtRegReg, 0) | (LoadZeroExtRegReg, 0) => Def,
        (LoadSignedExtRegReg, 1) | (LoadZeroExtRegReg, 1) => Use,
        (LoadSignedExtRegMem, 0) | (LoadZeroExtRegMem, 0) => Def,
        (LoadSignedExtRegMem, 1) | (LoadZeroExtRegMem, 1) => Use,
        (LoadAddrRegMem, 0) => Def,
        (LoadAddrRegMem, 1) => Use,
        (LoadAmcRegMem, 0) => Def,
        (LoadAmcRegMem, 1) | (LoadAmcRegMem, 2) => Use,
        (LoadAmcMemReg, 0) | (LoadAmcMemReg, 1) | (LoadAmcMemReg, 4) => Use,
        (LoadAmcMemImm, 0) | (LoadAmcMemImm, 1) => Use,
        (LoadAddrAmcRegMem, 0) => Def,
        (LoadAddrAmcRegMem, 1) | (LoadAddrAmcRegMem, 2) => Use,
        (CmpRegReg, 0) | (CmpRegReg, 1) => Use,
        (CmpRegImm, 0) => Use,
        (CmpMemReg, 0) | (CmpMemReg, 1) => Use,
        (CmpMemImm, 0) => Use,
        (SetCondReg, 0) => Def,
        (LoadCondRegReg, 0) => DefUse,
        (LoadCondRegReg, 1) => Use,
        (ClearReg, 0) => Def,
        (OpUnary, 0) => DefUse,
        (OpBinaryRegReg, 0) => DefUse,
        (OpBinaryRegReg, 1) => Use,
        (OpBinaryRegImm, 0) => DefUse,
        (OpBinaryRegMem, 0) => DefUse,
        (OpBinaryRegMem, 1) => Use,
        (OpTernary, 0) => DefUse,
        (OpTernary, 1) | (OpTernary, 2) => Use,
        (SymbolRelocAddr, 0) => Def,
        (SymbolRelocValue, 0) => Def,
        _ => NotReg,
    }
}

/// The width to move a spilled register at, taken from the instruction's
/// own `Width` operand where it carries one. `SetCondReg` writes a single
/// byte and carries no width operand at all; everything else defaults to a
/// full quadword, which covers pointer-sized opcodes like `Push`/`Pop`.
fn spill_width(opcode: MicroOpcode, ops: &[MicroInstrOperand]) -> MicroOpBits {
    for op in ops {
        if let Op::Width(w) = op {
            if *w != MicroOpBits::Zero {
                return *w;
            }
        }
    }
    match opcode {
        MicroOpcode::SetCondReg => MicroOpBits::B8,
        _ => MicroOpBits::B64,
    }
}

fn slot_offset(slot: u32) -> i32 {
    -(((slot as i64 + 1) * 8) as i32)
}

/// Replace every virtual register with a physical one, or, once a class's
/// pool is exhausted, a stack slot plus spill code around each use/def.
/// Returns the number of bytes of stack the spilled slots need, for
/// [`super::prolog_epilog`] to reserve.
pub fn run(ctx: &mut PassContext) -> CodegenResult<u32> {
    let old_instrs = std::mem::replace(&mut ctx.builder.instrs, StorageArena::new());
    let old_operands = std::mem::replace(&mut ctx.builder.operands, StorageArena::new());

    let mut int_map: HashMap<MicroReg, Assignment> = HashMap::new();
    let mut float_map: HashMap<MicroReg, Assignment> = HashMap::new();
    let mut next_int = 0usize;
    let mut next_float = 0usize;
    let mut next_slot = 0u32;

    for r in old_instrs.iter_refs() {
        let inst = old_instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        for op in old_operands.collect_span(&inst.operands) {
            let Op::Reg(reg) = op else { continue };
            match reg.class() {
                RegClass::VirtInt if !int_map.contains_key(&reg) => {
                    let a = if next_int < INT_POOL.len() {
                        let p = INT_POOL[next_int];
                        next_int += 1;
                        Assignment::Phys(p)
                    } else {
                        let s = next_slot;
                        next_slot += 1;
                        Assignment::Spill(s)
                    };
                    int_map.insert(reg, a);
                }
                RegClass::VirtFloat if !float_map.contains_key(&reg) => {
                    let a = if next_float < FLOAT_POOL.len() {
                        let p = FLOAT_POOL[next_float];
                        next_float += 1;
                        Assignment::Phys(p)
                    } else {
                        let s = next_slot;
                        next_slot += 1;
                        Assignment::Spill(s)
                    };
                    float_map.insert(reg, a);
                }
                _ => {}
            }
        }
    }

    let mut new_instrs = StorageArena::new();
    let mut new_operands = StorageArena::new();

    for r in old_instrs.iter_refs() {
        let inst = *old_instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        let mut ops = old_operands.collect_span(&inst.operands);
        let width = spill_width(inst.opcode, &ops);

        let mut local_scratch: HashMap<MicroReg, MicroReg> = HashMap::new();
        let mut local_scratch_count = 0usize;
        let mut loaded: HashSet<MicroReg> = HashSet::new();
        let mut stored: HashSet<MicroReg> = HashSet::new();
        let mut pre: Vec<(MicroReg, u32)> = Vec::new();
        let mut post: Vec<(MicroReg, u32)> = Vec::new();

        for i in 0..ops.len() {
            let Op::Reg(v) = ops[i] else { continue };
            let is_float = v.class() == RegClass::VirtFloat;
            let assignment = match v.class() {
                RegClass::VirtInt => int_map.get(&v).copied(),
                RegClass::VirtFloat => float_map.get(&v).copied(),
                _ => None,
            };
            let Some(assignment) = assignment else { continue };
            match assignment {
                Assignment::Phys(p) => ops[i] = Op::Reg(p),
                Assignment::Spill(slot) => {
                    let scratch = *local_scratch.entry(v).or_insert_with(|| {
                        let s = if is_float {
                            FLOAT_SCRATCH[local_scratch_count % FLOAT_SCRATCH.len()]
                        } else {
                            INT_SCRATCH[local_scratch_count % INT_SCRATCH.len()]
                        };
                        local_scratch_count += 1;
                        s
                    });
                    let role = operand_role(inst.opcode, i);
                    if matches!(role, Role::Use | Role::DefUse) && loaded.insert(v) {
                        pre.push((scratch, slot));
                    }
                    if matches!(role, Role::Def | Role::DefUse) && stored.insert(v) {
                        post.push((scratch, slot));
                    }
                    ops[i] = Op::Reg(scratch);
                }
            }
        }

        for (scratch, slot) in &pre {
            push_raw(
                &mut new_instrs,
                &mut new_operands,
                MicroOpcode::LoadRegMem,
                EmitFlags::NONE,
                &[Op::Reg(*scratch), Op::Reg(gpr::RBP), Op::Width(width), Op::ImmI32(slot_offset(*slot))],
                None,
            );
        }

        let span = new_operands.push_span(&ops);
        new_instrs.push_back(MicroInstr {
            opcode: inst.opcode,
            emit_flags: inst.emit_flags,
            operands: span,
            debug_info: inst.debug_info,
            erased: false,
        });

        for (scratch, slot) in &post {
            push_raw(
                &mut new_instrs,
                &mut new_operands,
                MicroOpcode::LoadMemReg,
                EmitFlags::NONE,
                &[Op::Reg(gpr::RBP), Op::Reg(*scratch), Op::Width(width), Op::ImmI32(slot_offset(*slot))],
                None,
            );
        }
    }

    ctx.builder.instrs = new_instrs;
    ctx.builder.operands = new_operands;
    Ok(next_slot * 8)
}
