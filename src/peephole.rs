//! Local, rule-based rewriting over a function's instruction stream.
//!
//! Each rule is its own type implementing [`PeepholeRule`]; the pass walks
//! the view once per rule pass, trying every rule against the current
//! instruction in order and stopping at the first one that reports a
//! change. Rules that mutate operands always re-probe encoder conformance
//! on the new form before committing; a rejected mutation is simply not
//! applied (there is nothing to revert, since nothing was written until
//! the probe passed).

use crate::encoder::ConformanceQuery;
use crate::ir::{CallConvKind, MicroInstr, MicroInstrOperand, MicroOp, MicroOpBits, MicroOpcode};
use crate::oracle;
use crate::reg::MicroReg;
use crate::view::View;
use MicroInstrOperand as Operand;

/// Scan forward from `it` (inclusive) for the next reference to `reg`;
/// `reg` is dead if that reference is a definition, or if the function ends
/// first.
pub fn is_copy_dead_after_instruction(view: &View, from_idx: usize, reg: MicroReg) -> bool {
    scan_dead(view, from_idx, reg, false)
}

/// Like [`is_copy_dead_after_instruction`], but a call across which `reg`
/// is not callee-saved also counts as killing it (its value cannot survive
/// the call anyway, so folding its address computation across the call is
/// safe).
pub fn is_temp_dead_for_address_fold(view: &View, from_idx: usize, reg: MicroReg, conv: crate::ir::CallConvKind) -> bool {
    if !reg.is_physical() || crate::reg::callee_saved(conv).contains(&reg) {
        return scan_dead(view, from_idx, reg, false);
    }
    scan_dead(view, from_idx, reg, true)
}

fn scan_dead(view: &View, from_idx: usize, reg: MicroReg, calls_kill: bool) -> bool {
    let mut idx = from_idx;
    while let Some(r) = view.nth_order(idx) {
        let inst = view.instr(r);
        if inst.is_erased() {
            idx += 1;
            continue;
        }
        if calls_kill && inst.opcode.is_call() {
            return true;
        }
        if oracle::is_local_dataflow_barrier(inst.opcode) {
            return false;
        }
        let ops = view.operands(inst.operands);
        if defines(inst.opcode, &ops, reg) {
            return true;
        }
        if uses(inst.opcode, &ops, reg) {
            return false;
        }
        idx += 1;
    }
    true
}

fn defines(opcode: MicroOpcode, ops: &[MicroInstrOperand], reg: MicroReg) -> bool {
    use MicroOpcode::*;
    match opcode {
        LoadRegImm | LoadRegReg | LoadRegMem | LoadSignedExtRegReg | LoadSignedExtRegMem
        | LoadZeroExtRegReg | LoadZeroExtRegMem | LoadAddrRegMem | LoadAmcRegMem
        | LoadAddrAmcRegMem | SetCondReg | LoadCondRegReg | ClearReg | OpUnary
        | OpBinaryRegReg | OpBinaryRegImm | OpBinaryRegMem | OpTernary | SymbolRelocAddr
        | SymbolRelocValue | Pop => ops.first().and_then(|o| o.as_reg()) == Some(reg),
        _ => false,
    }
}

fn uses(opcode: MicroOpcode, ops: &[MicroInstrOperand], reg: MicroReg) -> bool {
    use MicroOpcode::*;
    let skip_first_as_def = matches!(
        opcode,
        LoadRegReg
            | LoadRegMem
            | LoadSignedExtRegReg
            | LoadSignedExtRegMem
            | LoadZeroExtRegReg
            | LoadZeroExtRegMem
            | LoadCondRegReg
            | OpUnary
            | OpBinaryRegReg
            | OpBinaryRegImm
            | OpBinaryRegMem
            | OpTernary
    );
    ops.iter().enumerate().any(|(i, o)| {
        if skip_first_as_def && i == 0 {
            return false;
        }
        o.as_reg() == Some(reg)
    })
}

/// Are flags dead after the instruction at `from_idx`? True if the next
/// flag-sensitive consumer is itself a flag-defining instruction, or a
/// barrier is reached first.
pub fn are_flags_dead_after_instruction(view: &View, from_idx: usize) -> bool {
    let mut idx = from_idx;
    while let Some(r) = view.nth_order(idx) {
        let inst = view.instr(r);
        if inst.is_erased() {
            idx += 1;
            continue;
        }
        if oracle::is_local_dataflow_barrier(inst.opcode) {
            return true;
        }
        match inst.opcode {
            MicroOpcode::JumpCond | MicroOpcode::SetCondReg | MicroOpcode::LoadCondRegReg => return false,
            MicroOpcode::CmpRegReg
            | MicroOpcode::CmpRegImm
            | MicroOpcode::CmpMemReg
            | MicroOpcode::CmpMemImm
            | MicroOpcode::OpBinaryRegReg
            | MicroOpcode::OpBinaryRegImm
            | MicroOpcode::ClearReg => return true,
            _ => {}
        }
        idx += 1;
    }
    true
}

/// For memory-bearing opcodes, the operand slot indices of the base
/// register and the displacement immediate.
pub fn get_mem_base_offset_operand_indices(opcode: MicroOpcode) -> Option<(usize, usize)> {
    use MicroOpcode::*;
    match opcode {
        LoadRegMem | LoadAddrRegMem => Some((1, 3)),
        LoadMemReg => Some((0, 3)),
        LoadMemImm => Some((0, 2)),
        LoadSignedExtRegMem | LoadZeroExtRegMem => Some((1, 4)),
        _ => None,
    }
}

/// A single local rewrite rule.
pub trait PeepholeRule {
    /// This rule's stable identifier, for diagnostics and statistics.
    fn name(&self) -> &'static str;
    /// Attempt a rewrite at the view's current position. Returns `true`
    /// and leaves the mutation applied if it fired.
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, conv: CallConvKind) -> bool;
}

struct RemoveNoOps;
impl PeepholeRule for RemoveNoOps {
    fn name(&self) -> &'static str {
        "remove_no_ops"
    }
    fn try_rewrite(&self, view: &mut View, _query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r) = view.current() else { return false };
        let inst = *view.instr(r);
        let ops = view.operands(inst.operands);
        if oracle::is_no_op_encoder_instruction(&inst, &ops) {
            view.erase_current();
            true
        } else {
            false
        }
    }
}

/// `mov r, b; add r, k` -> `lea r, [b + k]`, when both are 64-bit, the
/// classes match, and the flags the `add` would have set are dead.
struct FoldCopyAddIntoLea;
impl PeepholeRule for FoldCopyAddIntoLea {
    fn name(&self) -> &'static str {
        "fold_copy_add_into_load_address"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let dst = ops0[0].unwrap_reg();
        let base = ops0[1].unwrap_reg();
        let width0 = ops0[2].unwrap_width();
        if width0 != MicroOpBits::B64 {
            return false;
        }
        let Some(r1) = view.peek_next() else { return false };
        let inst1 = *view.instr(r1);
        if inst1.opcode != MicroOpcode::OpBinaryRegImm {
            return false;
        }
        let ops1 = view.operands(inst1.operands);
        let add_dst = ops1[0].unwrap_reg();
        let op = ops1[1].unwrap_op();
        let width1 = ops1[2].unwrap_width();
        let imm = ops1[3].unwrap_i32();
        if add_dst != dst || op != MicroOp::Add || width1 != MicroOpBits::B64 {
            return false;
        }
        if !crate::oracle::is_same_register_class(dst.class(), base.class()) {
            return false;
        }
        if !are_flags_dead_after_instruction(view, idx_after(view, r1)) {
            return false;
        }

        let new_ops = [Operand::Reg(dst), Operand::Reg(base), Operand::Width(MicroOpBits::B64), Operand::ImmI32(imm)];
        let probe = MicroInstr {
            opcode: MicroOpcode::LoadAddrRegMem,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &new_ops) {
            return false;
        }

        view.instr_mut(r0).opcode = MicroOpcode::LoadAddrRegMem;
        let span = view.push_operands(&new_ops);
        view.instr_mut(r0).operands = span;
        view.erase_ahead(r1);
        true
    }
}

/// `mov t, k; <consumer using t>` -> inline `k` directly into the
/// consumer, when `t`'s only live use is that next instruction.
struct FoldLoadImmIntoNext;
impl PeepholeRule for FoldLoadImmIntoNext {
    fn name(&self) -> &'static str {
        "fold_loadimm_into_next"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegImm {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let t = ops0[0].unwrap_reg();
        let width = ops0[1].unwrap_width();
        let imm = ops0[2].unwrap_u64() as i64;
        let masked = width.mask(imm) as i32;

        let Some(r1) = view.peek_next() else { return false };
        let inst1 = *view.instr(r1);
        let ops1 = view.operands(inst1.operands);

        let (new_opcode, new_ops): (MicroOpcode, Vec<MicroInstrOperand>) = match inst1.opcode {
            MicroOpcode::LoadRegReg if ops1[1].unwrap_reg() == t => (
                MicroOpcode::LoadRegImm,
                vec![ops1[0], Operand::Width(ops1[2].unwrap_width()), Operand::ImmU64(imm as u64)],
            ),
            MicroOpcode::OpBinaryRegReg if ops1[1].unwrap_reg() == t => (
                MicroOpcode::OpBinaryRegImm,
                vec![ops1[0], ops1[2], ops1[3], Operand::ImmI32(masked)],
            ),
            MicroOpcode::CmpRegReg if ops1[1].unwrap_reg() == t => (
                MicroOpcode::CmpRegImm,
                vec![ops1[0], Operand::ImmI32(masked), ops1[2]],
            ),
            MicroOpcode::LoadMemReg if ops1[1].unwrap_reg() == t => (
                MicroOpcode::LoadMemImm,
                vec![ops1[0], ops1[2], ops1[3], Operand::ImmI32(masked)],
            ),
            _ => return false,
        };

        if !is_copy_dead_after_instruction(view, idx_after(view, r1), t) {
            return false;
        }

        let probe = MicroInstr {
            opcode: new_opcode,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &new_ops) {
            return false;
        }

        view.instr_mut(r1).opcode = new_opcode;
        let span = view.push_operands(&new_ops);
        view.instr_mut(r1).operands = span;
        view.erase_current();
        true
    }
}

fn idx_after(view: &View, r: crate::arena::Ref<MicroInstr>) -> usize {
    view.order_index_of(r).map_or(usize::MAX, |i| i + 1)
}

/// `mov r, a; mov r, b` (same width) drops the first, since its value is
/// never observed.
struct RemoveOverwrittenCopy;
impl PeepholeRule for RemoveOverwrittenCopy {
    fn name(&self) -> &'static str {
        "remove_overwritten_copy"
    }
    fn try_rewrite(&self, view: &mut View, _query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if !matches!(inst0.opcode, MicroOpcode::LoadRegImm | MicroOpcode::LoadRegReg) {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let dst0 = ops0[0].unwrap_reg();

        let Some(r1) = view.peek_next() else { return false };
        let inst1 = *view.instr(r1);
        if !matches!(inst1.opcode, MicroOpcode::LoadRegImm | MicroOpcode::LoadRegReg) {
            return false;
        }
        let ops1 = view.operands(inst1.operands);
        let dst1 = ops1[0].unwrap_reg();
        if dst0 != dst1 {
            return false;
        }
        // The second instruction's source must not itself be `dst0`
        // (otherwise it reads the value the first instruction produced).
        if inst1.opcode == MicroOpcode::LoadRegReg && ops1[1].unwrap_reg() == dst0 {
            return false;
        }
        view.erase_current();
        true
    }
}

/// `mov t, s; op t, …; mov s, t` -> `op s, …`, when `t` is dead after the
/// copy-back and `s` is not read by the middle instruction in a way the
/// rewrite would disturb.
struct FoldCopyOpCopyBack;
impl PeepholeRule for FoldCopyOpCopyBack {
    fn name(&self) -> &'static str {
        "fold_copy_op_copy_back"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let t = ops0[0].unwrap_reg();
        let s = ops0[1].unwrap_reg();
        let width0 = ops0[2].unwrap_width();

        let idx0 = match view.order_index_of(r0) {
            Some(i) => i,
            None => return false,
        };
        let Some(r1) = view.nth_order(idx0 + 1) else { return false };
        let inst1 = *view.instr(r1);
        let ops1 = view.operands(inst1.operands);
        if ops1[0].unwrap_reg() != t {
            return false;
        }
        // The middle op is either `op t, <reg>` or `op t, <imm>`; the
        // operand layout (and hence where `op`/`width`/the right-hand side
        // live) differs between the two opcodes.
        let (new_opcode, op, width1, rhs) = match inst1.opcode {
            MicroOpcode::OpBinaryRegReg => (MicroOpcode::OpBinaryRegReg, ops1[2].unwrap_op(), ops1[3].unwrap_width(), ops1[1]),
            MicroOpcode::OpBinaryRegImm => (MicroOpcode::OpBinaryRegImm, ops1[1].unwrap_op(), ops1[2].unwrap_width(), ops1[3]),
            _ => return false,
        };

        let Some(r2) = view.nth_order(idx0 + 2) else { return false };
        let inst2 = *view.instr(r2);
        if inst2.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops2 = view.operands(inst2.operands);
        if ops2[0].unwrap_reg() != s || ops2[1].unwrap_reg() != t || ops2[2].unwrap_width() != width0 || width0 != width1 {
            return false;
        }
        if !is_copy_dead_after_instruction(view, idx0 + 3, t) {
            return false;
        }

        let new_ops: Vec<MicroInstrOperand> = match new_opcode {
            MicroOpcode::OpBinaryRegReg => vec![Operand::Reg(s), rhs, Operand::Op(op), Operand::Width(width1)],
            MicroOpcode::OpBinaryRegImm => vec![Operand::Reg(s), Operand::Op(op), Operand::Width(width1), rhs],
            _ => unreachable!(),
        };
        let probe = MicroInstr {
            opcode: new_opcode,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &new_ops) {
            return false;
        }

        view.instr_mut(r1).opcode = new_opcode;
        let span = view.push_operands(&new_ops);
        view.instr_mut(r1).operands = span;
        view.erase_current();
        view.erase_ahead(r2);
        true
    }
}

/// `lea t, [b + k1]; op […, [t + k2] …]` -> `op […, [b + (k1+k2)] …]`, when
/// `t` is dead after the second instruction and no other operand of the
/// second instruction also names `t`.
struct FoldLoadAddrIntoNextMemOffset;
impl PeepholeRule for FoldLoadAddrIntoNextMemOffset {
    fn name(&self) -> &'static str {
        "fold_loadaddr_into_next_mem_offset"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadAddrRegMem {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let t = ops0[0].unwrap_reg();
        let b = ops0[1].unwrap_reg();
        let k1 = ops0[3].unwrap_i32();

        let Some(r1) = view.peek_next() else { return false };
        let inst1 = *view.instr(r1);
        let Some((base_idx, offset_idx)) = get_mem_base_offset_operand_indices(inst1.opcode) else {
            return false;
        };
        let mut ops1 = view.operands(inst1.operands);
        if ops1[base_idx].unwrap_reg() != t {
            return false;
        }
        // `t` must not also appear in some other slot (e.g. as the value
        // being stored); folding would then change which value that slot
        // reads after `t` stops being defined.
        if ops1.iter().enumerate().any(|(i, o)| i != base_idx && o.as_reg() == Some(t)) {
            return false;
        }
        let k2 = ops1[offset_idx].unwrap_i32();
        let Some(combined) = k1.checked_add(k2) else { return false };

        if !is_temp_dead_for_address_fold(view, idx_after(view, r1), t, conv) {
            return false;
        }

        ops1[base_idx] = Operand::Reg(b);
        ops1[offset_idx] = Operand::ImmI32(combined);
        let probe = MicroInstr {
            opcode: inst1.opcode,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &ops1) {
            return false;
        }

        let span = view.push_operands(&ops1);
        view.instr_mut(r1).operands = span;
        view.erase_current();
        true
    }
}

/// Two adjacent 32-bit immediate stores to `[base + o]`/`[base + o + 4]`
/// coalesce into one 64-bit store at `o`, when the second immediate is
/// exactly the sign-extension companion of the first (the only case a
/// single `mov r/m64, imm32` can reproduce, since the processor only ever
/// sign-extends one 32-bit immediate into 64 bits, never concatenates two
/// independent halves).
struct FoldAdjacentMemImm32Stores;
impl PeepholeRule for FoldAdjacentMemImm32Stores {
    fn name(&self) -> &'static str {
        "fold_adjacent_memimm32_stores"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadMemImm {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let base = ops0[0].unwrap_reg();
        let width0 = ops0[1].unwrap_width();
        let offset0 = ops0[2].unwrap_i32();
        let imm0 = ops0[3].unwrap_i32();
        if width0 != MicroOpBits::B32 {
            return false;
        }

        let Some(r1) = view.peek_next() else { return false };
        let inst1 = *view.instr(r1);
        if inst1.opcode != MicroOpcode::LoadMemImm {
            return false;
        }
        let ops1 = view.operands(inst1.operands);
        let base1 = ops1[0].unwrap_reg();
        let width1 = ops1[1].unwrap_width();
        let offset1 = ops1[2].unwrap_i32();
        let imm1 = ops1[3].unwrap_i32();
        let Some(expected_offset1) = offset0.checked_add(4) else { return false };
        if base1 != base || width1 != MicroOpBits::B32 || offset1 != expected_offset1 {
            return false;
        }
        let expected_high = if imm0 < 0 { -1i32 } else { 0 };
        if imm1 != expected_high {
            return false;
        }

        let new_ops = [Operand::Reg(base), Operand::Width(MicroOpBits::B64), Operand::ImmI32(offset0), Operand::ImmI32(imm0)];
        let probe = MicroInstr {
            opcode: MicroOpcode::LoadMemImm,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &new_ops) {
            return false;
        }

        let span = view.push_operands(&new_ops);
        view.instr_mut(r0).operands = span;
        view.erase_ahead(r1);
        true
    }
}

/// Two consecutive `rsp` adjustments by the same operator merge into one,
/// optionally tolerating a single intervening `mov` between two registers
/// that are neither `rsp`.
struct MergeRspAdjustmentsAtStart;
impl PeepholeRule for MergeRspAdjustmentsAtStart {
    fn name(&self) -> &'static str {
        "merge_rsp_adjustments_at_start"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::OpBinaryRegImm {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let dst0 = ops0[0].unwrap_reg();
        if dst0 != crate::reg::gpr::RSP {
            return false;
        }
        let op0 = ops0[1].unwrap_op();
        if !matches!(op0, MicroOp::Add | MicroOp::Sub) {
            return false;
        }
        let width0 = ops0[2].unwrap_width();
        let imm0 = ops0[3].unwrap_i32();

        let idx0 = match view.order_index_of(r0) {
            Some(i) => i,
            None => return false,
        };
        let Some(r_mid) = view.nth_order(idx0 + 1) else { return false };
        let inst_mid = *view.instr(r_mid);
        let r1 = if inst_mid.opcode == MicroOpcode::OpBinaryRegImm {
            r_mid
        } else if inst_mid.opcode == MicroOpcode::LoadRegReg {
            let ops_mid = view.operands(inst_mid.operands);
            let mdst = ops_mid[0].unwrap_reg();
            let msrc = ops_mid[1].unwrap_reg();
            if mdst == crate::reg::gpr::RSP || msrc == crate::reg::gpr::RSP {
                return false;
            }
            let Some(r_next) = view.nth_order(idx0 + 2) else { return false };
            r_next
        } else {
            return false;
        };

        let inst1 = *view.instr(r1);
        if inst1.opcode != MicroOpcode::OpBinaryRegImm {
            return false;
        }
        let ops1 = view.operands(inst1.operands);
        let dst1 = ops1[0].unwrap_reg();
        let op1 = ops1[1].unwrap_op();
        let width1 = ops1[2].unwrap_width();
        let imm1 = ops1[3].unwrap_i32();
        if dst1 != crate::reg::gpr::RSP || op1 != op0 || width1 != width0 {
            return false;
        }
        let Some(combined) = imm0.checked_add(imm1) else { return false };

        let new_ops = [Operand::Reg(dst0), Operand::Op(op0), Operand::Width(width0), Operand::ImmI32(combined)];
        let probe = MicroInstr {
            opcode: MicroOpcode::OpBinaryRegImm,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &new_ops) {
            return false;
        }

        let span = view.push_operands(&new_ops);
        view.instr_mut(r0).operands = span;
        view.erase_ahead(r1);
        true
    }
}

/// `mov t, s; op …, t` -> `op …, s`, for a binary op reading `t` as its
/// right-hand source, when `t` is dead after that use.
struct ForwardCopyIntoNextBinarySource;
impl PeepholeRule for ForwardCopyIntoNextBinarySource {
    fn name(&self) -> &'static str {
        "forward_copy_into_next_binary_source"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let t = ops0[0].unwrap_reg();
        let s = ops0[1].unwrap_reg();
        let width0 = ops0[2].unwrap_width();

        let Some(r1) = view.peek_next() else { return false };
        let inst1 = *view.instr(r1);
        if inst1.opcode != MicroOpcode::OpBinaryRegReg {
            return false;
        }
        let mut ops1 = view.operands(inst1.operands);
        let dst = ops1[0].unwrap_reg();
        let src = ops1[1].unwrap_reg();
        let width1 = ops1[3].unwrap_width();
        if src != t || dst == t || width1 != width0 {
            return false;
        }

        if !is_copy_dead_after_instruction(view, idx_after(view, r1), t) {
            return false;
        }

        ops1[1] = Operand::Reg(s);
        let probe = MicroInstr {
            opcode: MicroOpcode::OpBinaryRegReg,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &ops1) {
            return false;
        }

        let span = view.push_operands(&ops1);
        view.instr_mut(r1).operands = span;
        view.erase_current();
        true
    }
}

/// `mov t, s; cmp …, t` -> `cmp …, s`, for either compare operand, when `t`
/// is dead after the comparison.
struct ForwardCopyIntoNextCompareSource;
impl PeepholeRule for ForwardCopyIntoNextCompareSource {
    fn name(&self) -> &'static str {
        "forward_copy_into_next_compare_source"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let t = ops0[0].unwrap_reg();
        let s = ops0[1].unwrap_reg();
        let width0 = ops0[2].unwrap_width();

        let Some(r1) = view.peek_next() else { return false };
        let inst1 = *view.instr(r1);
        if inst1.opcode != MicroOpcode::CmpRegReg {
            return false;
        }
        let mut ops1 = view.operands(inst1.operands);
        let width1 = ops1[2].unwrap_width();
        if width1 != width0 {
            return false;
        }
        let lhs_is_t = ops1[0].unwrap_reg() == t;
        let rhs_is_t = ops1[1].unwrap_reg() == t;
        if !lhs_is_t && !rhs_is_t {
            return false;
        }

        if !is_copy_dead_after_instruction(view, idx_after(view, r1), t) {
            return false;
        }

        if lhs_is_t {
            ops1[0] = Operand::Reg(s);
        }
        if rhs_is_t {
            ops1[1] = Operand::Reg(s);
        }
        let probe = MicroInstr {
            opcode: MicroOpcode::CmpRegReg,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &ops1) {
            return false;
        }

        let span = view.push_operands(&ops1);
        view.instr_mut(r1).operands = span;
        view.erase_current();
        true
    }
}

/// `mov t, s; op t (unary); mov s, t` -> `op s`, the unary-opcode twin of
/// [`FoldCopyOpCopyBack`].
struct FoldCopyUnaryCopyBack;
impl PeepholeRule for FoldCopyUnaryCopyBack {
    fn name(&self) -> &'static str {
        "fold_copy_unary_copy_back"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let t = ops0[0].unwrap_reg();
        let s = ops0[1].unwrap_reg();
        let width0 = ops0[2].unwrap_width();

        let idx0 = match view.order_index_of(r0) {
            Some(i) => i,
            None => return false,
        };
        let Some(r1) = view.nth_order(idx0 + 1) else { return false };
        let inst1 = *view.instr(r1);
        if inst1.opcode != MicroOpcode::OpUnary {
            return false;
        }
        let ops1 = view.operands(inst1.operands);
        if ops1[0].unwrap_reg() != t {
            return false;
        }
        let op = ops1[1].unwrap_op();
        let width1 = ops1[2].unwrap_width();

        let Some(r2) = view.nth_order(idx0 + 2) else { return false };
        let inst2 = *view.instr(r2);
        if inst2.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops2 = view.operands(inst2.operands);
        if ops2[0].unwrap_reg() != s || ops2[1].unwrap_reg() != t || ops2[2].unwrap_width() != width0 || width0 != width1 {
            return false;
        }
        if !is_copy_dead_after_instruction(view, idx0 + 3, t) {
            return false;
        }

        let new_ops = [Operand::Reg(s), Operand::Op(op), Operand::Width(width1)];
        let probe = MicroInstr {
            opcode: MicroOpcode::OpUnary,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &new_ops) {
            return false;
        }

        view.instr_mut(r1).opcode = MicroOpcode::OpUnary;
        let span = view.push_operands(&new_ops);
        view.instr_mut(r1).operands = span;
        view.erase_current();
        view.erase_ahead(r2);
        true
    }
}

/// `mov t, s; op t, …; <neutral>; mov s, t` -> `<neutral>; op s, …`, where
/// the copy-back is separated from the folded op by one instruction that
/// touches neither `s` nor `t` and isn't itself a barrier (mirrors
/// [`FoldCopyOpCopyBack`] with one extra instruction of slack before the
/// copy-back).
struct FoldCopyBackWithPreviousOp;
impl PeepholeRule for FoldCopyBackWithPreviousOp {
    fn name(&self) -> &'static str {
        "fold_copy_back_with_previous_op"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let t = ops0[0].unwrap_reg();
        let s = ops0[1].unwrap_reg();
        let width0 = ops0[2].unwrap_width();

        let idx0 = match view.order_index_of(r0) {
            Some(i) => i,
            None => return false,
        };
        let Some(r1) = view.nth_order(idx0 + 1) else { return false };
        let inst1 = *view.instr(r1);
        let ops1 = view.operands(inst1.operands);
        if ops1.first().and_then(|o| o.as_reg()) != Some(t) {
            return false;
        }
        let (new_opcode, op, width1, rhs) = match inst1.opcode {
            MicroOpcode::OpBinaryRegReg => (MicroOpcode::OpBinaryRegReg, ops1[2].unwrap_op(), ops1[3].unwrap_width(), ops1[1]),
            MicroOpcode::OpBinaryRegImm => (MicroOpcode::OpBinaryRegImm, ops1[1].unwrap_op(), ops1[2].unwrap_width(), ops1[3]),
            _ => return false,
        };

        let Some(r_mid) = view.nth_order(idx0 + 2) else { return false };
        let inst_mid = *view.instr(r_mid);
        if inst_mid.is_erased() || oracle::is_local_dataflow_barrier(inst_mid.opcode) {
            return false;
        }
        let ops_mid = view.operands(inst_mid.operands);
        if ops_mid.iter().any(|o| o.as_reg() == Some(s) || o.as_reg() == Some(t)) {
            return false;
        }

        let Some(r2) = view.nth_order(idx0 + 3) else { return false };
        let inst2 = *view.instr(r2);
        if inst2.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops2 = view.operands(inst2.operands);
        if ops2[0].unwrap_reg() != s || ops2[1].unwrap_reg() != t || ops2[2].unwrap_width() != width0 || width0 != width1 {
            return false;
        }
        if !is_copy_dead_after_instruction(view, idx0 + 4, t) {
            return false;
        }

        let new_ops: Vec<MicroInstrOperand> = match new_opcode {
            MicroOpcode::OpBinaryRegReg => vec![Operand::Reg(s), rhs, Operand::Op(op), Operand::Width(width1)],
            MicroOpcode::OpBinaryRegImm => vec![Operand::Reg(s), Operand::Op(op), Operand::Width(width1), rhs],
            _ => unreachable!(),
        };
        let probe = MicroInstr {
            opcode: new_opcode,
            emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
            operands: crate::arena::Span::default(),
            debug_info: None,
            erased: false,
        };
        if oracle::violates_encoder_conformance(query, &probe, &new_ops) {
            return false;
        }

        view.instr_mut(r1).opcode = new_opcode;
        let span = view.push_operands(&new_ops);
        view.instr_mut(r1).operands = span;
        view.erase_current();
        view.erase_ahead(r2);
        true
    }
}

/// Is `reg` both read and written in place by this opcode's first operand
/// slot (as opposed to a pure destination, which only ever defines it)?
fn is_def_use_dst(opcode: MicroOpcode) -> bool {
    matches!(
        opcode,
        MicroOpcode::OpBinaryRegReg | MicroOpcode::OpBinaryRegImm | MicroOpcode::OpUnary | MicroOpcode::OpTernary | MicroOpcode::LoadCondRegReg
    )
}

/// `mov d, s; <uses of d>` -> rewrite every use of `d` up to a barrier or
/// `d`'s next definition to read `s` instead, dropping the copy. Limited to
/// full 64-bit register copies, where `d` and `s` are bit-identical, so
/// substitution can never change a narrower consumer's view of the value.
struct CoalesceCopyInstruction;
impl PeepholeRule for CoalesceCopyInstruction {
    fn name(&self) -> &'static str {
        "coalesce_copy_instruction"
    }
    fn try_rewrite(&self, view: &mut View, query: &dyn ConformanceQuery, _conv: CallConvKind) -> bool {
        let Some(r0) = view.current() else { return false };
        let inst0 = *view.instr(r0);
        if inst0.opcode != MicroOpcode::LoadRegReg {
            return false;
        }
        let ops0 = view.operands(inst0.operands);
        let d = ops0[0].unwrap_reg();
        let s = ops0[1].unwrap_reg();
        let width0 = ops0[2].unwrap_width();
        if width0 != MicroOpBits::B64 || d == s {
            return false;
        }

        let idx0 = match view.order_index_of(r0) {
            Some(i) => i,
            None => return false,
        };

        let mut use_sites: Vec<(crate::arena::Ref<MicroInstr>, Vec<MicroInstrOperand>)> = Vec::new();
        let mut idx = idx0 + 1;
        loop {
            let Some(r) = view.nth_order(idx) else { break };
            let inst = *view.instr(r);
            if inst.is_erased() {
                idx += 1;
                continue;
            }
            if oracle::is_local_dataflow_barrier(inst.opcode) {
                break;
            }
            let ops = view.operands(inst.operands);
            let writes_d_in_place = is_def_use_dst(inst.opcode) && ops.first().and_then(|o| o.as_reg()) == Some(d);
            if writes_d_in_place {
                // `d`'s old value (== s) is itself consumed here; out of
                // scope for a pure rename, so this copy cannot be dropped.
                return false;
            }
            if uses(inst.opcode, &ops, d) {
                use_sites.push((r, ops.clone()));
            }
            if defines(inst.opcode, &ops, d) {
                break;
            }
            if defines(inst.opcode, &ops, s) {
                return false;
            }
            idx += 1;
        }

        if use_sites.is_empty() {
            return false;
        }

        let mut rewritten = Vec::with_capacity(use_sites.len());
        for (r, mut ops) in use_sites {
            let inst = *view.instr(r);
            for o in ops.iter_mut() {
                if o.as_reg() == Some(d) {
                    *o = Operand::Reg(s);
                }
            }
            let probe = MicroInstr {
                opcode: inst.opcode,
                emit_flags: crate::ir::EmitFlags::EMIT_CAN_ENCODE,
                operands: crate::arena::Span::default(),
                debug_info: None,
                erased: false,
            };
            if oracle::violates_encoder_conformance(query, &probe, &ops) {
                return false;
            }
            rewritten.push((r, ops));
        }

        for (r, ops) in rewritten {
            let span = view.push_operands(&ops);
            view.instr_mut(r).operands = span;
        }
        view.erase_current();
        true
    }
}

fn default_rules() -> Vec<Box<dyn PeepholeRule>> {
    vec![
        Box::new(FoldCopyAddIntoLea),
        Box::new(FoldLoadAddrIntoNextMemOffset),
        Box::new(FoldLoadImmIntoNext),
        Box::new(FoldAdjacentMemImm32Stores),
        Box::new(MergeRspAdjustmentsAtStart),
        Box::new(ForwardCopyIntoNextBinarySource),
        Box::new(ForwardCopyIntoNextCompareSource),
        Box::new(FoldCopyOpCopyBack),
        Box::new(FoldCopyUnaryCopyBack),
        Box::new(FoldCopyBackWithPreviousOp),
        Box::new(CoalesceCopyInstruction),
        Box::new(RemoveOverwrittenCopy),
        Box::new(RemoveNoOps),
    ]
}

/// Run every rule once over the whole stream, returning whether anything
/// changed.
pub fn run_once(view: &mut View, query: &dyn ConformanceQuery, conv: CallConvKind) -> bool {
    let rules = default_rules();
    let mut changed = false;
    view.reset();
    while let Some(_r) = view.next() {
        for rule in &rules {
            if rule.try_rewrite(view, query, conv) {
                changed = true;
                break;
            }
        }
    }
    changed
}

/// Run [`run_once`] to fixed point, bounded by `max_iterations`.
pub fn run_to_fixed_point(view: &mut View, query: &dyn ConformanceQuery, conv: CallConvKind, max_iterations: u32) -> bool {
    let mut any_changed = false;
    for _ in 0..max_iterations {
        if !run_once(view, query, conv) {
            return any_changed;
        }
        any_changed = true;
    }
    any_changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::StorageArena;
    use crate::builder::MicroIrBuilder;
    use crate::encoder::{EncodeResult, Encoder};
    use crate::ir::MicroInstr as Inst;
    use crate::reg::gpr;
    use crate::settings::CodegenFlags;
    use crate::symbol::SymbolTable;

    struct AlwaysLegal;
    impl ConformanceQuery for AlwaysLegal {
        fn query_conformance_issue(&self, _inst: &Inst, _ops: &[MicroInstrOperand]) -> EncodeResult {
            EncodeResult::Zero
        }
    }

    const CONV: CallConvKind = CallConvKind::SystemV;

    #[test]
    fn removes_self_copy() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RAX, gpr::RAX, MicroOpBits::B64);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
    }

    #[test]
    fn folds_copy_then_add_into_lea() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RAX, gpr::RBX, MicroOpBits::B64);
        b.op_binary_reg_imm(gpr::RAX, MicroOp::Add, MicroOpBits::B64, 8);
        b.ret();
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        assert_eq!(view.instr(r).opcode, MicroOpcode::LoadAddrRegMem);
    }

    #[test]
    fn does_not_fold_copy_then_add_into_lea_when_flags_are_live() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RAX, gpr::RBX, MicroOpBits::B64);
        b.op_binary_reg_imm(gpr::RAX, MicroOp::Add, MicroOpBits::B64, 8);
        b.set_cond_reg(gpr::RCX, crate::ir::MicroCond::Eq);
        b.ret();
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        view.reset();
        let r0 = view.next().unwrap();
        assert!(!FoldCopyAddIntoLea.try_rewrite(&mut view, &AlwaysLegal, CONV));
        assert_eq!(view.instr(r0).opcode, MicroOpcode::LoadRegReg);
    }

    #[test]
    fn folds_loadaddr_into_next_mem_offset() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_addr_reg_mem(gpr::RAX, gpr::RBX, MicroOpBits::B64, 8);
        b.load_reg_mem(gpr::RCX, gpr::RAX, MicroOpBits::B64, 4);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        assert_eq!(view.instr(r).opcode, MicroOpcode::LoadRegMem);
        let ops = view.operands(view.instr(r).operands);
        assert_eq!(ops[1].unwrap_reg(), gpr::RBX);
        assert_eq!(ops[3].unwrap_i32(), 12);
    }

    #[test]
    fn folds_adjacent_memimm32_stores() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_mem_imm(gpr::RBP, MicroOpBits::B32, -16, 5);
        b.load_mem_imm(gpr::RBP, MicroOpBits::B32, -12, 0);
        b.ret();
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        let ops = view.operands(view.instr(r).operands);
        assert_eq!(ops[1].unwrap_width(), MicroOpBits::B64);
        assert_eq!(ops[3].unwrap_i32(), 5);
    }

    #[test]
    fn does_not_fold_adjacent_memimm32_stores_when_unrepresentable() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_mem_imm(gpr::RBP, MicroOpBits::B32, -16, 5);
        b.load_mem_imm(gpr::RBP, MicroOpBits::B32, -12, 7);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        view.reset();
        let _r0 = view.next().unwrap();
        assert!(!FoldAdjacentMemImm32Stores.try_rewrite(&mut view, &AlwaysLegal, CONV));
    }

    #[test]
    fn merges_rsp_adjustments_at_start() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.op_binary_reg_imm(gpr::RSP, MicroOp::Sub, MicroOpBits::B64, 16);
        b.op_binary_reg_imm(gpr::RSP, MicroOp::Sub, MicroOpBits::B64, 16);
        b.ret();
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        let ops = view.operands(view.instr(r).operands);
        assert_eq!(ops[3].unwrap_i32(), 32);
    }

    #[test]
    fn forwards_copy_into_binary_source() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RCX, gpr::RBX, MicroOpBits::B64);
        b.op_binary_reg_reg(gpr::RAX, gpr::RCX, MicroOp::Add, MicroOpBits::B64);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        assert_eq!(view.instr(r).opcode, MicroOpcode::OpBinaryRegReg);
        let ops = view.operands(view.instr(r).operands);
        assert_eq!(ops[1].unwrap_reg(), gpr::RBX);
    }

    #[test]
    fn forwards_copy_into_compare_source() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RCX, gpr::RBX, MicroOpBits::B64);
        b.cmp_reg_reg(gpr::RAX, gpr::RCX, MicroOpBits::B64);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        assert_eq!(view.instr(r).opcode, MicroOpcode::CmpRegReg);
        let ops = view.operands(view.instr(r).operands);
        assert_eq!(ops[1].unwrap_reg(), gpr::RBX);
    }

    #[test]
    fn folds_copy_op_copy_back() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RCX, gpr::RBX, MicroOpBits::B64);
        b.op_binary_reg_imm(gpr::RCX, MicroOp::Add, MicroOpBits::B64, 4);
        b.load_reg_reg(gpr::RBX, gpr::RCX, MicroOpBits::B64);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        assert_eq!(view.instr(r).opcode, MicroOpcode::OpBinaryRegImm);
        let ops = view.operands(view.instr(r).operands);
        assert_eq!(ops[0].unwrap_reg(), gpr::RBX);
    }

    #[test]
    fn folds_copy_unary_copy_back() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RCX, gpr::RBX, MicroOpBits::B64);
        b.op_unary(gpr::RCX, MicroOp::Neg, MicroOpBits::B64);
        b.load_reg_reg(gpr::RBX, gpr::RCX, MicroOpBits::B64);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r = view.next().unwrap();
        assert_eq!(view.instr(r).opcode, MicroOpcode::OpUnary);
        let ops = view.operands(view.instr(r).operands);
        assert_eq!(ops[0].unwrap_reg(), gpr::RBX);
    }

    #[test]
    fn folds_copy_back_with_previous_op() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RCX, gpr::RBX, MicroOpBits::B64);
        b.op_binary_reg_imm(gpr::RCX, MicroOp::Add, MicroOpBits::B64, 4);
        b.load_reg_reg(gpr::RDX, gpr::RSI, MicroOpBits::B64);
        b.load_reg_reg(gpr::RBX, gpr::RCX, MicroOpBits::B64);
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r0 = view.next().unwrap();
        assert_eq!(view.instr(r0).opcode, MicroOpcode::OpBinaryRegImm);
        let ops0 = view.operands(view.instr(r0).operands);
        assert_eq!(ops0[0].unwrap_reg(), gpr::RBX);
        let r1 = view.next().unwrap();
        assert_eq!(view.instr(r1).opcode, MicroOpcode::LoadRegReg);
    }

    #[test]
    fn coalesces_copy_instruction_across_multiple_uses() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.load_reg_reg(gpr::RCX, gpr::RBX, MicroOpBits::B64);
        b.cmp_reg_reg(gpr::RAX, gpr::RCX, MicroOpBits::B64);
        b.op_binary_reg_reg(gpr::RDX, gpr::RCX, MicroOp::Add, MicroOpBits::B64);
        b.ret();
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let changed = run_once(&mut view, &AlwaysLegal, CONV);
        assert!(changed);
        view.reset();
        let r0 = view.next().unwrap();
        let ops0 = view.operands(view.instr(r0).operands);
        assert_eq!(ops0[1].unwrap_reg(), gpr::RBX);
        let r1 = view.next().unwrap();
        let ops1 = view.operands(view.instr(r1).operands);
        assert_eq!(ops1[1].unwrap_reg(), gpr::RBX);
    }

    #[test]
    fn fixed_point_terminates_on_idle_stream() {
        let symbols = SymbolTable::new();
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        b.ret();
        let (instrs, operands) = b.arenas_mut();
        let mut view = View::new(instrs, operands);
        let encoder = Encoder::new(&symbols, 0, 0);
        assert!(!run_to_fixed_point(&mut view, &encoder, CONV, 8));
    }
}
