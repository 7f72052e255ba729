//! Pure analyses shared by the legalization and peephole passes.
//!
//! Stateless: every function here takes exactly the instruction/operands
//! it needs to answer one question, so both passes (and their tests) can
//! call it without threading a pass context through.

use crate::encoder::{ConformanceQuery, EncodeResult};
use crate::ir::{MicroInstr, MicroInstrOperand, MicroOp, MicroOpBits, MicroOpcode};
use crate::reg::RegClass;

/// Is `inst` a no-op that the emit pass can safely drop, given its
/// (already-read) operand slots?
pub fn is_no_op_encoder_instruction(inst: &MicroInstr, ops: &[MicroInstrOperand]) -> bool {
    match inst.opcode {
        MicroOpcode::Nop => true,

        MicroOpcode::LoadRegReg => {
            let dst = ops[0].as_reg();
            let src = ops[1].as_reg();
            dst.is_some() && dst == src
        }

        MicroOpcode::LoadAddrRegMem => {
            let dst = ops[0].as_reg();
            let base = ops[1].as_reg();
            let offset = ops[3].unwrap_i32();
            dst.is_some()
                && dst == base
                && offset == 0
                && base.map_or(false, |b| b.class() != RegClass::InstructionPointer)
        }

        MicroOpcode::LoadCondRegReg => {
            let dst = ops[0].as_reg();
            let src = ops[1].as_reg();
            let width = ops[3].unwrap_width();
            dst.is_some() && dst == src && width == MicroOpBits::B64
        }

        MicroOpcode::OpBinaryRegReg => {
            let dst = ops[0].as_reg();
            let src = ops[1].as_reg();
            let op = ops[2].unwrap_op();
            op == MicroOp::Exchange && dst.is_some() && dst == src
        }

        MicroOpcode::OpBinaryRegImm => {
            let op = ops[1].unwrap_op();
            let width = ops[2].unwrap_width();
            let imm = ops[3].unwrap_i32() as i64;
            op.is_identity_with(imm, width)
        }

        _ => false,
    }
}

/// Would emitting `inst` with the given operands be rejected by the
/// encoder? Probes via `EMIT_CAN_ENCODE` rather than emitting bytes.
pub fn violates_encoder_conformance(
    query: &dyn ConformanceQuery,
    inst: &MicroInstr,
    ops: &[MicroInstrOperand],
) -> bool {
    !matches!(query.query_conformance_issue(inst, ops), EncodeResult::Zero)
}

/// Is this opcode a barrier across which local dataflow analyses (copy
/// forwarding, dead-flags, dead-register) refuse to reason?
pub fn is_local_dataflow_barrier(opcode: MicroOpcode) -> bool {
    opcode.is_terminator() || opcode.is_call() || opcode == MicroOpcode::Label
}

/// Are `a` and `b` in the same register class family (int-with-int,
/// float-with-float), ignoring physical vs. virtual?
pub fn is_same_register_class(a: RegClass, b: RegClass) -> bool {
    a.is_same_register_class(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::EmitFlags;
    use crate::reg::MicroReg;

    fn instr(opcode: MicroOpcode) -> MicroInstr {
        MicroInstr {
            opcode,
            emit_flags: EmitFlags::NONE,
            operands: crate::arena::Span::default(),
            debug_info: None,
        }
    }

    #[test]
    fn nop_is_always_a_no_op() {
        let inst = instr(MicroOpcode::Nop);
        assert!(is_no_op_encoder_instruction(&inst, &[]));
    }

    #[test]
    fn self_copy_is_a_no_op() {
        let inst = instr(MicroOpcode::LoadRegReg);
        let r = MicroReg::phys_int(0);
        let ops = [MicroInstrOperand::Reg(r), MicroInstrOperand::Reg(r)];
        assert!(is_no_op_encoder_instruction(&inst, &ops));
    }

    #[test]
    fn distinct_registers_copy_is_not_a_no_op() {
        let inst = instr(MicroOpcode::LoadRegReg);
        let ops = [
            MicroInstrOperand::Reg(MicroReg::phys_int(0)),
            MicroInstrOperand::Reg(MicroReg::phys_int(1)),
        ];
        assert!(!is_no_op_encoder_instruction(&inst, &ops));
    }

    #[test]
    fn add_zero_is_an_identity() {
        let inst = instr(MicroOpcode::OpBinaryRegImm);
        let ops = [
            MicroInstrOperand::Reg(MicroReg::phys_int(0)),
            MicroInstrOperand::Op(MicroOp::Add),
            MicroInstrOperand::Width(MicroOpBits::B32),
            MicroInstrOperand::ImmI32(0),
        ];
        assert!(is_no_op_encoder_instruction(&inst, &ops));
    }

    #[test]
    fn barriers() {
        assert!(is_local_dataflow_barrier(MicroOpcode::Label));
        assert!(is_local_dataflow_barrier(MicroOpcode::CallLocal));
        assert!(is_local_dataflow_barrier(MicroOpcode::Ret));
        assert!(!is_local_dataflow_barrier(MicroOpcode::LoadRegReg));
    }
}
