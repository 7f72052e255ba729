//! The micro IR builder.
//!
//! Converts per-node lowering requests into `MicroInstr` records and their
//! operand spans. Exposes one typed entry point per opcode family; each
//! entry point asserts the operand arity/shape contract for its opcode
//! before committing anything to the arena, the way a buggy call site is
//! caught at construction rather than miles downstream at emit.

use crate::arena::{Ref, StorageArena};
use crate::ir::{
    CallConvKind, DebugInfo, EmitFlags, Ident, Label, MicroCond, MicroInstr, MicroInstrOperand,
    MicroOp, MicroOpBits, MicroOpcode,
};
use crate::reg::MicroReg;
use crate::result::{CodegenError, CodegenResult};
use crate::settings::CodegenFlags;
use crate::symbol::SymbolIndex;
use MicroInstrOperand as Op;

/// A label's placement bookkeeping, owned by the builder rather than by the
/// [`Label`] handle itself.
#[derive(Debug, Clone, Copy)]
struct LabelData {
    placed: bool,
}

/// Builds one function's micro IR stream.
pub struct MicroIrBuilder {
    pub(crate) instrs: StorageArena<MicroInstr>,
    pub(crate) operands: StorageArena<MicroInstrOperand>,
    labels: Vec<LabelData>,
    next_virt_int: u16,
    next_virt_float: u16,
    flags: CodegenFlags,
    current_line: u32,
    current_token: u32,
    current_source_view: u32,
}

impl MicroIrBuilder {
    /// A fresh builder for one function, configured by `flags`.
    pub fn new(flags: CodegenFlags) -> Self {
        MicroIrBuilder {
            instrs: StorageArena::new(),
            operands: StorageArena::new(),
            labels: Vec::new(),
            next_virt_int: 0,
            next_virt_float: 0,
            flags,
            current_line: 0,
            current_token: 0,
            current_source_view: 0,
        }
    }

    /// Set the source-location fields attached to every instruction emitted
    /// from this point on, when `debug_info` is enabled.
    pub fn set_source_location(&mut self, source_view: u32, token: u32, line: u32) {
        self.current_source_view = source_view;
        self.current_token = token;
        self.current_line = line;
    }

    fn debug_info(&self) -> Option<DebugInfo> {
        if self.flags.debug_info {
            Some(DebugInfo {
                source_view: self.current_source_view,
                token: self.current_token,
                line: self.current_line,
            })
        } else {
            None
        }
    }

    /// Allocate a fresh virtual integer register.
    pub fn new_virt_int(&mut self) -> MicroReg {
        let r = MicroReg::virt_int(self.next_virt_int);
        self.next_virt_int += 1;
        r
    }

    /// Allocate a fresh virtual float register.
    pub fn new_virt_float(&mut self) -> MicroReg {
        let r = MicroReg::virt_float(self.next_virt_float);
        self.next_virt_float += 1;
        r
    }

    fn push(&mut self, opcode: MicroOpcode, flags: EmitFlags, ops: &[MicroInstrOperand]) -> Ref<MicroInstr> {
        let operands = self.operands.push_span(ops);
        let debug_info = self.debug_info();
        self.instrs.push_back(MicroInstr {
            opcode,
            emit_flags: flags,
            operands,
            debug_info,
            erased: false,
        })
    }

    // ---- labels ---------------------------------------------------------

    /// Allocate a fresh label id in the unplaced state.
    pub fn create_label(&mut self) -> Label {
        use crate::entity::EntityRef;
        let id = Label::new(self.labels.len());
        self.labels.push(LabelData { placed: false });
        id
    }

    /// Emit a `Label` opcode and bind `id` to this position. Asserts `id`
    /// has not already been placed.
    pub fn place_label(&mut self, id: Label) -> Ref<MicroInstr> {
        use crate::entity::EntityRef;
        let data = &mut self.labels[id.index()];
        debug_assert!(!data.placed, "label placed twice: {:?}", id);
        data.placed = true;
        self.push(MicroOpcode::Label, EmitFlags::NONE, &[Op::LabelId(id)])
    }

    /// Emit a conditional (or, with [`MicroCond::Always`], unconditional)
    /// jump to `id`.
    pub fn jump_to_label(&mut self, cond: MicroCond, width: MicroOpBits, id: Label) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::JumpCond,
            EmitFlags::NONE,
            &[Op::Cond(cond), Op::Width(width), Op::LabelId(id)],
        )
    }

    /// Total number of labels created so far, placed or not. Used by the
    /// emit pass to size the encoder's label-offset table.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Every label that was created but never placed (a builder-level bug
    /// surfaced before the emit pass has to discover it the hard way).
    pub fn unplaced_labels(&self) -> Vec<Label> {
        use crate::entity::EntityRef;
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.placed)
            .map(|(i, _)| Label::new(i))
            .collect()
    }

    // ---- misc control / stack -------------------------------------------

    /// Emit a no-op instruction.
    pub fn nop(&mut self) -> Ref<MicroInstr> {
        self.push(MicroOpcode::Nop, EmitFlags::NONE, &[])
    }

    /// Emit a function return.
    pub fn ret(&mut self) -> Ref<MicroInstr> {
        self.push(MicroOpcode::Ret, EmitFlags::NONE, &[])
    }

    /// Emit the end-of-stream marker.
    pub fn end(&mut self) -> Ref<MicroInstr> {
        self.push(MicroOpcode::End, EmitFlags::NONE, &[])
    }

    /// Emit a push of `reg` onto the stack.
    pub fn push_reg(&mut self, reg: MicroReg) -> Ref<MicroInstr> {
        self.push(MicroOpcode::Push, EmitFlags::NONE, &[Op::Reg(reg)])
    }

    /// Emit a pop from the stack into `reg`.
    pub fn pop_reg(&mut self, reg: MicroReg) -> Ref<MicroInstr> {
        self.push(MicroOpcode::Pop, EmitFlags::NONE, &[Op::Reg(reg)])
    }

    /// Emit an unconditional jump to the address held in `target`.
    pub fn jump_reg(&mut self, target: MicroReg) -> Ref<MicroInstr> {
        self.push(MicroOpcode::JumpReg, EmitFlags::NONE, &[Op::Reg(target)])
    }

    /// `lea table, [rip+tableOffset]; movsxd idx, [table+idx*4]; add idx,
    /// currentIp; jmp idx`, all four addressed against the same segment
    /// symbol. `table_offset` is this table's own byte offset within the
    /// segment, as returned by [`crate::segment::Segment::reserve_jump_table`].
    pub fn jump_table(
        &mut self,
        table_reg: MicroReg,
        offset_reg: MicroReg,
        current_ip: MicroReg,
        segment_symbol: SymbolIndex,
        table_offset: i32,
    ) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::JumpTable,
            EmitFlags::NONE,
            &[
                Op::Reg(table_reg),
                Op::Reg(offset_reg),
                Op::Reg(current_ip),
                Op::Symbol(segment_symbol),
                Op::ImmI32(table_offset),
            ],
        )
    }

    // ---- calls ------------------------------------------------------------

    /// Emit a call to a function defined in this module.
    pub fn call_local(&mut self, name: Ident, conv: CallConvKind, symbol: SymbolIndex) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::CallLocal,
            EmitFlags::NONE,
            &[Op::Name(name), Op::CallConv(conv), Op::None, Op::Symbol(symbol)],
        )
    }

    /// Emit a call to a function defined externally.
    pub fn call_extern(&mut self, name: Ident, conv: CallConvKind, symbol: SymbolIndex) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::CallExtern,
            EmitFlags::NONE,
            &[Op::Name(name), Op::CallConv(conv), Op::Symbol(symbol)],
        )
    }

    /// Emit a call through the address held in `target`.
    pub fn call_indirect(&mut self, target: MicroReg, conv: CallConvKind) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::CallIndirect,
            EmitFlags::NONE,
            &[Op::Reg(target), Op::CallConv(conv)],
        )
    }

    // ---- loads / stores ---------------------------------------------------

    /// Load an immediate value into `dst`.
    pub fn load_reg_imm(&mut self, dst: MicroReg, width: MicroOpBits, imm: u64) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadRegImm, EmitFlags::NONE, &[Op::Reg(dst), Op::Width(width), Op::ImmU64(imm)])
    }

    /// Copy `src` into `dst`.
    pub fn load_reg_reg(&mut self, dst: MicroReg, src: MicroReg, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadRegReg, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(src), Op::Width(width)])
    }

    /// Load from `[base + offset]` into `dst`.
    pub fn load_reg_mem(&mut self, dst: MicroReg, base: MicroReg, width: MicroOpBits, offset: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadRegMem, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(base), Op::Width(width), Op::ImmI32(offset)])
    }

    /// Store `src` into `[base + offset]`.
    pub fn load_mem_reg(&mut self, base: MicroReg, src: MicroReg, width: MicroOpBits, offset: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadMemReg, EmitFlags::NONE, &[Op::Reg(base), Op::Reg(src), Op::Width(width), Op::ImmI32(offset)])
    }

    /// Store an immediate value into `[base + offset]`.
    pub fn load_mem_imm(&mut self, base: MicroReg, width: MicroOpBits, offset: i32, imm: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadMemImm, EmitFlags::NONE, &[Op::Reg(base), Op::Width(width), Op::ImmI32(offset), Op::ImmI32(imm)])
    }

    /// Sign-extend `src` from `width_src` to `width_dst` into `dst`.
    pub fn load_signed_ext_reg_reg(&mut self, dst: MicroReg, src: MicroReg, width_dst: MicroOpBits, width_src: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadSignedExtRegReg, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(src), Op::Width(width_dst), Op::Width(width_src)])
    }

    /// Zero-extend `src` from `width_src` to `width_dst` into `dst`.
    pub fn load_zero_ext_reg_reg(&mut self, dst: MicroReg, src: MicroReg, width_dst: MicroOpBits, width_src: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadZeroExtRegReg, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(src), Op::Width(width_dst), Op::Width(width_src)])
    }

    /// Sign-extend a `width_src` load from `[base + offset]` into `dst` at `width_dst`.
    pub fn load_signed_ext_reg_mem(&mut self, dst: MicroReg, base: MicroReg, width_dst: MicroOpBits, width_src: MicroOpBits, offset: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadSignedExtRegMem, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(base), Op::Width(width_dst), Op::Width(width_src), Op::ImmI32(offset)])
    }

    /// Zero-extend a `width_src` load from `[base + offset]` into `dst` at `width_dst`.
    pub fn load_zero_ext_reg_mem(&mut self, dst: MicroReg, base: MicroReg, width_dst: MicroOpBits, width_src: MicroOpBits, offset: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadZeroExtRegMem, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(base), Op::Width(width_dst), Op::Width(width_src), Op::ImmI32(offset)])
    }

    /// Load the effective address of `[base + offset]` into `dst`.
    pub fn load_addr_reg_mem(&mut self, dst: MicroReg, base: MicroReg, width: MicroOpBits, offset: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadAddrRegMem, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(base), Op::Width(width), Op::ImmI32(offset)])
    }

    /// AMC load into `dst`: `[base + index*scale + disp]`.
    pub fn load_amc_reg_mem(&mut self, dst: MicroReg, base: MicroReg, index: MicroReg, scale: u32, disp: i32, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::LoadAmcRegMem,
            EmitFlags::NONE,
            &[Op::Reg(dst), Op::Reg(base), Op::Reg(index), Op::Count(scale), Op::ImmI32(disp), Op::Width(width)],
        )
    }

    /// AMC store of `src` into `[base + index*scale + disp]`.
    pub fn load_amc_mem_reg(&mut self, base: MicroReg, index: MicroReg, scale: u32, disp: i32, src: MicroReg, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::LoadAmcMemReg,
            EmitFlags::NONE,
            &[Op::Reg(base), Op::Reg(index), Op::Count(scale), Op::ImmI32(disp), Op::Reg(src), Op::Width(width)],
        )
    }

    /// Load the effective address of `[base + index*scale + disp]` into `dst`.
    pub fn load_addr_amc_reg_mem(&mut self, dst: MicroReg, base: MicroReg, index: MicroReg, scale: u32, disp: i32) -> Ref<MicroInstr> {
        self.push(
            MicroOpcode::LoadAddrAmcRegMem,
            EmitFlags::NONE,
            &[Op::Reg(dst), Op::Reg(base), Op::Reg(index), Op::Count(scale), Op::ImmI32(disp)],
        )
    }

    // ---- compare / setcc / cmov --------------------------------------------

    /// Compare `lhs` against `rhs`, setting flags.
    pub fn cmp_reg_reg(&mut self, lhs: MicroReg, rhs: MicroReg, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::CmpRegReg, EmitFlags::NONE, &[Op::Reg(lhs), Op::Reg(rhs), Op::Width(width)])
    }

    /// Compare `lhs` against an immediate value, setting flags.
    pub fn cmp_reg_imm(&mut self, lhs: MicroReg, imm: i32, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::CmpRegImm, EmitFlags::NONE, &[Op::Reg(lhs), Op::ImmI32(imm), Op::Width(width)])
    }

    /// Set `dst` to 0 or 1 based on `cond`.
    pub fn set_cond_reg(&mut self, dst: MicroReg, cond: MicroCond) -> Ref<MicroInstr> {
        self.push(MicroOpcode::SetCondReg, EmitFlags::NONE, &[Op::Reg(dst), Op::Cond(cond)])
    }

    /// Conditionally move `src` into `dst` when `cond` holds.
    pub fn load_cond_reg_reg(&mut self, dst: MicroReg, src: MicroReg, cond: MicroCond, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::LoadCondRegReg, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(src), Op::Cond(cond), Op::Width(width)])
    }

    /// Zero `dst`.
    pub fn clear_reg(&mut self, dst: MicroReg, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::ClearReg, EmitFlags::NONE, &[Op::Reg(dst), Op::Width(width)])
    }

    // ---- arithmetic ---------------------------------------------------------

    /// Apply a unary operation to `dst` in place.
    pub fn op_unary(&mut self, dst: MicroReg, op: MicroOp, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::OpUnary, EmitFlags::NONE, &[Op::Reg(dst), Op::Op(op), Op::Width(width)])
    }

    /// Apply a binary operation `dst = dst op src`.
    pub fn op_binary_reg_reg(&mut self, dst: MicroReg, src: MicroReg, op: MicroOp, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::OpBinaryRegReg, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(src), Op::Op(op), Op::Width(width)])
    }

    /// Like [`Self::op_binary_reg_reg`], with caller-supplied emit flags.
    pub fn op_binary_reg_reg_flagged(&mut self, dst: MicroReg, src: MicroReg, op: MicroOp, width: MicroOpBits, flags: EmitFlags) -> Ref<MicroInstr> {
        self.push(MicroOpcode::OpBinaryRegReg, flags, &[Op::Reg(dst), Op::Reg(src), Op::Op(op), Op::Width(width)])
    }

    /// Apply a binary operation `dst = dst op imm`.
    pub fn op_binary_reg_imm(&mut self, dst: MicroReg, op: MicroOp, width: MicroOpBits, imm: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::OpBinaryRegImm, EmitFlags::NONE, &[Op::Reg(dst), Op::Op(op), Op::Width(width), Op::ImmI32(imm)])
    }

    /// Apply a ternary operation `dst = a op b`.
    pub fn op_ternary(&mut self, dst: MicroReg, a: MicroReg, b: MicroReg, op: MicroOp, width: MicroOpBits) -> Ref<MicroInstr> {
        self.push(MicroOpcode::OpTernary, EmitFlags::NONE, &[Op::Reg(dst), Op::Reg(a), Op::Reg(b), Op::Op(op), Op::Width(width)])
    }

    // ---- symbol references ---------------------------------------------------

    /// Load the relocated address of `symbol` (plus `offset`) into `dst`.
    pub fn symbol_reloc_addr(&mut self, dst: MicroReg, symbol: SymbolIndex, offset: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::SymbolRelocAddr, EmitFlags::NONE, &[Op::Reg(dst), Op::Symbol(symbol), Op::ImmI32(offset)])
    }

    /// Load the relocated value stored at `symbol` (plus `offset`) into `dst`.
    pub fn symbol_reloc_value(&mut self, dst: MicroReg, width: MicroOpBits, symbol: SymbolIndex, offset: i32) -> Ref<MicroInstr> {
        self.push(MicroOpcode::SymbolRelocValue, EmitFlags::NONE, &[Op::Reg(dst), Op::Width(width), Op::Symbol(symbol), Op::ImmI32(offset)])
    }

    // ---- accessors for passes ---------------------------------------------

    /// Borrow both arenas mutably at once, the shape a [`crate::view::View`]
    /// needs.
    pub fn arenas_mut(&mut self) -> (&mut StorageArena<MicroInstr>, &mut StorageArena<MicroInstrOperand>) {
        (&mut self.instrs, &mut self.operands)
    }

    /// Borrow the instruction arena.
    pub fn instrs(&self) -> &StorageArena<MicroInstr> {
        &self.instrs
    }

    /// Borrow the operand arena.
    pub fn operands(&self) -> &StorageArena<MicroInstrOperand> {
        &self.operands
    }

    /// The codegen flags this builder was configured with.
    pub fn flags(&self) -> CodegenFlags {
        self.flags
    }

    /// Fail fast if any label was created but never placed. Called by the
    /// emit pass before it starts walking the stream.
    pub fn check_labels_placed(&self) -> CodegenResult<()> {
        let unplaced = self.unplaced_labels();
        if let Some(l) = unplaced.into_iter().next() {
            return Err(CodegenError::UnplacedLabel(l));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::gpr;

    #[test]
    fn labels_must_be_placed_before_check() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        let l = b.create_label();
        assert!(b.check_labels_placed().is_err());
        b.place_label(l);
        assert!(b.check_labels_placed().is_ok());
    }

    #[test]
    #[should_panic(expected = "label placed twice")]
    fn placing_a_label_twice_panics() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        let l = b.create_label();
        b.place_label(l);
        b.place_label(l);
    }

    #[test]
    fn virtual_registers_are_distinct() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        let a = b.new_virt_int();
        let c = b.new_virt_int();
        assert_ne!(a, c);
    }

    #[test]
    fn pushed_instruction_has_matching_operand_count() {
        let mut b = MicroIrBuilder::new(CodegenFlags::default());
        let r = b.load_reg_imm(gpr::RAX, MicroOpBits::B64, 7);
        let inst = b.instrs().get(r);
        assert_eq!(inst.operand_count(), 3);
        let ops = b.operands().collect_span(&inst.operands);
        assert_eq!(ops[0], Op::Reg(gpr::RAX));
        assert_eq!(ops[2], Op::ImmU64(7));
    }
}
