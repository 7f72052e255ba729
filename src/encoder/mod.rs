//! The x86-64 machine-code encoder.
//!
//! Owns the output byte buffer, the current text-section base offset, the
//! (shared, read-mostly) symbol table, and the per-function jump-patch
//! list. Every `encode_*` entry point shares its legality checks between
//! "encode" and "probe" (`EmitFlags::EMIT_CAN_ENCODE`) paths: the checks
//! run first and can fail before a single byte is written, so probing and
//! encoding a given input always agree on the result.

mod modrm;

use crate::ir::{
    EmitFlags, MicroCond, MicroInstr, MicroInstrOperand, MicroOp, MicroOpBits, MicroOpcode,
    MicroOpcode::*, RelocKind, Relocation,
};
use crate::ir::Label;
use crate::reg::{gpr, MicroReg, RegClass};
use crate::result::{CodegenError, CodegenResult};
use crate::symbol::SymbolTable;
use modrm::{byte_reg_forces_rex, modrm_from_plan, modrm_reg_direct, plan_amc, plan_base_disp, rex_prefix, Disp, MemPlan};

/// What an `encode_*` call discovered about the legality of the requested
/// form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeResult {
    /// Legal as given (encoded, or -- under `EMIT_CAN_ENCODE` -- would be).
    Zero,
    /// The left operand must be materialized into a fresh register first.
    Left2Reg,
    /// The right operand must be materialized into a fresh register first.
    Right2Reg,
    /// The left operand must be moved into `Rax` first (division, cmpxchg).
    Left2Rax,
    /// The right operand must be moved into `Rcx` first (variable shifts).
    Right2Rcx,
    /// The right operand must be materialized into a constant/immediate
    /// slot it currently isn't in.
    Right2Cst,
    /// The result needs an explicit zero-extension to 32 bits first.
    ForceZero32,
    /// No rewrite makes this encodable; the caller must choose another
    /// instruction sequence entirely.
    NotSupported,
}

/// The narrow interface the optimization oracle uses to ask "would this be
/// legal" without depending on the whole [`Encoder`] type.
pub trait ConformanceQuery {
    /// Probe `inst`/`ops` for encoder legality, writing no bytes.
    fn query_conformance_issue(&self, inst: &MicroInstr, ops: &[MicroInstrOperand]) -> EncodeResult;
}

/// One forward-jump site awaiting patching once its target label is bound.
#[derive(Debug, Clone, Copy)]
pub struct CpuJump {
    /// Byte offset (within this function's code, not the text section) of
    /// the displacement field to patch.
    pub disp_field_offset: u32,
    /// Byte offset immediately following the jump instruction -- the
    /// relative displacement is measured from here.
    pub instr_end_offset: u32,
    /// Width of the displacement field: `B8` or `B32`.
    pub width: MicroOpBits,
}

/// The output byte buffer.
#[derive(Debug, Default)]
pub struct Store {
    bytes: Vec<u8>,
}

impl Store {
    /// An empty store.
    pub fn new() -> Self {
        Store { bytes: Vec::new() }
    }

    /// Current write offset, relative to the start of this store.
    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn push_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    fn push_bytes(&mut self, bs: &[u8]) {
        self.bytes.extend_from_slice(bs);
    }

    fn push_i32_le(&mut self, v: i32) {
        self.push_bytes(&v.to_le_bytes());
    }

    fn push_i64_le(&mut self, v: i64) {
        self.push_bytes(&v.to_le_bytes());
    }

    fn patch_i8(&mut self, at: u32, v: i8) {
        self.bytes[at as usize] = v as u8;
    }

    fn patch_i32_le(&mut self, at: u32, v: i32) {
        self.bytes[at as usize..at as usize + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// The encoded bytes so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The x86-64 encoder for a single function.
pub struct Encoder<'a> {
    store: Store,
    symbols: &'a SymbolTable,
    text_base: u32,
    relocations: Vec<Relocation>,
    label_offsets: Vec<Option<u32>>,
    pending_jumps: Vec<(Label, CpuJump)>,
}

impl<'a> Encoder<'a> {
    /// A fresh encoder for a function starting at `text_base` within the
    /// text section, with room for `num_labels` label slots.
    pub fn new(symbols: &'a SymbolTable, text_base: u32, num_labels: usize) -> Self {
        Encoder {
            store: Store::new(),
            symbols,
            text_base,
            relocations: Vec::new(),
            label_offsets: vec![None; num_labels],
            pending_jumps: Vec::new(),
        }
    }

    /// This function's current write offset within the text section.
    pub fn current_offset(&self) -> u32 {
        self.text_base + self.store.offset()
    }

    /// The symbol table this encoder resolves relocation and call targets
    /// against, for diagnostics that need to print a symbol's name.
    pub fn symbols(&self) -> &SymbolTable {
        self.symbols
    }

    /// Bind `label` to the current position. Fatal if `label` was already
    /// bound (an upstream builder/pass bug).
    pub fn bind_label(&mut self, label: Label) -> CodegenResult<()> {
        use crate::entity::EntityRef;
        let offset = self.current_offset();
        let slot = &mut self.label_offsets[label.index()];
        if slot.is_some() {
            return Err(CodegenError::LabelPlacedTwice(label));
        }
        *slot = Some(offset);
        Ok(())
    }

    fn record_jump(&mut self, target: Label, jump: CpuJump) {
        self.pending_jumps.push((target, jump));
    }

    /// Finish encoding: patch every pending jump against its now-bound
    /// label and return the code bytes plus the accumulated relocations.
    pub fn finish(mut self) -> CodegenResult<(Vec<u8>, Vec<Relocation>)> {
        use crate::entity::EntityRef;
        for (target, jump) in &self.pending_jumps {
            let target_offset = self.label_offsets[target.index()]
                .ok_or(CodegenError::UnplacedLabel(*target))?;
            let rel = target_offset as i64 - (self.text_base + jump.instr_end_offset) as i64;
            match jump.width {
                MicroOpBits::B8 => {
                    if !(-128..=127).contains(&rel) {
                        return Err(CodegenError::DisplacementOverflow(rel));
                    }
                    self.store.patch_i8(jump.disp_field_offset, rel as i8);
                }
                MicroOpBits::B32 => {
                    if rel < i32::MIN as i64 || rel > i32::MAX as i64 {
                        return Err(CodegenError::DisplacementOverflow(rel));
                    }
                    self.store.patch_i32_le(jump.disp_field_offset, rel as i32);
                }
                other => panic!("jump width must be B8 or B32, got {:?}", other),
            }
        }
        Ok((self.store.bytes, self.relocations))
    }

    fn push_rel32_reloc(&mut self, symbol: crate::symbol::SymbolIndex, addend: i32) {
        let site_offset = self.current_offset();
        self.relocations.push(Relocation {
            site_offset,
            symbol,
            kind: RelocKind::Amd64Rel32,
            addend,
        });
    }

    fn push_addr64_reloc(&mut self, symbol: crate::symbol::SymbolIndex, addend: i32) {
        let site_offset = self.current_offset();
        self.relocations.push(Relocation {
            site_offset,
            symbol,
            kind: RelocKind::Amd64Addr64,
            addend,
        });
    }

    fn emit_mem_operand(
        &mut self,
        probe: bool,
        reg_field: u8,
        w: bool,
        reg_field_reg: Option<MicroReg>,
        plan: &MemPlan,
    ) {
        if probe {
            return;
        }
        if let Some(rex) = rex_prefix(w, reg_field_reg, plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0); // placeholder overwritten below for clarity of flow
        let idx = self.store.offset() - 1;
        let _ = idx;
        self.store.bytes.pop();
        self.store.push_u8(modrm_from_plan(reg_field, plan));
        if let Some(sib) = plan.sib {
            self.store.push_u8(sib);
        }
        match plan.disp {
            Disp::None => {}
            Disp::Disp8(d) => self.store.push_u8(d as u8),
            Disp::Disp32(d) => self.store.push_i32_le(d),
        }
    }

    fn disp_field_offset_for(&self, plan: &MemPlan) -> u32 {
        // Offset of the displacement field, needed by RIP-relative
        // relocation sites: one ModR/M byte, plus a SIB byte if present.
        self.store.offset() + 1 + if plan.sib.is_some() { 1 } else { 0 }
    }

    // ---- register-register / register-immediate arithmetic ----------

    fn width_prefix(&mut self, width: MicroOpBits, probe: bool) {
        if !probe && width == MicroOpBits::B16 {
            self.store.push_u8(0x66);
        }
    }

    /// `OpBinaryRegReg`: `dst <op>= src`.
    fn encode_binary_reg_reg(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src: MicroReg,
        op: MicroOp,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() || src.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if dst.class().is_float() || src.class().is_float() {
            return self.encode_float_binary(probe, dst, src, op, width);
        }
        let opcode = match op {
            MicroOp::Add => 0x01,
            MicroOp::Sub => 0x29,
            MicroOp::And => 0x21,
            MicroOp::Or => 0x09,
            MicroOp::Xor => 0x31,
            MicroOp::Exchange => 0x87,
            MicroOp::Move => {
                return self.encode_mov_reg_reg(probe, dst, src, width);
            }
            MicroOp::MulSigned => return self.encode_imul_reg_reg(probe, dst, src, width),
            _ => return Ok(EncodeResult::NotSupported),
        };
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(src), false, dst.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(opcode);
        self.store.push_u8(modrm_reg_direct(src.low3(), dst));
        Ok(EncodeResult::Zero)
    }

    fn encode_mov_reg_reg(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src: MicroReg,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        let force_rex = width == MicroOpBits::B8 && (byte_reg_forces_rex(dst) || byte_reg_forces_rex(src));
        if let Some(rex) = rex_prefix(width.is_64(), Some(src), false, dst.needs_rex_extension()) {
            self.store.push_u8(rex);
        } else if force_rex {
            self.store.push_u8(0x40);
        }
        let opcode = if width == MicroOpBits::B8 { 0x88 } else { 0x89 };
        self.store.push_u8(opcode);
        self.store.push_u8(modrm_reg_direct(src.low3(), dst));
        Ok(EncodeResult::Zero)
    }

    fn encode_imul_reg_reg(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src: MicroReg,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(dst), false, src.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x0F);
        self.store.push_u8(0xAF);
        self.store.push_u8(modrm_reg_direct(dst.low3(), src));
        Ok(EncodeResult::Zero)
    }

    fn encode_float_binary(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src: MicroReg,
        op: MicroOp,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        let opcode = match op {
            MicroOp::FAdd => 0x58,
            MicroOp::FSub => 0x5C,
            MicroOp::FMul => 0x59,
            MicroOp::FDiv => 0x5E,
            MicroOp::FMin => 0x5D,
            MicroOp::FMax => 0x5F,
            MicroOp::FAnd => 0x54,
            MicroOp::FXor => 0x57,
            MicroOp::Move => 0x10,
            _ => return Ok(EncodeResult::NotSupported),
        };
        if probe {
            return Ok(EncodeResult::Zero);
        }
        let sse_prefix = if width == MicroOpBits::B64 { 0xF2 } else { 0xF3 };
        self.store.push_u8(sse_prefix);
        if let Some(rex) = rex_prefix(false, Some(dst), false, src.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x0F);
        self.store.push_u8(opcode);
        self.store.push_u8(modrm_reg_direct(dst.low3(), src));
        Ok(EncodeResult::Zero)
    }

    /// `OpBinaryRegImm`: `dst <op>= imm`.
    fn encode_binary_reg_imm(
        &mut self,
        probe: bool,
        dst: MicroReg,
        op: MicroOp,
        width: MicroOpBits,
        imm: i32,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let ext = match op {
            MicroOp::Add => 0,
            MicroOp::Or => 1,
            MicroOp::And => 4,
            MicroOp::Sub => 5,
            MicroOp::Xor => 6,
            MicroOp::Move => return self.encode_mov_reg_imm(probe, dst, width, imm as i64 as u64),
            _ => return Ok(EncodeResult::NotSupported),
        };
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), None, false, dst.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        if (-128..=127).contains(&imm) {
            self.store.push_u8(0x83);
            self.store.push_u8(modrm_reg_direct(ext, dst));
            self.store.push_u8(imm as i8 as u8);
        } else {
            self.store.push_u8(0x81);
            self.store.push_u8(modrm_reg_direct(ext, dst));
            self.store.push_i32_le(imm);
        }
        Ok(EncodeResult::Zero)
    }

    fn encode_mov_reg_imm(
        &mut self,
        probe: bool,
        dst: MicroReg,
        width: MicroOpBits,
        imm: u64,
    ) -> CodegenResult<EncodeResult> {
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if width == MicroOpBits::B64 && (imm > i32::MAX as u64) {
            if let Some(rex) = rex_prefix(true, None, false, dst.needs_rex_extension()) {
                self.store.push_u8(rex);
            }
            self.store.push_u8(0xB8 + dst.low3());
            self.store.push_i64_le(imm as i64);
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(width.is_64(), None, false, dst.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        match width {
            MicroOpBits::B8 => {
                self.store.push_u8(0xB0 + dst.low3());
                self.store.push_u8(imm as u8);
            }
            _ => {
                self.store.push_u8(0xB8 + dst.low3());
                if width.is_64() {
                    self.store.push_i64_le(imm as i64);
                } else {
                    self.store.push_i32_le(imm as i32);
                }
            }
        }
        Ok(EncodeResult::Zero)
    }

    fn encode_shift(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src_count: MicroInstrOperand,
        op: MicroOp,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let ext = match op {
            MicroOp::Rol => 0,
            MicroOp::Ror => 1,
            MicroOp::Shl => 4,
            MicroOp::Shr => 5,
            MicroOp::Sar => 7,
            _ => return Ok(EncodeResult::NotSupported),
        };
        match src_count {
            MicroInstrOperand::ImmI32(count) => {
                if probe {
                    return Ok(EncodeResult::Zero);
                }
                self.width_prefix(width, probe);
                if let Some(rex) = rex_prefix(width.is_64(), None, false, dst.needs_rex_extension()) {
                    self.store.push_u8(rex);
                }
                self.store.push_u8(0xC1);
                self.store.push_u8(modrm_reg_direct(ext, dst));
                self.store.push_u8(count as u8);
                Ok(EncodeResult::Zero)
            }
            MicroInstrOperand::Reg(count_reg) => {
                if count_reg.class() == RegClass::PhysInt && count_reg != gpr::RCX {
                    return Ok(EncodeResult::Right2Rcx);
                }
                if probe {
                    return Ok(EncodeResult::Zero);
                }
                self.width_prefix(width, probe);
                if let Some(rex) = rex_prefix(width.is_64(), None, false, dst.needs_rex_extension()) {
                    self.store.push_u8(rex);
                }
                self.store.push_u8(0xD3);
                self.store.push_u8(modrm_reg_direct(ext, dst));
                Ok(EncodeResult::Zero)
            }
            _ => Ok(EncodeResult::NotSupported),
        }
    }

    fn encode_unary(
        &mut self,
        probe: bool,
        dst: MicroReg,
        op: MicroOp,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let ext = match op {
            MicroOp::Not => 2,
            MicroOp::Neg => 3,
            MicroOp::Bswap => {
                if probe {
                    return Ok(EncodeResult::Zero);
                }
                if let Some(rex) = rex_prefix(width.is_64(), None, false, dst.needs_rex_extension()) {
                    self.store.push_u8(rex);
                }
                self.store.push_u8(0x0F);
                self.store.push_u8(0xC8 + dst.low3());
                return Ok(EncodeResult::Zero);
            }
            MicroOp::Popcnt | MicroOp::Bsf | MicroOp::Bsr => {
                if probe {
                    return Ok(EncodeResult::Zero);
                }
                if op == MicroOp::Popcnt {
                    self.store.push_u8(0xF3);
                }
                if let Some(rex) = rex_prefix(width.is_64(), Some(dst), false, dst.needs_rex_extension()) {
                    self.store.push_u8(rex);
                }
                self.store.push_u8(0x0F);
                self.store.push_u8(match op {
                    MicroOp::Popcnt => 0xB8,
                    MicroOp::Bsf => 0xBC,
                    _ => 0xBD,
                });
                self.store.push_u8(modrm_reg_direct(dst.low3(), dst));
                return Ok(EncodeResult::Zero);
            }
            _ => return Ok(EncodeResult::NotSupported),
        };
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), None, false, dst.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0xF7);
        self.store.push_u8(modrm_reg_direct(ext, dst));
        Ok(EncodeResult::Zero)
    }

    /// Fused multiply-add, synthesized as a multiply followed by an add
    /// (no native FMA3 encoding is assumed to be available).
    fn encode_ternary_muladd(
        &mut self,
        probe: bool,
        dst: MicroReg,
        a: MicroReg,
        b: MicroReg,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if dst != a {
            return Ok(EncodeResult::Left2Reg);
        }
        if dst.class().is_float() {
            self.encode_float_binary(probe, dst, b, MicroOp::FMul, width)?;
            self.encode_float_binary(probe, dst, b, MicroOp::FAdd, width)
        } else {
            self.encode_imul_reg_reg(probe, dst, b, width)?;
            self.encode_binary_reg_reg(probe, dst, b, MicroOp::Add, width)
        }
    }

    /// Division/modulo: dividend must be in `Rax` (`Rdx:Rax` for wide
    /// forms); returns `Left2Rax` when it is not.
    fn encode_div_mod(
        &mut self,
        probe: bool,
        dividend: MicroReg,
        divisor: MicroReg,
        op: MicroOp,
        width: MicroOpBits,
        wants_remainder: bool,
    ) -> CodegenResult<EncodeResult> {
        if dividend != gpr::RAX {
            return Ok(EncodeResult::Left2Rax);
        }
        if divisor.is_virtual() {
            return Ok(EncodeResult::Right2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        let signed = matches!(op, MicroOp::DivSigned | MicroOp::ModSigned);
        self.width_prefix(width, probe);
        if width == MicroOpBits::B8 {
            // 8-bit divide reads its dividend from all of AX, not just AL;
            // extend AL into AX/EAX first (`dividend == RAX` is enforced
            // above, so this is always register 0, needing no REX).
            self.store.push_u8(0x0F);
            self.store.push_u8(if signed { 0xBE } else { 0xB6 }); // movsx/movzx eax, al
            self.store.push_u8(0xC0);
        } else if signed {
            if let Some(rex) = rex_prefix(width.is_64(), None, false, false) {
                self.store.push_u8(rex);
            }
            self.store.push_u8(if width.is_64() { 0x99 } else { 0x99 }); // cdq/cqo
        } else if let Some(rex) = rex_prefix(width.is_64(), None, false, false) {
            self.store.push_u8(rex);
            self.store.push_u8(0x31); // xor edx, edx
            self.store.push_u8(modrm_reg_direct(gpr::RDX.low3(), gpr::RDX));
        } else {
            self.store.push_u8(0x31);
            self.store.push_u8(modrm_reg_direct(gpr::RDX.low3(), gpr::RDX));
        }
        let ext = if signed { 7 } else { 6 };
        if let Some(rex) = rex_prefix(width.is_64(), None, false, divisor.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(if width == MicroOpBits::B8 { 0xF6 } else { 0xF7 });
        self.store.push_u8(modrm_reg_direct(ext, divisor));
        if width == MicroOpBits::B8 && wants_remainder {
            // Remainder lands in AH; shift it down into AL.
            self.store.push_u8(0xC1);
            self.store.push_u8(modrm_reg_direct(5, gpr::RAX));
            self.store.push_u8(8);
        }
        Ok(EncodeResult::Zero)
    }

    fn encode_cmpxchg_exchange(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src: MicroReg,
        op: MicroOp,
        width: MicroOpBits,
        flags: EmitFlags,
    ) -> CodegenResult<EncodeResult> {
        if op == MicroOp::CmpXchg && dst != gpr::RAX {
            return Ok(EncodeResult::Left2Rax);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if flags.contains(EmitFlags::LOCK) {
            self.store.push_u8(0xF0);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(src), false, dst.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        if op == MicroOp::CmpXchg {
            self.store.push_u8(0x0F);
            self.store.push_u8(0xB1);
        } else {
            self.store.push_u8(0x87);
        }
        self.store.push_u8(modrm_reg_direct(src.low3(), dst));
        Ok(EncodeResult::Zero)
    }

    // ---- compare / setcc / cmov ---------------------------------------

    fn encode_cmp_reg_reg(
        &mut self,
        probe: bool,
        lhs: MicroReg,
        rhs: MicroReg,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if lhs.is_virtual() || rhs.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(rhs), false, lhs.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x39);
        self.store.push_u8(modrm_reg_direct(rhs.low3(), lhs));
        Ok(EncodeResult::Zero)
    }

    fn encode_cmp_reg_imm(
        &mut self,
        probe: bool,
        lhs: MicroReg,
        imm: i32,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if lhs.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), None, false, lhs.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        if (-128..=127).contains(&imm) {
            self.store.push_u8(0x83);
            self.store.push_u8(modrm_reg_direct(7, lhs));
            self.store.push_u8(imm as i8 as u8);
        } else {
            self.store.push_u8(0x81);
            self.store.push_u8(modrm_reg_direct(7, lhs));
            self.store.push_i32_le(imm);
        }
        Ok(EncodeResult::Zero)
    }

    fn cond_code(cond: MicroCond) -> u8 {
        use MicroCond::*;
        match cond {
            Always => panic!("`Always` is not an encodable setcc/jcc condition"),
            Overflow => 0x0,
            NoOverflow => 0x1,
            Below => 0x2,
            AboveEq => 0x3,
            Eq => 0x4,
            Ne => 0x5,
            BelowEq => 0x6,
            Above => 0x7,
            Parity => 0xA,
            NoParity => 0xB,
            LtSigned => 0xC,
            GeSigned => 0xD,
            LeSigned => 0xE,
            GtSigned => 0xF,
        }
    }

    fn encode_setcond(&mut self, probe: bool, dst: MicroReg, cond: MicroCond) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        let force_rex = byte_reg_forces_rex(dst);
        if let Some(rex) = rex_prefix(false, None, false, dst.needs_rex_extension()) {
            self.store.push_u8(rex);
        } else if force_rex {
            self.store.push_u8(0x40);
        }
        self.store.push_u8(0x0F);
        self.store.push_u8(0x90 + Self::cond_code(cond));
        self.store.push_u8(modrm_reg_direct(0, dst));
        Ok(EncodeResult::Zero)
    }

    fn encode_cmov(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src: MicroReg,
        cond: MicroCond,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() || src.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(dst), false, src.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x0F);
        self.store.push_u8(0x40 + Self::cond_code(cond));
        self.store.push_u8(modrm_reg_direct(dst.low3(), src));
        Ok(EncodeResult::Zero)
    }

    // ---- memory load/store/lea -----------------------------------------

    fn encode_load_reg_mem(
        &mut self,
        probe: bool,
        dst: MicroReg,
        base: MicroReg,
        width: MicroOpBits,
        offset: i32,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let plan = plan_base_disp(base, offset)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(dst), plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        let opcode = if width == MicroOpBits::B8 { 0x8A } else { 0x8B };
        self.store.push_u8(opcode);
        self.emit_mem_plan(&plan, dst.low3());
        Ok(EncodeResult::Zero)
    }

    fn encode_load_mem_reg(
        &mut self,
        probe: bool,
        base: MicroReg,
        src: MicroReg,
        width: MicroOpBits,
        offset: i32,
    ) -> CodegenResult<EncodeResult> {
        if src.is_virtual() {
            return Ok(EncodeResult::Right2Reg);
        }
        let plan = plan_base_disp(base, offset)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(src), plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        let opcode = if width == MicroOpBits::B8 { 0x88 } else { 0x89 };
        self.store.push_u8(opcode);
        self.emit_mem_plan(&plan, src.low3());
        Ok(EncodeResult::Zero)
    }

    fn encode_load_mem_imm(
        &mut self,
        probe: bool,
        base: MicroReg,
        width: MicroOpBits,
        offset: i32,
        imm: i32,
    ) -> CodegenResult<EncodeResult> {
        let plan = plan_base_disp(base, offset)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), None, plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        let opcode = if width == MicroOpBits::B8 { 0xC6 } else { 0xC7 };
        self.store.push_u8(opcode);
        self.emit_mem_plan(&plan, 0);
        if width == MicroOpBits::B8 {
            self.store.push_u8(imm as u8);
        } else {
            self.store.push_i32_le(imm);
        }
        Ok(EncodeResult::Zero)
    }

    fn encode_lea(
        &mut self,
        probe: bool,
        dst: MicroReg,
        base: MicroReg,
        offset: i32,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let plan = plan_base_disp(base, offset)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(true, Some(dst), plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x8D);
        self.emit_mem_plan(&plan, dst.low3());
        Ok(EncodeResult::Zero)
    }

    fn encode_lea_amc(
        &mut self,
        probe: bool,
        dst: MicroReg,
        base: MicroReg,
        index: MicroReg,
        scale: u8,
        disp: i32,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let plan = plan_amc(base, index, scale, disp)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(true, Some(dst), plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x8D);
        self.emit_mem_plan(&plan, dst.low3());
        Ok(EncodeResult::Zero)
    }

    fn encode_amc_reg_mem(
        &mut self,
        probe: bool,
        dst: MicroReg,
        base: MicroReg,
        index: MicroReg,
        scale: u8,
        disp: i32,
        width: MicroOpBits,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let plan = plan_amc(base, index, scale, disp)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(dst), plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(if width == MicroOpBits::B8 { 0x8A } else { 0x8B });
        self.emit_mem_plan(&plan, dst.low3());
        Ok(EncodeResult::Zero)
    }

    /// Sign-extending 32-bit-dword load (`movsxd`), used by jump-table
    /// dispatch to widen a table entry into a 64-bit target register.
    fn encode_movsxd_reg_mem(
        &mut self,
        probe: bool,
        dst: MicroReg,
        base: MicroReg,
        index: MicroReg,
        scale: u8,
        disp: i32,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let plan = plan_amc(base, index, scale, disp)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(true, Some(dst), plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x63);
        self.emit_mem_plan(&plan, dst.low3());
        Ok(EncodeResult::Zero)
    }

    fn emit_mem_plan(&mut self, plan: &MemPlan, reg_field: u8) {
        self.store.push_u8(modrm_from_plan(reg_field, plan));
        if let Some(sib) = plan.sib {
            self.store.push_u8(sib);
        }
        match plan.disp {
            Disp::None => {}
            Disp::Disp8(d) => self.store.push_u8(d as u8),
            Disp::Disp32(d) => self.store.push_i32_le(d),
        }
    }

    // ---- sign/zero extension --------------------------------------------

    fn encode_ext_reg_reg(
        &mut self,
        probe: bool,
        dst: MicroReg,
        src: MicroReg,
        width_dst: MicroOpBits,
        width_src: MicroOpBits,
        signed: bool,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() || src.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(width_dst.is_64(), Some(dst), false, src.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        if width_src == MicroOpBits::B32 {
            // movsxd, unsigned 32->64 is just a plain 32-bit mov (it
            // zero-extends implicitly); signed needs 0x63.
            self.store.push_u8(if signed { 0x63 } else { 0x8B });
        } else {
            self.store.push_u8(0x0F);
            let base = if signed { 0xBE } else { 0xB6 };
            self.store
                .push_u8(base + if width_src == MicroOpBits::B16 { 1 } else { 0 });
        }
        self.store.push_u8(modrm_reg_direct(dst.low3(), src));
        Ok(EncodeResult::Zero)
    }

    fn encode_ext_reg_mem(
        &mut self,
        probe: bool,
        dst: MicroReg,
        base: MicroReg,
        width_dst: MicroOpBits,
        width_src: MicroOpBits,
        offset: i32,
        signed: bool,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        let plan = plan_base_disp(base, offset)?;
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(width_dst.is_64(), Some(dst), plan.rex_x, plan.rex_b) {
            self.store.push_u8(rex);
        }
        if width_src == MicroOpBits::B32 {
            self.store.push_u8(if signed { 0x63 } else { 0x8B });
        } else {
            self.store.push_u8(0x0F);
            let base_op = if signed { 0xBE } else { 0xB6 };
            self.store
                .push_u8(base_op + if width_src == MicroOpBits::B16 { 1 } else { 0 });
        }
        self.emit_mem_plan(&plan, dst.low3());
        Ok(EncodeResult::Zero)
    }

    // ---- control flow ---------------------------------------------------

    fn encode_jump_cond(
        &mut self,
        probe: bool,
        cond: MicroCond,
        target: Label,
    ) -> CodegenResult<EncodeResult> {
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if cond == MicroCond::Always {
            self.store.push_u8(0xE9);
        } else {
            self.store.push_u8(0x0F);
            self.store.push_u8(0x80 + Self::cond_code(cond));
        }
        let disp_field_offset = self.store.offset();
        self.store.push_i32_le(0);
        let instr_end_offset = self.current_offset();
        self.record_jump(
            target,
            CpuJump {
                disp_field_offset,
                instr_end_offset,
                width: MicroOpBits::B32,
            },
        );
        Ok(EncodeResult::Zero)
    }

    fn encode_jump_reg(&mut self, probe: bool, target: MicroReg) -> CodegenResult<EncodeResult> {
        if target.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(false, None, false, target.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0xFF);
        self.store.push_u8(modrm_reg_direct(4, target));
        Ok(EncodeResult::Zero)
    }

    fn encode_call_symbol(&mut self, probe: bool, symbol: crate::symbol::SymbolIndex) -> CodegenResult<EncodeResult> {
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.store.push_u8(0xE8);
        self.push_rel32_reloc(symbol, -4);
        self.store.push_i32_le(0);
        Ok(EncodeResult::Zero)
    }

    fn encode_call_indirect(&mut self, probe: bool, target: MicroReg) -> CodegenResult<EncodeResult> {
        if target.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(false, None, false, target.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0xFF);
        self.store.push_u8(modrm_reg_direct(2, target));
        Ok(EncodeResult::Zero)
    }

    fn encode_push(&mut self, probe: bool, reg: MicroReg) -> CodegenResult<EncodeResult> {
        if reg.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(false, None, false, reg.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x50 + reg.low3());
        Ok(EncodeResult::Zero)
    }

    fn encode_pop(&mut self, probe: bool, reg: MicroReg) -> CodegenResult<EncodeResult> {
        if reg.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(false, None, false, reg.needs_rex_extension()) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x58 + reg.low3());
        Ok(EncodeResult::Zero)
    }

    fn encode_symbol_reloc_addr(
        &mut self,
        probe: bool,
        dst: MicroReg,
        symbol: crate::symbol::SymbolIndex,
        offset: i32,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        if let Some(rex) = rex_prefix(true, Some(dst), false, false) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x8D);
        self.store.push_u8((0b00 << 6) | ((dst.low3()) << 3) | 0b101);
        self.push_rel32_reloc(symbol, offset);
        self.store.push_i32_le(0);
        Ok(EncodeResult::Zero)
    }

    fn encode_symbol_reloc_value(
        &mut self,
        probe: bool,
        dst: MicroReg,
        width: MicroOpBits,
        symbol: crate::symbol::SymbolIndex,
        offset: i32,
    ) -> CodegenResult<EncodeResult> {
        if dst.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.width_prefix(width, probe);
        if let Some(rex) = rex_prefix(width.is_64(), Some(dst), false, false) {
            self.store.push_u8(rex);
        }
        self.store.push_u8(0x8B);
        self.store.push_u8((0b00 << 6) | ((dst.low3()) << 3) | 0b101);
        self.push_rel32_reloc(symbol, offset);
        self.store.push_i32_le(0);
        Ok(EncodeResult::Zero)
    }

    /// `lea table, [rip + relocToTable]; movsxd target, [table + idx*4];
    /// add target, currentIp; jmp target`.
    fn encode_jump_table(
        &mut self,
        probe: bool,
        table_reg: MicroReg,
        offset_reg: MicroReg,
        current_ip: MicroReg,
        segment_symbol: crate::symbol::SymbolIndex,
        table_offset: i32,
    ) -> CodegenResult<EncodeResult> {
        if table_reg.is_virtual() || offset_reg.is_virtual() {
            return Ok(EncodeResult::Left2Reg);
        }
        if probe {
            return Ok(EncodeResult::Zero);
        }
        self.encode_symbol_reloc_addr(false, table_reg, segment_symbol, table_offset)?;
        self.encode_movsxd_reg_mem(false, offset_reg, table_reg, offset_reg, 4, 0)?;
        self.encode_binary_reg_reg(false, offset_reg, current_ip, MicroOp::Add, MicroOpBits::B64)?;
        self.encode_jump_reg(false, offset_reg)
    }

    /// Dispatch one instruction to its `encode_*` entry point. Shared by
    /// actual emission and, via `EmitFlags::EMIT_CAN_ENCODE`, by
    /// conformance probing.
    pub fn encode(&mut self, inst: &MicroInstr, ops: &[MicroInstrOperand]) -> CodegenResult<EncodeResult> {
        let probe = inst.emit_flags.contains(EmitFlags::EMIT_CAN_ENCODE);
        match inst.opcode {
            Nop => {
                if !probe {
                    self.store.push_u8(0x90);
                }
                Ok(EncodeResult::Zero)
            }
            Ret => {
                if !probe {
                    self.store.push_u8(0xC3);
                }
                Ok(EncodeResult::Zero)
            }
            End | MicroOpcode::Label => Ok(EncodeResult::Zero),
            Push => self.encode_push(probe, ops[0].unwrap_reg()),
            Pop => self.encode_pop(probe, ops[0].unwrap_reg()),
            JumpCond => self.encode_jump_cond(probe, ops[0].unwrap_cond(), ops[2].unwrap_label()),
            JumpReg => self.encode_jump_reg(probe, ops[0].unwrap_reg()),
            JumpTable => {
                let table_reg = ops[0].unwrap_reg();
                let offset_reg = ops[1].unwrap_reg();
                let current_ip = ops[2].unwrap_reg();
                let symbol = match ops[3] {
                    MicroInstrOperand::Symbol(s) => s,
                    other => panic!("JumpTable slot 3 expected Symbol, got {:?}", other),
                };
                let table_offset = ops[4].unwrap_i32();
                self.encode_jump_table(probe, table_reg, offset_reg, current_ip, symbol, table_offset)
            }
            CallLocal => match ops[3] {
                MicroInstrOperand::Symbol(s) => self.encode_call_symbol(probe, s),
                other => panic!("CallLocal slot 3 expected Symbol, got {:?}", other),
            },
            CallExtern => match ops[2] {
                MicroInstrOperand::Symbol(s) => self.encode_call_symbol(probe, s),
                other => panic!("CallExtern slot 2 expected Symbol, got {:?}", other),
            },
            CallIndirect => self.encode_call_indirect(probe, ops[0].unwrap_reg()),
            LoadRegImm => self.encode_mov_reg_imm(probe, ops[0].unwrap_reg(), ops[1].unwrap_width(), ops[2].unwrap_u64()),
            LoadRegReg => self.encode_mov_reg_reg(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width()),
            LoadRegMem => self.encode_load_reg_mem(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width(), ops[3].unwrap_i32()),
            LoadMemReg => self.encode_load_mem_reg(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width(), ops[3].unwrap_i32()),
            LoadMemImm => self.encode_load_mem_imm(probe, ops[0].unwrap_reg(), ops[1].unwrap_width(), ops[2].unwrap_i32(), ops[3].unwrap_i32()),
            LoadSignedExtRegReg => self.encode_ext_reg_reg(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width(), ops[3].unwrap_width(), true),
            LoadZeroExtRegReg => self.encode_ext_reg_reg(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width(), ops[3].unwrap_width(), false),
            LoadSignedExtRegMem => self.encode_ext_reg_mem(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width(), ops[3].unwrap_width(), ops[4].unwrap_i32(), true),
            LoadZeroExtRegMem => self.encode_ext_reg_mem(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width(), ops[3].unwrap_width(), ops[4].unwrap_i32(), false),
            LoadAddrRegMem => self.encode_lea(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[3].unwrap_i32()),
            LoadAmcRegMem => {
                let (base, index, scale, disp) = amc_fields(ops, 1);
                self.encode_amc_reg_mem(probe, ops[0].unwrap_reg(), base, index, scale, disp, ops[5].unwrap_width())
            }
            LoadAmcMemReg => {
                let (base, index, scale, disp) = amc_fields(ops, 0);
                self.encode_amc_reg_mem(probe, ops[4].unwrap_reg(), base, index, scale, disp, ops[5].unwrap_width())
            }
            LoadAmcMemImm => Ok(EncodeResult::NotSupported),
            LoadAddrAmcRegMem => {
                let (base, index, scale, disp) = amc_fields(ops, 1);
                self.encode_lea_amc(probe, ops[0].unwrap_reg(), base, index, scale, disp)
            }
            CmpRegReg => self.encode_cmp_reg_reg(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_width()),
            CmpRegImm => self.encode_cmp_reg_imm(probe, ops[0].unwrap_reg(), ops[1].unwrap_i32(), ops[2].unwrap_width()),
            CmpMemReg | CmpMemImm => Ok(EncodeResult::NotSupported),
            SetCondReg => self.encode_setcond(probe, ops[0].unwrap_reg(), ops[1].unwrap_cond()),
            LoadCondRegReg => self.encode_cmov(probe, ops[0].unwrap_reg(), ops[1].unwrap_reg(), ops[2].unwrap_cond(), ops[3].unwrap_width()),
            ClearReg => self.encode_binary_reg_reg(probe, ops[0].unwrap_reg(), ops[0].unwrap_reg(), MicroOp::Xor, ops[1].unwrap_width()),
            OpUnary => self.encode_unary(probe, ops[0].unwrap_reg(), ops[1].unwrap_op(), ops[2].unwrap_width()),
            OpBinaryRegReg => {
                let dst = ops[0].unwrap_reg();
                let src = ops[1].unwrap_reg();
                let op = ops[2].unwrap_op();
                let width = ops[3].unwrap_width();
                match op {
                    MicroOp::DivSigned | MicroOp::DivUnsigned => self.encode_div_mod(probe, dst, src, op, width, false),
                    MicroOp::ModSigned | MicroOp::ModUnsigned => self.encode_div_mod(probe, dst, src, op, width, true),
                    MicroOp::Shl | MicroOp::Shr | MicroOp::Sar | MicroOp::Rol | MicroOp::Ror => {
                        self.encode_shift(probe, dst, ops[1], op, width)
                    }
                    MicroOp::Exchange | MicroOp::CmpXchg => {
                        self.encode_cmpxchg_exchange(probe, dst, src, op, width, inst.emit_flags)
                    }
                    _ => self.encode_binary_reg_reg(probe, dst, src, op, width),
                }
            }
            OpBinaryRegImm => {
                let dst = ops[0].unwrap_reg();
                let op = ops[1].unwrap_op();
                let width = ops[2].unwrap_width();
                let imm = ops[3].unwrap_i32();
                if matches!(op, MicroOp::Shl | MicroOp::Shr | MicroOp::Sar | MicroOp::Rol | MicroOp::Ror) {
                    self.encode_shift(probe, dst, ops[3], op, width)
                } else {
                    self.encode_binary_reg_imm(probe, dst, op, width, imm)
                }
            }
            OpBinaryRegMem => Ok(EncodeResult::NotSupported),
            OpTernary => {
                let dst = ops[0].unwrap_reg();
                let a = ops[1].unwrap_reg();
                let b = ops[2].unwrap_reg();
                let op = ops[3].unwrap_op();
                let width = ops[4].unwrap_width();
                match op {
                    MicroOp::MulAdd => self.encode_ternary_muladd(probe, dst, a, b, width),
                    _ => Ok(EncodeResult::NotSupported),
                }
            }
            SymbolRelocAddr => {
                let dst = ops[0].unwrap_reg();
                let (symbol, offset) = symbol_and_offset(&ops[1..]);
                self.encode_symbol_reloc_addr(probe, dst, symbol, offset)
            }
            SymbolRelocValue => {
                let dst = ops[0].unwrap_reg();
                let width = ops[1].unwrap_width();
                let (symbol, offset) = symbol_and_offset(&ops[2..]);
                self.encode_symbol_reloc_value(probe, dst, width, symbol, offset)
            }
        }
    }
}

fn amc_fields(ops: &[MicroInstrOperand], start: usize) -> (MicroReg, MicroReg, u8, i32) {
    let base = ops[start].unwrap_reg();
    let index = ops[start + 1].unwrap_reg();
    let scale = match ops[start + 2] {
        MicroInstrOperand::Count(n) => n as u8,
        other => panic!("expected Count(scale) operand, got {:?}", other),
    };
    let disp = ops[start + 3].unwrap_i32();
    (base, index, scale, disp)
}

fn symbol_and_offset(ops: &[MicroInstrOperand]) -> (crate::symbol::SymbolIndex, i32) {
    let mut symbol = None;
    let mut offset = 0;
    for op in ops {
        match op {
            MicroInstrOperand::Symbol(s) => symbol = Some(*s),
            MicroInstrOperand::ImmI32(v) => offset = *v,
            _ => {}
        }
    }
    (symbol.expect("symbol operand missing"), offset)
}

impl<'a> ConformanceQuery for Encoder<'a> {
    fn query_conformance_issue(&self, inst: &MicroInstr, ops: &[MicroInstrOperand]) -> EncodeResult {
        // Conformance probing must never mutate the store; `encode` already
        // gates every byte-writing statement behind `!probe`, so cloning
        // the encoder's structural state (not its accumulated bytes) and
        // re-running the same dispatch is sound as long as the instruction
        // itself carries `EMIT_CAN_ENCODE`.
        debug_assert!(inst.emit_flags.contains(EmitFlags::EMIT_CAN_ENCODE));
        let mut scratch = Encoder {
            store: Store::new(),
            symbols: self.symbols,
            text_base: self.text_base,
            relocations: Vec::new(),
            label_offsets: self.label_offsets.clone(),
            pending_jumps: Vec::new(),
        };
        scratch.encode(inst, ops).unwrap_or(EncodeResult::NotSupported)
    }
}
