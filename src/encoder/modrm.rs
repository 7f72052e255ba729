//! Pure ModR/M, SIB, REX and displacement computation.
//!
//! Kept free of any `Store`/byte-buffer coupling so the same planning code
//! answers both "can this be encoded" (conformance probing) and "encode
//! this", the way the encoder's entry points share their legality checks
//! between the two modes.

use crate::reg::{MicroReg, RegClass};
use crate::result::{CodegenError, CodegenResult};

/// How large a displacement field a memory operand needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disp {
    /// No displacement byte at all.
    None,
    /// One byte, sign-extended.
    Disp8(i8),
    /// Four bytes, little-endian.
    Disp32(i32),
}

/// A fully-resolved plan for a `[base]`, `[base + disp]`, or
/// `[base + index*scale + disp]` memory operand's ModR/M (+ optional SIB)
/// encoding, computed without writing any bytes.
#[derive(Debug, Clone, Copy)]
pub struct MemPlan {
    /// The `mod` field of ModR/M (0, 1, or 2; 3 is register-direct and
    /// never produced here).
    pub mod_bits: u8,
    /// The `rm` field of ModR/M. `4` means "SIB follows"; `5` with
    /// `mod_bits == 0` means RIP-relative.
    pub rm: u8,
    /// The SIB byte, if this operand needs one.
    pub sib: Option<u8>,
    /// The displacement to append after ModR/M (and SIB, if present).
    pub disp: Disp,
    /// REX.X: set when an extended register (R8-R15) is the SIB index.
    pub rex_x: bool,
    /// REX.B: set when an extended register (R8-R15) is the base (or,
    /// absent an index, the sole addressed register).
    pub rex_b: bool,
}

fn encode_scale(scale: u8) -> CodegenResult<u8> {
    match scale {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        other => Err(CodegenError::InvalidScale(other)),
    }
}

/// Plan a `[base + disp]` operand (no scaled index). `base` may be
/// `InstructionPointer` for RIP-relative addressing, in which case `disp`
/// is always emitted as a 32-bit field regardless of its magnitude.
pub fn plan_base_disp(base: MicroReg, disp: i32) -> CodegenResult<MemPlan> {
    if base.class() == RegClass::InstructionPointer {
        return Ok(MemPlan {
            mod_bits: 0,
            rm: 0b101,
            sib: None,
            disp: Disp::Disp32(disp),
            rex_x: false,
            rex_b: false,
        });
    }

    let low3 = base.low3();
    let needs_sib = low3 == 0b100; // Rsp or R12 as base always forces SIB.
    let rbp_like = low3 == 0b101; // Rbp or R13 needs an explicit disp8=0.

    let (mod_bits, disp) = if disp == 0 && !rbp_like {
        (0u8, Disp::None)
    } else if (-0x80..=0x7F).contains(&disp) {
        (1u8, Disp::Disp8(disp as i8))
    } else {
        (2u8, Disp::Disp32(disp))
    };

    if needs_sib {
        // base=100 in SIB means "no index"; scale is irrelevant then.
        let sib = (0b00 << 6) | (0b100 << 3) | low3;
        Ok(MemPlan {
            mod_bits,
            rm: 0b100,
            sib: Some(sib),
            disp,
            rex_x: false,
            rex_b: base.needs_rex_extension(),
        })
    } else {
        Ok(MemPlan {
            mod_bits,
            rm: low3,
            sib: None,
            disp,
            rex_x: false,
            rex_b: base.needs_rex_extension(),
        })
    }
}

/// Plan a `[base + index*scale + disp]` (AMC) operand. `index ==
/// MicroReg::no_base()` means "no index register", equivalent to
/// [`plan_base_disp`]. `scale` must be one of `{1, 2, 4, 8}`.
///
/// Rsp cannot be a SIB index; when the caller asks for `index = Rsp` with
/// `scale == 1` the base and index are swapped (addition is commutative, so
/// `[rsp + rbx*1]` becomes `[rbx + rsp*1]`), matching the rule that surfaces
/// during AMC legalization rather than rejecting the form outright.
pub fn plan_amc(base: MicroReg, index: MicroReg, scale: u8, disp: i32) -> CodegenResult<MemPlan> {
    if index.class() == RegClass::NoBase {
        return plan_base_disp(base, disp);
    }

    let (base, index) = if index.low3() == 0b100 && scale == 1 {
        (index, base)
    } else {
        (base, index)
    };

    if index.low3() == 0b100 {
        // Rsp (or its REX-extended alias) can never be a SIB index, even
        // after the swap above (e.g. both operands are Rsp-numbered).
        return Err(CodegenError::InvalidScale(scale));
    }

    let scale_bits = encode_scale(scale)?;
    let low3 = base.low3();
    let rbp_like = low3 == 0b101;

    let (mod_bits, disp_plan) = if disp == 0 && !rbp_like {
        (0u8, Disp::None)
    } else if (-0x80..=0x7F).contains(&disp) {
        (1u8, Disp::Disp8(disp as i8))
    } else {
        (2u8, Disp::Disp32(disp))
    };

    let sib = (scale_bits << 6) | (index.low3() << 3) | low3;
    Ok(MemPlan {
        mod_bits,
        rm: 0b100,
        sib: Some(sib),
        disp: disp_plan,
        rex_x: index.needs_rex_extension(),
        rex_b: base.needs_rex_extension(),
    })
}

/// Build the ModR/M byte for a register-direct (`mod = 11`) operand.
pub fn modrm_reg_direct(reg_field: u8, rm: MicroReg) -> u8 {
    (0b11 << 6) | ((reg_field & 0x7) << 3) | rm.low3()
}

/// Build the ModR/M byte from a [`MemPlan`] and a `reg`/opcode-extension
/// field.
pub fn modrm_from_plan(reg_field: u8, plan: &MemPlan) -> u8 {
    (plan.mod_bits << 6) | ((reg_field & 0x7) << 3) | plan.rm
}

/// REX prefix byte, or `None` if no REX is needed at all (width isn't
/// 64-bit, no register involved needs bit-4 extension, and no byte-sized
/// register requiring `spl`/`bpl`/`sil`/`dil` forms is touched).
///
/// `reg_field_reg` is the register occupying ModR/M.reg (contributes
/// REX.R); `rex_x`/`rex_b` come from a [`MemPlan`] when the other operand
/// is memory, or from the rm register's own extension bit otherwise.
pub fn rex_prefix(w: bool, reg_field_reg: Option<MicroReg>, rex_x: bool, rex_b: bool) -> Option<u8> {
    let r = reg_field_reg.map_or(false, MicroReg::needs_rex_extension);
    if !w && !r && !rex_x && !rex_b {
        return None;
    }
    let mut byte = 0x40u8;
    if w {
        byte |= 1 << 3;
    }
    if r {
        byte |= 1 << 2;
    }
    if rex_x {
        byte |= 1 << 1;
    }
    if rex_b {
        byte |= 1;
    }
    Some(byte)
}

/// Does this register, used as an 8-bit operand, force a REX prefix to be
/// present even when no other bit is set (selecting `spl`/`bpl`/`sil`/`dil`
/// instead of `ah`/`ch`/`dh`/`bh`)?
pub fn byte_reg_forces_rex(reg: MicroReg) -> bool {
    matches!(reg.index(), 4..=7) && reg.class() == RegClass::PhysInt
}
