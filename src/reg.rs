//! The packed register model: [`MicroReg`] and the x86-64 physical register
//! tables it is built from.
//!
//! Modeled as a single packed value with a class tag and an index, rather
//! than a generic register-bank/unit pair looked up through a separate
//! register-info table: this backend only ever targets one ISA, so an
//! ISA-agnostic indirection layer buys nothing.

use core::fmt;

/// The class a [`MicroReg`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegClass {
    /// A physical general-purpose register, `Rax`..`R15`.
    PhysInt,
    /// A physical SSE register, `Xmm0`..`Xmm15`.
    PhysFloat,
    /// A virtual integer register, allocated before register allocation.
    VirtInt,
    /// A virtual floating-point register, allocated before register
    /// allocation.
    VirtFloat,
    /// The sentinel "no register" value.
    Invalid,
    /// The instruction pointer, used only as a RIP-relative addressing
    /// base; never a register-allocatable value.
    InstructionPointer,
    /// The sentinel used in AMC operands to mean "no base register".
    NoBase,
}

impl RegClass {
    /// Int <-> int or float <-> float, ignoring physical/virtual.
    pub fn is_same_register_class(self, other: RegClass) -> bool {
        use RegClass::*;
        matches!(
            (self, other),
            (PhysInt, PhysInt)
                | (VirtInt, VirtInt)
                | (PhysInt, VirtInt)
                | (VirtInt, PhysInt)
                | (PhysFloat, PhysFloat)
                | (VirtFloat, VirtFloat)
                | (PhysFloat, VirtFloat)
                | (VirtFloat, PhysFloat)
        )
    }

    /// Is this one of the two virtual classes?
    pub fn is_virtual(self) -> bool {
        matches!(self, RegClass::VirtInt | RegClass::VirtFloat)
    }

    /// Is this one of the two physical classes?
    pub fn is_physical(self) -> bool {
        matches!(self, RegClass::PhysInt | RegClass::PhysFloat)
    }

    /// Is this an integer-family class (physical or virtual)?
    pub fn is_int(self) -> bool {
        matches!(self, RegClass::PhysInt | RegClass::VirtInt)
    }

    /// Is this a float-family class (physical or virtual)?
    pub fn is_float(self) -> bool {
        matches!(self, RegClass::PhysFloat | RegClass::VirtFloat)
    }
}

/// A packed register identifier: a [`RegClass`] tag plus an index.
///
/// Physical integer indices map 1:1 to the x86-64 GPR encoding
/// (`Rax`=0 .. `R15`=15, the real ModR/M.reg numbering, not alphabetical).
/// Physical float indices map to `Xmm0`..`Xmm15`. Equality is bitwise on the
/// packed `(class, index)` pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MicroReg {
    class: RegClass,
    index: u16,
}

impl MicroReg {
    /// Construct a register from its class and index.
    pub const fn new(class: RegClass, index: u16) -> Self {
        MicroReg { class, index }
    }

    /// The sentinel invalid register.
    pub const fn invalid() -> Self {
        MicroReg::new(RegClass::Invalid, 0)
    }

    /// The instruction-pointer pseudo-register (RIP-relative base).
    pub const fn instruction_pointer() -> Self {
        MicroReg::new(RegClass::InstructionPointer, 0)
    }

    /// The sentinel used when an AMC operand has no base register.
    pub const fn no_base() -> Self {
        MicroReg::new(RegClass::NoBase, 0)
    }

    /// A physical GPR by its x86-64 encoding (0..=15).
    pub const fn phys_int(index: u16) -> Self {
        debug_assert!(index <= 15);
        MicroReg::new(RegClass::PhysInt, index)
    }

    /// A physical XMM register by its encoding (0..=15).
    pub const fn phys_float(index: u16) -> Self {
        debug_assert!(index <= 15);
        MicroReg::new(RegClass::PhysFloat, index)
    }

    /// A fresh virtual integer register, numbered by the caller (typically
    /// a per-function counter in [`crate::builder::MicroIrBuilder`]).
    pub const fn virt_int(index: u16) -> Self {
        MicroReg::new(RegClass::VirtInt, index)
    }

    /// A fresh virtual float register, numbered by the caller.
    pub const fn virt_float(index: u16) -> Self {
        MicroReg::new(RegClass::VirtFloat, index)
    }

    /// This register's class.
    pub fn class(self) -> RegClass {
        self.class
    }

    /// This register's index within its class.
    pub fn index(self) -> u16 {
        self.index
    }

    /// Is this a virtual register (must not reach the emit pass)?
    pub fn is_virtual(self) -> bool {
        self.class.is_virtual()
    }

    /// Is this one of the real physical classes (not a sentinel)?
    pub fn is_physical(self) -> bool {
        self.class.is_physical()
    }

    /// Does this register require a REX prefix byte to address (R8-R15,
    /// XMM8-XMM15)?
    pub fn needs_rex_extension(self) -> bool {
        self.is_physical() && self.index >= 8
    }

    /// The 3-bit ModR/M/SIB field encoding for this register (low 3 bits of
    /// the full 4-bit encoding; the 4th bit becomes a REX.R/X/B bit).
    pub fn low3(self) -> u8 {
        (self.index & 0x7) as u8
    }
}

impl fmt::Debug for MicroReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            RegClass::PhysInt => write!(f, "%{}", GPR_NAMES[self.index as usize]),
            RegClass::PhysFloat => write!(f, "%xmm{}", self.index),
            RegClass::VirtInt => write!(f, "%vi{}", self.index),
            RegClass::VirtFloat => write!(f, "%vf{}", self.index),
            RegClass::Invalid => write!(f, "%invalid"),
            RegClass::InstructionPointer => write!(f, "%rip"),
            RegClass::NoBase => write!(f, "%nobase"),
        }
    }
}

impl fmt::Display for MicroReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// GPR names indexed by their x86-64 ModR/M encoding, matching the real
/// (non-alphabetical) hardware numbering: `rax`=0, `rcx`=1, `rdx`=2,
/// `rbx`=3, `rsp`=4, `rbp`=5, `rsi`=6, `rdi`=7, `r8`..`r15`=8..15.
pub const GPR_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

/// Named physical GPR constants, for readability at call sites (legalizer
/// fixed-register requirements, ABI parameter registers, ...).
pub mod gpr {
    use super::MicroReg;

    /// `%rax`
    pub const RAX: MicroReg = MicroReg::phys_int(0);
    /// `%rcx`
    pub const RCX: MicroReg = MicroReg::phys_int(1);
    /// `%rdx`
    pub const RDX: MicroReg = MicroReg::phys_int(2);
    /// `%rbx`
    pub const RBX: MicroReg = MicroReg::phys_int(3);
    /// `%rsp`
    pub const RSP: MicroReg = MicroReg::phys_int(4);
    /// `%rbp`
    pub const RBP: MicroReg = MicroReg::phys_int(5);
    /// `%rsi`
    pub const RSI: MicroReg = MicroReg::phys_int(6);
    /// `%rdi`
    pub const RDI: MicroReg = MicroReg::phys_int(7);
    /// `%r8`
    pub const R8: MicroReg = MicroReg::phys_int(8);
    /// `%r15`
    pub const R15: MicroReg = MicroReg::phys_int(15);
}

/// Which physical GPRs are callee-saved under the configured ABI.
///
/// Both common x86-64 conventions are modeled and selected by
/// [`crate::ir::CallConvKind`] rather than hard-coding one.
pub fn callee_saved(conv: crate::ir::CallConvKind) -> &'static [MicroReg] {
    use crate::ir::CallConvKind::*;
    use gpr::*;
    const WINDOWS_X64: [MicroReg; 8] = [
        RBX,
        RBP,
        RDI,
        RSI,
        MicroReg::phys_int(12),
        MicroReg::phys_int(13),
        MicroReg::phys_int(14),
        R15,
    ];
    const SYSTEM_V: [MicroReg; 6] = [
        RBX,
        RBP,
        MicroReg::phys_int(12),
        MicroReg::phys_int(13),
        MicroReg::phys_int(14),
        R15,
    ];
    match conv {
        WindowsX64 => &WINDOWS_X64,
        SystemV => &SYSTEM_V,
    }
}

/// Integer argument registers in order, under the configured ABI.
pub fn int_arg_regs(conv: crate::ir::CallConvKind) -> &'static [MicroReg] {
    use crate::ir::CallConvKind::*;
    use gpr::*;
    const WINDOWS_X64: [MicroReg; 4] = [RCX, RDX, MicroReg::phys_int(8), MicroReg::phys_int(9)];
    const SYSTEM_V: [MicroReg; 6] = [RDI, RSI, RDX, RCX, MicroReg::phys_int(8), MicroReg::phys_int(9)];
    match conv {
        WindowsX64 => &WINDOWS_X64,
        SystemV => &SYSTEM_V,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_encodings_match_hardware() {
        assert_eq!(gpr::RAX.index(), 0);
        assert_eq!(gpr::RCX.index(), 1);
        assert_eq!(gpr::RDX.index(), 2);
        assert_eq!(gpr::RBX.index(), 3);
        assert_eq!(gpr::RSP.index(), 4);
        assert_eq!(gpr::RBP.index(), 5);
        assert_eq!(gpr::RSI.index(), 6);
        assert_eq!(gpr::RDI.index(), 7);
        assert_eq!(gpr::R15.index(), 15);
    }

    #[test]
    fn needs_rex_extension_boundary() {
        assert!(!gpr::RDI.needs_rex_extension());
        assert!(gpr::R8.needs_rex_extension());
        assert!(MicroReg::phys_float(9).needs_rex_extension());
        assert!(!MicroReg::phys_float(7).needs_rex_extension());
    }

    #[test]
    fn same_register_class() {
        assert!(RegClass::PhysInt.is_same_register_class(RegClass::VirtInt));
        assert!(!RegClass::PhysInt.is_same_register_class(RegClass::PhysFloat));
        assert!(RegClass::PhysFloat.is_same_register_class(RegClass::VirtFloat));
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(format!("{:?}", gpr::RBX), "%rbx");
        assert_eq!(format!("{:?}", MicroReg::phys_float(2)), "%xmm2");
    }
}
