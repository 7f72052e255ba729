//! Instruction operand slots.

use crate::ir::{CallConvKind, Ident, Label, MicroCond, MicroOp, MicroOpBits};
use crate::reg::MicroReg;
use crate::symbol::SymbolIndex;
use core::fmt;

/// One operand slot of a [`crate::ir::MicroInstr`].
///
/// Which variant is meaningful at a given position is a pure function of
/// the owning opcode; this type itself does not
/// enforce that -- `MicroIrBuilder`'s typed entry points do, by
/// construction, since each entry point builds exactly the slots its
/// opcode expects.
///
/// Modeled as a tagged sum rather than a raw
/// fixed-size union: Rust's enums give the same compactness here (the
/// largest variant, `ImmU64`, is 8 bytes, so the whole type is 16 bytes
/// with its discriminant) without unsafe reinterpretation at every read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MicroInstrOperand {
    /// An unused positional slot (e.g. `CallLocal`'s reserved third slot).
    None,
    /// A register (physical or, before register allocation, virtual).
    Reg(MicroReg),
    /// A 64-bit immediate, interpreted as unsigned.
    ImmU64(u64),
    /// A 32-bit immediate, interpreted as signed (most memory
    /// displacements and `cmp`/arithmetic immediates fit here).
    ImmI32(i32),
    /// An explicit operand width.
    Width(MicroOpBits),
    /// An integer/parity condition.
    Cond(MicroCond),
    /// A semantic operation code.
    Op(MicroOp),
    /// A calling convention selector (`CallLocal`/`CallExtern`/
    /// `CallIndirect`).
    CallConv(CallConvKind),
    /// A label id, for `Label` and `JumpCond`.
    LabelId(Label),
    /// An interned identifier (callee name, etc.).
    Name(Ident),
    /// A stable symbol-table index (callee target, relocation target).
    Symbol(SymbolIndex),
    /// A count, used by `JumpTable`'s `numEntries`.
    Count(u32),
}

impl MicroInstrOperand {
    /// Unwrap as a register, panicking if this slot holds something else.
    /// Used by opcode-specific accessors once the builder's arity/shape
    /// contract guarantees the slot kind.
    pub fn unwrap_reg(self) -> MicroReg {
        match self {
            MicroInstrOperand::Reg(r) => r,
            other => panic!("expected Reg operand, got {:?}", other),
        }
    }

    /// Unwrap as an explicit width.
    pub fn unwrap_width(self) -> MicroOpBits {
        match self {
            MicroInstrOperand::Width(w) => w,
            other => panic!("expected Width operand, got {:?}", other),
        }
    }

    /// Unwrap as a condition.
    pub fn unwrap_cond(self) -> MicroCond {
        match self {
            MicroInstrOperand::Cond(c) => c,
            other => panic!("expected Cond operand, got {:?}", other),
        }
    }

    /// Unwrap as a semantic operation.
    pub fn unwrap_op(self) -> MicroOp {
        match self {
            MicroInstrOperand::Op(op) => op,
            other => panic!("expected Op operand, got {:?}", other),
        }
    }

    /// Unwrap as a label id.
    pub fn unwrap_label(self) -> Label {
        match self {
            MicroInstrOperand::LabelId(l) => l,
            other => panic!("expected LabelId operand, got {:?}", other),
        }
    }

    /// Unwrap as a 32-bit signed immediate/displacement.
    pub fn unwrap_i32(self) -> i32 {
        match self {
            MicroInstrOperand::ImmI32(v) => v,
            other => panic!("expected ImmI32 operand, got {:?}", other),
        }
    }

    /// Unwrap as a 64-bit unsigned immediate.
    pub fn unwrap_u64(self) -> u64 {
        match self {
            MicroInstrOperand::ImmU64(v) => v,
            other => panic!("expected ImmU64 operand, got {:?}", other),
        }
    }

    /// If this slot is a register, return it.
    pub fn as_reg(self) -> Option<MicroReg> {
        match self {
            MicroInstrOperand::Reg(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for MicroInstrOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MicroInstrOperand::None => write!(f, "_"),
            MicroInstrOperand::Reg(r) => write!(f, "{}", r),
            MicroInstrOperand::ImmU64(v) => write!(f, "{}", v),
            MicroInstrOperand::ImmI32(v) => write!(f, "{}", v),
            MicroInstrOperand::Width(w) => write!(f, "{:?}", w),
            MicroInstrOperand::Cond(c) => write!(f, "{:?}", c),
            MicroInstrOperand::Op(o) => write!(f, "{:?}", o),
            MicroInstrOperand::CallConv(c) => write!(f, "{}", c),
            MicroInstrOperand::LabelId(l) => write!(f, "{}", l),
            MicroInstrOperand::Name(n) => write!(f, "{}", n),
            MicroInstrOperand::Symbol(s) => write!(f, "{}", s),
            MicroInstrOperand::Count(n) => write!(f, "{}", n),
        }
    }
}
