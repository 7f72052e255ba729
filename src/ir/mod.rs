//! Micro IR data types: opcodes, operands, instructions, labels and
//! relocations.
//!
//! This module fixes the vocabulary `MicroIrBuilder`, the passes
//! and the encoder all share. It does not itself build or
//! mutate a micro IR stream -- see [`crate::builder`] and [`crate::view`].

mod call_conv;
mod instr;
mod label;
mod opcode;
mod operand;
mod relocation;

pub use call_conv::CallConvKind;
pub use instr::{DebugInfo, MicroInstr};
pub use label::Label;
pub use opcode::{EmitFlags, MicroCond, MicroOp, MicroOpBits, MicroOpcode};
pub use operand::MicroInstrOperand;
pub use relocation::{RelocKind, Relocation};

/// A reference to a type recorded by the (out-of-scope) type manager.
///
/// Carries no behavior; it exists purely so lowering has a concrete
/// handle type for "the type of this expression" without depending on the
/// real semantic analyzer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(u32);
entity_impl!(TypeRef, "ty");

/// A reference to a compile-time constant recorded by the (out-of-scope)
/// constant manager.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstRef(u32);
entity_impl!(ConstRef, "const");

/// A reference to an interned identifier (function/variable/field name).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ident(u32);
entity_impl!(Ident, "id");
