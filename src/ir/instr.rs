//! The `MicroInstr` record itself.

use crate::arena::Span;
use crate::ir::{EmitFlags, MicroInstrOperand, MicroOpcode};

/// Optional per-instruction debug info, present only when the builder is
/// configured with [`crate::settings::CodegenFlags::debug_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugInfo {
    /// Opaque reference into the (out-of-scope) source-view table.
    pub source_view: u32,
    /// Opaque reference into the (out-of-scope) token table.
    pub token: u32,
    /// 1-based source line, for diagnostics.
    pub line: u32,
}

/// One micro IR instruction: an opcode, its emit flags, and a span of
/// operand slots living in a parallel arena.
///
/// The instruction itself stores only the span reference (which already
/// carries the operand count, see [`crate::arena::Span::len`]) and an
/// optional debug-info record; it holds no inline operand storage, so it
/// stays a small, fixed-size, `Copy` value regardless of how many operands
/// an opcode needs.
#[derive(Debug, Clone, Copy)]
pub struct MicroInstr {
    /// Which opcode this is.
    pub opcode: MicroOpcode,
    /// Per-instruction emit-flag bits.
    pub emit_flags: EmitFlags,
    /// The instruction's operands, in the parallel operand arena.
    pub operands: Span<MicroInstrOperand>,
    /// Source-location debug info, if enabled.
    pub debug_info: Option<DebugInfo>,
    /// Set by [`crate::view::View::erase_current`] and friends. Erasure is
    /// lazy: the record stays in the arena but is skipped by every
    /// subsequent traversal of a [`crate::view::View`].
    pub(crate) erased: bool,
}

impl MicroInstr {
    /// Number of operand slots this instruction carries.
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Has this instruction been erased by a pass?
    pub fn is_erased(&self) -> bool {
        self.erased
    }
}
