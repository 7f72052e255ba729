//! Relocations against the cross-function symbol table.

use crate::symbol::SymbolIndex;

/// Which kind of fixup a relocation site needs from the (out-of-scope)
/// object-file writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelocKind {
    /// A 32-bit RIP-relative displacement (most `call`/`lea` forms).
    Amd64Rel32,
    /// An absolute 64-bit address (`mov r64, imm64` only).
    Amd64Addr64,
}

/// One relocation site recorded during emit.
///
/// `site_offset` is relative to the start of the text section, not the
/// current function, and within one function relocation
/// site offsets are recorded in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Relocation {
    /// Byte offset of the relocation site within the text section.
    pub site_offset: u32,
    /// The symbol this relocation resolves against.
    pub symbol: SymbolIndex,
    /// Whether the fixup is RIP-relative or absolute.
    pub kind: RelocKind,
    /// Constant addend recorded alongside the relocation (e.g. the `+disp`
    /// already baked into a RIP-relative `lea`).
    pub addend: i32,
}
