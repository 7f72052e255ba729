//! Compilation flags.

use crate::ir::CallConvKind;

/// Flags controlling debug-info emission, peephole iteration bounds, and
/// the calling convention a function is compiled against.
///
/// A small, fixed set of knobs rather than a generic flag builder, since
/// this backend only ever targets one ISA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodegenFlags {
    /// Which ABI to lower calls and prolog/epilog against.
    pub call_conv: CallConvKind,
    /// Attach `{source_view, token, line}` debug info to every instruction
    /// the builder emits.
    pub debug_info: bool,
    /// Upper bound on peephole fixed-point iterations, so a cyclic rule
    /// interaction cannot loop forever.
    pub max_peephole_iterations: u32,
}

impl CodegenFlags {
    /// Flags for the System V AMD64 ABI, debug info off, a conservative
    /// peephole iteration cap.
    pub fn system_v() -> Self {
        CodegenFlags {
            call_conv: CallConvKind::SystemV,
            debug_info: false,
            max_peephole_iterations: 8,
        }
    }

    /// Flags for the Microsoft x64 ABI, debug info off, a conservative
    /// peephole iteration cap.
    pub fn windows_x64() -> Self {
        CodegenFlags {
            call_conv: CallConvKind::WindowsX64,
            debug_info: false,
            max_peephole_iterations: 8,
        }
    }
}

impl Default for CodegenFlags {
    fn default() -> Self {
        Self::system_v()
    }
}
