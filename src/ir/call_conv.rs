//! Calling convention identifiers.

use core::fmt;

/// Which ABI argument/return register assignment and callee-saved set the
/// lowering and register-allocation passes should use.
///
/// Both common x86-64 conventions are modeled rather than hard-coding one,
/// since lowering only ever asks for "the configured ABI".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallConvKind {
    /// Microsoft x64 calling convention: integer args in rcx, rdx, r8, r9;
    /// caller reserves 32 bytes of shadow space; rbx, rbp, rdi, rsi, r12-r15
    /// are callee-saved.
    WindowsX64,
    /// System V AMD64 ABI: integer args in rdi, rsi, rdx, rcx, r8, r9; rbx,
    /// rbp, r12-r15 are callee-saved.
    SystemV,
}

impl fmt::Display for CallConvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallConvKind::WindowsX64 => "windows_x64",
            CallConvKind::SystemV => "system_v",
        })
    }
}
