//! Result and error types for the code generator.
//!
//! A [`CodegenError`] is raised only for the internal-invariant-violation and
//! resource-exhaustion error taxa described by the backend's error handling
//! design. Encoder refusals (`EncodeResult`, see [`crate::encoder`]) are a
//! distinct, non-fatal taxon handled entirely within the legalization and
//! peephole passes and never surface as a `CodegenError`.

use crate::ir::Label;
use crate::reg::MicroReg;

/// A fatal error produced while compiling a single function.
///
/// Every variant corresponds to a bug in an upstream pass, not to a
/// malformed but otherwise legal program: by the time lowering has produced
/// a micro IR stream, the program has already been accepted by semantic
/// analysis. Nothing here is retried.
#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// A conditional or unconditional jump referenced a label that was
    /// never placed before the emit pass ran.
    #[fail(display = "unplaced label {:?} reachable at emit time", _0)]
    UnplacedLabel(Label),

    /// A label was placed a second time.
    #[fail(display = "label {:?} placed more than once", _0)]
    LabelPlacedTwice(Label),

    /// A typed builder entry point received the wrong number of operands
    /// for its opcode.
    #[fail(
        display = "opcode {} expects {} operands, got {}",
        opcode, expected, got
    )]
    OperandArityMismatch {
        /// Name of the opcode whose arity was violated.
        opcode: &'static str,
        /// Number of operands the opcode requires.
        expected: usize,
        /// Number of operands actually supplied.
        got: usize,
    },

    /// A virtual register survived register allocation and reached the
    /// emit pass.
    #[fail(display = "virtual register {:?} reached the emit pass", _0)]
    VirtualRegisterAtEmit(MicroReg),

    /// A scaled-index addressing mode used a scale outside {1, 2, 4, 8}.
    #[fail(display = "invalid SIB scale {}", _0)]
    InvalidScale(u8),

    /// A displacement or relocation addend did not fit in a signed 32-bit
    /// field at emit time.
    #[fail(display = "displacement {} overflows 32 bits at emit time", _0)]
    DisplacementOverflow(i64),

    /// The emit pass received an `EncodeResult` other than `Zero` from the
    /// encoder. Reaching this is a bug in legalization: every instruction
    /// must be encoder-legal by the time the emit pass runs.
    #[fail(display = "instruction rejected by encoder at emit time: {}", _0)]
    EncoderRejectedAtEmit(String),

    /// The storage arena or output byte buffer could not grow.
    #[fail(display = "arena exhausted")]
    ArenaExhausted,
}

/// The result of a fallible pass-boundary operation.
pub type CodegenResult<T> = Result<T, CodegenError>;
