//! Final machine-code emission: encodes every live instruction in order,
//! resolves labels, and collects relocations.

use super::PassContext;
use crate::encoder::{EncodeResult, Encoder};
use crate::ir::{MicroOpcode, Relocation};
use crate::result::{CodegenError, CodegenResult};

/// The machine code and relocations produced for one function.
#[derive(Debug, Clone)]
pub struct EmitOutput {
    /// Encoded bytes, relative to the function's `text_base`.
    pub bytes: Vec<u8>,
    /// Relocation sites recorded while encoding.
    pub relocations: Vec<Relocation>,
}

/// Encode every non-erased instruction in program order. Every label must
/// already be placed (checked up front) and every register must already
/// be physical (checked per instruction); either failing here is a pass
/// pipeline bug upstream, not a user-facing error.
pub fn run(ctx: &mut PassContext) -> CodegenResult<EmitOutput> {
    ctx.builder.check_labels_placed()?;
    let num_labels = ctx.builder.label_count();
    let mut encoder = Encoder::new(ctx.symbols, ctx.text_base, num_labels);

    let (instrs, operands) = ctx.builder.arenas_mut();
    for r in instrs.iter_refs() {
        let inst = instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        let ops = operands.collect_span(&inst.operands);
        for op in &ops {
            if let crate::ir::MicroInstrOperand::Reg(reg) = op {
                if reg.is_virtual() {
                    return Err(CodegenError::VirtualRegisterAtEmit(*reg));
                }
            }
        }

        if inst.opcode == MicroOpcode::Label {
            encoder.bind_label(ops[0].unwrap_label())?;
            continue;
        }

        let result = encoder.encode(inst, &ops)?;
        if result != EncodeResult::Zero {
            return Err(CodegenError::EncoderRejectedAtEmit(format!(
                "{:?} rejected {:?} at emit time",
                result, inst.opcode
            )));
        }
    }

    let (bytes, relocations) = encoder.finish()?;
    Ok(EmitOutput { bytes, relocations })
}
