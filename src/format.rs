//! Textual disassembly of a micro IR stream, for `PrintAsm` and tests.
//!
//! A pure formatter over the builder's arenas, with no I/O, plus a thin
//! `Display` wrapper so `println!("{}", builder.display(&encoder))` reads
//! the same way `println!("{}", func)` does for any other IR value.

use std::fmt;

use crate::builder::MicroIrBuilder;
use crate::encoder::Encoder;
use crate::ir::MicroOpcode;

/// How to render a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegPrintMode {
    /// `%rax`, `%vi3`, `%xmm2` -- the class-qualified names `MicroReg`'s own
    /// `Display` impl produces.
    Symbolic,
    /// The register's raw `(class, index)` pair, for debugging register
    /// allocation itself.
    Raw,
}

/// Render every live instruction of `builder` as one line each:
/// `<index>: <opcode> <op0>, <op1>, ...`. Erased instructions are skipped.
/// `encoder` is consulted only to resolve symbol indices to their interned
/// names via [`Encoder::symbols`]; it does not need to have finished
/// encoding.
pub fn format_instructions(builder: &MicroIrBuilder, mode: RegPrintMode, encoder: &Encoder) -> String {
    let mut out = String::new();
    let instrs = builder.instrs();
    let operands = builder.operands();

    for (i, r) in instrs.iter_refs().enumerate() {
        let inst = instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        let ops = operands.collect_span(&inst.operands);

        if inst.opcode == MicroOpcode::Label {
            out.push_str(&format!("{}:\n", ops[0]));
            continue;
        }

        out.push_str(&format!("    {:>4}: {}", i, inst.opcode));
        for (j, op) in ops.iter().enumerate() {
            if j == 0 {
                out.push(' ');
            } else {
                out.push_str(", ");
            }
            write_operand(&mut out, op, mode, encoder);
        }
        out.push('\n');
    }
    out
}

fn write_operand(out: &mut String, op: &crate::ir::MicroInstrOperand, mode: RegPrintMode, encoder: &Encoder) {
    match (op, mode) {
        (crate::ir::MicroInstrOperand::Reg(r), RegPrintMode::Raw) => {
            out.push_str(&format!("{:?}#{}", r.class(), r.index()));
        }
        (crate::ir::MicroInstrOperand::Symbol(sym), _) => {
            let entry = encoder.symbols().get(*sym);
            out.push_str(&format!("{}/*{:?}*/", sym, entry.kind));
        }
        _ => out.push_str(&op.to_string()),
    }
}

/// A `Display` wrapper pairing a builder with the encoder needed to
/// resolve its symbol operands, so it can be used directly in a
/// `println!`/`format!` call.
pub struct Display<'a, 'b> {
    builder: &'a MicroIrBuilder,
    encoder: &'a Encoder<'b>,
    mode: RegPrintMode,
}

impl<'a, 'b> Display<'a, 'b> {
    /// Wrap `builder` for display, resolving symbols against `encoder`.
    pub fn new(builder: &'a MicroIrBuilder, encoder: &'a Encoder<'b>) -> Self {
        Display { builder, encoder, mode: RegPrintMode::Symbolic }
    }

    /// Same, but printing registers by raw `(class, index)` rather than
    /// their symbolic names.
    pub fn with_raw_regs(mut self) -> Self {
        self.mode = RegPrintMode::Raw;
        self
    }
}

impl<'a, 'b> fmt::Display for Display<'a, 'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_instructions(self.builder, self.mode, self.encoder))
    }
}

impl MicroIrBuilder {
    /// A displayable view of this builder's current instruction stream,
    /// resolving symbol operands against `encoder`.
    pub fn display<'a, 'b>(&'a self, encoder: &'a Encoder<'b>) -> Display<'a, 'b> {
        Display::new(self, encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::gpr;
    use crate::settings::CodegenFlags;
    use crate::symbol::SymbolTable;

    #[test]
    fn formats_a_simple_stream() {
        let mut builder = MicroIrBuilder::new(CodegenFlags::system_v());
        let dst = builder.new_virt_int();
        builder.load_reg_imm(dst, crate::ir::MicroOpBits::B64, 7);
        builder.load_reg_reg(gpr::RAX, dst, crate::ir::MicroOpBits::B64);
        builder.ret();

        let symbols = SymbolTable::new();
        let encoder = Encoder::new(&symbols, 0, builder.label_count());
        let text = format_instructions(&builder, RegPrintMode::Symbolic, &encoder);
        assert!(text.contains("LoadRegImm"));
        assert!(text.contains("%vi0"));
        assert!(text.contains("Ret"));
    }
}
