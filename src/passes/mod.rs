//! The fixed pass pipeline driving one function from virtual registers to
//! finished machine code: register allocation, prolog/epilog insertion,
//! legalization, peephole optimization, and emission.
//!
//! Specialised to five fixed passes run in a fixed order, rather than a
//! configurable pass list a target registers into a generic `PassManager`:
//! this backend only has one target and one reasonable pass order for it.

mod emit;
mod legalize;
mod prolog_epilog;
mod regalloc;

pub use emit::EmitOutput;

use crate::arena::{Ref, StorageArena};
use crate::builder::MicroIrBuilder;
use crate::ir::{CallConvKind, DebugInfo, MicroInstr, MicroInstrOperand, MicroOpcode};
use crate::result::CodegenResult;
use crate::symbol::SymbolTable;

/// Shared, per-function state threaded through every pass.
///
/// Borrows the caller's builder and symbol table rather than owning copies:
/// each pass mutates `builder` in place and the context itself never
/// outlives one [`PassManager::run`] call.
pub struct PassContext<'a, 'b> {
    /// The function's micro IR, mutated in place by every pass.
    pub builder: &'a mut MicroIrBuilder,
    /// The calling convention this function was built against.
    pub call_conv: CallConvKind,
    /// The cross-function symbol table, read by the encoder for call and
    /// relocation targets.
    pub symbols: &'b SymbolTable,
    /// This function's starting byte offset within the text section.
    pub text_base: u32,
}

impl<'a, 'b> PassContext<'a, 'b> {
    /// Build a context over `builder`, reading its calling convention from
    /// the flags it was constructed with.
    pub fn new(builder: &'a mut MicroIrBuilder, symbols: &'b SymbolTable, text_base: u32) -> Self {
        let call_conv = builder.flags().call_conv;
        PassContext { builder, call_conv, symbols, text_base }
    }
}

/// Drives the pipeline to completion for one function.
pub struct PassManager;

impl PassManager {
    /// Run register allocation, prolog/epilog insertion, legalization,
    /// peephole optimization (to a fixed point) and emission, in that
    /// order, producing the function's final machine code.
    pub fn run(ctx: &mut PassContext) -> CodegenResult<EmitOutput> {
        let max_peephole_iterations = ctx.builder.flags().max_peephole_iterations;

        let spill_bytes = regalloc::run(ctx)?;
        prolog_epilog::run(ctx, spill_bytes)?;
        legalize::run(ctx)?;

        {
            let (instrs, operands) = ctx.builder.arenas_mut();
            let mut view = crate::view::View::new(instrs, operands);
            let probe = crate::encoder::Encoder::new(ctx.symbols, ctx.text_base, 0);
            crate::peephole::run_to_fixed_point(&mut view, &probe, ctx.call_conv, max_peephole_iterations);
        }

        emit::run(ctx)
    }
}

/// Append one raw instruction directly to an arena pair, bypassing
/// [`MicroIrBuilder`]'s typed entry points. Every pass below rebuilds its
/// function's instruction stream into a fresh arena pair rather than
/// mutating in place, since [`crate::view::View`] supports erasing and
/// rewriting existing instructions but not inserting new ones; this is the
/// primitive each rebuild is made of.
fn push_raw(
    instrs: &mut StorageArena<MicroInstr>,
    operands: &mut StorageArena<MicroInstrOperand>,
    opcode: MicroOpcode,
    flags: crate::ir::EmitFlags,
    ops: &[MicroInstrOperand],
    debug_info: Option<DebugInfo>,
) -> Ref<MicroInstr> {
    let span = operands.push_span(ops);
    instrs.push_back(MicroInstr {
        opcode,
        emit_flags: flags,
        operands: span,
        debug_info,
        erased: false,
    })
}

/// Copy one instruction, verbatim, from one arena pair into another.
fn copy_instr(
    dst_instrs: &mut StorageArena<MicroInstr>,
    dst_operands: &mut StorageArena<MicroInstrOperand>,
    src_operands: &StorageArena<MicroInstrOperand>,
    inst: &MicroInstr,
) -> Ref<MicroInstr> {
    let ops = src_operands.collect_span(&inst.operands);
    push_raw(dst_instrs, dst_operands, inst.opcode, inst.emit_flags, &ops, inst.debug_info)
}
