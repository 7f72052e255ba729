//! A cursor over a function's micro IR stream.
//!
//! Specialised to a flat instruction arena rather than a per-block layout,
//! since control flow here is expressed purely through `Label`/`JumpCond`
//! instructions and there is no basic-block structure to thread through.

use crate::arena::{Ref, Span, StorageArena};
use crate::ir::{MicroInstr, MicroInstrOperand};

/// Where a [`View`]'s cursor currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Before,
    At(usize),
    After,
}

/// A forward-traversing, mutation-aware cursor over one function's
/// instruction stream.
///
/// Passes may erase the current instruction, the instruction immediately
/// following it, or an instruction already visited; erasing anything
/// farther ahead requires re-acquiring the view (there is no API for it,
/// by construction: [`View::erase_ahead`] only accepts a ref this view has
/// already yielded or is about to yield next).
pub struct View<'f> {
    instrs: &'f mut StorageArena<MicroInstr>,
    operands: &'f mut StorageArena<MicroInstrOperand>,
    order: Vec<Ref<MicroInstr>>,
    pos: Position,
}

impl<'f> View<'f> {
    /// Build a view over the full current contents of the two arenas, in
    /// insertion order.
    pub fn new(
        instrs: &'f mut StorageArena<MicroInstr>,
        operands: &'f mut StorageArena<MicroInstrOperand>,
    ) -> Self {
        let order: Vec<Ref<MicroInstr>> = instrs.iter_refs().collect();
        View {
            instrs,
            operands,
            order,
            pos: Position::Before,
        }
    }

    fn is_live(&self, r: Ref<MicroInstr>) -> bool {
        !self.instrs.get(r).is_erased()
    }

    /// Advance to and return the next non-erased instruction, or `None` at
    /// the end of the stream.
    pub fn next(&mut self) -> Option<Ref<MicroInstr>> {
        let mut idx = match self.pos {
            Position::Before => 0,
            Position::At(i) => i + 1,
            Position::After => return None,
        };
        while idx < self.order.len() {
            let r = self.order[idx];
            if self.is_live(r) {
                self.pos = Position::At(idx);
                return Some(r);
            }
            idx += 1;
        }
        self.pos = Position::After;
        None
    }

    /// Look at the next live instruction without moving the cursor.
    pub fn peek_next(&self) -> Option<Ref<MicroInstr>> {
        let mut idx = match self.pos {
            Position::Before => 0,
            Position::At(i) => i + 1,
            Position::After => return None,
        };
        while idx < self.order.len() {
            let r = self.order[idx];
            if self.is_live(r) {
                return Some(r);
            }
            idx += 1;
        }
        None
    }

    /// The instruction the cursor currently sits at, if any.
    pub fn current(&self) -> Option<Ref<MicroInstr>> {
        match self.pos {
            Position::At(i) => Some(self.order[i]),
            _ => None,
        }
    }

    /// Rewind the cursor to before the first instruction, for a fresh
    /// forward pass over the same view (e.g. the next peephole iteration).
    pub fn reset(&mut self) {
        self.pos = Position::Before;
    }

    /// The `idx`-th instruction in program order (including erased ones),
    /// or `None` past the end. Used by analyses that need to scan forward
    /// from an arbitrary position rather than from the cursor.
    pub fn nth_order(&self, idx: usize) -> Option<Ref<MicroInstr>> {
        self.order.get(idx).copied()
    }

    /// The program-order index of `r` within this view, if it is one of
    /// the instructions this view was built over.
    pub fn order_index_of(&self, r: Ref<MicroInstr>) -> Option<usize> {
        self.order.iter().position(|&o| o == r)
    }

    /// Read an instruction by reference.
    pub fn instr(&self, r: Ref<MicroInstr>) -> &MicroInstr {
        self.instrs.get(r)
    }

    /// Mutably access an instruction by reference (for patching its opcode,
    /// emit flags, or operand span reference; not for erasure -- use
    /// [`View::erase_current`]/[`View::erase_ahead`]).
    pub fn instr_mut(&mut self, r: Ref<MicroInstr>) -> &mut MicroInstr {
        self.instrs.get_mut(r)
    }

    /// Read one operand slot of a span.
    pub fn operand(&self, span: Span<MicroInstrOperand>, index: usize) -> MicroInstrOperand {
        let r = self.operands.span_ref_at(&span, index);
        *self.operands.get(r)
    }

    /// Materialize every operand slot of a span into a `Vec`, in order.
    pub fn operands(&self, span: Span<MicroInstrOperand>) -> Vec<MicroInstrOperand> {
        self.operands.collect_span(&span)
    }

    /// Overwrite one operand slot of a span in place.
    pub fn set_operand(&mut self, span: Span<MicroInstrOperand>, index: usize, value: MicroInstrOperand) {
        let r = self.operands.span_ref_at(&span, index);
        *self.operands.get_mut(r) = value;
    }

    /// Append a fresh span of operands, for rules that synthesize a
    /// replacement instruction with a different operand shape.
    pub fn push_operands(&mut self, ops: &[MicroInstrOperand]) -> Span<MicroInstrOperand> {
        self.operands.push_span(ops)
    }

    /// Mark the instruction the cursor currently sits at as erased.
    pub fn erase_current(&mut self) {
        if let Some(r) = self.current() {
            self.instrs.get_mut(r).erased = true;
        }
    }

    /// Mark `r` as erased. `r` must be the current instruction, the next
    /// live instruction ahead of it, or an instruction already visited;
    /// erasing anything farther ahead without re-acquiring a view would let
    /// a rule silently skip instructions it never looked at.
    pub fn erase_ahead(&mut self, r: Ref<MicroInstr>) {
        debug_assert!(
            self.order.iter().any(|&o| o == r),
            "erase_ahead called with a ref not in this view"
        );
        self.instrs.get_mut(r).erased = true;
    }
}
