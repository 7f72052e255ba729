//! A minimal typed AST surface for exercising [`crate::lowering`].
//!
//! The parser, semantic analyzer, type manager and constant manager are
//! external collaborators this crate does not implement. This module fixes
//! just enough of a typed node shape to drive and unit-test the lowering
//! rules: a fixture, not a parser, built by hand the way IR test cases are
//! usually constructed rather than by running a frontend over source text.

use crate::ir::{ConstRef, MicroOp, TypeRef};

/// A value-producing expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A folded integer constant of the given type.
    IntLiteral {
        /// The constant's value.
        value: i64,
        /// The literal's static type.
        ty: TypeRef,
    },
    /// A folded floating-point constant of the given type.
    FloatLiteral {
        /// The constant's value.
        value: f64,
        /// The literal's static type.
        ty: TypeRef,
    },
    /// A binary arithmetic or bitwise operation.
    Binary {
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
        /// Which operation.
        op: MicroOp,
        /// The expression's static type.
        ty: TypeRef,
    },
    /// A two-operand relational comparison, producing a boolean-typed value.
    Compare {
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
        /// Which comparison.
        cond: crate::ir::MicroCond,
    },
    /// A three-way compare (`<=>`), producing -1/0/1.
    ThreeWay {
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
        /// The expression's static type.
        ty: TypeRef,
    },
    /// `cond ? if_true : if_false`.
    Conditional {
        /// The boolean-valued condition.
        cond: Box<Expr>,
        /// Value when `cond` is true.
        if_true: Box<Expr>,
        /// Value when `cond` is false.
        if_false: Box<Expr>,
        /// The expression's static type.
        ty: TypeRef,
    },
    /// A direct or indirect call, by callee identifier and argument list.
    Call {
        /// The callee's interned name.
        callee: crate::ir::Ident,
        /// Whether the callee is defined in this module.
        is_local: bool,
        /// Argument expressions, in source order.
        args: Vec<Expr>,
        /// The call's result type.
        ty: TypeRef,
    },
    /// Access to a field of a constant-folded struct, fully resolved by the
    /// constant manager ahead of lowering.
    MemberAccess {
        /// The pre-resolved constant value.
        value: ConstRef,
        /// The field's static type.
        ty: TypeRef,
    },
    /// `lo..hi`, used as the bounds of a for-each lowering.
    Range {
        /// Inclusive lower bound.
        lo: Box<Expr>,
        /// Exclusive upper bound.
        hi: Box<Expr>,
        /// The induction variable's static type.
        ty: TypeRef,
    },
}

/// A statement in a function body.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `if cond { then } else { else_ }`.
    If {
        /// The boolean-valued condition.
        cond: Expr,
        /// Statements executed when `cond` is true.
        then: Vec<Stmt>,
        /// Statements executed when `cond` is false, if any.
        else_: Vec<Stmt>,
    },
    /// `while cond { body }`.
    While {
        /// The boolean-valued loop condition, re-evaluated each iteration.
        cond: Expr,
        /// The loop body.
        body: Vec<Stmt>,
    },
    /// An unconditional loop, exited only via `break` or `return`.
    Loop {
        /// The loop body.
        body: Vec<Stmt>,
    },
    /// A dense integer switch. `cases` pairs a constant with its body;
    /// `default` runs when no case matches (absent when the switch is
    /// statically known to be exhaustive).
    Switch {
        /// The scrutinee.
        scrutinee: Expr,
        /// `(case value, body)` pairs, in source order.
        cases: Vec<(i64, Vec<Stmt>)>,
        /// The default body, if the switch is not exhaustive.
        default: Option<Vec<Stmt>>,
    },
    /// Exit the nearest enclosing loop or switch.
    Break,
    /// Restart the nearest enclosing loop.
    Continue,
    /// Return from the function, optionally with a value.
    Return(Option<Expr>),
    /// Run `body` at every exit path out of the enclosing scope (normal
    /// fall-through, `break`, `continue`, or `return`), in reverse
    /// declaration order relative to other deferred actions in the same
    /// scope.
    Defer {
        /// The deferred statements.
        body: Vec<Stmt>,
    },
    /// An expression evaluated for its side effects; its value is discarded.
    Expr(Expr),
}
