//! The driver-facing facade: lower one function's AST, run it through the
//! pass pipeline, and hand back finished machine code.
//!
//! A function's `Symbol` (name, parameter layout) and its constant/data
//! segment are both supplied by the caller, since both are module-scoped
//! resources shared across every function compiled against the same
//! symbol table -- this module never constructs them itself.

use crate::ast::Stmt;
use crate::builder::MicroIrBuilder;
use crate::lowering::LoweringFrame;
use crate::passes::{EmitOutput, PassContext, PassManager};
use crate::result::CodegenResult;
use crate::segment::Segment;
use crate::settings::CodegenFlags;
use crate::symbol::SymbolTable;

/// The finished output of compiling one function: its machine code, the
/// relocations recorded against it, and the symbol table it was compiled
/// against (handed back so a caller that only has a `&CompiledFunction`
/// can still resolve a relocation's symbol without threading the table
/// through separately).
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    /// Encoded bytes, relative to `text_base`.
    pub bytes: Vec<u8>,
    /// Relocation sites recorded while encoding, relative to the text
    /// section start.
    pub relocations: Vec<crate::ir::Relocation>,
}

/// Lower `body` under `flags`, run the full pass pipeline, and encode it
/// at `text_base`. `symbols` is the module's cross-function symbol table
/// (shared across every function compiled against this module); `segment`
/// is the module's constant/data segment, used to materialize
/// floating-point literals and jump tables this function's body needs.
pub fn compile_function(
    body: &[Stmt],
    flags: CodegenFlags,
    symbols: &SymbolTable,
    segment: &Segment,
    text_base: u32,
) -> CodegenResult<CompiledFunction> {
    let mut builder = MicroIrBuilder::new(flags);

    {
        let mut frame = LoweringFrame::new(&mut builder, segment, symbols);
        frame.lower_function_body(body)?;
    }

    let mut ctx = PassContext::new(&mut builder, symbols, text_base);
    let EmitOutput { bytes, relocations } = PassManager::run(&mut ctx)?;

    Ok(CompiledFunction { bytes, relocations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::entity::EntityRef;
    use crate::ir::{Ident, TypeRef};

    fn int_lit(value: i64) -> Expr {
        Expr::IntLiteral { value, ty: TypeRef::new(0) }
    }

    #[test]
    fn compiles_trivial_return() {
        let symbols = SymbolTable::new();
        let segment = Segment::new(&symbols, Ident::new(0));
        let body = vec![Stmt::Return(Some(int_lit(42)))];

        let compiled = compile_function(&body, CodegenFlags::system_v(), &symbols, &segment, 0).unwrap();
        assert!(!compiled.bytes.is_empty());
        assert!(compiled.relocations.is_empty());
    }

    #[test]
    fn compiles_empty_body() {
        let symbols = SymbolTable::new();
        let segment = Segment::new(&symbols, Ident::new(0));
        let compiled = compile_function(&[], CodegenFlags::system_v(), &symbols, &segment, 0).unwrap();
        assert!(!compiled.bytes.is_empty());
    }
}
