//! x86-64 code-generation backend.
//!
//! This crate implements the hard middle of a compiler: lowering a typed AST
//! into a virtual three-address instruction stream (the *micro IR*), running
//! a small fixed pipeline of passes over it (register allocation, prolog/
//! epilog insertion, legalization, peephole optimization), and encoding the
//! result to x86-64 machine code with full ModR/M, REX, SIB and RIP-relative
//! addressing support.
//!
//! The semantic analyzer, type manager, constant manager, identifier
//! interner, parser, driver and object-file writer are external
//! collaborators and are not implemented here; see [`ast`] and [`symbol`]
//! for the narrow interfaces this crate expects from them.

#![deny(missing_docs)]
#![warn(unused_import_braces)]

#[macro_use]
extern crate failure_derive;

#[macro_use]
pub mod entity;

pub mod arena;
pub mod ast;
pub mod builder;
pub mod context;
pub mod encoder;
pub mod format;
pub mod ir;
pub mod lowering;
pub mod oracle;
pub mod peephole;
pub mod reg;
pub mod result;
pub mod segment;
pub mod settings;
pub mod symbol;
pub mod view;

pub mod passes;

pub use crate::context::{compile_function, CompiledFunction};
pub use crate::result::{CodegenError, CodegenResult};
pub use crate::settings::CodegenFlags;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
