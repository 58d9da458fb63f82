//! Core of the Adelie compiler: a single-pass front end for a small
//! imperative language that emits a self-contained, portable C artifact
//! targeting a flat-memory abstract machine.
//!
//! The pass structure is deliberately simple. The [`parser`] drives
//! everything: it pulls tokens from the [`lexer`], resolves names through
//! the two-level [`symbols`] table, and hands each recognized construct
//! straight to the [`emitter`]. There is no intermediate representation;
//! when the parse finishes, the artifact is done.
//!
//! Entry points are [`compile_source`] and [`compile_file`].

// ---------- pipeline ----------
pub mod builtins;
pub mod compiler;
pub mod emitter;
pub mod lexer;
pub mod parser;
pub mod symbols;

// ---------- reporting ----------
pub mod diagnostic;
pub mod error;

pub use compiler::{compile_file, compile_source, Compilation, CompileOptions};
pub use diagnostic::{Diagnostic, ErrorCategory, Severity};
pub use error::CoreError;
pub use symbols::{DataType, ParamDirection};
