//! Top-level compilation driver: wires the scanner, identifier table,
//! emitter, and parser together for one source file.

use std::fs;
use std::path::Path;

use crate::builtins;
use crate::diagnostic::{Diagnostic, Reporter};
use crate::emitter::CodeEmitter;
use crate::error::CoreError;
use crate::lexer::Scanner;
use crate::parser::Parser;
use crate::symbols::SymbolTable;

/// Knobs for a single compilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Interleave explanatory comments with the generated code.
    pub annotate: bool,
}

/// Outcome of compiling one source file.
#[derive(Debug)]
pub struct Compilation {
    /// The generated C text; `None` when any error was recorded.
    pub artifact: Option<String>,
    /// Everything reported during the pass, in source order.
    pub diagnostics: Vec<Diagnostic>,
    /// The diagnostics rendered for display, one line each.
    pub messages: Vec<String>,
    pub error_count: usize,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Compile source text in a single pass. `path` is only used to label
/// diagnostics.
pub fn compile_source(path: &str, source: &str, options: CompileOptions) -> Compilation {
    let lines: Vec<String> = source.lines().map(str::to_string).collect();
    let mut reporter = Reporter::new(path, &lines);
    let mut emitter = CodeEmitter::new(options.annotate);
    let mut table = SymbolTable::new();

    // The I/O routines are ordinary procedures in the global scope; their
    // bodies land ahead of any user code.
    builtins::install(&mut table, &mut emitter);

    let scanner = Scanner::new(lines);
    let mut parser = Parser::new(scanner, table, &mut emitter, &mut reporter);
    parser.run();

    let artifact = emitter.commit(reporter.has_errors());
    let messages = reporter.render_all();
    let error_count = reporter.error_count();
    Compilation {
        artifact,
        diagnostics: reporter.into_diagnostics(),
        messages,
        error_count,
    }
}

/// Read and compile a source file.
pub fn compile_file(path: &Path, options: CompileOptions) -> Result<Compilation, CoreError> {
    let source = fs::read_to_string(path).map_err(|source| CoreError::SourceIo {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(compile_source(&path.display().to_string(), &source, options))
}
