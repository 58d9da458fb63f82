//! Diagnostics for the Adelie compiler.
//!
//! In-language problems are never `Err` values: the reporter records them
//! and the pipeline keeps going, so one run surfaces every independent
//! problem in the file. The host only sees a hard error for things like an
//! unreadable source file (see `error::CoreError`).

use std::fmt;

/// Message class, printed verbatim at the front of each diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// Taxonomy of compile errors. Warnings carry no category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A token matched no expected alternative.
    Syntax,
    /// Duplicate or unknown identifier, or a misplaced `global`.
    Name,
    /// Operand, assignment, or parameter type mismatch.
    Type,
    /// Non-type semantic violation: wrong argument count, missing
    /// array index, and similar.
    Structural,
}

/// One recorded problem, anchored to a 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: Option<ErrorCategory>,
    pub line: u32,
    pub message: String,
}

/// Collects diagnostics for one compilation and formats them for humans.
///
/// The reporter keeps the pre-split source so every message can show the
/// offending line. Formatted output is one line per problem:
///
/// ```text
/// Error: demo.adl:4: array index must be an integer | x[1.5] := 0;
/// ```
#[derive(Debug)]
pub struct Reporter {
    path: String,
    lines: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    errors: usize,
}

impl Reporter {
    pub fn new(path: &str, lines: &[String]) -> Self {
        Reporter {
            path: path.to_string(),
            lines: lines.to_vec(),
            diagnostics: Vec::new(),
            errors: 0,
        }
    }

    pub fn error(&mut self, category: ErrorCategory, line: u32, message: impl Into<String>) {
        self.errors += 1;
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: Some(category),
            line,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: None,
            line,
            message: message.into(),
        });
    }

    /// Number of errors recorded so far; warnings do not count.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render one diagnostic as its single output line.
    pub fn render(&self, diagnostic: &Diagnostic) -> String {
        let mut out = format!(
            "{}: {}:{}: {}",
            diagnostic.severity, self.path, diagnostic.line, diagnostic.message
        );
        if diagnostic.line >= 1 {
            if let Some(source) = self.lines.get(diagnostic.line as usize - 1) {
                let trimmed = source.trim();
                if !trimmed.is_empty() {
                    out.push_str(" | ");
                    out.push_str(trimmed);
                }
            }
        }
        out
    }

    /// Render every recorded diagnostic, in recording order.
    pub fn render_all(&self) -> Vec<String> {
        self.diagnostics.iter().map(|d| self.render(d)).collect()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(source: &str) -> Vec<String> {
        source.lines().map(str::to_string).collect()
    }

    #[test]
    fn renders_class_path_line_and_source() {
        let mut reporter = Reporter::new("demo.adl", &lines("integer x;\nx := y;\n"));
        reporter.error(ErrorCategory::Name, 2, "unknown identifier 'y'");
        let rendered = reporter.render_all();
        assert_eq!(
            rendered,
            vec!["Error: demo.adl:2: unknown identifier 'y' | x := y;".to_string()]
        );
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut reporter = Reporter::new("demo.adl", &lines("x\n"));
        reporter.warning(1, "unrecognized character '@'");
        assert_eq!(reporter.error_count(), 0);
        assert!(!reporter.has_errors());
        assert_eq!(reporter.diagnostics().len(), 1);
    }

    #[test]
    fn out_of_range_line_renders_without_source() {
        let mut reporter = Reporter::new("demo.adl", &lines("one line\n"));
        reporter.error(ErrorCategory::Syntax, 9, "expected a statement");
        assert_eq!(
            reporter.render(&reporter.diagnostics()[0]),
            "Error: demo.adl:9: expected a statement"
        );
    }
}
