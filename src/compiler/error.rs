use miette::{Diagnostic, Report};
use serde::Serialize;
use thiserror::Error;

use crate::{
    source::LineIndex,
    value::ValueType,
    ParserError, ScannerError, SourceReference, SourceSpan,
};

#[derive(Error, Diagnostic, Debug)]
pub enum CompileError {
    #[error("Unknown variable {name}")]
    UnknownVariable {
        name: String,
        #[label("'{name}' is not exposed by the host")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unknown function {name}")]
    UnknownFunction {
        name: String,
        #[label("'{name}' is not exposed by the host")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Expected {}, but found {}", .expected.fmt_a(), .actual.fmt_a())]
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
        #[label("Found {actual} here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{name} takes {} arguments but {actual} were supplied", arity_range(.min, .max))]
    ArityMismatch {
        name: String,
        min: usize,
        max: usize,
        actual: usize,
        #[label("Called here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error(
        "Default for parameter {index} of {name} is {}, but it must be {}",
        .actual.fmt_a(),
        .expected.fmt_a()
    )]
    #[diagnostic(help("fix the parameter's default in the host registry"))]
    InvalidDefault {
        name: String,
        index: usize,
        expected: ValueType,
        actual: ValueType,
        #[label("Default needed here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{name} {}", await_requirement(.awaitable))]
    AwaitMismatch {
        name: String,
        awaitable: bool,
        #[label("Called here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unknown section {name}")]
    UnknownSection {
        name: String,
        #[label("No section named '{name}'")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Section {name} is already defined")]
    DuplicateSection {
        name: String,
        #[label("Defined again here")]
        found_at: SourceSpan,
        #[label("First defined here")]
        first_found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Choice block has no options")]
    EmptyChoice {
        #[label("Add at least one `* option`")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Choice block may present no enabled option")]
    #[diagnostic(severity(Warning))]
    NoGuaranteedChoice {
        #[label("Every option here is guarded or filtered")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Hash key {key} has {value_count} values")]
    MalformedHash {
        key: String,
        value_count: usize,
        #[label("A key takes at most one value")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Hash key {key} is repeated")]
    DuplicateHashKey {
        key: String,
        #[label("Repeated here")]
        found_at: SourceSpan,
        #[label("First used here")]
        first_found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unreachable statement")]
    #[diagnostic(severity(Warning))]
    UnreachableStatement {
        #[label("Control never reaches this")]
        found_at: SourceSpan,
        #[label("because of this")]
        terminated_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
}

fn arity_range(min: &usize, max: &usize) -> String {
    if min == max {
        min.to_string()
    } else {
        format!("{} to {}", min, max)
    }
}

fn await_requirement(awaitable: &bool) -> &'static str {
    if *awaitable {
        "must be awaited"
    } else {
        "cannot be awaited"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Flat diagnostic record for editors and other tooling. Lines and columns
/// are zero-based; columns count chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    pub line: usize,
    pub column_start: usize,
    pub column_end: usize,
    pub message: String,
    pub severity: Severity,
}

/// Anything reported while turning source text into a script.
#[derive(Debug)]
pub enum ScriptDiagnostic {
    Scanner(ScannerError),
    Parser(ParserError),
    Compile(CompileError),
}

impl From<ScannerError> for ScriptDiagnostic {
    fn from(error: ScannerError) -> Self {
        Self::Scanner(error)
    }
}
impl From<ParserError> for ScriptDiagnostic {
    fn from(error: ParserError) -> Self {
        Self::Parser(error)
    }
}
impl From<CompileError> for ScriptDiagnostic {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl ScriptDiagnostic {
    pub fn as_diagnostic(&self) -> &(dyn Diagnostic + Send + Sync + 'static) {
        match self {
            Self::Scanner(error) => error,
            Self::Parser(error) => error,
            Self::Compile(error) => error,
        }
    }
    pub fn severity(&self) -> Severity {
        match self.as_diagnostic().severity() {
            Some(miette::Severity::Warning) | Some(miette::Severity::Advice) => Severity::Warning,
            Some(miette::Severity::Error) | None => Severity::Error,
        }
    }
    pub fn to_record(&self, line_index: &LineIndex) -> DiagnosticRecord {
        let span = self
            .as_diagnostic()
            .labels()
            .and_then(|mut labels| labels.next())
            .map(|label| SourceSpan::from(label.offset()..label.offset() + label.len()))
            .unwrap_or_default();
        let (line, column_start) = line_index.line_col(span.start());
        let (end_line, end_column) = line_index.line_col(span.end());
        let column_end = if end_line == line {
            end_column.max(column_start)
        } else {
            line_index.line_len(line)
        };
        DiagnosticRecord {
            line,
            column_start,
            column_end,
            message: self.as_diagnostic().to_string(),
            severity: self.severity(),
        }
    }
    pub fn into_report(self) -> Report {
        match self {
            Self::Scanner(error) => Report::new(error),
            Self::Parser(error) => Report::new(error),
            Self::Compile(error) => Report::new(error),
        }
    }
}

impl std::fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.as_diagnostic(), f)
    }
}
