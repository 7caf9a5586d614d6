use miette::Diagnostic;
use thiserror::Error;

use crate::{bytecode::CodeReadError, value::VariantError};

use super::{host::HostError, RuntimeState};

#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Unknown variable {name}")]
    UnknownVariable { name: String },
    #[error("Unknown section {name}")]
    UnknownSection { name: String },
    #[error("Type error at @{at:04}: {source}")]
    TypeMismatch { at: usize, source: VariantError },
    #[error("Host call {function} failed: {source}")]
    Host { function: String, source: HostError },
    #[error("Error reading bytecode: {0}")]
    CodeRead(#[from] CodeReadError),
    #[error("Cannot {operation} while {state}")]
    #[diagnostic(help("check Runtime::state() before driving the runtime"))]
    InvalidState {
        operation: &'static str,
        state: RuntimeState,
    },
    #[error("Choice {index} is out of range; {count} choices were presented")]
    InvalidChoice { index: usize, count: usize },
    #[error("Choice {index} is disabled")]
    DisabledChoice { index: usize },
}

/// Maps a failed host call to the fault it causes.
pub(super) fn host_fault(function: &str, error: HostError) -> RuntimeError {
    match error {
        HostError::UnknownVariable(name) => RuntimeError::UnknownVariable { name },
        source => RuntimeError::Host {
            function: function.to_string(),
            source,
        },
    }
}
