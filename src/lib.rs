pub mod ast;
pub mod bytecode;
mod compiler;
mod parser;
pub mod registry;
pub mod runtime;
mod scanner;
mod source;
mod source_reference;
pub mod text;
pub mod value;

pub use bytecode::ScriptData;
pub use compiler::{
    Compilation, CompileError, Compiler, CompilerOpts, DiagnosticRecord, ScriptDiagnostic,
    Severity,
};
pub use parser::{Parser, ParserError, ParserOpts};
pub use registry::{FuncDef, MemberRegistry, ParamDef, VarDef};
pub use runtime::{DialogEvent, HostBinding, MemoryHost, Runtime, RuntimeError, RuntimeState};
pub use scanner::{Scanner, ScannerError};
pub use source::{LineIndex, SourceOffset, SourceSpan};
pub use source_reference::SourceReference;
pub use value::{ValueType, Variant};
