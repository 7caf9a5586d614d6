mod disassembler;
pub mod opcode;
pub mod reader;
mod script_data;

pub use opcode::{ChoiceMarker, ExprCode, SegmentKind, SpeakerKind, StatementCode};
pub use reader::{section_table, CodeReadError, Statement};
pub use script_data::ScriptData;
