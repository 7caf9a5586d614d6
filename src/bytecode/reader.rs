use std::{collections::HashMap, convert::TryFrom};

use miette::Diagnostic;
use thiserror::Error;

use super::{
    opcode::{ChoiceMarker, ExprCode, SegmentKind, SpeakerKind, StatementCode},
    script_data::ScriptData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Pool {
    SpeakerIds,
    Floats,
    Strings,
}

#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum CodeReadError {
    #[error("Unexpected end of code at index {0}")]
    UnexpectedEnd(usize),
    #[error("Unexpected statement code {1} at index {0}")]
    InvalidStatementCode(usize, u32),
    #[error("Unexpected expression code {1} at index {0}")]
    InvalidExprCode(usize, u32),
    #[error("Unexpected choice marker {1} at index {0}")]
    InvalidChoiceMarker(usize, u32),
    #[error("Unexpected operand kind {1} at index {0}")]
    InvalidOperandKind(usize, u32),
    #[error("Unknown {0} entry {1}")]
    InvalidPoolIndex(Pool, usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeakerSlot {
    Id(usize),
    Variable(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    Text(usize),
    /// Offset of a placeholder expression.
    Expr(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineCode {
    pub next: usize,
    pub speakers: Vec<SpeakerSlot>,
    pub segments: Vec<Segment>,
    pub directives: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceItemCode {
    Option {
        next: usize,
        guard: Option<usize>,
        segments: Vec<Segment>,
    },
    If(usize),
    ElseIf(usize),
    Else,
    EndIf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: usize,
    pub values: Vec<usize>,
}

/// A decoded statement. Expression operands are kept as stream offsets so the
/// evaluator can walk them lazily.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Section { next: usize, name: usize },
    End,
    Line(LineCode),
    Instruction { next: usize, expr: usize },
    Conditional { else_next: usize, branches: Vec<(usize, usize)> },
    Choice { next: usize, items: Vec<ChoiceItemCode> },
    Hash { next: usize, pairs: Vec<HashPair> },
    Speaker { next: usize, speaker: usize, pairs: Vec<HashPair> },
}

impl Statement {
    pub fn code(&self) -> StatementCode {
        match self {
            Self::Section { .. } => StatementCode::Section,
            Self::End => StatementCode::End,
            Self::Line(_) => StatementCode::Line,
            Self::Instruction { .. } => StatementCode::Instruction,
            Self::Conditional { .. } => StatementCode::Conditional,
            Self::Choice { .. } => StatementCode::Choice,
            Self::Hash { .. } => StatementCode::Hash,
            Self::Speaker { .. } => StatementCode::Speaker,
        }
    }
}

/// A decoded expression node. Child operands are stream offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Float(usize),
    String(usize),
    Bool(bool),
    Var(usize),
    Func {
        name: usize,
        is_await: bool,
        args: Vec<usize>,
    },
    Unary(ExprCode, usize),
    Binary(ExprCode, usize, usize),
    Assign(ExprCode, usize, usize),
    Auto,
    Goto(usize),
    Speed(usize),
    Pause(usize),
}

/// Cursor over the instruction stream.
pub struct Reader<'a> {
    script: &'a ScriptData,
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(script: &'a ScriptData, offset: usize) -> Self {
        Self { script, offset }
    }
    pub fn offset(&self) -> usize {
        self.offset
    }
    fn read_word(&mut self) -> Result<u32, CodeReadError> {
        let word = self.script.word(self.offset)?;
        self.offset += 1;
        Ok(word)
    }
    fn read_index(&mut self) -> Result<usize, CodeReadError> {
        Ok(self.read_word()? as usize)
    }
    fn read_kind<T: TryFrom<u32>>(&mut self) -> Result<T, CodeReadError> {
        let at = self.offset;
        let word = self.read_word()?;
        T::try_from(word).map_err(|_| CodeReadError::InvalidOperandKind(at, word))
    }
    fn read_expr(&mut self) -> Result<usize, CodeReadError> {
        let start = self.offset;
        self.offset = expr_end(self.script, start)?;
        Ok(start)
    }
    fn read_segments(&mut self) -> Result<Vec<Segment>, CodeReadError> {
        let count = self.read_index()?;
        (0..count)
            .map(|_| match self.read_kind::<SegmentKind>()? {
                SegmentKind::Text => Ok(Segment::Text(self.read_index()?)),
                SegmentKind::Expr => Ok(Segment::Expr(self.read_expr()?)),
            })
            .collect()
    }
    fn read_pairs(&mut self) -> Result<Vec<HashPair>, CodeReadError> {
        let count = self.read_index()?;
        (0..count)
            .map(|_| {
                let value_count = self.read_index()?;
                let key = self.read_index()?;
                let values = (0..value_count)
                    .map(|_| self.read_expr())
                    .collect::<Result<_, _>>()?;
                Ok(HashPair { key, values })
            })
            .collect()
    }
    fn read_choice_item(&mut self) -> Result<ChoiceItemCode, CodeReadError> {
        let at = self.offset;
        let word = self.read_word()?;
        let marker = ChoiceMarker::try_from(word)
            .map_err(|_| CodeReadError::InvalidChoiceMarker(at, word))?;
        Ok(match marker {
            ChoiceMarker::Option => {
                let next = self.read_index()?;
                let guard = match self.read_word()? {
                    0 => None,
                    _ => Some(self.read_expr()?),
                };
                ChoiceItemCode::Option {
                    next,
                    guard,
                    segments: self.read_segments()?,
                }
            }
            ChoiceMarker::If => ChoiceItemCode::If(self.read_expr()?),
            ChoiceMarker::ElseIf => ChoiceItemCode::ElseIf(self.read_expr()?),
            ChoiceMarker::Else => ChoiceItemCode::Else,
            ChoiceMarker::EndIf => ChoiceItemCode::EndIf,
        })
    }
    pub fn read_statement(&mut self) -> Result<Statement, CodeReadError> {
        let at = self.offset;
        let word = self.read_word()?;
        let code = StatementCode::try_from(word)
            .map_err(|_| CodeReadError::InvalidStatementCode(at, word))?;
        Ok(match code {
            StatementCode::Section => Statement::Section {
                next: self.read_index()?,
                name: self.read_index()?,
            },
            StatementCode::End => Statement::End,
            StatementCode::Line => {
                let next = self.read_index()?;
                let speaker_count = self.read_index()?;
                let speakers = (0..speaker_count)
                    .map(|_| match self.read_kind::<SpeakerKind>()? {
                        SpeakerKind::Id => Ok(SpeakerSlot::Id(self.read_index()?)),
                        SpeakerKind::Variable => Ok(SpeakerSlot::Variable(self.read_index()?)),
                    })
                    .collect::<Result<_, CodeReadError>>()?;
                let segments = self.read_segments()?;
                let directive_count = self.read_index()?;
                let directives = (0..directive_count)
                    .map(|_| self.read_expr())
                    .collect::<Result<_, _>>()?;
                Statement::Line(LineCode {
                    next,
                    speakers,
                    segments,
                    directives,
                })
            }
            StatementCode::Instruction => Statement::Instruction {
                next: self.read_index()?,
                expr: self.read_expr()?,
            },
            StatementCode::Conditional => {
                let else_next = self.read_index()?;
                let count = self.read_index()?;
                let branches = (0..count)
                    .map(|_| Ok((self.read_expr()?, self.read_index()?)))
                    .collect::<Result<_, CodeReadError>>()?;
                Statement::Conditional {
                    else_next,
                    branches,
                }
            }
            StatementCode::Choice => {
                let next = self.read_index()?;
                let count = self.read_index()?;
                let items = (0..count)
                    .map(|_| self.read_choice_item())
                    .collect::<Result<_, _>>()?;
                Statement::Choice { next, items }
            }
            StatementCode::Hash => Statement::Hash {
                next: self.read_index()?,
                pairs: self.read_pairs()?,
            },
            StatementCode::Speaker => Statement::Speaker {
                next: self.read_index()?,
                speaker: self.read_index()?,
                pairs: self.read_pairs()?,
            },
        })
    }
}

/// Decodes the statement at `offset`, returning it with the offset just past it.
pub fn decode_statement(
    script: &ScriptData,
    offset: usize,
) -> Result<(Statement, usize), CodeReadError> {
    let mut reader = Reader::new(script, offset);
    let statement = reader.read_statement()?;
    Ok((statement, reader.offset()))
}

/// Decodes the expression node at `offset`, returning it with the offset just
/// past the whole expression (operands included).
pub fn decode_expr(script: &ScriptData, offset: usize) -> Result<(ExprNode, usize), CodeReadError> {
    let word = script.word(offset)?;
    let code = ExprCode::try_from(word).map_err(|_| CodeReadError::InvalidExprCode(offset, word))?;
    let operand = offset + 1;
    let node = match code {
        ExprCode::Float => ExprNode::Float(script.word(operand)? as usize),
        ExprCode::String => ExprNode::String(script.word(operand)? as usize),
        ExprCode::Bool => ExprNode::Bool(script.word(operand)? != 0),
        ExprCode::Var => ExprNode::Var(script.word(operand)? as usize),
        ExprCode::Func => {
            let name = script.word(operand)? as usize;
            let is_await = script.word(operand + 1)? != 0;
            let argc = script.word(operand + 2)? as usize;
            // `argc` is untrusted; the operands themselves bound the loop.
            let mut args = Vec::new();
            let mut arg = operand + 3;
            for _ in 0..argc {
                args.push(arg);
                arg = expr_end(script, arg)?;
            }
            return Ok((
                ExprNode::Func {
                    name,
                    is_await,
                    args,
                },
                arg,
            ));
        }
        ExprCode::Negate | ExprCode::Not => {
            return Ok((ExprNode::Unary(code, operand), expr_end(script, operand)?))
        }
        ExprCode::Speed | ExprCode::Pause => {
            let end = expr_end(script, operand)?;
            let node = if code == ExprCode::Speed {
                ExprNode::Speed(operand)
            } else {
                ExprNode::Pause(operand)
            };
            return Ok((node, end));
        }
        code if code.is_binary() => {
            let right = expr_end(script, operand)?;
            return Ok((ExprNode::Binary(code, operand, right), expr_end(script, right)?));
        }
        code if code.is_assignment() => {
            let name = script.word(operand)? as usize;
            let value = operand + 1;
            return Ok((ExprNode::Assign(code, name, value), expr_end(script, value)?));
        }
        ExprCode::Goto => ExprNode::Goto(script.word(operand)? as usize),
        ExprCode::Auto => return Ok((ExprNode::Auto, operand)),
        _ => return Err(CodeReadError::InvalidExprCode(offset, word)),
    };
    Ok((node, operand + 1))
}

/// Offset just past the expression starting at `offset`.
pub fn expr_end(script: &ScriptData, offset: usize) -> Result<usize, CodeReadError> {
    decode_expr(script, offset).map(|(_, end)| end)
}

/// Maps every section name to the offset of its `Section` statement.
pub fn section_table(script: &ScriptData) -> Result<HashMap<String, usize>, CodeReadError> {
    let mut sections = HashMap::new();
    let mut offset = 0;
    while offset < script.instructions.len() {
        let (statement, next_offset) = decode_statement(script, offset)?;
        if let Statement::Section { name, .. } = statement {
            sections.insert(script.string(name)?.to_string(), offset);
        }
        offset = next_offset;
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn script(instructions: Vec<u32>) -> ScriptData {
        ScriptData {
            speaker_ids: vec!["A".into()],
            floats: vec![1.0, 2.0],
            strings: vec!["start".into(), "Hello".into(), "gold".into()],
            instructions,
        }
    }

    fn op(code: ExprCode) -> u32 {
        code.into()
    }

    fn stmt(code: StatementCode) -> u32 {
        code.into()
    }

    #[test]
    fn skips_nested_expressions() {
        // (+ gold (f 1 (- 2)))
        let data = script(vec![
            op(ExprCode::Add),
            op(ExprCode::Var),
            2,
            op(ExprCode::Func),
            0,
            0,
            2,
            op(ExprCode::Float),
            0,
            op(ExprCode::Negate),
            op(ExprCode::Float),
            1,
        ]);
        assert_eq!(expr_end(&data, 0), Ok(12));
        assert_eq!(
            decode_expr(&data, 3),
            Ok((
                ExprNode::Func {
                    name: 0,
                    is_await: false,
                    args: vec![7, 9]
                },
                12
            ))
        );
        assert_eq!(
            decode_expr(&data, 0).unwrap().0,
            ExprNode::Binary(ExprCode::Add, 1, 3)
        );
    }

    #[test]
    fn decodes_a_line_and_finds_sections() {
        let data = script(vec![
            stmt(StatementCode::Section),
            3,
            0,
            stmt(StatementCode::Line),
            15,
            1,
            SpeakerKind::Id.into(),
            0,
            1,
            SegmentKind::Text.into(),
            1,
            1,
            op(ExprCode::Pause),
            op(ExprCode::Float),
            0,
            stmt(StatementCode::End),
        ]);
        assert_eq!(
            decode_statement(&data, 3),
            Ok((
                Statement::Line(LineCode {
                    next: 15,
                    speakers: vec![SpeakerSlot::Id(0)],
                    segments: vec![Segment::Text(1)],
                    directives: vec![12],
                }),
                15
            ))
        );
        let sections = section_table(&data).unwrap();
        assert_eq!(sections.get("start"), Some(&0));
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn reports_truncated_and_invalid_code() {
        let data = script(vec![stmt(StatementCode::Instruction), 2]);
        assert_eq!(
            decode_statement(&data, 0),
            Err(CodeReadError::UnexpectedEnd(2))
        );
        let data = script(vec![99]);
        assert_eq!(
            decode_statement(&data, 0),
            Err(CodeReadError::InvalidStatementCode(0, 99))
        );
    }

    #[test]
    fn huge_argument_counts_run_out_of_code() {
        let data = script(vec![op(ExprCode::Func), 0, 0, u32::MAX]);
        assert_eq!(decode_expr(&data, 0), Err(CodeReadError::UnexpectedEnd(4)));
        assert_eq!(expr_end(&data, 0), Err(CodeReadError::UnexpectedEnd(4)));
    }
}
