use colored::Colorize;
use itertools::Itertools;

use super::{
    reader::{
        decode_expr, decode_statement, ChoiceItemCode, CodeReadError, ExprNode, HashPair, Segment,
        SpeakerSlot, Statement,
    },
    script_data::ScriptData,
};

fn address(offset: usize) -> String {
    format!("@{:04}", offset)
}

impl ScriptData {
    pub fn disassemble(&self, name: &str) {
        println!("== {} ==", name);
        let mut offset = 0;
        while offset < self.instructions.len() {
            match self.disassemble_statement_at(offset) {
                Ok(next_offset) => offset = next_offset,
                Err(e) => {
                    println!("{}", format!("Error reading code: {}", e).red());
                    break;
                }
            }
        }
    }
    pub fn disassemble_statement_at(&self, offset: usize) -> Result<usize, CodeReadError> {
        let (code, operands, next_offset) = self.describe_statement_at(offset)?;
        println!(
            "{} | {} {}",
            format!("{:04}", offset).dimmed(),
            code.purple(),
            operands
        );
        Ok(next_offset)
    }
    /// Renders the statement at `offset` as its opcode name and a plain operand
    /// listing, plus the offset of the following statement.
    pub fn describe_statement_at(
        &self,
        offset: usize,
    ) -> Result<(&'static str, String, usize), CodeReadError> {
        let (statement, next_offset) = decode_statement(self, offset)?;
        let operands = match &statement {
            Statement::Section { next, name } => {
                format!("next={} {:?}", address(*next), self.string(*name)?)
            }
            Statement::End => String::new(),
            Statement::Line(line) => {
                let speakers = line
                    .speakers
                    .iter()
                    .map(|slot| match slot {
                        SpeakerSlot::Id(idx) => self.speaker_id(*idx).map(String::from),
                        SpeakerSlot::Variable(idx) => self.string(*idx).map(|name| format!("{{{}}}", name)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let mut operands = format!(
                    "next={} [{}] {}",
                    address(line.next),
                    speakers.join(", "),
                    self.render_segments(&line.segments)?
                );
                if !line.directives.is_empty() {
                    let directives = line
                        .directives
                        .iter()
                        .map(|expr| self.render_expr(*expr))
                        .collect::<Result<Vec<_>, _>>()?;
                    operands.push_str(&format!(" <<{}>>", directives.join(", ")));
                }
                operands
            }
            Statement::Instruction { next, expr } => {
                format!("next={} {}", address(*next), self.render_expr(*expr)?)
            }
            Statement::Conditional {
                else_next,
                branches,
            } => {
                let branches = branches
                    .iter()
                    .map(|(expr, next)| {
                        Ok(format!("{} -> {}", self.render_expr(*expr)?, address(*next)))
                    })
                    .collect::<Result<Vec<_>, CodeReadError>>()?;
                format!("else={} [{}]", address(*else_next), branches.join(", "))
            }
            Statement::Choice { next, items } => {
                let items = items
                    .iter()
                    .map(|item| self.render_choice_item(item))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("next={} [{}]", address(*next), items.join(", "))
            }
            Statement::Hash { next, pairs } => {
                format!("next={} {}", address(*next), self.render_pairs(pairs)?)
            }
            Statement::Speaker {
                next,
                speaker,
                pairs,
            } => format!(
                "next={} {} {}",
                address(*next),
                self.speaker_id(*speaker)?,
                self.render_pairs(pairs)?
            ),
        };
        Ok((statement.code().into(), operands, next_offset))
    }
    fn render_segments(&self, segments: &[Segment]) -> Result<String, CodeReadError> {
        Ok(segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(idx) => self.string(*idx).map(|text| format!("{:?}", text)),
                Segment::Expr(expr) => self.render_expr(*expr).map(|expr| format!("{{{}}}", expr)),
            })
            .collect::<Result<Vec<_>, _>>()?
            .join(" "))
    }
    fn render_pairs(&self, pairs: &[HashPair]) -> Result<String, CodeReadError> {
        let pairs = pairs
            .iter()
            .map(|pair| {
                let values = pair
                    .values
                    .iter()
                    .map(|expr| self.render_expr(*expr))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("{}: {}", self.string(pair.key)?, values.join(" ")))
            })
            .collect::<Result<Vec<_>, CodeReadError>>()?;
        Ok(format!("#{{{}}}", pairs.join(", ")))
    }
    fn render_choice_item(&self, item: &ChoiceItemCode) -> Result<String, CodeReadError> {
        Ok(match item {
            ChoiceItemCode::Option {
                next,
                guard,
                segments,
            } => {
                let guard = match guard {
                    Some(expr) => format!("[{}] ", self.render_expr(*expr)?),
                    None => String::new(),
                };
                format!(
                    "option {} {}{}",
                    address(*next),
                    guard,
                    self.render_segments(segments)?
                )
            }
            ChoiceItemCode::If(expr) => format!("if {}", self.render_expr(*expr)?),
            ChoiceItemCode::ElseIf(expr) => format!("elseif {}", self.render_expr(*expr)?),
            ChoiceItemCode::Else => "else".to_string(),
            ChoiceItemCode::EndIf => "endif".to_string(),
        })
    }
    /// Renders the expression at `offset` in prefix form, e.g. `(+ gold 1)`.
    pub fn render_expr(&self, offset: usize) -> Result<String, CodeReadError> {
        let (node, _) = decode_expr(self, offset)?;
        Ok(match node {
            ExprNode::Float(idx) => self.float(idx)?.to_string(),
            ExprNode::String(idx) => format!("{:?}", self.string(idx)?),
            ExprNode::Bool(value) => value.to_string(),
            ExprNode::Var(idx) => self.string(idx)?.to_string(),
            ExprNode::Func {
                name,
                is_await,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|arg| self.render_expr(*arg))
                    .collect::<Result<Vec<_>, _>>()?;
                format!(
                    "({}{}{})",
                    if is_await { "await " } else { "" },
                    self.string(name)?,
                    args.iter().map(|arg| format!(" {}", arg)).join("")
                )
            }
            ExprNode::Unary(code, operand) => {
                format!("({} {})", code.symbol(), self.render_expr(operand)?)
            }
            ExprNode::Binary(code, left, right) => format!(
                "({} {} {})",
                code.symbol(),
                self.render_expr(left)?,
                self.render_expr(right)?
            ),
            ExprNode::Assign(code, name, value) => format!(
                "({} {} {})",
                code.symbol(),
                self.string(name)?,
                self.render_expr(value)?
            ),
            ExprNode::Auto => "auto".to_string(),
            ExprNode::Goto(target) => format!("(goto {})", address(target)),
            ExprNode::Speed(operand) => format!("(speed {})", self.render_expr(operand)?),
            ExprNode::Pause(operand) => format!("(pause {})", self.render_expr(operand)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::{ExprCode, SegmentKind, SpeakerKind, StatementCode};
    use pretty_assertions::assert_eq;

    #[test]
    fn describes_statements() {
        let op = |code: ExprCode| -> u32 { code.into() };
        let stmt = |code: StatementCode| -> u32 { code.into() };
        let script = ScriptData {
            speaker_ids: vec!["A".into()],
            floats: vec![1.0],
            strings: vec!["start".into(), "Hi ".into(), "gold".into()],
            instructions: vec![
                stmt(StatementCode::Section),
                3,
                0,
                stmt(StatementCode::Line),
                19,
                1,
                SpeakerKind::Id.into(),
                0,
                2,
                SegmentKind::Text.into(),
                1,
                SegmentKind::Expr.into(),
                op(ExprCode::Var),
                2,
                1,
                op(ExprCode::Pause),
                op(ExprCode::Float),
                0,
                stmt(StatementCode::End),
                stmt(StatementCode::Instruction),
                18,
                op(ExprCode::AddAssign),
                2,
                op(ExprCode::Float),
                0,
            ],
        };
        assert_eq!(
            script.describe_statement_at(0).unwrap(),
            ("Section", "next=@0003 \"start\"".to_string(), 3)
        );
        assert_eq!(
            script.describe_statement_at(3).unwrap(),
            (
                "Line",
                "next=@0019 [A] \"Hi \" {gold} <<(pause 1)>>".to_string(),
                18
            )
        );
        assert_eq!(
            script.describe_statement_at(19).unwrap(),
            ("Instruction", "next=@0018 (+= gold 1)".to_string(), 25)
        );
    }
}
