use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::IntoStaticStr;

/// First word of every statement node.
#[derive(Debug, IntoPrimitive, TryFromPrimitive, IntoStaticStr, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatementCode {
    Section,
    End,
    Line,
    Instruction,
    Conditional,
    Choice,
    Hash,
    Speaker,
}

#[derive(Debug, IntoPrimitive, TryFromPrimitive, IntoStaticStr, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExprCode {
    Float,
    String,
    Bool,
    Var,
    Func,
    Negate,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    Auto,
    Goto,
    Speed,
    Pause,
}

impl ExprCode {
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::Div
                | Self::Mod
                | Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::LessEqual
                | Self::Greater
                | Self::GreaterEqual
                | Self::And
                | Self::Or
        )
    }
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            Self::Assign | Self::AddAssign | Self::SubAssign | Self::MulAssign | Self::DivAssign
        )
    }
    /// Short operator form used by the disassembler.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Negate | Self::Sub => "-",
            Self::Not => "!",
            Self::Add => "+",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::Assign => "=",
            Self::AddAssign => "+=",
            Self::SubAssign => "-=",
            Self::MulAssign => "*=",
            Self::DivAssign => "/=",
            other => other.into(),
        }
    }
}

/// Entries of a choice statement's item list.
#[derive(Debug, IntoPrimitive, TryFromPrimitive, IntoStaticStr, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChoiceMarker {
    Option,
    If,
    ElseIf,
    Else,
    EndIf,
}

#[derive(Debug, IntoPrimitive, TryFromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SpeakerKind {
    /// Index into the speaker id pool.
    Id,
    /// Index into the string pool naming a host variable.
    Variable,
}

#[derive(Debug, IntoPrimitive, TryFromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SegmentKind {
    Text,
    Expr,
}
