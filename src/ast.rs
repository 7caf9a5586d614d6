use std::{fmt::Display, ops::Deref};

use itertools::Itertools;

use crate::{source::SourceSpan, SourceReference};

#[derive(Debug, Clone)]
pub struct WithSpan<T> {
    inner: T,
    source_span: SourceSpan,
}

impl<T> WithSpan<T> {
    pub fn new(inner: T, source_span: SourceSpan) -> Self {
        Self { inner, source_span }
    }
    pub fn source_span(&self) -> SourceSpan {
        self.source_span
    }
    pub fn inner(&self) -> &T {
        &self.inner
    }
}
impl<T> Deref for WithSpan<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub trait AstNode {
    fn source_span(&self) -> SourceSpan;
}

#[derive(Debug)]
pub struct Program {
    pub sections: Vec<Section>,
    pub source_reference: SourceReference,
}
impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for section in self.sections.iter() {
            writeln!(f, "{}", section)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub source_span: SourceSpan,
    pub name: String,
}
impl AstNode for Identifier {
    fn source_span(&self) -> SourceSpan {
        self.source_span
    }
}
impl Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug)]
pub struct Section {
    pub name: Identifier,
    pub header_span: SourceSpan,
    pub body: Vec<Stmt>,
}
impl Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(section {} {})", self.name, Block(&self.body))
    }
}

/// Display helper for statement lists.
pub struct Block<'a>(pub &'a [Stmt]);
impl Display for Block<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().join(" "))
    }
}

#[derive(Debug)]
pub enum SpeakerRef {
    Named(Identifier),
    Variable(Identifier),
}
impl SpeakerRef {
    pub fn identifier(&self) -> &Identifier {
        match self {
            Self::Named(identifier) | Self::Variable(identifier) => identifier,
        }
    }
}
impl Display for SpeakerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => Display::fmt(name, f),
            Self::Variable(name) => write!(f, "{{{}}}", name),
        }
    }
}

#[derive(Debug)]
pub enum TextSegment {
    Text(WithSpan<String>),
    Placeholder(Expr),
}
impl Display for TextSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{:?}", text.inner()),
            Self::Placeholder(expr) => write!(f, "{{{}}}", expr),
        }
    }
}

#[derive(Debug)]
pub enum DirectiveKind {
    Auto,
    Speed(Expr),
    Pause(Expr),
    Goto(Identifier),
}
pub type Directive = WithSpan<DirectiveKind>;
impl Display for DirectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Speed(expr) => write!(f, "(speed {})", expr),
            Self::Pause(expr) => write!(f, "(pause {})", expr),
            Self::Goto(target) => write!(f, "(goto {})", target),
        }
    }
}

#[derive(Debug)]
pub struct LineStmt {
    pub speakers: Vec<SpeakerRef>,
    pub text: Vec<TextSegment>,
    pub directives: Vec<Directive>,
    pub hash: Option<HashBlock>,
    pub source_span: SourceSpan,
}
impl Display for LineStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(line [{}] [{}]",
            self.speakers.iter().join(" "),
            self.text.iter().join(" ")
        )?;
        if !self.directives.is_empty() {
            write!(
                f,
                " <<{}>>",
                self.directives.iter().map(|d| d.inner()).join(" ")
            )?;
        }
        if let Some(hash) = &self.hash {
            write!(f, " {}", hash)?;
        }
        f.write_str(")")
    }
}

#[derive(Debug)]
pub struct HashEntry {
    pub key: Identifier,
    pub values: Vec<Expr>,
}

#[derive(Debug)]
pub struct HashBlock {
    pub entries: Vec<HashEntry>,
    pub source_span: SourceSpan,
}
impl Display for HashBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{{{}}}",
            self.entries
                .iter()
                .map(|entry| {
                    if entry.values.is_empty() {
                        entry.key.to_string()
                    } else {
                        format!("{}: {}", entry.key, entry.values.iter().join(" "))
                    }
                })
                .join(", ")
        )
    }
}

#[derive(Debug)]
pub struct ConditionalBranch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct IfStmt {
    pub branches: Vec<ConditionalBranch>,
    pub else_body: Option<Vec<Stmt>>,
    pub source_span: SourceSpan,
}
impl Display for IfStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(if")?;
        for branch in &self.branches {
            write!(f, " {} {}", branch.condition, Block(&branch.body))?;
        }
        if let Some(else_body) = &self.else_body {
            write!(f, " else {}", Block(else_body))?;
        }
        f.write_str(")")
    }
}

#[derive(Debug)]
pub struct ChoiceOption {
    pub guard: Option<Expr>,
    pub text: Vec<TextSegment>,
    pub target: Option<Identifier>,
    pub body: Option<Vec<Stmt>>,
    pub source_span: SourceSpan,
}

#[derive(Debug)]
pub struct ChoiceFilterBranch {
    pub condition: Expr,
    pub items: Vec<ChoiceItem>,
}

/// `if`/`else if`/`else` inside a choice block: selects which options are
/// offered without splitting the surrounding control flow.
#[derive(Debug)]
pub struct ChoiceFilter {
    pub branches: Vec<ChoiceFilterBranch>,
    pub else_items: Option<Vec<ChoiceItem>>,
    pub source_span: SourceSpan,
}

#[derive(Debug)]
pub enum ChoiceItem {
    Option(ChoiceOption),
    Filter(ChoiceFilter),
}
impl Display for ChoiceItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Option(option) => {
                f.write_str("(*")?;
                if let Some(guard) = &option.guard {
                    write!(f, " [{}]", guard)?;
                }
                write!(f, " [{}]", option.text.iter().join(" "))?;
                if let Some(target) = &option.target {
                    write!(f, " -> {}", target)?;
                }
                if let Some(body) = &option.body {
                    write!(f, " {}", Block(body))?;
                }
                f.write_str(")")
            }
            Self::Filter(filter) => {
                f.write_str("(filter")?;
                for branch in &filter.branches {
                    write!(f, " {} [{}]", branch.condition, branch.items.iter().join(" "))?;
                }
                if let Some(items) = &filter.else_items {
                    write!(f, " else [{}]", items.iter().join(" "))?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug)]
pub struct ChoiceStmt {
    pub items: Vec<ChoiceItem>,
    pub source_span: SourceSpan,
}

#[derive(Debug)]
pub struct SpeakerStmt {
    pub speaker: Identifier,
    pub hash: HashBlock,
    pub source_span: SourceSpan,
}

#[derive(Debug)]
pub enum Stmt {
    Line(LineStmt),
    Instruction(Expr),
    Goto(Identifier),
    End(SourceSpan),
    If(IfStmt),
    Choice(ChoiceStmt),
    Hash(HashBlock),
    Speaker(SpeakerStmt),
}
impl Display for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line(stmt) => Display::fmt(stmt, f),
            Self::Instruction(expr) => write!(f, "(~ {})", expr),
            Self::Goto(target) => write!(f, "(goto {})", target),
            Self::End(_) => f.write_str("(end)"),
            Self::If(stmt) => Display::fmt(stmt, f),
            Self::Choice(stmt) => write!(f, "(choice {})", stmt.items.iter().join(" ")),
            Self::Hash(hash) => Display::fmt(hash, f),
            Self::Speaker(stmt) => write!(f, "(speaker {} {})", stmt.speaker, stmt.hash),
        }
    }
}
impl AstNode for Stmt {
    fn source_span(&self) -> SourceSpan {
        match self {
            Self::Line(stmt) => stmt.source_span,
            Self::Instruction(expr) => expr.source_span(),
            Self::Goto(target) => target.source_span(),
            Self::End(span) => *span,
            Self::If(stmt) => stmt.source_span,
            Self::Choice(stmt) => stmt.source_span,
            Self::Hash(hash) => hash.source_span,
            Self::Speaker(stmt) => stmt.source_span,
        }
    }
}
impl Stmt {
    /// Control never continues to the statement that follows this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Goto(_) | Self::End(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    NotEqualTo,
    EqualTo,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LogicalAnd,
    LogicalOr,
}
impl Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::NotEqualTo => "!=",
            Self::EqualTo => "==",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "and",
            Self::LogicalOr => "or",
        })
    }
}

#[derive(Debug)]
pub struct BinaryExpr {
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub operator: WithSpan<BinaryOperator>,
}
impl Display for BinaryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.operator.inner, self.left, self.right)
    }
}
impl AstNode for BinaryExpr {
    fn source_span(&self) -> SourceSpan {
        SourceSpan::range(
            self.left.source_span().start(),
            self.right.source_span().end(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Float(f64),
    String(String),
    Bool(bool),
}

#[derive(Debug)]
pub struct LiteralExpr {
    pub value: LiteralValue,
    pub source_span: SourceSpan,
}
impl Display for LiteralExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            LiteralValue::Float(value) => write!(f, "{}", value),
            LiteralValue::String(value) => write!(f, "{:?}", value),
            LiteralValue::Bool(value) => write!(f, "{}", value),
        }
    }
}
impl AstNode for LiteralExpr {
    fn source_span(&self) -> SourceSpan {
        self.source_span
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}
impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minus => f.write_str("-"),
            Self::Not => f.write_str("!"),
        }
    }
}

#[derive(Debug)]
pub struct UnaryExpr {
    pub operator: WithSpan<UnaryOperator>,
    pub right: Box<Expr>,
}
impl Display for UnaryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.operator.inner, self.right)
    }
}
impl AstNode for UnaryExpr {
    fn source_span(&self) -> SourceSpan {
        SourceSpan::range(
            self.operator.source_span.start(),
            self.right.source_span().end(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOperator {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
}
impl Display for AssignOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Assign => "=",
            Self::AddAssign => "+=",
            Self::SubtractAssign => "-=",
            Self::MultiplyAssign => "*=",
            Self::DivideAssign => "/=",
        })
    }
}

#[derive(Debug)]
pub struct AssignmentExpr {
    pub target: Identifier,
    pub operator: WithSpan<AssignOperator>,
    pub value: Box<Expr>,
}
impl Display for AssignmentExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.operator.inner, self.target, self.value)
    }
}
impl AstNode for AssignmentExpr {
    fn source_span(&self) -> SourceSpan {
        SourceSpan::range(
            self.target.source_span().start(),
            self.value.source_span().end(),
        )
    }
}

#[derive(Debug)]
pub struct CallExpr {
    pub callee: Identifier,
    pub arguments: Vec<Expr>,
    pub await_span: Option<SourceSpan>,
    pub close_paren_span: SourceSpan,
}
impl CallExpr {
    pub fn is_await(&self) -> bool {
        self.await_span.is_some()
    }
}
impl Display for CallExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_await() {
            f.write_str("(await ")?;
        }
        write!(f, "(call {}", self.callee)?;
        for argument in self.arguments.iter() {
            write!(f, " {}", argument)?;
        }
        f.write_str(")")?;
        if self.is_await() {
            f.write_str(")")?;
        }
        Ok(())
    }
}
impl AstNode for CallExpr {
    fn source_span(&self) -> SourceSpan {
        SourceSpan::range(
            self.await_span
                .unwrap_or_else(|| self.callee.source_span())
                .start(),
            self.close_paren_span.end(),
        )
    }
}

#[derive(Debug)]
pub struct GroupingExpr {
    pub expr: Box<Expr>,
}

#[derive(Debug)]
pub enum Expr {
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Literal(LiteralExpr),
    Variable(Identifier),
    Assignment(AssignmentExpr),
    Grouping(GroupingExpr),
    Call(CallExpr),
}
impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary(expr) => Display::fmt(expr, f),
            Self::Unary(expr) => Display::fmt(expr, f),
            Self::Literal(expr) => Display::fmt(expr, f),
            Self::Variable(expr) => Display::fmt(expr, f),
            Self::Assignment(expr) => Display::fmt(expr, f),
            Self::Grouping(expr) => Display::fmt(&expr.expr, f),
            Self::Call(expr) => Display::fmt(expr, f),
        }
    }
}
impl AstNode for Expr {
    fn source_span(&self) -> SourceSpan {
        match self {
            Self::Binary(expr) => expr.source_span(),
            Self::Unary(expr) => expr.source_span(),
            Self::Literal(expr) => expr.source_span(),
            Self::Variable(expr) => expr.source_span(),
            Self::Assignment(expr) => expr.source_span(),
            Self::Grouping(expr) => expr.expr.source_span(),
            Self::Call(expr) => expr.source_span(),
        }
    }
}
