use miette::{Diagnostic, Result};
use std::iter::Peekable;
use thiserror::Error;

use crate::{
    ast::*,
    scanner::{Token, TokenType, TokenTypeName},
    source::SourceSpan,
    SourceReference,
};

#[derive(Error, Diagnostic, Debug)]
pub enum ParserError {
    #[error("Expected closing parenthesis")]
    UnmatchedParenthesis {
        #[label("Opening parenthesis here")]
        opener: SourceSpan,
        found_token_type: TokenTypeName,
        #[label("Found {found_token_type:?} instead")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Expected a closing brace")]
    UnclosedBrace {
        #[label("Opened here")]
        opener: SourceSpan,
        found_token_type: TokenTypeName,
        #[label("Found {found_token_type:?} instead")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Expected the end of the line")]
    ExpectedEndOfLine {
        actual: TokenTypeName,
        #[label("Found {actual:?} instead of a line break")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unexpected token in expression")]
    UnexpectedExpressionToken {
        actual: TokenTypeName,
        #[label("Found {actual:?} instead of a number, variable, unary, etc.")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unexpected token at the start of a statement")]
    UnexpectedStatementToken {
        actual: TokenTypeName,
        #[label("Found {actual:?} instead of a line, instruction or control statement")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unexpected token")]
    UnexpectedToken {
        actual: TokenTypeName,
        expected: TokenTypeName,
        #[label("Found {actual:?} instead of {expected:?}")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget {
        #[label("Cannot assign to this expression")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Only function calls can be awaited")]
    AwaitWithoutCall {
        #[label("Expected a call after await")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unknown directive {name:?}")]
    UnknownDirective {
        name: String,
        #[label("Expected auto, speed, pause or goto")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Choice option outside of a choice block")]
    OptionOutsideChoice {
        #[label("Options must be inside `choice {{ ... }}`")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Statement outside of a section")]
    StatementOutsideSection {
        #[label("Add a `=== name` header before this")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
}

#[derive(Default)]
pub struct ParserOpts {
    implicit_section: Option<String>,
}
impl ParserOpts {
    /// Collect statements that appear before the first section header into a
    /// section with the given name instead of reporting them.
    pub fn with_implicit_section(self, name: impl Into<String>) -> Self {
        Self {
            implicit_section: Some(name.into()),
        }
    }
}

pub struct Parser<Stream: Iterator<Item = Token>> {
    opts: ParserOpts,
    token_stream: Peekable<Stream>,
    current_token: Token,
    source_reference: SourceReference,
    recovered_errors: Vec<ParserError>,
}

impl<Stream: Iterator<Item = Token>> Parser<Stream> {
    pub fn parse(
        token_stream: Stream,
        source_reference: SourceReference,
        opts: ParserOpts,
    ) -> (Program, Vec<ParserError>) {
        let mut parser = Parser {
            opts,
            token_stream: token_stream.peekable(),
            current_token: Token::new(SourceSpan::default(), TokenType::Eof),
            source_reference,
            recovered_errors: Vec::new(),
        };
        let program = parser.parse_program();
        (program, parser.recovered_errors)
    }
}

impl<Stream: Iterator<Item = Token>> Parser<Stream> {
    fn parse_program(&mut self) -> Program {
        let mut sections = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_type() {
                TokenType::Eof => break,
                TokenType::SectionMarker => {
                    if let Some(section) = self.parse_section() {
                        sections.push(section);
                    }
                }
                _ => {
                    let start = self.peek_or_eof().span;
                    let body = self.parse_block(false);
                    let found_at = start.to(self.current_token.span);
                    match &self.opts.implicit_section {
                        Some(name) if sections.is_empty() => sections.push(Section {
                            name: Identifier {
                                name: name.clone(),
                                source_span: start,
                            },
                            header_span: start,
                            body,
                        }),
                        _ => self
                            .recovered_errors
                            .push(ParserError::StatementOutsideSection {
                                found_at,
                                source_code: self.source_reference.clone(),
                            }),
                    }
                }
            }
        }
        Program {
            sections,
            source_reference: self.source_reference.clone(),
        }
    }
    /// Parses a header and its body. A malformed header still consumes the
    /// body so its statements aren't reported a second time.
    fn parse_section(&mut self) -> Option<Section> {
        self.advance();
        let marker_span = self.current_token.span;
        let header = self.parse_section_name().and_then(|name| {
            self.consume_token(TokenType::SectionMarker);
            self.consume_line_end()?;
            Ok(name)
        });
        let header_span = marker_span.to(self.current_token.span);
        match header {
            Ok(name) => Some(Section {
                name,
                header_span,
                body: self.parse_block(false),
            }),
            Err(err) => {
                self.recovered_errors.push(err);
                self.synchronize();
                self.parse_block(false);
                None
            }
        }
    }
    fn parse_block(&mut self, in_braces: bool) -> Vec<Stmt> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_type() {
                TokenType::Eof | TokenType::SectionMarker => break,
                TokenType::CloseBrace if in_braces => break,
                _ => {}
            }
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.recovered_errors.push(err);
                    self.synchronize();
                }
            }
        }
        statements
    }
    fn parse_braced_block(&mut self) -> Result<Vec<Stmt>, ParserError> {
        let open_span = self
            .consume_token_or_default_error(&TokenType::OpenBrace)?
            .span;
        self.consume_line_end()?;
        let body = self.parse_block(true);
        self.consume_close_brace(open_span)?;
        Ok(body)
    }
    fn parse_stmt(&mut self) -> Result<Stmt, ParserError> {
        let next = self.peek_or_eof().clone();
        let stmt = match next.token_type {
            TokenType::Tilde => {
                self.advance();
                Stmt::Instruction(self.parse_instruction_expr()?)
            }
            TokenType::Goto | TokenType::Arrow => {
                self.advance();
                Stmt::Goto(self.parse_section_name()?)
            }
            TokenType::End => {
                self.advance();
                Stmt::End(next.span)
            }
            TokenType::If => {
                self.advance();
                Stmt::If(self.parse_if_stmt(next.span)?)
            }
            TokenType::Choice => {
                self.advance();
                let open_span = self
                    .consume_token_or_default_error(&TokenType::OpenBrace)?
                    .span;
                self.consume_line_end()?;
                let items = self.parse_choice_items();
                let close_span = self.consume_close_brace(open_span)?;
                Stmt::Choice(ChoiceStmt {
                    items,
                    source_span: next.span.to(close_span),
                })
            }
            TokenType::HashOpen => {
                self.advance();
                Stmt::Hash(self.parse_hash_body(next.span)?)
            }
            TokenType::Speaker => {
                self.advance();
                let speaker = self.parse_identifier()?;
                let hash_span = self
                    .consume_token_or_default_error(&TokenType::HashOpen)?
                    .span;
                let hash = self.parse_hash_body(hash_span)?;
                Stmt::Speaker(SpeakerStmt {
                    source_span: next.span.to(hash.source_span),
                    speaker,
                    hash,
                })
            }
            TokenType::Star => {
                return Err(ParserError::OptionOutsideChoice {
                    found_at: next.span,
                    source_code: self.source_reference.clone(),
                })
            }
            TokenType::Identifier(_)
            | TokenType::OpenBrace
            | TokenType::Colon
            | TokenType::Text(_) => Stmt::Line(self.parse_line_stmt()?),
            other => {
                return Err(ParserError::UnexpectedStatementToken {
                    actual: (&other).into(),
                    found_at: next.span,
                    source_code: self.source_reference.clone(),
                })
            }
        };
        self.consume_line_end()?;
        Ok(stmt)
    }
    fn parse_if_stmt(&mut self, if_span: SourceSpan) -> Result<IfStmt, ParserError> {
        let mut branches = Vec::new();
        let mut else_body = None;
        loop {
            let condition = self.parse_expr()?;
            let body = self.parse_braced_block()?;
            branches.push(ConditionalBranch { condition, body });
            if self.consume_token(TokenType::Else).is_none() {
                break;
            }
            if self.consume_token(TokenType::If).is_none() {
                else_body = Some(self.parse_braced_block()?);
                break;
            }
        }
        Ok(IfStmt {
            branches,
            else_body,
            source_span: if_span.to(self.current_token.span),
        })
    }
    fn parse_line_stmt(&mut self) -> Result<LineStmt, ParserError> {
        let start = self.peek_or_eof().span;
        let mut speakers = Vec::new();
        let mut text = Vec::new();
        loop {
            match self.peek_type() {
                TokenType::Identifier(_) => {
                    speakers.push(SpeakerRef::Named(self.parse_identifier()?));
                }
                TokenType::OpenBrace => {
                    self.advance();
                    let open_span = self.current_token.span;
                    let expr = self.parse_expr()?;
                    self.consume_close_brace(open_span)?;
                    let names_speaker =
                        matches!(self.peek_type(), TokenType::Comma | TokenType::Colon);
                    match expr {
                        Expr::Variable(identifier) if names_speaker => {
                            speakers.push(SpeakerRef::Variable(identifier))
                        }
                        expr if speakers.is_empty() => {
                            text.push(TextSegment::Placeholder(expr));
                            break;
                        }
                        _ => {
                            let next = self.peek_or_eof();
                            return Err(ParserError::UnexpectedToken {
                                actual: (&next.token_type).into(),
                                expected: TokenTypeName::Colon,
                                found_at: next.span,
                                source_code: self.source_reference.clone(),
                            });
                        }
                    }
                }
                _ => break,
            }
            if !text.is_empty() || self.consume_token(TokenType::Comma).is_none() {
                break;
            }
        }
        if text.is_empty() {
            if speakers.is_empty() {
                self.consume_token(TokenType::Colon);
            } else {
                self.consume_token_or_default_error(&TokenType::Colon)?;
            }
        }

        if let Some(open_span) = self.parse_text_segments(&mut text)? {
            let next = self.peek_or_eof();
            return Err(ParserError::UnexpectedExpressionToken {
                actual: (&next.token_type).into(),
                found_at: open_span,
                source_code: self.source_reference.clone(),
            });
        }

        let mut directives = Vec::new();
        let mut hash: Option<HashBlock> = None;
        loop {
            if let Some(open_span) = self.consume_token_to_span(TokenType::DirectiveOpen) {
                self.parse_directives(&mut directives)?;
                let source_code = self.source_reference.clone();
                self.consume_token_or_error(&TokenType::DirectiveClose, |token| {
                    ParserError::UnexpectedToken {
                        actual: (&token.token_type).into(),
                        expected: TokenTypeName::DirectiveClose,
                        found_at: open_span.to(token.span),
                        source_code: source_code.clone(),
                    }
                })?;
            } else if let Some(open_span) = self.consume_token_to_span(TokenType::HashOpen) {
                let block = self.parse_hash_body(open_span)?;
                match &mut hash {
                    Some(existing) => {
                        existing.source_span = existing.source_span.to(block.source_span);
                        existing.entries.extend(block.entries);
                    }
                    None => hash = Some(block),
                }
            } else if let Some(arrow_span) = self.consume_token_to_span(TokenType::Arrow) {
                let target = self.parse_section_name()?;
                let span = arrow_span.to(target.source_span);
                directives.push(WithSpan::new(DirectiveKind::Goto(target), span));
            } else {
                break;
            }
        }

        Ok(LineStmt {
            speakers,
            text: trim_segments(text),
            directives,
            hash,
            source_span: start.to(self.current_token.span),
        })
    }
    /// Collects text and placeholders. Returns the span of a trailing `{` that
    /// opens a block rather than a placeholder.
    fn parse_text_segments(
        &mut self,
        segments: &mut Vec<TextSegment>,
    ) -> Result<Option<SourceSpan>, ParserError> {
        loop {
            if let Some(text) = self.consume_match(|token| match &token.token_type {
                TokenType::Text(text) => Some(WithSpan::new(text.clone(), token.span)),
                _ => None,
            }) {
                segments.push(TextSegment::Text(text));
                continue;
            }
            if let Some(open_span) = self.consume_token_to_span(TokenType::OpenBrace) {
                if matches!(self.peek_type(), TokenType::Newline | TokenType::Eof) {
                    return Ok(Some(open_span));
                }
                let expr = self.parse_expr()?;
                self.consume_close_brace(open_span)?;
                segments.push(TextSegment::Placeholder(expr));
                continue;
            }
            return Ok(None);
        }
    }
    fn parse_directives(&mut self, directives: &mut Vec<Directive>) -> Result<(), ParserError> {
        loop {
            let next = self.peek_or_eof().clone();
            let directive = match &next.token_type {
                TokenType::Goto => {
                    self.advance();
                    let target = self.parse_section_name()?;
                    let span = next.span.to(target.source_span);
                    WithSpan::new(DirectiveKind::Goto(target), span)
                }
                TokenType::Identifier(name) => {
                    self.advance();
                    let kind = match name.as_str() {
                        "auto" => DirectiveKind::Auto,
                        "speed" => DirectiveKind::Speed(self.parse_expr()?),
                        "pause" => DirectiveKind::Pause(self.parse_expr()?),
                        _ => {
                            return Err(ParserError::UnknownDirective {
                                name: name.clone(),
                                found_at: next.span,
                                source_code: self.source_reference.clone(),
                            })
                        }
                    };
                    WithSpan::new(kind, next.span.to(self.current_token.span))
                }
                other => {
                    return Err(ParserError::UnexpectedToken {
                        actual: other.into(),
                        expected: TokenTypeName::Identifier,
                        found_at: next.span,
                        source_code: self.source_reference.clone(),
                    })
                }
            };
            directives.push(directive);
            if self.consume_token(TokenType::Comma).is_none() {
                return Ok(());
            }
        }
    }
    /// Parses `key: value..., flag` pairs after a `#{` up to the closing brace.
    fn parse_hash_body(&mut self, open_span: SourceSpan) -> Result<HashBlock, ParserError> {
        let mut entries = Vec::new();
        if !matches!(self.peek_type(), TokenType::CloseBrace) {
            loop {
                let key = self.parse_hash_key()?;
                let mut values = Vec::new();
                if self.consume_token(TokenType::Colon).is_some() {
                    loop {
                        values.push(self.parse_expr()?);
                        if matches!(
                            self.peek_type(),
                            TokenType::Comma | TokenType::CloseBrace | TokenType::Newline | TokenType::Eof
                        ) {
                            break;
                        }
                    }
                }
                entries.push(HashEntry { key, values });
                if self.consume_token(TokenType::Comma).is_none() {
                    break;
                }
            }
        }
        let close_span = self.consume_close_brace(open_span)?;
        Ok(HashBlock {
            entries,
            source_span: open_span.to(close_span),
        })
    }
    fn parse_hash_key(&mut self) -> Result<Identifier, ParserError> {
        if let Some(identifier) = self.consume_match(|token| match &token.token_type {
            TokenType::String(name) => Some(Identifier {
                name: name.clone(),
                source_span: token.span,
            }),
            _ => None,
        }) {
            return Ok(identifier);
        }
        self.parse_identifier()
    }
    fn parse_choice_items(&mut self) -> Vec<ChoiceItem> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(
                self.peek_type(),
                TokenType::CloseBrace | TokenType::Eof | TokenType::SectionMarker
            ) {
                break;
            }
            match self.parse_choice_item() {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.recovered_errors.push(err);
                    self.synchronize();
                }
            }
        }
        items
    }
    fn parse_braced_choice_items(&mut self) -> Result<Vec<ChoiceItem>, ParserError> {
        let open_span = self
            .consume_token_or_default_error(&TokenType::OpenBrace)?
            .span;
        self.consume_line_end()?;
        let items = self.parse_choice_items();
        self.consume_close_brace(open_span)?;
        Ok(items)
    }
    fn parse_choice_item(&mut self) -> Result<ChoiceItem, ParserError> {
        if let Some(star_span) = self.consume_token_to_span(TokenType::Star) {
            let guard = match self.consume_token_to_span(TokenType::OpenBracket) {
                Some(_) => {
                    let guard = self.parse_expr()?;
                    self.consume_token_or_default_error(&TokenType::CloseBracket)?;
                    Some(guard)
                }
                None => None,
            };
            let mut text = Vec::new();
            let mut body_open = self.parse_text_segments(&mut text)?;
            let mut target = None;
            if body_open.is_none() && self.consume_token(TokenType::Arrow).is_some() {
                target = Some(self.parse_section_name()?);
                body_open = self.consume_token_to_span(TokenType::OpenBrace);
            }
            let body = match body_open {
                Some(open_span) => {
                    self.consume_line_end()?;
                    let body = self.parse_block(true);
                    self.consume_close_brace(open_span)?;
                    Some(body)
                }
                None => None,
            };
            let source_span = star_span.to(self.current_token.span);
            self.consume_line_end()?;
            return Ok(ChoiceItem::Option(ChoiceOption {
                guard,
                text: trim_segments(text),
                target,
                body,
                source_span,
            }));
        }

        if let Some(if_span) = self.consume_token_to_span(TokenType::If) {
            let mut branches = Vec::new();
            let mut else_items = None;
            loop {
                let condition = self.parse_expr()?;
                let items = self.parse_braced_choice_items()?;
                branches.push(ChoiceFilterBranch { condition, items });
                if self.consume_token(TokenType::Else).is_none() {
                    break;
                }
                if self.consume_token(TokenType::If).is_none() {
                    else_items = Some(self.parse_braced_choice_items()?);
                    break;
                }
            }
            let source_span = if_span.to(self.current_token.span);
            self.consume_line_end()?;
            return Ok(ChoiceItem::Filter(ChoiceFilter {
                branches,
                else_items,
                source_span,
            }));
        }

        let next = self.peek_or_eof();
        Err(ParserError::UnexpectedToken {
            actual: (&next.token_type).into(),
            expected: TokenTypeName::Star,
            found_at: next.span,
            source_code: self.source_reference.clone(),
        })
    }
    /// Expressions at the top of an instruction may also be assignments.
    fn parse_instruction_expr(&mut self) -> Result<Expr, ParserError> {
        let expr = self.parse_expr()?;
        let operator = self.consume_match(|token| {
            let operator = match token.token_type {
                TokenType::Equal => AssignOperator::Assign,
                TokenType::PlusEqual => AssignOperator::AddAssign,
                TokenType::MinusEqual => AssignOperator::SubtractAssign,
                TokenType::StarEqual => AssignOperator::MultiplyAssign,
                TokenType::SlashEqual => AssignOperator::DivideAssign,
                _ => return None,
            };
            Some(WithSpan::new(operator, token.span))
        });
        match operator {
            None => Ok(expr),
            Some(operator) => {
                let value = self.parse_expr()?;
                let target = match expr {
                    Expr::Variable(identifier) => identifier,
                    other => {
                        return Err(ParserError::InvalidAssignmentTarget {
                            found_at: other.source_span(),
                            source_code: self.source_reference.clone(),
                        })
                    }
                };
                Ok(Expr::Assignment(AssignmentExpr {
                    target,
                    operator,
                    value: Box::new(value),
                }))
            }
        }
    }
    fn parse_expr(&mut self) -> Result<Expr, ParserError> {
        self.parse_or_expr()
    }
    fn parse_or_expr(&mut self) -> Result<Expr, ParserError> {
        let mut last_expr = self.parse_and_expr()?;

        while let Some(or_span) = self.consume_token_to_span(TokenType::Or) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_and_expr()?),
                operator: WithSpan::new(BinaryOperator::LogicalOr, or_span),
            });
        }

        Ok(last_expr)
    }
    fn parse_and_expr(&mut self) -> Result<Expr, ParserError> {
        let mut last_expr = self.parse_equality_expr()?;

        while let Some(and_span) = self.consume_token_to_span(TokenType::And) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_equality_expr()?),
                operator: WithSpan::new(BinaryOperator::LogicalAnd, and_span),
            });
        }

        Ok(last_expr)
    }
    fn parse_equality_expr(&mut self) -> Result<Expr, ParserError> {
        let mut last_expr = self.parse_comparison_expr()?;

        while let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::BangEqual => Some(WithSpan::new(BinaryOperator::NotEqualTo, token.span)),
            TokenType::EqualEqual => Some(WithSpan::new(BinaryOperator::EqualTo, token.span)),
            _ => None,
        }) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_comparison_expr()?),
                operator,
            });
        }

        Ok(last_expr)
    }
    fn parse_comparison_expr(&mut self) -> Result<Expr, ParserError> {
        let mut last_expr = self.parse_term_expr()?;

        while let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::Less => Some(WithSpan::new(BinaryOperator::LessThan, token.span)),
            TokenType::LessEqual => {
                Some(WithSpan::new(BinaryOperator::LessThanOrEqualTo, token.span))
            }
            TokenType::Greater => Some(WithSpan::new(BinaryOperator::GreaterThan, token.span)),
            TokenType::GreaterEqual => Some(WithSpan::new(
                BinaryOperator::GreaterThanOrEqualTo,
                token.span,
            )),
            _ => None,
        }) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_term_expr()?),
                operator,
            });
        }

        Ok(last_expr)
    }
    fn parse_term_expr(&mut self) -> Result<Expr, ParserError> {
        let mut last_expr = self.parse_factor_expr()?;

        while let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::Minus => Some(WithSpan::new(BinaryOperator::Minus, token.span)),
            TokenType::Plus => Some(WithSpan::new(BinaryOperator::Plus, token.span)),
            _ => None,
        }) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_factor_expr()?),
                operator,
            });
        }

        Ok(last_expr)
    }
    fn parse_factor_expr(&mut self) -> Result<Expr, ParserError> {
        let mut last_expr = self.parse_unary_expr()?;

        while let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::Star => Some(WithSpan::new(BinaryOperator::Multiply, token.span)),
            TokenType::Slash => Some(WithSpan::new(BinaryOperator::Divide, token.span)),
            TokenType::Percent => Some(WithSpan::new(BinaryOperator::Modulo, token.span)),
            _ => None,
        }) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_unary_expr()?),
                operator,
            });
        }

        Ok(last_expr)
    }
    fn parse_unary_expr(&mut self) -> Result<Expr, ParserError> {
        if let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::Minus => Some(WithSpan::new(UnaryOperator::Minus, token.span)),
            TokenType::Bang => Some(WithSpan::new(UnaryOperator::Not, token.span)),
            _ => None,
        }) {
            Ok(Expr::Unary(UnaryExpr {
                operator,
                right: Box::new(self.parse_unary_expr()?),
            }))
        } else {
            self.parse_primary_expr()
        }
    }
    fn finish_call(
        &mut self,
        callee: Identifier,
        await_span: Option<SourceSpan>,
    ) -> Result<Expr, ParserError> {
        let open_span = self.current_token.span;
        let mut arguments = Vec::new();
        let close_paren_span = match self.consume_token_to_span(TokenType::CloseParen) {
            Some(span) => span,
            None => {
                loop {
                    arguments.push(self.parse_expr()?);
                    if self.consume_token(TokenType::Comma).is_none() {
                        break;
                    }
                }
                let source_code = self.source_reference.clone();
                self.consume_token_or_error(&TokenType::CloseParen, |tok| {
                    ParserError::UnmatchedParenthesis {
                        found_token_type: (&tok.token_type).into(),
                        found_at: tok.span,
                        opener: open_span,
                        source_code: source_code.clone(),
                    }
                })?
                .span
            }
        };
        Ok(Expr::Call(CallExpr {
            callee,
            arguments,
            await_span,
            close_paren_span,
        }))
    }
    fn parse_primary_expr(&mut self) -> Result<Expr, ParserError> {
        let literal = self.consume_match(|token| {
            Some(LiteralExpr {
                source_span: token.span,
                value: match &token.token_type {
                    TokenType::False => LiteralValue::Bool(false),
                    TokenType::True => LiteralValue::Bool(true),
                    TokenType::Number(number) => LiteralValue::Float(*number),
                    TokenType::String(string) => LiteralValue::String(string.clone()),
                    _ => return None,
                },
            })
        });

        if let Some(literal) = literal {
            return Ok(Expr::Literal(literal));
        }

        if let Some(await_span) = self.consume_token_to_span(TokenType::Await) {
            let callee = self.parse_identifier()?;
            if self.consume_token(TokenType::OpenParen).is_none() {
                return Err(ParserError::AwaitWithoutCall {
                    found_at: await_span.to(callee.source_span),
                    source_code: self.source_reference.clone(),
                });
            }
            return self.finish_call(callee, Some(await_span));
        }

        if let Some(identifier) = self.consume_match(|token| match &token.token_type {
            TokenType::Identifier(name) => Some(Identifier {
                name: name.clone(),
                source_span: token.span,
            }),
            _ => None,
        }) {
            if self.consume_token(TokenType::OpenParen).is_some() {
                return self.finish_call(identifier, None);
            }
            return Ok(Expr::Variable(identifier));
        }

        if let Some(opening_span) = self.consume_token_to_span(TokenType::OpenParen) {
            let expr = self.parse_expr()?;
            let source_code = self.source_reference.clone();
            self.consume_token_or_error(&TokenType::CloseParen, |tok| {
                ParserError::UnmatchedParenthesis {
                    found_token_type: (&tok.token_type).into(),
                    found_at: tok.span,
                    opener: opening_span,
                    source_code: source_code.clone(),
                }
            })?;
            return Ok(Expr::Grouping(GroupingExpr {
                expr: Box::new(expr),
            }));
        }

        let unknown_tok = self.peek_or_eof();
        Err(ParserError::UnexpectedExpressionToken {
            actual: (&unknown_tok.token_type).into(),
            found_at: unknown_tok.span,
            source_code: self.source_reference.clone(),
        })
    }
    fn parse_identifier(&mut self) -> Result<Identifier, ParserError> {
        let identifier = {
            let next = self.peek_or_eof();
            match &next.token_type {
                TokenType::Identifier(name) => Ok(Identifier {
                    name: name.to_string(),
                    source_span: next.span,
                }),
                other => Err(ParserError::UnexpectedToken {
                    actual: other.into(),
                    expected: TokenTypeName::Identifier,
                    found_at: next.span,
                    source_code: self.source_reference.clone(),
                }),
            }
        };
        if identifier.is_ok() {
            self.advance();
        }
        identifier
    }
    /// Section names may be keywords, so `goto end` can name a section `end`.
    fn parse_section_name(&mut self) -> Result<Identifier, ParserError> {
        let keyword = self.consume_match(|token| {
            let name = match token.token_type {
                TokenType::End => "end",
                TokenType::Choice => "choice",
                TokenType::Speaker => "speaker",
                TokenType::If => "if",
                TokenType::Else => "else",
                TokenType::Goto => "goto",
                TokenType::Await => "await",
                TokenType::And => "and",
                TokenType::Or => "or",
                TokenType::True => "true",
                TokenType::False => "false",
                _ => return None,
            };
            Some(Identifier {
                name: name.to_string(),
                source_span: token.span,
            })
        });
        match keyword {
            Some(identifier) => Ok(identifier),
            None => self.parse_identifier(),
        }
    }
    /// Skips the rest of the current line.
    fn synchronize(&mut self) {
        while !matches!(self.peek_type(), TokenType::Eof | TokenType::SectionMarker) {
            self.advance();
            if self.current_token.token_type == TokenType::Newline {
                break;
            }
        }
    }
    fn consume_line_end(&mut self) -> Result<(), ParserError> {
        match self.peek_type() {
            TokenType::Eof => Ok(()),
            TokenType::Newline => {
                self.advance();
                Ok(())
            }
            _ => {
                let next = self.peek_or_eof();
                Err(ParserError::ExpectedEndOfLine {
                    actual: (&next.token_type).into(),
                    found_at: next.span,
                    source_code: self.source_reference.clone(),
                })
            }
        }
    }
    fn consume_close_brace(&mut self, opener: SourceSpan) -> Result<SourceSpan, ParserError> {
        let source_code = self.source_reference.clone();
        Ok(self
            .consume_token_or_error(&TokenType::CloseBrace, |tok| ParserError::UnclosedBrace {
                opener,
                found_token_type: (&tok.token_type).into(),
                found_at: tok.span,
                source_code: source_code.clone(),
            })?
            .span)
    }
    fn skip_newlines(&mut self) {
        while self.consume_token(TokenType::Newline).is_some() {}
    }
    fn advance(&mut self) -> bool {
        match self.token_stream.next() {
            Some(token) => {
                self.current_token = token;
                true
            }
            None => false,
        }
    }
    fn peek_or_eof(&mut self) -> &Token {
        let current = &self.current_token;
        self.token_stream.peek().unwrap_or(current)
    }
    fn peek_type(&mut self) -> &TokenType {
        &self.peek_or_eof().token_type
    }
    fn consume_match<T: Sized, F: Fn(&Token) -> Option<T>>(&mut self, check: F) -> Option<T> {
        match self.token_stream.peek() {
            None => None,
            Some(token) => match check(token) {
                Some(value) => {
                    self.advance();
                    Some(value)
                }
                None => None,
            },
        }
    }
    fn consume_token(&mut self, token_type: TokenType) -> Option<&Token> {
        match self.token_stream.peek() {
            Some(token) if token.token_type == token_type => {
                self.advance();
                Some(&self.current_token)
            }
            Some(_) | None => None,
        }
    }
    fn consume_token_to_span(&mut self, token_type: TokenType) -> Option<SourceSpan> {
        self.consume_token(token_type).map(|token| token.span)
    }
    fn consume_token_or_error<F: Fn(&Token) -> ParserError>(
        &mut self,
        token_type: &TokenType,
        make_err: F,
    ) -> Result<&Token, ParserError> {
        match self.token_stream.peek() {
            Some(token) if token.token_type == *token_type => {
                self.advance();
                Ok(&self.current_token)
            }
            Some(other_token) => Err(make_err(other_token)),
            None => Err(make_err(&self.current_token)),
        }
    }
    fn consume_token_or_default_error(
        &mut self,
        token_type: &TokenType,
    ) -> Result<&Token, ParserError> {
        let source_code = self.source_reference.clone();
        self.consume_token_or_error(token_type, |actual| ParserError::UnexpectedToken {
            actual: (&actual.token_type).into(),
            expected: token_type.into(),
            found_at: actual.span,
            source_code: source_code.clone(),
        })
    }
}

/// Strips the whitespace that separates text from the speaker prefix and from
/// trailing directives, then drops segments left empty.
fn trim_segments(segments: Vec<TextSegment>) -> Vec<TextSegment> {
    let last = segments.len().saturating_sub(1);
    segments
        .into_iter()
        .enumerate()
        .filter_map(|(idx, segment)| match segment {
            TextSegment::Text(text) => {
                let mut trimmed = text.inner().as_str();
                if idx == 0 {
                    trimmed = trimmed.trim_start();
                }
                if idx == last {
                    trimmed = trimmed.trim_end();
                }
                (!trimmed.is_empty())
                    .then(|| TextSegment::Text(WithSpan::new(trimmed.to_string(), text.source_span())))
            }
            placeholder => Some(placeholder),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scanner;
    use pretty_assertions::assert_eq;

    fn parse_with(source: &str, opts: ParserOpts) -> (Program, Vec<ParserError>) {
        let reference = SourceReference::new("test".into(), source.into());
        let tokens = Scanner::new(source, reference.clone()).filter_map(Result::ok);
        Parser::parse(tokens, reference, opts)
    }

    fn parse(source: &str) -> String {
        let (program, errors) = parse_with(source, ParserOpts::default());
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        program.to_string()
    }

    #[test]
    fn lines_with_directives_and_hash() {
        assert_eq!(
            parse("=== start\nA: Hello {name}! <<speed 2>> #{mood: happy}\ngoto next\n=== next ===\nend\n"),
            concat!(
                "(section start [(line [A] [\"Hello \" {name} \"!\"] <<(speed 2)>> #{mood: happy}) (goto next)])\n",
                "(section next [(end)])\n"
            )
        );
    }

    #[test]
    fn speakers_and_narration() {
        assert_eq!(
            parse("=== s\n{hero}, B: hi -> s\n{name} arrives.\n: Quiet.\n"),
            concat!(
                "(section s [(line [{hero} B] [\"hi\"] <<(goto s)>>) ",
                "(line [] [{name} \" arrives.\"]) ",
                "(line [] [\"Quiet.\"])])\n"
            )
        );
    }

    #[test]
    fn instruction_precedence() {
        assert_eq!(
            parse("=== s\n~ x += 1 + 2 * 3 % 4\n~ await fetch(a, \"b\") or !done and -y < 2\n"),
            concat!(
                "(section s [(~ (+= x (+ 1 (% (* 2 3) 4)))) ",
                "(~ (or (await (call fetch a \"b\")) (and (! done) (< (- y) 2))))])\n"
            )
        );
    }

    #[test]
    fn conditionals_nest() {
        assert_eq!(
            parse("=== s\nif a {\n  if b {\n    end\n  }\n} else if c {\n  goto s\n} else {\n  ~ x = 1\n}\n"),
            "(section s [(if a [(if b [(end)])] c [(goto s)] else [(~ (= x 1))])])\n"
        );
    }

    #[test]
    fn choices_with_filters_and_bodies() {
        let source = "=== s
choice {
  *[gold > 1] Buy -> shop
  if met {
    * Hi again
  } else {
    * Hello
  }
  * Leave {
    Bye.
  }
}
";
        assert_eq!(
            parse(source),
            concat!(
                "(section s [(choice (* [(> gold 1)] [\"Buy\"] -> shop) ",
                "(filter met [(* [\"Hi again\"])] else [(* [\"Hello\"])]) ",
                "(* [\"Leave\"] [(line [] [\"Bye.\"])]))])\n"
            )
        );
    }

    #[test]
    fn speaker_and_standalone_hash() {
        assert_eq!(
            parse("=== s\nspeaker A #{color: \"red\", shy}\n#{\"k\": 1 2}\n"),
            "(section s [(speaker A #{color: \"red\", shy}) #{k: 1 2}])\n"
        );
    }

    #[test]
    fn statements_outside_sections() {
        let (program, errors) = parse_with("A: hi\n=== s\nend\n", ParserOpts::default());
        assert_eq!(program.sections.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ParserError::StatementOutsideSection { .. }
        ));

        let (program, errors) = parse_with(
            "A: hi\n=== s\nend\n",
            ParserOpts::default().with_implicit_section("main"),
        );
        assert!(errors.is_empty());
        assert_eq!(program.sections[0].name.name, "main");
        assert_eq!(program.sections[1].name.name, "s");
    }

    #[test]
    fn recovers_at_the_next_line() {
        let (program, errors) = parse_with(
            "=== s\n~ x = \n~ 1 = 2\n* stray\nA: still here\n~ await x\n",
            ParserOpts::default(),
        );
        assert_eq!(errors.len(), 4);
        assert!(matches!(
            errors[0],
            ParserError::UnexpectedExpressionToken {
                actual: TokenTypeName::Newline,
                ..
            }
        ));
        assert!(matches!(
            errors[1],
            ParserError::InvalidAssignmentTarget { .. }
        ));
        assert!(matches!(errors[2], ParserError::OptionOutsideChoice { .. }));
        assert!(matches!(errors[3], ParserError::AwaitWithoutCall { .. }));
        assert_eq!(
            program.to_string(),
            "(section s [(line [A] [\"still here\"])])\n"
        );
    }

    #[test]
    fn keywords_name_sections() {
        assert_eq!(
            parse("=== start\nA: bye -> end\ngoto end\n=== end\nend\n"),
            concat!(
                "(section start [(line [A] [\"bye\"] <<(goto end)>>) (goto end)])\n",
                "(section end [(end)])\n"
            )
        );
    }

    #[test]
    fn unknown_directive() {
        let (_, errors) = parse_with("=== s\nA: hi <<wobble>>\n", ParserOpts::default());
        assert!(matches!(
            &errors[..],
            [ParserError::UnknownDirective { name, .. }] if name == "wobble"
        ));
    }
}
