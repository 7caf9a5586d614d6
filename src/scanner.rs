use crate::{
    source::{SourceOffset, SourceSpan},
    SourceReference,
};
use derive_new::new;
use miette::{Diagnostic, Result};
use std::collections::VecDeque;
use strum::EnumDiscriminants;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ScannerError {
    #[error("Unexpected character: {character:?}")]
    UnexpectedCharacter {
        character: char,
        #[label("Character found here")]
        at: SourceOffset,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unterminated string")]
    UnterminatedString {
        #[label("String")]
        at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unknown escape character {character:?}")]
    UnknownEscape {
        character: char,
        #[label("Character found here")]
        at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
}

#[derive(Debug, Clone, new)]
pub struct Token {
    pub span: SourceSpan,
    pub token_type: TokenType,
}

#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(TokenTypeName))]
pub enum TokenType {
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
    Comma,
    Colon,
    Minus,
    Plus,
    Slash,
    Star,
    Percent,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    Arrow,
    Tilde,
    HashOpen,
    DirectiveOpen,
    DirectiveClose,
    SectionMarker,
    Identifier(String),
    String(String),
    Number(f64),
    Text(String),
    And,
    Or,
    True,
    False,
    If,
    Else,
    Choice,
    Goto,
    End,
    Speaker,
    Await,
    Newline,
    Eof,
}

/// Words that make a line a statement rather than dialog when they open it.
const STATEMENT_KEYWORDS: &[&str] = &["if", "else", "choice", "goto", "end", "speaker"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    LineStart,
    Code,
    /// Code that turns into line text at the first `:`.
    SpeakerList,
    Text,
    /// `{ ... }` expression embedded in text.
    Placeholder { depth: usize },
    /// `*[ ... ]` option guard.
    Guard { depth: usize },
}

/// Tokenizer for dialog scripts.
///
/// Scripts are line oriented and mix two lexical worlds: statement lines and
/// expressions are scanned as code, while the body of a dialog line or choice
/// option is scanned as free text with `{expr}` placeholders. The scanner
/// decides which world applies at the start of every line.
pub struct Scanner<'a> {
    source: &'a str,
    source_reference: SourceReference,
    pos: usize,
    mode: Mode,
    at_end: bool,
    pending: VecDeque<Result<Token, ScannerError>>,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str, source_reference: SourceReference) -> Self {
        Self {
            source,
            source_reference,
            pos: 0,
            mode: Mode::LineStart,
            at_end: false,
            pending: VecDeque::new(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn rest_of_line(&self) -> &'a str {
        let rest = self.rest();
        rest.split('\n').next().unwrap_or(rest)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.rest().chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.rest().chars().next()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn advance_while<F: Fn(char) -> bool>(&mut self, check: F) {
        while let Some(ch) = self.peek(0) {
            if !check(ch) {
                break;
            }
            self.advance();
        }
    }

    fn skip_inline_whitespace(&mut self) {
        self.advance_while(|ch| ch == ' ' || ch == '\t' || ch == '\r');
    }

    fn push(&mut self, start: usize, token_type: TokenType) {
        self.pending
            .push_back(Ok(Token::new((start..self.pos).into(), token_type)));
    }

    fn push_error(&mut self, error: ScannerError) {
        self.pending.push_back(Err(error));
    }

    fn yield_conditional(
        &mut self,
        start: usize,
        target_ch: char,
        token_if_found: TokenType,
        token_if_not_found: TokenType,
    ) {
        let token = if self.peek(0) == Some(target_ch) {
            self.advance();
            token_if_found
        } else {
            token_if_not_found
        };
        self.push(start, token);
    }

    fn end_line(&mut self) {
        let start = self.pos;
        if self.advance().is_some() {
            self.push(start, TokenType::Newline);
        } else {
            self.push(start, TokenType::Newline);
            self.push(start, TokenType::Eof);
            self.at_end = true;
        }
        self.mode = Mode::LineStart;
    }

    /// Classifies a fresh line and queues at least one token (or finishes).
    fn scan_line_start(&mut self) {
        loop {
            self.skip_inline_whitespace();
            let line = self.rest_of_line();
            if self.peek(0).is_none() {
                self.push(self.pos, TokenType::Eof);
                self.at_end = true;
                return;
            }
            if line.trim().is_empty() || line.starts_with("//") {
                self.pos += line.len();
                self.advance();
                continue;
            }
            break;
        }

        let line = self.rest_of_line();
        let start = self.pos;
        if line.starts_with("===")
            || line.starts_with('~')
            || line.starts_with('}')
            || line.starts_with("#{")
            || line.starts_with("->")
            || starts_with_keyword(line)
        {
            self.mode = Mode::Code;
        } else if line.starts_with('*') {
            self.advance();
            self.push(start, TokenType::Star);
            self.skip_inline_whitespace();
            if self.peek(0) == Some('[') {
                let bracket = self.pos;
                self.advance();
                self.push(bracket, TokenType::OpenBracket);
                self.mode = Mode::Guard { depth: 0 };
            } else {
                self.mode = Mode::Text;
            }
        } else if line.starts_with(':') {
            self.advance();
            self.push(start, TokenType::Colon);
            self.mode = Mode::Text;
        } else if has_speaker_prefix(line) {
            self.mode = Mode::SpeakerList;
        } else {
            self.mode = Mode::Text;
        }
    }

    fn scan_text(&mut self) {
        let start = self.pos;
        let mut text = String::new();
        loop {
            let rest = self.rest();
            match self.peek(0) {
                None | Some('\n') => break,
                Some('\r') => {
                    self.advance();
                }
                Some('{') => break,
                Some('<') if rest.starts_with("<<") => break,
                Some('#') if rest.starts_with("#{") => break,
                Some('-') if rest.starts_with("->") => break,
                Some('\\') => {
                    let escape_start = self.pos;
                    self.advance();
                    match self.advance() {
                        Some(ch @ ('{' | '}' | '#' | '<' | '-' | '\\')) => text.push(ch),
                        Some(ch) => {
                            self.push_error(ScannerError::UnknownEscape {
                                character: ch,
                                at: (escape_start..self.pos).into(),
                                source_code: self.source_reference.clone(),
                            });
                            text.push(ch);
                        }
                        None => break,
                    }
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
        if !text.is_empty() {
            self.push(start, TokenType::Text(text));
        }

        let rest = self.rest();
        let special_start = self.pos;
        match self.peek(0) {
            None | Some('\n') => self.end_line(),
            Some('{') => {
                self.advance();
                self.push(special_start, TokenType::OpenBrace);
                let after = self.rest_of_line().trim();
                self.mode = if after.is_empty() || after.starts_with("//") {
                    Mode::Code
                } else {
                    Mode::Placeholder { depth: 0 }
                };
            }
            _ if rest.starts_with("<<") => {
                self.pos += 2;
                self.push(special_start, TokenType::DirectiveOpen);
                self.mode = Mode::Code;
            }
            _ if rest.starts_with("#{") => {
                self.pos += 2;
                self.push(special_start, TokenType::HashOpen);
                self.mode = Mode::Code;
            }
            _ => {
                self.pos += 2;
                self.push(special_start, TokenType::Arrow);
                self.mode = Mode::Code;
            }
        }
    }

    fn scan_code_token(&mut self) {
        self.skip_inline_whitespace();
        let start = self.pos;
        let next = match self.peek(0) {
            None | Some('\n') => return self.end_line(),
            Some('/') if self.peek(1) == Some('/') => {
                self.pos += self.rest_of_line().len();
                return self.end_line();
            }
            Some(_) => self.advance(),
        };

        match next {
            Some('(') => self.push(start, TokenType::OpenParen),
            Some(')') => self.push(start, TokenType::CloseParen),
            Some('{') => {
                if let Mode::Placeholder { depth } = self.mode {
                    self.mode = Mode::Placeholder { depth: depth + 1 };
                }
                self.push(start, TokenType::OpenBrace)
            }
            Some('}') => {
                self.push(start, TokenType::CloseBrace);
                match self.mode {
                    Mode::Placeholder { depth: 0 } => self.mode = Mode::Text,
                    Mode::Placeholder { depth } => self.mode = Mode::Placeholder { depth: depth - 1 },
                    _ => {}
                }
            }
            Some('[') => {
                if let Mode::Guard { depth } = self.mode {
                    self.mode = Mode::Guard { depth: depth + 1 };
                }
                self.push(start, TokenType::OpenBracket)
            }
            Some(']') => {
                self.push(start, TokenType::CloseBracket);
                match self.mode {
                    Mode::Guard { depth: 0 } => self.mode = Mode::Text,
                    Mode::Guard { depth } => self.mode = Mode::Guard { depth: depth - 1 },
                    _ => {}
                }
            }
            Some(',') => self.push(start, TokenType::Comma),
            Some(':') => {
                self.push(start, TokenType::Colon);
                if self.mode == Mode::SpeakerList {
                    self.mode = Mode::Text;
                }
            }
            Some('~') => self.push(start, TokenType::Tilde),
            Some('%') => self.push(start, TokenType::Percent),
            Some('-') if self.peek(0) == Some('>') => {
                self.advance();
                self.push(start, TokenType::Arrow)
            }
            Some('-') => self.yield_conditional(start, '=', TokenType::MinusEqual, TokenType::Minus),
            Some('+') => self.yield_conditional(start, '=', TokenType::PlusEqual, TokenType::Plus),
            Some('*') => self.yield_conditional(start, '=', TokenType::StarEqual, TokenType::Star),
            Some('/') => self.yield_conditional(start, '=', TokenType::SlashEqual, TokenType::Slash),
            Some('!') => self.yield_conditional(start, '=', TokenType::BangEqual, TokenType::Bang),
            Some('=') if self.rest().starts_with("==") => {
                self.pos += 2;
                self.push(start, TokenType::SectionMarker)
            }
            Some('=') => self.yield_conditional(start, '=', TokenType::EqualEqual, TokenType::Equal),
            Some('<') if self.peek(0) == Some('<') => {
                self.advance();
                self.push(start, TokenType::DirectiveOpen)
            }
            Some('<') => self.yield_conditional(start, '=', TokenType::LessEqual, TokenType::Less),
            Some('>') if self.peek(0) == Some('>') => {
                self.advance();
                self.push(start, TokenType::DirectiveClose)
            }
            Some('>') => {
                self.yield_conditional(start, '=', TokenType::GreaterEqual, TokenType::Greater)
            }
            Some('&') if self.peek(0) == Some('&') => {
                self.advance();
                self.push(start, TokenType::And)
            }
            Some('|') if self.peek(0) == Some('|') => {
                self.advance();
                self.push(start, TokenType::Or)
            }
            Some('#') if self.peek(0) == Some('{') => {
                self.advance();
                self.push(start, TokenType::HashOpen)
            }
            Some('"') => self.scan_string(start),
            Some(ch) if ch.is_ascii_digit() => {
                self.advance_while(|ch| ch.is_ascii_digit());
                if self.peek(0) == Some('.') && self.peek(1).map_or(false, |ch| ch.is_ascii_digit())
                {
                    self.advance();
                    self.advance_while(|ch| ch.is_ascii_digit());
                }
                let number: f64 = self.source[start..self.pos].parse().unwrap_or_default();
                self.push(start, TokenType::Number(number))
            }
            Some(ch) if is_identifier_start(ch) => {
                self.advance_while(is_identifier_char);
                let token_type = match &self.source[start..self.pos] {
                    "and" => TokenType::And,
                    "or" => TokenType::Or,
                    "true" => TokenType::True,
                    "false" => TokenType::False,
                    "if" => TokenType::If,
                    "else" => TokenType::Else,
                    "choice" => TokenType::Choice,
                    "goto" => TokenType::Goto,
                    "end" => TokenType::End,
                    "speaker" => TokenType::Speaker,
                    "await" => TokenType::Await,
                    word => TokenType::Identifier(word.to_string()),
                };
                self.push(start, token_type)
            }
            Some(ch) => self.push_error(ScannerError::UnexpectedCharacter {
                character: ch,
                at: start.into(),
                source_code: self.source_reference.clone(),
            }),
            None => {}
        }
    }

    fn scan_string(&mut self, start: usize) {
        let mut string_value = String::new();
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    self.push_error(ScannerError::UnterminatedString {
                        at: (start..self.pos).into(),
                        source_code: self.source_reference.clone(),
                    });
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    let escape_start = self.pos;
                    self.advance();
                    match self.peek(0) {
                        Some('n') => string_value.push('\n'),
                        Some('t') => string_value.push('\t'),
                        Some('"') => string_value.push('"'),
                        Some('\\') => string_value.push('\\'),
                        Some(ch) if ch != '\n' => {
                            self.push_error(ScannerError::UnknownEscape {
                                character: ch,
                                at: (escape_start..self.pos + ch.len_utf8()).into(),
                                source_code: self.source_reference.clone(),
                            });
                        }
                        _ => continue,
                    }
                    self.advance();
                }
                Some(ch) => {
                    string_value.push(ch);
                    self.advance();
                }
            }
        }
        self.push(start, TokenType::String(string_value));
    }
}

fn is_identifier_start(ch: char) -> bool {
    matches!(ch, 'a'..='z' | 'A'..='Z' | '_')
}

fn is_identifier_char(ch: char) -> bool {
    matches!(ch, 'a'..='z' | 'A'..='Z' | '_' | '0'..='9')
}

fn starts_with_keyword(line: &str) -> bool {
    STATEMENT_KEYWORDS.iter().any(|keyword| {
        line.starts_with(keyword)
            && !line[keyword.len()..]
                .chars()
                .next()
                .map_or(false, is_identifier_char)
    })
}

/// Does the line open with `Name, {variable}, ...:`?
fn has_speaker_prefix(line: &str) -> bool {
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        let braced = chars.next_if_eq(&'{').is_some();
        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        if chars.next_if(|ch| is_identifier_start(*ch)).is_none() {
            return false;
        }
        while chars.next_if(|ch| is_identifier_char(*ch)).is_some() {}
        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        if braced && chars.next_if_eq(&'}').is_none() {
            return false;
        }
        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        match chars.next() {
            Some(':') => return true,
            Some(',') => continue,
            _ => return false,
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token, ScannerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }
            if self.at_end {
                return None;
            }
            match self.mode {
                Mode::LineStart => self.scan_line_start(),
                Mode::Text => self.scan_text(),
                Mode::Code | Mode::SpeakerList | Mode::Placeholder { .. } | Mode::Guard { .. } => {
                    self.scan_code_token()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scan(source: &str) -> Vec<TokenType> {
        let reference = SourceReference::new("test".into(), source.into());
        Scanner::new(source, reference)
            .map(|token| token.unwrap().token_type)
            .collect()
    }

    fn ident(name: &str) -> TokenType {
        TokenType::Identifier(name.to_string())
    }

    fn text(text: &str) -> TokenType {
        TokenType::Text(text.to_string())
    }

    #[test]
    fn dialog_line_with_tag() {
        use TokenType::*;
        assert_eq!(
            scan("=== start\nA: Hello [pause=1] world!\n"),
            vec![
                SectionMarker,
                ident("start"),
                Newline,
                ident("A"),
                Colon,
                text(" Hello [pause=1] world!"),
                Newline,
                Eof
            ]
        );
    }

    #[test]
    fn placeholders_directives_and_hash() {
        use TokenType::*;
        assert_eq!(
            scan("{hero}, B: I have {gold + 1} coins <<pause 2>> #{loud}"),
            vec![
                OpenBrace,
                ident("hero"),
                CloseBrace,
                Comma,
                ident("B"),
                Colon,
                text(" I have "),
                OpenBrace,
                ident("gold"),
                Plus,
                Number(1.0),
                CloseBrace,
                text(" coins "),
                DirectiveOpen,
                ident("pause"),
                Number(2.0),
                DirectiveClose,
                HashOpen,
                ident("loud"),
                CloseBrace,
                Newline,
                Eof
            ]
        );
    }

    #[test]
    fn statements_and_narration() {
        use TokenType::*;
        assert_eq!(
            scan("if x >= 2 {\n  The wind howls.\n} else {\n~ x += 1 // bump\n}\nend"),
            vec![
                If,
                ident("x"),
                GreaterEqual,
                Number(2.0),
                OpenBrace,
                Newline,
                text("The wind howls."),
                Newline,
                CloseBrace,
                Else,
                OpenBrace,
                Newline,
                Tilde,
                ident("x"),
                PlusEqual,
                Number(1.0),
                Newline,
                CloseBrace,
                Newline,
                End,
                Newline,
                Eof
            ]
        );
    }

    #[test]
    fn options_with_guards_targets_and_bodies() {
        use TokenType::*;
        assert_eq!(
            scan("*[gold > 1] Buy it -> shop\n* Leave {\n"),
            vec![
                Star,
                OpenBracket,
                ident("gold"),
                Greater,
                Number(1.0),
                CloseBracket,
                text(" Buy it "),
                Arrow,
                ident("shop"),
                Newline,
                Star,
                text("Leave "),
                OpenBrace,
                Newline,
                Eof
            ]
        );
    }

    #[test]
    fn escapes_in_text_and_strings() {
        use TokenType::*;
        assert_eq!(
            scan(": a \\{b\\} \\<<c\n~ say(\"q\\\"uote\")"),
            vec![
                Colon,
                text(" a {b} <<c"),
                Newline,
                Tilde,
                ident("say"),
                OpenParen,
                String("q\"uote".to_string()),
                CloseParen,
                Newline,
                Eof
            ]
        );
    }

    #[test]
    fn reports_unexpected_characters() {
        let source = "~ x = 1 $";
        let reference = SourceReference::new("test".into(), source.into());
        let errors: Vec<_> = Scanner::new(source, reference)
            .filter_map(Result::err)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ScannerError::UnexpectedCharacter { character: '$', .. }
        ));
    }
}
