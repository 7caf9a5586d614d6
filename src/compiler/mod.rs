mod checker;
mod emitter;
mod error;

use std::collections::HashMap;

use tracing::debug;

use crate::{
    ast::*,
    bytecode::{ChoiceMarker, ExprCode, ScriptData, SegmentKind, SpeakerKind, StatementCode},
    registry::MemberRegistry,
    text::{interpolate, TextTag},
    value::{ValueType, Variant},
    Parser, ParserOpts, Scanner, SourceReference, SourceSpan,
};

use checker::TypeChecker;
use emitter::{Emitter, Label};
pub use error::{CompileError, DiagnosticRecord, ScriptDiagnostic, Severity};

#[derive(Debug, Clone)]
pub struct CompilerOpts {
    strict_warnings: bool,
    unreachable_warnings: bool,
}
impl Default for CompilerOpts {
    fn default() -> Self {
        Self {
            strict_warnings: false,
            unreachable_warnings: true,
        }
    }
}
impl CompilerOpts {
    /// Count warnings as errors in [`Compilation::has_errors`].
    pub fn with_strict_warnings(self) -> Self {
        Self {
            strict_warnings: true,
            ..self
        }
    }
    pub fn without_unreachable_warnings(self) -> Self {
        Self {
            unreachable_warnings: false,
            ..self
        }
    }
}

/// A compiled script and everything reported while producing it. The script
/// is always present, even when errors make parts of it meaningless.
#[derive(Debug)]
pub struct Compilation {
    pub script: ScriptData,
    pub diagnostics: Vec<ScriptDiagnostic>,
    source_reference: SourceReference,
    strict_warnings: bool,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| self.strict_warnings || diagnostic.severity() == Severity::Error)
    }
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        let line_index = self.source_reference.line_index();
        self.diagnostics
            .iter()
            .map(|diagnostic| diagnostic.to_record(line_index))
            .collect()
    }
    pub fn source_reference(&self) -> &SourceReference {
        &self.source_reference
    }
}

pub struct Compiler<'a> {
    emitter: Emitter,
    checker: TypeChecker<'a>,
    opts: &'a CompilerOpts,
    /// Declared sections have a definition span; names that are only
    /// referenced don't.
    sections: HashMap<String, (Label, Option<SourceSpan>)>,
    section_names: HashMap<Label, String>,
    errors: Vec<CompileError>,
    source_reference: SourceReference,
}

impl<'a> Compiler<'a> {
    /// Scans, parses and compiles `source`.
    pub fn compile_source(
        name: &str,
        source: &str,
        registry: &'a MemberRegistry,
        opts: &'a CompilerOpts,
    ) -> Compilation {
        let source_reference = SourceReference::new(name.to_string(), source.to_string());
        let mut scanner_errors = Vec::new();
        let token_stream = Scanner::new(source, source_reference.clone()).filter_map(
            |token_or_err| match token_or_err {
                Ok(token) => Some(token),
                Err(error) => {
                    scanner_errors.push(error);
                    None
                }
            },
        );
        let (program, parser_errors) =
            Parser::parse(token_stream, source_reference, ParserOpts::default());

        let mut compilation = Self::compile(&program, registry, opts);
        let front_end = scanner_errors
            .into_iter()
            .map(ScriptDiagnostic::from)
            .chain(parser_errors.into_iter().map(ScriptDiagnostic::from));
        compilation.diagnostics.splice(0..0, front_end);
        compilation
    }

    pub fn compile(
        program: &Program,
        registry: &'a MemberRegistry,
        opts: &'a CompilerOpts,
    ) -> Compilation {
        let source_reference = program.source_reference.clone();
        let mut compiler = Self {
            emitter: Emitter::new(),
            checker: TypeChecker::new(registry, source_reference.clone()),
            opts,
            sections: HashMap::new(),
            section_names: HashMap::new(),
            errors: Vec::new(),
            source_reference,
        };

        let labels = compiler.declare_sections(&program.sections);
        for (section, label) in program.sections.iter().zip(labels) {
            compiler.compile_section(section, label);
        }

        let Compiler {
            emitter,
            mut errors,
            section_names,
            source_reference,
            ..
        } = compiler;
        let script = emitter.finish(|label, found_at| {
            errors.push(CompileError::UnknownSection {
                name: section_names.get(&label).cloned().unwrap_or_default(),
                found_at,
                source_code: source_reference.clone(),
            })
        });
        debug!(
            sections = program.sections.len(),
            words = script.instructions.len(),
            strings = script.strings.len(),
            floats = script.floats.len(),
            diagnostics = errors.len(),
            "compiled {}",
            source_reference.name()
        );

        Compilation {
            script,
            diagnostics: errors.into_iter().map(ScriptDiagnostic::from).collect(),
            source_reference,
            strict_warnings: opts.strict_warnings,
        }
    }

    fn declare_sections(&mut self, sections: &[Section]) -> Vec<Label> {
        sections
            .iter()
            .map(|section| {
                let label = self.emitter.new_label();
                let name = &section.name;
                match self.sections.get(&name.name) {
                    Some((_, Some(first_found_at))) => {
                        self.errors.push(CompileError::DuplicateSection {
                            name: name.name.clone(),
                            found_at: name.source_span(),
                            first_found_at: *first_found_at,
                            source_code: self.source_reference.clone(),
                        })
                    }
                    _ => {
                        self.sections
                            .insert(name.name.clone(), (label, Some(name.source_span())));
                        self.section_names.insert(label, name.name.clone());
                    }
                }
                label
            })
            .collect()
    }

    fn section_label(&mut self, target: &Identifier) -> Label {
        let label = match self.sections.get(&target.name) {
            Some((label, _)) => *label,
            None => {
                let label = self.emitter.new_label();
                self.sections.insert(target.name.clone(), (label, None));
                self.section_names.insert(label, target.name.clone());
                label
            }
        };
        self.emitter.refer(label, target.source_span());
        label
    }

    fn compile_section(&mut self, section: &Section, label: Label) {
        let body = self.emitter.new_label();
        let exit = self.emitter.new_label();
        let name = self.emitter.string(&section.name.name);
        self.emitter.bind(label);
        self.emitter.emit(StatementCode::Section);
        self.emitter.emit_target(body);
        self.emitter.emit(name);
        self.compile_block(&section.body, body, exit);
        // Falling off the end of a section ends the script.
        if self.emitter.is_referenced(exit) {
            self.emitter.bind(exit);
            self.emitter.emit(StatementCode::End);
        }
    }

    /// Emits `body` so that it starts at `entry` and continues at `exit`.
    fn compile_block(&mut self, body: &[Stmt], entry: Label, exit: Label) {
        if body.is_empty() {
            self.emitter.alias(entry, exit);
            return;
        }
        let mut current = entry;
        let mut terminated_at: Option<SourceSpan> = None;
        let mut warned = false;
        for (idx, stmt) in body.iter().enumerate() {
            if let Some(terminated_at) = terminated_at {
                if self.opts.unreachable_warnings && !warned {
                    warned = true;
                    self.errors.push(CompileError::UnreachableStatement {
                        found_at: stmt.source_span(),
                        terminated_at,
                        source_code: self.source_reference.clone(),
                    });
                }
            }
            let next = if idx + 1 == body.len() {
                exit
            } else {
                self.emitter.new_label()
            };
            self.emitter.bind(current);
            self.compile_stmt(stmt, next);
            if stmt.is_terminal() && terminated_at.is_none() {
                terminated_at = Some(stmt.source_span());
            }
            current = next;
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt, next: Label) {
        match stmt {
            Stmt::Line(line) => self.compile_line(line, next),
            Stmt::Instruction(expr) => {
                self.checker.check_expr(expr, &mut self.errors);
                self.emitter.emit(StatementCode::Instruction);
                self.emitter.emit_target(next);
                self.emit_expr(expr);
            }
            Stmt::Goto(target) => {
                let label = self.section_label(target);
                self.emitter.emit(StatementCode::Instruction);
                self.emitter.emit_target(label);
                self.emitter.emit(ExprCode::Goto);
                self.emitter.emit_target(label);
            }
            Stmt::End(_) => self.emitter.emit(StatementCode::End),
            Stmt::If(stmt) => self.compile_if(stmt, next),
            Stmt::Choice(stmt) => self.compile_choice(stmt, next),
            Stmt::Hash(hash) => {
                self.emitter.emit(StatementCode::Hash);
                self.emitter.emit_target(next);
                self.emit_pairs(hash);
            }
            Stmt::Speaker(stmt) => {
                let speaker = self.emitter.speaker(&stmt.speaker.name);
                self.emitter.emit(StatementCode::Speaker);
                self.emitter.emit_target(next);
                self.emitter.emit(speaker);
                self.emit_pairs(&stmt.hash);
            }
        }
    }

    fn compile_line(&mut self, line: &LineStmt, next: Label) {
        // A trailing hash is delivered just before the line it decorates.
        if let Some(hash) = &line.hash {
            let line_label = self.emitter.new_label();
            self.emitter.emit(StatementCode::Hash);
            self.emitter.emit_target(line_label);
            self.emit_pairs(hash);
            self.emitter.bind(line_label);
        }

        self.emitter.emit(StatementCode::Line);
        self.emitter.emit_target(next);
        self.emitter.emit_count(line.speakers.len());
        for speaker in line.speakers.iter() {
            match speaker {
                SpeakerRef::Named(name) => {
                    let idx = self.emitter.speaker(&name.name);
                    self.emitter.emit(SpeakerKind::Id);
                    self.emitter.emit(idx);
                }
                SpeakerRef::Variable(name) => {
                    self.checker
                        .expect_variable(name, ValueType::String, &mut self.errors);
                    let idx = self.emitter.string(&name.name);
                    self.emitter.emit(SpeakerKind::Variable);
                    self.emitter.emit(idx);
                }
            }
        }
        self.emit_segments(&line.text);
        self.refer_inline_gotos(&line.text);

        self.emitter.emit_count(line.directives.len());
        for directive in line.directives.iter() {
            match directive.inner() {
                DirectiveKind::Auto => self.emitter.emit(ExprCode::Auto),
                DirectiveKind::Speed(expr) | DirectiveKind::Pause(expr) => {
                    self.checker
                        .expect(expr, ValueType::Float, &mut self.errors);
                    self.emitter.emit(match directive.inner() {
                        DirectiveKind::Speed(_) => ExprCode::Speed,
                        _ => ExprCode::Pause,
                    });
                    self.emit_expr(expr);
                }
                DirectiveKind::Goto(target) => {
                    let label = self.section_label(target);
                    self.emitter.emit(ExprCode::Goto);
                    self.emitter.emit_target(label);
                }
            }
        }
    }

    /// `[goto=name]` tags in line text jump at runtime; their targets must
    /// resolve like any other section reference.
    fn refer_inline_gotos(&mut self, segments: &[TextSegment]) {
        for segment in segments {
            if let TextSegment::Text(text) = segment {
                for tag in interpolate(text.inner()).tags() {
                    if let TextTag::Goto(name) = tag {
                        self.section_label(&Identifier {
                            name: name.clone(),
                            source_span: text.source_span(),
                        });
                    }
                }
            }
        }
    }

    fn emit_segments(&mut self, segments: &[TextSegment]) {
        self.emitter.emit_count(segments.len());
        for segment in segments {
            match segment {
                TextSegment::Text(text) => {
                    let idx = self.emitter.string(text.inner());
                    self.emitter.emit(SegmentKind::Text);
                    self.emitter.emit(idx);
                }
                TextSegment::Placeholder(expr) => {
                    // Any value renders; void renders as nothing.
                    self.checker.check_expr(expr, &mut self.errors);
                    self.emitter.emit(SegmentKind::Expr);
                    self.emit_expr(expr);
                }
            }
        }
    }

    fn emit_pairs(&mut self, hash: &HashBlock) {
        let mut seen: HashMap<&str, SourceSpan> = HashMap::new();
        self.emitter.emit_count(hash.entries.len());
        for entry in hash.entries.iter() {
            let key = &entry.key;
            match seen.get(key.name.as_str()) {
                Some(first_found_at) => self.errors.push(CompileError::DuplicateHashKey {
                    key: key.name.clone(),
                    found_at: key.source_span(),
                    first_found_at: *first_found_at,
                    source_code: self.source_reference.clone(),
                }),
                None => {
                    seen.insert(&key.name, key.source_span());
                }
            }
            if entry.values.len() > 1 {
                let found_at = entry
                    .values
                    .iter()
                    .fold(key.source_span(), |span, value| span.to(value.source_span()));
                self.errors.push(CompileError::MalformedHash {
                    key: key.name.clone(),
                    value_count: entry.values.len(),
                    found_at,
                    source_code: self.source_reference.clone(),
                });
            }

            let key_idx = self.emitter.string(&key.name);
            if entry.values.is_empty() {
                // A bare key is a flag.
                self.emitter.emit_count(1);
                self.emitter.emit(key_idx);
                self.emitter.emit(ExprCode::Bool);
                self.emitter.emit(1u32);
                continue;
            }
            self.emitter.emit_count(entry.values.len());
            self.emitter.emit(key_idx);
            for value in entry.values.iter() {
                self.checker.check_expr(value, &mut self.errors);
                self.emit_expr(value);
            }
        }
    }

    fn compile_if(&mut self, stmt: &IfStmt, next: Label) {
        let entries: Vec<Label> = stmt
            .branches
            .iter()
            .map(|_| self.emitter.new_label())
            .collect();
        let else_entry = self.emitter.new_label();

        self.emitter.emit(StatementCode::Conditional);
        self.emitter.emit_target(else_entry);
        self.emitter.emit_count(stmt.branches.len());
        for (branch, entry) in stmt.branches.iter().zip(entries.iter()) {
            self.checker
                .expect(&branch.condition, ValueType::Bool, &mut self.errors);
            self.emit_expr(&branch.condition);
            self.emitter.emit_target(*entry);
        }

        for (branch, entry) in stmt.branches.iter().zip(entries) {
            self.compile_block(&branch.body, entry, next);
        }
        match &stmt.else_body {
            Some(body) => self.compile_block(body, else_entry, next),
            None => self.emitter.alias(else_entry, next),
        }
    }

    fn compile_choice(&mut self, stmt: &ChoiceStmt, next: Label) {
        if count_options(&stmt.items) == 0 {
            self.errors.push(CompileError::EmptyChoice {
                found_at: stmt.source_span,
                source_code: self.source_reference.clone(),
            });
        } else if !guarantees_option(&stmt.items) {
            self.errors.push(CompileError::NoGuaranteedChoice {
                found_at: stmt.source_span,
                source_code: self.source_reference.clone(),
            });
        }

        self.emitter.emit(StatementCode::Choice);
        self.emitter.emit_target(next);
        let count_at = self.emitter.placeholder();
        let mut bodies = Vec::new();
        let count = self.emit_choice_items(&stmt.items, next, &mut bodies);
        self.emitter.patch_count(count_at, count);

        for (body, entry, exit) in bodies {
            self.compile_block(body, entry, exit);
        }
    }

    /// Emits the flattened item list and returns how many items it wrote.
    /// Option bodies are collected to be emitted after the choice statement.
    fn emit_choice_items<'p>(
        &mut self,
        items: &'p [ChoiceItem],
        next: Label,
        bodies: &mut Vec<(&'p [Stmt], Label, Label)>,
    ) -> usize {
        let mut count = 0;
        for item in items {
            match item {
                ChoiceItem::Option(option) => {
                    count += 1;
                    let after = match &option.target {
                        Some(target) => self.section_label(target),
                        None => next,
                    };
                    self.emitter.emit(ChoiceMarker::Option);
                    match &option.body {
                        Some(body) => {
                            let entry = self.emitter.new_label();
                            self.emitter.emit_target(entry);
                            bodies.push((body.as_slice(), entry, after));
                        }
                        None => self.emitter.emit_target(after),
                    }
                    match &option.guard {
                        Some(guard) => {
                            self.checker
                                .expect(guard, ValueType::Bool, &mut self.errors);
                            self.emitter.emit(1u32);
                            self.emit_expr(guard);
                        }
                        None => self.emitter.emit(0u32),
                    }
                    self.emit_segments(&option.text);
                }
                ChoiceItem::Filter(filter) => {
                    for (idx, branch) in filter.branches.iter().enumerate() {
                        count += 1;
                        self.emitter.emit(if idx == 0 {
                            ChoiceMarker::If
                        } else {
                            ChoiceMarker::ElseIf
                        });
                        self.checker
                            .expect(&branch.condition, ValueType::Bool, &mut self.errors);
                        self.emit_expr(&branch.condition);
                        count += self.emit_choice_items(&branch.items, next, bodies);
                    }
                    if let Some(else_items) = &filter.else_items {
                        count += 1;
                        self.emitter.emit(ChoiceMarker::Else);
                        count += self.emit_choice_items(else_items, next, bodies);
                    }
                    count += 1;
                    self.emitter.emit(ChoiceMarker::EndIf);
                }
            }
        }
        count
    }

    fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(literal) => self.emit_literal(&literal.value),
            Expr::Variable(identifier) => {
                let idx = self.emitter.string(&identifier.name);
                self.emitter.emit(ExprCode::Var);
                self.emitter.emit(idx);
            }
            Expr::Grouping(grouping) => self.emit_expr(&grouping.expr),
            Expr::Unary(unary) => {
                self.emitter.emit(match unary.operator.inner() {
                    UnaryOperator::Not => ExprCode::Not,
                    UnaryOperator::Minus => ExprCode::Negate,
                });
                self.emit_expr(&unary.right);
            }
            Expr::Binary(binary) => {
                self.emitter.emit(binary_code(*binary.operator.inner()));
                self.emit_expr(&binary.left);
                self.emit_expr(&binary.right);
            }
            Expr::Assignment(assignment) => {
                let idx = self.emitter.string(&assignment.target.name);
                self.emitter.emit(match assignment.operator.inner() {
                    AssignOperator::Assign => ExprCode::Assign,
                    AssignOperator::AddAssign => ExprCode::AddAssign,
                    AssignOperator::SubtractAssign => ExprCode::SubAssign,
                    AssignOperator::MultiplyAssign => ExprCode::MulAssign,
                    AssignOperator::DivideAssign => ExprCode::DivAssign,
                });
                self.emitter.emit(idx);
                self.emit_expr(&assignment.value);
            }
            Expr::Call(call) => {
                let name = self.emitter.string(&call.callee.name);
                self.emitter.emit(ExprCode::Func);
                self.emitter.emit(name);
                self.emitter.emit(call.is_await() as u32);
                let argc_at = self.emitter.placeholder();
                for argument in call.arguments.iter() {
                    self.emit_expr(argument);
                }
                // Hosts always receive full arity; omitted trailing
                // parameters take their registered defaults.
                let mut argc = call.arguments.len();
                if let Some(def) = self.checker.function(&call.callee.name) {
                    for param in def.params.iter().skip(argc) {
                        match &param.default {
                            Some(default) if self.emit_variant(default) => argc += 1,
                            _ => break,
                        }
                    }
                }
                self.emitter.patch_count(argc_at, argc);
            }
        }
    }

    fn emit_literal(&mut self, value: &LiteralValue) {
        match value {
            LiteralValue::Float(value) => {
                let idx = self.emitter.float(*value);
                self.emitter.emit(ExprCode::Float);
                self.emitter.emit(idx);
            }
            LiteralValue::String(value) => {
                let idx = self.emitter.string(value);
                self.emitter.emit(ExprCode::String);
                self.emitter.emit(idx);
            }
            LiteralValue::Bool(value) => {
                self.emitter.emit(ExprCode::Bool);
                self.emitter.emit(*value as u32);
            }
        }
    }

    /// Emits `value` as a literal; returns false for void, which has none.
    fn emit_variant(&mut self, value: &Variant) -> bool {
        match value {
            Variant::Float(value) => self.emit_literal(&LiteralValue::Float(*value)),
            Variant::Bool(value) => self.emit_literal(&LiteralValue::Bool(*value)),
            Variant::String(value) => self.emit_literal(&LiteralValue::String(value.to_string())),
            Variant::Void => return false,
        }
        true
    }
}

fn binary_code(operator: BinaryOperator) -> ExprCode {
    match operator {
        BinaryOperator::Plus => ExprCode::Add,
        BinaryOperator::Minus => ExprCode::Sub,
        BinaryOperator::Multiply => ExprCode::Mul,
        BinaryOperator::Divide => ExprCode::Div,
        BinaryOperator::Modulo => ExprCode::Mod,
        BinaryOperator::EqualTo => ExprCode::Equal,
        BinaryOperator::NotEqualTo => ExprCode::NotEqual,
        BinaryOperator::LessThan => ExprCode::Less,
        BinaryOperator::LessThanOrEqualTo => ExprCode::LessEqual,
        BinaryOperator::GreaterThan => ExprCode::Greater,
        BinaryOperator::GreaterThanOrEqualTo => ExprCode::GreaterEqual,
        BinaryOperator::LogicalAnd => ExprCode::And,
        BinaryOperator::LogicalOr => ExprCode::Or,
    }
}

fn count_options(items: &[ChoiceItem]) -> usize {
    items
        .iter()
        .map(|item| match item {
            ChoiceItem::Option(_) => 1,
            ChoiceItem::Filter(filter) => {
                filter
                    .branches
                    .iter()
                    .map(|branch| count_options(&branch.items))
                    .sum::<usize>()
                    + filter.else_items.as_deref().map_or(0, count_options)
            }
        })
        .sum()
}

/// Whether some option is offered and enabled whatever the script state is.
fn guarantees_option(items: &[ChoiceItem]) -> bool {
    items.iter().any(|item| match item {
        ChoiceItem::Option(option) => option.guard.is_none(),
        ChoiceItem::Filter(filter) => {
            filter
                .else_items
                .as_deref()
                .map_or(false, guarantees_option)
                && filter
                    .branches
                    .iter()
                    .all(|branch| guarantees_option(&branch.items))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FuncDef, ParamDef};
    use pretty_assertions::assert_eq;

    fn registry() -> MemberRegistry {
        MemberRegistry::new()
            .with_variable("gold", ValueType::Float)
            .with_variable("name", ValueType::String)
            .with_variable("met", ValueType::Bool)
            .with_function(FuncDef {
                name: "give".into(),
                return_type: ValueType::Void,
                params: vec![
                    ParamDef {
                        value_type: ValueType::String,
                        default: None,
                    },
                    ParamDef {
                        value_type: ValueType::Float,
                        default: Some(1.0.into()),
                    },
                ],
                awaitable: false,
            })
    }

    fn compile(source: &str) -> Compilation {
        Compiler::compile_source("test", source, &registry(), &CompilerOpts::default())
    }

    fn messages(compilation: &Compilation) -> Vec<String> {
        compilation
            .diagnostics
            .iter()
            .map(|diagnostic| diagnostic.to_string())
            .collect()
    }

    fn statements(script: &ScriptData) -> Vec<(&'static str, usize)> {
        let mut offset = 0;
        let mut found = Vec::new();
        while offset < script.instructions.len() {
            let (code, _, next_offset) = script.describe_statement_at(offset).unwrap();
            found.push((code, offset));
            offset = next_offset;
        }
        found
    }

    #[test]
    fn section_line_goto_section_end() {
        let compilation = compile("=== start\nA: Hello [pause=1] world!\ngoto end\n=== end\nend\n");
        assert_eq!(messages(&compilation), Vec::<String>::new());
        let script = &compilation.script;
        assert_eq!(
            statements(script),
            vec![
                ("Section", 0),
                ("Line", 3),
                ("Instruction", 12),
                ("Section", 16),
                ("End", 19)
            ]
        );
        assert_eq!(
            script.describe_statement_at(3).unwrap().1,
            "next=@0012 [A] \"Hello [pause=1] world!\""
        );
        assert_eq!(
            script.describe_statement_at(12).unwrap().1,
            "next=@0016 (goto @0016)"
        );
    }

    #[test]
    fn literals_share_pool_entries() {
        let compilation = compile("=== s\n~ gold = 5\n~ gold += 5\nA: {name}!\nB: {name}!\n");
        assert!(!compilation.has_errors());
        let script = &compilation.script;
        assert_eq!(script.floats, vec![5.0]);
        assert_eq!(script.strings, vec!["s", "gold", "name", "!"]);
        assert_eq!(script.speaker_ids, vec!["A", "B"]);
    }

    #[test]
    fn comparing_a_float_with_a_string_is_reported() {
        let compilation = compile("=== s\nif gold == \"rich\" {\n  A: yes\n}\n");
        assert_eq!(
            messages(&compilation),
            vec!["Expected a float, but found a string"]
        );
        assert!(compilation.has_errors());
        let records = compilation.records();
        assert_eq!(records[0].line, 1);
        assert_eq!(records[0].column_start, 11);
        assert_eq!(records[0].severity, Severity::Error);
        assert_eq!(
            statements(&compilation.script)
                .into_iter()
                .map(|(code, _)| code)
                .collect::<Vec<_>>(),
            vec!["Section", "Conditional", "Line", "End"]
        );
    }

    #[test]
    fn section_diagnostics() {
        let compilation = compile("=== a\ngoto nowhere\nA: never\n=== a\nend\n");
        assert_eq!(
            messages(&compilation),
            vec![
                "Section a is already defined",
                "Unreachable statement",
                "Unknown section nowhere"
            ]
        );
        let severities: Vec<_> = compilation
            .diagnostics
            .iter()
            .map(|diagnostic| diagnostic.severity())
            .collect();
        assert_eq!(
            severities,
            vec![Severity::Error, Severity::Warning, Severity::Error]
        );
        // The dangling goto lands on a trailing End.
        let script = &compilation.script;
        let end: u32 = StatementCode::End.into();
        assert_eq!(script.instructions.last(), Some(&end));
        assert_eq!(
            script.describe_statement_at(3).unwrap().1,
            format!(
                "next=@{:04} (goto @{:04})",
                script.instructions.len() - 1,
                script.instructions.len() - 1
            )
        );
    }

    #[test]
    fn inline_goto_targets_must_exist() {
        let compilation = compile("=== s\nA: hi[goto=nowhere]\nA: again[goto=s]\n");
        assert_eq!(messages(&compilation), vec!["Unknown section nowhere"]);
        let records = compilation.records();
        assert_eq!((records[0].line, records[0].column_start), (1, 2));
    }

    #[test]
    fn warnings_only_fail_strict_compilations() {
        let source = "=== s\nend\nA: never\n";
        let registry = registry();
        let lenient = Compiler::compile_source("test", source, &registry, &CompilerOpts::default());
        assert_eq!(messages(&lenient), vec!["Unreachable statement"]);
        assert!(!lenient.has_errors());

        let opts = CompilerOpts::default().with_strict_warnings();
        assert!(Compiler::compile_source("test", source, &registry, &opts).has_errors());

        let opts = CompilerOpts::default().without_unreachable_warnings();
        let quiet = Compiler::compile_source("test", source, &registry, &opts);
        assert!(quiet.diagnostics.is_empty());
    }

    #[test]
    fn choice_items_are_flattened() {
        let compilation = compile(
            "=== s
choice {
  *[gold > 1] Buy -> shop
  if met {
    * Hi
  } else {
    * Hello
  }
  * Leave {
    Bye.
  }
}
=== shop
end
",
        );
        assert_eq!(messages(&compilation), Vec::<String>::new());
        let script = &compilation.script;
        assert_eq!(
            script.describe_statement_at(3).unwrap(),
            (
                "Choice",
                concat!(
                    "next=@0047 [option @0048 [(> gold 1)] \"Buy\", if met, ",
                    "option @0047 \"Hi\", else, option @0047 \"Hello\", endif, ",
                    "option @0040 \"Leave\"]"
                )
                .to_string(),
                40
            )
        );
        assert_eq!(
            statements(script),
            vec![
                ("Section", 0),
                ("Choice", 3),
                ("Line", 40),
                ("End", 47),
                ("Section", 48),
                ("End", 51)
            ]
        );
    }

    #[test]
    fn choice_diagnostics() {
        let compilation = compile("=== s\nchoice {\n}\nchoice {\n  *[met] Maybe\n}\n");
        assert_eq!(
            messages(&compilation),
            vec![
                "Choice block has no options",
                "Choice block may present no enabled option"
            ]
        );
    }

    #[test]
    fn hashes_and_default_arguments() {
        let compilation = compile("=== s\nA: Take it. #{mood: \"glad\", loud}\n~ give(\"sword\")\n");
        assert_eq!(messages(&compilation), Vec::<String>::new());
        let script = &compilation.script;
        assert_eq!(
            script.describe_statement_at(3).unwrap(),
            (
                "Hash",
                "next=@0014 #{mood: \"glad\", loud: true}".to_string(),
                14
            )
        );
        assert_eq!(
            script.describe_statement_at(23).unwrap(),
            (
                "Instruction",
                "next=@0033 (give \"sword\" 1)".to_string(),
                33
            )
        );

        let compilation = compile("=== s\n#{k: 1 2, k}\n");
        assert_eq!(
            messages(&compilation),
            vec!["Hash key k has 2 values", "Hash key k is repeated"]
        );
    }
}
