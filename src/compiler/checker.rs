use crate::{
    ast::*,
    registry::{FuncDef, MemberRegistry},
    value::ValueType,
    SourceReference, SourceSpan,
};

use super::CompileError;

/// Infers expression types against the host's registry.
///
/// A node that fails to check has type [`ValueType::Undefined`], and nothing
/// is reported against an undefined operand, so one mistake yields one
/// diagnostic.
pub struct TypeChecker<'a> {
    registry: &'a MemberRegistry,
    source_reference: SourceReference,
}

impl<'a> TypeChecker<'a> {
    pub fn new(registry: &'a MemberRegistry, source_reference: SourceReference) -> Self {
        Self {
            registry,
            source_reference,
        }
    }

    pub fn function(&self, name: &str) -> Option<&'a FuncDef> {
        self.registry.function(name)
    }

    /// Checks `expr` and reports a mismatch unless it has type `expected`.
    pub fn expect(
        &self,
        expr: &Expr,
        expected: ValueType,
        errors: &mut Vec<CompileError>,
    ) -> ValueType {
        let actual = self.check_expr(expr, errors);
        self.expect_type(actual, expected, expr.source_span(), errors);
        actual
    }

    fn expect_type(
        &self,
        actual: ValueType,
        expected: ValueType,
        found_at: SourceSpan,
        errors: &mut Vec<CompileError>,
    ) {
        if actual.is_defined() && actual != expected {
            errors.push(CompileError::TypeMismatch {
                expected,
                actual,
                found_at,
                source_code: self.source_reference.clone(),
            });
        }
    }

    pub fn variable(&self, identifier: &Identifier, errors: &mut Vec<CompileError>) -> ValueType {
        match self.registry.variable(&identifier.name) {
            Some(def) => def.value_type,
            None => {
                errors.push(CompileError::UnknownVariable {
                    name: identifier.name.clone(),
                    found_at: identifier.source_span(),
                    source_code: self.source_reference.clone(),
                });
                ValueType::Undefined
            }
        }
    }

    pub fn expect_variable(
        &self,
        identifier: &Identifier,
        expected: ValueType,
        errors: &mut Vec<CompileError>,
    ) {
        let actual = self.variable(identifier, errors);
        self.expect_type(actual, expected, identifier.source_span(), errors);
    }

    pub fn check_expr(&self, expr: &Expr, errors: &mut Vec<CompileError>) -> ValueType {
        match expr {
            Expr::Literal(literal) => match literal.value {
                LiteralValue::Float(_) => ValueType::Float,
                LiteralValue::String(_) => ValueType::String,
                LiteralValue::Bool(_) => ValueType::Bool,
            },
            Expr::Variable(identifier) => self.variable(identifier, errors),
            Expr::Grouping(grouping) => self.check_expr(&grouping.expr, errors),
            Expr::Unary(unary) => match unary.operator.inner() {
                UnaryOperator::Not => {
                    self.expect(&unary.right, ValueType::Bool, errors);
                    ValueType::Bool
                }
                UnaryOperator::Minus => {
                    self.expect(&unary.right, ValueType::Float, errors);
                    ValueType::Float
                }
            },
            Expr::Binary(binary) => self.check_binary_expr(binary, errors),
            Expr::Assignment(assignment) => self.check_assignment_expr(assignment, errors),
            Expr::Call(call) => self.check_call_expr(call, errors),
        }
    }

    fn check_binary_expr(&self, expr: &BinaryExpr, errors: &mut Vec<CompileError>) -> ValueType {
        match expr.operator.inner() {
            BinaryOperator::Plus
            | BinaryOperator::Minus
            | BinaryOperator::Multiply
            | BinaryOperator::Divide
            | BinaryOperator::Modulo => {
                self.expect(&expr.left, ValueType::Float, errors);
                self.expect(&expr.right, ValueType::Float, errors);
                ValueType::Float
            }
            BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqualTo
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqualTo => {
                self.expect(&expr.left, ValueType::Float, errors);
                self.expect(&expr.right, ValueType::Float, errors);
                ValueType::Bool
            }
            BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => {
                self.expect(&expr.left, ValueType::Bool, errors);
                self.expect(&expr.right, ValueType::Bool, errors);
                ValueType::Bool
            }
            BinaryOperator::EqualTo | BinaryOperator::NotEqualTo => {
                let left = self.check_expr(&expr.left, errors);
                let right = self.check_expr(&expr.right, errors);
                if left.is_defined() {
                    self.expect_type(right, left, expr.right.source_span(), errors);
                }
                ValueType::Bool
            }
        }
    }

    fn check_assignment_expr(
        &self,
        expr: &AssignmentExpr,
        errors: &mut Vec<CompileError>,
    ) -> ValueType {
        let target = self.variable(&expr.target, errors);
        match expr.operator.inner() {
            AssignOperator::Assign => {
                let value = self.check_expr(&expr.value, errors);
                if target.is_defined() {
                    self.expect_type(value, target, expr.value.source_span(), errors);
                }
            }
            _ => {
                self.expect_type(
                    target,
                    ValueType::Float,
                    expr.target.source_span(),
                    errors,
                );
                self.expect(&expr.value, ValueType::Float, errors);
            }
        }
        ValueType::Void
    }

    fn check_call_expr(&self, expr: &CallExpr, errors: &mut Vec<CompileError>) -> ValueType {
        let def = match self.function(&expr.callee.name) {
            Some(def) => def,
            None => {
                errors.push(CompileError::UnknownFunction {
                    name: expr.callee.name.clone(),
                    found_at: expr.callee.source_span(),
                    source_code: self.source_reference.clone(),
                });
                for argument in expr.arguments.iter() {
                    self.check_expr(argument, errors);
                }
                return ValueType::Undefined;
            }
        };

        let mut valid = true;
        let supplied = expr.arguments.len();
        if supplied < def.required_arity() || supplied > def.max_arity() {
            valid = false;
            errors.push(CompileError::ArityMismatch {
                name: def.name.clone(),
                min: def.required_arity(),
                max: def.max_arity(),
                actual: supplied,
                found_at: expr.source_span(),
                source_code: self.source_reference.clone(),
            });
        }
        if expr.is_await() != def.awaitable {
            valid = false;
            errors.push(CompileError::AwaitMismatch {
                name: def.name.clone(),
                awaitable: def.awaitable,
                found_at: expr.source_span(),
                source_code: self.source_reference.clone(),
            });
        }
        // Omitted parameters are filled from their defaults, which must be
        // real values of the parameter's type.
        for (index, param) in def.params.iter().enumerate().skip(supplied) {
            if let Some(default) = &param.default {
                if default.type_of() != param.value_type {
                    errors.push(CompileError::InvalidDefault {
                        name: def.name.clone(),
                        index,
                        expected: param.value_type,
                        actual: default.type_of(),
                        found_at: expr.source_span(),
                        source_code: self.source_reference.clone(),
                    });
                }
            }
        }
        for (idx, argument) in expr.arguments.iter().enumerate() {
            match def.params.get(idx) {
                Some(param) => {
                    self.expect(argument, param.value_type, errors);
                }
                None => {
                    self.check_expr(argument, errors);
                }
            }
        }

        if valid {
            def.return_type
        } else {
            ValueType::Undefined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::{FuncDef, ParamDef},
        value::Variant,
        Parser, ParserOpts, Scanner,
    };
    use pretty_assertions::assert_eq;

    fn registry() -> MemberRegistry {
        MemberRegistry::new()
            .with_variable("gold", ValueType::Float)
            .with_variable("name", ValueType::String)
            .with_variable("met", ValueType::Bool)
            .with_function(FuncDef {
                name: "greet".into(),
                return_type: ValueType::String,
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
            .with_function(FuncDef {
                name: "fetch".into(),
                return_type: ValueType::Bool,
                params: vec![],
                awaitable: true,
            })
            .with_function(FuncDef {
                name: "shout".into(),
                return_type: ValueType::Void,
                params: vec![ParamDef {
                    value_type: ValueType::String,
                    default: Some(Variant::Void),
                }],
                awaitable: false,
            })
    }

    /// Type-checks the instruction of a one-line section, returning its type
    /// and the rendered messages of any errors.
    fn check(expr_source: &str) -> (ValueType, Vec<String>) {
        let source = format!("=== s\n~ {}\n", expr_source);
        let reference = SourceReference::new("test".into(), source.clone());
        let tokens = Scanner::new(&source, reference.clone()).filter_map(Result::ok);
        let (program, parse_errors) =
            Parser::parse(tokens, reference.clone(), ParserOpts::default());
        assert!(parse_errors.is_empty(), "{:?}", parse_errors);
        let expr = match &program.sections[0].body[0] {
            Stmt::Instruction(expr) => expr,
            other => panic!("expected an instruction, got {}", other),
        };
        let registry = registry();
        let checker = TypeChecker::new(&registry, reference);
        let mut errors = Vec::new();
        let value_type = checker.check_expr(expr, &mut errors);
        (
            value_type,
            errors.iter().map(|error| error.to_string()).collect(),
        )
    }

    #[test]
    fn infers_operator_types() {
        assert_eq!(check("gold * 2 + 1"), (ValueType::Float, vec![]));
        assert_eq!(check("!met and gold >= 3"), (ValueType::Bool, vec![]));
        assert_eq!(check("name == \"Bo\""), (ValueType::Bool, vec![]));
        assert_eq!(check("greet(name)"), (ValueType::String, vec![]));
        assert_eq!(check("gold += 2"), (ValueType::Void, vec![]));
    }

    #[test]
    fn mismatched_equality_reports_the_right_operand() {
        assert_eq!(
            check("gold == \"ten\""),
            (
                ValueType::Bool,
                vec!["Expected a float, but found a string".to_string()]
            )
        );
    }

    #[test]
    fn undefined_operands_do_not_cascade() {
        assert_eq!(
            check("-(missing + 1) > gold"),
            (
                ValueType::Bool,
                vec!["Unknown variable missing".to_string()]
            )
        );
        assert_eq!(
            check("name -= 1"),
            (
                ValueType::Void,
                vec!["Expected a float, but found a string".to_string()]
            )
        );
    }

    #[test]
    fn omitted_parameters_need_a_typed_default() {
        assert_eq!(
            check("shout()"),
            (
                ValueType::Void,
                vec!["Default for parameter 0 of shout is void, but it must be a string".to_string()]
            )
        );
        assert_eq!(check("shout(\"hey\")"), (ValueType::Void, vec![]));
    }

    #[test]
    fn calls_check_arity_and_await() {
        assert_eq!(
            check("greet()"),
            (
                ValueType::Undefined,
                vec!["greet takes 1 to 2 arguments but 0 were supplied".to_string()]
            )
        );
        assert_eq!(
            check("fetch()"),
            (
                ValueType::Undefined,
                vec!["fetch must be awaited".to_string()]
            )
        );
        assert_eq!(check("await fetch()"), (ValueType::Bool, vec![]));
        assert_eq!(
            check("greet(name, \"x\")"),
            (
                ValueType::String,
                vec!["Expected a float, but found a string".to_string()]
            )
        );
        assert_eq!(
            check("nope(1)"),
            (
                ValueType::Undefined,
                vec!["Unknown function nope".to_string()]
            )
        );
    }
}
