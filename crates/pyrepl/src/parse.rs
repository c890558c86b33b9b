use std::{borrow::Cow, fmt, rc::Rc};

use num_bigint::BigInt;
use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, ConversionFlag as RuffConversionFlag, ElifElseClause, Expr as AstExpr,
    InterpolatedStringElement, Number, Operator as AstOperator, ParameterWithDefault, Parameters, Stmt, UnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};

use crate::{
    exception::{ExcType, Exception, StackFrame},
    expressions::{
        BoolOperator, CallArg, CallKwarg, ClassDef, CmpOperator, Comprehension, ConversionFlag, DictItem,
        ExceptHandler, Expr, ExprLoc, FStringPart, FunctionDef, Literal, Node, Operator, Param, Signature, StmtLoc,
        Target, Try, UnaryOperator,
    },
};

/// Maximum nesting depth for statements and expressions during conversion.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds have much larger stack frames, so the limit is lower.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u16 = 48;

/// A line/column position, both 1-based. Columns count characters, not bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    /// Builds a location from a 0-based line number and 0-based column.
    #[must_use]
    pub fn new(line_no: usize, column: usize) -> Self {
        Self {
            line: u32::try_from(line_no + 1).unwrap_or(u32::MAX),
            column: u32::try_from(column + 1).unwrap_or(u32::MAX),
        }
    }
}

/// Source range of a node, tagged with the synthetic filename it was parsed under.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CodeRange {
    pub filename: Rc<str>,
    start: CodeLoc,
    end: CodeLoc,
}

impl fmt::Debug for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CodeRange{{{}:{}:{}-{}:{}}}",
            self.filename, self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

impl CodeRange {
    #[must_use]
    pub fn new(filename: Rc<str>, start: CodeLoc, end: CodeLoc) -> Self {
        Self { filename, start, end }
    }

    #[must_use]
    pub fn start(&self) -> CodeLoc {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> CodeLoc {
        self.end
    }
}

/// Parses `code` into owned statements, tagging every position with `filename`.
pub(crate) fn parse(code: &str, filename: &str) -> Result<Vec<StmtLoc>, ParseError> {
    let mut parser = Parser::new(code, filename);
    let parsed = parse_module(code).map_err(|e| parser.syntax_error(e.error.to_string(), e.range()))?;
    let module = parsed.into_syntax();
    parser.parse_statements(module.body)
}

/// Converts ruff's AST into the [`Node`]/[`Expr`] tree the evaluator runs.
struct Parser<'a> {
    /// Byte offset of every `\n` in the source.
    line_ends: Vec<usize>,
    code: &'a str,
    filename: Rc<str>,
    depth_remaining: u16,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str, filename: &str) -> Self {
        let line_ends = code
            .char_indices()
            .filter_map(|(i, c)| (c == '\n').then_some(i))
            .collect();
        Self {
            line_ends,
            code,
            filename: filename.into(),
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    fn parse_statements(&mut self, statements: Vec<Stmt>) -> Result<Vec<StmtLoc>, ParseError> {
        statements.into_iter().map(|s| self.parse_statement(s)).collect()
    }

    fn parse_statement(&mut self, statement: Stmt) -> Result<StmtLoc, ParseError> {
        let range = statement.range();
        self.decr_depth_remaining(range)?;
        let result = self.parse_statement_impl(statement);
        self.depth_remaining += 1;
        Ok(StmtLoc::new(self.convert_range(range), result?))
    }

    fn parse_statement_impl(&mut self, statement: Stmt) -> Result<Node, ParseError> {
        match statement {
            Stmt::FunctionDef(function) => {
                let signature = self.parse_parameters(&function.parameters)?;
                let decorators = function
                    .decorator_list
                    .into_iter()
                    .map(|d| self.parse_expression(d.expression))
                    .collect::<Result<Vec<_>, _>>()?;
                let body = self.parse_statements(function.body)?;
                Ok(Node::FunctionDef(Rc::new(FunctionDef::new(
                    function.name.as_str().into(),
                    self.convert_range(function.range),
                    signature,
                    body,
                    function.is_async,
                    decorators,
                ))))
            }
            Stmt::ClassDef(c) => {
                let bases = match &c.arguments {
                    Some(arguments) => {
                        if let Some(keyword) = arguments.keywords.first() {
                            return Err(ParseError::not_implemented(
                                "class keyword arguments",
                                self.convert_range(keyword.range),
                            ));
                        }
                        arguments
                            .args
                            .iter()
                            .map(|arg| self.parse_expression(arg.clone()))
                            .collect::<Result<Vec<_>, _>>()?
                    }
                    None => Vec::new(),
                };
                let decorators = c
                    .decorator_list
                    .into_iter()
                    .map(|d| self.parse_expression(d.expression))
                    .collect::<Result<Vec<_>, _>>()?;
                let body = self.parse_statements(c.body)?;
                Ok(Node::ClassDef(Rc::new(ClassDef {
                    name: c.name.as_str().into(),
                    position: self.convert_range(c.range),
                    bases,
                    body,
                    decorators,
                })))
            }
            Stmt::Return(ast::StmtReturn { value, .. }) => {
                Ok(Node::Return(value.map(|v| self.parse_expression(*v)).transpose()?))
            }
            Stmt::Delete(ast::StmtDelete { targets, .. }) => {
                let targets = targets
                    .into_iter()
                    .map(|t| self.parse_target(t))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::Delete(targets))
            }
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                let targets = targets
                    .into_iter()
                    .map(|t| self.parse_target(t))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = self.parse_expression(*value)?;
                Ok(Node::Assign { targets, value })
            }
            Stmt::AugAssign(ast::StmtAugAssign {
                target, op, value, range, ..
            }) => {
                let target = self.parse_target(*target)?;
                if matches!(target, Target::Tuple(_) | Target::Starred(_)) {
                    return Err(self.syntax_error("illegal expression for augmented assignment", range));
                }
                Ok(Node::AugAssign {
                    target,
                    op: convert_op(op),
                    value: self.parse_expression(*value)?,
                })
            }
            Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => Ok(Node::AnnAssign {
                target: self.parse_target(*target)?,
                value: value.map(|v| self.parse_expression(*v)).transpose()?,
            }),
            Stmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                ..
            }) => Ok(Node::For {
                target: self.parse_target(*target)?,
                iter: self.parse_expression(*iter)?,
                body: self.parse_statements(body)?,
                or_else: self.parse_statements(orelse)?,
                is_async,
            }),
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => Ok(Node::While {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body)?,
                or_else: self.parse_statements(orelse)?,
            }),
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => {
                let test = self.parse_expression(*test)?;
                let body = self.parse_statements(body)?;
                let or_else = self.parse_elif_else_clauses(elif_else_clauses)?;
                Ok(Node::If { test, body, or_else })
            }
            Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => Ok(Node::Raise {
                exc: exc.map(|e| self.parse_expression(*e)).transpose()?,
                cause: cause.map(|e| self.parse_expression(*e)).transpose()?,
            }),
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                range,
                ..
            }) => {
                if is_star {
                    return Err(ParseError::not_implemented("try/except* statements", self.convert_range(range)));
                }
                let body = self.parse_statements(body)?;
                let handlers = handlers
                    .into_iter()
                    .map(|h| self.parse_except_handler(h))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::Try(Try {
                    body,
                    handlers,
                    or_else: self.parse_statements(orelse)?,
                    finally: self.parse_statements(finalbody)?,
                }))
            }
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => Ok(Node::Assert {
                test: self.parse_expression(*test)?,
                msg: msg.map(|m| self.parse_expression(*m)).transpose()?,
            }),
            Stmt::Import(ast::StmtImport { names, .. }) => {
                // Only the first module matters: importing it always fails.
                let module = names.first().map_or("", |alias| alias.name.as_str());
                Ok(Node::Import(module.into()))
            }
            Stmt::ImportFrom(ast::StmtImportFrom { module, .. }) => {
                let module = module.as_ref().map_or("", |m| m.as_str());
                Ok(Node::Import(module.into()))
            }
            Stmt::Global(ast::StmtGlobal { names, .. }) => {
                Ok(Node::Global(names.iter().map(|id| id.as_str().into()).collect()))
            }
            Stmt::Nonlocal(ast::StmtNonlocal { names, .. }) => {
                Ok(Node::Nonlocal(names.iter().map(|id| id.as_str().into()).collect()))
            }
            Stmt::Expr(ast::StmtExpr { value, .. }) => self.parse_expression(*value).map(Node::Expr),
            Stmt::Pass(_) => Ok(Node::Pass),
            Stmt::Break(_) => Ok(Node::Break),
            Stmt::Continue(_) => Ok(Node::Continue),
            Stmt::With(w) => Err(ParseError::not_implemented("with statements", self.convert_range(w.range))),
            Stmt::Match(m) => Err(ParseError::not_implemented("match statements", self.convert_range(m.range))),
            Stmt::TypeAlias(t) => Err(ParseError::not_implemented("type aliases", self.convert_range(t.range))),
            Stmt::IpyEscapeCommand(i) => Err(ParseError::not_implemented(
                "IPython escape commands",
                self.convert_range(i.range),
            )),
        }
    }

    /// Folds `elif`/`else` clauses into nested `if` nodes, innermost last.
    fn parse_elif_else_clauses(&mut self, clauses: Vec<ElifElseClause>) -> Result<Vec<StmtLoc>, ParseError> {
        let mut tail: Vec<StmtLoc> = Vec::new();
        for clause in clauses.into_iter().rev() {
            let position = self.convert_range(clause.range);
            match clause.test {
                Some(test) => {
                    let test = self.parse_expression(test)?;
                    let body = self.parse_statements(clause.body)?;
                    let or_else = tail;
                    tail = vec![StmtLoc::new(position, Node::If { test, body, or_else })];
                }
                None => tail = self.parse_statements(clause.body)?,
            }
        }
        Ok(tail)
    }

    fn parse_except_handler(&mut self, handler: ast::ExceptHandler) -> Result<ExceptHandler, ParseError> {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        Ok(ExceptHandler {
            exc_type: h.type_.map(|e| self.parse_expression(*e)).transpose()?,
            name: h.name.map(|n| n.as_str().into()),
            body: self.parse_statements(h.body)?,
        })
    }

    fn parse_parameters(&mut self, params: &Parameters) -> Result<Signature, ParseError> {
        Ok(Signature {
            pos_only: self.parse_params_with_defaults(&params.posonlyargs)?,
            args: self.parse_params_with_defaults(&params.args)?,
            var_args: params.vararg.as_ref().map(|p| p.name.as_str().into()),
            kw_only: self.parse_params_with_defaults(&params.kwonlyargs)?,
            var_kwargs: params.kwarg.as_ref().map(|p| p.name.as_str().into()),
        })
    }

    fn parse_params_with_defaults(&mut self, params: &[ParameterWithDefault]) -> Result<Vec<Param>, ParseError> {
        params
            .iter()
            .map(|p| {
                let default = p
                    .default
                    .as_ref()
                    .map(|expr| self.parse_expression((**expr).clone()))
                    .transpose()?;
                Ok(Param {
                    name: p.parameter.name.as_str().into(),
                    default,
                })
            })
            .collect()
    }

    /// Parses the left-hand side of an assignment, `for` clause or `del`.
    fn parse_target(&mut self, target: AstExpr) -> Result<Target, ParseError> {
        match target {
            AstExpr::Name(ast::ExprName { id, .. }) => Ok(Target::Name(id.as_str().into())),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Target::Attribute {
                object: self.parse_expression(*value)?,
                attr: attr.as_str().into(),
            }),
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Target::Subscript {
                object: self.parse_expression(*value)?,
                index: self.parse_expression(*slice)?,
            }),
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) | AstExpr::List(ast::ExprList { elts, range, .. }) => {
                let targets = elts
                    .into_iter()
                    .map(|t| self.parse_target(t))
                    .collect::<Result<Vec<_>, _>>()?;
                if targets.iter().filter(|t| matches!(t, Target::Starred(_))).count() > 1 {
                    return Err(self.syntax_error("multiple starred expressions in assignment", range));
                }
                Ok(Target::Tuple(targets))
            }
            AstExpr::Starred(ast::ExprStarred { value, .. }) => {
                Ok(Target::Starred(Box::new(self.parse_target(*value)?)))
            }
            other => Err(self.syntax_error("cannot assign to expression", other.range())),
        }
    }

    fn parse_expression(&mut self, expression: AstExpr) -> Result<ExprLoc, ParseError> {
        let range = expression.range();
        self.decr_depth_remaining(range)?;
        let result = self.parse_expression_impl(expression);
        self.depth_remaining += 1;
        result
    }

    fn parse_boxed(&mut self, expression: AstExpr) -> Result<Box<ExprLoc>, ParseError> {
        self.parse_expression(expression).map(Box::new)
    }

    fn parse_expressions(&mut self, expressions: Vec<AstExpr>) -> Result<Vec<ExprLoc>, ParseError> {
        expressions.into_iter().map(|e| self.parse_expression(e)).collect()
    }

    fn parse_expression_impl(&mut self, expression: AstExpr) -> Result<ExprLoc, ParseError> {
        let position = self.convert_range(expression.range());
        let expr = match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => Expr::BoolOp {
                op: match op {
                    BoolOp::And => BoolOperator::And,
                    BoolOp::Or => BoolOperator::Or,
                },
                values: self.parse_expressions(values)?,
            },
            AstExpr::Named(ast::ExprNamed { target, value, range, .. }) => {
                let AstExpr::Name(ast::ExprName { id, .. }) = *target else {
                    return Err(self.syntax_error("cannot use assignment expressions with this target", range));
                };
                Expr::Named {
                    target: id.as_str().into(),
                    value: self.parse_boxed(*value)?,
                }
            }
            AstExpr::BinOp(ast::ExprBinOp { left, op, right, .. }) => Expr::BinOp {
                left: self.parse_boxed(*left)?,
                op: convert_op(op),
                right: self.parse_boxed(*right)?,
            },
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => Expr::UnaryOp {
                op: match op {
                    UnaryOp::Not => UnaryOperator::Not,
                    UnaryOp::USub => UnaryOperator::Neg,
                    UnaryOp::UAdd => UnaryOperator::Pos,
                    UnaryOp::Invert => UnaryOperator::Invert,
                },
                operand: self.parse_boxed(*operand)?,
            },
            AstExpr::Lambda(ast::ExprLambda { parameters, body, .. }) => {
                let signature = match parameters {
                    Some(params) => self.parse_parameters(&params)?,
                    None => Signature::default(),
                };
                let body = self.parse_expression(*body)?;
                let body = vec![StmtLoc::new(body.position.clone(), Node::Return(Some(body)))];
                Expr::Lambda(Rc::new(FunctionDef::new(
                    "<lambda>".into(),
                    position.clone(),
                    signature,
                    body,
                    false,
                    Vec::new(),
                )))
            }
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => Expr::IfElse {
                test: self.parse_boxed(*test)?,
                body: self.parse_boxed(*body)?,
                orelse: self.parse_boxed(*orelse)?,
            },
            AstExpr::Dict(ast::ExprDict { items, .. }) => {
                let mut dict_items = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    dict_items.push(DictItem {
                        key: key.map(|k| self.parse_expression(k)).transpose()?,
                        value: self.parse_expression(value)?,
                    });
                }
                Expr::Dict(dict_items)
            }
            AstExpr::ListComp(ast::ExprListComp { elt, generators, .. }) => Expr::ListComp {
                elt: self.parse_boxed(*elt)?,
                generators: self.parse_comprehension_generators(generators)?,
            },
            AstExpr::DictComp(ast::ExprDictComp {
                key, value, generators, ..
            }) => Expr::DictComp {
                key: self.parse_boxed(*key)?,
                value: self.parse_boxed(*value)?,
                generators: self.parse_comprehension_generators(generators)?,
            },
            AstExpr::Generator(ast::ExprGenerator { elt, generators, .. }) => Expr::GeneratorExp {
                elt: self.parse_boxed(*elt)?,
                generators: self.parse_comprehension_generators(generators)?,
            },
            AstExpr::Await(a) => Expr::Await(self.parse_boxed(*a.value)?),
            AstExpr::Yield(y) => Expr::Yield(y.value.map(|v| self.parse_boxed(*v)).transpose()?),
            AstExpr::YieldFrom(y) => Expr::YieldFrom(self.parse_boxed(*y.value)?),
            AstExpr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => {
                let left = self.parse_boxed(*left)?;
                let ops = ops
                    .into_vec()
                    .into_iter()
                    .zip(comparators.into_vec())
                    .map(|(op, right)| Ok((convert_compare_op(op), self.parse_expression(right)?)))
                    .collect::<Result<Vec<_>, ParseError>>()?;
                Expr::Compare { left, ops }
            }
            AstExpr::Call(ast::ExprCall { func, arguments, .. }) => {
                let func = self.parse_boxed(*func)?;
                let ast::Arguments { args, keywords, .. } = arguments;
                let args = args
                    .into_vec()
                    .into_iter()
                    .map(|arg| match arg {
                        AstExpr::Starred(ast::ExprStarred { value, .. }) => {
                            Ok(CallArg::Starred(self.parse_expression(*value)?))
                        }
                        other => Ok(CallArg::Positional(self.parse_expression(other)?)),
                    })
                    .collect::<Result<Vec<_>, ParseError>>()?;
                let kwargs = keywords
                    .into_vec()
                    .into_iter()
                    .map(|kw| {
                        Ok(CallKwarg {
                            name: kw.arg.map(|a| a.as_str().into()),
                            value: self.parse_expression(kw.value)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ParseError>>()?;
                Expr::Call { func, args, kwargs }
            }
            AstExpr::FString(ast::ExprFString { value, .. }) => {
                let mut parts = Vec::new();
                for fstring_part in &value {
                    match fstring_part {
                        ast::FStringPart::Literal(lit) => {
                            if !lit.value.is_empty() {
                                parts.push(FStringPart::Literal(lit.value.as_ref().into()));
                            }
                        }
                        ast::FStringPart::FString(fstring) => {
                            for element in &fstring.elements {
                                parts.push(self.parse_fstring_element(element, true)?);
                            }
                        }
                    }
                }
                match parts.as_slice() {
                    [FStringPart::Literal(s)] => Expr::Literal(Literal::Str(s.clone())),
                    [] => Expr::Literal(Literal::Str("".into())),
                    _ => Expr::FString(parts),
                }
            }
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => {
                Expr::Literal(Literal::Str(value.to_string().into()))
            }
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => match value {
                Number::Int(i) => match i.as_i64() {
                    Some(i) => Expr::Literal(Literal::Int(i)),
                    None => {
                        let text = i.to_string();
                        let big = parse_int_literal(&text)
                            .ok_or_else(|| self.syntax_error(format!("invalid integer literal: {text}"), range))?;
                        Expr::Literal(Literal::LongInt(Rc::new(big)))
                    }
                },
                Number::Float(f) => Expr::Literal(Literal::Float(f)),
                Number::Complex { .. } => {
                    return Err(ParseError::not_implemented("complex numbers", position));
                }
            },
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => Expr::Literal(Literal::Bool(value)),
            AstExpr::NoneLiteral(_) => Expr::Literal(Literal::None),
            AstExpr::EllipsisLiteral(_) => Expr::Literal(Literal::Ellipsis),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Expr::Attribute {
                object: self.parse_boxed(*value)?,
                attr: attr.as_str().into(),
            },
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Expr::Subscript {
                object: self.parse_boxed(*value)?,
                index: self.parse_boxed(*slice)?,
            },
            AstExpr::Starred(ast::ExprStarred { value, .. }) => Expr::Starred(self.parse_boxed(*value)?),
            AstExpr::Name(ast::ExprName { id, .. }) => Expr::Name(id.as_str().into()),
            AstExpr::List(ast::ExprList { elts, .. }) => Expr::List(self.parse_expressions(elts)?),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => Expr::Tuple(self.parse_expressions(elts)?),
            AstExpr::Slice(ast::ExprSlice { lower, upper, step, .. }) => Expr::Slice {
                lower: lower.map(|e| self.parse_boxed(*e)).transpose()?,
                upper: upper.map(|e| self.parse_boxed(*e)).transpose()?,
                step: step.map(|e| self.parse_boxed(*e)).transpose()?,
            },
            AstExpr::Set(_) | AstExpr::SetComp(_) => {
                return Err(ParseError::not_implemented("sets", position));
            }
            AstExpr::BytesLiteral(_) => return Err(ParseError::not_implemented("bytes literals", position)),
            AstExpr::TString(_) => {
                return Err(ParseError::not_implemented("template strings (t-strings)", position));
            }
            AstExpr::IpyEscapeCommand(_) => {
                return Err(ParseError::not_implemented("IPython escape commands", position));
            }
        };
        Ok(ExprLoc::new(position, expr))
    }

    fn parse_comprehension_generators(
        &mut self,
        generators: Vec<ast::Comprehension>,
    ) -> Result<Vec<Comprehension>, ParseError> {
        generators
            .into_iter()
            .map(|comp| {
                Ok(Comprehension {
                    target: self.parse_target(comp.target)?,
                    iter: self.parse_expression(comp.iter)?,
                    ifs: self.parse_expressions(comp.ifs)?,
                    is_async: comp.is_async,
                })
            })
            .collect()
    }

    /// Parses one f-string element. Format specs cannot nest further specs.
    fn parse_fstring_element(
        &mut self,
        element: &InterpolatedStringElement,
        allow_spec: bool,
    ) -> Result<FStringPart, ParseError> {
        match element {
            InterpolatedStringElement::Literal(lit) => Ok(FStringPart::Literal(lit.value.as_ref().into())),
            InterpolatedStringElement::Interpolation(interp) => {
                let expr = self.parse_boxed((*interp.expression).clone())?;
                let format_spec = match (&interp.format_spec, allow_spec) {
                    (Some(spec), true) => Some(
                        spec.elements
                            .iter()
                            .map(|e| self.parse_fstring_element(e, false))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    _ => None,
                };
                let debug_prefix = interp.debug_text.as_ref().map(|dt| {
                    let expr_text = &self.code[interp.expression.range()];
                    format!("{}{}{}", dt.leading, expr_text, dt.trailing).into()
                });
                Ok(FStringPart::Interpolation {
                    expr,
                    conversion: convert_conversion_flag(interp.conversion),
                    format_spec,
                    debug_prefix,
                })
            }
        }
    }

    fn convert_range(&self, range: TextRange) -> CodeRange {
        CodeRange::new(
            self.filename.clone(),
            self.index_to_loc(range.start().into()),
            self.index_to_loc(range.end().into()),
        )
    }

    fn index_to_loc(&self, index: usize) -> CodeLoc {
        let line_no = self.line_ends.partition_point(|end| *end < index);
        let line_start = match line_no {
            0 => 0,
            n => self.line_ends[n - 1] + 1,
        };
        let index = index.min(self.code.len());
        let column = self.code.get(line_start..index).map_or(0, |s| s.chars().count());
        CodeLoc::new(line_no, column)
    }

    /// Returns the text of the 1-based `line`, without its newline.
    fn line_text(&self, line: u32) -> Option<&str> {
        self.code.lines().nth(usize::try_from(line).ok()?.checked_sub(1)?)
    }

    fn syntax_error(&self, msg: impl Into<Cow<'static, str>>, range: TextRange) -> ParseError {
        let position = self.convert_range(range);
        let preview = self.line_text(position.start.line).map(str::to_owned);
        ParseError::Syntax {
            msg: msg.into(),
            position,
            preview,
        }
    }

    fn decr_depth_remaining(&mut self, range: TextRange) -> Result<(), ParseError> {
        if let Some(depth_remaining) = self.depth_remaining.checked_sub(1) {
            self.depth_remaining = depth_remaining;
            Ok(())
        } else {
            Err(self.syntax_error("too many nested parentheses", range))
        }
    }
}

/// Parses an integer literal that overflows `i64`, including radix prefixes and underscores.
fn parse_int_literal(text: &str) -> Option<BigInt> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        (lower.as_str(), 10)
    };
    BigInt::parse_bytes(digits.as_bytes(), radix)
}

fn convert_op(op: AstOperator) -> Operator {
    match op {
        AstOperator::Add => Operator::Add,
        AstOperator::Sub => Operator::Sub,
        AstOperator::Mult => Operator::Mult,
        AstOperator::MatMult => Operator::MatMult,
        AstOperator::Div => Operator::Div,
        AstOperator::Mod => Operator::Mod,
        AstOperator::Pow => Operator::Pow,
        AstOperator::LShift => Operator::LShift,
        AstOperator::RShift => Operator::RShift,
        AstOperator::BitOr => Operator::BitOr,
        AstOperator::BitXor => Operator::BitXor,
        AstOperator::BitAnd => Operator::BitAnd,
        AstOperator::FloorDiv => Operator::FloorDiv,
    }
}

fn convert_compare_op(op: CmpOp) -> CmpOperator {
    match op {
        CmpOp::Eq => CmpOperator::Eq,
        CmpOp::NotEq => CmpOperator::NotEq,
        CmpOp::Lt => CmpOperator::Lt,
        CmpOp::LtE => CmpOperator::LtE,
        CmpOp::Gt => CmpOperator::Gt,
        CmpOp::GtE => CmpOperator::GtE,
        CmpOp::Is => CmpOperator::Is,
        CmpOp::IsNot => CmpOperator::IsNot,
        CmpOp::In => CmpOperator::In,
        CmpOp::NotIn => CmpOperator::NotIn,
    }
}

fn convert_conversion_flag(flag: RuffConversionFlag) -> ConversionFlag {
    match flag {
        RuffConversionFlag::None => ConversionFlag::None,
        RuffConversionFlag::Str => ConversionFlag::Str,
        RuffConversionFlag::Repr => ConversionFlag::Repr,
        RuffConversionFlag::Ascii => ConversionFlag::Ascii,
    }
}

/// Errors raised while turning source text into a syntax tree.
#[derive(Debug, Clone)]
pub enum ParseError {
    /// Invalid Python syntax.
    Syntax {
        msg: Cow<'static, str>,
        position: CodeRange,
        /// The offending source line, captured while the source was at hand.
        preview: Option<String>,
    },
    /// Valid Python this interpreter does not run.
    /// Message gets prefixed with "pyrepl does not support ".
    NotImplemented { msg: Cow<'static, str>, position: CodeRange },
}

impl ParseError {
    pub(crate) fn not_implemented(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::NotImplemented {
            msg: msg.into(),
            position,
        }
    }

    #[must_use]
    pub fn position(&self) -> &CodeRange {
        match self {
            Self::Syntax { position, .. } | Self::NotImplemented { position, .. } => position,
        }
    }

    /// Converts this error into a Python exception carrying a single caret frame.
    #[must_use]
    pub fn into_exception(self) -> Exception {
        match self {
            Self::Syntax { msg, position, preview } => {
                let mut frame = StackFrame::from_position(&position, "<module>");
                frame.preview_line = preview;
                frame.caret = true;
                Exception::with_traceback(ExcType::SyntaxError, Some(msg.into_owned()), vec![frame])
            }
            Self::NotImplemented { msg, position } => Exception::with_traceback(
                ExcType::NotImplementedError,
                Some(format!("pyrepl does not support {msg}")),
                vec![StackFrame::from_position(&position, "<module>")],
            ),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().into_exception())
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based_and_count_characters() {
        let nodes = parse("x = 1\né = 'ü'; y = 2\n", "<repl>").unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].position.start(), CodeLoc { line: 1, column: 1 });
        assert_eq!(nodes[2].position.start(), CodeLoc { line: 2, column: 11 });
        assert_eq!(&*nodes[2].position.filename, "<repl>");
    }

    #[test]
    fn syntax_error_captures_preview_line() {
        let err = parse("a = 1\nb = (\n", "<repl>").unwrap_err();
        let ParseError::Syntax { preview, .. } = &err else {
            panic!("expected syntax error, got {err:?}");
        };
        assert!(preview.is_some());
    }

    #[test]
    fn elif_chain_nests_into_else_branches() {
        let nodes = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n", "<repl>").unwrap();
        let Node::If { or_else, .. } = &nodes[0].node else {
            panic!("expected if");
        };
        let Node::If { or_else: inner, .. } = &or_else[0].node else {
            panic!("expected nested if");
        };
        assert!(matches!(inner[0].node, Node::Assign { .. }));
    }

    #[test]
    fn long_integer_literals_become_bigints() {
        let nodes = parse("0x_ffff_ffff_ffff_ffff_ff", "<repl>").unwrap();
        let Node::Expr(ExprLoc {
            expr: Expr::Literal(Literal::LongInt(value)),
            ..
        }) = &nodes[0].node
        else {
            panic!("expected long int literal");
        };
        assert_eq!(value.to_string(), "4722366482869645213695");
    }
}
