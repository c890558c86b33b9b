//! Rewrites submitted source into the unit the executor drives.
//!
//! The user's statements are spliced into the `try` body of
//!
//! ```python
//! async def _repl_coroutine(_async_executor, <args>):
//!     try:
//!         pass
//!     finally:
//!         _async_executor.scope.globals.update(locals())
//! ```
//!
//! and then rewritten so that the unit is always an async generator:
//! `return value` becomes a yield followed by a bare return, `del name` also
//! clears retained globals, and a trailing expression is yielded.

use std::{mem, rc::Rc};

use crate::{
    expressions::{CallArg, CmpOperator, Expr, ExprLoc, FunctionDef, Literal, Node, StmtLoc, Target},
    parse::{CodeLoc, CodeRange, ParseError, parse},
    prepare::ScopeInfo,
};

/// Name of the wrapping function.
pub const REPL_COROUTINE: &str = "_repl_coroutine";
/// The mandatory first parameter: a handle back to the running executor.
pub const EXECUTOR_ARG: &str = "_async_executor";
/// Filename user statements are attributed to in tracebacks.
pub const REPL_FILENAME: &str = "<repl>";
/// Filename of the wrapper's own statements.
pub const TEMPLATE_FILENAME: &str = "<repl_coroutine>";

/// A wrapped, rewritten submission, ready to be executed once.
#[derive(Debug, Clone)]
pub struct TransformedUnit {
    function: Rc<FunctionDef>,
    module: Vec<StmtLoc>,
}

impl TransformedUnit {
    fn new(function: FunctionDef) -> Self {
        let function = Rc::new(function);
        let module = vec![StmtLoc::new(
            function.position.clone(),
            Node::FunctionDef(function.clone()),
        )];
        Self { function, module }
    }

    /// Whether the unit yields, i.e. runs as an async generator rather than a coroutine.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.function.is_generator()
    }

    /// The wrapper's parameter names, in order.
    pub fn arg_names(&self) -> impl Iterator<Item = &str> {
        self.function.signature.param_names().map(|name| &**name)
    }

    #[must_use]
    pub fn function(&self) -> &FunctionDef {
        &self.function
    }

    /// The module the executor runs: a single `async def`.
    pub(crate) fn module(&self) -> &[StmtLoc] {
        &self.module
    }
}

/// Parses `source` and wraps it into the `_repl_coroutine` unit.
///
/// `arg_names` is the complete parameter list, starting with
/// [`EXECUTOR_ARG`] when the result is meant for [`AsyncCodeExecutor`](crate::AsyncCodeExecutor).
pub fn wrap_code(source: &str, arg_names: &[&str]) -> Result<TransformedUnit, ParseError> {
    let mut user = parse(source, REPL_FILENAME)?;
    let template = template_function(
        &format!(
            "async def {REPL_COROUTINE}({}):\n    try:\n        pass\n    finally:\n        {EXECUTOR_ARG}.scope.globals.update(locals())\n",
            checked_args(arg_names)?
        ),
    )?;

    rewrite_block(&mut user);
    yield_last_expression(&mut user);

    let mut body = template.body;
    match body.first_mut().map(|stmt| &mut stmt.node) {
        Some(Node::Try(try_block)) => try_block.body = user,
        _ => return Err(malformed_template()),
    }
    Ok(TransformedUnit::new(FunctionDef::new(
        template.name,
        template.position,
        template.signature,
        body,
        true,
        Vec::new(),
    )))
}

/// Wraps `source` without the keyword rewrites, for disassembly.
///
/// The body goes straight into the function; a non-generator's trailing
/// expression becomes its return value.
pub(crate) fn wrap_plain(source: &str, arg_names: &[&str]) -> Result<TransformedUnit, ParseError> {
    let user = parse(source, REPL_FILENAME)?;
    let template = template_function(&format!(
        "async def {REPL_COROUTINE}({}):\n    pass\n",
        checked_args(arg_names)?
    ))?;
    let mut body = if user.is_empty() { template.body } else { user };
    let is_generator = ScopeInfo::analyze(&template.signature, &body).is_generator;
    if !is_generator
        && let Some(last) = body.last_mut()
        && let Node::Expr(value) = &mut last.node
    {
        let value = mem::replace(value, ExprLoc::new(last.position.clone(), Expr::Literal(Literal::None)));
        last.node = Node::Return(Some(value));
    }
    Ok(TransformedUnit::new(FunctionDef::new(
        template.name,
        template.position,
        template.signature,
        body,
        true,
        Vec::new(),
    )))
}

fn checked_args(arg_names: &[&str]) -> Result<String, ParseError> {
    for name in arg_names {
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(|c| c == '_' || c.is_alphabetic())
            && chars.all(|c| c == '_' || c.is_alphanumeric());
        if !valid {
            return Err(ParseError::Syntax {
                msg: format!("invalid argument name {name:?}").into(),
                position: template_position(),
                preview: None,
            });
        }
    }
    Ok(arg_names.join(", "))
}

fn template_function(text: &str) -> Result<FunctionDef, ParseError> {
    let mut module = parse(text, TEMPLATE_FILENAME)?;
    match module.pop().map(|stmt| stmt.node) {
        Some(Node::FunctionDef(def)) => Ok(Rc::unwrap_or_clone(def)),
        _ => Err(malformed_template()),
    }
}

fn template_position() -> CodeRange {
    CodeRange::new(TEMPLATE_FILENAME.into(), CodeLoc::new(0, 0), CodeLoc::new(0, 0))
}

fn malformed_template() -> ParseError {
    ParseError::Syntax {
        msg: "malformed unit template".into(),
        position: template_position(),
        preview: None,
    }
}

/// Applies the statement rewrites to `block`, without entering nested scopes.
fn rewrite_block(block: &mut [StmtLoc]) {
    for stmt in block {
        let position = stmt.position.clone();
        stmt.node = match mem::replace(&mut stmt.node, Node::Pass) {
            Node::Return(Some(value)) => yield_then_return(&position, value),
            Node::Delete(targets) => global_aware_delete(&position, targets),
            mut node => {
                for child in child_blocks(&mut node) {
                    rewrite_block(child);
                }
                node
            }
        };
    }
}

/// Compound statement bodies; function and class bodies are not included.
fn child_blocks(node: &mut Node) -> Vec<&mut Vec<StmtLoc>> {
    match node {
        Node::If { body, or_else, .. } | Node::While { body, or_else, .. } | Node::For { body, or_else, .. } => {
            vec![body, or_else]
        }
        Node::Try(try_block) => {
            let mut blocks = vec![&mut try_block.body];
            blocks.extend(try_block.handlers.iter_mut().map(|handler| &mut handler.body));
            blocks.push(&mut try_block.or_else);
            blocks.push(&mut try_block.finally);
            blocks
        }
        _ => Vec::new(),
    }
}

/// `return value` → `if True: (yield value); return`
fn yield_then_return(position: &CodeRange, value: ExprLoc) -> Node {
    let yielded = expr(position, Expr::Yield(Some(Box::new(value))));
    if_true(
        position,
        vec![
            StmtLoc::new(position.clone(), Node::Expr(yielded)),
            StmtLoc::new(position.clone(), Node::Return(None)),
        ],
    )
}

/// `del a, b.c` → `if True:` with, per simple name,
/// `if 'a' in globals(): globals().pop('a') else: del a`.
fn global_aware_delete(position: &CodeRange, targets: Vec<Target>) -> Node {
    let body = targets
        .into_iter()
        .map(|target| match target {
            Target::Name(name) => delete_from_globals_or_locals(position, name),
            other => StmtLoc::new(position.clone(), Node::Delete(vec![other])),
        })
        .collect();
    if_true(position, body)
}

fn delete_from_globals_or_locals(position: &CodeRange, name: Rc<str>) -> StmtLoc {
    let literal = || expr(position, Expr::Literal(Literal::Str(name.clone())));
    let test = expr(
        position,
        Expr::Compare {
            left: Box::new(literal()),
            ops: vec![(CmpOperator::In, globals_call(position))],
        },
    );
    let pop = expr(
        position,
        Expr::Call {
            func: Box::new(expr(
                position,
                Expr::Attribute {
                    object: Box::new(globals_call(position)),
                    attr: "pop".into(),
                },
            )),
            args: vec![CallArg::Positional(literal())],
            kwargs: Vec::new(),
        },
    );
    StmtLoc::new(
        position.clone(),
        Node::If {
            test,
            body: vec![StmtLoc::new(position.clone(), Node::Expr(pop))],
            or_else: vec![StmtLoc::new(position.clone(), Node::Delete(vec![Target::Name(name.clone())]))],
        },
    )
}

/// Turns a trailing expression statement into `yield <expr>`.
fn yield_last_expression(block: &mut [StmtLoc]) {
    let Some(last) = block.last_mut() else {
        return;
    };
    if let Node::Expr(value) = &mut last.node
        && !matches!(value.expr, Expr::Yield(_))
    {
        let position = value.position.clone();
        let inner = mem::replace(&mut value.expr, Expr::Literal(Literal::None));
        value.expr = Expr::Yield(Some(Box::new(ExprLoc::new(position, inner))));
    }
}

fn if_true(position: &CodeRange, body: Vec<StmtLoc>) -> Node {
    Node::If {
        test: expr(position, Expr::Literal(Literal::Bool(true))),
        body,
        or_else: Vec::new(),
    }
}

fn globals_call(position: &CodeRange) -> ExprLoc {
    expr(
        position,
        Expr::Call {
            func: Box::new(expr(position, Expr::Name("globals".into()))),
            args: Vec::new(),
            kwargs: Vec::new(),
        },
    )
}

fn expr(position: &CodeRange, expr: Expr) -> ExprLoc {
    ExprLoc::new(position.clone(), expr)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn try_body(unit: &TransformedUnit) -> &[StmtLoc] {
        let Node::Try(try_block) = &unit.function().body[0].node else {
            panic!("expected the template try block");
        };
        &try_block.body
    }

    #[test]
    fn signature_lists_arguments_in_order() {
        let unit = wrap_code("pass", &[EXECUTOR_ARG, "_a", "_b"]).unwrap();
        assert_eq!(unit.arg_names().collect::<Vec<_>>(), [EXECUTOR_ARG, "_a", "_b"]);
        assert_eq!(&*unit.function().name, REPL_COROUTINE);
        assert!(unit.function().is_async);
    }

    #[test]
    fn trailing_expression_is_yielded() {
        let unit = wrap_code("x = 1\nx + 1", &[EXECUTOR_ARG]).unwrap();
        assert!(unit.is_generator());
        let body = try_body(&unit);
        assert!(matches!(&body[1].node, Node::Expr(e) if matches!(e.expr, Expr::Yield(Some(_)))));
    }

    #[test]
    fn statements_only_stay_a_coroutine() {
        for source in ["", "# comment", "b = 12 + 82"] {
            let unit = wrap_code(source, &[EXECUTOR_ARG]).unwrap();
            assert!(!unit.is_generator(), "{source:?}");
        }
    }

    #[test]
    fn existing_yield_is_not_wrapped_twice() {
        let unit = wrap_code("yield 1", &[EXECUTOR_ARG]).unwrap();
        let Node::Expr(value) = &try_body(&unit)[0].node else {
            panic!("expected expression statement");
        };
        let Expr::Yield(Some(inner)) = &value.expr else {
            panic!("expected yield");
        };
        assert!(matches!(inner.expr, Expr::Literal(Literal::Int(1))));
    }

    #[test]
    fn value_return_becomes_yield_then_bare_return() {
        let unit = wrap_code("if x:\n    return 30\nreturn", &[EXECUTOR_ARG]).unwrap();
        let body = try_body(&unit);
        let Node::If { body: inner, .. } = &body[0].node else {
            panic!("expected if");
        };
        let Node::If { body: rewritten, .. } = &inner[0].node else {
            panic!("expected the rewritten return");
        };
        assert!(matches!(&rewritten[0].node, Node::Expr(e) if matches!(e.expr, Expr::Yield(Some(_)))));
        assert!(matches!(rewritten[1].node, Node::Return(None)));
        assert!(matches!(body[1].node, Node::Return(None)));
    }

    #[test]
    fn nested_functions_are_left_alone() {
        let unit = wrap_code("def f():\n    return 1\ndel_me = 1", &[EXECUTOR_ARG]).unwrap();
        let Node::FunctionDef(def) = &try_body(&unit)[0].node else {
            panic!("expected def");
        };
        assert!(matches!(def.body[0].node, Node::Return(Some(_))));
        assert!(!unit.is_generator());
    }

    #[test]
    fn del_checks_globals_per_name() {
        let unit = wrap_code("del a, b[0]", &[EXECUTOR_ARG]).unwrap();
        let Node::If { body, .. } = &try_body(&unit)[0].node else {
            panic!("expected if True");
        };
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[0].node, Node::If { or_else, .. } if matches!(&or_else[0].node, Node::Delete(_))));
        assert!(matches!(&body[1].node, Node::Delete(targets) if matches!(targets[0], Target::Subscript { .. })));
    }

    #[test]
    fn user_positions_use_repl_filename() {
        let unit = wrap_code("a = 1\nb = 2", &[EXECUTOR_ARG]).unwrap();
        let body = try_body(&unit);
        assert_eq!(&*body[1].position.filename, REPL_FILENAME);
        assert_eq!(body[1].position.start().line, 2);
        assert_eq!(&*unit.function().position.filename, TEMPLATE_FILENAME);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(matches!(wrap_code("1 +", &[EXECUTOR_ARG]), Err(ParseError::Syntax { .. })));
        assert!(matches!(wrap_code("1", &["bad name"]), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn plain_wrap_returns_trailing_expression() {
        let unit = wrap_plain("1 + 2", &[]).unwrap();
        assert!(matches!(unit.function().body[0].node, Node::Return(Some(_))));
        let generator = wrap_plain("yield 1\n2", &[]).unwrap();
        assert!(matches!(generator.function().body[1].node, Node::Expr(_)));
    }
}
