use std::rc::Rc;

use ahash::AHashSet;

use crate::expressions::{CallArg, Expr, ExprLoc, FStringPart, Node, Signature, StmtLoc, Target};

/// Name resolution facts for one function body.
///
/// Computed once when the function's syntax tree is built:
/// - names bound anywhere in the body (or as parameters) are local, unless declared `global`/`nonlocal`
/// - `global` names always resolve in the module namespace
/// - `nonlocal` names resolve in the nearest enclosing function that binds them
/// - everything else is free: enclosing functions, then globals, then builtins
#[derive(Debug, Clone, Default)]
pub struct ScopeInfo {
    pub locals: AHashSet<Rc<str>>,
    pub globals: AHashSet<Rc<str>>,
    pub nonlocals: AHashSet<Rc<str>>,
    /// Whether the body contains `yield`/`yield from` outside nested scopes.
    pub is_generator: bool,
}

impl ScopeInfo {
    #[must_use]
    pub fn analyze(signature: &Signature, body: &[StmtLoc]) -> Self {
        let mut info = Self::default();
        let mut assigned = AHashSet::new();
        for stmt in body {
            collect_declarations(&stmt.node, &mut info.globals, &mut info.nonlocals);
            collect_assigned_names(&stmt.node, &mut assigned);
        }
        info.locals = signature
            .param_names()
            .cloned()
            .chain(assigned)
            .filter(|name| !info.globals.contains(name) && !info.nonlocals.contains(name))
            .collect();
        info.is_generator = body.iter().any(|stmt| node_contains_yield(&stmt.node));
        info
    }

    /// Whether a function with this scope owns `name` as a local binding.
    #[must_use]
    pub fn binds(&self, name: &str) -> bool {
        self.locals.contains(name)
    }
}

/// Collects `global`/`nonlocal` declarations, without entering nested scopes.
fn collect_declarations(node: &Node, globals: &mut AHashSet<Rc<str>>, nonlocals: &mut AHashSet<Rc<str>>) {
    match node {
        Node::Global(names) => globals.extend(names.iter().cloned()),
        Node::Nonlocal(names) => nonlocals.extend(names.iter().cloned()),
        _ => for_each_child_block(node, &mut |block| {
            for stmt in block {
                collect_declarations(&stmt.node, globals, nonlocals);
            }
        }),
    }
}

fn collect_assigned_names(node: &Node, assigned: &mut AHashSet<Rc<str>>) {
    let add_target = |target: &Target, assigned: &mut AHashSet<Rc<str>>| {
        target.for_each_name(&mut |name| {
            assigned.insert(name.clone());
        });
    };
    match node {
        Node::Assign { targets, .. } | Node::Delete(targets) => {
            for target in targets {
                add_target(target, assigned);
            }
        }
        Node::AugAssign { target, .. } | Node::AnnAssign { target, .. } | Node::For { target, .. } => {
            add_target(target, assigned);
        }
        Node::FunctionDef(def) => {
            assigned.insert(def.name.clone());
        }
        Node::ClassDef(class) => {
            assigned.insert(class.name.clone());
        }
        Node::Import(module) => {
            if let Some(top) = module.split('.').next().filter(|s| !s.is_empty()) {
                assigned.insert(top.into());
            }
        }
        Node::Try(try_block) => {
            for handler in &try_block.handlers {
                if let Some(name) = &handler.name {
                    assigned.insert(name.clone());
                }
            }
        }
        _ => {}
    }
    for_each_node_expr(node, &mut |expr| collect_walrus_targets(expr, assigned));
    for_each_child_block(node, &mut |block| {
        for stmt in block {
            collect_assigned_names(&stmt.node, assigned);
        }
    });
}

fn collect_walrus_targets(expr: &ExprLoc, assigned: &mut AHashSet<Rc<str>>) {
    if let Expr::Named { target, .. } = &expr.expr {
        assigned.insert(target.clone());
    }
    for_each_child_expr(&expr.expr, &mut |child| collect_walrus_targets(child, assigned));
}

fn node_contains_yield(node: &Node) -> bool {
    let mut found = false;
    for_each_node_expr(node, &mut |expr| found |= expr_contains_yield(expr));
    for_each_child_block(node, &mut |block| {
        found |= block.iter().any(|stmt| node_contains_yield(&stmt.node));
    });
    found
}

fn expr_contains_yield(expr: &ExprLoc) -> bool {
    if matches!(expr.expr, Expr::Yield(_) | Expr::YieldFrom(_)) {
        return true;
    }
    let mut found = false;
    for_each_child_expr(&expr.expr, &mut |child| found |= expr_contains_yield(child));
    found
}

/// Visits the statement blocks directly nested in `node`.
///
/// Function and class bodies are separate scopes and are never visited.
pub(crate) fn for_each_child_block(node: &Node, f: &mut impl FnMut(&[StmtLoc])) {
    match node {
        Node::If { body, or_else, .. } | Node::While { body, or_else, .. } | Node::For { body, or_else, .. } => {
            f(body);
            f(or_else);
        }
        Node::Try(try_block) => {
            f(&try_block.body);
            for handler in &try_block.handlers {
                f(&handler.body);
            }
            f(&try_block.or_else);
            f(&try_block.finally);
        }
        _ => {}
    }
}

/// Visits the expressions a statement evaluates in the current scope.
///
/// For definitions, these are the decorators, defaults and base classes.
pub(crate) fn for_each_node_expr(node: &Node, f: &mut impl FnMut(&ExprLoc)) {
    match node {
        Node::Expr(e) | Node::Return(Some(e)) | Node::If { test: e, .. } | Node::While { test: e, .. } => f(e),
        Node::Assign { targets, value } => {
            for target in targets {
                for_each_target_expr(target, f);
            }
            f(value);
        }
        Node::AugAssign { target, value, .. } => {
            for_each_target_expr(target, f);
            f(value);
        }
        Node::AnnAssign { target, value } => {
            for_each_target_expr(target, f);
            if let Some(value) = value {
                f(value);
            }
        }
        Node::Delete(targets) => {
            for target in targets {
                for_each_target_expr(target, f);
            }
        }
        Node::For { target, iter, .. } => {
            for_each_target_expr(target, f);
            f(iter);
        }
        Node::Try(try_block) => try_block.handlers.iter().filter_map(|h| h.exc_type.as_ref()).for_each(f),
        Node::Raise { exc, cause } => exc.iter().chain(cause.iter()).for_each(f),
        Node::Assert { test, msg } => {
            f(test);
            if let Some(msg) = msg {
                f(msg);
            }
        }
        Node::FunctionDef(def) => {
            def.decorators.iter().for_each(&mut *f);
            def.signature
                .pos_only
                .iter()
                .chain(&def.signature.args)
                .chain(&def.signature.kw_only)
                .filter_map(|p| p.default.as_ref())
                .for_each(f);
        }
        Node::ClassDef(class) => class.decorators.iter().chain(&class.bases).for_each(f),
        Node::Return(None)
        | Node::Pass
        | Node::Break
        | Node::Continue
        | Node::Global(_)
        | Node::Nonlocal(_)
        | Node::Import(_) => {}
    }
}

fn for_each_target_expr(target: &Target, f: &mut impl FnMut(&ExprLoc)) {
    match target {
        Target::Name(_) => {}
        Target::Attribute { object, .. } => f(object),
        Target::Subscript { object, index } => {
            f(object);
            f(index);
        }
        Target::Tuple(items) => {
            for item in items {
                for_each_target_expr(item, f);
            }
        }
        Target::Starred(inner) => for_each_target_expr(inner, f),
    }
}

/// Visits the direct sub-expressions of `expr` evaluated in the same scope.
///
/// Lambda bodies are skipped (their defaults are visited); comprehension
/// elements and conditions are visited since they run in the enclosing frame.
pub(crate) fn for_each_child_expr(expr: &Expr, f: &mut impl FnMut(&ExprLoc)) {
    match expr {
        Expr::Literal(_) | Expr::Name(_) | Expr::Yield(None) => {}
        Expr::FString(parts) => for_each_fstring_expr(parts, f),
        Expr::List(items) | Expr::Tuple(items) => items.iter().for_each(f),
        Expr::Dict(items) => {
            for item in items {
                if let Some(key) = &item.key {
                    f(key);
                }
                f(&item.value);
            }
        }
        Expr::Starred(inner)
        | Expr::Await(inner)
        | Expr::Yield(Some(inner))
        | Expr::YieldFrom(inner)
        | Expr::UnaryOp { operand: inner, .. }
        | Expr::Named { value: inner, .. } => f(inner),
        Expr::BoolOp { values, .. } => values.iter().for_each(f),
        Expr::BinOp { left, right, .. } => {
            f(left);
            f(right);
        }
        Expr::Compare { left, ops } => {
            f(left);
            for (_, right) in ops {
                f(right);
            }
        }
        Expr::IfElse { test, body, orelse } => {
            f(test);
            f(body);
            f(orelse);
        }
        Expr::Call { func, args, kwargs } => {
            f(func);
            for arg in args {
                match arg {
                    CallArg::Positional(e) | CallArg::Starred(e) => f(e),
                }
            }
            for kw in kwargs {
                f(&kw.value);
            }
        }
        Expr::Attribute { object, .. } => f(object),
        Expr::Subscript { object, index } => {
            f(object);
            f(index);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                f(part);
            }
        }
        Expr::Lambda(def) => def
            .signature
            .positional()
            .chain(&def.signature.kw_only)
            .filter_map(|p| p.default.as_ref())
            .for_each(f),
        Expr::ListComp { elt, generators } | Expr::GeneratorExp { elt, generators } => {
            for comp in generators {
                f(&comp.iter);
                comp.ifs.iter().for_each(&mut *f);
            }
            f(elt);
        }
        Expr::DictComp { key, value, generators } => {
            for comp in generators {
                f(&comp.iter);
                comp.ifs.iter().for_each(&mut *f);
            }
            f(key);
            f(value);
        }
    }
}

fn for_each_fstring_expr(parts: &[FStringPart], f: &mut impl FnMut(&ExprLoc)) {
    for part in parts {
        if let FStringPart::Interpolation { expr, format_spec, .. } = part {
            f(expr);
            if let Some(spec) = format_spec {
                for_each_fstring_expr(spec, f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{expressions::FunctionDef, parse::parse};

    fn analyze_first_def(code: &str) -> Rc<FunctionDef> {
        let nodes = parse(code, "<test>").unwrap();
        match &nodes[0].node {
            Node::FunctionDef(def) => def.clone(),
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn assigned_and_deleted_names_are_local() {
        let def = analyze_first_def("def f(a):\n    b = 1\n    del c\n    for d in a: pass\n    return e\n");
        for name in ["a", "b", "c", "d"] {
            assert!(def.scope.binds(name), "{name} should be local");
        }
        assert!(!def.scope.binds("e"));
        assert!(!def.is_generator());
    }

    #[test]
    fn global_declaration_wins_over_assignment() {
        let def = analyze_first_def("def f():\n    global x\n    x = 1\n");
        assert!(!def.scope.binds("x"));
        assert!(def.scope.globals.contains("x"));
    }

    #[test]
    fn yield_in_nested_def_does_not_make_outer_a_generator() {
        let def = analyze_first_def("def f():\n    def g():\n        yield 1\n    return g\n");
        assert!(!def.is_generator());
        assert!(def.scope.binds("g"));
    }

    #[test]
    fn yield_inside_if_makes_a_generator() {
        let def = analyze_first_def("def f(x):\n    if x:\n        y = yield x\n");
        assert!(def.is_generator());
        assert!(def.scope.binds("y"));
    }

    #[test]
    fn walrus_binds_in_enclosing_function() {
        let def = analyze_first_def("def f(xs):\n    return [y for x in xs if (y := x)]\n");
        assert!(def.scope.binds("y"));
        assert!(!def.scope.binds("x"));
    }
}
