//! The tree-walking evaluator.
//!
//! Every recursive entry point returns an [`EvalFuture`]. Ordinary code never
//! suspends, so those futures complete on their first poll; a `yield` parks its
//! value in the frame's [`YieldSlot`](crate::generator::YieldSlot) and returns
//! `Pending`, which unwinds the poll back to whoever resumed the generator.

use std::{cell::RefCell, fmt::Write, rc::Rc};

use crate::{
    builtins::{Kwargs, call_builtin, iterator, no_kwargs},
    dict::Dict,
    exception::{ExcType, ExceptionValue, RunError, RunResult},
    expressions::{
        BoolOperator, CallArg, CallKwarg, ClassDef, Comprehension, ConversionFlag, DictItem, Expr,
        ExprLoc, FStringPart, FunctionDef, Literal, Node, StmtLoc, Target, Try,
    },
    format::format_value,
    frame::Frame,
    function::{Class, Function, Instance},
    generator::{Coroutine, GenStep, Generator, YieldPoint, YieldSlot},
    iter::{PyIter, collect_values},
    methods::call_method,
    ops::{
        SliceSpec, binary_op, compare, del_attr, del_item, del_slice, get_attr, get_item, get_slice, inplace_op,
        set_attr, set_item, set_slice, unary_op,
    },
    runtime::{EvalFuture, Runtime},
    value::Value,
};

/// How a statement finished.
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub(crate) fn exec_block<'a>(frame: &'a Frame, body: &'a [StmtLoc]) -> EvalFuture<'a, Flow> {
    Box::pin(async move {
        for stmt in body {
            match exec_stmt(frame, stmt).await? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    })
}

pub(crate) fn exec_stmt<'a>(frame: &'a Frame, stmt: &'a StmtLoc) -> EvalFuture<'a, Flow> {
    Box::pin(async move {
        frame
            .runtime
            .trace(|t| t.on_statement(stmt.position.start().line, &frame.name));
        exec_node(frame, &stmt.node).await.map_err(|err| {
            if err.is_fresh() {
                frame.runtime.trace(|t| t.on_exception(&frame.name, err.exc_type()));
            }
            err.located_at(&stmt.position, &frame.name)
        })
    })
}

async fn exec_node(frame: &Frame, node: &Node) -> RunResult<Flow> {
    match node {
        Node::Pass | Node::Global(_) | Node::Nonlocal(_) => {}
        Node::Expr(expr) => {
            eval(frame, expr).await?;
        }
        Node::Return(value) => {
            let value = match value {
                Some(expr) => eval(frame, expr).await?,
                None => Value::None,
            };
            return Ok(Flow::Return(value));
        }
        Node::Assign { targets, value } => {
            let value = eval(frame, value).await?;
            for target in targets {
                assign(frame, target, value.clone()).await?;
            }
        }
        Node::AugAssign { target, op, value } => match target {
            Target::Name(name) => {
                let current = frame.load_name(name)?;
                let rhs = eval(frame, value).await?;
                frame.store_name(name, inplace_op(&current, *op, &rhs)?)?;
            }
            Target::Attribute { object, attr } => {
                let object = eval(frame, object).await?;
                let current = get_attr(&object, attr)?;
                let rhs = eval(frame, value).await?;
                set_attr(&object, attr, inplace_op(&current, *op, &rhs)?)?;
            }
            Target::Subscript { object, index } => {
                let object = eval(frame, object).await?;
                match eval_index(frame, index).await? {
                    Index::Item(index) => {
                        let current = get_item(&object, &index)?;
                        let rhs = eval(frame, value).await?;
                        set_item(&object, &index, inplace_op(&current, *op, &rhs)?)?;
                    }
                    Index::Slice(slice) => {
                        let current = get_slice(&object, slice)?;
                        let rhs = eval(frame, value).await?;
                        set_slice(&object, slice, &inplace_op(&current, *op, &rhs)?)?;
                    }
                }
            }
            Target::Tuple(_) | Target::Starred(_) => {
                return Err(ExcType::SyntaxError.error("illegal expression for augmented assignment"));
            }
        },
        Node::AnnAssign { target, value } => {
            if let Some(value) = value {
                let value = eval(frame, value).await?;
                assign(frame, target, value).await?;
            }
        }
        Node::Delete(targets) => {
            for target in targets {
                delete(frame, target).await?;
            }
        }
        Node::If { test, body, or_else } => {
            let branch = if eval(frame, test).await?.truthy() { body } else { or_else };
            return exec_block(frame, branch).await;
        }
        Node::While { test, body, or_else } => {
            while eval(frame, test).await?.truthy() {
                match exec_block(frame, body).await? {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break => return Ok(Flow::Normal),
                    flow @ Flow::Return(_) => return Ok(flow),
                }
            }
            return exec_block(frame, or_else).await;
        }
        Node::For {
            target,
            iter,
            body,
            or_else,
            is_async,
        } => {
            let iterable = eval(frame, iter).await?;
            let mut iter = if *is_async {
                PyIter::new_async(&iterable)?
            } else {
                PyIter::new(&iterable)?
            };
            while let Some(item) = iter.next_value()? {
                assign(frame, target, item).await?;
                match exec_block(frame, body).await? {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break => return Ok(Flow::Normal),
                    flow @ Flow::Return(_) => return Ok(flow),
                }
            }
            return exec_block(frame, or_else).await;
        }
        Node::Break => return Ok(Flow::Break),
        Node::Continue => return Ok(Flow::Continue),
        Node::Try(block) => return exec_try(frame, block).await,
        Node::Raise { exc, cause } => {
            let Some(exc) = exc else {
                return match frame.current_exception() {
                    Some(active) => Err(RunError::new(active)),
                    None => Err(ExcType::RuntimeError.error("No active exception to reraise")),
                };
            };
            let value = eval(frame, exc).await?;
            if let Some(cause) = cause {
                eval(frame, cause).await?;
            }
            return Err(RunError::new(to_exception(frame, value).await?));
        }
        Node::Assert { test, msg } => {
            if !eval(frame, test).await?.truthy() {
                let args = match msg {
                    Some(msg) => vec![eval(frame, msg).await?],
                    None => Vec::new(),
                };
                return Err(RunError::new(ExceptionValue::new(ExcType::AssertionError, args)));
            }
        }
        Node::FunctionDef(def) => {
            let decorators = eval_all(frame, &def.decorators).await?;
            let function = make_function(frame, def).await?;
            let value = decorate(frame, decorators, function).await?;
            frame.store_name(&def.name, value)?;
        }
        Node::ClassDef(def) => {
            let decorators = eval_all(frame, &def.decorators).await?;
            let class = make_class(frame, def).await?;
            let value = decorate(frame, decorators, class).await?;
            frame.store_name(&def.name, value)?;
        }
        Node::Import(module) => {
            return Err(ExcType::ModuleNotFoundError.error(format!("No module named '{module}'")));
        }
    }
    Ok(Flow::Normal)
}

async fn exec_try(frame: &Frame, block: &Try) -> RunResult<Flow> {
    let outcome = match exec_block(frame, &block.body).await {
        Ok(Flow::Normal) => exec_block(frame, &block.or_else).await,
        Ok(flow) => Ok(flow),
        Err(err) => handle(frame, block, err).await,
    };
    if block.finally.is_empty() {
        return outcome;
    }
    match exec_block(frame, &block.finally).await? {
        Flow::Normal => outcome,
        flow => Ok(flow),
    }
}

async fn handle(frame: &Frame, block: &Try, err: RunError) -> RunResult<Flow> {
    for handler in &block.handlers {
        if let Some(expr) = &handler.exc_type {
            let class = eval(frame, expr).await?;
            if !exception_matches(err.value(), &class)? {
                continue;
            }
        }
        let exc = err.value().clone();
        if let Some(name) = &handler.name {
            frame.store_name(name, Value::Exception(exc.clone()))?;
        }
        frame.push_handling(exc);
        let result = exec_block(frame, &handler.body).await;
        frame.pop_handling();
        if let Some(name) = &handler.name {
            // the handler body may already have deleted it
            let _ = frame.delete_name(name);
        }
        return result;
    }
    Err(err)
}

fn exception_matches(exc: &ExceptionValue, class: &Value) -> RunResult<bool> {
    match class {
        Value::ExcType(exc_type) => Ok(exc.exc_type.is_subclass_of(*exc_type)),
        Value::Class(class) if class.exc_base.is_some() => Ok(exc.matches_class(class)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exc, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExcType::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

/// The exception object `raise value` raises.
async fn to_exception(frame: &Frame, value: Value) -> RunResult<Rc<ExceptionValue>> {
    match value {
        Value::Exception(exc) => Ok(exc),
        Value::ExcType(exc_type) => Ok(ExceptionValue::new(exc_type, Vec::new())),
        Value::Class(class) if class.exc_base.is_some() => {
            match call_value(frame, Value::Class(class), Vec::new(), Vec::new()).await? {
                Value::Exception(exc) => Ok(exc),
                _ => Err(ExcType::type_error("exceptions must derive from BaseException")),
            }
        }
        _ => Err(ExcType::type_error("exceptions must derive from BaseException")),
    }
}

async fn eval_all(frame: &Frame, exprs: &[ExprLoc]) -> RunResult<Vec<Value>> {
    let mut values = Vec::with_capacity(exprs.len());
    for expr in exprs {
        values.push(eval(frame, expr).await?);
    }
    Ok(values)
}

/// Applies decorators innermost first.
async fn decorate(frame: &Frame, decorators: Vec<Value>, mut value: Value) -> RunResult<Value> {
    for decorator in decorators.into_iter().rev() {
        value = call_value(frame, decorator, vec![value], Vec::new()).await?;
    }
    Ok(value)
}

/// Builds a function object, evaluating its defaults in the defining frame.
pub(crate) async fn make_function(frame: &Frame, def: &Rc<FunctionDef>) -> RunResult<Value> {
    let mut defaults = Vec::new();
    for param in def.signature.positional() {
        defaults.push(match &param.default {
            Some(expr) => Some(eval(frame, expr).await?),
            None => None,
        });
    }
    let mut kw_defaults = Vec::with_capacity(def.signature.kw_only.len());
    for param in &def.signature.kw_only {
        kw_defaults.push(match &param.default {
            Some(expr) => Some(eval(frame, expr).await?),
            None => None,
        });
    }
    Ok(Value::Function(Rc::new(Function {
        def: def.clone(),
        defaults,
        kw_defaults,
        globals: frame.globals.clone(),
        closure: frame.closure_for_child(),
    })))
}

async fn make_class(frame: &Frame, def: &ClassDef) -> RunResult<Value> {
    let mut bases = Vec::with_capacity(def.bases.len());
    let mut exc_base = None;
    for base in eval_all(frame, &def.bases).await? {
        match base {
            Value::Class(class) => {
                exc_base = exc_base.or(class.exc_base);
                bases.push(class);
            }
            Value::ExcType(exc_type) => exc_base = exc_base.or(Some(exc_type)),
            other => {
                return Err(ExcType::type_error(format!(
                    "bases must be types, not '{}'",
                    other.type_name()
                )));
            }
        }
    }
    let body = frame.class(def.name.clone());
    if let Flow::Return(_) = exec_block(&body, &def.body).await? {
        return Err(ExcType::SyntaxError.error("'return' outside function"));
    }
    let namespace = body.locals.borrow().clone();
    Ok(Value::Class(Rc::new(Class {
        name: def.name.clone(),
        bases,
        exc_base,
        namespace: RefCell::new(namespace),
    })))
}

fn assign<'a>(frame: &'a Frame, target: &'a Target, value: Value) -> EvalFuture<'a, ()> {
    bind(frame, target, value, Binding::Scope)
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    Scope,
    /// Names go to the innermost comprehension overlay.
    Comprehension,
}

fn bind<'a>(frame: &'a Frame, target: &'a Target, value: Value, binding: Binding) -> EvalFuture<'a, ()> {
    Box::pin(async move {
        match target {
            Target::Name(name) => match binding {
                Binding::Scope => frame.store_name(name, value),
                Binding::Comprehension => {
                    frame.store_comprehension(name, value);
                    Ok(())
                }
            },
            Target::Attribute { object, attr } => {
                let object = eval(frame, object).await?;
                set_attr(&object, attr, value)
            }
            Target::Subscript { object, index } => {
                let object = eval(frame, object).await?;
                match eval_index(frame, index).await? {
                    Index::Item(index) => set_item(&object, &index, value),
                    Index::Slice(slice) => set_slice(&object, slice, &value),
                }
            }
            Target::Tuple(targets) => {
                for (target, item) in targets.iter().zip(unpack(value, targets)?) {
                    bind(frame, target, item, binding).await?;
                }
                Ok(())
            }
            Target::Starred(_) => Err(ExcType::SyntaxError.error("starred assignment target must be in a list or tuple")),
        }
    })
}

/// Splits `value` into one item per target; a starred target takes a list of the rest.
fn unpack(value: Value, targets: &[Target]) -> RunResult<Vec<Value>> {
    let items = match &value {
        Value::List(_)
        | Value::Tuple(_)
        | Value::Str(_)
        | Value::Dict(_)
        | Value::Range(_)
        | Value::Iterator(_) => collect_values(&value)?,
        Value::Generator(generator) if !generator.is_async() => collect_values(&value)?,
        other => {
            return Err(ExcType::type_error(format!(
                "cannot unpack non-iterable {} object",
                other.type_name()
            )));
        }
    };
    let expected = targets.len();
    let Some(star) = targets.iter().position(|t| matches!(t, Target::Starred(_))) else {
        return match items.len() {
            n if n > expected => Err(ExcType::ValueError.error(format!(
                "too many values to unpack (expected {expected})"
            ))),
            n if n < expected => Err(ExcType::ValueError.error(format!(
                "not enough values to unpack (expected {expected}, got {n})"
            ))),
            _ => Ok(items),
        };
    };
    let fixed = expected - 1;
    if items.len() < fixed {
        return Err(ExcType::ValueError.error(format!(
            "not enough values to unpack (expected at least {fixed}, got {})",
            items.len()
        )));
    }
    let after = fixed - star;
    let mut items = items;
    let tail = items.split_off(items.len() - after);
    let middle = items.split_off(star);
    items.push(Value::list(middle));
    items.extend(tail);
    Ok(items)
}

fn delete<'a>(frame: &'a Frame, target: &'a Target) -> EvalFuture<'a, ()> {
    Box::pin(async move {
        match target {
            Target::Name(name) => frame.delete_name(name),
            Target::Attribute { object, attr } => del_attr(&eval(frame, object).await?, attr),
            Target::Subscript { object, index } => {
                let object = eval(frame, object).await?;
                match eval_index(frame, index).await? {
                    Index::Item(index) => del_item(&object, &index),
                    Index::Slice(slice) => del_slice(&object, slice),
                }
            }
            Target::Tuple(targets) => {
                for target in targets {
                    delete(frame, target).await?;
                }
                Ok(())
            }
            Target::Starred(_) => Err(ExcType::SyntaxError.error("cannot delete starred")),
        }
    })
}

enum Index {
    Item(Value),
    Slice(SliceSpec),
}

async fn eval_index(frame: &Frame, index: &ExprLoc) -> RunResult<Index> {
    let Expr::Slice { lower, upper, step } = &index.expr else {
        return Ok(Index::Item(eval(frame, index).await?));
    };
    Ok(Index::Slice(SliceSpec {
        lower: slice_bound(frame, lower.as_deref()).await?,
        upper: slice_bound(frame, upper.as_deref()).await?,
        step: slice_bound(frame, step.as_deref()).await?,
    }))
}

async fn slice_bound(frame: &Frame, bound: Option<&ExprLoc>) -> RunResult<Option<i64>> {
    let Some(expr) = bound else {
        return Ok(None);
    };
    match eval(frame, expr).await? {
        Value::None => Ok(None),
        value => value.as_index().map(Some).ok_or_else(|| {
            ExcType::type_error("slice indices must be integers or None or have an __index__ method")
        }),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Ellipsis => Value::Ellipsis,
        Literal::None => Value::None,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::LongInt(i) => Value::LongInt(i.clone()),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

pub(crate) fn eval<'a>(frame: &'a Frame, expr: &'a ExprLoc) -> EvalFuture<'a, Value> {
    Box::pin(async move {
        match &expr.expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Name(name) => frame.load_name(name),
            Expr::FString(parts) => Ok(Value::Str(eval_fstring(frame, parts).await?.into())),
            Expr::List(items) => Ok(Value::list(eval_items(frame, items).await?)),
            Expr::Tuple(items) => Ok(Value::tuple(eval_items(frame, items).await?)),
            Expr::Dict(items) => Ok(Value::dict(eval_dict(frame, items).await?)),
            Expr::Starred(_) => Err(ExcType::SyntaxError.error("can't use starred expression here")),
            Expr::BoolOp { op, values } => {
                let mut result = Value::Bool(matches!(op, BoolOperator::And));
                for value in values {
                    result = eval(frame, value).await?;
                    let done = match op {
                        BoolOperator::And => !result.truthy(),
                        BoolOperator::Or => result.truthy(),
                    };
                    if done {
                        break;
                    }
                }
                Ok(result)
            }
            Expr::BinOp { left, op, right } => {
                let left = eval(frame, left).await?;
                let right = eval(frame, right).await?;
                binary_op(&left, *op, &right)
            }
            Expr::UnaryOp { op, operand } => unary_op(*op, &eval(frame, operand).await?),
            Expr::Compare { left, ops } => {
                let mut current = eval(frame, left).await?;
                for (op, right) in ops {
                    let right = eval(frame, right).await?;
                    if !compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                if eval(frame, test).await?.truthy() {
                    eval(frame, body).await
                } else {
                    eval(frame, orelse).await
                }
            }
            Expr::Named { target, value } => {
                let value = eval(frame, value).await?;
                frame.store_name(target, value.clone())?;
                Ok(value)
            }
            Expr::Call { func, args, kwargs } => {
                let callee = eval(frame, func).await?;
                let args = eval_args(frame, args).await?;
                let kwargs = eval_kwargs(frame, kwargs).await?;
                call_value(frame, callee, args, kwargs).await
            }
            Expr::Attribute { object, attr } => get_attr(&eval(frame, object).await?, attr),
            Expr::Subscript { object, index } => {
                let object = eval(frame, object).await?;
                match eval_index(frame, index).await? {
                    Index::Item(index) => get_item(&object, &index),
                    Index::Slice(slice) => get_slice(&object, slice),
                }
            }
            Expr::Slice { .. } => Err(ExcType::SyntaxError.error("slice outside of a subscript")),
            Expr::Lambda(def) => make_function(frame, def).await,
            Expr::ListComp { elt, generators } => {
                let mut out = Collected::Items(Vec::new());
                comprehension(frame, generators, Element::Item(elt), &mut out).await?;
                Ok(out.into_value(false))
            }
            Expr::GeneratorExp { elt, generators } => {
                let mut out = Collected::Items(Vec::new());
                comprehension(frame, generators, Element::Item(elt), &mut out).await?;
                Ok(out.into_value(true))
            }
            Expr::DictComp { key, value, generators } => {
                let mut out = Collected::Dict(Dict::new());
                comprehension(frame, generators, Element::Pair(key, value), &mut out).await?;
                Ok(out.into_value(false))
            }
            Expr::Await(awaitable) => {
                let coroutine = match eval(frame, awaitable).await? {
                    Value::Coroutine(coroutine) => coroutine,
                    other => {
                        return Err(ExcType::type_error(format!(
                            "object {} can't be used in 'await' expression",
                            other.type_name()
                        )));
                    }
                };
                let body = coroutine.take_body()?;
                let _guard = frame.runtime.enter()?;
                body.await
            }
            Expr::Yield(value) => {
                let slot = yield_slot(frame)?;
                let value = match value {
                    Some(expr) => eval(frame, expr).await?,
                    None => Value::None,
                };
                Ok(YieldPoint::new(slot, value).await)
            }
            Expr::YieldFrom(source) => {
                let slot = yield_slot(frame)?;
                match eval(frame, source).await? {
                    Value::Generator(inner) if !inner.is_async() => {
                        let mut sent = Value::None;
                        loop {
                            match inner.resume(sent)? {
                                GenStep::Yielded(value) => sent = YieldPoint::new(slot, value).await,
                                GenStep::Complete(result) => return Ok(result),
                            }
                        }
                    }
                    other => {
                        let mut iter = PyIter::new(&other)?;
                        while let Some(item) = iter.next_value()? {
                            YieldPoint::new(slot, item).await;
                        }
                        Ok(Value::None)
                    }
                }
            }
        }
    })
}

fn yield_slot(frame: &Frame) -> RunResult<&YieldSlot> {
    frame
        .yield_slot
        .as_deref()
        .ok_or_else(|| ExcType::SyntaxError.error("'yield' outside function"))
}

async fn eval_items(frame: &Frame, items: &[ExprLoc]) -> RunResult<Vec<Value>> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        if let Expr::Starred(inner) = &item.expr {
            values.extend(collect_values(&eval(frame, inner).await?)?);
        } else {
            values.push(eval(frame, item).await?);
        }
    }
    Ok(values)
}

async fn eval_dict(frame: &Frame, items: &[DictItem]) -> RunResult<Dict> {
    let mut dict = Dict::new();
    for item in items {
        let value = eval(frame, &item.value).await?;
        match &item.key {
            Some(key) => {
                let key = eval(frame, key).await?;
                dict.insert(key, value)?;
            }
            None => match value {
                Value::Dict(other) => {
                    for (key, value) in other.borrow().iter() {
                        dict.insert(key.clone(), value.clone())?;
                    }
                }
                other => {
                    return Err(ExcType::type_error(format!(
                        "'{}' object is not a mapping",
                        other.type_name()
                    )));
                }
            },
        }
    }
    Ok(dict)
}

async fn eval_args(frame: &Frame, args: &[CallArg]) -> RunResult<Vec<Value>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            CallArg::Positional(expr) => values.push(eval(frame, expr).await?),
            CallArg::Starred(expr) => {
                let value = eval(frame, expr).await?;
                let items = collect_values(&value).map_err(|_| {
                    ExcType::type_error(format!(
                        "Value after * must be an iterable, not {}",
                        value.type_name()
                    ))
                })?;
                values.extend(items);
            }
        }
    }
    Ok(values)
}

async fn eval_kwargs(frame: &Frame, kwargs: &[CallKwarg]) -> RunResult<Kwargs> {
    let mut values = Vec::with_capacity(kwargs.len());
    for kwarg in kwargs {
        let value = eval(frame, &kwarg.value).await?;
        if let Some(name) = &kwarg.name {
            values.push((name.clone(), value));
            continue;
        }
        let mapping = match value {
            Value::Dict(mapping) => mapping,
            other => {
                return Err(ExcType::type_error(format!(
                    "argument after ** must be a mapping, not {}",
                    other.type_name()
                )));
            }
        };
        for (key, value) in mapping.borrow().iter() {
            let Value::Str(name) = key else {
                return Err(ExcType::type_error("keywords must be strings"));
            };
            values.push((name.clone(), value.clone()));
        }
    }
    Ok(values)
}

fn eval_fstring<'a>(frame: &'a Frame, parts: &'a [FStringPart]) -> EvalFuture<'a, String> {
    Box::pin(async move {
        let mut out = String::new();
        for part in parts {
            let (expr, conversion, format_spec, debug_prefix) = match part {
                FStringPart::Literal(text) => {
                    out.push_str(text);
                    continue;
                }
                FStringPart::Interpolation {
                    expr,
                    conversion,
                    format_spec,
                    debug_prefix,
                } => (expr, *conversion, format_spec, debug_prefix),
            };
            if let Some(prefix) = debug_prefix {
                out.push_str(prefix);
            }
            let value = eval(frame, expr).await?;
            let spec = match format_spec {
                Some(spec) => eval_fstring(frame, spec).await?,
                None => String::new(),
            };
            // `f"{x=}"` shows the repr unless a spec or conversion says otherwise
            let conversion = match conversion {
                ConversionFlag::None if debug_prefix.is_some() && format_spec.is_none() => ConversionFlag::Repr,
                other => other,
            };
            let converted = match conversion {
                ConversionFlag::None => None,
                ConversionFlag::Str => Some(str_value(frame, value.clone()).await?),
                ConversionFlag::Repr => Some(repr_value(frame, value.clone()).await?),
                ConversionFlag::Ascii => Some(ascii_escape(&repr_value(frame, value.clone()).await?)),
            };
            match converted {
                Some(text) if spec.is_empty() => out.push_str(&text),
                Some(text) => out.push_str(&format_value(&Value::Str(text.into()), &spec)?),
                None if spec.is_empty() => out.push_str(&str_value(frame, value).await?),
                None => out.push_str(&format_value(&value, &spec)?),
            }
        }
        Ok(out)
    })
}

/// `ascii()`: escapes every non-ASCII character of a repr.
fn ascii_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match u32::from(c) {
            0..0x80 => out.push(c),
            code @ 0x80..0x100 => {
                let _ = write!(out, "\\x{code:02x}");
            }
            code @ 0x100..0x10000 => {
                let _ = write!(out, "\\u{code:04x}");
            }
            code => {
                let _ = write!(out, "\\U{code:08x}");
            }
        }
    }
    out
}

#[derive(Clone, Copy)]
enum Element<'a> {
    Item(&'a ExprLoc),
    Pair(&'a ExprLoc, &'a ExprLoc),
}

enum Collected {
    Items(Vec<Value>),
    Dict(Dict),
}

impl Collected {
    fn into_value(self, lazy: bool) -> Value {
        match self {
            Self::Items(items) if lazy => iterator(items),
            Self::Items(items) => Value::list(items),
            Self::Dict(dict) => Value::dict(dict),
        }
    }
}

async fn comprehension(
    frame: &Frame,
    generators: &[Comprehension],
    element: Element<'_>,
    out: &mut Collected,
) -> RunResult<()> {
    frame.push_comprehension();
    let result = comprehension_clause(frame, generators, element, out).await;
    frame.pop_comprehension();
    result
}

fn comprehension_clause<'a>(
    frame: &'a Frame,
    generators: &'a [Comprehension],
    element: Element<'a>,
    out: &'a mut Collected,
) -> EvalFuture<'a, ()> {
    Box::pin(async move {
        let Some((clause, rest)) = generators.split_first() else {
            match (element, out) {
                (Element::Item(elt), Collected::Items(items)) => items.push(eval(frame, elt).await?),
                (Element::Pair(key, value), Collected::Dict(dict)) => {
                    let key = eval(frame, key).await?;
                    let value = eval(frame, value).await?;
                    dict.insert(key, value)?;
                }
                _ => return Err(ExcType::RuntimeError.error("comprehension element mismatch")),
            }
            return Ok(());
        };
        let iterable = eval(frame, &clause.iter).await?;
        let mut iter = if clause.is_async {
            PyIter::new_async(&iterable)?
        } else {
            PyIter::new(&iterable)?
        };
        'items: while let Some(item) = iter.next_value()? {
            bind(frame, &clause.target, item, Binding::Comprehension).await?;
            for condition in &clause.ifs {
                if !eval(frame, condition).await?.truthy() {
                    continue 'items;
                }
            }
            comprehension_clause(frame, rest, element, &mut *out).await?;
        }
        Ok(())
    })
}

/// Calls any callable value.
pub(crate) fn call_value<'a>(frame: &'a Frame, callee: Value, args: Vec<Value>, kwargs: Kwargs) -> EvalFuture<'a, Value> {
    Box::pin(async move {
        match callee {
            Value::Function(function) => call_function(frame.runtime.clone(), function, args, kwargs).await,
            Value::BoundMethod(method) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(method.receiver.clone());
                full.extend(args);
                call_value(frame, method.func.clone(), full, kwargs).await
            }
            Value::Builtin(builtin) => call_builtin(frame, builtin, args, kwargs).await,
            Value::BuiltinMethod(method) => {
                call_method(frame, method.receiver.clone(), method.name.clone(), args, kwargs).await
            }
            Value::Native(native) => {
                no_kwargs(&native.name, &kwargs)?;
                native.call(&args)
            }
            Value::Class(class) => instantiate(frame, class, args, kwargs).await,
            Value::ExcType(exc_type) => {
                no_kwargs(&exc_type.to_string(), &kwargs)?;
                Ok(Value::Exception(ExceptionValue::new(exc_type, args)))
            }
            Value::TypeName(name) => Err(ExcType::type_error(format!("cannot create '{name}' instances"))),
            other => Err(ExcType::not_callable(&other.type_name())),
        }
    })
}

/// Calls a user function.
///
/// Generator and async functions return their generator or coroutine object
/// without running any of the body.
pub(crate) fn call_function(
    runtime: Rc<Runtime>,
    function: Rc<Function>,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> EvalFuture<'static, Value> {
    Box::pin(async move {
        let locals = function.bind_arguments(args, kwargs)?;
        let def = function.def.clone();
        if def.is_generator() {
            let slot = Rc::new(YieldSlot::default());
            let frame = Frame::function(runtime.clone(), &function, locals, Some(slot.clone()));
            let body = run_function_body(frame, def.clone());
            return Ok(Value::Generator(Rc::new(Generator::new(
                def.name.clone(),
                def.is_async,
                slot,
                body,
                runtime,
            ))));
        }
        let frame = Frame::function(runtime.clone(), &function, locals, None);
        if def.is_async {
            let body = run_function_body(frame, def.clone());
            return Ok(Value::Coroutine(Rc::new(Coroutine::new(def.name.clone(), body))));
        }
        let _guard = runtime.enter()?;
        run_function_body(frame, def).await
    })
}

fn run_function_body(frame: Frame, def: Rc<FunctionDef>) -> EvalFuture<'static, Value> {
    Box::pin(async move {
        let depth = frame.runtime.depth();
        frame.runtime.trace(|t| t.on_call(&frame.name, depth));
        let result = exec_block(&frame, &def.body).await;
        frame.runtime.trace(|t| t.on_return(&frame.name, depth));
        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(err) => Err(err.leave_frame()),
        }
    })
}

async fn instantiate(frame: &Frame, class: Rc<Class>, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    if let Some(exc_type) = class.exc_base {
        no_kwargs(&class.name, &kwargs)?;
        return Ok(Value::Exception(Rc::new(ExceptionValue {
            exc_type,
            class: Some(class),
            args,
        })));
    }
    let instance = Value::Instance(Rc::new(Instance::new(class.clone())));
    match class.lookup("__init__") {
        Some(init) => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(instance.clone());
            full.extend(args);
            let result = call_value(frame, init, full, kwargs).await?;
            if !result.is_none() {
                return Err(ExcType::type_error(format!(
                    "__init__() should return None, not '{}'",
                    result.type_name()
                )));
            }
        }
        None if !args.is_empty() || !kwargs.is_empty() => {
            return Err(ExcType::type_error(format!("{}() takes no arguments", class.name)));
        }
        None => {}
    }
    Ok(instance)
}

/// `repr(value)`, honouring `__repr__` on user classes.
pub(crate) fn repr_value(frame: &Frame, value: Value) -> EvalFuture<'_, String> {
    Box::pin(async move {
        match &value {
            Value::Instance(instance) => {
                if let Some(method) = instance.class.lookup("__repr__") {
                    return match call_value(frame, method, vec![value.clone()], Vec::new()).await? {
                        Value::Str(s) => Ok(s.to_string()),
                        other => Err(ExcType::type_error(format!(
                            "__repr__ returned non-string (type {})",
                            other.type_name()
                        ))),
                    };
                }
                Ok(value.py_repr())
            }
            Value::List(items) if has_instances(&items.borrow()) => {
                let items = items.borrow().clone();
                Ok(format!("[{}]", join_reprs(frame, items).await?))
            }
            Value::Tuple(items) if has_instances(items) => {
                let single = items.len() == 1;
                let inner = join_reprs(frame, items.to_vec()).await?;
                Ok(if single { format!("({inner},)") } else { format!("({inner})") })
            }
            Value::Dict(dict) if has_instances(&dict.borrow().values().cloned().collect::<Vec<_>>()) => {
                let pairs: Vec<(Value, Value)> = dict.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let _guard = frame.runtime.enter()?;
                let mut parts = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    parts.push(format!("{}: {}", key.py_repr(), repr_value(frame, value).await?));
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            _ => Ok(value.py_repr()),
        }
    })
}

fn has_instances(items: &[Value]) -> bool {
    items.iter().any(|item| matches!(item, Value::Instance(_)))
}

async fn join_reprs(frame: &Frame, items: Vec<Value>) -> RunResult<String> {
    let _guard = frame.runtime.enter()?;
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(repr_value(frame, item).await?);
    }
    Ok(parts.join(", "))
}

/// `str(value)`: `__str__`, then `__repr__`, on user classes.
pub(crate) fn str_value(frame: &Frame, value: Value) -> EvalFuture<'_, String> {
    Box::pin(async move {
        match &value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Instance(instance) => match instance.class.lookup("__str__") {
                Some(method) => match call_value(frame, method, vec![value.clone()], Vec::new()).await? {
                    Value::Str(s) => Ok(s.to_string()),
                    other => Err(ExcType::type_error(format!(
                        "__str__ returned non-string (type {})",
                        other.type_name()
                    ))),
                },
                None => repr_value(frame, value).await,
            },
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => repr_value(frame, value).await,
            _ => Ok(value.py_str()),
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::ResourceLimits,
        generator::block_on,
        io::CollectStringPrint,
        parse::parse,
        tracer::NoopTracer,
    };

    /// Runs `code` at module level and returns the namespace plus printed output.
    fn run(code: &str) -> (Rc<RefCell<Dict>>, String) {
        let (namespace, output, result) = try_run(code);
        if let Err(err) = result {
            panic!("unexpected error: {}", err.into_exception());
        }
        (namespace, output)
    }

    fn try_run(code: &str) -> (Rc<RefCell<Dict>>, String, RunResult<Flow>) {
        let print = Rc::new(RefCell::new(CollectStringPrint::new()));
        let runtime = Runtime::new(
            print.clone(),
            Rc::new(RefCell::new(NoopTracer)),
            ResourceLimits::new().max_recursion_depth(50),
        );
        let namespace = Rc::new(RefCell::new(Dict::new()));
        let body = parse(code, "<test>").unwrap();
        let frame = Frame::module(runtime, namespace.clone(), namespace.clone());
        let result = block_on(exec_block(&frame, &body));
        let output = print.borrow().output().to_owned();
        (namespace, output, result)
    }

    fn get(namespace: &Rc<RefCell<Dict>>, name: &str) -> String {
        namespace.borrow().get_str(name).unwrap().py_repr()
    }

    #[test]
    fn closures_see_later_rebinding() {
        let (ns, _) = run("def outer():\n    x = 1\n    def inner():\n        return x\n    x = 2\n    return inner()\nr = outer()");
        assert_eq!(get(&ns, "r"), "2");
    }

    #[test]
    fn nonlocal_rebinds_enclosing() {
        let (ns, _) = run(
            "def counter():\n    n = 0\n    def bump():\n        nonlocal n\n        n += 1\n        return n\n    bump()\n    return bump()\nr = counter()",
        );
        assert_eq!(get(&ns, "r"), "2");
    }

    #[test]
    fn generators_receive_sent_values() {
        let (ns, _) = run(
            "def gen():\n    got = yield 1\n    yield got * 2\ng = gen()\na = next(g)\nb = g.send(21)",
        );
        assert_eq!(get(&ns, "a"), "1");
        assert_eq!(get(&ns, "b"), "42");
    }

    #[test]
    fn yield_from_returns_inner_result() {
        let (ns, _) = run(
            "def inner():\n    yield 1\n    return 'done'\ndef outer():\n    r = yield from inner()\n    yield r\nr = list(outer())",
        );
        assert_eq!(get(&ns, "r"), "[1, 'done']");
    }

    #[test]
    fn try_except_else_finally_order() {
        let (_, out) = run(
            "try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    print('caught', e)\nelse:\n    print('else')\nfinally:\n    print('finally')\ntry:\n    pass\nexcept Exception:\n    print('no')\nelse:\n    print('else')",
        );
        assert_eq!(out, "caught division by zero\nfinally\nelse\n");
    }

    #[test]
    fn handler_name_is_unbound_after_handler() {
        let (ns, _) = run("try:\n    raise ValueError('x')\nexcept ValueError as err:\n    pass");
        assert!(!ns.borrow().contains_str("err"));
    }

    #[test]
    fn bare_raise_reraises_active_exception() {
        let (_, _, result) = try_run("try:\n    raise KeyError('k')\nexcept KeyError:\n    raise");
        assert_eq!(result.unwrap_err().exc_type(), ExcType::KeyError);
    }

    #[test]
    fn user_exception_classes_are_caught_by_base() {
        let (_, out) = run(
            "class MyError(ValueError):\n    pass\ntry:\n    raise MyError('bad')\nexcept ValueError as e:\n    print(type(e).__name__, e)",
        );
        assert_eq!(out, "MyError bad\n");
    }

    #[test]
    fn star_unpacking() {
        let (ns, _) = run("a, *b, c = [1, 2, 3, 4]\nx, y = 'hi'");
        assert_eq!(get(&ns, "a"), "1");
        assert_eq!(get(&ns, "b"), "[2, 3]");
        assert_eq!(get(&ns, "c"), "4");
        assert_eq!(get(&ns, "y"), "'i'");
    }

    #[test]
    fn unpacking_errors_match_cpython() {
        let (_, _, result) = try_run("a, b = [1, 2, 3]");
        assert_eq!(
            result.unwrap_err().into_exception().summary(),
            "ValueError: too many values to unpack (expected 2)"
        );
        let (_, _, result) = try_run("a, b = 5");
        assert_eq!(
            result.unwrap_err().into_exception().summary(),
            "TypeError: cannot unpack non-iterable int object"
        );
    }

    #[test]
    fn comprehension_variables_do_not_leak() {
        let (ns, _) = run("squares = [i * i for i in range(4) if i != 2]\nd = {k: v for k, v in [('a', 1)]}");
        assert_eq!(get(&ns, "squares"), "[0, 1, 9]");
        assert_eq!(get(&ns, "d"), "{'a': 1}");
        assert!(!ns.borrow().contains_str("i"));
    }

    #[test]
    fn classes_with_init_and_repr() {
        let (_, out) = run(
            "class Point:\n    def __init__(self, x, y):\n        self.x = x\n        self.y = y\n    def __repr__(self):\n        return f'Point({self.x}, {self.y})'\nprint([Point(1, 2)])",
        );
        assert_eq!(out, "[Point(1, 2)]\n");
    }

    #[test]
    fn fstring_conversions_and_specs() {
        let (ns, _) = run("x = 3.14159\nname = 'ab'\ns = f'{x:.2f}|{name!r}|{x=:.1f}|{name=}|{5:>3}'");
        assert_eq!(get(&ns, "s"), "\"3.14|'ab'|x=3.1|name='ab'|  5\"");
    }

    #[test]
    fn await_runs_coroutine_body() {
        let (ns, _) = run("async def f(x):\n    return x * 2\nasync def g():\n    return await f(21)\nc = g()");
        let Value::Coroutine(coroutine) = ns.borrow().get_str("c").cloned().unwrap() else {
            panic!("expected a coroutine");
        };
        let result = block_on(coroutine.take_body().unwrap()).unwrap();
        assert_eq!(result.py_repr(), "42");
    }

    #[test]
    fn awaiting_a_non_awaitable_fails() {
        let (ns, _) = run("async def f():\n    return await 5\nc = f()");
        let Value::Coroutine(coroutine) = ns.borrow().get_str("c").cloned().unwrap() else {
            panic!("expected a coroutine");
        };
        let err = block_on(coroutine.take_body().unwrap()).unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "TypeError: object int can't be used in 'await' expression"
        );
    }

    #[test]
    fn decorators_apply_bottom_up() {
        let (ns, _) = run(
            "def add(n):\n    def deco(f):\n        return lambda: f() + n\n    return deco\n@add(1)\n@add(10)\ndef base():\n    return 100\nr = base()",
        );
        assert_eq!(get(&ns, "r"), "111");
    }

    #[test]
    fn runaway_recursion_is_a_recursion_error() {
        let (_, _, result) = try_run("def f():\n    return f()\nf()");
        assert_eq!(result.unwrap_err().exc_type(), ExcType::RecursionError);
    }

    #[test]
    fn tracebacks_record_each_function() {
        let (_, _, result) = try_run("def inner():\n    return {}['k']\ndef outer():\n    return inner()\nouter()");
        let exc = result.unwrap_err().into_exception();
        let functions: Vec<&str> = exc.traceback().iter().map(|f| f.function.as_str()).collect();
        assert_eq!(functions, ["<module>", "outer", "inner"]);
        assert_eq!(exc.summary(), "KeyError: 'k'");
    }

    #[test]
    fn import_reports_missing_module() {
        let (_, _, result) = try_run("import os");
        assert_eq!(
            result.unwrap_err().into_exception().summary(),
            "ModuleNotFoundError: No module named 'os'"
        );
    }

    #[test]
    fn ascii_escapes_non_ascii() {
        assert_eq!(ascii_escape("'é☃'"), "'\\xe9\\u2603'");
    }
}
