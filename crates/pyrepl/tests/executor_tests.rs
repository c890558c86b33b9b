//! Integration tests for `AsyncCodeExecutor`.
//!
//! Covers the code transformer's observable behaviour (what a submission
//! yields), scope retention across submissions, host arguments, sending values
//! back into a suspended unit, and how errors surface.

use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;
use pyrepl::{
    AsyncCodeExecutor, AsyncSender, ExcType, Namespace, NoPrint, RecordingTracer, ReplError, ResourceLimits, Scope,
    TraceEvent, Value,
};

fn executor(code: &str, scope: Option<Scope>, args: Option<&Namespace>) -> AsyncCodeExecutor {
    AsyncCodeExecutor::new(code, scope, args)
        .unwrap_or_else(|err| panic!("failed to wrap {code:?}:\n{err}"))
        .with_print(Rc::new(RefCell::new(NoPrint)))
}

/// Drives `code` to completion and returns every result it produced.
fn results(code: &str, scope: Option<Scope>, args: Option<&Namespace>) -> Vec<Value> {
    executor(code, scope, args)
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap_or_else(|err| panic!("{code:?} raised:\n{err}"))
}

/// Drives `code` until it fails and returns the error.
fn error(code: &str, scope: Option<Scope>) -> ReplError {
    match executor(code, scope, None).into_iter().find_map(Result::err) {
        Some(err) => err,
        None => panic!("{code:?} did not raise"),
    }
}

fn namespace(pairs: &[(&str, Value)]) -> Namespace {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

// =============================================================================
// 1. What a submission yields
// =============================================================================

#[test]
fn trailing_expression_is_the_result() {
    assert_eq!(results("3 + 4", None, None), [Value::Int(7)]);
}

#[test]
fn return_value_becomes_a_result() {
    assert_eq!(results("return 3 + 9", None, None), [Value::Int(12)]);
}

#[test]
fn explicit_yields_are_results() {
    assert_eq!(results("yield 30; yield 40", None, None), [Value::Int(30), Value::Int(40)]);
    assert_eq!(results("yield 60; 70", None, None), [Value::Int(60), Value::Int(70)]);
}

#[test]
fn only_the_last_expression_is_yielded() {
    assert_eq!(results("90; 100", None, None), [Value::Int(100)]);
}

#[test]
fn statements_only_produce_a_single_none() {
    for code in ["", "# this is a comment", "b = 12 + 82"] {
        assert_eq!(results(code, None, None), [Value::None], "code: {code:?}");
    }
}

#[test]
fn return_stops_the_unit() {
    let code = "for i in range(5):\n    if i == 2:\n        return i\n    yield i";
    assert_eq!(results(code, None, None), [Value::Int(0), Value::Int(1), Value::Int(2)]);
}

#[test]
fn nested_functions_keep_their_own_return() {
    let code = "def f():\n    return 5\nf() + 1";
    assert_eq!(results(code, None, None), [Value::Int(6)]);
}

#[test]
fn nested_generators_are_not_results() {
    let code = "def gen():\n    yield 1\n    yield 2\nlist(gen())";
    assert_eq!(results(code, None, None), [Value::list(vec![Value::Int(1), Value::Int(2)])]);
}

// =============================================================================
// 2. Scope retention
// =============================================================================

fn fixture_scope() -> Scope {
    Scope::from_namespaces(
        &namespace(&[("placement", Value::Int(81))]),
        &namespace(&[("placement_local", Value::Int(18))]),
    )
}

#[test]
fn assignments_persist_into_the_scope() {
    let scope = fixture_scope();
    assert_eq!(results("b = 12 + 82", Some(scope.clone()), None), [Value::None]);
    assert_eq!(scope.get_global("b"), Some(Value::Int(94)));
    assert_eq!(results("b", Some(scope.clone()), None), [Value::Int(94)]);
    assert_eq!(results("c = placement + 7; c", Some(scope.clone()), None), [Value::Int(88)]);
}

#[test]
fn arguments_are_visible_then_cleared() {
    let scope = fixture_scope();
    let args = namespace(&[("_cool_data", Value::Int(45)), ("_not_so_cool", Value::Int(400))]);
    assert_eq!(
        results("_cool_data + _not_so_cool", Some(scope.clone()), Some(&args)),
        [Value::Int(445)]
    );
    assert!(scope.contains_global("_cool_data"), "arguments are exported like locals");
    scope.clear_intersection(&args);
    assert!(!scope.contains_global("_cool_data"));
    assert!(!scope.contains_global("_not_so_cool"));

    let err = error("_cool_data", Some(scope));
    let ReplError::Runtime(exc) = err else {
        panic!("expected a runtime error, got {err:?}");
    };
    assert_eq!(exc.exc_type(), ExcType::NameError);
    assert_eq!(exc.summary(), "NameError: name '_cool_data' is not defined");
}

#[test]
fn definitions_are_callable_from_later_submissions() {
    let scope = Scope::new();
    let define = "def ensure_builtins():\n    return ValueError";
    assert_eq!(results(define, Some(scope.clone()), None), [Value::None]);
    assert!(matches!(scope.get_global("ensure_builtins"), Some(Value::Function(_))));
    assert_eq!(
        results("ensure_builtins()", Some(scope), None),
        [Value::ExcType(ExcType::ValueError)]
    );
}

#[test]
fn await_runs_coroutines_defined_earlier() {
    let scope = Scope::new();
    let define = "async def add_numbers(one, two):\n    return one + two";
    assert_eq!(results(define, Some(scope.clone()), None), [Value::None]);
    assert_eq!(
        results("await add_numbers(10, 12)", Some(scope), None),
        [Value::Int(22)]
    );
}

#[test]
fn del_removes_retained_globals() {
    let scope = Scope::new();
    results("a = 1\nkeep = 2", Some(scope.clone()), None);
    assert!(scope.contains_global("a"));
    assert_eq!(results("del a", Some(scope.clone()), None), [Value::None]);
    assert!(!scope.contains_global("a"));
    assert!(scope.contains_global("keep"));
}

#[test]
fn unit_sees_its_scope_through_the_executor_handle() {
    let scope = Scope::new();
    results("_async_executor.scope.globals['marker'] = 5", Some(scope.clone()), None);
    assert_eq!(scope.get_global("marker"), Some(Value::Int(5)));
}

#[test]
fn scope_is_exported_even_when_the_unit_raises() {
    let scope = Scope::new();
    error("before = 1\nraise ValueError('boom')", Some(scope.clone()));
    assert_eq!(scope.get_global("before"), Some(Value::Int(1)));
}

#[test]
fn dropping_an_execution_skips_the_export() {
    let scope = Scope::new();
    let mut execution = executor("yield 1\nz = 2\nyield 3", Some(scope.clone()), None).start();
    assert_eq!(execution.next().map(Result::unwrap), Some(Value::Int(1)));
    drop(execution);
    assert!(!scope.contains_global("z"));
    assert!(!scope.contains_global("_async_executor"));
}

// =============================================================================
// 3. Sending values back
// =============================================================================

#[test]
fn sent_values_become_yield_results() {
    let code = "x = yield 1\nyield x * 2";
    let mut seen = Vec::new();
    for (send, result) in AsyncSender::new(executor(code, None, None).start()) {
        seen.push(result.unwrap());
        send.send(Value::Int(21));
    }
    assert_eq!(seen, [Value::Int(1), Value::Int(42)]);
}

#[test]
fn unsent_steps_resume_with_none() {
    let code = "x = yield 1\nyield x is None";
    assert_eq!(results(code, None, None), [Value::Int(1), Value::Bool(true)]);
}

#[test]
fn execution_send_is_delivered_once() {
    let mut execution = executor("a = yield 1\nb = yield 2\n(a, b)", None, None).start();
    assert_eq!(execution.next().map(Result::unwrap), Some(Value::Int(1)));
    execution.send(Value::from("first"));
    assert_eq!(execution.next().map(Result::unwrap), Some(Value::Int(2)));
    assert_eq!(
        execution.next().map(Result::unwrap),
        Some(Value::tuple(vec![Value::from("first"), Value::None]))
    );
    assert!(execution.next().is_none());
    assert!(execution.is_finished());
}

// =============================================================================
// 4. Errors
// =============================================================================

#[test]
fn syntax_errors_fail_before_running() {
    let err = AsyncCodeExecutor::new("def (", None, None).unwrap_err();
    assert!(matches!(err, ReplError::Parse(_)), "got {err:?}");
    assert_eq!(err.to_exception().exc_type(), ExcType::SyntaxError);
}

#[test]
fn runtime_errors_point_at_the_submitted_line() {
    let err = error("x = 1\n1 / 0", None);
    assert_eq!(
        err.to_string(),
        "Traceback (most recent call last):\n  File \"<repl>\", line 2, in _repl_coroutine\n    1 / 0\nZeroDivisionError: division by zero"
    );
}

#[test]
fn tracebacks_list_nested_calls_outermost_first() {
    let err = error("def f():\n    return {}['missing']\nf()", None);
    let exc = err.to_exception();
    let frames: Vec<(&str, u32, &str)> = exc
        .traceback()
        .iter()
        .map(|frame| (frame.filename.as_str(), frame.line, frame.function.as_str()))
        .collect();
    assert_eq!(frames, [("<repl>", 3, "_repl_coroutine"), ("<repl>", 2, "f")]);
    assert_eq!(exc.summary(), "KeyError: 'missing'");
}

#[test]
fn iteration_ends_after_an_error() {
    let outcomes: Vec<_> = executor("yield 1\nraise KeyError('k')\nyield 2", None, None)
        .into_iter()
        .collect();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].as_ref().ok(), Some(&Value::Int(1)));
    assert!(matches!(&outcomes[1], Err(ReplError::Runtime(exc)) if exc.exc_type() == ExcType::KeyError));
}

#[test]
fn huge_ranges_answer_without_iterating() {
    let code = "big = range(10**18)\nyield 10**17 in big\nyield big == range(10**18)\nyield big[::2] == range(0, 10**18, 2)";
    assert_eq!(
        results(code, None, None),
        [Value::Bool(true), Value::Bool(true), Value::Bool(true)]
    );
}

#[test]
fn integral_floats_find_big_int_dict_keys() {
    let code = "table = {2**70: 'big'}\ntable[float(2**70)]";
    assert_eq!(results(code, None, None), [Value::from("big")]);
}

#[test]
fn unbounded_recursion_raises_recursion_error() {
    let err = error("def f(n):\n    return f(n + 1)\nf(0)", None);
    let ReplError::Runtime(exc) = err else {
        panic!("expected a runtime error, got {err:?}");
    };
    assert_eq!(exc.summary(), "RecursionError: maximum recursion depth exceeded");
    assert_eq!(exc.traceback()[0].function, "_repl_coroutine");
    assert!(exc.traceback().iter().skip(1).all(|frame| frame.function == "f"));
}

#[test]
fn recursion_limit_is_configurable() {
    let code = "def depth(n):\n    return 0 if n == 0 else 1 + depth(n - 1)\ndepth(DEPTH)";
    let run = |depth: u32| {
        AsyncCodeExecutor::new(&code.replace("DEPTH", &depth.to_string()), None, None)
            .unwrap()
            .with_print(Rc::new(RefCell::new(NoPrint)))
            .with_limits(ResourceLimits::new().max_recursion_depth(10))
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
    };
    assert_eq!(run(5).unwrap(), [Value::Int(5)]);
    let err = run(20).unwrap_err();
    assert_eq!(err.to_exception().exc_type(), ExcType::RecursionError);
}

#[test]
fn invalid_argument_names_are_rejected() {
    let args = namespace(&[("not valid", Value::None)]);
    assert!(matches!(
        AsyncCodeExecutor::new("1", None, Some(&args)),
        Err(ReplError::Parse(_))
    ));
}

// =============================================================================
// 5. Tracing
// =============================================================================

#[test]
fn tracer_sees_the_unit_suspend_and_resume() {
    let tracer = Rc::new(RefCell::new(RecordingTracer::new()));
    let values: Vec<Value> = executor("yield 1\n2", None, None)
        .with_tracer(tracer.clone())
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(values, [Value::Int(1), Value::Int(2)]);
    let events = tracer.borrow().events().to_vec();
    let yields = events
        .iter()
        .filter(|event| matches!(event, TraceEvent::Yield { function } if function == "_repl_coroutine"))
        .count();
    assert_eq!(yields, 2);
    assert!(events.iter().any(|event| matches!(
        event,
        TraceEvent::Statement { line: 2, function } if function == "_repl_coroutine"
    )));
}
