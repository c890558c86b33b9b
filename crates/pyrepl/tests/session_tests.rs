//! Integration tests for `ReplSession`: retention, the `_` argument, the
//! result handler and host variables.

use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;
use pyrepl::{
    CollectStringPrint, ExcType, Flags, Namespace, ProfilingTracer, ReplError, ReplSession, RetainChange, Value,
};

fn session(retain: bool) -> ReplSession {
    let mut flags = Flags::new();
    flags.set_retain(retain);
    ReplSession::new(flags)
}

/// Runs `code`, returning every result handed to the handler.
fn run(session: &mut ReplSession, code: &str) -> Vec<Value> {
    run_with(session, code, &Namespace::new())
}

fn run_with(session: &mut ReplSession, code: &str, extra_vars: &Namespace) -> Vec<Value> {
    let mut seen = Vec::new();
    session
        .run(code, extra_vars, |value| {
            seen.push(value.clone());
            Value::None
        })
        .unwrap_or_else(|err| panic!("{code:?} raised:\n{err}"));
    seen
}

#[test]
fn retained_session_keeps_variables() {
    let mut session = session(true);
    assert_eq!(run(&mut session, "counter = 1"), []);
    assert_eq!(run(&mut session, "total = counter + 1\ntotal"), [Value::Int(2)]);
    assert_eq!(session.scope().get_global("total"), Some(Value::Int(2)));
}

#[test]
fn augmented_assignment_to_a_retained_global_is_local() {
    let mut session = session(true);
    run(&mut session, "counter = 1");
    let err = session.run("counter += 1", &Namespace::new(), |_| Value::None).unwrap_err();
    assert_eq!(err.to_exception().exc_type(), ExcType::UnboundLocalError);
    assert_eq!(run(&mut session, "global counter\ncounter += 1\ncounter"), [Value::Int(2)]);
}

#[test]
fn unretained_session_starts_fresh_each_time() {
    let mut session = session(false);
    run(&mut session, "counter = 1");
    let err = session.run("counter", &Namespace::new(), |_| Value::None).unwrap_err();
    let ReplError::Runtime(exc) = err else {
        panic!("expected a runtime error, got {err:?}");
    };
    assert_eq!(exc.exc_type(), ExcType::NameError);
}

#[test]
fn none_results_are_not_handed_to_the_handler() {
    let mut session = session(false);
    assert_eq!(run(&mut session, "yield None\nyield 1\nNone"), [Value::Int(1)]);
    assert_eq!(session.last_result(), &Value::Int(1));
}

#[test]
fn previous_result_is_available_as_underscore() {
    let mut session = session(false);
    assert_eq!(run(&mut session, "20 + 1"), [Value::Int(21)]);
    assert_eq!(run(&mut session, "_ * 2"), [Value::Int(42)]);
    assert_eq!(session.last_result(), &Value::Int(42));
}

#[test]
fn underscore_is_not_left_in_a_retained_scope() {
    let mut session = session(true);
    run(&mut session, "'kept'");
    run(&mut session, "seen = _");
    let scope = session.scope();
    assert_eq!(scope.get_global("seen"), Some(Value::from("kept")));
    assert!(!scope.contains_global("_"));
}

#[test]
fn handler_reply_is_sent_back_into_the_code() {
    let mut session = session(true);
    let mut replies = vec![Value::from("second"), Value::from("first")];
    session
        .run("a = yield 1\nb = yield 2", &Namespace::new(), |_| {
            replies.pop().unwrap_or_default()
        })
        .unwrap();
    let scope = session.scope();
    assert_eq!(scope.get_global("a"), Some(Value::from("first")));
    assert_eq!(scope.get_global("b"), Some(Value::from("second")));
}

#[test]
fn fenced_code_is_unwrapped_before_running() {
    let mut session = session(false);
    assert_eq!(run(&mut session, "```py\nx = 5\nx * 3\n```"), [Value::Int(15)]);
    assert_eq!(run(&mut session, "`7 * 6`"), [Value::Int(42)]);
}

#[test]
fn host_variables_are_prefixed_and_cleared() {
    let mut session = session(true);
    let extra: Namespace = [("author".to_owned(), Value::from("guido"))].into_iter().collect();
    assert_eq!(run_with(&mut session, "_author.upper()", &extra), [Value::from("GUIDO")]);
    assert!(!session.scope().contains_global("_author"));
}

#[test]
fn host_variables_follow_the_scope_prefix_flag() {
    let mut flags = Flags::new();
    flags.set_no_underscore(true);
    let mut session = ReplSession::new(flags);
    let extra: Namespace = [("ctx".to_owned(), Value::Int(3))].into_iter().collect();
    assert_eq!(run_with(&mut session, "ctx + 1", &extra), [Value::Int(4)]);
}

#[test]
fn host_variables_are_cleared_after_an_error() {
    let mut session = session(true);
    let extra: Namespace = [("ctx".to_owned(), Value::Int(3))].into_iter().collect();
    let result = session.run("kept = _ctx\nraise ValueError('no')", &extra, |_| Value::None);
    assert!(matches!(result, Err(ReplError::Runtime(exc)) if exc.exc_type() == ExcType::ValueError));
    let scope = session.scope();
    assert_eq!(scope.get_global("kept"), Some(Value::Int(3)));
    assert!(!scope.contains_global("_ctx"));
}

#[test]
fn rebound_host_variables_survive_the_cleanup() {
    let mut session = session(true);
    let extra: Namespace = [("ctx".to_owned(), Value::Int(3))].into_iter().collect();
    run_with(&mut session, "_ctx = 'mine'", &extra);
    assert_eq!(session.scope().get_global("_ctx"), Some(Value::from("mine")));
}

#[test]
fn parse_errors_do_not_touch_the_scope() {
    let mut session = session(true);
    run(&mut session, "x = 1");
    let err = session.run("x = = 2", &Namespace::new(), |_| Value::None).unwrap_err();
    assert!(matches!(err, ReplError::Parse(_)), "got {err:?}");
    assert_eq!(session.scope().get_global("x"), Some(Value::Int(1)));
}

#[test]
fn print_output_goes_to_the_configured_writer() {
    let output = Rc::new(RefCell::new(CollectStringPrint::new()));
    let mut session = session(false).with_print(output.clone());
    assert_eq!(run(&mut session, "print('hello', 42)"), []);
    assert_eq!(output.borrow().output(), "hello 42\n");
}

#[test]
fn profiler_counts_calls_across_submissions() {
    let profiler = Rc::new(RefCell::new(ProfilingTracer::new()));
    let mut session = session(true).with_tracer(profiler.clone());
    run(&mut session, "def f(n):\n    return 0 if n == 0 else f(n - 1)");
    assert_eq!(run(&mut session, "yield f(3)"), [Value::Int(0)]);
    let first = profiler.borrow().report();
    assert_eq!(first.yields, 1);
    assert!(first.calls >= 4, "{first}");
    assert!(first.max_depth >= 4, "{first}");
    run(&mut session, "f(0)");
    let second = profiler.borrow().report();
    assert!(second.calls > first.calls, "{second}");
    assert!(second.statements > first.statements, "{second}");
}

#[test]
fn retention_toggle_reports_each_transition() {
    let mut session = session(false);
    assert_eq!(session.set_retain(false), RetainChange::AlreadyOff);
    assert_eq!(session.set_retain(true), RetainChange::Enabled);
    assert_eq!(session.set_retain(true), RetainChange::AlreadyOn);
    assert_eq!(session.set_retain(false), RetainChange::Disabled);
    assert_eq!(
        RetainChange::Enabled.to_string(),
        "Variable retention is ON. Future REPL sessions will retain their scope."
    );
}

#[test]
fn retention_follows_the_environment() {
    let on = Flags::from_lookup([("PYREPL_RETAIN".to_owned(), "yes".to_owned())]);
    assert!(ReplSession::new(on).retain());
    let off = Flags::from_lookup([("PYREPL_RETAIN".to_owned(), "off".to_owned())]);
    assert!(!ReplSession::new(off).retain());
}

#[test]
fn session_disassembly_knows_host_variables() {
    let session = session(false);
    let extra: Namespace = [("ctx".to_owned(), Value::None)].into_iter().collect();
    let listing = session.disassemble("```py\n_ctx\n```", &extra).unwrap();
    assert!(
        listing
            .iter()
            .any(|row| row.contains("LOAD_FAST") && row.ends_with("_ctx")),
        "{listing:#?}"
    );
    assert!(
        listing.iter().all(|row| !row.contains("LOAD_GLOBAL")),
        "{listing:#?}"
    );
}
