//! A REPL session: the scope retention toggle, `_`, and host variables.
//!
//! Each [`ReplSession::run`] call wraps one submission in a fresh
//! [`AsyncCodeExecutor`]. With retention on, every submission shares one
//! [`Scope`]; with it off, each gets an empty scope that is dropped afterwards.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    codeblocks::codeblock_converter,
    config::{Flags, ResourceLimits},
    disassembly::disassemble,
    executor::AsyncCodeExecutor,
    io::{PrintWriter, StdPrint},
    parse::ParseError,
    repl_error::ReplError,
    scope::{Namespace, Scope},
    sender::AsyncSender,
    tracer::{ExecTracer, NoopTracer},
    value::Value,
};

/// Name of the argument holding the previous non-`None` result.
pub const LAST_RESULT: &str = "_";

/// Outcome of [`ReplSession::set_retain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainChange {
    AlreadyOn,
    AlreadyOff,
    /// Retention turned on with a fresh scope.
    Enabled,
    /// Retention turned off; the retained scope is kept but no longer used.
    Disabled,
}

impl fmt::Display for RetainChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyOn => "Variable retention is already set to ON.",
            Self::AlreadyOff => "Variable retention is already set to OFF.",
            Self::Enabled => "Variable retention is ON. Future REPL sessions will retain their scope.",
            Self::Disabled => "Variable retention is OFF. Future REPL sessions will dispose their scope when done.",
        })
    }
}

pub struct ReplSession {
    flags: Flags,
    retain: bool,
    retained: Scope,
    last_result: Value,
    print: Rc<RefCell<dyn PrintWriter>>,
    tracer: Rc<RefCell<dyn ExecTracer>>,
    limits: ResourceLimits,
}

impl ReplSession {
    /// Starts a session with retention taken from `flags`.
    #[must_use]
    pub fn new(flags: Flags) -> Self {
        Self {
            retain: flags.retain(),
            flags,
            retained: Scope::new(),
            last_result: Value::None,
            print: Rc::new(RefCell::new(StdPrint::new())),
            tracer: Rc::new(RefCell::new(NoopTracer)),
            limits: ResourceLimits::default(),
        }
    }

    #[must_use]
    pub fn with_print(mut self, print: Rc<RefCell<dyn PrintWriter>>) -> Self {
        self.print = print;
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Rc<RefCell<dyn ExecTracer>>) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    #[must_use]
    pub fn retain(&self) -> bool {
        self.retain
    }

    /// The scope the next submission runs against.
    #[must_use]
    pub fn scope(&self) -> Scope {
        if self.retain { self.retained.clone() } else { Scope::new() }
    }

    /// Turns retention on or off. Turning it on starts from an empty scope.
    pub fn set_retain(&mut self, retain: bool) -> RetainChange {
        match (self.retain, retain) {
            (true, true) => RetainChange::AlreadyOn,
            (false, false) => RetainChange::AlreadyOff,
            (false, true) => {
                self.retain = true;
                self.retained = Scope::new();
                RetainChange::Enabled
            }
            (true, false) => {
                self.retain = false;
                RetainChange::Disabled
            }
        }
    }

    /// The most recent non-`None` result, `None` before there was one.
    #[must_use]
    pub fn last_result(&self) -> &Value {
        &self.last_result
    }

    /// Host variables under their prefixed names.
    fn host_arguments(&self, extra_vars: &Namespace) -> Namespace {
        let prefix = self.flags.scope_prefix();
        extra_vars
            .iter()
            .map(|(name, value)| (format!("{prefix}{name}"), value.clone()))
            .collect()
    }

    /// Runs one submission, passing each non-`None` result to `handler` and
    /// sending whatever it returns back into the suspended code.
    ///
    /// The argument names are cleared from the scope afterwards, whether or
    /// not the code failed.
    pub fn run(
        &mut self,
        code: &str,
        extra_vars: &Namespace,
        mut handler: impl FnMut(&Value) -> Value,
    ) -> Result<(), ReplError> {
        let block = codeblock_converter(code);
        let mut arguments = self.host_arguments(extra_vars);
        arguments.insert(LAST_RESULT.to_owned(), self.last_result.clone());
        let scope = self.scope();
        let outcome = self.drive(&block.content, &scope, &arguments, &mut handler);
        scope.clear_intersection(&arguments);
        outcome
    }

    fn drive(
        &mut self,
        code: &str,
        scope: &Scope,
        arguments: &Namespace,
        handler: &mut impl FnMut(&Value) -> Value,
    ) -> Result<(), ReplError> {
        let executor = AsyncCodeExecutor::new(code, Some(scope.clone()), Some(arguments))?
            .with_print(self.print.clone())
            .with_tracer(self.tracer.clone())
            .with_limits(self.limits);
        for (send, result) in AsyncSender::new(executor.start()) {
            let result = result?;
            if result.is_none() {
                continue;
            }
            self.last_result = result.clone();
            send.send(handler(&result));
        }
        Ok(())
    }

    /// Lists the instructions of `code` wrapped with the host variables as arguments.
    pub fn disassemble(&self, code: &str, extra_vars: &Namespace) -> Result<Vec<String>, ParseError> {
        let block = codeblock_converter(code);
        let arguments = self.host_arguments(extra_vars);
        let names: Vec<&str> = arguments.keys().map(String::as_str).collect();
        disassemble(&block.content, &names)
    }
}

impl fmt::Debug for ReplSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplSession")
            .field("retain", &self.retain)
            .field("retained", &self.retained)
            .field("last_result", &self.last_result)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::NoPrint;

    fn session(retain: bool) -> ReplSession {
        let mut flags = Flags::new();
        flags.set_retain(retain);
        ReplSession::new(flags).with_print(Rc::new(RefCell::new(NoPrint)))
    }

    #[test]
    fn retain_transitions() {
        let mut session = session(false);
        assert_eq!(session.set_retain(false), RetainChange::AlreadyOff);
        assert_eq!(session.set_retain(true), RetainChange::Enabled);
        assert_eq!(session.set_retain(true), RetainChange::AlreadyOn);
        assert_eq!(session.set_retain(false), RetainChange::Disabled);
    }

    #[test]
    fn enabling_retention_starts_empty() {
        let mut session = session(true);
        session.run("a = 1", &Namespace::new(), |_| Value::None).unwrap();
        assert!(session.scope().contains_global("a"));
        session.set_retain(false);
        session.set_retain(true);
        assert!(!session.scope().contains_global("a"));
    }

    #[test]
    fn host_variables_are_prefixed() {
        let mut session = session(true);
        let mut vars = Namespace::new();
        vars.insert("ctx".to_owned(), Value::Int(5));
        let mut seen = Vec::new();
        session
            .run("_ctx * 2", &vars, |value| {
                seen.push(value.clone());
                Value::None
            })
            .unwrap();
        assert_eq!(seen, [Value::Int(10)]);
        assert!(!session.scope().contains_global("_ctx"));
    }
}
