//! Drives a wrapped unit against a [`Scope`], one result at a time.

use std::{cell::RefCell, fmt, mem, rc::Rc};

use crate::{
    config::ResourceLimits,
    eval::{call_function, exec_block},
    exception::{ExcType, RunError, RunResult, SourceMap},
    frame::Frame,
    generator::{Coroutine, GenStep, Generator, block_on},
    io::{PrintWriter, StdPrint},
    repl_error::ReplError,
    runtime::Runtime,
    scope::{Namespace, Scope, WeakScope},
    sender::Resume,
    tracer::{ExecTracer, NoopTracer},
    transform::{EXECUTOR_ARG, REPL_COROUTINE, REPL_FILENAME, TransformedUnit, wrap_code},
    value::Value,
};

/// The `_async_executor` argument every unit receives.
///
/// Its `scope` attribute is the live scope the unit runs against; the unit's
/// `finally` clause exports its locals through it.
#[derive(Clone)]
pub struct ExecutorHandle(Rc<HandleInner>);

struct HandleInner {
    scope: WeakScope,
    code: Rc<str>,
}

impl ExecutorHandle {
    fn new(scope: &Scope, code: Rc<str>) -> Self {
        Self(Rc::new(HandleInner {
            scope: scope.downgrade(),
            code,
        }))
    }

    /// The scope being executed against, while it is still alive.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        self.0.scope.upgrade()
    }

    /// The submitted source text.
    #[must_use]
    pub fn code(&self) -> &Rc<str> {
        &self.0.code
    }

    pub(crate) fn identity(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }
}

impl fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle").field("code", &self.0.code).finish_non_exhaustive()
    }
}

/// Executes or evaluates Python code inside an async generator unit.
///
/// ```
/// use pyrepl::{AsyncCodeExecutor, Value};
///
/// let results: Vec<Value> = AsyncCodeExecutor::new("yield 1; yield 2; yield 3", None, None)
///     .unwrap()
///     .into_iter()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(results, [Value::Int(1), Value::Int(2), Value::Int(3)]);
/// ```
pub struct AsyncCodeExecutor {
    unit: TransformedUnit,
    scope: Scope,
    source: Rc<str>,
    /// Actual arguments, starting with the executor handle.
    args: Vec<Value>,
    print: Rc<RefCell<dyn PrintWriter>>,
    tracer: Rc<RefCell<dyn ExecTracer>>,
    limits: ResourceLimits,
}

impl AsyncCodeExecutor {
    /// Wraps `source`, binding each entry of `arg_dict` as a named argument.
    ///
    /// Uses a fresh [`Scope`] when none is given.
    pub fn new(source: &str, scope: Option<Scope>, arg_dict: Option<&Namespace>) -> Result<Self, ReplError> {
        let scope = scope.unwrap_or_default();
        let source: Rc<str> = source.into();
        let mut arg_names = vec![EXECUTOR_ARG];
        let mut args = vec![Value::Executor(ExecutorHandle::new(&scope, source.clone()))];
        for (name, value) in arg_dict.into_iter().flatten() {
            arg_names.push(name.as_str());
            args.push(value.clone());
        }
        let unit = wrap_code(&source, &arg_names)?;
        Ok(Self {
            unit,
            scope,
            source,
            args,
            print: Rc::new(RefCell::new(StdPrint::new())),
            tracer: Rc::new(RefCell::new(NoopTracer)),
            limits: ResourceLimits::default(),
        })
    }

    /// Sends `print()` output to `print` instead of stdout.
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
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn unit(&self) -> &TransformedUnit {
        &self.unit
    }

    /// Starts iterating. Nothing runs until the first result is requested.
    #[must_use]
    pub fn start(self) -> Execution {
        let runtime = Runtime::new(self.print, self.tracer, self.limits);
        Execution {
            state: State::Ready {
                unit: self.unit,
                args: self.args,
            },
            runtime,
            scope: self.scope,
            source: self.source,
            pending: None,
        }
    }
}

impl fmt::Debug for AsyncCodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCodeExecutor")
            .field("source", &self.source)
            .field("arg_names", &self.unit.arg_names().collect::<Vec<_>>())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl IntoIterator for AsyncCodeExecutor {
    type Item = Result<Value, ReplError>;
    type IntoIter = Execution;

    fn into_iter(self) -> Execution {
        self.start()
    }
}

/// One run of a unit: yields its results, accepting a value back between them.
///
/// After an error, or once the unit finishes, the iteration is over.
pub struct Execution {
    state: State,
    runtime: Rc<Runtime>,
    scope: Scope,
    source: Rc<str>,
    pending: Option<Value>,
}

enum State {
    Ready {
        unit: TransformedUnit,
        args: Vec<Value>,
    },
    Generator(Rc<Generator>),
    /// A unit without `yield`: awaited once for its single result.
    Coroutine(Rc<Coroutine>),
    Done,
}

impl Execution {
    /// Records the value the suspended `yield` evaluates to on the next resume.
    pub fn send(&mut self, value: Value) {
        self.pending = Some(value);
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done)
    }

    fn step(&mut self, mut sent: Value) -> RunResult<Option<Value>> {
        self.runtime.mark_stack_base();
        loop {
            match mem::replace(&mut self.state, State::Done) {
                State::Ready { unit, args } => {
                    self.state = self.launch(&unit, args)?;
                    // a fresh generator only accepts None
                    sent = Value::None;
                }
                State::Generator(generator) => {
                    return match generator.resume(sent)? {
                        GenStep::Yielded(value) => {
                            self.state = State::Generator(generator);
                            Ok(Some(value))
                        }
                        GenStep::Complete(_) => Ok(None),
                    };
                }
                State::Coroutine(coroutine) => return block_on(coroutine.take_body()?).map(Some),
                State::Done => return Ok(None),
            }
        }
    }

    /// Runs the `async def` against the scope and calls the resulting function.
    fn launch(&self, unit: &TransformedUnit, args: Vec<Value>) -> RunResult<State> {
        let runtime = self.runtime.clone();
        let frame = Frame::module(
            runtime.clone(),
            self.scope.globals().clone(),
            self.scope.locals().clone(),
        );
        block_on(exec_block(&frame, unit.module()))?;
        let function = self
            .scope
            .get_local(REPL_COROUTINE)
            .or_else(|| self.scope.get_global(REPL_COROUTINE));
        let Some(Value::Function(function)) = function else {
            return Err(ExcType::name_error(REPL_COROUTINE));
        };
        match block_on(call_function(runtime, function, args, Vec::new()))? {
            Value::Generator(generator) => Ok(State::Generator(generator)),
            Value::Coroutine(coroutine) => Ok(State::Coroutine(coroutine)),
            other => Err(ExcType::type_error(format!(
                "{REPL_COROUTINE} returned {}, not a coroutine",
                other.type_name()
            ))),
        }
    }

    /// Attaches the submitted lines to the traceback.
    fn fail(&self, err: RunError) -> ReplError {
        let mut sources = SourceMap::new();
        sources.register(REPL_FILENAME, self.source.clone());
        let mut exception = err.into_exception();
        exception.resolve_sources(&sources);
        ReplError::Runtime(exception)
    }
}

impl Resume for Execution {
    type Sent = Value;
    type Item = Result<Value, ReplError>;

    fn resume(&mut self, sent: Value) -> Option<Self::Item> {
        match self.step(sent) {
            Ok(value) => value.map(Ok),
            Err(err) => {
                self.state = State::Done;
                Some(Err(self.fail(err)))
            }
        }
    }
}

impl Iterator for Execution {
    type Item = Result<Value, ReplError>;

    fn next(&mut self) -> Option<Self::Item> {
        let sent = self.pending.take().unwrap_or_default();
        self.resume(sent)
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Ready { .. } => "ready",
            State::Generator(_) => "running",
            State::Coroutine(_) => "awaiting",
            State::Done => "done",
        };
        f.debug_struct("Execution")
            .field("state", &state)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
