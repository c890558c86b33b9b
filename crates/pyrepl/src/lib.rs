#![doc = include_str!("../../../README.md")]
mod builtins;
mod codeblocks;
mod config;
mod dict;
mod disassembly;
mod eval;
mod exception;
mod executor;
mod expressions;
mod format;
mod frame;
mod function;
mod generator;
mod io;
mod iter;
mod methods;
mod ops;
mod parse;
mod prepare;
mod repl_error;
mod runtime;
mod scope;
mod sender;
mod session;
pub mod tracer;
mod transform;
mod value;

pub use crate::{
    builtins::Builtin,
    codeblocks::{Codeblock, codeblock_converter},
    config::{DEFAULT_MAX_RECURSION_DEPTH, DEFAULT_MAX_STACK_BYTES, FlagError, Flags, ResourceLimits},
    dict::Dict,
    disassembly::disassemble,
    exception::{ExcType, Exception, ExceptionValue, SourceMap, StackFrame},
    executor::{AsyncCodeExecutor, Execution, ExecutorHandle},
    expressions::FunctionDef,
    function::{BoundMethod, BuiltinMethod, Class, Function, Instance, NativeFunction},
    generator::{Coroutine, Generator},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    iter::PyIter,
    parse::{CodeLoc, CodeRange, ParseError},
    repl_error::ReplError,
    scope::{Namespace, Scope},
    sender::{AsyncSender, Resume, SendHandle},
    session::{LAST_RESULT, ReplSession, RetainChange},
    tracer::{ExecTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent},
    transform::{EXECUTOR_ARG, REPL_COROUTINE, REPL_FILENAME, TEMPLATE_FILENAME, TransformedUnit, wrap_code},
    value::{Range, Value, float_repr, str_repr},
};
