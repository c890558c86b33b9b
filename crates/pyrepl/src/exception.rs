use std::{
    borrow::Cow,
    fmt::{self, Display},
    rc::Rc,
};

use ahash::AHashMap;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{function::Class, parse::CodeRange, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Python exception types known to the interpreter.
///
/// The string representation matches the variant name exactly, so builtin
/// name lookup can use `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    BaseException,
    Exception,
    KeyboardInterrupt,
    GeneratorExit,
    SystemExit,

    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    LookupError,
    IndexError,
    KeyError,

    RuntimeError,
    NotImplementedError,
    RecursionError,

    NameError,
    UnboundLocalError,

    ImportError,
    ModuleNotFoundError,

    AssertionError,
    AttributeError,
    StopIteration,
    StopAsyncIteration,
    SyntaxError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// The direct base class, `None` for `BaseException`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::Exception | Self::KeyboardInterrupt | Self::GeneratorExit | Self::SystemExit => {
                Some(Self::BaseException)
            }
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::ModuleNotFoundError => Some(Self::ImportError),
            _ => Some(Self::Exception),
        }
    }

    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc_type) = current {
            if exc_type == handler_type {
                return true;
            }
            current = exc_type.parent();
        }
        false
    }

    #[must_use]
    pub(crate) fn error(self, msg: impl Into<String>) -> RunError {
        RunError::new(ExceptionValue::new(self, vec![Value::Str(msg.into().into())]))
    }

    /// An exception of this type with no arguments.
    #[must_use]
    pub(crate) fn bare(self) -> RunError {
        RunError::new(ExceptionValue::new(self, Vec::new()))
    }

    #[must_use]
    pub(crate) fn type_error(msg: impl Display) -> RunError {
        Self::TypeError.error(msg.to_string())
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.error(format!("name '{name}' is not defined"))
    }

    #[must_use]
    pub(crate) fn unbound_local(name: &str) -> RunError {
        Self::UnboundLocalError.error(format!(
            "cannot access local variable '{name}' where it is not associated with a value"
        ))
    }

    #[must_use]
    pub(crate) fn free_variable(name: &str) -> RunError {
        Self::NameError.error(format!(
            "cannot access free variable '{name}' where it is not associated with a value in enclosing scope"
        ))
    }

    #[must_use]
    pub(crate) fn attribute_error(type_name: impl Display, attr: &str) -> RunError {
        Self::AttributeError.error(format!("'{type_name}' object has no attribute '{attr}'"))
    }

    #[must_use]
    pub(crate) fn key_error(key: &Value) -> RunError {
        RunError::new(ExceptionValue::new(Self::KeyError, vec![key.clone()]))
    }

    #[must_use]
    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub(crate) fn not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    #[must_use]
    pub(crate) fn unhashable(type_name: &str) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    /// CPython: "len() takes exactly one argument (2 given)"
    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 1 {
            Self::type_error(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::type_error(format!("{name} expected {expected} arguments, got {actual}"))
        }
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::type_error(format!("{name}() takes no keyword arguments"))
    }
}

/// A Python exception object: its type, optional user subclass, and constructor args.
#[derive(Debug)]
pub struct ExceptionValue {
    pub exc_type: ExcType,
    /// Set when raised from a user class deriving from a builtin exception.
    pub class: Option<Rc<Class>>,
    pub args: Vec<Value>,
}

impl ExceptionValue {
    #[must_use]
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Rc<Self> {
        Rc::new(Self {
            exc_type,
            class: None,
            args,
        })
    }

    #[must_use]
    pub fn type_name(&self) -> Cow<'_, str> {
        match &self.class {
            Some(class) => Cow::Borrowed(&class.name),
            None => Cow::Borrowed(self.exc_type.into()),
        }
    }

    /// The text `str(exc)` produces, `None` when there are no args.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self.args.as_slice() {
            [] => None,
            [arg] if self.exc_type == ExcType::KeyError => Some(arg.py_repr()),
            [arg] => Some(arg.py_str()),
            args => Some(Value::tuple(args.to_vec()).py_repr()),
        }
    }

    #[must_use]
    pub fn py_repr(&self) -> String {
        let args = match self.args.as_slice() {
            [arg] => arg.py_repr(),
            args => {
                let tuple = Value::tuple(args.to_vec()).py_repr();
                tuple
                    .strip_prefix('(')
                    .and_then(|s| s.strip_suffix(')'))
                    .map_or(tuple.clone(), |s| s.trim_end_matches(',').to_owned())
            }
        };
        format!("{}({args})", self.type_name())
    }

    /// Whether `except handler:` catches this exception.
    #[must_use]
    pub fn matches_class(&self, handler: &Rc<Class>) -> bool {
        self.class.as_ref().is_some_and(|class| class.is_subclass_of(handler))
    }
}

/// A raised exception travelling up the evaluator.
#[derive(Debug)]
pub(crate) struct RunError(Box<ExceptionRaise>);

#[derive(Debug)]
pub(crate) struct ExceptionRaise {
    pub value: Rc<ExceptionValue>,
    /// Frames collected so far, outermost first.
    pub frames: Vec<StackFrame>,
    /// Whether the innermost statement of the current function already recorded its frame.
    located: bool,
}

impl RunError {
    #[must_use]
    pub fn new(value: Rc<ExceptionValue>) -> Self {
        Self(Box::new(ExceptionRaise {
            value,
            frames: Vec::new(),
            located: false,
        }))
    }

    #[must_use]
    pub fn value(&self) -> &Rc<ExceptionValue> {
        &self.0.value
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.0.value.exc_type
    }

    /// Records the statement that raised in the current function, once.
    #[must_use]
    pub fn located_at(mut self, position: &CodeRange, function: &str) -> Self {
        if !self.0.located {
            self.0.frames.insert(0, StackFrame::from_position(position, function));
            self.0.located = true;
        }
        self
    }

    /// Whether any statement has recorded a frame for this error yet.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.0.frames.is_empty() && !self.0.located
    }

    /// Marks the error as leaving a function, so the caller records its own frame.
    #[must_use]
    pub fn leave_frame(mut self) -> Self {
        self.0.located = false;
        self
    }

    #[must_use]
    pub fn into_exception(self) -> Exception {
        let ExceptionRaise { value, frames, .. } = *self.0;
        Exception {
            exc_type: value.exc_type,
            type_name: value.type_name().into_owned(),
            message: value.message(),
            traceback: frames,
        }
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        let args = exc.message.map(|m| vec![Value::Str(m.into())]).unwrap_or_default();
        Self::new(ExceptionValue::new(exc.exc_type, args))
    }
}

/// One entry of a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub filename: String,
    pub line: u32,
    pub column: u32,
    pub end_column: Option<u32>,
    /// Name of the function executing, `<module>` at top level.
    pub function: String,
    pub preview_line: Option<String>,
    /// Draw a caret under `column` (syntax errors).
    pub caret: bool,
}

impl StackFrame {
    #[must_use]
    pub fn from_position(position: &CodeRange, function: &str) -> Self {
        let start = position.start();
        let end = position.end();
        Self {
            filename: position.filename.to_string(),
            line: start.line,
            column: start.column,
            end_column: (start.line == end.line).then_some(end.column),
            function: function.to_owned(),
            preview_line: None,
            caret: false,
        }
    }
}

/// A user-visible exception with its traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    exc_type: ExcType,
    type_name: String,
    message: Option<String>,
    traceback: Vec<StackFrame>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self::with_traceback(exc_type, message, Vec::new())
    }

    #[must_use]
    pub fn with_traceback(exc_type: ExcType, message: Option<String>, traceback: Vec<StackFrame>) -> Self {
        Self {
            exc_type,
            type_name: exc_type.to_string(),
            message,
            traceback,
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// The class name, which differs from `exc_type` for user subclasses.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    /// `Type: message`, the last line of a printed traceback.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.message.as_deref() {
            Some(msg) if !msg.is_empty() => format!("{}: {msg}", self.type_name),
            _ => self.type_name.clone(),
        }
    }

    /// Fills in missing preview lines from registered sources.
    pub fn resolve_sources(&mut self, sources: &SourceMap) {
        for frame in &mut self.traceback {
            if frame.preview_line.is_none() {
                frame.preview_line = sources.line(&frame.filename, frame.line).map(str::to_owned);
            }
        }
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let syntax_frame = self.exc_type == ExcType::SyntaxError && self.traceback.iter().any(|frame| frame.caret);
        if !self.traceback.is_empty() && !syntax_frame {
            writeln!(f, "Traceback (most recent call last):")?;
        }
        for frame in &self.traceback {
            if frame.caret {
                writeln!(f, "  File \"{}\", line {}", frame.filename, frame.line)?;
            } else {
                writeln!(
                    f,
                    "  File \"{}\", line {}, in {}",
                    frame.filename, frame.line, frame.function
                )?;
            }
            if let Some(line) = &frame.preview_line {
                let trimmed = line.trim_start();
                writeln!(f, "    {}", trimmed.trim_end())?;
                if frame.caret {
                    let indent = line.chars().count() - trimmed.chars().count();
                    let offset = usize::try_from(frame.column).unwrap_or(1).saturating_sub(1);
                    let mut caret_line = String::from("    ");
                    caret_line.extend(std::iter::repeat_n(' ', offset.saturating_sub(indent)));
                    caret_line.push('^');
                    writeln!(f, "{caret_line}")?;
                }
            }
        }
        f.write_str(&self.summary())
    }
}

impl std::error::Error for Exception {}

/// Source text registered under synthetic filenames, for traceback preview lines.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: AHashMap<String, Rc<str>>,
}

impl SourceMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, filename: &str, source: Rc<str>) {
        self.files.insert(filename.to_owned(), source);
    }

    /// The 1-based `line` of `filename`, if registered.
    #[must_use]
    pub fn line(&self, filename: &str, line: u32) -> Option<&str> {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        self.files.get(filename)?.lines().nth(index)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parse::CodeLoc;

    #[test]
    fn hierarchy_walks_parents() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::UnboundLocalError.is_subclass_of(ExcType::NameError));
        assert!(!ExcType::KeyboardInterrupt.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::ValueError.is_subclass_of(ExcType::TypeError));
    }

    #[test]
    fn traceback_display_uses_registered_source() {
        let position = CodeRange::new("<repl>".into(), CodeLoc::new(1, 0), CodeLoc::new(1, 5));
        let raised = ExcType::ZeroDivisionError
            .error("division by zero")
            .located_at(&position, "_repl_coroutine");
        let mut exc = raised.into_exception();
        let mut sources = SourceMap::new();
        sources.register("<repl>", "x = 1\n1 / 0\n".into());
        exc.resolve_sources(&sources);
        assert_eq!(
            exc.to_string(),
            "Traceback (most recent call last):\n  File \"<repl>\", line 2, in _repl_coroutine\n    1 / 0\nZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn key_error_message_is_repr_of_key() {
        let exc = ExcType::key_error(&Value::Str("missing".into())).into_exception();
        assert_eq!(exc.summary(), "KeyError: 'missing'");
    }
}
