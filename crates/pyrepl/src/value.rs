use std::{
    borrow::Cow,
    cell::RefCell,
    cmp::Ordering,
    fmt::{self, Write},
    rc::Rc,
};

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::{
    builtins::Builtin,
    dict::Dict,
    exception::{ExcType, ExceptionValue},
    executor::ExecutorHandle,
    function::{BoundMethod, BuiltinMethod, Class, Function, Instance, NativeFunction},
    generator::{Coroutine, Generator},
    iter::PyIter,
    scope::Scope,
};

/// Containers nested deeper than this print as `...`, which also stops
/// self-referencing lists from recursing forever.
const MAX_REPR_DEPTH: usize = 64;

/// A Python value.
///
/// Immediate values are stored inline; everything with identity lives behind
/// an `Rc`, so cloning a `Value` is always cheap and aliases like a Python reference.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    /// Integers outside `i64`; always normalised back to `Int` when they fit.
    LongInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Range(Range),
    Function(Rc<Function>),
    BoundMethod(Rc<BoundMethod>),
    /// A builtin function or builtin type such as `len` or `int`.
    Builtin(Builtin),
    /// A method of a builtin value, e.g. `[].append`.
    BuiltinMethod(Rc<BuiltinMethod>),
    /// A function supplied by the host.
    Native(Rc<NativeFunction>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    /// Type objects with no constructor, returned by `type()`.
    TypeName(&'static str),
    ExcType(ExcType),
    Exception(Rc<ExceptionValue>),
    Generator(Rc<Generator>),
    Coroutine(Rc<Coroutine>),
    Iterator(Rc<RefCell<PyIter>>),
    /// The `_async_executor` handle passed to every wrapped unit.
    Executor(ExecutorHandle),
    Scope(Scope),
}

impl Value {
    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    /// Wraps a big integer, narrowing it to `Int` when it fits.
    #[must_use]
    pub fn from_bigint(value: BigInt) -> Self {
        match value.to_i64() {
            Some(i) => Self::Int(i),
            None => Self::LongInt(Rc::new(value)),
        }
    }

    /// Converts decoded JSON into the equivalent Python value.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::from_bigint(BigInt::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Str(s.as_str().into()),
            serde_json::Value::Array(items) => Self::list(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::dict(
                map.iter()
                    .map(|(k, v)| (Rc::from(k.as_str()), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The value as a Python integer index (`bool` counts), if it is one.
    #[must_use]
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The Python type name, as used in error messages.
    #[must_use]
    pub fn type_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::LongInt(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Range(_) => "range",
            Self::Function(_) => "function",
            Self::BoundMethod(_) => "method",
            Self::Builtin(b) if b.is_type() => "type",
            Self::Builtin(_) | Self::BuiltinMethod(_) | Self::Native(_) => "builtin_function_or_method",
            Self::Class(_) | Self::TypeName(_) | Self::ExcType(_) => "type",
            Self::Instance(instance) => return Cow::Borrowed(&instance.class.name),
            Self::Exception(exc) => return exc.type_name(),
            Self::Generator(generator) if generator.is_async() => "async_generator",
            Self::Generator(_) => "generator",
            Self::Coroutine(_) => "coroutine",
            Self::Iterator(_) => "iterator",
            Self::Executor(_) => "AsyncCodeExecutor",
            Self::Scope(_) => "Scope",
        })
    }

    /// Address of the heap object backing this value, for `id()` and `is`.
    #[must_use]
    pub fn identity(&self) -> Option<usize> {
        let ptr: *const () = match self {
            Self::LongInt(rc) => Rc::as_ptr(rc).cast(),
            Self::Str(rc) => Rc::as_ptr(rc).cast(),
            Self::List(rc) => Rc::as_ptr(rc).cast(),
            Self::Tuple(rc) => Rc::as_ptr(rc).cast(),
            Self::Dict(rc) => Rc::as_ptr(rc).cast(),
            Self::Function(rc) => Rc::as_ptr(rc).cast(),
            Self::BoundMethod(rc) => Rc::as_ptr(rc).cast(),
            Self::BuiltinMethod(rc) => Rc::as_ptr(rc).cast(),
            Self::Native(rc) => Rc::as_ptr(rc).cast(),
            Self::Class(rc) => Rc::as_ptr(rc).cast(),
            Self::Instance(rc) => Rc::as_ptr(rc).cast(),
            Self::Exception(rc) => Rc::as_ptr(rc).cast(),
            Self::Generator(rc) => Rc::as_ptr(rc).cast(),
            Self::Coroutine(rc) => Rc::as_ptr(rc).cast(),
            Self::Iterator(rc) => Rc::as_ptr(rc).cast(),
            Self::Executor(handle) => handle.identity(),
            Self::Scope(scope) => scope.identity(),
            _ => return None,
        };
        Some(ptr as usize)
    }

    /// Python's `is`.
    ///
    /// Immediate values and strings compare by value, as they would after
    /// CPython's small-int caching and string interning.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::TypeName(a), Self::TypeName(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Python truthiness for values that don't need a user `__bool__`.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::LongInt(i) => !i.is_zero(),
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(dict) => !dict.borrow().is_empty(),
            Self::Range(range) => !range.is_empty(),
            _ => true,
        }
    }

    /// Structural equality, `==` for builtin values.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.total_cmp(&b) == Some(Ordering::Equal);
        }
        match (self, other) {
            (Self::None, Self::None) | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b) || dict_eq(&a.borrow(), &b.borrow()),
            (Self::Range(a), Self::Range(b)) => a.same_sequence(b),
            _ => self.is_same(other),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`; `None` when the types don't compare.
    #[must_use]
    pub fn py_cmp(&self, other: &Self) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.total_cmp(&b);
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b),
            _ => None,
        }
    }

    pub(crate) fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::LongInt(i) => Some(Number::Big(i.clone())),
            Self::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// `repr(value)` for values that don't define `__repr__`.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        self.repr_into(&mut out, 0);
        out
    }

    /// `str(value)`.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(exc) => exc.message().unwrap_or_default(),
            other => other.py_repr(),
        }
    }

    fn repr_into(&self, out: &mut String, depth: usize) {
        if depth > MAX_REPR_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Self::None => out.push_str("None"),
            Self::Ellipsis => out.push_str("Ellipsis"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => push_fmt(out, format_args!("{i}")),
            Self::LongInt(i) => push_fmt(out, format_args!("{i}")),
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::Str(s) => out.push_str(&str_repr(s)),
            Self::List(items) => {
                out.push('[');
                repr_items(out, &items.borrow(), depth);
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                repr_items(out, items, depth);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(dict) => {
                out.push('{');
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.repr_into(out, depth + 1);
                    out.push_str(": ");
                    value.repr_into(out, depth + 1);
                }
                out.push('}');
            }
            Self::Range(range) => {
                if range.step == 1 {
                    push_fmt(out, format_args!("range({}, {})", range.start, range.stop));
                } else {
                    push_fmt(
                        out,
                        format_args!("range({}, {}, {})", range.start, range.stop, range.step),
                    );
                }
            }
            Self::Function(function) => {
                push_fmt(out, format_args!("<function {} at {}>", function.def.name, self.address()));
            }
            Self::BoundMethod(method) => {
                out.push_str("<bound method ");
                out.push_str(&method.name());
                out.push_str(" of ");
                method.receiver.repr_into(out, depth + 1);
                out.push('>');
            }
            Self::Builtin(builtin) if builtin.is_type() => push_fmt(out, format_args!("<class '{builtin}'>")),
            Self::Builtin(builtin) => push_fmt(out, format_args!("<built-in function {builtin}>")),
            Self::BuiltinMethod(method) => push_fmt(
                out,
                format_args!(
                    "<built-in method {} of {} object at {}>",
                    method.name,
                    method.receiver.type_name(),
                    method.receiver.address()
                ),
            ),
            Self::Native(native) => push_fmt(out, format_args!("<built-in function {}>", native.name)),
            Self::Class(class) => push_fmt(out, format_args!("<class '__main__.{}'>", class.name)),
            Self::Instance(instance) => push_fmt(
                out,
                format_args!("<__main__.{} object at {}>", instance.class.name, self.address()),
            ),
            Self::TypeName(name) => push_fmt(out, format_args!("<class '{name}'>")),
            Self::ExcType(exc_type) => push_fmt(out, format_args!("<class '{exc_type}'>")),
            Self::Exception(exc) => out.push_str(&exc.py_repr()),
            Self::Generator(generator) => push_fmt(
                out,
                format_args!("<{} object {} at {}>", self.type_name(), generator.name(), self.address()),
            ),
            Self::Coroutine(coroutine) => push_fmt(
                out,
                format_args!("<coroutine object {} at {}>", coroutine.name(), self.address()),
            ),
            Self::Iterator(_) => push_fmt(out, format_args!("<iterator object at {}>", self.address())),
            Self::Executor(_) => push_fmt(
                out,
                format_args!("<pyrepl.AsyncCodeExecutor object at {}>", self.address()),
            ),
            Self::Scope(scope) => push_fmt(
                out,
                format_args!(
                    "<Scope globals={} locals={}>",
                    scope.globals().borrow().len(),
                    scope.locals().borrow().len()
                ),
            ),
        }
    }

    fn address(&self) -> String {
        format!("{:#x}", self.identity().unwrap_or_default())
    }
}

/// `==` on values; used heavily by tests comparing produced results.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.py_str())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self {
        Self::from_bigint(value)
    }
}

/// A numeric view of `bool`, `int` and `float` values.
#[derive(Debug, Clone)]
pub(crate) enum Number {
    Int(i64),
    Big(Rc<BigInt>),
    Float(f64),
}

impl Number {
    pub fn to_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Big(b) => b.to_f64().unwrap_or(f64::NAN),
            Self::Float(f) => *f,
        }
    }

    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Big(b) => Some((**b).clone()),
            Self::Float(_) => None,
        }
    }

    /// Numeric comparison; `None` only when a NaN is involved.
    pub fn total_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(_), _) | (_, Self::Float(_)) => self.to_f64().partial_cmp(&other.to_f64()),
            _ => Some(self.to_bigint()?.cmp(&other.to_bigint()?)),
        }
    }
}

/// An immutable `range(start, stop, step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    #[must_use]
    pub fn len(&self) -> usize {
        let (start, stop, step) = (i128::from(self.start), i128::from(self.stop), i128::from(self.step));
        let count = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / -step + 1
        } else {
            0
        };
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = i128::from(self.start) + i128::try_from(index).ok()? * i128::from(self.step);
        i64::try_from(value).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + use<> {
        let range = *self;
        (0..range.len()).map_while(move |i| range.get(i))
    }

    /// Membership without iterating: `value` must lie between the bounds on a step boundary.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }

    /// Whether both ranges produce the same sequence, compared on their bounds.
    #[must_use]
    pub fn same_sequence(&self, other: &Self) -> bool {
        let len = self.len();
        if len != other.len() {
            return false;
        }
        len == 0 || (self.start == other.start && (len == 1 || self.step == other.step))
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_cmp(y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn dict_eq(a: &Dict, b: &Dict) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, value)| matches!(b.get(key), Ok(Some(other)) if value.py_eq(other)))
}

fn repr_items(out: &mut String, items: &[Value], depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.repr_into(out, depth + 1);
    }
}

fn push_fmt(out: &mut String, args: fmt::Arguments<'_>) {
    // Writing to a String cannot fail.
    let _ = out.write_fmt(args);
}

/// Formats a float the way Python's `repr` does: shortest round-trip digits,
/// always with a decimal point or exponent.
#[must_use]
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let abs = value.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let formatted = format!("{value:e}");
        if let Some((mantissa, exponent)) = formatted.split_once('e')
            && let Ok(exponent) = exponent.parse::<i32>()
        {
            let sign = if exponent < 0 { '-' } else { '+' };
            return format!("{mantissa}e{sign}{:02}", exponent.abs());
        }
        return formatted;
    }
    let formatted = value.to_string();
    if formatted.contains('.') {
        formatted
    } else {
        formatted + ".0"
    }
}

/// Quotes a string the way Python's `repr` does.
#[must_use]
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => push_fmt(&mut out, format_args!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn range(start: i64, stop: i64, step: i64) -> Value {
        Value::Range(Range { start, stop, step })
    }

    #[test]
    fn ranges_compare_as_sequences() {
        assert!(range(0, 0, 1).py_eq(&range(5, 5, 1)));
        assert!(range(0, 3, 2).py_eq(&range(0, 2, 5)));
        assert!(range(0, 10, 3).py_eq(&range(0, 11, 3)));
        assert!(!range(0, 10, 3).py_eq(&range(0, 10, 2)));
        assert!(!range(0, 3, 1).py_eq(&range(1, 4, 1)));
        let huge = range(0, 1_000_000_000_000_000_000, 1);
        assert!(huge.py_eq(&huge.clone()));
    }

    #[test]
    fn json_objects_keep_their_key_order() {
        let json = serde_json::json!({"z": [1, 2.5, null], "a": true, "big": 18_446_744_073_709_551_615_u64});
        assert_eq!(
            Value::from_json(&json).py_repr(),
            "{'z': [1, 2.5, None], 'a': True, 'big': 18446744073709551615}"
        );
    }

    #[test]
    fn float_repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(123_456.789), "123456.789");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn str_repr_picks_quotes() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a'b\"c"), "'a\\'b\"c'");
        assert_eq!(str_repr("line\n"), "'line\\n'");
    }

    #[test]
    fn container_repr() {
        let value = Value::list(vec![
            Value::Int(1),
            Value::tuple(vec![Value::Str("a".into())]),
            Value::None,
            Value::Float(2.5),
        ]);
        assert_eq!(value.py_repr(), "[1, ('a',), None, 2.5]");
        assert_eq!(Value::tuple(vec![]).py_repr(), "()");
    }

    #[test]
    fn mixed_numeric_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Str("1".into()));
        assert_eq!(
            Value::from_bigint(BigInt::from(i64::MAX) + 1).py_cmp(&Value::Int(i64::MAX)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn identity_of_lists_is_by_reference() {
        let a = Value::list(vec![]);
        let b = a.clone();
        assert!(a.is_same(&b));
        assert!(!a.is_same(&Value::list(vec![])));
        assert!(Value::Int(5).is_same(&Value::Int(5)));
    }

    #[test]
    fn range_length_handles_negative_steps() {
        let range = Range { start: 10, stop: 0, step: -3 };
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![10, 7, 4, 1]);
        assert_eq!(Range { start: 0, stop: 0, step: 1 }.len(), 0);
    }
}
