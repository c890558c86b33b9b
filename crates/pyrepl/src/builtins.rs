//! Builtin functions and types available to every unit without import.

use std::{cell::RefCell, cmp::Ordering, hash::BuildHasher, rc::Rc};

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    dict::{Dict, DictKey},
    eval::{call_value, repr_value, str_value},
    exception::{ExcType, ExceptionValue, RunError, RunResult},
    expressions::Operator,
    format::format_value,
    frame::Frame,
    generator::GenStep,
    iter::{PyIter, collect_values},
    ops::{binary_op, get_attr, set_attr},
    runtime::EvalFuture,
    value::{Number, Range, Value},
};

/// Builtin functions and type constructors, named as Python spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Abs,
    All,
    Any,
    Bool,
    Callable,
    Chr,
    Dict,
    Divmod,
    Enumerate,
    Filter,
    Float,
    Format,
    Getattr,
    Globals,
    Hasattr,
    Hash,
    Id,
    Int,
    Isinstance,
    Iter,
    Len,
    List,
    Locals,
    Map,
    Max,
    Min,
    Next,
    Ord,
    Print,
    Range,
    Repr,
    Reversed,
    Round,
    Setattr,
    Sorted,
    Str,
    Sum,
    Tuple,
    Type,
    Zip,
}

impl Builtin {
    /// Whether this builtin is a class (`int`, `list`...) rather than a function.
    #[must_use]
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Dict
                | Self::Enumerate
                | Self::Filter
                | Self::Float
                | Self::Int
                | Self::List
                | Self::Map
                | Self::Range
                | Self::Reversed
                | Self::Str
                | Self::Tuple
                | Self::Type
                | Self::Zip
        )
    }
}

pub(crate) type Kwargs = Vec<(Rc<str>, Value)>;

/// Calls a builtin. The ones that may call back into user code are async.
pub(crate) fn call_builtin(frame: &Frame, builtin: Builtin, args: Vec<Value>, mut kwargs: Kwargs) -> EvalFuture<'_, Value> {
    Box::pin(async move {
        let name: &'static str = builtin.into();
        match builtin {
            Builtin::Print => print(frame, args, kwargs).await,
            Builtin::Repr => {
                no_kwargs(name, &kwargs)?;
                let [value] = exact::<1>(name, args)?;
                Ok(Value::Str(repr_value(frame, value).await?.into()))
            }
            Builtin::Str => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.into_iter().next() {
                    Some(value) => Ok(Value::Str(str_value(frame, value).await?.into())),
                    None => Ok(Value::Str("".into())),
                }
            }
            Builtin::Sorted => {
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
                no_kwargs(name, &kwargs)?;
                let [iterable] = exact::<1>(name, args)?;
                let items = collect_values(&iterable)?;
                Ok(Value::list(sort_values(frame, items, key, reverse).await?))
            }
            Builtin::Max | Builtin::Min => {
                let key = take_kwarg(&mut kwargs, "key");
                let default = take_kwarg(&mut kwargs, "default");
                no_kwargs(name, &kwargs)?;
                extremum(frame, name, builtin == Builtin::Max, args, key, default).await
            }
            Builtin::Map => {
                no_kwargs(name, &kwargs)?;
                if args.len() < 2 {
                    return Err(ExcType::type_error("map() must have at least two arguments."));
                }
                let mut args = args.into_iter();
                let func = args.next().unwrap_or(Value::None);
                let columns = zip_columns(args)?;
                let mut results = Vec::with_capacity(columns.len());
                for row in columns {
                    results.push(call_value(frame, func.clone(), row, Vec::new()).await?);
                }
                Ok(iterator(results))
            }
            Builtin::Filter => {
                no_kwargs(name, &kwargs)?;
                let [func, iterable] = exact::<2>(name, args)?;
                let mut kept = Vec::new();
                for item in collect_values(&iterable)? {
                    let keep = if func.is_none() {
                        item.truthy()
                    } else {
                        call_value(frame, func.clone(), vec![item.clone()], Vec::new()).await?.truthy()
                    };
                    if keep {
                        kept.push(item);
                    }
                }
                Ok(iterator(kept))
            }
            _ => call_sync(frame, builtin, args, kwargs),
        }
    })
}

fn call_sync(frame: &Frame, builtin: Builtin, args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
    let name: &'static str = builtin.into();
    match builtin {
        Builtin::Dict => return dict_from(args, kwargs),
        Builtin::Enumerate => {
            let start = take_kwarg(&mut kwargs, "start");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 2)?;
            let mut args = args.into_iter();
            let iterable = args.next().unwrap_or(Value::None);
            let start = match args.next().or(start) {
                Some(start) => index_arg(&start)?,
                None => 0,
            };
            let items = collect_values(&iterable)?
                .into_iter()
                .zip(start..)
                .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
                .collect();
            return Ok(iterator(items));
        }
        Builtin::Int => return int_from(args, kwargs),
        _ => no_kwargs(name, &kwargs)?,
    }
    match builtin {
        Builtin::Abs => {
            let [value] = exact::<1>(name, args)?;
            match value.as_number() {
                Some(Number::Int(i)) => Ok(i
                    .checked_abs()
                    .map_or_else(|| Value::from_bigint(BigInt::from(i).abs()), Value::Int)),
                Some(Number::Big(b)) => Ok(Value::from_bigint(b.abs())),
                Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                None => Err(ExcType::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    value.type_name()
                ))),
            }
        }
        Builtin::All => {
            let [iterable] = exact::<1>(name, args)?;
            Ok(Value::Bool(collect_values(&iterable)?.iter().all(Value::truthy)))
        }
        Builtin::Any => {
            let [iterable] = exact::<1>(name, args)?;
            Ok(Value::Bool(collect_values(&iterable)?.iter().any(Value::truthy)))
        }
        Builtin::Bool => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        Builtin::Callable => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Bool(is_callable(&value)))
        }
        Builtin::Chr => {
            let [value] = exact::<1>(name, args)?;
            let code = index_arg(&value)?;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::Str(c.to_string().into()))
                .ok_or_else(|| ExcType::ValueError.error("chr() arg not in range(0x110000)"))
        }
        Builtin::Divmod => {
            let [a, b] = exact::<2>(name, args)?;
            let quotient = binary_op(&a, Operator::FloorDiv, &b)?;
            let remainder = binary_op(&a, Operator::Mod, &b)?;
            Ok(Value::tuple(vec![quotient, remainder]))
        }
        Builtin::Float => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(value) => float_from(value),
            }
        }
        Builtin::Format => {
            arity(name, &args, 1, 2)?;
            let spec = match args.get(1) {
                Some(Value::Str(spec)) => spec.to_string(),
                Some(other) => {
                    return Err(ExcType::type_error(format!(
                        "format() argument 2 must be str, not {}",
                        other.type_name()
                    )));
                }
                None => String::new(),
            };
            Ok(Value::Str(format_value(&args[0], &spec)?.into()))
        }
        Builtin::Getattr => {
            arity(name, &args, 2, 3)?;
            let attr = attr_name(name, &args[1])?;
            match (get_attr(&args[0], &attr), args.get(2)) {
                (Err(err), Some(default)) if err.exc_type() == ExcType::AttributeError => Ok(default.clone()),
                (result, _) => result,
            }
        }
        Builtin::Hasattr => {
            let [object, attr] = exact::<2>(name, args)?;
            let attr = attr_name(name, &attr)?;
            match get_attr(&object, &attr) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(err) if err.exc_type() == ExcType::AttributeError => Ok(Value::Bool(false)),
                Err(err) => Err(err),
            }
        }
        Builtin::Setattr => {
            let [object, attr, value] = exact::<3>(name, args)?;
            let attr = attr_name(name, &attr)?;
            set_attr(&object, &attr, value)?;
            Ok(Value::None)
        }
        Builtin::Globals => {
            exact::<0>(name, args)?;
            Ok(Value::Dict(frame.globals.clone()))
        }
        Builtin::Locals => {
            exact::<0>(name, args)?;
            Ok(frame.locals_value())
        }
        Builtin::Hash => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Int(hash_value(&value)?))
        }
        Builtin::Id => {
            let [value] = exact::<1>(name, args)?;
            let id = match value.identity() {
                Some(address) => i64::try_from(address).unwrap_or(i64::MAX),
                None => hash_value(&value).unwrap_or_default(),
            };
            Ok(Value::Int(id))
        }
        Builtin::Isinstance => {
            let [value, class] = exact::<2>(name, args)?;
            Ok(Value::Bool(isinstance(&value, &class)?))
        }
        Builtin::Iter => {
            let [value] = exact::<1>(name, args)?;
            match &value {
                Value::Iterator(_) => Ok(value.clone()),
                Value::Generator(generator) if !generator.is_async() => Ok(value.clone()),
                other => Ok(Value::Iterator(Rc::new(RefCell::new(PyIter::new(other)?)))),
            }
        }
        Builtin::Len => {
            let [value] = exact::<1>(name, args)?;
            let len = match &value {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(dict) => dict.borrow().len(),
                Value::Range(range) => range.len(),
                other => {
                    return Err(ExcType::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
        }
        Builtin::List => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(iterable) => Ok(Value::list(collect_values(iterable)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        Builtin::Tuple => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(Value::Tuple(_)) => Ok(args[0].clone()),
                Some(iterable) => Ok(Value::tuple(collect_values(iterable)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        Builtin::Next => {
            arity(name, &args, 1, 2)?;
            let default = args.get(1).cloned();
            let next = match &args[0] {
                Value::Iterator(iter) => iter
                    .try_borrow_mut()
                    .map_err(|_| ExcType::ValueError.error("generator already executing"))?
                    .next_value()?,
                Value::Generator(generator) if !generator.is_async() => match generator.resume(Value::None)? {
                    GenStep::Yielded(value) => Some(value),
                    GenStep::Complete(value) => {
                        return default.map_or_else(|| Err(stop_iteration(value)), Ok);
                    }
                },
                other => {
                    return Err(ExcType::type_error(format!(
                        "'{}' object is not an iterator",
                        other.type_name()
                    )));
                }
            };
            match (next, default) {
                (Some(value), _) | (None, Some(value)) => Ok(value),
                (None, None) => Err(ExcType::StopIteration.bare()),
            }
        }
        Builtin::Ord => {
            let [value] = exact::<1>(name, args)?;
            let Value::Str(s) = &value else {
                return Err(ExcType::type_error(format!(
                    "ord() expected string of length 1, but {} found",
                    value.type_name()
                )));
            };
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                _ => Err(ExcType::type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        Builtin::Range => range_from(&args),
        Builtin::Reversed => {
            let [value] = exact::<1>(name, args)?;
            let mut items = match &value {
                Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) => collect_values(&value)?,
                other => {
                    return Err(ExcType::type_error(format!(
                        "'{}' object is not reversible",
                        other.type_name()
                    )));
                }
            };
            items.reverse();
            Ok(iterator(items))
        }
        Builtin::Round => round(args),
        Builtin::Sum => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
            }
            for item in collect_values(&args[0])? {
                total = binary_op(&total, Operator::Add, &item)?;
            }
            Ok(total)
        }
        Builtin::Type => {
            let [value] = exact::<1>(name, args)?;
            Ok(type_of(&value))
        }
        Builtin::Zip => Ok(iterator(
            zip_columns(args.into_iter())?.into_iter().map(Value::tuple).collect(),
        )),
        Builtin::Dict
        | Builtin::Enumerate
        | Builtin::Int
        | Builtin::Print
        | Builtin::Repr
        | Builtin::Str
        | Builtin::Sorted
        | Builtin::Max
        | Builtin::Min
        | Builtin::Map
        | Builtin::Filter => Err(ExcType::RuntimeError.error(format!("{name}() dispatched out of order"))),
    }
}

pub(crate) fn iterator(items: Vec<Value>) -> Value {
    Value::Iterator(Rc::new(RefCell::new(PyIter::from_items(items))))
}

pub(crate) fn stop_iteration(value: Value) -> RunError {
    let args = if value.is_none() { Vec::new() } else { vec![value] };
    RunError::new(ExceptionValue::new(ExcType::StopIteration, args))
}

pub(crate) fn take_kwarg(kwargs: &mut Kwargs, name: &str) -> Option<Value> {
    let index = kwargs.iter().position(|(key, _)| &**key == name)?;
    Some(kwargs.remove(index).1)
}

pub(crate) fn no_kwargs(name: &str, kwargs: &Kwargs) -> RunResult<()> {
    match kwargs.first() {
        None => Ok(()),
        Some((key, _)) => Err(ExcType::type_error(format!(
            "{name}() got an unexpected keyword argument '{key}'"
        ))),
    }
}

/// Checks the positional count, with CPython's wording.
pub(crate) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> RunResult<()> {
    let count = args.len();
    if (min..=max).contains(&count) {
        return Ok(());
    }
    if min == max {
        if min == 0 {
            return Err(ExcType::type_error(format!(
                "{name}() takes no arguments ({count} given)"
            )));
        }
        return Err(ExcType::type_error_arg_count(name, min, count));
    }
    if count < min {
        Err(ExcType::type_error(format!(
            "{name} expected at least {min} argument{}, got {count}",
            if min == 1 { "" } else { "s" }
        )))
    } else {
        Err(ExcType::type_error(format!(
            "{name} expected at most {max} argument{}, got {count}",
            if max == 1 { "" } else { "s" }
        )))
    }
}

/// Destructures exactly `N` positional arguments.
pub(crate) fn exact<const N: usize>(name: &str, args: Vec<Value>) -> RunResult<[Value; N]> {
    arity(name, &args, N, N)?;
    args.try_into()
        .map_err(|_| ExcType::type_error_arg_count(name, N, N))
}

fn index_arg(value: &Value) -> RunResult<i64> {
    value.as_index().ok_or_else(|| {
        ExcType::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn attr_name(function: &str, value: &Value) -> RunResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(ExcType::type_error(format!(
            "{function}(): attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

pub(crate) fn is_callable(value: &Value) -> bool {
    matches!(
        value,
        Value::Function(_)
            | Value::BoundMethod(_)
            | Value::Builtin(_)
            | Value::BuiltinMethod(_)
            | Value::Native(_)
            | Value::Class(_)
            | Value::ExcType(_)
    )
}

/// Python's `hash()`: ints hash to themselves, everything else through ahash.
fn hash_value(value: &Value) -> RunResult<i64> {
    if let Some(i) = value.as_index() {
        return Ok(i);
    }
    let key = DictKey::from_value(value)?;
    if let DictKey::Int(i) = key {
        return Ok(i);
    }
    let hash = ahash::RandomState::with_seeds(0x243f, 0x6a88, 0x85a3, 0x08d3).hash_one(&key);
    Ok(i64::from_ne_bytes(hash.to_ne_bytes()))
}

pub(crate) fn isinstance(value: &Value, class: &Value) -> RunResult<bool> {
    match class {
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if isinstance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(builtin) if builtin.is_type() => Ok(match builtin {
            Builtin::Int => matches!(value, Value::Int(_) | Value::LongInt(_) | Value::Bool(_)),
            Builtin::Type => matches!(
                value,
                Value::Class(_) | Value::ExcType(_) | Value::TypeName(_)
            ) || matches!(value, Value::Builtin(b) if b.is_type()),
            other => {
                let expected: &'static str = (*other).into();
                value.type_name() == expected
            }
        }),
        Value::Class(class) => Ok(match value {
            Value::Instance(instance) => instance.class.is_subclass_of(class),
            Value::Exception(exc) => exc.matches_class(class),
            _ => false,
        }),
        Value::ExcType(exc_type) => Ok(matches!(value, Value::Exception(exc) if exc.exc_type.is_subclass_of(*exc_type))),
        Value::TypeName(name) => Ok(value.type_name() == *name),
        _ => Err(ExcType::type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        )),
    }
}

/// `type(value)`.
pub(crate) fn type_of(value: &Value) -> Value {
    let builtin = match value {
        Value::Bool(_) => Builtin::Bool,
        Value::Int(_) | Value::LongInt(_) => Builtin::Int,
        Value::Float(_) => Builtin::Float,
        Value::Str(_) => Builtin::Str,
        Value::List(_) => Builtin::List,
        Value::Tuple(_) => Builtin::Tuple,
        Value::Dict(_) => Builtin::Dict,
        Value::Range(_) => Builtin::Range,
        Value::Class(_) | Value::ExcType(_) | Value::TypeName(_) => Builtin::Type,
        Value::Builtin(builtin) if builtin.is_type() => Builtin::Type,
        Value::Instance(instance) => return Value::Class(instance.class.clone()),
        Value::Exception(exc) => {
            return exc.class.clone().map_or(Value::ExcType(exc.exc_type), Value::Class);
        }
        Value::None => return Value::TypeName("NoneType"),
        Value::Ellipsis => return Value::TypeName("ellipsis"),
        Value::Function(_) => return Value::TypeName("function"),
        Value::BoundMethod(_) => return Value::TypeName("method"),
        Value::Builtin(_) | Value::BuiltinMethod(_) | Value::Native(_) => {
            return Value::TypeName("builtin_function_or_method");
        }
        Value::Generator(generator) if generator.is_async() => return Value::TypeName("async_generator"),
        Value::Generator(_) => return Value::TypeName("generator"),
        Value::Coroutine(_) => return Value::TypeName("coroutine"),
        Value::Iterator(_) => return Value::TypeName("iterator"),
        Value::Executor(_) => return Value::TypeName("AsyncCodeExecutor"),
        Value::Scope(_) => return Value::TypeName("Scope"),
    };
    Value::Builtin(builtin)
}

fn float_from(value: &Value) -> RunResult<Value> {
    match value {
        Value::Str(s) => {
            let cleaned = s.trim().replace('_', "");
            cleaned
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ExcType::ValueError.error(format!("could not convert string to float: {}", value.py_repr())))
        }
        other => match other.as_number() {
            Some(number) => Ok(Value::Float(number.to_f64())),
            None => Err(ExcType::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

fn float_to_int(f: f64) -> RunResult<Value> {
    if f.is_nan() {
        return Err(ExcType::ValueError.error("cannot convert float NaN to integer"));
    }
    BigInt::from_f64(f.trunc())
        .map(Value::from_bigint)
        .ok_or_else(|| ExcType::OverflowError.error("cannot convert float infinity to integer"))
}

fn int_from(args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
    let base_kwarg = take_kwarg(&mut kwargs, "base");
    no_kwargs("int", &kwargs)?;
    arity("int", &args, 0, 2)?;
    let mut args = args.into_iter();
    let Some(value) = args.next() else {
        return Ok(Value::Int(0));
    };
    let base = match args.next().or(base_kwarg) {
        Some(base) => Some(index_arg(&base)?),
        None => None,
    };
    match (&value, base) {
        (Value::Str(s), base) => {
            let base = base.unwrap_or(10);
            let base = u32::try_from(base)
                .ok()
                .filter(|b| *b == 0 || (2..=36).contains(b))
                .ok_or_else(|| ExcType::ValueError.error("int() base must be >= 2 and <= 36, or 0"))?;
            parse_int(s, base).ok_or_else(|| {
                ExcType::ValueError.error(format!(
                    "invalid literal for int() with base {base}: {}",
                    value.py_repr()
                ))
            })
        }
        (_, Some(_)) => Err(ExcType::type_error("int() can't convert non-string with explicit base")),
        (other, None) => match other.as_number() {
            Some(Number::Int(i)) => Ok(Value::Int(i)),
            Some(Number::Big(b)) => Ok(Value::LongInt(b)),
            Some(Number::Float(f)) => float_to_int(f),
            None => Err(ExcType::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

/// Parses an integer literal the way `int(text, base)` does.
fn parse_int(text: &str, base: u32) -> Option<Value> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let lower = digits.to_ascii_lowercase();
    let prefixed = |prefix: &str| lower.strip_prefix(prefix).map(str::to_owned);
    let (base, digits) = match base {
        0 => match lower.get(..2) {
            Some("0x") => (16, prefixed("0x")?),
            Some("0o") => (8, prefixed("0o")?),
            Some("0b") => (2, prefixed("0b")?),
            _ => (10, lower.clone()),
        },
        16 => (16, prefixed("0x").unwrap_or_else(|| lower.clone())),
        8 => (8, prefixed("0o").unwrap_or_else(|| lower.clone())),
        2 => (2, prefixed("0b").unwrap_or_else(|| lower.clone())),
        base => (base, lower.clone()),
    };
    let digits = digits.strip_prefix('_').unwrap_or(&digits);
    if digits.is_empty() || digits.ends_with('_') || digits.contains("__") || digits.starts_with(['+', '-']) {
        return None;
    }
    let cleaned = digits.replace('_', "");
    let value = BigInt::parse_bytes(cleaned.as_bytes(), base)?;
    Some(Value::from_bigint(if negative { -value } else { value }))
}

fn range_from(args: &[Value]) -> RunResult<Value> {
    arity("range", args, 1, 3)?;
    let ints = args.iter().map(index_arg).collect::<RunResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => return Err(ExcType::type_error("range expected at least 1 argument, got 0")),
    };
    if step == 0 {
        return Err(ExcType::ValueError.error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn round(args: Vec<Value>) -> RunResult<Value> {
    arity("round", &args, 1, 2)?;
    let ndigits = match args.get(1) {
        None | Some(Value::None) => None,
        Some(n) => Some(index_arg(n)?),
    };
    match (args[0].as_number(), ndigits) {
        (Some(Number::Float(f)), None) => float_to_int(f.round_ties_even()),
        (Some(Number::Float(f)), Some(n)) => {
            let scale = 10_f64.powi(i32::try_from(n).unwrap_or(i32::MAX));
            let rounded = (f * scale).round_ties_even() / scale;
            Ok(Value::Float(if rounded.is_finite() { rounded } else { f }))
        }
        (Some(_), None) => Ok(args[0].clone()),
        (Some(_), Some(n)) if n >= 0 => Ok(args[0].clone()),
        (Some(_), Some(n)) => {
            let factor = Value::from_bigint(BigInt::from(10).pow(u32::try_from(-n).unwrap_or(u32::MAX).min(400)));
            let down = binary_op(&args[0], Operator::FloorDiv, &factor)?;
            binary_op(&down, Operator::Mult, &factor)
        }
        (None, _) => Err(ExcType::type_error(format!(
            "type {} doesn't define __round__ method",
            args[0].type_name()
        ))),
    }
}

fn dict_from(args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    arity("dict", &args, 0, 1)?;
    let mut dict = Dict::new();
    match args.first() {
        Some(Value::Dict(source)) => dict.update(&source.borrow()),
        Some(iterable) => {
            for (i, item) in collect_values(iterable)?.into_iter().enumerate() {
                let pair = collect_values(&item).map_err(|_| {
                    ExcType::type_error(format!(
                        "cannot convert dictionary update sequence element #{i} to a sequence"
                    ))
                })?;
                let Ok([key, value]) = <[Value; 2]>::try_from(pair.clone()) else {
                    return Err(ExcType::ValueError.error(format!(
                        "dictionary update sequence element #{i} has length {}; 2 is required",
                        pair.len()
                    )));
                };
                dict.insert(key, value)?;
            }
        }
        None => {}
    }
    for (key, value) in kwargs {
        dict.insert_str(key, value);
    }
    Ok(Value::dict(dict))
}

/// Rows of `zip(*iterables)`, stopping at the shortest.
fn zip_columns(iterables: impl Iterator<Item = Value>) -> RunResult<Vec<Vec<Value>>> {
    let columns = iterables.map(|it| collect_values(&it)).collect::<RunResult<Vec<_>>>()?;
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok((0..len)
        .map(|i| columns.iter().map(|column| column[i].clone()).collect())
        .collect())
}

fn unorderable(a: &Value, b: &Value) -> RunError {
    ExcType::type_error(format!(
        "'<' not supported between instances of '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

/// Orders two values for sorting; NaN compares equal to everything.
fn order(a: &Value, b: &Value) -> RunResult<Ordering> {
    match a.py_cmp(b) {
        Some(ordering) => Ok(ordering),
        None if a.as_number().is_some() && b.as_number().is_some() => Ok(Ordering::Equal),
        None => Err(unorderable(a, b)),
    }
}

/// Stable sort with an optional key function, as `sorted()` and `list.sort()` use.
pub(crate) async fn sort_values(
    frame: &Frame,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> RunResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let sort_key = match &key {
            Some(func) if !func.is_none() => call_value(frame, func.clone(), vec![item.clone()], Vec::new()).await?,
            _ => item.clone(),
        };
        keyed.push((sort_key, item));
    }
    let mut error = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let (a, b) = if reverse { (b, a) } else { (a, b) };
        match order(a, b) {
            Ok(ordering) => ordering,
            Err(err) => {
                error.get_or_insert(err);
                Ordering::Equal
            }
        }
    });
    match error {
        Some(err) => Err(err),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

async fn extremum(
    frame: &Frame,
    name: &str,
    is_max: bool,
    args: Vec<Value>,
    key: Option<Value>,
    default: Option<Value>,
) -> RunResult<Value> {
    let candidates = match args.len() {
        0 => {
            return Err(ExcType::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )));
        }
        1 => collect_values(&args[0])?,
        _ => {
            if default.is_some() {
                return Err(ExcType::type_error(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                )));
            }
            args
        }
    };
    let mut best: Option<(Value, Value)> = None;
    for item in candidates {
        let item_key = match &key {
            Some(func) if !func.is_none() => call_value(frame, func.clone(), vec![item.clone()], Vec::new()).await?,
            _ => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best_key, _)) => {
                let ordering = order(&item_key, best_key)?;
                if is_max { ordering.is_gt() } else { ordering.is_lt() }
            }
        };
        if better {
            best = Some((item_key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ExcType::ValueError.error(format!("{name}() iterable argument is empty"))),
    }
}

async fn print(frame: &Frame, args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
    let sep = match take_kwarg(&mut kwargs, "sep") {
        None | Some(Value::None) => " ".to_owned(),
        Some(Value::Str(s)) => s.to_string(),
        Some(other) => {
            return Err(ExcType::type_error(format!(
                "sep must be None or a string, not {}",
                other.type_name()
            )));
        }
    };
    let end = match take_kwarg(&mut kwargs, "end") {
        None | Some(Value::None) => "\n".to_owned(),
        Some(Value::Str(s)) => s.to_string(),
        Some(other) => {
            return Err(ExcType::type_error(format!(
                "end must be None or a string, not {}",
                other.type_name()
            )));
        }
    };
    take_kwarg(&mut kwargs, "flush");
    if let Some((key, _)) = kwargs.first() {
        return Err(ExcType::type_error(format!(
            "'{key}' is an invalid keyword argument for print()"
        )));
    }
    let mut texts = Vec::with_capacity(args.len());
    for arg in args {
        texts.push(str_value(frame, arg).await?);
    }
    let mut out = frame.runtime.print.borrow_mut();
    for (i, text) in texts.iter().enumerate() {
        if i > 0 && !sep.is_empty() {
            out.write_str(&sep)?;
        }
        if !text.is_empty() {
            out.write_str(text)?;
        }
    }
    if !end.is_empty() {
        out.write_str(&end)?;
    }
    out.end_call()?;
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn names_round_trip_through_strum() {
        assert_eq!(Builtin::from_str("isinstance").unwrap(), Builtin::Isinstance);
        assert_eq!(Builtin::Sorted.to_string(), "sorted");
        assert!(Builtin::from_str("Len").is_err());
        assert!(Builtin::Int.is_type());
        assert!(!Builtin::Len.is_type());
    }

    #[test]
    fn int_parsing() {
        assert_eq!(parse_int(" 42 ", 10), Some(Value::Int(42)));
        assert_eq!(parse_int("-0x1f", 0), Some(Value::Int(-31)));
        assert_eq!(parse_int("1_000", 10), Some(Value::Int(1000)));
        assert_eq!(parse_int("ff", 16), Some(Value::Int(255)));
        assert_eq!(parse_int("1__0", 10), None);
        assert_eq!(parse_int("abc", 10), None);
        assert_eq!(parse_int("", 10), None);
    }

    #[test]
    fn isinstance_follows_bool_int_relationship() {
        let int = Value::Builtin(Builtin::Int);
        assert!(isinstance(&Value::Bool(true), &int).unwrap());
        assert!(!isinstance(&Value::Float(1.0), &int).unwrap());
        let either = Value::tuple(vec![Value::Builtin(Builtin::Str), Value::Builtin(Builtin::Float)]);
        assert!(isinstance(&Value::Float(1.0), &either).unwrap());
        assert!(isinstance(&Value::Int(1), &Value::Int(1)).is_err());
    }

    #[test]
    fn ranges_reject_zero_step() {
        let err = range_from(&[Value::Int(0), Value::Int(5), Value::Int(0)]).unwrap_err();
        assert_eq!(err.into_exception().summary(), "ValueError: range() arg 3 must not be zero");
        let range = range_from(&[Value::Int(5)]).unwrap();
        assert_eq!(range.py_repr(), "range(0, 5)");
    }

    #[test]
    fn rounding_is_bankers() {
        assert_eq!(round(vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(round(vec![Value::Float(3.5)]).unwrap(), Value::Int(4));
        assert_eq!(round(vec![Value::Int(1234), Value::Int(-2)]).unwrap(), Value::Int(1200));
    }

    #[test]
    fn hashes_of_equal_numbers_agree() {
        assert_eq!(hash_value(&Value::Int(7)).unwrap(), 7);
        assert_eq!(hash_value(&Value::Bool(true)).unwrap(), 1);
        assert_eq!(hash_value(&Value::Float(7.0)).unwrap(), 7);
        assert!(hash_value(&Value::list(vec![])).is_err());
    }

    #[test]
    fn arity_messages() {
        let err = arity("len", &[], 1, 1).unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "TypeError: len() takes exactly one argument (0 given)"
        );
        let err = arity("range", &[], 1, 3).unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "TypeError: range expected at least 1 argument, got 0"
        );
    }
}
