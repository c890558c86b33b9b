//! Methods of builtin values: `str`, `list`, `dict`, `tuple`, generators.

use std::{cell::RefCell, rc::Rc};

use crate::{
    builtins::{Kwargs, arity, exact, no_kwargs, sort_values, stop_iteration, take_kwarg},
    dict::Dict,
    exception::{ExcType, RunResult},
    format::str_format,
    frame::Frame,
    generator::GenStep,
    iter::collect_values,
    runtime::EvalFuture,
    value::Value,
};

const STR_METHODS: &[&str] = &[
    "capitalize",
    "center",
    "count",
    "endswith",
    "find",
    "format",
    "index",
    "isalnum",
    "isalpha",
    "isdigit",
    "islower",
    "isspace",
    "isupper",
    "join",
    "ljust",
    "lower",
    "lstrip",
    "partition",
    "replace",
    "rfind",
    "rjust",
    "rsplit",
    "rstrip",
    "split",
    "splitlines",
    "startswith",
    "strip",
    "title",
    "upper",
    "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];

/// Whether `value.name` resolves to a builtin method.
pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => &["count", "index"],
        Value::Int(_) | Value::LongInt(_) | Value::Bool(_) => &["bit_length"],
        Value::Float(_) => &["is_integer"],
        Value::Generator(generator) if !generator.is_async() => &["send", "__next__"],
        _ => &[],
    };
    table.contains(&name)
}

/// Calls `receiver.name(*args, **kwargs)` for a builtin method.
pub(crate) fn call_method<'a>(
    frame: &'a Frame,
    receiver: Value,
    name: Rc<str>,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> EvalFuture<'a, Value> {
    Box::pin(async move {
        match &receiver {
            Value::List(items) if &*name == "sort" => {
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
                no_kwargs("sort", &kwargs)?;
                exact::<0>("sort", args)?;
                let snapshot = items.borrow().clone();
                let sorted = sort_values(frame, snapshot, key, reverse).await?;
                *items.borrow_mut() = sorted;
                Ok(Value::None)
            }
            Value::Str(s) if &*name == "format" => Ok(Value::Str(str_format(s, &args, &kwargs)?.into())),
            _ => call_sync(&receiver, &name, args, kwargs),
        }
    })
}

fn call_sync(receiver: &Value, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
    match receiver {
        Value::Str(s) => {
            if matches!(name, "split" | "rsplit") {
                let sep = take_kwarg(&mut kwargs, "sep");
                let maxsplit = take_kwarg(&mut kwargs, "maxsplit");
                no_kwargs(name, &kwargs)?;
                let mut args = args.into_iter();
                return split(s, name == "rsplit", args.next().or(sep), args.next().or(maxsplit));
            }
            no_kwargs(name, &kwargs)?;
            str_method(s, name, args)
        }
        Value::List(_) => {
            no_kwargs(name, &kwargs)?;
            list_method(receiver, name, args)
        }
        Value::Dict(dict) => dict_method(dict, name, args, kwargs),
        Value::Tuple(items) => {
            no_kwargs(name, &kwargs)?;
            sequence_search(items, name, args, "tuple")
        }
        Value::Int(_) | Value::LongInt(_) | Value::Bool(_) if name == "bit_length" => {
            exact::<0>(name, args)?;
            let bits = match receiver {
                Value::LongInt(big) => big.bits(),
                other => u64::from(64 - other.as_index().unwrap_or(0).unsigned_abs().leading_zeros()),
            };
            Ok(Value::Int(i64::try_from(bits).unwrap_or(i64::MAX)))
        }
        Value::Float(f) if name == "is_integer" => {
            exact::<0>(name, args)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Value::Generator(generator) => {
            no_kwargs(name, &kwargs)?;
            let sent = match name {
                "send" => {
                    let [value] = exact::<1>(name, args)?;
                    value
                }
                _ => {
                    exact::<0>(name, args)?;
                    Value::None
                }
            };
            match generator.resume(sent)? {
                GenStep::Yielded(value) => Ok(value),
                GenStep::Complete(value) => Err(stop_iteration(value)),
            }
        }
        other => Err(ExcType::attribute_error(other.type_name(), name)),
    }
}

fn str_arg<'v>(method: &str, value: &'v Value) -> RunResult<&'v Rc<str>> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ExcType::type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn optional_chars(method: &str, args: &[Value]) -> RunResult<Option<Vec<char>>> {
    arity(method, args, 0, 1)?;
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(value) => Ok(Some(str_arg(method, value)?.chars().collect())),
    }
}

fn width_arg(method: &str, args: &[Value]) -> RunResult<(usize, char)> {
    arity(method, args, 1, 2)?;
    let width = args[0]
        .as_index()
        .ok_or_else(|| ExcType::type_error(format!("'{}' object cannot be interpreted as an integer", args[0].type_name())))?;
    let fill = match args.get(1) {
        None => ' ',
        Some(value) => {
            let s = str_arg(method, value)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(ExcType::type_error(
                        "The fill character must be exactly one character long",
                    ));
                }
            }
        }
    };
    Ok((usize::try_from(width).unwrap_or(0), fill))
}

fn new_str(s: impl Into<Rc<str>>) -> Value {
    Value::Str(s.into())
}

fn str_method(s: &Rc<str>, name: &str, args: Vec<Value>) -> RunResult<Value> {
    let bool_of = |f: fn(char) -> bool| -> RunResult<Value> { Ok(Value::Bool(!s.is_empty() && s.chars().all(f))) };
    match name {
        "upper" | "lower" | "title" | "capitalize" | "isalnum" | "isalpha" | "isdigit" | "isspace" | "splitlines" => {
            arity(name, &args, 0, 0)?;
        }
        "islower" | "isupper" => {
            arity(name, &args, 0, 0)?;
            let cased: Vec<char> = s.chars().filter(|c| c.is_lowercase() || c.is_uppercase()).collect();
            let want_lower = name == "islower";
            return Ok(Value::Bool(
                !cased.is_empty() && cased.iter().all(|c| c.is_lowercase() == want_lower),
            ));
        }
        _ => {}
    }
    match name {
        "upper" => Ok(new_str(s.to_uppercase())),
        "lower" => Ok(new_str(s.to_lowercase())),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut previous_cased = false;
            for c in s.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Ok(new_str(out))
        }
        "capitalize" => {
            let mut chars = s.chars();
            let out: String = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            };
            Ok(new_str(out))
        }
        "isalnum" => bool_of(char::is_alphanumeric),
        "isalpha" => bool_of(char::is_alphabetic),
        "isdigit" => bool_of(|c| c.is_ascii_digit()),
        "isspace" => bool_of(char::is_whitespace),
        "splitlines" => Ok(Value::list(s.lines().map(new_str).collect())),
        "strip" | "lstrip" | "rstrip" => {
            let chars = optional_chars(name, &args)?;
            let matches = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(&c));
            let out = match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(new_str(out))
        }
        "join" => {
            let [iterable] = exact::<1>(name, args)?;
            let mut out = String::new();
            for (i, item) in collect_values(&iterable)?.iter().enumerate() {
                let Value::Str(part) = item else {
                    return Err(ExcType::type_error(format!(
                        "sequence item {i}: expected str instance, {} found",
                        item.type_name()
                    )));
                };
                if i > 0 {
                    out.push_str(s);
                }
                out.push_str(part);
            }
            Ok(new_str(out))
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            match args.get(2).and_then(Value::as_index) {
                Some(count) if count >= 0 => Ok(new_str(s.replacen(&**old, new, usize::try_from(count).unwrap_or(0)))),
                _ => Ok(new_str(s.replace(&**old, new))),
            }
        }
        "startswith" | "endswith" => {
            let [prefix] = exact::<1>(name, args)?;
            let candidates = match &prefix {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let candidate = str_arg(name, candidate)?;
                let hit = if name == "startswith" {
                    s.starts_with(&**candidate)
                } else {
                    s.ends_with(&**candidate)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "rfind" | "index" => {
            let [needle] = exact::<1>(name, args)?;
            let needle = str_arg(name, &needle)?;
            let byte_index = if name == "rfind" { s.rfind(&**needle) } else { s.find(&**needle) };
            match byte_index {
                Some(byte_index) => Ok(Value::Int(
                    i64::try_from(s[..byte_index].chars().count()).unwrap_or(i64::MAX),
                )),
                None if name == "index" => Err(ExcType::ValueError.error("substring not found")),
                None => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            let [needle] = exact::<1>(name, args)?;
            let needle = str_arg(name, &needle)?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&**needle).count()
            };
            Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
        }
        "partition" => {
            let [sep] = exact::<1>(name, args)?;
            let sep = str_arg(name, &sep)?;
            if sep.is_empty() {
                return Err(ExcType::ValueError.error("empty separator"));
            }
            let parts = match s.split_once(&**sep) {
                Some((head, tail)) => vec![new_str(head), Value::Str(sep.clone()), new_str(tail)],
                None => vec![Value::Str(s.clone()), new_str(""), new_str("")],
            };
            Ok(Value::tuple(parts))
        }
        "center" | "ljust" | "rjust" => {
            let (width, fill) = width_arg(name, &args)?;
            let len = s.chars().count();
            if len >= width {
                return Ok(Value::Str(s.clone()));
            }
            let padding = width - len;
            let (left, right) = match name {
                "ljust" => (0, padding),
                "rjust" => (padding, 0),
                // CPython puts the odd extra character on the left when the width is odd.
                _ => {
                    let left = padding / 2 + (padding & width & 1);
                    (left, padding - left)
                }
            };
            let mut out: String = std::iter::repeat_n(fill, left).collect();
            out.push_str(s);
            out.extend(std::iter::repeat_n(fill, right));
            Ok(new_str(out))
        }
        "zfill" => {
            let [width] = exact::<1>(name, args)?;
            let width = usize::try_from(width.as_index().unwrap_or(0)).unwrap_or(0);
            let len = s.chars().count();
            if len >= width {
                return Ok(Value::Str(s.clone()));
            }
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", &**s),
            };
            let zeros = "0".repeat(width - len);
            Ok(new_str(format!("{sign}{zeros}{digits}")))
        }
        other => Err(ExcType::attribute_error("str", other)),
    }
}

fn split(s: &str, from_right: bool, sep: Option<Value>, maxsplit: Option<Value>) -> RunResult<Value> {
    let limit = match maxsplit.as_ref().and_then(Value::as_index) {
        Some(n) if n >= 0 => Some(usize::try_from(n).unwrap_or(usize::MAX)),
        _ => None,
    };
    let parts: Vec<String> = match sep {
        None | Some(Value::None) => {
            let words: Vec<&str> = s.split_whitespace().collect();
            match limit {
                Some(n) if n < words.len() => {
                    if from_right {
                        let trimmed = s.trim_end();
                        let mut rest = trimmed;
                        let mut tail = Vec::new();
                        for _ in 0..n {
                            let Some(idx) = rest.rfind(char::is_whitespace) else { break };
                            tail.push(rest[idx..].trim_start().to_owned());
                            rest = rest[..idx].trim_end();
                        }
                        tail.push(rest.trim_start().to_owned());
                        tail.reverse();
                        tail
                    } else {
                        let trimmed = s.trim_start();
                        let mut rest = trimmed;
                        let mut head = Vec::new();
                        for _ in 0..n {
                            let Some(idx) = rest.find(char::is_whitespace) else { break };
                            head.push(rest[..idx].to_owned());
                            rest = rest[idx..].trim_start();
                        }
                        head.push(rest.trim_end().to_owned());
                        head
                    }
                }
                _ => words.into_iter().map(str::to_owned).collect(),
            }
        }
        Some(Value::Str(sep)) => {
            if sep.is_empty() {
                return Err(ExcType::ValueError.error("empty separator"));
            }
            match (limit, from_right) {
                (Some(n), true) => {
                    let mut parts: Vec<String> = s.rsplitn(n + 1, &*sep).map(str::to_owned).collect();
                    parts.reverse();
                    parts
                }
                (Some(n), false) => s.splitn(n + 1, &*sep).map(str::to_owned).collect(),
                (None, _) => s.split(&*sep).map(str::to_owned).collect(),
            }
        }
        Some(other) => {
            return Err(ExcType::type_error(format!(
                "must be str or None, not {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::list(parts.into_iter().map(new_str).collect()))
}

fn list_method(receiver: &Value, name: &str, args: Vec<Value>) -> RunResult<Value> {
    let Value::List(items) = receiver else {
        return Err(ExcType::attribute_error(receiver.type_name(), name));
    };
    match name {
        "append" => {
            let [value] = exact::<1>(name, args)?;
            items.borrow_mut().push(value);
            Ok(Value::None)
        }
        "extend" => {
            let [iterable] = exact::<1>(name, args)?;
            let extra = collect_values(&iterable)?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let [index, value] = exact::<2>(name, args)?;
            let mut items = items.borrow_mut();
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let index = index.as_index().ok_or_else(|| {
                ExcType::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    index.type_name()
                ))
            })?;
            let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(usize::try_from(index).unwrap_or(0), value);
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ExcType::IndexError.error("pop from empty list"));
            }
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let index = args.first().and_then(Value::as_index).unwrap_or(-1);
            let index = if index < 0 { index + len } else { index };
            match usize::try_from(index).ok().filter(|i| *i < items.len()) {
                Some(index) => Ok(items.remove(index)),
                None => Err(ExcType::IndexError.error("pop index out of range")),
            }
        }
        "remove" => {
            let [value] = exact::<1>(name, args)?;
            let mut items = items.borrow_mut();
            match items.iter().position(|item| item.py_eq(&value)) {
                Some(index) => {
                    items.remove(index);
                    Ok(Value::None)
                }
                None => Err(ExcType::ValueError.error("list.remove(x): x not in list")),
            }
        }
        "clear" => {
            exact::<0>(name, args)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            exact::<0>(name, args)?;
            Ok(Value::list(items.borrow().clone()))
        }
        "reverse" => {
            exact::<0>(name, args)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        _ => {
            let snapshot = items.borrow().clone();
            sequence_search(&snapshot, name, args, "list")
        }
    }
}

/// `index` and `count`, shared by lists and tuples.
fn sequence_search(items: &[Value], name: &str, args: Vec<Value>, type_name: &str) -> RunResult<Value> {
    let [value] = exact::<1>(name, args)?;
    match name {
        "count" => {
            let count = items.iter().filter(|item| item.py_eq(&value)).count();
            Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
        }
        "index" => match items.iter().position(|item| item.py_eq(&value)) {
            Some(index) => Ok(Value::Int(i64::try_from(index).unwrap_or(i64::MAX))),
            None => Err(ExcType::ValueError.error(format!("{type_name}.index(x): x not in {type_name}"))),
        },
        other => Err(ExcType::attribute_error(type_name, other)),
    }
}

fn dict_method(dict: &Rc<RefCell<Dict>>, name: &str, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    if name == "update" {
        arity(name, &args, 0, 1)?;
        let mut merged = Dict::new();
        if let Some(source) = args.first() {
            match source {
                Value::Dict(source) => merged.update(&source.borrow()),
                other => {
                    for item in collect_values(other)? {
                        let [key, value] = exact::<2>("update", collect_values(&item)?)?;
                        merged.insert(key, value)?;
                    }
                }
            }
        }
        for (key, value) in kwargs {
            merged.insert_str(key, value);
        }
        dict.borrow_mut().update(&merged);
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let found = dict.borrow().get(&args[0])?.cloned();
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            exact::<0>(name, args)?;
            Ok(Value::list(dict.borrow().keys().cloned().collect()))
        }
        "values" => {
            exact::<0>(name, args)?;
            Ok(Value::list(dict.borrow().values().cloned().collect()))
        }
        "items" => {
            exact::<0>(name, args)?;
            Ok(Value::list(
                dict.borrow()
                    .iter()
                    .map(|(key, value)| Value::tuple(vec![key.clone(), value.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ExcType::key_error(&args[0])),
            }
        }
        "popitem" => {
            exact::<0>(name, args)?;
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((key, value)) => Ok(Value::tuple(vec![key, value])),
                None => Err(ExcType::KeyError.error("popitem(): dictionary is empty")),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let existing = dict.borrow().get(&args[0])?.cloned();
            match existing {
                Some(value) => Ok(value),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(args[0].clone(), default.clone())?;
                    Ok(default)
                }
            }
        }
        "clear" => {
            exact::<0>(name, args)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            exact::<0>(name, args)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        other => Err(ExcType::attribute_error("dict", other)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn s(text: &str) -> Value {
        Value::Str(text.into())
    }

    fn call(receiver: &Value, name: &str, args: Vec<Value>) -> Value {
        call_sync(receiver, name, args, Vec::new()).unwrap()
    }

    #[test]
    fn string_methods() {
        assert_eq!(call(&s("  hi  "), "strip", vec![]), s("hi"));
        assert_eq!(call(&s("xxhixx"), "strip", vec![s("x")]), s("hi"));
        assert_eq!(call(&s("hello world"), "title", vec![]), s("Hello World"));
        assert_eq!(call(&s("-"), "join", vec![Value::list(vec![s("a"), s("b")])]), s("a-b"));
        assert_eq!(call(&s("héllo"), "find", vec![s("l")]), Value::Int(2));
        assert_eq!(call(&s("ab"), "center", vec![Value::Int(5), s("*")]), s("**ab*"));
        assert_eq!(call(&s("-42"), "zfill", vec![Value::Int(6)]), s("-00042"));
    }

    #[test]
    fn splitting() {
        assert_eq!(
            call(&s(" a  b c "), "split", vec![]).py_repr(),
            "['a', 'b', 'c']"
        );
        assert_eq!(
            call(&s("a,b,,c"), "split", vec![s(",")]).py_repr(),
            "['a', 'b', '', 'c']"
        );
        assert_eq!(
            call(&s("a b c"), "rsplit", vec![Value::None, Value::Int(1)]).py_repr(),
            "['a b', 'c']"
        );
        assert_eq!(
            call(&s("a b c"), "split", vec![Value::None, Value::Int(1)]).py_repr(),
            "['a', 'b c']"
        );
    }

    #[test]
    fn join_rejects_non_strings() {
        let err = call_sync(&s(","), "join", vec![Value::list(vec![Value::Int(1)])], Vec::new()).unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "TypeError: sequence item 0: expected str instance, int found"
        );
    }

    #[test]
    fn list_methods_mutate_in_place() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        call(&list, "append", vec![Value::Int(3)]);
        call(&list, "insert", vec![Value::Int(0), Value::Int(0)]);
        assert_eq!(call(&list, "pop", vec![]), Value::Int(3));
        assert_eq!(list.py_repr(), "[0, 1, 2]");
        assert_eq!(call(&list, "index", vec![Value::Int(2)]), Value::Int(2));
        let err = call_sync(&list, "remove", vec![Value::Int(9)], Vec::new()).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::ValueError);
    }

    #[test]
    fn dict_methods() {
        let dict = Value::dict(Dict::new());
        call(&dict, "setdefault", vec![s("a"), Value::Int(1)]);
        assert_eq!(call(&dict, "get", vec![s("a")]), Value::Int(1));
        assert_eq!(call(&dict, "get", vec![s("b"), Value::Int(0)]), Value::Int(0));
        assert_eq!(call(&dict, "items", vec![]).py_repr(), "[('a', 1)]");
        assert_eq!(call(&dict, "pop", vec![s("a")]), Value::Int(1));
        let err = call_sync(&dict, "pop", vec![s("a")], Vec::new()).unwrap_err();
        assert_eq!(err.into_exception().summary(), "KeyError: 'a'");
    }

    #[test]
    fn method_tables() {
        assert!(has_method(&s(""), "upper"));
        assert!(has_method(&Value::list(vec![]), "sort"));
        assert!(!has_method(&Value::Int(1), "upper"));
    }
}
