use std::{cell::RefCell, rc::Rc, vec};

use crate::{
    exception::{ExcType, RunResult},
    generator::Generator,
    value::{Range, Value},
};

/// A Python iterator over a builtin iterable.
///
/// Containers are snapshotted when iteration starts; generators are resumed lazily.
#[derive(Debug)]
pub struct PyIter {
    kind: IterKind,
}

#[derive(Debug)]
enum IterKind {
    Items(vec::IntoIter<Value>),
    Range { range: Range, index: usize },
    Generator(Rc<Generator>),
    /// An iterator object shared with user code, e.g. the result of `iter()`.
    Shared(Rc<RefCell<PyIter>>),
}

impl PyIter {
    /// `iter(value)`.
    pub(crate) fn new(value: &Value) -> RunResult<Self> {
        let kind = match value {
            Value::List(items) => IterKind::Items(items.borrow().clone().into_iter()),
            Value::Tuple(items) => IterKind::Items(items.to_vec().into_iter()),
            Value::Str(s) => IterKind::Items(
                s.chars()
                    .map(|c| Value::Str(c.to_string().into()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::Dict(dict) => IterKind::Items(dict.borrow().keys().cloned().collect::<Vec<_>>().into_iter()),
            Value::Range(range) => IterKind::Range {
                range: *range,
                index: 0,
            },
            Value::Generator(generator) if !generator.is_async() => IterKind::Generator(generator.clone()),
            Value::Iterator(shared) => IterKind::Shared(shared.clone()),
            other => return Err(ExcType::not_iterable(&other.type_name())),
        };
        Ok(Self { kind })
    }

    /// The iterator `async for` uses: only async generators qualify.
    pub(crate) fn new_async(value: &Value) -> RunResult<Self> {
        match value {
            Value::Generator(generator) if generator.is_async() => Ok(Self {
                kind: IterKind::Generator(generator.clone()),
            }),
            other => Err(ExcType::type_error(format!(
                "'async for' requires an object with __aiter__ method, got {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn from_items(items: Vec<Value>) -> Self {
        Self {
            kind: IterKind::Items(items.into_iter()),
        }
    }

    /// The next item, `None` when exhausted.
    pub(crate) fn next_value(&mut self) -> RunResult<Option<Value>> {
        match &mut self.kind {
            IterKind::Items(items) => Ok(items.next()),
            IterKind::Range { range, index } => {
                let value = range.get(*index);
                *index += 1;
                Ok(value.map(Value::Int))
            }
            IterKind::Generator(generator) => generator.next_value(),
            IterKind::Shared(shared) => shared
                .try_borrow_mut()
                .map_err(|_| ExcType::ValueError.error("generator already executing"))?
                .next_value(),
        }
    }
}

/// Drains any iterable into a vector, as `list(value)` would.
pub(crate) fn collect_values(value: &Value) -> RunResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => {
            let mut iter = PyIter::new(other)?;
            let mut items = Vec::new();
            while let Some(item) = iter.next_value()? {
                items.push(item);
            }
            Ok(items)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dict::Dict;

    #[test]
    fn strings_iterate_by_character() {
        let items = collect_values(&Value::Str("hé".into())).unwrap();
        assert_eq!(items, vec![Value::Str("h".into()), Value::Str("é".into())]);
    }

    #[test]
    fn dicts_iterate_over_keys_in_order() {
        let mut dict = Dict::new();
        dict.insert_str("b", Value::Int(1));
        dict.insert_str("a", Value::Int(2));
        let items = collect_values(&Value::dict(dict)).unwrap();
        assert_eq!(items, vec![Value::Str("b".into()), Value::Str("a".into())]);
    }

    #[test]
    fn shared_iterators_advance_together() {
        let shared = Rc::new(RefCell::new(PyIter::from_items(vec![Value::Int(1), Value::Int(2)])));
        let mut first = PyIter::new(&Value::Iterator(shared.clone())).unwrap();
        assert_eq!(first.next_value().unwrap(), Some(Value::Int(1)));
        let rest = collect_values(&Value::Iterator(shared)).unwrap();
        assert_eq!(rest, vec![Value::Int(2)]);
    }

    #[test]
    fn ints_are_not_iterable() {
        let err = PyIter::new(&Value::Int(3)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::TypeError);
    }
}
