use std::{
    hash::{Hash, Hasher},
    rc::Rc,
};

use ahash::RandomState;
use indexmap::{Equivalent, IndexMap};
use num_bigint::BigInt;
use num_traits::FromPrimitive;

use crate::{
    exception::{ExcType, RunResult},
    value::Value,
};

/// Hashable projection of a [`Value`], used as the dict key.
///
/// Numbers are normalised so that `1`, `1.0` and `True` share a key, as in Python.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DictKey {
    None,
    Ellipsis,
    Int(i64),
    LongInt(BigInt),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<DictKey>),
    /// Builtin functions, types and exception classes, by name.
    Named(&'static str),
    /// Heap objects hashed by identity.
    Identity(usize),
}

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::None => 0u8.hash(state),
            Self::Ellipsis => 1u8.hash(state),
            Self::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::LongInt(i) => {
                3u8.hash(state);
                i.hash(state);
            }
            Self::Float(bits) => {
                4u8.hash(state);
                bits.hash(state);
            }
            Self::Str(s) => {
                5u8.hash(state);
                s.hash(state);
            }
            Self::Tuple(items) => {
                6u8.hash(state);
                items.hash(state);
            }
            Self::Named(name) => {
                7u8.hash(state);
                name.hash(state);
            }
            Self::Identity(ptr) => {
                8u8.hash(state);
                ptr.hash(state);
            }
        }
    }
}

/// Integral floats share the key of the equal int, big or small.
#[expect(clippy::cast_possible_truncation, reason = "checked integral and in range")]
fn float_key(f: f64) -> DictKey {
    if f.fract() != 0.0 || !f.is_finite() {
        return DictKey::Float(f.to_bits());
    }
    if f >= i64::MIN as f64 && f < i64::MAX as f64 {
        return DictKey::Int(f as i64);
    }
    BigInt::from_f64(f).map_or(DictKey::Float(f.to_bits()), DictKey::LongInt)
}

/// Borrowed string key, so name lookups don't allocate.
struct StrKey<'a>(&'a str);

impl Hash for StrKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        5u8.hash(state);
        self.0.hash(state);
    }
}

impl Equivalent<DictKey> for StrKey<'_> {
    fn equivalent(&self, key: &DictKey) -> bool {
        matches!(key, DictKey::Str(s) if &**s == self.0)
    }
}

impl DictKey {
    pub fn from_value(value: &Value) -> RunResult<Self> {
        Ok(match value {
            Value::None => Self::None,
            Value::Ellipsis => Self::Ellipsis,
            Value::Bool(b) => Self::Int(i64::from(*b)),
            Value::Int(i) => Self::Int(*i),
            Value::LongInt(i) => Self::LongInt((**i).clone()),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => Self::Str(s.clone()),
            Value::Tuple(items) => Self::Tuple(items.iter().map(Self::from_value).collect::<RunResult<_>>()?),
            Value::Builtin(b) => Self::Named(b.into()),
            Value::ExcType(e) => Self::Named(e.into()),
            Value::List(_) | Value::Dict(_) => return Err(ExcType::unhashable(&value.type_name())),
            other => match other.identity() {
                Some(ptr) => Self::Identity(ptr),
                None => return Err(ExcType::unhashable(&other.type_name())),
            },
        })
    }
}

/// An insertion-ordered Python dict.
///
/// Keeps the original key [`Value`] next to the value so iteration yields
/// keys as they were inserted (`True` stays `True` even though it hashes as `1`).
#[derive(Debug, Clone, Default)]
pub struct Dict {
    map: IndexMap<DictKey, (Value, Value), RandomState>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.map.get(&StrKey(key)).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains_str(&self, key: &str) -> bool {
        self.map.contains_key(&StrKey(key))
    }

    /// Inserts under a string key, returning the previous value.
    pub fn insert_str(&mut self, key: impl Into<Rc<str>>, value: Value) -> Option<Value> {
        let key: Rc<str> = key.into();
        self.map
            .insert(DictKey::Str(key.clone()), (Value::Str(key), value))
            .map(|(_, old)| old)
    }

    /// Removes a string key, preserving the order of the remaining entries.
    pub fn remove_str(&mut self, key: &str) -> Option<Value> {
        self.map.shift_remove(&StrKey(key)).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.map.values().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.map.values().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.values().map(|(k, v)| (k, v))
    }

    /// Merges every entry of `other` into `self`, overwriting existing keys.
    pub fn update(&mut self, other: &Self) {
        for (key, entry) in &other.map {
            self.map.insert(key.clone(), entry.clone());
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub(crate) fn get(&self, key: &Value) -> RunResult<Option<&Value>> {
        let key = DictKey::from_value(key)?;
        Ok(self.map.get(&key).map(|(_, v)| v))
    }

    pub(crate) fn contains(&self, key: &Value) -> RunResult<bool> {
        Ok(self.map.contains_key(&DictKey::from_value(key)?))
    }

    pub(crate) fn insert(&mut self, key: Value, value: Value) -> RunResult<Option<Value>> {
        let hashed = DictKey::from_value(&key)?;
        Ok(match self.map.get_mut(&hashed) {
            // CPython keeps the first key object on overwrite.
            Some(entry) => Some(std::mem::replace(&mut entry.1, value)),
            None => {
                self.map.insert(hashed, (key, value));
                None
            }
        })
    }

    pub(crate) fn remove(&mut self, key: &Value) -> RunResult<Option<Value>> {
        let key = DictKey::from_value(key)?;
        Ok(self.map.shift_remove(&key).map(|(_, v)| v))
    }

    /// Removes and returns the most recently inserted entry.
    pub(crate) fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.map.pop().map(|(_, entry)| entry)
    }
}

impl FromIterator<(Rc<str>, Value)> for Dict {
    fn from_iter<T: IntoIterator<Item = (Rc<str>, Value)>>(iter: T) -> Self {
        let mut dict = Self::new();
        for (key, value) in iter {
            dict.insert_str(key, value);
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn numeric_keys_share_slots() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::Str("int".into())).unwrap();
        dict.insert(Value::Float(1.0), Value::Str("float".into())).unwrap();
        dict.insert(Value::Bool(true), Value::Str("bool".into())).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.keys().next(), Some(&Value::Int(1)));
        assert_eq!(dict.get(&Value::Int(1)).unwrap(), Some(&Value::Str("bool".into())));
    }

    #[test]
    fn integral_floats_find_big_int_keys() {
        let big = BigInt::from(2u8).pow(70);
        let mut dict = Dict::new();
        dict.insert(Value::from_bigint(big), Value::Int(1)).unwrap();
        assert_eq!(dict.get(&Value::Float(2f64.powi(70))).unwrap(), Some(&Value::Int(1)));
        assert_eq!(dict.get(&Value::Float(2f64.powi(70) * 1.5)).unwrap(), None);
        dict.insert(Value::Float(f64::INFINITY), Value::Int(2)).unwrap();
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn string_lookup_matches_value_lookup() {
        let mut dict = Dict::new();
        dict.insert(Value::Str("name".into()), Value::Int(3)).unwrap();
        assert_eq!(dict.get_str("name"), Some(&Value::Int(3)));
        assert!(dict.contains_str("name"));
        assert_eq!(dict.remove_str("name"), Some(Value::Int(3)));
        assert!(dict.is_empty());
    }

    #[test]
    fn lists_are_unhashable() {
        let mut dict = Dict::new();
        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::TypeError);
    }

    #[test]
    fn removal_preserves_order() {
        let mut dict: Dict = ["a", "b", "c"]
            .into_iter()
            .enumerate()
            .map(|(i, k)| (Rc::from(k), Value::Int(i64::try_from(i).unwrap())))
            .collect();
        dict.remove_str("b");
        let keys: Vec<String> = dict.keys().map(Value::py_str).collect();
        assert_eq!(keys, vec!["a".to_owned(), "c".to_owned()]);
    }
}
