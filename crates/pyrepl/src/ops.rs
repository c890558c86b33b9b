//! Operators and the attribute/subscript protocol for builtin values.

use std::{cmp::Ordering, rc::Rc};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    exception::{ExcType, RunError, RunResult},
    expressions::{CmpOperator, Operator, UnaryOperator},
    format::percent_format,
    function::BoundMethod,
    iter::PyIter,
    methods::has_method,
    value::{Number, Range, Value},
};

/// Results above this many bits raise instead of allocating.
const MAX_INT_BITS: u64 = 4_000_000;

pub(crate) fn binary_op(left: &Value, op: Operator, right: &Value) -> RunResult<Value> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return numeric_op(&a, op, &b).ok_or_else(|| unsupported_operands(left, op, right))?;
    }
    match (left, op, right) {
        (Value::Str(a), Operator::Add, Value::Str(b)) => Ok(Value::Str(format!("{a}{b}").into())),
        (Value::Str(s), Operator::Mult, n) | (n, Operator::Mult, Value::Str(s)) if n.as_index().is_some() => {
            let count = repeat_count(n);
            Ok(Value::Str(s.repeat(count).into()))
        }
        (Value::Str(template), Operator::Mod, args) => Ok(Value::Str(percent_format(template, args)?.into())),
        (Value::List(a), Operator::Add, Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(a), Operator::Add, Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::List(items), Operator::Mult, n) | (n, Operator::Mult, Value::List(items)) if n.as_index().is_some() => {
            Ok(Value::list(repeat_items(&items.borrow(), repeat_count(n))))
        }
        (Value::Tuple(items), Operator::Mult, n) | (n, Operator::Mult, Value::Tuple(items))
            if n.as_index().is_some() =>
        {
            Ok(Value::tuple(repeat_items(items, repeat_count(n))))
        }
        (Value::Dict(a), Operator::BitOr, Value::Dict(b)) => {
            let mut merged = a.borrow().clone();
            merged.update(&b.borrow());
            Ok(Value::dict(merged))
        }
        _ => Err(unsupported_operands(left, op, right)),
    }
}

/// In-place variant for `+=` and friends: lists extend themselves, everything else rebinds.
pub(crate) fn inplace_op(left: &Value, op: Operator, right: &Value) -> RunResult<Value> {
    if let (Value::List(items), Operator::Add) = (left, op) {
        let extra = crate::iter::collect_values(right)?;
        items.borrow_mut().extend(extra);
        return Ok(left.clone());
    }
    if let (Value::Dict(dict), Operator::BitOr, Value::Dict(other)) = (left, op, right) {
        if !Rc::ptr_eq(dict, other) {
            let other = other.borrow().clone();
            dict.borrow_mut().update(&other);
        }
        return Ok(left.clone());
    }
    binary_op(left, op, right)
}

fn repeat_count(n: &Value) -> usize {
    n.as_index().and_then(|n| usize::try_from(n).ok()).unwrap_or(0)
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len().saturating_mul(count));
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

fn unsupported_operands(left: &Value, op: Operator, right: &Value) -> RunError {
    ExcType::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

/// `None` means the operator doesn't apply to these numeric types.
fn numeric_op(a: &Number, op: Operator, b: &Number) -> Option<RunResult<Value>> {
    if matches!(a, Number::Float(_)) || matches!(b, Number::Float(_)) {
        return float_op(a.to_f64(), op, b.to_f64());
    }
    if let (Number::Int(x), Number::Int(y)) = (a, b)
        && let Some(result) = small_int_op(*x, op, *y)
    {
        return Some(result);
    }
    let (x, y) = (a.to_bigint()?, b.to_bigint()?);
    big_int_op(&x, op, &y)
}

fn float_op(a: f64, op: Operator, b: f64) -> Option<RunResult<Value>> {
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Some(Err(ExcType::ZeroDivisionError.error("float division by zero")));
            }
            a / b
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                return Some(Err(ExcType::ZeroDivisionError.error("float floor division by zero")));
            }
            (a / b).floor()
        }
        Operator::Mod => {
            if b == 0.0 {
                return Some(Err(ExcType::ZeroDivisionError.error("float modulo by zero")));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        Operator::Pow => {
            if a == 0.0 && b < 0.0 {
                return Some(Err(ExcType::ZeroDivisionError.error(
                    "0.0 cannot be raised to a negative power",
                )));
            }
            a.powf(b)
        }
        _ => return None,
    };
    Some(Ok(Value::Float(result)))
}

/// Fast path on `i64`; `None` when the result needs a big integer.
fn small_int_op(a: i64, op: Operator, b: i64) -> Option<RunResult<Value>> {
    let value = match op {
        Operator::Add => a.checked_add(b)?,
        Operator::Sub => a.checked_sub(b)?,
        Operator::Mult => a.checked_mul(b)?,
        Operator::Div => {
            if b == 0 {
                return Some(Err(ExcType::ZeroDivisionError.error("division by zero")));
            }
            return Some(Ok(Value::Float(a as f64 / b as f64)));
        }
        Operator::FloorDiv => {
            if b == 0 {
                return Some(Err(ExcType::ZeroDivisionError.error("integer division or modulo by zero")));
            }
            if a == i64::MIN && b == -1 {
                return None;
            }
            a.div_floor(&b)
        }
        Operator::Mod => {
            if b == 0 {
                return Some(Err(ExcType::ZeroDivisionError.error("integer modulo by zero")));
            }
            if b == -1 {
                0
            } else {
                a.mod_floor(&b)
            }
        }
        Operator::Pow => {
            if b < 0 {
                return Some(int_negative_pow(a.to_f64()?, b));
            }
            a.checked_pow(u32::try_from(b).ok()?)?
        }
        Operator::LShift => {
            if b < 0 {
                return Some(Err(ExcType::ValueError.error("negative shift count")));
            }
            let shift = u32::try_from(b).ok().filter(|s| *s < 63)?;
            let shifted = a.checked_shl(shift)?;
            if shifted >> shift != a {
                return None;
            }
            shifted
        }
        Operator::RShift => {
            if b < 0 {
                return Some(Err(ExcType::ValueError.error("negative shift count")));
            }
            a >> b.min(63)
        }
        Operator::BitAnd => a & b,
        Operator::BitOr => a | b,
        Operator::BitXor => a ^ b,
        Operator::MatMult => return Some(Err(ExcType::type_error("unsupported operand type(s) for @: 'int' and 'int'"))),
    };
    Some(Ok(Value::Int(value)))
}

fn int_negative_pow(base: f64, exponent: i64) -> RunResult<Value> {
    if base == 0.0 {
        return Err(ExcType::ZeroDivisionError.error("0.0 cannot be raised to a negative power"));
    }
    let exponent = i32::try_from(exponent).unwrap_or(i32::MIN);
    Ok(Value::Float(base.powi(exponent)))
}

fn big_int_op(a: &BigInt, op: Operator, b: &BigInt) -> Option<RunResult<Value>> {
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => {
            if a.bits() + b.bits() > MAX_INT_BITS {
                return Some(Err(too_large()));
            }
            a * b
        }
        Operator::Div => {
            if b.is_zero() {
                return Some(Err(ExcType::ZeroDivisionError.error("division by zero")));
            }
            let (x, y) = (a.to_f64()?, b.to_f64()?);
            return Some(Ok(Value::Float(x / y)));
        }
        Operator::FloorDiv => {
            if b.is_zero() {
                return Some(Err(ExcType::ZeroDivisionError.error("integer division or modulo by zero")));
            }
            a.div_floor(b)
        }
        Operator::Mod => {
            if b.is_zero() {
                return Some(Err(ExcType::ZeroDivisionError.error("integer modulo by zero")));
            }
            a.mod_floor(b)
        }
        Operator::Pow => {
            if b.is_negative() {
                return Some(int_negative_pow(a.to_f64()?, b.to_i64().unwrap_or(i64::MIN)));
            }
            let exponent = b.to_u32()?;
            if a.bits().saturating_mul(u64::from(exponent)) > MAX_INT_BITS {
                return Some(Err(too_large()));
            }
            a.pow(exponent)
        }
        Operator::LShift => {
            if b.is_negative() {
                return Some(Err(ExcType::ValueError.error("negative shift count")));
            }
            let shift = b.to_u64().filter(|s| a.bits() + s <= MAX_INT_BITS);
            match shift.and_then(|s| usize::try_from(s).ok()) {
                Some(shift) => a << shift,
                None => return Some(Err(too_large())),
            }
        }
        Operator::RShift => {
            if b.is_negative() {
                return Some(Err(ExcType::ValueError.error("negative shift count")));
            }
            let shift = b.to_usize().unwrap_or(usize::MAX).min(usize::try_from(a.bits()).unwrap_or(usize::MAX) + 1);
            a >> shift
        }
        Operator::BitAnd => a & b,
        Operator::BitOr => a | b,
        Operator::BitXor => a ^ b,
        Operator::MatMult => return None,
    };
    Some(Ok(Value::from_bigint(result)))
}

fn too_large() -> RunError {
    ExcType::OverflowError.error("integer result too large")
}

pub(crate) fn unary_op(op: UnaryOperator, operand: &Value) -> RunResult<Value> {
    match (op, operand.as_number()) {
        (UnaryOperator::Not, _) => Ok(Value::Bool(!operand.truthy())),
        (UnaryOperator::Pos, Some(Number::Int(i))) => Ok(Value::Int(i)),
        (UnaryOperator::Pos, Some(_)) => Ok(operand.clone()),
        (UnaryOperator::Neg, Some(Number::Int(i))) => Ok(i
            .checked_neg()
            .map_or_else(|| Value::from_bigint(-BigInt::from(i)), Value::Int)),
        (UnaryOperator::Neg, Some(Number::Big(b))) => Ok(Value::from_bigint(-(*b).clone())),
        (UnaryOperator::Neg, Some(Number::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOperator::Invert, Some(Number::Int(i))) => Ok(Value::Int(!i)),
        (UnaryOperator::Invert, Some(Number::Big(b))) => Ok(Value::from_bigint(!(*b).clone())),
        _ => {
            let symbol = match op {
                UnaryOperator::Neg => "-",
                UnaryOperator::Pos => "+",
                UnaryOperator::Invert | UnaryOperator::Not => "~",
            };
            Err(ExcType::type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                operand.type_name()
            )))
        }
    }
}

/// Evaluates one link of a comparison chain.
pub(crate) fn compare(op: CmpOperator, left: &Value, right: &Value) -> RunResult<bool> {
    let ordering = |accept: fn(Ordering) -> bool| -> RunResult<bool> {
        match left.py_cmp(right) {
            Some(ordering) => Ok(accept(ordering)),
            // NaN compares false with everything.
            None if left.as_number().is_some() && right.as_number().is_some() => Ok(false),
            None => Err(ExcType::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))),
        }
    };
    match op {
        CmpOperator::Eq => Ok(left.py_eq(right)),
        CmpOperator::NotEq => Ok(!left.py_eq(right)),
        CmpOperator::Is => Ok(left.is_same(right)),
        CmpOperator::IsNot => Ok(!left.is_same(right)),
        CmpOperator::In => contains(right, left),
        CmpOperator::NotIn => contains(right, left).map(|found| !found),
        CmpOperator::Lt => ordering(Ordering::is_lt),
        CmpOperator::LtE => ordering(Ordering::is_le),
        CmpOperator::Gt => ordering(Ordering::is_gt),
        CmpOperator::GtE => ordering(Ordering::is_ge),
    }
}

/// `item in container`.
pub(crate) fn contains(container: &Value, item: &Value) -> RunResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ExcType::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(dict) => dict.borrow().contains(item),
        Value::Range(range) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 => range_contains_float(range, *f),
            other => other.as_index().is_some_and(|i| range.contains(i)),
        }),
        Value::Generator(_) | Value::Iterator(_) => {
            let mut iter = PyIter::new(container)?;
            while let Some(value) = iter.next_value()? {
                if value.py_eq(item) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ExcType::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn get_attr(value: &Value, attr: &str) -> RunResult<Value> {
    let found = match value {
        Value::Instance(instance) => {
            if let Some(found) = instance.attrs.borrow().get_str(attr) {
                return Ok(found.clone());
            }
            if attr == "__class__" {
                return Ok(Value::Class(instance.class.clone()));
            }
            instance.class.lookup(attr).map(|found| match found {
                Value::Function(_) => Value::BoundMethod(Rc::new(BoundMethod {
                    receiver: value.clone(),
                    func: found,
                })),
                other => other,
            })
        }
        Value::Class(class) => {
            if attr == "__name__" {
                return Ok(Value::Str(class.name.clone()));
            }
            return class.lookup(attr).ok_or_else(|| {
                ExcType::AttributeError.error(format!("type object '{}' has no attribute '{attr}'", class.name))
            });
        }
        Value::Exception(exc) => match attr {
            "args" => Some(Value::tuple(exc.args.clone())),
            "__class__" => Some(match &exc.class {
                Some(class) => Value::Class(class.clone()),
                None => Value::ExcType(exc.exc_type),
            }),
            _ => None,
        },
        Value::Executor(handle) => match attr {
            "scope" => handle.scope().map(Value::Scope),
            "code" => Some(Value::Str(handle.code().clone())),
            _ => None,
        },
        Value::Scope(scope) => match attr {
            "globals" => Some(Value::Dict(scope.globals().clone())),
            "locals" => Some(Value::Dict(scope.locals().clone())),
            _ => None,
        },
        Value::Function(function) if attr == "__name__" => Some(Value::Str(function.def.name.clone())),
        Value::Builtin(builtin) if attr == "__name__" => Some(Value::Str(builtin.to_string().into())),
        Value::ExcType(exc_type) if attr == "__name__" => Some(Value::Str(exc_type.to_string().into())),
        _ => None,
    };
    if let Some(found) = found {
        return Ok(found);
    }
    if has_method(value, attr) {
        return Ok(Value::BuiltinMethod(Rc::new(crate::function::BuiltinMethod {
            receiver: value.clone(),
            name: attr.into(),
        })));
    }
    Err(ExcType::attribute_error(value.type_name(), attr))
}

pub(crate) fn set_attr(target: &Value, attr: &Rc<str>, value: Value) -> RunResult<()> {
    match target {
        Value::Instance(instance) => {
            instance.attrs.borrow_mut().insert_str(attr.clone(), value);
            Ok(())
        }
        Value::Class(class) => {
            class.namespace.borrow_mut().insert_str(attr.clone(), value);
            Ok(())
        }
        other => Err(ExcType::attribute_error(other.type_name(), attr)),
    }
}

pub(crate) fn del_attr(target: &Value, attr: &str) -> RunResult<()> {
    let removed = match target {
        Value::Instance(instance) => instance.attrs.borrow_mut().remove_str(attr),
        Value::Class(class) => class.namespace.borrow_mut().remove_str(attr),
        _ => None,
    };
    removed
        .map(drop)
        .ok_or_else(|| ExcType::attribute_error(target.type_name(), attr))
}

/// Bounds of `obj[lower:upper:step]`, unresolved against a length.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SliceSpec {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    /// `(start, stop, step)` clamped to a sequence of `len` items, like `slice.indices`.
    pub fn bounds(self, len: usize) -> RunResult<(i64, i64, i64)> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(ExcType::ValueError.error("slice step cannot be zero"));
        }
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        if step > 0 {
            let clamp = |x: i64| if x < 0 { (x.saturating_add(len)).max(0) } else { x.min(len) };
            Ok((self.lower.map_or(0, clamp), self.upper.map_or(len, clamp), step))
        } else {
            let clamp = |x: i64| if x < 0 { (x.saturating_add(len)).max(-1) } else { x.min(len - 1) };
            Ok((self.lower.map_or(len - 1, clamp), self.upper.map_or(-1, clamp), step))
        }
    }

    /// The indices this slice selects from a sequence of `len` items.
    pub fn indices(self, len: usize) -> RunResult<Vec<usize>> {
        let (start, stop, step) = self.bounds(len)?;
        let selected = Range { start, stop, step };
        Ok(selected.iter().filter_map(|i| usize::try_from(i).ok()).collect())
    }
}

/// `2.0 in range(5)` holds; floats past the i64 bounds never fall inside a range.
#[expect(clippy::cast_possible_truncation, reason = "integral and within i64 bounds")]
fn range_contains_float(range: &Range, value: f64) -> bool {
    (i64::MIN as f64..i64::MAX as f64).contains(&value) && range.contains(value as i64)
}

fn normalize_index(index: &Value, len: usize, type_name: &str) -> RunResult<usize> {
    let Some(i) = index.as_index() else {
        if matches!(index, Value::LongInt(_)) {
            return Err(ExcType::IndexError.error("cannot fit 'int' into an index-sized integer"));
        }
        return Err(ExcType::type_error(format!(
            "{type_name} indices must be integers or slices, not {}",
            index.type_name()
        )));
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let adjusted = if i < 0 { i + len_i } else { i };
    usize::try_from(adjusted)
        .ok()
        .filter(|&idx| idx < len)
        .ok_or_else(|| ExcType::IndexError.error(format!("{type_name} index out of range")))
}

pub(crate) fn get_item(object: &Value, index: &Value) -> RunResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let idx = normalize_index(index, items.len(), "list")?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = normalize_index(index, items.len(), "tuple")?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let count = s.chars().count();
            let idx = normalize_index(index, count, "string")?;
            Ok(s.chars().nth(idx).map_or(Value::None, |c| Value::Str(c.to_string().into())))
        }
        Value::Range(range) => {
            let idx = normalize_index(index, range.len(), "range object")?;
            Ok(range.get(idx).map_or(Value::None, Value::Int))
        }
        Value::Dict(dict) => dict
            .borrow()
            .get(index)?
            .cloned()
            .ok_or_else(|| ExcType::key_error(index)),
        other => Err(ExcType::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn get_slice(object: &Value, slice: SliceSpec) -> RunResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice.indices(items.len())?.into_iter().map(|i| items[i].clone()).collect();
            Ok(Value::list(picked))
        }
        Value::Tuple(items) => {
            let picked = slice.indices(items.len())?.into_iter().map(|i| items[i].clone()).collect();
            Ok(Value::tuple(picked))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice.indices(chars.len())?.into_iter().map(|i| chars[i]).collect();
            Ok(Value::Str(picked.into()))
        }
        Value::Range(range) => {
            let (start, stop, step) = slice.bounds(range.len())?;
            let at = |index: i64| i128::from(range.start) + i128::from(index) * i128::from(range.step);
            let sliced = (|| {
                Some(Range {
                    start: i64::try_from(at(start)).ok()?,
                    stop: i64::try_from(at(stop)).ok()?,
                    step: range.step.checked_mul(step)?,
                })
            })();
            sliced
                .map(Value::Range)
                .ok_or_else(|| ExcType::OverflowError.error("range slice bounds overflow"))
        }
        other => Err(ExcType::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_item(object: &Value, index: &Value, value: Value) -> RunResult<()> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = normalize_index(index, items.len(), "list")
                .map_err(|_| ExcType::IndexError.error("list assignment index out of range"))?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index.clone(), value).map(drop),
        other => Err(ExcType::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_slice(object: &Value, slice: SliceSpec, value: &Value) -> RunResult<()> {
    let Value::List(items) = object else {
        return Err(ExcType::type_error(format!(
            "'{}' object does not support item assignment",
            object.type_name()
        )));
    };
    let replacement = crate::iter::collect_values(value)?;
    let mut items = items.borrow_mut();
    let indices = slice.indices(items.len())?;
    if slice.step.unwrap_or(1) == 1 {
        let start = indices.first().copied().unwrap_or_else(|| {
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let lower = slice.lower.unwrap_or(0);
            let lower = if lower < 0 { (lower + len).max(0) } else { lower.min(len) };
            usize::try_from(lower).unwrap_or(0)
        });
        let end = start + indices.len();
        items.splice(start..end, replacement);
        return Ok(());
    }
    if indices.len() != replacement.len() {
        return Err(ExcType::ValueError.error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            indices.len()
        )));
    }
    for (i, item) in indices.into_iter().zip(replacement) {
        items[i] = item;
    }
    Ok(())
}

pub(crate) fn del_item(object: &Value, index: &Value) -> RunResult<()> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = normalize_index(index, items.len(), "list")
                .map_err(|_| ExcType::IndexError.error("list assignment index out of range"))?;
            items.remove(idx);
            Ok(())
        }
        Value::Dict(dict) => match dict.borrow_mut().remove(index)? {
            Some(_) => Ok(()),
            None => Err(ExcType::key_error(index)),
        },
        other => Err(ExcType::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

pub(crate) fn del_slice(object: &Value, slice: SliceSpec) -> RunResult<()> {
    let Value::List(items) = object else {
        return Err(ExcType::type_error(format!(
            "'{}' object doesn't support item deletion",
            object.type_name()
        )));
    };
    let mut items = items.borrow_mut();
    let mut indices = slice.indices(items.len())?;
    indices.sort_unstable();
    for i in indices.into_iter().rev() {
        items.remove(i);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn floor_division_and_modulo_round_down() {
        assert_eq!(binary_op(&int(-7), Operator::FloorDiv, &int(2)).unwrap(), int(-4));
        assert_eq!(binary_op(&int(-7), Operator::Mod, &int(2)).unwrap(), int(1));
        assert_eq!(
            binary_op(&Value::Float(-7.0), Operator::Mod, &int(2)).unwrap(),
            Value::Float(1.0)
        );
    }

    #[test]
    fn overflow_promotes_to_big_int() {
        let result = binary_op(&int(i64::MAX), Operator::Add, &int(1)).unwrap();
        assert_eq!(result.py_repr(), "9223372036854775808");
        let back = binary_op(&result, Operator::Sub, &int(1)).unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));
        assert_eq!(
            binary_op(&int(2), Operator::Pow, &int(100)).unwrap().py_repr(),
            "1267650600228229401496703205376"
        );
    }

    #[test]
    fn division_by_zero_messages() {
        let err = binary_op(&int(1), Operator::Div, &int(0)).unwrap_err();
        assert_eq!(err.into_exception().summary(), "ZeroDivisionError: division by zero");
        let err = binary_op(&int(1), Operator::FloorDiv, &int(0)).unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "ZeroDivisionError: integer division or modulo by zero"
        );
    }

    #[test]
    fn mixed_type_addition_fails() {
        let err = binary_op(&int(1), Operator::Add, &Value::Str("a".into())).unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn sequence_repetition() {
        let list = Value::list(vec![int(1)]);
        assert_eq!(binary_op(&int(3), Operator::Mult, &list).unwrap().py_repr(), "[1, 1, 1]");
        assert_eq!(
            binary_op(&Value::Str("ab".into()), Operator::Mult, &int(2)).unwrap(),
            Value::Str("abab".into())
        );
    }

    #[test]
    fn slices_follow_python_bounds() {
        let spec = SliceSpec {
            lower: None,
            upper: None,
            step: Some(-1),
        };
        assert_eq!(spec.indices(3).unwrap(), vec![2, 1, 0]);
        let spec = SliceSpec {
            lower: Some(-2),
            upper: Some(100),
            step: None,
        };
        assert_eq!(spec.indices(5).unwrap(), vec![3, 4]);
        let spec = SliceSpec {
            lower: Some(1),
            upper: None,
            step: Some(2),
        };
        assert_eq!(spec.indices(6).unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn range_membership_is_arithmetic() {
        let huge = Value::Range(Range {
            start: 0,
            stop: 1_000_000_000_000_000_000,
            step: 1,
        });
        assert!(contains(&huge, &int(100_000_000_000_000_000)).unwrap());
        assert!(!contains(&huge, &int(-1)).unwrap());
        assert!(contains(&huge, &Value::Float(3.0)).unwrap());
        assert!(!contains(&huge, &Value::Float(3.5)).unwrap());
        assert!(!contains(&huge, &Value::Float(1e300)).unwrap());
        let down = Value::Range(Range {
            start: 10,
            stop: -10,
            step: -3,
        });
        assert!(contains(&down, &int(-8)).unwrap());
        assert!(!contains(&down, &int(-10)).unwrap());
        assert!(!contains(&down, &int(9)).unwrap());
    }

    #[test]
    fn slicing_a_range_gives_a_range() {
        let range = Value::Range(Range {
            start: 0,
            stop: 10,
            step: 1,
        });
        let evens = SliceSpec {
            lower: None,
            upper: None,
            step: Some(2),
        };
        assert_eq!(get_slice(&range, evens).unwrap().py_repr(), "range(0, 10, 2)");
        let reversed = SliceSpec {
            lower: None,
            upper: None,
            step: Some(-1),
        };
        assert_eq!(get_slice(&range, reversed).unwrap().py_repr(), "range(9, -1, -1)");
    }

    #[test]
    fn slice_assignment_splices() {
        let list = Value::list(vec![int(1), int(2), int(3)]);
        let spec = SliceSpec {
            lower: Some(1),
            upper: Some(2),
            step: None,
        };
        set_slice(&list, spec, &Value::list(vec![int(7), int(8)])).unwrap();
        assert_eq!(list.py_repr(), "[1, 7, 8, 3]");
    }

    #[test]
    fn comparisons_between_unrelated_types_fail() {
        let err = compare(CmpOperator::Lt, &int(1), &Value::Str("a".into())).unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "TypeError: '<' not supported between instances of 'int' and 'str'"
        );
        assert!(compare(CmpOperator::In, &int(2), &Value::list(vec![int(1), int(2)])).unwrap());
    }

    #[test]
    fn negative_index_reads_from_end() {
        let tuple = Value::tuple(vec![int(1), int(2), int(3)]);
        assert_eq!(get_item(&tuple, &int(-1)).unwrap(), int(3));
        let err = get_item(&tuple, &int(3)).unwrap_err();
        assert_eq!(err.into_exception().summary(), "IndexError: tuple index out of range");
    }
}
