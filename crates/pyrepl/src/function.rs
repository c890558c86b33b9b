use std::{borrow::Cow, cell::RefCell, fmt, rc::Rc};

use crate::{
    dict::Dict,
    exception::{ExcType, Exception, RunError, RunResult},
    expressions::{FunctionDef, Param},
    value::Value,
};

/// The locals of an enclosing function, captured by a nested one.
#[derive(Clone)]
pub(crate) struct Env {
    pub def: Rc<FunctionDef>,
    pub locals: Rc<RefCell<Dict>>,
}

impl Env {
    /// Whether this enclosing function owns `name`.
    pub fn binds(&self, name: &str) -> bool {
        self.def.scope.binds(name)
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env").field("function", &self.def.name).finish_non_exhaustive()
    }
}

/// A user function: a definition plus everything captured when `def` ran.
pub struct Function {
    pub(crate) def: Rc<FunctionDef>,
    /// Defaults for positional parameters, aligned with `Signature::positional`.
    pub(crate) defaults: Vec<Option<Value>>,
    /// Defaults for keyword-only parameters, aligned with `Signature::kw_only`.
    pub(crate) kw_defaults: Vec<Option<Value>>,
    pub(crate) globals: Rc<RefCell<Dict>>,
    pub(crate) closure: Vec<Env>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.def.name)
            .field("is_async", &self.def.is_async)
            .finish_non_exhaustive()
    }
}

impl Function {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Binds call arguments to parameter names, following CPython's rules and error messages.
    pub(crate) fn bind_arguments(&self, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Dict> {
        let signature = &self.def.signature;
        let name = &self.def.name;
        let positional: Vec<&Param> = signature.positional().collect();
        let mut locals = Dict::new();

        let given = args.len();
        let mut extra = Vec::new();
        for (i, value) in args.into_iter().enumerate() {
            match positional.get(i) {
                Some(param) => {
                    locals.insert_str(param.name.clone(), value);
                }
                None => extra.push(value),
            }
        }
        if let Some(var_args) = &signature.var_args {
            locals.insert_str(var_args.clone(), Value::tuple(extra));
        } else if !extra.is_empty() {
            return Err(too_many_positional(name, &positional, given));
        }

        let mut var_kwargs = Dict::new();
        for (key, value) in kwargs {
            let is_named = signature.args.iter().chain(&signature.kw_only).any(|p| p.name == key);
            if is_named {
                if locals.contains_str(&key) {
                    return Err(ExcType::type_error(format!(
                        "{name}() got multiple values for argument '{key}'"
                    )));
                }
                locals.insert_str(key, value);
            } else if signature.var_kwargs.is_some() {
                var_kwargs.insert_str(key, value);
            } else if signature.pos_only.iter().any(|p| p.name == key) {
                return Err(ExcType::type_error(format!(
                    "{name}() got some positional-only arguments passed as keyword arguments: '{key}'"
                )));
            } else {
                return Err(ExcType::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
        }

        let mut missing = Vec::new();
        for (param, default) in positional.iter().zip(&self.defaults) {
            if !locals.contains_str(&param.name) {
                match default {
                    Some(default) => {
                        locals.insert_str(param.name.clone(), default.clone());
                    }
                    None => missing.push(param.name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(name, "positional", &missing));
        }
        for (param, default) in signature.kw_only.iter().zip(&self.kw_defaults) {
            if !locals.contains_str(&param.name) {
                match default {
                    Some(default) => {
                        locals.insert_str(param.name.clone(), default.clone());
                    }
                    None => missing.push(param.name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(name, "keyword-only", &missing));
        }

        if let Some(var_kwargs_name) = &signature.var_kwargs {
            locals.insert_str(var_kwargs_name.clone(), Value::dict(var_kwargs));
        }
        Ok(locals)
    }
}

fn too_many_positional(name: &str, positional: &[&Param], given: usize) -> RunError {
    let required = positional.iter().filter(|p| p.default.is_none()).count();
    let total = positional.len();
    let expected = if required == total {
        format!("{total} positional argument{}", plural(total))
    } else {
        format!("from {required} to {total} positional arguments")
    };
    let was = if given == 1 { "was" } else { "were" };
    ExcType::type_error(format!("{name}() takes {expected} but {given} {was} given"))
}

/// CPython: "f() missing 2 required positional arguments: 'a' and 'b'"
fn missing_arguments(name: &str, kind: &str, missing: &[Rc<str>]) -> RunError {
    let quoted: Vec<String> = missing.iter().map(|m| format!("'{m}'")).collect();
    let names = match quoted.as_slice() {
        [only] => only.clone(),
        [init @ .., last] if init.len() == 1 => format!("{} and {last}", init[0]),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
        [] => String::new(),
    };
    ExcType::type_error(format!(
        "{name}() missing {} required {kind} argument{}: {names}",
        missing.len(),
        plural(missing.len())
    ))
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// A function bound to the instance it was looked up on.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub func: Value,
}

impl BoundMethod {
    #[must_use]
    pub fn name(&self) -> Cow<'_, str> {
        match &self.func {
            Value::Function(function) => Cow::Borrowed(function.name()),
            other => Cow::Owned(other.py_repr()),
        }
    }
}

/// A method of a builtin value, resolved by name when called.
#[derive(Debug)]
pub struct BuiltinMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value, Exception>;

/// A Rust closure callable from Python code, for hosts exposing their own helpers.
pub struct NativeFunction {
    pub name: Rc<str>,
    func: Box<NativeFn>,
}

impl NativeFunction {
    #[must_use]
    pub fn new(name: &str, func: impl Fn(&[Value]) -> Result<Value, Exception> + 'static) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub(crate) fn call(&self, args: &[Value]) -> RunResult<Value> {
        (self.func)(args).map_err(Into::into)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Value {
    /// Wraps a Rust closure as a Python callable.
    #[must_use]
    pub fn native(name: &str, func: impl Fn(&[Value]) -> Result<Value, Exception> + 'static) -> Self {
        Self::Native(Rc::new(NativeFunction::new(name, func)))
    }
}

/// A user-defined class.
///
/// Attribute lookup walks the class, then its bases depth-first, left to right.
pub struct Class {
    pub name: Rc<str>,
    pub bases: Vec<Rc<Class>>,
    /// The builtin exception this class ultimately derives from, if any.
    pub exc_base: Option<ExcType>,
    pub namespace: RefCell<Dict>,
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("exc_base", &self.exc_base)
            .finish_non_exhaustive()
    }
}

impl Class {
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.namespace.borrow().get_str(name) {
            return Some(value.clone());
        }
        self.bases.iter().find_map(|base| base.lookup(name))
    }

    #[must_use]
    pub fn is_subclass_of(&self, other: &Rc<Self>) -> bool {
        std::ptr::eq(self, Rc::as_ptr(other)) || self.bases.iter().any(|base| base.is_subclass_of(other))
    }
}

/// An instance of a user class.
pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<Dict>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("class", &self.class.name).finish_non_exhaustive()
    }
}

impl Instance {
    #[must_use]
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            attrs: RefCell::new(Dict::new()),
        }
    }
}
