use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{dict::Dict, value::Value};

/// Named values supplied by a host, in insertion order.
pub type Namespace = IndexMap<String, Value>;

/// The global and local namespaces a unit of REPL code runs against.
///
/// A `Scope` is a handle: clones share the same two mappings, the way every
/// reference to a Python object does. Use [`Scope::fork`] for an independent copy.
///
/// ```
/// use pyrepl::{Scope, Namespace, Value};
///
/// let scope = Scope::new();
/// let mut vars = Namespace::new();
/// vars.insert("answer".to_owned(), Value::Int(42));
/// scope.update_globals(&vars);
/// assert_eq!(scope.get_global("answer"), Some(Value::Int(42)));
/// scope.clear_intersection(&vars);
/// assert!(!scope.contains_global("answer"));
/// ```
#[derive(Clone, Default)]
pub struct Scope {
    globals: Rc<RefCell<Dict>>,
    locals: Rc<RefCell<Dict>>,
}

impl Scope {
    /// An empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope pre-seeded with the given globals and locals.
    #[must_use]
    pub fn from_namespaces(globals: &Namespace, locals: &Namespace) -> Self {
        let scope = Self::new();
        scope.update_globals(globals);
        scope.update_locals(locals);
        scope
    }

    /// A deep copy of both mappings, no longer shared with `self`.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            globals: Rc::new(RefCell::new(self.globals.borrow().clone())),
            locals: Rc::new(RefCell::new(self.locals.borrow().clone())),
        }
    }

    /// Removes every key of `mapping` whose current value *is* the value in `mapping`,
    /// from both globals and locals.
    ///
    /// Keys that user code rebound to a different object are left alone.
    pub fn clear_intersection(&self, mapping: &Namespace) -> &Self {
        for (key, value) in mapping {
            for namespace in [&self.globals, &self.locals] {
                let mut namespace = namespace.borrow_mut();
                if namespace.get_str(key).is_some_and(|current| current.is_same(value)) {
                    namespace.remove_str(key);
                }
            }
        }
        self
    }

    /// Merges both mappings of `other` into this scope.
    pub fn update(&self, other: &Self) -> &Self {
        if !Rc::ptr_eq(&self.globals, &other.globals) {
            let other_globals = other.globals.borrow();
            self.globals.borrow_mut().update(&other_globals);
        }
        if !Rc::ptr_eq(&self.locals, &other.locals) {
            let other_locals = other.locals.borrow();
            self.locals.borrow_mut().update(&other_locals);
        }
        self
    }

    pub fn update_globals(&self, mapping: &Namespace) -> &Self {
        let mut globals = self.globals.borrow_mut();
        for (key, value) in mapping {
            globals.insert_str(key.as_str(), value.clone());
        }
        self
    }

    pub fn update_locals(&self, mapping: &Namespace) -> &Self {
        let mut locals = self.locals.borrow_mut();
        for (key, value) in mapping {
            locals.insert_str(key.as_str(), value.clone());
        }
        self
    }

    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get_str(name).cloned()
    }

    #[must_use]
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.locals.borrow().get_str(name).cloned()
    }

    #[must_use]
    pub fn contains_global(&self, name: &str) -> bool {
        self.globals.borrow().contains_str(name)
    }

    #[must_use]
    pub fn contains_local(&self, name: &str) -> bool {
        self.locals.borrow().contains_str(name)
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals.borrow_mut().insert_str(name, value);
    }

    pub fn set_local(&self, name: &str, value: Value) {
        self.locals.borrow_mut().insert_str(name, value);
    }

    /// Global names in insertion order.
    #[must_use]
    pub fn global_names(&self) -> Vec<String> {
        names(&self.globals.borrow())
    }

    /// Local names in insertion order.
    #[must_use]
    pub fn local_names(&self) -> Vec<String> {
        names(&self.locals.borrow())
    }

    #[must_use]
    pub fn globals_len(&self) -> usize {
        self.globals.borrow().len()
    }

    #[must_use]
    pub fn locals_len(&self) -> usize {
        self.locals.borrow().len()
    }

    /// The live globals mapping, as seen by executing code.
    #[must_use]
    pub fn globals(&self) -> &Rc<RefCell<Dict>> {
        &self.globals
    }

    /// The live locals mapping.
    #[must_use]
    pub fn locals(&self) -> &Rc<RefCell<Dict>> {
        &self.locals
    }

    pub(crate) fn identity(&self) -> *const () {
        Rc::as_ptr(&self.globals).cast()
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope {
            globals: Rc::downgrade(&self.globals),
            locals: Rc::downgrade(&self.locals),
        }
    }
}

/// A scope reference that does not keep the mappings alive.
///
/// Held by values that end up stored inside the scope they point at, such as
/// the executor handle, so a retained scope does not own itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct WeakScope {
    globals: Weak<RefCell<Dict>>,
    locals: Weak<RefCell<Dict>>,
}

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        Some(Scope {
            globals: self.globals.upgrade()?,
            locals: self.locals.upgrade()?,
        })
    }
}

fn names(dict: &Dict) -> Vec<String> {
    dict.keys().map(Value::py_str).collect()
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("globals", &self.global_names())
            .field("locals", &self.local_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn namespace(pairs: &[(&str, Value)]) -> Namespace {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    #[test]
    fn clones_alias_and_forks_do_not() {
        let scope = Scope::new();
        let alias = scope.clone();
        let fork = scope.fork();
        scope.set_global("a", Value::Int(1));
        assert_eq!(alias.get_global("a"), Some(Value::Int(1)));
        assert_eq!(fork.get_global("a"), None);
    }

    #[test]
    fn clear_intersection_only_removes_identical_values() {
        let marker = Value::list(vec![]);
        let scope = Scope::from_namespaces(
            &namespace(&[("kept", Value::list(vec![])), ("gone", marker.clone())]),
            &namespace(&[("gone", marker.clone())]),
        );
        scope.clear_intersection(&namespace(&[("kept", Value::list(vec![])), ("gone", marker)]));
        assert_eq!(scope.global_names(), vec!["kept".to_owned()]);
        assert!(scope.local_names().is_empty());
    }

    #[test]
    fn update_with_itself_is_a_no_op() {
        let scope = Scope::new();
        scope.set_local("x", Value::Int(3));
        scope.update(&scope.clone());
        assert_eq!(scope.locals_len(), 1);
    }
}
