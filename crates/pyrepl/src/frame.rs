use std::{cell::RefCell, rc::Rc, str::FromStr};

use crate::{
    builtins::Builtin,
    dict::Dict,
    exception::{ExcType, ExceptionValue, RunResult},
    expressions::FunctionDef,
    function::{Env, Function},
    generator::YieldSlot,
    runtime::Runtime,
    value::Value,
};

pub(crate) enum FrameKind {
    /// Code run with an explicit locals mapping: the unit template, `exec`-style.
    Module,
    Class,
    Function(Rc<FunctionDef>),
}

/// One activation: the namespaces a block of code reads and writes.
pub(crate) struct Frame {
    pub runtime: Rc<Runtime>,
    /// Name shown in tracebacks.
    pub name: Rc<str>,
    pub kind: FrameKind,
    pub locals: Rc<RefCell<Dict>>,
    pub globals: Rc<RefCell<Dict>>,
    /// Enclosing function scopes, outermost first.
    pub closure: Vec<Env>,
    /// Set for generator and async generator bodies.
    pub yield_slot: Option<Rc<YieldSlot>>,
    /// Comprehension variables, innermost last; they shadow everything else.
    comprehension: RefCell<Vec<Dict>>,
    /// Exceptions currently being handled, for bare `raise`.
    handling: RefCell<Vec<Rc<ExceptionValue>>>,
}

impl Frame {
    pub fn module(runtime: Rc<Runtime>, globals: Rc<RefCell<Dict>>, locals: Rc<RefCell<Dict>>) -> Self {
        Self::build(runtime, "<module>".into(), FrameKind::Module, locals, globals, Vec::new())
    }

    pub fn class(&self, name: Rc<str>) -> Self {
        Self::build(
            self.runtime.clone(),
            name,
            FrameKind::Class,
            Rc::new(RefCell::new(Dict::new())),
            self.globals.clone(),
            self.closure_for_child(),
        )
    }

    pub fn function(runtime: Rc<Runtime>, function: &Function, locals: Dict, yield_slot: Option<Rc<YieldSlot>>) -> Self {
        let mut frame = Self::build(
            runtime,
            function.def.name.clone(),
            FrameKind::Function(function.def.clone()),
            Rc::new(RefCell::new(locals)),
            function.globals.clone(),
            function.closure.clone(),
        );
        frame.yield_slot = yield_slot;
        frame
    }

    fn build(
        runtime: Rc<Runtime>,
        name: Rc<str>,
        kind: FrameKind,
        locals: Rc<RefCell<Dict>>,
        globals: Rc<RefCell<Dict>>,
        closure: Vec<Env>,
    ) -> Self {
        Self {
            runtime,
            name,
            kind,
            locals,
            globals,
            closure,
            yield_slot: None,
            comprehension: RefCell::new(Vec::new()),
            handling: RefCell::new(Vec::new()),
        }
    }

    /// The closure a function defined in this frame captures.
    ///
    /// Class bodies are not visible to the functions defined inside them.
    pub fn closure_for_child(&self) -> Vec<Env> {
        let mut closure = self.closure.clone();
        if let FrameKind::Function(def) = &self.kind {
            closure.push(Env {
                def: def.clone(),
                locals: self.locals.clone(),
            });
        }
        closure
    }

    fn enclosing(&self, name: &str) -> Option<&Env> {
        self.closure.iter().rev().find(|env| env.binds(name))
    }

    pub fn load_name(&self, name: &str) -> RunResult<Value> {
        for overlay in self.comprehension.borrow().iter().rev() {
            if let Some(value) = overlay.get_str(name) {
                return Ok(value.clone());
            }
        }
        match &self.kind {
            FrameKind::Function(def) => {
                if def.scope.globals.contains(name) {
                    return self.load_global(name);
                }
                if def.scope.binds(name) {
                    return self
                        .locals
                        .borrow()
                        .get_str(name)
                        .cloned()
                        .ok_or_else(|| ExcType::unbound_local(name));
                }
                self.load_enclosing(name)
            }
            FrameKind::Class => {
                if let Some(value) = self.locals.borrow().get_str(name) {
                    return Ok(value.clone());
                }
                self.load_enclosing(name)
            }
            FrameKind::Module => {
                if let Some(value) = self.locals.borrow().get_str(name) {
                    return Ok(value.clone());
                }
                self.load_global(name)
            }
        }
    }

    fn load_enclosing(&self, name: &str) -> RunResult<Value> {
        match self.enclosing(name) {
            Some(env) => env
                .locals
                .borrow()
                .get_str(name)
                .cloned()
                .ok_or_else(|| ExcType::free_variable(name)),
            None => self.load_global(name),
        }
    }

    /// Globals, then builtins.
    pub fn load_global(&self, name: &str) -> RunResult<Value> {
        if let Some(value) = self.globals.borrow().get_str(name) {
            return Ok(value.clone());
        }
        lookup_builtin(name).ok_or_else(|| ExcType::name_error(name))
    }

    pub fn store_name(&self, name: &Rc<str>, value: Value) -> RunResult<()> {
        if let FrameKind::Function(def) = &self.kind {
            if def.scope.globals.contains(name) {
                self.globals.borrow_mut().insert_str(name.clone(), value);
                return Ok(());
            }
            if def.scope.nonlocals.contains(name) {
                let env = self.enclosing(name).ok_or_else(|| no_binding_for_nonlocal(name))?;
                env.locals.borrow_mut().insert_str(name.clone(), value);
                return Ok(());
            }
        }
        self.locals.borrow_mut().insert_str(name.clone(), value);
        Ok(())
    }

    pub fn delete_name(&self, name: &str) -> RunResult<()> {
        let removed = match &self.kind {
            FrameKind::Function(def) if def.scope.globals.contains(name) => {
                self.globals.borrow_mut().remove_str(name)
            }
            FrameKind::Function(def) if def.scope.nonlocals.contains(name) => {
                let env = self.enclosing(name).ok_or_else(|| no_binding_for_nonlocal(name))?;
                env.locals.borrow_mut().remove_str(name)
            }
            FrameKind::Function(_) => {
                return match self.locals.borrow_mut().remove_str(name) {
                    Some(_) => Ok(()),
                    None => Err(ExcType::unbound_local(name)),
                };
            }
            FrameKind::Module | FrameKind::Class => self.locals.borrow_mut().remove_str(name),
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(ExcType::name_error(name)),
        }
    }

    /// `locals()`: the live mapping at module level, a snapshot inside functions.
    pub fn locals_value(&self) -> Value {
        match self.kind {
            FrameKind::Function(_) => Value::dict(self.locals.borrow().clone()),
            FrameKind::Module | FrameKind::Class => Value::Dict(self.locals.clone()),
        }
    }

    pub fn push_comprehension(&self) {
        self.comprehension.borrow_mut().push(Dict::new());
    }

    pub fn pop_comprehension(&self) {
        self.comprehension.borrow_mut().pop();
    }

    /// Binds a comprehension variable in the innermost comprehension scope.
    pub fn store_comprehension(&self, name: &Rc<str>, value: Value) {
        let mut overlays = self.comprehension.borrow_mut();
        match overlays.last_mut() {
            Some(overlay) => {
                overlay.insert_str(name.clone(), value);
            }
            None => {
                self.locals.borrow_mut().insert_str(name.clone(), value);
            }
        }
    }

    pub fn push_handling(&self, exc: Rc<ExceptionValue>) {
        self.handling.borrow_mut().push(exc);
    }

    pub fn pop_handling(&self) {
        self.handling.borrow_mut().pop();
    }

    /// The exception a bare `raise` re-raises.
    pub fn current_exception(&self) -> Option<Rc<ExceptionValue>> {
        self.handling.borrow().last().cloned()
    }
}

fn no_binding_for_nonlocal(name: &str) -> crate::exception::RunError {
    ExcType::SyntaxError.error(format!("no binding for nonlocal '{name}' found"))
}

/// Builtin functions, types and exception classes by name.
pub(crate) fn lookup_builtin(name: &str) -> Option<Value> {
    match name {
        "None" => return Some(Value::None),
        "True" => return Some(Value::Bool(true)),
        "False" => return Some(Value::Bool(false)),
        "Ellipsis" => return Some(Value::Ellipsis),
        _ => {}
    }
    if let Ok(builtin) = Builtin::from_str(name) {
        return Some(Value::Builtin(builtin));
    }
    ExcType::from_str(name).ok().map(Value::ExcType)
}
