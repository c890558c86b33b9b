use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    rc::Rc,
};

use crate::{
    config::ResourceLimits,
    exception::{ExcType, RunResult},
    io::PrintWriter,
    tracer::ExecTracer,
};

/// A boxed evaluator future.
///
/// Every recursive evaluator entry point returns one of these, which is what
/// lets a `yield` deep inside nested statements suspend the whole function.
pub(crate) type EvalFuture<'a, T> = Pin<Box<dyn Future<Output = RunResult<T>> + 'a>>;

/// State shared by every frame of one execution: output sinks, tracer and limits.
pub(crate) struct Runtime {
    pub print: Rc<RefCell<dyn PrintWriter>>,
    tracer: Rc<RefCell<dyn ExecTracer>>,
    limits: ResourceLimits,
    depth: Cell<usize>,
    /// Stack address the host last resumed the unit from.
    stack_base: Cell<Option<usize>>,
}

impl Runtime {
    pub fn new(
        print: Rc<RefCell<dyn PrintWriter>>,
        tracer: Rc<RefCell<dyn ExecTracer>>,
        limits: ResourceLimits,
    ) -> Rc<Self> {
        Rc::new(Self {
            print,
            tracer,
            limits,
            depth: Cell::new(0),
            stack_base: Cell::new(None),
        })
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Records the current stack position as the base for [`Self::stack_used`].
    ///
    /// Called each time the host resumes the unit.
    pub fn mark_stack_base(&self) {
        self.stack_base.set(Some(stack_address()));
    }

    /// Native stack used since the last [`Self::mark_stack_base`], zero if never marked.
    pub fn stack_used(&self) -> usize {
        self.stack_base
            .get()
            .map_or(0, |base| base.abs_diff(stack_address()))
    }

    /// Enters a call or generator resume, failing past the recursion limit
    /// or the native stack budget.
    pub fn enter(&self) -> RunResult<DepthGuard<'_>> {
        let depth = self.depth.get() + 1;
        if depth > self.limits.max_recursion_depth || self.stack_used() > self.limits.max_stack_bytes {
            return Err(ExcType::RecursionError.error("maximum recursion depth exceeded"));
        }
        self.depth.set(depth);
        Ok(DepthGuard(&self.depth))
    }

    /// Runs `f` against the tracer; skipped if the tracer is already borrowed.
    pub fn trace(&self, f: impl FnOnce(&mut dyn ExecTracer)) {
        if let Ok(mut tracer) = self.tracer.try_borrow_mut() {
            f(&mut *tracer);
        }
    }
}

#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::ptr::from_ref(std::hint::black_box(&marker)).addr()
}

/// Decrements the call depth when dropped.
pub(crate) struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{io::NoPrint, tracer::NoopTracer};

    #[test]
    fn depth_guard_enforces_limit() {
        let runtime = Runtime::new(
            Rc::new(RefCell::new(NoPrint)),
            Rc::new(RefCell::new(NoopTracer)),
            ResourceLimits::new().max_recursion_depth(2),
        );
        let first = runtime.enter().unwrap();
        let second = runtime.enter().unwrap();
        assert_eq!(runtime.depth(), 2);
        assert_eq!(runtime.enter().unwrap_err().exc_type(), ExcType::RecursionError);
        drop(second);
        drop(first);
        assert_eq!(runtime.depth(), 0);
    }

    #[inline(never)]
    fn enter_below(runtime: &Runtime, levels: usize) -> RunResult<()> {
        let padding = std::hint::black_box([0u8; 1024]);
        let _guard = runtime.enter()?;
        if levels > 0 {
            enter_below(runtime, levels - 1)?;
        }
        std::hint::black_box(padding);
        Ok(())
    }

    #[test]
    fn stack_budget_trips_before_the_depth_limit() {
        let runtime = Runtime::new(
            Rc::new(RefCell::new(NoPrint)),
            Rc::new(RefCell::new(NoopTracer)),
            ResourceLimits::new().max_recursion_depth(10_000).max_stack_bytes(64 * 1024),
        );
        assert_eq!(runtime.stack_used(), 0, "unmarked stacks are not measured");
        runtime.mark_stack_base();
        let err = enter_below(&runtime, 1_000).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::RecursionError);
        assert_eq!(runtime.depth(), 0);
    }
}
