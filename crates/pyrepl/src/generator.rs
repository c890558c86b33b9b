//! Generators and coroutines on top of boxed evaluator futures.
//!
//! A generator body is an ordinary evaluator future. `yield` parks its value
//! in the generator's single-slot mailbox and returns `Pending`; the
//! generator polls the future with a no-op waker and treats `Pending` as
//! "suspended at a yield". Nothing here ever waits on a real waker.

use std::{
    cell::RefCell,
    fmt,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{
    exception::{ExcType, RunResult},
    runtime::{EvalFuture, Runtime},
    value::Value,
};

/// The mailbox between a suspended body and whoever resumes it.
#[derive(Debug, Default)]
pub(crate) struct YieldSlot {
    outgoing: RefCell<Option<Value>>,
    incoming: RefCell<Option<Value>>,
}

/// Future for one `yield`: suspends once, then resolves to the sent value.
pub(crate) struct YieldPoint<'a> {
    slot: &'a YieldSlot,
    value: Option<Value>,
}

impl<'a> YieldPoint<'a> {
    pub fn new(slot: &'a YieldSlot, value: Value) -> Self {
        Self {
            slot,
            value: Some(value),
        }
    }
}

impl Future for YieldPoint<'_> {
    type Output = Value;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Value> {
        match self.value.take() {
            Some(value) => {
                *self.slot.outgoing.borrow_mut() = Some(value);
                Poll::Pending
            }
            None => Poll::Ready(self.slot.incoming.borrow_mut().take().unwrap_or(Value::None)),
        }
    }
}

/// Polls a future that must not suspend, such as module-level code.
pub(crate) fn block_on<T>(mut future: EvalFuture<'_, T>) -> RunResult<T> {
    let mut cx = Context::from_waker(Waker::noop());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(ExcType::RuntimeError.error("'yield' outside of a generator")),
    }
}

enum GenState {
    Created(EvalFuture<'static, Value>),
    Suspended(EvalFuture<'static, Value>),
    Running,
    Finished,
}

/// What a single resume produced.
#[derive(Debug)]
pub(crate) enum GenStep {
    Yielded(Value),
    /// The body finished; carries its return value (`StopIteration.value`).
    Complete(Value),
}

/// A generator or async generator object.
pub struct Generator {
    name: Rc<str>,
    is_async: bool,
    slot: Rc<YieldSlot>,
    state: RefCell<GenState>,
    runtime: Rc<Runtime>,
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            GenState::Created(_) => "created",
            GenState::Suspended(_) => "suspended",
            GenState::Running => "running",
            GenState::Finished => "finished",
        };
        f.debug_struct("Generator")
            .field("name", &self.name)
            .field("is_async", &self.is_async)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl Generator {
    pub(crate) fn new(
        name: Rc<str>,
        is_async: bool,
        slot: Rc<YieldSlot>,
        body: EvalFuture<'static, Value>,
        runtime: Rc<Runtime>,
    ) -> Self {
        Self {
            name,
            is_async,
            slot,
            state: RefCell::new(GenState::Created(body)),
            runtime,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(*self.state.borrow(), GenState::Finished)
    }

    /// Runs the body until its next `yield` or until it finishes.
    ///
    /// `sent` becomes the value of the suspended `yield` expression.
    pub(crate) fn resume(&self, sent: Value) -> RunResult<GenStep> {
        let _guard = self.runtime.enter()?;
        let previous = mem::replace(&mut *self.state.borrow_mut(), GenState::Running);
        let mut body = match previous {
            GenState::Created(body) => {
                if !sent.is_none() {
                    *self.state.borrow_mut() = GenState::Created(body);
                    return Err(ExcType::type_error(
                        "can't send non-None value to a just-started generator",
                    ));
                }
                body
            }
            GenState::Suspended(body) => {
                *self.slot.incoming.borrow_mut() = Some(sent);
                self.runtime.trace(|t| t.on_resume(&self.name));
                body
            }
            GenState::Running => return Err(ExcType::ValueError.error("generator already executing")),
            GenState::Finished => {
                *self.state.borrow_mut() = GenState::Finished;
                return Ok(GenStep::Complete(Value::None));
            }
        };

        let mut cx = Context::from_waker(Waker::noop());
        match body.as_mut().poll(&mut cx) {
            Poll::Ready(result) => {
                *self.state.borrow_mut() = GenState::Finished;
                result.map(GenStep::Complete)
            }
            Poll::Pending => {
                let yielded = self.slot.outgoing.borrow_mut().take();
                match yielded {
                    Some(value) => {
                        *self.state.borrow_mut() = GenState::Suspended(body);
                        self.runtime.trace(|t| t.on_yield(&self.name));
                        Ok(GenStep::Yielded(value))
                    }
                    None => {
                        *self.state.borrow_mut() = GenState::Finished;
                        Err(ExcType::RuntimeError.error("generator suspended without yielding a value"))
                    }
                }
            }
        }
    }

    /// `next(gen)`: the next yielded value, `None` once exhausted.
    pub(crate) fn next_value(&self) -> RunResult<Option<Value>> {
        match self.resume(Value::None)? {
            GenStep::Yielded(value) => Ok(Some(value)),
            GenStep::Complete(_) => Ok(None),
        }
    }
}

/// A coroutine object: the not-yet-awaited body of an `async def`.
pub struct Coroutine {
    name: Rc<str>,
    body: RefCell<Option<EvalFuture<'static, Value>>>,
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("name", &self.name)
            .field("awaited", &self.body.borrow().is_none())
            .finish()
    }
}

impl Coroutine {
    pub(crate) fn new(name: Rc<str>, body: EvalFuture<'static, Value>) -> Self {
        Self {
            name,
            body: RefCell::new(Some(body)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the body for awaiting; a coroutine can only be awaited once.
    pub(crate) fn take_body(&self) -> RunResult<EvalFuture<'static, Value>> {
        self.body
            .borrow_mut()
            .take()
            .ok_or_else(|| ExcType::RuntimeError.error("cannot reuse already awaited coroutine"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::ResourceLimits, exception::RunError, io::NoPrint, tracer::NoopTracer};

    fn runtime() -> Rc<Runtime> {
        Runtime::new(
            Rc::new(RefCell::new(NoPrint)),
            Rc::new(RefCell::new(NoopTracer)),
            ResourceLimits::default(),
        )
    }

    /// A body that yields 1, then yields twice what it was sent, then returns 'done'.
    fn doubling_generator() -> Generator {
        let slot = Rc::new(YieldSlot::default());
        let body_slot = slot.clone();
        let body: EvalFuture<'static, Value> = Box::pin(async move {
            let sent = YieldPoint::new(&body_slot, Value::Int(1)).await;
            let doubled = match sent {
                Value::Int(i) => i * 2,
                _ => -1,
            };
            YieldPoint::new(&body_slot, Value::Int(doubled)).await;
            Ok::<_, RunError>(Value::Str("done".into()))
        });
        Generator::new("gen".into(), false, slot, body, runtime())
    }

    #[test]
    fn send_round_trip() {
        let generator = doubling_generator();
        assert!(matches!(generator.resume(Value::None).unwrap(), GenStep::Yielded(Value::Int(1))));
        assert!(matches!(generator.resume(Value::Int(21)).unwrap(), GenStep::Yielded(Value::Int(42))));
        match generator.resume(Value::None).unwrap() {
            GenStep::Complete(value) => assert_eq!(value, Value::Str("done".into())),
            GenStep::Yielded(value) => panic!("unexpected yield {value:?}"),
        }
        assert!(generator.is_finished());
        assert!(generator.next_value().unwrap().is_none());
    }

    #[test]
    fn non_none_send_to_fresh_generator_is_rejected() {
        let generator = doubling_generator();
        let err = generator.resume(Value::Int(5)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::TypeError);
        // The generator is still usable afterwards.
        assert!(matches!(generator.resume(Value::None).unwrap(), GenStep::Yielded(Value::Int(1))));
    }

    #[test]
    fn coroutine_awaits_once() {
        let coroutine = Coroutine::new("co".into(), Box::pin(async { Ok::<_, RunError>(Value::Int(3)) }));
        let body = coroutine.take_body().unwrap();
        assert_eq!(block_on(body).unwrap(), Value::Int(3));
        assert_eq!(coroutine.take_body().unwrap_err().exc_type(), ExcType::RuntimeError);
    }
}
