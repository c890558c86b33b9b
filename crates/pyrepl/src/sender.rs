//! Iterating a resumable producer while sending values back into it.

use std::{cell::RefCell, fmt, rc::Rc};

/// A producer that is advanced by sending it a value, like a generator's `send`.
pub trait Resume {
    /// What each resume delivers; the default is sent when nothing was recorded.
    type Sent: Default;
    type Item;

    /// Resumes with `sent`; `None` once the producer is exhausted.
    fn resume(&mut self, sent: Self::Sent) -> Option<Self::Item>;
}

/// Records the value to deliver on the producer's next resume.
pub struct SendHandle<S> {
    slot: Rc<RefCell<Option<S>>>,
}

impl<S> SendHandle<S> {
    /// Replaces any value already recorded for the next resume.
    pub fn send(&self, value: S) {
        *self.slot.borrow_mut() = Some(value);
    }
}

impl<S> Clone for SendHandle<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<S> fmt::Debug for SendHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendHandle")
            .field("pending", &self.slot.borrow().is_some())
            .finish()
    }
}

/// Adapts a [`Resume`] producer into an iterator of `(send, item)` pairs.
///
/// A value passed to `send` is delivered on the following resume and then
/// cleared, so a step without a send resumes with `Sent::default()`.
///
/// ```
/// use pyrepl::{AsyncCodeExecutor, AsyncSender, Value};
///
/// let executor = AsyncCodeExecutor::new("x = yield 1\nyield x * 2", None, None).unwrap();
/// let mut seen = Vec::new();
/// for (send, result) in AsyncSender::new(executor.start()) {
///     let value = result.unwrap();
///     seen.push(value.clone());
///     send.send(Value::Int(21));
/// }
/// assert_eq!(seen, [Value::Int(1), Value::Int(42)]);
/// ```
pub struct AsyncSender<R: Resume> {
    inner: R,
    slot: Rc<RefCell<Option<R::Sent>>>,
}

impl<R: Resume> AsyncSender<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            slot: Rc::new(RefCell::new(None)),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Resume> Iterator for AsyncSender<R> {
    type Item = (SendHandle<R::Sent>, R::Item);

    fn next(&mut self) -> Option<Self::Item> {
        let sent = self.slot.borrow_mut().take().unwrap_or_default();
        let item = self.inner.resume(sent)?;
        Some((SendHandle { slot: self.slot.clone() }, item))
    }
}

impl<R: Resume + fmt::Debug> fmt::Debug for AsyncSender<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSender").field("inner", &self.inner).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Echoes what it was sent, for three steps.
    struct Echo {
        steps: usize,
        received: Vec<i32>,
    }

    impl Resume for Echo {
        type Sent = i32;
        type Item = usize;

        fn resume(&mut self, sent: i32) -> Option<usize> {
            self.received.push(sent);
            (self.steps < 3).then(|| {
                self.steps += 1;
                self.steps
            })
        }
    }

    #[test]
    fn sent_values_arrive_once_then_reset() {
        let mut sender = AsyncSender::new(Echo {
            steps: 0,
            received: Vec::new(),
        });
        let (send, first) = sender.next().unwrap();
        assert_eq!(first, 1);
        send.send(7);
        let (_, second) = sender.next().unwrap();
        assert_eq!(second, 2);
        assert_eq!(sender.next().map(|(_, item)| item), Some(3));
        assert!(sender.next().is_none());
        assert_eq!(sender.into_inner().received, [0, 7, 0, 0]);
    }

    #[test]
    fn later_send_replaces_earlier() {
        let mut sender = AsyncSender::new(Echo {
            steps: 0,
            received: Vec::new(),
        });
        let (send, _) = sender.next().unwrap();
        send.send(1);
        send.send(2);
        sender.next();
        assert_eq!(sender.into_inner().received, [0, 2]);
    }
}
