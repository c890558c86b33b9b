//! Execution tracing.
//!
//! The [`ExecTracer`] trait defines hook points at the events the evaluator
//! goes through while running a unit: statements, calls and returns,
//! generator suspension and resumption, and raised exceptions.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Does nothing (the default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`ProfilingTracer`] | Statement and call counters |
//! | [`RecordingTracer`] | Full event list, for tests and post-mortems |
//!
//! ```ignore
//! let tracer = Rc::new(RefCell::new(RecordingTracer::new()));
//! let executor = AsyncCodeExecutor::new("yield 1", None, None)?.with_tracer(tracer.clone());
//! executor.into_iter().for_each(drop);
//! println!("{:?}", tracer.borrow().events());
//! ```

use std::fmt;

use crate::exception::ExcType;

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A statement is about to run.
    Statement {
        /// 1-based line in the statement's source.
        line: u32,
        /// Function (or `<module>`) executing the statement.
        function: String,
    },
    /// A function frame was entered.
    Call { function: String, depth: usize },
    /// A function frame finished, normally or by raising.
    Return { function: String, depth: usize },
    /// A generator suspended with a value.
    Yield { function: String },
    /// A suspended generator was resumed.
    Resume { function: String },
    /// An exception propagated out of a function frame.
    Exception { function: String, exc_type: ExcType },
}

/// Hooks called by the evaluator.
///
/// Every method has a no-op default, so implementations only override what they need.
pub trait ExecTracer: std::fmt::Debug {
    fn on_statement(&mut self, _line: u32, _function: &str) {}

    fn on_call(&mut self, _function: &str, _depth: usize) {}

    fn on_return(&mut self, _function: &str, _depth: usize) {}

    fn on_yield(&mut self, _function: &str) {}

    fn on_resume(&mut self, _function: &str) {}

    fn on_exception(&mut self, _function: &str, _exc_type: ExcType) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl ExecTracer for NoopTracer {}

/// Prints a human-readable execution log to stderr.
///
/// ```text
/// [line    1] _repl_coroutine
///   >>> CALL add                  depth=2
/// [line    2] add
///   <<< RETURN add                depth=1
///   --> YIELD _repl_coroutine
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Stop after this many statements, so loops don't flood the log.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl ExecTracer for StderrTracer {
    fn on_statement(&mut self, line: u32, function: &str) {
        if self.stopped {
            return;
        }
        eprintln!("[line {line:>4}] {function}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} statements) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, function: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {function:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, function: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN {function:<18} depth={depth}");
        }
    }

    fn on_yield(&mut self, function: &str) {
        if !self.stopped {
            eprintln!("  --> YIELD {function}");
        }
    }

    fn on_resume(&mut self, function: &str) {
        if !self.stopped {
            eprintln!("  <-- RESUME {function}");
        }
    }

    fn on_exception(&mut self, function: &str, exc_type: ExcType) {
        if !self.stopped {
            eprintln!("  !!! {exc_type} in {function}");
        }
    }
}

/// Counts statements, calls and the deepest call nesting seen.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    statements: u64,
    calls: u64,
    yields: u64,
    max_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilingReport {
    pub statements: u64,
    pub calls: u64,
    pub yields: u64,
    pub max_depth: usize,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        ProfilingReport {
            statements: self.statements,
            calls: self.calls,
            yields: self.yields,
            max_depth: self.max_depth,
        }
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "statements={} calls={} yields={} max_depth={}",
            self.statements, self.calls, self.yields, self.max_depth
        )
    }
}

impl ExecTracer for ProfilingTracer {
    fn on_statement(&mut self, _line: u32, _function: &str) {
        self.statements += 1;
    }

    fn on_call(&mut self, _function: &str, depth: usize) {
        self.calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_yield(&mut self, _function: &str) {
        self.yields += 1;
    }
}

/// Records every event, optionally capped.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records at most `limit` events; later events are dropped.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl ExecTracer for RecordingTracer {
    fn on_statement(&mut self, line: u32, function: &str) {
        self.record(TraceEvent::Statement {
            line,
            function: function.to_owned(),
        });
    }

    fn on_call(&mut self, function: &str, depth: usize) {
        self.record(TraceEvent::Call {
            function: function.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, function: &str, depth: usize) {
        self.record(TraceEvent::Return {
            function: function.to_owned(),
            depth,
        });
    }

    fn on_yield(&mut self, function: &str) {
        self.record(TraceEvent::Yield {
            function: function.to_owned(),
        });
    }

    fn on_resume(&mut self, function: &str) {
        self.record(TraceEvent::Resume {
            function: function.to_owned(),
        });
    }

    fn on_exception(&mut self, function: &str, exc_type: ExcType) {
        self.record(TraceEvent::Exception {
            function: function.to_owned(),
            exc_type,
        });
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn recording_tracer_drops_events_past_its_limit() {
        let mut tracer = RecordingTracer::with_limit(2);
        tracer.on_statement(1, "_repl_coroutine");
        tracer.on_call("f", 2);
        tracer.on_exception("f", ExcType::KeyError);
        assert_eq!(
            tracer.into_events(),
            [
                TraceEvent::Statement {
                    line: 1,
                    function: "_repl_coroutine".to_owned()
                },
                TraceEvent::Call {
                    function: "f".to_owned(),
                    depth: 2
                },
            ]
        );
    }

    #[test]
    fn profiling_tracer_tracks_the_deepest_call() {
        let mut tracer = ProfilingTracer::new();
        for line in 1..=3 {
            tracer.on_statement(line, "_repl_coroutine");
        }
        tracer.on_call("outer", 2);
        tracer.on_call("inner", 3);
        tracer.on_return("inner", 2);
        tracer.on_yield("_repl_coroutine");
        assert_eq!(
            tracer.report(),
            ProfilingReport {
                statements: 3,
                calls: 2,
                yields: 1,
                max_depth: 3,
            }
        );
        assert_eq!(
            tracer.report().to_string(),
            "statements=3 calls=2 yields=1 max_depth=3"
        );
    }
}
