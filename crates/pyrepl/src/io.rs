//! Where `print()` output goes.

use std::{
    fmt,
    io::{self, Write as _},
};

use crate::exception::{ExcType, Exception};

/// Receives the output of the `print()` builtin.
///
/// A `print(a, b, sep=s, end=e)` call arrives as the pieces `a`, `s`, `b`, `e`
/// followed by [`end_call`](Self::end_call). Empty pieces are skipped.
pub trait PrintWriter {
    fn write_str(&mut self, text: &str) -> Result<(), Exception>;

    /// Called after the last piece of each `print()`.
    fn end_call(&mut self) -> Result<(), Exception> {
        Ok(())
    }
}

/// Writes to stdout, a line at a time.
///
/// Text without a trailing newline stays buffered until the next newline or
/// until the writer is dropped.
#[derive(Debug, Default)]
pub struct StdPrint {
    pending: String,
}

impl StdPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_lines(&mut self, everything: bool) -> io::Result<()> {
        let cut = if everything {
            self.pending.len()
        } else {
            self.pending.rfind('\n').map_or(0, |i| i + 1)
        };
        if cut == 0 {
            return Ok(());
        }
        let mut stdout = io::stdout().lock();
        stdout.write_all(&self.pending.as_bytes()[..cut])?;
        stdout.flush()?;
        self.pending.drain(..cut);
        Ok(())
    }
}

impl PrintWriter for StdPrint {
    fn write_str(&mut self, text: &str) -> Result<(), Exception> {
        self.pending.push_str(text);
        Ok(())
    }

    fn end_call(&mut self) -> Result<(), Exception> {
        self.flush_lines(false)
            .map_err(|err| Exception::new(ExcType::RuntimeError, Some(format!("print failed: {err}"))))
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        // nowhere left to report a failed write
        let _ = self.flush_lines(true);
    }
}

/// Collects everything printed into a string, for tests and for hosts that
/// forward output elsewhere.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    /// Returns the collected text and empties the buffer.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.0)
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_str(&mut self, text: &str) -> Result<(), Exception> {
        self.0.push_str(text);
        Ok(())
    }
}

impl fmt::Display for CollectStringPrint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_str(&mut self, _text: &str) -> Result<(), Exception> {
        Ok(())
    }
}
