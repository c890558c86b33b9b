use std::fmt;

use crate::{exception::Exception, parse::ParseError};

/// Error type for REPL execution, separating failures by pipeline stage.
///
/// A submission either never becomes a unit (`Parse`) or raises while the
/// unit runs (`Runtime`); hosts report the two differently.
#[derive(Debug, Clone)]
pub enum ReplError {
    /// The submission did not parse, or uses syntax the interpreter does not run.
    Parse(ParseError),
    /// User code raised while the unit was being driven.
    Runtime(Exception),
}

impl ReplError {
    /// The error as a Python exception, with its traceback.
    #[must_use]
    pub fn to_exception(&self) -> Exception {
        match self {
            Self::Parse(error) => error.clone().into_exception(),
            Self::Runtime(error) => error.clone(),
        }
    }
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(error) => write!(f, "{error}"),
            Self::Runtime(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ReplError {}

impl From<ParseError> for ReplError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<Exception> for ReplError {
    fn from(error: Exception) -> Self {
        Self::Runtime(error)
    }
}
