//! Flags and resource limits.
//!
//! Flags resolve in three steps: a programmatic override wins, then the
//! `PYREPL_<NAME>` environment variable, then the built-in default.

use std::fmt;

/// Default maximum depth of nested calls and generator resumes.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 200;

/// Default budget of native stack a unit may use below the point it was resumed from.
///
/// Each Python call nests several evaluator polls, so deep recursion can run out
/// of native stack before reaching the depth limit on a small thread.
pub const DEFAULT_MAX_STACK_BYTES: usize = 1024 * 1024;

const ENV_PREFIX: &str = "PYREPL_";
const ENABLED_SYMBOLS: [&str; 6] = ["true", "t", "yes", "y", "on", "1"];
const DISABLED_SYMBOLS: [&str; 6] = ["false", "f", "no", "n", "off", "0"];

/// Error from setting a flag with a value of the wrong type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagError {
    pub flag: String,
    pub value: String,
}

impl fmt::Display for FlagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for flag {}: {:?}", self.flag, self.value)
    }
}

impl std::error::Error for FlagError {}

/// REPL behaviour switches.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    retain: Option<bool>,
    no_underscore: Option<bool>,
    scope_prefix: Option<String>,
    env: Vec<(String, String)>,
}

impl Flags {
    /// Flags with no environment, every flag at its default until overridden.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `PYREPL_*` variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(std::env::vars())
    }

    /// Reads `PYREPL_*` variables from an explicit list of pairs; other keys are ignored.
    #[must_use]
    pub fn from_lookup(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let env = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(ENV_PREFIX)?.to_owned();
                let value = value.trim().to_owned();
                (!value.is_empty()).then_some((name, value))
            })
            .collect();
        Self {
            env,
            ..Self::default()
        }
    }

    fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn env_bool(&self, name: &str) -> Option<bool> {
        let value = self.env_value(name)?.to_lowercase();
        if ENABLED_SYMBOLS.contains(&value.as_str()) {
            Some(true)
        } else if DISABLED_SYMBOLS.contains(&value.as_str()) {
            Some(false)
        } else {
            None
        }
    }

    /// Whether REPL sessions keep their scope between submissions by default.
    #[must_use]
    pub fn retain(&self) -> bool {
        self.retain.or_else(|| self.env_bool("RETAIN")).unwrap_or(false)
    }

    /// Whether host variables are exposed without the `_` prefix.
    #[must_use]
    pub fn no_underscore(&self) -> bool {
        self.no_underscore
            .or_else(|| self.env_bool("NO_UNDERSCORE"))
            .unwrap_or(false)
    }

    /// Prefix applied to host-provided variable names.
    #[must_use]
    pub fn scope_prefix(&self) -> String {
        if let Some(prefix) = &self.scope_prefix {
            return prefix.clone();
        }
        if let Some(prefix) = self.env_value("SCOPE_PREFIX") {
            return prefix.to_owned();
        }
        if self.no_underscore() { String::new() } else { "_".to_owned() }
    }

    pub fn set_retain(&mut self, value: bool) {
        self.retain = Some(value);
    }

    pub fn set_no_underscore(&mut self, value: bool) {
        self.no_underscore = Some(value);
    }

    pub fn set_scope_prefix(&mut self, value: impl Into<String>) {
        self.scope_prefix = Some(value.into());
    }

    /// Sets a flag by its environment name, parsing booleans like the environment does.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), FlagError> {
        let invalid = || FlagError {
            flag: name.to_owned(),
            value: value.to_owned(),
        };
        let parse_bool = || {
            let lower = value.trim().to_lowercase();
            if ENABLED_SYMBOLS.contains(&lower.as_str()) {
                Ok(true)
            } else if DISABLED_SYMBOLS.contains(&lower.as_str()) {
                Ok(false)
            } else {
                Err(invalid())
            }
        };
        match name.to_uppercase().as_str() {
            "RETAIN" => self.retain = Some(parse_bool()?),
            "NO_UNDERSCORE" => self.no_underscore = Some(parse_bool()?),
            "SCOPE_PREFIX" => self.scope_prefix = Some(value.to_owned()),
            _ => return Err(invalid()),
        }
        Ok(())
    }
}

/// Limits applied while executing user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_recursion_depth: usize,
    pub max_stack_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
        }
    }
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    #[must_use]
    pub fn max_stack_bytes(mut self, bytes: usize) -> Self {
        self.max_stack_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn defaults_without_environment() {
        let flags = Flags::new();
        assert!(!flags.retain());
        assert!(!flags.no_underscore());
        assert_eq!(flags.scope_prefix(), "_");
    }

    #[test]
    fn environment_symbols_are_case_insensitive() {
        let flags = Flags::from_lookup(vars(&[("PYREPL_RETAIN", " Yes "), ("PYREPL_NO_UNDERSCORE", "ON")]));
        assert!(flags.retain());
        assert!(flags.no_underscore());
        assert_eq!(flags.scope_prefix(), "");
    }

    #[test]
    fn unrecognised_symbols_fall_back_to_default() {
        let flags = Flags::from_lookup(vars(&[("PYREPL_RETAIN", "maybe"), ("OTHER_RETAIN", "1")]));
        assert!(!flags.retain());
    }

    #[test]
    fn overrides_beat_environment() {
        let mut flags = Flags::from_lookup(vars(&[("PYREPL_RETAIN", "1"), ("PYREPL_SCOPE_PREFIX", "jsk_")]));
        assert_eq!(flags.scope_prefix(), "jsk_");
        flags.set_retain(false);
        flags.set("scope_prefix", "").unwrap();
        assert!(!flags.retain());
        assert_eq!(flags.scope_prefix(), "");
    }

    #[test]
    fn set_rejects_bad_booleans() {
        let mut flags = Flags::new();
        let err = flags.set("RETAIN", "sometimes").unwrap_err();
        assert_eq!(err.to_string(), "invalid value for flag RETAIN: \"sometimes\"");
        assert!(flags.set("UNKNOWN", "1").is_err());
    }
}
