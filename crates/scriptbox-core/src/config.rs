//! Engine configuration.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults ([`ScriptConfig::default`])
//! 2. the `[script]` table of a TOML file, whose text may contain
//!    `${VAR}` / `${VAR:default}` placeholders resolved from the environment
//! 3. `SCRIPTBOX_*` environment variables, one per field

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sandbox::budget::{
    BudgetLimits, DEFAULT_INSTRUCTION_THRESHOLD, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_TIMEOUT_MS,
};
use crate::sandbox::session::DEFAULT_WORKER_STACK_BYTES;

const PLACEHOLDER_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {0} is not set and has no default")]
    MissingVariable(String),

    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidOverride { var: String, value: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Limits and tuning for script executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    #[serde(alias = "maxMemory")]
    pub max_memory_bytes: u64,
    #[serde(alias = "instructionThreshold")]
    pub instruction_threshold: u32,
    pub max_call_depth: usize,
    pub worker_stack_bytes: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            instruction_threshold: DEFAULT_INSTRUCTION_THRESHOLD,
            max_call_depth: crate::lang::DEFAULT_MAX_CALL_DEPTH,
            worker_stack_bytes: DEFAULT_WORKER_STACK_BYTES,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    script: ScriptConfig,
}

impl ScriptConfig {
    /// Load from an optional file, then apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |name: &str| std::env::var(name).ok();
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw, env)?
            }
            None => Self::default(),
        };
        config.apply_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text after resolving placeholders through `lookup`.
    pub fn from_toml_str(
        raw: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let resolved = resolve_placeholders(raw, lookup)?;
        let file: ConfigFile = toml::from_str(&resolved)?;
        Ok(file.script)
    }

    /// Apply `SCRIPTBOX_*` overrides found through `lookup`. Blank values are
    /// ignored.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = read_override(&lookup, "SCRIPTBOX_TIMEOUT_MS")? {
            self.timeout_ms = v;
        }
        if let Some(v) = read_override(&lookup, "SCRIPTBOX_MAX_MEMORY_BYTES")? {
            self.max_memory_bytes = v;
        }
        if let Some(v) = read_override(&lookup, "SCRIPTBOX_INSTRUCTION_THRESHOLD")? {
            self.instruction_threshold = narrow("SCRIPTBOX_INSTRUCTION_THRESHOLD", v)?;
        }
        if let Some(v) = read_override(&lookup, "SCRIPTBOX_MAX_CALL_DEPTH")? {
            self.max_call_depth = narrow("SCRIPTBOX_MAX_CALL_DEPTH", v)?;
        }
        if let Some(v) = read_override(&lookup, "SCRIPTBOX_WORKER_STACK_BYTES")? {
            self.worker_stack_bytes = narrow("SCRIPTBOX_WORKER_STACK_BYTES", v)?;
        }
        Ok(())
    }

    /// Every limit must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("timeout_ms", self.timeout_ms == 0),
            ("max_memory_bytes", self.max_memory_bytes == 0),
            ("instruction_threshold", self.instruction_threshold == 0),
            ("max_call_depth", self.max_call_depth == 0),
            ("worker_stack_bytes", self.worker_stack_bytes == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(ConfigError::InvalidConfig(format!(
                "{field} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }

    /// The budget portion of this configuration.
    pub fn limits(&self) -> BudgetLimits {
        BudgetLimits {
            timeout_ms: self.timeout_ms,
            max_memory_bytes: self.max_memory_bytes,
            instruction_threshold: self.instruction_threshold,
        }
    }
}

fn read_override(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidOverride {
            var: var.to_string(),
            value: raw.clone(),
        })
}

fn narrow<T: TryFrom<u64>>(var: &str, value: u64) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::InvalidOverride {
        var: var.to_string(),
        value: value.to_string(),
    })
}

/// Replace `${VAR}` and `${VAR:default}` in `raw`.
pub fn resolve_placeholders(
    raw: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let pattern =
        Regex::new(PLACEHOLDER_PATTERN).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in pattern.captures_iter(raw) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&raw[last..whole.start()]);
        let value = match (lookup(name.as_str()), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => return Err(ConfigError::MissingVariable(name.as_str().to_string())),
        };
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScriptConfig::default();
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.max_memory_bytes, 10 * 1024 * 1024);
        assert_eq!(config.instruction_threshold, 10_000);
        assert_eq!(config.max_call_depth, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_placeholders_use_env_then_default() {
        let out = resolve_placeholders(
            "a = ${A}\nb = ${B:7}\nc = ${C:x}",
            vars(&[("A", "1"), ("C", "3")]),
        )
        .unwrap();
        assert_eq!(out, "a = 1\nb = 7\nc = 3");
    }

    #[test]
    fn test_missing_placeholder_without_default_fails() {
        let err = resolve_placeholders("x = ${NOPE}", vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(ref v) if v == "NOPE"));
    }

    #[test]
    fn test_toml_table_with_aliases() {
        let raw = "[script]\ntimeout = ${T:250}\nmaxMemory = 1048576\n";
        let config = ScriptConfig::from_toml_str(raw, vars(&[])).unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.max_memory_bytes, 1_048_576);
        assert_eq!(config.instruction_threshold, 10_000);
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = ScriptConfig::default();
        config
            .apply_overrides(vars(&[
                ("SCRIPTBOX_TIMEOUT_MS", "200"),
                ("SCRIPTBOX_MAX_CALL_DEPTH", " "),
            ]))
            .unwrap();
        assert_eq!(config.timeout_ms, 200);
        assert_eq!(config.max_call_depth, 128);

        let err = config
            .apply_overrides(vars(&[("SCRIPTBOX_MAX_MEMORY_BYTES", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let config = ScriptConfig {
            max_memory_bytes: 0,
            ..ScriptConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_memory_bytes"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[script]\ntimeout_ms = 1234\ninstruction_threshold = 500").unwrap();
        let config = ScriptConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.instruction_threshold, 500);
        assert_eq!(config.limits().instruction_threshold, 500);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = ScriptConfig::load(Some(Path::new("/nonexistent/scriptbox.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
