//! Configuration for the `sparrow` tool.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [filter]
//! max_length = 8192
//! max_depth = 16
//!
//! [schemas]
//! dirs = ["${SCHEMA_HOME}/custom"]
//!
//! [observability.logging]
//! level = "debug"
//! format = "json"
//! ```

mod observability;

use std::path::{Path, PathBuf};

pub use observability::*;
use serde::{Deserialize, Serialize};

use crate::scim::{FilterLimits, SchemaDefinitions, SchemaRegistry, schema::SchemaError};

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SparrowConfig {
    /// Limits applied when parsing filters and PATCH selectors.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Extra schema and resource type definitions.
    #[serde(default)]
    pub schemas: SchemasConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Filter parser limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Maximum filter length in bytes.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Maximum nesting of parentheses, `not` and brackets.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            max_depth: default_max_depth(),
        }
    }
}

impl FilterConfig {
    pub fn limits(&self) -> FilterLimits {
        FilterLimits {
            max_length: self.max_length,
            max_depth: self.max_depth,
        }
    }
}

fn default_max_length() -> usize {
    crate::scim::filter::MAX_FILTER_LENGTH
}

fn default_max_depth() -> usize {
    crate::scim::filter::MAX_FILTER_DEPTH
}

/// Schema definition sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemasConfig {
    /// Directories of `*.json` schema and resource type documents, loaded
    /// in order on top of the builtin definitions.
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
}

impl SparrowConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: SparrowConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.max_length == 0 {
            return Err(ConfigError::Validation(
                "filter.max_length must be greater than zero".into(),
            ));
        }
        if self.filter.max_depth == 0 {
            return Err(ConfigError::Validation(
                "filter.max_depth must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Compile the builtin schemas plus everything under `schemas.dirs`.
    pub fn load_registry(&self) -> Result<SchemaRegistry, ConfigError> {
        let mut definitions = SchemaDefinitions::builtin();
        for dir in &self.schemas.dirs {
            let loaded = definitions.load_dir(dir)?;
            tracing::debug!(dir = %dir.display(), loaded, "Loaded schema definitions");
        }
        Ok(definitions.compile()?)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

const ENV_VAR_PATTERN: &str = r"\$\{([^}]+)\}";

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables inside a comment are left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(ENV_VAR_PATTERN)
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = comment_start(line);
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            if comment_pos.is_some_and(|pos| whole.start() >= pos) {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let value = std::env::var(name.as_str())
                .map_err(|_| ConfigError::EnvVarNotFound(name.as_str().to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

/// Byte offset of the `#` opening a comment, ignoring any inside quoted strings.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote = None;
    let mut escaped = false;
    for (pos, c) in line.char_indices() {
        match quote {
            Some('"') if escaped => escaped = false,
            Some('"') if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' => return Some(pos),
            None => {}
        }
    }
    None
}
