//! Engine configuration
//!
//! Settings are layered: defaults, then an optional TOML document, then
//! `RIPPLE_*` environment variables.
//!
//! ```toml
//! flush_mode = "deferred"
//! max_update_count = 100
//! ```

use core::str::FromStr;
use std::path::Path;

use serde::Deserialize;

/// Re-triggers of one computation allowed within a single flush
pub const DEFAULT_MAX_UPDATE_COUNT: usize = 100;

/// Prefix of environment variables read by [`ReactiveConfig::with_env_overrides`]
pub const ENV_PREFIX: &str = "RIPPLE_";

/// Error type for configuration loading
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TOML error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("invalid value for {key}: {value:?}")]
	InvalidValue { key: String, value: String },
}

/// When queued computations are flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
	/// Coalesce mutations and flush on the next tick
	#[default]
	Deferred,
	/// Flush synchronously as soon as the first computation is queued
	Immediate,
}

impl FromStr for FlushMode {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"deferred" | "async" => Ok(Self::Deferred),
			"immediate" | "sync" => Ok(Self::Immediate),
			_ => Err(ConfigError::InvalidValue {
				key: format!("{ENV_PREFIX}FLUSH_MODE"),
				value: s.to_string(),
			}),
		}
	}
}

/// Configuration of the reactive runtime on one thread
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
	/// Flush cadence of the scheduler
	pub flush_mode: FlushMode,
	/// Circuit-breaker threshold for runaway re-triggering
	pub max_update_count: usize,
}

impl Default for ReactiveConfig {
	fn default() -> Self {
		Self {
			flush_mode: FlushMode::Deferred,
			max_update_count: DEFAULT_MAX_UPDATE_COUNT,
		}
	}
}

impl ReactiveConfig {
	/// Create a configuration with default values
	pub fn new() -> Self {
		Self::default()
	}

	/// Set the flush mode
	///
	/// # Examples
	///
	/// ```
	/// use ripple_reactive::config::{FlushMode, ReactiveConfig};
	///
	/// let config = ReactiveConfig::new().with_flush_mode(FlushMode::Immediate);
	/// assert_eq!(config.flush_mode, FlushMode::Immediate);
	/// ```
	pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
		self.flush_mode = mode;
		self
	}

	/// Set the circuit-breaker threshold
	pub fn with_max_update_count(mut self, limit: usize) -> Self {
		self.max_update_count = limit;
		self
	}

	/// Parse a configuration from a TOML document; missing keys keep their defaults
	pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(content)?)
	}

	/// Load a configuration from a TOML file
	pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path)?;
		Self::from_toml_str(&content)
	}

	/// Apply `RIPPLE_FLUSH_MODE` and `RIPPLE_MAX_UPDATE_COUNT` from the process environment
	pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
		self.with_overrides_from(std::env::vars())
	}

	/// Apply overrides from an explicit list of `(name, value)` pairs
	///
	/// Names without the [`ENV_PREFIX`] are ignored.
	pub fn with_overrides_from<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: AsRef<str>,
	{
		for (key, value) in vars {
			let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
				continue;
			};
			let value = value.as_ref();
			match name {
				"FLUSH_MODE" => self.flush_mode = value.parse()?,
				"MAX_UPDATE_COUNT" => {
					self.max_update_count =
						value
							.trim()
							.parse()
							.map_err(|_| ConfigError::InvalidValue {
								key: key.as_ref().to_string(),
								value: value.to_string(),
							})?;
				}
				_ => {}
			}
		}
		Ok(self)
	}
}
