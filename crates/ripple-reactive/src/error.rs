//! Error types for the reactive engine
//!
//! Every fallible entry point returns [`ReactiveError`]. Mutations are fallible
//! because synchronous computations (and the immediate flush mode) run inside
//! the write trap, so a failing body surfaces at the mutation site.

use core::fmt;

use crate::computation::ComputationId;
use crate::config::ConfigError;

/// Boxed error produced by a user-supplied body or callback
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate
pub type Result<T, E = ReactiveError> = core::result::Result<T, E>;

/// Stage of a computation in which a user-supplied closure failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorPhase {
	/// The tracked body (getter) of the computation
	Getter,
	/// The change callback invoked after a re-run
	Callback,
	/// The change callback invoked once at creation of an `immediate` watcher
	Immediate,
}

impl fmt::Display for ErrorPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Getter => f.write_str("getter"),
			Self::Callback => f.write_str("callback"),
			Self::Immediate => f.write_str("immediate callback"),
		}
	}
}

/// Error type for the reactive engine
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ReactiveError {
	/// A computation body or callback returned an error
	#[error("error in {phase} for computation {unit} \"{expression}\": {source}")]
	Body {
		unit: ComputationId,
		expression: String,
		phase: ErrorPhase,
		#[source]
		source: BoxError,
	},

	/// A computation kept re-triggering itself within one flush
	#[error(
		"infinite update loop in computation {unit} \"{expression}\": re-triggered more than {limit} times in one flush"
	)]
	InfiniteUpdateLoop {
		unit: ComputationId,
		expression: String,
		limit: usize,
	},

	/// A watch path contained characters other than word characters, `$` and `.`
	#[error(
		"failed watching path \"{path}\": only simple dot-delimited paths are accepted, use a getter instead"
	)]
	InvalidPath { path: String },

	/// A frozen container was asked to change its shape
	#[error("cannot change \"{key}\" on a frozen container")]
	Frozen { key: String },

	/// A list operation addressed an index outside the list
	#[error("index {index} is out of bounds for a list of length {len}")]
	InvalidIndex { index: usize, len: usize },

	/// A field or index write targeted a value that is not a container
	#[error("cannot set reactive property \"{key}\" on a non-container value")]
	NotAContainer { key: String },

	/// A computation was asked to run while it was already running
	#[error("computation {unit} is already running")]
	ReentrantRun { unit: ComputationId },

	/// Invalid engine configuration
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
}

impl ReactiveError {
	/// The computation this error is attributed to, if any
	pub fn unit(&self) -> Option<ComputationId> {
		match self {
			Self::Body { unit, .. }
			| Self::InfiniteUpdateLoop { unit, .. }
			| Self::ReentrantRun { unit } => Some(*unit),
			_ => None,
		}
	}

	/// Whether this error is the runaway-update condition
	pub fn is_infinite_loop(&self) -> bool {
		matches!(self, Self::InfiniteUpdateLoop { .. })
	}
}
