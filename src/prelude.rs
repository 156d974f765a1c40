//! Commonly used types and functions
//!
//! ```
//! use ripple::prelude::*;
//! ```

pub use ripple_reactive::{
	Computation, ComputationOptions, Computed, FlushMode, List, ReactiveConfig, ReactiveError, Record, Ref, Subject,
	Value, WatchOptions, configure, next_tick, observe, poll, reactive, untracked, watch, watch_path,
};
