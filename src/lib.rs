//! # Ripple
//!
//! A dependency-tracking reactive state engine.
//!
//! Ripple tracks which computations (renders, derived values, watchers) read
//! which pieces of state, and re-runs exactly the dependent computations when
//! that state changes: once per flush, in creation order, after a batch of
//! synchronous mutations.
//!
//! ## Quick Example
//!
//! ```
//! use ripple::prelude::*;
//!
//! let state = reactive(serde_json::json!({ "items": [1, 2] }));
//! let record = state.as_record().unwrap().clone();
//!
//! let reader = record.clone();
//! let count = Computed::new(move || {
//! 	let items = reader.get("items");
//! 	Ok(Value::from(items.as_list().map_or(0, List::len)))
//! });
//! assert_eq!(count.get().unwrap(), Value::Int(2));
//!
//! record.get_untracked("items").as_list().unwrap().push(3).unwrap();
//! assert_eq!(count.get().unwrap(), Value::Int(3));
//! ```
//!
//! The engine lives in the `ripple-reactive` crate; everything is re-exported here.

pub use ripple_reactive::*;

pub mod prelude;
