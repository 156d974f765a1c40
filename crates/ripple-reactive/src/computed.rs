//! Derived values
//!
//! A [`Computed`] caches the result of its body and recomputes it only when a
//! dependency changed since the last read. Readers of a computed value depend
//! on the computed value's own sources, so they re-run when those change.
//!
//! ## Example
//!
//! ```
//! use ripple_reactive::{Computed, Value, reactive};
//!
//! let state = reactive(serde_json::json!({ "first": "Ada", "last": "Lovelace" }));
//! let record = state.as_record().unwrap().clone();
//!
//! let full_name = Computed::new(move || {
//! 	let first = record.get("first");
//! 	let last = record.get("last");
//! 	Ok(Value::from(format!(
//! 		"{} {}",
//! 		first.as_str().unwrap_or_default(),
//! 		last.as_str().unwrap_or_default()
//! 	)))
//! });
//!
//! assert_eq!(full_name.get().unwrap(), Value::from("Ada Lovelace"));
//! ```

use core::fmt;
use std::rc::Rc;

use crate::computation::{Computation, ComputationOptions};
use crate::error::Result;
use crate::observe::Value;
use crate::runtime::is_tracking;

/// A lazily evaluated, cached derived value
///
/// Clones share the same underlying unit; it is torn down with the last clone.
#[derive(Clone)]
pub struct Computed {
	unit: Rc<Computation>,
}

impl Computed {
	/// Create a derived value; the body does not run until the first read
	pub fn new<F>(body: F) -> Self
	where
		F: FnMut() -> anyhow::Result<Value> + 'static,
	{
		Self::with_options(body, ComputationOptions::new())
	}

	/// Create a derived value with extra options; `lazy` is always set
	pub fn with_options<F>(body: F, options: ComputationOptions) -> Self
	where
		F: FnMut() -> anyhow::Result<Value> + 'static,
	{
		Self {
			unit: Rc::new(Computation::create(Box::new(body), options.lazy())),
		}
	}

	/// Current value, recomputed first if stale
	///
	/// Inside a running computation, also links that computation to every
	/// source of this value.
	pub fn get(&self) -> Result<Value> {
		let value = self.unit.evaluate_if_dirty()?;
		if is_tracking() {
			self.unit.depend();
		}
		Ok(value)
	}

	pub fn is_dirty(&self) -> bool {
		self.unit.is_dirty()
	}

	/// The underlying lazy unit
	pub fn unit(&self) -> &Computation {
		&self.unit
	}
}

impl fmt::Debug for Computed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Computed")
			.field("unit", &self.unit.id())
			.field("dirty", &self.unit.is_dirty())
			.finish()
	}
}
