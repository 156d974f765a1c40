//! Interception layer
//!
//! Turns plain [`Record`]s and [`List`]s into tracked state. Interception is
//! idempotent and recursive: nested containers are intercepted along with
//! their parent, and containers stored later are intercepted when written.
//!
//! ## Tracking rules
//!
//! - A record field read links the field's subject. When the field holds a
//!   tracked container, that container's own subject is linked too, and for a
//!   list, the subject of every nested element container.
//! - A field write notifies the field's subject; adding or removing a field
//!   notifies the record's container-level subject.
//! - A list read links the list's container-level subject; every mutating
//!   list operation notifies it once.
//!
//! Interception is skipped for containers marked raw or frozen, and while
//! [`suspend_tracking`](crate::runtime::suspend_tracking) is in effect.
//!
//! ## Example
//!
//! ```
//! use ripple_reactive::observe::{Value, reactive};
//!
//! let state = reactive(serde_json::json!({ "todos": [] }));
//! let record = state.as_record().unwrap();
//! assert!(record.is_observed());
//!
//! let todos = record.get("todos");
//! assert!(todos.as_list().unwrap().is_observed());
//! ```

pub mod cell;
pub mod list;
pub mod record;
pub mod traverse;
pub mod value;

use std::collections::HashSet;

pub use cell::Ref;
pub use list::List;
pub use record::Record;
pub use value::Value;

use crate::error::{ReactiveError, Result};
use crate::runtime::{Runtime, is_tracking, with_runtime};
use crate::subject::Subject;

/// The hidden per-container marker of a tracked container
///
/// Holds the container-level subject, notified when the set of keys or
/// elements changes.
#[derive(Debug, Clone)]
pub struct Interceptor {
	subject: Subject,
	shallow: bool,
}

impl Interceptor {
	fn new(shallow: bool) -> Self {
		Self {
			subject: Subject::new(),
			shallow,
		}
	}

	pub fn subject(&self) -> &Subject {
		&self.subject
	}

	pub fn is_shallow(&self) -> bool {
		self.shallow
	}
}

/// Intercept a container (and everything nested in it)
///
/// Returns the container's marker, the existing one if it was already tracked.
/// Returns `None` for primitives, reference cells, and containers that must
/// not be tracked.
pub fn observe(value: &Value) -> Option<Interceptor> {
	observe_with(value, false)
}

/// Intercept a container's own fields only; nested containers stay plain
pub fn observe_shallow(value: &Value) -> Option<Interceptor> {
	observe_with(value, true)
}

pub(crate) fn observe_with(value: &Value, shallow: bool) -> Option<Interceptor> {
	match value {
		Value::Record(record) => {
			if let Some(existing) = record.interceptor() {
				return Some(existing);
			}
			if !with_runtime(Runtime::is_observing) || record.is_raw() || record.is_frozen() {
				return None;
			}
			Some(record.intercept(shallow))
		}
		Value::List(list) => {
			if let Some(existing) = list.interceptor() {
				return Some(existing);
			}
			if !with_runtime(Runtime::is_observing) || list.is_raw() || list.is_frozen() {
				return None;
			}
			Some(list.intercept(shallow))
		}
		_ => None,
	}
}

/// Convert into a [`Value`] and intercept it
pub fn reactive(value: impl Into<Value>) -> Value {
	let value = value.into();
	observe(&value);
	value
}

/// Whether `value` is a tracked container or a reference cell
pub fn is_reactive(value: &Value) -> bool {
	match value {
		Value::Record(record) => record.is_observed(),
		Value::List(list) => list.is_observed(),
		Value::Ref(_) => true,
		_ => false,
	}
}

/// Link nested container subjects of a value just read through a trap
pub(crate) fn depend_value(value: &Value) {
	match value {
		Value::Record(record) => {
			if let Some(interceptor) = record.interceptor() {
				interceptor.subject().depend();
			}
		}
		Value::List(list) => {
			if let Some(interceptor) = list.interceptor() {
				interceptor.subject().depend();
				list.depend_elements(&mut HashSet::new());
			}
		}
		_ => {}
	}
}

/// Manually link the active subscriber to the subjects carried by `value`
///
/// For values read outside the field traps: a tracked container links its
/// container-level subject (and, for a list, its element containers), a
/// reference cell links its own subject.
pub fn track(value: &Value) {
	if !is_tracking() {
		return;
	}
	if let Value::Ref(cell) = value {
		cell.subject().depend();
		depend_value(&cell.get_untracked());
		return;
	}
	depend_value(value);
}

/// Key of a record field or a list element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
	Field(String),
	Index(usize),
}

impl From<&str> for Key {
	fn from(key: &str) -> Self {
		Self::Field(key.to_string())
	}
}

impl From<String> for Key {
	fn from(key: String) -> Self {
		Self::Field(key)
	}
}

impl From<usize> for Key {
	fn from(index: usize) -> Self {
		Self::Index(index)
	}
}

impl Key {
	fn describe(&self) -> String {
		match self {
			Self::Field(key) => key.clone(),
			Self::Index(index) => index.to_string(),
		}
	}
}

/// Set a field or element, adding it when missing
///
/// On a record this is [`Record::set`] (a missing key becomes a new tracked
/// field). On a list an index past the end pads with [`Value::Null`].
///
/// # Errors
///
/// [`ReactiveError::NotAContainer`] when `target` is not a container or the
/// key kind does not match it.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
	match (target, key.into()) {
		(Value::Record(record), Key::Field(key)) => record.set(key, value),
		(Value::List(list), Key::Index(index)) => list.set(index, value),
		(Value::Ref(cell), key) => set(&cell.get_untracked(), key, value),
		(_, key) => Err(not_a_container(&key)),
	}
}

/// Delete a field or element
///
/// Returns the removed value; a missing field or out-of-range index is a no-op returning `None`.
pub fn delete(target: &Value, key: impl Into<Key>) -> Result<Option<Value>> {
	match (target, key.into()) {
		(Value::Record(record), Key::Field(key)) => record.remove(&key),
		(Value::List(list), Key::Index(index)) => {
			if index >= list.len_untracked() {
				return Ok(None);
			}
			list.splice(index, 1, Vec::<Value>::new())
				.map(|mut removed| removed.pop())
		}
		(Value::Ref(cell), key) => delete(&cell.get_untracked(), key),
		(_, key) => Err(not_a_container(&key)),
	}
}

fn not_a_container(key: &Key) -> ReactiveError {
	let key = key.describe();
	tracing::warn!(key = %key, "cannot set reactive property on a non-container value");
	ReactiveError::NotAContainer { key }
}
