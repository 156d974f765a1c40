//! Tracked records
//!
//! A [`Record`] is an insertion-ordered map of fields. Once intercepted, every
//! field carries its own [`Subject`] and the record carries a container-level
//! subject (on its [`Interceptor`]) for changes to its set of keys.

use core::cell::{Cell, RefCell};
use core::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{Interceptor, Value, depend_value, observe_with};
use crate::error::{ReactiveError, Result};
use crate::runtime::is_tracking;
use crate::subject::Subject;

struct Field {
	value: Value,
	/// `None` until the record is intercepted
	subject: Option<Subject>,
	shallow: bool,
}

struct RecordInner {
	fields: RefCell<IndexMap<String, Field>>,
	interceptor: RefCell<Option<Interceptor>>,
	raw: Cell<bool>,
	frozen: Cell<bool>,
}

/// Outcome of a write, decided while the field map is borrowed
enum Write {
	Unchanged,
	Cell(super::Ref, Value),
	Stored(Option<Subject>, bool, Value),
	Missing(Value),
}

/// An insertion-ordered record of fields
#[derive(Clone)]
pub struct Record {
	inner: Rc<RecordInner>,
}

impl Record {
	/// Create an empty, untracked record
	pub fn new() -> Self {
		Self {
			inner: Rc::new(RecordInner {
				fields: RefCell::new(IndexMap::new()),
				interceptor: RefCell::new(None),
				raw: Cell::new(false),
				frozen: Cell::new(false),
			}),
		}
	}

	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	pub(crate) fn as_ptr(&self) -> *const () {
		Rc::as_ptr(&self.inner).cast()
	}

	/// The interception marker, if the record is tracked
	pub fn interceptor(&self) -> Option<Interceptor> {
		self.inner.interceptor.borrow().clone()
	}

	pub fn is_observed(&self) -> bool {
		self.inner.interceptor.borrow().is_some()
	}

	/// Install field traps; a no-op returning the existing marker when already tracked
	pub(crate) fn intercept(&self, shallow: bool) -> Interceptor {
		if let Some(existing) = self.interceptor() {
			return existing;
		}

		// The marker goes in first so that cycles back to this record stop here.
		let interceptor = Interceptor::new(shallow);
		*self.inner.interceptor.borrow_mut() = Some(interceptor.clone());

		let children: Vec<Value> = {
			let mut fields = self.inner.fields.borrow_mut();
			for field in fields.values_mut() {
				field.subject.get_or_insert_with(Subject::new);
				field.shallow = shallow;
			}
			if shallow {
				Vec::new()
			} else {
				fields.values().map(|field| field.value.clone()).collect()
			}
		};
		for child in &children {
			observe_with(child, false);
		}

		tracing::trace!(subject = %interceptor.subject().id(), shallow, "record intercepted");
		interceptor
	}

	/// Never intercept this record
	pub fn mark_raw(&self) -> &Self {
		self.inner.raw.set(true);
		self
	}

	pub fn is_raw(&self) -> bool {
		self.inner.raw.get()
	}

	/// Reject every further change and skip the record during traversal
	pub fn freeze(&self) -> &Self {
		self.inner.frozen.set(true);
		self
	}

	pub fn is_frozen(&self) -> bool {
		self.inner.frozen.get()
	}

	fn ensure_mutable(&self, key: &str) -> Result<()> {
		if self.is_frozen() {
			tracing::warn!(key, "attempted to change a frozen record");
			return Err(ReactiveError::Frozen { key: key.to_string() });
		}
		Ok(())
	}

	/// Link the container-level subject to the active subscriber
	pub(crate) fn depend_container(&self) {
		if !is_tracking() {
			return;
		}
		if let Some(interceptor) = self.interceptor() {
			interceptor.subject().depend();
		}
	}

	/// Read trap
	///
	/// Links the field's subject and, for container values, the nested
	/// container's own subject. Reference cells are read through. A missing key
	/// links the container-level subject, so a later [`add_field`](Self::add_field)
	/// re-runs the reader, and yields [`Value::Null`].
	pub fn get(&self, key: &str) -> Value {
		let found = self
			.inner
			.fields
			.borrow()
			.get(key)
			.map(|field| (field.value.clone(), field.subject.clone(), field.shallow));

		let Some((value, subject, shallow)) = found else {
			self.depend_container();
			return Value::Null;
		};

		if let Some(subject) = subject
			&& is_tracking()
		{
			subject.depend();
			if !shallow {
				depend_value(&value);
			}
		}

		match value {
			Value::Ref(cell) if !shallow => cell.get(),
			value => value,
		}
	}

	/// Read a field without linking anything
	pub fn get_untracked(&self, key: &str) -> Value {
		self.inner
			.fields
			.borrow()
			.get(key)
			.map(|field| field.value.clone())
			.unwrap_or_default()
	}

	/// Write trap
	///
	/// Unchanged values (see [`Value::same_value`]) are ignored. A field holding
	/// a reference cell is written through the cell. Writing a missing key adds
	/// the field.
	///
	/// # Errors
	///
	/// Fails on a frozen record, or with the error of a computation re-run
	/// synchronously by the notification.
	pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
		let key = key.into();
		let value = value.into();
		self.ensure_mutable(&key)?;

		let write = {
			let mut fields = self.inner.fields.borrow_mut();
			match fields.get_mut(&key) {
				None => Write::Missing(value),
				Some(field) if field.value.same_value(&value) => Write::Unchanged,
				Some(field) => {
					let through = match &field.value {
						Value::Ref(cell) if !field.shallow && !matches!(value, Value::Ref(_)) => Some(cell.clone()),
						_ => None,
					};
					match through {
						Some(cell) => Write::Cell(cell, value),
						None => {
							field.value = value.clone();
							Write::Stored(field.subject.clone(), field.shallow, value)
						}
					}
				}
			}
		};

		match write {
			Write::Unchanged => Ok(()),
			Write::Cell(cell, value) => cell.set(value),
			Write::Stored(None, _, _) => Ok(()),
			Write::Stored(Some(subject), shallow, value) => {
				if !shallow {
					observe_with(&value, false);
				}
				subject.notify()
			}
			Write::Missing(value) => self.add_field(key, value),
		}
	}

	/// Define a new field and notify the container-level subject
	///
	/// On an existing key this is a plain [`set`](Self::set). On an untracked
	/// record the field is stored without a subject.
	pub fn add_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
		let key = key.into();
		let value = value.into();
		self.ensure_mutable(&key)?;

		if self.inner.fields.borrow().contains_key(&key) {
			return self.set(key, value);
		}

		let interceptor = self.interceptor();
		let field = Field {
			value: value.clone(),
			subject: interceptor.as_ref().map(|_| Subject::new()),
			shallow: interceptor.as_ref().is_some_and(Interceptor::is_shallow),
		};
		self.inner.fields.borrow_mut().insert(key, field);

		let Some(interceptor) = interceptor else {
			return Ok(());
		};
		if !interceptor.is_shallow() {
			observe_with(&value, false);
		}
		interceptor.subject().notify()
	}

	/// Remove a field, notifying the container-level subject
	///
	/// Returns the removed value, or `None` when the key was absent.
	pub fn remove(&self, key: &str) -> Result<Option<Value>> {
		self.ensure_mutable(key)?;

		let removed = self.inner.fields.borrow_mut().shift_remove(key);
		let Some(field) = removed else {
			return Ok(None);
		};
		if let Some(interceptor) = self.interceptor() {
			interceptor.subject().notify()?;
		}
		Ok(Some(field.value))
	}

	/// The subject of one field, if the record is tracked
	pub fn field_subject(&self, key: &str) -> Option<Subject> {
		self.inner
			.fields
			.borrow()
			.get(key)
			.and_then(|field| field.subject.clone())
	}

	/// Field names, linking the container-level subject
	pub fn keys(&self) -> Vec<String> {
		self.depend_container();
		self.keys_untracked()
	}

	pub fn keys_untracked(&self) -> Vec<String> {
		self.inner.fields.borrow().keys().cloned().collect()
	}

	/// Every field through the read trap, linking the container-level subject too
	pub fn entries(&self) -> Vec<(String, Value)> {
		self.keys()
			.into_iter()
			.map(|key| {
				let value = self.get(&key);
				(key, value)
			})
			.collect()
	}

	pub(crate) fn entries_untracked(&self) -> Vec<(String, Value)> {
		self.inner
			.fields
			.borrow()
			.iter()
			.map(|(key, field)| (key.clone(), field.value.clone()))
			.collect()
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.depend_container();
		self.inner.fields.borrow().contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.depend_container();
		self.inner.fields.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for Record {
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V> FromIterator<(K, V)> for Record
where
	K: Into<String>,
	V: Into<Value>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let record = Self::new();
		{
			let mut fields = record.inner.fields.borrow_mut();
			for (key, value) in iter {
				fields.insert(
					key.into(),
					Field {
						value: value.into(),
						subject: None,
						shallow: false,
					},
				);
			}
		}
		record
	}
}

impl fmt::Debug for Record {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Record")
			.field("keys", &self.keys_untracked())
			.field("observed", &self.is_observed())
			.finish()
	}
}
