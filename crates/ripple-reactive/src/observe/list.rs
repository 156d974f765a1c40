//! Tracked lists
//!
//! Elements of a [`List`] have no per-index subjects. Every read links the
//! list's container-level subject and every size-changing or reordering
//! operation notifies it exactly once.

use core::cell::{Cell, RefCell};
use core::cmp::Ordering;
use core::fmt;
use std::collections::HashSet;
use std::rc::Rc;

use super::{Interceptor, Value, observe_with};
use crate::error::{ReactiveError, Result};
use crate::runtime::is_tracking;

struct ListInner {
	items: RefCell<Vec<Value>>,
	interceptor: RefCell<Option<Interceptor>>,
	raw: Cell<bool>,
	frozen: Cell<bool>,
}

/// An indexable sequence of values
#[derive(Clone)]
pub struct List {
	inner: Rc<ListInner>,
}

impl List {
	/// Create an empty, untracked list
	pub fn new() -> Self {
		Self::from_vec(Vec::new())
	}

	fn from_vec(items: Vec<Value>) -> Self {
		Self {
			inner: Rc::new(ListInner {
				items: RefCell::new(items),
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

	/// The interception marker, if the list is tracked
	pub fn interceptor(&self) -> Option<Interceptor> {
		self.inner.interceptor.borrow().clone()
	}

	pub fn is_observed(&self) -> bool {
		self.inner.interceptor.borrow().is_some()
	}

	pub(crate) fn intercept(&self, shallow: bool) -> Interceptor {
		if let Some(existing) = self.interceptor() {
			return existing;
		}

		let interceptor = Interceptor::new(shallow);
		*self.inner.interceptor.borrow_mut() = Some(interceptor.clone());
		if !shallow {
			for item in &self.to_vec_untracked() {
				observe_with(item, false);
			}
		}

		tracing::trace!(subject = %interceptor.subject().id(), shallow, "list intercepted");
		interceptor
	}

	/// Never intercept this list
	pub fn mark_raw(&self) -> &Self {
		self.inner.raw.set(true);
		self
	}

	pub fn is_raw(&self) -> bool {
		self.inner.raw.get()
	}

	/// Reject every further mutation and skip the list during traversal
	pub fn freeze(&self) -> &Self {
		self.inner.frozen.set(true);
		self
	}

	pub fn is_frozen(&self) -> bool {
		self.inner.frozen.get()
	}

	/// Link the container-level subject to the active subscriber
	pub fn depend(&self) {
		if !is_tracking() {
			return;
		}
		if let Some(interceptor) = self.interceptor() {
			interceptor.subject().depend();
		}
	}

	/// Link the container-level subject of every nested element
	///
	/// Element membership cannot be trapped per index, so a reader of the list
	/// depends on each element container as a whole. Nested lists are followed.
	pub(crate) fn depend_elements(&self, seen: &mut HashSet<*const ()>) {
		if !seen.insert(self.as_ptr()) {
			return;
		}
		for item in self.to_vec_untracked() {
			match &item {
				Value::Record(record) => {
					if let Some(interceptor) = record.interceptor() {
						interceptor.subject().depend();
					}
				}
				Value::List(list) => {
					if let Some(interceptor) = list.interceptor() {
						interceptor.subject().depend();
					}
					list.depend_elements(seen);
				}
				_ => {}
			}
		}
	}

	pub fn get(&self, index: usize) -> Value {
		self.depend();
		self.get_untracked(index)
	}

	pub fn get_untracked(&self, index: usize) -> Value {
		self.inner.items.borrow().get(index).cloned().unwrap_or_default()
	}

	pub fn len(&self) -> usize {
		self.depend();
		self.len_untracked()
	}

	pub fn len_untracked(&self) -> usize {
		self.inner.items.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// A snapshot of the elements, linking the container-level subject
	pub fn to_vec(&self) -> Vec<Value> {
		self.depend();
		self.to_vec_untracked()
	}

	pub fn to_vec_untracked(&self) -> Vec<Value> {
		self.inner.items.borrow().clone()
	}

	fn ensure_mutable(&self, operation: &str) -> Result<()> {
		if self.is_frozen() {
			tracing::warn!(operation, "attempted to mutate a frozen list");
			return Err(ReactiveError::Frozen {
				key: operation.to_string(),
			});
		}
		Ok(())
	}

	/// Apply a primitive operation, then track inserted elements and notify once
	fn mutate<R>(&self, operation: &str, apply: impl FnOnce(&mut Vec<Value>) -> Result<(R, Vec<Value>)>) -> Result<R> {
		self.ensure_mutable(operation)?;

		let (result, inserted) = {
			let mut items = self.inner.items.borrow_mut();
			apply(&mut items)?
		};

		if let Some(interceptor) = self.interceptor() {
			if !interceptor.is_shallow() {
				for item in &inserted {
					observe_with(item, false);
				}
			}
			interceptor.subject().notify()?;
		}
		Ok(result)
	}

	/// Append an element
	pub fn push(&self, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		self.mutate("push", |items| {
			items.push(value.clone());
			Ok(((), vec![value]))
		})
	}

	/// Append every element of `values` with a single notification
	pub fn extend<I, V>(&self, values: I) -> Result<()>
	where
		I: IntoIterator<Item = V>,
		V: Into<Value>,
	{
		let values: Vec<Value> = values.into_iter().map(Into::into).collect();
		self.mutate("push", |items| {
			items.extend(values.iter().cloned());
			Ok(((), values))
		})
	}

	/// Remove the last element
	pub fn pop(&self) -> Result<Option<Value>> {
		self.mutate("pop", |items| Ok((items.pop(), Vec::new())))
	}

	/// Remove the first element
	pub fn shift(&self) -> Result<Option<Value>> {
		self.mutate("shift", |items| {
			let first = if items.is_empty() { None } else { Some(items.remove(0)) };
			Ok((first, Vec::new()))
		})
	}

	/// Prepend an element
	pub fn unshift(&self, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		self.mutate("unshift", |items| {
			items.insert(0, value.clone());
			Ok(((), vec![value]))
		})
	}

	/// Insert at `index`; `index == len` appends
	pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		self.mutate("insert", |items| {
			if index > items.len() {
				return Err(ReactiveError::InvalidIndex { index, len: items.len() });
			}
			items.insert(index, value.clone());
			Ok(((), vec![value]))
		})
	}

	/// Remove and return the element at `index`
	pub fn remove(&self, index: usize) -> Result<Value> {
		self.mutate("remove", |items| {
			if index >= items.len() {
				return Err(ReactiveError::InvalidIndex { index, len: items.len() });
			}
			Ok((items.remove(index), Vec::new()))
		})
	}

	/// Replace `delete_count` elements starting at `start` with `values`
	///
	/// `start` and `delete_count` are clamped to the list. Returns the removed elements.
	pub fn splice<I, V>(&self, start: usize, delete_count: usize, values: I) -> Result<Vec<Value>>
	where
		I: IntoIterator<Item = V>,
		V: Into<Value>,
	{
		let values: Vec<Value> = values.into_iter().map(Into::into).collect();
		self.mutate("splice", |items| {
			let start = start.min(items.len());
			let end = start.saturating_add(delete_count).min(items.len());
			let removed = items.splice(start..end, values.iter().cloned()).collect();
			Ok((removed, values))
		})
	}

	/// Write the element at `index`
	///
	/// Writing past the end pads the gap with [`Value::Null`]. An index whose
	/// padding cannot be allocated fails with [`ReactiveError::InvalidIndex`].
	pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		self.mutate("set", |items| {
			if index >= items.len() {
				let len = items.len();
				let grow = (index - len).checked_add(1);
				if grow.is_none_or(|additional| items.try_reserve(additional).is_err()) {
					return Err(ReactiveError::InvalidIndex { index, len });
				}
				items.resize(index, Value::Null);
				items.push(value.clone());
			} else {
				items[index] = value.clone();
			}
			Ok(((), vec![value]))
		})
	}

	/// Shorten the list to `len` elements
	pub fn truncate(&self, len: usize) -> Result<()> {
		self.mutate("truncate", |items| {
			items.truncate(len);
			Ok(((), Vec::new()))
		})
	}

	pub fn clear(&self) -> Result<()> {
		self.truncate(0)
	}

	/// Sort in place with a comparator
	///
	/// The comparator runs over a copy; the list keeps its previous order until
	/// the sort completes, and is left untouched if the comparator panics.
	/// Writes to this list from inside the comparator are replaced by the
	/// sorted result.
	pub fn sort_by<F>(&self, compare: F) -> Result<()>
	where
		F: FnMut(&Value, &Value) -> Ordering,
	{
		self.ensure_mutable("sort")?;
		let mut sorted = self.to_vec_untracked();
		sorted.sort_by(compare);
		self.mutate("sort", |items| {
			*items = sorted;
			Ok(((), Vec::new()))
		})
	}

	pub fn reverse(&self) -> Result<()> {
		self.mutate("reverse", |items| {
			items.reverse();
			Ok(((), Vec::new()))
		})
	}
}

impl Default for List {
	fn default() -> Self {
		Self::new()
	}
}

impl<V: Into<Value>> FromIterator<V> for List {
	fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
		Self::from_vec(iter.into_iter().map(Into::into).collect())
	}
}

impl fmt::Debug for List {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("List")
			.field("len", &self.len_untracked())
			.field("observed", &self.is_observed())
			.finish()
	}
}
