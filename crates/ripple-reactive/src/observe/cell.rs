//! Transparent reference cells

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use super::{Value, depend_value, observe_with};
use crate::error::Result;
use crate::runtime::is_tracking;
use crate::subject::Subject;

struct RefInner {
	value: RefCell<Value>,
	subject: Subject,
	shallow: bool,
}

/// A tracked single-value cell
///
/// Stored in a record field, a `Ref` is transparent: reading the field yields
/// the cell's value and writing a non-cell value to the field writes the cell.
#[derive(Clone)]
pub struct Ref {
	inner: Rc<RefInner>,
}

impl Ref {
	/// Create a cell; a container value is intercepted
	pub fn new(value: impl Into<Value>) -> Self {
		Self::with_shallow(value.into(), false)
	}

	/// Create a cell whose container value is left untracked
	pub fn shallow(value: impl Into<Value>) -> Self {
		Self::with_shallow(value.into(), true)
	}

	fn with_shallow(value: Value, shallow: bool) -> Self {
		if !shallow {
			observe_with(&value, false);
		}
		Self {
			inner: Rc::new(RefInner {
				value: RefCell::new(value),
				subject: Subject::new(),
				shallow,
			}),
		}
	}

	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	pub(crate) fn as_ptr(&self) -> *const () {
		Rc::as_ptr(&self.inner).cast()
	}

	pub fn subject(&self) -> &Subject {
		&self.inner.subject
	}

	/// Read, linking the cell (and a contained container) to the active subscriber
	pub fn get(&self) -> Value {
		let value = self.get_untracked();
		if is_tracking() {
			self.inner.subject.depend();
			if !self.inner.shallow {
				depend_value(&value);
			}
		}
		value
	}

	pub fn get_untracked(&self) -> Value {
		self.inner.value.borrow().clone()
	}

	/// Replace the value and notify, unless it is the same value
	pub fn set(&self, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		if self.inner.value.borrow().same_value(&value) {
			return Ok(());
		}
		if !self.inner.shallow {
			observe_with(&value, false);
		}
		*self.inner.value.borrow_mut() = value;
		self.inner.subject.notify()
	}
}

impl fmt::Debug for Ref {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Ref")
			.field("subject", &self.inner.subject.id())
			.field("shallow", &self.inner.shallow)
			.finish_non_exhaustive()
	}
}
