//! The tagged value model
//!
//! [`Value`] is what flows through record fields, list elements, reference
//! cells and computation results. Containers are `Rc` handles: cloning a
//! [`Value::Record`] yields another handle to the same record.

use core::any::Any;
use core::fmt;
use std::collections::HashSet;
use std::rc::Rc;

use super::cell::Ref;
use super::list::List;
use super::record::Record;

/// A value held by tracked state
#[derive(Clone, Default)]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(Rc<str>),
	Record(Record),
	List(List),
	Ref(Ref),
	/// Host-supplied payload, compared by identity and never traversed
	Opaque(Rc<dyn Any>),
}

impl Value {
	/// Wrap a host value
	pub fn opaque<T: Any>(value: T) -> Self {
		Self::Opaque(Rc::new(value))
	}

	/// The change check used by write traps
	///
	/// Primitives compare by value, with `NaN` equal to itself and `0.0`
	/// distinct from `-0.0`. Containers, cells and opaque payloads compare by
	/// identity. Values of different variants are never the same, so `Int(1)`
	/// and `Float(1.0)` differ.
	pub fn same_value(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Null, Self::Null) => true,
			(Self::Bool(a), Self::Bool(b)) => a == b,
			(Self::Int(a), Self::Int(b)) => a == b,
			(Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()),
			(Self::Str(a), Self::Str(b)) => a == b,
			(Self::Record(a), Self::Record(b)) => a.ptr_eq(b),
			(Self::List(a), Self::List(b)) => a.ptr_eq(b),
			(Self::Ref(a), Self::Ref(b)) => a.ptr_eq(b),
			(Self::Opaque(a), Self::Opaque(b)) => core::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
			_ => false,
		}
	}

	/// Whether the value is compared by identity rather than by content
	pub fn has_identity(&self) -> bool {
		matches!(self, Self::Record(_) | Self::List(_) | Self::Ref(_) | Self::Opaque(_))
	}

	/// Whether the value is a record or a list
	pub fn is_container(&self) -> bool {
		matches!(self, Self::Record(_) | Self::List(_))
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(n) => Some(*n),
			_ => None,
		}
	}

	/// Numeric view; integers are widened
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Int(n) => Some(*n as f64),
			Self::Float(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_record(&self) -> Option<&Record> {
		match self {
			Self::Record(record) => Some(record),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&List> {
		match self {
			Self::List(list) => Some(list),
			_ => None,
		}
	}

	pub fn as_ref_cell(&self) -> Option<&Ref> {
		match self {
			Self::Ref(cell) => Some(cell),
			_ => None,
		}
	}

	/// Borrow an opaque payload as `T`
	pub fn downcast<T: Any>(&self) -> Option<&T> {
		match self {
			Self::Opaque(payload) => payload.downcast_ref(),
			_ => None,
		}
	}

	/// Address of the shared allocation, for cycle detection
	pub(crate) fn identity(&self) -> Option<*const ()> {
		match self {
			Self::Record(record) => Some(record.as_ptr()),
			Self::List(list) => Some(list.as_ptr()),
			Self::Ref(cell) => Some(cell.as_ptr()),
			_ => None,
		}
	}

	/// Snapshot as JSON without linking any dependency
	///
	/// Reference cells are unwrapped, opaque payloads and repeated containers
	/// on the current path (cycles) become `null`, and non-finite floats
	/// become `null`.
	pub fn to_json(&self) -> serde_json::Value {
		let mut path = HashSet::new();
		self.to_json_inner(&mut path)
	}

	fn to_json_inner(&self, path: &mut HashSet<*const ()>) -> serde_json::Value {
		use serde_json::Value as Json;

		if let Some(id) = self.identity()
			&& !path.insert(id)
		{
			return Json::Null;
		}

		let json = match self {
			Self::Null | Self::Opaque(_) => Json::Null,
			Self::Bool(b) => Json::Bool(*b),
			Self::Int(n) => Json::from(*n),
			Self::Float(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
			Self::Str(s) => Json::String(s.to_string()),
			Self::Record(record) => Json::Object(
				record
					.entries_untracked()
					.into_iter()
					.map(|(key, value)| (key, value.to_json_inner(path)))
					.collect(),
			),
			Self::List(list) => Json::Array(
				list.to_vec_untracked()
					.iter()
					.map(|value| value.to_json_inner(path))
					.collect(),
			),
			Self::Ref(cell) => cell.get_untracked().to_json_inner(path),
		};

		if let Some(id) = self.identity() {
			path.remove(&id);
		}
		json
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		self.same_value(other)
	}
}

impl fmt::Debug for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Null => f.write_str("Null"),
			Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
			Self::Int(n) => f.debug_tuple("Int").field(n).finish(),
			Self::Float(n) => f.debug_tuple("Float").field(n).finish(),
			Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
			Self::Record(record) => fmt::Debug::fmt(record, f),
			Self::List(list) => fmt::Debug::fmt(list, f),
			Self::Ref(cell) => fmt::Debug::fmt(cell, f),
			Self::Opaque(_) => f.write_str("Opaque(..)"),
		}
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Self::Int(i64::from(value))
	}
}

impl From<usize> for Value {
	fn from(value: usize) -> Self {
		i64::try_from(value).map_or(Self::Float(value as f64), Self::Int)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::Str(Rc::from(value))
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::Str(Rc::from(value))
	}
}

impl From<Record> for Value {
	fn from(value: Record) -> Self {
		Self::Record(value)
	}
}

impl From<List> for Value {
	fn from(value: List) -> Self {
		Self::List(value)
	}
}

impl From<Ref> for Value {
	fn from(value: Ref) -> Self {
		Self::Ref(value)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::Null, Into::into)
	}
}

/// Builds plain (not yet tracked) containers
impl From<serde_json::Value> for Value {
	fn from(value: serde_json::Value) -> Self {
		use serde_json::Value as Json;

		match value {
			Json::Null => Self::Null,
			Json::Bool(b) => Self::Bool(b),
			Json::Number(n) => match n.as_i64() {
				Some(int) => Self::Int(int),
				None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
			},
			Json::String(s) => Self::from(s),
			Json::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
			Json::Object(fields) => Self::Record(fields.into_iter().map(|(key, value)| (key, Self::from(value))).collect()),
		}
	}
}
