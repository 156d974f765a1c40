//! Subject - change-notification publisher
//!
//! A [`Subject`] is bound to one tracked field, one container, or one reference
//! cell. It knows which computations subscribe to it and nothing about what
//! they do. Reads call [`Subject::depend`]; writes call [`Subject::notify`].
//!
//! Subscribers are held weakly: the graph never keeps a computation alive, and
//! entries whose computation is gone are pruned on the next notification.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::rc::{Rc, Weak};

use crate::computation::{Computation, ComputationId, ComputationInner};
use crate::config::FlushMode;
use crate::error::ReactiveError;
use crate::runtime::with_runtime;

/// Unique, strictly increasing identifier of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectId(usize);

impl SubjectId {
	fn next() -> Self {
		static COUNTER: AtomicUsize = AtomicUsize::new(0);
		Self(COUNTER.fetch_add(1, Ordering::Relaxed))
	}

	/// The raw numeric id
	pub fn get(self) -> usize {
		self.0
	}
}

impl fmt::Display for SubjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "subject#{}", self.0)
	}
}

struct SubjectInner {
	id: SubjectId,
	/// Insertion order is subscription order
	subscribers: RefCell<Vec<(ComputationId, Weak<ComputationInner>)>>,
}

/// A publisher of change notifications
///
/// Cloning a `Subject` creates a new handle to the same publisher.
#[derive(Clone)]
pub struct Subject {
	inner: Rc<SubjectInner>,
}

impl Subject {
	/// Create a subject with a fresh id
	pub fn new() -> Self {
		Self {
			inner: Rc::new(SubjectInner {
				id: SubjectId::next(),
				subscribers: RefCell::new(Vec::new()),
			}),
		}
	}

	/// The subject's id
	pub fn id(&self) -> SubjectId {
		self.inner.id
	}

	/// Append `unit` to the subscriber list if absent
	pub fn subscribe(&self, unit: &Computation) {
		self.link(unit.inner());
	}

	/// Remove `unit` from the subscriber list if present
	pub fn unsubscribe(&self, unit: &Computation) {
		self.unlink(unit.id());
	}

	pub(crate) fn link(&self, unit: &Rc<ComputationInner>) {
		let mut subscribers = self.inner.subscribers.borrow_mut();
		let id = unit.id();
		if subscribers.iter().any(|(existing, _)| *existing == id) {
			return;
		}
		subscribers.push((id, Rc::downgrade(unit)));
		tracing::trace!(subject = %self.inner.id, unit = %id, "subscribed");
	}

	pub(crate) fn unlink(&self, unit: ComputationId) {
		self.inner
			.subscribers
			.borrow_mut()
			.retain(|(existing, _)| *existing != unit);
		tracing::trace!(subject = %self.inner.id, unit = %unit, "unsubscribed");
	}

	/// Link this subject into the running computation's dependencies
	///
	/// Does nothing when no computation is active.
	pub fn depend(&self) {
		if let Some(target) = with_runtime(|rt| rt.current_target()) {
			target.add_dependency(self);
		}
	}

	/// Trigger every subscriber
	///
	/// A failing subscriber does not stop the others from being triggered; the
	/// first error is returned once all of them have been.
	///
	/// Iterates a snapshot taken before the first trigger, so subscribers that
	/// subscribe or unsubscribe during the walk do not affect it. In
	/// [`FlushMode::Immediate`] the snapshot is ordered by id, because nothing
	/// sorts the units later.
	pub fn notify(&self) -> Result<(), ReactiveError> {
		let mut snapshot: Vec<Rc<ComputationInner>> = {
			let mut subscribers = self.inner.subscribers.borrow_mut();
			subscribers.retain(|(_, unit)| unit.strong_count() > 0);
			subscribers
				.iter()
				.filter_map(|(_, unit)| unit.upgrade())
				.collect()
		};

		if with_runtime(|rt| rt.config().flush_mode) == FlushMode::Immediate {
			snapshot.sort_by_key(|unit| unit.id());
		}

		let mut first_error = None;
		for unit in snapshot {
			unit.notified_by(self.inner.id);
			if let Err(err) = unit.trigger() {
				if first_error.is_none() {
					first_error = Some(err);
				} else {
					tracing::error!(
						subject = %self.inner.id,
						unit = %unit.id(),
						error = %err,
						"subscriber failed during notify"
					);
				}
			}
		}
		first_error.map_or(Ok(()), Err)
	}

	/// Ids of the live subscribers, in subscription order
	pub fn subscriber_ids(&self) -> Vec<ComputationId> {
		self.inner
			.subscribers
			.borrow()
			.iter()
			.filter(|(_, unit)| unit.strong_count() > 0)
			.map(|(id, _)| *id)
			.collect()
	}

	/// Whether `unit` is subscribed
	pub fn has_subscriber(&self, unit: ComputationId) -> bool {
		self.inner
			.subscribers
			.borrow()
			.iter()
			.any(|(id, live)| *id == unit && live.strong_count() > 0)
	}

	/// Number of live subscribers
	pub fn subscriber_count(&self) -> usize {
		self.subscriber_ids().len()
	}
}

impl Default for Subject {
	fn default() -> Self {
		Self::new()
	}
}

impl PartialEq for Subject {
	fn eq(&self, other: &Self) -> bool {
		self.inner.id == other.inner.id
	}
}

impl Eq for Subject {}

impl fmt::Debug for Subject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subject")
			.field("id", &self.inner.id)
			.field("subscribers", &self.subscriber_ids())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::computation::ComputationOptions;
	use crate::observe::Value;
	use crate::tick::poll;
	use rstest::rstest;
	use serial_test::serial;
	use std::cell::Cell;

	fn counting_unit(subject: &Subject, runs: &Rc<Cell<usize>>) -> Computation {
		let subject = subject.clone();
		let runs = runs.clone();
		Computation::new(
			move || {
				subject.depend();
				runs.set(runs.get() + 1);
				Ok(Value::Null)
			},
			ComputationOptions::new(),
		)
		.unwrap()
	}

	#[rstest]
	#[serial(reactive)]
	fn test_subject_ids_strictly_increase() {
		let first = Subject::new();
		let second = Subject::new();
		assert!(first.id() < second.id());
	}

	#[rstest]
	#[serial(reactive)]
	fn test_subscribe_is_idempotent() {
		let subject = Subject::new();
		let unit = Computation::new(|| Ok(Value::Null), ComputationOptions::new()).unwrap();

		subject.subscribe(&unit);
		subject.subscribe(&unit);

		assert_eq!(subject.subscriber_ids(), vec![unit.id()]);
	}

	#[rstest]
	#[serial(reactive)]
	fn test_unsubscribe_absent_is_noop() {
		let subject = Subject::new();
		let unit = Computation::new(|| Ok(Value::Null), ComputationOptions::new()).unwrap();

		subject.unsubscribe(&unit);

		assert_eq!(subject.subscriber_count(), 0);
	}

	#[rstest]
	#[serial(reactive)]
	fn test_depend_without_target_links_nothing() {
		let subject = Subject::new();
		subject.depend();
		assert_eq!(subject.subscriber_count(), 0);
	}

	#[rstest]
	#[serial(reactive)]
	fn test_depend_inside_run_subscribes() {
		let subject = Subject::new();
		let runs = Rc::new(Cell::new(0));
		let unit = counting_unit(&subject, &runs);

		assert_eq!(runs.get(), 1);
		assert!(subject.has_subscriber(unit.id()));
	}

	#[rstest]
	#[serial(reactive)]
	fn test_notify_queues_subscribers() {
		let subject = Subject::new();
		let runs = Rc::new(Cell::new(0));
		let _unit = counting_unit(&subject, &runs);

		subject.notify().unwrap();
		assert_eq!(runs.get(), 1);

		poll().unwrap();
		assert_eq!(runs.get(), 2);
	}

	#[rstest]
	#[serial(reactive)]
	fn test_dropped_subscriber_is_pruned() {
		let subject = Subject::new();
		let runs = Rc::new(Cell::new(0));
		let unit = counting_unit(&subject, &runs);
		assert_eq!(subject.subscriber_count(), 1);

		drop(unit);
		subject.notify().unwrap();
		poll().unwrap();

		assert_eq!(subject.subscriber_count(), 0);
		assert_eq!(runs.get(), 1);
	}
}
