//! Scheduler - deduplicated, id-ordered batch flushing
//!
//! Notified units are queued once per flush and run in ascending id order.
//! Units queued while a flush is running are inserted into the unprocessed
//! part of the queue at their sorted position, so they still run in the same
//! pass.
//!
//! In [`FlushMode::Deferred`] the flush is registered on the tick queue and
//! runs at the next [`poll`](crate::tick::poll) (or whenever the installed
//! tick driver runs it). In [`FlushMode::Immediate`] it runs inside the first
//! enqueue.

use core::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::computation::{ComputationId, ComputationInner};
use crate::config::FlushMode;
use crate::error::{ReactiveError, Result};
use crate::runtime::{try_with_runtime, with_runtime};
use crate::tick::next_tick;

pub(crate) struct SchedulerState {
	queue: RefCell<Vec<Rc<ComputationInner>>>,
	/// Ids currently waiting in the queue
	has: RefCell<HashSet<ComputationId>>,
	/// Re-queue count per unit within the current flush
	circular: RefCell<HashMap<ComputationId, usize>>,
	index: Cell<usize>,
	flushing: Cell<bool>,
	waiting: Cell<bool>,
}

impl SchedulerState {
	pub(crate) fn new() -> Self {
		Self {
			queue: RefCell::new(Vec::new()),
			has: RefCell::new(HashSet::new()),
			circular: RefCell::new(HashMap::new()),
			index: Cell::new(0),
			flushing: Cell::new(false),
			waiting: Cell::new(false),
		}
	}

	/// Queue `unit`; returns whether a flush has to be scheduled
	fn push(&self, unit: &Rc<ComputationInner>) -> bool {
		let id = unit.id();
		if !self.has.borrow_mut().insert(id) {
			return false;
		}

		let mut queue = self.queue.borrow_mut();
		if self.flushing.get() {
			// Insert after the running unit, before the first larger id.
			let index = self.index.get();
			let mut i = queue.len();
			while i > index + 1 && queue[i - 1].id() > id {
				i -= 1;
			}
			queue.insert(i, unit.clone());
		} else {
			queue.push(unit.clone());
		}
		drop(queue);

		!self.waiting.replace(true)
	}

	fn current(&self) -> Option<Rc<ComputationInner>> {
		self.queue.borrow().get(self.index.get()).cloned()
	}

	fn reset(&self) {
		self.queue.borrow_mut().clear();
		self.has.borrow_mut().clear();
		self.circular.borrow_mut().clear();
		self.index.set(0);
		self.flushing.set(false);
		self.waiting.set(false);
	}
}

/// Hand a notified unit to the scheduler
pub(crate) fn enqueue(unit: &Rc<ComputationInner>) -> Result<()> {
	if unit.is_no_recurse()
		&& with_runtime(|rt| rt.current_target()).is_some_and(|target| Rc::ptr_eq(&target, unit))
	{
		return Ok(());
	}

	let (schedule, mode) = with_runtime(|rt| (rt.scheduler.push(unit), rt.config().flush_mode));
	if !schedule {
		return Ok(());
	}

	match mode {
		FlushMode::Immediate => flush(),
		FlushMode::Deferred => {
			next_tick(flush);
			Ok(())
		}
	}
}

/// Clears scheduler state when the flush ends, including by unwinding
struct ResetOnExit;

impl Drop for ResetOnExit {
	fn drop(&mut self) {
		let _ = try_with_runtime(|rt| rt.scheduler.reset());
	}
}

/// Run every queued unit
///
/// Errors from individual units do not stop the flush; the first one is
/// returned once the queue has drained. A unit re-queued more than
/// `max_update_count` times aborts the flush with
/// [`ReactiveError::InfiniteUpdateLoop`].
pub fn flush() -> Result<()> {
	if is_flushing() {
		return Ok(());
	}
	let limit = with_runtime(|rt| rt.config().max_update_count);
	let queued = with_runtime(|rt| {
		let state = &rt.scheduler;
		state.flushing.set(true);
		state.index.set(0);
		let mut queue = state.queue.borrow_mut();
		queue.sort_by_key(|unit| unit.id());
		queue.len()
	});
	tracing::debug!(queued, "flush started");

	let reset = ResetOnExit;
	let mut first_error: Option<ReactiveError> = None;
	let mut runaway: Option<ReactiveError> = None;
	let mut ran: Vec<Rc<ComputationInner>> = Vec::new();

	while let Some(unit) = with_runtime(|rt| rt.scheduler.current()) {
		let id = unit.id();
		if unit.is_active() {
			unit.call_before();
		}
		with_runtime(|rt| rt.scheduler.has.borrow_mut().remove(&id));

		if unit.is_active() {
			if let Err(err) = unit.run() {
				if first_error.is_none() {
					first_error = Some(err);
				} else {
					tracing::error!(unit = %id, error = %err, "computation failed during flush");
				}
			}
			if unit.is_primary() {
				ran.push(unit.clone());
			}
		}

		let count = with_runtime(|rt| {
			let state = &rt.scheduler;
			if !state.has.borrow().contains(&id) {
				return 0;
			}
			let mut circular = state.circular.borrow_mut();
			let count = circular.entry(id).or_insert(0);
			*count += 1;
			*count
		});
		if count > limit {
			tracing::error!(
				unit = %id,
				expression = unit.expression(),
				limit,
				"infinite update loop detected"
			);
			runaway = Some(ReactiveError::InfiniteUpdateLoop {
				unit: id,
				expression: unit.expression().to_string(),
				limit,
			});
			break;
		}

		with_runtime(|rt| rt.scheduler.index.set(rt.scheduler.index.get() + 1));
	}

	let processed = with_runtime(|rt| rt.scheduler.index.get());
	drop(reset);
	tracing::debug!(processed, "flush finished");

	// Descendants first; a unit re-queued within the flush is reported once.
	let mut notified = HashSet::new();
	for unit in ran.iter().rev() {
		if unit.is_active() && notified.insert(unit.id()) {
			unit.call_after();
		}
	}

	match runaway.or(first_error) {
		Some(err) => Err(err),
		None => Ok(()),
	}
}

/// Whether a flush is in progress on this thread
pub fn is_flushing() -> bool {
	with_runtime(|rt| rt.scheduler.flushing.get())
}

/// Whether a flush has been scheduled but not finished
pub fn is_waiting() -> bool {
	with_runtime(|rt| rt.scheduler.waiting.get())
}

/// Ids of the units waiting in the queue
pub fn pending_ids() -> Vec<ComputationId> {
	with_runtime(|rt| {
		let state = &rt.scheduler;
		let queue = state.queue.borrow();
		let start = if state.flushing.get() { state.index.get() + 1 } else { 0 };
		queue.iter().skip(start).map(|unit| unit.id()).collect()
	})
}
