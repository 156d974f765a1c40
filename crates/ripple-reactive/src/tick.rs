//! Deferred callback queue
//!
//! [`next_tick`] collects callbacks for the next scheduling turn. The
//! scheduler registers its flush here in deferred mode, so a callback
//! registered after a mutation observes the state after that mutation's flush.
//!
//! Nothing runs the queue by itself. A host either installs a driver with
//! [`set_tick_driver`] (for example one that spawns a microtask on its event
//! loop) or calls [`poll`] / [`flush_all`] at its own cadence.

use core::cell::{Cell, RefCell};
use core::future::Future;
use std::rc::Rc;

use futures::channel::oneshot;

use crate::error::Result;
use crate::runtime::{report_uncaught, with_runtime};

type Callback = Box<dyn FnOnce() -> Result<()>>;

/// Unit of work handed to a tick driver
pub type TickTask = Box<dyn FnOnce()>;

type Driver = Rc<dyn Fn(TickTask)>;

pub(crate) struct TickQueue {
	callbacks: RefCell<Vec<Callback>>,
	pending: Cell<bool>,
	driver: RefCell<Option<Driver>>,
}

impl TickQueue {
	pub(crate) fn new() -> Self {
		Self {
			callbacks: RefCell::new(Vec::new()),
			pending: Cell::new(false),
			driver: RefCell::new(None),
		}
	}
}

/// Register `callback` for the next tick
///
/// The first callback of a tick asks the driver, if any, to schedule a
/// [`poll`]. Errors raised while the driver runs the tick go to the error
/// channel.
pub fn next_tick<F>(callback: F)
where
	F: FnOnce() -> Result<()> + 'static,
{
	let first = with_runtime(|rt| {
		rt.ticks.callbacks.borrow_mut().push(Box::new(callback));
		!rt.ticks.pending.replace(true)
	});
	if !first {
		return;
	}

	if let Some(driver) = with_runtime(|rt| rt.ticks.driver.borrow().clone()) {
		driver(Box::new(|| {
			if let Err(err) = poll() {
				report_uncaught(err);
			}
		}));
	}
}

/// Run the callbacks registered for the current tick
///
/// Callbacks registered while the batch runs belong to the next tick. Every
/// callback runs; the first error is returned.
pub fn poll() -> Result<()> {
	let batch = with_runtime(|rt| {
		rt.ticks.pending.set(false);
		rt.ticks.callbacks.take()
	});
	if batch.is_empty() {
		return Ok(());
	}
	tracing::trace!(callbacks = batch.len(), "running tick");

	let mut first_error = None;
	for callback in batch {
		if let Err(err) = callback() {
			if first_error.is_none() {
				first_error = Some(err);
			} else {
				tracing::error!(error = %err, "tick callback failed");
			}
		}
	}

	match first_error {
		Some(err) => Err(err),
		None => Ok(()),
	}
}

/// Poll until no tick is pending
///
/// Stops after `max_update_count` rounds when callbacks keep scheduling new ticks.
pub fn flush_all() -> Result<()> {
	let limit = with_runtime(|rt| rt.config().max_update_count);
	let mut first_error = None;
	let mut rounds = 0;

	while is_tick_pending() {
		if rounds == limit {
			tracing::warn!(rounds, "ticks keep rescheduling, giving up");
			break;
		}
		rounds += 1;
		if let Err(err) = poll() {
			if first_error.is_none() {
				first_error = Some(err);
			} else {
				tracing::error!(error = %err, "tick callback failed");
			}
		}
	}

	match first_error {
		Some(err) => Err(err),
		None => Ok(()),
	}
}

/// Whether callbacks are waiting for the next tick
pub fn is_tick_pending() -> bool {
	with_runtime(|rt| rt.ticks.pending.get())
}

/// Install the host hook that schedules ticks
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use ripple_reactive::tick::{TickTask, clear_tick_driver, next_tick, set_tick_driver};
///
/// let tasks: Rc<RefCell<Vec<TickTask>>> = Rc::default();
/// let queue = tasks.clone();
/// set_tick_driver(move |task| queue.borrow_mut().push(task));
///
/// next_tick(|| Ok(()));
/// for task in tasks.borrow_mut().drain(..) {
/// 	task();
/// }
/// clear_tick_driver();
/// ```
pub fn set_tick_driver<F>(driver: F)
where
	F: Fn(TickTask) + 'static,
{
	with_runtime(|rt| *rt.ticks.driver.borrow_mut() = Some(Rc::new(driver)));
}

/// Remove the tick driver; ticks are then only run by [`poll`]
pub fn clear_tick_driver() {
	with_runtime(|rt| *rt.ticks.driver.borrow_mut() = None);
}

/// A future that resolves once the next tick has run
///
/// Registered like any other callback, so it resolves after every flush that
/// was already scheduled when it was created.
pub fn tick() -> impl Future<Output = ()> {
	let (sender, receiver) = oneshot::channel::<()>();
	next_tick(move || {
		let _ = sender.send(());
		Ok(())
	});
	async move {
		let _ = receiver.await;
	}
}
