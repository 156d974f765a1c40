//! Reactive Runtime
//!
//! This module holds the per-thread state shared by every subject, computation
//! and tracked container:
//!
//! 1. **Active-Subscriber Context**: a stack of the computations currently
//!    running; the top frame is the one read traps link dependencies to.
//!    A `None` frame suspends tracking (see [`untracked`]).
//! 2. **Tracking switch**: a flag that, while off, leaves new containers
//!    uninstrumented (see [`suspend_tracking`]).
//! 3. **Scheduler and tick queues**: pending computations and deferred callbacks.
//! 4. **Channels**: the installed [`ReactiveConfig`], error handler and warning handler.
//!
//! The model is single-threaded and cooperative. Each thread owns a separate
//! runtime; values created on one thread must not be used from another.

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::computation::ComputationInner;
use crate::config::ReactiveConfig;
use crate::error::ReactiveError;
use crate::scheduler::SchedulerState;
use crate::tick::TickQueue;

/// Handler invoked with errors and warnings raised by the engine
pub(crate) type Handler = Rc<dyn Fn(&ReactiveError)>;

/// Per-thread reactive runtime
pub struct Runtime {
	/// Active-subscriber stack
	target_stack: RefCell<Vec<Option<Rc<ComputationInner>>>>,
	/// Whether new containers get instrumented
	observing: Cell<bool>,
	config: RefCell<ReactiveConfig>,
	error_handler: RefCell<Option<Handler>>,
	warn_handler: RefCell<Option<Handler>>,
	pub(crate) scheduler: SchedulerState,
	pub(crate) ticks: TickQueue,
}

impl Runtime {
	/// Create a new Runtime instance
	pub fn new() -> Self {
		Self {
			target_stack: RefCell::new(Vec::new()),
			observing: Cell::new(true),
			config: RefCell::new(ReactiveConfig::default()),
			error_handler: RefCell::new(None),
			warn_handler: RefCell::new(None),
			scheduler: SchedulerState::new(),
			ticks: TickQueue::new(),
		}
	}

	/// The computation whose dependencies are being collected, if any
	pub(crate) fn current_target(&self) -> Option<Rc<ComputationInner>> {
		self.target_stack.borrow().last().cloned().flatten()
	}

	/// Whether a read right now would link a dependency
	pub fn is_tracking(&self) -> bool {
		matches!(self.target_stack.borrow().last(), Some(Some(_)))
	}

	/// Depth of the context stack, counting suspended frames
	pub fn depth(&self) -> usize {
		self.target_stack.borrow().len()
	}

	pub(crate) fn push_target(&self, target: Option<Rc<ComputationInner>>) {
		self.target_stack.borrow_mut().push(target);
	}

	pub(crate) fn pop_target(&self) {
		self.target_stack.borrow_mut().pop();
	}

	/// Whether new containers get instrumented
	pub fn is_observing(&self) -> bool {
		self.observing.get()
	}

	/// A copy of the installed configuration
	pub fn config(&self) -> ReactiveConfig {
		self.config.borrow().clone()
	}

	pub(crate) fn error_handler(&self) -> Option<Handler> {
		self.error_handler.borrow().clone()
	}

	pub(crate) fn warn_handler(&self) -> Option<Handler> {
		self.warn_handler.borrow().clone()
	}
}

impl Default for Runtime {
	fn default() -> Self {
		Self::new()
	}
}

// Thread-local runtime instance
//
// In WASM, there is only one thread, so this effectively provides a global runtime.
// On non-WASM platforms, each thread gets its own runtime instance.
thread_local! {
	static RUNTIME: Runtime = Runtime::new();
}

/// Get a reference to the thread's runtime
///
/// The closure must not call back into user code; borrow the state you need and return.
pub fn with_runtime<F, R>(f: F) -> R
where
	F: FnOnce(&Runtime) -> R,
{
	RUNTIME.with(f)
}

/// Try to access the runtime (safe version for Drop implementations)
///
/// Returns None if the thread-local storage has been destroyed.
pub(crate) fn try_with_runtime<F, R>(f: F) -> Option<R>
where
	F: FnOnce(&Runtime) -> R,
{
	RUNTIME.try_with(f).ok()
}

/// Install a configuration for the current thread
pub fn configure(config: ReactiveConfig) {
	with_runtime(|rt| *rt.config.borrow_mut() = config);
}

/// The configuration installed on the current thread
pub fn config() -> ReactiveConfig {
	with_runtime(Runtime::config)
}

/// Whether a read right now would link a dependency
pub fn is_tracking() -> bool {
	with_runtime(Runtime::is_tracking)
}

/// Register the handler receiving errors from `user` computations
///
/// While a handler is installed, failing watchers are reported to it and the
/// failure stops there. Without one, the error is returned to the caller.
pub fn set_error_handler<F>(handler: F)
where
	F: Fn(&ReactiveError) + 'static,
{
	with_runtime(|rt| *rt.error_handler.borrow_mut() = Some(Rc::new(handler)));
}

/// Remove the error handler
pub fn clear_error_handler() {
	with_runtime(|rt| *rt.error_handler.borrow_mut() = None);
}

/// Register the handler receiving non-fatal warnings
pub fn set_warn_handler<F>(handler: F)
where
	F: Fn(&ReactiveError) + 'static,
{
	with_runtime(|rt| *rt.warn_handler.borrow_mut() = Some(Rc::new(handler)));
}

/// Remove the warning handler
pub fn clear_warn_handler() {
	with_runtime(|rt| *rt.warn_handler.borrow_mut() = None);
}

/// Switch container instrumentation on or off; returns the previous state
pub fn toggle_observing(value: bool) -> bool {
	with_runtime(|rt| rt.observing.replace(value))
}

/// Run `f` with container instrumentation switched off
///
/// Containers first seen inside `f` stay plain. The previous state is restored
/// even if `f` panics.
pub fn suspend_tracking<F, R>(f: F) -> R
where
	F: FnOnce() -> R,
{
	struct Restore(bool);

	impl Drop for Restore {
		fn drop(&mut self) {
			let previous = self.0;
			let _ = try_with_runtime(|rt| rt.observing.set(previous));
		}
	}

	let _restore = Restore(toggle_observing(false));
	f()
}

/// Run `f` with no active subscriber, so reads inside it link nothing
pub fn untracked<F, R>(f: F) -> R
where
	F: FnOnce() -> R,
{
	struct Pop;

	impl Drop for Pop {
		fn drop(&mut self) {
			let _ = try_with_runtime(Runtime::pop_target);
		}
	}

	with_runtime(|rt| rt.push_target(None));
	let _pop = Pop;
	f()
}

/// Route an error through the error channel
///
/// Returns the error back when no handler is installed.
pub(crate) fn report_error(err: ReactiveError) -> Result<(), ReactiveError> {
	match with_runtime(Runtime::error_handler) {
		Some(handler) => {
			untracked(|| handler(&err));
			Ok(())
		}
		None => Err(err),
	}
}

/// Route an error that has no caller left to receive it
pub(crate) fn report_uncaught(err: ReactiveError) {
	if let Err(err) = report_error(err) {
		tracing::error!(error = %err, "unhandled reactive error");
	}
}

/// Emit a non-fatal warning
pub(crate) fn report_warning(warning: ReactiveError) {
	tracing::warn!(warning = %warning, "reactive warning");
	if let Some(handler) = with_runtime(Runtime::warn_handler) {
		untracked(|| handler(&warning));
	}
}
