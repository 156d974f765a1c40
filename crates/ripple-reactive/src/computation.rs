//! Computation Unit - a re-runnable, dependency-tracking computation
//!
//! A [`Computation`] wraps a body closure. Every run pushes the unit onto the
//! Active-Subscriber Context, collects the subjects the body reads into a
//! working set, and reconciles that set against the previous run's set when the
//! run ends, successful or not.
//!
//! ## Kinds of units
//!
//! - **Eager** (default): runs once at construction, then re-runs through the
//!   scheduler whenever a dependency notifies.
//! - **Lazy**: never runs on its own. A notification only marks it dirty; the
//!   next [`Computation::evaluate_if_dirty`] re-runs it. Derived values
//!   ([`Computed`](crate::computed::Computed)) are built on lazy units.
//! - **Sync**: re-runs inside the notification instead of being queued.
//!
//! ## Example
//!
//! ```
//! use ripple_reactive::{Computation, ComputationOptions, Value, reactive};
//!
//! let state = reactive(serde_json::json!({ "count": 1 }));
//! let record = state.as_record().unwrap().clone();
//!
//! let unit = Computation::new(
//! 	move || Ok(record.get("count")),
//! 	ComputationOptions::new().with_expression("count"),
//! )
//! .unwrap();
//!
//! assert_eq!(unit.value(), Value::Int(1));
//! ```

use core::cell::{Cell, RefCell};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::HashSet;
use std::rc::Rc;

use crate::error::{ErrorPhase, ReactiveError, Result};
use crate::observe::Value;
use crate::observe::traverse::traverse;
use crate::runtime::{Runtime, report_error, try_with_runtime, untracked, with_runtime};
use crate::scheduler;
use crate::subject::{Subject, SubjectId};

/// Body of a computation
pub type Body = Box<dyn FnMut() -> anyhow::Result<Value>>;

/// Change callback, invoked with `(new, old)`
pub type ChangeCallback = Box<dyn FnMut(&Value, &Value) -> anyhow::Result<()>>;

/// Lifecycle hook
pub type Hook = Box<dyn FnMut()>;

/// Debugging hook, invoked with the subject involved
pub type DebugHook = Box<dyn FnMut(SubjectId)>;

const ANONYMOUS: &str = "<anonymous>";

/// Unique, strictly increasing identifier of a computation
///
/// Ids are the scheduler's ordering key: a unit created earlier runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputationId(usize);

impl ComputationId {
	fn next() -> Self {
		static COUNTER: AtomicUsize = AtomicUsize::new(1);
		Self(COUNTER.fetch_add(1, Ordering::Relaxed))
	}

	#[cfg(test)]
	pub(crate) fn from_raw(raw: usize) -> Self {
		Self(raw)
	}

	/// The raw numeric id
	pub fn get(self) -> usize {
		self.0
	}
}

impl fmt::Display for ComputationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Options for [`Computation::new`]
///
/// # Example
///
/// ```
/// use ripple_reactive::ComputationOptions;
///
/// let options = ComputationOptions::new()
/// 	.user()
/// 	.deep()
/// 	.with_expression("settings");
/// ```
#[derive(Default)]
pub struct ComputationOptions {
	pub(crate) lazy: bool,
	pub(crate) sync: bool,
	pub(crate) deep: bool,
	pub(crate) user: bool,
	pub(crate) primary: bool,
	pub(crate) no_recurse: bool,
	pub(crate) expression: Option<String>,
	pub(crate) before: Option<Hook>,
	pub(crate) after: Option<Hook>,
	pub(crate) on_stop: Option<Hook>,
	pub(crate) on_track: Option<DebugHook>,
	pub(crate) on_trigger: Option<DebugHook>,
	pub(crate) callback: Option<ChangeCallback>,
}

impl ComputationOptions {
	/// Default options: eager, scheduled, shallow, not a user unit
	pub fn new() -> Self {
		Self::default()
	}

	/// Evaluate on demand instead of eagerly
	pub fn lazy(mut self) -> Self {
		self.lazy = true;
		self
	}

	/// Re-run inside the notification instead of through the scheduler
	pub fn sync(mut self) -> Self {
		self.sync = true;
		self
	}

	/// Traverse the whole returned value on every run
	pub fn deep(mut self) -> Self {
		self.deep = true;
		self
	}

	/// Mark as a user watcher: its errors go to the error handler
	pub fn user(mut self) -> Self {
		self.user = true;
		self
	}

	/// Mark as a primary (render) unit: its `after` hook fires when a flush completes
	pub fn primary(mut self) -> Self {
		self.primary = true;
		self
	}

	/// Do not re-queue the unit when it notifies itself while running
	pub fn no_recurse(mut self) -> Self {
		self.no_recurse = true;
		self
	}

	/// Label used in errors and logs
	pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
		self.expression = Some(expression.into());
		self
	}

	/// Hook invoked by the scheduler right before the unit re-runs
	pub fn before<F>(mut self, hook: F) -> Self
	where
		F: FnMut() + 'static,
	{
		self.before = Some(Box::new(hook));
		self
	}

	/// Hook invoked once after a flush in which this primary unit ran
	pub fn after<F>(mut self, hook: F) -> Self
	where
		F: FnMut() + 'static,
	{
		self.after = Some(Box::new(hook));
		self
	}

	/// Hook invoked once the unit has been torn down
	pub fn on_stop<F>(mut self, hook: F) -> Self
	where
		F: FnMut() + 'static,
	{
		self.on_stop = Some(Box::new(hook));
		self
	}

	/// Hook invoked the first time a run reads a subject
	///
	/// Runs untracked, once per distinct subject per run.
	pub fn on_track<F>(mut self, hook: F) -> Self
	where
		F: FnMut(SubjectId) + 'static,
	{
		self.on_track = Some(Box::new(hook));
		self
	}

	/// Hook invoked when a subject notifies this unit, before it is triggered
	pub fn on_trigger<F>(mut self, hook: F) -> Self
	where
		F: FnMut(SubjectId) + 'static,
	{
		self.on_trigger = Some(Box::new(hook));
		self
	}

	/// Callback invoked with `(new, old)` when a re-run produced a changed value
	pub fn on_change<F>(mut self, callback: F) -> Self
	where
		F: FnMut(&Value, &Value) -> anyhow::Result<()> + 'static,
	{
		self.callback = Some(Box::new(callback));
		self
	}
}

impl fmt::Debug for ComputationOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComputationOptions")
			.field("lazy", &self.lazy)
			.field("sync", &self.sync)
			.field("deep", &self.deep)
			.field("user", &self.user)
			.field("primary", &self.primary)
			.field("no_recurse", &self.no_recurse)
			.field("expression", &self.expression)
			.field("callback", &self.callback.is_some())
			.finish_non_exhaustive()
	}
}

pub(crate) struct ComputationInner {
	id: ComputationId,
	expression: String,
	lazy: bool,
	sync: bool,
	deep: bool,
	user: bool,
	primary: bool,
	no_recurse: bool,
	getter: RefCell<Body>,
	callback: RefCell<Option<ChangeCallback>>,
	before: RefCell<Option<Hook>>,
	after: RefCell<Option<Hook>>,
	on_stop: RefCell<Option<Hook>>,
	on_track: RefCell<Option<DebugHook>>,
	on_trigger: RefCell<Option<DebugHook>>,
	active: Cell<bool>,
	dirty: Cell<bool>,
	value: RefCell<Value>,
	/// Dependencies linked as of the last completed run
	deps: RefCell<Vec<Subject>>,
	dep_ids: RefCell<HashSet<SubjectId>>,
	/// Dependencies collected by the run in progress
	new_deps: RefCell<Vec<Subject>>,
	new_dep_ids: RefCell<HashSet<SubjectId>>,
}

/// Active-subscriber frame of one run
///
/// Dropping the frame pops the context and reconciles the dependency sets, so
/// both happen on every exit path.
struct TrackingFrame<'a> {
	unit: &'a Rc<ComputationInner>,
}

impl<'a> TrackingFrame<'a> {
	fn enter(unit: &'a Rc<ComputationInner>) -> Self {
		with_runtime(|rt| rt.push_target(Some(unit.clone())));
		Self { unit }
	}
}

impl Drop for TrackingFrame<'_> {
	fn drop(&mut self) {
		let _ = try_with_runtime(Runtime::pop_target);
		self.unit.cleanup_deps();
	}
}

impl ComputationInner {
	fn new(body: Body, options: ComputationOptions) -> Self {
		Self {
			id: ComputationId::next(),
			expression: options
				.expression
				.unwrap_or_else(|| ANONYMOUS.to_string()),
			lazy: options.lazy,
			sync: options.sync,
			deep: options.deep,
			user: options.user,
			primary: options.primary,
			no_recurse: options.no_recurse,
			getter: RefCell::new(body),
			callback: RefCell::new(options.callback),
			before: RefCell::new(options.before),
			after: RefCell::new(options.after),
			on_stop: RefCell::new(options.on_stop),
			on_track: RefCell::new(options.on_track),
			on_trigger: RefCell::new(options.on_trigger),
			active: Cell::new(true),
			dirty: Cell::new(options.lazy),
			value: RefCell::new(Value::Null),
			deps: RefCell::new(Vec::new()),
			dep_ids: RefCell::new(HashSet::new()),
			new_deps: RefCell::new(Vec::new()),
			new_dep_ids: RefCell::new(HashSet::new()),
		}
	}

	pub(crate) fn id(&self) -> ComputationId {
		self.id
	}

	pub(crate) fn expression(&self) -> &str {
		&self.expression
	}

	pub(crate) fn is_active(&self) -> bool {
		self.active.get()
	}

	pub(crate) fn is_primary(&self) -> bool {
		self.primary
	}

	pub(crate) fn is_no_recurse(&self) -> bool {
		self.no_recurse
	}

	fn body_error(&self, phase: ErrorPhase, source: anyhow::Error) -> ReactiveError {
		ReactiveError::Body {
			unit: self.id,
			expression: self.expression.clone(),
			phase,
			source: source.into(),
		}
	}

	/// Route a body or callback failure
	///
	/// User units hand it to the error channel; everything else returns it.
	fn fail(&self, phase: ErrorPhase, source: anyhow::Error) -> Result<()> {
		let err = self.body_error(phase, source);
		if self.user {
			report_error(err)
		} else {
			Err(err)
		}
	}

	/// Evaluate the body and re-collect dependencies
	fn get(self: &Rc<Self>) -> Result<Value> {
		let Ok(mut getter) = self.getter.try_borrow_mut() else {
			return Err(ReactiveError::ReentrantRun { unit: self.id });
		};

		let frame = TrackingFrame::enter(self);
		let value = match (*getter)() {
			Ok(value) => value,
			Err(source) => {
				self.fail(ErrorPhase::Getter, source)?;
				Value::Null
			}
		};
		if self.deep {
			traverse(&value);
		}
		drop(frame);

		Ok(value)
	}

	/// Record a read of `subject` by the run in progress
	pub(crate) fn add_dependency(self: &Rc<Self>, subject: &Subject) {
		let id = subject.id();
		if !self.new_dep_ids.borrow_mut().insert(id) {
			return;
		}
		self.new_deps.borrow_mut().push(subject.clone());
		if !self.dep_ids.borrow().contains(&id) {
			subject.link(self);
		}
		Self::fire_debug_hook(&self.on_track, id);
	}

	/// Report the subject about to trigger this unit
	pub(crate) fn notified_by(&self, subject: SubjectId) {
		if self.active.get() {
			Self::fire_debug_hook(&self.on_trigger, subject);
		}
	}

	// A hook that is already running is skipped.
	fn fire_debug_hook(slot: &RefCell<Option<DebugHook>>, subject: SubjectId) {
		if let Ok(mut guard) = slot.try_borrow_mut()
			&& let Some(hook) = guard.as_mut()
		{
			untracked(|| hook(subject));
		}
	}

	/// Swap the working set in as the current set, unlinking what was not read
	fn cleanup_deps(&self) {
		let new_ids = self.new_dep_ids.take();
		let new_deps = self.new_deps.take();
		let old_deps = self.deps.take();

		let mut dropped = 0;
		for dep in &old_deps {
			if !new_ids.contains(&dep.id()) {
				dep.unlink(self.id);
				dropped += 1;
			}
		}

		// Torn down mid-run: nothing read during the run may stay linked.
		if !self.active.get() {
			for dep in &new_deps {
				dep.unlink(self.id);
			}
			self.dep_ids.borrow_mut().clear();
			return;
		}

		tracing::trace!(
			unit = %self.id,
			linked = new_deps.len(),
			dropped,
			"reconciled dependencies"
		);
		*self.deps.borrow_mut() = new_deps;
		*self.dep_ids.borrow_mut() = new_ids;
	}

	/// Re-run and invoke the change callback when the value changed
	pub(crate) fn run(self: &Rc<Self>) -> Result<()> {
		if !self.active.get() {
			return Ok(());
		}

		let value = self.get()?;
		let changed = !value.same_value(&self.value.borrow()) || value.has_identity() || self.deep;
		if changed {
			let old = self.value.replace(value.clone());
			self.invoke_callback(&value, &old, ErrorPhase::Callback)?;
		}
		Ok(())
	}

	pub(crate) fn invoke_callback(&self, new: &Value, old: &Value, phase: ErrorPhase) -> Result<()> {
		let Ok(mut slot) = self.callback.try_borrow_mut() else {
			return Err(ReactiveError::ReentrantRun { unit: self.id });
		};
		let Some(callback) = slot.as_mut() else {
			return Ok(());
		};

		match untracked(|| callback(new, old)) {
			Ok(()) => Ok(()),
			Err(source) => {
				drop(slot);
				self.fail(phase, source)
			}
		}
	}

	/// Entry point of a notification
	pub(crate) fn trigger(self: &Rc<Self>) -> Result<()> {
		if !self.active.get() {
			return Ok(());
		}
		if self.lazy {
			self.dirty.set(true);
			Ok(())
		} else if self.sync {
			self.run()
		} else {
			scheduler::enqueue(self)
		}
	}

	pub(crate) fn evaluate(self: &Rc<Self>) -> Result<()> {
		let value = self.get()?;
		*self.value.borrow_mut() = value;
		self.dirty.set(false);
		Ok(())
	}

	pub(crate) fn evaluate_if_dirty(self: &Rc<Self>) -> Result<Value> {
		if self.dirty.get() {
			self.evaluate()?;
		}
		Ok(self.value.borrow().clone())
	}

	/// Link every current dependency to the active subscriber
	pub(crate) fn depend(&self) {
		let deps = self.deps.borrow().clone();
		for dep in deps {
			dep.depend();
		}
	}

	pub(crate) fn teardown(&self) {
		if !self.active.replace(false) {
			return;
		}

		for dep in self.deps.take() {
			dep.unlink(self.id);
		}
		self.dep_ids.borrow_mut().clear();
		tracing::debug!(unit = %self.id, expression = %self.expression, "computation torn down");

		let hook = self.on_stop.borrow_mut().take();
		if let Some(mut hook) = hook {
			if try_with_runtime(|_| ()).is_some() {
				untracked(|| hook());
			} else {
				hook();
			}
		}
	}

	pub(crate) fn call_before(&self) {
		if let Ok(mut slot) = self.before.try_borrow_mut()
			&& let Some(hook) = slot.as_mut()
		{
			untracked(|| hook());
		}
	}

	pub(crate) fn call_after(&self) {
		if let Ok(mut slot) = self.after.try_borrow_mut()
			&& let Some(hook) = slot.as_mut()
		{
			untracked(|| hook());
		}
	}
}

/// Handle to a computation unit
///
/// Dropping the handle tears the unit down.
pub struct Computation {
	inner: Rc<ComputationInner>,
}

impl Computation {
	/// Create a unit; unless `lazy`, the body runs once right away
	///
	/// # Arguments
	///
	/// * `body` - The tracked computation. Every tracked read inside it becomes a dependency.
	/// * `options` - Flags and hooks, see [`ComputationOptions`].
	///
	/// # Errors
	///
	/// Returns the body's error from the initial run, unless the unit is a
	/// `user` unit and an error handler is installed.
	pub fn new<F>(body: F, options: ComputationOptions) -> Result<Self>
	where
		F: FnMut() -> anyhow::Result<Value> + 'static,
	{
		let unit = Self::create(Box::new(body), options);
		if !unit.inner.lazy {
			let value = unit.inner.get()?;
			*unit.inner.value.borrow_mut() = value;
		}
		Ok(unit)
	}

	/// Create a unit without running it
	pub(crate) fn create(body: Body, options: ComputationOptions) -> Self {
		let inner = Rc::new(ComputationInner::new(body, options));
		tracing::debug!(
			unit = %inner.id,
			expression = %inner.expression,
			lazy = inner.lazy,
			sync = inner.sync,
			"computation created"
		);
		Self { inner }
	}

	pub(crate) fn inner(&self) -> &Rc<ComputationInner> {
		&self.inner
	}

	/// The unit's id
	pub fn id(&self) -> ComputationId {
		self.inner.id
	}

	/// The label given by [`ComputationOptions::with_expression`]
	pub fn expression(&self) -> &str {
		self.inner.expression()
	}

	/// Re-run now, bypassing the scheduler
	pub fn run(&self) -> Result<()> {
		self.inner.run()
	}

	/// Re-run a dirty lazy unit; always returns the cached value
	pub fn evaluate_if_dirty(&self) -> Result<Value> {
		self.inner.evaluate_if_dirty()
	}

	/// The value produced by the last run
	pub fn value(&self) -> Value {
		self.inner.value.borrow().clone()
	}

	pub fn is_dirty(&self) -> bool {
		self.inner.dirty.get()
	}

	pub fn is_active(&self) -> bool {
		self.inner.is_active()
	}

	pub fn is_lazy(&self) -> bool {
		self.inner.lazy
	}

	/// Link every dependency of this unit to the active subscriber
	pub fn depend(&self) {
		self.inner.depend();
	}

	/// Act as if a dependency notified
	pub fn trigger(&self) -> Result<()> {
		self.inner.trigger()
	}

	/// Force a re-run through the normal notification path
	pub fn force_update(&self) -> Result<()> {
		self.trigger()
	}

	/// Unlink from every dependency and become permanently inactive
	///
	/// Idempotent. The `on_stop` hook runs on the first call only.
	pub fn teardown(&self) {
		self.inner.teardown();
	}

	/// Ids of the subjects linked as of the last completed run
	pub fn dependency_ids(&self) -> Vec<SubjectId> {
		self.inner.deps.borrow().iter().map(Subject::id).collect()
	}
}

impl Drop for Computation {
	fn drop(&mut self) {
		self.inner.teardown();
	}
}

impl fmt::Debug for Computation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Computation")
			.field("id", &self.inner.id)
			.field("expression", &self.inner.expression)
			.field("active", &self.inner.active.get())
			.field("dirty", &self.inner.dirty.get())
			.finish()
	}
}
