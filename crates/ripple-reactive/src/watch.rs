//! User watchers
//!
//! A watcher pairs a tracked getter with a callback that receives the new and
//! the previous value whenever the getter's result changes. Watchers are
//! `user` units: their errors go to the error handler when one is installed,
//! so one failing watcher does not stop the others in the same flush.

use crate::computation::{Computation, ComputationOptions};
use crate::error::{ErrorPhase, ReactiveError, Result};
use crate::observe::Value;
use crate::path::{parse_path, resolve_path};
use crate::runtime::report_warning;

/// Options for [`watch`] and [`watch_path`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
	/// Traverse the watched value so nested changes fire the callback
	pub deep: bool,
	/// Invoke the callback once right away with `(value, Null)`
	pub immediate: bool,
	/// Run inside the notification instead of on the next flush
	pub sync: bool,
}

impl WatchOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn deep(mut self) -> Self {
		self.deep = true;
		self
	}

	pub fn immediate(mut self) -> Self {
		self.immediate = true;
		self
	}

	pub fn sync(mut self) -> Self {
		self.sync = true;
		self
	}
}

/// Watch the value produced by `getter`
///
/// Returns the watcher's unit; dropping it stops the watcher.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use ripple_reactive::{Value, WatchOptions, poll, reactive, watch};
///
/// let state = reactive(serde_json::json!({ "count": 0 }));
/// let record = state.as_record().unwrap().clone();
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let reader = record.clone();
/// let sink = seen.clone();
/// let _watcher = watch(
/// 	move || Ok(reader.get("count")),
/// 	move |new, old| {
/// 		sink.borrow_mut().push((new.clone(), old.clone()));
/// 		Ok(())
/// 	},
/// 	WatchOptions::new(),
/// )
/// .unwrap();
///
/// record.set("count", 1).unwrap();
/// poll().unwrap();
/// assert_eq!(*seen.borrow(), vec![(Value::Int(1), Value::Int(0))]);
/// ```
pub fn watch<G, C>(getter: G, callback: C, options: WatchOptions) -> Result<Computation>
where
	G: FnMut() -> anyhow::Result<Value> + 'static,
	C: FnMut(&Value, &Value) -> anyhow::Result<()> + 'static,
{
	watch_labelled(getter, callback, options, None)
}

/// Watch a dot-delimited path below `root`, such as `"user.address.city"`
///
/// An invalid path is reported as an [`ReactiveError::InvalidPath`] warning
/// and yields a watcher that never fires.
pub fn watch_path<C>(root: &Value, path: &str, callback: C, options: WatchOptions) -> Result<Computation>
where
	C: FnMut(&Value, &Value) -> anyhow::Result<()> + 'static,
{
	let label = Some(path.to_string());
	match parse_path(path) {
		Some(segments) => {
			let root = root.clone();
			watch_labelled(move || Ok(resolve_path(&root, &segments)), callback, options, label)
		}
		None => {
			report_warning(ReactiveError::InvalidPath { path: path.to_string() });
			watch_labelled(|| Ok(Value::Null), callback, options, label)
		}
	}
}

fn watch_labelled<G, C>(getter: G, callback: C, options: WatchOptions, label: Option<String>) -> Result<Computation>
where
	G: FnMut() -> anyhow::Result<Value> + 'static,
	C: FnMut(&Value, &Value) -> anyhow::Result<()> + 'static,
{
	let mut unit_options = ComputationOptions::new().user().on_change(callback);
	if options.deep {
		unit_options = unit_options.deep();
	}
	if options.sync {
		unit_options = unit_options.sync();
	}
	if let Some(label) = label {
		unit_options = unit_options.with_expression(label);
	}

	let unit = Computation::new(getter, unit_options)?;
	if options.immediate {
		let value = unit.value();
		unit.inner()
			.invoke_callback(&value, &Value::Null, ErrorPhase::Immediate)?;
	}
	Ok(unit)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::observe::reactive;
	use crate::runtime::{clear_error_handler, clear_warn_handler, set_error_handler, set_warn_handler};
	use crate::tick::poll;
	use rstest::rstest;
	use serde_json::json;
	use serial_test::serial;
	use std::cell::{Cell, RefCell};
	use std::rc::Rc;

	type Log = Rc<RefCell<Vec<(Value, Value)>>>;

	fn recorder(log: &Log) -> impl FnMut(&Value, &Value) -> anyhow::Result<()> + 'static {
		let log = log.clone();
		move |new, old| {
			log.borrow_mut().push((new.clone(), old.clone()));
			Ok(())
		}
	}

	#[rstest]
	#[serial(reactive)]
	fn test_immediate_fires_with_null_old_value() {
		let state = reactive(json!({ "a": 1 }));
		let log: Log = Rc::default();

		let _watcher = watch_path(&state, "a", recorder(&log), WatchOptions::new().immediate()).unwrap();

		assert_eq!(*log.borrow(), vec![(Value::Int(1), Value::Null)]);
	}

	#[rstest]
	#[serial(reactive)]
	fn test_path_watcher_fires_on_nested_change() {
		let state = reactive(json!({ "user": { "name": "ada" } }));
		let log: Log = Rc::default();
		let _watcher = watch_path(&state, "user.name", recorder(&log), WatchOptions::new()).unwrap();

		let user = state.as_record().unwrap().get_untracked("user");
		user.as_record().unwrap().set("name", "grace").unwrap();
		poll().unwrap();

		assert_eq!(*log.borrow(), vec![(Value::from("grace"), Value::from("ada"))]);
	}

	#[rstest]
	#[serial(reactive)]
	fn test_deep_watcher_fires_on_nested_change_of_same_container() {
		let state = reactive(json!({ "settings": { "theme": { "dark": false } } }));
		let log: Log = Rc::default();
		let _watcher = watch_path(&state, "settings", recorder(&log), WatchOptions::new().deep().sync()).unwrap();

		let settings = state.as_record().unwrap().get_untracked("settings");
		let theme = settings.as_record().unwrap().get_untracked("theme");
		theme.as_record().unwrap().set("dark", true).unwrap();

		assert_eq!(log.borrow().len(), 1);
	}

	#[rstest]
	#[serial(reactive)]
	fn test_shallow_watcher_ignores_nested_change() {
		let state = reactive(json!({ "settings": { "theme": "light" } }));
		let log: Log = Rc::default();
		let _watcher = watch_path(&state, "settings", recorder(&log), WatchOptions::new().sync()).unwrap();

		let settings = state.as_record().unwrap().get_untracked("settings");
		settings.as_record().unwrap().set("theme", "dark").unwrap();

		assert!(log.borrow().is_empty());
	}

	#[rstest]
	#[serial(reactive)]
	fn test_invalid_path_warns_and_never_fires() {
		let warnings = Rc::new(Cell::new(0));
		let sink = warnings.clone();
		set_warn_handler(move |warning| {
			assert!(matches!(warning, ReactiveError::InvalidPath { .. }));
			sink.set(sink.get() + 1);
		});
		let state = reactive(json!({ "a": 1 }));
		let log: Log = Rc::default();

		let watcher = watch_path(&state, "a[0]", recorder(&log), WatchOptions::new()).unwrap();
		state.as_record().unwrap().set("a", 2).unwrap();
		poll().unwrap();

		assert_eq!(warnings.get(), 1);
		assert!(watcher.dependency_ids().is_empty());
		assert!(log.borrow().is_empty());
		clear_warn_handler();
	}

	#[rstest]
	#[serial(reactive)]
	fn test_failing_watcher_does_not_block_others() {
		let errors = Rc::new(Cell::new(0));
		let sink = errors.clone();
		set_error_handler(move |_| sink.set(sink.get() + 1));
		let state = reactive(json!({ "a": 1 }));
		let log: Log = Rc::default();

		let _failing = watch_path(&state, "a", |_, _| Err(anyhow::anyhow!("callback failed")), WatchOptions::new()).unwrap();
		let _healthy = watch_path(&state, "a", recorder(&log), WatchOptions::new()).unwrap();

		state.as_record().unwrap().set("a", 2).unwrap();
		poll().unwrap();

		assert_eq!(errors.get(), 1);
		assert_eq!(log.borrow().len(), 1);
		clear_error_handler();
	}

	#[rstest]
	#[serial(reactive)]
	fn test_callback_error_without_handler_propagates() {
		clear_error_handler();
		let state = reactive(json!({ "a": 1 }));
		let _failing = watch_path(&state, "a", |_, _| Err(anyhow::anyhow!("callback failed")), WatchOptions::new()).unwrap();

		state.as_record().unwrap().set("a", 2).unwrap();
		let err = poll().unwrap_err();

		assert!(matches!(err, ReactiveError::Body { phase: ErrorPhase::Callback, .. }));
	}
}
