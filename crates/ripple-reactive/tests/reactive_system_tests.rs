//! Integration tests for the reactive engine
//!
//! These tests verify the engine end to end:
//! 1. A flush re-runs a unit once, however many of its dependencies changed
//! 2. Dependency sets are re-derived on every run
//! 3. Units run in ascending id order, including units queued mid-flush
//! 4. Lazy units run on demand only
//! 5. Interception is idempotent and list mutators notify once
//! 6. Teardown unlinks a unit everywhere
//! 7. Runaway re-triggering is reported instead of hanging

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_reactive::scheduler::{is_flushing, is_waiting};
use ripple_reactive::tick::is_tick_pending;
use ripple_reactive::{
	Computation, ComputationOptions, Computed, FlushMode, ReactiveConfig, ReactiveError, Record, Subject, Value,
	WatchOptions, clear_error_handler, configure, next_tick, observe, poll, reactive, set_error_handler, watch,
};
use rstest::rstest;
use serde_json::json;
use serial_test::serial;

fn record(value: serde_json::Value) -> Record {
	reactive(value).as_record().cloned().unwrap()
}

fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
	let runs = Rc::new(Cell::new(0));
	(runs.clone(), runs)
}

/// Dedup: many writes, one re-run per flush
#[rstest]
#[serial(reactive)]
fn test_unit_runs_once_per_flush() {
	let state = record(json!({ "a": 1, "b": 1, "c": 1 }));
	let reader = state.clone();
	let (runs, count) = counter();

	let _unit = Computation::new(
		move || {
			count.set(count.get() + 1);
			for key in ["a", "b", "c"] {
				reader.get(key);
			}
			Ok(Value::Null)
		},
		ComputationOptions::new(),
	)
	.unwrap();
	assert_eq!(runs.get(), 1);

	state.set("a", 2).unwrap();
	state.set("b", 2).unwrap();
	state.set("c", 2).unwrap();
	state.set("a", 3).unwrap();
	poll().unwrap();

	assert_eq!(runs.get(), 2);
}

/// Dependency sets follow the branch taken by the last run
#[rstest]
#[serial(reactive)]
fn test_stale_dependencies_are_pruned() {
	let state = record(json!({ "use_a": true, "a": 1, "b": 1 }));
	let reader = state.clone();
	let (runs, count) = counter();

	let unit = Computation::new(
		move || {
			count.set(count.get() + 1);
			if reader.get("use_a") == Value::Bool(true) {
				Ok(reader.get("a"))
			} else {
				Ok(reader.get("b"))
			}
		},
		ComputationOptions::new(),
	)
	.unwrap();

	state.set("use_a", false).unwrap();
	poll().unwrap();
	assert_eq!(runs.get(), 2);
	assert!(!state.field_subject("a").unwrap().has_subscriber(unit.id()));
	assert!(state.field_subject("b").unwrap().has_subscriber(unit.id()));

	// A is no longer read: no third run
	state.set("a", 10).unwrap();
	poll().unwrap();
	assert_eq!(runs.get(), 2);

	// B is read now
	state.set("b", 10).unwrap();
	poll().unwrap();
	assert_eq!(runs.get(), 3);
}

/// Units notified by one subject run in id order, not subscription order
#[rstest]
#[serial(reactive)]
fn test_flush_runs_units_in_id_order() {
	let subject = Subject::new();
	let log = Rc::new(RefCell::new(Vec::new()));
	let units: Vec<Computation> = (0..3)
		.map(|n| {
			let sink = log.clone();
			Computation::new(
				move || {
					sink.borrow_mut().push(n);
					Ok(Value::Null)
				},
				ComputationOptions::new(),
			)
			.unwrap()
		})
		.collect();
	log.borrow_mut().clear();

	subject.subscribe(&units[2]);
	subject.subscribe(&units[0]);
	subject.subscribe(&units[1]);
	subject.notify().unwrap();
	poll().unwrap();

	assert_eq!(*log.borrow(), vec![0, 1, 2]);
}

/// A unit made dirty by an earlier unit still runs in the same flush
#[rstest]
#[case::later_id(false)]
#[case::earlier_id(true)]
#[serial(reactive)]
fn test_mid_flush_growth(#[case] reader_first: bool) {
	let state = record(json!({ "x": 1, "y": 1 }));
	let log = Rc::new(RefCell::new(Vec::new()));

	let make_reader = || {
		let reader = state.clone();
		let sink = log.clone();
		Computation::new(
			move || {
				sink.borrow_mut().push("reader");
				Ok(reader.get("y"))
			},
			ComputationOptions::new(),
		)
		.unwrap()
	};
	let make_writer = || {
		let writer = state.clone();
		let sink = log.clone();
		Computation::new(
			move || {
				sink.borrow_mut().push("writer");
				let x = writer.get("x").as_i64().unwrap_or(0);
				writer.set("y", x * 10)?;
				Ok(Value::Null)
			},
			ComputationOptions::new(),
		)
		.unwrap()
	};

	let (_reader, _writer) = if reader_first {
		let reader = make_reader();
		(reader, make_writer())
	} else {
		let writer = make_writer();
		(make_reader(), writer)
	};
	// The writer's first run queued the reader; drain it.
	poll().unwrap();
	log.borrow_mut().clear();

	state.set("x", 2).unwrap();
	poll().unwrap();

	assert_eq!(*log.borrow(), vec!["writer", "reader"]);
	assert!(!is_tick_pending());
	assert_eq!(state.get_untracked("y"), Value::Int(20));
}

/// Lazy units run on the first read and after each change, never on their own
#[rstest]
#[serial(reactive)]
fn test_lazy_unit_runs_on_demand() {
	let state = record(json!({ "n": 1 }));
	let reader = state.clone();
	let (runs, count) = counter();

	let unit = Computation::new(
		move || {
			count.set(count.get() + 1);
			Ok(reader.get("n"))
		},
		ComputationOptions::new().lazy(),
	)
	.unwrap();
	assert_eq!(runs.get(), 0);

	assert_eq!(unit.evaluate_if_dirty().unwrap(), Value::Int(1));
	assert_eq!(runs.get(), 1);

	state.set("n", 2).unwrap();
	assert!(unit.is_dirty());
	assert_eq!(runs.get(), 1);
	assert!(!is_tick_pending());

	assert_eq!(unit.evaluate_if_dirty().unwrap(), Value::Int(2));
	assert_eq!(unit.evaluate_if_dirty().unwrap(), Value::Int(2));
	assert_eq!(runs.get(), 2);
}

/// Observing twice yields the same marker and the same field subjects
#[rstest]
#[serial(reactive)]
fn test_observe_twice_is_indistinguishable() {
	let value = Value::from(json!({ "a": { "b": 1 } }));

	let first = observe(&value).unwrap();
	let state = value.as_record().unwrap();
	let field = state.field_subject("a").unwrap();
	let nested = state.get_untracked("a").as_record().unwrap().interceptor().unwrap();

	let second = observe(&value).unwrap();

	assert_eq!(first.subject(), second.subject());
	assert_eq!(state.field_subject("a").unwrap(), field);
	assert_eq!(
		state.get_untracked("a").as_record().unwrap().interceptor().unwrap().subject(),
		nested.subject()
	);
}

/// Appending notifies once and tracks the appended container
#[rstest]
#[serial(reactive)]
fn test_list_push_notifies_once_and_tracks_element() {
	let state = record(json!({ "todos": [] }));
	let reader = state.clone();
	let (runs, count) = counter();

	let _unit = Computation::new(
		move || {
			count.set(count.get() + 1);
			Ok(reader.get("todos"))
		},
		ComputationOptions::new().sync(),
	)
	.unwrap();

	let todos = state.get_untracked("todos").as_list().cloned().unwrap();
	todos.push(Value::from(json!({ "done": false }))).unwrap();
	assert_eq!(runs.get(), 2);

	// The element is tracked, and the list field reader depends on it
	let todo = todos.get_untracked(0).as_record().cloned().unwrap();
	assert!(todo.is_observed());
	todo.add_field("title", "write tests").unwrap();
	assert_eq!(runs.get(), 3);
}

/// After teardown a unit never runs again and is linked nowhere
#[rstest]
#[serial(reactive)]
fn test_teardown_unlinks_everywhere() {
	let state = record(json!({ "a": 1, "nested": { "b": 2 } }));
	let reader = state.clone();
	let (runs, count) = counter();

	let unit = Computation::new(
		move || {
			count.set(count.get() + 1);
			reader.get("a");
			Ok(reader.get("nested"))
		},
		ComputationOptions::new(),
	)
	.unwrap();
	let subjects = [
		state.field_subject("a").unwrap(),
		state.field_subject("nested").unwrap(),
		state.get_untracked("nested").as_record().unwrap().interceptor().unwrap().subject().clone(),
	];
	assert!(subjects.iter().all(|subject| subject.has_subscriber(unit.id())));

	unit.teardown();
	state.set("a", 5).unwrap();
	poll().unwrap();

	assert_eq!(runs.get(), 1);
	assert!(subjects.iter().all(|subject| !subject.has_subscriber(unit.id())));
	assert!(unit.dependency_ids().is_empty());
}

/// A unit feeding its own dependency is stopped by the circuit breaker
#[rstest]
#[serial(reactive)]
fn test_runaway_update_is_reported() {
	configure(ReactiveConfig::new().with_max_update_count(5));
	let state = record(json!({ "n": 0 }));
	let reader = state.clone();
	let (runs, count) = counter();

	let unit = Computation::new(
		move || {
			count.set(count.get() + 1);
			let n = reader.get("n").as_i64().unwrap_or(0);
			reader.set("n", n + 1)?;
			Ok(Value::Null)
		},
		ComputationOptions::new().with_expression("increment"),
	)
	.unwrap();

	let err = poll().unwrap_err();

	assert!(err.is_infinite_loop());
	assert_eq!(err.unit(), Some(unit.id()));
	assert!(matches!(err, ReactiveError::InfiniteUpdateLoop { ref expression, limit: 5, .. } if expression == "increment"));
	assert_eq!(runs.get(), 7);
	assert!(!is_flushing());
	assert!(!is_waiting());

	drop(unit);
	configure(ReactiveConfig::default());
}

#[rstest]
#[serial(reactive)]
fn test_runaway_update_is_logged() {
	use std::sync::{Arc, Mutex};
	use tracing_subscriber::layer::SubscriberExt as _;
	use tracing_subscriber::util::SubscriberInitExt as _;

	/// Captures `[LEVEL] message` lines
	struct LogCapture {
		logs: Arc<Mutex<Vec<String>>>,
	}

	impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LogCapture {
		fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
			struct MessageVisitor {
				message: String,
			}

			impl tracing::field::Visit for MessageVisitor {
				fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
					if field.name() == "message" {
						self.message = format!("{:?}", value);
					}
				}
			}

			let mut visitor = MessageVisitor { message: String::new() };
			event.record(&mut visitor);
			self.logs
				.lock()
				.unwrap()
				.push(format!("[{}] {}", event.metadata().level(), visitor.message));
		}
	}

	// Arrange
	let logs = Arc::new(Mutex::new(Vec::new()));
	let _guard = tracing_subscriber::registry()
		.with(LogCapture { logs: logs.clone() })
		.set_default();
	configure(ReactiveConfig::new().with_max_update_count(3));
	let state = record(json!({ "n": 0 }));
	let reader = state.clone();
	let unit = Computation::new(
		move || {
			let n = reader.get("n").as_i64().unwrap_or(0);
			reader.set("n", n + 1)?;
			Ok(Value::Null)
		},
		ComputationOptions::new(),
	)
	.unwrap();

	// Act
	let result = poll();

	// Assert
	assert!(result.is_err());
	let captured = logs.lock().unwrap();
	assert!(
		captured
			.iter()
			.any(|line| line.starts_with("[ERROR]") && line.contains("infinite update loop detected")),
		"captured: {captured:?}"
	);

	drop(unit);
	configure(ReactiveConfig::default());
}

/// Render errors reach the caller; watcher errors stay in the error channel
#[rstest]
#[serial(reactive)]
fn test_error_taxonomy() {
	let state = record(json!({ "a": 1 }));
	let render_reader = state.clone();
	let _render = Computation::new(
		move || {
			if render_reader.get("a") == Value::Int(2) {
				anyhow::bail!("render failed");
			}
			Ok(Value::Null)
		},
		ComputationOptions::new().primary(),
	)
	.unwrap();

	let reported = Rc::new(RefCell::new(Vec::new()));
	let sink = reported.clone();
	set_error_handler(move |err| sink.borrow_mut().push(err.to_string()));
	let watch_reader = state.clone();
	let _watcher = watch(
		move || {
			if watch_reader.get("a") == Value::Int(2) {
				anyhow::bail!("watcher failed");
			}
			Ok(Value::Null)
		},
		|_, _| Ok(()),
		WatchOptions::new(),
	)
	.unwrap();

	state.set("a", 2).unwrap();
	let err = poll().unwrap_err();

	assert!(err.to_string().contains("render failed"));
	assert_eq!(reported.borrow().len(), 1);
	assert!(reported.borrow()[0].contains("watcher failed"));
	clear_error_handler();
}

/// A tick callback registered after a write observes the flushed state
#[rstest]
#[serial(reactive)]
fn test_next_tick_runs_after_flush() {
	let state = record(json!({ "a": 1 }));
	let reader = state.clone();
	let unit = Rc::new(Computation::new(move || Ok(reader.get("a")), ComputationOptions::new()).unwrap());

	state.set("a", 2).unwrap();
	let observed = Rc::new(RefCell::new(Value::Null));
	let (sink, probe) = (observed.clone(), unit.clone());
	next_tick(move || {
		*sink.borrow_mut() = probe.value();
		Ok(())
	});
	poll().unwrap();

	assert_eq!(*observed.borrow(), Value::Int(2));
}

/// The awaitable tick resolves once the pending flush has run
#[rstest]
#[serial(reactive)]
fn test_tick_future_after_flush() {
	let state = record(json!({ "a": 1 }));
	let reader = state.clone();
	let unit = Computation::new(move || Ok(reader.get("a")), ComputationOptions::new()).unwrap();

	state.set("a", 3).unwrap();
	let flushed = ripple_reactive::tick();
	poll().unwrap();
	futures::executor::block_on(flushed);

	assert_eq!(unit.value(), Value::Int(3));
}

/// Immediate mode flushes inside the write, still in id order
#[rstest]
#[serial(reactive)]
fn test_immediate_mode_keeps_id_order() {
	configure(ReactiveConfig::new().with_flush_mode(FlushMode::Immediate));
	let subject = Subject::new();
	let log = Rc::new(RefCell::new(Vec::new()));
	let units: Vec<Computation> = (0..3)
		.map(|n| {
			let sink = log.clone();
			Computation::new(
				move || {
					sink.borrow_mut().push(n);
					Ok(Value::Null)
				},
				ComputationOptions::new(),
			)
			.unwrap()
		})
		.collect();
	log.borrow_mut().clear();

	subject.subscribe(&units[1]);
	subject.subscribe(&units[2]);
	subject.subscribe(&units[0]);
	subject.notify().unwrap();

	assert_eq!(*log.borrow(), vec![0, 1, 2]);
	configure(ReactiveConfig::default());
}

/// A failing subscriber does not keep later subscribers from running
#[rstest]
#[case::immediate(FlushMode::Immediate, false)]
#[case::sync_first(FlushMode::Deferred, true)]
#[serial(reactive)]
fn test_failing_subscriber_does_not_stall_later_ones(#[case] mode: FlushMode, #[case] sync_first: bool) {
	configure(ReactiveConfig::new().with_flush_mode(mode));
	let state = record(json!({ "a": 0 }));

	let reader = state.clone();
	let mut options = ComputationOptions::new();
	if sync_first {
		options = options.sync();
	}
	let failing = Computation::new(
		move || {
			if reader.get("a").as_i64() == Some(2) {
				anyhow::bail!("a must not be 2");
			}
			Ok(Value::Null)
		},
		options,
	)
	.unwrap();

	let reader = state.clone();
	let (runs, count) = counter();
	let later = Computation::new(
		move || {
			count.set(count.get() + 1);
			Ok(reader.get("a"))
		},
		ComputationOptions::new(),
	)
	.unwrap();
	assert!(failing.id() < later.id());

	let result = state.set("a", 2);
	poll().unwrap();

	assert!(result.is_err());
	assert_eq!(runs.get(), 2);
	assert_eq!(later.value(), Value::Int(2));

	drop(failing);
	drop(later);
	configure(ReactiveConfig::default());
}

/// A container reachable from two records links into readers of both
#[rstest]
#[serial(reactive)]
fn test_shared_container_links_every_parent_reader() {
	let shared = reactive(json!({ "v": 1 }));
	let left = record(json!({}));
	let right = record(json!({}));
	left.set("child", shared.clone()).unwrap();
	right.set("child", shared.clone()).unwrap();

	let mut readers = Vec::new();
	let mut counts = Vec::new();
	for parent in [&left, &right] {
		let reader = parent.clone();
		let (runs, count) = counter();
		readers.push(
			Computation::new(
				move || {
					count.set(count.get() + 1);
					Ok(reader.get("child"))
				},
				ComputationOptions::new().sync(),
			)
			.unwrap(),
		);
		counts.push(runs);
	}

	shared.as_record().unwrap().add_field("w", 2).unwrap();

	assert!(counts.iter().all(|runs| runs.get() == 2));
}

/// A reader of a derived value re-runs when the derived value's sources change
#[rstest]
#[serial(reactive)]
fn test_computed_inside_render() {
	let state = record(json!({ "price": 3, "qty": 2 }));
	let reader = state.clone();
	let total = Computed::new(move || {
		let price = reader.get("price").as_i64().unwrap_or(0);
		let qty = reader.get("qty").as_i64().unwrap_or(0);
		Ok(Value::from(price * qty))
	});
	let source = total.clone();
	let render = Computation::new(move || Ok(source.get()?), ComputationOptions::new().primary()).unwrap();
	assert_eq!(render.value(), Value::Int(6));

	state.set("qty", 5).unwrap();
	poll().unwrap();

	assert_eq!(render.value(), Value::Int(15));
}
