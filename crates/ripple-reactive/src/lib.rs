//! Reactive state engine for ripple
//!
//! This crate tracks which computations depend on which pieces of mutable
//! state, and re-runs exactly the dependent computations, deduplicated and in
//! creation order, when that state changes.
//!
//! ## Building blocks
//!
//! - [`Subject`]: a change-notification publisher with an ordered subscriber list.
//! - [`observe`](mod@observe): the interception layer turning [`Record`]s,
//!   [`List`]s and [`Ref`]s into tracked state.
//! - [`Computation`]: a re-runnable unit that re-derives its dependencies on every run.
//! - [`scheduler`]: the batching queue flushed once per tick.
//! - [`Computed`] and [`watch`]: derived values and user watchers on top of units.
//!
//! ## Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use ripple_reactive::{Computation, ComputationOptions, Value, poll, reactive};
//!
//! let state = reactive(serde_json::json!({ "greeting": "hello" }));
//! let record = state.as_record().unwrap().clone();
//! let renders = Rc::new(RefCell::new(Vec::new()));
//!
//! let reader = record.clone();
//! let log = renders.clone();
//! let _render = Computation::new(
//! 	move || {
//! 		let greeting = reader.get("greeting");
//! 		log.borrow_mut().push(greeting.as_str().unwrap_or_default().to_string());
//! 		Ok(Value::Null)
//! 	},
//! 	ComputationOptions::new().primary(),
//! )
//! .unwrap();
//!
//! record.set("greeting", "hi").unwrap();
//! record.set("greeting", "hey").unwrap();
//! poll().unwrap();
//!
//! assert_eq!(*renders.borrow(), vec!["hello", "hey"]);
//! ```
//!
//! ## Threading
//!
//! State is per thread. Each thread has its own runtime, scheduler and tick
//! queue, and the value types are `!Send`.

pub mod computation;
pub mod computed;
pub mod config;
pub mod error;
pub mod observe;
pub mod path;
pub mod runtime;
pub mod scheduler;
pub mod subject;
pub mod tick;
pub mod watch;

pub use computation::{Computation, ComputationId, ComputationOptions};
pub use computed::Computed;
pub use config::{FlushMode, ReactiveConfig};
pub use error::{ErrorPhase, ReactiveError, Result};
pub use observe::traverse::traverse;
pub use observe::{
	Interceptor, Key, List, Record, Ref, Value, delete, is_reactive, observe, observe_shallow, reactive, set,
	track,
};
pub use runtime::{
	clear_error_handler, clear_warn_handler, config, configure, is_tracking, set_error_handler, set_warn_handler,
	suspend_tracking, toggle_observing, untracked,
};
pub use scheduler::flush;
pub use subject::{Subject, SubjectId};
pub use tick::{clear_tick_driver, flush_all, next_tick, poll, set_tick_driver, tick};
pub use watch::{WatchOptions, watch, watch_path};
