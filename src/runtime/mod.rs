//! Script runtime adapter (spec §4.1): the embeddable-engine façade plus the
//! concrete QuickJS-backed isolate. Nothing outside this module imports
//! `rquickjs` directly.

pub mod adapter;
pub mod isolate;

pub use adapter::{QuickJsAdapter, ScriptRuntimeAdapter, call_with_watchdog, eval_with_watchdog};
pub use isolate::{IsolateHandle, IsolateOpts};
