//! A single QuickJS engine instance and its one isolate context (spec §4.1).
//!
//! One `IsolateHandle` owns one `rquickjs::Runtime` + `rquickjs::Context` pair.
//! It never crosses a thread boundary; the worker pool in `runtime::pool`
//! gives each worker thread its own handle per extension.

use crate::error::{Error, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub struct IsolateOpts {
    pub heap_ceiling_bytes: usize,
}

/// Shared interrupt state polled by QuickJS at bytecode checkpoints. `deadline`
/// is `None` when no watchdog is armed; `requested` is set by an explicit
/// `interrupt()` call.
#[derive(Default)]
struct InterruptState {
    deadline: Cell<Option<Instant>>,
    requested: Cell<bool>,
}

pub struct IsolateHandle {
    runtime: rquickjs::Runtime,
    context: rquickjs::Context,
    heap_ceiling_bytes: usize,
    evaluating: Rc<RefCell<HashSet<String>>>,
    interrupt_state: Rc<InterruptState>,
}

impl IsolateHandle {
    pub fn new(opts: &IsolateOpts) -> Result<Self> {
        let runtime = rquickjs::Runtime::new()
            .map_err(|e| Error::Internal(format!("failed to create JS runtime: {e}")))?;
        runtime.set_memory_limit(opts.heap_ceiling_bytes);

        let interrupt_state = Rc::new(InterruptState::default());
        let handler_state = Rc::clone(&interrupt_state);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            if handler_state.requested.get() {
                return true;
            }
            match handler_state.deadline.get() {
                Some(deadline) => Instant::now() >= deadline,
                None => false,
            }
        })));

        let context = rquickjs::Context::full(&runtime)
            .map_err(|e| Error::Internal(format!("failed to create JS context: {e}")))?;

        Ok(Self {
            runtime,
            context,
            heap_ceiling_bytes: opts.heap_ceiling_bytes,
            evaluating: Rc::new(RefCell::new(HashSet::new())),
            interrupt_state,
        })
    }

    /// Run `install` with access to the isolate's global context, for binding
    /// host functions and shim namespaces (spec §4.1 `inject_global`).
    pub fn inject_global<F, R>(&self, install: F) -> Result<R>
    where
        F: FnOnce(&rquickjs::Ctx) -> rquickjs::Result<R>,
    {
        self.context
            .with(|ctx| install(&ctx))
            .map_err(|e| self.translate(e))
    }

    /// Evaluate a module's source once. Re-entering the same `origin` while
    /// it is still evaluating is refused (spec §4.1 `ReentrantEval`); a
    /// module that finished evaluating may be re-evaluated (the caller is
    /// responsible for only calling this once per module in practice — the
    /// lifecycle manager never re-invokes `eval_module` for a loaded
    /// extension).
    pub fn eval_module(&self, source: &str, origin: &str) -> Result<()> {
        if !self.evaluating.borrow_mut().insert(origin.to_string()) {
            return Err(Error::ReentrantEval(origin.to_string()));
        }
        let result: rquickjs::Result<()> = self.context.with(|ctx| ctx.eval::<(), _>(source));
        self.evaluating.borrow_mut().remove(origin);
        result.map_err(|e| self.translate(e))
    }

    /// Invoke a previously-registered JS function by name on `globalThis`,
    /// passing a JSON-serializable argument and returning a JSON-serializable
    /// result. Round-trips through `JSON.parse`/`JSON.stringify` rather than
    /// a value-conversion API, so the bridge only depends on core `eval` +
    /// `Function::call`, not engine-specific JSON helpers. Used by the
    /// dispatcher to call back into extension-registered handlers.
    pub fn call_global(&self, name: &str, args: &serde_json::Value) -> Result<serde_json::Value> {
        let args_json = serde_json::to_string(args).unwrap_or_else(|_| "null".to_string());
        let result: rquickjs::Result<String> = self.context.with(|ctx| {
            let global = ctx.globals();
            let func: rquickjs::Function = global.get(name)?;
            let parsed: rquickjs::Value = ctx.eval(format!("({args_json})"))?;
            let result: rquickjs::Value = func.call((parsed,))?;
            let json_global: rquickjs::Object = global.get("JSON")?;
            let stringify: rquickjs::Function = json_global.get("stringify")?;
            stringify.call((result,))
        });
        let raw = result.map_err(|e| self.translate(e))?;
        Ok(serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null))
    }

    /// Drive exactly one pending microtask/job (spec §5's "cooperative
    /// checkpoints"): a manual tick loop rather than rquickjs's own async
    /// executor, so the embedder controls exactly when JS gets to run.
    pub fn tick(&self) -> Result<bool> {
        self.runtime
            .execute_pending_job()
            .map_err(|e| Error::ScriptError {
                message: e.to_string(),
                stack: None,
            })
    }

    /// Arm a wall-clock watchdog; the interrupt handler installed in `new`
    /// will request a yield once `budget` elapses (spec §4.1: "default
    /// 200ms for registrations, 30s for handler bodies").
    pub fn arm_watchdog(&self, budget: Duration) {
        self.interrupt_state.deadline.set(Some(Instant::now() + budget));
    }

    pub fn disarm_watchdog(&self) {
        self.interrupt_state.deadline.set(None);
    }

    /// Asynchronously request the engine to yield at its next checkpoint
    /// (spec §4.1 `interrupt`).
    pub fn interrupt(&self) {
        self.interrupt_state.requested.set(true);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt_state.requested.set(false);
    }

    #[must_use]
    pub const fn heap_ceiling_bytes(&self) -> usize {
        self.heap_ceiling_bytes
    }

    #[must_use]
    pub fn memory_used_bytes(&self) -> usize {
        self.runtime.memory_usage().memory_used_size.max(0) as usize
    }

    fn translate(&self, err: rquickjs::Error) -> Error {
        if self.memory_used_bytes() >= self.heap_ceiling_bytes {
            return Error::OutOfMemory {
                used_bytes: self.memory_used_bytes(),
                ceiling_bytes: self.heap_ceiling_bytes,
            };
        }
        if let rquickjs::Error::Exception = err {
            let message = self
                .context
                .with(|ctx| {
                    ctx.catch()
                        .as_exception()
                        .map(|e| e.message().unwrap_or_default())
                        .unwrap_or_default()
                })
                .to_string();
            return Error::ScriptError { message, stack: None };
        }
        Error::ScriptError {
            message: err.to_string(),
            stack: None,
        }
    }
}

// Isolates are single-threaded by construction; `Rc`-based interior state is
// only ever touched from the worker thread that owns the handle.
impl Drop for IsolateHandle {
    fn drop(&mut self) {
        self.interrupt_state.requested.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> IsolateOpts {
        IsolateOpts {
            heap_ceiling_bytes: 64 * 1024 * 1024,
        }
    }

    #[test]
    fn eval_module_executes_source() {
        let isolate = IsolateHandle::new(&opts()).expect("isolate");
        isolate
            .eval_module("globalThis.x = 1 + 1; globalThis.getX = () => globalThis.x;", "test.js")
            .expect("eval");
        let value = isolate.call_global("getX", &serde_json::Value::Null).expect("call");
        assert_eq!(value, serde_json::json!(2));
    }

    #[test]
    fn reentrant_eval_of_same_origin_is_refused() {
        let isolate = IsolateHandle::new(&opts()).expect("isolate");
        isolate.evaluating.borrow_mut().insert("busy.js".to_string());
        let err = isolate.eval_module("1;", "busy.js").unwrap_err();
        assert_eq!(err.code(), "reentrant_eval");
    }

    #[test]
    fn script_error_surfaces_thrown_exception() {
        let isolate = IsolateHandle::new(&opts()).expect("isolate");
        let err = isolate
            .eval_module("throw new Error('boom');", "bad.js")
            .unwrap_err();
        assert_eq!(err.code(), "script_error");
    }
}
