//! The `pi` object injected into every extension (spec §4.3) plus the
//! hostcall queue that bridges async operations (`pi.tool`, `fetch`, `exec`,
//! `sendMessage`, `events.emit`) out to Rust.
//!
//! Registration-shaped calls (`registerCommand`, `registerTool`, ...,
//! `on`, `getFlag`, `setSessionName`/`getSessionName`) are synchronous host
//! functions bound directly against shared, `Rc<RefCell<...>>`-held state —
//! they either return immediately or throw a catchable JS exception, per
//! spec §4.3 ("All functions are synchronous from the extension's
//! perspective unless explicitly returning a promise"). Operations that
//! genuinely need the embedder (tool execution, network, child processes,
//! session injection, cross-extension events) are queued as `HostcallRequest`
//! and resolved later by `ExtensionDispatcher`, mirroring the drain/dispatch/
//! complete loop the teacher established.

use crate::error::{Error, Result};
use crate::registry::{Registration, RegistrationKind, RegistrationRegistry};
use crate::runtime::{IsolateHandle, IsolateOpts};
use crate::scheduler::{Clock, HostcallOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// The closed set of operations that cross from an extension's isolate out
/// to the embedder. Registration-shaped operations never appear here; they
/// are resolved synchronously inside the isolate (see module docs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostcallKind {
    Tool { name: String },
    Fetch,
    Exec,
    SendMessage,
    SendUserMessage,
    AppendEntry { custom_type: String },
    EventsEmit { name: String },
}

#[derive(Debug, Clone)]
pub struct HostcallRequest {
    pub call_id: String,
    pub extension_id: String,
    pub kind: HostcallKind,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickStats {
    pub ran_macrotask: bool,
}

const PRELUDE_JS: &str = r#"
(function () {
  globalThis.__pendingHostcalls = globalThis.__pendingHostcalls || {};
  globalThis.__handlers = globalThis.__handlers || {};
  globalThis.__nextCallId = globalThis.__nextCallId || 0;

  function makeHostcall(kind, payload) {
    const id = "call_" + (globalThis.__nextCallId++);
    return new Promise((resolve, reject) => {
      globalThis.__pendingHostcalls[id] = { resolve, reject };
      __enqueueHostcall(id, JSON.stringify(kind), JSON.stringify(payload === undefined ? null : payload));
    });
  }

  globalThis.__resolveHostcall = function (args) {
    const entry = globalThis.__pendingHostcalls[args.id];
    if (!entry) return;
    delete globalThis.__pendingHostcalls[args.id];
    if (args.isError) {
      const err = new Error(args.result.message);
      err.code = args.result.code;
      entry.reject(err);
    } else {
      entry.resolve(args.result);
    }
  };

  globalThis.__makeHostcall = makeHostcall;

  globalThis.__dispatchHandler = function (args) {
    const handler = globalThis.__handlers[args.key];
    if (typeof handler !== "function") return null;
    return handler(args.payload);
  };

  const pi = {};

  pi.registerCommand = function (name, def) {
    __registerCommand(name, JSON.stringify({ description: def.description, shortcut: def.shortcut || null }));
    globalThis.__handlers["command:" + name] = def.handler;
  };

  pi.registerTool = function (def) {
    __registerTool(def.name, JSON.stringify({
      label: def.label, description: def.description, parameters: def.parameters,
    }));
    globalThis.__handlers["tool:" + def.name] = def.execute;
  };

  pi.registerProvider = function (id, def) {
    __registerProvider(id, JSON.stringify(def));
  };

  pi.registerMessageRenderer = function (customType, fn) {
    __registerMessageRenderer(customType, JSON.stringify({}));
    globalThis.__handlers["renderer:" + customType] = fn;
  };

  pi.registerShortcut = function (key, def) {
    __registerShortcut(key, JSON.stringify({ description: def.description }));
    globalThis.__handlers["shortcut:" + key] = def.handler;
  };

  pi.registerFlag = function (name, def) {
    __registerFlag(name, JSON.stringify(def));
  };

  pi.getFlag = function (name) {
    return JSON.parse(__getFlag(name));
  };

  pi.on = function (eventKind, handler) {
    const order = __onSubscribe(eventKind);
    const key = "event:" + eventKind + ":" + order;
    globalThis.__handlers[key] = handler;
    return function unsubscribe() {
      __onUnsubscribe(eventKind, order);
      delete globalThis.__handlers[key];
    };
  };

  pi.events = {
    emit(name, payload) {
      return makeHostcall({ type: "events_emit", name }, payload);
    },
    on(name, handler) {
      return pi.on("extension:" + name, handler);
    },
  };

  pi.exec = function (cmd, argv, opts) {
    return makeHostcall({ type: "exec" }, { cmd, argv, opts: opts || {} });
  };

  pi.tool = function (name, input) {
    return makeHostcall({ type: "tool", name }, input);
  };

  pi.sendMessage = function (msg, opts) {
    return makeHostcall({ type: "send_message" }, { msg, opts: opts || {} });
  };

  pi.sendUserMessage = function (text) {
    return makeHostcall({ type: "send_user_message" }, { text });
  };

  pi.appendEntry = function (type, data) {
    return makeHostcall({ type: "append_entry", custom_type: type }, data);
  };

  pi.setSessionName = function (title) {
    __setSessionName(title);
  };

  pi.getSessionName = function () {
    return __getSessionName();
  };

  globalThis.pi = pi;
})();
"#;

/// Per-isolate state shared between the synchronous registration bridges and
/// the `PiJsRuntime` façade. Held behind `Rc<RefCell<_>>` because the host
/// closures bound into the isolate capture clones of it.
struct RuntimeState {
    extension_id: String,
    registrations: Rc<RefCell<RegistrationRegistry>>,
    flags: RefCell<BTreeMap<String, Value>>,
    subscription_orders: RefCell<BTreeMap<String, Vec<u64>>>,
    session_name: RefCell<Option<String>>,
    hostcall_queue: RefCell<VecDeque<HostcallRequest>>,
}

/// A single extension's JS isolate plus the `pi` surface bound into it.
pub struct PiJsRuntime<C: Clock> {
    isolate: IsolateHandle,
    clock: C,
    state: Rc<RuntimeState>,
}

impl<C: Clock> PiJsRuntime<C> {
    /// Construct a runtime with its own private registration registry —
    /// convenient for tests and for the conformance harness's isolated
    /// fixture runs. Production use goes through `with_shared_registry` so
    /// all extensions in a worker share one registry per spec §4.5.
    pub async fn with_clock(clock: C) -> Result<Self> {
        Self::with_shared_registry(
            clock,
            "test-extension".to_string(),
            Rc::new(RefCell::new(RegistrationRegistry::new())),
            64 * 1024 * 1024,
        )
        .await
    }

    pub async fn with_shared_registry(
        clock: C,
        extension_id: String,
        registrations: Rc<RefCell<RegistrationRegistry>>,
        heap_ceiling_bytes: usize,
    ) -> Result<Self> {
        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes })?;
        let state = Rc::new(RuntimeState {
            extension_id,
            registrations,
            flags: RefCell::new(BTreeMap::new()),
            subscription_orders: RefCell::new(BTreeMap::new()),
            session_name: RefCell::new(None),
            hostcall_queue: RefCell::new(VecDeque::new()),
        });
        bind_host_functions(&isolate, &state)?;
        isolate.eval_module(PRELUDE_JS, "pi:prelude.js")?;
        Ok(Self { isolate, clock, state })
    }

    pub async fn eval(&self, source: &str) -> Result<()> {
        self.isolate.eval_module(source, "extension:entry.js")
    }

    #[must_use]
    pub fn drain_hostcall_requests(&self) -> VecDeque<HostcallRequest> {
        std::mem::take(&mut self.state.hostcall_queue.borrow_mut())
    }

    pub fn complete_hostcall(&self, call_id: String, outcome: HostcallOutcome) {
        let (is_error, result) = match outcome {
            HostcallOutcome::Success(value) => (false, value),
            HostcallOutcome::Error { code, message } => {
                (true, serde_json::json!({ "code": code, "message": message }))
            }
        };
        let args = serde_json::json!({
            "id": call_id,
            "isError": is_error,
            "result": result,
        });
        let _ = self.isolate.call_global("__resolveHostcall", &args);
    }

    /// Drive exactly one pending job (spec §5 cooperative checkpoint).
    pub async fn tick(&self) -> Result<TickStats> {
        let ran = self.isolate.tick()?;
        Ok(TickStats { ran_macrotask: ran })
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Dispatch an event to this extension's subscribed handler at `order`,
    /// returning its JSON response (used by the event bus).
    pub fn dispatch_event(&self, kind: &str, order: u64, payload: &Value) -> Result<Value> {
        let key = format!("event:{kind}:{order}");
        self.isolate
            .call_global("__dispatchHandler", &serde_json::json!({ "key": key, "payload": payload }))
    }

    /// As `dispatch_event`, but under a handler-phase watchdog (spec §4.1:
    /// 30s default ceiling for handler bodies).
    pub fn dispatch_event_with_timeout(
        &self,
        kind: &str,
        order: u64,
        payload: &Value,
        timeout: std::time::Duration,
    ) -> Result<Value> {
        let key = format!("event:{kind}:{order}");
        crate::runtime::call_with_watchdog(
            &self.isolate,
            "__dispatchHandler",
            &serde_json::json!({ "key": key, "payload": payload }),
            timeout,
        )
    }

    /// Invoke this extension's `registerTool` `execute` closure directly,
    /// bypassing the async hostcall queue — used when the host itself is the
    /// caller (spec §8 scenario 1) rather than another extension via `pi.tool`.
    pub fn invoke_tool(&self, name: &str, input: &Value, timeout: std::time::Duration) -> Result<Value> {
        let key = format!("tool:{name}");
        crate::runtime::call_with_watchdog(
            &self.isolate,
            "__dispatchHandler",
            &serde_json::json!({ "key": key, "payload": input }),
            timeout,
        )
    }

    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.state.extension_id
    }

    #[must_use]
    pub fn isolate(&self) -> &IsolateHandle {
        &self.isolate
    }
}

fn add_registration(
    state: &Rc<RuntimeState>,
    kind: RegistrationKind,
    name: &str,
    payload: Value,
) -> Result<()> {
    if kind == RegistrationKind::Tool {
        if let Some(parameters) = payload.get("parameters") {
            jsonschema::validator_for(parameters)
                .map_err(|err| Error::SchemaInvalid(format!("tool {name}: {err}")))?;
        }
    }
    state.registrations.borrow_mut().add(Registration {
        kind,
        name: name.to_string(),
        extension_id: state.extension_id.clone(),
        payload,
    })
}

/// Bind every native host function the prelude calls by name. Registration
/// functions mutate shared state directly and propagate failures as thrown
/// JS exceptions; `__enqueueHostcall` only ever pushes onto the queue.
fn bind_host_functions(isolate: &IsolateHandle, state: &Rc<RuntimeState>) -> Result<()> {
    isolate.inject_global(|ctx| {
        let globals = ctx.globals();

        {
            let state = Rc::clone(state);
            globals.set(
                "__enqueueHostcall",
                rquickjs::Function::new(ctx.clone(), move |id: String, kind_json: String, payload_json: String| {
                    let kind: HostcallKind = serde_json::from_str(&kind_json).unwrap_or(HostcallKind::Tool {
                        name: String::new(),
                    });
                    let payload: Value = serde_json::from_str(&payload_json).unwrap_or(Value::Null);
                    state.hostcall_queue.borrow_mut().push_back(HostcallRequest {
                        call_id: id,
                        extension_id: state.extension_id.clone(),
                        kind,
                        payload,
                    });
                }),
            )?;
        }

        bind_sync_register(ctx, &globals, state, "__registerCommand", RegistrationKind::Command)?;
        bind_sync_register(ctx, &globals, state, "__registerTool", RegistrationKind::Tool)?;
        bind_sync_register(ctx, &globals, state, "__registerProvider", RegistrationKind::Provider)?;
        bind_sync_register(
            ctx,
            &globals,
            state,
            "__registerMessageRenderer",
            RegistrationKind::MessageRenderer,
        )?;
        bind_sync_register(ctx, &globals, state, "__registerShortcut", RegistrationKind::Shortcut)?;
        bind_sync_register(ctx, &globals, state, "__registerFlag", RegistrationKind::Flag)?;

        {
            let state = Rc::clone(state);
            globals.set(
                "__getFlag",
                rquickjs::Function::new(ctx.clone(), move |name: String| -> String {
                    let value = state.flags.borrow().get(&name).cloned().unwrap_or(Value::Null);
                    serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
                }),
            )?;
        }

        {
            let state = Rc::clone(state);
            globals.set(
                "__onSubscribe",
                rquickjs::Function::new(ctx.clone(), move |event_kind: String| -> u64 {
                    let next = {
                        let mut orders = state.subscription_orders.borrow_mut();
                        let list = orders.entry(event_kind.clone()).or_default();
                        let next = list.last().copied().map_or(0, |n| n + 1);
                        list.push(next);
                        next
                    };
                    state.registrations.borrow_mut().add_handler(Registration {
                        kind: RegistrationKind::EventHandler,
                        name: event_kind,
                        extension_id: state.extension_id.clone(),
                        payload: serde_json::json!({ "order": next }),
                    });
                    next
                }),
            )?;
        }

        {
            let state = Rc::clone(state);
            globals.set(
                "__onUnsubscribe",
                rquickjs::Function::new(ctx.clone(), move |event_kind: String, order: u64| {
                    if let Some(list) = state.subscription_orders.borrow_mut().get_mut(&event_kind) {
                        list.retain(|o| *o != order);
                    }
                    state
                        .registrations
                        .borrow_mut()
                        .remove_handler(&state.extension_id, &event_kind, order);
                }),
            )?;
        }

        {
            let state = Rc::clone(state);
            globals.set(
                "__setSessionName",
                rquickjs::Function::new(ctx.clone(), move |name: String| {
                    *state.session_name.borrow_mut() = Some(name);
                }),
            )?;
        }

        {
            let state = Rc::clone(state);
            globals.set(
                "__getSessionName",
                rquickjs::Function::new(ctx.clone(), move || -> String {
                    state.session_name.borrow().clone().unwrap_or_default()
                }),
            )?;
        }

        Ok(())
    })
}

/// Bind a `__register<Kind>(name, jsonPayload)` host function that adds to
/// the shared registry and throws `DuplicateRegistration` back into JS on
/// collision, matching spec §4.3's "collisions ... fail".
fn bind_sync_register(
    ctx: &rquickjs::Ctx,
    globals: &rquickjs::Object,
    state: &Rc<RuntimeState>,
    js_name: &'static str,
    kind: RegistrationKind,
) -> rquickjs::Result<()> {
    let state = Rc::clone(state);
    globals.set(
        js_name,
        rquickjs::Function::new(ctx.clone(), move |ctx: rquickjs::Ctx<'_>, name: String, payload_json: String| -> rquickjs::Result<()> {
            let payload: Value = serde_json::from_str(&payload_json).unwrap_or(Value::Null);
            match add_registration(&state, kind, &name, payload) {
                Ok(()) => Ok(()),
                Err(err) => {
                    let message = rquickjs::String::from_str(ctx.clone(), &err.to_string())?;
                    Err(ctx.throw(message.into_value()))
                }
            }
        }),
    )
}
