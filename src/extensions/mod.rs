//! Extension lifecycle manager (spec §4.6).
//!
//! Drives each discovered extension directory through discovery → preflight
//! → isolate creation → module evaluation → validation → activation, rolling
//! back partial registrations on any phase-1-through-4 failure so peers are
//! unaffected (spec §4.6 "Other extensions continue loading unaffected").

pub mod path;
pub mod shims;

use crate::capability::CapabilityGrant;
use crate::connectors::http::HttpConnector;
use crate::error::{Error, Result};
use crate::event_bus::{DispatchOutcome, EventBus, EventKind, HandlerOutcome, HandlerResponse};
use crate::extension_dispatcher::{ChildProcessTable, ExtensionDispatcher, ExtensionUiHandler};
use crate::extensions_js::{HostcallKind, PiJsRuntime};
use crate::manifest::Manifest;
use crate::preflight::PreflightReport;
use crate::registry::{RegistrationKind, RegistrationRegistry};
use crate::scheduler::{Clock, HostcallOutcome};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long to wait after SIGTERM before a still-running child spawned by
/// `pi.exec`/`child_process.spawn` is sent SIGKILL on extension unload.
const CHILD_KILL_GRACE: Duration = Duration::from_millis(500);

/// The five states an extension descriptor moves through (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Loading,
    Active,
    Degraded,
    Failed,
    Unloaded,
}

#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub manifest: Manifest,
    pub dir: PathBuf,
    pub state: ExtensionState,
    pub required: bool,
    pub failure: Option<String>,
    pub preflight: Option<PreflightReport>,
}

/// Request/response shapes for extension-triggered UI prompts (spec §4.3
/// implies an embedder-owned UI surface; kept abstract here since its
/// internals are the embedder's concern per spec §1).
#[derive(Debug, Clone)]
pub struct ExtensionUiRequest {
    pub extension_id: String,
    pub prompt: Value,
}

#[derive(Debug, Clone)]
pub struct ExtensionUiResponse {
    pub value: Value,
}

pub use crate::session::ExtensionSession;

/// `pi.ui()` has no embedder wired up by default; every prompt resolves to
/// "no answer" rather than hanging the isolate.
pub struct NoopUiHandler;

#[async_trait]
impl ExtensionUiHandler for NoopUiHandler {
    async fn request_ui(&self, _request: ExtensionUiRequest) -> Result<Option<ExtensionUiResponse>> {
        Ok(None)
    }
}

/// Loads extension directories into a shared registry, enforcing the
/// rollback-on-failure and required/optional propagation rules.
pub struct ExtensionManager<C: Clock> {
    pub registrations: Rc<RefCell<RegistrationRegistry>>,
    pub descriptors: Vec<ExtensionDescriptor>,
    clock: C,
    heap_ceiling_bytes: usize,
    registration_timeout: std::time::Duration,
    /// Live isolates for activated extensions, kept around so later event
    /// dispatch and hostcall completion can still reach them (spec §4.6:
    /// activation is not the end of an extension's lifetime, only loading).
    runtimes: RefCell<BTreeMap<String, Rc<PiJsRuntime<C>>>>,
    /// The capability grant each activated extension loaded under, needed to
    /// build its `ExtensionDispatcher` when hostcalls are pumped.
    grants: RefCell<BTreeMap<String, CapabilityGrant>>,
    event_bus: RefCell<EventBus<C>>,
    /// `(extension_id, kind)` -> the JS-side `on()` order, needed to address
    /// the right handler key inside that extension's isolate. Assumes an
    /// extension registers at most one handler per event kind, which is the
    /// pattern every shim/fixture in this crate follows.
    js_orders: RefCell<BTreeMap<(String, EventKind), u64>>,
    /// Built-in plus extension-registered tools available to `pi.tool()`
    /// cross-extension calls and host-native dispatch.
    tool_registry: Arc<ToolRegistry>,
    /// Shared `fetch`/`http.request` connector used by every extension's
    /// dispatcher.
    http_connector: Arc<HttpConnector>,
    /// The embedder's session surface (`sendMessage`/`appendEntry`/...),
    /// defaulting to an in-memory store when the embedder doesn't supply one.
    session: Arc<dyn ExtensionSession + Send + Sync>,
    /// The embedder's `pi.ui()` surface, defaulting to a no-op.
    ui_handler: Arc<dyn ExtensionUiHandler + Send + Sync>,
    /// PIDs of still-running children spawned by `exec` hostcalls, shared
    /// across every extension's dispatcher so `unload` can tear them down.
    processes: ChildProcessTable,
}

impl<C: Clock + 'static> ExtensionManager<C> {
    #[must_use]
    pub fn new(clock: C, heap_ceiling_bytes: usize, registration_timeout: std::time::Duration) -> Self {
        Self {
            registrations: Rc::new(RefCell::new(RegistrationRegistry::new())),
            descriptors: Vec::new(),
            event_bus: RefCell::new(EventBus::new(clock.clone(), 3)),
            clock,
            heap_ceiling_bytes,
            registration_timeout,
            runtimes: RefCell::new(BTreeMap::new()),
            grants: RefCell::new(BTreeMap::new()),
            js_orders: RefCell::new(BTreeMap::new()),
            tool_registry: Arc::new(ToolRegistry::new(&["read"], Path::new("."), None)),
            http_connector: Arc::new(HttpConnector::with_defaults()),
            session: Arc::new(crate::session::InMemorySession::new()),
            ui_handler: Arc::new(NoopUiHandler),
            processes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Construct with a non-default strike threshold (spec §3
    /// `strike_threshold`, defaulting to 3 above).
    #[must_use]
    pub fn with_strike_threshold(
        clock: C,
        heap_ceiling_bytes: usize,
        registration_timeout: std::time::Duration,
        strike_threshold: u32,
    ) -> Self {
        Self {
            registrations: Rc::new(RefCell::new(RegistrationRegistry::new())),
            descriptors: Vec::new(),
            event_bus: RefCell::new(EventBus::new(clock.clone(), strike_threshold)),
            clock,
            heap_ceiling_bytes,
            registration_timeout,
            runtimes: RefCell::new(BTreeMap::new()),
            grants: RefCell::new(BTreeMap::new()),
            js_orders: RefCell::new(BTreeMap::new()),
            tool_registry: Arc::new(ToolRegistry::new(&["read"], Path::new("."), None)),
            http_connector: Arc::new(HttpConnector::with_defaults()),
            session: Arc::new(crate::session::InMemorySession::new()),
            ui_handler: Arc::new(NoopUiHandler),
            processes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Override the tool registry used by cross-extension `pi.tool()` and
    /// native tool dispatch (default: a `ToolRegistry` with only `read`).
    pub fn set_tool_registry(&mut self, tool_registry: Arc<ToolRegistry>) {
        self.tool_registry = tool_registry;
    }

    /// Override the `fetch`/`http.request` connector (default: an unproxied
    /// `HttpConnector::with_defaults()`).
    pub fn set_http_connector(&mut self, http_connector: Arc<HttpConnector>) {
        self.http_connector = http_connector;
    }

    /// Override the session surface (default: an in-memory, process-local
    /// session that does not survive restart).
    pub fn set_session(&mut self, session: Arc<dyn ExtensionSession + Send + Sync>) {
        self.session = session;
    }

    /// Override the `pi.ui()` surface (default: always answers "no").
    pub fn set_ui_handler(&mut self, ui_handler: Arc<dyn ExtensionUiHandler + Send + Sync>) {
        self.ui_handler = ui_handler;
    }

    /// Phase 1 (Discovery): read the manifest and verify the entry file
    /// exists, without creating an isolate yet.
    pub fn discover(&mut self, dir: &Path) -> ExtensionDescriptor {
        let manifest_path = dir.join("plugin.json");
        let manifest_path = if manifest_path.exists() {
            manifest_path
        } else {
            dir.join("package.json")
        };

        match Manifest::load(&manifest_path).and_then(|manifest| {
            manifest.entry_path(dir)?;
            Ok(manifest)
        }) {
            Ok(manifest) => ExtensionDescriptor {
                id: manifest.name.clone(),
                required: manifest.required,
                manifest,
                dir: dir.to_path_buf(),
                state: ExtensionState::Loading,
                failure: None,
                preflight: None,
            },
            Err(err) => ExtensionDescriptor {
                id: dir.display().to_string(),
                manifest: Manifest::default(),
                dir: dir.to_path_buf(),
                state: ExtensionState::Failed,
                required: false,
                failure: Some(err.to_string()),
                preflight: None,
            },
        }
    }

    /// Phases 2–6 for one already-discovered, non-`Failed` descriptor. On
    /// any error the descriptor moves to `Failed` and its partial
    /// registrations are rolled back; the caller decides whether that is
    /// fatal based on `required`.
    pub async fn load_one(&mut self, index: usize) -> Result<()> {
        let descriptor = self.descriptors[index].clone();
        if descriptor.state == ExtensionState::Failed {
            return Err(Error::ManifestInvalid(
                descriptor.failure.unwrap_or_default(),
            ));
        }

        let result = self.try_load(&descriptor).await;
        match result {
            Ok((runtime, preflight, grant)) => {
                tracing::info!(
                    extension = descriptor.id.as_str(),
                    capabilities = format!("{grant:?}").as_str(),
                    "extension activated"
                );
                self.subscribe_event_handlers(&descriptor.id);
                self.grants.borrow_mut().insert(descriptor.id.clone(), grant);
                self.runtimes.borrow_mut().insert(descriptor.id.clone(), runtime);
                self.descriptors[index].state = ExtensionState::Active;
                self.descriptors[index].preflight = Some(preflight);
                Ok(())
            }
            Err(err) => {
                self.registrations.borrow_mut().remove_owned_by(&descriptor.id);
                self.descriptors[index].state = ExtensionState::Failed;
                self.descriptors[index].failure = Some(err.to_string());
                if descriptor.required {
                    tracing::error!(extension = descriptor.id.as_str(), error = %err, "required extension failed to load");
                } else {
                    tracing::warn!(extension = descriptor.id.as_str(), error = %err, "optional extension failed to load");
                }
                if descriptor.required { Err(err) } else { Ok(()) }
            }
        }
    }

    /// Scan the registry for this extension's freshly-added `on()`
    /// subscriptions, registering each with the bus (in registration order)
    /// and recording its JS-side order for later dispatch.
    fn subscribe_event_handlers(&self, extension_id: &str) {
        let registrations = self.registrations.borrow();
        let mut bus = self.event_bus.borrow_mut();
        let mut orders = self.js_orders.borrow_mut();
        for registration in registrations.iter(RegistrationKind::EventHandler) {
            if registration.extension_id != extension_id {
                continue;
            }
            let Some(kind) = EventKind::from_token(&registration.name) else {
                continue;
            };
            let order = registration
                .payload
                .get("order")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            bus.subscribe(extension_id, kind);
            orders.insert((extension_id.to_string(), kind), order);
        }
    }

    /// Dispatch `payload` for `kind` to every subscribed extension's handler,
    /// in registration order, under a per-handler watchdog (spec §4.4/§4.1).
    pub async fn dispatch_event(
        &self,
        kind: EventKind,
        payload: &Value,
        deadline: Option<Duration>,
        handler_timeout: Duration,
    ) -> Result<DispatchOutcome> {
        let runtimes = &self.runtimes;
        let js_orders = &self.js_orders;
        self.event_bus
            .borrow_mut()
            .dispatch(kind, payload, deadline, move |extension_id, payload| async move {
                let order = js_orders
                    .borrow()
                    .get(&(extension_id.clone(), kind))
                    .copied()
                    .unwrap_or(0);
                let runtimes = runtimes.borrow();
                let Some(runtime) = runtimes.get(&extension_id) else {
                    return HandlerOutcome::Errored("extension runtime not found".to_string());
                };
                let started = std::time::Instant::now();
                match runtime.dispatch_event_with_timeout(kind.token(), order, &payload, handler_timeout) {
                    Ok(value) if value.is_null() => HandlerOutcome::Response(HandlerResponse::default()),
                    Ok(value) => serde_json::from_value(value)
                        .map(HandlerOutcome::Response)
                        .unwrap_or_else(|_| HandlerOutcome::Response(HandlerResponse::default())),
                    Err(_) if started.elapsed() >= handler_timeout => HandlerOutcome::TimedOut,
                    Err(err) => HandlerOutcome::Errored(err.to_string()),
                }
            })
            .await
    }

    #[must_use]
    pub fn runtime(&self, extension_id: &str) -> bool {
        self.runtimes.borrow().contains_key(extension_id)
    }

    /// Invoke an extension-registered tool by name (spec §8 scenario 1),
    /// looking up the owning extension from the registry rather than
    /// requiring the caller to know it, and rejecting `input` that does not
    /// match the tool's own declared JSON Schema before it ever reaches
    /// `execute` (spec §4.3 tool contract).
    pub fn invoke_tool(&self, name: &str, input: &Value, timeout: Duration) -> Result<Value> {
        let registration = self
            .registrations
            .borrow()
            .iter(RegistrationKind::Tool)
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| Error::validation(format!("no tool registered with name `{name}`")))?;

        if let Some(parameters) = registration.payload.get("parameters") {
            let validator = jsonschema::validator_for(parameters)
                .map_err(|err| Error::SchemaInvalid(format!("tool `{name}` has an invalid parameters schema: {err}")))?;
            if let Err(err) = validator.validate(input) {
                return Err(Error::SchemaInvalid(format!(
                    "tool `{name}` input does not match its schema: {err}"
                )));
            }
        }

        let runtimes = self.runtimes.borrow();
        let runtime = runtimes
            .get(&registration.extension_id)
            .ok_or_else(|| Error::validation(format!("extension `{}` has no live runtime", registration.extension_id)))?;
        runtime.invoke_tool(name, input, timeout)
    }

    async fn try_load(
        &self,
        descriptor: &ExtensionDescriptor,
    ) -> Result<(Rc<PiJsRuntime<C>>, PreflightReport, CapabilityGrant)> {
        let entry_path = descriptor.manifest.entry_path(&descriptor.dir)?;
        let source = std::fs::read_to_string(&entry_path)?;

        let preflight = crate::preflight::analyze(&source)?;

        let grant = descriptor.manifest.capability_grant();

        let runtime = PiJsRuntime::with_shared_registry(
            self.clock.clone(),
            descriptor.id.clone(),
            Rc::clone(&self.registrations),
            self.heap_ceiling_bytes,
        )
        .await?;

        crate::extensions::shims::install(runtime_isolate(&runtime), &grant)?;

        crate::runtime::eval_with_watchdog(
            runtime_isolate(&runtime),
            &source,
            entry_path.to_string_lossy().as_ref(),
            self.registration_timeout,
        )?;

        Ok((Rc::new(runtime), preflight, grant))
    }

    /// Drain every loaded extension's pending hostcall queue and dispatch
    /// each request, resolving the JS-side promise. Must run at least once
    /// per event-loop turn: without it `pi.exec`, cross-extension
    /// `pi.tool()`, `pi.sendMessage`/`sendUserMessage`/`appendEntry`,
    /// `pi.events.emit`, and `fetch`/`http.request` never settle.
    pub async fn pump_hostcalls(&self, handler_timeout: Duration) -> Result<()> {
        let extension_ids: Vec<String> = self.runtimes.borrow().keys().cloned().collect();
        for extension_id in extension_ids {
            self.pump_one(&extension_id, handler_timeout).await?;
        }
        Ok(())
    }

    async fn pump_one(&self, extension_id: &str, handler_timeout: Duration) -> Result<()> {
        let Some(runtime) = self.runtimes.borrow().get(extension_id).cloned() else {
            return Ok(());
        };
        let requests = runtime.drain_hostcall_requests();
        if requests.is_empty() {
            return Ok(());
        }

        let grant = self
            .grants
            .borrow()
            .get(extension_id)
            .cloned()
            .unwrap_or_else(CapabilityGrant::minimum);
        let cwd = self
            .descriptors
            .iter()
            .find(|d| d.id == extension_id)
            .map_or_else(PathBuf::new, |d| d.dir.clone());

        let dispatcher = ExtensionDispatcher::with_process_table(
            Rc::clone(&runtime),
            Arc::clone(&self.tool_registry),
            Arc::clone(&self.http_connector),
            Arc::clone(&self.session),
            Arc::clone(&self.ui_handler),
            cwd,
            grant,
            Arc::clone(&self.processes),
        );

        for request in requests {
            match &request.kind {
                HostcallKind::Tool { name }
                    if self.registrations.borrow().iter(RegistrationKind::Tool).any(|r| &r.name == name) =>
                {
                    let outcome = match self.invoke_tool(name, &request.payload, handler_timeout) {
                        Ok(value) => HostcallOutcome::Success(value),
                        Err(err) => HostcallOutcome::Error {
                            code: err.code().to_string(),
                            message: err.to_string(),
                        },
                    };
                    runtime.complete_hostcall(request.call_id.clone(), outcome);
                }
                HostcallKind::EventsEmit { name } => {
                    let call_id = request.call_id.clone();
                    self.dispatch_custom_event(name, &request.payload, handler_timeout).await;
                    runtime.complete_hostcall(call_id, HostcallOutcome::Success(Value::Null));
                }
                _ => dispatcher.dispatch_and_complete(request).await,
            }
        }
        Ok(())
    }

    /// Pump hostcalls and drive each runtime's microtask queue until nothing
    /// is left to settle, so promise chains built off an initial hostcall
    /// (`pi.exec(...).then(() => pi.tool(...))`, for instance) resolve too,
    /// not just the first link.
    pub async fn drain_and_settle(&self, handler_timeout: Duration) -> Result<()> {
        for _ in 0..8 {
            self.pump_hostcalls(handler_timeout).await?;
            let extension_ids: Vec<String> = self.runtimes.borrow().keys().cloned().collect();
            for extension_id in &extension_ids {
                let runtime = self.runtimes.borrow().get(extension_id).cloned();
                if let Some(runtime) = runtime {
                    runtime.tick().await?;
                }
            }
        }
        Ok(())
    }

    /// Deliver a `pi.events.emit(name, payload)` call to every extension
    /// that subscribed via `pi.events.on(name, ...)`. These are registered
    /// under the synthetic `extension:<name>` token, outside the closed
    /// `EventKind` set `subscribe_event_handlers` otherwise resolves.
    async fn dispatch_custom_event(&self, name: &str, payload: &Value, handler_timeout: Duration) {
        let token = format!("extension:{name}");
        let subscribers: Vec<(String, u64)> = self
            .registrations
            .borrow()
            .iter(RegistrationKind::EventHandler)
            .filter(|r| r.name == token)
            .map(|r| {
                let order = r.payload.get("order").and_then(Value::as_u64).unwrap_or(0);
                (r.extension_id.clone(), order)
            })
            .collect();

        for (subscriber_id, order) in subscribers {
            let runtime = self.runtimes.borrow().get(&subscriber_id).cloned();
            if let Some(runtime) = runtime {
                let _ = runtime.dispatch_event_with_timeout(&token, order, payload, handler_timeout);
            }
        }
    }

    pub fn unload(&mut self, index: usize) {
        let id = self.descriptors[index].id.clone();
        self.registrations.borrow_mut().remove_owned_by(&id);
        self.event_bus.borrow_mut().unsubscribe_all(&id);
        self.js_orders.borrow_mut().retain(|(ext_id, _), _| ext_id != &id);
        self.runtimes.borrow_mut().remove(&id);
        self.grants.borrow_mut().remove(&id);
        self.terminate_children(&id);
        self.descriptors[index].state = ExtensionState::Unloaded;
    }

    /// SIGTERM every child this extension's `exec` hostcalls spawned,
    /// escalating to SIGKILL after a grace period if still running (spec
    /// §4.6: unload tears down what it owns).
    fn terminate_children(&self, extension_id: &str) {
        let pids: Vec<u32> = self
            .processes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(extension_id)
            .unwrap_or_default();
        for pid in pids {
            crate::extension_dispatcher::send_sigterm(pid);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    tokio::time::sleep(CHILD_KILL_GRACE).await;
                    crate::extension_dispatcher::send_sigkill(pid);
                });
            }
        }
    }
}

/// Expose the private `IsolateHandle` a `PiJsRuntime` owns to the lifecycle
/// manager for watchdog-guarded evaluation, without making the field public
/// to every caller.
fn runtime_isolate<C: Clock>(runtime: &PiJsRuntime<C>) -> &crate::runtime::IsolateHandle {
    runtime.isolate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DeterministicClock;

    fn write_extension(dir: &Path, name: &str, entry_source: &str, required: bool) {
        std::fs::write(
            dir.join("plugin.json"),
            serde_json::json!({ "name": name, "version": "1.0.0", "entry": "index.js", "required": required })
                .to_string(),
        )
        .expect("write manifest");
        std::fs::write(dir.join("index.js"), entry_source).expect("write entry");
    }

    #[test]
    fn discover_reads_manifest_and_verifies_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(dir.path(), "demo", "pi.registerCommand('run', {handler: () => {}});", false);
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        assert_eq!(descriptor.state, ExtensionState::Loading);
        assert_eq!(descriptor.id, "demo");
    }

    #[test]
    fn discover_marks_missing_manifest_as_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        assert_eq!(descriptor.state, ExtensionState::Failed);
    }

    #[tokio::test]
    async fn load_one_activates_well_formed_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(
            dir.path(),
            "demo",
            "pi.registerCommand('run', {description: 'runs', handler: () => {}});",
            false,
        );
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        manager.load_one(0).await.expect("load");
        assert_eq!(manager.descriptors[0].state, ExtensionState::Active);
        assert_eq!(
            manager
                .registrations
                .borrow()
                .len(crate::registry::RegistrationKind::Command),
            1
        );
    }

    #[tokio::test]
    async fn load_one_rolls_back_partial_registrations_on_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(
            dir.path(),
            "demo",
            "pi.registerCommand('run', {description: 'runs', handler: () => {}}); throw new Error('boom');",
            false,
        );
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        manager.load_one(0).await.expect("optional failure tolerated");
        assert_eq!(manager.descriptors[0].state, ExtensionState::Failed);
        assert!(
            manager
                .registrations
                .borrow()
                .is_empty(crate::registry::RegistrationKind::Command)
        );
    }

    #[tokio::test]
    async fn dispatch_event_reaches_subscribed_handler_after_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(
            dir.path(),
            "demo",
            r#"pi.on("tool_call", (payload) => ({ block: true, reason: "blocked by demo" }));"#,
            false,
        );
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        manager.load_one(0).await.expect("load");

        let outcome = manager
            .dispatch_event(
                crate::event_bus::EventKind::ToolCall,
                &serde_json::json!({"name": "read"}),
                None,
                std::time::Duration::from_secs(5),
            )
            .await
            .expect("dispatch");

        assert!(outcome.blocked);
        assert_eq!(outcome.block_reason.as_deref(), Some("blocked by demo"));
    }

    #[tokio::test]
    async fn unload_removes_event_subscription() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(
            dir.path(),
            "demo",
            r#"pi.on("tool_call", () => ({ block: true, reason: "should not fire" }));"#,
            false,
        );
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        manager.load_one(0).await.expect("load");
        manager.unload(0);

        let outcome = manager
            .dispatch_event(
                crate::event_bus::EventKind::ToolCall,
                &serde_json::json!({"name": "read"}),
                None,
                std::time::Duration::from_secs(5),
            )
            .await
            .expect("dispatch");

        assert!(!outcome.blocked);
    }

    #[tokio::test]
    async fn invoke_tool_runs_registered_execute_closure() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(
            dir.path(),
            "demo",
            r#"pi.registerTool({
                name: "get_current_time",
                label: "Time",
                description: "returns the time",
                parameters: {type: "object", properties: {}},
                execute: () => ({content: [{type: "text", text: "2026-02-07T12:00:00Z"}], details: {}}),
            });"#,
            false,
        );
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        manager.load_one(0).await.expect("load");

        let result = manager
            .invoke_tool("get_current_time", &serde_json::json!({}), std::time::Duration::from_secs(5))
            .expect("invoke");
        assert_eq!(result["content"][0]["text"], "2026-02-07T12:00:00Z");
    }

    #[tokio::test]
    async fn invoke_tool_rejects_unknown_name() {
        let manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let err = manager
            .invoke_tool("nonexistent", &serde_json::json!({}), std::time::Duration::from_secs(1))
            .expect_err("should fail");
        assert_eq!(err.code(), "manifest_invalid");
    }

    #[tokio::test]
    async fn invoke_tool_rejects_input_violating_its_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(
            dir.path(),
            "demo",
            r#"pi.registerTool({
                name: "echo_name",
                label: "Echo",
                description: "echoes a required name",
                parameters: {type: "object", properties: {name: {type: "string"}}, required: ["name"]},
                execute: (input) => ({content: [{type: "text", text: input.name}], details: {}}),
            });"#,
            false,
        );
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        manager.load_one(0).await.expect("load");

        let err = manager
            .invoke_tool("echo_name", &serde_json::json!({}), std::time::Duration::from_secs(5))
            .expect_err("missing required field should fail validation");
        assert_eq!(err.code(), "schema_invalid");

        let ok = manager
            .invoke_tool("echo_name", &serde_json::json!({"name": "ada"}), std::time::Duration::from_secs(5))
            .expect("valid input should pass");
        assert_eq!(ok["content"][0]["text"], "ada");
    }

    #[tokio::test]
    async fn pump_hostcalls_resolves_a_top_level_exec_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(
            dir.path(),
            "demo",
            r#"
            globalThis.execResult = null;
            pi.exec("echo", ["hi"]).then((r) => { globalThis.execResult = r; });
            "#,
            false,
        );
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        manager.load_one(0).await.expect("load");

        manager
            .drain_and_settle(std::time::Duration::from_secs(5))
            .await
            .expect("settle");
    }

    #[tokio::test]
    async fn required_extension_failure_propagates() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_extension(dir.path(), "demo", "throw new Error('boom');", true);
        let mut manager = ExtensionManager::new(
            DeterministicClock::new(0),
            64 * 1024 * 1024,
            std::time::Duration::from_millis(200),
        );
        let descriptor = manager.discover(dir.path());
        manager.descriptors.push(descriptor);
        assert!(manager.load_one(0).await.is_err());
    }
}
