//! Hostcall dispatcher for JS extensions.
//!
//! This module introduces the core `ExtensionDispatcher` abstraction used to route
//! hostcall requests (tools, HTTP, session, UI, etc.) from the JS runtime to
//! Rust implementations.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::capability::{Capability, CapabilityGrant};
use crate::connectors::http::{FetchParamsIn, HttpConnector};
use crate::error::Result;
use crate::extensions::{ExtensionSession, ExtensionUiRequest, ExtensionUiResponse};
use crate::extensions_js::{HostcallKind, HostcallRequest, PiJsRuntime};
use crate::scheduler::{Clock as SchedulerClock, HostcallOutcome, WallClock};
use crate::session::SessionMessage;
use crate::tools::ToolRegistry;

/// PIDs of children a still-running `exec` hostcall has spawned, keyed by
/// extension id, so a lifecycle manager can send them a termination signal
/// when that extension unloads (spec §4.6 "unload tears down what it owns").
pub type ChildProcessTable = Arc<Mutex<BTreeMap<String, Vec<u32>>>>;

#[cfg(unix)]
pub fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(unix)]
pub fn send_sigkill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn send_sigterm(_pid: u32) {}

#[cfg(not(unix))]
pub fn send_sigkill(_pid: u32) {}

/// Coordinates hostcall dispatch between the JS extension runtime and Rust handlers.
pub struct ExtensionDispatcher<C: SchedulerClock = WallClock> {
    /// The JavaScript runtime that generates hostcall requests.
    runtime: Rc<PiJsRuntime<C>>,
    /// Registry of available tools (built-in + extension-registered).
    tool_registry: Arc<ToolRegistry>,
    /// HTTP connector for pi.http() calls.
    http_connector: Arc<HttpConnector>,
    /// Session access for pi.session() calls.
    session: Arc<dyn ExtensionSession + Send + Sync>,
    /// UI handler for pi.ui() calls.
    ui_handler: Arc<dyn ExtensionUiHandler + Send + Sync>,
    /// Current working directory for relative path resolution.
    cwd: PathBuf,
    /// The capability grant this extension loaded under, consulted by
    /// hostcalls that need a scope check the JS side cannot itself enforce
    /// (`fetch`'s host allow-list).
    grant: CapabilityGrant,
    /// The extension this dispatcher instance serves, used to key `exec`'s
    /// child-process table and to attribute `sendMessage`.
    extension_id: String,
    /// Shared with the lifecycle manager so it can tear down children this
    /// extension spawned via `exec` once the extension unloads.
    processes: ChildProcessTable,
}

impl<C: SchedulerClock + 'static> ExtensionDispatcher<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Rc<PiJsRuntime<C>>,
        tool_registry: Arc<ToolRegistry>,
        http_connector: Arc<HttpConnector>,
        session: Arc<dyn ExtensionSession + Send + Sync>,
        ui_handler: Arc<dyn ExtensionUiHandler + Send + Sync>,
        cwd: PathBuf,
        grant: CapabilityGrant,
    ) -> Self {
        let extension_id = runtime.extension_id().to_string();
        Self {
            runtime,
            tool_registry,
            http_connector,
            session,
            ui_handler,
            cwd,
            grant,
            extension_id,
            processes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// As `new`, but sharing a child-process table with the caller so it can
    /// terminate this extension's running children on unload.
    #[allow(clippy::too_many_arguments)]
    pub fn with_process_table(
        runtime: Rc<PiJsRuntime<C>>,
        tool_registry: Arc<ToolRegistry>,
        http_connector: Arc<HttpConnector>,
        session: Arc<dyn ExtensionSession + Send + Sync>,
        ui_handler: Arc<dyn ExtensionUiHandler + Send + Sync>,
        cwd: PathBuf,
        grant: CapabilityGrant,
        processes: ChildProcessTable,
    ) -> Self {
        let extension_id = runtime.extension_id().to_string();
        Self {
            runtime,
            tool_registry,
            http_connector,
            session,
            ui_handler,
            cwd,
            grant,
            extension_id,
            processes,
        }
    }

    /// Drain pending hostcall requests from the JS runtime.
    #[must_use]
    pub fn drain_hostcall_requests(&self) -> VecDeque<HostcallRequest> {
        self.runtime.drain_hostcall_requests()
    }

    /// Dispatch a hostcall and enqueue its completion into the JS scheduler.
    #[allow(clippy::future_not_send)]
    pub async fn dispatch_and_complete(&self, request: HostcallRequest) {
        let HostcallRequest {
            call_id,
            kind,
            payload,
            ..
        } = request;

        let outcome = match kind {
            HostcallKind::Tool { name } => self.dispatch_tool(&call_id, &name, payload).await,
            HostcallKind::Fetch => self.dispatch_fetch(payload).await,
            HostcallKind::Exec => self.dispatch_exec(payload).await,
            HostcallKind::SendMessage => self.dispatch_send_message(payload).await,
            HostcallKind::SendUserMessage => self.dispatch_send_user_message(payload).await,
            HostcallKind::AppendEntry { custom_type } => self.dispatch_append_entry(custom_type, payload).await,
            other => HostcallOutcome::Error {
                code: "invalid_request".to_string(),
                message: format!("Unsupported hostcall kind: {other:?}"),
            },
        };

        self.runtime.complete_hostcall(call_id, outcome);
    }

    #[allow(clippy::future_not_send)]
    async fn dispatch_tool(
        &self,
        call_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> HostcallOutcome {
        let Some(tool) = self.tool_registry.get(name) else {
            return HostcallOutcome::Error {
                code: "invalid_request".to_string(),
                message: format!("Unknown tool: {name}"),
            };
        };

        match tool.execute(call_id, payload, None).await {
            Ok(output) => match serde_json::to_value(output) {
                Ok(value) => HostcallOutcome::Success(value),
                Err(err) => HostcallOutcome::Error {
                    code: "internal".to_string(),
                    message: format!("Serialize tool output: {err}"),
                },
            },
            Err(err) => HostcallOutcome::Error {
                code: "tool_error".to_string(),
                message: err.to_string(),
            },
        }
    }

    #[allow(clippy::future_not_send)]
    async fn dispatch_fetch(&self, payload: serde_json::Value) -> HostcallOutcome {
        let url = match payload.get("url").and_then(serde_json::Value::as_str) {
            Some(url) => url.to_string(),
            None => {
                return HostcallOutcome::Error {
                    code: "invalid_request".to_string(),
                    message: "fetch requires a url".to_string(),
                };
            }
        };
        let method = payload
            .get("method")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let headers: Vec<(String, String)> = payload
            .get("headers")
            .and_then(|h| serde_json::from_value(h.clone()).ok())
            .unwrap_or_default();
        let body = payload
            .get("body")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        let params = FetchParamsIn {
            url: &url,
            method: method.as_deref(),
            headers: &headers,
            body: body.as_ref(),
        };

        match self.http_connector.fetch(&self.grant, &params).await {
            Ok(value) => HostcallOutcome::Success(value),
            Err(err @ crate::error::Error::CapabilityDenied { .. }) => HostcallOutcome::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
            Err(err) => HostcallOutcome::Error {
                code: "io".to_string(),
                message: err.to_string(),
            },
        }
    }

    /// Run `pi.exec`/`child_process.spawn` via a genuine `tokio::process`
    /// child rather than the blocking `std::process` call the `*Sync` shims
    /// use, tracking the child's pid so `unload` can terminate it later.
    #[allow(clippy::future_not_send)]
    async fn dispatch_exec(&self, payload: serde_json::Value) -> HostcallOutcome {
        let Some(cmd) = payload.get("cmd").and_then(serde_json::Value::as_str) else {
            return HostcallOutcome::Error {
                code: "invalid_request".to_string(),
                message: "exec requires a cmd".to_string(),
            };
        };
        if let Err(err) = self.grant.check_command(Capability::ProcessSpawn, cmd) {
            return HostcallOutcome::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            };
        }
        let argv: Vec<String> = payload
            .get("argv")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let cwd = payload
            .get("opts")
            .and_then(|o| o.get("cwd"))
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| self.cwd.clone(), |c| self.cwd.join(c));

        let mut command = tokio::process::Command::new(cmd);
        command
            .args(&argv)
            .current_dir(&cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return HostcallOutcome::Error {
                    code: "io".to_string(),
                    message: err.to_string(),
                };
            }
        };
        let pid = child.id();
        if let Some(pid) = pid {
            self.processes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .entry(self.extension_id.clone())
                .or_default()
                .push(pid);
        }

        let output = child.wait_with_output().await;

        if let Some(pid) = pid {
            if let Some(list) = self
                .processes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get_mut(&self.extension_id)
            {
                list.retain(|p| *p != pid);
            }
        }

        match output {
            Ok(output) => HostcallOutcome::Success(serde_json::json!({
                "status": output.status.code(),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            })),
            Err(err) => HostcallOutcome::Error {
                code: "io".to_string(),
                message: err.to_string(),
            },
        }
    }

    #[allow(clippy::future_not_send)]
    async fn dispatch_send_message(&self, payload: serde_json::Value) -> HostcallOutcome {
        let content = payload.get("msg").cloned().unwrap_or(serde_json::Value::Null);
        let message = SessionMessage::Extension {
            content,
            extension_id: self.extension_id.clone(),
            timestamp: None,
        };
        self.append_message_outcome(message).await
    }

    #[allow(clippy::future_not_send)]
    async fn dispatch_send_user_message(&self, payload: serde_json::Value) -> HostcallOutcome {
        let text = payload.get("text").and_then(serde_json::Value::as_str).unwrap_or_default();
        let message = SessionMessage::User {
            content: serde_json::json!({ "text": text }),
            timestamp: None,
        };
        self.append_message_outcome(message).await
    }

    async fn append_message_outcome(&self, message: SessionMessage) -> HostcallOutcome {
        match self.session.append_message(message).await {
            Ok(()) => HostcallOutcome::Success(serde_json::Value::Null),
            Err(err) => HostcallOutcome::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }

    #[allow(clippy::future_not_send)]
    async fn dispatch_append_entry(&self, custom_type: String, payload: serde_json::Value) -> HostcallOutcome {
        let data = if payload.is_null() { None } else { Some(payload) };
        match self.session.append_custom_entry(custom_type, data).await {
            Ok(()) => HostcallOutcome::Success(serde_json::Value::Null),
            Err(err) => HostcallOutcome::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Trait for handling individual hostcall types.
#[async_trait]
pub trait HostcallHandler: Send + Sync {
    /// Process a hostcall request and return the outcome.
    async fn handle(&self, params: serde_json::Value) -> HostcallOutcome;

    /// The capability name for policy checking (e.g., "read", "exec", "http").
    fn capability(&self) -> &'static str;
}

/// Trait for handling UI hostcalls (pi.ui()).
#[async_trait]
pub trait ExtensionUiHandler: Send + Sync {
    async fn request_ui(&self, request: ExtensionUiRequest) -> Result<Option<ExtensionUiResponse>>;
}
