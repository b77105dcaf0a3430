//! Tool registry and invocation (spec §4.3 `registerTool`, §3 `AgentToolResult`).
//!
//! Extension-registered tools live in the `RegistrationRegistry` under
//! `RegistrationKind::Tool`; this module is the thin executable layer the
//! dispatcher calls into once a hostcall names a tool. A handful of built-in
//! tools (grounded on the corpus's universally-present `read` tool) exist so
//! the conformance harness and tests have something to call without loading
//! a real extension.

use crate::capability::{Capability, CapabilityGrant};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentToolResult {
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl AgentToolResult {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
            details: Value::Null,
            is_error: false,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// `signal` is a cooperative cancellation check; built-in tools are
    /// short-lived enough that most ignore it.
    async fn execute(
        &self,
        call_id: &str,
        input: Value,
        signal: Option<Arc<std::sync::atomic::AtomicBool>>,
    ) -> Result<AgentToolResult>;
}

/// Reads a UTF-8 file relative to the tool registry's root, gated by
/// `fs.read` the same way the `fs` shim is (spec §4.2/§4.3: "Convenience
/// over `child_process.spawn`, gated identically" — the same posture
/// applies to built-in tools that touch the filesystem).
struct ReadFileTool {
    root: PathBuf,
    grant: CapabilityGrant,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read"
    }

    async fn execute(
        &self,
        _call_id: &str,
        input: Value,
        _signal: Option<Arc<std::sync::atomic::AtomicBool>>,
    ) -> Result<AgentToolResult> {
        let path = input
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidRequest("missing `path`".to_string()))?;
        let resolved = self.root.join(path);
        let resolved_str = resolved.to_string_lossy().to_string();
        self.grant.check_path(Capability::FsRead, &resolved_str)?;
        let contents = tokio::fs::read_to_string(&resolved).await?;
        Ok(AgentToolResult::text(contents))
    }
}

pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// `builtin_names` selects which built-in tools to register (by name);
    /// `root` scopes their filesystem access; `grant` overrides the default
    /// unrestricted-within-root grant used in tests and the conformance
    /// harness.
    #[must_use]
    pub fn new(builtin_names: &[&str], root: &Path, grant: Option<CapabilityGrant>) -> Self {
        let grant = grant.unwrap_or_else(|| {
            let mut scopes = BTreeMap::new();
            scopes.insert(
                Capability::FsRead,
                crate::capability::Scope::PathPrefixes(vec![format!(
                    "{}/**",
                    root.to_string_lossy()
                )]),
            );
            CapabilityGrant::new(scopes)
        });

        let mut tools: BTreeMap<String, Arc<dyn Tool>> = BTreeMap::new();
        for name in builtin_names {
            if *name == "read" {
                tools.insert(
                    "read".to_string(),
                    Arc::new(ReadFileTool {
                        root: root.to_path_buf(),
                        grant: grant.clone(),
                    }),
                );
            }
        }
        Self { tools }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Register an extension-provided tool (bridged in by the dispatcher once
    /// `pi.registerTool` calls reach the registration registry).
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }
}
