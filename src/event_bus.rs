//! Event bus (spec §4.4, §5): dispatches a fixed catalog of event kinds to
//! subscriber handlers in stable order, with per-kind deadlines, a blocking
//! short-circuit, and strike-based degradation.
//!
//! Grounded on the teacher's own cooperative-dispatch pattern in
//! `extension_dispatcher.rs` (drain → dispatch → complete); generalized here
//! from "one hostcall kind" to "one of 13 closed event kinds" with reducers.

use crate::error::Result;
use crate::scheduler::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Closed set of event kinds (spec §4.4). Adding a new kind requires a new
/// variant here, never overloading an existing payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionSwitch,
    SessionShutdown,
    BeforeAgentStart,
    AgentStart,
    AgentEnd,
    TurnStart,
    TurnEnd,
    ToolCall,
    ToolResult,
    Input,
    ModelSelect,
    ResourcesDiscover,
}

impl EventKind {
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionSwitch => "session_switch",
            Self::SessionShutdown => "session_shutdown",
            Self::BeforeAgentStart => "before_agent_start",
            Self::AgentStart => "agent_start",
            Self::AgentEnd => "agent_end",
            Self::TurnStart => "turn_start",
            Self::TurnEnd => "turn_end",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Input => "input",
            Self::ModelSelect => "model_select",
            Self::ResourcesDiscover => "resources_discover",
        }
    }

    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "session_start" => Self::SessionStart,
            "session_switch" => Self::SessionSwitch,
            "session_shutdown" => Self::SessionShutdown,
            "before_agent_start" => Self::BeforeAgentStart,
            "agent_start" => Self::AgentStart,
            "agent_end" => Self::AgentEnd,
            "turn_start" => Self::TurnStart,
            "turn_end" => Self::TurnEnd,
            "tool_call" => Self::ToolCall,
            "tool_result" => Self::ToolResult,
            "input" => Self::Input,
            "model_select" => Self::ModelSelect,
            "resources_discover" => Self::ResourcesDiscover,
            _ => return None,
        })
    }

    /// Kinds whose handlers may short-circuit the chain by returning
    /// `{block: true}` (spec §4.4 step 4).
    #[must_use]
    pub const fn is_blockable(self) -> bool {
        matches!(self, Self::ToolCall | Self::Input)
    }

    /// Default per-kind deadline (spec §4.4 step 1; spec §3 default 5s).
    #[must_use]
    pub const fn default_deadline(self) -> Duration {
        Duration::from_millis(5_000)
    }

    /// Observational kinds are dropped-with-notice on back-pressure overflow;
    /// contributing kinds block the embedder instead (spec §5 "Back-pressure").
    #[must_use]
    pub const fn is_contributing(self) -> bool {
        matches!(self, Self::BeforeAgentStart) || self.is_blockable()
    }
}

/// One subscriber's response to an emitted event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerResponse {
    #[serde(default)]
    pub block: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Free-form contribution merged by the kind-specific reducer (e.g.
    /// `{systemPrompt: "..."}` on `before_agent_start`).
    #[serde(default)]
    pub contribution: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    Completed,
    /// Handler was still running when its deadline's grace period elapsed.
    Slow,
    /// Handler observed the cancellation signal and unwound cleanly.
    Cancelled,
}

pub struct Subscription {
    pub extension_id: String,
    pub kind: EventKind,
    /// Dispatch order (ascending); ties broken by registration order.
    pub order: u64,
}

/// Per-extension reliability counter (spec §5: "After K strikes... moved to
/// `Degraded`").
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionHealth {
    pub strikes: u32,
    pub degraded: bool,
}

pub struct EventBus<C: Clock> {
    clock: C,
    subscriptions: Vec<Subscription>,
    next_order: u64,
    health: BTreeMap<String, ExtensionHealth>,
    strike_threshold: u32,
}

/// Outcome of dispatching one event to all its subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub merged_contribution: Value,
    pub slow_handlers: Vec<String>,
}

impl<C: Clock> EventBus<C> {
    #[must_use]
    pub fn new(clock: C, strike_threshold: u32) -> Self {
        Self {
            clock,
            subscriptions: Vec::new(),
            next_order: 0,
            health: BTreeMap::new(),
            strike_threshold,
        }
    }

    /// Register `extension_id` as a subscriber to `kind`, returning the
    /// assigned dispatch order. Ordering among subscriptions to the same
    /// kind is the registration order (spec §4.4: "stable order").
    pub fn subscribe(&mut self, extension_id: &str, kind: EventKind) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        self.subscriptions.push(Subscription {
            extension_id: extension_id.to_string(),
            kind,
            order,
        });
        order
    }

    pub fn unsubscribe_all(&mut self, extension_id: &str) {
        self.subscriptions.retain(|s| s.extension_id != extension_id);
    }

    /// Subscribers for `kind`, in stable dispatch order, excluding degraded
    /// extensions (spec §5: degraded extensions' subscriptions are disabled).
    fn ordered_subscribers(&self, kind: EventKind) -> Vec<&Subscription> {
        let mut subs: Vec<&Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| {
                s.kind == kind
                    && !self
                        .health
                        .get(&s.extension_id)
                        .is_some_and(|h| h.degraded)
            })
            .collect();
        subs.sort_by_key(|s| s.order);
        subs
    }

    fn record_slow(&mut self, extension_id: &str) {
        let health = self.health.entry(extension_id.to_string()).or_default();
        health.strikes += 1;
        if health.strikes >= self.strike_threshold {
            health.degraded = true;
            tracing::warn!(extension = extension_id, "extension moved to degraded state");
        }
    }

    #[must_use]
    pub fn health(&self, extension_id: &str) -> ExtensionHealth {
        self.health.get(extension_id).copied().unwrap_or_default()
    }

    /// Dispatch `payload` for `kind` to every subscriber in order, invoking
    /// `run_handler` for each. Each handler gets an independent shallow copy
    /// of the payload; a `HandlerOutcome::TimedOut` records a strike and
    /// continues the chain per spec §4.4 step 6 ("the bus proceeds").
    pub async fn dispatch<F, Fut>(
        &mut self,
        kind: EventKind,
        payload: &Value,
        deadline: Option<Duration>,
        mut run_handler: F,
    ) -> Result<DispatchOutcome>
    where
        F: FnMut(String, Value) -> Fut,
        Fut: std::future::Future<Output = HandlerOutcome>,
    {
        let deadline = deadline.unwrap_or_else(|| kind.default_deadline());
        let started_at = self.clock.now();
        let mut outcome = DispatchOutcome {
            blocked: false,
            block_reason: None,
            merged_contribution: Value::Object(serde_json::Map::new()),
            slow_handlers: Vec::new(),
        };

        let subscriber_ids: Vec<String> = self
            .ordered_subscribers(kind)
            .into_iter()
            .map(|s| s.extension_id.clone())
            .collect();

        for extension_id in subscriber_ids {
            if self.clock.now().duration_since(started_at) > deadline {
                tracing::warn!(kind = kind.token(), "event deadline exceeded, stopping dispatch");
                break;
            }
            let handler_payload = payload.clone();
            match run_handler(extension_id.clone(), handler_payload).await {
                HandlerOutcome::Response(response) => {
                    if kind.is_blockable() && response.block == Some(true) {
                        outcome.blocked = true;
                        outcome.block_reason = response.reason;
                        break;
                    }
                    if let Some(contribution) = response.contribution {
                        merge_contribution(kind, &mut outcome.merged_contribution, contribution);
                    }
                }
                HandlerOutcome::TimedOut => {
                    outcome.slow_handlers.push(extension_id.clone());
                    self.record_slow(&extension_id);
                }
                HandlerOutcome::Errored(message) => {
                    tracing::warn!(
                        extension = extension_id.as_str(),
                        kind = kind.token(),
                        error = message.as_str(),
                        "event handler errored"
                    );
                }
            }
        }

        Ok(outcome)
    }
}

/// What a single handler invocation produced, from the dispatcher's point of
/// view. `run_handler` closures translate the actual JS call (success,
/// cancellation-grace overrun, thrown exception) into this.
pub enum HandlerOutcome {
    Response(HandlerResponse),
    TimedOut,
    Errored(String),
}

/// Kind-specific merge of a handler's contribution into the running result
/// (spec §6: `before_agent_start` concatenates `systemPrompt` with newlines;
/// other kinds default to last-write-wins on object keys).
fn merge_contribution(kind: EventKind, acc: &mut Value, contribution: Value) {
    if kind == EventKind::BeforeAgentStart {
        if let Some(prompt) = contribution.get("systemPrompt").and_then(Value::as_str) {
            let existing = acc
                .get("systemPrompt")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let merged = if existing.is_empty() {
                prompt.to_string()
            } else {
                format!("{existing}\n{prompt}")
            };
            acc.as_object_mut()
                .expect("merged_contribution is always an object")
                .insert("systemPrompt".to_string(), Value::String(merged));
        }
        return;
    }
    if let (Value::Object(acc_map), Value::Object(contrib_map)) = (acc, contribution) {
        for (key, value) in contrib_map {
            acc_map.insert(key, value);
        }
    }
}
