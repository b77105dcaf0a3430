//! Stable façade over the embeddable JS engine (spec §4.1).
//!
//! `ScriptRuntimeAdapter` is the seam the rest of the host programs against;
//! `QuickJsAdapter` is the only implementation today, but nothing above this
//! module touches `rquickjs` directly, matching the spec's "irrespective of
//! the concrete engine" framing.

use crate::error::Result;
use crate::runtime::isolate::{IsolateHandle, IsolateOpts};
use serde_json::Value;
use std::time::Duration;

pub trait ScriptRuntimeAdapter {
    fn create_isolate(&self, opts: &IsolateOpts) -> Result<IsolateHandle>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsAdapter;

impl ScriptRuntimeAdapter for QuickJsAdapter {
    fn create_isolate(&self, opts: &IsolateOpts) -> Result<IsolateHandle> {
        IsolateHandle::new(opts)
    }
}

/// Evaluate `source` under a registration-phase watchdog (spec §4.1: 200ms
/// default ceiling for registrations).
pub fn eval_with_watchdog(
    isolate: &IsolateHandle,
    source: &str,
    origin: &str,
    budget: Duration,
) -> Result<()> {
    isolate.arm_watchdog(budget);
    let result = isolate.eval_module(source, origin);
    isolate.disarm_watchdog();
    result
}

/// Call a registered handler under a handler-phase watchdog (spec §4.1: 30s
/// default ceiling for handler bodies).
pub fn call_with_watchdog(
    isolate: &IsolateHandle,
    name: &str,
    args: &Value,
    budget: Duration,
) -> Result<Value> {
    isolate.arm_watchdog(budget);
    let result = isolate.call_global(name, args);
    isolate.disarm_watchdog();
    result
}
