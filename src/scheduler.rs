//! Clocks and hostcall outcomes shared by the runtime adapter and dispatcher.
//!
//! A pluggable `Clock` lets the event bus and timer wheel be driven
//! deterministically in tests (`DeterministicClock`) while using real
//! wall-clock time (`WallClock`) in production — the same seam the teacher
//! uses in `extension_dispatcher.rs`'s `PiJsRuntime<C: SchedulerClock>`.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Abstraction over "now" and "advance time", so event-deadline and
/// handler-timeout logic can be tested without real sleeps.
pub trait Clock: Clone {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose `now()` only advances when explicitly told to, for
/// reproducible tests of deadline/cancellation behavior.
#[derive(Debug, Clone)]
pub struct DeterministicClock {
    base: Instant,
    offset_ms: std::rc::Rc<Cell<u64>>,
}

impl DeterministicClock {
    #[must_use]
    pub fn new(start_offset_ms: u64) -> Self {
        Self {
            base: Instant::now(),
            offset_ms: std::rc::Rc::new(Cell::new(start_offset_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .set(self.offset_ms.get() + u64::try_from(by.as_millis()).unwrap_or(u64::MAX));
    }
}

impl Clock for DeterministicClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.get())
    }
}

/// The result of dispatching a single hostcall back to the JS runtime: either
/// a value to resolve the extension-side promise with, or a structured error
/// to reject it with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostcallOutcome {
    Success(serde_json::Value),
    Error { code: String, message: String },
}

impl HostcallOutcome {
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn from_result(result: crate::error::Result<serde_json::Value>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }
}
