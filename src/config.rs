//! Host configuration (ambient layer, grounded on `pi_agent_rust::config`
//! being loaded fail-open in `main` and cached paths under a platform config
//! dir).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_EVENT_DEADLINE_MS: u64 = 5_000;
const DEFAULT_REGISTRATION_TIMEOUT_MS: u64 = 200;
const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ISOLATE_HEAP_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_STRIKE_THRESHOLD: u32 = 3;
const DEFAULT_CANCEL_GRACE_MS: u64 = 250;
const DEFAULT_CHILD_KILL_GRACE_MS: u64 = 500;
const DEFAULT_MAX_REDIRECTS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    pub default_event_deadline_ms: u64,
    pub registration_timeout_ms: u64,
    pub handler_timeout_ms: u64,
    pub isolate_heap_ceiling_bytes: usize,
    pub worker_count: usize,
    pub strike_threshold: u32,
    pub handler_cancel_grace_ms: u64,
    pub child_kill_grace_ms: u64,
    pub max_http_redirects: usize,
    pub session_log_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default_event_deadline_ms: DEFAULT_EVENT_DEADLINE_MS,
            registration_timeout_ms: DEFAULT_REGISTRATION_TIMEOUT_MS,
            handler_timeout_ms: DEFAULT_HANDLER_TIMEOUT_MS,
            isolate_heap_ceiling_bytes: DEFAULT_ISOLATE_HEAP_BYTES,
            worker_count: DEFAULT_WORKER_COUNT,
            strike_threshold: DEFAULT_STRIKE_THRESHOLD,
            handler_cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            child_kill_grace_ms: DEFAULT_CHILD_KILL_GRACE_MS,
            max_http_redirects: DEFAULT_MAX_REDIRECTS,
            session_log_dir: None,
        }
    }
}

impl HostConfig {
    /// Fail-open load: a missing or malformed config file falls back to
    /// defaults with a warning, mirroring the teacher's extension-index
    /// cache posture (`ExtensionIndexStore::load_or_seed`).
    #[must_use]
    pub fn load(path: &std::path::Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("failed to load host config from {path:?}, using defaults: {err}");
                Self::default()
            }
        }
    }

    fn try_load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&raw)
            .map_err(|e| crate::error::Error::config(format!("config parse failed: {e}")))?;
        Ok(config)
    }

    #[must_use]
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ext-host")
    }

    #[must_use]
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.json5")
    }

    #[must_use]
    pub fn session_log_dir(&self) -> PathBuf {
        self.session_log_dir
            .clone()
            .unwrap_or_else(|| Self::default_config_dir().join("sessions"))
    }

    #[must_use]
    pub const fn default_event_deadline(&self) -> Duration {
        Duration::from_millis(self.default_event_deadline_ms)
    }

    #[must_use]
    pub const fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    #[must_use]
    pub const fn handler_cancel_grace(&self) -> Duration {
        Duration::from_millis(self.handler_cancel_grace_ms)
    }

    #[must_use]
    pub const fn child_kill_grace(&self) -> Duration {
        Duration::from_millis(self.child_kill_grace_ms)
    }
}
