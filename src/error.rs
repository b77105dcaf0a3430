//! Library-wide error taxonomy.
//!
//! One variant per row of the error taxonomy table: each is a distinct,
//! machine-readable failure kind that per-extension code paths convert into
//! and that the lifecycle manager / event bus use to decide whether a
//! failure is fatal to one extension, to a handler invocation, or to the
//! whole host.

use serde::Serialize;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("entry file not found: {0}")]
    EntryNotFound(PathBuf),

    #[error("script error: {message}")]
    ScriptError { message: String, stack: Option<String> },

    #[error("duplicate registration: {kind} {name}")]
    DuplicateRegistration { kind: String, name: String },

    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("capability denied: {capability} ({scope}) for {attempted}")]
    CapabilityDenied {
        capability: String,
        scope: String,
        attempted: String,
    },

    #[error("unresolved module: {0}")]
    UnresolvedModule(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("isolate exceeded heap ceiling ({used_bytes} > {ceiling_bytes})")]
    OutOfMemory { used_bytes: usize, ceiling_bytes: usize },

    #[error("reentrant evaluation of module: {0}")]
    ReentrantEval(String),

    #[error("preflight prediction diverged from observed registrations: {0}")]
    PreflightDrift(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("extension called process.exit({0})")]
    ExtensionRequestedExit(i32),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ManifestInvalid(message.into())
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable machine-readable code used in conformance assertions and
    /// surfaced to JS as `err.code`.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ManifestInvalid(_) => "manifest_invalid",
            Self::EntryNotFound(_) => "entry_not_found",
            Self::ScriptError { .. } => "script_error",
            Self::DuplicateRegistration { .. } => "duplicate_registration",
            Self::SchemaInvalid(_) => "schema_invalid",
            Self::CapabilityDenied { .. } => "capability_denied",
            Self::UnresolvedModule(_) => "unresolved_module",
            Self::Cancelled(_) => "cancelled",
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::ReentrantEval(_) => "reentrant_eval",
            Self::PreflightDrift(_) => "preflight_drift",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ExtensionRequestedExit(_) => "extension_requested_exit",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Sqlite(_) => "sqlite",
        }
    }

    /// Structured form suitable for serializing into an event/assertion log.
    #[must_use]
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}
