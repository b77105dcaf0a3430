//! Sandboxed extension host runtime.
//!
//! Embeds extensions as capability-scoped JS isolates, brokers their calls
//! back into the host through a typed hostcall protocol, and drives them
//! through a discovery → preflight → load → validate → activate lifecycle.

pub mod capability;
pub mod cli;
pub mod config;
pub mod conformance;
pub mod connectors;
pub mod error;
pub mod event_bus;
pub mod extension_dispatcher;
pub mod extensions;
pub mod extensions_js;
pub mod hostcall_io_uring_lane;
pub mod manifest;
pub mod preflight;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod session_sqlite;
pub mod tools;

pub use error::{Error, Result};
