//! Command-line surface for `ext-hostd`, the embedder-stand-in binary (spec
//! §1: "not the product, a demonstration embedder"). Real products embed
//! `ext_host` as a library and drive it from their own agent loop; this
//! binary exists so the lifecycle manager, preflight analyzer, and event bus
//! can be exercised end to end without one.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ext-hostd", version, about = "Sandboxed extension host runtime", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a JSON5 host config file; defaults to the platform config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover and load every extension directory directly under `dir`,
    /// printing each extension's final lifecycle state.
    Load {
        /// Directory containing one subdirectory per extension.
        dir: PathBuf,
    },

    /// Load every extension under `dir`, then dispatch a single event to
    /// their subscribed handlers and print the dispatch outcome.
    ReplayEvent {
        dir: PathBuf,
        /// Event kind token, e.g. `tool_call`, `turn_end`.
        kind: String,
        /// JSON payload to dispatch; defaults to `null`.
        #[arg(long)]
        payload: Option<String>,
    },

    /// Run the conformance harness against a fixture directory, comparing
    /// preflight predictions to observed registrations.
    Conformance {
        /// Directory containing one subdirectory per fixture extension.
        dir: PathBuf,
    },

    /// Print each extension's declared capabilities and the registrations
    /// it produced, without dispatching any events.
    Report {
        dir: PathBuf,
    },

    /// Load every extension under `dir`, then invoke one registered tool by
    /// name directly (bypassing the hostcall queue) and print its result.
    InvokeTool {
        dir: PathBuf,
        name: String,
        /// JSON input to pass; defaults to `{}`.
        #[arg(long)]
        input: Option<String>,
    },
}
