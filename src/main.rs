//! `ext-hostd` — a demonstration embedder for the sandboxed extension host.
//!
//! Real embedders link `ext_host` as a library and drive its lifecycle
//! manager from their own agent loop; this binary exists to exercise
//! discovery, loading, event dispatch, and the conformance harness without
//! one, and to give the corpus a runnable shape to test against.

#![forbid(unsafe_code)]

use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ext_host::cli::{Cli, Command};
use ext_host::config::HostConfig;
use ext_host::event_bus::EventKind;
use ext_host::extensions::ExtensionManager;
use ext_host::scheduler::WallClock;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(HostConfig::default_config_path);
    let config = HostConfig::load(&config_path);

    match cli.command {
        Command::Load { dir } => load(&dir, &config).await,
        Command::ReplayEvent { dir, kind, payload } => replay_event(&dir, &kind, payload, &config).await,
        Command::Conformance { dir } => conformance(&dir).await,
        Command::Report { dir } => report(&dir, &config).await,
        Command::InvokeTool { dir, name, input } => invoke_tool(&dir, &name, input, &config).await,
    }
}

fn new_manager(config: &HostConfig) -> ExtensionManager<WallClock> {
    ExtensionManager::with_strike_threshold(
        WallClock,
        config.isolate_heap_ceiling_bytes,
        config.registration_timeout(),
        config.strike_threshold,
    )
}

/// Discover and load every direct subdirectory of `dir` as an extension.
async fn discover_and_load(dir: &Path, config: &HostConfig) -> Result<ExtensionManager<WallClock>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let mut manager = new_manager(config);
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading extensions directory {}", dir.display()))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    entries.sort();

    for extension_dir in &entries {
        let descriptor = manager.discover(extension_dir);
        manager.descriptors.push(descriptor);
    }
    for index in 0..manager.descriptors.len() {
        let id = manager.descriptors[index].id.clone();
        if let Err(err) = manager.load_one(index).await {
            tracing::warn!(extension = id.as_str(), error = %err, "extension failed to load");
        }
    }
    manager.drain_and_settle(config.handler_timeout()).await?;
    Ok(manager)
}

async fn load(dir: &Path, config: &HostConfig) -> Result<()> {
    let manager = discover_and_load(dir, config).await?;
    for descriptor in &manager.descriptors {
        println!(
            "{:<30} {:?}{}",
            descriptor.id,
            descriptor.state,
            descriptor
                .failure
                .as_ref()
                .map(|f| format!("  ({f})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn replay_event(dir: &Path, kind_token: &str, payload: Option<String>, config: &HostConfig) -> Result<()> {
    let kind = EventKind::from_token(kind_token)
        .with_context(|| format!("unknown event kind `{kind_token}`"))?;
    let manager = discover_and_load(dir, config).await?;
    let payload: serde_json::Value = match payload {
        Some(raw) => serde_json::from_str(&raw).context("payload is not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let outcome = manager
        .dispatch_event(kind, &payload, Some(config.default_event_deadline()), config.handler_timeout())
        .await?;
    manager.drain_and_settle(config.handler_timeout()).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn conformance(dir: &Path) -> Result<()> {
    let reports = ext_host::conformance::run(dir, WallClock).await?;
    println!("{}", serde_json::to_string_pretty(&reports)?);
    let drifted: Vec<_> = reports.iter().filter(|r| !r.drift.is_empty()).collect();
    if !drifted.is_empty() {
        eprintln!("{} extension(s) drifted from their preflight prediction", drifted.len());
    }
    Ok(())
}

async fn report(dir: &Path, config: &HostConfig) -> Result<()> {
    let manager = discover_and_load(dir, config).await?;
    for descriptor in &manager.descriptors {
        let grant = descriptor.manifest.capability_grant();
        println!("{} [{:?}]", descriptor.id, descriptor.state);
        println!("  capabilities: {grant:?}");
        for kind in [
            ext_host::registry::RegistrationKind::Command,
            ext_host::registry::RegistrationKind::Tool,
            ext_host::registry::RegistrationKind::Provider,
            ext_host::registry::RegistrationKind::MessageRenderer,
            ext_host::registry::RegistrationKind::Shortcut,
            ext_host::registry::RegistrationKind::Flag,
            ext_host::registry::RegistrationKind::EventHandler,
        ] {
            let registrations = manager.registrations.borrow();
            let names: Vec<_> = registrations
                .iter(kind)
                .filter(|r| r.extension_id == descriptor.id)
                .map(|r| r.name.as_str())
                .collect();
            drop(registrations);
            if !names.is_empty() {
                println!("  {}: {}", kind.label(), names.join(", "));
            }
        }
    }
    Ok(())
}

async fn invoke_tool(dir: &Path, name: &str, input: Option<String>, config: &HostConfig) -> Result<()> {
    let manager = discover_and_load(dir, config).await?;
    let input: serde_json::Value = match input {
        Some(raw) => serde_json::from_str(&raw).context("input is not valid JSON")?,
        None => serde_json::json!({}),
    };
    let result = manager.invoke_tool(name, &input, config.handler_timeout())?;
    manager.drain_and_settle(config.handler_timeout()).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
