//! Conformance harness (spec §4.6 step 5, §8): drives fixture extensions
//! through discovery → preflight → load, then compares what the preflight
//! analyzer predicted against what was actually observed in the registry.
//!
//! A mismatch is advisory, never fatal to loading (spec §4.7: "advisory
//! only") — it surfaces here as a `PreflightDrift` entry in the report, the
//! same error code the taxonomy reserves for this class of divergence.

use crate::error::Result;
use crate::extensions::{ExtensionManager, ExtensionState};
use crate::registry::RegistrationKind;
use crate::scheduler::Clock;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// One extension's comparison between preflight prediction and reality.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub extension_id: String,
    pub state: String,
    pub predicted_registrations: Vec<String>,
    pub observed_registrations: Vec<String>,
    /// Predictions the extension never actually registered, or
    /// registrations observed that preflight never predicted.
    pub drift: Vec<String>,
    pub failure: Option<String>,
}

const OBSERVABLE_KINDS: &[RegistrationKind] = &[
    RegistrationKind::Command,
    RegistrationKind::Tool,
    RegistrationKind::Provider,
    RegistrationKind::MessageRenderer,
    RegistrationKind::Shortcut,
    RegistrationKind::Flag,
];

/// Discover and load every extension directly under `fixtures_dir`, then
/// build one `ConformanceReport` per discovered extension.
pub async fn run<C: Clock + 'static>(fixtures_dir: &Path, clock: C) -> Result<Vec<ConformanceReport>> {
    let mut manager = ExtensionManager::new(clock, 64 * 1024 * 1024, Duration::from_millis(200));

    let mut entries: Vec<_> = std::fs::read_dir(fixtures_dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    entries.sort();

    for dir in &entries {
        let descriptor = manager.discover(dir);
        manager.descriptors.push(descriptor);
    }

    let mut reports = Vec::with_capacity(manager.descriptors.len());
    for index in 0..manager.descriptors.len() {
        let extension_id = manager.descriptors[index].id.clone();
        // Required/optional propagation is the embedder's call; the harness
        // always tolerates a failure so one bad fixture doesn't stop the rest.
        let _ = manager.load_one(index).await;
        reports.push(build_report(&manager, index, &extension_id));
    }

    Ok(reports)
}

fn build_report<C: Clock>(manager: &ExtensionManager<C>, index: usize, extension_id: &str) -> ConformanceReport {
    let descriptor = &manager.descriptors[index];
    let state = match descriptor.state {
        ExtensionState::Active => "active",
        ExtensionState::Degraded => "degraded",
        ExtensionState::Failed => "failed",
        ExtensionState::Loading => "loading",
        ExtensionState::Unloaded => "unloaded",
    };

    let predicted: Vec<String> = descriptor
        .preflight
        .as_ref()
        .map(|report| {
            report
                .registrations
                .iter()
                .map(|r| format!("{}:{}", r.kind, r.name.as_deref().unwrap_or("?")))
                .collect()
        })
        .unwrap_or_default();

    let registrations = manager.registrations.borrow();
    let observed: Vec<String> = OBSERVABLE_KINDS
        .iter()
        .flat_map(|kind| {
            registrations
                .iter(*kind)
                .filter(|r| r.extension_id == extension_id)
                .map(|r| format!("{}:{}", kind.label(), r.name))
                .collect::<Vec<_>>()
        })
        .collect();
    drop(registrations);

    let drift: Vec<String> = predicted
        .iter()
        .filter(|p| !observed.contains(p))
        .map(|p| format!("predicted but not observed: {p}"))
        .chain(
            observed
                .iter()
                .filter(|o| !predicted.contains(o))
                .map(|o| format!("observed but not predicted: {o}")),
        )
        .collect();

    ConformanceReport {
        extension_id: extension_id.to_string(),
        state: state.to_string(),
        predicted_registrations: predicted,
        observed_registrations: observed,
        drift,
        failure: descriptor.failure.clone(),
    }
}
