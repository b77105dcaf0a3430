//! Registration registry (spec §4.5): one typed catalog per `RegistrationKind`.
//!
//! Registration order within a catalog is preserved — it drives command-palette
//! ordering, shortcut precedence, and `on()` handler dispatch order. Removal is
//! keyed by owning extension so a failed `Loading` extension can be rolled back
//! atomically, and so a later unload can't leave stray entries behind.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationKind {
    Command,
    Tool,
    Provider,
    MessageRenderer,
    Shortcut,
    Flag,
    EventHandler,
}

impl RegistrationKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Tool => "tool",
            Self::Provider => "provider",
            Self::MessageRenderer => "message_renderer",
            Self::Shortcut => "shortcut",
            Self::Flag => "flag",
            Self::EventHandler => "event_handler",
        }
    }
}

/// One entry in a catalog. `name` is the registration key within its kind
/// (for `EventHandler`, the event kind token the handler subscribed to, with
/// per-subscription uniqueness disabled — see `add_handler`).
#[derive(Debug, Clone)]
pub struct Registration {
    pub kind: RegistrationKind,
    pub name: String,
    pub extension_id: String,
    pub payload: serde_json::Value,
}

/// Typed catalogs keyed by `(kind, name)`, preserving insertion order.
#[derive(Debug, Default)]
pub struct RegistrationRegistry {
    catalogs: BTreeMap<RegistrationKind, Vec<Registration>>,
}

impl RegistrationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a uniquely-named registration (commands, tools, providers, message
    /// renderers, shortcuts, flags). Fails if `(kind, name)` already exists.
    pub fn add(&mut self, registration: Registration) -> Result<()> {
        let catalog = self.catalogs.entry(registration.kind).or_default();
        if catalog.iter().any(|r| r.name == registration.name) {
            return Err(Error::DuplicateRegistration {
                kind: registration.kind.label().to_string(),
                name: registration.name,
            });
        }
        catalog.push(registration);
        Ok(())
    }

    /// Add an event handler. Unlike other kinds, many handlers may share the
    /// same event-kind `name`; ordering among them is insertion order, which
    /// is what spec §4.4's "stable order" dispatch relies on.
    pub fn add_handler(&mut self, registration: Registration) {
        debug_assert_eq!(registration.kind, RegistrationKind::EventHandler);
        self.catalogs
            .entry(RegistrationKind::EventHandler)
            .or_default()
            .push(registration);
    }

    /// Remove a single event-handler subscription, identified by the extension,
    /// the event kind it subscribed to, and the JS-side order assigned at
    /// subscribe time (spec §4.3 `on()`'s returned unsubscribe function).
    pub fn remove_handler(&mut self, extension_id: &str, name: &str, order: u64) {
        if let Some(catalog) = self.catalogs.get_mut(&RegistrationKind::EventHandler) {
            catalog.retain(|r| {
                !(r.extension_id == extension_id
                    && r.name == name
                    && r.payload.get("order").and_then(serde_json::Value::as_u64) == Some(order))
            });
        }
    }

    /// Remove every registration owned by `extension_id` across all catalogs.
    /// Used both for normal unload and for rolling back a `Loading→Failed`
    /// extension's partial registrations.
    pub fn remove_owned_by(&mut self, extension_id: &str) {
        for catalog in self.catalogs.values_mut() {
            catalog.retain(|r| r.extension_id != extension_id);
        }
    }

    #[must_use]
    pub fn lookup(&self, kind: RegistrationKind, name: &str) -> Option<&Registration> {
        self.catalogs
            .get(&kind)
            .and_then(|catalog| catalog.iter().find(|r| r.name == name))
    }

    pub fn iter(&self, kind: RegistrationKind) -> impl Iterator<Item = &Registration> {
        self.catalogs.get(&kind).into_iter().flatten()
    }

    #[must_use]
    pub fn len(&self, kind: RegistrationKind) -> usize {
        self.catalogs.get(&kind).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self, kind: RegistrationKind) -> bool {
        self.len(kind) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(kind: RegistrationKind, name: &str, ext: &str) -> Registration {
        Registration {
            kind,
            name: name.to_string(),
            extension_id: ext.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn add_preserves_insertion_order() {
        let mut registry = RegistrationRegistry::new();
        registry
            .add(reg(RegistrationKind::Command, "zeta", "ext.a"))
            .expect("add");
        registry
            .add(reg(RegistrationKind::Command, "alpha", "ext.b"))
            .expect("add");
        let names: Vec<_> = registry
            .iter(RegistrationKind::Command)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn duplicate_name_within_kind_rejected() {
        let mut registry = RegistrationRegistry::new();
        registry
            .add(reg(RegistrationKind::Tool, "read", "ext.a"))
            .expect("add");
        let err = registry
            .add(reg(RegistrationKind::Tool, "read", "ext.b"))
            .unwrap_err();
        assert_eq!(err.code(), "duplicate_registration");
    }

    #[test]
    fn same_name_different_kind_is_allowed() {
        let mut registry = RegistrationRegistry::new();
        registry
            .add(reg(RegistrationKind::Command, "run", "ext.a"))
            .expect("add");
        registry
            .add(reg(RegistrationKind::Tool, "run", "ext.a"))
            .expect("add");
        assert_eq!(registry.len(RegistrationKind::Command), 1);
        assert_eq!(registry.len(RegistrationKind::Tool), 1);
    }

    #[test]
    fn remove_owned_by_clears_all_catalogs_for_extension() {
        let mut registry = RegistrationRegistry::new();
        registry
            .add(reg(RegistrationKind::Command, "run", "ext.a"))
            .expect("add");
        registry
            .add(reg(RegistrationKind::Tool, "read", "ext.a"))
            .expect("add");
        registry
            .add(reg(RegistrationKind::Tool, "write", "ext.b"))
            .expect("add");
        registry.remove_owned_by("ext.a");
        assert!(registry.is_empty(RegistrationKind::Command));
        assert_eq!(registry.len(RegistrationKind::Tool), 1);
        assert!(registry.lookup(RegistrationKind::Tool, "write").is_some());
    }

    #[test]
    fn event_handlers_allow_duplicate_names_in_order() {
        let mut registry = RegistrationRegistry::new();
        registry.add_handler(reg(RegistrationKind::EventHandler, "tool_call", "ext.a"));
        registry.add_handler(reg(RegistrationKind::EventHandler, "tool_call", "ext.b"));
        let owners: Vec<_> = registry
            .iter(RegistrationKind::EventHandler)
            .map(|r| r.extension_id.as_str())
            .collect();
        assert_eq!(owners, vec!["ext.a", "ext.b"]);
    }

    #[test]
    fn remove_handler_drops_only_the_matching_subscription() {
        let mut registry = RegistrationRegistry::new();
        let mut first = reg(RegistrationKind::EventHandler, "tool_call", "ext.a");
        first.payload = serde_json::json!({ "order": 0 });
        let mut second = reg(RegistrationKind::EventHandler, "tool_call", "ext.a");
        second.payload = serde_json::json!({ "order": 1 });
        registry.add_handler(first);
        registry.add_handler(second);
        registry.remove_handler("ext.a", "tool_call", 0);
        let orders: Vec<_> = registry
            .iter(RegistrationKind::EventHandler)
            .map(|r| r.payload.get("order").and_then(serde_json::Value::as_u64).unwrap())
            .collect();
        assert_eq!(orders, vec![1]);
    }
}
