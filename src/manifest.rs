//! Extension manifest parsing (spec §6 "Manifest").
//!
//! `plugin.json` or the `pi` key of `package.json`. JSON only — the manifest
//! arrives pre-resolved per spec §1 ("extensions arrive pre-resolved").

use crate::capability::{Capability, Scope};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

static NAME_RE_FIRST: fn(char) -> bool = |c| c.is_ascii_lowercase();
static NAME_RE_REST: fn(char) -> bool =
    |c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | ':' | '-');

/// Validate a slug against `[a-z][a-z0-9_:-]*`, the grammar spec §4.3 gives
/// `registerCommand` names (reused for manifest `name` and tool/shortcut
/// names, which share the grammar in practice).
#[must_use]
pub fn is_valid_slug(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if NAME_RE_FIRST(c) => {}
        _ => return false,
    }
    chars.all(NAME_RE_REST)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestCapabilityDecl {
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Single entry file, or (rare) multiple entries — normalized to a `Vec`.
    #[serde(default, alias = "entry")]
    pub extensions: ManifestEntries,
    #[serde(default)]
    pub capabilities: Vec<ManifestCapabilityDecl>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
    /// An extension that fails to load must be treated as fatal startup
    /// error (spec §4.6). Defaults to optional.
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntries {
    #[default]
    Missing,
    Single(String),
    Many(Vec<String>),
}

impl ManifestEntries {
    #[must_use]
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            Self::Missing => Vec::new(),
            Self::Single(s) => vec![s.as_str()],
            Self::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

impl Manifest {
    pub fn parse(raw: &str) -> Result<Self> {
        // `package.json` manifests nest the real payload under `pi`.
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let payload = value.get("pi").cloned().unwrap_or(value);
        let manifest: Self = serde_json::from_value(payload)
            .map_err(|e| Error::validation(format!("manifest parse failed: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_slug(&self.name) {
            return Err(Error::validation(format!(
                "manifest name `{}` is not a valid slug",
                self.name
            )));
        }
        if self.extensions.as_slice().is_empty() {
            return Err(Error::validation("manifest has no entry file"));
        }
        for decl in &self.capabilities {
            if Capability::from_token(&decl.capability).is_none() {
                return Err(Error::validation(format!(
                    "unknown capability token `{}`",
                    decl.capability
                )));
            }
        }
        Ok(())
    }

    /// Resolve the first declared entry file against the manifest's directory.
    pub fn entry_path(&self, manifest_dir: &Path) -> Result<PathBuf> {
        let first = self
            .extensions
            .as_slice()
            .first()
            .copied()
            .ok_or_else(|| Error::validation("manifest has no entry file"))?;
        let resolved = manifest_dir.join(first);
        if !resolved.exists() {
            return Err(Error::EntryNotFound(resolved));
        }
        Ok(resolved)
    }

    /// Build a `CapabilityGrant` from the manifest's declared capabilities,
    /// falling back to the minimum set per spec §3.
    #[must_use]
    pub fn capability_grant(&self) -> crate::capability::CapabilityGrant {
        if self.capabilities.is_empty() {
            return crate::capability::CapabilityGrant::minimum();
        }
        let mut scopes = BTreeMap::new();
        for decl in &self.capabilities {
            let Some(cap) = Capability::from_token(&decl.capability) else {
                continue;
            };
            let scope = match (cap, &decl.scope) {
                (Capability::FsRead | Capability::FsWrite, Some(list)) => {
                    Scope::PathPrefixes(list.clone())
                }
                (Capability::NetFetch, Some(list)) => Scope::Hosts(list.clone()),
                (Capability::ProcessSpawn, Some(list)) => Scope::Commands(list.clone()),
                (Capability::EnvRead, Some(list)) => Scope::EnvVars(list.clone()),
                _ => Scope::Unrestricted,
            };
            scopes.insert(cap, scope);
        }
        crate::capability::CapabilityGrant::new(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_slugs() {
        assert!(is_valid_slug("get_current_time"));
        assert!(is_valid_slug("read:file"));
        assert!(!is_valid_slug("Get_Time"));
        assert!(!is_valid_slug("1read"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn parse_plain_manifest() {
        let raw = r#"{"name":"demo","version":"1.0.0","entry":"index.js"}"#;
        let m = Manifest::parse(raw).expect("parse");
        assert_eq!(m.name, "demo");
        assert_eq!(m.extensions.as_slice(), vec!["index.js"]);
    }

    #[test]
    fn parse_package_json_nested_pi_key() {
        let raw = r#"{"name":"npm-pkg","pi":{"name":"demo","entry":"index.js"}}"#;
        let m = Manifest::parse(raw).expect("parse");
        assert_eq!(m.name, "demo");
    }

    #[test]
    fn rejects_invalid_name() {
        let raw = r#"{"name":"Bad Name","entry":"index.js"}"#;
        assert!(Manifest::parse(raw).is_err());
    }

    #[test]
    fn rejects_missing_entry() {
        let raw = r#"{"name":"demo"}"#;
        assert!(Manifest::parse(raw).is_err());
    }

    #[test]
    fn rejects_unknown_capability() {
        let raw = r#"{"name":"demo","entry":"index.js","capabilities":[{"capability":"nuke"}]}"#;
        assert!(Manifest::parse(raw).is_err());
    }

    #[test]
    fn capability_grant_builds_path_scope() {
        let raw = r#"{"name":"demo","entry":"index.js","capabilities":[{"capability":"fs.read","scope":["/proj/**"]}]}"#;
        let m = Manifest::parse(raw).expect("parse");
        let grant = m.capability_grant();
        assert!(grant.check_path(Capability::FsRead, "/proj/a.txt").is_ok());
        assert!(grant.check_path(Capability::FsRead, "/etc/passwd").is_err());
    }

    #[test]
    fn no_capabilities_yields_minimum_grant() {
        let raw = r#"{"name":"demo","entry":"index.js"}"#;
        let m = Manifest::parse(raw).expect("parse");
        let grant = m.capability_grant();
        assert!(grant.has(Capability::Time));
        assert!(!grant.has(Capability::FsRead));
    }
}
