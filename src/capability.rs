//! Capability model (spec §3 "Capability grant", §4.2).
//!
//! A closed enumeration of permissions plus per-capability scopes. Every
//! shim checks a grant synchronously before touching the OS; nothing in this
//! crate has ambient authority outside of a grant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of capability tokens a manifest may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FsRead,
    FsWrite,
    ProcessSpawn,
    NetFetch,
    EnvRead,
    Crypto,
    Time,
}

impl Capability {
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::FsRead => "fs.read",
            Self::FsWrite => "fs.write",
            Self::ProcessSpawn => "process.spawn",
            Self::NetFetch => "net.fetch",
            Self::EnvRead => "env.read",
            Self::Crypto => "crypto",
            Self::Time => "time",
        }
    }

    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "fs.read" => Some(Self::FsRead),
            "fs.write" => Some(Self::FsWrite),
            "process.spawn" => Some(Self::ProcessSpawn),
            "net.fetch" => Some(Self::NetFetch),
            "env.read" => Some(Self::EnvRead),
            "crypto" => Some(Self::Crypto),
            "time" => Some(Self::Time),
            _ => None,
        }
    }

    /// Capabilities granted to an extension that declares none at all
    /// (spec §3: "absent means minimum set").
    #[must_use]
    pub const fn minimum_set() -> &'static [Self] {
        &[Self::Time]
    }
}

/// Per-capability scope restriction. `Unrestricted` is only valid for
/// capabilities that carry no meaningful scope (`crypto`, `time`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    /// Glob-style path prefixes, e.g. `["/proj/**", "~/.pi/**"]`.
    PathPrefixes(Vec<String>),
    /// Allowed hostnames for `net.fetch`.
    Hosts(Vec<String>),
    /// Allowed `(command, argv-prefix)` pairs for `process.spawn`.
    Commands(Vec<String>),
    /// Allowed environment variable names for `env.read`.
    EnvVars(Vec<String>),
    Unrestricted,
}

impl Scope {
    #[must_use]
    pub fn allows_path(&self, candidate: &str) -> bool {
        match self {
            Self::PathPrefixes(prefixes) => prefixes.iter().any(|p| glob_prefix_match(p, candidate)),
            Self::Unrestricted => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn allows_host(&self, host: &str) -> bool {
        match self {
            Self::Hosts(hosts) => hosts.iter().any(|h| h.eq_ignore_ascii_case(host)),
            Self::Unrestricted => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn allows_command(&self, command: &str) -> bool {
        match self {
            Self::Commands(commands) => commands.iter().any(|c| c == command),
            Self::Unrestricted => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn allows_env_var(&self, name: &str) -> bool {
        match self {
            Self::EnvVars(vars) => vars.iter().any(|v| v == name),
            Self::Unrestricted => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::PathPrefixes(p) => p.join(","),
            Self::Hosts(h) => h.join(","),
            Self::Commands(c) => c.join(","),
            Self::EnvVars(e) => e.join(","),
            Self::Unrestricted => "*".to_string(),
        }
    }
}

/// A glob with a single trailing `**` meaning "this directory and below".
/// Anything more exotic than that is out of scope for the host; manifests
/// express their allow-lists with this restricted grammar deliberately.
fn glob_prefix_match(pattern: &str, candidate: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        candidate == prefix || candidate.starts_with(&format!("{prefix}/"))
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        candidate.starts_with(prefix)
    } else {
        candidate == pattern
    }
}

/// Immutable bit-set + scope map attached to an isolate at creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    scopes: BTreeMap<Capability, Scope>,
}

impl CapabilityGrant {
    #[must_use]
    pub fn new(scopes: BTreeMap<Capability, Scope>) -> Self {
        Self { scopes }
    }

    /// Grant for an extension that declared no `capabilities` in its manifest.
    #[must_use]
    pub fn minimum() -> Self {
        let mut scopes = BTreeMap::new();
        for cap in Capability::minimum_set() {
            scopes.insert(*cap, Scope::Unrestricted);
        }
        Self { scopes }
    }

    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.scopes.contains_key(&capability)
    }

    #[must_use]
    pub fn scope(&self, capability: Capability) -> Option<&Scope> {
        self.scopes.get(&capability)
    }

    /// Synchronous capability check used by every shim before performing I/O.
    ///
    /// `attempted` is a human-readable description of the argument being
    /// checked (a path, a host, a command), folded into the error.
    pub fn check_path(&self, capability: Capability, path: &str) -> crate::error::Result<()> {
        match self.scope(capability) {
            Some(scope) if scope.allows_path(path) => Ok(()),
            Some(scope) => Err(denied(capability, scope, path)),
            None => Err(denied(capability, &Scope::Unrestricted, path)),
        }
    }

    pub fn check_host(&self, capability: Capability, host: &str) -> crate::error::Result<()> {
        match self.scope(capability) {
            Some(scope) if scope.allows_host(host) => Ok(()),
            Some(scope) => Err(denied(capability, scope, host)),
            None => Err(denied(capability, &Scope::Unrestricted, host)),
        }
    }

    pub fn check_command(&self, capability: Capability, command: &str) -> crate::error::Result<()> {
        match self.scope(capability) {
            Some(scope) if scope.allows_command(command) => Ok(()),
            Some(scope) => Err(denied(capability, scope, command)),
            None => Err(denied(capability, &Scope::Unrestricted, command)),
        }
    }

    pub fn check_env_var(&self, capability: Capability, name: &str) -> crate::error::Result<()> {
        match self.scope(capability) {
            Some(scope) if scope.allows_env_var(name) => Ok(()),
            Some(scope) => Err(denied(capability, scope, name)),
            None => Err(denied(capability, &Scope::Unrestricted, name)),
        }
    }

    pub fn check_bare(&self, capability: Capability) -> crate::error::Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(denied(capability, &Scope::Unrestricted, capability.token()))
        }
    }
}

fn denied(capability: Capability, scope: &Scope, attempted: &str) -> crate::error::Error {
    crate::error::Error::CapabilityDenied {
        capability: capability.token().to_string(),
        scope: scope.describe(),
        attempted: attempted.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_grant_only_has_time() {
        let grant = CapabilityGrant::minimum();
        assert!(grant.has(Capability::Time));
        assert!(!grant.has(Capability::FsRead));
    }

    #[test]
    fn path_prefix_allows_descendants_and_exact_root() {
        let scope = Scope::PathPrefixes(vec!["/proj/**".to_string()]);
        assert!(scope.allows_path("/proj"));
        assert!(scope.allows_path("/proj/src/main.rs"));
        assert!(!scope.allows_path("/etc/passwd"));
    }

    #[test]
    fn check_path_denies_outside_scope() {
        let mut scopes = BTreeMap::new();
        scopes.insert(
            Capability::FsRead,
            Scope::PathPrefixes(vec!["/proj/**".to_string()]),
        );
        let grant = CapabilityGrant::new(scopes);
        assert!(grant.check_path(Capability::FsRead, "/proj/a.txt").is_ok());
        let err = grant.check_path(Capability::FsRead, "/etc/passwd").unwrap_err();
        assert_eq!(err.code(), "capability_denied");
    }

    #[test]
    fn missing_capability_is_denied() {
        let grant = CapabilityGrant::minimum();
        assert!(grant.check_path(Capability::FsWrite, "/proj/a.txt").is_err());
    }

    #[test]
    fn from_token_round_trips() {
        for cap in [
            Capability::FsRead,
            Capability::FsWrite,
            Capability::ProcessSpawn,
            Capability::NetFetch,
            Capability::EnvRead,
            Capability::Crypto,
            Capability::Time,
        ] {
            assert_eq!(Capability::from_token(cap.token()), Some(cap));
        }
        assert_eq!(Capability::from_token("bogus"), None);
    }
}
