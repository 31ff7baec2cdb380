//! Role-based access gate.
//!
//! Maps a requester role to the set of document sources it may read. The
//! policy file is read on every request so edits take effect immediately.
//! An absent or malformed policy file resolves every role to the empty
//! set, which downstream is a hard deny.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Default)]
struct PolicyFile {
    #[serde(default)]
    roles: BTreeMap<String, RoleDef>,
}

#[derive(Debug, Deserialize)]
struct RoleDef {
    #[serde(default)]
    allowed_sources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AccessGate {
    path: PathBuf,
}

impl AccessGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve a role to its permitted sources. Unknown roles, roles with
    /// no declared sources, and unreadable policy files all yield an empty
    /// set.
    pub fn resolve(&self, role: &str) -> BTreeSet<String> {
        let policy = self.load_policy();
        policy
            .roles
            .get(role)
            .map(|def| def.allowed_sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn load_policy(&self) -> PolicyFile {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return PolicyFile::default(),
        };
        match toml::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "malformed role policy, denying all");
                PolicyFile::default()
            }
        }
    }
}
