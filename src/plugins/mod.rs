//! Jenkins plugin requirements and version-conflict detection
//!
//! Plugins are declared as `name:version` identifiers grouped into requirement
//! sets: a root plugin mapped to the dependencies it pulls in. [`verify`] is a
//! pure validation gate run before anything is submitted to Jenkins, and
//! [`verify_installed`] checks what a running master actually loaded.

mod base;

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::Error;

pub use base::{base_plugins, APACHE_HTTPCOMPONENTS_CLIENT_PLUGIN, JACKSON2_API_PLUGIN};

/// A plugin pinned to a version
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Plugin {
    /// Short name as known to the Jenkins update center
    pub name: String,
    /// Exact version
    pub version: String,
}

impl Plugin {
    /// Parse a `name:version` identifier.
    ///
    /// Only the first `:` separates name and version; both parts must be
    /// non-empty.
    pub fn parse(identifier: &str) -> Result<Self, Error> {
        match identifier.split_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => Ok(Self {
                name: name.to_string(),
                version: version.to_string(),
            }),
            _ => Err(Error::InvalidPlugin(identifier.to_string())),
        }
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Root plugin identifiers mapped to the dependency identifiers they require.
///
/// Identifiers are kept as declared and parsed during verification, so a
/// malformed entry in user input is reported instead of dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginRequirementSet(BTreeMap<String, Vec<String>>);

impl PluginRequirementSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root plugin with its dependencies, replacing any previous entry
    pub fn insert(&mut self, root: impl Into<String>, dependencies: Vec<String>) {
        self.0.insert(root.into(), dependencies);
    }

    /// Builder-style variant of [`PluginRequirementSet::insert`]
    pub fn with(mut self, root: impl Into<String>, dependencies: &[&str]) -> Self {
        self.insert(root, dependencies.iter().map(|d| d.to_string()).collect());
        self
    }

    /// Iterate over `(root, dependencies)` pairs in root order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Number of root plugins
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the set declares no plugins
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every entry of `other` overrides the entry with the same root here
    pub fn merge(&mut self, other: &PluginRequirementSet) {
        for (root, deps) in other.iter() {
            self.0.insert(root.clone(), deps.clone());
        }
    }

    /// Every identifier in the set: each root followed by its dependencies
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .flat_map(|(root, deps)| std::iter::once(root.as_str()).chain(deps.iter().map(String::as_str)))
    }

    /// The raw map, in the shape stored on the custom resource
    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }

    /// Consume the set into the raw map
    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

impl From<BTreeMap<String, Vec<String>>> for PluginRequirementSet {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

/// One sighting of a plugin version, and the root that asked for it
struct Observation<'a> {
    version: String,
    origin: &'a str,
}

/// Check that no plugin is required at two different versions across all sets.
///
/// Every root counts as an observation of itself, and every dependency as an
/// observation attributed to its root. Each conflicting pair is logged. A
/// malformed identifier fails verification. Returns true only when every
/// plugin name resolves to exactly one version.
pub fn verify(sets: &[&PluginRequirementSet]) -> bool {
    let mut valid = true;
    let mut observations: BTreeMap<String, Vec<Observation<'_>>> = BTreeMap::new();

    for set in sets {
        for (root, dependencies) in set.iter() {
            match Plugin::parse(root) {
                Ok(plugin) => observations.entry(plugin.name).or_default().push(Observation {
                    version: plugin.version,
                    origin: root,
                }),
                Err(err) => {
                    warn!(error = %err, "Invalid root plugin");
                    valid = false;
                }
            }

            for dependency in dependencies {
                match Plugin::parse(dependency) {
                    Ok(plugin) => observations.entry(plugin.name).or_default().push(Observation {
                        version: plugin.version,
                        origin: root,
                    }),
                    Err(err) => {
                        warn!(root = %root, error = %err, "Invalid plugin dependency");
                        valid = false;
                    }
                }
            }
        }
    }

    for (name, seen) in &observations {
        for (i, first) in seen.iter().enumerate() {
            for second in &seen[i + 1..] {
                if first.version != second.version {
                    warn!(
                        plugin = %name,
                        "Plugin '{}' requires version '{}' but plugin '{}' requires '{}' for plugin '{}'",
                        first.origin,
                        first.version,
                        second.origin,
                        second.version,
                        name
                    );
                    valid = false;
                }
            }
        }
    }

    valid
}

/// A plugin as reported by a running Jenkins master
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    /// Plugin short name
    pub short_name: String,
    /// Installed version
    #[serde(default)]
    pub version: String,
    /// Loaded and running
    #[serde(default)]
    pub active: bool,
    /// Not disabled by an administrator
    #[serde(default)]
    pub enabled: bool,
    /// Scheduled for removal
    #[serde(default)]
    pub deleted: bool,
}

impl InstalledPlugin {
    fn is_usable(&self) -> bool {
        self.active && self.enabled && !self.deleted
    }
}

/// Check that every plugin named by `required` (roots and dependencies) is
/// installed, active, enabled and not deleted on the master.
///
/// Presence is checked by name only. Versions are pinned at install time, so
/// a master that loaded a different version is still usable.
pub fn verify_installed(installed: &[InstalledPlugin], required: &[&PluginRequirementSet]) -> bool {
    let by_name: BTreeMap<&str, &InstalledPlugin> = installed
        .iter()
        .map(|p| (p.short_name.as_str(), p))
        .collect();

    debug!(
        installed = ?installed
            .iter()
            .filter(|p| !p.deleted)
            .map(|p| format!("{}:{}", p.short_name, p.version))
            .collect::<Vec<_>>(),
        "Installed plugins"
    );

    let mut all_present = true;
    for set in required {
        for identifier in set.identifiers() {
            let name = identifier.split_once(':').map_or(identifier, |(name, _)| name);
            match by_name.get(name) {
                Some(found) if found.is_usable() => {}
                Some(found) => {
                    warn!(
                        plugin = %identifier,
                        active = found.active,
                        enabled = found.enabled,
                        deleted = found.deleted,
                        "Plugin installed but not usable"
                    );
                    all_present = false;
                }
                None => {
                    warn!(plugin = %identifier, "Missing plugin");
                    all_present = false;
                }
            }
        }
    }
    all_present
}
