//! Shared-dependency arbitration policy.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How to choose between a shared-store copy and a component-local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedLibLoadBehavior {
    #[default]
    PreferShared,
    PreferLocal,
    HighestVersion,
}

impl SharedLibLoadBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharedLibLoadBehavior::PreferShared => "prefer_shared",
            SharedLibLoadBehavior::PreferLocal => "prefer_local",
            SharedLibLoadBehavior::HighestVersion => "highest_version",
        }
    }

    /// Parse a configuration string; unknown values fall back to `PreferShared` with a warning.
    pub fn from_config_str(raw: &str) -> Self {
        match raw.parse() {
            Ok(b) => b,
            Err(()) => {
                tracing::warn!(
                    value = raw,
                    fallback = "prefer_shared",
                    "Unrecognized shared library load behavior"
                );
                SharedLibLoadBehavior::PreferShared
            }
        }
    }
}

impl FromStr for SharedLibLoadBehavior {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prefer_shared" => Ok(SharedLibLoadBehavior::PreferShared),
            "prefer_local" => Ok(SharedLibLoadBehavior::PreferLocal),
            "highest_version" => Ok(SharedLibLoadBehavior::HighestVersion),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SharedLibLoadBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default behavior plus per-dependency overrides.
///
/// Built once per host run and shared (behind `Arc`) by every isolation boundary,
/// so an override resolves identically for all components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPolicy {
    default: SharedLibLoadBehavior,
    overrides: HashMap<String, SharedLibLoadBehavior>,
}

impl ResolutionPolicy {
    pub fn new(
        default: SharedLibLoadBehavior,
        overrides: HashMap<String, SharedLibLoadBehavior>,
    ) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(name, b)| (name.to_ascii_lowercase(), b))
            .collect();
        Self { default, overrides }
    }

    /// Build from the raw strings of the `shared_libraries` config section.
    pub fn from_config(default: &str, overrides: &HashMap<String, String>) -> Self {
        let default = SharedLibLoadBehavior::from_config_str(default);
        let overrides = overrides
            .iter()
            .map(|(name, raw)| {
                (
                    name.to_ascii_lowercase(),
                    SharedLibLoadBehavior::from_config_str(raw),
                )
            })
            .collect();
        Self { default, overrides }
    }

    pub fn with_override(mut self, name: impl Into<String>, b: SharedLibLoadBehavior) -> Self {
        self.overrides.insert(name.into().to_ascii_lowercase(), b);
        self
    }

    pub fn default_behavior(&self) -> SharedLibLoadBehavior {
        self.default
    }

    /// Effective behavior for a dependency logical name (ASCII case-insensitive).
    pub fn behavior_for(&self, name: &str) -> SharedLibLoadBehavior {
        self.overrides
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default)
    }
}
