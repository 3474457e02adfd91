use serde::{Deserialize, Serialize};

/// Configuration for the heartbeat component (`component_config.heartbeat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Overrides the unit name, which otherwise is the component file stem.
    #[serde(default)]
    pub label: Option<String>,
    /// Native libraries that must resolve through the component's boundary
    /// before the unit is created.
    #[serde(default)]
    pub require_native: Vec<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            label: None,
            require_native: Vec::new(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}
