//! Runtime Configuration
//!
//! The scheduler's bounds are read from the project settings of the graph
//! document (key `"runtime"`). Every field is optional; missing fields fall
//! back to the values below.

use serde::Deserialize;

/// Tunable limits for the scheduler and the cycle breakers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Evaluations a single node may run within one frame before it is
    /// flagged cyclic.
    pub max_node_iterations: u32,

    /// Values a single node may send within one frame before it is flagged
    /// cyclic.
    pub max_output_sends: u32,

    /// Worklist/after-update passes run by one call to
    /// `update_dirty_nodes`.
    pub max_scheduler_passes: u32,

    /// Upper bound on how many times one frame re-checks for new work.
    pub max_frame_waves: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_node_iterations: 100,
            max_output_sends: 500,
            max_scheduler_passes: 10,
            max_frame_waves: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Read the configuration from project settings.
    ///
    /// Malformed settings are reported and ignored.
    pub fn from_settings(settings: &serde_json::Map<String, serde_json::Value>) -> Self {
        match settings.get("runtime") {
            Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "invalid runtime settings, using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }
}
