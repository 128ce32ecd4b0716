//! Runtime configuration
//!
//! `LabConfig` collects the handful of knobs the engine needs from its host:
//! where the processing collaborator lives, the upload size ceiling, and the
//! defaults used by the analysis stages.

use serde::{Deserialize, Serialize};

use crate::error::LabError;

/// Default base path of the processing collaborator
pub const DEFAULT_API_BASE_URL: &str = "/api";

/// 2 GiB upload ceiling
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default sampling epoch of processed per-sample series, in seconds
pub const DEFAULT_SAMPLE_UNIT_SECS: i64 = 60;

/// Wear value meaning "state unknown"
pub const DEFAULT_WEAR_SENTINEL: f64 = -1.0;

/// How the flattener names leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenMode {
    /// Key by immediate parent name; same-named features in different
    /// categories share one series
    #[default]
    Pooled,
    /// Key by `category.feature`
    Namespaced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub api_base_url: String,
    pub max_upload_bytes: u64,
    pub sample_unit_secs: i64,
    pub wear_sentinel: f64,
    pub flatten_mode: FlattenMode,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            sample_unit_secs: DEFAULT_SAMPLE_UNIT_SECS,
            wear_sentinel: DEFAULT_WEAR_SENTINEL,
            flatten_mode: FlattenMode::Pooled,
        }
    }
}

impl LabConfig {
    /// Load from JSON; missing keys fall back to defaults
    pub fn from_json(json: &str) -> Result<Self, LabError> {
        let config: LabConfig = serde_json::from_str(json)?;
        if config.sample_unit_secs <= 0 {
            return Err(LabError::InputRejected(format!(
                "sample_unit_secs must be positive, got {}",
                config.sample_unit_secs
            )));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, LabError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Full URL of an endpoint relative to the API base
    pub fn api_url(&self, endpoint: &str) -> String {
        let endpoint = endpoint.strip_prefix('/').unwrap_or(endpoint);
        format!("{}/{}", self.api_base_url.trim_end_matches('/'), endpoint)
    }

    pub fn sample_unit(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sample_unit_secs)
    }
}
