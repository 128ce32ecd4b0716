//! Versioned session snapshots
//!
//! In-progress configuration is saved and loaded only through this type, at
//! session start and explicit reset boundaries. In-flight requests and results
//! are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bulk::CosinorAgeSettings;
use super::descriptor::DataDescriptor;
use crate::error::LabError;
use crate::params::ProcessingParameters;
use crate::types::UploadedFile;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub descriptor: DataDescriptor,
    pub params: ProcessingParameters,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFile>,
    #[serde(default)]
    pub mapping_committed: bool,
    /// Bulk sessions only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosinor_age: Option<CosinorAgeSettings>,
}

impl SessionSnapshot {
    pub fn new(
        session_id: Uuid,
        descriptor: DataDescriptor,
        params: ProcessingParameters,
        uploaded_files: Vec<UploadedFile>,
        mapping_committed: bool,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            session_id,
            saved_at: Utc::now(),
            descriptor,
            params,
            uploaded_files,
            mapping_committed,
            cosinor_age: None,
        }
    }

    pub fn with_cosinor_age(mut self, settings: CosinorAgeSettings) -> Self {
        self.cosinor_age = Some(settings);
        self
    }

    /// Load a snapshot, refusing versions this build does not understand
    pub fn from_json(json: &str) -> Result<Self, LabError> {
        let snapshot: SessionSnapshot = serde_json::from_str(json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LabError::ParseError(format!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String, LabError> {
        Ok(serde_json::to_string(self)?)
    }
}
