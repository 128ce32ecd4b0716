//! Processing collaborator contract
//!
//! The feature algorithms run remotely. This module pins down the
//! request/response shapes the sessions depend on and the
//! [`ProcessingBackend`] trait a transport must implement. Calls are
//! synchronous from the engine's point of view; an async host drives them and
//! feeds results back through the session tickets.

use serde::{Deserialize, Serialize};

use crate::error::LabError;
use crate::params::{FeatureArgs, PreprocessArgs};
use crate::types::{
    AggregateResult, DataSource, DataUnit, FeatureResult, FileType, Gender, LocalFile,
    TimestampFormat, UploadResponse,
};

/// Metadata sent alongside an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadForm {
    /// `other`, `samsung_galaxy_binary` or `samsung_galaxy_csv`
    pub data_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimestampFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_columns: Option<Vec<String>>,
}

impl UploadForm {
    pub fn new(source: DataSource, file_type: FileType) -> Self {
        Self {
            data_source: source.upload_value(file_type).to_string(),
            data_type: None,
            time_format: None,
            time_column: None,
            data_columns: None,
        }
    }
}

/// Verdict of a cross-file column comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVerdict {
    pub valid: bool,
    #[serde(default)]
    pub message: String,
}

impl SchemaVerdict {
    pub fn valid(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Body of `update_columns/{file_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateColumnsRequest {
    pub time_format: TimestampFormat,
    pub time_column: String,
    pub data_columns: Vec<String>,
    pub data_type: String,
    #[serde(default)]
    pub data_unit: Option<DataUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Body of `process/{file_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub preprocess_args: PreprocessArgs,
    pub features_args: FeatureArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    /// Column mapping, present once the user committed one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimestampFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_unit: Option<DataUnit>,
}

/// Per-file entry of a bulk processing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkFileSpec {
    pub file_id: String,
    pub data_type: String,
    pub data_unit: Option<DataUnit>,
    pub timestamp_format: TimestampFormat,
    pub time_column: String,
    pub data_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosinorAgeInput {
    pub gender: Gender,
    pub age: f64,
}

/// Body of `bulk_process`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkProcessRequest {
    pub files: Vec<BulkFileSpec>,
    pub preprocess_args: PreprocessArgs,
    pub features_args: FeatureArgs,
    pub enable_cosinorage: bool,
    #[serde(default)]
    pub cosinor_age_inputs: Vec<CosinorAgeInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgePredictionRequest {
    pub chronological_age: f64,
    pub gender: Gender,
}

/// Request/response contract of the processing collaborator.
///
/// Upload progress is reported through `progress` as a percentage; transports
/// that cannot observe intermediate progress may report nothing and simply
/// return.
pub trait ProcessingBackend {
    fn upload(
        &mut self,
        file: &LocalFile,
        form: &UploadForm,
        progress: &mut dyn FnMut(f64),
    ) -> Result<UploadResponse, LabError>;

    fn bulk_upload(
        &mut self,
        files: &[LocalFile],
        form: &UploadForm,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Vec<UploadResponse>, LabError>;

    fn columns(&mut self, file_id: &str) -> Result<Vec<String>, LabError>;

    fn preview(
        &mut self,
        file_id: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, LabError>;

    fn validate_bulk_columns(&mut self, file_ids: &[String]) -> Result<SchemaVerdict, LabError>;

    fn update_columns(
        &mut self,
        file_id: &str,
        request: &UpdateColumnsRequest,
    ) -> Result<(), LabError>;

    /// Unpack a stored upload before processing
    fn extract(&mut self, file_id: &str) -> Result<(), LabError>;

    fn process(&mut self, file_id: &str, request: &ProcessRequest)
        -> Result<FeatureResult, LabError>;

    fn bulk_process(&mut self, request: &BulkProcessRequest) -> Result<AggregateResult, LabError>;

    fn predict_age(
        &mut self,
        file_id: &str,
        request: &AgePredictionRequest,
    ) -> Result<f64, LabError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ProcessingParameters;

    #[test]
    fn test_upload_form_source_values() {
        assert_eq!(
            UploadForm::new(DataSource::KnownDevice, FileType::Binary).data_source,
            "samsung_galaxy_binary"
        );
        assert_eq!(
            UploadForm::new(DataSource::Other, FileType::Csv).data_source,
            "other"
        );
    }

    #[test]
    fn test_process_request_omits_missing_mapping() {
        let (preprocess_args, features_args) = ProcessingParameters::default().to_args().unwrap();
        let request = ProcessRequest {
            preprocess_args,
            features_args,
            time_zone: None,
            time_column: None,
            data_columns: None,
            data_type: None,
            time_format: None,
            data_unit: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["preprocess_args", "features_args"]);
    }
}
