//! Core types for Wearlab
//!
//! This module defines the data that flows between the configuration state
//! machines, the processing collaborator and the analysis stages: the data
//! descriptor enums, uploaded file handles, the dynamically shaped feature tree
//! and the aggregate payload returned for a batch.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::LabError;

/// Where the uploaded recording comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// A supported smartwatch export with a fixed layout
    #[serde(rename = "samsung_galaxy", alias = "known_device")]
    KnownDevice,
    /// Any other time-series export; needs interactive column mapping
    Other,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::KnownDevice => "samsung_galaxy",
            DataSource::Other => "other",
        }
    }

    /// Value of the `data_source` form field sent with an upload
    pub fn upload_value(&self, file_type: FileType) -> &'static str {
        match (self, file_type) {
            (DataSource::Other, _) => "other",
            (DataSource::KnownDevice, FileType::Binary) => "samsung_galaxy_binary",
            (DataSource::KnownDevice, FileType::Csv) => "samsung_galaxy_csv",
        }
    }
}

/// Container format of the uploaded recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Binary,
    Csv,
}

/// Kind of signal stored in the data columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Accelerometer,
    Enmo,
    AlternativeCount,
    Raw,
}

/// Physical unit of the data columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataUnit {
    #[serde(rename = "g")]
    G,
    #[serde(rename = "mg")]
    Mg,
    #[serde(rename = "m/s^2")]
    MetersPerSecondSquared,
}

impl DataUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataUnit::G => "g",
            DataUnit::Mg => "mg",
            DataUnit::MetersPerSecondSquared => "m/s^2",
        }
    }
}

/// How many data columns a data type maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnArity {
    Exactly(usize),
    AtLeast(usize),
}

impl ColumnArity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            ColumnArity::Exactly(n) => count == n,
            ColumnArity::AtLeast(n) => count >= n,
        }
    }
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Accelerometer => "accelerometer",
            DataType::Enmo => "enmo",
            DataType::AlternativeCount => "alternative_count",
            DataType::Raw => "raw",
        }
    }

    /// Units a user may pick for this data type
    pub fn unit_options(&self) -> &'static [DataUnit] {
        match self {
            DataType::Accelerometer | DataType::Raw => &[
                DataUnit::G,
                DataUnit::Mg,
                DataUnit::MetersPerSecondSquared,
            ],
            DataType::Enmo => &[DataUnit::G, DataUnit::Mg],
            DataType::AlternativeCount => &[],
        }
    }

    /// Counts carry no physical unit
    pub fn requires_unit(&self) -> bool {
        !self.unit_options().is_empty()
    }

    pub fn column_arity(&self) -> ColumnArity {
        match self {
            DataType::Accelerometer => ColumnArity::Exactly(3),
            DataType::Enmo | DataType::AlternativeCount | DataType::Raw => ColumnArity::AtLeast(1),
        }
    }

    /// `data_type` value understood by the processing collaborator
    pub fn wire_value(&self, unit: Option<DataUnit>) -> String {
        match (self, unit) {
            (DataType::AlternativeCount, _) => "alternative_count".to_string(),
            (DataType::Accelerometer, Some(u)) | (DataType::Enmo, Some(u)) => {
                format!("{}-{}", self.as_str(), u.as_str())
            }
            (_, _) => self.as_str().to_string(),
        }
    }
}

/// Encoding of the timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    #[serde(rename = "datetime")]
    Datetime,
    #[serde(rename = "unix-s")]
    UnixSeconds,
    #[serde(rename = "unix-ms")]
    UnixMilliseconds,
}

impl TimestampFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampFormat::Datetime => "datetime",
            TimestampFormat::UnixSeconds => "unix-s",
            TimestampFormat::UnixMilliseconds => "unix-ms",
        }
    }

    /// Unix epochs carry no zone, so the user must name one
    pub fn needs_timezone(&self) -> bool {
        !matches!(self, TimestampFormat::Datetime)
    }
}

/// Self-reported gender used by age prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unknown,
}

/// A file on the user's machine, before upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub name: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            path: None,
        }
    }
}

/// Upload response entry returned by the processing collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub filename: String,
}

/// A file the collaborator has accepted and stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Client-side identifier
    pub id: Uuid,
    /// Original filename
    pub filename: String,
    /// Server-assigned storage handle
    pub file_id: String,
}

impl From<UploadResponse> for UploadedFile {
    fn from(response: UploadResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: response.filename,
            file_id: response.file_id,
        }
    }
}

/// One node of a per-file feature tree.
///
/// The collaborator mixes scalars, per-day arrays and nested objects under the
/// same schema; anything else (strings, booleans, nulls) is kept as `Opaque` so
/// consumers can report it without admitting it into statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum FeatureValue {
    Scalar(f64),
    Series(Vec<FeatureValue>),
    Nested(Vec<(String, FeatureValue)>),
    Opaque(serde_json::Value),
}

impl Default for FeatureValue {
    fn default() -> Self {
        FeatureValue::Nested(Vec::new())
    }
}

impl FeatureValue {
    /// Child of a nested node by key
    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        match self {
            FeatureValue::Nested(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::Opaque(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Element `index` of a series node
    pub fn at(&self, index: usize) -> Option<&FeatureValue> {
        match self {
            FeatureValue::Series(items) => items.get(index),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureValue::Series(items) => items.len(),
            FeatureValue::Nested(entries) => entries.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<serde_json::Value> for FeatureValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(v) => FeatureValue::Scalar(v),
                None => FeatureValue::Opaque(serde_json::Value::Number(n)),
            },
            serde_json::Value::Array(items) => {
                FeatureValue::Series(items.into_iter().map(FeatureValue::from).collect())
            }
            serde_json::Value::Object(map) => FeatureValue::Nested(
                map.into_iter()
                    .map(|(k, v)| (k, FeatureValue::from(v)))
                    .collect(),
            ),
            other => FeatureValue::Opaque(other),
        }
    }
}

impl From<FeatureValue> for serde_json::Value {
    fn from(value: FeatureValue) -> Self {
        match value {
            FeatureValue::Scalar(v) => serde_json::Number::from_f64(v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FeatureValue::Series(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            FeatureValue::Nested(entries) => serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
            FeatureValue::Opaque(v) => v,
        }
    }
}

/// One per-sample row of a processed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Device-local wall-clock time
    #[serde(
        rename = "TIMESTAMP",
        deserialize_with = "deserialize_local_timestamp",
        serialize_with = "serialize_local_timestamp"
    )]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "ENMO", default, skip_serializing_if = "Option::is_none")]
    pub enmo: Option<f64>,
    /// Wear state; -1 means unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wear: Option<f64>,
    /// 1 while asleep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosinor_fitted: Option<f64>,
}

const LOCAL_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a timestamp keeping its device-local wall-clock reading.
///
/// Offsets are honored only to pick the local reading, never converted to UTC.
pub fn parse_local_timestamp(raw: &str) -> Result<NaiveDateTime, LabError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_local());
    }
    LOCAL_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| LabError::ParseError(format!("Unrecognized timestamp: {}", raw)))
}

fn deserialize_local_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_local_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn serialize_local_timestamp<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

/// Features computed for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// category (cosinor, nonparam, physical_activity, sleep) -> feature -> value
    #[serde(default)]
    pub features: FeatureValue,
    /// Per-sample series, present for single-file processing
    #[serde(default)]
    pub data: Vec<Sample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl FeatureResult {
    pub fn feature(&self, category: &str, name: &str) -> Option<&FeatureValue> {
        self.features.get(category).and_then(|c| c.get(name))
    }
}

/// A file that failed before processing started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub filename: String,
    pub error: String,
}

/// A file that failed during feature extraction: `[index, cause]` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedHandler(pub usize, pub String);

/// Per-feature descriptive statistics computed server-side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub feature: String,
    #[serde(default)]
    pub count: Option<f64>,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub std: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub median: Option<f64>,
}

/// Named square matrix; `values[row][col]` holds the wire value `matrix[col][row]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub struct CorrelationMatrix {
    pub features: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get(row).and_then(|r| r.get(col)).copied().flatten()
    }
}

impl TryFrom<serde_json::Value> for CorrelationMatrix {
    type Error = LabError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let columns = match value {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => return Ok(CorrelationMatrix::default()),
            other => {
                return Err(LabError::ParseError(format!(
                    "correlation matrix must be an object, got {}",
                    other
                )))
            }
        };
        let features: Vec<String> = columns.keys().cloned().collect();
        let values = features
            .iter()
            .map(|row| {
                features
                    .iter()
                    .map(|col| {
                        columns
                            .get(col)
                            .and_then(|c| c.get(row))
                            .and_then(|v| v.as_f64())
                    })
                    .collect()
            })
            .collect();
        Ok(CorrelationMatrix { features, values })
    }
}

impl From<CorrelationMatrix> for serde_json::Value {
    fn from(matrix: CorrelationMatrix) -> Self {
        let mut columns = serde_json::Map::new();
        for (col_idx, col) in matrix.features.iter().enumerate() {
            let mut column = serde_json::Map::new();
            for (row_idx, row) in matrix.features.iter().enumerate() {
                let cell = matrix
                    .get(row_idx, col_idx)
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null);
                column.insert(row.clone(), cell);
            }
            columns.insert(col.clone(), serde_json::Value::Object(column));
        }
        serde_json::Value::Object(columns)
    }
}

/// Batch processing payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    #[serde(default)]
    pub individual_results: Vec<FeatureResult>,
    /// Upload-stage failures
    #[serde(default)]
    pub failed_files: Vec<FailedFile>,
    /// Processing-stage failures
    #[serde(default)]
    pub failed_handlers: Vec<FailedHandler>,
    #[serde(default)]
    pub summary_dataframe: Vec<SummaryRow>,
    #[serde(default)]
    pub correlation_matrix: CorrelationMatrix,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn test_unit_options_follow_data_type() {
        assert_eq!(DataType::Enmo.unit_options(), &[DataUnit::G, DataUnit::Mg]);
        assert_eq!(DataType::Accelerometer.unit_options().len(), 3);
        assert!(DataType::AlternativeCount.unit_options().is_empty());
        assert!(!DataType::AlternativeCount.requires_unit());
    }

    #[test]
    fn test_wire_data_type() {
        assert_eq!(
            DataType::Accelerometer.wire_value(Some(DataUnit::Mg)),
            "accelerometer-mg"
        );
        assert_eq!(DataType::Enmo.wire_value(None), "enmo");
        assert_eq!(
            DataType::AlternativeCount.wire_value(Some(DataUnit::G)),
            "alternative_count"
        );
    }

    #[test]
    fn test_feature_tree_deserializes_tagged() {
        let json = r#"{"sleep": {"TST": 420, "WASO": [30, 45], "label": "ok"}}"#;
        let tree: FeatureValue = serde_json::from_str(json).unwrap();

        let sleep = tree.get("sleep").unwrap();
        assert_eq!(sleep.get("TST").and_then(|v| v.as_f64()), Some(420.0));
        assert_eq!(sleep.get("WASO").unwrap().len(), 2);
        assert_eq!(sleep.get("label").and_then(|v| v.as_str()), Some("ok"));
    }

    #[test]
    fn test_correlation_matrix_keeps_key_order() {
        let json = r#"{"b": {"b": 1.0, "a": 0.5}, "a": {"b": 0.5, "a": 1.0}}"#;
        let matrix: CorrelationMatrix = serde_json::from_str(json).unwrap();
        assert_eq!(matrix.features, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(matrix.get(0, 1), Some(0.5));
        assert_eq!(matrix.get(1, 1), Some(1.0));
    }

    #[test]
    fn test_failed_handler_from_tuple() {
        let handler: FailedHandler = serde_json::from_str(r#"[2, "cosinor fit diverged"]"#).unwrap();
        assert_eq!(handler.0, 2);
        assert_eq!(handler.1, "cosinor fit diverged");
    }

    #[test]
    fn test_local_timestamp_keeps_wall_clock() {
        let ts = parse_local_timestamp("2024-01-15T23:30:00+09:00").unwrap();
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(ts.hour(), 23);

        let ts = parse_local_timestamp("2024-01-15 08:05:00").unwrap();
        assert_eq!(ts.minute(), 5);

        assert!(parse_local_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_sample_row_deserializes() {
        let json = r#"{"TIMESTAMP": "2024-01-15T08:00:00", "ENMO": 0.03, "wear": 1, "sleep": 0}"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.enmo, Some(0.03));
        assert_eq!(sample.wear, Some(1.0));
        assert_eq!(sample.cosinor_fitted, None);
    }

    #[test]
    fn test_sample_timestamp_keeps_fraction() {
        let json = r#"{"TIMESTAMP": "2024-01-15T08:00:00.250"}"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        let out = serde_json::to_value(&sample).unwrap();
        assert_eq!(out["TIMESTAMP"], "2024-01-15T08:00:00.250");
        let back: Sample = serde_json::from_value(out).unwrap();
        assert_eq!(back.timestamp, sample.timestamp);

        let whole: Sample = serde_json::from_str(r#"{"TIMESTAMP": "2024-01-15T08:00:00"}"#).unwrap();
        assert_eq!(
            serde_json::to_value(&whole).unwrap()["TIMESTAMP"],
            "2024-01-15T08:00:00"
        );
    }
}
