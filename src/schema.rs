//! Column schema validation
//!
//! Bulk processing pools statistics across files, so every file in a batch must
//! expose the same set of columns. Comparison is by set equality: order does
//! not matter, but subsets and supersets are mismatches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::backend::{ProcessingBackend, SchemaVerdict};
use crate::error::LabError;
use crate::types::DataType;

/// Message returned when a batch holds a single file
pub const SINGLE_FILE_MESSAGE: &str = "Only one file uploaded, no validation needed";

/// Column names of one file, in file order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// File the columns were read from
    pub source: String,
    pub columns: Vec<String>,
}

impl ColumnSchema {
    pub fn new(source: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            source: source.into(),
            columns,
        }
    }

    fn column_set(&self) -> BTreeSet<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    /// Set-equal column names
    pub fn is_compatible(&self, other: &ColumnSchema) -> bool {
        self.column_set() == other.column_set()
    }
}

/// Compare locally known schemas against the first one
pub fn compare_schemas(schemas: &[ColumnSchema]) -> SchemaVerdict {
    let Some((reference, rest)) = schemas.split_first() else {
        return SchemaVerdict::valid("No files to validate");
    };
    if rest.is_empty() {
        return SchemaVerdict::valid(SINGLE_FILE_MESSAGE);
    }

    let expected = reference.column_set();
    for schema in rest {
        let actual = schema.column_set();
        if actual == expected {
            continue;
        }
        let missing: Vec<&str> = expected.difference(&actual).copied().collect();
        let extra: Vec<&str> = actual.difference(&expected).copied().collect();
        let mut detail = format!(
            "{} does not match the columns of {}",
            schema.source, reference.source
        );
        if !missing.is_empty() {
            detail.push_str(&format!("; missing: {}", missing.join(", ")));
        }
        if !extra.is_empty() {
            detail.push_str(&format!("; unexpected: {}", extra.join(", ")));
        }
        return SchemaVerdict::invalid(detail);
    }

    SchemaVerdict::valid(format!("All {} files share the same columns", schemas.len()))
}

/// Ask the collaborator whether the uploaded files share one column structure.
///
/// A single file is trivially valid without a remote call. Failures of the call
/// itself become a `valid: false` verdict carrying the failure text.
pub fn validate_schemas(
    backend: &mut dyn ProcessingBackend,
    file_ids: &[String],
) -> SchemaVerdict {
    if file_ids.len() <= 1 {
        debug!(files = file_ids.len(), "skipping remote column validation");
        return SchemaVerdict::valid(SINGLE_FILE_MESSAGE);
    }

    match backend.validate_bulk_columns(file_ids) {
        Ok(verdict) => {
            info!(files = file_ids.len(), valid = verdict.valid, "column validation finished");
            verdict
        }
        Err(err) => SchemaVerdict::invalid(failure_text(&err)),
    }
}

fn failure_text(err: &LabError) -> String {
    match err {
        LabError::TransportFailure(message) | LabError::ServerRejected { message, .. } => {
            message.clone()
        }
        other => other.to_string(),
    }
}

/// Default column picks offered after the column fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSuggestion {
    pub time_column: Option<String>,
    pub data_columns: Vec<String>,
}

const PREFERRED_TIME_COLUMNS: &[&str] = &["timestamp", "time", "datetime", "date", "t"];
const AXES: [&str; 3] = ["x", "y", "z"];

fn looks_like_time(column: &str) -> bool {
    column.to_lowercase().contains("time")
}

fn suggest_time_column(columns: &[String]) -> Option<String> {
    columns
        .iter()
        .find(|c| looks_like_time(c))
        .or_else(|| {
            PREFERRED_TIME_COLUMNS
                .iter()
                .find_map(|p| columns.iter().find(|c| c.as_str() == *p))
        })
        .or_else(|| columns.first())
        .cloned()
}

fn suggest_axes(columns: &[String], time_column: Option<&str>) -> Vec<String> {
    let candidates: Vec<&String> = columns
        .iter()
        .filter(|c| Some(c.as_str()) != time_column)
        .collect();

    let mut picked: Vec<String> = Vec::with_capacity(3);
    for axis in AXES {
        if let Some(col) = candidates.iter().find(|c| c.to_lowercase() == axis) {
            picked.push((*col).clone());
        }
    }
    if picked.len() < 3 {
        for axis in AXES {
            if picked.iter().any(|c| c.to_lowercase() == axis) {
                continue;
            }
            if let Some(col) = candidates
                .iter()
                .find(|c| c.to_lowercase().contains(axis) && !picked.contains(**c))
            {
                picked.push((*col).clone());
            }
        }
    }
    if picked.len() < 3 {
        for col in candidates.iter().filter(|c| !looks_like_time(c)) {
            if picked.len() == 3 {
                break;
            }
            if !picked.contains(*col) {
                picked.push((*col).clone());
            }
        }
    }
    picked
}

fn first_containing_or_first_data(
    columns: &[String],
    time_column: Option<&str>,
    needle: &str,
) -> Vec<String> {
    let data_columns = columns.iter().filter(|c| Some(c.as_str()) != time_column);
    data_columns
        .clone()
        .find(|c| c.to_lowercase().contains(needle))
        .or_else(|| data_columns.clone().next())
        .cloned()
        .into_iter()
        .collect()
}

/// Suggest a time column and data columns for `data_type`
pub fn suggest_columns(columns: &[String], data_type: DataType) -> ColumnSuggestion {
    let time_column = suggest_time_column(columns);
    let time_ref = time_column.as_deref();
    let data_columns = match data_type {
        DataType::Accelerometer => suggest_axes(columns, time_ref),
        DataType::Enmo => first_containing_or_first_data(columns, time_ref, "enmo"),
        DataType::AlternativeCount => first_containing_or_first_data(columns, time_ref, "count"),
        DataType::Raw => columns
            .iter()
            .filter(|c| Some(c.as_str()) != time_ref)
            .cloned()
            .collect(),
    };
    ColumnSuggestion {
        time_column,
        data_columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_permutation_invariance() {
        let a = ColumnSchema::new("a.csv", cols(&["t", "x", "y", "z"]));
        let b = ColumnSchema::new("b.csv", cols(&["z", "t", "y", "x"]));
        assert!(a.is_compatible(&b));
        assert!(b.is_compatible(&a));
    }

    #[test]
    fn test_subset_is_incompatible() {
        let a = ColumnSchema::new("a.csv", cols(&["t", "x", "y", "z"]));
        let c = ColumnSchema::new("c.csv", cols(&["t", "x", "y"]));
        assert!(!a.is_compatible(&c));
        assert!(!c.is_compatible(&a));
    }

    #[test]
    fn test_compare_names_missing_columns() {
        let schemas = vec![
            ColumnSchema::new("a.csv", cols(&["t", "x", "y", "z"])),
            ColumnSchema::new("b.csv", cols(&["t", "x", "y", "z"])),
            ColumnSchema::new("c.csv", cols(&["t", "x", "y"])),
        ];
        let verdict = compare_schemas(&schemas);
        assert!(!verdict.valid);
        assert!(verdict.message.contains("c.csv"));
        assert!(verdict.message.contains("missing: z"));
    }

    #[test]
    fn test_single_schema_is_valid() {
        let verdict = compare_schemas(&[ColumnSchema::new("a.csv", cols(&["t"]))]);
        assert!(verdict.valid);
        assert_eq!(verdict.message, SINGLE_FILE_MESSAGE);
    }

    #[test]
    fn test_suggest_accelerometer_columns() {
        let suggestion = suggest_columns(&cols(&["timestamp", "x", "y", "z"]), DataType::Accelerometer);
        assert_eq!(suggestion.time_column.as_deref(), Some("timestamp"));
        assert_eq!(suggestion.data_columns, cols(&["x", "y", "z"]));
    }

    #[test]
    fn test_suggest_partial_axis_names() {
        let suggestion = suggest_columns(
            &cols(&["Time", "acc_x", "acc_y", "acc_z", "temp"]),
            DataType::Accelerometer,
        );
        assert_eq!(suggestion.data_columns, cols(&["acc_x", "acc_y", "acc_z"]));
    }

    #[test]
    fn test_suggest_falls_back_to_first_columns() {
        let suggestion = suggest_columns(&cols(&["t", "a", "b", "c"]), DataType::Accelerometer);
        assert_eq!(suggestion.time_column.as_deref(), Some("t"));
        assert_eq!(suggestion.data_columns, cols(&["a", "b", "c"]));
    }

    #[test]
    fn test_suggest_enmo_and_count() {
        let columns = cols(&["datetime", "steps", "ENMO_mg"]);
        assert_eq!(
            suggest_columns(&columns, DataType::Enmo).data_columns,
            cols(&["ENMO_mg"])
        );
        assert_eq!(
            suggest_columns(&columns, DataType::AlternativeCount).data_columns,
            cols(&["steps"])
        );
    }

    #[test]
    fn test_suggest_raw_takes_all_data_columns() {
        let suggestion = suggest_columns(&cols(&["timestamp", "a", "b"]), DataType::Raw);
        assert_eq!(suggestion.data_columns, cols(&["a", "b"]));
    }
}
