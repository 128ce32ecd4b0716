//! Data descriptor reducer
//!
//! Every configuration field that decides how an upload is interpreted lives in
//! [`DataDescriptor`]. Mutations go through setters that clear dependent fields,
//! and completeness is a pure function of the struct, so single-file and bulk
//! sessions share one set of rules.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{UpdateColumnsRequest, UploadForm};
use crate::error::LabError;
use crate::schema::{suggest_columns, ColumnSuggestion};
use crate::types::{DataSource, DataType, DataUnit, FileType, TimestampFormat};

/// Default zone attached to unix timestamps
pub const DEFAULT_TIME_ZONE: &str = "UTC";

/// Accelerometer axis slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Column names available for selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "columns", rename_all = "snake_case")]
pub enum ColumnOptions {
    /// The column fetch has not resolved yet
    #[default]
    NotFetched,
    Loaded(Vec<String>),
    /// The file has no user-selectable columns
    Skipped,
}

impl ColumnOptions {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ColumnOptions::NotFetched)
    }

    pub fn columns(&self) -> &[String] {
        match self {
            ColumnOptions::Loaded(columns) => columns,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDescriptor {
    pub data_source: Option<DataSource>,
    pub file_type: Option<FileType>,
    pub data_type: Option<DataType>,
    pub data_unit: Option<DataUnit>,
    pub timestamp_format: Option<TimestampFormat>,
    /// IANA zone name, only sent for unix timestamp formats
    pub time_zone: String,
    pub time_column: Option<String>,
    /// Accelerometer selections occupy slots x, y, z; an empty string is an
    /// unset slot
    pub data_columns: Vec<String>,
    pub column_options: ColumnOptions,
}

impl Default for DataDescriptor {
    fn default() -> Self {
        Self {
            data_source: None,
            file_type: None,
            data_type: None,
            data_unit: None,
            timestamp_format: None,
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            time_column: None,
            data_columns: Vec::new(),
            column_options: ColumnOptions::NotFetched,
        }
    }
}

impl DataDescriptor {
    /// Changing the source invalidates everything that interprets the file
    pub fn set_data_source(&mut self, source: DataSource) {
        if self.data_source == Some(source) {
            return;
        }
        debug!(source = source.as_str(), "data source changed, clearing dependent fields");
        self.data_source = Some(source);
        self.file_type = None;
        self.data_type = None;
        self.data_unit = None;
        self.clear_selections();
        self.column_options = ColumnOptions::NotFetched;
    }

    pub fn set_file_type(&mut self, file_type: FileType) -> Result<(), LabError> {
        if self.data_source.is_none() {
            return Err(LabError::InputRejected(
                "Choose a data source before the file type".to_string(),
            ));
        }
        if self.file_type != Some(file_type) {
            self.file_type = Some(file_type);
            self.clear_unit_and_columns();
        }
        Ok(())
    }

    pub fn set_data_type(&mut self, data_type: DataType) -> Result<(), LabError> {
        let source = self.data_source.ok_or_else(|| {
            LabError::InputRejected("Choose a data source before the data type".to_string())
        })?;
        if data_type == DataType::Raw && source == DataSource::Other {
            return Err(LabError::InputRejected(
                "Raw data is only available for supported devices".to_string(),
            ));
        }
        if self.data_type != Some(data_type) {
            self.data_type = Some(data_type);
            self.clear_unit_and_columns();
        }
        Ok(())
    }

    pub fn set_data_unit(&mut self, unit: DataUnit) -> Result<(), LabError> {
        let allowed = self.unit_options();
        if !allowed.contains(&unit) {
            return Err(LabError::InputRejected(format!(
                "Unit {} is not available for {}",
                unit.as_str(),
                self.data_type.map(|t| t.as_str()).unwrap_or("an unset data type")
            )));
        }
        self.data_unit = Some(unit);
        Ok(())
    }

    pub fn set_timestamp_format(&mut self, format: TimestampFormat) {
        self.timestamp_format = Some(format);
    }

    pub fn set_time_zone(&mut self, zone: impl Into<String>) {
        self.time_zone = zone.into();
    }

    pub fn set_time_column(&mut self, column: impl Into<String>) -> Result<(), LabError> {
        let column = column.into();
        self.check_option(&column)?;
        self.time_column = Some(column);
        Ok(())
    }

    /// Replace the whole data-column selection
    pub fn set_data_columns(&mut self, columns: Vec<String>) -> Result<(), LabError> {
        for column in &columns {
            self.check_option(column)?;
        }
        self.data_columns = columns;
        Ok(())
    }

    /// Select one accelerometer axis
    pub fn set_axis(&mut self, axis: Axis, column: impl Into<String>) -> Result<(), LabError> {
        let column = column.into();
        self.check_option(&column)?;
        if self.data_columns.len() < 3 {
            self.data_columns.resize(3, String::new());
        }
        self.data_columns[axis.index()] = column;
        Ok(())
    }

    pub fn axis(&self, axis: Axis) -> Option<&str> {
        self.data_columns
            .get(axis.index())
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    /// Record the fetched column names and pre-select sensible defaults
    pub fn load_column_options(&mut self, columns: Vec<String>) {
        if let Some(data_type) = self.data_type {
            let ColumnSuggestion {
                time_column,
                data_columns,
            } = suggest_columns(&columns, data_type);
            self.time_column = time_column;
            self.data_columns = data_columns;
        }
        self.column_options = ColumnOptions::Loaded(columns);
    }

    pub fn skip_column_options(&mut self) {
        self.column_options = ColumnOptions::Skipped;
    }

    pub fn unit_options(&self) -> &'static [DataUnit] {
        self.data_type.map(|t| t.unit_options()).unwrap_or(&[])
    }

    /// Whether a dropped file has an interpretation rule yet
    pub fn accepts_drop(&self) -> bool {
        match (self.data_source, self.file_type) {
            (Some(DataSource::Other), Some(_)) => self.data_type.is_some(),
            (Some(DataSource::KnownDevice), Some(_)) => true,
            _ => false,
        }
    }

    /// Whether an uploaded file must go through column mapping
    pub fn needs_mapping(&self) -> bool {
        match self.data_source {
            Some(DataSource::Other) => true,
            Some(DataSource::KnownDevice) => {
                self.file_type == Some(FileType::Csv)
                    && self.data_type == Some(DataType::AlternativeCount)
            }
            None => false,
        }
    }

    /// Fields still missing before the descriptor is complete
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.timestamp_format.is_none() {
            missing.push("timestamp format");
        }
        match self.data_type {
            None => missing.push("data type"),
            Some(t) if t.requires_unit() && self.data_unit.is_none() => missing.push("data unit"),
            _ => {}
        }
        if self.file_type == Some(FileType::Csv) {
            if !self.column_options.is_resolved() {
                missing.push("column names");
            }
            if self.time_column.as_deref().map_or(true, str::is_empty) {
                missing.push("time column");
            }
            if !self.data_columns_valid() {
                missing.push("data columns");
            }
        }
        missing
    }

    /// Pure completeness derivation, rerun after every mutation
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    fn data_columns_valid(&self) -> bool {
        let Some(data_type) = self.data_type else {
            return false;
        };
        let selected: Vec<&str> = self.data_columns.iter().map(String::as_str).collect();
        if selected.iter().any(|c| c.is_empty()) {
            return false;
        }
        if !data_type.column_arity().accepts(selected.len()) {
            return false;
        }
        let time = self.time_column.as_deref().unwrap_or_default();
        let mut seen = std::collections::HashSet::new();
        selected.iter().all(|c| *c != time && seen.insert(*c))
    }

    fn check_option(&self, column: &str) -> Result<(), LabError> {
        match &self.column_options {
            ColumnOptions::Loaded(options) if !column.is_empty() && !options.iter().any(|o| o == column) => {
                Err(LabError::InputRejected(format!("Unknown column: {}", column)))
            }
            _ => Ok(()),
        }
    }

    fn clear_selections(&mut self) {
        self.time_column = None;
        self.data_columns.clear();
    }

    fn clear_unit_and_columns(&mut self) {
        debug!("clearing unit and column selections");
        self.data_unit = None;
        self.clear_selections();
    }

    /// Zone to send, if the timestamp format needs one
    pub fn wire_time_zone(&self) -> Option<String> {
        self.timestamp_format
            .filter(TimestampFormat::needs_timezone)
            .map(|_| self.time_zone.clone())
    }

    pub fn wire_data_type(&self) -> String {
        self.data_type
            .map(|t| t.wire_value(self.data_unit))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn upload_form(&self) -> Result<UploadForm, LabError> {
        let (Some(source), Some(file_type)) = (self.data_source, self.file_type) else {
            return Err(LabError::InputRejected(
                "Choose a data source and file type before uploading".to_string(),
            ));
        };
        let mut form = UploadForm::new(source, file_type);
        if source == DataSource::Other {
            form.data_type = Some(self.wire_data_type());
            form.time_format = Some(self.timestamp_format.unwrap_or(TimestampFormat::UnixMilliseconds));
            form.time_column = self.time_column.clone();
            if !self.data_columns.is_empty() {
                form.data_columns = Some(self.data_columns.clone());
            }
        }
        Ok(form)
    }

    pub fn update_columns_request(&self) -> Result<UpdateColumnsRequest, LabError> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(LabError::InputRejected(format!(
                "Column selection incomplete: missing {}",
                missing.join(", ")
            )));
        }
        let time_format = self.timestamp_format.ok_or_else(|| {
            LabError::InputRejected("Please select a timestamp format".to_string())
        })?;
        Ok(UpdateColumnsRequest {
            time_format,
            time_column: self.time_column.clone().unwrap_or_default(),
            data_columns: self.data_columns.clone(),
            data_type: self.wire_data_type(),
            data_unit: self.data_unit,
            time_zone: self.wire_time_zone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn make_test_csv_descriptor() -> DataDescriptor {
        let mut d = DataDescriptor::default();
        d.set_data_source(DataSource::Other);
        d.set_file_type(FileType::Csv).unwrap();
        d.set_data_type(DataType::Accelerometer).unwrap();
        d.set_data_unit(DataUnit::G).unwrap();
        d.set_timestamp_format(TimestampFormat::UnixMilliseconds);
        d.column_options = ColumnOptions::Loaded(cols(&["timestamp", "x", "y", "z"]));
        d
    }

    #[test]
    fn test_accelerometer_completeness_needs_distinct_axes() {
        let mut d = make_test_csv_descriptor();
        assert!(!d.is_complete());

        d.set_time_column("timestamp").unwrap();
        d.set_axis(Axis::X, "x").unwrap();
        d.set_axis(Axis::Y, "y").unwrap();
        assert!(!d.is_complete());

        d.set_axis(Axis::Z, "z").unwrap();
        assert!(d.is_complete());

        d.set_axis(Axis::X, "y").unwrap();
        assert!(!d.is_complete());
        assert_eq!(d.missing_fields(), vec!["data columns"]);

        d.set_axis(Axis::X, "x").unwrap();
        assert!(d.is_complete());
    }

    #[test]
    fn test_axis_cannot_reuse_time_column() {
        let mut d = make_test_csv_descriptor();
        d.set_time_column("timestamp").unwrap();
        d.set_data_columns(cols(&["timestamp", "y", "z"])).unwrap();
        assert!(!d.is_complete());
    }

    #[test]
    fn test_completeness_waits_for_column_fetch() {
        let mut d = make_test_csv_descriptor();
        d.column_options = ColumnOptions::NotFetched;
        d.set_time_column("timestamp").unwrap();
        d.set_data_columns(cols(&["x", "y", "z"])).unwrap();
        assert!(!d.is_complete());
        assert!(d.missing_fields().contains(&"column names"));
    }

    #[test]
    fn test_count_waives_unit() {
        let mut d = DataDescriptor::default();
        d.set_data_source(DataSource::Other);
        d.set_file_type(FileType::Csv).unwrap();
        d.set_data_type(DataType::AlternativeCount).unwrap();
        d.set_timestamp_format(TimestampFormat::Datetime);
        d.load_column_options(cols(&["time", "count"]));
        assert_eq!(d.time_column.as_deref(), Some("time"));
        assert_eq!(d.data_columns, cols(&["count"]));
        assert!(d.is_complete());
        assert!(d.set_data_unit(DataUnit::G).is_err());
    }

    #[test]
    fn test_binary_needs_no_columns() {
        let mut d = DataDescriptor::default();
        d.set_data_source(DataSource::KnownDevice);
        d.set_file_type(FileType::Binary).unwrap();
        d.set_data_type(DataType::Enmo).unwrap();
        d.set_data_unit(DataUnit::Mg).unwrap();
        d.set_timestamp_format(TimestampFormat::UnixSeconds);
        assert!(d.is_complete());
    }

    #[test]
    fn test_source_change_resets_dependents() {
        let mut d = make_test_csv_descriptor();
        d.set_time_column("timestamp").unwrap();
        d.set_data_source(DataSource::KnownDevice);
        assert_eq!(d.file_type, None);
        assert_eq!(d.data_type, None);
        assert_eq!(d.data_unit, None);
        assert_eq!(d.time_column, None);
        assert_eq!(d.column_options, ColumnOptions::NotFetched);
    }

    #[test]
    fn test_data_type_change_resets_unit_only() {
        let mut d = make_test_csv_descriptor();
        d.set_data_type(DataType::Enmo).unwrap();
        assert_eq!(d.data_unit, None);
        assert_eq!(d.timestamp_format, Some(TimestampFormat::UnixMilliseconds));
        assert_eq!(d.file_type, Some(FileType::Csv));
    }

    #[test]
    fn test_unit_options_are_pure_function_of_type() {
        let mut d = DataDescriptor::default();
        d.set_data_source(DataSource::Other);
        assert!(d.unit_options().is_empty());
        d.set_data_type(DataType::Enmo).unwrap();
        assert_eq!(d.unit_options(), &[DataUnit::G, DataUnit::Mg]);
        assert!(d.set_data_unit(DataUnit::MetersPerSecondSquared).is_err());
    }

    #[test]
    fn test_drop_guard() {
        let mut d = DataDescriptor::default();
        assert!(!d.accepts_drop());
        d.set_data_source(DataSource::Other);
        d.set_file_type(FileType::Csv).unwrap();
        assert!(!d.accepts_drop());
        d.set_data_type(DataType::Enmo).unwrap();
        assert!(d.accepts_drop());

        let mut known = DataDescriptor::default();
        known.set_data_source(DataSource::KnownDevice);
        known.set_file_type(FileType::Binary).unwrap();
        assert!(known.accepts_drop());
    }

    #[test]
    fn test_raw_only_for_known_device() {
        let mut d = DataDescriptor::default();
        d.set_data_source(DataSource::Other);
        assert!(d.set_data_type(DataType::Raw).is_err());
        d.set_data_source(DataSource::KnownDevice);
        assert!(d.set_data_type(DataType::Raw).is_ok());
    }

    #[test]
    fn test_mapping_requirement() {
        let mut d = DataDescriptor::default();
        d.set_data_source(DataSource::KnownDevice);
        d.set_file_type(FileType::Csv).unwrap();
        d.set_data_type(DataType::Accelerometer).unwrap();
        assert!(!d.needs_mapping());
        d.set_data_type(DataType::AlternativeCount).unwrap();
        assert!(d.needs_mapping());
    }

    #[test]
    fn test_selection_must_be_a_known_column() {
        let mut d = make_test_csv_descriptor();
        assert!(d.set_time_column("ts").is_err());
        assert_eq!(d.time_column, None);
    }

    #[test]
    fn test_update_request_carries_zone_for_unix() {
        let mut d = make_test_csv_descriptor();
        d.set_time_column("timestamp").unwrap();
        d.set_data_columns(cols(&["x", "y", "z"])).unwrap();
        d.set_time_zone("Europe/Zurich");
        let request = d.update_columns_request().unwrap();
        assert_eq!(request.data_type, "accelerometer-g");
        assert_eq!(request.time_zone.as_deref(), Some("Europe/Zurich"));

        d.set_timestamp_format(TimestampFormat::Datetime);
        assert_eq!(d.update_columns_request().unwrap().time_zone, None);
    }
}
