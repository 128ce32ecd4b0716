//! Bulk session
//!
//! Same descriptor rules as the single-file flow, applied to a batch of files
//! that must share one column structure. A batch that fails the structure
//! check is discarded as a whole.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::descriptor::{Axis, ColumnOptions, DataDescriptor};
use super::snapshot::SessionSnapshot;
use super::timer::ProcessingTimer;
use super::{format_size_limit, Failure, RequestKind, RequestLedger, RequestTicket, SessionStatus};
use crate::backend::{BulkFileSpec, BulkProcessRequest, CosinorAgeInput, SchemaVerdict, UploadForm};
use crate::config::LabConfig;
use crate::error::LabError;
use crate::params::ProcessingParameters;
use crate::schema::SINGLE_FILE_MESSAGE;
use crate::types::{
    AggregateResult, DataSource, DataType, DataUnit, FileType, Gender, LocalFile, TimestampFormat,
    UploadResponse, UploadedFile,
};

/// Default chronological age offered per file
pub const DEFAULT_COSINOR_AGE: &str = "50";

pub type PreviewRows = Vec<serde_json::Map<String, serde_json::Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStage {
    Empty,
    Configuring,
    Uploading,
    Validating,
    ColumnSelection,
    ReadyToProcess,
    Processing,
    Processed,
}

/// Age and gender of one file's wearer, as typed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosinorAgeEntry {
    pub file_id: String,
    pub filename: String,
    pub age: String,
    pub gender: Gender,
}

impl CosinorAgeEntry {
    fn for_file(file: &UploadedFile) -> Self {
        Self {
            file_id: file.file_id.clone(),
            filename: file.filename.clone(),
            age: DEFAULT_COSINOR_AGE.to_string(),
            gender: Gender::Unknown,
        }
    }

    fn parsed_age(&self) -> Option<f64> {
        self.age
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|a| a.is_finite() && *a > 0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CosinorAgeSettings {
    pub enabled: bool,
    pub entries: Vec<CosinorAgeEntry>,
}

impl CosinorAgeSettings {
    /// Entries without a usable age
    pub fn missing_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.parsed_age().is_none())
            .count()
    }

    fn wire_inputs(&self) -> Result<Vec<CosinorAgeInput>, LabError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let missing = self.missing_count();
        if missing > 0 {
            return Err(LabError::InputRejected(format!(
                "Cosinorage is enabled but age and gender are not properly set for {} file(s). \
                 Please set valid age and gender for all files or disable CosinorAge.",
                missing
            )));
        }
        Ok(self
            .entries
            .iter()
            .filter_map(|e| {
                e.parsed_age().map(|age| CosinorAgeInput {
                    gender: e.gender,
                    age,
                })
            })
            .collect())
    }
}

/// Outcome of asking to validate the batch
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationStart {
    /// Fewer than two files; verdict already applied
    Trivial(SchemaVerdict),
    Remote {
        ticket: RequestTicket,
        file_ids: Vec<String>,
    },
}

/// A bulk processing request ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct BulkProcessStart {
    pub ticket: RequestTicket,
    /// Files to re-validate before sending
    pub file_ids: Vec<String>,
    pub request: BulkProcessRequest,
}

#[derive(Debug, Clone)]
pub struct BulkSession {
    config: LabConfig,
    session_id: Uuid,
    descriptor: DataDescriptor,
    params: ProcessingParameters,
    files: Vec<UploadedFile>,
    upload_progress: f64,
    validation: Option<SchemaVerdict>,
    preview: Option<PreviewRows>,
    manually_completed: bool,
    cosinor_age: CosinorAgeSettings,
    result: Option<AggregateResult>,
    failure: Option<Failure<BulkStage>>,
    notice: Option<String>,
    timer: ProcessingTimer,
    requests: RequestLedger,
}

impl Default for BulkSession {
    fn default() -> Self {
        Self::new(LabConfig::default())
    }
}

impl BulkSession {
    /// Batches are generic CSV exports
    pub fn new(config: LabConfig) -> Self {
        let mut descriptor = DataDescriptor::default();
        descriptor.set_data_source(DataSource::Other);
        descriptor.file_type = Some(FileType::Csv);
        Self {
            config,
            session_id: Uuid::new_v4(),
            descriptor,
            params: ProcessingParameters::default(),
            files: Vec::new(),
            upload_progress: 0.0,
            validation: None,
            preview: None,
            manually_completed: false,
            cosinor_age: CosinorAgeSettings::default(),
            result: None,
            failure: None,
            notice: None,
            timer: ProcessingTimer::new(),
            requests: RequestLedger::default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn descriptor(&self) -> &DataDescriptor {
        &self.descriptor
    }

    pub fn params(&self) -> &ProcessingParameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ProcessingParameters {
        &mut self.params
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn upload_progress(&self) -> f64 {
        self.upload_progress
    }

    pub fn validation(&self) -> Option<&SchemaVerdict> {
        self.validation.as_ref()
    }

    pub fn preview(&self) -> Option<&PreviewRows> {
        self.preview.as_ref()
    }

    pub fn cosinor_age(&self) -> &CosinorAgeSettings {
        &self.cosinor_age
    }

    pub fn result(&self) -> Option<&AggregateResult> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&Failure<BulkStage>> {
        self.failure.as_ref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn timer(&self) -> &ProcessingTimer {
        &self.timer
    }

    pub fn column_selection_complete(&self) -> bool {
        self.descriptor.is_complete()
    }

    /// Once column selection has been complete, the parameter section stays open
    pub fn manually_completed(&self) -> bool {
        self.manually_completed
    }

    pub fn show_parameters(&self) -> bool {
        self.manually_completed || self.column_selection_complete()
    }

    pub fn stage(&self) -> BulkStage {
        if self.requests.is_in_flight(RequestKind::Processing) {
            return BulkStage::Processing;
        }
        if self.result.is_some() {
            return BulkStage::Processed;
        }
        if !self.files.is_empty() {
            if self.requests.is_in_flight(RequestKind::Validation) {
                return BulkStage::Validating;
            }
            return if self.show_parameters() {
                BulkStage::ReadyToProcess
            } else {
                BulkStage::ColumnSelection
            };
        }
        if self.requests.is_in_flight(RequestKind::Upload) {
            return BulkStage::Uploading;
        }
        if self.descriptor.data_type.is_none() {
            BulkStage::Empty
        } else {
            BulkStage::Configuring
        }
    }

    pub fn status(&self) -> SessionStatus<BulkStage> {
        match &self.failure {
            Some(failure) => SessionStatus::Failed(failure.clone()),
            None => SessionStatus::Active {
                stage: self.stage(),
            },
        }
    }

    fn fail(&mut self, err: LabError) -> LabError {
        let failure = Failure {
            kind: err.kind(),
            message: err.to_string(),
            resume_stage: self.stage(),
        };
        debug!(stage = ?failure.resume_stage, message = %failure.message, "bulk failure recorded");
        self.failure = Some(failure);
        self.notice = None;
        err
    }

    fn clear_messages(&mut self) {
        self.failure = None;
        self.notice = None;
    }

    fn refresh_completion(&mut self) {
        if !self.manually_completed && self.descriptor.is_complete() {
            debug!("column selection complete");
            self.manually_completed = true;
        }
    }

    /// Drop every file and everything derived from the batch
    fn discard_batch(&mut self) {
        self.requests.invalidate(RequestKind::Columns);
        self.requests.invalidate(RequestKind::Preview);
        self.files.clear();
        self.descriptor.column_options = ColumnOptions::NotFetched;
        self.descriptor.time_column = None;
        self.descriptor.data_columns.clear();
        self.manually_completed = false;
        self.validation = None;
        self.preview = None;
        self.cosinor_age.entries.clear();
        self.result = None;
    }

    /// Interpretation changed: the held result and any unfinished upload or
    /// processing request no longer match the descriptor
    fn interpretation_changed(&mut self) {
        if self.requests.is_in_flight(RequestKind::Upload) {
            debug!("interpretation changed mid-upload, invalidating the upload");
            self.requests.invalidate(RequestKind::Upload);
            self.upload_progress = 0.0;
        }
        self.requests.invalidate(RequestKind::Processing);
        self.timer.clear();
        self.result = None;
    }

    pub fn set_data_type(&mut self, data_type: DataType) -> Result<(), LabError> {
        self.clear_messages();
        let before = self.descriptor.data_type;
        self.descriptor.set_data_type(data_type).map_err(|e| self.fail(e))?;
        if before != Some(data_type) {
            self.interpretation_changed();
            if let ColumnOptions::Loaded(columns) = &self.descriptor.column_options {
                let columns = columns.clone();
                self.descriptor.load_column_options(columns);
            }
        }
        self.refresh_completion();
        Ok(())
    }

    pub fn set_data_unit(&mut self, unit: DataUnit) -> Result<(), LabError> {
        self.clear_messages();
        let before = self.descriptor.data_unit;
        self.descriptor.set_data_unit(unit).map_err(|e| self.fail(e))?;
        if before != Some(unit) {
            self.interpretation_changed();
        }
        self.refresh_completion();
        Ok(())
    }

    pub fn set_timestamp_format(&mut self, format: TimestampFormat) {
        self.clear_messages();
        let before = self.descriptor.timestamp_format;
        self.descriptor.set_timestamp_format(format);
        if before != Some(format) {
            self.interpretation_changed();
        }
        self.refresh_completion();
    }

    pub fn set_time_zone(&mut self, zone: impl Into<String>) {
        self.descriptor.set_time_zone(zone);
    }

    pub fn set_time_column(&mut self, column: impl Into<String>) -> Result<(), LabError> {
        self.clear_messages();
        self.descriptor.set_time_column(column).map_err(|e| self.fail(e))?;
        self.refresh_completion();
        Ok(())
    }

    pub fn set_data_columns(&mut self, columns: Vec<String>) -> Result<(), LabError> {
        self.clear_messages();
        self.descriptor.set_data_columns(columns).map_err(|e| self.fail(e))?;
        self.refresh_completion();
        Ok(())
    }

    pub fn set_axis(&mut self, axis: Axis, column: impl Into<String>) -> Result<(), LabError> {
        self.clear_messages();
        self.descriptor.set_axis(axis, column).map_err(|e| self.fail(e))?;
        self.refresh_completion();
        Ok(())
    }

    pub fn set_cosinor_enabled(&mut self, enabled: bool) {
        self.cosinor_age.enabled = enabled;
    }

    pub fn set_cosinor_age(&mut self, file_id: &str, age: impl Into<String>) {
        if let Some(entry) = self.cosinor_age.entries.iter_mut().find(|e| e.file_id == file_id) {
            entry.age = age.into();
        }
    }

    pub fn set_cosinor_gender(&mut self, file_id: &str, gender: Gender) {
        if let Some(entry) = self.cosinor_age.entries.iter_mut().find(|e| e.file_id == file_id) {
            entry.gender = gender;
        }
    }

    pub fn begin_upload(
        &mut self,
        files: &[LocalFile],
    ) -> Result<(RequestTicket, UploadForm), LabError> {
        self.clear_messages();
        if files.is_empty() {
            return Err(self.fail(LabError::InputRejected("No files selected".to_string())));
        }
        if !self.descriptor.accepts_drop() {
            return Err(self.fail(LabError::InputRejected(
                "Please select a data type before uploading".to_string(),
            )));
        }
        if let Some(big) = files
            .iter()
            .find(|f| f.size_bytes > self.config.max_upload_bytes)
        {
            let message = format!(
                "File {} is too large. Maximum allowed size is {}.",
                big.name,
                format_size_limit(self.config.max_upload_bytes)
            );
            self.upload_progress = 0.0;
            return Err(self.fail(LabError::InputRejected(message)));
        }
        let form = self.descriptor.upload_form().map_err(|e| self.fail(e))?;
        let ticket = self.requests.issue(RequestKind::Upload).map_err(|e| self.fail(e))?;

        self.requests.invalidate(RequestKind::Validation);
        self.requests.invalidate(RequestKind::Processing);
        self.timer.clear();
        self.discard_batch();
        self.upload_progress = 0.0;
        debug!(files = files.len(), "bulk upload started");
        Ok((ticket, form))
    }

    pub fn report_upload_progress(&mut self, ticket: RequestTicket, percent: f64) -> bool {
        if !self.requests.is_current(ticket) || !percent.is_finite() {
            return false;
        }
        self.upload_progress = self.upload_progress.max(percent.clamp(0.0, 100.0));
        true
    }

    pub fn complete_upload(
        &mut self,
        ticket: RequestTicket,
        response: Result<Vec<UploadResponse>, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        match response {
            Ok(files) => {
                self.files = files.into_iter().map(UploadedFile::from).collect();
                self.cosinor_age.entries =
                    self.files.iter().map(CosinorAgeEntry::for_file).collect();
                self.upload_progress = 100.0;
                info!(files = self.files.len(), "bulk upload complete");
                Ok(())
            }
            Err(err) => {
                self.upload_progress = 0.0;
                Err(self.fail(err))
            }
        }
    }

    fn first_file_id(&self) -> Option<String> {
        self.files.first().map(|f| f.file_id.clone())
    }

    /// Column names come from the first file of the batch
    pub fn begin_column_fetch(&mut self) -> Result<(RequestTicket, String), LabError> {
        let Some(file_id) = self.first_file_id() else {
            return Err(self.fail(LabError::InputRejected("No files uploaded".to_string())));
        };
        let ticket = self.requests.issue(RequestKind::Columns).map_err(|e| self.fail(e))?;
        Ok((ticket, file_id))
    }

    pub fn complete_column_fetch(
        &mut self,
        ticket: RequestTicket,
        columns: Result<Vec<String>, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        match columns {
            Ok(columns) => {
                self.descriptor.load_column_options(columns);
                self.refresh_completion();
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn begin_validation(&mut self) -> Result<ValidationStart, LabError> {
        let file_ids: Vec<String> = self.files.iter().map(|f| f.file_id.clone()).collect();
        if file_ids.len() < 2 {
            let verdict = SchemaVerdict::valid(SINGLE_FILE_MESSAGE);
            self.validation = Some(verdict.clone());
            return Ok(ValidationStart::Trivial(verdict));
        }
        let ticket = self
            .requests
            .issue(RequestKind::Validation)
            .map_err(|e| self.fail(e))?;
        Ok(ValidationStart::Remote { ticket, file_ids })
    }

    /// An invalid verdict discards the whole batch
    pub fn complete_validation(
        &mut self,
        ticket: RequestTicket,
        verdict: SchemaVerdict,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        if verdict.valid {
            info!(files = self.files.len(), "batch columns consistent");
            self.validation = Some(verdict);
            return Ok(());
        }
        warn!(message = %verdict.message, "column validation failed, discarding batch");
        self.discard_batch();
        Err(self.fail(LabError::ValidationFailure(verdict.message)))
    }

    pub fn begin_preview(&mut self) -> Result<(RequestTicket, String), LabError> {
        let Some(file_id) = self.first_file_id() else {
            return Err(self.fail(LabError::InputRejected("No files uploaded".to_string())));
        };
        let ticket = self.requests.issue(RequestKind::Preview).map_err(|e| self.fail(e))?;
        Ok((ticket, file_id))
    }

    pub fn complete_preview(
        &mut self,
        ticket: RequestTicket,
        rows: Result<PreviewRows, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        match rows {
            Ok(rows) => {
                self.preview = Some(rows);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn begin_processing(&mut self) -> Result<BulkProcessStart, LabError> {
        self.clear_messages();
        if self.files.is_empty() {
            return Err(self.fail(LabError::InputRejected("No files uploaded".to_string())));
        }
        let unit_ok = match self.descriptor.data_type {
            Some(t) => !t.requires_unit() || self.descriptor.data_unit.is_some(),
            None => false,
        };
        let Some(timestamp_format) = self.descriptor.timestamp_format.filter(|_| unit_ok) else {
            return Err(self.fail(LabError::InputRejected(
                "Please select data type, data unit, and timestamp format".to_string(),
            )));
        };
        if !self.column_selection_complete() {
            return Err(self.fail(LabError::InputRejected(
                "Please complete column selection before processing data".to_string(),
            )));
        }
        let (preprocess_args, features_args) = self.params.to_args().map_err(|e| self.fail(e))?;
        let cosinor_age_inputs = self.cosinor_age.wire_inputs().map_err(|e| self.fail(e))?;

        let data_type = self.descriptor.data_type.map(|t| t.as_str()).unwrap_or("unknown");
        let time_column = self.descriptor.time_column.clone().unwrap_or_default();
        let files = self
            .files
            .iter()
            .map(|f| BulkFileSpec {
                file_id: f.file_id.clone(),
                data_type: data_type.to_string(),
                data_unit: self.descriptor.data_unit,
                timestamp_format,
                time_column: time_column.clone(),
                data_columns: self.descriptor.data_columns.clone(),
            })
            .collect();
        let request = BulkProcessRequest {
            files,
            preprocess_args,
            features_args,
            enable_cosinorage: self.cosinor_age.enabled,
            cosinor_age_inputs,
        };

        let ticket = self
            .requests
            .issue(RequestKind::Processing)
            .map_err(|e| self.fail(e))?;
        self.timer.start();
        Ok(BulkProcessStart {
            ticket,
            file_ids: self.files.iter().map(|f| f.file_id.clone()).collect(),
            request,
        })
    }

    /// Failure keeps the batch; partial failures inside the result are not
    /// failures of the session
    pub fn complete_processing(
        &mut self,
        ticket: RequestTicket,
        result: Result<AggregateResult, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        self.timer.stop();
        match result {
            Ok(mut result) => {
                if result.total_files.is_none() && !self.files.is_empty() {
                    result.total_files = Some(self.files.len());
                }
                if let Err(violation) = result.check_invariants() {
                    warn!(%violation, "aggregate result is inconsistent");
                }
                let outcome = result.outcome();
                info!(
                    processed = outcome.processed,
                    total = outcome.total,
                    "bulk processing complete"
                );
                self.notice = Some(outcome.message());
                self.result = Some(result);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn reset(&mut self) {
        info!(session = %self.session_id, "bulk session reset");
        let mut requests = std::mem::take(&mut self.requests);
        requests.invalidate_all();
        *self = Self::new(self.config.clone());
        self.requests = requests;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(
            self.session_id,
            self.descriptor.clone(),
            self.params.clone(),
            self.files.clone(),
            self.manually_completed,
        )
        .with_cosinor_age(self.cosinor_age.clone())
    }

    pub fn restore(config: LabConfig, snapshot: SessionSnapshot) -> Self {
        let mut session = Self::new(config);
        session.session_id = snapshot.session_id;
        session.descriptor = snapshot.descriptor;
        session.params = snapshot.params;
        session.files = snapshot.uploaded_files;
        session.manually_completed = snapshot.mapping_committed && !session.files.is_empty();
        session.cosinor_age = snapshot.cosinor_age.unwrap_or_default();
        if !session.files.is_empty() {
            session.upload_progress = 100.0;
        }
        session
    }
}
