//! Single-file session
//!
//! Walks one recording from source selection through upload, optional column
//! mapping and processing to age prediction. The stage is never stored; it is
//! derived from the fields after every mutation.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::descriptor::{Axis, ColumnOptions, DataDescriptor};
use super::snapshot::SessionSnapshot;
use super::timer::ProcessingTimer;
use super::{format_size_limit, Failure, RequestKind, RequestLedger, RequestTicket, SessionStatus};
use crate::backend::{AgePredictionRequest, ProcessRequest, UpdateColumnsRequest, UploadForm};
use crate::config::LabConfig;
use crate::error::LabError;
use crate::params::ProcessingParameters;
use crate::types::{
    DataSource, DataType, DataUnit, FeatureResult, FileType, Gender, LocalFile, TimestampFormat,
    UploadResponse, UploadedFile,
};

pub const ALREADY_PROCESSED_MESSAGE: &str = "Data is already processed.";
pub const MAPPING_COMMITTED_MESSAGE: &str =
    "Column selections updated successfully. Click \"Process Data\" to continue.";

/// Where a single-file session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Empty,
    SourceChosen,
    FileTypeChosen,
    CsvColumnsPending,
    DescriptorComplete,
    Uploading,
    Uploaded,
    ColumnMappingPending,
    ColumnMappingComplete,
    Processing,
    Processed,
}

/// Outcome of asking to process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStart {
    /// A result is already held; nothing was sent
    AlreadyProcessed,
    Started {
        ticket: RequestTicket,
        file_id: String,
        request: ProcessRequest,
    },
}

#[derive(Debug, Clone)]
pub struct SingleSession {
    config: LabConfig,
    session_id: Uuid,
    descriptor: DataDescriptor,
    params: ProcessingParameters,
    upload_progress: f64,
    uploaded: Option<UploadedFile>,
    mapping_committed: bool,
    result: Option<FeatureResult>,
    predicted_age: Option<f64>,
    failure: Option<Failure<Stage>>,
    notice: Option<String>,
    timer: ProcessingTimer,
    requests: RequestLedger,
}

impl Default for SingleSession {
    fn default() -> Self {
        Self::new(LabConfig::default())
    }
}

impl SingleSession {
    pub fn new(config: LabConfig) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4(),
            descriptor: DataDescriptor::default(),
            params: ProcessingParameters::default(),
            upload_progress: 0.0,
            uploaded: None,
            mapping_committed: false,
            result: None,
            predicted_age: None,
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

    pub fn upload_progress(&self) -> f64 {
        self.upload_progress
    }

    pub fn uploaded_file(&self) -> Option<&UploadedFile> {
        self.uploaded.as_ref()
    }

    pub fn result(&self) -> Option<&FeatureResult> {
        self.result.as_ref()
    }

    pub fn predicted_age(&self) -> Option<f64> {
        self.predicted_age
    }

    pub fn failure(&self) -> Option<&Failure<Stage>> {
        self.failure.as_ref()
    }

    /// Last informational message
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn timer(&self) -> &ProcessingTimer {
        &self.timer
    }

    /// Derived stage
    pub fn stage(&self) -> Stage {
        if self.requests.is_in_flight(RequestKind::Processing) {
            return Stage::Processing;
        }
        if self.result.is_some() {
            return Stage::Processed;
        }
        if self.uploaded.is_some() {
            return match (self.descriptor.needs_mapping(), self.mapping_committed) {
                (false, _) => Stage::Uploaded,
                (true, false) => Stage::ColumnMappingPending,
                (true, true) => Stage::ColumnMappingComplete,
            };
        }
        if self.requests.is_in_flight(RequestKind::Upload) {
            return Stage::Uploading;
        }
        match (self.descriptor.data_source, self.descriptor.file_type) {
            (None, _) => Stage::Empty,
            (Some(_), None) => Stage::SourceChosen,
            (Some(_), Some(_)) if !self.descriptor.accepts_drop() => Stage::FileTypeChosen,
            (Some(_), Some(FileType::Csv)) if !self.descriptor.is_complete() => {
                Stage::CsvColumnsPending
            }
            (Some(_), Some(_)) => Stage::DescriptorComplete,
        }
    }

    pub fn status(&self) -> SessionStatus<Stage> {
        match &self.failure {
            Some(failure) => SessionStatus::Failed(failure.clone()),
            None => SessionStatus::Active {
                stage: self.stage(),
            },
        }
    }

    /// Mapping UI is shown after upload until the mapping is committed
    pub fn mapping_open(&self) -> bool {
        self.uploaded.is_some() && self.descriptor.needs_mapping() && !self.mapping_committed
    }

    /// Single gate for the process action
    pub fn is_ready(&self) -> bool {
        self.uploaded.is_some()
            && (!self.descriptor.needs_mapping() || self.mapping_committed)
            && !self.requests.is_in_flight(RequestKind::Processing)
    }

    fn fail(&mut self, err: LabError) -> LabError {
        let failure = Failure {
            kind: err.kind(),
            message: err.to_string(),
            resume_stage: self.stage(),
        };
        debug!(stage = ?failure.resume_stage, message = %failure.message, "session failure recorded");
        self.failure = Some(failure);
        self.notice = None;
        err
    }

    fn clear_messages(&mut self) {
        self.failure = None;
        self.notice = None;
    }

    /// Forget the uploaded file and everything derived from it
    fn discard_upload(&mut self) {
        self.requests.invalidate_all();
        self.timer.clear();
        self.upload_progress = 0.0;
        self.uploaded = None;
        self.mapping_committed = false;
        self.result = None;
        self.predicted_age = None;
    }

    /// Interpretation changed: re-map, re-process, drop an unfinished upload
    fn interpretation_changed(&mut self) {
        if self.requests.is_in_flight(RequestKind::Upload) {
            debug!("interpretation changed mid-upload, invalidating the upload");
            self.requests.invalidate(RequestKind::Upload);
            self.upload_progress = 0.0;
        }
        self.requests.invalidate(RequestKind::Processing);
        self.requests.invalidate(RequestKind::MappingCommit);
        self.timer.clear();
        self.mapping_committed = false;
        self.result = None;
        self.predicted_age = None;
    }

    pub fn set_data_source(&mut self, source: DataSource) {
        self.clear_messages();
        if self.descriptor.data_source == Some(source) {
            return;
        }
        self.descriptor.set_data_source(source);
        self.discard_upload();
    }

    pub fn set_file_type(&mut self, file_type: FileType) -> Result<(), LabError> {
        self.clear_messages();
        let before = self.descriptor.file_type;
        self.descriptor.set_file_type(file_type).map_err(|e| self.fail(e))?;
        if before != Some(file_type) {
            self.interpretation_changed();
        }
        Ok(())
    }

    pub fn set_data_type(&mut self, data_type: DataType) -> Result<(), LabError> {
        self.clear_messages();
        let before = self.descriptor.data_type;
        self.descriptor.set_data_type(data_type).map_err(|e| self.fail(e))?;
        if before != Some(data_type) {
            self.interpretation_changed();
            self.reapply_suggestions();
        }
        Ok(())
    }

    fn reapply_suggestions(&mut self) {
        if let ColumnOptions::Loaded(columns) = &self.descriptor.column_options {
            let columns = columns.clone();
            self.descriptor.load_column_options(columns);
        }
    }

    pub fn set_data_unit(&mut self, unit: DataUnit) -> Result<(), LabError> {
        self.clear_messages();
        self.descriptor.set_data_unit(unit).map_err(|e| self.fail(e))?;
        self.mapping_committed = false;
        Ok(())
    }

    pub fn set_timestamp_format(&mut self, format: TimestampFormat) {
        self.clear_messages();
        self.descriptor.set_timestamp_format(format);
        self.mapping_committed = false;
    }

    pub fn set_time_zone(&mut self, zone: impl Into<String>) {
        self.descriptor.set_time_zone(zone);
        self.mapping_committed = false;
    }

    pub fn set_time_column(&mut self, column: impl Into<String>) -> Result<(), LabError> {
        self.clear_messages();
        self.descriptor.set_time_column(column).map_err(|e| self.fail(e))?;
        self.mapping_committed = false;
        Ok(())
    }

    pub fn set_data_columns(&mut self, columns: Vec<String>) -> Result<(), LabError> {
        self.clear_messages();
        self.descriptor.set_data_columns(columns).map_err(|e| self.fail(e))?;
        self.mapping_committed = false;
        Ok(())
    }

    pub fn set_axis(&mut self, axis: Axis, column: impl Into<String>) -> Result<(), LabError> {
        self.clear_messages();
        self.descriptor.set_axis(axis, column).map_err(|e| self.fail(e))?;
        self.mapping_committed = false;
        Ok(())
    }

    /// Accept a file and open the upload slot
    pub fn begin_upload(&mut self, file: &LocalFile) -> Result<(RequestTicket, UploadForm), LabError> {
        self.clear_messages();
        if !self.descriptor.accepts_drop() {
            return Err(self.fail(LabError::InputRejected(
                "Please select a data source, file type and data type before uploading".to_string(),
            )));
        }
        if file.size_bytes > self.config.max_upload_bytes {
            self.upload_progress = 0.0;
            return Err(self.fail(LabError::InputRejected(format!(
                "File is too large. Maximum allowed size is {}.",
                format_size_limit(self.config.max_upload_bytes)
            ))));
        }
        let form = self.descriptor.upload_form().map_err(|e| self.fail(e))?;
        let ticket = self.requests.issue(RequestKind::Upload).map_err(|e| self.fail(e))?;

        self.requests.invalidate(RequestKind::Processing);
        self.timer.clear();
        self.uploaded = None;
        self.mapping_committed = false;
        self.result = None;
        self.predicted_age = None;
        self.upload_progress = 0.0;
        self.descriptor.column_options = ColumnOptions::NotFetched;
        debug!(file = %file.name, bytes = file.size_bytes, "upload started");
        Ok((ticket, form))
    }

    /// Progress event; never moves backwards. Returns false for stale tickets.
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
        response: Result<UploadResponse, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        match response {
            Ok(response) => {
                let file = UploadedFile::from(response);
                info!(file_id = %file.file_id, filename = %file.filename, "upload complete");
                self.uploaded = Some(file);
                self.upload_progress = 100.0;
                Ok(())
            }
            Err(err) => {
                self.upload_progress = 0.0;
                Err(self.fail(err))
            }
        }
    }

    /// Open the column fetch; `None` when the file type has no columns to pick
    pub fn begin_column_fetch(&mut self) -> Result<Option<(RequestTicket, String)>, LabError> {
        let Some(file_id) = self.uploaded.as_ref().map(|f| f.file_id.clone()) else {
            return Err(self.fail(LabError::InputRejected(
                "No uploaded file to read columns from".to_string(),
            )));
        };
        if self.descriptor.file_type != Some(FileType::Csv) {
            self.descriptor.skip_column_options();
            return Ok(None);
        }
        let ticket = self.requests.issue(RequestKind::Columns).map_err(|e| self.fail(e))?;
        Ok(Some((ticket, file_id)))
    }

    pub fn complete_column_fetch(
        &mut self,
        ticket: RequestTicket,
        columns: Result<Vec<String>, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        match columns {
            Ok(columns) => {
                debug!(count = columns.len(), "column names loaded");
                self.descriptor.load_column_options(columns);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn begin_mapping_commit(
        &mut self,
    ) -> Result<(RequestTicket, String, UpdateColumnsRequest), LabError> {
        self.clear_messages();
        let Some(file_id) = self.uploaded.as_ref().map(|f| f.file_id.clone()) else {
            return Err(self.fail(LabError::InputRejected(
                "Upload a file before mapping its columns".to_string(),
            )));
        };
        let request = self
            .descriptor
            .update_columns_request()
            .map_err(|e| self.fail(e))?;
        let ticket = self
            .requests
            .issue(RequestKind::MappingCommit)
            .map_err(|e| self.fail(e))?;
        Ok((ticket, file_id, request))
    }

    pub fn complete_mapping_commit(
        &mut self,
        ticket: RequestTicket,
        outcome: Result<(), LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        match outcome {
            Ok(()) => {
                info!("column mapping committed");
                self.mapping_committed = true;
                self.notice = Some(MAPPING_COMMITTED_MESSAGE.to_string());
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn begin_processing(&mut self) -> Result<ProcessStart, LabError> {
        self.clear_messages();
        if self.result.is_some() {
            self.notice = Some(ALREADY_PROCESSED_MESSAGE.to_string());
            return Ok(ProcessStart::AlreadyProcessed);
        }
        let ready = self.is_ready();
        let Some(file_id) = self
            .uploaded
            .as_ref()
            .filter(|_| ready)
            .map(|f| f.file_id.clone())
        else {
            return Err(self.fail(LabError::InputRejected(
                "Upload a file and complete column selection before processing".to_string(),
            )));
        };
        let (preprocess_args, features_args) = self.params.to_args().map_err(|e| self.fail(e))?;

        let mut request = ProcessRequest {
            preprocess_args,
            features_args,
            time_zone: match self.descriptor.timestamp_format {
                Some(TimestampFormat::Datetime) => None,
                _ => Some(self.descriptor.time_zone.clone()),
            },
            time_column: None,
            data_columns: None,
            data_type: None,
            time_format: None,
            data_unit: None,
        };
        if self.mapping_committed {
            request.time_column = self.descriptor.time_column.clone();
            request.data_columns = Some(self.descriptor.data_columns.clone());
            request.data_type = Some(self.descriptor.wire_data_type());
            request.time_format = self.descriptor.timestamp_format;
            request.data_unit = self.descriptor.data_unit;
        }

        let ticket = self
            .requests
            .issue(RequestKind::Processing)
            .map_err(|e| self.fail(e))?;
        self.timer.start();
        debug!(file_id = %file_id, "processing started");
        Ok(ProcessStart::Started {
            ticket,
            file_id,
            request,
        })
    }

    /// Failure keeps the upload and mapping so the user can retry
    pub fn complete_processing(
        &mut self,
        ticket: RequestTicket,
        result: Result<FeatureResult, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        self.timer.stop();
        match result {
            Ok(result) => {
                info!(samples = result.data.len(), "processing complete");
                self.result = Some(result);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn begin_age_prediction(
        &mut self,
        chronological_age: f64,
        gender: Gender,
    ) -> Result<(RequestTicket, String, AgePredictionRequest), LabError> {
        self.clear_messages();
        let age_valid = chronological_age.is_finite() && chronological_age > 0.0;
        let file_id = self
            .uploaded
            .as_ref()
            .filter(|_| age_valid && self.result.is_some())
            .map(|f| f.file_id.clone());
        let Some(file_id) = file_id else {
            return Err(self.fail(LabError::InputRejected(
                "Please enter chronological age and ensure data is processed".to_string(),
            )));
        };
        let ticket = self
            .requests
            .issue(RequestKind::AgePrediction)
            .map_err(|e| self.fail(e))?;
        Ok((
            ticket,
            file_id,
            AgePredictionRequest {
                chronological_age,
                gender,
            },
        ))
    }

    pub fn complete_age_prediction(
        &mut self,
        ticket: RequestTicket,
        predicted: Result<f64, LabError>,
    ) -> Result<(), LabError> {
        self.requests.settle(ticket)?;
        match predicted {
            Ok(age) => {
                self.predicted_age = Some(age);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Return every field to `Empty` and supersede all in-flight requests
    pub fn reset(&mut self) {
        info!(session = %self.session_id, "session reset");
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
            self.uploaded.iter().cloned().collect(),
            self.mapping_committed,
        )
    }

    /// Rebuild a session from a saved snapshot
    pub fn restore(config: LabConfig, snapshot: SessionSnapshot) -> Result<Self, LabError> {
        if snapshot.uploaded_files.len() > 1 {
            return Err(LabError::InputRejected(format!(
                "A single-file session cannot hold {} files",
                snapshot.uploaded_files.len()
            )));
        }
        let mut session = Self::new(config);
        session.session_id = snapshot.session_id;
        session.descriptor = snapshot.descriptor;
        session.params = snapshot.params;
        session.uploaded = snapshot.uploaded_files.into_iter().next();
        session.mapping_committed = snapshot.mapping_committed && session.uploaded.is_some();
        if session.uploaded.is_some() {
            session.upload_progress = 100.0;
        }
        Ok(session)
    }
}
