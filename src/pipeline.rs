//! Pipeline orchestration
//!
//! Drives a session through a [`ProcessingBackend`] one request at a time.
//! Every network call goes through the session's `begin_*`/`complete_*` pair,
//! so a pipeline never mutates session state behind its back.

use tracing::{debug, info};

use crate::backend::ProcessingBackend;
use crate::error::LabError;
use crate::schema::validate_schemas;
use crate::session::{BulkSession, ProcessStart, SingleSession, ValidationStart};
use crate::types::{Gender, LocalFile};

/// Single-file flow: upload, column fetch, mapping commit, processing.
pub struct SinglePipeline<'b> {
    backend: &'b mut dyn ProcessingBackend,
}

impl<'b> SinglePipeline<'b> {
    pub fn new(backend: &'b mut dyn ProcessingBackend) -> Self {
        Self { backend }
    }

    /// Upload `file` and load its column names when it is a CSV
    pub fn upload(&mut self, session: &mut SingleSession, file: &LocalFile) -> Result<(), LabError> {
        let (ticket, form) = session.begin_upload(file)?;
        let response = {
            let mut on_progress = |percent: f64| {
                session.report_upload_progress(ticket, percent);
            };
            self.backend.upload(file, &form, &mut on_progress)
        };
        session.complete_upload(ticket, response)?;

        if let Some((ticket, file_id)) = session.begin_column_fetch()? {
            let columns = self.backend.columns(&file_id);
            session.complete_column_fetch(ticket, columns)?;
        }
        Ok(())
    }

    pub fn commit_mapping(&mut self, session: &mut SingleSession) -> Result<(), LabError> {
        let (ticket, file_id, request) = session.begin_mapping_commit()?;
        let outcome = self.backend.update_columns(&file_id, &request);
        session.complete_mapping_commit(ticket, outcome)
    }

    /// Extract and process the uploaded file.
    ///
    /// Returns `false` when the session already held a result.
    pub fn process(&mut self, session: &mut SingleSession) -> Result<bool, LabError> {
        let (ticket, file_id, request) = match session.begin_processing()? {
            ProcessStart::AlreadyProcessed => return Ok(false),
            ProcessStart::Started {
                ticket,
                file_id,
                request,
            } => (ticket, file_id, request),
        };
        let result = self
            .backend
            .extract(&file_id)
            .and_then(|()| self.backend.process(&file_id, &request));
        session.complete_processing(ticket, result)?;
        Ok(true)
    }

    pub fn predict_age(
        &mut self,
        session: &mut SingleSession,
        chronological_age: f64,
        gender: Gender,
    ) -> Result<f64, LabError> {
        let (ticket, file_id, request) = session.begin_age_prediction(chronological_age, gender)?;
        let predicted = self.backend.predict_age(&file_id, &request);
        session.complete_age_prediction(ticket, predicted)?;
        session
            .predicted_age()
            .ok_or_else(|| LabError::ParseError("age prediction returned no value".to_string()))
    }

    /// Whole flow; the mapping is committed only when the session asks for it
    pub fn run(&mut self, session: &mut SingleSession, file: &LocalFile) -> Result<(), LabError> {
        self.upload(session, file)?;
        if session.mapping_open() {
            debug!("committing column mapping");
            self.commit_mapping(session)?;
        }
        self.process(session)?;
        Ok(())
    }
}

/// Batch flow: upload, columns, schema validation, preview, processing.
pub struct BulkPipeline<'b> {
    backend: &'b mut dyn ProcessingBackend,
}

impl<'b> BulkPipeline<'b> {
    pub fn new(backend: &'b mut dyn ProcessingBackend) -> Self {
        Self { backend }
    }

    /// Upload the batch and confirm it shares one column structure.
    ///
    /// A failed validation leaves the session with no files.
    pub fn upload(&mut self, session: &mut BulkSession, files: &[LocalFile]) -> Result<(), LabError> {
        let (ticket, form) = session.begin_upload(files)?;
        let response = {
            let mut on_progress = |percent: f64| {
                session.report_upload_progress(ticket, percent);
            };
            self.backend.bulk_upload(files, &form, &mut on_progress)
        };
        session.complete_upload(ticket, response)?;

        let (ticket, file_id) = session.begin_column_fetch()?;
        let columns = self.backend.columns(&file_id);
        session.complete_column_fetch(ticket, columns)?;

        if let ValidationStart::Remote { ticket, file_ids } = session.begin_validation()? {
            let verdict = validate_schemas(&mut *self.backend, &file_ids);
            session.complete_validation(ticket, verdict)?;
        }

        let (ticket, file_id) = session.begin_preview()?;
        let rows = self.backend.preview(&file_id);
        session.complete_preview(ticket, rows)
    }

    /// Re-check the batch schema, then process every file.
    ///
    /// A schema mismatch found here fails processing but keeps the batch.
    pub fn process(&mut self, session: &mut BulkSession) -> Result<(), LabError> {
        let start = session.begin_processing()?;
        let verdict = validate_schemas(&mut *self.backend, &start.file_ids);
        let result = if verdict.valid {
            info!(files = start.request.files.len(), "sending batch for processing");
            self.backend.bulk_process(&start.request)
        } else {
            Err(LabError::ValidationFailure(verdict.message))
        };
        session.complete_processing(start.ticket, result)
    }

    pub fn run(&mut self, session: &mut BulkSession, files: &[LocalFile]) -> Result<(), LabError> {
        self.upload(session, files)?;
        self.process(session)
    }
}
