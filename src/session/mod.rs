//! Upload and configuration sessions
//!
//! A session owns every field a user configures before processing and derives
//! its stage from them. Network work is split into `begin_*` calls that hand
//! out a [`RequestTicket`] and `complete_*` calls that consume it; a ticket
//! superseded by a later action (reset, source change, new upload) is refused
//! with [`LabError::StaleResponse`] so late responses never overwrite newer
//! state.

pub mod bulk;
pub mod descriptor;
pub mod single;
pub mod snapshot;
pub mod timer;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FailureKind, LabError};

pub use bulk::{BulkProcessStart, BulkSession, BulkStage, CosinorAgeEntry, ValidationStart};
pub use descriptor::{Axis, ColumnOptions, DataDescriptor};
pub use single::{ProcessStart, SingleSession, Stage};
pub use snapshot::{SessionSnapshot, SNAPSHOT_VERSION};
pub use timer::ProcessingTimer;

/// Network-involving operations a session can have in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Upload,
    Columns,
    Preview,
    Validation,
    MappingCommit,
    Processing,
    AgePrediction,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Upload => "upload",
            RequestKind::Columns => "column fetch",
            RequestKind::Preview => "preview",
            RequestKind::Validation => "column validation",
            RequestKind::MappingCommit => "column mapping",
            RequestKind::Processing => "processing",
            RequestKind::AgePrediction => "age prediction",
        }
    }
}

/// Proof that a response belongs to a request the session still expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub kind: RequestKind,
    generation: u64,
    sequence: u64,
}

/// Tracks in-flight requests, at most one per kind
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestLedger {
    generation: u64,
    next_sequence: u64,
    in_flight: Vec<RequestTicket>,
}

impl RequestLedger {
    pub(crate) fn issue(&mut self, kind: RequestKind) -> Result<RequestTicket, LabError> {
        if self.is_in_flight(kind) {
            return Err(LabError::InputRejected(format!(
                "A {} request is already in progress",
                kind.as_str()
            )));
        }
        self.next_sequence += 1;
        let ticket = RequestTicket {
            kind,
            generation: self.generation,
            sequence: self.next_sequence,
        };
        self.in_flight.push(ticket);
        Ok(ticket)
    }

    /// Retire `ticket`, refusing it if it was superseded
    pub(crate) fn settle(&mut self, ticket: RequestTicket) -> Result<(), LabError> {
        match self.in_flight.iter().position(|t| *t == ticket) {
            Some(idx) => {
                self.in_flight.remove(idx);
                Ok(())
            }
            None => {
                warn!(
                    kind = ticket.kind.as_str(),
                    generation = ticket.generation,
                    current = self.generation,
                    "dropping response of a superseded request"
                );
                Err(LabError::StaleResponse)
            }
        }
    }

    pub(crate) fn is_current(&self, ticket: RequestTicket) -> bool {
        self.in_flight.contains(&ticket)
    }

    pub(crate) fn is_in_flight(&self, kind: RequestKind) -> bool {
        self.in_flight.iter().any(|t| t.kind == kind)
    }

    pub(crate) fn invalidate(&mut self, kind: RequestKind) {
        self.in_flight.retain(|t| t.kind != kind);
    }

    pub(crate) fn invalidate_all(&mut self) {
        self.generation += 1;
        self.in_flight.clear();
    }
}

/// Last failure of a session and the stage control returned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure<S> {
    pub kind: FailureKind,
    pub message: String,
    pub resume_stage: S,
}

/// Stage plus the failure overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus<S> {
    Active { stage: S },
    Failed(Failure<S>),
}

/// Human-readable size used in upload rejections
pub(crate) fn format_size_limit(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= GIB && bytes % GIB == 0 {
        format!("{}GB", bytes / GIB)
    } else if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_request_per_kind() {
        let mut ledger = RequestLedger::default();
        let ticket = ledger.issue(RequestKind::Upload).unwrap();
        assert!(ledger.issue(RequestKind::Upload).is_err());
        assert!(ledger.issue(RequestKind::Columns).is_ok());

        ledger.settle(ticket).unwrap();
        assert!(!ledger.is_in_flight(RequestKind::Upload));
    }

    #[test]
    fn test_invalidated_ticket_is_stale() {
        let mut ledger = RequestLedger::default();
        let old = ledger.issue(RequestKind::Processing).unwrap();
        ledger.invalidate_all();
        let new = ledger.issue(RequestKind::Processing).unwrap();

        assert!(matches!(ledger.settle(old), Err(LabError::StaleResponse)));
        assert!(ledger.is_current(new));
        assert!(ledger.settle(new).is_ok());
        assert!(matches!(ledger.settle(new), Err(LabError::StaleResponse)));
    }

    #[test]
    fn test_size_limit_format() {
        assert_eq!(format_size_limit(2 * 1024 * 1024 * 1024), "2GB");
        assert_eq!(format_size_limit(5 * 1024 * 1024), "5MB");
        assert_eq!(format_size_limit(1000), "1000 bytes");
    }
}
