//! Wearlab - upload orchestration and feature summaries for wearable accelerometer data
//!
//! Wearlab keeps the configuration of an accelerometer upload consistent while
//! it moves through a processing collaborator, then turns the returned feature
//! results into chartable summaries: upload → column mapping → processing →
//! flattening → distributions, correlation grid and calendar-day overlays.
//!
//! ## Modules
//!
//! - **Sessions**: single-file and bulk state machines with derived stages
//! - **Pipeline**: drivers that walk a session through a [`ProcessingBackend`]
//! - **Analysis**: flattener, distribution estimator, correlation colorizer, time-band aligner

pub mod analysis;
pub mod backend;
pub mod config;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod schema;
pub mod session;
pub mod types;

pub use backend::ProcessingBackend;
pub use config::{FlattenMode, LabConfig};
pub use error::{FailureKind, LabError};
pub use params::ProcessingParameters;
pub use pipeline::{BulkPipeline, SinglePipeline};
pub use schema::{compare_schemas, validate_schemas, ColumnSchema};
pub use session::{BulkSession, SessionSnapshot, SessionStatus, SingleSession};
pub use types::{AggregateResult, FeatureResult, FeatureValue};

/// Wearlab version
pub const WEARLAB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "wearlab";
