//! Client-side summarization of processed results
//!
//! - [`flatten`]: feature trees to named numeric series
//! - [`distribution`]: histogram and kernel density per series
//! - [`correlation`]: upper-triangular correlation grid
//! - [`bands`]: calendar-day overlays for per-sample series
//! - [`summary`]: feature ordering and batch outcome

pub mod bands;
pub mod correlation;
pub mod distribution;
pub mod flatten;
pub mod summary;

pub use bands::{align, AlignedRecording, Band, DayOverlay};
pub use correlation::{render as render_correlation, CellRender, CorrelationGrid};
pub use distribution::{estimate, Distribution};
pub use flatten::{flatten, flatten_results, FlattenedFeatures};
pub use summary::{build_report, feature_order, BatchOutcome, BatchReport};
