//! Batch summary: feature ordering, outcome reporting and the combined report

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::correlation::{self, CorrelationGrid};
use super::distribution::{self, Distribution};
use super::flatten::{flatten_results, RejectedLeaf};
use crate::config::FlattenMode;
use crate::error::LabError;
use crate::types::{AggregateResult, SummaryRow};

const SUMMARY_PREFIXES: &[&str] = &["cosinor_", "nonparam_", "physical_activity_"];

fn match_feature(summary_feature: &str, available: &[String]) -> Option<String> {
    let base = SUMMARY_PREFIXES
        .iter()
        .find_map(|p| summary_feature.strip_prefix(p))
        .unwrap_or(summary_feature);

    if let Some(hit) = available.iter().find(|f| *f == summary_feature) {
        return Some(hit.clone());
    }
    if let Some(hit) = available.iter().find(|f| *f == base) {
        return Some(hit.clone());
    }

    let lower = summary_feature.to_lowercase();
    if let Some(hit) = available.iter().find(|f| f.to_lowercase() == lower) {
        return Some(hit.clone());
    }
    available
        .iter()
        .find(|f| {
            let candidate = f.to_lowercase();
            candidate.contains(&lower) || lower.contains(&candidate)
        })
        .cloned()
}

/// Order flattened features the way the server's summary table lists them.
///
/// Summary rows with no counterpart are dropped, each feature appears once,
/// and the available order is used when nothing matches.
pub fn feature_order(summary_rows: &[SummaryRow], available: &[String]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for row in summary_rows {
        match match_feature(&row.feature, available) {
            Some(name) if !order.contains(&name) => order.push(name),
            Some(_) => {}
            None => debug!(feature = %row.feature, "summary feature has no flattened series"),
        }
    }
    if order.is_empty() {
        return available.to_vec();
    }
    order
}

/// Counts behind a partially successful batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub total: usize,
    pub failed_at_upload: usize,
    pub failed_at_processing: usize,
}

impl BatchOutcome {
    pub fn failed(&self) -> usize {
        self.failed_at_upload + self.failed_at_processing
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn message(&self) -> String {
        let head = format!(
            "Successfully processed {} out of {} files.",
            self.processed, self.total
        );
        match (self.failed_at_upload, self.failed_at_processing) {
            (0, 0) => format!("Successfully processed all {} files!", self.processed),
            (loading, 0) => format!("{} {} files failed during loading.", head, loading),
            (0, processing) => format!("{} {} files failed during processing.", head, processing),
            (loading, processing) => format!(
                "{} {} files failed during loading, {} files failed during processing.",
                head, loading, processing
            ),
        }
    }
}

impl AggregateResult {
    /// Batch counts; `total` falls back to the sum of outcomes
    pub fn outcome(&self) -> BatchOutcome {
        let processed = self.individual_results.len();
        let failed_at_upload = self.failed_files.len();
        let failed_at_processing = self.failed_handlers.len();
        BatchOutcome {
            processed,
            total: self
                .total_files
                .unwrap_or(processed + failed_at_upload + failed_at_processing),
            failed_at_upload,
            failed_at_processing,
        }
    }

    /// Results plus processing failures never exceed the batch, and every
    /// failure names its cause
    pub fn check_invariants(&self) -> Result<(), LabError> {
        let outcome = self.outcome();
        if outcome.processed + outcome.failed_at_processing > outcome.total {
            return Err(LabError::ParseError(format!(
                "{} results and {} processing failures exceed {} files",
                outcome.processed, outcome.failed_at_processing, outcome.total
            )));
        }
        if let Some(file) = self.failed_files.iter().find(|f| f.error.trim().is_empty()) {
            return Err(LabError::ParseError(format!(
                "upload failure for {} has no cause",
                file.filename
            )));
        }
        if let Some(handler) = self.failed_handlers.iter().find(|h| h.1.trim().is_empty()) {
            return Err(LabError::ParseError(format!(
                "processing failure #{} has no cause",
                handler.0
            )));
        }
        Ok(())
    }
}

/// Everything a batch result view needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub message: String,
    pub distributions: Vec<Distribution>,
    pub correlation: CorrelationGrid,
    pub rejected: Vec<RejectedLeaf>,
}

/// Flatten, order and summarize a batch result
pub fn build_report(result: &AggregateResult, mode: FlattenMode) -> BatchReport {
    if let Err(violation) = result.check_invariants() {
        warn!(error = %violation, "aggregate result is inconsistent");
    }
    let flat = flatten_results(&result.individual_results, mode);
    let available: Vec<String> = flat.names().into_iter().map(String::from).collect();
    let order = feature_order(&result.summary_dataframe, &available);

    let distributions = order
        .iter()
        .filter_map(|name| flat.get(name).map(|values| distribution::estimate(name, values)))
        .collect();

    let outcome = result.outcome();
    BatchReport {
        outcome,
        message: outcome.message(),
        distributions,
        correlation: correlation::render(&result.correlation_matrix),
        rejected: flat.rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailedFile, FailedHandler, FeatureResult};
    use pretty_assertions::assert_eq;

    fn rows(names: &[&str]) -> Vec<SummaryRow> {
        names
            .iter()
            .map(|n| SummaryRow {
                feature: n.to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_feature_order_matching_cascade() {
        let available = names(&["mesor", "TST", "light", "sleep_efficiency"]);
        let order = feature_order(
            &rows(&[
                "physical_activity_light",
                "cosinor_mesor",
                "tst",
                "efficiency",
                "unknown_metric",
                "cosinor_mesor",
            ]),
            &available,
        );
        assert_eq!(order, names(&["light", "mesor", "TST", "sleep_efficiency"]));
    }

    #[test]
    fn test_feature_order_falls_back_to_available() {
        let available = names(&["mesor", "TST"]);
        assert_eq!(feature_order(&rows(&["zzz"]), &available), available);
        assert_eq!(feature_order(&[], &available), available);
    }

    fn aggregate(processed: usize, failed_files: usize, failed_handlers: usize) -> AggregateResult {
        AggregateResult {
            individual_results: vec![FeatureResult::default(); processed],
            failed_files: (0..failed_files)
                .map(|i| FailedFile {
                    filename: format!("bad{}.csv", i),
                    error: "unreadable header".to_string(),
                })
                .collect(),
            failed_handlers: (0..failed_handlers)
                .map(|i| FailedHandler(i, "feature extraction failed".to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            aggregate(3, 0, 0).outcome().message(),
            "Successfully processed all 3 files!"
        );
        assert_eq!(
            aggregate(1, 1, 0).outcome().message(),
            "Successfully processed 1 out of 2 files. 1 files failed during loading."
        );
        assert_eq!(
            aggregate(1, 0, 1).outcome().message(),
            "Successfully processed 1 out of 2 files. 1 files failed during processing."
        );
        assert_eq!(
            aggregate(2, 1, 1).outcome().message(),
            "Successfully processed 2 out of 4 files. 1 files failed during loading, 1 files failed during processing."
        );
    }

    #[test]
    fn test_outcome_prefers_reported_total() {
        let mut result = aggregate(2, 0, 1);
        result.total_files = Some(5);
        let outcome = result.outcome();
        assert_eq!(outcome.total, 5);
        assert!(!outcome.is_complete_success());
    }

    #[test]
    fn test_invariants() {
        assert!(aggregate(2, 1, 1).check_invariants().is_ok());

        let mut overfull = aggregate(3, 0, 1);
        overfull.total_files = Some(3);
        assert!(overfull.check_invariants().is_err());

        let mut silent = aggregate(1, 0, 1);
        silent.failed_handlers[0].1 = "  ".to_string();
        assert!(silent.check_invariants().is_err());
    }

    #[test]
    fn test_build_report_orders_distributions() {
        let result: AggregateResult = serde_json::from_value(serde_json::json!({
            "individual_results": [
                {"features": {"sleep": {"TST": 400}, "cosinor": {"mesor": 0.03, "note": "ok"}}},
                {"features": {"sleep": {"TST": 380}, "cosinor": {"mesor": 0.04}}}
            ],
            "failed_handlers": [[2, "timestamp column not found"]],
            "summary_dataframe": [{"feature": "cosinor_mesor"}, {"feature": "TST"}],
            "correlation_matrix": {"mesor": {"mesor": 1.0, "TST": 0.2}, "TST": {"mesor": 0.2, "TST": 1.0}},
            "total_files": 3
        }))
        .unwrap();

        let report = build_report(&result, FlattenMode::Pooled);
        let order: Vec<&str> = report.distributions.iter().map(|d| d.feature.as_str()).collect();
        assert_eq!(order, vec!["mesor", "TST"]);
        assert_eq!(report.distributions[1].stats.unwrap().n, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.correlation.cells.len(), 2);
        assert_eq!(
            report.message,
            "Successfully processed 2 out of 3 files. 1 files failed during processing."
        );
    }
}
