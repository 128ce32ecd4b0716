//! Feature flattening
//!
//! Reduces per-file feature trees (`category -> feature -> value`) to flat
//! numeric series, one per feature name. Every finite number anywhere below a
//! feature is an observation of that feature, so per-day arrays and nested
//! per-day objects contribute one value per day.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FlattenMode;
use crate::types::{FeatureResult, FeatureValue};

/// A feature value that contributed nothing to statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedLeaf {
    pub feature: String,
    pub value: serde_json::Value,
}

/// Named numeric series in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlattenedFeatures {
    pub series: Vec<(String, Vec<f64>)>,
    pub rejected: Vec<RejectedLeaf>,
}

impl FlattenedFeatures {
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn names(&self) -> Vec<&str> {
        self.series.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn push_all(&mut self, name: &str, values: Vec<f64>) {
        match self.series.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => existing.extend(values),
            None => self.series.push((name.to_string(), values)),
        }
    }

    fn reject(&mut self, name: &str, value: &FeatureValue) {
        debug!(feature = name, "feature value rejected from statistics");
        self.rejected.push(RejectedLeaf {
            feature: name.to_string(),
            value: serde_json::Value::from(value.clone()),
        });
    }

    /// Add one file's feature tree
    pub fn absorb(&mut self, tree: &FeatureValue, mode: FlattenMode) {
        let FeatureValue::Nested(categories) = tree else {
            self.absorb_feature("features", tree);
            return;
        };
        for (category, node) in categories {
            match node {
                FeatureValue::Nested(features) => {
                    for (feature, value) in features {
                        let name = match mode {
                            FlattenMode::Pooled => feature.clone(),
                            FlattenMode::Namespaced => format!("{}.{}", category, feature),
                        };
                        self.absorb_feature(&name, value);
                    }
                }
                other => self.absorb_feature(category, other),
            }
        }
    }

    fn absorb_feature(&mut self, name: &str, value: &FeatureValue) {
        match value {
            FeatureValue::Scalar(v) if v.is_finite() => self.push_all(name, vec![*v]),
            FeatureValue::Series(_) | FeatureValue::Nested(_) => {
                let mut numbers = Vec::new();
                collect_numbers(value, &mut numbers);
                if numbers.is_empty() {
                    self.reject(name, value);
                } else {
                    self.push_all(name, numbers);
                }
            }
            _ => self.reject(name, value),
        }
    }
}

/// Depth-first; non-finite and non-numeric leaves are skipped
fn collect_numbers(value: &FeatureValue, out: &mut Vec<f64>) {
    match value {
        FeatureValue::Scalar(v) if v.is_finite() => out.push(*v),
        FeatureValue::Scalar(_) | FeatureValue::Opaque(_) => {}
        FeatureValue::Series(items) => items.iter().for_each(|item| collect_numbers(item, out)),
        FeatureValue::Nested(entries) => entries.iter().for_each(|(_, v)| collect_numbers(v, out)),
    }
}

/// Flatten one feature tree
pub fn flatten(tree: &FeatureValue, mode: FlattenMode) -> FlattenedFeatures {
    let mut flat = FlattenedFeatures::default();
    flat.absorb(tree, mode);
    flat
}

/// Pool the feature trees of every processed file
pub fn flatten_results(results: &[FeatureResult], mode: FlattenMode) -> FlattenedFeatures {
    let mut flat = FlattenedFeatures::default();
    for result in results {
        flat.absorb(&result.features, mode);
    }
    debug!(
        features = flat.len(),
        rejected = flat.rejected.len(),
        "feature trees flattened"
    );
    flat
}
