//! Distribution estimation
//!
//! Equal-width histogram plus Gaussian kernel density estimate for one feature
//! series, reconciled onto a single series for a dual-axis bar and line chart.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

pub const MIN_BINS: usize = 5;
pub const MAX_BINS: usize = 20;

/// Density is evaluated at `DENSITY_STEPS + 1` points across `[min, max]`
pub const DENSITY_STEPS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// `start-end`, three decimals with trailing zeros trimmed
    pub label: String,
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityPoint {
    pub x: f64,
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedBin {
    pub label: String,
    pub start: f64,
    pub end: f64,
    pub count: usize,
    pub density: f64,
}

/// n, mean and population standard deviation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let n = finite.len();
        let mean = finite.iter().sum::<f64>() / n as f64;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let (min, max) = min_max(&finite);
        Some(Self {
            n,
            mean,
            std: variance.sqrt(),
            min,
            max,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub feature: String,
    pub histogram: Vec<Bin>,
    pub density: Vec<DensityPoint>,
    pub combined: Vec<CombinedBin>,
    pub stats: Option<SeriesStats>,
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        })
}

/// `clamp(ceil(sqrt(n)), 5, 20)`
pub fn bin_count(n: usize) -> usize {
    ((n as f64).sqrt().ceil() as usize).clamp(MIN_BINS, MAX_BINS)
}

/// Three decimals, trailing zeros and a dangling point removed
pub fn format_bound(value: f64) -> String {
    let fixed = format!("{:.3}", value);
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Gaussian KDE with bandwidth `range / n^0.2`, sampled over `[min, max]`
pub fn kernel_density(values: &[f64], min: f64, max: f64) -> Vec<DensityPoint> {
    let range = max - min;
    if values.is_empty() || range <= 0.0 {
        return Vec::new();
    }
    let n = values.len() as f64;
    let bandwidth = range / n.powf(0.2);
    let norm = bandwidth * (2.0 * PI).sqrt();

    (0..=DENSITY_STEPS)
        .filter_map(|i| {
            let x = min + (i as f64 / DENSITY_STEPS as f64) * range;
            let sum: f64 = values
                .iter()
                .map(|v| {
                    let u = (x - v) / bandwidth;
                    (-0.5 * u * u).exp() / norm
                })
                .sum();
            let density = sum / n;
            density.is_finite().then_some(DensityPoint { x, density })
        })
        .collect()
}

/// First density point closest to `x`
fn nearest_density(points: &[DensityPoint], x: f64) -> f64 {
    let mut best = 0.0;
    let mut best_distance = f64::INFINITY;
    for point in points {
        let distance = (point.x - x).abs();
        if distance < best_distance {
            best_distance = distance;
            best = point.density;
        }
    }
    best
}

/// Trapezoidal integral of a sampled density
pub fn density_mass(points: &[DensityPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[1].x - w[0].x) * (w[0].density + w[1].density) / 2.0)
        .sum()
}

/// Histogram, density and their reconciliation for one feature.
///
/// Non-finite values are ignored; an empty series gives empty outputs.
pub fn estimate(feature: &str, values: &[f64]) -> Distribution {
    let valid: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let stats = SeriesStats::from_values(&valid);
    let Some(SeriesStats { min, max, .. }) = stats else {
        return Distribution {
            feature: feature.to_string(),
            ..Default::default()
        };
    };
    let range = max - min;

    if range == 0.0 {
        debug!(feature, n = valid.len(), "identical values, single bin");
        let label = format!("{:.3}-{:.3}", min, min);
        return Distribution {
            feature: feature.to_string(),
            histogram: vec![Bin {
                label: label.clone(),
                start: min,
                end: max,
                count: valid.len(),
            }],
            density: vec![DensityPoint { x: min, density: 1.0 }],
            combined: vec![CombinedBin {
                label,
                start: min,
                end: max,
                count: valid.len(),
                density: 1.0,
            }],
            stats,
        };
    }

    let bins = bin_count(valid.len());
    let width = range / bins as f64;
    let mut histogram: Vec<Bin> = (0..bins)
        .map(|i| {
            let start = min + i as f64 * width;
            let end = min + (i + 1) as f64 * width;
            Bin {
                label: format!("{}-{}", format_bound(start), format_bound(end)),
                start,
                end,
                count: 0,
            }
        })
        .collect();
    for v in &valid {
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        histogram[idx].count += 1;
    }

    let density = kernel_density(&valid, min, max);
    let combined = histogram
        .iter()
        .map(|bin| {
            let midpoint = (round3(bin.start) + round3(bin.end)) / 2.0;
            CombinedBin {
                label: bin.label.clone(),
                start: bin.start,
                end: bin.end,
                count: bin.count,
                density: nearest_density(&density, midpoint),
            }
        })
        .collect();

    Distribution {
        feature: feature.to_string(),
        histogram,
        density,
        combined,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bin_count_clamps() {
        assert_eq!(bin_count(1), 5);
        assert_eq!(bin_count(26), 6);
        assert_eq!(bin_count(36), 6);
        assert_eq!(bin_count(10_000), 20);
    }

    #[test]
    fn test_format_bound_trims() {
        assert_eq!(format_bound(1.5), "1.5");
        assert_eq!(format_bound(2.0), "2");
        assert_eq!(format_bound(0.12345), "0.123");
        assert_eq!(format_bound(-6.075), "-6.075");
    }

    #[test]
    fn test_empty_series() {
        let dist = estimate("TST", &[]);
        assert!(dist.histogram.is_empty());
        assert!(dist.density.is_empty());
        assert!(dist.combined.is_empty());
        assert!(dist.stats.is_none());
    }

    #[test]
    fn test_identical_values_single_bin() {
        let dist = estimate("SRI", &[42.0; 7]);
        assert_eq!(dist.histogram.len(), 1);
        assert_eq!(dist.histogram[0].count, 7);
        assert_eq!(dist.histogram[0].label, "42.000-42.000");
        assert_eq!(dist.density, vec![DensityPoint { x: 42.0, density: 1.0 }]);
        assert!((dist.stats.unwrap().std).abs() < 1e-12);
    }

    #[test]
    fn test_counts_match_half_open_bins() {
        let values: Vec<f64> = (0..=10).map(|v| v as f64).collect();
        let dist = estimate("x", &values);
        assert_eq!(dist.histogram.len(), 5);
        assert_eq!(dist.histogram[0].label, "0-2");

        for (i, bin) in dist.combined.iter().enumerate() {
            let last = i == dist.combined.len() - 1;
            let expected = values
                .iter()
                .filter(|v| **v >= bin.start && (**v < bin.end || (last && **v == 10.0)))
                .count();
            assert_eq!(bin.count, expected, "bin {}", bin.label);
        }
        let total: usize = dist.histogram.iter().map(|b| b.count).sum();
        assert_eq!(total, values.len());
    }

    #[test]
    fn test_density_samples_domain() {
        let values = [1.0, 2.0, 2.5, 3.0, 7.0];
        let dist = estimate("x", &values);
        assert_eq!(dist.density.len(), DENSITY_STEPS + 1);
        assert!((dist.density[0].x - 1.0).abs() < 1e-12);
        assert!((dist.density[DENSITY_STEPS].x - 7.0).abs() < 1e-12);

        // wide bandwidth leaks mass outside [min, max]
        let mass = density_mass(&dist.density);
        assert!(mass > 0.3 && mass < 1.0, "mass {}", mass);
    }

    #[test]
    fn test_combined_uses_nearest_density_point() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let dist = estimate("x", &values);
        // first bin [0, 2) has midpoint 1.0, which is sample 10 of the density grid
        assert_eq!(dist.combined[0].density, dist.density[10].density);
    }

    #[test]
    fn test_stats_population_std() {
        let stats = SeriesStats::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.n, 8);
        assert!((stats.mean - 5.0).abs() < 0.001);
        assert!((stats.std - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_non_finite_ignored() {
        let dist = estimate("x", &[1.0, f64::NAN, 3.0, f64::INFINITY]);
        assert_eq!(dist.stats.unwrap().n, 2);
    }
}
