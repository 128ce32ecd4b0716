//! Time-band alignment
//!
//! Groups a per-sample series into device-local calendar days and derives the
//! highlighted ranges drawn over it: wear runs, sleep runs and the fixed-length
//! M10/L5 activity windows.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LabConfig;
use crate::error::LabError;
use crate::types::{parse_local_timestamp, FeatureResult, Sample};

/// Per-day metrics reported one value per night, starting at the first sample's day
const SEQUENTIAL_DAY_FEATURES: &[&str] = &["TST", "WASO", "PTA", "NWB", "SOL", "RA"];

/// Samples of one local calendar day, sorted by time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayGroup {
    pub date: NaiveDate,
    pub samples: Vec<Sample>,
}

impl DayGroup {
    /// `YYYY-MM-DD`
    pub fn label(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Time-ordered copy of a per-sample series
pub fn sorted_samples(samples: &[Sample]) -> Vec<Sample> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);
    sorted
}

/// Group samples by local date, earliest day first
pub fn group_by_day(samples: &[Sample]) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for sample in sorted_samples(samples) {
        let date = sample.timestamp.date();
        match groups.last_mut() {
            Some(group) if group.date == date => group.samples.push(sample),
            _ => groups.push(DayGroup {
                date,
                samples: vec![sample],
            }),
        }
    }
    groups
}

/// Closed range `[start, end]` between the first and last sample of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub value: f64,
}

/// One band per maximal run of equal marker values over `samples` in the
/// order given; callers pass a time-sorted series.
///
/// Samples without a marker break runs and emit nothing; runs whose value
/// equals `sentinel` are dropped.
pub fn marker_runs<F>(samples: &[Sample], marker: F, sentinel: Option<f64>) -> Vec<Band>
where
    F: Fn(&Sample) -> Option<f64>,
{
    let mut bands = Vec::new();
    let mut current: Option<(f64, NaiveDateTime, NaiveDateTime)> = None;

    let close = |run: Option<(f64, NaiveDateTime, NaiveDateTime)>, bands: &mut Vec<Band>| {
        if let Some((value, start, end)) = run {
            if sentinel != Some(value) {
                bands.push(Band { start, end, value });
            }
        }
    };

    for sample in samples {
        let value = marker(sample);
        current = match (current, value) {
            (Some((v, start, _)), Some(next)) if v == next => Some((v, start, sample.timestamp)),
            (run, next) => {
                close(run, &mut bands);
                next.map(|v| (v, sample.timestamp, sample.timestamp))
            }
        };
    }
    close(current, &mut bands);
    bands
}

/// Wear/non-wear runs over the whole recording, skipping the unknown state
pub fn wear_bands(samples: &[Sample], sentinel: f64) -> Vec<Band> {
    marker_runs(samples, |s| s.wear, Some(sentinel))
}

/// Runs of `sleep == 1`
pub fn sleep_bands(samples: &[Sample]) -> Vec<Band> {
    marker_runs(samples, |s| s.sleep, None)
        .into_iter()
        .filter(|b| b.value == 1.0)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityWindowKind {
    M10,
    L5,
}

impl ActivityWindowKind {
    pub fn hours(&self) -> i64 {
        match self {
            ActivityWindowKind::M10 => 10,
            ActivityWindowKind::L5 => 5,
        }
    }

    /// Key of the start-time array under `nonparam`
    pub fn start_key(&self) -> &'static str {
        match self {
            ActivityWindowKind::M10 => "M10_start",
            ActivityWindowKind::L5 => "L5_start",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub kind: ActivityWindowKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Fixed-length window from `start`, clipped to the start's calendar day.
///
/// An end landing on the next midnight is pulled back by one sample unit.
pub fn fixed_band(
    kind: ActivityWindowKind,
    start: NaiveDateTime,
    sample_unit: Duration,
) -> ActivityWindow {
    let next_midnight = start
        .date()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MAX);
    let naive_end = start + Duration::hours(kind.hours());
    let mut end = naive_end.min(next_midnight);
    if end == next_midnight {
        end = (end - sample_unit).max(start);
    }
    ActivityWindow { kind, start, end }
}

const TIME_OF_DAY_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

/// Resolve a start marker that is either a full timestamp or a time of day on `day`
pub fn resolve_start_marker(raw: &str, day: NaiveDate) -> Result<NaiveDateTime, LabError> {
    let trimmed = raw.trim();
    if trimmed.contains('T') {
        return parse_local_timestamp(trimmed);
    }
    TIME_OF_DAY_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
        .map(|time| day.and_time(time))
        .ok_or_else(|| LabError::ParseError(format!("Unrecognized start marker: {}", raw)))
}

fn start_marker(result: &FeatureResult, kind: ActivityWindowKind, index: usize) -> Option<&str> {
    let key = kind.start_key();
    result
        .feature("nonparam", key)
        .or_else(|| result.feature("nonparam", &key.to_lowercase()))
        .and_then(|series| series.at(index))
        .and_then(|v| v.as_str())
}

/// Overlays for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayOverlay {
    pub date: NaiveDate,
    pub label: String,
    pub samples: Vec<Sample>,
    pub sleep: Vec<Band>,
    pub m10: Option<ActivityWindow>,
    pub l5: Option<ActivityWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignedRecording {
    pub wear: Vec<Band>,
    pub days: Vec<DayOverlay>,
}

/// Align a processed recording to calendar days.
///
/// The `n`th start marker belongs to the `n`th day. A malformed marker leaves
/// that window out rather than failing the whole recording.
pub fn align(result: &FeatureResult, config: &LabConfig) -> AlignedRecording {
    let sample_unit = config.sample_unit();
    let sorted = sorted_samples(&result.data);
    let days = group_by_day(&sorted)
        .into_iter()
        .enumerate()
        .map(|(index, group)| {
            let window = |kind: ActivityWindowKind| {
                let raw = start_marker(result, kind, index)?;
                match resolve_start_marker(raw, group.date) {
                    Ok(start) => Some(fixed_band(kind, start, sample_unit)),
                    Err(err) => {
                        debug!(day = index, error = %err, "start marker skipped");
                        None
                    }
                }
            };
            DayOverlay {
                date: group.date,
                label: group.label(),
                sleep: sleep_bands(&group.samples),
                m10: window(ActivityWindowKind::M10),
                l5: window(ActivityWindowKind::L5),
                samples: group.samples,
            }
        })
        .collect();

    AlignedRecording {
        wear: wear_bands(&sorted, config.wear_sentinel),
        days,
    }
}

fn date_part(raw: &str) -> Option<&str> {
    raw.split_once('T').map(|(date, _)| date)
}

/// Label for the `index`th value of a per-day feature array
pub fn day_label_for_index(key: &str, index: usize, result: &FeatureResult) -> String {
    let window = match key {
        "M10" => Some(ActivityWindowKind::M10),
        "L5" => Some(ActivityWindowKind::L5),
        _ => None,
    };
    if let Some(date) = window
        .and_then(|kind| start_marker(result, kind, index))
        .and_then(date_part)
    {
        return date.to_string();
    }

    let upper = key.to_uppercase();
    if SEQUENTIAL_DAY_FEATURES.contains(&upper.as_str()) {
        if let Some(first) = result.data.iter().map(|s| s.timestamp).min() {
            let date = first.date() + Duration::days(index as i64);
            return date.format("%Y-%m-%d").to_string();
        }
    }

    match result.data.get(index) {
        Some(sample) => sample.timestamp.date().format("%Y-%m-%d").to_string(),
        None => format!("Day {}", index + 1),
    }
}

/// A per-day feature array paired with its day labels
pub fn labelled_daily_values(
    result: &FeatureResult,
    category: &str,
    key: &str,
) -> Vec<(String, Option<f64>)> {
    let Some(series) = result.feature(category, key) else {
        return Vec::new();
    };
    (0..series.len())
        .filter_map(|i| series.at(i).map(|v| (day_label_for_index(key, i, result), v.as_f64())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_local_timestamp(raw).unwrap()
    }

    fn sample(raw: &str) -> Sample {
        Sample {
            timestamp: ts(raw),
            enmo: Some(0.01),
            wear: None,
            sleep: None,
            cosinor_fitted: None,
        }
    }

    fn with_wear(raw: &str, wear: f64) -> Sample {
        Sample {
            wear: Some(wear),
            ..sample(raw)
        }
    }

    fn with_sleep(raw: &str, sleep: f64) -> Sample {
        Sample {
            sleep: Some(sleep),
            ..sample(raw)
        }
    }

    #[test]
    fn test_group_by_local_day() {
        let samples = vec![
            sample("2024-03-02T00:10:00"),
            sample("2024-03-01T23:50:00"),
            sample("2024-03-01T23:40:00"),
            // offset picks the local reading, not the UTC date
            sample("2024-03-02T23:30:00-05:00"),
        ];
        let groups = group_by_day(&samples);
        let labels: Vec<String> = groups.iter().map(|g| g.label()).collect();
        assert_eq!(labels, vec!["2024-03-01", "2024-03-02"]);
        assert_eq!(groups[0].samples.len(), 2);
        assert_eq!(groups[0].samples[0].timestamp, ts("2024-03-01T23:40:00"));
        assert_eq!(groups[1].samples[1].timestamp, ts("2024-03-02T23:30:00"));
    }

    #[test]
    fn test_wear_runs_skip_sentinel() {
        let samples = vec![
            with_wear("2024-03-01T00:00:00", -1.0),
            with_wear("2024-03-01T00:01:00", -1.0),
            with_wear("2024-03-01T00:02:00", 1.0),
            with_wear("2024-03-01T00:03:00", 1.0),
            with_wear("2024-03-01T00:04:00", 0.0),
        ];
        let bands = wear_bands(&samples, -1.0);
        assert_eq!(
            bands,
            vec![
                Band {
                    start: ts("2024-03-01T00:02:00"),
                    end: ts("2024-03-01T00:03:00"),
                    value: 1.0,
                },
                Band {
                    start: ts("2024-03-01T00:04:00"),
                    end: ts("2024-03-01T00:04:00"),
                    value: 0.0,
                },
            ]
        );
    }

    #[test]
    fn test_sleep_runs() {
        let samples = vec![
            with_sleep("2024-03-01T01:00:00", 0.0),
            with_sleep("2024-03-01T01:01:00", 1.0),
            with_sleep("2024-03-01T01:02:00", 1.0),
            with_sleep("2024-03-01T01:03:00", 0.0),
            with_sleep("2024-03-01T01:04:00", 1.0),
        ];
        let bands = sleep_bands(&samples);
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].start, ts("2024-03-01T01:01:00"));
        assert_eq!(bands[0].end, ts("2024-03-01T01:02:00"));
        assert_eq!(bands[1].start, bands[1].end);
    }

    #[test]
    fn test_m10_late_start_stays_in_day() {
        let band = fixed_band(
            ActivityWindowKind::M10,
            ts("2024-03-01T23:30:00"),
            Duration::seconds(60),
        );
        assert_eq!(band.end, ts("2024-03-01T23:59:00"));
        assert!(band.end < ts("2024-03-02T00:00:00"));
        assert_eq!(band.start.date(), band.end.date());
    }

    #[test]
    fn test_band_ending_at_midnight_is_shortened() {
        let band = fixed_band(
            ActivityWindowKind::L5,
            ts("2024-03-01T19:00:00"),
            Duration::seconds(60),
        );
        assert_eq!(band.end, ts("2024-03-01T23:59:00"));

        let band = fixed_band(
            ActivityWindowKind::L5,
            ts("2024-03-01T02:15:00"),
            Duration::seconds(60),
        );
        assert_eq!(band.end, ts("2024-03-01T07:15:00"));
    }

    #[test]
    fn test_start_marker_forms() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            resolve_start_marker("14:30", day).unwrap(),
            ts("2024-03-01T14:30:00")
        );
        assert_eq!(
            resolve_start_marker("2024-02-29T03:00:00", day).unwrap(),
            ts("2024-02-29T03:00:00")
        );
        assert!(resolve_start_marker("soon", day).is_err());
    }

    fn recording() -> FeatureResult {
        serde_json::from_value(serde_json::json!({
            "features": {
                "nonparam": {
                    "M10": [0.05, 0.06],
                    "M10_start": ["2024-03-01T09:00:00", "23:30"],
                    "L5_start": ["02:00:00", "bogus"]
                },
                "sleep": {"TST": [400, 380, 390]}
            },
            "data": [
                {"TIMESTAMP": "2024-03-01T08:00:00", "ENMO": 0.01, "wear": 1, "sleep": 0},
                {"TIMESTAMP": "2024-03-01T08:01:00", "ENMO": 0.02, "wear": 1, "sleep": 1},
                {"TIMESTAMP": "2024-03-02T08:00:00", "ENMO": 0.03, "wear": -1, "sleep": 0}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_align_recording() {
        let aligned = align(&recording(), &LabConfig::default());
        assert_eq!(aligned.days.len(), 2);
        assert_eq!(aligned.wear.len(), 1);

        let first = &aligned.days[0];
        assert_eq!(first.label, "2024-03-01");
        assert_eq!(first.sleep.len(), 1);
        assert_eq!(first.m10.unwrap().end, ts("2024-03-01T19:00:00"));
        assert_eq!(first.l5.unwrap().start, ts("2024-03-01T02:00:00"));

        let second = &aligned.days[1];
        assert_eq!(second.m10.unwrap().end, ts("2024-03-02T23:59:00"));
        assert_eq!(second.l5, None);
    }

    #[test]
    fn test_align_unsorted_recording() {
        let result: FeatureResult = serde_json::from_value(serde_json::json!({
            "features": {
                "nonparam": {"M10_start": ["2024-03-01T09:00:00", "2024-03-02T10:00:00"]}
            },
            "data": [
                {"TIMESTAMP": "2024-03-02T08:00:00", "wear": 1},
                {"TIMESTAMP": "2024-03-01T08:00:00", "wear": 1},
                {"TIMESTAMP": "2024-03-01T08:01:00", "wear": 1}
            ]
        }))
        .unwrap();
        let aligned = align(&result, &LabConfig::default());

        let labels: Vec<&str> = aligned.days.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-03-01", "2024-03-02"]);
        assert_eq!(aligned.days[0].m10.unwrap().start, ts("2024-03-01T09:00:00"));
        assert_eq!(aligned.days[1].m10.unwrap().start, ts("2024-03-02T10:00:00"));
        assert_eq!(
            aligned.wear,
            vec![Band {
                start: ts("2024-03-01T08:00:00"),
                end: ts("2024-03-02T08:00:00"),
                value: 1.0,
            }]
        );
        assert!(aligned.wear.iter().all(|b| b.start <= b.end));
    }

    #[test]
    fn test_day_labels() {
        let result = recording();
        assert_eq!(day_label_for_index("M10", 0, &result), "2024-03-01");
        // time-of-day marker carries no date, falls back to the sample
        assert_eq!(day_label_for_index("M10", 1, &result), "2024-03-01");
        assert_eq!(day_label_for_index("tst", 2, &result), "2024-03-03");
        assert_eq!(day_label_for_index("IS", 2, &result), "2024-03-02");
        assert_eq!(day_label_for_index("IS", 5, &result), "Day 6");
    }

    #[test]
    fn test_labelled_daily_values() {
        let values = labelled_daily_values(&recording(), "sleep", "TST");
        assert_eq!(
            values,
            vec![
                ("2024-03-01".to_string(), Some(400.0)),
                ("2024-03-02".to_string(), Some(380.0)),
                ("2024-03-03".to_string(), Some(390.0)),
            ]
        );
    }
}
