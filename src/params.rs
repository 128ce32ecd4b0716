//! Processing parameters
//!
//! Preprocessing and feature-extraction knobs as the user edits them. Numeric
//! fields hold either a parsed number or the raw text the user typed, so an
//! unparsable entry stays visible for correction instead of becoming zero.
//! Coercion to numbers happens once, at submission.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::LabError;

/// Unsigned decimal or scientific notation, partial input allowed
const EDIT_GRAMMAR: &str = r"^(\d*\.?\d*|\d+\.?\d*)([eE][-+]?\d+)?$";

fn edit_grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| Regex::new(EDIT_GRAMMAR).expect("edit grammar is a valid regex"))
}

/// A numeric field under edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    Value(f64),
    /// Text that matched the grammar but is not yet a number (e.g. `""`, `"."`)
    Pending(String),
}

impl From<f64> for NumericInput {
    fn from(value: f64) -> Self {
        NumericInput::Value(value)
    }
}

impl NumericInput {
    /// Apply a keystroke-level edit. Text outside the grammar is rejected and the
    /// previous value kept.
    pub fn edit(&mut self, raw: &str) -> Result<(), LabError> {
        if !edit_grammar().is_match(raw) {
            return Err(LabError::InputRejected(format!(
                "'{}' is not an unsigned decimal number",
                raw
            )));
        }
        *self = match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => NumericInput::Value(v),
            _ => NumericInput::Pending(raw.to_string()),
        };
        Ok(())
    }

    pub fn coerce(&self, field: &str) -> Result<f64, LabError> {
        match self {
            NumericInput::Value(v) => Ok(*v),
            NumericInput::Pending(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    LabError::InputRejected(format!("{} must be a number, got '{}'", field, raw))
                }),
        }
    }

    pub fn display(&self) -> String {
        match self {
            NumericInput::Value(v) => v.to_string(),
            NumericInput::Pending(raw) => raw.clone(),
        }
    }
}

/// Band-pass configuration of the preprocessing filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
}

/// Preprocessing knobs as edited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessParams {
    pub autocalib_sd_criter: NumericInput,
    pub autocalib_sphere_crit: NumericInput,
    pub filter_type: FilterType,
    pub filter_cutoff: NumericInput,
    #[serde(alias = "wear_sd_criter")]
    pub wear_sd_crit: NumericInput,
    pub wear_range_crit: NumericInput,
    pub wear_window_length: NumericInput,
    pub wear_window_skip: NumericInput,
    /// Minimum fraction of a day that must be covered by data
    pub required_daily_coverage: NumericInput,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            autocalib_sd_criter: 0.00013.into(),
            autocalib_sphere_crit: 0.02.into(),
            filter_type: FilterType::Lowpass,
            filter_cutoff: 2.0.into(),
            wear_sd_crit: 0.00013.into(),
            wear_range_crit: 0.00067.into(),
            wear_window_length: 45.0.into(),
            wear_window_skip: 7.0.into(),
            required_daily_coverage: 0.5.into(),
        }
    }
}

/// Feature-extraction knobs as edited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureParams {
    pub sleep_rescore: bool,
    pub sleep_ck_sf: NumericInput,
    /// Sedentary/light cutpoint
    pub pa_cutpoint_sl: NumericInput,
    /// Light/moderate cutpoint
    pub pa_cutpoint_lm: NumericInput,
    /// Moderate/vigorous cutpoint
    pub pa_cutpoint_mv: NumericInput,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            sleep_rescore: true,
            sleep_ck_sf: 0.0025.into(),
            pa_cutpoint_sl: 15.0.into(),
            pa_cutpoint_lm: 35.0.into(),
            pa_cutpoint_mv: 70.0.into(),
        }
    }
}

/// Coerced `preprocess_args` wire body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessArgs {
    pub autocalib_sd_criter: f64,
    pub autocalib_sphere_crit: f64,
    pub filter_type: FilterType,
    pub filter_cutoff: f64,
    #[serde(alias = "wear_sd_criter")]
    pub wear_sd_crit: f64,
    pub wear_range_crit: f64,
    pub wear_window_length: f64,
    pub wear_window_skip: f64,
    pub required_daily_coverage: f64,
}

/// Coerced `features_args` wire body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureArgs {
    pub sleep_rescore: bool,
    pub sleep_ck_sf: f64,
    pub pa_cutpoint_sl: f64,
    pub pa_cutpoint_lm: f64,
    pub pa_cutpoint_mv: f64,
}

/// Full parameter set carried by a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParameters {
    pub preprocess: PreprocessParams,
    pub features: FeatureParams,
}

impl ProcessingParameters {
    /// Edit a numeric field by its wire name
    pub fn edit(&mut self, field: &str, raw: &str) -> Result<(), LabError> {
        let slot = match field {
            "autocalib_sd_criter" => &mut self.preprocess.autocalib_sd_criter,
            "autocalib_sphere_crit" => &mut self.preprocess.autocalib_sphere_crit,
            "filter_cutoff" => &mut self.preprocess.filter_cutoff,
            "wear_sd_crit" | "wear_sd_criter" => &mut self.preprocess.wear_sd_crit,
            "wear_range_crit" => &mut self.preprocess.wear_range_crit,
            "wear_window_length" => &mut self.preprocess.wear_window_length,
            "wear_window_skip" => &mut self.preprocess.wear_window_skip,
            "required_daily_coverage" => &mut self.preprocess.required_daily_coverage,
            "sleep_ck_sf" => &mut self.features.sleep_ck_sf,
            "pa_cutpoint_sl" => &mut self.features.pa_cutpoint_sl,
            "pa_cutpoint_lm" => &mut self.features.pa_cutpoint_lm,
            "pa_cutpoint_mv" => &mut self.features.pa_cutpoint_mv,
            other => {
                return Err(LabError::InputRejected(format!(
                    "Unknown parameter: {}",
                    other
                )))
            }
        };
        slot.edit(raw)
    }

    /// Coerce every field for submission
    pub fn to_args(&self) -> Result<(PreprocessArgs, FeatureArgs), LabError> {
        let p = &self.preprocess;
        let preprocess = PreprocessArgs {
            autocalib_sd_criter: p.autocalib_sd_criter.coerce("autocalib_sd_criter")?,
            autocalib_sphere_crit: p.autocalib_sphere_crit.coerce("autocalib_sphere_crit")?,
            filter_type: p.filter_type,
            filter_cutoff: p.filter_cutoff.coerce("filter_cutoff")?,
            wear_sd_crit: p.wear_sd_crit.coerce("wear_sd_crit")?,
            wear_range_crit: p.wear_range_crit.coerce("wear_range_crit")?,
            wear_window_length: p.wear_window_length.coerce("wear_window_length")?,
            wear_window_skip: p.wear_window_skip.coerce("wear_window_skip")?,
            required_daily_coverage: p
                .required_daily_coverage
                .coerce("required_daily_coverage")?,
        };
        if !(0.0..=1.0).contains(&preprocess.required_daily_coverage) {
            return Err(LabError::InputRejected(format!(
                "required_daily_coverage must be between 0 and 1, got {}",
                preprocess.required_daily_coverage
            )));
        }

        let f = &self.features;
        let features = FeatureArgs {
            sleep_rescore: f.sleep_rescore,
            sleep_ck_sf: f.sleep_ck_sf.coerce("sleep_ck_sf")?,
            pa_cutpoint_sl: f.pa_cutpoint_sl.coerce("pa_cutpoint_sl")?,
            pa_cutpoint_lm: f.pa_cutpoint_lm.coerce("pa_cutpoint_lm")?,
            pa_cutpoint_mv: f.pa_cutpoint_mv.coerce("pa_cutpoint_mv")?,
        };
        if !(features.pa_cutpoint_sl < features.pa_cutpoint_lm
            && features.pa_cutpoint_lm < features.pa_cutpoint_mv)
        {
            return Err(LabError::InputRejected(format!(
                "Activity cutpoints must be ascending, got {} / {} / {}",
                features.pa_cutpoint_sl, features.pa_cutpoint_lm, features.pa_cutpoint_mv
            )));
        }

        Ok((preprocess, features))
    }
}
