//! Correlation colorizer
//!
//! Lays a named correlation matrix out as an upper-triangular grid. Only cells
//! strictly above the diagonal carry a color; the diagonal shows a self marker
//! and the lower triangle is left empty.

use serde::{Deserialize, Serialize};

use crate::types::CorrelationMatrix;

/// Background for the diagonal and lower triangle
pub const NEUTRAL_COLOR: &str = "#f0f0f0";

/// Text shown on the diagonal
pub const SELF_MARKER: &str = "-";

const WHITE: Rgb = Rgb(255, 255, 255);
const POSITIVE_END: Rgb = Rgb(0, 52, 240);
const NEGATIVE_END: Rgb = Rgb(220, 53, 69);

const CATEGORY_PREFIXES: &[&str] = &["sleep_", "cosinor_", "physical_activity_", "nonparam_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn css(&self) -> String {
        format!("rgb({}, {}, {})", self.0, self.1, self.2)
    }
}

/// Render instruction for one grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellRender {
    SelfMarker,
    Empty,
    Colored {
        /// Raw value, `None` when the matrix held no number
        value: Option<f64>,
        color: Rgb,
    },
}

impl CellRender {
    pub fn background(&self) -> String {
        match self {
            CellRender::SelfMarker | CellRender::Empty => NEUTRAL_COLOR.to_string(),
            CellRender::Colored { color, .. } => color.css(),
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            CellRender::SelfMarker => SELF_MARKER,
            _ => "",
        }
    }
}

fn lerp_channel(from: u8, to: u8, t: f64) -> u8 {
    let from = from as f64;
    let to = to as f64;
    (from - t * (from - to)).round().clamp(0.0, 255.0) as u8
}

/// Diverging scale: white to blue for positive values, white to red for negative.
///
/// Input is clamped to `[-1, 1]`; NaN maps to white.
pub fn color_for(value: f64) -> Rgb {
    let v = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
    let (end, t) = if v >= 0.0 {
        (POSITIVE_END, v)
    } else {
        (NEGATIVE_END, v.abs())
    };
    Rgb(
        lerp_channel(WHITE.0, end.0, t),
        lerp_channel(WHITE.1, end.1, t),
        lerp_channel(WHITE.2, end.2, t),
    )
}

/// Render instruction for `(row, col)`
pub fn cell(matrix: &CorrelationMatrix, row: usize, col: usize) -> CellRender {
    if row == col {
        return CellRender::SelfMarker;
    }
    if row > col {
        return CellRender::Empty;
    }
    let value = matrix.get(row, col);
    CellRender::Colored {
        value,
        color: color_for(value.unwrap_or(0.0)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationGrid {
    pub features: Vec<String>,
    pub labels: Vec<String>,
    pub cells: Vec<Vec<CellRender>>,
}

/// Full grid in matrix order
pub fn render(matrix: &CorrelationMatrix) -> CorrelationGrid {
    let n = matrix.len();
    CorrelationGrid {
        features: matrix.features.clone(),
        labels: matrix.features.iter().map(|f| display_name(f)).collect(),
        cells: (0..n)
            .map(|row| (0..n).map(|col| cell(matrix, row, col)).collect())
            .collect(),
    }
}

/// Axis label for a feature key.
///
/// Drops one category prefix, turns underscores into spaces and capitalizes
/// all-lowercase words. MESOR stays upper case.
pub fn display_name(feature: &str) -> String {
    match feature {
        "cosinorage" | "cosinor_cosinorage" => return "Cosinorage".to_string(),
        "cosinorage_advance" => return "Cosinorage Advance".to_string(),
        _ => {}
    }
    let stripped = CATEGORY_PREFIXES
        .iter()
        .find_map(|p| feature.strip_prefix(p))
        .unwrap_or(feature);
    let spaced = stripped.replace('_', " ");
    let lower = spaced.to_lowercase();
    if lower == "mesor" {
        return "MESOR".to_string();
    }
    if lower.contains("acrophase") && lower.contains("time") {
        return "Acrophase Time".to_string();
    }
    spaced
        .split(' ')
        .map(|word| {
            if word.eq_ignore_ascii_case("mesor") {
                "MESOR".to_string()
            } else if word == word.to_lowercase() {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
