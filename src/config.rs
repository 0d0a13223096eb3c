//! Typed configuration consumed by the profile pipeline.
//!
//! The caller hands over an already-validated mapping of section name →
//! section body (`serde_json::Map`). Data sections deserialize into
//! [`ProfileConfig`]; a closed set of control sections is recognized and
//! otherwise left to the renderer.

use std::path::PathBuf;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::data::depth::{DepthMethod, DepthSettings, EventThresholds};
use crate::error::{Error, Result};

/// Section name → section body.
pub type Sections = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Control sections
// ---------------------------------------------------------------------------

/// Sections that configure the figure rather than describe a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSection {
    Output,
    Labeling,
    Plotting,
}

impl ControlSection {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "output" => Some(ControlSection::Output),
            "labeling" => Some(ControlSection::Labeling),
            "plotting" => Some(ControlSection::Plotting),
            _ => None,
        }
    }
}

/// The part of the `output` section the core cares about. Everything else
/// (dpi, file names, ...) belongs to the renderer and is ignored here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Number of subplots; defaults to one per data section.
    #[serde(default)]
    pub num_subplots: Option<usize>,
}

impl OutputConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        OutputConfig::deserialize(value)
            .map_err(|e| Error::Configuration(format!("output section: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Profile sections
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum Coefficients {
    List(Vec<f64>),
    Text(String),
}

/// Accept `[a, b, c]` as well as `"a, b, c"`.
fn coefficients<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Vec<f64>>, D::Error> {
    match Option::<Coefficients>::deserialize(d)? {
        None => Ok(None),
        Some(Coefficients::List(v)) => Ok(Some(v)),
        Some(Coefficients::Text(s)) => s
            .split(',')
            .map(|t| {
                t.trim()
                    .parse::<f64>()
                    .map_err(|_| D::Error::custom(format!("'{}' is not a coefficient", t.trim())))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Some),
    }
}

/// One data section. Optional keys default to "step skipped".
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    /// Raw input; `~` and relative paths are resolved by the registry.
    pub filename: PathBuf,
    /// 1-based subplot index.
    pub plot_id: usize,
    pub column_to_plot: Option<String>,

    /// Moving-average window in samples.
    pub smoothing: Option<usize>,
    #[serde(default)]
    pub smoothing_center: bool,
    #[serde(default)]
    pub average_columns: bool,
    /// Highest degree first.
    #[serde(default, deserialize_with = "coefficients")]
    pub calibration_coefficients: Option<Vec<f64>>,

    /// Total depth for instruments without a depth axis (cm, or m if < 2).
    pub assumed_depth: Option<f64>,
    pub surface_depth: Option<f64>,
    pub bottom_depth: Option<f64>,
    #[serde(default)]
    pub depth_method: DepthMethod,
    #[serde(default)]
    pub autocrop: bool,
    pub fractional_basis: Option<f64>,
    pub start_threshold: Option<f64>,
    pub stop_threshold: Option<f64>,
    pub surface_threshold: Option<f64>,

    /// `"label > depth"` annotations.
    #[serde(default)]
    pub plot_labels: Vec<String>,
    pub problem_layer: Option<f64>,
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub color: Option<String>,
    pub xlimits: Option<[f64; 2]>,
    pub ylimits: Option<[f64; 2]>,
}

impl ProfileConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        ProfileConfig::deserialize(value).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Checks serde cannot express.
    pub fn validate(&self, num_subplots: usize) -> Result<()> {
        if self.plot_id == 0 || self.plot_id > num_subplots {
            return Err(Error::Configuration(format!(
                "plot_id {} is outside 1..={num_subplots}",
                self.plot_id
            )));
        }
        if self.smoothing == Some(0) {
            return Err(Error::Configuration("smoothing window must be positive".into()));
        }
        if let Some(basis) = self.fractional_basis {
            if !(basis > 0.0 && basis <= 1.0) {
                return Err(Error::Configuration(format!(
                    "fractional_basis {basis} is outside (0, 1]"
                )));
            }
        }
        for label in &self.plot_labels {
            parse_plot_label(label)?;
        }
        Ok(())
    }

    pub fn thresholds(&self) -> EventThresholds {
        let d = EventThresholds::default();
        EventThresholds {
            fractional_basis: self.fractional_basis.unwrap_or(d.fractional_basis),
            start_threshold: self.start_threshold.unwrap_or(d.start_threshold),
            stop_threshold: self.stop_threshold.unwrap_or(d.stop_threshold),
            surface_threshold: self.surface_threshold.unwrap_or(d.surface_threshold),
        }
    }

    pub fn depth_settings(&self) -> DepthSettings {
        DepthSettings {
            method: self.depth_method,
            assumed_depth: self.assumed_depth,
            autocrop: self.autocrop,
            thresholds: self.thresholds(),
        }
    }
}

/// Parse `"(label > depth)"` into its label and depth.
pub fn parse_plot_label(entry: &str) -> Result<(String, f64)> {
    let cleaned: String = entry.chars().filter(|c| !matches!(c, '(' | ')')).collect();
    let (label, depth) = cleaned.split_once('>').ok_or_else(|| {
        Error::Configuration(format!("plot label '{entry}' is not `label > depth`"))
    })?;
    let depth = depth
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::Configuration(format!("plot label '{entry}' has no numeric depth")))?;
    Ok((label.trim().to_string(), depth))
}
