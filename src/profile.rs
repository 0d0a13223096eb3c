//! Canonical profiles and the per-kind normalization pipeline.
//!
//! ```text
//!  section ──► open ──► resolve_depth ──► align ──► condition ──► additional_processing
//!              (RawTable)  (Resolved)   (surface=0)  (smooth/avg/cal)   (step expansion)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::config::{parse_plot_label, ProfileConfig};
use crate::data::align::{self, AlignSettings};
use crate::data::condition::{self, ConditionSettings, AVERAGE_CHANNEL};
use crate::data::depth::{self, DepthSettings, Resolved};
use crate::data::layered;
use crate::data::loader::{self, PenetrometerReader};
use crate::data::model::{Header, LayerRecord, ProfileTable, RawTable, SourceFormat, StepPoint};
use crate::data::scale::{self, CategoryScale};
use crate::error::{AtStage, Error, ProfileError, Result, Stage};

/// Optical sensors of the Lyte probe sit this far above the force tip.
pub const LYTE_OPTICAL_OFFSET_CM: f64 = 4.5;

const LYTE_OFFSETS: &[(&str, f64)] = &[
    ("sensor2", LYTE_OPTICAL_OFFSET_CM),
    ("sensor3", LYTE_OPTICAL_OFFSET_CM),
];

// ---------------------------------------------------------------------------
// ProfileKind – the closed set of instruments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    LyteProbe,
    SnowMicroPen,
    HandHardness,
    GrainSize,
    NirPhoto,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 5] = [
        ProfileKind::LyteProbe,
        ProfileKind::SnowMicroPen,
        ProfileKind::HandHardness,
        ProfileKind::GrainSize,
        ProfileKind::NirPhoto,
    ];

    pub fn section_name(self) -> &'static str {
        match self {
            ProfileKind::LyteProbe => "lyte_probe",
            ProfileKind::SnowMicroPen => "snow_micropen",
            ProfileKind::HandHardness => "hand_hardness",
            ProfileKind::GrainSize => "grain_size",
            ProfileKind::NirPhoto => "nir_photo",
        }
    }

    /// Match a section name, ignoring case and underscores.
    pub fn from_section(name: &str) -> Option<Self> {
        let key = |s: &str| s.replace('_', "").to_lowercase();
        let wanted = key(name.trim());
        Self::ALL
            .into_iter()
            .find(|k| key(k.section_name()) == wanted)
    }

    pub fn is_layered(self) -> bool {
        matches!(self, ProfileKind::HandHardness | ProfileKind::GrainSize)
    }

    /// Category scale of layered kinds.
    pub fn scale(self) -> Option<&'static CategoryScale> {
        match self {
            ProfileKind::HandHardness => Some(scale::hand_hardness()),
            ProfileKind::GrainSize => Some(scale::grain_size()),
            _ => None,
        }
    }

    /// Stratigraphy column holding this kind's category.
    fn category_column(self) -> &'static str {
        match self {
            ProfileKind::GrainSize => "grain size",
            _ => "hand hardness",
        }
    }

    pub fn default_column(self) -> &'static str {
        match self {
            ProfileKind::LyteProbe => "sensor1",
            ProfileKind::SnowMicroPen => "force",
            ProfileKind::HandHardness | ProfileKind::GrainSize => "numeric",
            ProfileKind::NirPhoto => "intensity",
        }
    }

    fn default_xlabel(self) -> &'static str {
        match self {
            ProfileKind::LyteProbe => "Sensor response",
            ProfileKind::SnowMicroPen => "Force [N]",
            ProfileKind::HandHardness => "Hand hardness",
            ProfileKind::GrainSize => "Grain size",
            ProfileKind::NirPhoto => "NIR intensity",
        }
    }

    fn channel_offsets(self) -> &'static [(&'static str, f64)] {
        match self {
            ProfileKind::LyteProbe => LYTE_OFFSETS,
            _ => &[],
        }
    }

    // -- pipeline hooks --

    fn open(self, path: &Path, penetrometer: &dyn PenetrometerReader) -> Result<RawTable> {
        match self {
            ProfileKind::LyteProbe => loader::read_lyte(path),
            ProfileKind::SnowMicroPen => loader::read_penetrometer(path, penetrometer),
            ProfileKind::HandHardness | ProfileKind::GrainSize => {
                let scale = self.scale().ok_or_else(|| {
                    Error::Configuration(format!("{self:?} has no category scale"))
                })?;
                loader::read_layered(path, scale, self.category_column())
            }
            ProfileKind::NirPhoto => loader::read_raster(path),
        }
    }

    fn resolve_depth(self, raw: RawTable, settings: &DepthSettings) -> Result<Resolved> {
        match self {
            ProfileKind::LyteProbe => depth::resolve_lyte(raw, settings),
            ProfileKind::SnowMicroPen => depth::resolve_penetrometer(raw),
            ProfileKind::HandHardness | ProfileKind::GrainSize => depth::resolve_layered(raw),
            ProfileKind::NirPhoto => depth::resolve_assumed(raw, settings.assumed_depth),
        }
    }

    fn additional_processing(self, profile: &mut Profile) -> Result<()> {
        if self.is_layered() {
            profile.stepped = Some(layered::expand(&profile.layers)?);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Profile – what the renderer receives
// ---------------------------------------------------------------------------

/// A plot label pinned to the series at `depth`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub label: String,
    pub depth: f64,
    /// `column_to_plot` at the series depth nearest `depth`.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Presentation {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub color: String,
    pub fill_solid: bool,
    pub xlimits: Option<[f64; 2]>,
    pub ylimits: Option<[f64; 2]>,
    pub annotations: Vec<Annotation>,
    pub problem_layer: Option<f64>,
}

/// One normalized instrument profile.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub name: String,
    pub kind: ProfileKind,
    pub source_path: PathBuf,
    pub format: SourceFormat,
    pub header: Header,
    pub header_len: usize,
    /// Offset that was moved to depth 0.
    pub surface_depth: f64,
    pub series: ProfileTable,
    pub column_to_plot: String,
    pub is_layered: bool,
    pub layers: Vec<LayerRecord>,
    pub stepped: Option<Vec<StepPoint>>,
    /// Zero-based subplot index.
    pub plot_id: usize,
    pub presentation: Presentation,
}

impl Profile {
    /// Values of `column_to_plot`, aligned with `series.depth`.
    pub fn plotted(&self) -> &[f64] {
        self.series.channel(&self.column_to_plot).unwrap_or(&[])
    }

    /// Step outline of a layered profile.
    pub fn stepped(&self) -> Option<&[StepPoint]> {
        self.stepped.as_deref()
    }
}

/// Capitalize the first character: `"depth [cm]"` → `"Depth [cm]"`.
pub fn titlize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Expand `~` and anchor relative paths at `base_dir`.
pub fn resolve_path(base_dir: &Path, filename: &Path) -> PathBuf {
    let expanded = match filename.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => filename.to_path_buf(),
        },
        Err(_) => filename.to_path_buf(),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

fn annotate(series: &ProfileTable, column: &str, labels: &[String]) -> Result<Vec<Annotation>> {
    labels
        .iter()
        .map(|entry| {
            let (label, depth) = parse_plot_label(entry)?;
            let value = series
                .nearest_index(depth)
                .and_then(|i| series.channel(column).map(|c| c[i]));
            Ok(Annotation {
                label,
                depth,
                value,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pipeline driver
// ---------------------------------------------------------------------------

/// Inputs the registry decides for a profile on top of its own section.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub base_dir: &'a Path,
    pub penetrometer: &'a dyn PenetrometerReader,
    pub default_color: &'a str,
}

/// Run open → resolve → align → condition → additional processing for one
/// section. `cfg` must already be validated.
pub fn build_profile(
    name: &str,
    kind: ProfileKind,
    cfg: &ProfileConfig,
    ctx: &BuildContext,
) -> std::result::Result<Profile, ProfileError> {
    info!("Building {name} profile");
    let source_path = resolve_path(ctx.base_dir, &cfg.filename);

    let raw = kind.open(&source_path, ctx.penetrometer).at(name, Stage::Open)?;
    let (format, header, header_len) = (raw.format, raw.header.clone(), raw.header_len);

    let Resolved {
        table: mut series,
        surface_depth: detected,
        mut layers,
    } = kind
        .resolve_depth(raw, &cfg.depth_settings())
        .at(name, Stage::DepthResolution)?;

    let surface_depth = cfg.surface_depth.or(detected).unwrap_or(0.0);
    let align_settings = AlignSettings {
        surface_depth,
        bottom_depth: cfg.bottom_depth,
        channel_offsets: kind.channel_offsets(),
    };
    align::align(&mut series, &mut layers, &align_settings);
    if series.is_empty() {
        return Err(ProfileError::new(
            name,
            Stage::SurfaceAlignment,
            Error::Configuration("no samples left after alignment".into()),
        ));
    }

    let column_to_plot = match &cfg.column_to_plot {
        Some(column) => column.to_lowercase(),
        None if cfg.average_columns => AVERAGE_CHANNEL.to_string(),
        None => kind.default_column().to_string(),
    };
    let condition_settings = ConditionSettings {
        smoothing: cfg.smoothing,
        smoothing_center: cfg.smoothing_center,
        average_columns: cfg.average_columns,
        calibration: cfg.calibration_coefficients.as_deref(),
        column_to_plot: &column_to_plot,
    };
    condition::condition(&mut series, &condition_settings).at(name, Stage::Conditioning)?;
    if series.channel(&column_to_plot).is_none() {
        return Err(ProfileError::new(
            name,
            Stage::Conditioning,
            Error::Configuration(format!(
                "column `{column_to_plot}` not in {:?}",
                series.channel_names()
            )),
        ));
    }

    let annotations =
        annotate(&series, &column_to_plot, &cfg.plot_labels).at(name, Stage::Configuration)?;
    let presentation = Presentation {
        title: cfg
            .title
            .clone()
            .unwrap_or_else(|| titlize(&name.replace('_', " "))),
        xlabel: cfg
            .xlabel
            .clone()
            .unwrap_or_else(|| kind.default_xlabel().to_string()),
        ylabel: cfg.ylabel.clone().unwrap_or_else(|| "Depth [cm]".to_string()),
        color: cfg
            .color
            .clone()
            .unwrap_or_else(|| ctx.default_color.to_string()),
        fill_solid: kind.is_layered(),
        xlimits: cfg.xlimits,
        ylimits: cfg.ylimits,
        annotations,
        problem_layer: cfg.problem_layer,
    };

    let mut profile = Profile {
        name: name.to_string(),
        kind,
        source_path,
        format,
        header,
        header_len,
        surface_depth,
        series,
        column_to_plot,
        is_layered: kind.is_layered(),
        layers,
        stepped: None,
        plot_id: cfg.plot_id - 1,
        presentation,
    };
    kind.additional_processing(&mut profile)
        .at(name, Stage::LayerExpansion)?;
    Ok(profile)
}

/// Raw header fields of a profile, flattened to strings for logging.
pub fn header_summary(profile: &Profile) -> BTreeMap<String, String> {
    profile
        .header
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}
