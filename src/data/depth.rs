//! Depth assignment: turns a raw sample axis into centimeters below the
//! snow surface (non-positive, downward-negative).

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::model::{LayerRecord, ProfileTable, RawTable, SourceFormat};
use crate::error::{Error, Result};

/// Standard gravity in cm/s².
const GRAVITY_CM: f64 = 980.665;

const ACCELERATION: &[&str] = &["acceleration", "acc", "z-axis"];
const AMBIENT: &[&str] = &["sensor2", "sensor_2", "ambient"];
const ACTIVE: &[&str] = &["sensor3", "sensor_3", "active"];
const SAMPLE_RATE_KEYS: &[&str] = &["sample rate", "samplerate", "sampling rate"];

/// Columns that index samples rather than measure snow.
const INDEX_COLUMNS: &[&str] = &["depth", "sample", "time", "distance", "row"];

/// How the depth of an event-detected profile is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthMethod {
    /// Use the depth recorded by the instrument.
    #[default]
    Raw,
    /// Double-integrate the acceleration channel.
    Acc,
    /// Mean of `Raw` and `Acc`.
    Avg,
}

/// Thresholds of the motion/surface event heuristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventThresholds {
    /// Fraction of samples averaged into each baseline.
    pub fractional_basis: f64,
    pub start_threshold: f64,
    pub stop_threshold: f64,
    pub surface_threshold: f64,
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            fractional_basis: 0.01,
            start_threshold: 0.1,
            stop_threshold: 0.7,
            surface_threshold: 0.02,
        }
    }
}

/// Per-profile inputs to depth resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthSettings {
    pub method: DepthMethod,
    pub assumed_depth: Option<f64>,
    pub autocrop: bool,
    pub thresholds: EventThresholds,
}

/// Output of depth resolution.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub table: ProfileTable,
    /// Depth of the snow surface when it was detected from the signal.
    pub surface_depth: Option<f64>,
    pub layers: Vec<LayerRecord>,
}

/// Sample indices located by event detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIndices {
    pub start: usize,
    pub stop: usize,
    pub surface: usize,
}

// ---------------------------------------------------------------------------
// Simple axes
// ---------------------------------------------------------------------------

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn nan_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max)
}

fn nan_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Depth from a travel record that only stores percent travel: a linear
/// sequence from 0 to `-max(travel) / 100`.
pub fn linear_travel_depth(travel: &[f64]) -> Vec<f64> {
    let max = nan_max(travel);
    let end = if max.is_finite() { -max / 100.0 } else { 0.0 };
    linspace(0.0, end, travel.len())
}

/// Penetrometer travel (mm, increasing) to depth (cm, decreasing).
pub fn distance_to_depth(distance: &[f64]) -> Vec<f64> {
    distance.iter().map(|d| -d / 10.0).collect()
}

/// Coerce a user-supplied total depth to negative centimeters.
///
/// Magnitudes under 2 are taken to be meters. A real depth of, say, -1.5 cm
/// is indistinguishable from -1.5 m here, hence the warning.
pub fn normalize_assumed_depth(value: f64) -> f64 {
    let mut depth = value;
    if depth.abs() < 2.0 {
        warn!("assumed_depth {value} is under 2, interpreting it as meters");
        depth *= 100.0;
    }
    if depth > 0.0 {
        depth = -depth;
    }
    depth
}

/// Invert snow heights measured from the ground up into depths below the
/// top of the snowpack. Returns whether anything was inverted.
pub fn invert_snow_height(records: &mut [LayerRecord]) -> bool {
    let depths = records
        .iter()
        .flat_map(|r| [r.top_depth, r.bottom_depth, r.depth]);
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for d in depths {
        min = min.min(d);
        max = max.max(d);
    }
    if records.is_empty() || min < 0.0 || max <= 0.0 {
        return false;
    }
    debug!("Positive snow height, inverting to negative");
    for r in records.iter_mut() {
        r.map_depths(|d| d - max);
    }
    true
}

// ---------------------------------------------------------------------------
// Event detection
// ---------------------------------------------------------------------------

fn basis_len(n: usize, fractional_basis: f64) -> usize {
    ((n as f64 * fractional_basis).ceil() as usize).clamp(1, n.max(1))
}

/// First sample departing from the starting baseline by more than
/// `threshold`, or 0 when the signal never moves.
pub fn acceleration_start(acc: &[f64], fractional_basis: f64, threshold: f64) -> usize {
    if acc.is_empty() {
        return 0;
    }
    let baseline = nan_mean(&acc[..basis_len(acc.len(), fractional_basis)]);
    acc.iter()
        .position(|a| (a - baseline).abs() > threshold)
        .unwrap_or(0)
}

/// First sample at or after `start` from which the signal stays within
/// `threshold` of the ending baseline.
pub fn acceleration_stop(acc: &[f64], fractional_basis: f64, threshold: f64, start: usize) -> usize {
    let n = acc.len();
    if n == 0 {
        return 0;
    }
    let baseline = nan_mean(&acc[n - basis_len(n, fractional_basis)..]);
    (start..n)
        .rev()
        .find(|&i| (acc[i] - baseline).abs() > threshold)
        .map_or(start, |i| (i + 1).min(n - 1))
}

/// Index in `[start, stop]` where the normalized ambient-minus-active
/// optical difference first drops below `threshold`.
pub fn nir_surface(
    ambient: &[f64],
    active: &[f64],
    start: usize,
    stop: usize,
    threshold: f64,
) -> Option<usize> {
    let end = stop.min(ambient.len().min(active.len()).checked_sub(1)?);
    if start > end {
        return None;
    }
    let diff: Vec<f64> = (start..=end).map(|i| ambient[i] - active[i]).collect();
    let scale = diff
        .iter()
        .filter(|d| d.is_finite())
        .fold(0.0_f64, |m, d| m.max(d.abs()));
    if scale == 0.0 {
        return None;
    }
    diff.iter()
        .position(|d| d / scale < threshold)
        .map(|rel| rel + start)
}

/// Locate start of motion, end of motion and the snow surface.
pub fn detect_events(
    acc: &[f64],
    ambient: &[f64],
    active: &[f64],
    thresholds: &EventThresholds,
) -> Result<EventIndices> {
    let start = acceleration_start(acc, thresholds.fractional_basis, thresholds.start_threshold);
    let stop = acceleration_stop(
        acc,
        thresholds.fractional_basis,
        thresholds.stop_threshold,
        start,
    );
    let surface = nir_surface(ambient, active, start, stop, thresholds.surface_threshold)
        .ok_or_else(|| {
            Error::DepthResolution(format!(
                "no snow surface found between samples {start} and {stop}"
            ))
        })?;
    debug!("Motion from sample {start} to {stop}, surface at {surface}");
    Ok(EventIndices {
        start,
        stop,
        surface,
    })
}

/// Double-integrate acceleration (in g) between `start` and `stop` into a
/// depth in cm. The probe is at rest before `start` and after `stop`.
pub fn integrate_acceleration(
    acc: &[f64],
    time: &[f64],
    start: usize,
    stop: usize,
    fractional_basis: f64,
) -> Vec<f64> {
    let n = acc.len().min(time.len());
    if n == 0 {
        return Vec::new();
    }
    let baseline = nan_mean(&acc[..basis_len(n, fractional_basis)]);
    let accel: Vec<f64> = (0..n)
        .map(|i| {
            if i >= start && i <= stop && acc[i].is_finite() {
                (acc[i] - baseline) * GRAVITY_CM
            } else {
                0.0
            }
        })
        .collect();

    let mut velocity = vec![0.0; n];
    let mut position = vec![0.0; n];
    for i in 1..n {
        let dt = time[i] - time[i - 1];
        velocity[i] = if i > stop {
            0.0
        } else {
            velocity[i - 1] + 0.5 * (accel[i - 1] + accel[i]) * dt
        };
        position[i] = position[i - 1] + 0.5 * (velocity[i - 1] + velocity[i]) * dt;
    }
    position.into_iter().map(|p| -p.abs()).collect()
}

// ---------------------------------------------------------------------------
// Per-format resolution
// ---------------------------------------------------------------------------

fn measurement_channels(columns: BTreeMap<String, Vec<f64>>) -> BTreeMap<String, Vec<f64>> {
    columns
        .into_iter()
        .filter(|(name, _)| !INDEX_COLUMNS.contains(&name.as_str()))
        .collect()
}

fn table_from(depth: Vec<f64>, columns: BTreeMap<String, Vec<f64>>) -> ProfileTable {
    ProfileTable {
        depth,
        channels: measurement_channels(columns),
    }
}

/// Recorded depth of a Lyte export: app exports store travel, radicl stores
/// depth (negated when recorded downward-positive).
fn recorded_depth(raw: &RawTable) -> Option<Vec<f64>> {
    let depth = raw.columns.get("depth")?;
    if raw.format == SourceFormat::LyteApp {
        return Some(linear_travel_depth(depth));
    }
    let non_negative = depth.iter().filter(|d| d.is_finite()).all(|d| *d >= 0.0);
    if non_negative && nan_max(depth) > 0.0 {
        Some(depth.iter().map(|d| -d).collect())
    } else {
        Some(depth.clone())
    }
}

fn time_axis(raw: &RawTable) -> Result<Vec<f64>> {
    if let Some(time) = raw.columns.get("time") {
        return Ok(time.clone());
    }
    let rate = SAMPLE_RATE_KEYS
        .iter()
        .find_map(|k| raw.header.get(*k).and_then(|v| v.as_f64()))
        .filter(|r| *r > 0.0)
        .ok_or_else(|| {
            Error::DepthResolution(
                "integrating acceleration needs a `time` column or a `sample rate` header".into(),
            )
        })?;
    Ok((0..raw.n_rows()).map(|i| i as f64 / rate).collect())
}

fn resolve_events(raw: RawTable, acc: Vec<f64>, settings: &DepthSettings) -> Result<Resolved> {
    let thresholds = &settings.thresholds;
    let (_, ambient) = raw.find_column(AMBIENT).ok_or_else(|| {
        Error::DepthResolution("surface detection needs an ambient optical channel".into())
    })?;
    let (_, active) = raw.find_column(ACTIVE).ok_or_else(|| {
        Error::DepthResolution("surface detection needs an active optical channel".into())
    })?;
    let events = detect_events(&acc, ambient, active, thresholds)?;

    let recorded = || {
        recorded_depth(&raw).ok_or_else(|| {
            Error::DepthResolution(format!(
                "depth_method {:?} needs a depth column",
                settings.method
            ))
        })
    };
    let integrated = || -> Result<Vec<f64>> {
        let time = time_axis(&raw)?;
        Ok(integrate_acceleration(
            &acc,
            &time,
            events.start,
            events.stop,
            thresholds.fractional_basis,
        ))
    };
    let depth = match settings.method {
        DepthMethod::Raw => recorded()?,
        DepthMethod::Acc => integrated()?,
        DepthMethod::Avg => {
            let a = recorded()?;
            let b = integrated()?;
            a.iter().zip(&b).map(|(x, y)| (x + y) / 2.0).collect()
        }
    };

    let surface_depth = depth[events.surface];
    let mut table = table_from(depth, raw.columns);
    if settings.autocrop {
        table.slice_rows(events.surface, events.stop);
        let height = match (table.depth.first(), table.depth.last()) {
            (Some(top), Some(bottom)) => (top - bottom).abs(),
            _ => 0.0,
        };
        info!("Autocropped to samples {}..={}, snow height {height:.1} cm", events.surface, events.stop);
    }
    Ok(Resolved {
        table,
        surface_depth: Some(surface_depth),
        layers: Vec::new(),
    })
}

/// Resolve the depth of a Lyte probe export.
///
/// Exports with an acceleration channel go through event detection; without
/// one, the recorded depth is used, and without either `assumed_depth` is.
pub fn resolve_lyte(raw: RawTable, settings: &DepthSettings) -> Result<Resolved> {
    if let Some((name, acc)) = raw.find_column(ACCELERATION) {
        debug!("Detecting events from `{name}`");
        let acc = acc.to_vec();
        return resolve_events(raw, acc, settings);
    }
    if settings.method != DepthMethod::Raw {
        return Err(Error::DepthResolution(format!(
            "depth_method {:?} needs an acceleration channel",
            settings.method
        )));
    }
    if settings.autocrop {
        return Err(Error::DepthResolution(
            "autocrop needs an acceleration channel".into(),
        ));
    }
    match recorded_depth(&raw) {
        Some(depth) => Ok(Resolved {
            table: table_from(depth, raw.columns),
            ..Default::default()
        }),
        None => resolve_assumed(raw, settings.assumed_depth),
    }
}

/// Resolve depth from the penetrometer's distance channel.
pub fn resolve_penetrometer(mut raw: RawTable) -> Result<Resolved> {
    let distance = raw
        .columns
        .remove("distance")
        .ok_or_else(|| Error::DepthResolution("penetrometer data has no distance".into()))?;
    Ok(Resolved {
        table: table_from(distance_to_depth(&distance), raw.columns),
        ..Default::default()
    })
}

/// Assign `0..=assumed_depth` linearly to an instrument without a depth axis.
pub fn resolve_assumed(raw: RawTable, assumed_depth: Option<f64>) -> Result<Resolved> {
    let assumed = assumed_depth.ok_or_else(|| {
        Error::DepthResolution("no depth axis in the data and no assumed_depth configured".into())
    })?;
    let depth = linspace(0.0, normalize_assumed_depth(assumed), raw.n_rows());
    Ok(Resolved {
        table: table_from(depth, raw.columns),
        ..Default::default()
    })
}

/// Layered data takes its depths from the parsed ranges; the `numeric`
/// channel carries each observation's rank.
pub fn resolve_layered(mut raw: RawTable) -> Result<Resolved> {
    if raw.layers.is_empty() {
        return Err(Error::DepthResolution("no layers in file".into()));
    }
    invert_snow_height(&mut raw.layers);
    let mut table = ProfileTable::new(raw.layers.iter().map(|r| r.depth).collect());
    table.insert_channel(
        "numeric",
        raw.layers.iter().map(|r| r.rank as f64).collect(),
    );
    Ok(Resolved {
        table,
        surface_depth: None,
        layers: raw.layers,
    })
}
