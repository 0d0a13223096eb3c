use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// MetadataValue – a single header value
// ---------------------------------------------------------------------------

/// A dynamically-typed header value from an instrument export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl MetadataValue {
    /// Guess the narrowest type for a raw header string.
    pub fn guess(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return MetadataValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return MetadataValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return MetadataValue::Float(f);
        }
        if s == "true" || s == "false" {
            return MetadataValue::Bool(s == "true");
        }
        MetadataValue::String(s.to_string())
    }

    /// Try to interpret the value as an `f64` (sample rates, offsets).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

/// Embedded header metadata: lower-cased key → value.
pub type Header = BTreeMap<String, MetadataValue>;

// ---------------------------------------------------------------------------
// SourceFormat – which native layout a file was read as
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Lyte probe export from the mobile app (depth column is travel).
    LyteApp,
    /// Lyte probe export recorded with radicl.
    LyteRadicl,
    /// SnowMicroPen samples.
    Penetrometer,
    /// `d1-d2 = value[,value]` field notes.
    IntervalText,
    /// Campaign stratigraphy CSV.
    Stratigraphy,
    /// Raster photo.
    Raster,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceFormat::LyteApp => "lyte app",
            SourceFormat::LyteRadicl => "radicl",
            SourceFormat::Penetrometer => "penetrometer",
            SourceFormat::IntervalText => "interval text",
            SourceFormat::Stratigraphy => "stratigraphy",
            SourceFormat::Raster => "raster",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// LayerRecord – one observation of a categorical layer
// ---------------------------------------------------------------------------

/// A categorical observation at `depth`, inside layer `layer_number`.
///
/// Interval parsers emit one record per layer boundary, so a layer usually
/// owns two records (top and bottom) that share the same `layer_number`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerRecord {
    pub layer_number: usize,
    pub top_depth: f64,
    pub bottom_depth: f64,
    pub depth: f64,
    pub label: String,
    pub rank: u32,
}

impl LayerRecord {
    /// Apply `f` to every depth of the record.
    pub fn map_depths(&mut self, f: impl Fn(f64) -> f64) {
        self.top_depth = f(self.top_depth);
        self.bottom_depth = f(self.bottom_depth);
        self.depth = f(self.depth);
    }
}

/// One vertex of the expanded step outline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepPoint {
    pub depth: f64,
    pub value: f64,
    pub layer_number: usize,
    pub is_pad: bool,
}

// ---------------------------------------------------------------------------
// RawTable – what a reader hands to the depth resolver
// ---------------------------------------------------------------------------

/// Unprocessed table straight out of a reader.
///
/// Columns are keyed by lower-cased name; all columns have the same length.
/// Layered formats leave `columns` empty and fill `layers` instead.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub format: SourceFormat,
    pub columns: BTreeMap<String, Vec<f64>>,
    pub header: Header,
    pub header_len: usize,
    pub layers: Vec<LayerRecord>,
}

impl RawTable {
    pub fn new(format: SourceFormat) -> Self {
        Self {
            format,
            columns: BTreeMap::new(),
            header: Header::new(),
            header_len: 0,
            layers: Vec::new(),
        }
    }

    /// Number of rows (length of the first column).
    pub fn n_rows(&self) -> usize {
        self.columns.values().next().map_or(0, |c| c.len())
    }

    /// First column whose name matches one of `aliases`.
    pub fn find_column(&self, aliases: &[&str]) -> Option<(&str, &[f64])> {
        aliases.iter().find_map(|a| {
            self.columns
                .get_key_value(*a)
                .map(|(k, v)| (k.as_str(), v.as_slice()))
        })
    }
}

// ---------------------------------------------------------------------------
// ProfileTable – the canonical depth-indexed series
// ---------------------------------------------------------------------------

/// Depth-indexed channels. `depth` is in centimeters, non-positive below the
/// snow surface; every channel has `depth.len()` values (NaN = missing).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileTable {
    pub depth: Vec<f64>,
    pub channels: BTreeMap<String, Vec<f64>>,
}

impl ProfileTable {
    pub fn new(depth: Vec<f64>) -> Self {
        Self {
            depth,
            channels: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }

    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.channels.get(name).map(|c| c.as_slice())
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Insert a channel; its length must match the depth index.
    pub fn insert_channel(&mut self, name: impl Into<String>, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.depth.len());
        self.channels.insert(name.into(), values);
    }

    /// Reorder (and possibly drop) rows: row `i` of the result is row
    /// `indices[i]` of `self`.
    pub fn select_rows(&mut self, indices: &[usize]) {
        self.depth = indices.iter().map(|&i| self.depth[i]).collect();
        for values in self.channels.values_mut() {
            *values = indices.iter().map(|&i| values[i]).collect();
        }
    }

    /// Keep rows `start..=end`.
    pub fn slice_rows(&mut self, start: usize, end: usize) {
        if self.is_empty() {
            return;
        }
        let end = end.min(self.len().saturating_sub(1));
        let indices: Vec<usize> = (start..=end).collect();
        self.select_rows(&indices);
    }

    /// Index of the row whose depth is closest to `depth`.
    pub fn nearest_index(&self, depth: f64) -> Option<usize> {
        self.depth
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - depth).abs().total_cmp(&(*b - depth).abs()))
            .map(|(i, _)| i)
    }

    /// Whether the depth index is strictly ascending.
    pub fn is_ascending(&self) -> bool {
        self.depth.windows(2).all(|w| w[0] < w[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_header_types() {
        assert_eq!(MetadataValue::guess("16000"), MetadataValue::Integer(16000));
        assert_eq!(MetadataValue::guess(" 0.5 "), MetadataValue::Float(0.5));
        assert_eq!(MetadataValue::guess("true"), MetadataValue::Bool(true));
        assert_eq!(MetadataValue::guess(""), MetadataValue::Null);
        assert_eq!(
            MetadataValue::guess("0.5.1"),
            MetadataValue::String("0.5.1".into())
        );
        assert_eq!(MetadataValue::guess("100").as_f64(), Some(100.0));
    }

    #[test]
    fn select_rows_keeps_channels_aligned() {
        let mut table = ProfileTable::new(vec![0.0, -1.0, -2.0]);
        table.insert_channel("force", vec![1.0, 2.0, 3.0]);
        table.select_rows(&[2, 0]);
        assert_eq!(table.depth, vec![-2.0, 0.0]);
        assert_eq!(table.channel("force"), Some(&[3.0, 1.0][..]));
    }

    #[test]
    fn nearest_index_picks_closest_depth() {
        let table = ProfileTable::new(vec![-30.0, -20.0, -10.0, 0.0]);
        assert_eq!(table.nearest_index(-18.0), Some(1));
        assert_eq!(table.nearest_index(5.0), Some(3));
        assert!(table.is_ascending());
    }
}
