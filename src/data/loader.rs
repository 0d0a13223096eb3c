use std::collections::BTreeMap;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use log::{debug, info, warn};

use super::model::{Header, LayerRecord, MetadataValue, RawTable, SourceFormat};
use super::scale::CategoryScale;
use crate::error::{Error, Result};

/// How far into a Lyte export we look for the end of the `key=value` header.
pub const MAX_HEADER_SCAN: usize = 100;

/// Column header row of mobile app exports, used when the `key=value` scan
/// does not lead to a table.
pub const APP_HEADER_ROWS: usize = 11;

/// Header key written by radicl; absent in app exports.
const RADICL_VERSION_KEY: &str = "radicl version";

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Delimited numeric tables
// ---------------------------------------------------------------------------

/// Parse a headed CSV body into lower-cased, trimmed numeric columns.
/// Empty cells become NaN; anything else non-numeric is a format error.
fn parse_numeric_table(
    body: &str,
    first_line: usize,
    rename: impl Fn(&str) -> String,
) -> Result<BTreeMap<String, Vec<f64>>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let names: Vec<String> = reader.headers()?.iter().map(|h| rename(h)).collect();
    if names.iter().all(|n| n.is_empty()) {
        return Err(Error::Format(format!(
            "no column names on line {}",
            first_line + 1
        )));
    }
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];

    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        let line = first_line + row_no + 2;
        if record.len() != names.len() {
            return Err(Error::Format(format!(
                "line {line}: expected {} fields, found {}",
                names.len(),
                record.len()
            )));
        }
        for (col, cell) in record.iter().enumerate() {
            let value = if cell.is_empty() {
                f64::NAN
            } else {
                cell.parse::<f64>().map_err(|_| {
                    Error::Format(format!(
                        "line {line}, column `{}`: '{cell}' is not a number",
                        names[col]
                    ))
                })?
            };
            columns[col].push(value);
        }
    }

    Ok(names.into_iter().zip(columns).collect())
}

fn lower_trim(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Lyte probe (key=value header + CSV table)
// ---------------------------------------------------------------------------

/// Split a Lyte export into its `key=value` header and the line index where
/// the data table (column header row) starts.
fn split_lyte_header(text: &str) -> Result<(Header, usize)> {
    let mut header = Header::new();
    for (i, line) in text.lines().take(MAX_HEADER_SCAN).enumerate() {
        match line.split_once('=') {
            Some((k, v)) => {
                header.insert(lower_trim(k), MetadataValue::guess(&v.to_lowercase()));
            }
            None => return Ok((header, i)),
        }
    }
    Err(Error::Format(format!(
        "no end of header within the first {MAX_HEADER_SCAN} lines"
    )))
}

/// Open a Lyte probe export from either the mobile app or radicl.
pub fn read_lyte(path: &Path) -> Result<RawTable> {
    info!("Opening filename {}", file_name(path));
    let text = std::fs::read_to_string(path)?;
    parse_lyte(&text)
}

/// Whether any `key=value` line near the top carries the radicl version key.
fn has_radicl_version(text: &str) -> bool {
    text.lines()
        .take(MAX_HEADER_SCAN)
        .filter_map(|line| line.split_once('='))
        .any(|(k, _)| lower_trim(k) == RADICL_VERSION_KEY)
}

/// Read the table starting at line `header_len` (the column header row).
fn lyte_table(text: &str, header: Header, header_len: usize, format: SourceFormat) -> Result<RawTable> {
    let body: String = text
        .lines()
        .skip(header_len)
        .collect::<Vec<_>>()
        .join("\n");
    let columns = parse_numeric_table(&body, header_len, lower_trim)?;
    debug!("Header length found to be {header_len} lines ({format} export)");

    let mut table = RawTable::new(format);
    table.columns = columns;
    table.header = header;
    table.header_len = header_len;
    Ok(table)
}

/// App exports have a fixed-length preamble; lines in it without `=` are
/// kept out of the header.
fn parse_app_fixed(text: &str) -> Result<RawTable> {
    if text.lines().count() <= APP_HEADER_ROWS {
        return Err(Error::Format(format!(
            "fewer than {} lines for an app export",
            APP_HEADER_ROWS + 1
        )));
    }
    let header = text
        .lines()
        .take(APP_HEADER_ROWS)
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (lower_trim(k), MetadataValue::guess(&v.to_lowercase())))
        .collect();
    lyte_table(text, header, APP_HEADER_ROWS, SourceFormat::LyteApp)
}

pub fn parse_lyte(text: &str) -> Result<RawTable> {
    let radicl = has_radicl_version(text);
    let format = if radicl {
        SourceFormat::LyteRadicl
    } else {
        SourceFormat::LyteApp
    };
    let scanned = split_lyte_header(text)
        .and_then(|(header, header_len)| lyte_table(text, header, header_len, format));

    match scanned {
        Err(e) if !radicl => {
            debug!("Header scan failed ({e}), trying the fixed app preamble");
            parse_app_fixed(text).map_err(|fallback| {
                debug!("Fixed app preamble failed too: {fallback}");
                e
            })
        }
        scanned => scanned,
    }
}

// ---------------------------------------------------------------------------
// Penetrometer (SnowMicroPen)
// ---------------------------------------------------------------------------

/// Decoded penetrometer samples.
#[derive(Debug, Clone, Default)]
pub struct PenetrometerSamples {
    /// Travel distance in millimeters.
    pub distance: Vec<f64>,
    /// Force in newtons.
    pub force: Vec<f64>,
    pub timestamp: Option<String>,
    pub header: Header,
}

/// Source of penetrometer samples. The binary `.pnt` layout is proprietary,
/// so callers with a decoder for it plug it in here.
pub trait PenetrometerReader {
    fn read_samples(&self, path: &Path) -> Result<PenetrometerSamples>;
}

/// Reads the CSV sample export written by snowmicropyn:
/// `# key: value` comment lines followed by `distance,force` columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmpCsvExport;

/// `"Distance [mm]"` → `"distance"`.
fn strip_unit(name: &str) -> String {
    let name = name.split(['[', '(']).next().unwrap_or(name);
    lower_trim(name)
}

impl PenetrometerReader for SmpCsvExport {
    fn read_samples(&self, path: &Path) -> Result<PenetrometerSamples> {
        if extension(path) == "pnt" {
            return Err(Error::Format(format!(
                "{} is a binary .pnt file; export its samples to CSV or supply a reader for it",
                file_name(path)
            )));
        }
        let text = std::fs::read_to_string(path)?;
        parse_smp_export(&text)
    }
}

pub fn parse_smp_export(text: &str) -> Result<PenetrometerSamples> {
    let mut header = Header::new();
    let mut header_len = 0;
    for line in text.lines() {
        let Some(comment) = line.trim_start().strip_prefix('#') else {
            break;
        };
        if let Some((k, v)) = comment.split_once(':') {
            header.insert(lower_trim(k), MetadataValue::guess(v));
        }
        header_len += 1;
    }

    let body: String = text
        .lines()
        .skip(header_len)
        .collect::<Vec<_>>()
        .join("\n");
    let mut columns = parse_numeric_table(&body, header_len, strip_unit)?;

    let distance = columns
        .remove("distance")
        .ok_or_else(|| Error::Format("penetrometer export has no `distance` column".into()))?;
    let force = columns
        .remove("force")
        .ok_or_else(|| Error::Format("penetrometer export has no `force` column".into()))?;
    let timestamp = header.get("timestamp").map(|v| v.to_string());

    Ok(PenetrometerSamples {
        distance,
        force,
        timestamp,
        header,
    })
}

/// Open a penetrometer profile through `reader`.
pub fn read_penetrometer(path: &Path, reader: &dyn PenetrometerReader) -> Result<RawTable> {
    info!("Opening filename {}", file_name(path));
    let samples = reader.read_samples(path)?;
    debug!("Read {} penetrometer samples", samples.force.len());

    let mut table = RawTable::new(SourceFormat::Penetrometer);
    table.header_len = samples.header.len();
    table.header = samples.header;
    if let Some(ts) = samples.timestamp {
        table
            .header
            .insert("timestamp".into(), MetadataValue::String(ts));
    }
    table.columns.insert("distance".into(), samples.distance);
    table.columns.insert("force".into(), samples.force);
    Ok(table)
}

// ---------------------------------------------------------------------------
// Interval text (hand hardness field notes)
// ---------------------------------------------------------------------------

/// Parse `d1-d2` where either bound may be negative and parenthesized,
/// e.g. `10-30`, `-10--20` or `-0-(-10)`.
fn parse_depth_range(range: &str, line: usize) -> Result<(f64, f64)> {
    let compact: String = range
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();
    let bytes = compact.as_bytes();
    let split = (1..bytes.len())
        .find(|&i| bytes[i] == b'-' && (bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b'.'))
        .ok_or_else(|| Error::Parse {
            line,
            message: format!("depth range '{}' is not of the form d1-d2", range.trim()),
        })?;

    let parse = |s: &str| {
        s.parse::<f64>().map_err(|_| Error::Parse {
            line,
            message: format!("'{s}' is not a depth"),
        })
    };
    Ok((parse(&compact[..split])?, parse(&compact[split + 1..])?))
}

/// Parse `depth_range = value[,value]` lines into layer records.
///
/// Each line is one layer. A single value covers both ends; several values
/// are spread evenly from the first depth to the second.
pub fn parse_interval_text(text: &str, scale: &CategoryScale) -> Result<Vec<LayerRecord>> {
    let mut records = Vec::new();
    let mut layer_number = 0;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('=').collect();
        let (range, values) = match parts.as_slice() {
            [range, values] => (*range, *values),
            [_] => {
                return Err(Error::Parse {
                    line: line_no,
                    message: "expected `depth_range = value`".into(),
                })
            }
            _ => {
                return Err(Error::Parse {
                    line: line_no,
                    message: "only one `=` can be used per line".into(),
                })
            }
        };

        let (top, bottom) = parse_depth_range(range, line_no)?;
        let mut labels: Vec<String> = values
            .split(',')
            .map(|v| v.trim().to_uppercase())
            .collect();
        if labels.iter().any(|l| l.is_empty()) {
            return Err(Error::Parse {
                line: line_no,
                message: "empty category value".into(),
            });
        }
        if labels.len() == 1 {
            labels.push(labels[0].clone());
        }

        layer_number += 1;
        let steps = (labels.len() - 1) as f64;
        for (k, label) in labels.into_iter().enumerate() {
            let rank = scale.rank(&label).ok_or_else(|| Error::Parse {
                line: line_no,
                message: format!("unknown category '{label}'"),
            })?;
            records.push(LayerRecord {
                layer_number,
                top_depth: top,
                bottom_depth: bottom,
                depth: top + (bottom - top) * k as f64 / steps,
                label,
                rank,
            });
        }
    }
    Ok(records)
}

pub fn read_interval_text(path: &Path, scale: &CategoryScale) -> Result<RawTable> {
    info!("Opening filename {}", file_name(path));
    let text = std::fs::read_to_string(path)?;
    let mut table = RawTable::new(SourceFormat::IntervalText);
    table.layers = parse_interval_text(&text, scale)?;
    debug!("Parsed {} layer observations", table.layers.len());
    Ok(table)
}

// ---------------------------------------------------------------------------
// Stratigraphy CSV (campaign export)
// ---------------------------------------------------------------------------

fn find_header(headers: &[String], needle: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.contains(needle))
        .ok_or_else(|| Error::Format(format!("stratigraphy file has no `{needle}` column")))
}

/// Parse a stratigraphy export: each row (top, bottom, category) becomes two
/// records sharing one layer number.
pub fn parse_stratigraphy(
    text: &str,
    scale: &CategoryScale,
    category_column: &str,
) -> Result<(Vec<LayerRecord>, usize)> {
    let comment_lines = text
        .lines()
        .take_while(|l| l.trim_start().starts_with('#'))
        .count();
    let body: String = text
        .lines()
        .skip(comment_lines)
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(lower_trim).collect();
    let top_idx = find_header(&headers, "top")?;
    let bottom_idx = find_header(&headers, "bottom")?;
    let cat_idx = find_header(&headers, category_column)?;

    let mut records = Vec::new();
    let mut layer_number = 0;
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        let line = comment_lines + row_no + 2;
        let label = record.get(cat_idx).unwrap_or("").trim();
        if label.is_empty() {
            warn!("Line {line}: no {category_column} value, skipping layer");
            continue;
        }
        let depth_at = |idx: usize| -> Result<f64> {
            let cell = record.get(idx).unwrap_or("");
            cell.parse::<f64>().map_err(|_| Error::Parse {
                line,
                message: format!("'{cell}' is not a depth"),
            })
        };
        let top = depth_at(top_idx)?;
        let bottom = depth_at(bottom_idx)?;
        let rank = scale.rank(label).ok_or_else(|| Error::Parse {
            line,
            message: format!("unknown {category_column} '{label}'"),
        })?;

        layer_number += 1;
        for depth in [top, bottom] {
            records.push(LayerRecord {
                layer_number,
                top_depth: top,
                bottom_depth: bottom,
                depth,
                label: label.to_string(),
                rank,
            });
        }
    }
    Ok((records, comment_lines))
}

pub fn read_stratigraphy(
    path: &Path,
    scale: &CategoryScale,
    category_column: &str,
) -> Result<RawTable> {
    info!("Opening filename {}", file_name(path));
    let text = std::fs::read_to_string(path)?;
    let (layers, header_len) = parse_stratigraphy(&text, scale, category_column)?;
    debug!("Header length found to be {header_len} lines");

    let mut table = RawTable::new(SourceFormat::Stratigraphy);
    table.layers = layers;
    table.header_len = header_len;
    Ok(table)
}

/// Dispatch layered files by extension: `.txt` field notes or `.csv`
/// stratigraphy exports.
pub fn read_layered(path: &Path, scale: &CategoryScale, category_column: &str) -> Result<RawTable> {
    match extension(path).as_str() {
        "txt" => read_interval_text(path, scale),
        "csv" => read_stratigraphy(path, scale, category_column),
        other => Err(Error::Format(format!(
            "unsupported layered file extension: .{other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Raster (NIR photo)
// ---------------------------------------------------------------------------

/// Load a photo as 8-bit luma and reduce it to one mean brightness per pixel
/// row. No depth is assigned here.
pub fn read_raster(path: &Path) -> Result<RawTable> {
    info!("Opening filename {}", file_name(path));
    let img = image::open(path)?.to_luma8();
    let (width, height) = img.dimensions();
    debug!("Raster is {width}x{height} pixels");

    let mut row = Vec::with_capacity(height as usize);
    let mut intensity = Vec::with_capacity(height as usize);
    for (y, pixels) in img.rows().enumerate() {
        let sum: f64 = pixels.map(|p| p.0[0] as f64).sum();
        row.push(y as f64);
        intensity.push(if width == 0 { f64::NAN } else { sum / width as f64 });
    }

    let mut table = RawTable::new(SourceFormat::Raster);
    table
        .header
        .insert("width".into(), MetadataValue::Integer(width as i64));
    table
        .header
        .insert("height".into(), MetadataValue::Integer(height as i64));
    table.columns.insert("row".into(), row);
    table.columns.insert("intensity".into(), intensity);
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::scale::{grain_size, hand_hardness};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RADICL: &str = "RADICL VERSION=0.5.1\n\
                          SAMPLE RATE=100\n\
                          Time, Sensor1, Sensor2, Sensor3, Acceleration\n\
                          0.00,1,2,3,-1.0\n\
                          0.01,4,5,6,-1.0\n";

    #[test]
    fn radicl_header_detected() {
        let table = parse_lyte(RADICL).unwrap();
        assert_eq!(table.format, SourceFormat::LyteRadicl);
        assert_eq!(table.header_len, 2);
        assert_eq!(table.header["sample rate"].as_f64(), Some(100.0));
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.columns["sensor2"], vec![2.0, 5.0]);
        assert!(table.columns.contains_key("acceleration"));
    }

    #[test]
    fn app_export_without_version_key() {
        let text = "Serial Num.=abc\nSample,Depth,Sensor1\n0,0,10\n1,50,12\n";
        let table = parse_lyte(text).unwrap();
        assert_eq!(table.format, SourceFormat::LyteApp);
        assert_eq!(table.header_len, 1);
        assert_eq!(table.columns["depth"], vec![0.0, 50.0]);
    }

    #[test]
    fn app_preamble_with_free_text_line_uses_fixed_offset() {
        let mut text = String::from("Serial Num.=abc\nFirmware=2.0\nPit wall, north aspect\n");
        for i in 3..APP_HEADER_ROWS {
            text.push_str(&format!("Key{i}=value{i}\n"));
        }
        text.push_str("Sample,Depth,Sensor1\n0,0,10\n1,50,12\n");

        let table = parse_lyte(&text).unwrap();
        assert_eq!(table.format, SourceFormat::LyteApp);
        assert_eq!(table.header_len, APP_HEADER_ROWS);
        assert_eq!(table.header.len(), APP_HEADER_ROWS - 1);
        assert_eq!(table.header["serial num."], MetadataValue::String("abc".into()));
        assert_eq!(table.columns["depth"], vec![0.0, 50.0]);
        assert_eq!(table.columns["sensor1"], vec![10.0, 12.0]);
    }

    #[test]
    fn header_without_boundary_is_format_error() {
        let text = "a=b\n".repeat(MAX_HEADER_SCAN + 5);
        assert!(matches!(parse_lyte(&text), Err(Error::Format(_))));
    }

    #[test]
    fn non_numeric_cell_is_format_error() {
        let text = "Depth,Sensor1\n0,abc\n";
        assert!(matches!(parse_lyte(text), Err(Error::Format(_))));
    }

    #[test]
    fn interval_text_with_two_values() {
        let records = parse_interval_text("-10--20 = F-,F+", hand_hardness()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].depth, records[0].rank), (-10.0, 1));
        assert_eq!((records[1].depth, records[1].rank), (-20.0, 3));
        assert!(records.iter().all(|r| r.layer_number == 1));
    }

    #[test]
    fn interval_text_parenthesized_ranges() {
        let text = "-0-(-10) = F\n\n-10-(-30) = 4F-,P\n";
        let records = parse_interval_text(text, hand_hardness()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].depth, -10.0);
        assert_eq!(records[1].label, "F");
        assert_eq!(records[3].depth, -30.0);
        assert_eq!(records[3].label, "P");
        assert_eq!(records[3].layer_number, 2);
    }

    #[test]
    fn interval_text_rejects_two_equals() {
        let err = parse_interval_text("0-10 = F\n10-20 = P = K", hand_hardness()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
    }

    #[test]
    fn interval_text_rejects_unknown_label() {
        let err = parse_interval_text("0-10 = Q", hand_hardness()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
    }

    #[test]
    fn stratigraphy_rows_become_boundary_pairs() {
        let text = "# Location,Grand Mesa\n\
                    # Site,1N20\n\
                    Top (cm),Bottom (cm),Grain Size (mm),Grain Type,Hand Hardness\n\
                    100,80,< 1 mm,RG,4F\n\
                    80,60,,FC,1F\n\
                    60,0,2-4 mm,DH,P\n";
        let (records, header_len) = parse_stratigraphy(text, grain_size(), "grain size").unwrap();
        assert_eq!(header_len, 2);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].depth, 100.0);
        assert_eq!(records[1].depth, 80.0);
        assert_eq!(records[2].layer_number, 2);
        assert_eq!(records[3].rank, 3);
    }

    #[test]
    fn rows_without_category_are_skipped() {
        let text = "top,bottom,grain size\n100,80,\n80,0,\n";
        let (records, header_len) = parse_stratigraphy(text, grain_size(), "grain size").unwrap();
        assert_eq!(header_len, 0);
        assert!(records.is_empty());
    }

    #[test]
    fn smp_export_strips_units() {
        let text = "# timestamp: 2020-02-01T12:00:00\n\
                    Distance [mm],Force [N]\n\
                    0.0,0.01\n\
                    1.0,0.2\n";
        let samples = parse_smp_export(text).unwrap();
        assert_eq!(samples.distance, vec![0.0, 1.0]);
        assert_eq!(samples.force, vec![0.01, 0.2]);
        assert_eq!(samples.timestamp.as_deref(), Some("2020-02-01T12:00:00"));
    }

    #[test]
    fn binary_pnt_needs_a_reader() {
        let file = tempfile::Builder::new().suffix(".pnt").tempfile().unwrap();
        let err = SmpCsvExport.read_samples(file.path()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn read_layered_dispatches_on_extension() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile()?;
        writeln!(file, "0-10 = F")?;
        file.flush()?;
        let table = read_layered(file.path(), hand_hardness(), "hand hardness")?;
        assert_eq!(table.format, SourceFormat::IntervalText);
        assert_eq!(table.layers.len(), 2);

        let other = NamedTempFile::new()?;
        assert!(matches!(
            read_layered(other.path(), hand_hardness(), "hand hardness"),
            Err(Error::Format(_))
        ));
        Ok(())
    }

    #[test]
    fn raster_rows_become_intensity() -> Result<()> {
        let file = tempfile::Builder::new().suffix(".png").tempfile()?;
        let mut img = image::GrayImage::new(2, 3);
        img.put_pixel(0, 0, image::Luma([100]));
        img.put_pixel(1, 0, image::Luma([200]));
        img.save(file.path())?;

        let table = read_raster(file.path())?;
        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.columns["intensity"][0], 150.0);
        assert_eq!(table.columns["intensity"][2], 0.0);
        Ok(())
    }
}
