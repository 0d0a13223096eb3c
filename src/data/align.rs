use log::debug;

use super::model::{LayerRecord, ProfileTable};

/// Inputs to surface alignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlignSettings<'a> {
    /// Depth that becomes 0 after alignment.
    pub surface_depth: f64,
    /// Deepest depth kept; either sign is accepted.
    pub bottom_depth: Option<f64>,
    /// `(channel, offset_cm)`: the channel's sensor sits `offset_cm` above
    /// the depth recorded for its samples.
    pub channel_offsets: &'a [(&'a str, f64)],
}

// ---------------------------------------------------------------------------
// Per-channel mechanical offsets
// ---------------------------------------------------------------------------

/// Linear interpolation of `points` (sorted by x) at `x`; NaN outside.
fn interpolate(points: &[(f64, f64)], x: f64) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return f64::NAN;
    };
    if x < first.0 || x > last.0 {
        return f64::NAN;
    }
    let i = points.partition_point(|p| p.0 < x);
    if i < points.len() && points[i].0 == x {
        return points[i].1;
    }
    let (x0, y0) = points[i - 1];
    let (x1, y1) = points[i];
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Resample `channel` so each value sits at the depth its sensor actually
/// occupied: readings taken with the tip at `d` belong to `d + offset`.
pub fn offset_channel(table: &mut ProfileTable, channel: &str, offset_cm: f64) {
    let Some(values) = table.channels.get(channel) else {
        return;
    };
    let mut points: Vec<(f64, f64)> = table
        .depth
        .iter()
        .zip(values)
        .filter(|(d, v)| d.is_finite() && v.is_finite())
        .map(|(d, v)| (d + offset_cm, *v))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points.dedup_by(|a, b| a.0 == b.0);

    let shifted = table.depth.iter().map(|&d| interpolate(&points, d)).collect();
    debug!("Offset channel `{channel}` by {offset_cm} cm");
    table.channels.insert(channel.to_string(), shifted);
}

// ---------------------------------------------------------------------------
// Shift, sort, crop
// ---------------------------------------------------------------------------

/// `depth := depth - surface_depth`, on the table and its layer records.
pub fn shift(table: &mut ProfileTable, layers: &mut [LayerRecord], surface_depth: f64) {
    if surface_depth == 0.0 {
        return;
    }
    for d in table.depth.iter_mut() {
        *d -= surface_depth;
    }
    for r in layers.iter_mut() {
        r.map_depths(|d| d - surface_depth);
    }
}

/// Sort rows ascending by depth and drop repeated depths (first kept).
pub fn sort_unique(table: &mut ProfileTable) {
    let mut order: Vec<usize> = (0..table.len()).collect();
    order.sort_by(|&a, &b| table.depth[a].total_cmp(&table.depth[b]));
    order.dedup_by(|a, b| table.depth[*a] == table.depth[*b]);
    if order.len() < table.len() {
        debug!("Dropped {} repeated depths", table.len() - order.len());
    }
    table.select_rows(&order);
}

/// Keep rows between the surface (0) and `bottom_depth`, which is read as a
/// distance below the surface whatever its sign. Layers overlapping that
/// range are kept and clamped to it, the others are dropped.
pub fn crop_bottom(table: &mut ProfileTable, layers: &mut Vec<LayerRecord>, bottom_depth: f64) {
    let (lo, hi) = (-bottom_depth.abs(), 0.0);
    let inside = |d: f64| d >= lo && d <= hi;

    let keep: Vec<usize> = (0..table.len())
        .filter(|&i| inside(table.depth[i]))
        .collect();
    debug!("Cropped to {bottom_depth} cm, {} of {} rows kept", keep.len(), table.len());
    table.select_rows(&keep);

    // top and bottom are not ordered once snow heights have been inverted
    layers.retain(|r| {
        r.top_depth.max(r.bottom_depth) >= lo && r.top_depth.min(r.bottom_depth) <= hi
    });
    for r in layers.iter_mut() {
        r.map_depths(|d| d.clamp(lo, hi));
    }
}

/// Move the snow surface to depth 0 and hand back an ascending, unique
/// depth index.
pub fn align(table: &mut ProfileTable, layers: &mut Vec<LayerRecord>, settings: &AlignSettings) {
    for (channel, offset) in settings.channel_offsets {
        offset_channel(table, channel, *offset);
    }
    shift(table, layers, settings.surface_depth);
    sort_unique(table);
    if let Some(bottom) = settings.bottom_depth {
        crop_bottom(table, layers, bottom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ProfileTable {
        let mut t = ProfileTable::new(vec![0.0, -1.0, -2.0, -3.0, -4.0]);
        t.insert_channel("force", vec![10.0, 11.0, 12.0, 13.0, 14.0]);
        t
    }

    #[test]
    fn aligned_profile_is_unchanged_by_zero_surface() {
        let mut once = table();
        align(&mut once, &mut Vec::new(), &AlignSettings::default());
        let mut twice = once.clone();
        align(&mut twice, &mut Vec::new(), &AlignSettings::default());
        assert_eq!(once.depth, twice.depth);
        assert_eq!(once, twice);
        assert!(once.is_ascending());
    }

    #[test]
    fn surface_moves_to_zero() {
        let mut t = table();
        let settings = AlignSettings {
            surface_depth: -1.0,
            ..Default::default()
        };
        align(&mut t, &mut Vec::new(), &settings);
        assert_eq!(t.depth, vec![-3.0, -2.0, -1.0, 0.0, 1.0]);
        assert_eq!(t.channel("force").unwrap()[3], 11.0);
    }

    #[test]
    fn bottom_crop_accepts_either_sign() {
        for bottom in [-2.0, 2.0] {
            let mut t = table();
            let settings = AlignSettings {
                bottom_depth: Some(bottom),
                ..Default::default()
            };
            align(&mut t, &mut Vec::new(), &settings);
            assert_eq!(t.depth, vec![-2.0, -1.0, 0.0]);
        }
    }

    #[test]
    fn repeated_depths_are_dropped() {
        let mut t = ProfileTable::new(vec![-1.0, 0.0, -1.0]);
        t.insert_channel("numeric", vec![1.0, 2.0, 3.0]);
        sort_unique(&mut t);
        assert_eq!(t.depth, vec![-1.0, 0.0]);
        assert_eq!(t.channel("numeric").unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn channel_offset_resamples_onto_depth() {
        let mut t = table();
        offset_channel(&mut t, "force", 1.0);
        let force = t.channel("force").unwrap();
        // reading taken at -1 belongs to 0
        assert_eq!(force[0], 11.0);
        assert_eq!(force[3], 14.0);
        assert!(force[4].is_nan());
    }

    #[test]
    fn layers_follow_the_shift_and_crop() {
        let mut t = ProfileTable::new(vec![0.0, -10.0, -30.0]);
        t.insert_channel("numeric", vec![2.0, 2.0, 11.0]);
        let mut layers = vec![
            LayerRecord {
                layer_number: 1,
                top_depth: 0.0,
                bottom_depth: -10.0,
                depth: 0.0,
                label: "F".into(),
                rank: 2,
            },
            LayerRecord {
                layer_number: 2,
                top_depth: -10.0,
                bottom_depth: -30.0,
                depth: -30.0,
                label: "P".into(),
                rank: 11,
            },
        ];
        let settings = AlignSettings {
            surface_depth: 0.0,
            bottom_depth: Some(-20.0),
            ..Default::default()
        };
        align(&mut t, &mut layers, &settings);
        assert_eq!(t.depth, vec![-10.0, 0.0]);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[1].bottom_depth, -20.0);
        assert_eq!(layers[1].depth, -20.0);
    }

    #[test]
    fn positive_bottom_keeps_the_snowpack() {
        let mut t = ProfileTable::new((0..=100).map(|i| -(i as f64)).collect());
        let settings = AlignSettings {
            bottom_depth: Some(50.0),
            ..Default::default()
        };
        align(&mut t, &mut Vec::new(), &settings);
        assert_eq!(t.len(), 51);
        assert_eq!(t.depth[0], -50.0);
        assert_eq!(t.depth[50], 0.0);
    }

    #[test]
    fn inverted_layer_overlapping_the_crop_is_kept() {
        // `0-10` of a 30 cm snow height, after inversion
        let layer = |number, top, bottom, depth| LayerRecord {
            layer_number: number,
            top_depth: top,
            bottom_depth: bottom,
            depth,
            label: "F".into(),
            rank: 2,
        };
        let mut layers = vec![
            layer(1, -30.0, -20.0, -30.0),
            layer(1, -30.0, -20.0, -20.0),
            layer(2, -20.0, 0.0, -20.0),
        ];
        let mut t = ProfileTable::new(vec![-30.0, -20.0, 0.0]);
        crop_bottom(&mut t, &mut layers, -25.0);
        assert_eq!(t.depth, vec![-20.0, 0.0]);
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].top_depth, -25.0);
        assert_eq!(layers[0].depth, -25.0);
        assert_eq!(layers[1].bottom_depth, -20.0);
    }
}
