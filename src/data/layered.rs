use std::collections::BTreeMap;

use super::model::{LayerRecord, StepPoint};
use crate::error::{Error, Result};

/// Expand layer records into a zero-padded step outline.
///
/// For every layer (ascending `layer_number`) the output holds a zero at the
/// layer top, the layer's ranks at their sample depths, and a zero at the
/// layer bottom. Adjacent layers are concatenated as-is, so a shared boundary
/// appears once as the upper layer's bottom pad and once as the lower layer's
/// top pad. Filling between 0 and the value against depth draws one block per
/// layer.
pub fn expand(records: &[LayerRecord]) -> Result<Vec<StepPoint>> {
    let mut layers: BTreeMap<usize, Vec<&LayerRecord>> = BTreeMap::new();
    for r in records {
        layers.entry(r.layer_number).or_default().push(r);
    }

    let mut out = Vec::with_capacity(records.len() + 2 * layers.len());
    for (layer_number, mut samples) in layers {
        let top = samples[0].top_depth;
        let bottom = samples[0].bottom_depth;
        if samples
            .iter()
            .any(|r| r.top_depth != top || r.bottom_depth != bottom)
        {
            return Err(Error::Format(format!(
                "layer {layer_number} has inconsistent bounds"
            )));
        }

        // order samples from top to bottom, whichever way depth runs
        let descending = bottom < top;
        samples.sort_by(|a, b| {
            if descending {
                b.depth.total_cmp(&a.depth)
            } else {
                a.depth.total_cmp(&b.depth)
            }
        });

        let pad = |depth| StepPoint {
            depth,
            value: 0.0,
            layer_number,
            is_pad: true,
        };
        out.push(pad(top));
        out.extend(samples.iter().map(|r| StepPoint {
            depth: r.depth,
            value: r.rank as f64,
            layer_number,
            is_pad: false,
        }));
        out.push(pad(bottom));
    }
    Ok(out)
}
