use log::info;

use super::model::ProfileTable;
use crate::error::{Error, Result};

/// Name of the derived channel appended by column averaging.
pub const AVERAGE_CHANNEL: &str = "average";

/// Conditioning steps, applied in field order when set.
#[derive(Debug, Clone, Default)]
pub struct ConditionSettings<'a> {
    pub smoothing: Option<usize>,
    pub smoothing_center: bool,
    pub average_columns: bool,
    pub calibration: Option<&'a [f64]>,
    pub column_to_plot: &'a str,
}

// ---------------------------------------------------------------------------
// Smoothing
// ---------------------------------------------------------------------------

/// Moving average over `window` samples. Trailing windows leave the first
/// `window - 1` values undefined (NaN); centered windows split that gap
/// between both ends. A window containing NaN yields NaN.
pub fn moving_average(values: &[f64], window: usize, center: bool) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || window > n {
        return out;
    }
    let lead = if center { window / 2 } else { 0 };
    for end in window - 1..n {
        let slice = &values[end + 1 - window..=end];
        let mean = slice.iter().sum::<f64>() / window as f64;
        out[end - lead] = mean;
    }
    out
}

pub fn smooth(table: &mut ProfileTable, window: usize, center: bool) {
    info!("Smoothing with {window}");
    for values in table.channels.values_mut() {
        *values = moving_average(values, window, center);
    }
}

// ---------------------------------------------------------------------------
// Column averaging
// ---------------------------------------------------------------------------

/// Append the row-wise mean of every channel, skipping missing values.
pub fn average_columns(table: &mut ProfileTable) {
    let average = (0..table.len())
        .map(|row| {
            let (sum, n) = table
                .channels
                .values()
                .map(|c| c[row])
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                f64::NAN
            } else {
                sum / n as f64
            }
        })
        .collect();
    table.insert_channel(AVERAGE_CHANNEL, average);
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Evaluate a polynomial with coefficients ordered highest degree first.
pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, c| acc * x + c)
}

/// Map raw sensor units of `channel` through the calibration polynomial.
pub fn calibrate(table: &mut ProfileTable, channel: &str, coefficients: &[f64]) -> Result<()> {
    if coefficients.is_empty() {
        return Err(Error::Calibration("no calibration coefficients".into()));
    }
    if let Some(bad) = coefficients.iter().find(|c| !c.is_finite()) {
        return Err(Error::Calibration(format!("coefficient {bad} is not finite")));
    }
    let values = table.channels.get_mut(channel).ok_or_else(|| {
        Error::Calibration(format!("no channel `{channel}` to calibrate"))
    })?;
    info!(
        "Calibrating `{channel}` with a degree {} polynomial",
        coefficients.len() - 1
    );
    for v in values.iter_mut() {
        *v = polyval(coefficients, *v);
    }
    Ok(())
}

/// Smoothing, then averaging, then calibration; each only when configured.
pub fn condition(table: &mut ProfileTable, settings: &ConditionSettings) -> Result<()> {
    if let Some(window) = settings.smoothing {
        smooth(table, window, settings.smoothing_center);
    }
    if settings.average_columns {
        average_columns(table);
    }
    if let Some(coefficients) = settings.calibration {
        calibrate(table, settings.column_to_plot, coefficients)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LYTE_FORCE: [f64; 4] = [-1.46799e-06, 0.01441, -50.765, 64700.4];

    #[test]
    fn trailing_average_leaves_leading_gap() {
        let out = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3, false);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(&out[2..], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn centered_average_splits_gap() {
        let out = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3, true);
        assert!(out[0].is_nan() && out[4].is_nan());
        assert_eq!(&out[1..4], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn average_skips_missing() {
        let mut t = ProfileTable::new(vec![0.0, -1.0]);
        t.insert_channel("a", vec![1.0, f64::NAN]);
        t.insert_channel("b", vec![3.0, 5.0]);
        average_columns(&mut t);
        assert_eq!(t.channel(AVERAGE_CHANNEL).unwrap(), &[2.0, 5.0]);
    }

    #[test]
    fn calibration_matches_direct_cubic() {
        let raw = 3200.0_f64;
        let direct = LYTE_FORCE[0] * raw.powi(3)
            + LYTE_FORCE[1] * raw.powi(2)
            + LYTE_FORCE[2] * raw
            + LYTE_FORCE[3];
        let mut t = ProfileTable::new(vec![0.0]);
        t.insert_channel("sensor1", vec![raw]);
        calibrate(&mut t, "sensor1", &LYTE_FORCE).unwrap();
        assert_relative_eq!(t.channel("sensor1").unwrap()[0], direct, max_relative = 1e-12);
    }

    #[test]
    fn calibration_errors() {
        let mut t = ProfileTable::new(vec![0.0]);
        t.insert_channel("sensor1", vec![1.0]);
        assert!(matches!(calibrate(&mut t, "sensor1", &[]), Err(Error::Calibration(_))));
        assert!(matches!(
            calibrate(&mut t, "sensor1", &[f64::NAN, 1.0]),
            Err(Error::Calibration(_))
        ));
        assert!(matches!(
            calibrate(&mut t, "force", &[1.0]),
            Err(Error::Calibration(_))
        ));
    }

    #[test]
    fn steps_run_in_order() {
        let mut t = ProfileTable::new(vec![0.0, -1.0, -2.0]);
        t.insert_channel("a", vec![2.0, 4.0, 6.0]);
        t.insert_channel("b", vec![0.0, 0.0, 0.0]);
        let coefficients = [2.0, 0.0];
        let settings = ConditionSettings {
            smoothing: Some(2),
            average_columns: true,
            calibration: Some(&coefficients),
            column_to_plot: AVERAGE_CHANNEL,
            ..Default::default()
        };
        condition(&mut t, &settings).unwrap();
        let average = t.channel(AVERAGE_CHANNEL).unwrap();
        assert!(average[0].is_nan());
        // smoothed a = 3, 5; averaged with b = 1.5, 2.5; doubled
        assert_eq!(&average[1..], &[3.0, 5.0]);
    }
}
