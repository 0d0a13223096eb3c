//! Writes a directory of synthetic snow-profile files plus a `config.json`
//! that ties them together, for trying out the `snowplot` binary.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use serde_json::json;

const SAMPLE_RATE: f64 = 16_000.0;
const SNOW_DEPTH_CM: f64 = 120.0;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Hardness-like force signal: soft near the surface, a crust, a weak
/// layer, then increasingly dense snow.
fn snowpack_force(depth_cm: f64) -> f64 {
    let crust = 3.0 * (-(depth_cm - 30.0).powi(2) / 8.0).exp();
    let weak = -0.6 * (-(depth_cm - 55.0).powi(2) / 12.0).exp();
    0.2 + 0.02 * depth_cm + crust + weak
}

// ---------------------------------------------------------------------------
// Lyte probe (radicl export)
// ---------------------------------------------------------------------------

/// Probe held in the air, pushed through the snowpack, then at rest on the
/// ground. Acceleration is in g with gravity included.
fn write_lyte(dir: &Path, rng: &mut SimpleRng) -> Result<PathBuf> {
    let path = dir.join("lyte_radicl.csv");
    let mut file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "RADICL VERSION=0.5.1")?;
    writeln!(file, "FIRMWARE REVISION=1.46")?;
    writeln!(file, "SAMPLE RATE={SAMPLE_RATE}")?;
    writeln!(file, "ZPFO=50")?;

    let air = 400;
    let push = 1600;
    let rest = 400;
    let air_height_cm = 20.0;
    let travel_cm = SNOW_DEPTH_CM + air_height_cm;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["time", "depth", "sensor1", "sensor2", "sensor3", "acceleration"])?;
    for i in 0..air + push + rest {
        let t = i as f64 / SAMPLE_RATE;
        let progress = match i {
            i if i < air => 0.0,
            i if i < air + push => (i - air) as f64 / push as f64,
            _ => 1.0,
        };
        let depth = progress * travel_cm;
        let in_snow = depth > air_height_cm;
        let acc = match i {
            i if i < air => -1.0,
            i if i < air + 100 => -1.4,
            i if i < air + push - 100 => -1.0,
            i if i < air + push => -0.2,
            _ => -1.0,
        } + rng.gauss(0.0, 0.005);

        let snow_depth = (depth - air_height_cm).max(0.0);
        let force = if in_snow { 4000.0 + 800.0 * snowpack_force(snow_depth) } else { 4000.0 };
        let (ambient, active) = if in_snow { (40.0, 3200.0) } else { (3000.0, 600.0) };
        writer.write_record(&[
            format!("{t:.6}"),
            format!("{depth:.3}"),
            format!("{:.1}", force + rng.gauss(0.0, 15.0)),
            format!("{:.1}", ambient + rng.gauss(0.0, 10.0)),
            format!("{:.1}", active + rng.gauss(0.0, 10.0)),
            format!("{acc:.4}"),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

/// Mobile app export: no acceleration, `depth` holds percent travel.
fn write_lyte_app(dir: &Path, rng: &mut SimpleRng) -> Result<PathBuf> {
    let path = dir.join("lyte_app.csv");
    let mut file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "Serial Num.=252813070A020004")?;
    writeln!(file, "Firmware Version=2.0")?;
    writeln!(file, "Notes=pit wall")?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["Sample", "Depth", "Sensor1", "Sensor2", "Sensor3"])?;
    let samples = 1000;
    for i in 0..samples {
        let travel = i as f64 * 100.0 / (samples - 1) as f64;
        let force = 4000.0 + 800.0 * snowpack_force(travel / 100.0 * SNOW_DEPTH_CM);
        writer.write_record(&[
            i.to_string(),
            format!("{travel:.3}"),
            format!("{:.1}", force + rng.gauss(0.0, 15.0)),
            format!("{:.1}", 40.0 + rng.gauss(0.0, 5.0)),
            format!("{:.1}", 3200.0 + rng.gauss(0.0, 10.0)),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// SnowMicroPen CSV export
// ---------------------------------------------------------------------------

fn write_smp(dir: &Path, rng: &mut SimpleRng) -> Result<PathBuf> {
    let path = dir.join("smp_export.csv");
    let mut file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "# Timestamp: 2024-02-14T10:32:05")?;
    writeln!(file, "# Smp Serial: 4-7-9")?;
    writeln!(file, "# Location: Banner Summit")?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["Distance [mm]", "Force [N]"])?;
    let samples = 2400;
    let travel_mm = SNOW_DEPTH_CM * 10.0;
    for i in 0..samples {
        let distance = i as f64 * travel_mm / samples as f64;
        let force = (snowpack_force(distance / 10.0) + rng.gauss(0.0, 0.05)).max(0.0);
        writer.write_record(&[format!("{distance:.3}"), format!("{force:.4}")])?;
    }
    writer.flush()?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Layered observations
// ---------------------------------------------------------------------------

fn write_hand_hardness(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("hand_hardness.txt");
    let notes = "\
# field notes, depths in cm from the surface
-0-(-25) = F
-25-(-32) = 1F,P
-32-(-55) = 4F
-55-(-60) = F-
-60-(-120) = 1F+,K-
";
    fs::write(&path, notes).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn write_stratigraphy(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("stratigraphy.csv");
    let mut file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "# Site: Banner Summit")?;
    writeln!(file, "# Observer: field team")?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["Top (cm)", "Bottom (cm)", "Grain Size", "Hand Hardness"])?;
    for (top, bottom, grain, hardness) in [
        (120, 95, "< 1 mm", "F"),
        (95, 88, "1-2 mm", "P"),
        (88, 65, "1-2 mm", "4F"),
        (65, 60, "2-4 mm", "F-"),
        (60, 0, "4-6 mm", "1F+"),
    ] {
        writer.write_record(&[top.to_string(), bottom.to_string(), grain.into(), hardness.into()])?;
    }
    writer.flush()?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// NIR photo
// ---------------------------------------------------------------------------

fn write_nir(dir: &Path, rng: &mut SimpleRng) -> Result<PathBuf> {
    let path = dir.join("nir.png");
    let (width, height) = (60u32, 240u32);
    let img = GrayImage::from_fn(width, height, |_, y| {
        let depth_cm = y as f64 / height as f64 * SNOW_DEPTH_CM;
        let brightness = 220.0 - 60.0 * snowpack_force(depth_cm) + rng.gauss(0.0, 4.0);
        Luma([brightness.clamp(0.0, 255.0) as u8])
    });
    img.save(&path).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn main() -> Result<()> {
    let dir = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| "sample_data".into()));
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut rng = SimpleRng::new(42);

    let lyte = write_lyte(&dir, &mut rng)?;
    let lyte_app = write_lyte_app(&dir, &mut rng)?;
    let smp = write_smp(&dir, &mut rng)?;
    let hardness = write_hand_hardness(&dir)?;
    let strat = write_stratigraphy(&dir)?;
    let nir = write_nir(&dir, &mut rng)?;

    let config = json!({
        "output": {"num_subplots": 4, "dpi": 150},
        "labeling": {"title": "Banner Summit, 2024-02-14"},
        "lyte_probe": {
            "filename": file_name(&lyte),
            "plot_id": 1,
            "depth_method": "avg",
            "autocrop": true,
            "smoothing": 50,
            "smoothing_center": true,
            "calibration_coefficients": "-1.46799e-06, 0.01441, -50.765, 64700.4",
            "plot_labels": ["(Crust > -30)", "(Weak layer > -55)"]
        },
        "snow_micropen": {
            "filename": file_name(&smp),
            "plot_id": 2,
            "smoothing": 20,
            "bottom_depth": -100
        },
        "hand_hardness": {
            "filename": file_name(&hardness),
            "plot_id": 3,
            "problem_layer": -55
        },
        "grain_size": {
            "filename": file_name(&strat),
            "plot_id": 3,
            "xlabel": "Grain size class"
        },
        "nir_photo": {
            "filename": file_name(&nir),
            "plot_id": 4,
            "assumed_depth": 1.2
        }
    });
    // Only one section per kind fits in a config; the app export gets its own.
    let app_config = json!({
        "lyte_probe": {
            "filename": file_name(&lyte_app),
            "plot_id": 1,
            "average_columns": true,
            "smoothing": 25
        }
    });
    let app_path = dir.join("config_app.json");
    fs::write(&app_path, serde_json::to_string_pretty(&app_config)?)
        .with_context(|| format!("writing {}", app_path.display()))?;

    let config_path = dir.join("config.json");
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("writing {}", config_path.display()))?;

    println!("Wrote sample profiles and {} to {}", file_name(&config_path), dir.display());
    Ok(())
}
