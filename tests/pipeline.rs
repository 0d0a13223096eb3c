use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use image::{GrayImage, Luma};
use serde_json::json;
use snowplot::{BuildPolicy, ProfileKind, ProfileRegistry, Sections, Stage};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn sections(value: serde_json::Value) -> Sections {
    value.as_object().cloned().unwrap_or_default()
}

fn write_lyte_app(dir: &Path) -> std::io::Result<()> {
    let mut text = String::from("Serial Num.=ABC123\nSample,Depth,Sensor1,Sensor2,Sensor3\n");
    for i in 0..=20 {
        text.push_str(&format!("{i},{},10,50,60\n", i * 5));
    }
    fs::write(dir.join("lyte.csv"), text)
}

fn write_stratigraphy(dir: &Path) -> std::io::Result<()> {
    fs::write(
        dir.join("strat.csv"),
        "# Site: Banner Summit\n\
         top,bottom,grain size,hand hardness\n\
         100,80,< 1 mm,F\n\
         80,40,2-4 mm,1F\n",
    )
}

fn write_nir(dir: &Path) -> image::ImageResult<()> {
    let img = GrayImage::from_fn(4, 11, |_, y| Luma([(y * 10) as u8]));
    img.save(dir.join("nir.png"))
}

#[test]
fn lyte_export_is_calibrated_relative_to_config_dir() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_lyte_app(dir.path())?;

    let cfg = sections(json!({
        "lyte_probe": {
            "filename": "lyte.csv",
            "plot_id": 1,
            "calibration_coefficients": "2, 1"
        }
    }));
    let registry = ProfileRegistry::builder(dir.path()).build(&cfg)?;
    let profile = registry.get("lyte_probe").ok_or("profile missing")?;

    assert_eq!(profile.kind, ProfileKind::LyteProbe);
    assert_eq!(profile.column_to_plot, "sensor1");
    assert_eq!(profile.header_len, 1);
    assert!(profile.header.contains_key("serial num."));
    assert!(profile.series.is_ascending());
    assert_eq!(profile.plotted().len(), 21);
    for v in profile.plotted() {
        assert_relative_eq!(*v, 21.0);
    }
    Ok(())
}

#[test]
fn grain_size_from_stratigraphy_csv() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_stratigraphy(dir.path())?;

    let cfg = sections(json!({
        "grain_size": {"filename": "strat.csv", "plot_id": 1}
    }));
    let registry = ProfileRegistry::builder(dir.path()).build(&cfg)?;
    let profile = registry.get("grain_size").ok_or("profile missing")?;

    assert!(profile.is_layered);
    assert_eq!(profile.header_len, 1);
    assert_eq!(profile.series.depth, vec![-60.0, -20.0, 0.0]);

    let steps = profile.stepped().ok_or("no step outline")?;
    let values: Vec<f64> = steps.iter().filter(|s| !s.is_pad).map(|s| s.value).collect();
    assert_eq!(values, vec![1.0, 1.0, 3.0, 3.0]);
    assert!(steps.first().is_some_and(|s| s.is_pad && s.value == 0.0));
    assert!(steps.last().is_some_and(|s| s.is_pad && s.depth == -60.0));
    Ok(())
}

#[test]
fn nir_photo_uses_assumed_depth_in_meters() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_nir(dir.path())?;

    let cfg = sections(json!({
        "nir_photo": {"filename": "nir.png", "plot_id": 1, "assumed_depth": 1.0}
    }));
    let registry = ProfileRegistry::builder(dir.path()).build(&cfg)?;
    let profile = registry.get("nir_photo").ok_or("profile missing")?;

    assert_eq!(profile.series.len(), 11);
    assert_relative_eq!(profile.series.depth[0], -100.0);
    assert_relative_eq!(profile.series.depth[10], 0.0);
    // deepest pixel row is the brightest
    assert_relative_eq!(profile.plotted()[0], 100.0);
    assert_relative_eq!(profile.plotted()[10], 0.0);
    Ok(())
}

#[test]
fn continue_policy_collects_failures_and_overlays() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_lyte_app(dir.path())?;
    write_stratigraphy(dir.path())?;
    write_nir(dir.path())?;

    let cfg = sections(json!({
        "output": {"num_subplots": 2, "dpi": 300},
        "lyte_probe": {"filename": "lyte.csv", "plot_id": 1},
        "hand_hardness": {"filename": "strat.csv", "plot_id": 1, "title": "Pit A"},
        "nir_photo": {"filename": "nir.png", "plot_id": 2}
    }));
    let registry = ProfileRegistry::builder(dir.path())
        .policy(BuildPolicy::Continue)
        .build(&cfg)?;

    assert_eq!(registry.num_subplots(), 2);
    assert_eq!(registry.len(), 2);
    let names: Vec<&str> = registry.on_subplot(0).map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["lyte_probe", "hand_hardness"]);
    assert_eq!(registry.on_subplot(1).count(), 0);

    let failure = &registry.failures()[0];
    assert_eq!(failure.profile, "nir_photo");
    assert_eq!(failure.stage, Stage::DepthResolution);

    let hardness = registry.get("hand_hardness").ok_or("profile missing")?;
    assert_eq!(hardness.presentation.title, "Pit A");
    assert_ne!(
        hardness.presentation.color,
        registry.profiles()[0].presentation.color
    );
    Ok(())
}

#[test]
fn registry_serializes_for_the_renderer() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_stratigraphy(dir.path())?;

    let cfg = sections(json!({
        "hand_hardness": {"filename": "strat.csv", "plot_id": 1}
    }));
    let registry = ProfileRegistry::builder(dir.path()).build(&cfg)?;
    let value = serde_json::to_value(&registry)?;

    assert_eq!(value["num_subplots"], 1);
    let profile = &value["profiles"][0];
    assert_eq!(profile["kind"], "hand_hardness");
    assert_eq!(profile["column_to_plot"], "numeric");
    assert_eq!(profile["presentation"]["fill_solid"], true);
    Ok(())
}
