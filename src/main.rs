use std::path::Path;

use anyhow::{bail, Context};
use log::{debug, info, warn};
use snowplot::profile::header_summary;
use snowplot::{BuildPolicy, ProfileRegistry, Sections};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let (policy, config_path) = match (args.next(), args.next()) {
        (Some(flag), Some(path)) if flag == "--keep-going" => (BuildPolicy::Continue, path),
        (Some(path), None) => (BuildPolicy::FailFast, path),
        _ => bail!("usage: snowplot [--keep-going] <config.json>"),
    };
    let config_path = Path::new(&config_path);

    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let sections: Sections = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    let base_dir = config_path.parent().unwrap_or(Path::new("."));

    let registry = ProfileRegistry::builder(base_dir)
        .policy(policy)
        .build(&sections)?;

    for profile in registry.profiles() {
        info!(
            "{}: {} samples, surface at {:.2} cm",
            profile.name,
            profile.series.len(),
            profile.surface_depth
        );
        for (key, value) in header_summary(profile) {
            debug!("  {key} = {value}");
        }
    }
    for failure in registry.failures() {
        warn!("skipped {failure}");
    }

    println!("{}", serde_json::to_string_pretty(&registry)?);
    Ok(())
}
