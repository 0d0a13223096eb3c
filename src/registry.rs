use std::path::{Path, PathBuf};

use log::{error, info};
use serde::Serialize;

use crate::color::generate_palette;
use crate::config::{ControlSection, OutputConfig, ProfileConfig, Sections};
use crate::data::loader::{PenetrometerReader, SmpCsvExport};
use crate::error::{Error, ProfileError, Stage};
use crate::profile::{build_profile, BuildContext, Profile, ProfileKind};

/// What to do when one profile fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildPolicy {
    /// Abort on the first failing section.
    #[default]
    FailFast,
    /// Keep going; failures are collected on the registry.
    Continue,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`ProfileRegistry`] from configuration sections.
pub struct RegistryBuilder {
    base_dir: PathBuf,
    policy: BuildPolicy,
    penetrometer: Box<dyn PenetrometerReader>,
}

impl RegistryBuilder {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            policy: BuildPolicy::default(),
            penetrometer: Box::new(SmpCsvExport),
        }
    }

    pub fn policy(self, policy: BuildPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Use `reader` for penetrometer files (e.g. a binary `.pnt` decoder).
    pub fn penetrometer_reader(self, reader: Box<dyn PenetrometerReader>) -> Self {
        Self {
            penetrometer: reader,
            ..self
        }
    }

    /// Map every section to a control section or a profile kind, then run
    /// the pipeline for each data section in configuration order.
    pub fn build(self, sections: &Sections) -> Result<ProfileRegistry, ProfileError> {
        let mut output = OutputConfig::default();
        let mut requested = Vec::new();
        let mut failures = Vec::new();

        for (name, body) in sections {
            match ControlSection::from_name(name) {
                Some(ControlSection::Output) => {
                    output = OutputConfig::from_value(body)
                        .map_err(|e| ProfileError::new(name.as_str(), Stage::Configuration, e))?;
                }
                Some(_) => {}
                None => requested.push((name.as_str(), body)),
            }
        }

        let num_subplots = output.num_subplots.unwrap_or(requested.len());
        let colors = generate_palette(requested.len());
        let mut registry = ProfileRegistry {
            profiles: Vec::with_capacity(requested.len()),
            num_subplots,
            failures: Vec::new(),
        };

        for (i, (name, body)) in requested.into_iter().enumerate() {
            let ctx = BuildContext {
                base_dir: &self.base_dir,
                penetrometer: self.penetrometer.as_ref(),
                default_color: &colors[i],
            };
            match build_section(name, body, num_subplots, &ctx) {
                Ok(profile) => {
                    info!(
                        "Built {} profile: {} samples on subplot {}",
                        profile.name,
                        profile.series.len(),
                        profile.plot_id + 1
                    );
                    registry.profiles.push(profile);
                }
                Err(e) if self.policy == BuildPolicy::Continue => {
                    error!("{e}");
                    failures.push(e);
                }
                Err(e) => return Err(e),
            }
        }
        registry.failures = failures;
        Ok(registry)
    }
}

fn build_section(
    name: &str,
    body: &serde_json::Value,
    num_subplots: usize,
    ctx: &BuildContext,
) -> Result<Profile, ProfileError> {
    let config_error = |e: Error| ProfileError::new(name, Stage::Configuration, e);

    let kind = ProfileKind::from_section(name).ok_or_else(|| {
        config_error(Error::Configuration(format!(
            "section `{name}` is not a known profile type"
        )))
    })?;
    let cfg = ProfileConfig::from_value(body).map_err(config_error)?;
    cfg.validate(num_subplots).map_err(config_error)?;
    build_profile(name, kind, &cfg, ctx)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All normalized profiles of one figure, in configuration order.
#[derive(Debug, Serialize)]
pub struct ProfileRegistry {
    profiles: Vec<Profile>,
    num_subplots: usize,
    #[serde(skip)]
    failures: Vec<ProfileError>,
}

impl ProfileRegistry {
    pub fn builder(base_dir: impl AsRef<Path>) -> RegistryBuilder {
        RegistryBuilder::new(base_dir)
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Profiles drawn on subplot `plot_id` (zero-based). Several profiles may
    /// share a subplot; they are overlaid.
    pub fn on_subplot(&self, plot_id: usize) -> impl Iterator<Item = &Profile> {
        self.profiles.iter().filter(move |p| p.plot_id == plot_id)
    }

    pub fn num_subplots(&self) -> usize {
        self.num_subplots
    }

    /// Sections that failed under [`BuildPolicy::Continue`].
    pub fn failures(&self) -> &[ProfileError] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sections(value: serde_json::Value) -> Sections {
        value.as_object().cloned().unwrap()
    }

    fn hardness_file() -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "0-10 = F\n10-30 = 4F-,P").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn control_sections_are_skipped() {
        let file = hardness_file();
        let cfg = sections(json!({
            "hand_hardness": {"filename": file.path(), "plot_id": 1},
            "output": {"dpi": 50, "show_plot": false},
            "labeling": {"title": "Pit 1"}
        }));
        let registry = ProfileRegistry::builder(".").build(&cfg).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.num_subplots(), 1);
        let profile = registry.get("hand_hardness").unwrap();
        assert_eq!(profile.plot_id, 0);
        // positive snow heights are inverted
        assert_eq!(profile.series.depth[0], -30.0);
        assert!(profile.presentation.color.starts_with('#'));
    }

    #[test]
    fn unknown_section_is_configuration_error() {
        let cfg = sections(json!({"weather": {"filename": "x", "plot_id": 1}}));
        let err = ProfileRegistry::builder(".").build(&cfg).unwrap_err();
        assert_eq!(err.stage, Stage::Configuration);
        assert_eq!(err.profile, "weather");
    }

    #[test]
    fn plot_id_beyond_subplots_is_rejected() {
        let file = hardness_file();
        let cfg = sections(json!({
            "hand_hardness": {"filename": file.path(), "plot_id": 3},
            "output": {"num_subplots": 2}
        }));
        let err = ProfileRegistry::builder(".").build(&cfg).unwrap_err();
        assert!(matches!(err.source, Error::Configuration(_)));
    }

    #[test]
    fn profiles_may_share_a_subplot() {
        let file = hardness_file();
        let cfg = sections(json!({
            "hand_hardness": {"filename": file.path(), "plot_id": 1},
            "grain_size": {"filename": "missing.csv", "plot_id": 1},
        }));
        let registry = ProfileRegistry::builder(".")
            .policy(BuildPolicy::Continue)
            .build(&cfg)
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.failures().len(), 1);
        assert_eq!(registry.failures()[0].profile, "grain_size");
        assert_eq!(registry.on_subplot(0).count(), 1);
    }

    #[test]
    fn fail_fast_stops_at_first_error() {
        let cfg = sections(json!({
            "grain_size": {"filename": "missing.csv", "plot_id": 1},
        }));
        let err = ProfileRegistry::builder(".").build(&cfg).unwrap_err();
        assert_eq!(err.stage, Stage::Open);
    }
}
