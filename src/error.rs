use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error – what went wrong inside one pipeline stage
// ---------------------------------------------------------------------------

/// Errors raised while reading and normalizing a single profile.
///
/// All of these are data or configuration quality problems: none of them is
/// retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unrecognized file structure: {0}")]
    Format(String),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("cannot resolve depth: {0}")]
    DepthResolution(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("calibration: {0}")]
    Calibration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for stage-level operations.
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Stage + ProfileError – where it went wrong and for which profile
// ---------------------------------------------------------------------------

/// Pipeline stage a profile error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Open,
    DepthResolution,
    SurfaceAlignment,
    Conditioning,
    LayerExpansion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Configuration => "configuration",
            Stage::Open => "open",
            Stage::DepthResolution => "depth resolution",
            Stage::SurfaceAlignment => "surface alignment",
            Stage::Conditioning => "conditioning",
            Stage::LayerExpansion => "layer expansion",
        };
        write!(f, "{s}")
    }
}

/// A stage error tagged with the profile (config section) it aborted.
#[derive(Error, Debug)]
#[error("profile `{profile}` failed during {stage}: {source}")]
pub struct ProfileError {
    pub profile: String,
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl ProfileError {
    pub fn new(profile: impl Into<String>, stage: Stage, source: Error) -> Self {
        Self {
            profile: profile.into(),
            stage,
            source,
        }
    }
}

/// Attach profile name and stage to a stage-level result.
pub(crate) trait AtStage<T> {
    fn at(self, profile: &str, stage: Stage) -> std::result::Result<T, ProfileError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, profile: &str, stage: Stage) -> std::result::Result<T, ProfileError> {
        self.map_err(|e| ProfileError::new(profile, stage, e))
    }
}
