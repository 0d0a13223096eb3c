//! Snow-profile normalization.
//!
//! Reads vertical snowpack measurements from several instrument families
//! (Lyte probe, SnowMicroPen, hand-hardness and grain-size observations,
//! NIR photos), resolves a depth axis for each, aligns them to a common
//! snow surface and conditions the plotted signal. The result is a
//! [`ProfileRegistry`] of depth-indexed [`Profile`]s ready for rendering.
//!
//! ```text
//!  config sections ──▶ RegistryBuilder ──▶ ProfileRegistry
//!                          │
//!                          ▼ per section
//!   open ─▶ resolve depth ─▶ align ─▶ condition ─▶ expand layers
//! ```

pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod profile;
pub mod registry;

pub use config::{ProfileConfig, Sections};
pub use error::{Error, ProfileError, Stage};
pub use profile::{Profile, ProfileKind};
pub use registry::{BuildPolicy, ProfileRegistry, RegistryBuilder};
