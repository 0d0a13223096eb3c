/// Data layer: core types and the per-profile pipeline stages.
///
/// Architecture:
/// ```text
///  .csv / .txt / .png / .jpg
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → RawTable (+ header, layers)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  depth    │  resolve depth axis, surface, autocrop
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  align    │  sensor offsets → shift → sort → crop bottom
///   └──────────┘
///        │
///        ▼
///   ┌───────────┐
///   │ condition  │  smooth / average / calibrate
///   └───────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ layered   │  layer records → step outline
///   └──────────┘
/// ```

pub mod align;
pub mod condition;
pub mod depth;
pub mod layered;
pub mod loader;
pub mod model;
pub mod scale;
