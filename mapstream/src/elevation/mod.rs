//! Single-shot elevation payloads.
//!
//! Unlike imagery, elevation arrives whole: a regular height grid
//! ([`ElevationGrid`]) or a pre-triangulated mesh ([`ElevationMesh`]). Both
//! parse in one call and report one tier to the cache, so the decode worker
//! treats them as a degenerate one-step pyramid.

mod grid;
mod mesh;

pub use grid::ElevationGrid;
pub use mesh::ElevationMesh;

use thiserror::Error;

/// Errors raised while parsing an elevation payload.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The payload ended before the declared data.
    #[error("truncated elevation payload")]
    Truncated,

    /// The payload violates the format.
    #[error("corrupt elevation payload: {0}")]
    Corrupt(&'static str),
}
