//! Tile records and the concurrent cache table.
//!
//! A [`TileRecord`] carries the full streaming state of one tile: per
//! dataset the download state machine, the decode cursor and the decoded
//! payloads. The [`TileCacheTable`] maps tile keys to records and is read
//! by the render consumer while both workers mutate the records inside.

mod record;
mod table;

pub use record::{DatasetStream, DecodedData, StreamState, TierImage, TileRecord};
pub use table::TileCacheTable;

/// The three datasets a tile can stream, as one closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    /// Progressive wavelet imagery.
    Imagery,
    /// Regular elevation grid (fallback when no mesh exists).
    ElevationGrid,
    /// Pre-triangulated elevation mesh.
    ElevationMesh,
}

impl DatasetKind {
    /// Download priority order: imagery first, then mesh, then grid.
    pub const DOWNLOAD_PRIORITY: [DatasetKind; 3] = [
        DatasetKind::Imagery,
        DatasetKind::ElevationMesh,
        DatasetKind::ElevationGrid,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            DatasetKind::Imagery => 0,
            DatasetKind::ElevationGrid => 1,
            DatasetKind::ElevationMesh => 2,
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DatasetKind::Imagery => "imagery",
            DatasetKind::ElevationGrid => "elevation-grid",
            DatasetKind::ElevationMesh => "elevation-mesh",
        };
        f.write_str(name)
    }
}
