//! MapStream - progressive map tile streaming for a virtual globe
//!
//! This library streams, progressively decodes, and caches multi-resolution
//! map tiles (imagery and elevation) as a viewpoint moves over a globe. Two
//! background workers cooperate over a shared tile table: a download
//! dispatcher that fetches the nearest missing tile streams, and a decode
//! dispatcher that refines downloaded imagery one resolution tier at a time,
//! breadth-first across all tiles in view.
//!
//! The renderer is an external consumer: it requests tiles through
//! [`TilePipeline::request`], reads per-tier ready flags and pixel buffers,
//! and never mutates pipeline state.

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod coord;
pub mod dispatch;
pub mod elevation;
pub mod fetch;
pub mod pool;
pub mod telemetry;

pub use cache::{DatasetKind, StreamState, TileCacheTable, TileRecord};
pub use codec::{CodecError, DecodeSession, StreamHeader, TierPixels};
pub use config::PipelineConfig;
pub use context::{ViewContext, Viewpoint};
pub use coord::{LayerGeometry, LayerSet, TileKey};
pub use dispatch::{TilePipeline, TileView, WorkSignal};
pub use elevation::{ElevationGrid, ElevationMesh, FormatError};
pub use fetch::{FetchError, FetchRequest, HttpFetcher, TileFetcher};
pub use pool::{BufferPool, PoolExhausted, PoolSlot};
pub use telemetry::{MetricsSnapshot, PipelineMetrics};
