//! Stream fetching abstraction.
//!
//! The download worker speaks to a [`TileFetcher`], not to HTTP directly.
//! This allows dependency injection and easier testing by enabling scripted
//! fetchers in tests; the production implementation is [`HttpFetcher`].

mod http;

pub use http::HttpFetcher;

use bytes::Bytes;
use thiserror::Error;

use crate::cache::DatasetKind;
use crate::coord::TileKey;

/// Errors a fetch can produce. The two variants drive different retry
/// behavior in the scheduler: transient failures retry after the reset
/// window, missing streams stay failed until the record ages out.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The server has no stream for this tile. Any non-success status maps
    /// here; tile servers answer 404 for ocean tiles as a matter of course.
    #[error("stream not found")]
    NotFound,

    /// Connection, timeout or transport failure; worth retrying.
    #[error("transient fetch failure: {0}")]
    Transient(String),
}

/// One fetch request: a tile, the dataset wanted, and optionally a byte
/// range for ranged tier fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: TileKey,
    pub dataset: DatasetKind,
    /// Half-open byte range `[start, end)` into the stream body.
    pub byte_range: Option<(u64, u64)>,
}

impl FetchRequest {
    /// Request for a whole stream.
    pub fn whole(key: TileKey, dataset: DatasetKind) -> Self {
        Self {
            key,
            dataset,
            byte_range: None,
        }
    }

    /// Request for a byte range of the stream.
    pub fn ranged(key: TileKey, dataset: DatasetKind, start: u64, end: u64) -> Self {
        Self {
            key,
            dataset,
            byte_range: Some((start, end)),
        }
    }
}

/// Trait for stream retrieval.
pub trait TileFetcher: Send + Sync {
    /// Fetches the bytes for one request.
    fn fetch(&self, request: &FetchRequest) -> Result<Bytes, FetchError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Mock fetcher returning a fixed response.
    pub struct MockFetcher {
        pub response: Result<Bytes, FetchError>,
    }

    impl TileFetcher for MockFetcher {
        fn fetch(&self, _request: &FetchRequest) -> Result<Bytes, FetchError> {
            self.response.clone()
        }
    }

    #[test]
    fn test_mock_fetcher_success() {
        let mock = MockFetcher {
            response: Ok(Bytes::from_static(&[1, 2, 3, 4])),
        };
        let request = FetchRequest::whole(TileKey::new(0, 0, 0), DatasetKind::Imagery);
        assert_eq!(mock.fetch(&request).unwrap(), Bytes::from_static(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_mock_fetcher_not_found() {
        let mock = MockFetcher {
            response: Err(FetchError::NotFound),
        };
        let request = FetchRequest::whole(TileKey::new(0, 0, 0), DatasetKind::ElevationGrid);
        assert!(matches!(mock.fetch(&request), Err(FetchError::NotFound)));
    }
}
