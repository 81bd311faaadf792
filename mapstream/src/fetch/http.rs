//! HTTP fetcher backed by a blocking reqwest client.

use bytes::Bytes;
use tracing::debug;

use super::{FetchError, FetchRequest, TileFetcher};
use crate::cache::DatasetKind;
use crate::coord::TileKey;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches tile streams over HTTP.
///
/// URL layout is `{base}/{layer}/{lon}_{lat}.{ext}` with the extension
/// selecting the dataset: `wts` imagery, `hgt` elevation grid, `net`
/// elevation mesh.
pub struct HttpFetcher {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the default timeout.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Server root, without a trailing slash
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a fetcher with a custom timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Transient(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// The URL a request resolves to.
    pub fn url_for(&self, key: &TileKey, dataset: DatasetKind) -> String {
        let ext = match dataset {
            DatasetKind::Imagery => "wts",
            DatasetKind::ElevationGrid => "hgt",
            DatasetKind::ElevationMesh => "net",
        };
        format!(
            "{}/{}/{}_{}.{}",
            self.base_url, key.layer, key.lon, key.lat, ext
        )
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Bytes, FetchError> {
        let url = self.url_for(&request.key, request.dataset);
        let mut builder = self.client.get(&url);
        if let Some((start, end)) = request.byte_range {
            // HTTP ranges are inclusive on both ends.
            builder = builder.header("Range", format!("bytes={}-{}", start, end.saturating_sub(1)));
        }

        let response = builder
            .send()
            .map_err(|e| FetchError::Transient(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            debug!(%url, status = %response.status(), "stream not available");
            return Err(FetchError::NotFound);
        }

        response
            .bytes()
            .map_err(|e| FetchError::Transient(format!("failed to read response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_layout_per_dataset() {
        let fetcher = HttpFetcher::new("http://tiles.example.com/world").unwrap();
        let key = TileKey::new(2, 100_000, 50_000);
        assert_eq!(
            fetcher.url_for(&key, DatasetKind::Imagery),
            "http://tiles.example.com/world/2/100000_50000.wts"
        );
        assert_eq!(
            fetcher.url_for(&key, DatasetKind::ElevationGrid),
            "http://tiles.example.com/world/2/100000_50000.hgt"
        );
        assert_eq!(
            fetcher.url_for(&key, DatasetKind::ElevationMesh),
            "http://tiles.example.com/world/2/100000_50000.net"
        );
    }

    #[test]
    fn test_negative_coordinates_in_url() {
        let fetcher = HttpFetcher::new("http://tiles.example.com").unwrap();
        let key = TileKey::new(0, -9_000_000, -4_500_000);
        assert_eq!(
            fetcher.url_for(&key, DatasetKind::Imagery),
            "http://tiles.example.com/0/-9000000_-4500000.wts"
        );
    }
}
