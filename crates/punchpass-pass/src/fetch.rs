//! Artwork retrieval ("fetch by URL").

use async_trait::async_trait;

use crate::error::FetchError;

/// Upper bound on a fetched image. Pass artwork is a few hundred kilobytes.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Fetches raw image bytes by location.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetcher used when no artwork source is configured; every lookup fails,
/// so bundles fall back to generated art.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImages;

#[async_trait]
impl ImageFetcher for NoImages {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Request(format!("no image source for {location}")))
    }
}

#[cfg(feature = "http-fetch")]
pub use http::HttpImageFetcher;

#[cfg(feature = "http-fetch")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use tracing::debug;

    use super::{FetchError, ImageFetcher, MAX_IMAGE_BYTES};

    /// [`ImageFetcher`] over HTTP(S).
    #[derive(Debug, Clone)]
    pub struct HttpImageFetcher {
        http: reqwest::Client,
    }

    impl HttpImageFetcher {
        /// Build a fetcher with a 10 second overall timeout.
        pub fn new() -> Result<Self, FetchError> {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| FetchError::Request(e.to_string()))?;
            Ok(Self { http })
        }

        pub const fn from_client(http: reqwest::Client) -> Self {
            Self { http }
        }
    }

    #[async_trait]
    impl ImageFetcher for HttpImageFetcher {
        async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
            if !(location.starts_with("http://") || location.starts_with("https://")) {
                return Err(FetchError::InvalidUrl(location.to_string()));
            }

            let mut response = self
                .http
                .get(location)
                .send()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            if let Some(declared) = response.content_length() {
                let declared = usize::try_from(declared).unwrap_or(usize::MAX);
                if declared > MAX_IMAGE_BYTES {
                    return Err(FetchError::TooLarge(declared));
                }
            }

            // Bodies without a usable length are capped as they stream in.
            let mut bytes = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?
            {
                if bytes.len() + chunk.len() > MAX_IMAGE_BYTES {
                    return Err(FetchError::TooLarge(bytes.len() + chunk.len()));
                }
                bytes.extend_from_slice(&chunk);
            }
            debug!(location, size = bytes.len(), "Fetched image");
            Ok(bytes)
        }
    }
}
