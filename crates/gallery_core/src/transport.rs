//! Delete/reorder transport. Both endpoints are fire-and-forget: the
//! coordinator never acts on the response, and a failed call leaves the
//! views diverged until the next page load.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::ImageId,
    protocol::{delete_image_path, ReorderRequest, REORDER_PATH},
};
use url::Url;

use crate::error::GalleryError;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn delete_image(&self, image: &ImageId) -> Result<()>;
    async fn push_order(&self, order: &[ImageId]) -> Result<()>;
}

/// Placeholder transport for coordinators constructed without one.
pub struct MissingTransport;

#[async_trait]
impl Transport for MissingTransport {
    async fn delete_image(&self, _image: &ImageId) -> Result<()> {
        Err(anyhow!("transport is unavailable"))
    }

    async fn push_order(&self, _order: &[ImageId]) -> Result<()> {
        Err(anyhow!("transport is unavailable"))
    }
}

/// HTTP transport against the page's own origin. Endpoint paths are
/// origin-relative, matching the server routes.
pub struct HttpTransport {
    http: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, GalleryError> {
        let base = Url::parse(base_url)
            .map_err(|err| GalleryError::Config(format!("invalid base url '{base_url}': {err}")))?;
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("joining endpoint path '{path}'"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn delete_image(&self, image: &ImageId) -> Result<()> {
        let url = self.endpoint(&delete_image_path(image))?;
        self.http.post(url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn push_order(&self, order: &[ImageId]) -> Result<()> {
        let url = self.endpoint(REORDER_PATH)?;
        self.http
            .post(url)
            .form(&ReorderRequest::new(order))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
