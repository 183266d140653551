//! One-shot image generation client

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ImageConfig;
use crate::{Error, Result};

/// Path of the image generation endpoint under the backend base URL
pub const GENERATE_IMAGE_PATH: &str = "api/chat/generate_image";

/// Request body for the image endpoint
#[derive(Debug, Serialize)]
struct GenerateImageRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u32,
}

/// Response body from the image endpoint
#[derive(Debug, Deserialize)]
struct GenerateImageResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// Client for the backend image generation endpoint
#[derive(Debug, Clone)]
pub struct ImageClient {
    endpoint: Url,
    options: ImageConfig,
    client: reqwest::Client,
}

impl ImageClient {
    /// Create a new image client
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint URL cannot be built from `base_url`
    pub fn new(base_url: &Url, options: ImageConfig) -> Result<Self> {
        Self::with_client(base_url, options, reqwest::Client::new())
    }

    /// Create a new image client sharing an existing HTTP client
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint URL cannot be built from `base_url`
    pub fn with_client(base_url: &Url, options: ImageConfig, client: reqwest::Client) -> Result<Self> {
        let endpoint = base_with_slash(base_url)?.join(GENERATE_IMAGE_PATH)?;
        Ok(Self {
            endpoint,
            options,
            client,
        })
    }

    /// Endpoint the client posts to
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Generate an image for `prompt` and return the first image reference
    ///
    /// No retry is attempted.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, the backend answers with a
    /// non-success status, or the response carries no image
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateImageRequest {
            prompt,
            model: &self.options.model,
            size: &self.options.size,
            quality: &self.options.quality,
            n: self.options.n,
        };

        tracing::debug!(endpoint = %self.endpoint, model = %self.options.model, "requesting image");

        let response = self.client.post(self.endpoint.clone()).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::ImageGeneration(format!("backend returned {status}: {text}")));
        }

        let parsed: GenerateImageResponse = response.json().await?;
        parsed
            .images
            .into_iter()
            .next()
            .ok_or_else(|| Error::ImageGeneration("response contained no images".to_string()))
    }
}

/// Ensure `base` ends with a slash so `join` appends instead of replacing
fn base_with_slash(base: &Url) -> Result<Url> {
    if base.path().ends_with('/') {
        Ok(base.clone())
    } else {
        Ok(Url::parse(&format!("{}/", base.as_str()))?)
    }
}
