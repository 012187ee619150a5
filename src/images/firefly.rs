//! Adobe Firefly image client

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::FireflyConfig;
use crate::error::ImageError;

use super::{AspectRatio, ImageBackend, RenderedImage};

/// Firefly Services client (text-to-image, one variation per request).
#[derive(Clone)]
pub struct FireflyClient {
    bearer_token: String,
    client_id: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    outputs: Vec<Output>,
}

#[derive(Debug, Deserialize)]
struct Output {
    image: OutputImage,
}

#[derive(Debug, Deserialize)]
struct OutputImage {
    url: String,
}

impl FireflyClient {
    pub fn new(config: &FireflyConfig) -> Self {
        Self {
            bearer_token: config.bearer_token.clone(),
            client_id: config.client_id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    async fn download(&self, url: &str) -> Result<RenderedImage, ImageError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let extension = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(extension_for)
            .unwrap_or("jpeg")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(RenderedImage { bytes, extension })
    }
}

/// Map a failed Firefly exchange onto the image error classes.
fn classify_failure(status: StatusCode, body: String) -> ImageError {
    match status {
        StatusCode::UNAUTHORIZED if body.to_lowercase().contains("expired") => {
            ImageError::SessionExpired
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ImageError::Unauthorized(body),
        StatusCode::BAD_REQUEST | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
            ImageError::Denied(body)
        }
        s => ImageError::Api { status: s.as_u16(), body },
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().map(str::trim) {
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        _ => "jpeg",
    }
}

#[async_trait]
impl ImageBackend for FireflyClient {
    async fn text_to_image(
        &self,
        description: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<RenderedImage, ImageError> {
        let (width, height) = aspect_ratio.dimensions();
        let request = json!({
            "prompt": description,
            "numVariations": 1,
            "size": {"width": width, "height": height}
        });

        debug!("Requesting {} image: {}", aspect_ratio.as_str(), description);

        let response = self
            .client
            .post(format!("{}/v3/images/generate", self.base_url))
            .bearer_auth(&self.bearer_token)
            .header("x-api-key", &self.client_id)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let generated: GenerateResponse = response.json().await?;
        let output = generated.outputs.into_iter().next().ok_or_else(|| ImageError::Api {
            status: status.as_u16(),
            body: "no outputs in response".to_string(),
        })?;

        self.download(&output.image.url).await
    }
}
