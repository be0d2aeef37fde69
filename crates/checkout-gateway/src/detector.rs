//! Proxy to the external object detector.
//!
//! The detector takes a multipart form with a single `image` field and
//! answers `{ count, objects }`. Only the count feeds reconciliation.

use std::time::Duration;

use bytes::Bytes;
use checkout_common::DetectionResult;
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("detector answered {0}")]
    Status(u16),
}

pub struct DetectorClient {
    http: reqwest::Client,
    url: String,
}

impl DetectorClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn detect(
        &self,
        image: Bytes,
        content_type: &str,
    ) -> Result<DetectionResult, DetectorError> {
        let extension = match content_type {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        };
        let part = Part::bytes(image.to_vec())
            .file_name(format!("frame.{extension}"))
            .mime_str(content_type)?;
        let form = Form::new().part("image", part);

        let response = self.http.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::Status(status.as_u16()));
        }
        let result: DetectionResult = response.json().await?;
        debug!(count = result.count, "detector answered");
        Ok(result)
    }
}
