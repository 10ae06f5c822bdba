//! services/api/src/adapters/media.rs
//!
//! Adapters for the media hosting boundaries: re-hosting transient video
//! URLs on durable storage (`MediaRelayService`) and hosting raw inline
//! image payloads (`ImageHostService`).

use async_trait::async_trait;
use companion_core::ports::{ImageHostService, MediaRelayService, PortError, PortResult};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Media Relay (durable video hosting)
//=========================================================================================

#[derive(Deserialize)]
struct VideoUploadResponse {
    secure_url: String,
}

/// An adapter that implements `MediaRelayService` against a Cloudinary-style
/// unsigned upload endpoint. The remote fetches the transient URL itself, so
/// the video bytes never pass through this process.
#[derive(Clone)]
pub struct CloudMediaRelay {
    client: reqwest::Client,
    base_url: String,
    cloud_name: String,
    upload_preset: String,
}

impl CloudMediaRelay {
    /// Creates a new `CloudMediaRelay`.
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        cloud_name: String,
        upload_preset: String,
    ) -> Self {
        Self {
            client,
            base_url,
            cloud_name,
            upload_preset,
        }
    }
}

#[async_trait]
impl MediaRelayService for CloudMediaRelay {
    async fn persist_video(&self, transient_url: &str) -> PortResult<String> {
        let response = self
            .client
            .post(format!(
                "{}/{}/video/upload",
                self.base_url, self.cloud_name
            ))
            .form(&[
                ("file", transient_url),
                ("upload_preset", self.upload_preset.as_str()),
                ("folder", "idle-videos"),
            ])
            .send()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Upstream(format!(
                "video upload failed with status {}",
                response.status()
            )));
        }

        let uploaded: VideoUploadResponse = response
            .json()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;
        Ok(uploaded.secure_url)
    }
}

//=========================================================================================
// Image Host (durable still-image hosting)
//=========================================================================================

#[derive(Serialize)]
struct ImageUploadRequest<'a> {
    image: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ImageUploadResponse {
    data: ImageUploadData,
}

#[derive(Deserialize)]
struct ImageUploadData {
    link: String,
}

/// An adapter that implements `ImageHostService` against an imgur-style API.
#[derive(Clone)]
pub struct ImgurHost {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl ImgurHost {
    /// Creates a new `ImgurHost`.
    pub fn new(client: reqwest::Client, base_url: String, client_id: String) -> Self {
        Self {
            client,
            base_url,
            client_id,
        }
    }
}

#[async_trait]
impl ImageHostService for ImgurHost {
    async fn host_image(&self, img_base64: &str) -> PortResult<String> {
        let response = self
            .client
            .post(format!("{}/3/image", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Client-ID {}", self.client_id),
            )
            .json(&ImageUploadRequest {
                image: img_base64,
                kind: "base64",
            })
            .send()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Upstream(format!(
                "image upload failed with status {}",
                response.status()
            )));
        }

        let uploaded: ImageUploadResponse = response
            .json()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;
        Ok(uploaded.data.link)
    }
}
