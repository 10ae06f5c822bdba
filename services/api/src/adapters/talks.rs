//! services/api/src/adapters/talks.rs
//!
//! This module contains the adapter for the external talking-video rendering
//! API. It implements the `VideoJobService` port from the `core` crate.

use async_trait::async_trait;
use companion_core::ports::{PortError, PortResult, TalkScript, TalkStatus, VideoJobService};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct CreateTalkRequest<'a> {
    script: WireScript<'a>,
    config: WireConfig,
    source_url: &'a str,
}

#[derive(Serialize)]
struct WireScript<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    ssml: bool,
    input: &'a str,
}

#[derive(Serialize)]
struct WireConfig {
    stitch: bool,
}

#[derive(Deserialize)]
struct CreateTalkResponse {
    id: String,
}

#[derive(Deserialize)]
struct TalkStatusResponse {
    status: String,
    result_url: Option<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `VideoJobService` against a D-ID-style talks API.
#[derive(Clone)]
pub struct TalksAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TalksAdapter {
    /// Creates a new `TalksAdapter`.
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(auth) = HeaderValue::from_str(&format!("Basic {}", self.api_key)) {
            headers.insert(AUTHORIZATION, auth);
        }
        headers
    }
}

//=========================================================================================
// `VideoJobService` Trait Implementation
//=========================================================================================

#[async_trait]
impl VideoJobService for TalksAdapter {
    /// Submits a talk job for the given source image and script; the job id
    /// is returned immediately and rendering continues asynchronously.
    async fn submit_talk(&self, source_url: &str, script: &TalkScript) -> PortResult<String> {
        let body = CreateTalkRequest {
            script: WireScript {
                kind: "text",
                ssml: script.ssml,
                input: &script.input,
            },
            config: WireConfig { stitch: true },
            source_url,
        };

        let response = self
            .client
            .post(format!("{}/talks", self.base_url))
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Upstream(format!(
                "talk submission failed with status {}",
                response.status()
            )));
        }

        let created: CreateTalkResponse = response
            .json()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;
        Ok(created.id)
    }

    async fn talk_status(&self, job_id: &str) -> PortResult<TalkStatus> {
        let response = self
            .client
            .get(format!("{}/talks/{}", self.base_url, job_id))
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Upstream(format!(
                "talk status for {} failed with status {}",
                job_id,
                response.status()
            )));
        }

        let status: TalkStatusResponse = response
            .json()
            .await
            .map_err(|e| PortError::Upstream(e.to_string()))?;

        match status.status.as_str() {
            "done" => Ok(TalkStatus {
                done: true,
                result_url: status.result_url,
            }),
            "error" | "rejected" => Err(PortError::Upstream(format!(
                "talk job {} ended in state '{}'",
                job_id, status.status
            ))),
            _ => Ok(TalkStatus {
                done: false,
                result_url: None,
            }),
        }
    }
}
