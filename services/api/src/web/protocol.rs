//! services/api/src/web/protocol.rs
//!
//! The fixed-shape rendering payload returned with each chat reply. A
//! downstream speech/video renderer consumes this shape verbatim, so the
//! field names and constants are part of the external contract.

use serde::Serialize;
use utoipa::ToSchema;

/// Voice used for rendered replies.
pub const VOICE_ID: &str = "zh-TW-HsiaoChenNeural";
const VOICE_PROVIDER: &str = "microsoft";

#[derive(Serialize, ToSchema)]
pub struct ReplyRenderPayload {
    pub script: RenderScript,
    pub config: RenderConfig,
}

#[derive(Serialize, ToSchema)]
pub struct RenderScript {
    #[serde(rename = "type")]
    pub kind: String,
    pub input: String,
    pub ssml: bool,
    pub provider: RenderProvider,
}

#[derive(Serialize, ToSchema)]
pub struct RenderProvider {
    #[serde(rename = "type")]
    pub kind: String,
    pub voice_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct RenderConfig {
    pub stitch: bool,
}

impl ReplyRenderPayload {
    /// Wraps a reply's text content into the rendering contract.
    pub fn for_reply(content: impl Into<String>) -> Self {
        Self {
            script: RenderScript {
                kind: "text".to_string(),
                input: content.into(),
                ssml: true,
                provider: RenderProvider {
                    kind: VOICE_PROVIDER.to_string(),
                    voice_id: VOICE_ID.to_string(),
                },
            },
            config: RenderConfig { stitch: true },
        }
    }
}
