//! crates/companion_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Represents a registered account - used throughout the app
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A catalog image that partners are bound to.
///
/// Images are shared between users. The `img_url`, `video_id` and `video_url`
/// fields start out empty and are each populated at most once; after that
/// they are treated as immutable (compute once, read many).
#[derive(Debug, Clone)]
pub struct Image {
    pub id: Uuid,
    /// Raw inline payload, kept so the image can be re-hosted if needed.
    pub img_base64: String,
    /// Durable public URL of the hosted still image.
    pub img_url: Option<String>,
    /// Upstream talk-job id, checkpointed so a crashed provisioning run
    /// never resubmits a duplicate job.
    pub video_id: Option<String>,
    /// Durable public URL of the cached idle video.
    pub video_url: Option<String>,
    pub origin: Option<String>,
    pub hair: Option<String>,
    pub hair_color: Option<String>,
    pub breast: Option<String>,
    pub glasses: Option<String>,
}

/// Projection of an [`Image`] used when presenting selection candidates.
#[derive(Debug, Clone)]
pub struct ImageCard {
    pub image_id: Uuid,
    pub img_base64: String,
}

/// Optional tag filter for candidate sampling. A `None` field imposes no
/// constraint on the matching images.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub origin: Option<String>,
    pub hair: Option<String>,
    pub hair_color: Option<String>,
    pub breast: Option<String>,
    pub glasses: Option<String>,
}

/// A user's chosen persona: the binding between a user and an image, plus
/// the editable persona attributes. At most one partner exists per user.
#[derive(Debug, Clone)]
pub struct Partner {
    pub id: Uuid,
    pub user_id: Uuid,
    pub image_id: Uuid,
    pub nickname: Option<String>,
    pub name: Option<String>,
    pub mbti: Option<String>,
    pub job: Option<String>,
    pub personality: Option<String>,
}

/// The user-editable persona fields, as submitted by the character-setting
/// surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaAttributes {
    pub nickname: String,
    pub name: String,
    pub mbti: String,
    pub job: String,
    pub personality: String,
}

/// One turn of a conversation. `role` is the wire string understood by the
/// chat model ("user", "assistant" or "system").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A user's conversation: the derived system prompt plus the append-only
/// message log. Exactly one chat exists per user, created lazily.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
}
