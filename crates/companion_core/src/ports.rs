//! crates/companion_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Chat, ChatMessage, Image, ImageCard, ImageFilter, Partner, PersonaAttributes, User,
    UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The operation conflicts with existing state (duplicate key, persona
    /// update with no bound partner, ...). Client-correctable.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// An external collaborator (talk-job service, media host, chat model)
    /// returned a non-success result. Transient; callers may retry.
    #[error("Upstream service failure: {0}")]
    Upstream(String),
    /// An external call or poll loop exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Asset Store Port
//=========================================================================================

/// Durable document storage for users, images, partners and chats.
///
/// The cache fields on images (`img_url`, `video_id`, `video_url`) are
/// written through dedicated populate-once setters: the first write wins and
/// later writes leave the stored value untouched.
#[async_trait]
pub trait AssetStore: Send + Sync {
    // --- User Management ---
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials>;

    // --- Auth Sessions ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Images ---
    async fn get_image_by_id(&self, image_id: Uuid) -> PortResult<Image>;

    async fn insert_image(&self, image: Image) -> PortResult<Image>;

    /// Draws up to `sample_size` random images matching the filter. Fields
    /// left unset in the filter impose no constraint.
    async fn sample_images(
        &self,
        filter: &ImageFilter,
        sample_size: usize,
    ) -> PortResult<Vec<ImageCard>>;

    /// First write wins; returns the stored URL, which may differ from the
    /// argument if another request already populated it.
    async fn set_image_url_once(&self, image_id: Uuid, img_url: &str) -> PortResult<String>;

    /// First write wins; returns the stored job id.
    async fn set_image_video_id_once(&self, image_id: Uuid, video_id: &str)
        -> PortResult<String>;

    /// First write wins; returns the stored URL.
    async fn set_image_video_url_once(
        &self,
        image_id: Uuid,
        video_url: &str,
    ) -> PortResult<String>;

    // --- Partners ---
    /// Creates the partner binding for the user, or re-points an existing
    /// binding at a new image. The `user_id` uniqueness invariant holds
    /// either way.
    async fn upsert_partner(&self, user_id: Uuid, image_id: Uuid) -> PortResult<Partner>;

    async fn get_partner_by_user(&self, user_id: Uuid) -> PortResult<Partner>;

    async fn update_partner_persona(
        &self,
        user_id: Uuid,
        persona: &PersonaAttributes,
    ) -> PortResult<Partner>;

    // --- Chats ---
    /// Returns the user's chat, creating an empty one if absent. Concurrent
    /// callers converge on a single chat document.
    async fn ensure_chat(&self, user_id: Uuid) -> PortResult<Chat>;

    async fn get_chat_by_user(&self, user_id: Uuid) -> PortResult<Chat>;

    /// Appends one message to the ordered log and returns the updated chat.
    async fn append_chat_message(&self, user_id: Uuid, message: &ChatMessage)
        -> PortResult<Chat>;

    /// Writes the derived system prompt, creating the chat if absent.
    async fn set_chat_system(&self, user_id: Uuid, system: &str) -> PortResult<()>;
}

//=========================================================================================
// External Service Ports
//=========================================================================================

/// The scripted utterance submitted with a talk job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkScript {
    pub input: String,
    pub ssml: bool,
}

/// Status of a submitted talk job. `result_url` is a transient URL, only
/// present once the job is done.
#[derive(Debug, Clone)]
pub struct TalkStatus {
    pub done: bool,
    pub result_url: Option<String>,
}

/// Asynchronous talking-video rendering. Jobs are submitted once and then
/// polled until they reach their terminal state.
#[async_trait]
pub trait VideoJobService: Send + Sync {
    /// Submits a job for the given source image and script; returns the job id.
    async fn submit_talk(&self, source_url: &str, script: &TalkScript) -> PortResult<String>;

    async fn talk_status(&self, job_id: &str) -> PortResult<TalkStatus>;
}

/// Re-hosts a transient video URL on durable public storage.
#[async_trait]
pub trait MediaRelayService: Send + Sync {
    async fn persist_video(&self, transient_url: &str) -> PortResult<String>;
}

/// Hosts a raw inline image payload and returns its durable public URL.
#[async_trait]
pub trait ImageHostService: Send + Sync {
    async fn host_image(&self, img_base64: &str) -> PortResult<String>;
}

/// A chat language model: one reply for a system prompt plus an ordered
/// message window.
#[async_trait]
pub trait ChatModelService: Send + Sync {
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
    ) -> PortResult<ChatMessage>;
}
