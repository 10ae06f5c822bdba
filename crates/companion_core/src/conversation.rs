//! crates/companion_core/src/conversation.rs
//!
//! The conversation manager: owns the per-user message log, the derived
//! system prompt, and the bounded context window sent to the chat model.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::domain::{Chat, ChatMessage, PersonaAttributes};
use crate::ports::{AssetStore, ChatModelService, PortResult};

/// Number of trailing messages sent to the chat model with each reply.
pub const CONTEXT_WINDOW: usize = 16;

/// Renders the system prompt from the partner's persona attributes.
///
/// Rendering is pure: identical attributes always produce an identical
/// prompt string, so re-syncing after an unchanged persona update is a
/// no-op at the model's end.
pub fn render_system_prompt(persona: &PersonaAttributes) -> String {
    format!(
        "你是USER的女朋友。你稱呼USER為{}。你的名子叫{}。你的MBTI是{}。你的職業是{}。你的個性是{}。禁止提到AI機器人。你的回答要口語化並在兩句內完成。",
        persona.nickname, persona.name, persona.mbti, persona.job, persona.personality
    )
}

/// Maintains one conversation per user and produces model replies.
#[derive(Clone)]
pub struct ConversationManager {
    store: Arc<dyn AssetStore>,
    model: Arc<dyn ChatModelService>,
}

impl ConversationManager {
    pub fn new(store: Arc<dyn AssetStore>, model: Arc<dyn ChatModelService>) -> Self {
        Self { store, model }
    }

    /// Returns the user's chat, creating an empty one if absent. Concurrent
    /// first messages converge on a single chat document (the store treats a
    /// duplicate-key outcome as "already exists").
    pub async fn ensure_chat(&self, user_id: Uuid) -> PortResult<Chat> {
        self.store.ensure_chat(user_id).await
    }

    /// Appends one `{role, content}` message to the ordered log. Prior
    /// messages are never removed or reordered.
    pub async fn append_message(
        &self,
        user_id: Uuid,
        role: &str,
        content: &str,
    ) -> PortResult<Chat> {
        self.store
            .append_chat_message(user_id, &ChatMessage::new(role, content))
            .await
    }

    /// Appends the user's message, asks the model for a reply over the
    /// trailing context window, appends the reply and returns it.
    ///
    /// If the model call fails the user's message stays appended; the caller
    /// sees "message stored, no reply" and may retry just the reply step.
    pub async fn reply(&self, user_id: Uuid, content: &str) -> PortResult<ChatMessage> {
        self.store.ensure_chat(user_id).await?;
        let chat = self
            .store
            .append_chat_message(user_id, &ChatMessage::new("user", content))
            .await?;

        let window_start = chat.messages.len().saturating_sub(CONTEXT_WINDOW);
        let window = &chat.messages[window_start..];

        let reply = self.model.complete(chat.system.as_deref(), window).await?;
        self.store.append_chat_message(user_id, &reply).await?;
        info!(%user_id, turns = chat.messages.len() + 1, "chat reply produced");
        Ok(reply)
    }

    /// The full ordered message log, oldest first. Fails with `NotFound`
    /// when the user has no chat yet.
    pub async fn history(&self, user_id: Uuid) -> PortResult<Vec<ChatMessage>> {
        let chat = self.store.get_chat_by_user(user_id).await?;
        Ok(chat.messages)
    }

    /// Re-derives the system prompt from the persona attributes and writes
    /// it onto the user's chat, creating the chat if absent.
    pub async fn sync_system_prompt(
        &self,
        user_id: Uuid,
        persona: &PersonaAttributes,
    ) -> PortResult<()> {
        let system = render_system_prompt(persona);
        self.store.set_chat_system(user_id, &system).await
    }
}
