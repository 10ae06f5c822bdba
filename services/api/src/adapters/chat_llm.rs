//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the chat language model.
//! It implements the `ChatModelService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, Role,
    },
    Client,
};
use async_trait::async_trait;
use companion_core::domain::ChatMessage;
use companion_core::ports::{ChatModelService, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatModelService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    match message.role.as_str() {
        "assistant" => Ok(ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into()),
        "system" => Ok(ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into()),
        _ => Ok(ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into()),
    }
}

//=========================================================================================
// `ChatModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatModelService for OpenAiChatAdapter {
    /// Produces one reply for the system prompt plus the bounded message window.
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
    ) -> PortResult<ChatMessage> {
        let mut request_messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(messages.len() + 1);

        if let Some(system) = system {
            request_messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
            );
        }
        for message in messages {
            request_messages
                .push(to_request_message(message).map_err(|e| PortError::Unexpected(e.to_string()))?);
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(request_messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Upstream(e.to_string()))?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            PortError::Upstream("chat model returned no choices in its response".to_string())
        })?;
        let content = choice.message.content.ok_or_else(|| {
            PortError::Upstream("chat model response contained no text content".to_string())
        })?;

        let role = match choice.message.role {
            Role::User => "user",
            Role::System => "system",
            _ => "assistant",
        };
        Ok(ChatMessage::new(role, content))
    }
}
