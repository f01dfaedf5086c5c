//! services/api/src/adapters/llm.rs
//!
//! Chat-completion adapter implementing the `LlmOracle` port on top of
//! `async-openai`. Works against OpenAI or any compatible base URL.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use newsgenie_core::ports::{LlmOracle, PortError, PortResult};
use tracing::debug;

pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOracle {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Builds the client config, switching the base URL when one is given.
    pub fn client_config(api_key: &str, base_url: Option<&str>) -> OpenAIConfig {
        let config = OpenAIConfig::new().with_api_key(api_key);
        match base_url {
            Some(base) => config.with_api_base(base.trim_end_matches('/')),
            None => config,
        }
    }
}

#[async_trait]
impl LlmOracle for OpenAiOracle {
    async fn complete(&self, system_prompt: &str, user_text: &str) -> PortResult<String> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.trim().is_empty() {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_text)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
        ));

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| PortError::UpstreamUnavailable(e.to_string()))?;

        if let Some(usage) = &response.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion finished"
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PortError::UpstreamUnavailable("model returned no content".to_string()))
    }
}
