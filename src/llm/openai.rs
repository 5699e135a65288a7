use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Instant;

/// Scenario writing wants some variety; topic checks get the same knob
const TEMPERATURE: f32 = 0.9;

/// Chat completions through the OpenAI API
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn chat_request(&self, request: &GenerateRequest) -> LlmResult<CreateChatCompletionRequest> {
        let build_err = |e: async_openai::error::OpenAIError| LlmError::ConfigError(e.to_string());

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.as_str())
                .build()
                .map_err(build_err)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.as_str())
                .build()
                .map_err(build_err)?
                .into(),
        ];

        let model = request.model_override.as_deref().unwrap_or(&self.model);
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model).messages(messages).temperature(TEMPERATURE);
        if let Some(max_tokens) = request.max_tokens {
            builder.max_tokens(max_tokens);
        }
        builder.build().map_err(build_err)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let start = Instant::now();
        let chat_request = self.chat_request(&request)?;
        let model = chat_request.model.clone();

        let response =
            tokio::time::timeout(request.timeout, self.client.chat().create(chat_request))
                .await
                .map_err(|_| LlmError::Timeout(request.timeout))?
                .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ParseError("completion had no content".to_string()))?;

        Ok(GenerateResponse {
            text: text.trim().to_string(),
            metadata: ResponseMetadata {
                provider: "openai".to_string(),
                model,
                tokens_used: response.usage.map(|u| u.total_tokens),
                latency_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
