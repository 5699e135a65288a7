pub mod content;
mod ollama;
mod openai;

use async_trait::async_trait;
use std::time::Duration;

pub use content::{ContentGenerator, LlmContent, OfflineDeck};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// Request for one completion
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Instructions sent ahead of the prompt
    pub system: String,
    /// The prompt text
    pub prompt: String,
    /// Maximum response length in tokens (provider-dependent)
    pub max_tokens: Option<u32>,
    /// Timeout for the request
    pub timeout: Duration,
    /// Optional model override (e.g., "gpt-4o" instead of configured model)
    pub model_override: Option<String>,
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,
    /// Provider-specific metadata (model used, tokens consumed, etc.)
    pub metadata: ResponseMetadata,
}

/// Metadata about the LLM response
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// Name of the provider (e.g., "openai", "ollama")
    pub provider: String,
    /// Model name used
    pub model: String,
    /// Tokens consumed (if available)
    pub tokens_used: Option<u32>,
    /// Latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all LLM providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the given request
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Get the name of this provider
    fn name(&self) -> &str;
}

/// Ordered set of providers. Earlier providers are preferred; later ones are
/// only asked when everything before them failed.
pub struct LlmManager {
    pub providers: Vec<Box<dyn LlmProvider>>,
}

impl LlmManager {
    /// Create a new LLM manager with the given providers
    pub fn new(providers: Vec<Box<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    /// Try each provider in turn and return the first success
    pub async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let mut last_error = None;

        for provider in &self.providers {
            match provider.generate(request.clone()).await {
                Ok(response) => {
                    tracing::debug!(
                        "Provider {} answered with {} in {}ms ({:?} tokens)",
                        response.metadata.provider,
                        response.metadata.model,
                        response.metadata.latency_ms,
                        response.metadata.tokens_used
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::ConfigError("No LLM providers configured".to_string())))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

/// Configuration for LLM providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI model to use
    pub openai_model: String,
    /// Ollama base URL
    pub ollama_base_url: Option<String>,
    /// Ollama model to use
    pub ollama_model: String,
    /// Default timeout for LLM requests
    pub default_timeout: Duration,
    /// Default max tokens for responses
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: Some("http://localhost:11434".to_string()),
            ollama_model: "llama3.2".to_string(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 600,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().and_then(non_empty);

        let openai_model = std::env::var("OPENAI_MODEL")
            .ok()
            .and_then(non_empty)
            .unwrap_or(defaults.openai_model);

        // Unset means "try the local default"; set-but-blank disables Ollama
        let ollama_base_url = match std::env::var("OLLAMA_BASE_URL") {
            Ok(url) => non_empty(url),
            Err(_) => defaults.ollama_base_url,
        };

        let ollama_model = std::env::var("OLLAMA_MODEL")
            .ok()
            .and_then(non_empty)
            .unwrap_or(defaults.ollama_model);

        Self {
            openai_api_key,
            openai_model,
            ollama_base_url,
            ollama_model,
            default_timeout: std::env::var("LLM_TIMEOUT")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            default_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.default_max_tokens),
        }
    }

    /// Build an LlmManager with all configured providers, OpenAI first
    pub fn build_manager(&self) -> LlmResult<LlmManager> {
        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )?));
        }

        if providers.is_empty() {
            return Err(LlmError::ConfigError(
                "No LLM providers configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
            ));
        }

        Ok(LlmManager::new(providers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        name: &'static str,
        answer: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Some(text) => Ok(GenerateResponse {
                    text: text.to_string(),
                    metadata: ResponseMetadata {
                        provider: self.name.to_string(),
                        model: "test".to_string(),
                        tokens_used: None,
                        latency_ms: 1,
                    },
                }),
                None => Err(LlmError::ApiError(format!("{} is down", self.name))),
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            system: "Be brief.".to_string(),
            prompt: "Hello".to_string(),
            max_tokens: Some(10),
            timeout: Duration::from_secs(1),
            model_override: None,
        }
    }

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.ollama_model, "llama3.2");
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_blank_ollama_url_disables_provider() {
        std::env::set_var("OLLAMA_BASE_URL", "   ");
        std::env::remove_var("OPENAI_API_KEY");
        let config = LlmConfig::from_env();
        assert_eq!(config.ollama_base_url, None);
        assert!(config.build_manager().is_err());
        std::env::remove_var("OLLAMA_BASE_URL");
    }

    #[tokio::test]
    async fn test_manager_falls_back_in_order() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let manager = LlmManager::new(vec![
            Box::new(Scripted {
                name: "flaky",
                answer: None,
                calls: first.clone(),
            }),
            Box::new(Scripted {
                name: "steady",
                answer: Some("ok"),
                calls: second.clone(),
            }),
        ]);

        let response = manager.generate(request()).await.unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(response.metadata.provider, "steady");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manager_reports_last_error() {
        let manager = LlmManager::new(vec![Box::new(Scripted {
            name: "down",
            answer: None,
            calls: Arc::new(AtomicUsize::new(0)),
        })]);
        let err = manager.generate(request()).await.unwrap_err();
        assert!(err.to_string().contains("down is down"));

        let empty = LlmManager::new(Vec::new());
        assert!(matches!(
            empty.generate(request()).await,
            Err(LlmError::ConfigError(_))
        ));
    }
}
