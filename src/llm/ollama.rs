use super::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Ollama provider implementation
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the given base URL and model
    pub fn new(base_url: String, model: String) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    system: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let start = Instant::now();
        let model = request
            .model_override
            .clone()
            .unwrap_or_else(|| self.model.clone());

        let ollama_request = OllamaGenerateRequest {
            model: model.clone(),
            system: request.system,
            prompt: request.prompt,
            stream: false,
            options: request.max_tokens.map(|num_predict| OllamaOptions {
                num_predict: Some(num_predict),
            }),
        };

        let url = format!("{}/api/generate", self.base_url);

        let response = tokio::time::timeout(
            request.timeout,
            self.client.post(&url).json(&ollama_request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout(request.timeout))?
        .map_err(|e| LlmError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError(format!(
                "Ollama API returned status: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        Ok(GenerateResponse {
            text: ollama_response.response.trim().to_string(),
            metadata: ResponseMetadata {
                provider: "ollama".to_string(),
                model,
                tokens_used: ollama_response.eval_count,
                latency_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = OllamaGenerateRequest {
            model: "llama3.2".to_string(),
            system: "sys".to_string(),
            prompt: "hi".to_string(),
            stream: false,
            options: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["system"], "sys");
        assert!(value.get("options").is_none());
    }

    #[tokio::test]
    #[ignore] // Only run with Ollama running locally
    async fn test_ollama_generate() {
        let provider =
            OllamaProvider::new("http://localhost:11434/".to_string(), "llama3.2".to_string())
                .unwrap();

        let request = GenerateRequest {
            system: "Answer in one short sentence.".to_string(),
            prompt: "Name a song everyone knows the chorus of.".to_string(),
            max_tokens: Some(60),
            timeout: Duration::from_secs(30),
            model_override: None,
        };

        let response = provider.generate(request).await.unwrap();
        assert!(!response.text.is_empty());
        assert_eq!(response.metadata.provider, "ollama");
    }
}
