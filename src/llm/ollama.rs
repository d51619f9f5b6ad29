//! Local backend: HTTP against an Ollama-compatible endpoint
//!
//! Free (cost = 0), no vision support. Requests always set `stream: false`;
//! usage comes from `prompt_eval_count` / `eval_count`.

use crate::llm::http::HttpClient;
use crate::llm::{Completion, GenerateOptions, LlmBackend, LlmError, Message, Role, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct OllamaBackend {
    client: HttpClient,
    base_url: String,
}

impl OllamaBackend {
    /// # Errors
    ///
    /// `Misconfiguration` if the HTTP client cannot be constructed.
    pub fn new(base_url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: HttpClient::new(None)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn options(opts: &GenerateOptions) -> OllamaOptions {
        OllamaOptions {
            temperature: opts.temperature,
            num_predict: opts.max_tokens,
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(
        &self,
        model: &str,
        system: Option<&str>,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            system,
            options: Self::options(opts),
            stream: false,
        };

        debug!(model, prompt_chars = prompt.len(), "ollama generate");

        let request = self.client.inner().post(&url).json(&body);
        let response = self
            .client
            .execute_with_retry(request, opts.timeout, "ollama")
            .await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to parse ollama response: {e}")))?;

        Ok(Completion {
            text: body.response,
            usage: Usage {
                input_tokens: body.prompt_eval_count.unwrap_or(0),
                output_tokens: body.eval_count.unwrap_or(0),
            },
        })
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
            options: Self::options(opts),
            stream: false,
        };

        debug!(model, messages = messages.len(), "ollama chat");

        let request = self.client.inner().post(&url).json(&body);
        let response = self
            .client
            .execute_with_retry(request, opts.timeout, "ollama")
            .await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to parse ollama response: {e}")))?;

        Ok(Completion {
            text: body.message.content,
            usage: Usage {
                input_tokens: body.prompt_eval_count.unwrap_or(0),
                output_tokens: body.eval_count.unwrap_or(0),
            },
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    options: OllamaOptions,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    options: OllamaOptions,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let backend = OllamaBackend::new("http://localhost:11434/".to_string()).unwrap();
        assert_eq!(backend.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_generate_request_serializes_stream_false() {
        let body = GenerateRequest {
            model: "qwen2.5:32b",
            prompt: "привет",
            system: None,
            options: OllamaOptions {
                temperature: Some(0.2),
                num_predict: None,
            },
            stream: false,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stream"], serde_json::json!(false));
        assert!(value.get("system").is_none());
        assert_eq!(value["options"]["temperature"], serde_json::json!(0.2));
    }

    #[tokio::test]
    async fn test_vision_unsupported_on_local() {
        let backend = OllamaBackend::new("http://localhost:11434".to_string()).unwrap();
        let err = backend
            .vision(
                "qwen2.5:32b",
                None,
                "describe",
                &[],
                &GenerateOptions::with_timeout(std::time::Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Misconfiguration(_)));
    }
}
