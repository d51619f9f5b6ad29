//! Cloud backend: HTTPS against the Anthropic Messages API
//!
//! Cost is computed by the handle from the per-model price table. Vision
//! calls send base64 image content blocks ahead of the text prompt.

use crate::llm::http::HttpClient;
use crate::llm::{
    Completion, GenerateOptions, ImageInput, LlmBackend, LlmError, Message, Role, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8_192;

pub struct AnthropicBackend {
    client: HttpClient,
    api_key: String,
}

impl AnthropicBackend {
    /// # Errors
    ///
    /// `Misconfiguration` if the HTTP client (or proxy) cannot be constructed.
    pub fn new(api_key: String, proxy: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            client: HttpClient::new(proxy.as_deref())?,
            api_key,
        })
    }

    /// System messages go to the dedicated `system` field; the rest become
    /// the conversation body.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<ApiMessage>) {
        let mut system: Option<String> = None;
        let mut api_messages = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => {
                    if let Some(existing) = system.as_mut() {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    } else {
                        system = Some(msg.content.clone());
                    }
                }
                Role::User => api_messages.push(ApiMessage {
                    role: "user",
                    content: ApiContent::Text(msg.content.clone()),
                }),
                Role::Assistant => api_messages.push(ApiMessage {
                    role: "assistant",
                    content: ApiContent::Text(msg.content.clone()),
                }),
            }
        }
        (system, api_messages)
    }

    async fn send(
        &self,
        model: &str,
        system: Option<String>,
        messages: Vec<ApiMessage>,
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let body = ApiRequest {
            model,
            messages,
            max_tokens: opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: opts.temperature,
            system,
        };

        let request = self
            .client
            .inner()
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let response = self
            .client
            .execute_with_retry(request, opts.timeout, "anthropic")
            .await?;

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to parse anthropic response: {e}")))?;

        let text: String = body
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        if text.is_empty() {
            return Err(LlmError::Schema(
                "anthropic response carried no text content".to_string(),
            ));
        }

        let usage = body.usage.map_or(Usage::default(), |u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });

        debug!(
            model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "anthropic call completed"
        );

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn generate(
        &self,
        model: &str,
        system: Option<&str>,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let messages = vec![ApiMessage {
            role: "user",
            content: ApiContent::Text(prompt.to_string()),
        }];
        self.send(model, system.map(ToString::to_string), messages, opts)
            .await
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let (system, api_messages) = Self::convert_messages(messages);
        self.send(model, system, api_messages, opts).await
    }

    async fn vision(
        &self,
        model: &str,
        system: Option<&str>,
        prompt: &str,
        images: &[ImageInput],
        opts: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let mut blocks: Vec<ContentBlock> = images
            .iter()
            .map(|img| ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: img.media_type.clone(),
                    data: img.data_base64.clone(),
                },
            })
            .collect();
        blocks.push(ContentBlock::Text {
            text: prompt.to_string(),
        });

        let messages = vec![ApiMessage {
            role: "user",
            content: ApiContent::Blocks(blocks),
        }];
        self.send(model, system.map(ToString::to_string), messages, opts)
            .await
    }
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ResponseBlock>,
    usage: Option<ApiUsage>,
}
