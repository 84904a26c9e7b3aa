//! Anthropic Claude 어댑터 (채팅 전용)
//!
//! source: https://docs.anthropic.com/en/api/messages
//!
//! system 메시지는 별도의 `system` 필드로 전달합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider::{
    compute_cost, estimate_message_tokens, estimate_tokens, require, send_json, LlmProvider,
    Operation, ProviderKind,
};
use super::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason, Message, Role,
    TokenUsage,
};
use crate::error::{RagError, Result};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// system 메시지와 대화 메시지 분리
fn split_system(messages: &[Message]) -> (Option<String>, Vec<WireMessage<'_>>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let conversation = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect();

    ((!system.is_empty()).then(|| system.join("\n\n")), conversation)
}

// ============================================================================
// AnthropicProvider
// ============================================================================

/// Anthropic Claude 프로바이더
#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: api_key.into(),
            client,
            base_url: ANTHROPIC_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let kind = self.kind();
        let descriptor = self.descriptor();
        let model = request
            .model
            .as_deref()
            .or(descriptor.default_chat_model)
            .ok_or(RagError::NoProvider { operation: "chat" })?;

        let (system, messages) = split_system(&request.messages);
        let body = MessagesRequest {
            model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system,
            messages,
        };

        let response: MessagesResponse = send_json(
            kind,
            self.client
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
        )
        .await?;

        let text_blocks: Vec<String> = response
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();
        require(kind, text_blocks.first(), "content[0].text")?;
        let content = text_blocks.concat();

        let served_model = response.model.unwrap_or_else(|| model.to_string());
        let usage = match response.usage {
            Some(u) => TokenUsage::new(u.input_tokens, u.output_tokens),
            None => TokenUsage::estimated(
                estimate_message_tokens(&request.messages),
                estimate_tokens(&content),
            ),
        };
        let cost = compute_cost(descriptor.price(&served_model, Operation::Chat), &usage);

        Ok(ChatResponse {
            content,
            provider: kind,
            model: served_model,
            usage,
            cost,
            finish_reason: response
                .stop_reason
                .map(|r| FinishReason::from_vendor(&r))
                .unwrap_or(FinishReason::Stop),
        })
    }

    async fn embed(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        // 라우터는 capability 검사로 이 경로를 선택하지 않음
        Err(RagError::NoProvider {
            operation: "embedding",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system() {
        let messages = vec![
            Message::system("rules"),
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
        ];
        let (system, conversation) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("rules"));
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation[0].role, "user");
        assert_eq!(conversation[1].role, "assistant");
    }

    #[test]
    fn test_request_omits_empty_system() {
        let messages = vec![Message::user("q")];
        let (system, messages) = split_system(&messages);
        let body = MessagesRequest {
            model: "claude-3-5-sonnet-20241022",
            max_tokens: 100,
            temperature: 0.7,
            system,
            messages,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["content"], "q");
    }

    #[test]
    fn test_parse_messages_response() {
        let raw = r#"{
            "id": "msg_1", "type": "message", "role": "assistant",
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "Hello"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 2}
        }"#;
        let response: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.content[0].text, "Hello");
        assert_eq!(response.usage.as_ref().unwrap().output_tokens, 2);
    }

    #[tokio::test]
    async fn test_embed_not_supported() {
        let provider = AnthropicProvider::new("fake").unwrap();
        let result = provider.embed(&EmbeddingRequest::new("x")).await;
        assert!(matches!(result, Err(RagError::NoProvider { .. })));
    }
}
